use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::app_ref::AppRef;

/// strata.toml configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrataConfig {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub build: BuildConfig,
    #[serde(default)]
    pub launch: LaunchConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Image name (defaults to the project directory name)
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Pinned interpreter version
    #[serde(default = "default_python")]
    pub python: String,
    /// Interpreter command (defaults to `python<version>`)
    #[serde(default)]
    pub interpreter: Option<String>,
    /// Container base image used when ejecting a Dockerfile
    /// (defaults to `python:<version>-slim`)
    #[serde(default)]
    pub base_image: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildConfig {
    /// Dependency manifest, relative to the project root
    #[serde(default = "default_manifest")]
    pub manifest: String,
    /// Layer store and image record location, relative to the project root
    #[serde(default = "default_state_dir")]
    pub state_dir: String,
    /// Requirement specifiers installed alongside the manifest.
    /// The process manager has to be importable from the runtime environment.
    #[serde(default = "default_extra_requirements")]
    pub extra_requirements: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchConfig {
    /// Socket the process manager binds
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Application object served, as `module:object`
    #[serde(default = "default_app")]
    pub app: String,
    /// Python module run with `-m` to serve the application
    #[serde(default = "default_process_manager")]
    pub process_manager: String,
    /// Worker count handed to the process manager
    #[serde(default)]
    pub workers: Option<u32>,
    /// Seconds to wait for the socket to accept connections
    #[serde(default = "default_ready_timeout_secs")]
    pub ready_timeout_secs: u64,
    /// Seconds to wait after SIGTERM before killing the process manager
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            python: default_python(),
            interpreter: None,
            base_image: None,
        }
    }
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            manifest: default_manifest(),
            state_dir: default_state_dir(),
            extra_requirements: default_extra_requirements(),
        }
    }
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            app: default_app(),
            process_manager: default_process_manager(),
            workers: None,
            ready_timeout_secs: default_ready_timeout_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl StrataConfig {
    /// File name looked up in the project directory.
    pub const FILE_NAME: &'static str = "strata.toml";

    /// Load from strata.toml at the given path, or return defaults if not found.
    pub fn load(project_dir: &Path) -> crate::Result<Self> {
        let config_path = project_dir.join(Self::FILE_NAME);
        if config_path.exists() {
            let content =
                std::fs::read_to_string(&config_path).map_err(|e| crate::Error::ConfigLoad {
                    path: config_path.clone(),
                    source: e,
                })?;
            let config = toml::from_str(&content).map_err(|e| crate::Error::ConfigParse {
                path: config_path.clone(),
                source: e,
            })?;
            tracing::debug!(path = %config_path.display(), "loaded config");
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Image name: `[project].name`, else the project directory's name.
    pub fn image_name(&self, project_dir: &Path) -> String {
        if let Some(name) = &self.project.name {
            return name.clone();
        }
        std::fs::canonicalize(project_dir)
            // arch-lint: allow(no-silent-result-drop) reason="an unresolvable directory falls back to the default image name"
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "app".to_owned())
    }
}

impl RuntimeConfig {
    /// Interpreter command used to create the base environment.
    pub fn interpreter(&self) -> String {
        self.interpreter
            .clone()
            .unwrap_or_else(|| format!("python{}", self.python))
    }

    pub fn base_image(&self) -> String {
        self.base_image
            .clone()
            .unwrap_or_else(|| format!("python:{}-slim", self.python))
    }
}

impl LaunchConfig {
    pub fn bind_addr(&self) -> crate::Result<SocketAddr> {
        self.bind
            .parse()
            .map_err(|e: std::net::AddrParseError| crate::Error::InvalidBind {
                value: self.bind.clone(),
                reason: e.to_string(),
            })
    }

    pub fn app_ref(&self) -> crate::Result<AppRef> {
        self.app.parse()
    }
}

fn default_python() -> String {
    "3.12".to_owned()
}

fn default_manifest() -> String {
    "requirements.txt".to_owned()
}

fn default_state_dir() -> String {
    ".strata".to_owned()
}

fn default_extra_requirements() -> Vec<String> {
    vec!["gunicorn".to_owned()]
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_owned()
}

fn default_app() -> String {
    "app:server".to_owned()
}

fn default_process_manager() -> String {
    "gunicorn".to_owned()
}

fn default_ready_timeout_secs() -> u64 {
    30
}

fn default_stop_timeout_secs() -> u64 {
    30
}
