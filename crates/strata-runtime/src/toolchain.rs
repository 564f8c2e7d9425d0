use crate::executor::{CommandExecutor, RealExecutor};
use crate::process::ProcessError;
use std::fmt;
use std::path::{Path, PathBuf};
use strata_core::{AppRef, Manifest, StrataConfig, normalize_name};

/// Packaging toolchain upgraded before any dependency is installed.
pub const TOOLCHAIN_PACKAGE: &str = "pip";

/// Imports the module and looks the object up, the way a process manager would.
const RESOLVE_APP_SCRIPT: &str = r#"
import importlib, sys
module_name, object_name = sys.argv[1], sys.argv[2]
module = importlib.import_module(module_name)
obj = getattr(module, object_name, None)
if obj is None:
    sys.exit("module %r has no attribute %r" % (module_name, object_name))
if not callable(obj):
    sys.exit("%s:%s is not callable" % (module_name, object_name))
"#;

/// Python toolchain operations, parameterized over the executor for testability.
pub struct PythonToolchain<E: CommandExecutor = RealExecutor> {
    executor: E,
}

impl PythonToolchain<RealExecutor> {
    pub fn new() -> Self {
        Self {
            executor: RealExecutor,
        }
    }
}

impl Default for PythonToolchain<RealExecutor> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: CommandExecutor> PythonToolchain<E> {
    pub fn with_executor(executor: E) -> Self {
        Self { executor }
    }

    // ── Base runtime ──

    /// Ask the interpreter for its version, e.g. `3.12.1`.
    pub async fn interpreter_version(&self, interpreter: &str) -> Result<String, ToolchainError> {
        let output = self
            .executor
            .exec(interpreter, &args(["--version"]), Path::new("."))
            .await
            .map_err(|e| ToolchainError::Interpreter {
                interpreter: interpreter.to_owned(),
                source: e,
            })?;

        let version = output.stdout.trim();
        Ok(version.strip_prefix("Python ").unwrap_or(version).to_owned())
    }

    /// Query the interpreter and verify it matches the pinned version.
    pub async fn pinned_interpreter(
        &self,
        interpreter: &str,
        pinned: &str,
    ) -> Result<String, ToolchainError> {
        let version = self.interpreter_version(interpreter).await?;
        if !version_matches(&version, pinned) {
            return Err(ToolchainError::VersionMismatch {
                interpreter: interpreter.to_owned(),
                expected: pinned.to_owned(),
                found: version,
            });
        }
        Ok(version)
    }

    /// Create a virtual environment at `env_dir`.
    pub async fn create_env(&self, interpreter: &str, env_dir: &Path) -> Result<(), ToolchainError> {
        let env = path_arg(env_dir)?;
        self.executor
            .exec(interpreter, &args(["-m", "venv", &env]), Path::new("."))
            .await
            .map_err(|e| ToolchainError::CreateEnv {
                path: env_dir.to_path_buf(),
                source: e,
            })?;
        Ok(())
    }

    // ── Packaging toolchain ──

    /// Upgrade the packaging toolchain inside the environment, bypassing any cache.
    ///
    /// pip exits 0 with "Requirement already satisfied" when it cannot reach
    /// the index, so a run whose stderr shows the index was unreachable is an
    /// error too. `--retries 0` keeps that failure immediate.
    pub async fn upgrade_toolchain(&self, python: &Path) -> Result<(), ToolchainError> {
        let program = path_arg(python)?;
        let output = self
            .executor
            .exec(
                &program,
                &args([
                    "-m",
                    "pip",
                    "install",
                    "--no-cache-dir",
                    "--disable-pip-version-check",
                    "--retries",
                    "0",
                    "--upgrade",
                    TOOLCHAIN_PACKAGE,
                ]),
                Path::new("."),
            )
            .await
            .map_err(|e| ToolchainError::ToolchainUpgrade { source: e })?;

        if let Some(detail) = index_failure(&output.stderr) {
            return Err(ToolchainError::IndexUnreachable { detail });
        }
        tracing::debug!(output = %output.stdout.trim(), "toolchain upgraded");
        Ok(())
    }

    // ── Dependencies ──

    /// Install every manifest entry plus `extra` specifiers, bypassing any cache.
    ///
    /// When the installer names the requirement it could not satisfy, the
    /// error carries it.
    pub async fn install_requirements(
        &self,
        python: &Path,
        manifest: &Path,
        extra: &[String],
        cwd: &Path,
    ) -> Result<(), InstallError> {
        let program = path_arg(python).map_err(|e| InstallError::Toolchain(Box::new(e)))?;
        let manifest_arg = path_arg(manifest).map_err(|e| InstallError::Toolchain(Box::new(e)))?;

        let mut cmd = args([
            "-m",
            "pip",
            "install",
            "--no-cache-dir",
            "--disable-pip-version-check",
            "-r",
            &manifest_arg,
        ]);
        cmd.extend(extra.iter().cloned());

        match self.executor.exec(&program, &cmd, cwd).await {
            Ok(output) => {
                tracing::debug!(output = %output.stdout.trim(), "dependencies installed");
                Ok(())
            }
            Err(e) => match e.stderr().and_then(failing_requirement) {
                Some(requirement) => Err(InstallError::Unresolvable {
                    requirement,
                    source: e,
                }),
                None => Err(InstallError::Failed { source: e }),
            },
        }
    }

    // ── Application object ──

    /// Import `app.module` from `workdir` and check `app.object` is a callable.
    pub async fn resolve_app(
        &self,
        python: &Path,
        app: &AppRef,
        workdir: &Path,
    ) -> Result<(), ToolchainError> {
        let program = path_arg(python)?;
        self.executor
            .exec(
                &program,
                &args(["-c", RESOLVE_APP_SCRIPT, &app.module, &app.object]),
                workdir,
            )
            .await
            .map_err(|e| ToolchainError::AppResolution {
                app: app.to_string(),
                detail: e
                    .stderr()
                    .and_then(|s| s.lines().rev().find(|l| !l.trim().is_empty()))
                    .map(|l| l.trim().to_owned())
                    .unwrap_or_else(|| e.to_string()),
            })?;
        Ok(())
    }

    // ── Doctor ──

    /// Run all diagnostic checks without early return.
    /// Returns a report with pass/fail for each check item.
    pub async fn doctor(&self, config: &StrataConfig, project_dir: &Path) -> DoctorReport {
        let mut report = DoctorReport::default();

        // 1. Interpreter
        let interpreter = config.runtime.interpreter();
        match self.interpreter_version(&interpreter).await {
            Ok(version) => {
                report.interpreter = CheckResult::ok(&format!("{interpreter} ({version})"));
                report.pinned_version = if version_matches(&version, &config.runtime.python) {
                    CheckResult::ok(&config.runtime.python)
                } else {
                    CheckResult::fail(&format!(
                        "expected {}, found {version}",
                        config.runtime.python
                    ))
                };
            }
            Err(e) => {
                report.interpreter = CheckResult::fail(&e.to_string());
                report.pinned_version = CheckResult::fail("interpreter unavailable");
            }
        }

        // 2. Manifest
        let manifest_path = project_dir.join(&config.build.manifest);
        report.manifest = match Manifest::load(&manifest_path) {
            Ok(m) => CheckResult::ok(&format!(
                "{} ({} requirement(s))",
                config.build.manifest,
                m.requirements.len()
            )),
            Err(e) => CheckResult::fail(&e.to_string()),
        };

        // 3. Application module
        report.app_module = match config.launch.app_ref() {
            Ok(app) => {
                match app
                    .module_candidates()
                    .into_iter()
                    .find(|c| project_dir.join(c).exists())
                {
                    Some(found) => CheckResult::ok(&format!("{app} ({})", found.display())),
                    None => CheckResult::fail(&format!("no source file for module '{}'", app.module)),
                }
            }
            Err(e) => CheckResult::fail(&e.to_string()),
        };

        // 4. Port
        report.port = match config.launch.bind_addr() {
            Ok(addr) => match crate::launcher::check_port_available(addr) {
                Ok(()) => CheckResult::ok(&format!("{addr} available")),
                Err(e) => CheckResult::fail(&e.to_string()),
            },
            Err(e) => CheckResult::fail(&e.to_string()),
        };

        report
    }
}

// ── Helper ──

fn args<const N: usize>(a: [&str; N]) -> Vec<String> {
    a.iter().map(|s| (*s).to_owned()).collect()
}

fn path_arg(path: &Path) -> Result<String, ToolchainError> {
    path.to_str()
        .map(str::to_owned)
        .ok_or_else(|| ToolchainError::InvalidPath(path.to_path_buf()))
}

/// `3.12.1` matches a pin of `3.12` or `3.12.1`, but not `3.1`.
pub fn version_matches(version: &str, pinned: &str) -> bool {
    version == pinned
        || version
            .strip_prefix(pinned)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Python executable inside a virtual environment.
pub fn env_python(env_dir: &Path) -> PathBuf {
    if cfg!(windows) {
        env_dir.join("Scripts").join("python.exe")
    } else {
        env_dir.join("bin").join("python")
    }
}

/// Extract the requirement pip could not satisfy from its error output.
pub fn failing_requirement(stderr: &str) -> Option<String> {
    const MARKERS: &[&str] = &[
        "No matching distribution found for ",
        "Could not find a version that satisfies the requirement ",
    ];

    stderr.lines().find_map(|line| {
        MARKERS.iter().find_map(|marker| {
            let (_, rest) = line.split_once(marker)?;
            let requirement = rest.split_whitespace().next()?;
            Some(requirement.to_owned())
        })
    })
}

/// First line of pip output showing the package index could not be used.
fn index_failure(stderr: &str) -> Option<String> {
    const MARKERS: &[&str] = &[
        "Could not fetch URL",
        "Retrying (Retry(",
        "Failed to establish a new connection",
        "connection broken",
        "No matching distribution found for ",
        "Could not find a version that satisfies the requirement ",
    ];

    stderr
        .lines()
        .find(|line| MARKERS.iter().any(|marker| line.contains(marker)))
        .map(|line| line.trim().to_owned())
}

/// Normalised package name of a requirement string such as `Foo_Bar==1.0`.
pub fn requirement_name(requirement: &str) -> String {
    let end = requirement
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
        .unwrap_or(requirement.len());
    normalize_name(&requirement[..end])
}

// ── Error types ──

#[derive(Debug, thiserror::Error)]
pub enum ToolchainError {
    #[error("interpreter '{interpreter}' is not usable")]
    Interpreter {
        interpreter: String,
        source: ProcessError,
    },

    #[error("interpreter '{interpreter}' is Python {found}, but {expected} is pinned")]
    VersionMismatch {
        interpreter: String,
        expected: String,
        found: String,
    },

    #[error("failed to create environment at {path}")]
    CreateEnv { path: PathBuf, source: ProcessError },

    #[error("packaging toolchain upgrade failed")]
    ToolchainUpgrade { source: ProcessError },

    #[error("packaging toolchain was not upgraded, the package index is unreachable: {detail}")]
    IndexUnreachable { detail: String },

    #[error("application object '{app}' could not be resolved: {detail}")]
    AppResolution { app: String, detail: String },

    #[error("path is not valid UTF-8: {0}")]
    InvalidPath(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    #[error("requirement '{requirement}' could not be resolved")]
    Unresolvable {
        requirement: String,
        source: ProcessError,
    },

    #[error("dependency installation failed")]
    Failed { source: ProcessError },

    #[error(transparent)]
    Toolchain(Box<ToolchainError>),
}

// ── Doctor types ──

#[derive(Debug, Default)]
pub struct DoctorReport {
    pub interpreter: CheckResult,
    pub pinned_version: CheckResult,
    pub manifest: CheckResult,
    pub app_module: CheckResult,
    pub port: CheckResult,
    pub config_file: CheckResult,
}

impl DoctorReport {
    pub fn all_passed(&self) -> bool {
        self.checks().iter().all(|(_, c)| c.passed)
    }

    fn checks(&self) -> [(&'static str, &CheckResult); 6] {
        [
            ("Interpreter", &self.interpreter),
            ("Pinned version", &self.pinned_version),
            ("Manifest", &self.manifest),
            ("App module", &self.app_module),
            ("Port", &self.port),
            ("strata.toml", &self.config_file),
        ]
    }
}

impl fmt::Display for DoctorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (label, check) in self.checks() {
            writeln!(f, "  [{}] {label:<15} {}", check.icon(), check.detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct CheckResult {
    pub passed: bool,
    pub detail: String,
}

impl CheckResult {
    pub fn ok(detail: &str) -> Self {
        Self {
            passed: true,
            detail: detail.to_owned(),
        }
    }

    pub fn fail(detail: &str) -> Self {
        Self {
            passed: false,
            detail: detail.to_owned(),
        }
    }

    pub fn icon(&self) -> &'static str {
        if self.passed { "OK" } else { "NG" }
    }
}

