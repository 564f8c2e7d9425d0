//! The four-step, cache-keyed build.
//!
//! Every step is a pure function from (parent layer, inputs) to a new layer
//! and its key, so a rebuild with unchanged inputs resolves every key to an
//! already committed layer and runs nothing.

use std::path::{Path, PathBuf};

use strata_core::{
    Digest, DigestBuilder, ImageConfig, ImageRecord, LayerKind, LayerRef, Manifest, StrataConfig,
};
use strata_runtime::process::ProcessError;
use strata_runtime::toolchain::{
    InstallError, PythonToolchain, TOOLCHAIN_PACKAGE, ToolchainError, env_python,
    requirement_name,
};
use strata_runtime::CommandExecutor;

use crate::layer::{Acquired, LayerError, LayerStore};
use crate::overlay::{OverlayError, SourceTree};

/// Environment directory inside every layer.
pub const ENV_DIR: &str = "env";
/// Application directory inside every layer.
pub const APP_DIR: &str = "app";

const KEY_DOMAIN: &str = "strata/layer/v1";

/// Inputs of one build, resolved from configuration.
#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub project_dir: PathBuf,
    pub state_dir: PathBuf,
    pub image_name: String,
    pub interpreter: String,
    pub python_version: String,
    pub manifest_path: PathBuf,
    pub extra_requirements: Vec<String>,
    pub launch: ImageConfig,
}

impl BuildPlan {
    /// Resolve a plan, validating launch settings before anything is built.
    pub fn from_config(config: &StrataConfig, project_dir: &Path) -> strata_core::Result<Self> {
        let bind = config.launch.bind_addr()?;
        let app = config.launch.app_ref()?;

        Ok(Self {
            project_dir: project_dir.to_path_buf(),
            state_dir: project_dir.join(&config.build.state_dir),
            image_name: config.image_name(project_dir),
            interpreter: config.runtime.interpreter(),
            python_version: config.runtime.python.clone(),
            manifest_path: project_dir.join(&config.build.manifest),
            extra_requirements: config.build.extra_requirements.clone(),
            launch: ImageConfig {
                workdir: APP_DIR.to_owned(),
                env_dir: ENV_DIR.to_owned(),
                bind: bind.to_string(),
                app: app.to_string(),
                process_manager: config.launch.process_manager.clone(),
                workers: config.launch.workers,
            },
        })
    }

    /// Paths, relative to the project, never copied into the source layer.
    fn source_excludes(&self) -> Vec<PathBuf> {
        self.state_dir
            .strip_prefix(&self.project_dir)
            .map(|rel| rel.components().collect::<PathBuf>())
            // arch-lint: allow(no-silent-result-drop) reason="a state dir outside the project is never part of the tree"
            .into_iter()
            .filter(|rel| !rel.as_os_str().is_empty())
            .collect()
    }

    /// Manifest location inside the application directory.
    fn manifest_in_app(&self) -> PathBuf {
        self.manifest_path
            .strip_prefix(&self.project_dir)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| {
                self.manifest_path
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("requirements.txt"))
            })
    }
}

// ── Layer keys ──

pub fn base_key(interpreter: &str, version: &str) -> Digest {
    let mut key = DigestBuilder::new(KEY_DOMAIN);
    key.str(LayerKind::Base.as_str()).str(interpreter).str(version);
    key.finish()
}

pub fn toolchain_key(parent: &Digest) -> Digest {
    let mut key = DigestBuilder::new(KEY_DOMAIN);
    key.str(LayerKind::Toolchain.as_str())
        .str(parent.as_str())
        .str(TOOLCHAIN_PACKAGE);
    key.finish()
}

pub fn dependencies_key(parent: &Digest, manifest: &[u8], extra: &[String]) -> Digest {
    let mut key = DigestBuilder::new(KEY_DOMAIN);
    key.str(LayerKind::Dependencies.as_str())
        .str(parent.as_str())
        .field(manifest);
    for requirement in extra {
        key.str(requirement);
    }
    key.finish()
}

pub fn source_key(parent: &Digest, tree: &Digest) -> Digest {
    let mut key = DigestBuilder::new(KEY_DOMAIN);
    key.str(LayerKind::Source.as_str())
        .str(parent.as_str())
        .str(tree.as_str());
    key.finish()
}

// ── Builder ──

#[derive(Debug, Clone)]
pub struct StepReport {
    pub kind: LayerKind,
    pub key: Digest,
    /// Committed layer directory
    pub path: PathBuf,
    pub cached: bool,
}

#[derive(Debug)]
pub struct BuildOutcome {
    pub image: ImageRecord,
    pub steps: Vec<StepReport>,
}

/// Runs the pipeline against a layer store, parameterized over the executor.
pub struct Builder<'a, E: CommandExecutor> {
    toolchain: &'a PythonToolchain<E>,
    store: LayerStore,
}

struct StepInputs<'p> {
    plan: &'p BuildPlan,
    manifest: &'p Manifest,
    tree: &'p SourceTree,
}

impl<'a, E: CommandExecutor> Builder<'a, E> {
    pub fn new(toolchain: &'a PythonToolchain<E>, state_dir: &Path) -> Self {
        Self {
            toolchain,
            store: LayerStore::new(state_dir),
        }
    }

    pub fn store(&self) -> &LayerStore {
        &self.store
    }

    /// Build all four layers in order, then write the image record.
    ///
    /// Nothing is written to the image record unless every step succeeds.
    pub async fn build(&self, plan: &BuildPlan) -> Result<BuildOutcome, BuildError> {
        let manifest = Manifest::load(&plan.manifest_path).map_err(BuildError::Manifest)?;
        if let Some(option) = manifest.file_references().first() {
            return Err(BuildError::FileReference {
                option: (*option).to_owned(),
            });
        }
        let excludes = plan.source_excludes();
        let excludes: Vec<&Path> = excludes.iter().map(PathBuf::as_path).collect();
        let tree = SourceTree::scan(&plan.project_dir, &excludes)?;

        let version = self
            .toolchain
            .pinned_interpreter(&plan.interpreter, &plan.python_version)
            .await
            .map_err(BuildError::BaseRuntime)?;

        let inputs = StepInputs {
            plan,
            manifest: &manifest,
            tree: &tree,
        };

        let base = self
            .layer(LayerKind::Base, base_key(&plan.interpreter, &version), None, &inputs)
            .await?;
        let toolchain = self
            .layer(
                LayerKind::Toolchain,
                toolchain_key(&base.key),
                Some(&base),
                &inputs,
            )
            .await?;
        let dependencies = self
            .layer(
                LayerKind::Dependencies,
                dependencies_key(&toolchain.key, manifest.raw(), &plan.extra_requirements),
                Some(&toolchain),
                &inputs,
            )
            .await?;
        let source = self
            .layer(
                LayerKind::Source,
                source_key(&dependencies.key, &tree.digest),
                Some(&dependencies),
                &inputs,
            )
            .await?;
        let steps = vec![base, toolchain, dependencies, source];

        let layers = steps
            .iter()
            .map(|s| LayerRef {
                kind: s.kind,
                key: s.key.clone(),
            })
            .collect();
        let image = ImageRecord::new(plan.image_name.clone(), layers, plan.launch.clone());
        image.save(&plan.state_dir).map_err(BuildError::Image)?;
        tracing::info!(image = %plan.image_name, id = %image.id.short(), "image written");

        Ok(BuildOutcome { image, steps })
    }

    /// Resolve one layer: reuse it when its key is committed, build it otherwise.
    async fn layer(
        &self,
        kind: LayerKind,
        key: Digest,
        parent: Option<&StepReport>,
        inputs: &StepInputs<'_>,
    ) -> Result<StepReport, BuildError> {
        let parent_path = parent.map(|p| p.path.as_path());
        let (path, cached) = match self.store.acquire(&key, parent_path)? {
            Acquired::Cached(path) => (path, true),
            Acquired::Fresh(staging) => {
                tracing::info!(step = %kind, key = %key.short(), "building layer");
                self.apply(kind, staging.path(), inputs).await?;
                (staging.commit()?, false)
            }
        };

        tracing::info!(step = %kind, key = %key.short(), cached, "layer ready");
        Ok(StepReport {
            kind,
            key,
            path,
            cached,
        })
    }

    async fn apply(
        &self,
        kind: LayerKind,
        staging: &Path,
        inputs: &StepInputs<'_>,
    ) -> Result<(), BuildError> {
        let env_dir = staging.join(ENV_DIR);
        let app_dir = staging.join(APP_DIR);

        match kind {
            LayerKind::Base => self
                .toolchain
                .create_env(&inputs.plan.interpreter, &env_dir)
                .await
                .map_err(BuildError::BaseRuntime),

            LayerKind::Toolchain => self
                .toolchain
                .upgrade_toolchain(&env_python(&env_dir))
                .await
                .map_err(BuildError::Toolchain),

            LayerKind::Dependencies => {
                let manifest = app_dir.join(inputs.plan.manifest_in_app());
                if let Some(parent) = manifest.parent() {
                    std::fs::create_dir_all(parent).map_err(|e| BuildError::ManifestCopy {
                        path: parent.to_path_buf(),
                        source: e,
                    })?;
                }
                std::fs::write(&manifest, inputs.manifest.raw()).map_err(|e| {
                    BuildError::ManifestCopy {
                        path: manifest.clone(),
                        source: e,
                    }
                })?;

                self.toolchain
                    .install_requirements(
                        &env_python(&env_dir),
                        &manifest,
                        &inputs.plan.extra_requirements,
                        &app_dir,
                    )
                    .await
                    .map_err(|e| match e {
                        InstallError::Unresolvable {
                            requirement,
                            source,
                        } => BuildError::Unresolvable {
                            line: inputs
                                .manifest
                                .find(&requirement_name(&requirement))
                                .map(|r| r.line),
                            requirement,
                            source,
                        },
                        other => BuildError::Install(other),
                    })
            }

            LayerKind::Source => inputs.tree.copy_into(&app_dir).map_err(BuildError::from),
        }
    }
}

fn line_suffix(line: &Option<usize>) -> String {
    match line {
        Some(line) => format!(" (manifest line {line})"),
        None => String::new(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Manifest(strata_core::Error),

    #[error(
        "manifest option '{option}' refers to another file, but only the manifest is present when dependencies install"
    )]
    FileReference { option: String },

    #[error("base runtime layer failed")]
    BaseRuntime(#[source] ToolchainError),

    #[error("packaging toolchain layer failed")]
    Toolchain(#[source] ToolchainError),

    #[error("requirement '{requirement}'{} could not be resolved", line_suffix(line))]
    Unresolvable {
        requirement: String,
        line: Option<usize>,
        source: ProcessError,
    },

    #[error("dependency layer failed")]
    Install(#[source] InstallError),

    #[error("failed to copy manifest to {path}")]
    ManifestCopy {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error(transparent)]
    Overlay(#[from] OverlayError),

    #[error("failed to write image record")]
    Image(#[source] strata_core::Error),
}
