use std::path::{Path, PathBuf};

use strata_core::StrataConfig;

use crate::dockerfile::DockerfileGenerator;

pub const DOCKERFILE: &str = "Dockerfile";

/// Render the project's configuration as a Dockerfile at the project root.
///
/// Refuses to overwrite an existing Dockerfile.
pub fn eject(project_dir: &Path, config: &StrataConfig) -> Result<PathBuf, EjectError> {
    let app = config.launch.app_ref().map_err(EjectError::Config)?;
    config.launch.bind_addr().map_err(EjectError::Config)?;

    let path = project_dir.join(DOCKERFILE);
    if path.symlink_metadata().is_ok() {
        return Err(EjectError::AlreadyExists(path));
    }

    let content = DockerfileGenerator::new(config, &app).render();
    std::fs::write(&path, content).map_err(|e| EjectError::Write {
        path: path.clone(),
        source: e,
    })?;

    tracing::info!(path = %path.display(), "wrote Dockerfile");
    Ok(path)
}

#[derive(Debug, thiserror::Error)]
pub enum EjectError {
    #[error("{0} already exists; remove it to eject again")]
    AlreadyExists(PathBuf),
    #[error(transparent)]
    Config(strata_core::Error),
    #[error("failed to write {path}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}
