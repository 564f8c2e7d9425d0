use anyhow::Context;
use std::path::{Path, PathBuf};
use strata_build::{BuildOutcome, BuildPlan, Builder, LayerStore};
use strata_core::{ImageRecord, StrataConfig};
use strata_runtime::{LaunchPlan, Launcher, PythonToolchain};

/// Project root as an absolute path.
///
/// Layer paths handed to the interpreter must not depend on the child's
/// working directory.
pub(crate) fn project_dir() -> anyhow::Result<PathBuf> {
    std::fs::canonicalize(".").context("failed to resolve the project directory")
}

pub(crate) fn state_dir(project_dir: &Path, config: &StrataConfig) -> PathBuf {
    project_dir.join(&config.build.state_dir)
}

/// Run the layered build: manifest → base → toolchain → dependencies → source.
pub(crate) async fn build(
    project_dir: &Path,
    config: &StrataConfig,
) -> anyhow::Result<BuildOutcome> {
    let plan = BuildPlan::from_config(config, project_dir)?;
    let toolchain = PythonToolchain::new();
    let builder = Builder::new(&toolchain, &plan.state_dir);

    println!("Building {} ...", plan.image_name);
    let outcome = builder.build(&plan).await?;

    for step in &outcome.steps {
        let label = if step.cached { "cached" } else { "built" };
        println!("  {:<13} {:<7} {}", step.kind, label, step.key.short());
    }
    println!();
    println!(
        "Image {} ({})",
        outcome.image.name,
        outcome.image.id.short()
    );

    Ok(outcome)
}

/// Serve the built image until a termination signal arrives.
pub(crate) async fn launch(project_dir: &Path, config: &StrataConfig) -> anyhow::Result<()> {
    let state_dir = state_dir(project_dir, config);
    let image = ImageRecord::load(&state_dir)?;
    let top = image
        .top_layer()
        .ok_or_else(|| anyhow::anyhow!("image record at {} has no layers", state_dir.display()))?;

    let layer_dir = LayerStore::new(&state_dir).path(&top.key);
    if !layer_dir.is_dir() {
        anyhow::bail!(
            "layer {} is missing from {} — run `strata build` again",
            top.key.short(),
            state_dir.display()
        );
    }

    let plan = LaunchPlan::from_image(&image, &layer_dir, &config.launch)?;
    let toolchain = PythonToolchain::new();
    let mut launcher = Launcher::new(plan, &toolchain);

    let outcome = launcher.run(shutdown_signal()).await?;
    tracing::debug!(status = %outcome.status, terminated = outcome.terminated, "launcher finished");

    Ok(())
}

/// Resolves on Ctrl+C or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
