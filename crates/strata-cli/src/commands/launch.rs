use strata_core::StrataConfig;

/// Launch the most recently built image.
pub async fn launch() -> anyhow::Result<()> {
    let project_dir = super::pipeline::project_dir()?;
    let config = StrataConfig::load(&project_dir)?;
    super::pipeline::launch(&project_dir, &config).await
}
