use strata_core::StrataConfig;

/// Build, then launch the fresh image. A failed build launches nothing.
pub async fn up() -> anyhow::Result<()> {
    let project_dir = super::pipeline::project_dir()?;
    let config = StrataConfig::load(&project_dir)?;

    super::pipeline::build(&project_dir, &config).await?;
    println!();
    super::pipeline::launch(&project_dir, &config).await
}
