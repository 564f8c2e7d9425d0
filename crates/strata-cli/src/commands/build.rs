use strata_core::StrataConfig;

pub async fn build() -> anyhow::Result<()> {
    let project_dir = super::pipeline::project_dir()?;
    let config = StrataConfig::load(&project_dir)?;
    super::pipeline::build(&project_dir, &config).await?;
    Ok(())
}
