use strata_core::StrataConfig;

pub async fn eject() -> anyhow::Result<()> {
    let project_dir = super::pipeline::project_dir()?;
    let config = StrataConfig::load(&project_dir)?;

    let path = strata_build::eject::eject(&project_dir, &config)?;

    println!("Wrote {}", path.display());
    println!("Build it with: docker build -t {} .", config.image_name(&project_dir));
    Ok(())
}
