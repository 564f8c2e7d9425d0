use strata_build::LayerStore;
use strata_core::{ImageRecord, StrataConfig};

/// Remove every layer the current image does not reference.
pub async fn prune() -> anyhow::Result<()> {
    let project_dir = super::pipeline::project_dir()?;
    let config = StrataConfig::load(&project_dir)?;
    let state_dir = super::pipeline::state_dir(&project_dir, &config);

    let keep: Vec<_> = if ImageRecord::exists(&state_dir) {
        ImageRecord::load(&state_dir)?
            .layers
            .into_iter()
            .map(|l| l.key)
            .collect()
    } else {
        Vec::new()
    };

    let report = LayerStore::new(&state_dir).prune(&keep)?;
    for key in &report.layers {
        println!("Removed {}", key.short());
    }
    if report.staging > 0 {
        println!("Removed {} abandoned staging dir(s)", report.staging);
    }
    if report.layers.is_empty() && report.staging == 0 && report.locks == 0 {
        println!("Nothing to prune.");
    } else {
        println!("Pruned {} layer(s)", report.layers.len());
    }
    Ok(())
}
