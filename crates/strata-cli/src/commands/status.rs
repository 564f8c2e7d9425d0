use strata_build::LayerStore;
use strata_core::{ImageRecord, StrataConfig};

/// Print the current image record and whether each of its layers is present.
pub async fn status() -> anyhow::Result<()> {
    let project_dir = super::pipeline::project_dir()?;
    let config = StrataConfig::load(&project_dir)?;
    let state_dir = super::pipeline::state_dir(&project_dir, &config);

    let image = ImageRecord::load(&state_dir)?;
    let store = LayerStore::new(&state_dir);

    println!("Image   {}", image.name);
    println!("Id      {}", image.id);
    println!("Serves  {} on {}", image.config.app, image.config.bind);
    println!();
    for layer in &image.layers {
        let present = if store.contains(&layer.key) {
            "present"
        } else {
            "MISSING"
        };
        println!("  {:<13} {}  {present}", layer.kind, layer.key.short());
    }

    let stale = store
        .keys()?
        .into_iter()
        .filter(|k| !image.layers.iter().any(|l| &l.key == k))
        .count();
    if stale > 0 {
        println!();
        println!("{stale} unreferenced layer(s); `strata prune` removes them");
    }
    Ok(())
}
