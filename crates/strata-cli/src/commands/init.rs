use std::path::Path;
use strata_core::StrataConfig;

const STRATA_TOML: &str = r#"[project]
# name = "my-service"

[runtime]
python = "3.12"

[build]
manifest = "requirements.txt"
# extra_requirements = ["gunicorn"]

[launch]
bind = "0.0.0.0:8080"
app = "app:server"
# workers = 2
"#;

/// Write a starter strata.toml into the current directory.
pub async fn init_project() -> anyhow::Result<()> {
    let path = Path::new(StrataConfig::FILE_NAME);
    if path.exists() {
        anyhow::bail!("{} already exists", StrataConfig::FILE_NAME);
    }
    std::fs::write(path, STRATA_TOML)?;
    println!("Created {}", StrataConfig::FILE_NAME);

    if !Path::new("requirements.txt").exists() {
        eprintln!("note: requirements.txt not found; `strata build` needs it");
    }

    println!();
    println!("Next steps:");
    println!("  strata doctor   check the interpreter, manifest and port");
    println!("  strata up       build the image and serve it on 0.0.0.0:8080");
    Ok(())
}
