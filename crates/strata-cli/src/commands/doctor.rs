use std::path::Path;
use strata_core::StrataConfig;
use strata_runtime::{CheckResult, PythonToolchain};

pub async fn doctor() -> anyhow::Result<()> {
    let project_dir = Path::new(".");
    let loaded = StrataConfig::load(project_dir);
    let config = loaded
        .as_ref()
        // arch-lint: allow(no-silent-result-drop) reason="doctor reports an unreadable strata.toml below and checks the rest against defaults"
        .ok()
        .cloned()
        .unwrap_or_default();

    let toolchain = PythonToolchain::new();
    let mut report = toolchain.doctor(&config, project_dir).await;

    report.config_file = match &loaded {
        Ok(_) if project_dir.join(StrataConfig::FILE_NAME).exists() => CheckResult::ok("Found"),
        Ok(_) => CheckResult::ok("Not found, using defaults"),
        Err(e) => CheckResult::fail(&e.to_string()),
    };

    println!();
    println!("{report}");

    if !report.all_passed() {
        anyhow::bail!("some checks failed — see above for details");
    }

    Ok(())
}
