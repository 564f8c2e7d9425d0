use strata_core::{AppRef, StrataConfig};

/// Renders a Dockerfile equivalent to the local layered build.
///
/// Instruction order mirrors the layer order, so the container build caches
/// the same way: editing source only invalidates the final `COPY . .`.
pub struct DockerfileGenerator<'a> {
    config: &'a StrataConfig,
    app: &'a AppRef,
}

impl<'a> DockerfileGenerator<'a> {
    pub fn new(config: &'a StrataConfig, app: &'a AppRef) -> Self {
        Self { config, app }
    }

    pub fn render(&self) -> String {
        let launch = &self.config.launch;
        let manifest = &self.config.build.manifest;

        let extra = if self.config.build.extra_requirements.is_empty() {
            String::new()
        } else {
            format!(" {}", self.config.build.extra_requirements.join(" "))
        };

        // Same invocation as the local launcher: the manager runs as a module.
        let mut cmd = vec![
            "python".to_owned(),
            "-m".to_owned(),
            launch.process_manager.clone(),
            "--bind".to_owned(),
            launch.bind.clone(),
        ];
        if let Some(workers) = launch.workers {
            cmd.push("--workers".to_owned());
            cmd.push(workers.to_string());
        }
        cmd.push(self.app.to_string());
        let cmd = cmd
            .iter()
            .map(|arg| format!("\"{arg}\""))
            .collect::<Vec<_>>()
            .join(", ");

        let port = launch
            .bind
            .rsplit_once(':')
            .map(|(_, port)| port)
            .unwrap_or("8080");

        format!(
            r#"# === Base runtime ===
FROM {base}
WORKDIR /app

# === Packaging toolchain ===
RUN pip install --no-cache-dir --upgrade pip

# === Dependencies ===
COPY {manifest} {manifest}
RUN pip install --no-cache-dir -r {manifest}{extra}

# === Source overlay ===
COPY . .

# === Launch ===
EXPOSE {port}
CMD [{cmd}]
"#,
            base = self.config.runtime.base_image(),
            manifest = manifest,
            extra = extra,
            port = port,
            cmd = cmd,
        )
    }
}
