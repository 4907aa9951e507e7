//! Validate configuration command

use anyhow::{Context, Result};
use telepivot_core::{Config, PipelineDocument, default_registry};

/// Run the validate command
pub async fn run(config_path: &str) -> Result<()> {
    tracing::info!("Validating configuration: {}", config_path);

    let config = Config::load(config_path).context("Failed to load configuration")?;

    tracing::info!("✓ Project: {}", config.project.name);
    tracing::info!("✓ Version: {}", config.project.version);
    tracing::info!("✓ Workers: {}", config.project.runtime.workers);

    let registry = default_registry().context("Failed to build transformation registry")?;
    let pipeline = config
        .build_pipeline(registry)
        .context("Failed to build pipeline")?;
    tracing::info!("✓ Pipeline: {} step(s)", pipeline.len());

    // A dumped pipeline must load back into the same document
    let dumped = PipelineDocument::from_pipeline(registry, &pipeline)
        .context("Pipeline cannot be serialized")?;
    let reloaded = dumped
        .build(registry)
        .context("Dumped pipeline does not load")?;
    let redumped = PipelineDocument::from_pipeline(registry, &reloaded)
        .context("Reloaded pipeline cannot be serialized")?;
    if dumped != redumped {
        anyhow::bail!("Pipeline does not survive a dump and reload");
    }

    let fingerprint = dumped.fingerprint()?;
    tracing::info!("✓ Fingerprint: {}", fingerprint);
    tracing::info!("✓ Configuration is valid");
    Ok(())
}
