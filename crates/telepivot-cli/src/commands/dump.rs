//! Print the normalized pipeline document

use anyhow::{Context, Result};
use telepivot_core::{Config, PipelineDocument, default_registry};

use crate::DumpFormat;

/// Run the dump command
pub async fn run(config_path: &str, format: DumpFormat) -> Result<()> {
    let config = Config::load(config_path).context("Failed to load configuration")?;
    let registry = default_registry().context("Failed to build transformation registry")?;
    let pipeline = config
        .build_pipeline(registry)
        .context("Failed to build pipeline")?;
    let document = PipelineDocument::from_pipeline(registry, &pipeline)?;

    let text = match format {
        DumpFormat::Yaml => serde_yaml::to_string(&document)?,
        DumpFormat::Json => serde_json::to_string_pretty(&document)? + "\n",
    };
    print!("{text}");
    Ok(())
}
