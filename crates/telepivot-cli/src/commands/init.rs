//! Initialize a new telepivot project

use anyhow::Result;
use std::fs;
use std::path::Path;
use telepivot_core::config::PROJECT_FILE;

const SAMPLE_INPUT: &str = r#"{"node_id_str":"router-1","subscription_id_str":"ifstats","encoding_path":"openconfig-interfaces:interfaces/interface","collection_id":1,"collection_start_time":1700000000000,"msg_timestamp":1700000000000,"data_gpbkv":[{"timestamp":1700000000100,"fields":[{"name":"keys","fields":[{"name":"name","string_value":"eth0"}]},{"name":"content","fields":[{"name":"state","string_value":"up"},{"name":"counters","fields":[{"name":"in_packets","uint64_value":"1024"},{"name":"out_packets","uint64_value":"2048"}]}]}]},{"timestamp":1700000000200,"fields":[{"name":"keys","fields":[{"name":"name","string_value":"eth1"}]},{"name":"content","fields":[{"name":"state","string_value":"down"},{"name":"counters","fields":[{"name":"in_packets","uint64_value":"0"},{"name":"out_packets","uint64_value":"0"}]}]}]}]}
{"node_id_str":"router-2","subscription_id_str":"ifstats","encoding_path":"openconfig-interfaces:interfaces/interface","collection_id":7,"collection_start_time":1700000001000,"data_gpbkv":[{"fields":[{"name":"keys","fields":[{"name":"name","string_value":"eth0"}]},{"name":"content","fields":[{"name":"state","string_value":"testing"},{"name":"counters","fields":[{"name":"in_packets","uint64_value":"5"},{"name":"out_packets","uint64_value":"6"}]}]}]}]}
"#;

/// Run the init command
pub async fn run(path: &str, name: Option<&str>) -> Result<()> {
    let project_dir = Path::new(path);

    // Create directory if it doesn't exist
    if !project_dir.exists() {
        fs::create_dir_all(project_dir)?;
    }

    // Get absolute path for deriving name
    let abs_path = project_dir.canonicalize()?;

    // Derive project name from directory name if not provided
    let project_name = match name {
        Some(n) => n.to_string(),
        None => abs_path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow::anyhow!("Could not determine project name from path"))?,
    };

    // Check if already initialized
    if project_dir.join(PROJECT_FILE).exists() {
        anyhow::bail!(
            "Directory '{}' already contains a {}",
            project_dir.display(),
            PROJECT_FILE
        );
    }

    tracing::info!("Creating new telepivot project: {}", project_name);

    let config = format!(
        r#"# Telepivot Project Configuration
name: {project_name}
version: "0.1.0"

input:
  type: file
  path: data/input.jsonl
  format: jsonl

output:
  type: file
  path: data/output.jsonl
  format: jsonl

pivot:
  int64_as_string: false

runtime:
  workers: 4
  projection: flat

# Steps run in order on every pivoted record
transformations:
  - kind: flatten_hierarchies
    config:
      keep_naming: true
  - kind: value_mapper
    config:
      leaf_names: [state]
      mapper:
        up: 1
        down: 0
      default: -1
"#
    );
    fs::write(project_dir.join(PROJECT_FILE), config)?;

    // Create .gitignore
    let gitignore = r#"# Output files
data/output*.jsonl

# IDE
.idea/
.vscode/
*.swp
"#;
    fs::write(project_dir.join(".gitignore"), gitignore)?;

    // Create sample input data
    fs::create_dir_all(project_dir.join("data"))?;
    fs::write(project_dir.join("data/input.jsonl"), SAMPLE_INPUT)?;

    tracing::info!(
        "Created project '{}' at {}",
        project_name,
        abs_path.display()
    );
    tracing::info!("Next steps:");
    if path != "." {
        tracing::info!("  cd {}", project_dir.display());
    }
    tracing::info!("  telepivot validate    # Check configuration");
    tracing::info!("  telepivot run         # Transform data/input.jsonl");

    Ok(())
}
