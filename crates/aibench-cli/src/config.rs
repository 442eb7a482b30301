//! Run configuration loading.

use std::path::Path;

use aibench_core::{EvaluatorEntry, RunConfig};
use anyhow::{bail, Context, Result};

/// Load a run configuration from a JSON file.
///
/// Each evaluator `config_file` is resolved against the directory holding
/// the configuration and inlined into `config`, so the loaded value is
/// self-contained. The result is validated before it is returned.
pub fn load_run_config(path: &Path) -> Result<RunConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let mut config: RunConfig = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;

    let base = path.parent().unwrap_or_else(|| Path::new("."));
    for entry in &mut config.evaluators {
        let EvaluatorEntry::Detailed(spec) = entry else {
            continue;
        };
        let Some(file) = spec.config_file.take() else {
            continue;
        };
        if !spec.config.is_null() {
            bail!(
                "evaluator {} sets both `config` and `config_file`",
                spec.name
            );
        }
        let resolved = base.join(&file);
        let text = std::fs::read_to_string(&resolved).with_context(|| {
            format!(
                "Failed to read config_file for evaluator {}: {}",
                spec.name,
                resolved.display()
            )
        })?;
        spec.config = serde_json::from_str(&text).with_context(|| {
            format!(
                "Failed to parse config_file for evaluator {}: {}",
                spec.name,
                resolved.display()
            )
        })?;
    }

    config.validate()?;
    Ok(config)
}
