//! CLI command implementations for `claimgate`.
//!
//! - [`check`] -- Run items through a profile and print verdicts.
//! - [`pack`] -- Render an audit pack from a JSONL trail.
//! - [`validate`] -- Load-time checks for a policy and manifest.

pub mod check;
pub mod pack;
pub mod validate;

use std::path::{Path, PathBuf};

use claimgate_core::pipeline::TransformRegistry;
use claimgate_core::transforms::TransformManifest;
use claimgate_types::config::GatewayConfig;
use claimgate_types::item::Item;

/// Environment variable consulted when `--config` is not given.
pub const CONFIG_ENV: &str = "CLAIMGATE_CONFIG";

/// Load the gateway config from `path`, then `$CLAIMGATE_CONFIG`, else
/// defaults.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<GatewayConfig> {
    let path = path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("config file not found: {}", path.display());
            }
            let config = GatewayConfig::load(&path)?;
            tracing::debug!(path = %path.display(), "loaded config");
            Ok(config)
        }
        None => Ok(GatewayConfig::default()),
    }
}

/// Built-in transforms plus whatever the manifest at `manifest` defines.
pub fn load_registry(manifest: Option<&Path>) -> anyhow::Result<TransformRegistry> {
    let mut combined = TransformManifest::builtin();
    if let Some(path) = manifest {
        combined = combined.merge(TransformManifest::load(path)?);
    }
    let registry = combined.build()?;
    tracing::debug!(transforms = registry.len(), "transform registry built");
    Ok(registry)
}

/// Parse items given either as one JSON array or as JSON lines.
pub fn parse_items(src: &str) -> anyhow::Result<Vec<Item>> {
    let trimmed = src.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|e| anyhow::anyhow!("failed to parse items array: {e}"));
    }
    src.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str(line)
                .map_err(|e| anyhow::anyhow!("failed to parse item on line {}: {e}", n + 1))
        })
        .collect()
}
