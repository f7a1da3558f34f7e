//! `claimgate validate` -- load-time checks for a policy.
//!
//! Resolves every profile against the built-in transforms plus an optional
//! manifest, exactly as the gateway does at startup, and prints the
//! resulting chains. Exits non-zero on the first configuration error.
//!
//! # Example
//!
//! ```text
//! claimgate validate --policy policy.yaml --manifest transforms.yaml
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use comfy_table::{Table, presets::UTF8_FULL};

use claimgate_core::audit::{AuditRecorder, InMemoryAuditStore};
use claimgate_core::pipeline::{TransformPipeline, TransformRegistry};
use claimgate_types::policy::Policy;

use super::{load_config, load_registry};

/// Arguments for the `claimgate validate` subcommand.
#[derive(Args)]
pub struct ValidateArgs {
    /// Policy file (YAML or JSON).
    #[arg(long)]
    pub policy: PathBuf,

    /// Transform manifest merged over the built-in transforms.
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Also validate this gateway config file.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Run the validate command.
pub fn run(args: ValidateArgs) -> anyhow::Result<()> {
    if let Some(ref path) = args.config {
        load_config(Some(path))?;
        println!("Config:   {} ok", path.display());
    }

    let registry = load_registry(args.manifest.as_deref())?;
    let policy = Policy::load(&args.policy)?;
    let table = profile_table(&policy);
    check(&registry, policy)?;

    println!("Policy:   {} ok", args.policy.display());
    println!("Registry: {}", registry.names().join(", "));
    println!("{table}");
    Ok(())
}

/// Build the pipeline the gateway would build, discarding it.
fn check(registry: &TransformRegistry, policy: Policy) -> anyhow::Result<()> {
    let recorder = Arc::new(AuditRecorder::new(Arc::new(InMemoryAuditStore::new())));
    TransformPipeline::new(registry, policy, recorder)?;
    Ok(())
}

fn profile_table(policy: &Policy) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Profile", "Transforms", "Routes"]);
    for profile in &policy.profiles {
        let routes: Vec<&str> = policy
            .routes
            .iter()
            .filter(|r| r.profile == profile.name)
            .map(|r| r.path.as_str())
            .collect();
        table.add_row([
            profile.name.clone(),
            profile.transforms.join(" -> "),
            routes.join(", "),
        ]);
    }
    table
}
