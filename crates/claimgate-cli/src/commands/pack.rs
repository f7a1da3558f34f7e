//! `claimgate pack` -- build an audit pack from a JSONL audit trail.
//!
//! The trail's hash chain is verified before anything is written; a
//! rewritten, dropped or reordered line aborts the command.
//!
//! # Example
//!
//! ```text
//! claimgate pack --records audit/trail.jsonl --out audit-packs
//! claimgate pack --records audit/trail.jsonl --tenant acme \
//!     --from 2026-06-01T00:00:00Z --to 2026-07-01T00:00:00Z --pack-id acme-june
//! ```

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::Args;
use comfy_table::{Table, presets::UTF8_FULL};

use claimgate_core::audit::{AuditPackGenerator, AuditStore, JsonlAuditStore};
use claimgate_types::audit::{AuditQuery, AuditSummary};

/// Arguments for the `claimgate pack` subcommand.
#[derive(Args)]
pub struct PackArgs {
    /// JSONL file of audit records.
    #[arg(long)]
    pub records: PathBuf,

    /// Output directory for the `.jsonl` / `.md` pair.
    #[arg(long, default_value = "audit-packs")]
    pub out: PathBuf,

    /// Pack identifier. Defaults to a timestamp.
    #[arg(long)]
    pub pack_id: Option<String>,

    /// Only include records of this tenant.
    #[arg(long)]
    pub tenant: Option<String>,

    /// Inclusive lower bound (RFC 3339).
    #[arg(long)]
    pub from: Option<DateTime<Utc>>,

    /// Exclusive upper bound (RFC 3339).
    #[arg(long)]
    pub to: Option<DateTime<Utc>>,

    /// Skip the hash-chain check (trails written before records were hashed).
    #[arg(long)]
    pub skip_verify: bool,
}

/// Run the pack command.
pub async fn run(args: PackArgs) -> anyhow::Result<()> {
    if !args.records.exists() {
        anyhow::bail!("records file not found: {}", args.records.display());
    }
    let store = JsonlAuditStore::new(&args.records);
    if args.skip_verify {
        tracing::warn!(path = %args.records.display(), "audit trail not verified");
    } else {
        let verified = store.verify().await?;
        tracing::info!(records = verified, "audit trail verified");
    }
    let query = AuditQuery {
        tenant: args.tenant,
        from: args.from,
        to: args.to,
    };
    let records = store.query(&query).await?;
    tracing::debug!(records = records.len(), "records selected for pack");

    let pack = AuditPackGenerator::new(&args.out).generate(&records, args.pack_id.as_deref())?;

    println!("{}", summary_table(&pack.summary));
    println!("Report:  {}", pack.md_path.display());
    println!("Records: {}", pack.jsonl_path.display());
    Ok(())
}

fn summary_table(summary: &AuditSummary) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["Metric", "Value"]);
    table.add_row(["Pack".to_string(), summary.pack_id.clone()]);
    table.add_row(["Items".to_string(), summary.total_items.to_string()]);
    table.add_row(["Modified".to_string(), summary.modified_items.to_string()]);
    table.add_row([
        "Avg latency".to_string(),
        format!("{:.2} ms", summary.avg_latency_ms),
    ]);
    table.add_row([
        "p50 / p95".to_string(),
        format!(
            "{:.2} / {:.2} ms",
            summary.p50_latency_ms, summary.p95_latency_ms
        ),
    ]);
    table.add_row([
        "Degraded".to_string(),
        summary.degraded_mode_count.to_string(),
    ]);
    for (transform, count) in &summary.flags_by_transform {
        table.add_row([format!("Flags: {transform}"), count.to_string()]);
    }
    table
}
