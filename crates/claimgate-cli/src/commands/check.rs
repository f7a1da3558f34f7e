//! `claimgate check` -- run items through a policy profile.
//!
//! Every item goes through the pipeline once; one JSON line per item is
//! written to stdout. Admission and idempotency are not involved, so
//! arbitrarily large batches run without tripping the burst limit.
//!
//! # Example
//!
//! ```text
//! claimgate check --policy policy.yaml --items menu.json --route /v1/menu
//! claimgate check --policy policy.yaml --items menu.jsonl --profile menu \
//!     --manifest transforms.yaml --pack --metrics
//! ```

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use clap::{ArgGroup, Args};
use comfy_table::{Table, presets::UTF8_FULL};
use serde::Serialize;

use claimgate_core::audit::{AuditPackGenerator, AuditRecorder, AuditStore};
use claimgate_core::gateway::Backends;
use claimgate_core::observability::{GatewayMetrics, SloReport, SloTracker};
use claimgate_core::pipeline::TransformPipeline;
use claimgate_core::pipeline::engine::NO_ROUTE;
use claimgate_types::audit::{AuditQuery, AuditRecord};
use claimgate_types::config::DEFAULT_SLO;
use claimgate_types::policy::Policy;
use claimgate_types::verdict::{TransformContext, Verdict};

use super::{load_config, load_registry, parse_items};

/// Arguments for the `claimgate check` subcommand.
#[derive(Args)]
#[command(group(ArgGroup::new("target").required(true).args(["route", "profile"])))]
pub struct CheckArgs {
    /// Policy file (YAML or JSON).
    #[arg(long)]
    pub policy: PathBuf,

    /// Items as a JSON array or JSON lines. `-` reads stdin.
    #[arg(long)]
    pub items: PathBuf,

    /// Route whose bound profile applies.
    #[arg(long)]
    pub route: Option<String>,

    /// Profile to apply directly.
    #[arg(long)]
    pub profile: Option<String>,

    /// Tenant recorded on every audit entry.
    #[arg(long, default_value = "default")]
    pub tenant: String,

    /// Locale handed to transforms.
    #[arg(long, default_value = "en-US")]
    pub locale: String,

    /// Transform manifest merged over the built-in transforms.
    #[arg(long)]
    pub manifest: Option<PathBuf>,

    /// Gateway config file (defaults to $CLAIMGATE_CONFIG).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Write an audit pack for this run.
    #[arg(long)]
    pub pack: bool,

    /// Pack output directory. Implies `--pack`.
    #[arg(long)]
    pub pack_dir: Option<PathBuf>,

    /// Pack identifier. Implies `--pack`.
    #[arg(long)]
    pub pack_id: Option<String>,

    /// Print the metrics exposition and SLO status to stderr afterwards.
    #[arg(long)]
    pub metrics: bool,
}

/// One stdout line.
#[derive(Serialize)]
struct CheckLine<'a> {
    item_id: &'a str,
    #[serde(flatten)]
    verdict: &'a Verdict,
}

/// Run the check command.
pub async fn run(args: CheckArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_deref())?;
    let registry = load_registry(args.manifest.as_deref())?;
    let policy = Policy::load(&args.policy)?;
    let items = parse_items(&read_items(&args.items)?)?;

    let backends = Backends::from_config(&config.audit);
    let store = backends.audit.clone();
    let recorder = Arc::new(AuditRecorder::new(backends.audit).with_clock(backends.clock.clone()));
    let metrics = Arc::new(GatewayMetrics::new(&config.metrics.latency_buckets_ms)?);
    let pipeline = TransformPipeline::new(&registry, policy, recorder)?.with_metrics(metrics.clone());
    let slo = SloTracker::from_config(&config.slo).with_clock(backends.clock.clone());
    let slo_name = config
        .slo
        .first()
        .map(|o| o.name.clone())
        .unwrap_or_else(|| DEFAULT_SLO.to_string());

    let route = args.route.as_deref();
    let profile = match (route, args.profile.as_deref()) {
        (Some(route), _) => pipeline.profile_for_route(route)?.to_string(),
        (None, Some(profile)) => profile.to_string(),
        (None, None) => anyhow::bail!("either --route or --profile is required"),
    };
    let route_label = route.unwrap_or(NO_ROUTE);

    let run_id = run_correlation_id(&args.tenant);
    let ctx = TransformContext::new(&args.locale, &args.tenant, &run_id);
    tracing::info!(items = items.len(), profile = %profile, "checking items");

    let mut audit_ids = HashSet::with_capacity(items.len());
    for item in &items {
        let started = Instant::now();
        let outcome = match route {
            Some(route) => pipeline.execute_route(item, route, &ctx).await,
            None => pipeline.execute(item, &profile, &ctx).await,
        };
        metrics.request_duration_ms.observe(
            &[("route", route_label)],
            started.elapsed().as_secs_f64() * 1000.0,
        );
        match outcome {
            Ok(verdict) => {
                metrics.requests_total.inc(&[
                    ("route", route_label),
                    ("outcome", verdict.verdict.as_str()),
                ]);
                slo.record_request(&slo_name, true);
                println!(
                    "{}",
                    serde_json::to_string(&CheckLine {
                        item_id: &item.id,
                        verdict: &verdict,
                    })?
                );
                audit_ids.insert(verdict.audit_id);
            }
            Err(e) => {
                slo.record_request(&slo_name, false);
                tracing::error!(item = %item.id, error = %e, "item check failed");
                return Err(e.into());
            }
        }
    }

    if args.pack || args.pack_dir.is_some() || args.pack_id.is_some() {
        let records = run_records(store.as_ref(), &args.tenant, &audit_ids).await?;
        let out_dir = args.pack_dir.unwrap_or(config.audit.pack_dir);
        let pack = AuditPackGenerator::new(out_dir)
            .with_clock(backends.clock)
            .generate(&records, args.pack_id.as_deref())?;
        eprintln!("Audit pack: {}", pack.md_path.display());
        eprintln!("Records:    {}", pack.jsonl_path.display());
    }

    if args.metrics {
        eprintln!("{}", metrics.export()?);
        eprintln!("{}", slo_table(&slo.report_all()));
    }

    Ok(())
}

fn read_items(path: &Path) -> anyhow::Result<String> {
    if path.as_os_str() == "-" {
        return Ok(std::io::read_to_string(std::io::stdin())?);
    }
    std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read items from {}: {e}", path.display()))
}

/// Correlation id shared by every item of one invocation.
fn run_correlation_id(tenant: &str) -> String {
    format!("{tenant}-{}", chrono::Utc::now().format("%Y%m%dT%H%M%S%.3fZ"))
}

/// The records this invocation produced, in append order.
///
/// A configured JSONL store may already hold earlier runs; those are
/// filtered out by audit id.
async fn run_records(
    store: &dyn AuditStore,
    tenant: &str,
    audit_ids: &HashSet<String>,
) -> anyhow::Result<Vec<AuditRecord>> {
    Ok(store
        .query(&AuditQuery::tenant(tenant))
        .await?
        .into_iter()
        .filter(|r| audit_ids.contains(&r.audit_id))
        .collect())
}

fn slo_table(reports: &[SloReport]) -> Table {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(["SLO", "Target", "Requests", "Failed", "Success", "Budget", "Status"]);
    for r in reports {
        table.add_row([
            r.name.clone(),
            format!("{:.3}", r.target),
            r.total_requests.to_string(),
            r.failed_requests.to_string(),
            format!("{:.2}%", r.success_rate * 100.0),
            format!("{:.0}%", r.error_budget_remaining * 100.0),
            format!("{:?}", r.status).to_lowercase(),
        ]);
    }
    table
}
