//! Audit pack generation.
//!
//! A pack is two files written side by side into the pack directory:
//!
//! - `{pack_id}.jsonl` -- one serialized [`AuditRecord`] per line, exactly
//!   as stored
//! - `{pack_id}.md` -- a human-readable report separating modified from
//!   allowed items, with before/after blocks per change and a degraded-mode
//!   warning when any record ran without its external dependencies
//!
//! Both files are written to a temporary name and renamed into place so a
//! reader never observes a half-written pack.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use claimgate_types::audit::{AuditPack, AuditRecord, AuditSummary};
use claimgate_types::error::{GatewayError, Result};

use crate::clock::{self, Clock};

/// Writes audit packs into a directory.
pub struct AuditPackGenerator {
    out_dir: PathBuf,
    clock: Arc<dyn Clock>,
}

impl AuditPackGenerator {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
            clock: clock::system(),
        }
    }

    /// Builder: derive timestamps and default pack ids from an injected clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    /// Write a pack for `records`.
    ///
    /// Fails with [`GatewayError::EmptyAuditInput`] when `records` is empty.
    /// `pack_id` defaults to `pack-{YYYYMMDDTHHMMSSZ}`.
    pub fn generate(&self, records: &[AuditRecord], pack_id: Option<&str>) -> Result<AuditPack> {
        if records.is_empty() {
            return Err(GatewayError::EmptyAuditInput);
        }
        let now = self.clock.now();
        let pack_id = match pack_id {
            Some(id) => validate_pack_id(id)?.to_string(),
            None => default_pack_id(now),
        };

        let summary = summarize(records, &pack_id, now)?;

        let mut jsonl = String::new();
        for record in records {
            jsonl.push_str(&serde_json::to_string(record)?);
            jsonl.push('\n');
        }
        let markdown = render_markdown(records, &summary);

        std::fs::create_dir_all(&self.out_dir)?;
        let jsonl_path = self.out_dir.join(format!("{pack_id}.jsonl"));
        let md_path = self.out_dir.join(format!("{pack_id}.md"));
        write_atomic(&jsonl_path, &jsonl)?;
        write_atomic(&md_path, &markdown)?;

        info!(
            pack_id = %pack_id,
            total_items = summary.total_items,
            degraded = summary.degraded_mode_count,
            path = %self.out_dir.display(),
            "audit pack generated"
        );

        Ok(AuditPack {
            jsonl_path,
            md_path,
            summary,
        })
    }
}

/// Default pack id derived from the generation time.
pub fn default_pack_id(now: DateTime<Utc>) -> String {
    format!("pack-{}", now.format("%Y%m%dT%H%M%SZ"))
}

fn validate_pack_id(id: &str) -> Result<&str> {
    let bad = id.is_empty()
        || id.contains(['/', '\\', '\0'])
        || id.starts_with('.');
    if bad {
        return Err(GatewayError::ConfigInvalid {
            reason: format!("invalid pack id '{id}'"),
        });
    }
    Ok(id)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ── Summary math ─────────────────────────────────────────────────────────

/// Compute pack statistics.
///
/// Percentiles use the nearest-rank method over the sorted latencies.
pub fn summarize(
    records: &[AuditRecord],
    pack_id: &str,
    generated_at: DateTime<Utc>,
) -> Result<AuditSummary> {
    if records.is_empty() {
        return Err(GatewayError::EmptyAuditInput);
    }

    let mut latencies: Vec<f64> = records.iter().map(|r| r.latency_ms).collect();
    latencies.sort_by(f64::total_cmp);
    let avg = latencies.iter().sum::<f64>() / latencies.len() as f64;

    let mut flags_by_transform: BTreeMap<String, usize> = BTreeMap::new();
    for reason in records.iter().flat_map(|r| &r.verdict.reasons) {
        *flags_by_transform.entry(reason.transform.clone()).or_default() += 1;
    }

    Ok(AuditSummary {
        pack_id: pack_id.to_string(),
        generated_at,
        total_items: records.len(),
        modified_items: records.iter().filter(|r| r.is_modified()).count(),
        avg_latency_ms: avg,
        p50_latency_ms: nearest_rank(&latencies, 50.0),
        p95_latency_ms: nearest_rank(&latencies, 95.0),
        flags_by_transform,
        degraded_mode_count: records.iter().filter(|r| r.degraded_mode).count(),
    })
}

/// Nearest-rank percentile of an ascending slice. `0.0` for an empty slice.
pub fn nearest_rank(sorted: &[f64], percentile: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let rank = ((percentile / 100.0) * n as f64).ceil() as usize;
    sorted[rank.clamp(1, n) - 1]
}

// ── Markdown ─────────────────────────────────────────────────────────────

/// Render the human-readable report.
pub fn render_markdown(records: &[AuditRecord], summary: &AuditSummary) -> String {
    let mut out = String::new();
    // Writing into a String cannot fail.
    let _ = write_markdown(&mut out, records, summary);
    out
}

fn write_markdown(
    out: &mut String,
    records: &[AuditRecord],
    summary: &AuditSummary,
) -> std::fmt::Result {
    writeln!(out, "# Audit Pack `{}`", summary.pack_id)?;
    writeln!(out)?;
    writeln!(out, "Generated: {}", summary.generated_at.to_rfc3339())?;
    writeln!(out)?;

    writeln!(out, "## Summary")?;
    writeln!(out)?;
    writeln!(out, "| Metric | Value |")?;
    writeln!(out, "|--------|-------|")?;
    writeln!(out, "| Total items | {} |", summary.total_items)?;
    writeln!(out, "| Modified items | {} |", summary.modified_items)?;
    writeln!(
        out,
        "| Allowed items | {} |",
        summary.total_items - summary.modified_items
    )?;
    writeln!(out, "| Avg latency (ms) | {:.2} |", summary.avg_latency_ms)?;
    writeln!(out, "| p50 latency (ms) | {:.2} |", summary.p50_latency_ms)?;
    writeln!(out, "| p95 latency (ms) | {:.2} |", summary.p95_latency_ms)?;
    writeln!(out, "| Degraded records | {} |", summary.degraded_mode_count)?;
    writeln!(out)?;

    if !summary.flags_by_transform.is_empty() {
        writeln!(out, "### Flags by transform")?;
        writeln!(out)?;
        writeln!(out, "| Transform | Reasons |")?;
        writeln!(out, "|-----------|---------|")?;
        for (transform, count) in &summary.flags_by_transform {
            writeln!(out, "| {transform} | {count} |")?;
        }
        writeln!(out)?;
    }

    if summary.degraded_mode_count > 0 {
        let services: BTreeSet<&str> = records
            .iter()
            .filter_map(|r| r.degraded_services.as_ref())
            .flatten()
            .map(String::as_str)
            .collect();
        let services: Vec<&str> = services.into_iter().collect();
        writeln!(out, "## Degraded Mode")?;
        writeln!(out)?;
        writeln!(
            out,
            "> **Warning:** {} item(s) were processed while external services were unavailable: {}.",
            summary.degraded_mode_count,
            services.join(", ")
        )?;
        writeln!(
            out,
            "> Findings from those services may be missing; re-run the affected items once they recover."
        )?;
        writeln!(out)?;
        for record in records.iter().filter(|r| r.degraded_mode) {
            let names = record
                .degraded_services
                .as_deref()
                .unwrap_or_default()
                .join(", ");
            writeln!(out, "- `{}` ({names})", record.item_id)?;
        }
        writeln!(out)?;
    }

    let (modified, allowed): (Vec<&AuditRecord>, Vec<&AuditRecord>) =
        records.iter().partition(|r| r.is_modified());

    writeln!(out, "## Modified Items")?;
    writeln!(out)?;
    if modified.is_empty() {
        writeln!(out, "_None._")?;
        writeln!(out)?;
    }
    for record in modified {
        write_item(out, record)?;
    }

    writeln!(out, "## Allowed Items")?;
    writeln!(out)?;
    if allowed.is_empty() {
        writeln!(out, "_None._")?;
        writeln!(out)?;
    }
    for record in allowed {
        write_item(out, record)?;
    }
    Ok(())
}

fn write_item(out: &mut String, record: &AuditRecord) -> std::fmt::Result {
    writeln!(out, "### {}", record.item_id)?;
    writeln!(out)?;
    writeln!(out, "- Audit ID: `{}`", record.audit_id)?;
    writeln!(out, "- Correlation ID: `{}`", record.verdict.correlation_id)?;
    writeln!(out, "- Tenant: {}", record.tenant)?;
    writeln!(out, "- Profile: {} (route `{}`)", record.profile, record.route)?;
    writeln!(out, "- Latency: {:.2} ms", record.latency_ms)?;
    writeln!(out)?;

    for (i, change) in record.verdict.changes.iter().enumerate() {
        writeln!(
            out,
            "**Change {}** (`{}` by `{}`)",
            i + 1,
            change.field,
            change.transform
        )?;
        writeln!(out)?;
        write_block(out, "Before", &change.before)?;
        write_block(out, "After", &change.after)?;
        writeln!(out)?;
    }

    if !record.verdict.reasons.is_empty() {
        writeln!(out, "Reasons:")?;
        for reason in &record.verdict.reasons {
            match reason.source {
                Some(ref source) => {
                    writeln!(out, "- **{}**: {} (source: {source})", reason.transform, reason.why)?
                }
                None => writeln!(out, "- **{}**: {}", reason.transform, reason.why)?,
            }
        }
        writeln!(out)?;
    }

    writeln!(out, "Transforms:")?;
    for exec in &record.transforms {
        let decision = serde_json::to_value(exec.decision)
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default();
        writeln!(
            out,
            "- `{}`: {:.2} ms ({decision})",
            exec.name, exec.duration_ms
        )?;
    }
    writeln!(out)?;
    Ok(())
}

/// Labelled code block whose fence outruns any backtick run in `text`.
fn write_block(out: &mut String, label: &str, text: &str) -> std::fmt::Result {
    let fence = "`".repeat(longest_backtick_run(text).max(2) + 1);
    writeln!(out, "{label}:")?;
    writeln!(out, "{fence}text")?;
    writeln!(out, "{text}")?;
    writeln!(out, "{fence}")
}

fn longest_backtick_run(text: &str) -> usize {
    text.split(|c| c != '`').map(str::len).max().unwrap_or(0)
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;
    use claimgate_types::verdict::{Change, Decision, Reason, TransformExecution, Verdict};

    fn reason(transform: &str) -> Reason {
        Reason {
            transform: transform.into(),
            why: format!("{transform} finding"),
            source: None,
        }
    }

    fn record(i: usize, latency: f64) -> AuditRecord {
        AuditRecord {
            audit_id: format!("audit-{i}"),
            ts: Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
            tenant: "acme".into(),
            profile: "menu".into(),
            route: "/v1/check".into(),
            item_id: format!("sku-{i}"),
            transforms: vec![TransformExecution {
                name: "allergens".into(),
                duration_ms: latency,
                decision: Decision::Pass,
            }],
            verdict: Verdict::new(vec![], vec![], format!("audit-{i}"), "corr"),
            latency_ms: latency,
            degraded_mode: false,
            degraded_services: None,
            prev_hash: String::new(),
            hash: String::new(),
        }
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 2, 13, 45, 9).unwrap()
    }

    #[test]
    fn summary_math_matches_direct_computation() {
        let records: Vec<_> = (1..=10).map(|i| record(i, (i * 10) as f64)).collect();
        let s = summarize(&records, "p", at()).unwrap();
        assert_eq!(s.total_items, 10);
        assert!((s.avg_latency_ms - 55.0).abs() < 1e-9);
        assert!((s.p50_latency_ms - 50.0).abs() < 1e-9);
        assert!((s.p95_latency_ms - 100.0).abs() < 1e-9);
    }

    #[test]
    fn percentiles_ignore_input_order() {
        let records: Vec<_> = [30.0, 10.0, 20.0]
            .iter()
            .enumerate()
            .map(|(i, l)| record(i, *l))
            .collect();
        let s = summarize(&records, "p", at()).unwrap();
        assert!((s.p50_latency_ms - 20.0).abs() < 1e-9);
        assert!((s.p95_latency_ms - 30.0).abs() < 1e-9);
    }

    #[test]
    fn nearest_rank_edges() {
        assert_eq!(nearest_rank(&[], 50.0), 0.0);
        assert_eq!(nearest_rank(&[7.0], 95.0), 7.0);
        assert_eq!(nearest_rank(&[1.0, 2.0, 3.0, 4.0], 0.0), 1.0);
        assert_eq!(nearest_rank(&[1.0, 2.0, 3.0, 4.0], 100.0), 4.0);
        assert_eq!(nearest_rank(&[1.0, 2.0, 3.0, 4.0], 50.0), 2.0);
    }

    #[test]
    fn flags_by_transform_counts_reasons() {
        let mut a = record(1, 1.0);
        a.verdict.reasons = vec![reason("allergens"), reason("allergens"), reason("pii")];
        let mut b = record(2, 1.0);
        b.verdict.reasons = vec![reason("allergens"), reason("disclaimer")];
        let s = summarize(&[a, b], "p", at()).unwrap();
        assert_eq!(s.flags_by_transform.get("allergens"), Some(&3));
        assert_eq!(s.flags_by_transform.get("pii"), Some(&1));
        assert_eq!(s.flags_by_transform.get("disclaimer"), Some(&1));
        assert_eq!(s.flags_by_transform.values().sum::<usize>(), 5);
    }

    #[test]
    fn empty_input_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let generator = AuditPackGenerator::new(dir.path());
        assert!(matches!(
            generator.generate(&[], None),
            Err(GatewayError::EmptyAuditInput)
        ));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn writes_jsonl_and_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let generator = AuditPackGenerator::new(dir.path().join("packs"))
            .with_clock(Arc::new(ManualClock::new(at())));

        let mut modified = record(1, 12.0);
        modified.verdict = Verdict::new(
            vec![Change {
                field: "text".into(),
                before: "peanut sauce".into(),
                after: "[allergen] sauce".into(),
                transform: "allergens".into(),
            }],
            vec![reason("allergens")],
            "audit-1",
            "corr-1",
        );
        let mut degraded = record(2, 8.0);
        degraded.degraded_mode = true;
        degraded.degraded_services = Some(vec!["recall_lookup".into()]);

        let records = vec![modified, degraded];
        let pack = generator.generate(&records, None).unwrap();

        assert_eq!(pack.summary.pack_id, "pack-20260802T134509Z");
        assert_eq!(pack.summary.degraded_mode_count, 1);
        assert_eq!(pack.summary.modified_items, 1);

        let jsonl = std::fs::read_to_string(&pack.jsonl_path).unwrap();
        let lines: Vec<_> = jsonl.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], serde_json::to_string(&records[0]).unwrap());
        let parsed: AuditRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(parsed, records[1]);

        let md = std::fs::read_to_string(&pack.md_path).unwrap();
        let modified_at = md.find("## Modified Items").unwrap();
        let allowed_at = md.find("## Allowed Items").unwrap();
        assert!(modified_at < allowed_at);
        assert!(md.contains("## Degraded Mode"));
        assert!(md.contains("recall_lookup"));
        assert!(md[modified_at..allowed_at].contains("sku-1"));
        assert!(md[allowed_at..].contains("sku-2"));
        assert!(md.contains("Before:\n```text\npeanut sauce\n```"));
        assert!(md.contains("After:\n```text\n[allergen] sauce\n```"));
        assert!(md.contains("- `allergens`: 12.00 ms (pass)"));
    }

    #[test]
    fn fences_outrun_backticks_in_content() {
        assert_eq!(longest_backtick_run("plain"), 0);
        assert_eq!(longest_backtick_run("a `b` ``c``` d"), 3);

        let mut out = String::new();
        write_block(&mut out, "Before", "see ```rust\nfn main() {}\n```").unwrap();
        assert!(out.starts_with("Before:\n````text\n"));
        assert!(out.ends_with("\n```\n````\n"));

        let mut out = String::new();
        write_block(&mut out, "After", "no ticks").unwrap();
        assert_eq!(out, "After:\n```text\nno ticks\n```\n");
    }

    #[test]
    fn no_degraded_section_when_healthy() {
        let dir = tempfile::tempdir().unwrap();
        let generator = AuditPackGenerator::new(dir.path());
        let pack = generator.generate(&[record(1, 5.0)], Some("nightly")).unwrap();
        assert!(pack.md_path.ends_with("nightly.md"));
        let md = std::fs::read_to_string(&pack.md_path).unwrap();
        assert!(!md.contains("Degraded Mode"));
        assert!(md.contains("_None._"));
    }

    #[test]
    fn rejects_path_like_pack_ids() {
        let dir = tempfile::tempdir().unwrap();
        let generator = AuditPackGenerator::new(dir.path());
        for id in ["../escape", "a/b", ".hidden", ""] {
            assert!(generator.generate(&[record(1, 1.0)], Some(id)).is_err(), "{id}");
        }
    }
}
