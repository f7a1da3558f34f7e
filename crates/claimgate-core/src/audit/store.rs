//! Append-only audit storage backends.
//!
//! [`AuditStore`] is the append/query seam between the recorder and
//! wherever records live. [`InMemoryAuditStore`] keeps them in process;
//! [`JsonlAuditStore`] appends one JSON document per line to a file so the
//! trail survives restarts.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use claimgate_types::audit::{AuditQuery, AuditRecord};
use claimgate_types::error::{GatewayError, Result};

use super::chain;

/// Append / query interface over [`AuditRecord`]s.
#[async_trait]
pub trait AuditStore: Send + Sync {
    /// Append a record. Records are never updated or removed.
    async fn append(&self, record: &AuditRecord) -> Result<()>;

    /// Records matching `query`, in append order.
    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>>;

    /// Total number of records held.
    async fn len(&self) -> Result<usize>;

    /// The most recently appended record.
    async fn last(&self) -> Result<Option<AuditRecord>>;
}

// ── In-memory ────────────────────────────────────────────────────────────

/// Process-local audit store.
#[derive(Default)]
pub struct InMemoryAuditStore {
    records: RwLock<Vec<AuditRecord>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        self.records.write().push(record.clone());
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        Ok(self
            .records
            .read()
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.records.read().len())
    }

    async fn last(&self) -> Result<Option<AuditRecord>> {
        Ok(self.records.read().last().cloned())
    }
}

// ── JSONL file ───────────────────────────────────────────────────────────

/// Durable audit store: one serialized record per line.
///
/// Appends are serialized through an async mutex so concurrent writers
/// never interleave partial lines.
pub struct JsonlAuditStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditStore {
    /// Open (or lazily create) the store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole trail and check its hash chain.
    ///
    /// Unlike [`AuditStore::query`], an unreadable line is an error here.
    /// Returns the number of records verified.
    pub async fn verify(&self) -> Result<usize> {
        let records = self.read_all(true).await?;
        chain::verify(&records)?;
        debug!(path = %self.path.display(), records = records.len(), "audit trail verified");
        Ok(records.len())
    }

    async fn read_all(&self, strict: bool) -> Result<Vec<AuditRecord>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut records = Vec::new();
        for (lineno, line) in data.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditRecord>(line) {
                Ok(record) => records.push(record),
                Err(e) if strict => {
                    return Err(GatewayError::AuditTampered {
                        index: records.len(),
                        reason: format!("line {} is not an audit record: {e}", lineno + 1),
                    });
                }
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        line = lineno + 1,
                        error = %e,
                        "skipping unreadable audit line"
                    );
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl AuditStore for JsonlAuditStore {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!(audit_id = %record.audit_id, path = %self.path.display(), "audit record appended");
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        Ok(self
            .read_all(false)
            .await?
            .into_iter()
            .filter(|r| query.matches(r))
            .collect())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.read_all(false).await?.len())
    }

    async fn last(&self) -> Result<Option<AuditRecord>> {
        Ok(self.read_all(false).await?.pop())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use claimgate_types::verdict::Verdict;

    fn record(id: &str, tenant: &str, offset_secs: i64) -> AuditRecord {
        AuditRecord {
            audit_id: id.into(),
            ts: Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap()
                + Duration::seconds(offset_secs),
            tenant: tenant.into(),
            profile: "menu".into(),
            route: "/v1/check".into(),
            item_id: format!("item-{id}"),
            transforms: vec![],
            verdict: Verdict::new(vec![], vec![], id, "corr"),
            latency_ms: 2.5,
            degraded_mode: false,
            degraded_services: None,
            prev_hash: String::new(),
            hash: String::new(),
        }
    }

    #[tokio::test]
    async fn memory_store_filters() {
        let store = InMemoryAuditStore::new();
        store.append(&record("a", "acme", 0)).await.unwrap();
        store.append(&record("b", "other", 10)).await.unwrap();
        store.append(&record("c", "acme", 20)).await.unwrap();

        assert_eq!(store.len().await.unwrap(), 3);
        let acme = store.query(&AuditQuery::tenant("acme")).await.unwrap();
        let ids: Vec<_> = acme.iter().map(|r| r.audit_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);

        let base = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
        let windowed = store
            .query(&AuditQuery::default().between(base + Duration::seconds(5), base + Duration::seconds(30)))
            .await
            .unwrap();
        assert_eq!(windowed.len(), 2);
    }

    #[tokio::test]
    async fn jsonl_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        {
            let store = JsonlAuditStore::new(&path);
            store.append(&record("a", "acme", 0)).await.unwrap();
            store.append(&record("b", "acme", 1)).await.unwrap();
        }
        let reopened = JsonlAuditStore::new(&path);
        let all = reopened.query(&AuditQuery::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0], record("a", "acme", 0));

        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 2);
    }

    #[tokio::test]
    async fn jsonl_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonlAuditStore::new(dir.path().join("none.jsonl"));
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn jsonl_skips_corrupt_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let store = JsonlAuditStore::new(&path);
        store.append(&record("a", "acme", 0)).await.unwrap();
        {
            use std::io::Write;
            let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
            writeln!(f, "{{not json").unwrap();
        }
        store.append(&record("b", "acme", 1)).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 2);
    }

    async fn sealed_trail(path: &Path, n: i64) -> JsonlAuditStore {
        let store = JsonlAuditStore::new(path);
        let mut prev = chain::GENESIS_HASH.to_string();
        for i in 0..n {
            let mut r = record(&format!("r{i}"), "acme", i);
            chain::seal(&mut r, &prev).unwrap();
            prev.clone_from(&r.hash);
            store.append(&r).await.unwrap();
        }
        store
    }

    fn rewrite_lines(path: &Path, edit: impl FnOnce(&mut Vec<String>)) {
        let raw = std::fs::read_to_string(path).unwrap();
        let mut lines: Vec<String> = raw.lines().map(str::to_string).collect();
        edit(&mut lines);
        std::fs::write(path, lines.join("\n") + "\n").unwrap();
    }

    fn tampered_index(err: GatewayError) -> usize {
        match err {
            GatewayError::AuditTampered { index, .. } => index,
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn jsonl_verify_accepts_untouched_trail() {
        let dir = tempfile::tempdir().unwrap();
        let store = sealed_trail(&dir.path().join("audit.jsonl"), 3).await;
        assert_eq!(store.verify().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn jsonl_verify_rejects_edited_field() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let store = sealed_trail(&path, 3).await;
        rewrite_lines(&path, |lines| {
            let edited = lines[1].replace("\"degraded_mode\":false", "\"degraded_mode\":true");
            assert_ne!(edited, lines[1]);
            lines[1] = edited;
        });
        assert_eq!(tampered_index(store.verify().await.unwrap_err()), 1);
        // Plain queries still read the edited trail.
        assert_eq!(store.len().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn jsonl_verify_rejects_reordered_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let store = sealed_trail(&path, 3).await;
        rewrite_lines(&path, |lines| lines.swap(0, 2));
        assert_eq!(tampered_index(store.verify().await.unwrap_err()), 0);
    }

    #[tokio::test]
    async fn jsonl_verify_rejects_unreadable_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let store = sealed_trail(&path, 2).await;
        rewrite_lines(&path, |lines| lines.push("{not json".into()));
        assert_eq!(tampered_index(store.verify().await.unwrap_err()), 2);
    }

    #[tokio::test]
    async fn last_returns_most_recent_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = sealed_trail(&dir.path().join("audit.jsonl"), 2).await;
        assert_eq!(store.last().await.unwrap().unwrap().audit_id, "r1");
        assert!(InMemoryAuditStore::new().last().await.unwrap().is_none());
    }
}
