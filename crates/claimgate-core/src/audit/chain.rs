//! SHA-256 hash chain over the audit trail.
//!
//! Every [`AuditRecord`] carries the `hash` of the record appended before
//! it (`prev_hash`) and its own `hash`, computed over the record's
//! canonical JSON with `hash` blanked. The first record links to
//! [`GENESIS_HASH`]. Editing a record, or dropping or reordering lines,
//! makes [`verify`] fail at the first affected record.
//!
//! A chain only verifies as a whole: a tenant- or time-filtered subset of
//! a trail has gaps and will not link.

use serde_json::Value;
use sha2::{Digest, Sha256};

use claimgate_types::audit::AuditRecord;
use claimgate_types::error::{GatewayError, Result};

/// `prev_hash` of the first record in a trail.
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Hex SHA-256 of `record` with its `hash` field blanked.
///
/// Keys are hashed in sorted order, so the digest does not depend on how
/// the record was laid out on disk.
pub fn compute_hash(record: &AuditRecord) -> Result<String> {
    let mut value = serde_json::to_value(record)?;
    if let Value::Object(ref mut fields) = value {
        fields.insert("hash".into(), Value::String(String::new()));
    }
    let canonical = serde_json::to_vec(&value)?;
    Ok(hex(&Sha256::digest(&canonical)))
}

/// Link `record` to `prev_hash` and stamp its own hash.
pub fn seal(record: &mut AuditRecord, prev_hash: &str) -> Result<()> {
    record.prev_hash = prev_hash.to_string();
    record.hash = compute_hash(record)?;
    Ok(())
}

/// Verify a full trail, in append order, starting from the genesis hash.
///
/// Returns the tip hash (the genesis hash for an empty trail).
pub fn verify(records: &[AuditRecord]) -> Result<String> {
    let mut expected_prev = GENESIS_HASH.to_string();
    for (index, record) in records.iter().enumerate() {
        if record.prev_hash != expected_prev {
            return Err(GatewayError::AuditTampered {
                index,
                reason: format!("record {} does not link to its predecessor", record.audit_id),
            });
        }
        if compute_hash(record)? != record.hash {
            return Err(GatewayError::AuditTampered {
                index,
                reason: format!("record {} does not match its hash", record.audit_id),
            });
        }
        expected_prev.clone_from(&record.hash);
    }
    Ok(expected_prev)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
