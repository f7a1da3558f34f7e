//! Audit trail: storage backends, the recorder the pipeline hands traces
//! to, and the pack generator for offline review.

pub mod chain;
pub mod pack;
pub mod recorder;
pub mod store;

pub use pack::AuditPackGenerator;
pub use recorder::AuditRecorder;
pub use store::{AuditStore, InMemoryAuditStore, JsonlAuditStore};
