//! # claimgate-core
//!
//! Core engine for the claimgate compliance gateway.
//!
//! Contains the admission gate (burst + per-key rate limiting), the
//! idempotency cache, the transform pipeline engine and its built-in
//! transforms, the audit recorder and pack generator, and the metrics /
//! SLO layer everything reports into. [`gateway::Gateway`] wires them in
//! request order.

pub mod audit;
pub mod clock;
pub mod gate;
pub mod gateway;
pub mod idempotency;
pub mod observability;
pub mod pipeline;
pub mod store;
pub mod transforms;
