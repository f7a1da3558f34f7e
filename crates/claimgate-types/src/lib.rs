//! # claimgate-types
//!
//! Core type definitions for the claimgate compliance gateway.
//!
//! This crate is the foundation of the dependency graph -- every other
//! claimgate crate depends on it. It contains:
//!
//! - **[`error`]** -- [`GatewayError`], [`TransformError`] and the caller-facing [`ErrorBody`]
//! - **[`item`]** -- Inbound content items and ingredient normalization
//! - **[`verdict`]** -- Transform results, change / reason trails, verdicts
//! - **[`audit`]** -- Audit traces, records, queries and pack summaries
//! - **[`policy`]** -- Profiles and route bindings
//! - **[`config`]** -- Gateway configuration schema

pub mod audit;
pub mod config;
pub mod error;
pub mod item;
pub mod policy;
pub mod verdict;

pub use error::{ErrorBody, GatewayError, Result, TransformError};
