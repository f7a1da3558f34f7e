//! Transform pipeline.
//!
//! Profiles name an ordered chain of transforms; the engine runs the chain
//! with pipe semantics (each step sees the previous step's output), builds
//! the change / reason trails and hands the trace to the audit recorder.

pub mod engine;
pub mod registry;
pub mod traits;

pub use engine::TransformPipeline;
pub use registry::TransformRegistry;
pub use traits::{FnTransform, Transform};
