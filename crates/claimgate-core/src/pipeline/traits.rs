//! Transform trait and the closure adapter.
//!
//! A transform receives the current working text and the request context
//! and returns a [`TransformResult`]. Transforms are pure with respect to
//! their inputs: the context is borrowed immutably and the only output is
//! the returned text and flags.

use std::fmt;

use async_trait::async_trait;

use claimgate_types::error::TransformError;
use claimgate_types::verdict::{TransformContext, TransformResult};

/// One content transform in a pipeline chain.
#[async_trait]
pub trait Transform: Send + Sync {
    /// Inspect and optionally rewrite `text`.
    async fn apply(
        &self,
        text: &str,
        ctx: &TransformContext,
    ) -> Result<TransformResult, TransformError>;

    /// Name of the field recorded on a [`Change`](claimgate_types::verdict::Change).
    fn field(&self) -> &str {
        "text"
    }
}

/// Adapts a synchronous closure into a [`Transform`].
pub struct FnTransform<F> {
    f: F,
    field: String,
}

impl<F> FnTransform<F>
where
    F: Fn(&str, &TransformContext) -> Result<TransformResult, TransformError> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            field: "text".into(),
        }
    }

    /// Builder: record changes against a field other than `text`.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = field.into();
        self
    }
}

impl<F> fmt::Debug for FnTransform<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTransform")
            .field("field", &self.field)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<F> Transform for FnTransform<F>
where
    F: Fn(&str, &TransformContext) -> Result<TransformResult, TransformError> + Send + Sync,
{
    async fn apply(
        &self,
        text: &str,
        ctx: &TransformContext,
    ) -> Result<TransformResult, TransformError> {
        (self.f)(text, ctx)
    }

    fn field(&self) -> &str {
        &self.field
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> TransformContext {
        TransformContext::new("en-US", "acme", "corr-1")
    }

    #[tokio::test]
    async fn closure_transform_applies() {
        let upper = FnTransform::new(|text: &str, _ctx: &TransformContext| {
            Ok(TransformResult::rewritten(text.to_uppercase()))
        });
        let out = upper.apply("salt", &ctx()).await.unwrap();
        assert_eq!(out.text, "SALT");
        assert!(out.modified);
        assert_eq!(upper.field(), "text");
    }

    #[tokio::test]
    async fn closure_sees_context() {
        let echo = FnTransform::new(|_text: &str, ctx: &TransformContext| {
            Ok(TransformResult::unchanged(ctx.tenant.clone()))
        })
        .with_field("name");
        let out = echo.apply("x", &ctx()).await.unwrap();
        assert_eq!(out.text, "acme");
        assert_eq!(echo.field(), "name");
    }
}
