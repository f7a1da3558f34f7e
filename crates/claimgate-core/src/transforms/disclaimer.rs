//! Conditional disclaimer appending.

use async_trait::async_trait;
use regex::Regex;

use claimgate_types::error::{GatewayError, Result, TransformError};
use claimgate_types::verdict::{Flag, FlagKind, TransformContext, TransformResult};

use crate::pipeline::Transform;

/// Appends a fixed disclaimer when any trigger pattern matches.
///
/// With no triggers the disclaimer is always appended. Text that already
/// ends with the disclaimer is left alone, so re-running the transform on
/// its own output is a no-op.
pub struct DisclaimerAppender {
    triggers: Vec<Regex>,
    disclaimer: String,
}

impl DisclaimerAppender {
    pub fn new(disclaimer: impl Into<String>, triggers: &[String]) -> Result<Self> {
        let disclaimer = disclaimer.into();
        if disclaimer.trim().is_empty() {
            return Err(GatewayError::ConfigInvalid {
                reason: "disclaimer text is empty".into(),
            });
        }
        let triggers = triggers
            .iter()
            .map(|t| {
                Regex::new(t).map_err(|e| GatewayError::ConfigInvalid {
                    reason: format!("invalid disclaimer trigger '{t}': {e}"),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            triggers,
            disclaimer: disclaimer.trim().to_string(),
        })
    }

    fn triggered(&self, text: &str) -> bool {
        self.triggers.is_empty() || self.triggers.iter().any(|t| t.is_match(text))
    }
}

#[async_trait]
impl Transform for DisclaimerAppender {
    async fn apply(
        &self,
        text: &str,
        _ctx: &TransformContext,
    ) -> std::result::Result<TransformResult, TransformError> {
        if !self.triggered(text) || text.trim_end().ends_with(&self.disclaimer) {
            return Ok(TransformResult::unchanged(text));
        }
        let body = text.trim_end();
        let out = if body.is_empty() {
            self.disclaimer.clone()
        } else {
            format!("{body} {}", self.disclaimer)
        };
        Ok(TransformResult::rewritten(out).with_flag(Flag::new(
            FlagKind::Info,
            "disclaimer",
            format!("Disclaimer appended: {}", self.disclaimer),
        )))
    }
}
