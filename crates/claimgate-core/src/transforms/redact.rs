//! Regex-driven redaction.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use claimgate_types::error::{GatewayError, Result, TransformError};
use claimgate_types::verdict::{Flag, FlagKind, TransformContext, TransformResult};

use crate::pipeline::Transform;

/// One redaction rule as written in a manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternRule {
    /// Regular expression (Rust `regex` syntax).
    pub pattern: String,
    /// Replacement text; `$1`-style group references are expanded.
    #[serde(default = "default_replacement")]
    pub replacement: String,
    pub label: String,
    pub explanation: String,
    #[serde(default = "default_kind")]
    pub kind: FlagKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

fn default_replacement() -> String {
    "[redacted]".into()
}

fn default_kind() -> FlagKind {
    FlagKind::Warn
}

impl PatternRule {
    pub fn new(
        pattern: impl Into<String>,
        replacement: impl Into<String>,
        label: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
            label: label.into(),
            explanation: explanation.into(),
            kind: default_kind(),
            source: None,
        }
    }

    pub fn with_kind(mut self, kind: FlagKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    fn flag(&self) -> Flag {
        let flag = Flag::new(self.kind, &self.label, &self.explanation);
        match self.source {
            Some(ref source) => flag.with_source(source),
            None => flag,
        }
    }
}

struct CompiledRule {
    regex: Regex,
    rule: PatternRule,
}

/// Rewrites every match of each rule, in rule order, and flags each rule
/// that matched at least once.
pub struct PatternRedactor {
    rules: Vec<CompiledRule>,
}

impl PatternRedactor {
    /// Compile `rules`. An invalid pattern is a configuration error.
    pub fn new(rules: Vec<PatternRule>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern).map_err(|e| GatewayError::ConfigInvalid {
                    reason: format!("invalid pattern '{}': {e}", rule.pattern),
                })?;
                Ok(CompiledRule { regex, rule })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn redact(&self, text: &str) -> TransformResult {
        let mut current = text.to_string();
        let mut flags = Vec::new();
        for compiled in &self.rules {
            if compiled.regex.is_match(&current) {
                current = compiled
                    .regex
                    .replace_all(&current, compiled.rule.replacement.as_str())
                    .into_owned();
                flags.push(compiled.rule.flag());
            }
        }
        let mut result = if current == text {
            TransformResult::unchanged(current)
        } else {
            TransformResult::rewritten(current)
        };
        result.flags = flags;
        result
    }
}

#[async_trait]
impl Transform for PatternRedactor {
    async fn apply(
        &self,
        text: &str,
        _ctx: &TransformContext,
    ) -> std::result::Result<TransformResult, TransformError> {
        Ok(self.redact(text))
    }
}

// ── PII ──────────────────────────────────────────────────────────────────

const EMAIL_PATTERN: &str = r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}";
const PHONE_PATTERN: &str = r"\+?\d[\d\s().-]{7,}\d";

/// Redacts email addresses and phone numbers.
pub struct PiiRedactor {
    inner: PatternRedactor,
}

impl PiiRedactor {
    pub fn new() -> Result<Self> {
        let rules = vec![
            PatternRule::new(
                EMAIL_PATTERN,
                "[email]",
                "pii_email",
                "Email address removed from customer-facing text",
            ),
            PatternRule::new(
                PHONE_PATTERN,
                "[phone]",
                "pii_phone",
                "Phone number removed from customer-facing text",
            ),
        ];
        Ok(Self {
            inner: PatternRedactor::new(rules)?,
        })
    }
}

#[async_trait]
impl Transform for PiiRedactor {
    async fn apply(
        &self,
        text: &str,
        ctx: &TransformContext,
    ) -> std::result::Result<TransformResult, TransformError> {
        self.inner.apply(text, ctx).await
    }
}
