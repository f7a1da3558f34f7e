//! Transform results, change / reason trails and the final verdict.

use serde::{Deserialize, Serialize};

/// Request-scoped context shared read-only with every transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformContext {
    /// BCP-47 locale tag (e.g. `en-US`).
    pub locale: String,
    /// Tenant the request was resolved to upstream.
    pub tenant: String,
    /// Correlation id echoed back on the verdict.
    pub correlation_id: String,
}

impl TransformContext {
    pub fn new(
        locale: impl Into<String>,
        tenant: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            locale: locale.into(),
            tenant: tenant.into(),
            correlation_id: correlation_id.into(),
        }
    }
}

/// Severity of a [`Flag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlagKind {
    Info,
    Warn,
    Danger,
}

/// A transform's qualitative finding, independent of content mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flag {
    pub kind: FlagKind,
    pub label: String,
    pub explanation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl Flag {
    pub fn new(kind: FlagKind, label: impl Into<String>, explanation: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            explanation: explanation.into(),
            source: None,
        }
    }

    /// Builder: cite where the rule came from.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Output of one transform invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformResult {
    /// Output text. Equal to the input when `modified` is false.
    pub text: String,
    /// Whether the transform altered the text.
    pub modified: bool,
    #[serde(default)]
    pub flags: Vec<Flag>,
    /// External services this invocation needed but could not reach.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub degraded_services: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl TransformResult {
    /// The input text, unchanged, with no findings.
    pub fn unchanged(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            modified: false,
            flags: Vec::new(),
            degraded_services: Vec::new(),
            metadata: None,
        }
    }

    /// A rewritten text.
    pub fn rewritten(text: impl Into<String>) -> Self {
        Self {
            modified: true,
            ..Self::unchanged(text)
        }
    }

    /// Builder: append a flag.
    pub fn with_flag(mut self, flag: Flag) -> Self {
        self.flags.push(flag);
        self
    }

    /// Builder: report an unreachable dependency.
    pub fn with_degraded(mut self, service: impl Into<String>) -> Self {
        self.degraded_services.push(service.into());
        self
    }

    /// Builder: attach free-form metadata.
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

/// One content mutation, attributable to exactly one transform step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub field: String,
    pub before: String,
    pub after: String,
    /// Transform that produced the mutation.
    pub transform: String,
}

/// A human-readable explanation derived 1:1 from a [`Flag`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub transform: String,
    pub why: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// The pipeline's allow / modify decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictKind {
    Allow,
    Modify,
}

impl VerdictKind {
    /// Wire / metric label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Modify => "modify",
        }
    }
}

/// Final decision plus change and reason trails.
///
/// `verdict == Modify` iff `changes` is non-empty. Construct through
/// [`Verdict::new`] to keep that invariant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub verdict: VerdictKind,
    pub changes: Vec<Change>,
    pub reasons: Vec<Reason>,
    pub audit_id: String,
    pub correlation_id: String,
}

impl Verdict {
    pub fn new(
        changes: Vec<Change>,
        reasons: Vec<Reason>,
        audit_id: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        let verdict = if changes.is_empty() {
            VerdictKind::Allow
        } else {
            VerdictKind::Modify
        };
        Self {
            verdict,
            changes,
            reasons,
            audit_id: audit_id.into(),
            correlation_id: correlation_id.into(),
        }
    }

    /// Text after the last change, if any.
    pub fn final_text(&self) -> Option<&str> {
        self.changes.last().map(|c| c.after.as_str())
    }
}

/// Per-step decision recorded in the execution trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Pass,
    Modify,
    Error,
}

/// One entry in the per-item trace, one per transform actually invoked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformExecution {
    pub name: String,
    pub duration_ms: f64,
    pub decision: Decision,
}
