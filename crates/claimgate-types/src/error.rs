//! Error types for the claimgate gateway.
//!
//! Provides [`GatewayError`] as the top-level error type, [`TransformError`]
//! for failures raised inside a single transform step, and [`ErrorBody`],
//! the envelope returned to callers. Both enums are non-exhaustive to allow
//! future extension without breaking downstream.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error code returned when an admission check rejects a request.
pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
/// Error code for policy / registry misconfiguration.
pub const CONFIGURATION_ERROR: &str = "CONFIGURATION_ERROR";
/// Error code for audit pack generation over zero records.
pub const EMPTY_AUDIT_INPUT: &str = "EMPTY_AUDIT_INPUT";
/// Error code for every internal failure. The message is never forwarded.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Top-level error type for the gateway.
///
/// Variants are grouped into recoverable (admission) and fatal
/// (configuration, storage, I/O) categories to guide callers on whether
/// retrying is worthwhile.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    // ── Recoverable ──────────────────────────────────────────────────

    /// An admission check rejected the request.
    #[error("rate limit exceeded for {scope}: retry after {retry_after_secs}s")]
    RateLimited {
        /// Which counter tripped (`burst` or `key`).
        scope: String,
        /// Seconds until the counter window resets.
        retry_after_secs: u64,
    },

    // ── Configuration ────────────────────────────────────────────────

    /// Configuration or policy is malformed or semantically invalid.
    #[error("invalid config: {reason}")]
    ConfigInvalid {
        /// What is wrong with the configuration.
        reason: String,
    },

    /// A profile references a transform that is not registered.
    #[error("profile '{profile}' references unknown transform '{transform}'")]
    UnknownTransform {
        /// Profile declaring the identifier.
        profile: String,
        /// The unresolved transform identifier.
        transform: String,
    },

    /// A profile name was requested that the loaded policy does not define.
    #[error("unknown profile: {0}")]
    UnknownProfile(String),

    /// No policy route maps the given path to a profile.
    #[error("no profile bound to route: {0}")]
    UnknownRoute(String),

    // ── Audit ────────────────────────────────────────────────────────

    /// Pack generation was asked to summarise zero records.
    #[error("cannot generate an audit pack from zero records")]
    EmptyAuditInput,

    /// A stored audit trail failed hash-chain verification.
    #[error("audit trail tampered at record {index}: {reason}")]
    AuditTampered {
        /// Zero-based position of the first bad record.
        index: usize,
        /// Which check failed.
        reason: String,
    },

    // ── Internal ─────────────────────────────────────────────────────

    /// Counter / cache / audit backend failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization / deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl GatewayError {
    /// Whether the caller can succeed by retrying later.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Whether this is a configuration failure that must stop startup.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::ConfigInvalid { .. }
                | Self::UnknownTransform { .. }
                | Self::UnknownProfile(_)
                | Self::UnknownRoute(_)
        )
    }

    /// Stable, caller-facing error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => RATE_LIMIT_EXCEEDED,
            Self::EmptyAuditInput => EMPTY_AUDIT_INPUT,
            e if e.is_configuration() => CONFIGURATION_ERROR,
            _ => INTERNAL_ERROR,
        }
    }

    /// Whether the display message is safe to show the caller.
    ///
    /// Only errors caused by the request itself qualify; everything that
    /// surfaces as a server failure keeps its detail in the logs.
    pub fn is_caller_facing(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::UnknownRoute(_) | Self::EmptyAuditInput
        )
    }

    /// Build the caller-facing envelope for this error.
    ///
    /// Server-side failures are replaced by a generic message per code;
    /// only the code and correlation id survive.
    pub fn to_body(&self, correlation_id: &str) -> ErrorBody {
        let code = self.code();
        let message = if self.is_caller_facing() {
            self.to_string()
        } else if code == CONFIGURATION_ERROR {
            "configuration error".to_string()
        } else {
            "internal error".to_string()
        };
        ErrorBody::new(code, message, correlation_id)
    }
}

/// Failure raised by a single transform step.
///
/// Never escapes the pipeline: it is recorded as a `decision=error` entry
/// in the execution trace and the chain continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransformError {
    /// The transform itself failed.
    #[error("transform failed: {0}")]
    Failed(String),

    /// An external service the transform depends on was unreachable.
    #[error("dependency unavailable: {service}")]
    DependencyUnavailable {
        /// Name of the unavailable service (e.g. `ocr`, `recall_lookup`).
        service: String,
    },
}

/// Caller-facing error envelope.
///
/// Serializes as `{"error": {"code", "message"}, "correlation_id"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Code and message.
    pub error: ErrorDetail,
    /// Correlation id joining this failure to its audit trace.
    pub correlation_id: String,
}

/// The `error` member of [`ErrorBody`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

impl ErrorBody {
    /// Create an envelope from its parts.
    pub fn new(
        code: impl Into<String>,
        message: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
            },
            correlation_id: correlation_id.into(),
        }
    }
}

/// A convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limited_display_and_code() {
        let err = GatewayError::RateLimited {
            scope: "burst".into(),
            retry_after_secs: 1,
        };
        assert_eq!(
            err.to_string(),
            "rate limit exceeded for burst: retry after 1s"
        );
        assert_eq!(err.code(), RATE_LIMIT_EXCEEDED);
        assert!(err.is_recoverable());
        assert!(!err.is_configuration());
    }

    #[test]
    fn configuration_errors_share_code() {
        let errs = [
            GatewayError::ConfigInvalid {
                reason: "bad".into(),
            },
            GatewayError::UnknownTransform {
                profile: "default".into(),
                transform: "nope".into(),
            },
            GatewayError::UnknownProfile("x".into()),
            GatewayError::UnknownRoute("/v1/x".into()),
        ];
        for err in &errs {
            assert!(err.is_configuration(), "{err} should be configuration");
            assert_eq!(err.code(), CONFIGURATION_ERROR);
            assert!(!err.is_recoverable());
        }
    }

    #[test]
    fn internal_errors_do_not_leak_message() {
        let err = GatewayError::Storage("redis at 10.0.0.4:6379 refused".into());
        let body = err.to_body("corr-1");
        assert_eq!(body.error.code, INTERNAL_ERROR);
        assert_eq!(body.error.message, "internal error");
        assert!(!body.error.message.contains("10.0.0.4"));
        assert_eq!(body.correlation_id, "corr-1");
    }

    #[test]
    fn configuration_errors_do_not_leak_reason() {
        let err = GatewayError::ConfigInvalid {
            reason: "manifest /srv/claimgate/transforms.yaml: bad regex".into(),
        };
        let body = err.to_body("corr-3");
        assert_eq!(body.error.code, CONFIGURATION_ERROR);
        assert_eq!(body.error.message, "configuration error");
        assert!(!err.is_caller_facing());

        let route = GatewayError::UnknownRoute("/v1/nope".into()).to_body("corr-4");
        assert_eq!(route.error.code, CONFIGURATION_ERROR);
        assert!(route.error.message.contains("/v1/nope"));
    }

    #[test]
    fn tampered_trail_is_internal() {
        let err = GatewayError::AuditTampered {
            index: 3,
            reason: "record a-3 does not match its hash".into(),
        };
        assert_eq!(err.to_string(), "audit trail tampered at record 3: record a-3 does not match its hash");
        assert_eq!(err.to_body("c").error.message, "internal error");
    }

    #[test]
    fn user_facing_errors_keep_message() {
        let body = GatewayError::EmptyAuditInput.to_body("corr-2");
        assert_eq!(body.error.code, EMPTY_AUDIT_INPUT);
        assert!(body.error.message.contains("zero records"));
    }

    #[test]
    fn error_body_wire_shape() {
        let body = ErrorBody::new(RATE_LIMIT_EXCEEDED, "slow down", "c-9");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error"]["code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(json["error"]["message"], "slow down");
        assert_eq!(json["correlation_id"], "c-9");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: GatewayError = io_err.into();
        assert!(matches!(err, GatewayError::Io(_)));
        assert_eq!(err.code(), INTERNAL_ERROR);
    }

    #[test]
    fn transform_error_display() {
        let err = TransformError::DependencyUnavailable {
            service: "ocr".into(),
        };
        assert_eq!(err.to_string(), "dependency unavailable: ocr");
        let err = TransformError::Failed("regex blew up".into());
        assert_eq!(err.to_string(), "transform failed: regex blew up");
    }
}
