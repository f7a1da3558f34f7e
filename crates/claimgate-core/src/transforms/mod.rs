//! Built-in, data-driven transforms and the manifest that instantiates them.
//!
//! Transforms here execute rules supplied as data; none of them carries
//! domain content of its own. A [`TransformManifest`] lists transform ids
//! and the rules each one runs, and builds the [`TransformRegistry`] the
//! pipeline resolves profiles against.
//!
//! ```yaml
//! transforms:
//!   - id: allergens
//!     kind: pattern_redactor
//!     rules:
//!       - pattern: '(?i)\bpeanuts?\b'
//!         replacement: '[allergen: peanut]'
//!         label: peanut
//!         explanation: Contains peanut
//!         kind: danger
//!   - id: claims
//!     kind: keyword_flagger
//!     keywords:
//!       - { keyword: organic, label: claim_organic, explanation: Needs certification }
//!   - id: notice
//!     kind: disclaimer
//!     text: Prepared in a kitchen that handles allergens.
//!     triggers: ['\[allergen']
//!   - id: pii
//!     kind: pii
//!   - id: recalls
//!     kind: lookup
//!     service: recall_lookup
//!     timeout_ms: 250
//!     entries:
//!       - { keyword: tahini, label: recall, explanation: Active recall }
//! ```

pub mod disclaimer;
pub mod flagger;
pub mod lookup;
pub mod redact;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use claimgate_types::error::{GatewayError, Result};

use crate::pipeline::TransformRegistry;

pub use disclaimer::DisclaimerAppender;
pub use flagger::{KeywordFlagger, KeywordRule};
pub use lookup::{LookupAnswer, LookupError, LookupService, LookupTransform, StaticLookupService};
pub use redact::{PatternRedactor, PatternRule, PiiRedactor};

/// Identifier under which [`TransformManifest::builtin`] registers the PII
/// redactor.
pub const PII: &str = "pii";

/// Rule-driven transform definitions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TransformManifest {
    #[serde(default)]
    pub transforms: Vec<TransformEntry>,
}

/// One manifest entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformEntry {
    pub id: String,
    #[serde(flatten)]
    pub kind: TransformKind,
}

/// What a manifest entry builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransformKind {
    PatternRedactor {
        rules: Vec<PatternRule>,
    },
    KeywordFlagger {
        keywords: Vec<KeywordRule>,
    },
    Disclaimer {
        text: String,
        #[serde(default)]
        triggers: Vec<String>,
    },
    Pii,
    /// A [`StaticLookupService`] named `service` over `entries`.
    Lookup {
        service: String,
        #[serde(default)]
        entries: Vec<KeywordRule>,
        #[serde(default, alias = "timeoutMs")]
        timeout_ms: Option<u64>,
    },
}

impl TransformManifest {
    /// The transforms available without any manifest file.
    pub fn builtin() -> Self {
        Self {
            transforms: vec![TransformEntry {
                id: PII.into(),
                kind: TransformKind::Pii,
            }],
        }
    }

    /// Parse a manifest from YAML or JSON.
    pub fn from_yaml_str(src: &str) -> Result<Self> {
        serde_yaml::from_str(src).map_err(|e| GatewayError::ConfigInvalid {
            reason: format!("malformed transform manifest: {e}"),
        })
    }

    /// Read and parse a manifest file.
    pub fn load(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&src)
    }

    /// Append `other`'s entries. Later entries win on id collisions.
    pub fn merge(mut self, other: TransformManifest) -> Self {
        self.transforms.extend(other.transforms);
        self
    }

    /// Instantiate every entry into a fresh registry.
    pub fn build(&self) -> Result<TransformRegistry> {
        let mut registry = TransformRegistry::new();
        self.register_into(&mut registry)?;
        Ok(registry)
    }

    /// Instantiate every entry into `registry`, in manifest order.
    pub fn register_into(&self, registry: &mut TransformRegistry) -> Result<()> {
        for entry in &self.transforms {
            if entry.id.trim().is_empty() {
                return Err(GatewayError::ConfigInvalid {
                    reason: "transform manifest entry with empty id".into(),
                });
            }
            match entry.kind {
                TransformKind::PatternRedactor { ref rules } => {
                    registry.register(&entry.id, PatternRedactor::new(rules.clone())?);
                }
                TransformKind::KeywordFlagger { ref keywords } => {
                    registry.register(&entry.id, KeywordFlagger::new(keywords.clone())?);
                }
                TransformKind::Disclaimer {
                    ref text,
                    ref triggers,
                } => {
                    registry.register(&entry.id, DisclaimerAppender::new(text.as_str(), triggers)?);
                }
                TransformKind::Pii => {
                    registry.register(&entry.id, PiiRedactor::new()?);
                }
                TransformKind::Lookup {
                    ref service,
                    ref entries,
                    timeout_ms,
                } => {
                    let backend = Arc::new(StaticLookupService::new(
                        service.as_str(),
                        entries.clone(),
                    )?);
                    let mut transform = LookupTransform::new(backend);
                    if let Some(ms) = timeout_ms {
                        transform = transform.with_timeout(Duration::from_millis(ms));
                    }
                    registry.register(&entry.id, transform);
                }
            }
            debug!(transform = %entry.id, "transform registered from manifest");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimgate_types::verdict::{FlagKind, TransformContext};

    const MANIFEST: &str = r#"
transforms:
  - id: allergens
    kind: pattern_redactor
    rules:
      - pattern: '(?i)\bpeanuts?\b'
        replacement: '[allergen: peanut]'
        label: peanut
        explanation: Contains peanut
        kind: danger
  - id: claims
    kind: keyword_flagger
    keywords:
      - { keyword: organic, label: claim_organic, explanation: Needs certification }
  - id: notice
    kind: disclaimer
    text: Prepared in a kitchen that handles allergens.
    triggers: ['\[allergen']
  - id: recalls
    kind: lookup
    service: recall_lookup
    timeoutMs: 250
    entries:
      - { keyword: tahini, label: recall, explanation: Active recall }
"#;

    #[test]
    fn parses_every_kind() {
        let manifest = TransformManifest::from_yaml_str(MANIFEST).unwrap();
        assert_eq!(manifest.transforms.len(), 4);
        match manifest.transforms[0].kind {
            TransformKind::PatternRedactor { ref rules } => {
                assert_eq!(rules[0].kind, FlagKind::Danger)
            }
            ref other => panic!("unexpected kind {other:?}"),
        }
        assert!(matches!(
            manifest.transforms[3].kind,
            TransformKind::Lookup {
                timeout_ms: Some(250),
                ..
            }
        ));
    }

    #[test]
    fn builds_registry_with_builtin() {
        let registry = TransformManifest::builtin()
            .merge(TransformManifest::from_yaml_str(MANIFEST).unwrap())
            .build()
            .unwrap();
        assert_eq!(
            registry.names(),
            vec!["allergens", "claims", "notice", "pii", "recalls"]
        );
    }

    #[tokio::test]
    async fn built_transforms_run() {
        let registry = TransformManifest::from_yaml_str(MANIFEST)
            .unwrap()
            .build()
            .unwrap();
        let ctx = TransformContext::new("en", "t", "c");
        let out = registry
            .get("allergens")
            .unwrap()
            .apply("peanut sauce", &ctx)
            .await
            .unwrap();
        assert_eq!(out.text, "[allergen: peanut] sauce");
    }

    #[test]
    fn unknown_kind_is_config_error() {
        let err = TransformManifest::from_yaml_str("transforms:\n  - id: x\n    kind: telepathy\n")
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn bad_rule_fails_build() {
        let src = "transforms:\n  - id: x\n    kind: disclaimer\n    text: ''\n";
        let err = TransformManifest::from_yaml_str(src)
            .unwrap()
            .build()
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }
}
