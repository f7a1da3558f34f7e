//! Keyword flagging. Reports findings without touching the text.

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use claimgate_types::error::{GatewayError, Result, TransformError};
use claimgate_types::verdict::{Flag, FlagKind, TransformContext, TransformResult};

use crate::pipeline::Transform;

/// A keyword and the finding it produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keyword: String,
    pub label: String,
    pub explanation: String,
    #[serde(default = "default_kind")]
    pub kind: FlagKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

fn default_kind() -> FlagKind {
    FlagKind::Info
}

impl KeywordRule {
    pub fn new(
        keyword: impl Into<String>,
        label: impl Into<String>,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            keyword: keyword.into(),
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

    pub(crate) fn flag(&self) -> Flag {
        let flag = Flag::new(self.kind, &self.label, &self.explanation);
        match self.source {
            Some(ref source) => flag.with_source(source),
            None => flag,
        }
    }
}

/// Keyword rules compiled to case-insensitive whole-word matchers.
pub(crate) struct KeywordSet {
    rules: Vec<(Regex, KeywordRule)>,
}

impl KeywordSet {
    pub(crate) fn new(rules: Vec<KeywordRule>) -> Result<Self> {
        let rules = rules
            .into_iter()
            .map(|rule| {
                if rule.keyword.trim().is_empty() {
                    return Err(GatewayError::ConfigInvalid {
                        reason: format!("keyword rule '{}' has an empty keyword", rule.label),
                    });
                }
                let pattern = format!(r"(?i)\b{}\b", regex::escape(rule.keyword.trim()));
                let regex = Regex::new(&pattern).map_err(|e| GatewayError::ConfigInvalid {
                    reason: format!("invalid keyword '{}': {e}", rule.keyword),
                })?;
                Ok((regex, rule))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { rules })
    }

    /// Rules matching `text`, at most once each, in rule order.
    pub(crate) fn matches<'a>(&'a self, text: &'a str) -> impl Iterator<Item = &'a KeywordRule> + 'a {
        self.rules
            .iter()
            .filter(move |(regex, _)| regex.is_match(text))
            .map(|(_, rule)| rule)
    }

    pub(crate) fn len(&self) -> usize {
        self.rules.len()
    }
}

/// Flags every rule whose keyword appears in the text.
pub struct KeywordFlagger {
    keywords: KeywordSet,
}

impl KeywordFlagger {
    pub fn new(rules: Vec<KeywordRule>) -> Result<Self> {
        Ok(Self {
            keywords: KeywordSet::new(rules)?,
        })
    }

    pub fn len(&self) -> usize {
        self.keywords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.len() == 0
    }
}

#[async_trait]
impl Transform for KeywordFlagger {
    async fn apply(
        &self,
        text: &str,
        _ctx: &TransformContext,
    ) -> std::result::Result<TransformResult, TransformError> {
        let mut result = TransformResult::unchanged(text);
        result.flags = self.keywords.matches(text).map(KeywordRule::flag).collect();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flagger() -> KeywordFlagger {
        KeywordFlagger::new(vec![
            KeywordRule::new("organic", "claim_organic", "Organic claim requires certification")
                .with_kind(FlagKind::Warn)
                .with_source("USDA NOP"),
            KeywordRule::new("gluten free", "claim_gluten_free", "Gluten-free claim"),
            KeywordRule::new("honey", "contains_honey", "Not vegan"),
        ])
        .unwrap()
    }

    fn ctx() -> TransformContext {
        TransformContext::new("en", "t", "c")
    }

    #[tokio::test]
    async fn flags_without_modifying() {
        let out = flagger()
            .apply("Organic oats, GLUTEN FREE, organic honey", &ctx())
            .await
            .unwrap();
        assert!(!out.modified);
        assert_eq!(out.text, "Organic oats, GLUTEN FREE, organic honey");
        let labels: Vec<_> = out.flags.iter().map(|f| f.label.as_str()).collect();
        assert_eq!(
            labels,
            vec!["claim_organic", "claim_gluten_free", "contains_honey"]
        );
        assert_eq!(out.flags[0].source.as_deref(), Some("USDA NOP"));
    }

    #[tokio::test]
    async fn matches_whole_words_only() {
        let out = flagger().apply("honeydew melon", &ctx()).await.unwrap();
        assert!(out.flags.is_empty());
    }

    #[test]
    fn keyword_metacharacters_are_literal() {
        let f = KeywordFlagger::new(vec![KeywordRule::new("c++", "l", "e")]);
        assert!(f.is_ok());
    }

    #[test]
    fn empty_keyword_is_rejected() {
        let err = KeywordFlagger::new(vec![KeywordRule::new("  ", "blank", "e")])
            .err()
            .unwrap();
        assert!(err.is_configuration());
    }
}
