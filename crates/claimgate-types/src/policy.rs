//! Policy shape: named transform profiles and the routes bound to them.
//!
//! The pipeline treats a policy as opaque configuration. Parsing is
//! provided for JSON and YAML sources; resolving transform identifiers
//! against the runtime registry happens when the pipeline is built.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// A named, ordered list of transform identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub transforms: Vec<String>,
}

/// Binds a request path to a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    pub path: String,
    pub profile: String,
}

/// Root policy document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default)]
    pub profiles: Vec<Profile>,
    #[serde(default)]
    pub routes: Vec<Route>,
}

impl Policy {
    /// Parse a policy from YAML (JSON is accepted as a YAML subset).
    pub fn from_yaml_str(src: &str) -> Result<Self> {
        let policy: Policy =
            serde_yaml::from_str(src).map_err(|e| GatewayError::ConfigInvalid {
                reason: format!("malformed policy: {e}"),
            })?;
        policy.validate_shape()?;
        Ok(policy)
    }

    /// Read and parse a policy file.
    pub fn load(path: &Path) -> Result<Self> {
        let src = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&src)
    }

    /// Look up a profile by name.
    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.name == name)
    }

    /// Profile name bound to `path`, if any. Exact match only.
    pub fn profile_for_route(&self, path: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|r| r.path == path)
            .map(|r| r.profile.as_str())
    }

    /// Structural checks that need no transform registry: unique profile
    /// names, no empty identifiers, every route bound to a known profile.
    pub fn validate_shape(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for profile in &self.profiles {
            if profile.name.trim().is_empty() {
                return Err(GatewayError::ConfigInvalid {
                    reason: "profile with empty name".into(),
                });
            }
            if !seen.insert(profile.name.as_str()) {
                return Err(GatewayError::ConfigInvalid {
                    reason: format!("duplicate profile '{}'", profile.name),
                });
            }
            if profile.transforms.iter().any(|t| t.trim().is_empty()) {
                return Err(GatewayError::ConfigInvalid {
                    reason: format!("profile '{}' lists an empty transform id", profile.name),
                });
            }
        }
        for route in &self.routes {
            if !seen.contains(route.profile.as_str()) {
                return Err(GatewayError::ConfigInvalid {
                    reason: format!(
                        "route '{}' references unknown profile '{}'",
                        route.path, route.profile
                    ),
                });
            }
        }
        Ok(())
    }
}
