//! Name-to-transform table populated once at startup.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use claimgate_types::error::TransformError;
use claimgate_types::verdict::{TransformContext, TransformResult};

use super::traits::{FnTransform, Transform};

/// Registry of transforms keyed by identifier.
///
/// Re-registering a name overwrites the prior binding (last write wins).
#[derive(Clone, Default)]
pub struct TransformRegistry {
    transforms: HashMap<String, Arc<dyn Transform>>,
}

impl TransformRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `transform`, returning the previous binding if any.
    pub fn register<T>(&mut self, name: impl Into<String>, transform: T) -> Option<Arc<dyn Transform>>
    where
        T: Transform + 'static,
    {
        self.register_arc(name, Arc::new(transform))
    }

    /// Bind `name` to an already shared transform.
    pub fn register_arc(
        &mut self,
        name: impl Into<String>,
        transform: Arc<dyn Transform>,
    ) -> Option<Arc<dyn Transform>> {
        let name = name.into();
        let previous = self.transforms.insert(name.clone(), transform);
        if previous.is_some() {
            debug!(transform = %name, "transform binding replaced");
        }
        previous
    }

    /// Bind `name` to a closure.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F) -> Option<Arc<dyn Transform>>
    where
        F: Fn(&str, &TransformContext) -> Result<TransformResult, TransformError>
            + Send
            + Sync
            + 'static,
    {
        self.register(name, FnTransform::new(f))
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Transform>> {
        self.transforms.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transforms.contains_key(name)
    }

    /// Registered identifiers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.transforms.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}

impl fmt::Debug for TransformRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformRegistry")
            .field("transforms", &self.names())
            .finish()
    }
}
