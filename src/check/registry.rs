//! Ordered registry of checks for a single cycle.
//!
//! Names are unique: a second registration under an existing name is
//! rejected and the first one stays in place.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use super::Check;

/// Error type for registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// A check with this name is already registered.
    #[error("duplicate check name: {0}")]
    Duplicate(String),
}

/// Registry of checks in registration order.
#[derive(Default)]
pub struct CheckRegistry {
    checks: Vec<Arc<dyn Check>>,
    names: HashSet<String>,
}

impl std::fmt::Debug for CheckRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl CheckRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a check.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the name is already taken.
    pub fn register(&mut self, check: Arc<dyn Check>) -> Result<(), RegistryError> {
        let name = check.name().to_owned();
        if !self.names.insert(name.clone()) {
            return Err(RegistryError::Duplicate(name));
        }
        self.checks.push(check);
        Ok(())
    }

    /// Whether a check with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Registered check names in order.
    pub fn names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    /// Iterate over checks in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Check>> {
        self.checks.iter()
    }

    /// Number of registered checks.
    pub fn len(&self) -> usize {
        self.checks.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }
}
