//! Name-keyed capability registries
//!
//! Built once at startup, then shared read-only behind an `Arc`.

use crate::llm::ChatProvider;
use crate::tools::Tool;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Which registry a lookup went to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityKind {
    Tool,
    Provider,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityKind::Tool => f.write_str("tool"),
            CapabilityKind::Provider => f.write_str("provider"),
        }
    }
}

/// Lookup of an unregistered name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} not found: {name}")]
pub struct NotFoundError {
    pub kind: CapabilityKind,
    pub name: String,
}

/// Anything that can be registered by name
pub trait Capability: Send + Sync {
    const KIND: CapabilityKind;

    fn capability_name(&self) -> &str;
}

impl Capability for dyn Tool {
    const KIND: CapabilityKind = CapabilityKind::Tool;

    fn capability_name(&self) -> &str {
        self.name()
    }
}

impl Capability for dyn ChatProvider {
    const KIND: CapabilityKind = CapabilityKind::Provider;

    fn capability_name(&self) -> &str {
        self.name()
    }
}

pub type ToolRegistry = Registry<dyn Tool>;
pub type ProviderRegistry = Registry<dyn ChatProvider>;

pub struct Registry<T: ?Sized + Capability> {
    entries: HashMap<String, Arc<T>>,
}

impl<T: ?Sized + Capability> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Insert under the capability's own name; a later registration with
    /// the same name replaces the earlier one.
    pub fn register(&mut self, capability: Arc<T>) {
        let kind = T::KIND;
        let name = capability.capability_name().to_string();
        if self.entries.insert(name.clone(), capability).is_some() {
            tracing::warn!(%kind, %name, "Replaced existing registration");
        } else {
            tracing::debug!(%kind, %name, "Registered capability");
        }
    }

    pub fn get(&self, name: &str) -> Result<Arc<T>, NotFoundError> {
        self.entries.get(name).cloned().ok_or_else(|| NotFoundError {
            kind: T::KIND,
            name: name.to_string(),
        })
    }

    /// Sorted snapshot of registered names
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<_> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: ?Sized + Capability> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
