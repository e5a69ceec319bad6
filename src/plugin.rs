//! Plugin registration and lifecycle.
//!
//! Plugins are registered into a [`PluginRegistry`] before the service
//! starts; registration problems (empty or duplicate names) are
//! configuration errors meant to surface during startup or in tests, never
//! at runtime under load. A plugin's background activity is bound to the
//! service lifecycle: started during boot, stopped while the service
//! drains.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::messenger::Messenger;
use crate::store::Store;

/// Plugin registration errors. Fatal at startup.
#[derive(Debug, Error)]
pub enum PluginError {
    /// A plugin must have a non-empty name.
    #[error("cannot register plugin with an empty name")]
    EmptyName,

    /// Each plugin name may be registered once.
    #[error("plugin already registered: {0}")]
    Duplicate(String),
}

/// Interface between a running plugin and the bot infrastructure.
#[derive(Clone)]
pub struct Plugger {
    messenger: Arc<Messenger>,
    store: Arc<Store>,
}

impl Plugger {
    /// Create a plugger handing out the given infrastructure handles.
    pub fn new(messenger: Arc<Messenger>, store: Arc<Store>) -> Self {
        Self { messenger, store }
    }

    /// Outbound send path.
    pub fn messenger(&self) -> &Arc<Messenger> {
        &self.messenger
    }

    /// Persistent store.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}

/// Implemented by plugin background activities that can be stopped on
/// request.
pub trait Stopper: Send {
    /// Stop the background activity. Called during service shutdown.
    fn stop(&mut self) -> anyhow::Result<()>;
}

/// Specification of a plugin that may be registered with the service.
pub struct PluginSpec {
    /// Unique plugin name.
    pub name: String,
    /// Help text shown to users.
    pub help: String,
    /// Start the plugin's background activity. Invoked once during boot.
    pub start: fn(Plugger) -> Box<dyn Stopper>,
}

/// Holds the plugins registered for one service instance.
///
/// The registry is an explicit value injected into the service, not
/// process-global state; tests construct a fresh registry per test.
#[derive(Default)]
pub struct PluginRegistry {
    specs: Vec<PluginSpec>,
    names: HashSet<String>,
}

impl PluginRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin specification.
    pub fn register(&mut self, spec: PluginSpec) -> Result<(), PluginError> {
        if spec.name.is_empty() {
            return Err(PluginError::EmptyName);
        }
        if !self.names.insert(spec.name.clone()) {
            return Err(PluginError::Duplicate(spec.name));
        }
        self.specs.push(spec);
        Ok(())
    }

    /// Number of registered plugins.
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    /// Whether no plugins are registered.
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Start every registered plugin, returning their stoppers in
    /// registration order.
    pub fn start_all(&self, plugger: &Plugger) -> Vec<(String, Box<dyn Stopper>)> {
        self.specs
            .iter()
            .map(|spec| (spec.name.clone(), (spec.start)(plugger.clone())))
            .collect()
    }
}
