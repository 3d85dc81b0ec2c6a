//! Isolation boundary grouping stores.

use std::sync::Arc;

use tracing::debug;

use wasm_embed_common::RuntimeError;

use crate::engine::EngineShared;
use crate::registry::{ResourceGuard, ResourceId, ResourceKind};
use crate::{Engine, Store};

/// A group of stores sharing one isolation boundary.
///
/// A compartment must outlive every [`Store`] created in it. Destroying it
/// first is reported as `ResourceInUse` and poisons those stores.
pub struct Compartment {
    engine: Arc<EngineShared>,
    debug_name: String,
    guard: ResourceGuard,
}

impl Compartment {
    /// Create a compartment in `engine`.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterDestroy` if the engine was released.
    pub fn new(engine: &Engine, debug_name: &str) -> Result<Self, RuntimeError> {
        let guard = ResourceGuard::new(
            engine.shared().registry.clone(),
            ResourceKind::Compartment,
            debug_name,
            Some(engine.resource_id()),
        )?;

        debug!(engine_id = %engine.id(), debug_name, "Compartment created");

        Ok(Self {
            engine: engine.shared().clone(),
            debug_name: debug_name.to_string(),
            guard,
        })
    }

    /// Human-readable label given at creation.
    pub fn debug_name(&self) -> &str {
        &self.debug_name
    }

    /// Returns `true` while the compartment and its engine are alive.
    pub fn is_live(&self) -> bool {
        self.guard.ensure_live().is_ok()
    }

    /// Create a store in this compartment.
    pub fn store(&self, debug_name: &str) -> Result<Store, RuntimeError> {
        Store::new(self, debug_name)
    }

    /// Release the compartment.
    ///
    /// # Errors
    ///
    /// Returns `ResourceInUse` if stores created in it were still alive.
    pub fn destroy(mut self) -> Result<(), RuntimeError> {
        debug!(debug_name = %self.debug_name, "Destroying compartment");
        self.guard.release()
    }

    pub(crate) fn engine(&self) -> &Arc<EngineShared> {
        &self.engine
    }

    pub(crate) fn resource_id(&self) -> ResourceId {
        self.guard.id()
    }
}

impl std::fmt::Debug for Compartment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compartment")
            .field("debug_name", &self.debug_name)
            .field("engine_id", &self.engine.id)
            .finish_non_exhaustive()
    }
}
