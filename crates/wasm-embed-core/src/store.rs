//! Execution context and per-store state.
//!
//! This module provides:
//! - [`Store`]: Live execution context scoped to a compartment
//! - [`StoreState`]: Host state attached to the Wasmtime store
//! - [`CallMetrics`]: Counters for calls made through the store

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;
use wasmtime_wasi::WasiCtxBuilder;
use wasmtime_wasi::preview1::WasiP1Ctx;

use wasm_embed_common::{RuntimeError, WasiConfig};

use crate::engine::EngineShared;
use crate::registry::{Registry, ResourceGuard, ResourceId, ResourceKind};
use crate::{Compartment, Instance, Module};

/// Host state attached to each Wasmtime store.
///
/// # Contents
///
/// - `wasi`: WASI preview1 context used by the WASI bootstrap
/// - `debug_name`: Label given at store creation
/// - `metrics`: Call counters
pub struct StoreState {
    /// WASI context for system interface.
    pub(crate) wasi: WasiP1Ctx,

    /// Label given at store creation.
    pub debug_name: String,

    /// Call metrics.
    pub metrics: CallMetrics,
}

/// Counters for calls made through a store.
#[derive(Debug, Clone, Default)]
pub struct CallMetrics {
    /// Calls that reached the runtime.
    pub calls: u64,

    /// Calls that ended in a trap.
    pub traps: u64,

    /// Time spent inside the runtime.
    pub total_duration: Duration,
}

impl CallMetrics {
    pub(crate) fn record(&mut self, duration: Duration, trapped: bool) {
        self.calls += 1;
        if trapped {
            self.traps += 1;
        }
        self.total_duration += duration;
    }
}

impl StoreState {
    /// Create store state, building a WASI context from `wasi` when enabled.
    ///
    /// A store of an engine without WASI still carries an empty context with
    /// no stdio, arguments or environment.
    pub fn new(debug_name: String, wasi: Option<&WasiConfig>) -> Self {
        let mut builder = WasiCtxBuilder::new();
        if let Some(config) = wasi {
            if config.inherit_stdio {
                builder.inherit_stdio();
            }
            for arg in &config.args {
                builder.arg(arg);
            }
            for (key, value) in &config.env {
                builder.env(key, value);
            }
        }

        Self {
            wasi: builder.build_p1(),
            debug_name,
            metrics: CallMetrics::default(),
        }
    }
}

/// Live execution context.
///
/// A store holds the runtime state of every instance created in it. It must
/// outlive those instances and the functions taken from them, and must be
/// used by one thread at a time; calls take `&mut Store`.
pub struct Store {
    inner: wasmtime::Store<StoreState>,
    engine: Arc<EngineShared>,
    guard: ResourceGuard,
}

impl Store {
    /// Create a store in `compartment`.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterDestroy` if the compartment or its engine was released.
    pub fn new(compartment: &Compartment, debug_name: &str) -> Result<Self, RuntimeError> {
        let engine = compartment.engine().clone();
        let guard = ResourceGuard::new(
            engine.registry.clone(),
            ResourceKind::Store,
            debug_name,
            Some(compartment.resource_id()),
        )?;

        let wasi = engine
            .config
            .engine
            .wasi_enabled
            .then_some(&engine.config.wasi);
        let state = StoreState::new(debug_name.to_string(), wasi);
        let inner = wasmtime::Store::new(&engine.inner, state);

        debug!(
            engine_id = %engine.id,
            compartment = compartment.debug_name(),
            debug_name,
            "Store created"
        );

        Ok(Self {
            inner,
            engine,
            guard,
        })
    }

    /// Human-readable label given at creation.
    pub fn debug_name(&self) -> &str {
        &self.inner.data().debug_name
    }

    /// Call metrics accumulated by this store.
    pub fn metrics(&self) -> &CallMetrics {
        &self.inner.data().metrics
    }

    /// Returns `true` while the store and all of its owners are alive.
    pub fn is_live(&self) -> bool {
        self.guard.ensure_live().is_ok()
    }

    /// Check if the owning engine enables the WASI bootstrap.
    pub fn is_wasi_enabled(&self) -> bool {
        self.engine.config.engine.wasi_enabled
    }

    /// Instantiate an import-free module in this store.
    pub fn instantiate(&mut self, module: &Module) -> Result<Instance, RuntimeError> {
        Instance::new(self, module)
    }

    /// Run `module` through the WASI bootstrap in this store.
    pub fn run_wasi(&mut self, module: &Module) -> Result<Instance, RuntimeError> {
        crate::wasi::run(self, module)
    }

    /// Release the store.
    ///
    /// # Errors
    ///
    /// Returns `ResourceInUse` if instances created in it were still alive.
    pub fn destroy(mut self) -> Result<(), RuntimeError> {
        debug!(
            debug_name = %self.inner.data().debug_name,
            calls = self.inner.data().metrics.calls,
            "Destroying store"
        );
        self.guard.release()
    }

    pub(crate) fn ensure_live(&self) -> Result<(), RuntimeError> {
        self.guard.ensure_live()
    }

    pub(crate) fn resource_id(&self) -> ResourceId {
        self.guard.id()
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        self.guard.registry()
    }

    pub(crate) fn inner(&self) -> &wasmtime::Store<StoreState> {
        &self.inner
    }

    pub(crate) fn inner_mut(&mut self) -> &mut wasmtime::Store<StoreState> {
        &mut self.inner
    }

    pub(crate) fn record_call(&mut self, duration: Duration, trapped: bool) {
        self.inner.data_mut().metrics.record(duration, trapped);
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("debug_name", &self.debug_name())
            .field("metrics", self.metrics())
            .finish_non_exhaustive()
    }
}
