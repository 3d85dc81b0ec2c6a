//! Wasmtime engine configuration and creation.
//!
//! The [`Engine`] is the root of the resource graph. It owns the Wasmtime
//! engine, the registry every other resource is tracked in, and the cache of
//! compiled modules. Destroying it poisons every resource created through it.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument};
use uuid::Uuid;
use wasmtime::{Config, InstanceAllocationStrategy, PoolingAllocationConfig};

use wasm_embed_common::{EngineConfig, OptLevel, RuntimeConfig, RuntimeError};

use crate::cache::ModuleCache;
use crate::registry::{Registry, ResourceGuard, ResourceId, ResourceKind};
use crate::{Compartment, Module};

/// State shared by the engine and every resource created through it.
pub(crate) struct EngineShared {
    pub(crate) id: Uuid,
    pub(crate) inner: wasmtime::Engine,
    pub(crate) config: RuntimeConfig,
    pub(crate) registry: Arc<Registry>,
    pub(crate) modules: ModuleCache,
}

/// Process-level runtime handle.
///
/// # Example
///
/// ```ignore
/// use wasm_embed_common::RuntimeConfig;
/// use wasm_embed_core::Engine;
///
/// let engine = Engine::new(&RuntimeConfig::default())?;
/// let compartment = engine.compartment("main")?;
/// let mut store = compartment.store("main")?;
/// let module = engine.load_module(&bytes, false)?;
/// let instance = store.instantiate(&module)?;
/// ```
pub struct Engine {
    shared: Arc<EngineShared>,
    guard: ResourceGuard,
}

impl Engine {
    /// Create a new engine with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns a `Configuration` error if Wasmtime rejects the settings.
    pub fn new(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let mut wasmtime_config = Config::new();

        wasmtime_config.cranelift_opt_level(match config.engine.opt_level {
            OptLevel::None => wasmtime::OptLevel::None,
            OptLevel::Speed => wasmtime::OptLevel::Speed,
            OptLevel::SpeedAndSize => wasmtime::OptLevel::SpeedAndSize,
        });
        wasmtime_config.max_wasm_stack(config.engine.max_wasm_stack_bytes());

        if config.engine.pooling_allocator {
            wasmtime_config.allocation_strategy(InstanceAllocationStrategy::Pooling(
                Self::create_pooling_config(&config.engine),
            ));

            info!(
                max_instances = config.engine.max_instances,
                "Pooling allocator enabled"
            );
        }

        let inner = wasmtime::Engine::new(&wasmtime_config).map_err(|e| {
            RuntimeError::configuration(format!("Failed to create Wasmtime engine: {e}"))
        })?;

        let id = Uuid::new_v4();
        let registry = Arc::new(Registry::new());
        let guard = ResourceGuard::new(
            registry.clone(),
            ResourceKind::Engine,
            &id.to_string(),
            None,
        )?;

        info!(
            engine_id = %id,
            wasi_enabled = config.engine.wasi_enabled,
            "Wasmtime engine initialized"
        );

        Ok(Self {
            shared: Arc::new(EngineShared {
                id,
                inner,
                config: config.clone(),
                registry,
                modules: ModuleCache::default(),
            }),
            guard,
        })
    }

    fn create_pooling_config(config: &EngineConfig) -> PoolingAllocationConfig {
        let mut pooling = PoolingAllocationConfig::default();

        pooling.total_core_instances(config.max_instances);
        pooling.total_memories(config.max_instances);
        pooling.total_tables(config.max_instances);

        pooling
    }

    /// Unique identifier of this engine, attached to its log records.
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    /// Get a reference to the inner Wasmtime engine.
    pub fn inner(&self) -> &wasmtime::Engine {
        &self.shared.inner
    }

    /// Get the runtime configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Check if the WASI bootstrap is enabled.
    pub fn is_wasi_enabled(&self) -> bool {
        self.shared.config.engine.wasi_enabled
    }

    /// The registry tracking this engine's resources.
    pub fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// Number of distinct compiled modules held in the cache.
    pub fn cached_modules(&self) -> usize {
        self.shared.modules.len()
    }

    /// Returns `true` until the engine is destroyed.
    pub fn is_live(&self) -> bool {
        self.guard.ensure_live().is_ok()
    }

    /// Create a compartment inside this engine.
    pub fn compartment(&self, debug_name: &str) -> Result<Compartment, RuntimeError> {
        Compartment::new(self, debug_name)
    }

    /// Load a module from bytes.
    ///
    /// With `precompiled == false`, `bytes` must be a WebAssembly binary and is
    /// compiled. With `precompiled == true`, `bytes` must be an artifact
    /// produced by [`Engine::precompile`] with a compatible engine.
    ///
    /// # Errors
    ///
    /// Returns `ModuleLoad` if the bytes are malformed or tagged wrongly.
    pub fn load_module(&self, bytes: &[u8], precompiled: bool) -> Result<Module, RuntimeError> {
        if precompiled {
            Module::from_precompiled(self, bytes)
        } else {
            Module::from_bytes(self, bytes)
        }
    }

    /// Read a module file and load it; see [`Engine::load_module`].
    ///
    /// # Errors
    ///
    /// Returns `Io` if the file cannot be read, plus the errors of
    /// [`Engine::load_module`].
    pub fn load_module_file(
        &self,
        path: impl AsRef<Path>,
        precompiled: bool,
    ) -> Result<Module, RuntimeError> {
        let bytes = std::fs::read(path.as_ref())?;
        self.load_module(&bytes, precompiled)
    }

    /// Compile `bytes` into a serialized artifact loadable with
    /// `load_module(artifact, true)`.
    ///
    /// # Errors
    ///
    /// Returns `ModuleLoad` if the bytes are not a valid module.
    #[instrument(skip(self, bytes), fields(engine_id = %self.shared.id, bytes_len = bytes.len()))]
    pub fn precompile(&self, bytes: &[u8]) -> Result<Vec<u8>, RuntimeError> {
        self.ensure_live()?;
        Module::validate_wasm_header(bytes)?;

        let artifact = self
            .shared
            .inner
            .precompile_module(bytes)
            .map_err(|e| RuntimeError::module_load(format!("Precompilation failed: {e}")))?;

        info!(artifact_len = artifact.len(), "Module precompiled");
        Ok(artifact)
    }

    /// Release the engine.
    ///
    /// Every resource created through the engine is poisoned afterwards.
    ///
    /// # Errors
    ///
    /// Returns `ResourceInUse` if compartments or modules were still alive.
    pub fn destroy(mut self) -> Result<(), RuntimeError> {
        info!(engine_id = %self.shared.id, "Destroying engine");
        self.shared.modules.clear();
        self.guard.release()
    }

    pub(crate) fn ensure_live(&self) -> Result<(), RuntimeError> {
        self.guard.ensure_live()
    }

    pub(crate) fn shared(&self) -> &Arc<EngineShared> {
        &self.shared
    }

    pub(crate) fn resource_id(&self) -> ResourceId {
        self.guard.id()
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.shared.id)
            .field("wasi_enabled", &self.shared.config.engine.wasi_enabled)
            .field("opt_level", &self.shared.config.engine.opt_level)
            .finish_non_exhaustive()
    }
}
