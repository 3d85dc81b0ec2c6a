//! Engine with a default compartment and store, released as one scope.
//!
//! [`Runtime`] is the simplified path for callers that need a single store:
//! it creates the Engine, a default Compartment and a default Store together
//! and tears them down in reverse order. Callers that need several stores use
//! [`Engine`], [`Compartment`] and [`Store`] directly.

use tracing::info;

use wasm_embed_common::{RuntimeConfig, RuntimeError};

use crate::value::Value;
use crate::{Compartment, Engine, Function, Instance, Module, Store, resolve_function};

/// Debug name of the default compartment and store.
pub const DEFAULT_NAME: &str = "default";

/// An engine owning a default compartment and store.
///
/// Fields drop in declaration order, so dropping a `Runtime` also releases
/// the store before the compartment and the compartment before the engine.
pub struct Runtime {
    store: Store,
    compartment: Compartment,
    engine: Engine,
}

impl Runtime {
    /// Create an engine with its default compartment and store.
    pub fn new(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        let engine = Engine::new(config)?;
        let compartment = engine.compartment(DEFAULT_NAME)?;
        let store = compartment.store(DEFAULT_NAME)?;

        Ok(Self {
            store,
            compartment,
            engine,
        })
    }

    /// The engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The default compartment.
    pub fn compartment(&self) -> &Compartment {
        &self.compartment
    }

    /// The default store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The default store, for calling functions directly.
    pub fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }

    /// Load a module; see [`Engine::load_module`].
    pub fn load_module(&self, bytes: &[u8], precompiled: bool) -> Result<Module, RuntimeError> {
        self.engine.load_module(bytes, precompiled)
    }

    /// Precompile a module; see [`Engine::precompile`].
    pub fn precompile(&self, bytes: &[u8]) -> Result<Vec<u8>, RuntimeError> {
        self.engine.precompile(bytes)
    }

    /// Instantiate an import-free module in the default store.
    pub fn new_instance(&mut self, module: &Module) -> Result<Instance, RuntimeError> {
        Instance::new(&mut self.store, module)
    }

    /// Run `module` through the WASI bootstrap in the default store.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` unless the engine was created with WASI enabled.
    pub fn run_wasi(&mut self, module: &Module) -> Result<Instance, RuntimeError> {
        self.store.run_wasi(module)
    }

    /// Resolve the function exported as `name`.
    pub fn resolve_function(
        &self,
        module: &Module,
        instance: &Instance,
        name: &str,
    ) -> Result<Function, RuntimeError> {
        resolve_function(module, instance, name)
    }

    /// Call `function` in the default store.
    pub fn call(&mut self, function: &Function, args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
        function.call(&mut self.store, args)
    }

    /// Release the store, the compartment and the engine, in that order.
    ///
    /// Every step runs even if an earlier one reports a violation.
    ///
    /// # Errors
    ///
    /// Returns the first `ResourceInUse` error, raised when instances or
    /// modules created through this runtime are still alive.
    pub fn destroy(self) -> Result<(), RuntimeError> {
        let Self {
            store,
            compartment,
            engine,
        } = self;

        info!(engine_id = %engine.id(), "Destroying runtime");

        let store_result = store.destroy();
        let compartment_result = compartment.destroy();
        let engine_result = engine.destroy();

        store_result.and(compartment_result).and(engine_result)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("engine", &self.engine)
            .field("store", &self.store)
            .finish_non_exhaustive()
    }
}
