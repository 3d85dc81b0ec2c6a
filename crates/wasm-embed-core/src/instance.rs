//! WebAssembly instance creation and extern realization.
//!
//! An [`Instance`] materializes a [`Module`] inside a [`Store`]:
//!
//! 1. Reject modules that declare imports (none can be supplied here)
//! 2. Instantiate the module in the store
//! 3. Realize one extern per export, in the module's export order
//! 4. Verify each extern's kind against the declared export kind

use std::sync::Arc;

use tracing::{debug, instrument};

use wasm_embed_common::RuntimeError;

use crate::externs::{Extern, ExternKind};
use crate::registry::{Registry, ResourceGuard, ResourceId, ResourceKind};
use crate::{Module, Store};

/// A runtime extern stored at its export index.
struct Realized {
    name: String,
    kind: ExternKind,
    inner: wasmtime::Extern,
}

/// A linked, runnable realization of a module inside a store.
///
/// `get_extern(i)` corresponds to `module.export(i)` for every index.
pub struct Instance {
    externs: Vec<Realized>,
    module_hash: String,
    store: ResourceId,
    guard: ResourceGuard,
}

impl Instance {
    /// Instantiate an import-free `module` in `store`.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `Link` if the module declares imports
    /// - `Instantiation` if the runtime rejects the module (e.g. the start
    ///   function traps, or the module belongs to another engine)
    /// - `UseAfterDestroy` if the store or module was released
    #[instrument(skip(store, module), fields(store = %store.debug_name(), content_hash = %module.content_hash()))]
    pub fn new(store: &mut Store, module: &Module) -> Result<Self, RuntimeError> {
        Self::check_pairing(store, module)?;

        if let Some(import) = module.inner().imports().next() {
            return Err(RuntimeError::link(format!(
                "module declares {} import(s), first '{}.{}'; only import-free modules can be linked",
                module.num_imports(),
                import.module(),
                import.name()
            )));
        }

        let instance = wasmtime::Instance::new(store.inner_mut(), module.inner(), &[])
            .map_err(|e| RuntimeError::instantiation(format!("{e:#}")))?;

        Self::realize(store, module, instance)
    }

    pub(crate) fn check_pairing(store: &Store, module: &Module) -> Result<(), RuntimeError> {
        store.ensure_live()?;
        module.ensure_live()?;

        if !Arc::ptr_eq(store.registry(), module.registry()) {
            return Err(RuntimeError::instantiation(
                "module and store belong to different engines",
            ));
        }
        Ok(())
    }

    /// Wrap a freshly instantiated runtime instance, realizing its externs in
    /// export order.
    pub(crate) fn realize(
        store: &mut Store,
        module: &Module,
        instance: wasmtime::Instance,
    ) -> Result<Self, RuntimeError> {
        let guard = ResourceGuard::new(
            store.registry().clone(),
            ResourceKind::Instance,
            module.content_hash(),
            Some(store.resource_id()),
        )?;

        let mut externs = Vec::with_capacity(module.num_exports());
        for (index, export) in module.exports().iter().enumerate() {
            let inner = instance
                .get_export(store.inner_mut(), &export.name)
                .ok_or_else(|| {
                    RuntimeError::instantiation(format!(
                        "export {index} ('{}') missing from instance",
                        export.name
                    ))
                })?;

            let kind = ExternKind::from(&inner.ty(store.inner()));
            if kind != export.kind {
                return Err(RuntimeError::instantiation(format!(
                    "export {index} ('{}') declared as {} but realized as {kind}",
                    export.name, export.kind
                )));
            }

            externs.push(Realized {
                name: export.name.clone(),
                kind,
                inner,
            });
        }

        debug!(num_exports = externs.len(), "Instance created");

        Ok(Self {
            externs,
            module_hash: module.content_hash().to_string(),
            store: store.resource_id(),
            guard,
        })
    }

    /// Number of externs; equals the module's `num_exports()`.
    pub fn num_exports(&self) -> usize {
        self.externs.len()
    }

    /// The extern realized for export `index`.
    ///
    /// # Errors
    ///
    /// Returns `ExportIndexOutOfRange` unless `index < num_exports()`, or
    /// `UseAfterDestroy` if the instance or an owner was released.
    pub fn get_extern(&self, index: usize) -> Result<Extern, RuntimeError> {
        self.guard.ensure_live()?;

        let realized = self
            .externs
            .get(index)
            .ok_or(RuntimeError::ExportIndexOutOfRange {
                index,
                len: self.externs.len(),
            })?;

        Ok(Extern::new(
            realized.name.clone(),
            realized.kind,
            realized.inner.clone(),
            self.guard.id(),
            self.store,
            self.guard.registry().clone(),
        ))
    }

    /// Content hash of the module this instance was created from.
    pub fn module_hash(&self) -> &str {
        &self.module_hash
    }

    /// Returns `true` while the instance and all of its owners are alive.
    pub fn is_live(&self) -> bool {
        self.guard.ensure_live().is_ok()
    }

    /// Release the instance.
    ///
    /// Externs and functions taken from it fail with `UseAfterDestroy` afterwards.
    pub fn destroy(mut self) -> Result<(), RuntimeError> {
        debug!(content_hash = %self.module_hash, "Destroying instance");
        self.guard.release()
    }

    pub(crate) fn registry(&self) -> &Arc<Registry> {
        self.guard.registry()
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("module_hash", &self.module_hash)
            .field("num_exports", &self.externs.len())
            .finish_non_exhaustive()
    }
}
