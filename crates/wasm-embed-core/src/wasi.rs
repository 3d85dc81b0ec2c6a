//! WASI bootstrap for modules that expect a WASI host.
//!
//! Only available on engines created with `wasi_enabled`. The module's WASI
//! preview1 imports are linked against the store's WASI context, the module
//! is instantiated and its `_start` export, if any, is run to completion.

use tracing::{info, instrument};
use wasmtime::Linker;
use wasmtime_wasi::I32Exit;

use wasm_embed_common::{RuntimeError, WasiError};

use crate::func::trap_error;
use crate::store::StoreState;
use crate::{Instance, Module, Store};

/// Name of the WASI command entry point.
pub const ENTRY_POINT: &str = "_start";

#[instrument(skip(store, module), fields(store = %store.debug_name(), content_hash = %module.content_hash()))]
pub(crate) fn run(store: &mut Store, module: &Module) -> Result<Instance, RuntimeError> {
    if !store.is_wasi_enabled() {
        return Err(RuntimeError::configuration(
            "WASI bootstrap requested but the engine was created with wasi_enabled = false",
        ));
    }
    Instance::check_pairing(store, module)?;

    let mut linker: Linker<StoreState> = Linker::new(store.inner().engine());
    wasmtime_wasi::preview1::add_to_linker_sync(&mut linker, |state: &mut StoreState| {
        &mut state.wasi
    })
    .map_err(|e| WasiError::InitializationFailed {
        reason: e.to_string(),
    })?;

    for import in module.inner().imports() {
        if linker.get_by_import(store.inner_mut(), &import).is_none() {
            return Err(RuntimeError::link(format!(
                "unresolved import '{}.{}'",
                import.module(),
                import.name()
            )));
        }
    }

    let raw = linker
        .instantiate(store.inner_mut(), module.inner())
        .map_err(|e| RuntimeError::instantiation(format!("{e:#}")))?;
    let instance = Instance::realize(store, module, raw)?;

    if module.export_index(ENTRY_POINT).is_some() {
        let entry = raw
            .get_typed_func::<(), ()>(store.inner_mut(), ENTRY_POINT)
            .map_err(|e| {
                RuntimeError::signature_mismatch(format!("'{ENTRY_POINT}' must be () -> (): {e}"))
            })?;

        let start = std::time::Instant::now();
        let outcome = entry.call(store.inner_mut(), ());
        let duration = start.elapsed();

        let result = match outcome {
            Ok(()) => Ok(()),
            Err(e) => match e.downcast_ref::<I32Exit>() {
                Some(I32Exit(0)) => Ok(()),
                Some(I32Exit(code)) => Err(WasiError::Exit { code: *code }.into()),
                None => Err(trap_error(&e)),
            },
        };
        store.record_call(duration, matches!(result, Err(RuntimeError::Trap { .. })));
        result?;

        info!(duration_ms = duration.as_millis(), "WASI entry point returned");
    }

    Ok(instance)
}
