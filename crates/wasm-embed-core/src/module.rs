//! WebAssembly module compilation, precompilation and export metadata.
//!
//! This module provides [`Module`], a wrapper around Wasmtime's compiled
//! module that records the static export descriptors in declaration order.
//!
//! # Loading Strategies
//!
//! - **Compile**: Compile from Wasm bytes at load time (slower cold start)
//! - **Precompiled**: Load an artifact from [`Engine::precompile`] (fast cold start)
//!
//! Compiled code is reference-counted by Wasmtime, so a module may be
//! destroyed while instances created from it are still running.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Instant;

use tracing::{debug, info, instrument};
use wasmtime::Precompiled;

use wasm_embed_common::RuntimeError;

use crate::Engine;
use crate::cache::CacheLease;
use crate::externs::ExternKind;
use crate::registry::{Registry, ResourceGuard, ResourceKind};

/// Static metadata of one export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportDescriptor {
    /// Export name.
    pub name: String,
    /// Declared kind.
    pub kind: ExternKind,
}

impl ExportDescriptor {
    /// Check if the export is a function.
    pub fn is_function(&self) -> bool {
        self.kind == ExternKind::Function
    }
}

/// How a module was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleOrigin {
    /// Compiled from source bytes.
    Compiled,
    /// Deserialized from a precompiled artifact.
    Precompiled,
}

/// A compiled WebAssembly module.
pub struct Module {
    /// The compiled Wasmtime module.
    inner: wasmtime::Module,

    /// Exports in declaration order.
    exports: Vec<ExportDescriptor>,

    /// Export name to the first index carrying it.
    index: HashMap<String, usize>,

    /// Hash of the bytes the module was loaded from.
    content_hash: String,

    origin: ModuleOrigin,

    /// Reference to the engine's cache entry, if served from the cache.
    lease: Option<CacheLease>,

    guard: ResourceGuard,
}

impl Module {
    /// Compile a module from WebAssembly bytes.
    ///
    /// When the engine caches modules, byte-identical inputs share compiled
    /// code until the last module holding it is destroyed or dropped.
    ///
    /// # Errors
    ///
    /// Returns `ModuleLoad` if the bytes are not a valid module, or are a
    /// precompiled artifact.
    #[instrument(skip(engine, bytes), fields(engine_id = %engine.id(), bytes_len = bytes.len()))]
    pub fn from_bytes(engine: &Engine, bytes: &[u8]) -> Result<Self, RuntimeError> {
        engine.ensure_live()?;

        if engine.inner().detect_precompiled(bytes).is_some() {
            return Err(RuntimeError::module_load(
                "bytes are a precompiled artifact; load them with precompiled = true",
            ));
        }
        Self::validate_wasm_header(bytes)?;

        let content_hash = compute_hash(bytes);
        let shared = engine.shared();
        let caching = shared.config.engine.cache_modules;

        let hit = if caching {
            shared.modules.acquire(&content_hash, bytes)
        } else {
            None
        };

        let (module, cached) = match hit {
            Some(module) => {
                debug!(content_hash = %content_hash, "Module served from cache");
                (module, true)
            }
            None => {
                let start = Instant::now();
                let module = wasmtime::Module::from_binary(engine.inner(), bytes).map_err(|e| {
                    RuntimeError::module_load(format!("Module compilation failed: {e}"))
                })?;

                info!(
                    content_hash = %content_hash,
                    duration_ms = start.elapsed().as_millis(),
                    "Module compiled"
                );

                if caching {
                    shared.modules.insert(content_hash.clone(), bytes, module)
                } else {
                    (module, false)
                }
            }
        };

        let lease = cached.then(|| CacheLease::new(shared.clone(), content_hash.clone()));
        Self::wrap(engine, module, content_hash, ModuleOrigin::Compiled, lease)
    }

    /// Load a module from an artifact produced by [`Engine::precompile`].
    ///
    /// # Safety
    ///
    /// Deserializing runs no verification of the machine code inside the
    /// artifact. Only load artifacts produced by a trusted engine of the same
    /// Wasmtime version and configuration.
    ///
    /// # Errors
    ///
    /// Returns `ModuleLoad` if the bytes are not a compatible module artifact.
    #[allow(unsafe_code)]
    #[instrument(skip(engine, bytes), fields(engine_id = %engine.id(), bytes_len = bytes.len()))]
    pub fn from_precompiled(engine: &Engine, bytes: &[u8]) -> Result<Self, RuntimeError> {
        engine.ensure_live()?;
        let start = Instant::now();

        match engine.inner().detect_precompiled(bytes) {
            Some(Precompiled::Module) => {}
            Some(Precompiled::Component) => {
                return Err(RuntimeError::module_load(
                    "artifact is a precompiled component, not a module",
                ));
            }
            None => {
                return Err(RuntimeError::module_load(
                    "bytes are not a precompiled artifact; load them with precompiled = false",
                ));
            }
        }

        // SAFETY: the artifact was tagged as precompiled by the caller and
        // carries the runtime's artifact header.
        let module = unsafe { wasmtime::Module::deserialize(engine.inner(), bytes) }.map_err(
            |e| RuntimeError::module_load(format!("Failed to load precompiled module: {e}")),
        )?;

        let content_hash = compute_hash(bytes);

        debug!(
            content_hash = %content_hash,
            duration_us = start.elapsed().as_micros(),
            "Precompiled module loaded"
        );

        Self::wrap(engine, module, content_hash, ModuleOrigin::Precompiled, None)
    }

    /// Compile a module from WAT (WebAssembly Text Format).
    ///
    /// This is primarily for tests and tools.
    ///
    /// # Errors
    ///
    /// Returns `ModuleLoad` if parsing or compilation fails.
    #[instrument(skip(engine, wat), fields(engine_id = %engine.id()))]
    pub fn from_wat(engine: &Engine, wat: &str) -> Result<Self, RuntimeError> {
        engine.ensure_live()?;
        let start = Instant::now();

        let module = wasmtime::Module::new(engine.inner(), wat)
            .map_err(|e| RuntimeError::module_load(format!("WAT compilation failed: {e}")))?;

        let content_hash = compute_hash(wat.as_bytes());

        info!(
            content_hash = %content_hash,
            duration_ms = start.elapsed().as_millis(),
            "WAT module compiled"
        );

        Self::wrap(engine, module, content_hash, ModuleOrigin::Compiled, None)
    }

    fn wrap(
        engine: &Engine,
        inner: wasmtime::Module,
        content_hash: String,
        origin: ModuleOrigin,
        lease: Option<CacheLease>,
    ) -> Result<Self, RuntimeError> {
        let exports: Vec<ExportDescriptor> = inner
            .exports()
            .map(|export| ExportDescriptor {
                name: export.name().to_string(),
                kind: ExternKind::from(&export.ty()),
            })
            .collect();

        let mut index = HashMap::with_capacity(exports.len());
        for (i, export) in exports.iter().enumerate() {
            index.entry(export.name.clone()).or_insert(i);
        }

        let guard = ResourceGuard::new(
            engine.shared().registry.clone(),
            ResourceKind::Module,
            &content_hash,
            Some(engine.resource_id()),
        )?;

        debug!(
            content_hash = %content_hash,
            num_exports = exports.len(),
            num_imports = inner.imports().len(),
            "Module ready"
        );

        Ok(Self {
            inner,
            exports,
            index,
            content_hash,
            origin,
            lease,
            guard,
        })
    }

    /// Number of static exports.
    pub fn num_exports(&self) -> usize {
        self.exports.len()
    }

    /// The export descriptor at `index`.
    ///
    /// # Errors
    ///
    /// Returns `ExportIndexOutOfRange` unless `index < num_exports()`.
    pub fn export(&self, index: usize) -> Result<&ExportDescriptor, RuntimeError> {
        self.exports
            .get(index)
            .ok_or(RuntimeError::ExportIndexOutOfRange {
                index,
                len: self.exports.len(),
            })
    }

    /// All export descriptors in declaration order.
    pub fn exports(&self) -> &[ExportDescriptor] {
        &self.exports
    }

    /// Index of the first export named `name`.
    pub fn export_index(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Number of imports the module declares.
    pub fn num_imports(&self) -> usize {
        self.inner.imports().len()
    }

    /// Get the content hash of the bytes the module was loaded from.
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// How the module was produced.
    pub fn origin(&self) -> ModuleOrigin {
        self.origin
    }

    /// Serialize the compiled module into a precompiled artifact.
    ///
    /// # Errors
    ///
    /// Returns `UseAfterDestroy` if the engine was released, or `ModuleLoad`
    /// if serialization fails.
    pub fn serialize(&self) -> Result<Vec<u8>, RuntimeError> {
        self.ensure_live()?;
        self.inner
            .serialize()
            .map_err(|e| RuntimeError::module_load(format!("Module serialization failed: {e}")))
    }

    /// Release the module and its reference to the engine's module cache.
    ///
    /// Instances created from it keep running.
    pub fn destroy(mut self) -> Result<(), RuntimeError> {
        debug!(content_hash = %self.content_hash, "Destroying module");
        drop(self.lease.take());
        self.guard.release()
    }

    pub(crate) fn ensure_live(&self) -> Result<(), RuntimeError> {
        self.guard.ensure_live()
    }

    pub(crate) fn registry(&self) -> &std::sync::Arc<Registry> {
        self.guard.registry()
    }

    pub(crate) fn inner(&self) -> &wasmtime::Module {
        &self.inner
    }

    /// Validate WebAssembly header (magic number).
    pub(crate) fn validate_wasm_header(bytes: &[u8]) -> Result<(), RuntimeError> {
        if bytes.len() < 8 {
            return Err(RuntimeError::module_load("Invalid Wasm: file too small"));
        }

        // Check magic number: \0asm
        if &bytes[0..4] != b"\0asm" {
            return Err(RuntimeError::module_load("Invalid Wasm: bad magic number"));
        }

        Ok(())
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("content_hash", &self.content_hash)
            .field("origin", &self.origin)
            .field("exports", &self.exports)
            .finish_non_exhaustive()
    }
}

/// Compute a hash of the given bytes.
fn compute_hash(bytes: &[u8]) -> String {
    let mut hasher = DefaultHasher::new();
    bytes.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use wasm_embed_common::RuntimeConfig;

    // Minimal valid Wasm module (empty module)
    const MINIMAL_WASM: &[u8] = &[
        0x00, 0x61, 0x73, 0x6d, // magic: \0asm
        0x01, 0x00, 0x00, 0x00, // version: 1
    ];

    fn engine() -> Engine {
        Engine::new(&RuntimeConfig::default()).unwrap()
    }

    #[test]
    fn test_validate_wasm_header_valid() {
        assert!(Module::validate_wasm_header(MINIMAL_WASM).is_ok());
    }

    #[test]
    fn test_validate_wasm_header_too_small() {
        assert!(Module::validate_wasm_header(&[0x00, 0x61]).is_err());
    }

    #[test]
    fn test_validate_wasm_header_bad_magic() {
        let bad_wasm = &[0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00];
        assert!(Module::validate_wasm_header(bad_wasm).is_err());
    }

    #[test]
    fn test_compute_hash() {
        let hash1 = compute_hash(b"hello");
        let hash2 = compute_hash(b"hello");
        let hash3 = compute_hash(b"world");

        assert_eq!(hash1, hash2);
        assert_ne!(hash1, hash3);
        assert_eq!(hash1.len(), 16); // 64-bit hex
    }

    #[test]
    fn test_empty_module() {
        let engine = engine();
        let module = Module::from_bytes(&engine, MINIMAL_WASM).unwrap();

        assert_eq!(module.num_exports(), 0);
        assert_eq!(module.num_imports(), 0);
        assert_eq!(module.origin(), ModuleOrigin::Compiled);
        assert!(module.export_index("sum").is_none());
        assert!(matches!(
            module.export(0),
            Err(RuntimeError::ExportIndexOutOfRange { index: 0, len: 0 })
        ));
    }

    #[test]
    fn test_export_descriptors_in_order() {
        let engine = engine();
        let module = Module::from_wat(
            &engine,
            r#"
            (module
                (memory (export "memory") 1)
                (global (export "counter") i32 (i32.const 7))
                (table (export "table") 1 funcref)
                (func (export "noop"))
            )
            "#,
        )
        .unwrap();

        let kinds: Vec<_> = module.exports().iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                ExternKind::Memory,
                ExternKind::Global,
                ExternKind::Table,
                ExternKind::Function
            ]
        );
        assert_eq!(module.export(3).unwrap().name, "noop");
        assert!(module.export(3).unwrap().is_function());
        assert_eq!(module.export_index("counter"), Some(1));
    }

    #[test]
    fn test_cache_shares_compiled_code() {
        let engine = engine();
        let a = Module::from_bytes(&engine, MINIMAL_WASM).unwrap();
        let b = Module::from_bytes(&engine, MINIMAL_WASM).unwrap();

        assert_eq!(a.content_hash(), b.content_hash());
        assert_eq!(engine.cached_modules(), 1);
    }

    #[test]
    fn test_destroy_evicts_cached_code() {
        let engine = engine();
        let a = Module::from_bytes(&engine, MINIMAL_WASM).unwrap();
        let b = Module::from_bytes(&engine, MINIMAL_WASM).unwrap();

        a.destroy().unwrap();
        assert_eq!(engine.cached_modules(), 1);

        b.destroy().unwrap();
        assert_eq!(engine.cached_modules(), 0);
    }

    #[test]
    fn test_drop_evicts_cached_code() {
        let engine = engine();
        let module = Module::from_bytes(&engine, MINIMAL_WASM).unwrap();
        assert_eq!(engine.cached_modules(), 1);

        drop(module);
        assert_eq!(engine.cached_modules(), 0);

        let reloaded = Module::from_bytes(&engine, MINIMAL_WASM).unwrap();
        assert_eq!(reloaded.num_exports(), 0);
        assert_eq!(engine.cached_modules(), 1);
    }

    #[test]
    fn test_serialize_round_trip() {
        let engine = engine();
        let module = Module::from_wat(
            &engine,
            r#"(module (func (export "f") (result i32) (i32.const 1)))"#,
        )
        .unwrap();

        let artifact = module.serialize().unwrap();
        let reloaded = Module::from_precompiled(&engine, &artifact).unwrap();
        assert_eq!(reloaded.exports(), module.exports());
    }

    #[test]
    fn test_cache_disabled() {
        let mut config = RuntimeConfig::default();
        config.engine.cache_modules = false;
        let engine = Engine::new(&config).unwrap();

        Module::from_bytes(&engine, MINIMAL_WASM).unwrap();
        assert_eq!(engine.cached_modules(), 0);
    }

    #[test]
    fn test_precompiled_tag_checked() {
        let engine = engine();
        let artifact = engine.precompile(MINIMAL_WASM).unwrap();

        assert!(matches!(
            Module::from_bytes(&engine, &artifact),
            Err(RuntimeError::ModuleLoad { .. })
        ));
        assert!(matches!(
            Module::from_precompiled(&engine, MINIMAL_WASM),
            Err(RuntimeError::ModuleLoad { .. })
        ));

        let module = Module::from_precompiled(&engine, &artifact).unwrap();
        assert_eq!(module.origin(), ModuleOrigin::Precompiled);
    }

    #[test]
    fn test_serialize_after_engine_destroy() {
        let engine = engine();
        let module = Module::from_bytes(&engine, MINIMAL_WASM).unwrap();

        assert!(engine.destroy().is_err());
        assert!(matches!(
            module.serialize(),
            Err(RuntimeError::UseAfterDestroy { .. })
        ));
    }

    #[test]
    fn test_module_debug() {
        let engine = engine();
        let module = Module::from_bytes(&engine, MINIMAL_WASM).unwrap();

        let debug_str = format!("{module:?}");
        assert!(debug_str.contains("Module"));
        assert!(debug_str.contains("content_hash"));
    }
}
