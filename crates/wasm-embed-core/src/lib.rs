//! Core Wasmtime embedding for wasm-embed.
//!
//! This crate provides a small, strongly-typed surface over Wasmtime:
//! - [`Engine`]: Configured Wasmtime engine, module cache and resource registry
//! - [`Compartment`]: Isolation scope grouping stores
//! - [`Store`]: Per-execution state holding instances and call metrics
//! - [`Module`]: Compiled or precompiled module with indexed export descriptors
//! - [`Instance`]: Externs realized in export order
//! - [`Function`]: Callable handle with typed [`Value`] arguments
//! - [`Runtime`]: Engine with a default compartment and store
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │                        Engine                           │
//! │  (Owns the registry, shared by everything below)        │
//! │  - Compilation settings                                 │
//! │  - Module cache                                         │
//! └─────────────────────────────────────────────────────────┘
//!              │                              │
//!              ▼                              ▼
//! ┌──────────────────────────┐  ┌──────────────────────────┐
//! │       Compartment        │  │          Module          │
//! │  (Isolation scope)       │  │  (Compiled code, shared) │
//! └──────────────────────────┘  │  - Export descriptors    │
//!              │                └──────────────────────────┘
//!              ▼                              │
//! ┌─────────────────────────────────────────────────────────┐
//! │                  Store + Instance                       │
//! │  (Isolated execution state)                             │
//! │  - Externs in export order                              │
//! │  - Optional WASI context                                │
//! │  - Call metrics                                         │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Every handle is registered with its owner. Releasing an owner invalidates
//! everything created through it: later use fails with `UseAfterDestroy`
//! instead of touching freed state.
//!
//! # Example
//!
//! ```no_run
//! use wasm_embed_common::RuntimeConfig;
//! use wasm_embed_core::{Runtime, Value};
//!
//! # fn main() -> Result<(), wasm_embed_common::RuntimeError> {
//! let mut runtime = Runtime::new(&RuntimeConfig::default())?;
//! let module = runtime.engine().load_module_file("sum.wasm", false)?;
//! let instance = runtime.new_instance(&module)?;
//! let sum = runtime.resolve_function(&module, &instance, "sum")?;
//! let result = runtime.call(&sum, &[Value::I32(2), Value::I32(2)])?;
//! assert_eq!(result, vec![Value::I32(4)]);
//! # Ok(())
//! # }
//! ```

mod cache;
pub mod compartment;
pub mod engine;
pub mod externs;
pub mod func;
pub mod instance;
pub mod module;
pub mod registry;
pub mod resolver;
pub mod runtime;
pub mod store;
pub mod value;
pub mod wasi;

pub use compartment::Compartment;
pub use engine::Engine;
pub use externs::{Extern, ExternKind};
pub use func::{Function, Signature};
pub use instance::Instance;
pub use module::{ExportDescriptor, Module, ModuleOrigin};
pub use registry::{Registry, ResourceId, ResourceKind};
pub use resolver::{ExportResolver, resolve_function};
pub use runtime::Runtime;
pub use store::{CallMetrics, Store, StoreState};
pub use value::{Value, ValueType};
