//! Kind-tagged handles over runtime externs.

use std::fmt;
use std::sync::Arc;

use wasmtime::ExternType;

use wasm_embed_common::RuntimeError;

use crate::Function;
use crate::registry::{Registry, ResourceId};

/// The kind of an export or extern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternKind {
    Function,
    Global,
    Table,
    Memory,
}

impl From<&ExternType> for ExternKind {
    fn from(ty: &ExternType) -> Self {
        match ty {
            ExternType::Func(_) => ExternKind::Function,
            ExternType::Global(_) => ExternKind::Global,
            ExternType::Table(_) => ExternKind::Table,
            ExternType::Memory(_) => ExternKind::Memory,
        }
    }
}

impl fmt::Display for ExternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExternKind::Function => write!(f, "function"),
            ExternKind::Global => write!(f, "global"),
            ExternKind::Table => write!(f, "table"),
            ExternKind::Memory => write!(f, "memory"),
        }
    }
}

/// A runtime extern realized by an [`Instance`](crate::Instance).
///
/// The handle is bound to its instance and store; it can be narrowed to a
/// [`Function`] when its kind is [`ExternKind::Function`].
#[derive(Clone)]
pub struct Extern {
    name: String,
    kind: ExternKind,
    inner: wasmtime::Extern,
    instance: ResourceId,
    store: ResourceId,
    registry: Arc<Registry>,
}

impl Extern {
    pub(crate) fn new(
        name: String,
        kind: ExternKind,
        inner: wasmtime::Extern,
        instance: ResourceId,
        store: ResourceId,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            name,
            kind,
            inner,
            instance,
            store,
            registry,
        }
    }

    /// Export name this extern was realized for.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Kind of the extern.
    pub fn kind(&self) -> ExternKind {
        self.kind
    }

    /// Check if this extern is a function.
    pub fn is_function(&self) -> bool {
        self.kind == ExternKind::Function
    }

    /// Narrow to a callable function.
    ///
    /// # Errors
    ///
    /// Returns `ExportKindMismatch` if the extern is not a function, or
    /// `UseAfterDestroy` if its instance (or an owner) was released.
    pub fn into_function(self) -> Result<Function, RuntimeError> {
        self.registry.ensure_live(self.instance)?;

        let mismatch = |name: String, actual: ExternKind| RuntimeError::ExportKindMismatch {
            name,
            expected: ExternKind::Function.to_string(),
            actual: actual.to_string(),
        };

        if self.kind != ExternKind::Function {
            return Err(mismatch(self.name, self.kind));
        }

        match self.inner.into_func() {
            Some(func) => Ok(Function::new(
                self.name,
                func,
                self.instance,
                self.store,
                self.registry,
            )),
            None => Err(mismatch(self.name, self.kind)),
        }
    }
}

impl fmt::Debug for Extern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extern")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
