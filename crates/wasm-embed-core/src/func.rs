//! Callable function handles and the calling convention.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, instrument, warn};
use wasmtime::{Trap, Val};

use wasm_embed_common::RuntimeError;

use crate::Store;
use crate::registry::{Registry, ResourceId};
use crate::value::{self, Value, ValueType};

/// Parameter and result types of a function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |types: &[ValueType]| {
            types
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(f, "({}) -> ({})", join(&self.params), join(&self.results))
    }
}

/// A callable function bound to the store its instance lives in.
///
/// Sequential calls on the same store are supported; the handle is invalid
/// once the instance, store, compartment or engine behind it is released.
#[derive(Clone)]
pub struct Function {
    name: String,
    inner: wasmtime::Func,
    instance: ResourceId,
    store: ResourceId,
    registry: Arc<Registry>,
}

impl Function {
    pub(crate) fn new(
        name: String,
        inner: wasmtime::Func,
        instance: ResourceId,
        store: ResourceId,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            name,
            inner,
            instance,
            store,
            registry,
        }
    }

    /// Export name the function was resolved from.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check that the function is still live and belongs to `store`.
    fn check_store(&self, store: &Store) -> Result<(), RuntimeError> {
        self.registry.ensure_live(self.instance)?;

        if store.resource_id() != self.store || !Arc::ptr_eq(store.registry(), &self.registry) {
            return Err(RuntimeError::StoreMismatch {
                function: self.name.clone(),
            });
        }
        Ok(())
    }

    /// The declared signature.
    ///
    /// # Errors
    ///
    /// Returns `SignatureMismatch` if a parameter or result type cannot cross
    /// the boundary, plus the store checks of [`Function::call`].
    pub fn signature(&self, store: &Store) -> Result<Signature, RuntimeError> {
        self.check_store(store)?;

        let ty = self.inner.ty(store.inner());
        let params = ty
            .params()
            .map(|p| ValueType::try_from(&p))
            .collect::<Result<_, _>>()?;
        let results = ty
            .results()
            .map(|r| ValueType::try_from(&r))
            .collect::<Result<_, _>>()?;

        Ok(Signature { params, results })
    }

    /// Call the function with `args`.
    ///
    /// # Errors
    ///
    /// Returns:
    /// - `SignatureMismatch` if the argument count or types differ from the signature
    /// - `Trap` if execution traps
    /// - `StoreMismatch` if `store` is not the function's store
    /// - `UseAfterDestroy` if the instance or an owner was released
    #[instrument(level = "debug", skip(self, store, args), fields(function = %self.name))]
    pub fn call(&self, store: &mut Store, args: &[Value]) -> Result<Vec<Value>, RuntimeError> {
        let signature = self.signature(store)?;

        if args.len() != signature.params.len() {
            return Err(RuntimeError::signature_mismatch(format!(
                "'{}' {signature} expects {} argument(s), got {}",
                self.name,
                signature.params.len(),
                args.len()
            )));
        }
        for (i, (arg, expected)) in args.iter().zip(&signature.params).enumerate() {
            if arg.ty() != *expected {
                return Err(RuntimeError::signature_mismatch(format!(
                    "'{}' argument {i} is {}, expected {expected}",
                    self.name,
                    arg.ty()
                )));
            }
        }

        let params = value::encode(args);
        let mut results = vec![Val::I32(0); signature.results.len()];

        let start = Instant::now();
        let outcome = self.inner.call(store.inner_mut(), &params, &mut results);
        let duration = start.elapsed();
        store.record_call(duration, outcome.is_err());

        if let Err(e) = outcome {
            let err = trap_error(&e);
            warn!(duration_us = duration.as_micros(), error = %err, "Call trapped");
            return Err(err);
        }

        debug!(duration_us = duration.as_micros(), "Call returned");
        value::decode(&results)
    }

    /// Call a function taking `i32` arguments and returning a single `i32`.
    ///
    /// # Errors
    ///
    /// As [`Function::call`], plus `SignatureMismatch` unless the function
    /// returns exactly one `i32`.
    pub fn call_i32(&self, store: &mut Store, args: &[i32]) -> Result<i32, RuntimeError> {
        let args: Vec<Value> = args.iter().copied().map(Value::from).collect();

        match self.call(store, &args)?.as_slice() {
            [Value::I32(result)] => Ok(*result),
            other => Err(RuntimeError::signature_mismatch(format!(
                "'{}' returned {} value(s), expected a single i32",
                self.name,
                other.len()
            ))),
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Convert a runtime error raised during a call into a `Trap` error.
pub(crate) fn trap_error(error: &wasmtime::Error) -> RuntimeError {
    RuntimeError::Trap {
        message: error.to_string(),
        code: error.downcast_ref::<Trap>().map(|trap| format!("{trap:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_display() {
        let signature = Signature {
            params: vec![ValueType::I32, ValueType::I64],
            results: vec![ValueType::I32],
        };
        assert_eq!(signature.to_string(), "(i32, i64) -> (i32)");

        let empty = Signature {
            params: vec![],
            results: vec![],
        };
        assert_eq!(empty.to_string(), "() -> ()");
    }

    #[test]
    fn test_trap_error_carries_code() {
        let err = trap_error(&wasmtime::Error::new(Trap::UnreachableCodeReached));
        match err {
            RuntimeError::Trap { code, .. } => {
                assert_eq!(code.as_deref(), Some("UnreachableCodeReached"));
            }
            other => panic!("expected trap, got {other:?}"),
        }
    }
}
