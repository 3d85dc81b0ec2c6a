//! Conversion between host values and the runtime's tagged value slots.
//!
//! Arguments and results cross the call boundary as [`wasmtime::Val`]s. A
//! [`Value`] carries its type tag alongside the payload, so encoding and
//! decoding round-trip exactly for every supported width.

use std::fmt;

use wasmtime::{Val, ValType};

use wasm_embed_common::RuntimeError;

/// A WebAssembly value type supported at the call boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::I32 => write!(f, "i32"),
            ValueType::I64 => write!(f, "i64"),
            ValueType::F32 => write!(f, "f32"),
            ValueType::F64 => write!(f, "f64"),
        }
    }
}

impl TryFrom<&ValType> for ValueType {
    type Error = RuntimeError;

    fn try_from(ty: &ValType) -> Result<Self, Self::Error> {
        match ty {
            ValType::I32 => Ok(ValueType::I32),
            ValType::I64 => Ok(ValueType::I64),
            ValType::F32 => Ok(ValueType::F32),
            ValType::F64 => Ok(ValueType::F64),
            other => Err(RuntimeError::signature_mismatch(format!(
                "unsupported value type {other}"
            ))),
        }
    }
}

/// A typed value passed to or returned from a WebAssembly function.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
}

impl Value {
    /// The type tag of this value.
    pub fn ty(&self) -> ValueType {
        match self {
            Value::I32(_) => ValueType::I32,
            Value::I64(_) => ValueType::I64,
            Value::F32(_) => ValueType::F32,
            Value::F64(_) => ValueType::F64,
        }
    }

    /// Returns the payload if this is an `i32`.
    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the payload if this is an `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    /// Parse `text` as a value of type `ty`.
    ///
    /// # Errors
    ///
    /// Returns `SignatureMismatch` if `text` is not a valid literal of `ty`.
    pub fn parse(ty: ValueType, text: &str) -> Result<Self, RuntimeError> {
        let invalid = |e: &dyn fmt::Display| {
            RuntimeError::signature_mismatch(format!("cannot parse '{text}' as {ty}: {e}"))
        };

        match ty {
            ValueType::I32 => text.parse().map(Value::I32).map_err(|e| invalid(&e)),
            ValueType::I64 => text.parse().map(Value::I64).map_err(|e| invalid(&e)),
            ValueType::F32 => text.parse().map(Value::F32).map_err(|e| invalid(&e)),
            ValueType::F64 => text.parse().map(Value::F64).map_err(|e| invalid(&e)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::I32(v) => write!(f, "{v}"),
            Value::I64(v) => write!(f, "{v}"),
            Value::F32(v) => write!(f, "{v}"),
            Value::F64(v) => write!(f, "{v}"),
        }
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::I32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::I64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Value::F32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::F64(v)
    }
}

impl From<Value> for Val {
    fn from(value: Value) -> Self {
        match value {
            Value::I32(v) => Val::I32(v),
            Value::I64(v) => Val::I64(v),
            Value::F32(v) => Val::F32(v.to_bits()),
            Value::F64(v) => Val::F64(v.to_bits()),
        }
    }
}

impl TryFrom<&Val> for Value {
    type Error = RuntimeError;

    fn try_from(val: &Val) -> Result<Self, Self::Error> {
        match val {
            Val::I32(v) => Ok(Value::I32(*v)),
            Val::I64(v) => Ok(Value::I64(*v)),
            Val::F32(bits) => Ok(Value::F32(f32::from_bits(*bits))),
            Val::F64(bits) => Ok(Value::F64(f64::from_bits(*bits))),
            _ => Err(RuntimeError::signature_mismatch(
                "unsupported result value (only i32, i64, f32 and f64 cross the boundary)",
            )),
        }
    }
}

/// Encode host values into runtime slots.
pub(crate) fn encode(values: &[Value]) -> Vec<Val> {
    values.iter().copied().map(Val::from).collect()
}

/// Decode runtime slots into host values.
pub(crate) fn decode(vals: &[Val]) -> Result<Vec<Value>, RuntimeError> {
    vals.iter().map(Value::try_from).collect()
}
