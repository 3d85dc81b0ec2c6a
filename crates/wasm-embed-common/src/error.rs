//! Error types for wasm-embed.
//!
//! This module defines the error taxonomy of the embedding layer using `thiserror`:
//! - [`RuntimeError`]: Top-level errors for loading, linking, resolving and calling
//! - [`WasiError`]: Errors from the WASI bootstrap

use std::io;

use thiserror::Error;

/// Top-level runtime errors.
///
/// These errors cover the whole lifecycle of an embedded module, from loading
/// bytes to calling an exported function, plus misuse of the resource graph.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The byte buffer could not be turned into a module.
    #[error("Module load failed: {reason}")]
    ModuleLoad {
        /// Description of the load failure.
        reason: String,
    },

    /// The module declares imports that cannot be satisfied.
    #[error("Link failed: {reason}")]
    Link {
        /// Description of the link failure.
        reason: String,
    },

    /// The runtime rejected instantiation.
    #[error("Instantiation failed: {reason}")]
    Instantiation {
        /// Description of the instantiation failure.
        reason: String,
    },

    /// No export with the requested name exists.
    #[error("Export not found: {name}")]
    ExportNotFound {
        /// The requested export name.
        name: String,
    },

    /// The export exists but is not of the requested kind.
    #[error("Export '{name}' is a {actual}, expected a {expected}")]
    ExportKindMismatch {
        /// The export name.
        name: String,
        /// The kind the caller asked for.
        expected: String,
        /// The kind the module declares.
        actual: String,
    },

    /// An export index outside `0..len` was requested.
    #[error("Export index {index} out of range (module has {len} exports)")]
    ExportIndexOutOfRange {
        /// The requested index.
        index: usize,
        /// Number of exports.
        len: usize,
    },

    /// Arguments or results do not match the function signature.
    #[error("Signature mismatch: {reason}")]
    SignatureMismatch {
        /// Description of the mismatch.
        reason: String,
    },

    /// The operation needs a capability that was not enabled on the engine.
    #[error("Configuration error: {reason}")]
    Configuration {
        /// Description of the configuration error.
        reason: String,
    },

    /// The resource, or one of its owners, has already been released.
    #[error("Use after destroy: {resource}")]
    UseAfterDestroy {
        /// Description of the released resource.
        resource: String,
    },

    /// A resource was released while dependents were still alive.
    ///
    /// The resource is gone; the dependents are poisoned.
    #[error("{resource} destroyed with {dependents} live dependent(s)")]
    ResourceInUse {
        /// Description of the released resource.
        resource: String,
        /// Number of dependents that were still alive.
        dependents: usize,
    },

    /// A function was called with a store it does not belong to.
    #[error("Function '{function}' called with a foreign store")]
    StoreMismatch {
        /// The function name.
        function: String,
    },

    /// A WebAssembly trap occurred during execution.
    #[error("Wasm trap: {message}")]
    Trap {
        /// Description of the trap.
        message: String,
        /// Trap code if available.
        code: Option<String>,
    },

    /// WASI operation failed.
    #[error("WASI error: {0}")]
    Wasi(#[from] WasiError),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// WASI-related errors.
#[derive(Error, Debug)]
pub enum WasiError {
    /// Failed to set up the WASI imports.
    #[error("WASI initialization failed: {reason}")]
    InitializationFailed {
        /// Description of the initialization failure.
        reason: String,
    },

    /// The guest called `proc_exit` with a non-zero code.
    #[error("WASI program exited with code {code}")]
    Exit {
        /// The exit code.
        code: i32,
    },
}

impl RuntimeError {
    /// Create a new `ModuleLoad` error.
    pub fn module_load(reason: impl Into<String>) -> Self {
        Self::ModuleLoad {
            reason: reason.into(),
        }
    }

    /// Create a new `Link` error.
    pub fn link(reason: impl Into<String>) -> Self {
        Self::Link {
            reason: reason.into(),
        }
    }

    /// Create a new `Instantiation` error.
    pub fn instantiation(reason: impl Into<String>) -> Self {
        Self::Instantiation {
            reason: reason.into(),
        }
    }

    /// Create a new `ExportNotFound` error.
    pub fn export_not_found(name: impl Into<String>) -> Self {
        Self::ExportNotFound { name: name.into() }
    }

    /// Create a new `SignatureMismatch` error.
    pub fn signature_mismatch(reason: impl Into<String>) -> Self {
        Self::SignatureMismatch {
            reason: reason.into(),
        }
    }

    /// Create a new `Configuration` error.
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a new `UseAfterDestroy` error.
    pub fn use_after_destroy(resource: impl Into<String>) -> Self {
        Self::UseAfterDestroy {
            resource: resource.into(),
        }
    }

    /// Returns `true` if this error indicates a missing export.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ExportNotFound { .. })
    }

    /// Returns `true` if this error comes from misuse of the resource graph.
    pub fn is_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::UseAfterDestroy { .. } | Self::ResourceInUse { .. } | Self::StoreMismatch { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RuntimeError::export_not_found("sum");
        assert_eq!(err.to_string(), "Export not found: sum");

        let err = RuntimeError::ExportKindMismatch {
            name: "counter".into(),
            expected: "function".into(),
            actual: "global".into(),
        };
        assert_eq!(
            err.to_string(),
            "Export 'counter' is a global, expected a function"
        );

        let err = RuntimeError::ResourceInUse {
            resource: "store 'main'".into(),
            dependents: 2,
        };
        assert_eq!(
            err.to_string(),
            "store 'main' destroyed with 2 live dependent(s)"
        );
    }

    #[test]
    fn test_error_from_wasi() {
        let runtime_err: RuntimeError = WasiError::Exit { code: 3 }.into();

        assert!(matches!(
            runtime_err,
            RuntimeError::Wasi(WasiError::Exit { code: 3 })
        ));
        assert_eq!(
            runtime_err.to_string(),
            "WASI error: WASI program exited with code 3"
        );
    }

    #[test]
    fn test_is_lifecycle() {
        assert!(RuntimeError::use_after_destroy("engine").is_lifecycle());
        assert!(
            RuntimeError::StoreMismatch {
                function: "sum".into()
            }
            .is_lifecycle()
        );
        assert!(
            !RuntimeError::Trap {
                message: "unreachable".into(),
                code: None,
            }
            .is_lifecycle()
        );
    }

    #[test]
    fn test_is_not_found() {
        assert!(RuntimeError::export_not_found("x").is_not_found());
        assert!(!RuntimeError::link("env.f").is_not_found());
    }
}
