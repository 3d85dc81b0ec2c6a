//! Common errors and configuration for wasm-embed.
//!
//! This crate provides shared functionality used across the wasm-embed workspace:
//! - Error types using `thiserror` for the embedding layer's failure taxonomy
//! - Configuration structures for the engine and the WASI bootstrap
//! - TOML configuration file loading

pub mod config;
pub mod config_file;
pub mod error;

pub use config::{EngineConfig, OptLevel, RuntimeConfig, WasiConfig};
pub use config_file::{ConfigFile, ConfigFileError, LogConfig, LogFormat};
pub use error::{RuntimeError, WasiError};
