//! Configuration structures for wasm-embed.
//!
//! This module defines configuration options for the embedding layer:
//! - [`RuntimeConfig`]: Top-level configuration containing all settings
//! - [`EngineConfig`]: Engine settings (WASI capability, compilation, caching)
//! - [`WasiConfig`]: Environment handed to guests run through the WASI bootstrap

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level runtime configuration.
///
/// It can be loaded from a TOML file (see [`crate::ConfigFile`]) or built in code.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RuntimeConfig {
    /// Engine configuration.
    #[serde(default)]
    pub engine: EngineConfig,

    /// WASI guest environment.
    #[serde(default)]
    pub wasi: WasiConfig,
}

impl RuntimeConfig {
    /// Configuration with the WASI bootstrap enabled and everything else default.
    pub fn with_wasi() -> Self {
        Self {
            engine: EngineConfig {
                wasi_enabled: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Enable the WASI bootstrap entrypoint.
    ///
    /// When disabled, running a module through WASI fails fast with a
    /// configuration error.
    #[serde(default)]
    pub wasi_enabled: bool,

    /// Cranelift optimisation level.
    #[serde(default)]
    pub opt_level: OptLevel,

    /// Maximum WebAssembly stack size in KiB.
    #[serde(default = "defaults::max_wasm_stack_kb")]
    pub max_wasm_stack_kb: u32,

    /// Reuse compiled code for byte-identical modules loaded through the same engine.
    #[serde(default = "defaults::cache_modules")]
    pub cache_modules: bool,

    /// Enable the pooling instance allocator.
    #[serde(default)]
    pub pooling_allocator: bool,

    /// Maximum concurrent instances in the pool.
    ///
    /// Only effective when `pooling_allocator` is enabled.
    #[serde(default = "defaults::max_instances")]
    pub max_instances: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            wasi_enabled: false,
            opt_level: OptLevel::default(),
            max_wasm_stack_kb: defaults::max_wasm_stack_kb(),
            cache_modules: defaults::cache_modules(),
            pooling_allocator: false,
            max_instances: defaults::max_instances(),
        }
    }
}

impl EngineConfig {
    /// Get the maximum stack size in bytes.
    pub fn max_wasm_stack_bytes(&self) -> usize {
        (self.max_wasm_stack_kb as usize) * 1024
    }
}

/// Cranelift optimisation level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptLevel {
    /// No optimisation.
    None,
    /// Optimise for speed.
    #[default]
    Speed,
    /// Optimise for speed and code size.
    SpeedAndSize,
}

/// Environment handed to guests started through the WASI bootstrap.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WasiConfig {
    /// Inherit the host's stdin, stdout and stderr.
    #[serde(default = "defaults::inherit_stdio")]
    pub inherit_stdio: bool,

    /// Program arguments, `argv[0]` included.
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for WasiConfig {
    fn default() -> Self {
        Self {
            inherit_stdio: defaults::inherit_stdio(),
            args: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

/// Default value functions for serde.
mod defaults {
    pub const fn max_wasm_stack_kb() -> u32 {
        512
    }

    pub const fn cache_modules() -> bool {
        true
    }

    pub const fn max_instances() -> u32 {
        1000
    }

    pub const fn inherit_stdio() -> bool {
        true
    }
}
