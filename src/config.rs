//! Runtime configuration types.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::RpnError;

/// Default bound on the value stack, shared by both engines.
pub const DEFAULT_STACK_LIMIT: usize = 4096;

/// Default size of the JIT code region in bytes.
pub const DEFAULT_CODE_CAPACITY: usize = 4096;

/// JIT compilation mode
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JitMode {
    /// JIT disabled, interpreter only
    Off,
    /// Always compile to native code
    On,
    /// Automatic: JIT enabled if supported on this platform
    #[default]
    Auto,
}

impl JitMode {
    /// Whether this mode selects the JIT on the current host.
    pub fn use_jit(self) -> bool {
        match self {
            JitMode::Off => false,
            JitMode::On => true,
            JitMode::Auto => cfg!(all(feature = "jit", target_arch = "x86_64", unix)),
        }
    }
}

/// Runtime configuration for evaluation and compilation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub jit_mode: JitMode,
    /// Maximum number of live values on the evaluation stack
    pub stack_limit: usize,
    /// Size of the code region handed to the emitter
    pub code_capacity: usize,
    pub trace_jit: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            jit_mode: JitMode::Auto,
            stack_limit: DEFAULT_STACK_LIMIT,
            code_capacity: DEFAULT_CODE_CAPACITY,
            trace_jit: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a TOML file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, RpnError> {
        let content = fs::read_to_string(path).map_err(|e| {
            RpnError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, RpnError> {
        toml::from_str(content).map_err(|e| RpnError::Config(format!("failed to parse: {}", e)))
    }
}
