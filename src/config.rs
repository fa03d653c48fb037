//! Interpreter configuration.
//!
//! Every switch here is consumed once, while the template table is
//! generated; nothing is consulted per bytecode at run time.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::asm::{BarrierSetKind, MacroConfig};
use crate::runtime::{CompressedOops, NarrowOopMode};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("binary_switch_threshold must be at least 1")]
    SwitchThreshold,
}

/// Code generation switches, loaded from TOML. Absent keys keep their
/// defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterpreterConfig {
    /// Quicken bytecodes in place after their first execution.
    pub rewrite_bytecodes: bool,
    /// Allocate from the thread-local buffer in `new`.
    pub use_tlab: bool,
    /// The TLAB is handed out pre-zeroed, so `new` skips clearing fields.
    pub zero_tlab: bool,
    pub trap_based_null_checks: bool,
    pub implicit_null_checks: bool,
    /// `None` stores full-width references in the heap.
    pub compressed_oops: Option<NarrowOopMode>,
    pub barrier_set: BarrierSetKind,
    /// Emit consistency checks (TOS-state tags of branch tables).
    pub verify_interpreter: bool,
    /// Call the runtime before every bytecode.
    pub trace_bytecodes: bool,
    /// Log every generated template at debug level.
    pub trace_templates: bool,
    /// `lookupswitch` with at least this many pairs becomes a binary search.
    pub binary_switch_threshold: u32,
    /// Instructions a single invocation may retire before it is aborted.
    pub instruction_limit: u64,
}

impl Default for InterpreterConfig {
    fn default() -> Self {
        Self {
            rewrite_bytecodes: true,
            use_tlab: true,
            zero_tlab: false,
            trap_based_null_checks: false,
            implicit_null_checks: true,
            compressed_oops: None,
            barrier_set: BarrierSetKind::CardTable,
            verify_interpreter: cfg!(debug_assertions),
            trace_bytecodes: false,
            trace_templates: false,
            binary_switch_threshold: 5,
            instruction_limit: 50_000_000,
        }
    }
}

impl InterpreterConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: InterpreterConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.binary_switch_threshold == 0 {
            return Err(ConfigError::SwitchThreshold);
        }
        Ok(())
    }

    /// Narrow oop parameters and the heap start they imply.
    pub fn heap_layout(&self) -> (Option<CompressedOops>, u64) {
        match self.compressed_oops {
            Some(mode) => {
                let (oops, heap) = CompressedOops::for_mode(mode);
                (Some(oops), heap)
            }
            None => (None, CompressedOops::for_mode(NarrowOopMode::Unscaled).1),
        }
    }

    pub fn macro_config(&self) -> MacroConfig {
        MacroConfig {
            implicit_null_checks: self.implicit_null_checks,
            trap_based_null_checks: self.trap_based_null_checks,
            compressed_oops: self.heap_layout().0,
        }
    }
}
