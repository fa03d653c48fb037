//! tosca - a template interpreter for JVM bytecode on RV64.
//!
//! The interpreter is generated once per configuration as RISC-V code;
//! the `sim` module runs it on a simulated hart against class metadata
//! laid out in simulated memory.

pub mod asm;
pub mod classfile;
pub mod config;
pub mod interp;
pub mod runtime;
pub mod sim;

// Re-export commonly used types
pub use classfile::{Program, ProgramError};
pub use config::{ConfigError, InterpreterConfig};
pub use interp::{Bytecode, Interpreter, TosState};
pub use sim::{Machine, MachineError, Outcome, Value};
