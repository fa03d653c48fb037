//! Execution harness: an RV64 hart, word-atomic simulated memory and the
//! host runtime the generated interpreter calls into.

pub mod cpu;
pub mod machine;
pub mod memory;
mod runtime;
pub mod universe;

pub use cpu::{Event, Hart, SimError};
pub use machine::{BreakpointHit, Machine, MachineError, Outcome, TraceEvent, Value};
pub use memory::{Memory, MemoryError};
pub use universe::Universe;
