//! RISC-V code emission: encoder, decoder and macro assembler.

pub mod barrier;
pub mod codebuf;
pub mod disasm;
pub mod macro_asm;
pub mod riscv;

pub use barrier::{AccessReg, BarrierSetAssembler, BarrierSetKind, Decorators};
pub use codebuf::{AsmError, CodeBuffer, Label};
pub use macro_asm::{FarBranchKind, MacroAssembler, MacroConfig};
pub use riscv::{Assembler, Cond, FReg, Reg};
