//! The template interpreter: bytecode catalogue, templates, generator and
//! link-time rewriting.

pub mod bytecodes;
pub mod cp_cache;
pub mod generator;
pub mod interp_masm;
pub mod patching;
pub mod rewriter;
pub mod templates;

pub use bytecodes::{Bytecode, TosState};
pub use generator::{EntryPoints, GeneratedTemplate, Interpreter, generate};
pub use rewriter::{ConstantPoolView, RewriteError, RewriteResult, Rewriter};
