//! Runtime structures shared by generated code and the host.

pub mod compressed_oops;
pub mod entries;
pub mod frame;
pub mod layout;
pub mod order_access;

pub use compressed_oops::{CompressedOops, NarrowOopMode};
pub use entries::RuntimeEntry;
pub use frame::{CodeBlobLookup, DeoptRegistry, Frame, NoCompiledCode, StackMemory};
pub use order_access::{Barrier, OrderAccess};
