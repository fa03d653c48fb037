//! Addresses of host-implemented runtime entry points.
//!
//! Generated code calls these like any other function (`jalr ra`). Each
//! entry owns a 16-byte slot in an unmapped range, so an entry is identified
//! by the address the hart jumps to.

use super::layout::{RUNTIME_BASE, RUNTIME_ENTRY_SIZE, RUNTIME_SIZE};

macro_rules! runtime_entries {
    ($($(#[$doc:meta])* $name:ident,)*) => {
        /// A host entry point reachable from generated code.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum RuntimeEntry {
            $($(#[$doc])* $name,)*
        }

        impl RuntimeEntry {
            pub const ALL: &'static [RuntimeEntry] = &[$(RuntimeEntry::$name,)*];

            pub fn name(self) -> &'static str {
                match self {
                    $(RuntimeEntry::$name => stringify!($name),)*
                }
            }
        }
    };
}

runtime_entries! {
    /// Return address of a call made by the host into generated code.
    HostReturn,
    /// Resolve the member reference at bcp for bytecode `a1`.
    ResolveFromCache,
    /// `ldc` of a constant the template cannot load itself; `a1` = wide.
    /// The value is pushed by the template from `vm_result`.
    Ldc,
    /// Resolve the string constant of a `fast_aldc`; result in `vm_result`.
    ResolveLdc,
    /// `a1` = constant pool, `a2` = class index.
    New,
    /// `a1` = element type, `a2` = length.
    NewArray,
    /// `a1` = constant pool, `a2` = class index, `a3` = length.
    ANewArray,
    /// `a1` = address of the first dimension on the expression stack.
    MultiANewArray,
    /// `a1` = constant pool, `a2` = class index of a `checkcast` or
    /// `instanceof`; klass in `vm_result_2`.
    QuickenIoCc,
    /// `a1` = monitor entry with its object already stored.
    MonitorEnter,
    /// `a1` = monitor entry.
    MonitorExit,
    ThrowNullPointerException,
    /// `a1` = array, `a2` = index.
    ThrowArrayIndexOutOfBoundsException,
    ThrowArithmeticException,
    /// `a1` = object that failed the check, `a2` = target klass.
    ThrowClassCastException,
    /// `a1` = array, `a2` = value.
    ThrowArrayStoreException,
    /// `a1` = receiver klass, `a2` = interface it does not implement.
    ThrowIncompatibleClassChangeError,
    /// `a1` = receiver klass, `a2` = interface method without an implementation.
    ThrowAbstractMethodError,
    ThrowIllegalMonitorStateException,
    /// `athrow`: `a1` = exception.
    ThrowException,
    /// Unwind with the pending exception of the thread.
    ForwardException,
    AtSafepoint,
    /// `a1` = TOS-state the stub was generated for.
    TraceBytecode,
    /// Original bytecode under the breakpoint at bcp, returned in `a0`.
    GetOriginalBytecode,
    /// Record `a1` as the original bytecode under the breakpoint at bcp.
    SetOriginalBytecode,
    /// Post a breakpoint event for bcp.
    Breakpoint,
    /// `fa0 = fa0 % fa1`, single precision.
    Frem,
    /// `fa0 = fa0 % fa1`, double precision.
    Drem,
    /// `a1` = receiver of `Object.<init>` whose class has a finalizer.
    RegisterFinalizer,
    /// Fatal error; `a1` = message id.
    Stop,
}

impl RuntimeEntry {
    pub fn address(self) -> u64 {
        RUNTIME_BASE + self as u64 * RUNTIME_ENTRY_SIZE
    }

    /// Map an address inside the runtime range back to its entry.
    pub fn from_address(addr: u64) -> Option<RuntimeEntry> {
        if !(RUNTIME_BASE..RUNTIME_BASE + RUNTIME_SIZE).contains(&addr) {
            return None;
        }
        let offset = addr - RUNTIME_BASE;
        if offset % RUNTIME_ENTRY_SIZE != 0 {
            return None;
        }
        Self::ALL.get((offset / RUNTIME_ENTRY_SIZE) as usize).copied()
    }

    /// Whether `addr` lies in the runtime range at all.
    pub fn is_runtime_address(addr: u64) -> bool {
        (RUNTIME_BASE..RUNTIME_BASE + RUNTIME_SIZE).contains(&addr)
    }
}
