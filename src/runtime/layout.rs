//! Fixed layouts shared by the generated code and the host runtime.
//!
//! All offsets are in bytes. Word-sized fields are 8 bytes and little-endian.

use bitflags::bitflags;

// ==================== Address space ====================

/// Accesses below this address fault; implicit null checks rely on it.
pub const PROTECTED_PAGE_SIZE: u64 = 4096;

pub const CODE_BASE: u64 = 0x0010_0000;
pub const CODE_SIZE: u64 = 4 << 20;

pub const META_BASE: u64 = 0x0100_0000;
pub const META_SIZE: u64 = 16 << 20;

pub const THREAD_BASE: u64 = 0x0E00_0000;
pub const THREAD_SIZE: u64 = 4096;
pub const MAX_THREADS: u64 = 16;

/// Host-implemented entry points live here; this range is never mapped.
pub const RUNTIME_BASE: u64 = 0x0F00_0000;
pub const RUNTIME_ENTRY_SIZE: u64 = 16;
pub const RUNTIME_SIZE: u64 = 0x10_0000;

pub const CARD_TABLE_BASE: u64 = 0x1000_0000;
pub const CARD_SHIFT: u32 = 9;
pub const DIRTY_CARD: u8 = 0;
pub const CLEAN_CARD: u8 = 0xFF;

pub const HEAP_SIZE: u64 = 16 << 20;

pub const STACK_TOP: u64 = 0x4000_0000;
pub const STACK_SIZE: u64 = 1 << 20;

/// Granularity of every mapped region.
pub const PAGE_SIZE: u64 = 4096;

pub const WORD_SIZE: i32 = 8;
pub const INSTRUCTION_SIZE: i32 = 4;

// ==================== Thread ====================

pub mod thread {
    pub const TLAB_TOP: i32 = 0;
    pub const TLAB_END: i32 = 8;
    pub const TLAB_START: i32 = 16;
    pub const PENDING_EXCEPTION: i32 = 24;
    pub const VM_RESULT: i32 = 32;
    pub const VM_RESULT_2: i32 = 40;
    pub const POLLING_WORD: i32 = 48;
    pub const LAST_JAVA_SP: i32 = 56;
    pub const LAST_JAVA_FP: i32 = 64;
    pub const LAST_JAVA_PC: i32 = 72;
    pub const THREAD_ID: i32 = 80;

    /// Bit of the polling word that requests a safepoint.
    pub const POLL_BIT: u64 = 1;
}

// ==================== Interpreter frame ====================

pub mod frame {
    /// Return address, relative to `fp`.
    pub const RETURN_ADDRESS: i32 = -8;
    /// Caller's `fp`, relative to `fp`.
    pub const LINK: i32 = -16;
    /// Distance from `fp` down to the base of the `ijava_state` block.
    pub const HEADER_SIZE: i32 = 112;

    // Fields of the `ijava_state` block, relative to its base.
    pub const METHOD: i32 = 0;
    pub const MIRROR: i32 = 8;
    pub const LOCALS: i32 = 16;
    pub const MONITORS: i32 = 24;
    pub const CPOOL_CACHE: i32 = 32;
    pub const BCP: i32 = 40;
    pub const ESP: i32 = 48;
    pub const MDX: i32 = 56;
    pub const TOP_FRAME_SP: i32 = 64;
    pub const SENDER_SP: i32 = 72;
    pub const OOP_TMP: i32 = 80;
    pub const RESULT_TMP: i32 = 88;

    /// `fp`-relative offset of an `ijava_state` field.
    pub const fn ijava(field: i32) -> i32 {
        field - HEADER_SIZE
    }

    /// One `BasicObjectLock`: displaced header then owner.
    pub const MONITOR_SIZE: i32 = 16;
    pub const MONITOR_LOCK: i32 = 0;
    pub const MONITOR_OBJ: i32 = 8;

    pub const STACK_ELEMENT_SIZE: i32 = 8;
}

// ==================== Objects ====================

pub mod oop {
    pub const MARK: i32 = 0;
    pub const KLASS: i32 = 8;
    pub const HEADER_SIZE: i32 = 16;
    pub const ARRAY_LENGTH: i32 = 16;
    pub const ARRAY_BASE: i32 = 24;

    /// Unlocked, no hash.
    pub const PROTOTYPE_MARK: u64 = 1;

    /// `java/lang/Class` instances keep their klass here; statics follow.
    pub const MIRROR_KLASS: i32 = 16;
    pub const MIRROR_STATICS: i32 = 24;
}

// ==================== Metadata ====================

pub mod klass {
    pub const LAYOUT_HELPER: i32 = 0;
    pub const INIT_STATE: i32 = 4;
    pub const ACCESS_FLAGS: i32 = 8;
    pub const SUPER_CHECK_OFFSET: i32 = 12;
    pub const SECONDARY_SUPER_CACHE: i32 = 16;
    pub const SECONDARY_SUPERS: i32 = 24;
    pub const PRIMARY_SUPERS: i32 = 32;
    pub const PRIMARY_SUPER_LIMIT: i32 = 8;
    pub const JAVA_MIRROR: i32 = 96;
    pub const SUPER: i32 = 104;
    pub const NAME: i32 = 112;
    pub const ELEMENT_KLASS: i32 = 120;
    pub const VTABLE_LENGTH: i32 = 128;
    pub const ITABLE_LENGTH: i32 = 132;
    pub const INIT_THREAD: i32 = 136;
    pub const PROTOTYPE_HEADER: i32 = 144;
    pub const VTABLE_START: i32 = 152;

    pub const VTABLE_ENTRY_SIZE: i32 = 8;
    /// Interface klass, then the offset of its method block from the klass.
    pub const ITABLE_OFFSET_ENTRY_SIZE: i32 = 16;
    pub const ITABLE_INTERFACE: i32 = 0;
    pub const ITABLE_OFFSET: i32 = 8;
    pub const ITABLE_METHOD_ENTRY_SIZE: i32 = 8;

    /// Instances need the slow path (abstract, interface, finalizer).
    pub const LH_INSTANCE_SLOW_PATH_BIT: i32 = 0x01;
    /// Array klasses have a negative layout helper.
    pub const LH_ARRAY_TAG: i32 = -0x4000_0000;
    pub const LH_ELEMENT_TYPE_SHIFT: u32 = 16;
    pub const LH_HEADER_SIZE_SHIFT: u32 = 8;
    pub const LH_LOG2_ELEMENT_SIZE_MASK: i32 = 0xff;
    /// Set for boolean arrays and clear for byte arrays, which share
    /// `baload`/`bastore`.
    pub const LH_BOOLEAN_DIFFBIT: i32 = (super::BasicType::Boolean as i32 & !(super::BasicType::Byte as i32))
        << LH_ELEMENT_TYPE_SHIFT;

    pub const fn primary_super_offset(depth: i32) -> i32 {
        PRIMARY_SUPERS + depth * 8
    }

    /// Layout helper of an instance klass: the instance size in bytes,
    /// with the slow path bit when allocation must go through the runtime.
    pub const fn instance_layout_helper(size: i32, slow_path: bool) -> i32 {
        if slow_path { size | LH_INSTANCE_SLOW_PATH_BIT } else { size }
    }

    /// Layout helper of an array klass:
    /// `tag | element type | header size | log2(element size)`.
    pub fn array_layout_helper(element: super::BasicType, compressed_oops: bool) -> i32 {
        let log2 = element.heap_size(compressed_oops).trailing_zeros() as i32;
        LH_ARRAY_TAG
            | ((element as i32) << LH_ELEMENT_TYPE_SHIFT)
            | (super::oop::ARRAY_BASE << LH_HEADER_SIZE_SHIFT)
            | log2
    }

    pub fn is_array_layout(layout_helper: i32) -> bool {
        layout_helper < 0
    }
}

/// Class initialization states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u32)]
pub enum InitState {
    Allocated = 0,
    Loaded = 1,
    Linked = 2,
    BeingInitialized = 3,
    FullyInitialized = 4,
    InitializationError = 5,
}

pub mod method {
    pub const CONST_METHOD: i32 = 0;
    pub const ACCESS_FLAGS: i32 = 8;
    /// vtable index, or `ITABLE_INDEX_MAX - itable_index` for interface methods.
    pub const VTABLE_INDEX: i32 = 12;
    pub const FROM_INTERPRETED_ENTRY: i32 = 16;
    pub const HOLDER: i32 = 24;
    pub const NAME: i32 = 32;
    pub const SIZE: i32 = 40;

    pub const ITABLE_INDEX_MAX: i32 = -10;
    pub const NONVIRTUAL_VTABLE_INDEX: i32 = -2;
}

pub mod const_method {
    pub const CONSTANTS: i32 = 0;
    pub const CODE_SIZE: i32 = 8;
    pub const SIZE_OF_PARAMETERS: i32 = 10;
    pub const MAX_LOCALS: i32 = 12;
    pub const MAX_STACK: i32 = 14;
    pub const CODE: i32 = 16;
}

pub mod constant_pool {
    pub const TAGS: i32 = 0;
    pub const CACHE: i32 = 8;
    pub const POOL_HOLDER: i32 = 16;
    pub const RESOLVED_KLASSES: i32 = 24;
    pub const RESOLVED_REFERENCES: i32 = 32;
    pub const LENGTH: i32 = 40;
    pub const HEADER_SIZE: i32 = 48;

    /// Metadata arrays: u32 length, elements from offset 8.
    pub const ARRAY_LENGTH: i32 = 0;
    pub const ARRAY_DATA: i32 = 8;
}

pub mod cp_cache {
    pub const LENGTH: i32 = 0;
    pub const CONSTANT_POOL: i32 = 8;
    pub const BASE: i32 = 16;
    pub const ENTRY_SIZE: i32 = 32;
    pub const ENTRY_SIZE_LOG2: u32 = 5;
}

/// Constant pool tags.
pub mod tag {
    pub const UTF8: u8 = 1;
    pub const INTEGER: u8 = 3;
    pub const FLOAT: u8 = 4;
    pub const LONG: u8 = 5;
    pub const DOUBLE: u8 = 6;
    pub const CLASS: u8 = 7;
    pub const STRING: u8 = 8;
    pub const FIELDREF: u8 = 9;
    pub const METHODREF: u8 = 10;
    pub const INTERFACE_METHODREF: u8 = 11;
    pub const NAME_AND_TYPE: u8 = 12;
    pub const INVOKE_DYNAMIC: u8 = 18;
    pub const UNRESOLVED_CLASS: u8 = 100;
    pub const UNRESOLVED_CLASS_IN_ERROR: u8 = 103;
}

bitflags! {
    /// Access flags of classes, methods and fields, plus VM-internal bits.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct AccessFlags: u32 {
        const PUBLIC = 0x0001;
        const PRIVATE = 0x0002;
        const PROTECTED = 0x0004;
        const STATIC = 0x0008;
        const FINAL = 0x0010;
        const SYNCHRONIZED = 0x0020;
        const VOLATILE = 0x0040;
        const NATIVE = 0x0100;
        const INTERFACE = 0x0200;
        const ABSTRACT = 0x0400;
        const HAS_FINALIZER = 0x4000_0000;
    }
}

/// Java basic types; `newarray` operands use the same codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BasicType {
    Boolean = 4,
    Char = 5,
    Float = 6,
    Double = 7,
    Byte = 8,
    Short = 9,
    Int = 10,
    Long = 11,
    Object = 12,
    Array = 13,
    Void = 14,
}

impl BasicType {
    pub fn from_code(code: u8) -> Option<BasicType> {
        Some(match code {
            4 => BasicType::Boolean,
            5 => BasicType::Char,
            6 => BasicType::Float,
            7 => BasicType::Double,
            8 => BasicType::Byte,
            9 => BasicType::Short,
            10 => BasicType::Int,
            11 => BasicType::Long,
            12 => BasicType::Object,
            13 => BasicType::Array,
            14 => BasicType::Void,
            _ => return None,
        })
    }

    /// Basic type of a field descriptor's first character.
    pub fn from_descriptor(desc: &str) -> Option<BasicType> {
        Some(match desc.as_bytes().first()? {
            b'Z' => BasicType::Boolean,
            b'C' => BasicType::Char,
            b'F' => BasicType::Float,
            b'D' => BasicType::Double,
            b'B' => BasicType::Byte,
            b'S' => BasicType::Short,
            b'I' => BasicType::Int,
            b'J' => BasicType::Long,
            b'L' => BasicType::Object,
            b'[' => BasicType::Array,
            b'V' => BasicType::Void,
            _ => return None,
        })
    }

    pub fn is_reference(self) -> bool {
        matches!(self, BasicType::Object | BasicType::Array)
    }

    /// Size of a heap element of this type.
    pub fn heap_size(self, compressed_oops: bool) -> u32 {
        match self {
            BasicType::Boolean | BasicType::Byte => 1,
            BasicType::Char | BasicType::Short => 2,
            BasicType::Int | BasicType::Float => 4,
            BasicType::Long | BasicType::Double => 8,
            BasicType::Object | BasicType::Array => {
                if compressed_oops {
                    4
                } else {
                    8
                }
            }
            BasicType::Void => 0,
        }
    }

    /// Number of operand stack slots a value of this type occupies.
    pub fn slots(self) -> u32 {
        match self {
            BasicType::Long | BasicType::Double => 2,
            BasicType::Void => 0,
            _ => 1,
        }
    }

    pub fn descriptor_char(self) -> char {
        match self {
            BasicType::Boolean => 'Z',
            BasicType::Char => 'C',
            BasicType::Float => 'F',
            BasicType::Double => 'D',
            BasicType::Byte => 'B',
            BasicType::Short => 'S',
            BasicType::Int => 'I',
            BasicType::Long => 'J',
            BasicType::Object => 'L',
            BasicType::Array => '[',
            BasicType::Void => 'V',
        }
    }
}

pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

pub fn align_down(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    value & !(alignment - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ijava_offsets_fit_in_immediates() {
        assert_eq!(frame::ijava(frame::METHOD), -112);
        assert_eq!(frame::ijava(frame::RESULT_TMP), -24);
        assert!(frame::ijava(frame::RESULT_TMP) < frame::LINK);
    }

    #[test]
    fn test_itable_index_encoding() {
        let encoded = method::ITABLE_INDEX_MAX - 3;
        assert_eq!(method::ITABLE_INDEX_MAX - encoded, 3);
    }

    #[test]
    fn test_basic_types() {
        assert_eq!(BasicType::from_code(10), Some(BasicType::Int));
        assert_eq!(BasicType::from_descriptor("[I"), Some(BasicType::Array));
        assert_eq!(BasicType::Long.slots(), 2);
        assert_eq!(BasicType::Object.heap_size(true), 4);
        assert_eq!(align_up(17, 16), 32);
        assert_eq!(align_down(17, 16), 16);
    }

    #[test]
    fn test_array_layout_helper() {
        let bytes = klass::array_layout_helper(BasicType::Byte, false);
        let booleans = klass::array_layout_helper(BasicType::Boolean, false);
        assert!(klass::is_array_layout(bytes));
        assert_eq!(bytes & klass::LH_BOOLEAN_DIFFBIT, 0);
        assert_ne!(booleans & klass::LH_BOOLEAN_DIFFBIT, 0);
        let longs = klass::array_layout_helper(BasicType::Long, false);
        assert_eq!(longs & klass::LH_LOG2_ELEMENT_SIZE_MASK, 3);
        assert_eq!((longs >> klass::LH_HEADER_SIZE_SHIFT) & 0xff, oop::ARRAY_BASE);
        assert!(!klass::is_array_layout(klass::instance_layout_helper(24, true)));
    }
}
