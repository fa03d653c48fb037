//! Compressed (32-bit) heap references.

use serde::{Deserialize, Serialize};

/// How narrow oops map to addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NarrowOopMode {
    /// The heap lies below 4 GiB: narrow == wide.
    Unscaled,
    /// The heap lies below 32 GiB: narrow = wide >> shift.
    ZeroBased,
    /// narrow = (wide - base) >> shift.
    HeapBased,
    /// The base has no bits in common with shifted narrow values, so the
    /// base can be or-ed in instead of added.
    Disjoint,
}

/// Encoding parameters, fixed when the heap is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressedOops {
    base: u64,
    shift: u32,
}

impl CompressedOops {
    pub const LOG_MIN_OBJ_ALIGNMENT: u32 = 3;

    pub fn new(base: u64, shift: u32) -> Self {
        Self { base, shift }
    }

    /// Parameters and heap start for a mode.
    pub fn for_mode(mode: NarrowOopMode) -> (Self, u64) {
        match mode {
            NarrowOopMode::Unscaled => (Self::new(0, 0), 0x2000_0000),
            NarrowOopMode::ZeroBased => (Self::new(0, Self::LOG_MIN_OBJ_ALIGNMENT), 0x2000_0000),
            NarrowOopMode::HeapBased => {
                let heap = 0x10_2000_0000;
                (Self::new(heap, Self::LOG_MIN_OBJ_ALIGNMENT), heap)
            }
            NarrowOopMode::Disjoint => {
                let heap = 0x10_0000_0000;
                (Self::new(heap, Self::LOG_MIN_OBJ_ALIGNMENT), heap)
            }
        }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn shift(&self) -> u32 {
        self.shift
    }

    pub fn mode(&self) -> NarrowOopMode {
        if self.base == 0 {
            if self.shift == 0 {
                NarrowOopMode::Unscaled
            } else {
                NarrowOopMode::ZeroBased
            }
        } else if self.base_disjoint() {
            NarrowOopMode::Disjoint
        } else {
            NarrowOopMode::HeapBased
        }
    }

    /// The base has no bits below `32 + shift`.
    pub fn base_disjoint(&self) -> bool {
        self.base != 0 && self.base.trailing_zeros() >= 32 + self.shift
    }

    pub fn encode(&self, oop: u64) -> u32 {
        if oop == 0 {
            return 0;
        }
        self.encode_not_null(oop)
    }

    pub fn encode_not_null(&self, oop: u64) -> u32 {
        debug_assert!(oop != 0);
        ((oop - self.base) >> self.shift) as u32
    }

    pub fn decode(&self, narrow: u32) -> u64 {
        if narrow == 0 {
            return 0;
        }
        self.decode_not_null(narrow)
    }

    pub fn decode_not_null(&self, narrow: u32) -> u64 {
        debug_assert!(narrow != 0);
        ((narrow as u64) << self.shift) + self.base
    }
}
