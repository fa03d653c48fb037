//! Memory-ordering primitives.
//!
//! Every barrier has two forms: an emitting form that appends the matching
//! `fence` to generated code, and a host form used by runtime code that
//! shares memory with generated code (and by the simulator when it executes
//! a `fence`).

use std::sync::atomic::{self, AtomicU8, AtomicU32, AtomicU64, Ordering};

use crate::asm::riscv::{Assembler, fence_bits};

/// A memory barrier kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Barrier {
    LoadLoad,
    StoreStore,
    LoadStore,
    StoreLoad,
    /// Orders a preceding load before all later loads and stores.
    Acquire,
    /// Orders all earlier loads and stores before a following store.
    Release,
    /// Full two-way barrier.
    Fence,
}

impl Barrier {
    /// The predecessor and successor sets of the `fence` this barrier maps to.
    pub fn fence_sets(self) -> (u32, u32) {
        use fence_bits::{R, RW, W};
        match self {
            Barrier::LoadLoad => (R, R),
            Barrier::StoreStore => (W, W),
            Barrier::LoadStore => (R, W),
            Barrier::StoreLoad => (W, R),
            Barrier::Acquire => (R, RW),
            Barrier::Release => (RW, W),
            Barrier::Fence => (RW, RW),
        }
    }

    /// Append the barrier to generated code.
    pub fn emit(self, asm: &mut Assembler) {
        let (pred, succ) = self.fence_sets();
        asm.fence(pred, succ);
    }
}

/// Host-side ordering operations.
pub struct OrderAccess;

impl OrderAccess {
    pub fn loadload() {
        atomic::fence(Ordering::Acquire);
    }

    pub fn storestore() {
        atomic::fence(Ordering::Release);
    }

    pub fn loadstore() {
        atomic::fence(Ordering::Acquire);
    }

    pub fn storeload() {
        atomic::fence(Ordering::SeqCst);
    }

    pub fn acquire() {
        atomic::fence(Ordering::Acquire);
    }

    pub fn release() {
        atomic::fence(Ordering::Release);
    }

    pub fn fence() {
        atomic::fence(Ordering::SeqCst);
    }

    /// Barrier after code has been patched and before it is executed.
    pub fn cross_modify_fence() {
        atomic::compiler_fence(Ordering::SeqCst);
        Self::loadload();
    }

    /// Perform the host barrier matching a decoded `fence pred, succ`.
    pub fn fence_for(pred: u32, succ: u32) {
        let pred_w = pred & fence_bits::W != 0;
        let succ_r = succ & fence_bits::R != 0;
        if pred_w && succ_r {
            Self::fence();
        } else if pred_w {
            Self::release();
        } else if pred != 0 && succ != 0 {
            Self::acquire();
        }
    }

    /// Plain load followed by `acquire`.
    pub fn load_acquire<A: OrderedLoad>(cell: &A) -> A::Value {
        let value = cell.load_plain();
        Self::acquire();
        value
    }

    /// `release` followed by a plain store.
    pub fn release_store<A: OrderedLoad>(cell: &A, value: A::Value) {
        Self::release();
        cell.store_plain(value);
    }
}

/// Atomic cells usable with [`OrderAccess::load_acquire`].
pub trait OrderedLoad {
    type Value: Copy;
    fn load_plain(&self) -> Self::Value;
    fn store_plain(&self, value: Self::Value);
}

macro_rules! ordered_load_impl {
    ($atomic:ty, $value:ty) => {
        impl OrderedLoad for $atomic {
            type Value = $value;

            fn load_plain(&self) -> $value {
                self.load(Ordering::Relaxed)
            }

            fn store_plain(&self, value: $value) {
                self.store(value, Ordering::Relaxed)
            }
        }
    };
}

ordered_load_impl!(AtomicU8, u8);
ordered_load_impl!(AtomicU32, u32);
ordered_load_impl!(AtomicU64, u64);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::codebuf::CodeBuffer;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_barrier_encodings() {
        let mut asm = Assembler::new(CodeBuffer::new(0));
        for barrier in [
            Barrier::LoadLoad,
            Barrier::StoreStore,
            Barrier::LoadStore,
            Barrier::StoreLoad,
            Barrier::Acquire,
            Barrier::Release,
            Barrier::Fence,
        ] {
            barrier.emit(&mut asm);
        }
        let code = asm.into_buffer().into_code();
        let words: Vec<u32> = code
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        assert_eq!(
            words,
            vec![
                0x0220_000F, // fence r,r
                0x0110_000F, // fence w,w
                0x0210_000F, // fence r,w
                0x0120_000F, // fence w,r
                0x0230_000F, // fence r,rw
                0x0310_000F, // fence rw,w
                0x0330_000F, // fence rw,rw
            ]
        );
    }

    #[test]
    fn test_release_acquire_publication() {
        let data = Arc::new(AtomicU64::new(0));
        let flag = Arc::new(AtomicU8::new(0));

        let writer = {
            let (data, flag) = (data.clone(), flag.clone());
            thread::spawn(move || {
                data.store(42, Ordering::Relaxed);
                OrderAccess::release_store(&*flag, 1);
            })
        };

        while OrderAccess::load_acquire(&*flag) == 0 {
            std::hint::spin_loop();
        }
        assert_eq!(data.load(Ordering::Relaxed), 42);
        writer.join().unwrap();
    }
}
