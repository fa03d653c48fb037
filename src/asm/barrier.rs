//! GC barrier code emission for heap accesses.
//!
//! Every heap load and store emitted by the templates goes through
//! [`MacroAssembler::access_load_at`]/[`MacroAssembler::access_store_at`],
//! which forward to the active [`BarrierSetAssembler`]. The base behaviour
//! (plain memory access plus compressed-oop conversion) lives in
//! [`raw_load_at`]/[`raw_store_at`]; barrier sets wrap it.

use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::macro_asm::MacroAssembler;
use super::riscv::{FReg, Reg, is_simm12};
use crate::runtime::layout::{BasicType, CARD_SHIFT, CARD_TABLE_BASE, DIRTY_CARD};

bitflags! {
    /// Properties of a memory access.
    #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
    pub struct Decorators: u32 {
        /// The location is a heap field or array element.
        const IN_HEAP = 1 << 0;
        /// The location is off-heap (thread, frame, metadata).
        const IN_NATIVE = 1 << 1;
        /// The location is an array element.
        const IS_ARRAY = 1 << 2;
        /// The value is known not to be null.
        const IS_NOT_NULL = 1 << 3;
        /// Skip all barriers.
        const AS_RAW = 1 << 4;
        const ON_WEAK_OOP_REF = 1 << 5;
        const ON_PHANTOM_OOP_REF = 1 << 6;
    }
}

/// Register operand of an access: integer or floating point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessReg {
    X(Reg),
    F(FReg),
}

impl AccessReg {
    fn x(self) -> Reg {
        match self {
            AccessReg::X(r) => r,
            AccessReg::F(_) => panic!("integer register expected"),
        }
    }

    fn f(self) -> FReg {
        match self {
            AccessReg::F(r) => r,
            AccessReg::X(_) => panic!("floating-point register expected"),
        }
    }
}

/// Which barrier set the generated code targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BarrierSetKind {
    /// No barriers.
    None,
    /// Card marking after reference stores.
    #[default]
    CardTable,
}

/// Emits the barrier code of one garbage collector.
pub trait BarrierSetAssembler: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    #[allow(clippy::too_many_arguments)]
    fn load_at(
        &self,
        masm: &mut MacroAssembler,
        decorators: Decorators,
        ty: BasicType,
        dst: AccessReg,
        base: Reg,
        offset: i32,
        tmp: Reg,
    ) {
        raw_load_at(masm, decorators, ty, dst, base, offset, tmp);
    }

    #[allow(clippy::too_many_arguments)]
    fn store_at(
        &self,
        masm: &mut MacroAssembler,
        decorators: Decorators,
        ty: BasicType,
        base: Reg,
        offset: i32,
        val: AccessReg,
        tmp1: Reg,
        tmp2: Reg,
    ) {
        let _ = tmp2;
        raw_store_at(masm, decorators, ty, base, offset, val, tmp1);
    }
}

/// Bring `offset(base)` into immediate range, using `tmp` if needed.
fn legitimize(masm: &mut MacroAssembler, base: Reg, offset: i32, tmp: Reg) -> (Reg, i32) {
    if is_simm12(offset as i64) {
        (base, offset)
    } else {
        masm.li(tmp, offset as i64);
        masm.add(tmp, base, tmp);
        (tmp, 0)
    }
}

/// Plain load of a `ty` value, decoding compressed heap references.
pub fn raw_load_at(
    masm: &mut MacroAssembler,
    decorators: Decorators,
    ty: BasicType,
    dst: AccessReg,
    base: Reg,
    offset: i32,
    tmp: Reg,
) {
    let (base, offset) = legitimize(masm, base, offset, tmp);
    match ty {
        BasicType::Boolean => masm.lbu(dst.x(), base, offset),
        BasicType::Byte => masm.lb(dst.x(), base, offset),
        BasicType::Char => masm.lhu(dst.x(), base, offset),
        BasicType::Short => masm.lh(dst.x(), base, offset),
        BasicType::Int => masm.lw(dst.x(), base, offset),
        BasicType::Long => masm.ld(dst.x(), base, offset),
        BasicType::Float => masm.flw(dst.f(), base, offset),
        BasicType::Double => masm.fld(dst.f(), base, offset),
        BasicType::Object | BasicType::Array => {
            let dst = dst.x();
            if decorators.contains(Decorators::IN_HEAP) && masm.compressed_oops().is_some() {
                masm.lwu(dst, base, offset);
                if decorators.contains(Decorators::IS_NOT_NULL) {
                    masm.decode_heap_oop_not_null(dst, dst);
                } else {
                    masm.decode_heap_oop(dst, dst);
                }
            } else {
                masm.ld(dst, base, offset);
            }
        }
        BasicType::Void => unreachable!("load of void"),
    }
}

/// Plain store of a `ty` value, encoding compressed heap references.
/// `AccessReg::X(Reg::ZERO)` stores null.
pub fn raw_store_at(
    masm: &mut MacroAssembler,
    decorators: Decorators,
    ty: BasicType,
    base: Reg,
    offset: i32,
    val: AccessReg,
    tmp: Reg,
) {
    match ty {
        BasicType::Float => {
            let (base, offset) = legitimize(masm, base, offset, tmp);
            masm.fsw(val.f(), base, offset);
        }
        BasicType::Double => {
            let (base, offset) = legitimize(masm, base, offset, tmp);
            masm.fsd(val.f(), base, offset);
        }
        BasicType::Object | BasicType::Array => {
            let mut val = val.x();
            let narrow = decorators.contains(Decorators::IN_HEAP) && masm.compressed_oops().is_some();
            if narrow && val != Reg::ZERO {
                if decorators.contains(Decorators::IS_NOT_NULL) {
                    masm.encode_heap_oop_not_null(tmp, val);
                } else {
                    masm.encode_heap_oop(tmp, val);
                }
                val = tmp;
            }
            // `tmp` may hold the value now; large offsets go through t0.
            let (base, offset) = legitimize(masm, base, offset, Reg::T0);
            if narrow {
                masm.sw(val, base, offset);
            } else {
                masm.sd(val, base, offset);
            }
        }
        _ => {
            let (base, offset) = legitimize(masm, base, offset, tmp);
            let val = val.x();
            match ty {
                BasicType::Boolean => {
                    masm.andi(tmp, val, 1);
                    masm.sb(tmp, base, offset);
                }
                BasicType::Byte => masm.sb(val, base, offset),
                BasicType::Char | BasicType::Short => masm.sh(val, base, offset),
                BasicType::Int => masm.sw(val, base, offset),
                BasicType::Long => masm.sd(val, base, offset),
                _ => unreachable!("store of {:?}", ty),
            }
        }
    }
}

/// No barriers at all.
#[derive(Debug, Default)]
pub struct NoBarrierSet;

impl BarrierSetAssembler for NoBarrierSet {
    fn name(&self) -> &'static str {
        "none"
    }
}

/// Dirties the card covering every barriered reference store.
#[derive(Debug)]
pub struct CardTableBarrierSet {
    byte_map_base: u64,
    card_shift: u32,
}

impl CardTableBarrierSet {
    pub fn new(byte_map_base: u64, card_shift: u32) -> Self {
        Self {
            byte_map_base,
            card_shift,
        }
    }

    /// Card table placed at the fixed table address, covering a heap
    /// starting at `heap_base`.
    pub fn for_heap(heap_base: u64) -> Self {
        Self::new(CARD_TABLE_BASE.wrapping_sub(heap_base >> CARD_SHIFT), CARD_SHIFT)
    }

    pub fn byte_map_base(&self) -> u64 {
        self.byte_map_base
    }

    /// Dirty the card of the address in `addr` (clobbers `addr` and `t0`).
    fn store_check(&self, masm: &mut MacroAssembler, addr: Reg) {
        masm.srli(addr, addr, self.card_shift);
        masm.li(Reg::T0, self.byte_map_base as i64);
        masm.add(addr, addr, Reg::T0);
        debug_assert_eq!(DIRTY_CARD, 0);
        masm.sb(Reg::ZERO, addr, 0);
    }
}

impl BarrierSetAssembler for CardTableBarrierSet {
    fn name(&self) -> &'static str {
        "card-table"
    }

    fn store_at(
        &self,
        masm: &mut MacroAssembler,
        decorators: Decorators,
        ty: BasicType,
        base: Reg,
        offset: i32,
        val: AccessReg,
        tmp1: Reg,
        tmp2: Reg,
    ) {
        raw_store_at(masm, decorators, ty, base, offset, val, tmp1);
        if !ty.is_reference() || !decorators.contains(Decorators::IN_HEAP) {
            return;
        }
        // Array stores mark the element's card, field stores the object's.
        if decorators.contains(Decorators::IS_ARRAY) {
            masm.add_imm(tmp2, base, offset as i64);
        } else {
            masm.mv(tmp2, base);
        }
        self.store_check(masm, tmp2);
    }
}

/// Barrier set assembler for `kind` over a heap starting at `heap_base`.
pub fn barrier_set_for(kind: BarrierSetKind, heap_base: u64) -> Arc<dyn BarrierSetAssembler> {
    match kind {
        BarrierSetKind::None => Arc::new(NoBarrierSet),
        BarrierSetKind::CardTable => Arc::new(CardTableBarrierSet::for_heap(heap_base)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::codebuf::CodeBuffer;
    use crate::asm::disasm::{self, Inst, Width};
    use crate::asm::macro_asm::MacroConfig;
    use crate::runtime::CompressedOops;

    fn decoded(barrier: Arc<dyn BarrierSetAssembler>, compressed: bool, f: impl FnOnce(&mut MacroAssembler)) -> Vec<Inst> {
        let config = MacroConfig {
            implicit_null_checks: true,
            trap_based_null_checks: false,
            compressed_oops: compressed.then(|| CompressedOops::new(0, 3)),
        };
        let mut masm = MacroAssembler::new(CodeBuffer::new(0x1000), config, barrier);
        f(&mut masm);
        let (buf, _) = masm.into_parts();
        buf.code()
            .chunks(4)
            .map(|c| disasm::decode(u32::from_le_bytes([c[0], c[1], c[2], c[3]])).unwrap())
            .collect()
    }

    fn byte_stores(insts: &[Inst]) -> usize {
        insts
            .iter()
            .filter(|i| matches!(i, Inst::Store { width: Width::B, rs2: Reg::X0, .. }))
            .count()
    }

    #[test]
    fn test_card_mark_follows_reference_store() {
        let insts = decoded(Arc::new(CardTableBarrierSet::for_heap(0x2000_0000)), true, |m| {
            m.store_heap_oop(Reg::A0, 16, Reg::A1, Reg::T2, Reg::T3, Decorators::empty());
        });
        assert!(matches!(insts[1], Inst::Store { width: Width::W, .. }));
        assert_eq!(byte_stores(&insts), 1);
    }

    #[test]
    fn test_raw_and_primitive_stores_skip_the_card() {
        let insts = decoded(Arc::new(CardTableBarrierSet::for_heap(0x2000_0000)), false, |m| {
            m.store_heap_oop(Reg::A0, 16, Reg::A1, Reg::T2, Reg::T3, Decorators::AS_RAW);
            m.access_store_at(
                BasicType::Int,
                Decorators::IN_HEAP,
                Reg::A0,
                16,
                AccessReg::X(Reg::A1),
                Reg::T2,
                Reg::T3,
            );
        });
        assert_eq!(byte_stores(&insts), 0);
        assert!(matches!(insts[0], Inst::Store { width: Width::D, .. }));
    }

    #[test]
    fn test_no_barrier_set() {
        let insts = decoded(Arc::new(NoBarrierSet), false, |m| {
            m.store_heap_oop(Reg::A0, 16, Reg::A1, Reg::T2, Reg::T3, Decorators::empty());
        });
        assert_eq!(insts.len(), 1);
    }

    #[test]
    fn test_byte_map_base() {
        let bs = CardTableBarrierSet::for_heap(0x2000_0000);
        assert_eq!(bs.byte_map_base() + (0x2000_0000 >> CARD_SHIFT), CARD_TABLE_BASE);
    }

    #[test]
    fn test_compressed_load_decodes() {
        let insts = decoded(Arc::new(NoBarrierSet), true, |m| {
            m.load_heap_oop(Reg::A0, Reg::A1, 24, Reg::T2, Decorators::IS_NOT_NULL);
        });
        assert!(matches!(insts[0], Inst::Load { width: Width::Wu, .. }));
        assert_eq!(insts.len(), 2);
    }
}
