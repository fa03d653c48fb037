//! Mid-level code emission helpers.
//!
//! `MacroAssembler` wraps the raw [`Assembler`] and adds constant
//! materialization, null checks, compressed oop conversion, barrier-routed
//! heap access, far branches and calls into the host runtime.
//!
//! Macro expansions may clobber `t0`; callers never keep live values there.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use super::barrier::{AccessReg, BarrierSetAssembler, Decorators};
use super::codebuf::{CodeBuffer, Label};
use super::disasm::{self, Inst};
use super::riscv::{Assembler, Cond, NOP, Reg, is_simm12};
use crate::runtime::layout::{BasicType, PROTECTED_PAGE_SIZE};
use crate::runtime::{Barrier, CompressedOops, NarrowOopMode, RuntimeEntry};

/// Number of instructions in a `movptr` sequence.
pub const MOVPTR_INSTRUCTIONS: usize = 6;

/// Code generation choices that depend on the target configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MacroConfig {
    /// A fault on the protected zero page becomes a NullPointerException.
    pub implicit_null_checks: bool,
    /// Null checks trap (`ebreak`) instead of branching to the throw stub.
    pub trap_based_null_checks: bool,
    /// `None` when heap references are stored uncompressed.
    pub compressed_oops: Option<CompressedOops>,
}

/// How a null check is realised for a given access offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullCheckKind {
    /// No code: the access itself faults on the protected page.
    Implicit,
    /// `bnez; ebreak`.
    Trap,
    /// Compare and branch to the NullPointerException stub.
    Explicit,
}

/// Encodings of a two-instruction patchable conditional branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FarBranchKind {
    /// `b<cond> dest; nop`: destination in the first instruction.
    Near,
    /// `b<!cond> +8; j dest`: destination in the second instruction.
    Far,
    /// `nop; nop`: the branch has been removed.
    Nopped,
}

pub struct MacroAssembler {
    asm: Assembler,
    config: MacroConfig,
    barrier_set: Arc<dyn BarrierSetAssembler>,
    npe_stub: Option<Label>,
    stop_messages: Vec<String>,
}

impl Deref for MacroAssembler {
    type Target = Assembler;

    fn deref(&self) -> &Assembler {
        &self.asm
    }
}

impl DerefMut for MacroAssembler {
    fn deref_mut(&mut self) -> &mut Assembler {
        &mut self.asm
    }
}

impl MacroAssembler {
    pub fn new(buf: CodeBuffer, config: MacroConfig, barrier_set: Arc<dyn BarrierSetAssembler>) -> Self {
        Self {
            asm: Assembler::new(buf),
            config,
            barrier_set,
            npe_stub: None,
            stop_messages: Vec::new(),
        }
    }

    pub fn config(&self) -> &MacroConfig {
        &self.config
    }

    pub fn compressed_oops(&self) -> Option<CompressedOops> {
        self.config.compressed_oops
    }

    /// Size of a heap reference slot.
    pub fn heap_oop_size(&self) -> i32 {
        if self.config.compressed_oops.is_some() { 4 } else { 8 }
    }

    /// log2 of [`heap_oop_size`](Self::heap_oop_size).
    pub fn log_heap_oop_size(&self) -> u32 {
        if self.config.compressed_oops.is_some() { 2 } else { 3 }
    }

    /// Label of the NullPointerException stub used by explicit null checks.
    pub fn set_npe_stub(&mut self, label: Label) {
        self.npe_stub = Some(label);
    }

    pub fn into_parts(self) -> (CodeBuffer, Vec<String>) {
        (self.asm.into_buffer(), self.stop_messages)
    }

    // ==================== Constants ====================

    /// Load a 64-bit immediate with the shortest sequence.
    pub fn li(&mut self, rd: Reg, imm: i64) {
        let lower = ((imm as i32) << 20) >> 20;
        let mut upper = imm - lower as i64;

        let is_32bit = (imm & !0x7FFF_FFFF) == 0 || (imm & !0x7FFF_FFFF) == !0x7FFF_FFFF;
        if !is_32bit {
            let mut shift = 12;
            while (upper >> shift) & 1 == 0 {
                shift += 1;
            }
            upper >>= shift;
            self.li(rd, upper);
            self.slli(rd, rd, shift);
            if lower != 0 {
                self.addi(rd, rd, lower);
            }
        } else {
            let mut hi = Reg::ZERO;
            if upper != 0 {
                self.lui(rd, (upper >> 12) as i32);
                hi = rd;
            }
            if lower != 0 || hi == Reg::ZERO {
                self.addiw(rd, hi, lower);
            }
        }
    }

    /// Load a 48-bit address with a fixed-length, patchable sequence.
    /// Returns the code offset of the sequence.
    pub fn movptr(&mut self, rd: Reg, addr: u64) -> usize {
        let start = self.offset();
        let imm64 = addr as i64;
        let imm = imm64 >> 17;
        let lower = (imm << 52) >> 52;
        let upper = (imm - lower) as i32;
        self.lui(rd, upper >> 12);
        self.addi(rd, rd, lower as i32);
        self.slli(rd, rd, 11);
        self.addi(rd, rd, ((imm64 >> 6) & 0x7FF) as i32);
        self.slli(rd, rd, 6);
        self.addi(rd, rd, (imm64 & 0x3F) as i32);
        start
    }

    pub fn mv_if_needed(&mut self, rd: Reg, rs: Reg) {
        if rd != rs {
            self.mv(rd, rs);
        }
    }

    /// `rd = rs + imm` for any immediate; uses `t0` when `imm` is large.
    pub fn add_imm(&mut self, rd: Reg, rs: Reg, imm: i64) {
        if is_simm12(imm) {
            self.addi(rd, rs, imm as i32);
        } else {
            debug_assert!(rs != Reg::T0);
            self.li(Reg::T0, imm);
            self.add(rd, rs, Reg::T0);
        }
    }

    /// `rd = rs1 + (rs2 << shift)`.
    pub fn shadd(&mut self, rd: Reg, rs2: Reg, rs1: Reg, tmp: Reg, shift: u32) {
        if shift == 0 {
            self.add(rd, rs1, rs2);
        } else {
            self.slli(tmp, rs2, shift);
            self.add(rd, rs1, tmp);
        }
    }

    pub fn round_up_to(&mut self, r: Reg, modulus: i32) {
        debug_assert!((modulus as u32).is_power_of_two());
        self.addi(r, r, modulus - 1);
        self.andi(r, r, !(modulus - 1));
    }

    pub fn round_down_to(&mut self, r: Reg, modulus: i32) {
        debug_assert!((modulus as u32).is_power_of_two());
        self.andi(r, r, !(modulus - 1));
    }

    pub fn sign_extend(&mut self, rd: Reg, rs: Reg, bits: u32) {
        match bits {
            32 => self.sext_w(rd, rs),
            64 => self.mv_if_needed(rd, rs),
            _ => {
                self.slli(rd, rs, 64 - bits);
                self.srai(rd, rd, 64 - bits);
            }
        }
    }

    pub fn zero_extend(&mut self, rd: Reg, rs: Reg, bits: u32) {
        match bits {
            8 => self.andi(rd, rs, 0xFF),
            64 => self.mv_if_needed(rd, rs),
            _ => {
                self.slli(rd, rs, 64 - bits);
                self.srli(rd, rd, 64 - bits);
            }
        }
    }

    // ==================== Memory ordering ====================

    pub fn membar(&mut self, barrier: Barrier) {
        barrier.emit(&mut self.asm);
    }

    pub fn acquire(&mut self) {
        self.membar(Barrier::Acquire);
    }

    pub fn release(&mut self) {
        self.membar(Barrier::Release);
    }

    pub fn full_fence(&mut self) {
        self.membar(Barrier::Fence);
    }

    /// Make code patched by another hart visible to this one before it runs.
    pub fn cross_modify_fence(&mut self) {
        self.asm.fence_i();
        self.membar(Barrier::LoadLoad);
    }

    // ==================== Null checks ====================

    /// Whether an access at `offset` from a null base may fault instead
    /// of being checked.
    pub fn needs_explicit_null_check(offset: i64) -> bool {
        offset < 0 || offset as u64 >= PROTECTED_PAGE_SIZE
    }

    pub fn null_check_kind(&self, offset: i64) -> NullCheckKind {
        if self.config.implicit_null_checks && !Self::needs_explicit_null_check(offset) {
            NullCheckKind::Implicit
        } else if self.config.trap_based_null_checks {
            NullCheckKind::Trap
        } else {
            NullCheckKind::Explicit
        }
    }

    /// Null check before an access at `offset` from `reg`.
    pub fn null_check(&mut self, reg: Reg, offset: i64) {
        match self.null_check_kind(offset) {
            NullCheckKind::Implicit => {}
            NullCheckKind::Trap => {
                let ok = self.new_label();
                self.bnez(reg, ok);
                self.ebreak();
                self.bind(ok);
            }
            NullCheckKind::Explicit => match self.npe_stub {
                Some(stub) => self.bc_far(Cond::Eq, reg, Reg::ZERO, stub),
                None => self.null_check_throw(reg, RuntimeEntry::ThrowNullPointerException.address()),
            },
        }
    }

    /// Unconditional explicit null check that jumps to `exception_entry`.
    pub fn null_check_throw(&mut self, reg: Reg, exception_entry: u64) {
        let ok = self.new_label();
        self.bnez(reg, ok);
        self.jump_to(exception_entry);
        self.bind(ok);
    }

    // ==================== Heap access ====================

    pub fn access_load_at(&mut self, ty: BasicType, decorators: Decorators, dst: AccessReg, base: Reg, offset: i32, tmp: Reg) {
        if decorators.contains(Decorators::AS_RAW) {
            super::barrier::raw_load_at(self, decorators, ty, dst, base, offset, tmp);
        } else {
            let bs = self.barrier_set.clone();
            bs.load_at(self, decorators, ty, dst, base, offset, tmp);
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn access_store_at(
        &mut self,
        ty: BasicType,
        decorators: Decorators,
        base: Reg,
        offset: i32,
        val: AccessReg,
        tmp1: Reg,
        tmp2: Reg,
    ) {
        if decorators.contains(Decorators::AS_RAW) {
            super::barrier::raw_store_at(self, decorators, ty, base, offset, val, tmp1);
        } else {
            let bs = self.barrier_set.clone();
            bs.store_at(self, decorators, ty, base, offset, val, tmp1, tmp2);
        }
    }

    pub fn load_heap_oop(&mut self, dst: Reg, base: Reg, offset: i32, tmp: Reg, decorators: Decorators) {
        self.access_load_at(
            BasicType::Object,
            Decorators::IN_HEAP | decorators,
            AccessReg::X(dst),
            base,
            offset,
            tmp,
        );
    }

    pub fn store_heap_oop(&mut self, base: Reg, offset: i32, val: Reg, tmp1: Reg, tmp2: Reg, decorators: Decorators) {
        self.access_store_at(
            BasicType::Object,
            Decorators::IN_HEAP | decorators,
            base,
            offset,
            AccessReg::X(val),
            tmp1,
            tmp2,
        );
    }

    /// `dst = klass of obj` (no null check).
    pub fn load_klass(&mut self, dst: Reg, obj: Reg) {
        self.ld(dst, obj, crate::runtime::layout::oop::KLASS);
    }

    // ==================== Compressed oops ====================

    pub fn encode_heap_oop_not_null(&mut self, d: Reg, s: Reg) {
        let Some(oops) = self.config.compressed_oops else {
            self.mv_if_needed(d, s);
            return;
        };
        let mut current = s;
        if oops.mode() == NarrowOopMode::HeapBased {
            self.li(Reg::T0, oops.base() as i64);
            self.sub(d, current, Reg::T0);
            current = d;
        }
        if oops.shift() != 0 {
            self.srli(d, current, oops.shift());
            current = d;
        }
        self.mv_if_needed(d, current);
    }

    /// Compress `s` into `d`; null stays null. Only the low 32 bits of
    /// the result are meaningful.
    pub fn encode_heap_oop(&mut self, d: Reg, s: Reg) {
        let Some(oops) = self.config.compressed_oops else {
            self.mv_if_needed(d, s);
            return;
        };
        if oops.mode() == NarrowOopMode::HeapBased {
            let is_null = self.new_label();
            self.mv_if_needed(d, s);
            self.beqz(d, is_null);
            self.encode_heap_oop_not_null(d, d);
            self.bind(is_null);
        } else {
            self.encode_heap_oop_not_null(d, s);
        }
    }

    pub fn decode_heap_oop_not_null(&mut self, d: Reg, s: Reg) {
        let Some(oops) = self.config.compressed_oops else {
            self.mv_if_needed(d, s);
            return;
        };
        let mut current = s;
        if oops.shift() != 0 {
            self.slli(d, current, oops.shift());
            current = d;
        }
        match oops.mode() {
            NarrowOopMode::HeapBased => {
                self.li(Reg::T0, oops.base() as i64);
                self.add(d, current, Reg::T0);
            }
            NarrowOopMode::Disjoint => {
                self.li(Reg::T0, oops.base() as i64);
                self.orr(d, current, Reg::T0);
            }
            _ => self.mv_if_needed(d, current),
        }
    }

    /// Expand the narrow oop in `s` into `d`; zero stays null.
    pub fn decode_heap_oop(&mut self, d: Reg, s: Reg) {
        let Some(oops) = self.config.compressed_oops else {
            self.mv_if_needed(d, s);
            return;
        };
        if oops.base() != 0 {
            let is_null = self.new_label();
            self.mv_if_needed(d, s);
            self.beqz(d, is_null);
            self.decode_heap_oop_not_null(d, d);
            self.bind(is_null);
        } else {
            self.decode_heap_oop_not_null(d, s);
        }
    }

    // ==================== Far branches ====================

    /// Conditional branch to a label at any distance within `jal` range.
    /// Always two instructions, so the site can be re-targeted or removed.
    pub fn bc_far(&mut self, cond: Cond, rs1: Reg, rs2: Reg, target: Label) {
        self.branch_offset(cond.negate(), rs1, rs2, 8);
        self.j(target);
    }

    pub fn beqz_far(&mut self, rs: Reg, target: Label) {
        self.bc_far(Cond::Eq, rs, Reg::ZERO, target);
    }

    pub fn bnez_far(&mut self, rs: Reg, target: Label) {
        self.bc_far(Cond::Ne, rs, Reg::ZERO, target);
    }

    // ==================== Calls ====================

    /// Jump to an absolute address (clobbers `t0`).
    pub fn jump_to(&mut self, addr: u64) {
        self.li(Reg::T0, addr as i64);
        self.jr(Reg::T0);
    }

    /// Call an absolute address (clobbers `t0` and `ra`).
    pub fn call_addr(&mut self, addr: u64) {
        self.li(Reg::T0, addr as i64);
        self.call_reg(Reg::T0);
    }

    pub fn call_runtime_leaf(&mut self, entry: RuntimeEntry) {
        self.call_addr(entry.address());
    }

    /// Fatal stop with a message reported by the runtime.
    pub fn stop(&mut self, msg: &str) {
        let id = self.stop_messages.len() as i64;
        self.stop_messages.push(msg.to_string());
        self.li(Reg::A1, id);
        self.call_runtime_leaf(RuntimeEntry::Stop);
    }

    pub fn should_not_reach_here(&mut self) {
        self.stop("should not reach here");
    }
}

// ==================== Patching already-emitted code ====================

fn word_at(code: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([code[offset], code[offset + 1], code[offset + 2], code[offset + 3]])
}

fn put_word(code: &mut [u8], offset: usize, word: u32) {
    code[offset..offset + 4].copy_from_slice(&word.to_le_bytes());
}

fn i_field(word: u32) -> i64 {
    ((word as i32) >> 20) as i64
}

fn with_i_field(word: u32, imm: i64) -> u32 {
    (word & 0x000F_FFFF) | ((imm as u32) & 0xFFF) << 20
}

/// Address materialized by the `movptr` sequence at `offset`.
pub fn movptr_target(code: &[u8], offset: usize) -> u64 {
    let lui = word_at(code, offset);
    let hi = ((lui & 0xFFFF_F000) as i32) as i64;
    let v = hi + i_field(word_at(code, offset + 4));
    let v = (v << 11) + i_field(word_at(code, offset + 12));
    let v = (v << 6) + i_field(word_at(code, offset + 20));
    v as u64
}

/// Re-target the `movptr` sequence at `offset`.
pub fn patch_movptr(code: &mut [u8], offset: usize, addr: u64) {
    let imm64 = addr as i64;
    let imm = imm64 >> 17;
    let lower = (imm << 52) >> 52;
    let upper = (imm - lower) as u32;

    let lui = word_at(code, offset);
    put_word(code, offset, (lui & 0xFFF) | (upper & 0xFFFF_F000));
    let w = word_at(code, offset + 4);
    put_word(code, offset + 4, with_i_field(w, lower));
    let w = word_at(code, offset + 12);
    put_word(code, offset + 12, with_i_field(w, (imm64 >> 6) & 0x7FF));
    let w = word_at(code, offset + 20);
    put_word(code, offset + 20, with_i_field(w, imm64 & 0x3F));
}

/// Classify the two-instruction branch site at `offset`.
pub fn classify_far_branch(code: &[u8], offset: usize) -> Option<FarBranchKind> {
    let first = word_at(code, offset);
    let second = word_at(code, offset + 4);
    if first == NOP && second == NOP {
        return Some(FarBranchKind::Nopped);
    }
    match (disasm::decode(first).ok()?, disasm::decode(second).ok()?) {
        (Inst::Branch { offset: 8, .. }, Inst::Jal { rd: Reg::X0, .. }) => Some(FarBranchKind::Far),
        (Inst::Branch { .. }, _) if second == NOP => Some(FarBranchKind::Near),
        _ => None,
    }
}

/// Destination of the branch site at `offset`, if it still branches.
pub fn far_branch_destination(code: &[u8], base: u64, offset: usize) -> Option<u64> {
    let pc = base + offset as u64;
    match classify_far_branch(code, offset)? {
        FarBranchKind::Near => match disasm::decode(word_at(code, offset)).ok()? {
            Inst::Branch { offset: rel, .. } => Some(pc.wrapping_add_signed(rel)),
            _ => None,
        },
        FarBranchKind::Far => match disasm::decode(word_at(code, offset + 4)).ok()? {
            Inst::Jal { offset: rel, .. } => Some((pc + 4).wrapping_add_signed(rel)),
            _ => None,
        },
        FarBranchKind::Nopped => None,
    }
}

/// Re-target the branch site at `offset`, choosing the near form when the
/// destination is within reach of a conditional branch. Returns false for
/// nopped or unrecognised sites.
pub fn set_far_branch_destination(code: &mut [u8], base: u64, offset: usize, dest: u64) -> bool {
    use super::codebuf::{encode_b_offset, encode_j_offset};

    let pc = base + offset as u64;
    let first = word_at(code, offset);
    let cond_word = match classify_far_branch(code, offset) {
        Some(FarBranchKind::Near) => first,
        // The far form stores the inverted condition.
        Some(FarBranchKind::Far) => first ^ (1 << 12),
        _ => return false,
    };
    let cond_bits = cond_word & 0x01FF_F07F;
    let rel = dest as i64 - pc as i64;
    if (-4096..4096).contains(&rel) {
        put_word(code, offset, cond_bits | encode_b_offset(rel as i32));
        put_word(code, offset + 4, NOP);
    } else {
        put_word(code, offset, (cond_bits ^ (1 << 12)) | encode_b_offset(8));
        put_word(code, offset + 4, encode_j_offset((rel - 4) as i32) | 0x6F);
    }
    true
}

/// Remove the branch at `offset`.
pub fn nop_far_branch(code: &mut [u8], offset: usize) {
    put_word(code, offset, NOP);
    put_word(code, offset + 4, NOP);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::barrier::CardTableBarrierSet;
    use crate::asm::riscv::Reg;

    fn masm(config: MacroConfig) -> MacroAssembler {
        MacroAssembler::new(CodeBuffer::new(0x1000), config, Arc::new(CardTableBarrierSet::new(0, 9)))
    }

    fn default_config() -> MacroConfig {
        MacroConfig {
            implicit_null_checks: true,
            trap_based_null_checks: false,
            compressed_oops: None,
        }
    }

    fn words(m: MacroAssembler) -> Vec<u32> {
        let (mut buf, _) = m.into_parts();
        buf.patch_forward_refs().unwrap();
        buf.code()
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_li_small_values() {
        let mut m = masm(default_config());
        m.li(Reg::A0, 0);
        m.li(Reg::A0, -1);
        m.li(Reg::A0, 0x1000);
        assert_eq!(
            words(m),
            vec![
                0x0000_051B, // addiw a0, zero, 0
                0xFFF0_051B, // addiw a0, zero, -1
                0x0000_1537, // lui a0, 0x1
            ]
        );
    }

    #[test]
    fn test_li_instruction_counts() {
        for (value, expected) in [
            (5i64, 1usize),
            (0x7FFF_FFFF, 2),
            (-0x8000_0000, 1),
            (0x1_0000_0000, 2),
            (0x10_2000_0000, 2),
        ] {
            let mut m = masm(default_config());
            m.li(Reg::A0, value);
            assert_eq!(words(m).len(), expected, "li {:#x}", value);
        }
    }

    #[test]
    fn test_movptr_is_fixed_length_and_patchable() {
        let mut m = masm(default_config());
        let at = m.movptr(Reg::A0, 0x0123_4567_89A8);
        let (mut buf, _) = m.into_parts();
        assert_eq!(buf.len(), MOVPTR_INSTRUCTIONS * 4);
        assert_eq!(movptr_target(buf.code(), at), 0x0123_4567_89A8);

        patch_movptr(buf.code_mut(), at, 0x0100_2000);
        assert_eq!(movptr_target(buf.code(), at), 0x0100_2000);
    }

    #[test]
    fn test_null_check_kinds() {
        let m = masm(default_config());
        assert_eq!(m.null_check_kind(8), NullCheckKind::Implicit);
        assert_eq!(m.null_check_kind(8192), NullCheckKind::Explicit);
        assert_eq!(m.null_check_kind(-8), NullCheckKind::Explicit);

        let m = masm(MacroConfig {
            implicit_null_checks: false,
            trap_based_null_checks: true,
            compressed_oops: None,
        });
        assert_eq!(m.null_check_kind(8), NullCheckKind::Trap);
    }

    #[test]
    fn test_memory_ordering() {
        let mut m = masm(default_config());
        m.acquire();
        m.release();
        m.full_fence();
        m.cross_modify_fence();
        assert_eq!(
            words(m),
            vec![
                0x0230_000F, // fence r,rw
                0x0310_000F, // fence rw,w
                0x0330_000F, // fence rw,rw
                0x0000_100F, // fence.i
                0x0220_000F, // fence r,r
            ]
        );
    }

    #[test]
    fn test_implicit_null_check_emits_nothing() {
        let mut m = masm(default_config());
        m.null_check(Reg::A0, 16);
        assert!(words(m).is_empty());
    }

    #[test]
    fn test_far_branch_classification() {
        let mut m = masm(default_config());
        let target = m.new_label();
        m.bc_far(Cond::Eq, Reg::A0, Reg::A1, target);
        m.bind(target);
        let (mut buf, _) = m.into_parts();
        buf.patch_forward_refs().unwrap();
        let base = buf.base();
        let code = buf.code_mut();

        assert_eq!(classify_far_branch(code, 0), Some(FarBranchKind::Far));
        assert_eq!(far_branch_destination(code, base, 0), Some(base + 8));

        assert!(set_far_branch_destination(code, base, 0, base + 0x40));
        assert_eq!(classify_far_branch(code, 0), Some(FarBranchKind::Near));
        assert_eq!(far_branch_destination(code, base, 0), Some(base + 0x40));
        match disasm::decode(word_at(code, 0)).unwrap() {
            Inst::Branch { cond, .. } => assert_eq!(cond, Cond::Eq),
            other => panic!("unexpected {:?}", other),
        }

        assert!(set_far_branch_destination(code, base, 0, base + 0x10_0000));
        assert_eq!(classify_far_branch(code, 0), Some(FarBranchKind::Far));
        assert_eq!(far_branch_destination(code, base, 0), Some(base + 0x10_0000));

        nop_far_branch(code, 0);
        assert_eq!(classify_far_branch(code, 0), Some(FarBranchKind::Nopped));
        assert_eq!(far_branch_destination(code, base, 0), None);
        assert!(!set_far_branch_destination(code, base, 0, base));
    }
}
