//! Interpreter-specific code emission.
//!
//! Fixed register assignment of generated interpreter code:
//!
//! | register | role |
//! |----------|------|
//! | `x8`  (fp) | frame pointer |
//! | `x19` | base of the normal dispatch tables |
//! | `x20` | volatile bit of the field being accessed, survives calls |
//! | `x21` | original bytecode under a breakpoint |
//! | `x22` | bytecode pointer |
//! | `x23` | expression stack pointer (first free slot) |
//! | `x24` | current thread |
//! | `x25` | cached top of stack (integers and references) |
//! | `x26` | locals base (local 0) |
//! | `x27` | current method |
//! | `f23` | cached top of stack (floats) |
//!
//! Calls into the runtime clobber `a0`, `t0` and `ra` and nothing else.

use std::ops::{Deref, DerefMut};

use crate::asm::riscv::{FReg, Reg};
use crate::asm::{Label, MacroAssembler};
use crate::interp::bytecodes::TosState;
use crate::runtime::RuntimeEntry;
use crate::runtime::layout::{
    AccessFlags, InitState, constant_pool, cp_cache as cache_layout, frame, klass, method, oop, thread,
};

pub const XDISPATCH: Reg = Reg::X19;
pub const XVOLATILE: Reg = Reg::X20;
pub const XORIGINAL_BC: Reg = Reg::X21;
pub const XBCP: Reg = Reg::X22;
pub const XESP: Reg = Reg::X23;
pub const XTHREAD: Reg = Reg::X24;
pub const XTOS: Reg = Reg::X25;
pub const XLOCALS: Reg = Reg::X26;
pub const XMETHOD: Reg = Reg::X27;
pub const FTOS: FReg = FReg::FS7;

/// Layout of the tables placed at the start of the interpreter code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchTables {
    base: u64,
}

impl DispatchTables {
    /// Entries per TOS-state.
    pub const LENGTH: u64 = 256;
    const STATE_SIZE: u64 = Self::LENGTH * 8;
    const TABLE_SIZE: u64 = TosState::COUNT as u64 * Self::STATE_SIZE;

    pub const SAFEPOINT_OFFSET: u64 = Self::TABLE_SIZE;
    pub const WIDE_OFFSET: u64 = 2 * Self::TABLE_SIZE;
    pub const RETURN_3_OFFSET: u64 = Self::WIDE_OFFSET + Self::STATE_SIZE;
    pub const RETURN_5_OFFSET: u64 = Self::RETURN_3_OFFSET + TosState::COUNT as u64 * 8;
    /// Total size; generated code follows.
    pub const SIZE: u64 = Self::RETURN_5_OFFSET + TosState::COUNT as u64 * 8;

    pub fn new(base: u64) -> Self {
        Self { base }
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    /// Normal table for `state`; `XDISPATCH` holds `normal(Btos)`.
    pub fn normal(&self, state: TosState) -> u64 {
        self.base + state as u64 * Self::STATE_SIZE
    }

    pub fn safepoint(&self, state: TosState) -> u64 {
        self.base + Self::SAFEPOINT_OFFSET + state as u64 * Self::STATE_SIZE
    }

    pub fn wide(&self) -> u64 {
        self.base + Self::WIDE_OFFSET
    }

    /// Return entries of invokes of `length` bytes, indexed by result state.
    pub fn invoke_return(&self, length: usize) -> u64 {
        match length {
            5 => self.base + Self::RETURN_5_OFFSET,
            _ => self.base + Self::RETURN_3_OFFSET,
        }
    }

    /// Address of the table slot for `bc` in the normal table of `state`.
    pub fn normal_slot(&self, state: TosState, bc: u8) -> u64 {
        self.normal(state) + bc as u64 * 8
    }

    pub fn safepoint_slot(&self, state: TosState, bc: u8) -> u64 {
        self.safepoint(state) + bc as u64 * 8
    }
}

/// Which dispatch table a dispatch goes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchKind {
    Normal,
    /// Poll the thread's safepoint word first and divert to the
    /// safepoint table when it is armed.
    Poll,
}

/// `ijava_state` slot offset from `fp`.
pub const fn fp_slot(field: i32) -> i32 {
    frame::ijava(field)
}

/// Offset of the oldest monitor's object field from `fp`.
const MONITOR_LIMIT: i32 = -(frame::HEADER_SIZE + frame::MONITOR_SIZE) + frame::MONITOR_OBJ;

pub struct InterpreterMacroAssembler {
    masm: MacroAssembler,
    tables: DispatchTables,
}

impl Deref for InterpreterMacroAssembler {
    type Target = MacroAssembler;

    fn deref(&self) -> &MacroAssembler {
        &self.masm
    }
}

impl DerefMut for InterpreterMacroAssembler {
    fn deref_mut(&mut self) -> &mut MacroAssembler {
        &mut self.masm
    }
}

impl InterpreterMacroAssembler {
    pub fn new(masm: MacroAssembler, tables: DispatchTables) -> Self {
        Self { masm, tables }
    }

    pub fn tables(&self) -> DispatchTables {
        self.tables
    }

    pub fn into_inner(self) -> MacroAssembler {
        self.masm
    }

    // ==================== Frame slots ====================

    pub fn save_bcp(&mut self) {
        self.sd(XBCP, Reg::FP, fp_slot(frame::BCP));
    }

    pub fn restore_bcp(&mut self) {
        self.ld(XBCP, Reg::FP, fp_slot(frame::BCP));
    }

    pub fn save_esp(&mut self) {
        self.sd(XESP, Reg::FP, fp_slot(frame::ESP));
    }

    pub fn restore_esp(&mut self) {
        self.ld(XESP, Reg::FP, fp_slot(frame::ESP));
    }

    pub fn restore_locals(&mut self) {
        self.ld(XLOCALS, Reg::FP, fp_slot(frame::LOCALS));
    }

    pub fn restore_method(&mut self) {
        self.ld(XMETHOD, Reg::FP, fp_slot(frame::METHOD));
    }

    pub fn get_cpool_cache(&mut self, dst: Reg) {
        self.ld(dst, Reg::FP, fp_slot(frame::CPOOL_CACHE));
    }

    pub fn get_constant_pool(&mut self, dst: Reg) {
        self.get_cpool_cache(dst);
        self.ld(dst, dst, cache_layout::CONSTANT_POOL);
    }

    pub fn get_monitors(&mut self, dst: Reg) {
        self.ld(dst, Reg::FP, fp_slot(frame::MONITORS));
    }

    pub fn set_monitors(&mut self, src: Reg) {
        self.sd(src, Reg::FP, fp_slot(frame::MONITORS));
    }

    // ==================== Bytecode stream ====================

    /// Unsigned 16-bit native-order operand at `xbcp + offset`.
    pub fn get_u2_native_at_bcp(&mut self, dst: Reg, offset: i32, tmp: Reg) {
        self.lbu(dst, XBCP, offset);
        self.lbu(tmp, XBCP, offset + 1);
        self.slli(tmp, tmp, 8);
        self.orr(dst, dst, tmp);
    }

    /// Unsigned 16-bit big-endian operand (constant pool indices).
    pub fn get_u2_be_at_bcp(&mut self, dst: Reg, offset: i32, tmp: Reg) {
        self.lbu(dst, XBCP, offset);
        self.lbu(tmp, XBCP, offset + 1);
        self.slli(dst, dst, 8);
        self.orr(dst, dst, tmp);
    }

    /// Signed 16-bit big-endian operand (branch offsets, `sipush`).
    pub fn get_s2_be_at_bcp(&mut self, dst: Reg, offset: i32, tmp: Reg) {
        self.lb(dst, XBCP, offset);
        self.lbu(tmp, XBCP, offset + 1);
        self.slli(dst, dst, 8);
        self.orr(dst, dst, tmp);
    }

    /// Signed 32-bit big-endian value at `base + offset`.
    pub fn load_s4_be(&mut self, dst: Reg, base: Reg, offset: i32, tmp: Reg) {
        debug_assert!(dst != base && tmp != base && dst != tmp);
        self.lb(dst, base, offset);
        for i in 1..4 {
            self.slli(dst, dst, 8);
            self.lbu(tmp, base, offset + i);
            self.orr(dst, dst, tmp);
        }
    }

    /// Local index operand: `u1` normally, `u2` big-endian after `wide`.
    pub fn get_local_index(&mut self, dst: Reg, wide: bool, tmp: Reg) {
        if wide {
            self.get_u2_be_at_bcp(dst, 2, tmp);
        } else {
            self.lbu(dst, XBCP, 1);
        }
    }

    /// `dst = &local[index]`.
    pub fn local_address(&mut self, dst: Reg, index: Reg) {
        self.slli(dst, index, 3);
        self.sub(dst, XLOCALS, dst);
    }

    /// `cache` points at the cache entry of the `u2` operand at
    /// `xbcp + bcp_offset`, minus the cache header, so that entry fields
    /// are at `cache + BASE + field`.
    pub fn get_cache_and_index_at_bcp(&mut self, cache: Reg, index: Reg, bcp_offset: i32) {
        self.get_u2_native_at_bcp(index, bcp_offset, Reg::T0);
        self.get_cpool_cache(cache);
        self.slli(index, index, cache_layout::ENTRY_SIZE_LOG2);
        self.add(cache, cache, index);
    }

    /// Offset of a field of the entry addressed by
    /// [`get_cache_and_index_at_bcp`](Self::get_cache_and_index_at_bcp).
    pub const fn cache_field(field: i32) -> i32 {
        cache_layout::BASE + field
    }

    /// `dst = resolved_references[index]`.
    pub fn load_resolved_reference_at_index(&mut self, dst: Reg, index: Reg) {
        debug_assert!(dst != index);
        self.get_constant_pool(dst);
        self.ld(dst, dst, constant_pool::RESOLVED_REFERENCES);
        self.shadd(dst, index, dst, Reg::T0, 3);
        self.ld(dst, dst, constant_pool::ARRAY_DATA);
    }

    // ==================== Expression stack ====================

    pub fn push_i(&mut self, r: Reg) {
        self.sd(r, XESP, 0);
        self.addi(XESP, XESP, -8);
    }

    pub fn push_ptr(&mut self, r: Reg) {
        self.sd(r, XESP, 0);
        self.addi(XESP, XESP, -8);
    }

    /// Longs and doubles live in the lower of their two slots.
    pub fn push_l(&mut self, r: Reg) {
        self.sd(r, XESP, -8);
        self.addi(XESP, XESP, -16);
    }

    pub fn push_f(&mut self, f: FReg) {
        self.fsw(f, XESP, 0);
        self.addi(XESP, XESP, -8);
    }

    pub fn push_d(&mut self, f: FReg) {
        self.fsd(f, XESP, -8);
        self.addi(XESP, XESP, -16);
    }

    pub fn pop_i(&mut self, r: Reg) {
        self.lw(r, XESP, 8);
        self.addi(XESP, XESP, 8);
    }

    pub fn pop_ptr(&mut self, r: Reg) {
        self.ld(r, XESP, 8);
        self.addi(XESP, XESP, 8);
    }

    pub fn pop_l(&mut self, r: Reg) {
        self.ld(r, XESP, 8);
        self.addi(XESP, XESP, 16);
    }

    pub fn pop_f(&mut self, f: FReg) {
        self.flw(f, XESP, 8);
        self.addi(XESP, XESP, 8);
    }

    pub fn pop_d(&mut self, f: FReg) {
        self.fld(f, XESP, 8);
        self.addi(XESP, XESP, 16);
    }

    /// Spill the cached top of stack.
    pub fn push(&mut self, state: TosState) {
        match state {
            TosState::Btos | TosState::Ztos | TosState::Ctos | TosState::Stos | TosState::Itos => self.push_i(XTOS),
            TosState::Ltos => self.push_l(XTOS),
            TosState::Ftos => self.push_f(FTOS),
            TosState::Dtos => self.push_d(FTOS),
            TosState::Atos => self.push_ptr(XTOS),
            TosState::Vtos => {}
        }
    }

    /// Load the top of stack into the cache register.
    pub fn pop(&mut self, state: TosState) {
        match state {
            TosState::Btos | TosState::Ztos | TosState::Ctos | TosState::Stos | TosState::Itos => self.pop_i(XTOS),
            TosState::Ltos => self.pop_l(XTOS),
            TosState::Ftos => self.pop_f(FTOS),
            TosState::Dtos => self.pop_d(FTOS),
            TosState::Atos => self.pop_ptr(XTOS),
            TosState::Vtos => {}
        }
    }

    /// `recv` = the receiver of a call with `nparams` parameter slots.
    pub fn load_receiver(&mut self, nparams: Reg, recv: Reg) {
        self.shadd(recv, nparams, XESP, Reg::T0, 3);
        self.ld(recv, recv, 0);
    }

    // ==================== Dispatch ====================

    /// Jump through `table_offset + state` of the dispatch tables with the
    /// bytecode in `bc` (clobbered).
    fn dispatch_base(&mut self, state: TosState, table_offset: u64, bc: Reg) {
        self.slli(bc, bc, 3);
        self.add(bc, bc, XDISPATCH);
        self.add_imm(bc, bc, (table_offset + state as u64 * DispatchTables::LENGTH * 8) as i64);
        self.ld(bc, bc, 0);
        self.jr(bc);
    }

    fn dispatch_with_kind(&mut self, state: TosState, kind: DispatchKind) {
        match kind {
            DispatchKind::Normal => self.dispatch_base(state, 0, Reg::T1),
            DispatchKind::Poll => {
                let no_poll = self.new_label();
                self.ld(Reg::T2, XTHREAD, thread::POLLING_WORD);
                self.andi(Reg::T2, Reg::T2, thread::POLL_BIT as i32);
                self.beqz(Reg::T2, no_poll);
                self.dispatch_base(state, DispatchTables::SAFEPOINT_OFFSET, Reg::T1);
                self.bind(no_poll);
                self.dispatch_base(state, 0, Reg::T1);
            }
        }
    }

    /// Advance `xbcp` by `step` and dispatch the bytecode found there.
    pub fn dispatch_next(&mut self, state: TosState, step: i32, kind: DispatchKind) {
        self.lbu(Reg::T1, XBCP, step);
        if step != 0 {
            self.addi(XBCP, XBCP, step);
        }
        self.dispatch_with_kind(state, kind);
    }

    /// Dispatch the bytecode at the current `xbcp`.
    pub fn dispatch_only(&mut self, state: TosState, kind: DispatchKind) {
        self.dispatch_next(state, 0, kind);
    }

    /// Dispatch `bc` (a register) without reading the bytecode stream.
    pub fn dispatch_only_normal_with(&mut self, state: TosState, bc: Reg) {
        self.mv_if_needed(Reg::T1, bc);
        self.dispatch_base(state, 0, Reg::T1);
    }

    /// End of a template that does not dispatch itself.
    pub fn dispatch_epilog(&mut self, state: TosState, step: i32) {
        self.dispatch_next(state, step, DispatchKind::Normal);
    }

    // ==================== Runtime calls ====================

    /// Call a runtime entry with the interpreter state made walkable.
    /// Arguments go in `a1..a3`; `a0` carries the thread and comes back
    /// with the result. A pending exception is forwarded.
    pub fn call_vm(&mut self, entry: RuntimeEntry) {
        self.save_bcp();
        self.save_esp();
        self.sd(Reg::SP, XTHREAD, thread::LAST_JAVA_SP);
        self.sd(Reg::FP, XTHREAD, thread::LAST_JAVA_FP);
        self.mv(Reg::A0, XTHREAD);
        self.call_runtime_leaf(entry);
        self.sd(Reg::ZERO, XTHREAD, thread::LAST_JAVA_SP);
        self.sd(Reg::ZERO, XTHREAD, thread::LAST_JAVA_FP);

        let no_exception = self.new_label();
        self.ld(Reg::T0, XTHREAD, thread::PENDING_EXCEPTION);
        self.beqz(Reg::T0, no_exception);
        self.jump_to(RuntimeEntry::ForwardException.address());
        self.bind(no_exception);
        self.restore_bcp();
    }

    /// Oop result of the last runtime call.
    pub fn get_vm_result(&mut self, dst: Reg) {
        self.ld(dst, XTHREAD, thread::VM_RESULT);
        self.sd(Reg::ZERO, XTHREAD, thread::VM_RESULT);
    }

    /// Metadata result of the last runtime call.
    pub fn get_vm_result_2(&mut self, dst: Reg) {
        self.ld(dst, XTHREAD, thread::VM_RESULT_2);
        self.sd(Reg::ZERO, XTHREAD, thread::VM_RESULT_2);
    }

    /// Branch to `slow` when the thread's safepoint word is armed.
    pub fn safepoint_poll(&mut self, tmp: Reg, slow: Label) {
        self.ld(tmp, XTHREAD, thread::POLLING_WORD);
        self.andi(tmp, tmp, thread::POLL_BIT as i32);
        self.bnez(tmp, slow);
    }

    // ==================== Type checks ====================

    /// Branch to `ok` if `sub` is a subtype of `sup`; fall through
    /// otherwise. Clobbers `tmp1`, `tmp2` and `t0`.
    pub fn check_klass_subtype(&mut self, sub: Reg, sup: Reg, tmp1: Reg, tmp2: Reg, ok: Label) {
        let fail = self.new_label();
        self.beq(sub, sup, ok);

        // Primary supers display, or the secondary super cache.
        self.lwu(tmp1, sup, klass::SUPER_CHECK_OFFSET);
        self.add(tmp2, sub, tmp1);
        self.ld(tmp2, tmp2, 0);
        self.beq(tmp2, sup, ok);
        self.li(tmp2, klass::SECONDARY_SUPER_CACHE as i64);
        self.bne(tmp1, tmp2, fail);

        // Linear scan of the secondary supers.
        let scan = self.new_label();
        self.ld(tmp1, sub, klass::SECONDARY_SUPERS);
        self.lwu(tmp2, tmp1, constant_pool::ARRAY_LENGTH);
        self.addi(tmp1, tmp1, constant_pool::ARRAY_DATA);
        self.bind(scan);
        self.beqz(tmp2, fail);
        self.ld(Reg::T0, tmp1, 0);
        self.addi(tmp1, tmp1, 8);
        self.addi(tmp2, tmp2, -1);
        self.bne(Reg::T0, sup, scan);
        self.sd(sup, sub, klass::SECONDARY_SUPER_CACHE);
        self.j(ok);

        self.bind(fail);
    }

    /// Find `intf` in the itable of `recv_klass`. With an `itable_index`
    /// the method at that index is loaded into `method_result`; without
    /// one this only checks that the receiver implements `intf`.
    /// Branches to `not_found` when the interface is missing.
    #[allow(clippy::too_many_arguments)]
    pub fn lookup_interface_method(
        &mut self,
        recv_klass: Reg,
        intf: Reg,
        itable_index: Option<Reg>,
        method_result: Reg,
        scan: Reg,
        tmp: Reg,
        not_found: Label,
    ) {
        let search = self.new_label();
        let found = self.new_label();

        // scan = first itable offset entry, after the vtable.
        self.lwu(scan, recv_klass, klass::VTABLE_LENGTH);
        self.slli(scan, scan, 3);
        self.add(scan, scan, recv_klass);
        self.addi(scan, scan, klass::VTABLE_START);

        self.bind(search);
        self.ld(tmp, scan, klass::ITABLE_INTERFACE);
        self.beq(tmp, intf, found);
        self.beqz(tmp, not_found);
        self.addi(scan, scan, klass::ITABLE_OFFSET_ENTRY_SIZE);
        self.j(search);

        self.bind(found);
        if let Some(index) = itable_index {
            self.lwu(tmp, scan, klass::ITABLE_OFFSET);
            self.add(tmp, tmp, recv_klass);
            self.shadd(tmp, index, tmp, method_result, 3);
            self.ld(method_result, tmp, 0);
        }
    }

    /// Continue at `ok` when `klass_reg` is initialized or being
    /// initialized by this thread; fall through to the slow path otherwise.
    pub fn clinit_barrier(&mut self, klass_reg: Reg, tmp: Reg, ok: Label) {
        self.lwu(tmp, klass_reg, klass::INIT_STATE);
        self.addi(tmp, tmp, -(InitState::FullyInitialized as i32));
        self.beqz(tmp, ok);
        self.ld(tmp, klass_reg, klass::INIT_THREAD);
        self.beq(tmp, XTHREAD, ok);
    }

    /// Throw ArrayIndexOutOfBounds via `stub` unless `index < length`.
    /// The stub expects the array in `a1` and the index in `a2`.
    pub fn index_check(&mut self, array: Reg, index: Reg, tmp: Reg, stub: Label) {
        let ok = self.new_label();
        self.null_check(array, oop::ARRAY_LENGTH as i64);
        self.lwu(tmp, array, oop::ARRAY_LENGTH);
        self.bltu(index, tmp, ok);
        self.mv(Reg::A1, array);
        self.mv(Reg::A2, index);
        self.j(stub);
        self.bind(ok);
    }

    // ==================== Monitors ====================

    /// Lock the object stored in the monitor at `entry`.
    pub fn lock_object(&mut self, entry: Reg) {
        self.mv(Reg::A1, entry);
        self.call_vm(RuntimeEntry::MonitorEnter);
    }

    /// Unlock the monitor at `entry` (preserved) and free the slot.
    pub fn unlock_object(&mut self, entry: Reg) {
        debug_assert!(entry != Reg::A0 && entry != Reg::T0);
        self.mv(Reg::A1, entry);
        self.call_vm(RuntimeEntry::MonitorExit);
        self.sd(Reg::ZERO, entry, frame::MONITOR_OBJ);
    }

    /// Offset from `fp` of the object field of the oldest monitor.
    pub const fn monitor_limit() -> i32 {
        MONITOR_LIMIT
    }

    // ==================== Calls and returns ====================

    /// Enter `method` with the return entry in `ret`.
    pub fn call_from_interpreter(&mut self, method_reg: Reg, ret: Reg) {
        self.save_bcp();
        self.save_esp();
        self.mv_if_needed(XMETHOD, method_reg);
        self.mv_if_needed(Reg::RA, ret);
        self.ld(Reg::T1, XMETHOD, method::FROM_INTERPRETED_ENTRY);
        self.jr(Reg::T1);
    }

    /// Tear down the current frame, keeping the result in the TOS
    /// registers, and return to the caller. Monitors still held are an
    /// illegal monitor state; a synchronized method releases its own.
    pub fn remove_activation(&mut self, state: TosState, illegal_monitor_state: Label) {
        let unlocked = self.new_label();
        let not_synchronized = self.new_label();

        // Release the method's own monitor.
        self.lwu(Reg::T1, XMETHOD, method::ACCESS_FLAGS);
        self.andi(Reg::T1, Reg::T1, AccessFlags::SYNCHRONIZED.bits() as i32);
        self.beqz(Reg::T1, not_synchronized);
        self.addi(Reg::T2, Reg::FP, MONITOR_LIMIT - frame::MONITOR_OBJ);
        self.ld(Reg::T1, Reg::T2, frame::MONITOR_OBJ);
        self.beqz_far(Reg::T1, illegal_monitor_state);
        self.unlock_object(Reg::T2);
        self.bind(not_synchronized);

        // Every other monitor must have been released already.
        let check = self.new_label();
        self.get_monitors(Reg::T2);
        self.addi(Reg::T3, Reg::FP, MONITOR_LIMIT);
        self.addi(Reg::T2, Reg::T2, frame::MONITOR_OBJ);
        self.bind(check);
        self.bgt(Reg::T2, Reg::T3, unlocked);
        self.ld(Reg::T1, Reg::T2, 0);
        self.bnez_far(Reg::T1, illegal_monitor_state);
        self.addi(Reg::T2, Reg::T2, frame::MONITOR_SIZE);
        self.j(check);
        self.bind(unlocked);

        // The result travels in a0/fa0 as well as in the TOS registers.
        match state {
            TosState::Ftos => self.fmv(false, FReg::FA0, FTOS),
            TosState::Dtos => self.fmv(true, FReg::FA0, FTOS),
            TosState::Vtos => {}
            _ => self.mv(Reg::A0, XTOS),
        }

        // Pop the arguments and the frame.
        self.mv(XESP, XLOCALS);
        self.ld(Reg::T1, Reg::FP, fp_slot(frame::SENDER_SP));
        self.ld(Reg::RA, Reg::FP, frame::RETURN_ADDRESS);
        self.ld(Reg::FP, Reg::FP, frame::LINK);
        self.mv(Reg::SP, Reg::T1);
        self.ret();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::barrier::NoBarrierSet;
    use crate::asm::codebuf::CodeBuffer;
    use crate::asm::disasm::{self, Inst};
    use crate::asm::macro_asm::MacroConfig;
    use std::sync::Arc;

    fn masm() -> InterpreterMacroAssembler {
        let config = MacroConfig {
            implicit_null_checks: true,
            trap_based_null_checks: false,
            compressed_oops: None,
        };
        let masm = MacroAssembler::new(CodeBuffer::new(0x1000), config, Arc::new(NoBarrierSet));
        InterpreterMacroAssembler::new(masm, DispatchTables::new(0x10_0000))
    }

    fn decode_all(masm: InterpreterMacroAssembler) -> Vec<Inst> {
        let (mut buf, _) = masm.into_inner().into_parts();
        buf.patch_forward_refs().unwrap();
        buf.code()
            .chunks(4)
            .map(|c| disasm::decode(u32::from_le_bytes([c[0], c[1], c[2], c[3]])).unwrap())
            .collect()
    }

    #[test]
    fn test_table_layout() {
        let tables = DispatchTables::new(0x10_0000);
        assert_eq!(tables.normal(TosState::Vtos) - tables.normal(TosState::Btos), 9 * 2048);
        assert_eq!(tables.safepoint(TosState::Btos) - tables.base(), 20480);
        assert_eq!(tables.wide() - tables.base(), 40960);
        assert_eq!(tables.normal_slot(TosState::Itos, 0x60), tables.base() + 4 * 2048 + 0x60 * 8);
        assert_ne!(tables.invoke_return(3), tables.invoke_return(5));
        assert_eq!(DispatchTables::SIZE % 16, 0);
    }

    #[test]
    fn test_long_push_uses_lower_slot() {
        let mut m = masm();
        m.push_l(XTOS);
        let insts = decode_all(m);
        assert_eq!(
            insts[0],
            Inst::Store {
                width: disasm::Width::D,
                rs1: XESP,
                rs2: XTOS,
                offset: -8
            }
        );
    }

    #[test]
    fn test_push_pop_are_balanced() {
        for state in TosState::ALL {
            let mut m = masm();
            m.push(state);
            m.pop(state);
            let delta: i64 = decode_all(m)
                .iter()
                .filter_map(|inst| match inst {
                    Inst::OpImm { rd, imm, .. } if *rd == XESP => Some(*imm),
                    _ => None,
                })
                .sum();
            assert_eq!(delta, 0, "{}", state.name());
        }
    }

    #[test]
    fn test_call_vm_syncs_frame_and_checks_exception() {
        let mut m = masm();
        m.call_vm(RuntimeEntry::New);
        let insts = decode_all(m);
        let stores: Vec<i64> = insts
            .iter()
            .filter_map(|inst| match inst {
                Inst::Store { rs1, offset, .. } if *rs1 == Reg::FP => Some(*offset),
                _ => None,
            })
            .collect();
        assert!(stores.contains(&(fp_slot(frame::BCP) as i64)));
        assert!(stores.contains(&(fp_slot(frame::ESP) as i64)));
        assert!(insts.iter().any(|inst| matches!(
            inst,
            Inst::Load { rs1, offset, .. } if *rs1 == XTHREAD && *offset == thread::PENDING_EXCEPTION as i64
        )));
    }
}
