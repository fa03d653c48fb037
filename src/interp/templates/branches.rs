//! Conditional and unconditional branches, subroutines, switches and
//! returns.

use super::TemplateGen;
use crate::asm::{Cond, Reg};
use crate::interp::bytecodes::TosState;
use crate::interp::interp_masm::{DispatchKind, XBCP, XMETHOD, XTHREAD, XTOS};
use crate::runtime::{Barrier, RuntimeEntry};
use crate::runtime::layout::{AccessFlags, const_method, klass, method, thread};

impl TemplateGen<'_> {
    /// Jump by the offset operand. Backward branches poll for a safepoint.
    pub(super) fn take_branch(&mut self, is_jsr: bool, is_wide: bool) {
        if is_wide {
            self.load_s4_be(Reg::T2, XBCP, 1, Reg::T3);
        } else {
            self.get_s2_be_at_bcp(Reg::T2, 1, Reg::T3);
        }

        if is_jsr {
            // Push the bci of the next instruction as the return address.
            let length = if is_wide { 5 } else { 3 };
            self.ld(Reg::T1, XMETHOD, method::CONST_METHOD);
            self.addi(Reg::T1, Reg::T1, const_method::CODE);
            self.sub(Reg::T3, XBCP, Reg::T1);
            self.addi(Reg::T3, Reg::T3, length);
            self.push_i(Reg::T3);
            self.add(XBCP, XBCP, Reg::T2);
            self.dispatch_only(TosState::Vtos, DispatchKind::Normal);
            return;
        }

        let forward = self.new_label();
        self.add(XBCP, XBCP, Reg::T2);
        self.bgtz(Reg::T2, forward);
        self.dispatch_only(TosState::Vtos, DispatchKind::Poll);
        self.bind(forward);
        self.dispatch_only(TosState::Vtos, DispatchKind::Normal);
    }

    /// Compare `xtos` with zero.
    pub(super) fn if_0cmp(&mut self, cond: Cond) {
        let not_taken = self.new_label();
        self.branch(cond.negate(), XTOS, Reg::ZERO, not_taken);
        self.take_branch(false, false);
        self.bind(not_taken);
    }

    pub(super) fn if_icmp(&mut self, cond: Cond) {
        let not_taken = self.new_label();
        self.pop_i(Reg::T1);
        self.branch(cond.negate(), Reg::T1, XTOS, not_taken);
        self.take_branch(false, false);
        self.bind(not_taken);
    }

    pub(super) fn if_acmp(&mut self, cond: Cond) {
        let not_taken = self.new_label();
        self.pop_ptr(Reg::T1);
        self.branch(cond.negate(), Reg::T1, XTOS, not_taken);
        self.take_branch(false, false);
        self.bind(not_taken);
    }

    /// Return from a subroutine through the bci saved in a local.
    pub(super) fn jsr_ret(&mut self) {
        let wide = self.is_wide();
        self.get_local_index(Reg::T1, wide, Reg::T0);
        self.local_address(Reg::T1, Reg::T1);
        self.ld(Reg::T1, Reg::T1, 0);
        self.ld(XBCP, XMETHOD, method::CONST_METHOD);
        self.add(XBCP, XBCP, Reg::T1);
        self.addi(XBCP, XBCP, const_method::CODE);
        self.dispatch_only(TosState::Vtos, DispatchKind::Poll);
    }

    /// `T1` = operands of a switch, aligned to four bytes after the opcode.
    fn switch_operands(&mut self) {
        self.addi(Reg::T1, XBCP, 4);
        self.andi(Reg::T1, Reg::T1, -4);
    }

    /// Add the offset in `T5` to `xbcp` and dispatch.
    fn switch_dispatch(&mut self) {
        self.add(XBCP, XBCP, Reg::T5);
        self.dispatch_only(TosState::Vtos, DispatchKind::Poll);
    }

    pub(super) fn tableswitch(&mut self) {
        let default = self.new_label();
        let found = self.new_label();

        self.switch_operands();
        self.load_s4_be(Reg::T2, Reg::T1, 4, Reg::T6);
        self.load_s4_be(Reg::T3, Reg::T1, 8, Reg::T6);
        self.blt(XTOS, Reg::T2, default);
        self.bgt(XTOS, Reg::T3, default);

        self.sub(Reg::T2, XTOS, Reg::T2);
        self.shadd(Reg::T4, Reg::T2, Reg::T1, Reg::T4, 2);
        self.load_s4_be(Reg::T5, Reg::T4, 12, Reg::T6);
        self.j(found);

        self.bind(default);
        self.load_s4_be(Reg::T5, Reg::T1, 0, Reg::T6);

        self.bind(found);
        self.switch_dispatch();
    }

    /// Always replaced by one of the fast switches when a class is linked.
    pub(super) fn lookupswitch(&mut self) {
        self.stop("lookupswitch bytecode should have been rewritten");
    }

    pub(super) fn fast_linearswitch(&mut self) {
        let search = self.new_label();
        let entry = self.new_label();
        let found = self.new_label();
        let done = self.new_label();

        self.switch_operands();
        self.load_s4_be(Reg::T2, Reg::T1, 4, Reg::T6);
        self.j(entry);

        self.bind(search);
        self.shadd(Reg::T3, Reg::T2, Reg::T1, Reg::T3, 3);
        self.load_s4_be(Reg::T4, Reg::T3, 8, Reg::T6);
        self.beq(XTOS, Reg::T4, found);
        self.bind(entry);
        self.addi(Reg::T2, Reg::T2, -1);
        self.bgez(Reg::T2, search);

        self.load_s4_be(Reg::T5, Reg::T1, 0, Reg::T6);
        self.j(done);

        self.bind(found);
        self.load_s4_be(Reg::T5, Reg::T3, 12, Reg::T6);

        self.bind(done);
        self.switch_dispatch();
    }

    /// Binary search over the sorted match/offset pairs:
    ///
    /// ```text
    /// i = 0; j = npairs
    /// while i + 1 < j:
    ///     h = (i + j) / 2
    ///     if key < pairs[h].match: j = h else: i = h
    /// pairs[i].match == key ? pairs[i].offset : default
    /// ```
    pub(super) fn fast_binaryswitch(&mut self) {
        let search = self.new_label();
        let entry = self.new_label();
        let lower = self.new_label();
        let default = self.new_label();
        let done = self.new_label();

        self.switch_operands();
        self.load_s4_be(Reg::T3, Reg::T1, 4, Reg::T6);
        self.addi(Reg::T1, Reg::T1, 8);
        self.mv(Reg::T2, Reg::ZERO);
        self.j(entry);

        self.bind(search);
        self.add(Reg::T4, Reg::T2, Reg::T3);
        self.srai(Reg::T4, Reg::T4, 1);
        self.shadd(Reg::T5, Reg::T4, Reg::T1, Reg::T5, 3);
        self.load_s4_be(Reg::A1, Reg::T5, 0, Reg::T6);
        self.blt(XTOS, Reg::A1, lower);
        self.mv(Reg::T2, Reg::T4);
        self.j(entry);
        self.bind(lower);
        self.mv(Reg::T3, Reg::T4);

        self.bind(entry);
        self.addi(Reg::T4, Reg::T2, 1);
        self.blt(Reg::T4, Reg::T3, search);

        // Tables with no pairs have nothing at index 0.
        self.beqz(Reg::T3, default);
        self.shadd(Reg::T4, Reg::T2, Reg::T1, Reg::T4, 3);
        self.load_s4_be(Reg::A1, Reg::T4, 0, Reg::T6);
        self.bne(XTOS, Reg::A1, default);
        self.load_s4_be(Reg::T5, Reg::T4, 4, Reg::T6);
        self.j(done);

        self.bind(default);
        self.load_s4_be(Reg::T5, Reg::T1, -8, Reg::T6);

        self.bind(done);
        self.switch_dispatch();
    }

    /// Returns of every kind. `return_register_finalizer` registers the
    /// receiver of `Object.<init>` when its class has a finalizer; the
    /// other returns poll for a safepoint first. Void returns order the
    /// stores of a constructor before the caller can publish the object.
    pub(super) fn return_entry(&mut self, state: TosState) {
        let imse = self.stubs().illegal_monitor_state;

        if self.bytecode() == crate::interp::bytecodes::Bytecode::ReturnRegisterFinalizer {
            let skip = self.new_label();
            self.aload_n(0);
            self.load_klass(Reg::T1, XTOS);
            self.lwu(Reg::T1, Reg::T1, klass::ACCESS_FLAGS);
            self.li(Reg::T2, AccessFlags::HAS_FINALIZER.bits() as i64);
            self.andr(Reg::T1, Reg::T1, Reg::T2);
            self.beqz(Reg::T1, skip);
            self.mv(Reg::A1, XTOS);
            self.call_vm(RuntimeEntry::RegisterFinalizer);
            self.bind(skip);
        } else {
            let no_safepoint = self.new_label();
            self.ld(Reg::T1, XTHREAD, thread::POLLING_WORD);
            self.andi(Reg::T1, Reg::T1, thread::POLL_BIT as i32);
            self.beqz(Reg::T1, no_safepoint);
            self.push(state);
            self.call_vm(RuntimeEntry::AtSafepoint);
            self.pop(state);
            self.bind(no_safepoint);
        }

        if state == TosState::Vtos {
            self.membar(Barrier::StoreStore);
        }
        self.remove_activation(state, imse);
    }
}
