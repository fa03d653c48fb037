//! Method invocation.
//!
//! Every invoke resolves its cache entry, finds the callee and enters it
//! with `ra` pointing at the invoke return entry for the callee's result
//! state. The return entry restores the caller's registers and dispatches
//! the bytecode after the invoke.

use super::TemplateGen;
use crate::asm::Reg;
use crate::interp::bytecodes::Bytecode;
use crate::interp::cp_cache::{self, F1, F2, FLAGS, PARAMETER_SIZE_MASK, TOS_STATE_MASK, shift};
use crate::interp::interp_masm::{DispatchTables, InterpreterMacroAssembler, XDISPATCH};
use crate::runtime::layout::{klass, method, oop};

const CACHE: Reg = Reg::T2;
const METHOD: Reg = Reg::T3;
const FLAGS_REG: Reg = Reg::T4;
const RECV: Reg = Reg::A2;
const INTERFACE: Reg = Reg::A3;

const fn entry_field(field: i32) -> i32 {
    InterpreterMacroAssembler::cache_field(field)
}

impl TemplateGen<'_> {
    /// Resolve the entry and load the callee (`f1`, or `f2` for
    /// `load_f2`) into `METHOD` and the flags into `FLAGS_REG`. Pushes the
    /// appendix of `invokedynamic`/`invokehandle` and loads the receiver
    /// into `RECV` when asked; the appendix counts as a parameter so it
    /// goes first.
    fn prepare_invoke(&mut self, load_f2: bool, load_receiver: bool) {
        let bc = self.bytecode();
        self.resolve_cache_and_index(cp_cache::byte_no(bc), CACHE, METHOD);

        self.ld(FLAGS_REG, CACHE, entry_field(FLAGS));
        if bc == Bytecode::Invokeinterface {
            self.ld(INTERFACE, CACHE, entry_field(F1));
        }

        if matches!(bc, Bytecode::Invokedynamic | Bytecode::Invokehandle) {
            let no_appendix = self.new_label();
            self.srli(Reg::T5, FLAGS_REG, shift::HAS_APPENDIX);
            self.andi(Reg::T5, Reg::T5, 1);
            self.beqz(Reg::T5, no_appendix);
            self.ld(Reg::T5, CACHE, entry_field(F2));
            self.load_resolved_reference_at_index(Reg::T6, Reg::T5);
            self.push_ptr(Reg::T6);
            self.bind(no_appendix);
        }

        self.ld(METHOD, CACHE, entry_field(if load_f2 { F2 } else { F1 }));

        if load_receiver {
            self.andi(RECV, FLAGS_REG, PARAMETER_SIZE_MASK as i32);
            self.load_receiver(RECV, RECV);
        }
    }

    /// `ra` = invoke return entry for the result state in `FLAGS_REG`.
    fn load_return_address(&mut self) {
        let offset = match self.bytecode().length() {
            5 => DispatchTables::RETURN_5_OFFSET,
            _ => DispatchTables::RETURN_3_OFFSET,
        };
        self.srli(Reg::T5, FLAGS_REG, shift::TOS_STATE);
        self.andi(Reg::T5, Reg::T5, TOS_STATE_MASK as i32);
        self.add_imm(Reg::RA, XDISPATCH, offset as i64);
        self.shadd(Reg::RA, Reg::T5, Reg::RA, Reg::T6, 3);
        self.ld(Reg::RA, Reg::RA, 0);
    }

    fn jump_from_interpreted(&mut self, callee: Reg) {
        self.load_return_address();
        self.call_from_interpreter(callee, Reg::RA);
    }

    /// `METHOD` holds a `Method*` when the vfinal flag is set and a vtable
    /// index otherwise.
    fn invokevirtual_helper(&mut self, may_patch: bool) {
        let not_final = self.new_label();
        self.srli(Reg::T5, FLAGS_REG, shift::IS_VFINAL);
        self.andi(Reg::T5, Reg::T5, 1);
        self.beqz(Reg::T5, not_final);

        self.null_check(RECV, -1);
        if may_patch {
            self.patch_bytecode(Bytecode::FastInvokevfinal, Reg::T5, Reg::T6, true);
        }
        self.jump_from_interpreted(METHOD);

        self.bind(not_final);
        self.null_check(RECV, oop::KLASS as i64);
        self.load_klass(Reg::T5, RECV);
        self.shadd(Reg::T5, METHOD, Reg::T5, Reg::T6, 3);
        self.ld(METHOD, Reg::T5, klass::VTABLE_START);
        self.jump_from_interpreted(METHOD);
    }

    pub(super) fn invokevirtual(&mut self) {
        self.prepare_invoke(true, true);
        self.invokevirtual_helper(true);
    }

    /// Quickened `invokevirtual` of a final method.
    pub(super) fn fast_invokevfinal(&mut self) {
        self.get_cache_and_index_at_bcp(CACHE, METHOD, 1);
        self.ld(FLAGS_REG, CACHE, entry_field(FLAGS));
        self.ld(METHOD, CACHE, entry_field(F2));
        self.andi(RECV, FLAGS_REG, PARAMETER_SIZE_MASK as i32);
        self.load_receiver(RECV, RECV);
        self.null_check(RECV, -1);
        self.jump_from_interpreted(METHOD);
    }

    pub(super) fn invokespecial(&mut self) {
        self.prepare_invoke(false, true);
        self.null_check(RECV, -1);
        self.jump_from_interpreted(METHOD);
    }

    pub(super) fn invokestatic(&mut self) {
        self.prepare_invoke(false, false);
        self.jump_from_interpreted(METHOD);
    }

    /// Three shapes of callee:
    ///
    /// * forced virtual: a method of `Object` reached through an
    ///   interface, dispatched like `invokevirtual`;
    /// * vfinal: a private interface method, called directly after the
    ///   receiver is checked against the interface;
    /// * otherwise: an itable lookup in the interface declaring the method.
    pub(super) fn invokeinterface(&mut self) {
        let icce = self.stubs().incompatible_class_change;
        let ame = self.stubs().abstract_method;
        let not_forced_virtual = self.new_label();
        let not_vfinal = self.new_label();
        let subtype = self.new_label();
        let no_such_interface = self.new_label();
        let no_such_method = self.new_label();
        let recv_klass = Reg::T5;

        self.prepare_invoke(true, true);

        self.srli(Reg::T5, FLAGS_REG, shift::IS_FORCED_VIRTUAL);
        self.andi(Reg::T5, Reg::T5, 1);
        self.beqz(Reg::T5, not_forced_virtual);
        self.invokevirtual_helper(false);
        self.bind(not_forced_virtual);

        self.null_check(RECV, oop::KLASS as i64);
        self.srli(Reg::T5, FLAGS_REG, shift::IS_VFINAL);
        self.andi(Reg::T5, Reg::T5, 1);
        self.beqz(Reg::T5, not_vfinal);
        self.load_klass(recv_klass, RECV);
        self.check_klass_subtype(recv_klass, INTERFACE, Reg::T6, Reg::A4, subtype);
        self.j(no_such_interface);
        self.bind(subtype);
        self.jump_from_interpreted(METHOD);

        self.bind(not_vfinal);
        self.load_klass(recv_klass, RECV);
        self.mv(Reg::A6, METHOD);

        // The receiver must implement the referenced interface.
        self.lookup_interface_method(recv_klass, INTERFACE, None, METHOD, Reg::T6, Reg::A4, no_such_interface);

        // Look the method up in the interface that declares it.
        self.ld(INTERFACE, METHOD, method::HOLDER);
        self.lw(Reg::A5, METHOD, method::VTABLE_INDEX);
        self.li(Reg::A4, method::ITABLE_INDEX_MAX as i64);
        self.subw(Reg::A5, Reg::A4, Reg::A5);
        self.lookup_interface_method(
            recv_klass,
            INTERFACE,
            Some(Reg::A5),
            METHOD,
            Reg::T6,
            Reg::A4,
            no_such_interface,
        );
        self.beqz(METHOD, no_such_method);
        self.jump_from_interpreted(METHOD);

        self.bind(no_such_method);
        self.mv(Reg::A1, recv_klass);
        self.mv(Reg::A2, Reg::A6);
        self.j(ame);

        self.bind(no_such_interface);
        self.mv(Reg::A1, recv_klass);
        self.mv(Reg::A2, INTERFACE);
        self.j(icce);
    }

    /// `invokehandle`: a signature-polymorphic call through an adapter.
    pub(super) fn invokehandle(&mut self) {
        self.prepare_invoke(false, true);
        self.null_check(RECV, -1);
        self.jump_from_interpreted(METHOD);
    }

    pub(super) fn invokedynamic(&mut self) {
        self.prepare_invoke(false, false);
        self.jump_from_interpreted(METHOD);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_virtual_calls_resolve_under_second_byte() {
        assert_eq!(cp_cache::byte_no(Bytecode::Invokevirtual), cp_cache::BYTECODE_2);
        assert_eq!(cp_cache::byte_no(Bytecode::FastInvokevfinal), cp_cache::BYTECODE_2);
        assert_eq!(cp_cache::byte_no(Bytecode::Invokespecial), cp_cache::BYTECODE_1);
        assert_eq!(cp_cache::byte_no(Bytecode::Invokeinterface), cp_cache::BYTECODE_1);
        assert_eq!(cp_cache::byte_no(Bytecode::Invokehandle), cp_cache::BYTECODE_1);
    }

    #[test]
    fn test_return_tables_follow_the_wide_table() {
        let tables = DispatchTables::new(0x1000);
        assert_eq!(tables.invoke_return(3), 0x1000 + DispatchTables::RETURN_3_OFFSET);
        assert_eq!(tables.invoke_return(5), 0x1000 + DispatchTables::RETURN_5_OFFSET);
        assert!(DispatchTables::RETURN_3_OFFSET > DispatchTables::WIDE_OFFSET);
    }
}
