//! Constant pushes and the `ldc` family.

use super::TemplateGen;
use crate::asm::Reg;
use crate::interp::interp_masm::{FTOS, XBCP, XTOS};
use crate::runtime::RuntimeEntry;
use crate::runtime::layout::{constant_pool, tag};

impl TemplateGen<'_> {
    pub(super) fn aconst_null(&mut self) {
        self.mv(XTOS, Reg::ZERO);
    }

    pub(super) fn iconst(&mut self, value: i32) {
        self.li(XTOS, value as i64);
    }

    pub(super) fn lconst(&mut self, value: i64) {
        self.li(XTOS, value);
    }

    pub(super) fn fconst(&mut self, value: f32) {
        self.li(Reg::T1, value.to_bits() as i64);
        self.fmv_f(false, FTOS, Reg::T1);
    }

    pub(super) fn dconst(&mut self, value: f64) {
        self.li(Reg::T1, value.to_bits() as i64);
        self.fmv_f(true, FTOS, Reg::T1);
    }

    pub(super) fn bipush(&mut self) {
        self.lb(XTOS, XBCP, 1);
    }

    pub(super) fn sipush(&mut self) {
        self.get_s2_be_at_bcp(XTOS, 1, Reg::T1);
    }

    /// `T1` = constant pool index operand, `T2` = constant pool,
    /// `T3` = tag of the entry.
    fn cp_index_and_tag(&mut self, wide: bool) {
        if wide {
            self.get_u2_be_at_bcp(Reg::T1, 1, Reg::T2);
        } else {
            self.lbu(Reg::T1, XBCP, 1);
        }
        self.get_constant_pool(Reg::T2);
        self.ld(Reg::T3, Reg::T2, constant_pool::TAGS);
        self.add(Reg::T3, Reg::T3, Reg::T1);
        self.lbu(Reg::T3, Reg::T3, constant_pool::ARRAY_DATA);
        // T2 = address of the slot
        self.shadd(Reg::T2, Reg::T1, Reg::T2, Reg::T4, 3);
    }

    pub(super) fn ldc(&mut self, wide: bool) {
        let call_ldc = self.new_label();
        let not_float = self.new_label();
        let done = self.new_label();

        self.cp_index_and_tag(wide);

        self.li(Reg::T4, tag::FLOAT as i64);
        self.bne(Reg::T3, Reg::T4, not_float);
        self.flw(FTOS, Reg::T2, constant_pool::HEADER_SIZE);
        self.push_f(FTOS);
        self.j(done);

        self.bind(not_float);
        self.li(Reg::T4, tag::INTEGER as i64);
        self.bne(Reg::T3, Reg::T4, call_ldc);
        self.lw(XTOS, Reg::T2, constant_pool::HEADER_SIZE);
        self.push_i(XTOS);
        self.j(done);

        // Class constants (and anything else) are resolved by the runtime.
        self.bind(call_ldc);
        self.li(Reg::A1, wide as i64);
        self.call_vm(RuntimeEntry::Ldc);
        self.get_vm_result(XTOS);
        self.push_ptr(XTOS);

        self.bind(done);
    }

    pub(super) fn ldc2_w(&mut self) {
        let not_double = self.new_label();
        let done = self.new_label();

        self.cp_index_and_tag(true);
        self.li(Reg::T4, tag::DOUBLE as i64);
        self.bne(Reg::T3, Reg::T4, not_double);
        self.fld(FTOS, Reg::T2, constant_pool::HEADER_SIZE);
        self.push_d(FTOS);
        self.j(done);

        self.bind(not_double);
        self.ld(XTOS, Reg::T2, constant_pool::HEADER_SIZE);
        self.push_l(XTOS);

        self.bind(done);
    }

    /// String constants, cached in the resolved references array.
    pub(super) fn fast_aldc(&mut self, wide: bool) {
        let resolved = self.new_label();

        if wide {
            self.get_u2_native_at_bcp(Reg::T1, 1, Reg::T2);
        } else {
            self.lbu(Reg::T1, XBCP, 1);
        }
        self.load_resolved_reference_at_index(XTOS, Reg::T1);
        self.bnez(XTOS, resolved);

        self.li(Reg::A1, wide as i64);
        self.call_vm(RuntimeEntry::ResolveLdc);
        self.get_vm_result(XTOS);

        self.bind(resolved);
    }
}
