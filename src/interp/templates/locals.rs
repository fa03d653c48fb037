//! Local variable loads and stores, `iinc` and the load pair rewrites.

use super::TemplateGen;
use crate::asm::Reg;
use crate::interp::bytecodes::{Bytecode, TosState};
use crate::interp::interp_masm::{FTOS, XBCP, XLOCALS, XTOS};

/// `local n` is at `xlocals - 8n`; two-slot values use the lower slot.
const fn local_offset(n: i32) -> i32 {
    -8 * n
}

const fn wide_local_offset(n: i32) -> i32 {
    -8 * (n + 1)
}

impl TemplateGen<'_> {
    /// `reg` = address of the local named by the operand.
    fn locals_index(&mut self, reg: Reg) {
        let wide = self.is_wide();
        self.get_local_index(reg, wide, Reg::T0);
        self.local_address(reg, reg);
    }

    pub(super) fn iload(&mut self) {
        self.iload_internal(true);
    }

    pub(super) fn nofast_iload(&mut self) {
        self.iload_internal(false);
    }

    pub(super) fn wide_iload(&mut self) {
        self.locals_index(Reg::T1);
        self.lw(XTOS, Reg::T1, 0);
    }

    fn iload_internal(&mut self, may_rewrite: bool) {
        if may_rewrite && self.config().rewrite_bytecodes {
            let rewrite = self.new_label();
            let done = self.new_label();
            let next = Bytecode::Iload.length() as i32;

            self.lbu(Reg::T1, XBCP, next);
            // A following iload may still pair up with the one after it.
            self.li(Reg::T2, Bytecode::Iload as i64);
            self.beq(Reg::T1, Reg::T2, done);

            self.li(Reg::T3, Bytecode::FastIload2 as i64);
            self.li(Reg::T2, Bytecode::FastIload as i64);
            self.beq(Reg::T1, Reg::T2, rewrite);

            self.li(Reg::T3, Bytecode::FastIcaload as i64);
            self.li(Reg::T2, Bytecode::Caload as i64);
            self.beq(Reg::T1, Reg::T2, rewrite);

            self.li(Reg::T3, Bytecode::FastIload as i64);

            self.bind(rewrite);
            self.patch_bytecode(Bytecode::Iload, Reg::T3, Reg::T2, false);
            self.bind(done);
        }

        self.locals_index(Reg::T1);
        self.lw(XTOS, Reg::T1, 0);
    }

    pub(super) fn fast_iload(&mut self) {
        self.locals_index(Reg::T1);
        self.lw(XTOS, Reg::T1, 0);
    }

    /// `iload a; iload b`: push local a, cache local b.
    pub(super) fn fast_iload2(&mut self) {
        self.lbu(Reg::T1, XBCP, 1);
        self.local_address(Reg::T1, Reg::T1);
        self.lw(XTOS, Reg::T1, 0);
        self.push(TosState::Itos);
        self.lbu(Reg::T1, XBCP, 3);
        self.local_address(Reg::T1, Reg::T1);
        self.lw(XTOS, Reg::T1, 0);
    }

    pub(super) fn lload(&mut self) {
        self.locals_index(Reg::T1);
        self.ld(XTOS, Reg::T1, -8);
    }

    pub(super) fn fload(&mut self) {
        self.locals_index(Reg::T1);
        self.flw(FTOS, Reg::T1, 0);
    }

    pub(super) fn dload(&mut self) {
        self.locals_index(Reg::T1);
        self.fld(FTOS, Reg::T1, -8);
    }

    pub(super) fn aload(&mut self) {
        self.locals_index(Reg::T1);
        self.ld(XTOS, Reg::T1, 0);
    }

    pub(super) fn iload_n(&mut self, n: i32) {
        self.lw(XTOS, XLOCALS, local_offset(n));
    }

    pub(super) fn lload_n(&mut self, n: i32) {
        self.ld(XTOS, XLOCALS, wide_local_offset(n));
    }

    pub(super) fn fload_n(&mut self, n: i32) {
        self.flw(FTOS, XLOCALS, local_offset(n));
    }

    pub(super) fn dload_n(&mut self, n: i32) {
        self.fld(FTOS, XLOCALS, wide_local_offset(n));
    }

    pub(super) fn aload_n(&mut self, n: i32) {
        self.ld(XTOS, XLOCALS, local_offset(n));
    }

    /// `aload_0` followed by a quickened `getfield` becomes a combined
    /// access; a still unquickened `getfield` is left for later.
    pub(super) fn aload_0(&mut self) {
        if self.config().rewrite_bytecodes {
            let rewrite = self.new_label();
            let done = self.new_label();
            let next = Bytecode::Aload0.length() as i32;

            self.lbu(Reg::T1, XBCP, next);
            self.li(Reg::T2, Bytecode::Getfield as i64);
            self.beq(Reg::T1, Reg::T2, done);

            for (getter, access) in [
                (Bytecode::FastIgetfield, Bytecode::FastIaccess0),
                (Bytecode::FastAgetfield, Bytecode::FastAaccess0),
                (Bytecode::FastFgetfield, Bytecode::FastFaccess0),
            ] {
                self.li(Reg::T3, access as i64);
                self.li(Reg::T2, getter as i64);
                self.beq(Reg::T1, Reg::T2, rewrite);
            }

            self.li(Reg::T3, Bytecode::FastAload0 as i64);

            self.bind(rewrite);
            self.patch_bytecode(Bytecode::Aload0, Reg::T3, Reg::T2, false);
            self.bind(done);
        }

        self.aload_n(0);
    }

    pub(super) fn istore(&mut self) {
        self.locals_index(Reg::T1);
        self.sw(XTOS, Reg::T1, 0);
    }

    pub(super) fn lstore(&mut self) {
        self.locals_index(Reg::T1);
        self.sd(XTOS, Reg::T1, -8);
    }

    pub(super) fn fstore(&mut self) {
        self.locals_index(Reg::T1);
        self.fsw(FTOS, Reg::T1, 0);
    }

    pub(super) fn dstore(&mut self) {
        self.locals_index(Reg::T1);
        self.fsd(FTOS, Reg::T1, -8);
    }

    /// References and `jsr` return addresses.
    pub(super) fn astore(&mut self) {
        self.pop_ptr(XTOS);
        self.locals_index(Reg::T1);
        self.sd(XTOS, Reg::T1, 0);
    }

    /// Wide stores enter in vtos and pop their value.
    pub(super) fn wide_store(&mut self, state: TosState) {
        self.pop(state);
        match state {
            TosState::Ltos => self.lstore(),
            TosState::Ftos => self.fstore(),
            TosState::Dtos => self.dstore(),
            _ => self.istore(),
        }
    }

    pub(super) fn istore_n(&mut self, n: i32) {
        self.sw(XTOS, XLOCALS, local_offset(n));
    }

    pub(super) fn lstore_n(&mut self, n: i32) {
        self.sd(XTOS, XLOCALS, wide_local_offset(n));
    }

    pub(super) fn fstore_n(&mut self, n: i32) {
        self.fsw(FTOS, XLOCALS, local_offset(n));
    }

    pub(super) fn dstore_n(&mut self, n: i32) {
        self.fsd(FTOS, XLOCALS, wide_local_offset(n));
    }

    pub(super) fn astore_n(&mut self, n: i32) {
        self.pop_ptr(XTOS);
        self.sd(XTOS, XLOCALS, local_offset(n));
    }

    pub(super) fn iinc(&mut self) {
        if self.is_wide() {
            self.get_s2_be_at_bcp(Reg::T2, 4, Reg::T0);
        } else {
            self.lb(Reg::T2, XBCP, 2);
        }
        self.locals_index(Reg::T1);
        self.lw(Reg::T3, Reg::T1, 0);
        self.addw(Reg::T3, Reg::T3, Reg::T2);
        self.sw(Reg::T3, Reg::T1, 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_slot_locals_use_lower_address() {
        assert_eq!(local_offset(0), 0);
        assert_eq!(local_offset(3), -24);
        assert_eq!(wide_local_offset(0), -8);
        assert_eq!(wide_local_offset(2), -24);
    }
}
