//! Operand stack shuffles. All of them run in vtos and move raw slots.

use super::TemplateGen;
use crate::asm::Reg;
use crate::interp::interp_masm::XESP;

/// Offset from `xesp` of the slot `n` below the top of stack.
const fn at_tos(n: i32) -> i32 {
    8 * (n + 1)
}

impl TemplateGen<'_> {
    pub(super) fn pop_words(&mut self, n: i32) {
        self.addi(XESP, XESP, 8 * n);
    }

    pub(super) fn dup(&mut self) {
        self.ld(Reg::T1, XESP, at_tos(0));
        self.push_ptr(Reg::T1);
    }

    pub(super) fn dup_x1(&mut self) {
        // ..., a, b
        self.ld(Reg::T1, XESP, at_tos(0));
        self.ld(Reg::T2, XESP, at_tos(1));
        self.sd(Reg::T1, XESP, at_tos(1));
        self.sd(Reg::T2, XESP, at_tos(0));
        self.push_ptr(Reg::T1);
        // ..., b, a, b
    }

    pub(super) fn dup_x2(&mut self) {
        // ..., a, b, c
        self.ld(Reg::T1, XESP, at_tos(0));
        self.ld(Reg::T3, XESP, at_tos(2));
        self.sd(Reg::T1, XESP, at_tos(2));
        self.push_ptr(Reg::T1);
        // ..., c, b, c, c
        self.ld(Reg::T1, XESP, at_tos(2));
        self.sd(Reg::T3, XESP, at_tos(2));
        // ..., c, a, c, c
        self.sd(Reg::T1, XESP, at_tos(1));
        // ..., c, a, b, c
    }

    pub(super) fn dup2(&mut self) {
        // ..., a, b
        self.ld(Reg::T1, XESP, at_tos(1));
        self.push_ptr(Reg::T1);
        self.ld(Reg::T1, XESP, at_tos(1));
        self.push_ptr(Reg::T1);
        // ..., a, b, a, b
    }

    pub(super) fn dup2_x1(&mut self) {
        // ..., a, b, c
        self.ld(Reg::T3, XESP, at_tos(0));
        self.ld(Reg::T1, XESP, at_tos(1));
        self.push_ptr(Reg::T1);
        self.push_ptr(Reg::T3);
        // ..., a, b, c, b, c
        self.sd(Reg::T3, XESP, at_tos(3));
        // ..., a, c, c, b, c
        self.ld(Reg::T3, XESP, at_tos(4));
        self.sd(Reg::T3, XESP, at_tos(2));
        // ..., a, c, a, b, c
        self.sd(Reg::T1, XESP, at_tos(4));
        // ..., b, c, a, b, c
    }

    pub(super) fn dup2_x2(&mut self) {
        // ..., a, b, c, d
        self.ld(Reg::T3, XESP, at_tos(0));
        self.ld(Reg::T1, XESP, at_tos(1));
        self.push_ptr(Reg::T1);
        self.push_ptr(Reg::T3);
        // ..., a, b, c, d, c, d
        self.ld(Reg::T1, XESP, at_tos(4));
        self.sd(Reg::T1, XESP, at_tos(2));
        self.sd(Reg::T3, XESP, at_tos(4));
        // ..., a, d, c, b, c, d
        self.ld(Reg::T3, XESP, at_tos(5));
        self.ld(Reg::T1, XESP, at_tos(3));
        self.sd(Reg::T3, XESP, at_tos(3));
        self.sd(Reg::T1, XESP, at_tos(5));
        // ..., c, d, a, b, c, d
    }

    pub(super) fn swap(&mut self) {
        // ..., a, b
        self.ld(Reg::T3, XESP, at_tos(1));
        self.ld(Reg::T1, XESP, at_tos(0));
        self.sd(Reg::T3, XESP, at_tos(0));
        self.sd(Reg::T1, XESP, at_tos(1));
        // ..., b, a
    }
}
