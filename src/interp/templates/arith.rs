//! Integer and floating-point arithmetic, conversions and comparisons.
//!
//! Binary operations pop the left operand; the right one is the cached
//! top of stack and the result replaces it.

use super::TemplateGen;
use crate::asm::{FReg, Reg};
use crate::interp::bytecodes::Bytecode;
use crate::interp::interp_masm::{FTOS, XTOS};
use crate::runtime::RuntimeEntry;

/// Binary operation of an arithmetic template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ushr,
}

impl TemplateGen<'_> {
    pub(super) fn iop2(&mut self, op: Op) {
        self.pop_i(Reg::T1);
        match op {
            Op::Add => self.addw(XTOS, Reg::T1, XTOS),
            Op::Sub => self.subw(XTOS, Reg::T1, XTOS),
            Op::Mul => self.mulw(XTOS, Reg::T1, XTOS),
            Op::And => self.andr(XTOS, Reg::T1, XTOS),
            Op::Or => self.orr(XTOS, Reg::T1, XTOS),
            Op::Xor => self.xor(XTOS, Reg::T1, XTOS),
            // The *w shifts use the low five bits of the count.
            Op::Shl => self.sllw(XTOS, Reg::T1, XTOS),
            Op::Shr => self.sraw(XTOS, Reg::T1, XTOS),
            Op::Ushr => self.srlw(XTOS, Reg::T1, XTOS),
            Op::Div | Op::Rem => self.should_not_reach_here(),
        }
    }

    pub(super) fn lop2(&mut self, op: Op) {
        self.pop_l(Reg::T1);
        match op {
            Op::Add => self.add(XTOS, Reg::T1, XTOS),
            Op::Sub => self.sub(XTOS, Reg::T1, XTOS),
            Op::Mul => self.mul(XTOS, Reg::T1, XTOS),
            Op::And => self.andr(XTOS, Reg::T1, XTOS),
            Op::Or => self.orr(XTOS, Reg::T1, XTOS),
            Op::Xor => self.xor(XTOS, Reg::T1, XTOS),
            _ => self.should_not_reach_here(),
        }
    }

    /// `divw`/`remw` already give `MIN_VALUE / -1 == MIN_VALUE` and a zero
    /// remainder; only a zero divisor needs checking.
    pub(super) fn idiv(&mut self, rem: bool) {
        let arithmetic = self.stubs().arithmetic;
        self.pop_i(Reg::T1);
        self.beqz_far(XTOS, arithmetic);
        if rem {
            self.remw(XTOS, Reg::T1, XTOS);
        } else {
            self.divw(XTOS, Reg::T1, XTOS);
        }
    }

    pub(super) fn ldiv(&mut self, rem: bool) {
        let arithmetic = self.stubs().arithmetic;
        self.pop_l(Reg::T1);
        self.beqz_far(XTOS, arithmetic);
        if rem {
            self.rem(XTOS, Reg::T1, XTOS);
        } else {
            self.div(XTOS, Reg::T1, XTOS);
        }
    }

    /// Shift count in `xtos`, long operand on the stack.
    pub(super) fn lshift(&mut self, op: Op) {
        self.pop_l(Reg::T1);
        match op {
            Op::Shl => self.sll(XTOS, Reg::T1, XTOS),
            Op::Shr => self.sra(XTOS, Reg::T1, XTOS),
            Op::Ushr => self.srl(XTOS, Reg::T1, XTOS),
            _ => self.should_not_reach_here(),
        }
    }

    fn float_op2(&mut self, double: bool, op: Op) {
        if double {
            self.pop_d(FReg::F1);
        } else {
            self.pop_f(FReg::F1);
        }
        match op {
            Op::Add => self.fadd(double, FTOS, FReg::F1, FTOS),
            Op::Sub => self.fsub(double, FTOS, FReg::F1, FTOS),
            Op::Mul => self.fmul(double, FTOS, FReg::F1, FTOS),
            Op::Div => self.fdiv(double, FTOS, FReg::F1, FTOS),
            Op::Rem => {
                self.fmv(double, FReg::FA0, FReg::F1);
                self.fmv(double, FReg::FA1, FTOS);
                let entry = if double { RuntimeEntry::Drem } else { RuntimeEntry::Frem };
                self.call_runtime_leaf(entry);
                self.fmv(double, FTOS, FReg::FA0);
            }
            _ => self.should_not_reach_here(),
        }
    }

    pub(super) fn fop2(&mut self, op: Op) {
        self.float_op2(false, op);
    }

    pub(super) fn dop2(&mut self, op: Op) {
        self.float_op2(true, op);
    }

    pub(super) fn ineg(&mut self) {
        self.negw(XTOS, XTOS);
    }

    pub(super) fn lneg(&mut self) {
        self.neg(XTOS, XTOS);
    }

    pub(super) fn fneg_tos(&mut self, double: bool) {
        self.fneg(double, FTOS, FTOS);
    }

    /// Float to integer: the hardware saturates like Java does but turns
    /// NaN into the maximum value, so NaN is masked to zero.
    fn float_to_int(&mut self, double: bool, long: bool) {
        self.feq(double, Reg::T1, FTOS, FTOS);
        self.fcvt_to_int(double, long, XTOS, FTOS);
        self.neg(Reg::T1, Reg::T1);
        self.andr(XTOS, XTOS, Reg::T1);
    }

    pub(super) fn convert(&mut self, bc: Bytecode) {
        match bc {
            Bytecode::I2l | Bytecode::L2i => self.sext_w(XTOS, XTOS),
            Bytecode::I2f => self.fcvt_from_int(false, false, FTOS, XTOS),
            Bytecode::I2d => self.fcvt_from_int(true, false, FTOS, XTOS),
            Bytecode::L2f => self.fcvt_from_int(false, true, FTOS, XTOS),
            Bytecode::L2d => self.fcvt_from_int(true, true, FTOS, XTOS),
            Bytecode::F2i => self.float_to_int(false, false),
            Bytecode::F2l => self.float_to_int(false, true),
            Bytecode::D2i => self.float_to_int(true, false),
            Bytecode::D2l => self.float_to_int(true, true),
            Bytecode::F2d => self.fcvt_fp(true, FTOS, FTOS),
            Bytecode::D2f => self.fcvt_fp(false, FTOS, FTOS),
            Bytecode::I2b => self.sign_extend(XTOS, XTOS, 8),
            Bytecode::I2c => self.zero_extend(XTOS, XTOS, 16),
            Bytecode::I2s => self.sign_extend(XTOS, XTOS, 16),
            _ => self.should_not_reach_here(),
        }
    }

    /// `-1`, `0` or `1` for `left <=> right`.
    pub(super) fn lcmp(&mut self) {
        self.pop_l(Reg::T1);
        self.slt(Reg::T2, XTOS, Reg::T1);
        self.slt(Reg::T3, Reg::T1, XTOS);
        self.sub(XTOS, Reg::T2, Reg::T3);
    }

    /// `fcmpl`/`dcmpl` (`unordered_result == -1`) and `fcmpg`/`dcmpg`.
    pub(super) fn float_cmp(&mut self, double: bool, unordered_result: i32) {
        if double {
            self.pop_d(FReg::F1);
        } else {
            self.pop_f(FReg::F1);
        }
        self.feq(double, Reg::T2, FReg::F1, FTOS);
        if unordered_result < 0 {
            // 2 * (right < left) + (left == right) - 1
            self.flt(double, Reg::T1, FTOS, FReg::F1);
            self.slli(Reg::T1, Reg::T1, 1);
            self.add(XTOS, Reg::T1, Reg::T2);
            self.addi(XTOS, XTOS, -1);
        } else {
            // 1 - 2 * (left < right) - (left == right)
            self.flt(double, Reg::T1, FReg::F1, FTOS);
            self.slli(Reg::T1, Reg::T1, 1);
            self.add(Reg::T1, Reg::T1, Reg::T2);
            self.li(XTOS, 1);
            self.sub(XTOS, XTOS, Reg::T1);
        }
    }
}
