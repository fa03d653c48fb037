//! RV64IMFD hart.
//!
//! Executes the instructions [`disasm::decode`] understands over a shared
//! [`Memory`]. Control leaves the hart through [`Event`]s: a jump into the
//! runtime entry range, an `ebreak`, or a load/store on the protected zero
//! page. Everything else that goes wrong is a [`SimError`].

use thiserror::Error;

use super::memory::{Memory, MemoryError};
use crate::asm::disasm::{self, AluOp, DecodeError, FpOp, Inst, Width};
use crate::asm::riscv::{FReg, Reg};
use crate::runtime::{OrderAccess, RuntimeEntry};

/// Error type for simulated execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SimError {
    #[error("instruction fetch at {pc:#x}: {source}")]
    Fetch { pc: u64, source: MemoryError },
    #[error("memory fault at pc {pc:#x}: {source}")]
    Memory { pc: u64, source: MemoryError },
    #[error("at pc {pc:#x}: {source}")]
    Decode { pc: u64, source: DecodeError },
    #[error("jump to unknown runtime address {0:#x}")]
    UnknownRuntimeAddress(u64),
    #[error("instruction limit of {0} exceeded")]
    InstructionLimit(u64),
}

/// Reason the hart stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The pc reached a runtime entry; the return address is in `ra`.
    RuntimeCall(RuntimeEntry),
    Ebreak { pc: u64 },
    Ecall { pc: u64 },
    /// A load or store touched the protected page.
    NullFault { pc: u64, addr: u64 },
}

/// Architectural state of one hart.
#[derive(Debug, Clone, Default)]
pub struct Hart {
    x: [u64; 32],
    /// Raw register bits; single-precision values are NaN-boxed.
    f: [u64; 32],
    pub pc: u64,
    /// Instructions retired.
    pub instret: u64,
}

const NAN_BOX: u64 = 0xFFFF_FFFF_0000_0000;

fn cvt_to_i32(v: f64) -> i64 {
    if v.is_nan() { i32::MAX as i64 } else { v as i32 as i64 }
}

fn cvt_to_i64(v: f64) -> i64 {
    if v.is_nan() { i64::MAX } else { v as i64 }
}

fn fclass(v: f64) -> u64 {
    use std::num::FpCategory::*;
    let neg = v.is_sign_negative();
    let bit = match (v.classify(), neg) {
        (Infinite, true) => 0,
        (Normal, true) => 1,
        (Subnormal, true) => 2,
        (Zero, true) => 3,
        (Zero, false) => 4,
        (Subnormal, false) => 5,
        (Normal, false) => 6,
        (Infinite, false) => 7,
        // Only quiet NaNs are produced by the host.
        (Nan, _) => 9,
    };
    1 << bit
}

impl Hart {
    pub fn new(pc: u64) -> Self {
        Self {
            pc,
            ..Self::default()
        }
    }

    pub fn reg(&self, r: Reg) -> u64 {
        self.x[r.code() as usize]
    }

    pub fn set_reg(&mut self, r: Reg, value: u64) {
        if r != Reg::ZERO {
            self.x[r.code() as usize] = value;
        }
    }

    pub fn f64_reg(&self, r: FReg) -> f64 {
        f64::from_bits(self.f[r.code() as usize])
    }

    pub fn set_f64_reg(&mut self, r: FReg, value: f64) {
        self.f[r.code() as usize] = value.to_bits();
    }

    /// Single-precision view; an improperly boxed value reads as NaN.
    pub fn f32_reg(&self, r: FReg) -> f32 {
        let bits = self.f[r.code() as usize];
        if bits & NAN_BOX == NAN_BOX { f32::from_bits(bits as u32) } else { f32::NAN }
    }

    pub fn set_f32_reg(&mut self, r: FReg, value: f32) {
        self.f[r.code() as usize] = NAN_BOX | value.to_bits() as u64;
    }

    pub fn freg_bits(&self, r: FReg) -> u64 {
        self.f[r.code() as usize]
    }

    pub fn set_freg_bits(&mut self, r: FReg, bits: u64) {
        self.f[r.code() as usize] = bits;
    }

    fn xr(&self, code: u8) -> u64 {
        self.x[code as usize]
    }

    fn set_xr(&mut self, code: u8, value: u64) {
        if code != 0 {
            self.x[code as usize] = value;
        }
    }

    /// Read an FP operand as f64, widening single precision.
    fn fp_operand(&self, double: bool, code: u8) -> f64 {
        let r = FReg::new(code);
        if double { self.f64_reg(r) } else { self.f32_reg(r) as f64 }
    }

    fn set_fp_result(&mut self, double: bool, code: u8, value: f64) {
        let r = FReg::new(code);
        if double {
            self.set_f64_reg(r, value);
        } else {
            self.set_f32_reg(r, value as f32);
        }
    }

    fn fp_bits(&self, double: bool, code: u8) -> u64 {
        let bits = self.f[code as usize];
        if double {
            bits
        } else if bits & NAN_BOX == NAN_BOX {
            bits & 0xFFFF_FFFF
        } else {
            f32::NAN.to_bits() as u64
        }
    }

    fn set_fp_bits(&mut self, double: bool, code: u8, bits: u64) {
        self.f[code as usize] = if double { bits } else { NAN_BOX | (bits & 0xFFFF_FFFF) };
    }

    /// Run until an event, or fail after `limit` instructions.
    pub fn run(&mut self, mem: &Memory, limit: u64) -> Result<Event, SimError> {
        let start = self.instret;
        loop {
            if let Some(event) = self.step(mem)? {
                return Ok(event);
            }
            if self.instret - start >= limit {
                return Err(SimError::InstructionLimit(limit));
            }
        }
    }

    /// Execute one instruction.
    pub fn step(&mut self, mem: &Memory) -> Result<Option<Event>, SimError> {
        let pc = self.pc;
        if RuntimeEntry::is_runtime_address(pc) {
            return RuntimeEntry::from_address(pc)
                .map(|e| Some(Event::RuntimeCall(e)))
                .ok_or(SimError::UnknownRuntimeAddress(pc));
        }
        let word = mem.load_u32(pc).map_err(|source| SimError::Fetch { pc, source })?;
        let inst = disasm::decode(word).map_err(|source| SimError::Decode { pc, source })?;
        let mut next = pc.wrapping_add(4);

        match inst {
            Inst::Lui { rd, imm } => self.set_reg(rd, imm as u64),
            Inst::Auipc { rd, imm } => self.set_reg(rd, pc.wrapping_add_signed(imm)),
            Inst::Jal { rd, offset } => {
                self.set_reg(rd, next);
                next = pc.wrapping_add_signed(offset);
            }
            Inst::Jalr { rd, rs1, offset } => {
                let target = self.reg(rs1).wrapping_add_signed(offset) & !1;
                self.set_reg(rd, next);
                next = target;
            }
            Inst::Branch { cond, rs1, rs2, offset } => {
                use crate::asm::riscv::Cond;
                let a = self.reg(rs1);
                let b = self.reg(rs2);
                let taken = match cond {
                    Cond::Eq => a == b,
                    Cond::Ne => a != b,
                    Cond::Lt => (a as i64) < (b as i64),
                    Cond::Ge => (a as i64) >= (b as i64),
                    Cond::Ltu => a < b,
                    Cond::Geu => a >= b,
                    // Never produced by the decoder.
                    Cond::Gt | Cond::Le | Cond::Gtu | Cond::Leu => unreachable!(),
                };
                if taken {
                    next = pc.wrapping_add_signed(offset);
                }
            }
            Inst::Load { width, rd, rs1, offset } => {
                let addr = self.reg(rs1).wrapping_add_signed(offset);
                let raw = match mem.load(addr, width.bytes() as usize, std::sync::atomic::Ordering::Relaxed) {
                    Ok(v) => v,
                    Err(e) => return self.fault(pc, e),
                };
                let value = match width {
                    Width::B => raw as i8 as i64 as u64,
                    Width::H => raw as i16 as i64 as u64,
                    Width::W => raw as i32 as i64 as u64,
                    Width::D | Width::Bu | Width::Hu | Width::Wu => raw,
                };
                self.set_reg(rd, value);
            }
            Inst::Store { width, rs1, rs2, offset } => {
                let addr = self.reg(rs1).wrapping_add_signed(offset);
                let value = self.reg(rs2);
                if let Err(e) = mem.store(addr, width.bytes() as usize, value, std::sync::atomic::Ordering::Relaxed) {
                    return self.fault(pc, e);
                }
            }
            Inst::OpImm { op, rd, rs1, imm } => {
                let v = alu64(op, self.reg(rs1), imm as u64);
                self.set_reg(rd, v);
            }
            Inst::OpImm32 { op, rd, rs1, imm } => {
                let v = alu32(op, self.reg(rs1), imm as u64);
                self.set_reg(rd, v);
            }
            Inst::Op { op, rd, rs1, rs2 } => {
                let v = alu64(op, self.reg(rs1), self.reg(rs2));
                self.set_reg(rd, v);
            }
            Inst::Op32 { op, rd, rs1, rs2 } => {
                let v = alu32(op, self.reg(rs1), self.reg(rs2));
                self.set_reg(rd, v);
            }
            Inst::Fence { pred, succ } => OrderAccess::fence_for(pred, succ),
            Inst::FenceI => OrderAccess::cross_modify_fence(),
            Inst::Ecall => return Ok(Some(Event::Ecall { pc })),
            Inst::Ebreak => return Ok(Some(Event::Ebreak { pc })),
            Inst::FLoad { double, rd, rs1, offset } => {
                let addr = self.reg(rs1).wrapping_add_signed(offset);
                let size = if double { 8 } else { 4 };
                match mem.load(addr, size, std::sync::atomic::Ordering::Relaxed) {
                    Ok(bits) => self.set_fp_bits(double, rd.code() as u8, bits),
                    Err(e) => return self.fault(pc, e),
                }
            }
            Inst::FStore { double, rs1, rs2, offset } => {
                let addr = self.reg(rs1).wrapping_add_signed(offset);
                let size = if double { 8 } else { 4 };
                let bits = self.f[rs2.code() as usize];
                if let Err(e) = mem.store(addr, size, bits, std::sync::atomic::Ordering::Relaxed) {
                    return self.fault(pc, e);
                }
            }
            Inst::Fp { op, double, rd, rs1, rs2, rm } => self.exec_fp(op, double, rd, rs1, rs2, rm),
        }

        self.pc = next;
        self.instret += 1;
        Ok(None)
    }

    fn fault(&mut self, pc: u64, e: MemoryError) -> Result<Option<Event>, SimError> {
        if let MemoryError::Unmapped { addr } = e {
            if e.is_null_access() {
                return Ok(Some(Event::NullFault { pc, addr }));
            }
        }
        Err(SimError::Memory { pc, source: e })
    }

    fn exec_fp(&mut self, op: FpOp, double: bool, rd: u8, rs1: u8, rs2: u8, rm: u8) {
        let a = self.fp_operand(double, rs1);
        match op {
            FpOp::Add | FpOp::Sub | FpOp::Mul | FpOp::Div | FpOp::Min | FpOp::Max => {
                let (x, y) = (self.fp_operand(double, rs1), self.fp_operand(double, rs2));
                let r = if double {
                    match op {
                        FpOp::Add => x + y,
                        FpOp::Sub => x - y,
                        FpOp::Mul => x * y,
                        FpOp::Div => x / y,
                        FpOp::Min => x.min(y),
                        _ => x.max(y),
                    }
                } else {
                    let (x, y) = (x as f32, y as f32);
                    (match op {
                        FpOp::Add => x + y,
                        FpOp::Sub => x - y,
                        FpOp::Mul => x * y,
                        FpOp::Div => x / y,
                        FpOp::Min => x.min(y),
                        _ => x.max(y),
                    }) as f64
                };
                self.set_fp_result(double, rd, r);
            }
            FpOp::Sqrt => {
                let r = if double { a.sqrt() } else { (a as f32).sqrt() as f64 };
                self.set_fp_result(double, rd, r);
            }
            FpOp::Sgnj | FpOp::Sgnjn | FpOp::Sgnjx => {
                let sign = if double { 1u64 << 63 } else { 1u64 << 31 };
                let x = self.fp_bits(double, rs1);
                let y = self.fp_bits(double, rs2);
                let s = match op {
                    FpOp::Sgnj => y & sign,
                    FpOp::Sgnjn => !y & sign,
                    _ => (x ^ y) & sign,
                };
                self.set_fp_bits(double, rd, (x & !sign) | s);
            }
            FpOp::CvtFp => {
                // The instruction format names the target precision.
                let r = if double {
                    self.f32_reg(FReg::new(rs1)) as f64
                } else {
                    self.f64_reg(FReg::new(rs1))
                };
                self.set_fp_result(double, rd, r);
            }
            FpOp::Eq | FpOp::Lt | FpOp::Le => {
                let (x, y) = (self.fp_operand(double, rs1), self.fp_operand(double, rs2));
                let r = match op {
                    FpOp::Eq => x == y,
                    FpOp::Lt => x < y,
                    _ => x <= y,
                };
                self.set_xr(rd, r as u64);
            }
            FpOp::Class => {
                self.set_xr(rd, fclass(a));
            }
            FpOp::CvtToInt { long } => {
                let v = if rm == 1 { a.trunc() } else { a.round_ties_even() };
                let r = if long { cvt_to_i64(v) } else { cvt_to_i32(v) };
                self.set_xr(rd, r as u64);
            }
            FpOp::CvtFromInt { long } => {
                let src = self.xr(rs1);
                let r = if long {
                    if double { src as i64 as f64 } else { (src as i64 as f32) as f64 }
                } else if double {
                    src as i32 as f64
                } else {
                    (src as i32 as f32) as f64
                };
                self.set_fp_result(double, rd, r);
            }
            FpOp::MvToInt => {
                let bits = self.f[rs1 as usize];
                let v = if double { bits } else { bits as u32 as i32 as i64 as u64 };
                self.set_xr(rd, v);
            }
            FpOp::MvFromInt => {
                let v = self.xr(rs1);
                self.set_fp_bits(double, rd, v);
            }
        }
    }
}

fn alu64(op: AluOp, a: u64, b: u64) -> u64 {
    match op {
        AluOp::Add => a.wrapping_add(b),
        AluOp::Sub => a.wrapping_sub(b),
        AluOp::Sll => a << (b & 0x3F),
        AluOp::Slt => ((a as i64) < (b as i64)) as u64,
        AluOp::Sltu => (a < b) as u64,
        AluOp::Xor => a ^ b,
        AluOp::Srl => a >> (b & 0x3F),
        AluOp::Sra => ((a as i64) >> (b & 0x3F)) as u64,
        AluOp::Or => a | b,
        AluOp::And => a & b,
        AluOp::Mul => a.wrapping_mul(b),
        AluOp::Mulh => (((a as i64 as i128) * (b as i64 as i128)) >> 64) as u64,
        AluOp::Mulhsu => (((a as i64 as i128) * (b as i128)) >> 64) as u64,
        AluOp::Mulhu => (((a as u128) * (b as u128)) >> 64) as u64,
        AluOp::Div => {
            if b == 0 {
                u64::MAX
            } else {
                (a as i64).wrapping_div(b as i64) as u64
            }
        }
        AluOp::Divu => a.checked_div(b).unwrap_or(u64::MAX),
        AluOp::Rem => {
            if b == 0 {
                a
            } else {
                (a as i64).wrapping_rem(b as i64) as u64
            }
        }
        AluOp::Remu => a.checked_rem(b).unwrap_or(a),
    }
}

fn alu32(op: AluOp, a: u64, b: u64) -> u64 {
    let (x, y) = (a as u32, b as u32);
    let r: u32 = match op {
        AluOp::Add => x.wrapping_add(y),
        AluOp::Sub => x.wrapping_sub(y),
        AluOp::Sll => x << (y & 0x1F),
        AluOp::Srl => x >> (y & 0x1F),
        AluOp::Sra => ((x as i32) >> (y & 0x1F)) as u32,
        AluOp::Mul => x.wrapping_mul(y),
        AluOp::Div => {
            if y == 0 {
                u32::MAX
            } else {
                (x as i32).wrapping_div(y as i32) as u32
            }
        }
        AluOp::Divu => x.checked_div(y).unwrap_or(u32::MAX),
        AluOp::Rem => {
            if y == 0 {
                x
            } else {
                (x as i32).wrapping_rem(y as i32) as u32
            }
        }
        AluOp::Remu => x.checked_rem(y).unwrap_or(x),
        // Not encodable in the 32-bit opcode spaces.
        _ => unreachable!("{:?} has no word form", op),
    };
    r as i32 as i64 as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::codebuf::CodeBuffer;
    use crate::asm::riscv::{Assembler, fence_bits};

    const BASE: u64 = 0x1_0000;

    fn load(f: impl FnOnce(&mut Assembler)) -> (Memory, Hart) {
        let mut asm = Assembler::new(CodeBuffer::new(BASE));
        f(&mut asm);
        asm.ebreak();
        let mut buf = asm.into_buffer();
        buf.patch_forward_refs().unwrap();
        let mem = Memory::new();
        mem.map("code", BASE, 0x1000).unwrap();
        mem.map("data", 0x2_0000, 0x1000).unwrap();
        mem.write_bytes(BASE, buf.code()).unwrap();
        (mem, Hart::new(BASE))
    }

    fn run(f: impl FnOnce(&mut Assembler)) -> (Memory, Hart) {
        let (mem, mut hart) = load(f);
        let event = hart.run(&mem, 10_000).unwrap();
        assert!(matches!(event, Event::Ebreak { .. }), "{:?}", event);
        (mem, hart)
    }

    #[test]
    fn test_arithmetic() {
        let (_, hart) = run(|a| {
            a.addi(Reg::A0, Reg::ZERO, 7);
            a.addi(Reg::A1, Reg::ZERO, -3);
            a.mul(Reg::A2, Reg::A0, Reg::A1);
            a.divw(Reg::A3, Reg::A0, Reg::ZERO);
            a.remw(Reg::A4, Reg::A0, Reg::A1);
            a.addiw(Reg::A5, Reg::ZERO, -1);
            a.srli(Reg::A5, Reg::A5, 32);
        });
        assert_eq!(hart.reg(Reg::A2) as i64, -21);
        assert_eq!(hart.reg(Reg::A3), u64::MAX);
        assert_eq!(hart.reg(Reg::A4) as i64, 1);
        assert_eq!(hart.reg(Reg::A5), 0xFFFF_FFFF);
    }

    #[test]
    fn test_loop_and_memory() {
        let (mem, hart) = run(|a| {
            let top = a.new_label();
            a.lui(Reg::T1, 0x20);
            a.addi(Reg::A0, Reg::ZERO, 10);
            a.addi(Reg::A1, Reg::ZERO, 0);
            a.bind(top);
            a.add(Reg::A1, Reg::A1, Reg::A0);
            a.addi(Reg::A0, Reg::A0, -1);
            a.bnez(Reg::A0, top);
            a.sw(Reg::A1, Reg::T1, 4);
            a.lb(Reg::A2, Reg::T1, 4);
            a.fence(fence_bits::RW, fence_bits::RW);
        });
        assert_eq!(mem.load_u32(0x2_0004).unwrap(), 55);
        assert_eq!(hart.reg(Reg::A2), 55);
    }

    #[test]
    fn test_null_fault_and_runtime_call() {
        let (mem, mut hart) = load(|a| {
            a.ld(Reg::A0, Reg::ZERO, 16);
        });
        assert_eq!(hart.run(&mem, 10).unwrap(), Event::NullFault { pc: BASE, addr: 16 });

        hart.pc = RuntimeEntry::AtSafepoint.address();
        assert_eq!(hart.run(&mem, 10).unwrap(), Event::RuntimeCall(RuntimeEntry::AtSafepoint));
    }

    #[test]
    fn test_float_conversions() {
        let (_, hart) = run(|a| {
            a.addi(Reg::A0, Reg::ZERO, -7);
            a.fcvt_from_int(true, false, FReg::FA0, Reg::A0);
            a.fcvt_fp(false, FReg::FA1, FReg::FA0);
            a.fcvt_to_int(false, true, Reg::A1, FReg::FA1);
            a.fdiv(true, FReg::F2, FReg::FA0, FReg::FA0);
            a.fsub(true, FReg::F2, FReg::F2, FReg::F2);
            a.fdiv(true, FReg::F2, FReg::F2, FReg::F2);
            a.fcvt_to_int(true, false, Reg::A2, FReg::F2);
            a.feq(true, Reg::A3, FReg::F2, FReg::F2);
        });
        assert_eq!(hart.f64_reg(FReg::FA0), -7.0);
        assert_eq!(hart.f32_reg(FReg::FA1), -7.0);
        assert_eq!(hart.reg(Reg::A1) as i64, -7);
        assert_eq!(hart.reg(Reg::A2), i32::MAX as u64);
        assert_eq!(hart.reg(Reg::A3), 0);
    }

    #[test]
    fn test_instruction_limit() {
        let (mem, mut hart) = load(|a| {
            let top = a.new_label();
            a.bind(top);
            a.j(top);
        });
        assert_eq!(hart.run(&mem, 100), Err(SimError::InstructionLimit(100)));
    }
}
