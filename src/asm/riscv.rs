/// RV64IMFD instruction encoding for the template interpreter.
///
/// This module provides functions for encoding RISC-V instructions
/// as machine code words.

use super::codebuf::{CodeBuffer, Label, ReferenceKind};

/// `addi x0, x0, 0`
pub const NOP: u32 = 0x0000_0013;
/// `ebreak`
pub const EBREAK: u32 = 0x0010_0073;
/// `ecall`
pub const ECALL: u32 = 0x0000_0073;
/// `fence.i`
pub const FENCE_I: u32 = 0x0000_100F;

/// Bytes per instruction (no compressed instructions are emitted).
pub const INSTRUCTION_SIZE: usize = 4;

/// RISC-V integer registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Reg {
    X0 = 0, X1 = 1, X2 = 2, X3 = 3,
    X4 = 4, X5 = 5, X6 = 6, X7 = 7,
    X8 = 8, X9 = 9, X10 = 10, X11 = 11,
    X12 = 12, X13 = 13, X14 = 14, X15 = 15,
    X16 = 16, X17 = 17, X18 = 18, X19 = 19,
    X20 = 20, X21 = 21, X22 = 22, X23 = 23,
    X24 = 24, X25 = 25, X26 = 26, X27 = 27,
    X28 = 28, X29 = 29, X30 = 30, X31 = 31,
}

impl Reg {
    pub const ZERO: Reg = Reg::X0;
    pub const RA: Reg = Reg::X1;
    pub const SP: Reg = Reg::X2;
    pub const FP: Reg = Reg::X8;
    pub const T0: Reg = Reg::X5;
    pub const T1: Reg = Reg::X6;
    pub const T2: Reg = Reg::X7;
    pub const A0: Reg = Reg::X10;
    pub const A1: Reg = Reg::X11;
    pub const A2: Reg = Reg::X12;
    pub const A3: Reg = Reg::X13;
    pub const A4: Reg = Reg::X14;
    pub const A5: Reg = Reg::X15;
    pub const A6: Reg = Reg::X16;
    pub const A7: Reg = Reg::X17;
    pub const T3: Reg = Reg::X28;
    pub const T4: Reg = Reg::X29;
    pub const T5: Reg = Reg::X30;
    pub const T6: Reg = Reg::X31;

    const ALL: [Reg; 32] = [
        Reg::X0, Reg::X1, Reg::X2, Reg::X3, Reg::X4, Reg::X5, Reg::X6, Reg::X7,
        Reg::X8, Reg::X9, Reg::X10, Reg::X11, Reg::X12, Reg::X13, Reg::X14, Reg::X15,
        Reg::X16, Reg::X17, Reg::X18, Reg::X19, Reg::X20, Reg::X21, Reg::X22, Reg::X23,
        Reg::X24, Reg::X25, Reg::X26, Reg::X27, Reg::X28, Reg::X29, Reg::X30, Reg::X31,
    ];

    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Reg {
        Reg::ALL[(code & 0x1F) as usize]
    }

    /// ABI name, as printed by the disassembler.
    pub fn name(self) -> &'static str {
        const NAMES: [&str; 32] = [
            "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2",
            "fp", "s1", "a0", "a1", "a2", "a3", "a4", "a5",
            "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7",
            "s8", "s9", "s10", "s11", "t3", "t4", "t5", "t6",
        ];
        NAMES[self as usize]
    }
}

/// RISC-V floating-point registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FReg(u8);

impl FReg {
    pub const F0: FReg = FReg(0);
    pub const F1: FReg = FReg(1);
    pub const F2: FReg = FReg(2);
    pub const FA0: FReg = FReg(10);
    pub const FA1: FReg = FReg(11);
    pub const FS7: FReg = FReg(23);

    pub fn new(code: u8) -> FReg {
        FReg(code & 0x1F)
    }

    pub fn code(self) -> u32 {
        self.0 as u32
    }
}

/// Floating-point rounding modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RoundingMode {
    /// Round to nearest, ties to even
    Rne = 0,
    /// Round towards zero
    Rtz = 1,
    /// Round down
    Rdn = 2,
    /// Round up
    Rup = 3,
    /// Dynamic (from fcsr)
    Dyn = 7,
}

/// Predecessor/successor sets of a `fence`.
pub mod fence_bits {
    pub const I: u32 = 0b1000;
    pub const O: u32 = 0b0100;
    pub const R: u32 = 0b0010;
    pub const W: u32 = 0b0001;
    pub const RW: u32 = R | W;
}

/// Branch conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Ge,
    Ltu,
    Geu,
    Gt,
    Le,
    Gtu,
    Leu,
}

impl Cond {
    /// The condition that is true exactly when `self` is false.
    pub fn negate(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Ge => Cond::Lt,
            Cond::Ltu => Cond::Geu,
            Cond::Geu => Cond::Ltu,
            Cond::Gt => Cond::Le,
            Cond::Le => Cond::Gt,
            Cond::Gtu => Cond::Leu,
            Cond::Leu => Cond::Gtu,
        }
    }

    /// Hardware funct3 plus whether the operands must be swapped.
    fn encoding(self) -> (u32, bool) {
        match self {
            Cond::Eq => (0b000, false),
            Cond::Ne => (0b001, false),
            Cond::Lt => (0b100, false),
            Cond::Ge => (0b101, false),
            Cond::Ltu => (0b110, false),
            Cond::Geu => (0b111, false),
            Cond::Gt => (0b100, true),
            Cond::Le => (0b101, true),
            Cond::Gtu => (0b110, true),
            Cond::Leu => (0b111, true),
        }
    }
}

/// Base opcodes.
pub mod opcode {
    pub const LOAD: u32 = 0x03;
    pub const LOAD_FP: u32 = 0x07;
    pub const MISC_MEM: u32 = 0x0F;
    pub const OP_IMM: u32 = 0x13;
    pub const AUIPC: u32 = 0x17;
    pub const OP_IMM_32: u32 = 0x1B;
    pub const STORE: u32 = 0x23;
    pub const STORE_FP: u32 = 0x27;
    pub const AMO: u32 = 0x2F;
    pub const OP: u32 = 0x33;
    pub const LUI: u32 = 0x37;
    pub const OP_32: u32 = 0x3B;
    pub const OP_FP: u32 = 0x53;
    pub const BRANCH: u32 = 0x63;
    pub const JALR: u32 = 0x67;
    pub const JAL: u32 = 0x6F;
    pub const SYSTEM: u32 = 0x73;
}

pub fn is_simm12(value: i64) -> bool {
    (-2048..2048).contains(&value)
}

pub fn r_type(funct7: u32, rs2: u32, rs1: u32, funct3: u32, rd: u32, op: u32) -> u32 {
    funct7 << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | op
}

pub fn i_type(imm: i32, rs1: u32, funct3: u32, rd: u32, op: u32) -> u32 {
    debug_assert!(is_simm12(imm as i64), "I-type immediate {} out of range", imm);
    ((imm as u32) & 0xFFF) << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | op
}

pub fn s_type(imm: i32, rs2: u32, rs1: u32, funct3: u32, op: u32) -> u32 {
    debug_assert!(is_simm12(imm as i64), "S-type immediate {} out of range", imm);
    let imm = imm as u32;
    ((imm >> 5) & 0x7F) << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | (imm & 0x1F) << 7 | op
}

/// RV64 assembler.
pub struct Assembler {
    buf: CodeBuffer,
}

impl Assembler {
    pub fn new(buf: CodeBuffer) -> Self {
        Self { buf }
    }

    pub fn buffer(&self) -> &CodeBuffer {
        &self.buf
    }

    pub fn buffer_mut(&mut self) -> &mut CodeBuffer {
        &mut self.buf
    }

    pub fn into_buffer(self) -> CodeBuffer {
        self.buf
    }

    /// Absolute address of the next instruction.
    pub fn pc(&self) -> u64 {
        self.buf.pc()
    }

    pub fn offset(&self) -> usize {
        self.buf.offset()
    }

    pub fn new_label(&mut self) -> Label {
        self.buf.new_label()
    }

    pub fn bind(&mut self, label: Label) {
        self.buf.bind(label);
    }

    /// Emit a raw 32-bit instruction.
    pub fn emit_raw(&mut self, inst: u32) {
        self.buf.emit_u32(inst);
    }

    /// Emit a 64-bit data word holding the absolute address of `label`.
    pub fn emit_address_of(&mut self, label: Label) {
        self.buf.emit_forward_ref(label, ReferenceKind::Absolute64);
        self.buf.emit_u64(0);
    }

    pub fn align(&mut self, alignment: usize) {
        self.buf.align(alignment);
    }

    // ==================== Upper immediates and jumps ====================

    /// LUI rd, imm20
    pub fn lui(&mut self, rd: Reg, imm20: i32) {
        self.emit_raw(((imm20 as u32) & 0xFFFFF) << 12 | rd.code() << 7 | opcode::LUI);
    }

    /// AUIPC rd, imm20
    pub fn auipc(&mut self, rd: Reg, imm20: i32) {
        self.emit_raw(((imm20 as u32) & 0xFFFFF) << 12 | rd.code() << 7 | opcode::AUIPC);
    }

    /// JAL rd, label
    pub fn jal_to(&mut self, rd: Reg, target: Label) {
        self.buf.emit_forward_ref(target, ReferenceKind::Jump);
        self.emit_raw(rd.code() << 7 | opcode::JAL);
    }

    /// JAL rd, offset (pc-relative, bytes)
    pub fn jal(&mut self, rd: Reg, offset: i32) {
        self.emit_raw(super::codebuf::encode_j_offset(offset) | rd.code() << 7 | opcode::JAL);
    }

    /// JALR rd, imm(rs1)
    pub fn jalr(&mut self, rd: Reg, rs1: Reg, imm: i32) {
        self.emit_raw(i_type(imm, rs1.code(), 0, rd.code(), opcode::JALR));
    }

    /// J label (jal zero)
    pub fn j(&mut self, target: Label) {
        self.jal_to(Reg::ZERO, target);
    }

    /// JR rs (jalr zero, 0(rs))
    pub fn jr(&mut self, rs: Reg) {
        self.jalr(Reg::ZERO, rs, 0);
    }

    /// JALR ra, 0(rs)
    pub fn call_reg(&mut self, rs: Reg) {
        self.jalr(Reg::RA, rs, 0);
    }

    /// RET (jalr zero, 0(ra))
    pub fn ret(&mut self) {
        self.jalr(Reg::ZERO, Reg::RA, 0);
    }

    // ==================== Branches ====================

    /// Conditional branch to a label.
    pub fn branch(&mut self, cond: Cond, rs1: Reg, rs2: Reg, target: Label) {
        let (funct3, swap) = cond.encoding();
        let (a, b) = if swap { (rs2, rs1) } else { (rs1, rs2) };
        self.buf.emit_forward_ref(target, ReferenceKind::Branch);
        self.emit_raw(b.code() << 20 | a.code() << 15 | funct3 << 12 | opcode::BRANCH);
    }

    /// Conditional branch with an explicit pc-relative byte offset.
    pub fn branch_offset(&mut self, cond: Cond, rs1: Reg, rs2: Reg, offset: i32) {
        let (funct3, swap) = cond.encoding();
        let (a, b) = if swap { (rs2, rs1) } else { (rs1, rs2) };
        self.emit_raw(
            super::codebuf::encode_b_offset(offset)
                | b.code() << 20
                | a.code() << 15
                | funct3 << 12
                | opcode::BRANCH,
        );
    }

    pub fn beq(&mut self, rs1: Reg, rs2: Reg, target: Label) {
        self.branch(Cond::Eq, rs1, rs2, target);
    }

    pub fn bne(&mut self, rs1: Reg, rs2: Reg, target: Label) {
        self.branch(Cond::Ne, rs1, rs2, target);
    }

    pub fn blt(&mut self, rs1: Reg, rs2: Reg, target: Label) {
        self.branch(Cond::Lt, rs1, rs2, target);
    }

    pub fn bge(&mut self, rs1: Reg, rs2: Reg, target: Label) {
        self.branch(Cond::Ge, rs1, rs2, target);
    }

    pub fn bltu(&mut self, rs1: Reg, rs2: Reg, target: Label) {
        self.branch(Cond::Ltu, rs1, rs2, target);
    }

    pub fn bgeu(&mut self, rs1: Reg, rs2: Reg, target: Label) {
        self.branch(Cond::Geu, rs1, rs2, target);
    }

    pub fn bgt(&mut self, rs1: Reg, rs2: Reg, target: Label) {
        self.branch(Cond::Gt, rs1, rs2, target);
    }

    pub fn ble(&mut self, rs1: Reg, rs2: Reg, target: Label) {
        self.branch(Cond::Le, rs1, rs2, target);
    }

    pub fn bgtu(&mut self, rs1: Reg, rs2: Reg, target: Label) {
        self.branch(Cond::Gtu, rs1, rs2, target);
    }

    pub fn bleu(&mut self, rs1: Reg, rs2: Reg, target: Label) {
        self.branch(Cond::Leu, rs1, rs2, target);
    }

    pub fn beqz(&mut self, rs: Reg, target: Label) {
        self.branch(Cond::Eq, rs, Reg::ZERO, target);
    }

    pub fn bnez(&mut self, rs: Reg, target: Label) {
        self.branch(Cond::Ne, rs, Reg::ZERO, target);
    }

    pub fn bltz(&mut self, rs: Reg, target: Label) {
        self.branch(Cond::Lt, rs, Reg::ZERO, target);
    }

    pub fn bgez(&mut self, rs: Reg, target: Label) {
        self.branch(Cond::Ge, rs, Reg::ZERO, target);
    }

    pub fn bgtz(&mut self, rs: Reg, target: Label) {
        self.branch(Cond::Gt, rs, Reg::ZERO, target);
    }

    pub fn blez(&mut self, rs: Reg, target: Label) {
        self.branch(Cond::Le, rs, Reg::ZERO, target);
    }

    // ==================== Loads and Stores ====================

    fn load(&mut self, funct3: u32, rd: Reg, base: Reg, offset: i32) {
        self.emit_raw(i_type(offset, base.code(), funct3, rd.code(), opcode::LOAD));
    }

    fn store(&mut self, funct3: u32, rs: Reg, base: Reg, offset: i32) {
        self.emit_raw(s_type(offset, rs.code(), base.code(), funct3, opcode::STORE));
    }

    /// LB rd, offset(base)
    pub fn lb(&mut self, rd: Reg, base: Reg, offset: i32) {
        self.load(0b000, rd, base, offset);
    }

    /// LH rd, offset(base)
    pub fn lh(&mut self, rd: Reg, base: Reg, offset: i32) {
        self.load(0b001, rd, base, offset);
    }

    /// LW rd, offset(base)
    pub fn lw(&mut self, rd: Reg, base: Reg, offset: i32) {
        self.load(0b010, rd, base, offset);
    }

    /// LD rd, offset(base)
    pub fn ld(&mut self, rd: Reg, base: Reg, offset: i32) {
        self.load(0b011, rd, base, offset);
    }

    /// LBU rd, offset(base)
    pub fn lbu(&mut self, rd: Reg, base: Reg, offset: i32) {
        self.load(0b100, rd, base, offset);
    }

    /// LHU rd, offset(base)
    pub fn lhu(&mut self, rd: Reg, base: Reg, offset: i32) {
        self.load(0b101, rd, base, offset);
    }

    /// LWU rd, offset(base)
    pub fn lwu(&mut self, rd: Reg, base: Reg, offset: i32) {
        self.load(0b110, rd, base, offset);
    }

    /// SB rs, offset(base)
    pub fn sb(&mut self, rs: Reg, base: Reg, offset: i32) {
        self.store(0b000, rs, base, offset);
    }

    /// SH rs, offset(base)
    pub fn sh(&mut self, rs: Reg, base: Reg, offset: i32) {
        self.store(0b001, rs, base, offset);
    }

    /// SW rs, offset(base)
    pub fn sw(&mut self, rs: Reg, base: Reg, offset: i32) {
        self.store(0b010, rs, base, offset);
    }

    /// SD rs, offset(base)
    pub fn sd(&mut self, rs: Reg, base: Reg, offset: i32) {
        self.store(0b011, rs, base, offset);
    }

    /// FLW fd, offset(base)
    pub fn flw(&mut self, fd: FReg, base: Reg, offset: i32) {
        self.emit_raw(i_type(offset, base.code(), 0b010, fd.code(), opcode::LOAD_FP));
    }

    /// FLD fd, offset(base)
    pub fn fld(&mut self, fd: FReg, base: Reg, offset: i32) {
        self.emit_raw(i_type(offset, base.code(), 0b011, fd.code(), opcode::LOAD_FP));
    }

    /// FSW fs, offset(base)
    pub fn fsw(&mut self, fs: FReg, base: Reg, offset: i32) {
        self.emit_raw(s_type(offset, fs.code(), base.code(), 0b010, opcode::STORE_FP));
    }

    /// FSD fs, offset(base)
    pub fn fsd(&mut self, fs: FReg, base: Reg, offset: i32) {
        self.emit_raw(s_type(offset, fs.code(), base.code(), 0b011, opcode::STORE_FP));
    }

    // ==================== Integer immediates ====================

    fn op_imm(&mut self, funct3: u32, rd: Reg, rs1: Reg, imm: i32) {
        self.emit_raw(i_type(imm, rs1.code(), funct3, rd.code(), opcode::OP_IMM));
    }

    /// ADDI rd, rs1, imm
    pub fn addi(&mut self, rd: Reg, rs1: Reg, imm: i32) {
        self.op_imm(0b000, rd, rs1, imm);
    }

    /// SLTI rd, rs1, imm
    pub fn slti(&mut self, rd: Reg, rs1: Reg, imm: i32) {
        self.op_imm(0b010, rd, rs1, imm);
    }

    /// SLTIU rd, rs1, imm
    pub fn sltiu(&mut self, rd: Reg, rs1: Reg, imm: i32) {
        self.op_imm(0b011, rd, rs1, imm);
    }

    /// XORI rd, rs1, imm
    pub fn xori(&mut self, rd: Reg, rs1: Reg, imm: i32) {
        self.op_imm(0b100, rd, rs1, imm);
    }

    /// ORI rd, rs1, imm
    pub fn ori(&mut self, rd: Reg, rs1: Reg, imm: i32) {
        self.op_imm(0b110, rd, rs1, imm);
    }

    /// ANDI rd, rs1, imm
    pub fn andi(&mut self, rd: Reg, rs1: Reg, imm: i32) {
        self.op_imm(0b111, rd, rs1, imm);
    }

    /// SLLI rd, rs1, shamt (6-bit)
    pub fn slli(&mut self, rd: Reg, rs1: Reg, shamt: u32) {
        debug_assert!(shamt < 64);
        self.emit_raw((shamt & 0x3F) << 20 | rs1.code() << 15 | 0b001 << 12 | rd.code() << 7 | opcode::OP_IMM);
    }

    /// SRLI rd, rs1, shamt (6-bit)
    pub fn srli(&mut self, rd: Reg, rs1: Reg, shamt: u32) {
        debug_assert!(shamt < 64);
        self.emit_raw((shamt & 0x3F) << 20 | rs1.code() << 15 | 0b101 << 12 | rd.code() << 7 | opcode::OP_IMM);
    }

    /// SRAI rd, rs1, shamt (6-bit)
    pub fn srai(&mut self, rd: Reg, rs1: Reg, shamt: u32) {
        debug_assert!(shamt < 64);
        self.emit_raw(
            0x10 << 26 | (shamt & 0x3F) << 20 | rs1.code() << 15 | 0b101 << 12 | rd.code() << 7 | opcode::OP_IMM,
        );
    }

    /// ADDIW rd, rs1, imm
    pub fn addiw(&mut self, rd: Reg, rs1: Reg, imm: i32) {
        self.emit_raw(i_type(imm, rs1.code(), 0b000, rd.code(), opcode::OP_IMM_32));
    }

    /// SLLIW rd, rs1, shamt (5-bit)
    pub fn slliw(&mut self, rd: Reg, rs1: Reg, shamt: u32) {
        debug_assert!(shamt < 32);
        self.emit_raw(shamt << 20 | rs1.code() << 15 | 0b001 << 12 | rd.code() << 7 | opcode::OP_IMM_32);
    }

    /// SRLIW rd, rs1, shamt (5-bit)
    pub fn srliw(&mut self, rd: Reg, rs1: Reg, shamt: u32) {
        debug_assert!(shamt < 32);
        self.emit_raw(shamt << 20 | rs1.code() << 15 | 0b101 << 12 | rd.code() << 7 | opcode::OP_IMM_32);
    }

    /// SRAIW rd, rs1, shamt (5-bit)
    pub fn sraiw(&mut self, rd: Reg, rs1: Reg, shamt: u32) {
        debug_assert!(shamt < 32);
        self.emit_raw(0x20 << 25 | shamt << 20 | rs1.code() << 15 | 0b101 << 12 | rd.code() << 7 | opcode::OP_IMM_32);
    }

    // ==================== Integer register-register ====================

    fn op(&mut self, funct7: u32, funct3: u32, rd: Reg, rs1: Reg, rs2: Reg) {
        self.emit_raw(r_type(funct7, rs2.code(), rs1.code(), funct3, rd.code(), opcode::OP));
    }

    fn op32(&mut self, funct7: u32, funct3: u32, rd: Reg, rs1: Reg, rs2: Reg) {
        self.emit_raw(r_type(funct7, rs2.code(), rs1.code(), funct3, rd.code(), opcode::OP_32));
    }

    /// ADD rd, rs1, rs2
    pub fn add(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op(0, 0b000, rd, rs1, rs2);
    }

    /// SUB rd, rs1, rs2
    pub fn sub(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op(0x20, 0b000, rd, rs1, rs2);
    }

    /// SLL rd, rs1, rs2
    pub fn sll(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op(0, 0b001, rd, rs1, rs2);
    }

    /// SLT rd, rs1, rs2
    pub fn slt(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op(0, 0b010, rd, rs1, rs2);
    }

    /// SLTU rd, rs1, rs2
    pub fn sltu(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op(0, 0b011, rd, rs1, rs2);
    }

    /// XOR rd, rs1, rs2
    pub fn xor(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op(0, 0b100, rd, rs1, rs2);
    }

    /// SRL rd, rs1, rs2
    pub fn srl(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op(0, 0b101, rd, rs1, rs2);
    }

    /// SRA rd, rs1, rs2
    pub fn sra(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op(0x20, 0b101, rd, rs1, rs2);
    }

    /// OR rd, rs1, rs2
    pub fn orr(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op(0, 0b110, rd, rs1, rs2);
    }

    /// AND rd, rs1, rs2
    pub fn andr(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op(0, 0b111, rd, rs1, rs2);
    }

    /// MUL rd, rs1, rs2
    pub fn mul(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op(1, 0b000, rd, rs1, rs2);
    }

    /// MULHU rd, rs1, rs2
    pub fn mulhu(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op(1, 0b011, rd, rs1, rs2);
    }

    /// DIV rd, rs1, rs2
    pub fn div(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op(1, 0b100, rd, rs1, rs2);
    }

    /// REM rd, rs1, rs2
    pub fn rem(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op(1, 0b110, rd, rs1, rs2);
    }

    /// ADDW rd, rs1, rs2
    pub fn addw(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op32(0, 0b000, rd, rs1, rs2);
    }

    /// SUBW rd, rs1, rs2
    pub fn subw(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op32(0x20, 0b000, rd, rs1, rs2);
    }

    /// SLLW rd, rs1, rs2
    pub fn sllw(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op32(0, 0b001, rd, rs1, rs2);
    }

    /// SRLW rd, rs1, rs2
    pub fn srlw(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op32(0, 0b101, rd, rs1, rs2);
    }

    /// SRAW rd, rs1, rs2
    pub fn sraw(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op32(0x20, 0b101, rd, rs1, rs2);
    }

    /// MULW rd, rs1, rs2
    pub fn mulw(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op32(1, 0b000, rd, rs1, rs2);
    }

    /// DIVW rd, rs1, rs2
    pub fn divw(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op32(1, 0b100, rd, rs1, rs2);
    }

    /// REMW rd, rs1, rs2
    pub fn remw(&mut self, rd: Reg, rs1: Reg, rs2: Reg) {
        self.op32(1, 0b110, rd, rs1, rs2);
    }

    // ==================== Pseudo instructions ====================

    /// NOP
    pub fn nop(&mut self) {
        self.emit_raw(NOP);
    }

    /// MV rd, rs
    pub fn mv(&mut self, rd: Reg, rs: Reg) {
        self.addi(rd, rs, 0);
    }

    /// NEG rd, rs
    pub fn neg(&mut self, rd: Reg, rs: Reg) {
        self.sub(rd, Reg::ZERO, rs);
    }

    /// NEGW rd, rs
    pub fn negw(&mut self, rd: Reg, rs: Reg) {
        self.subw(rd, Reg::ZERO, rs);
    }

    /// NOT rd, rs
    pub fn not(&mut self, rd: Reg, rs: Reg) {
        self.xori(rd, rs, -1);
    }

    /// SEXT.W rd, rs
    pub fn sext_w(&mut self, rd: Reg, rs: Reg) {
        self.addiw(rd, rs, 0);
    }

    /// SEQZ rd, rs
    pub fn seqz(&mut self, rd: Reg, rs: Reg) {
        self.sltiu(rd, rs, 1);
    }

    /// SNEZ rd, rs
    pub fn snez(&mut self, rd: Reg, rs: Reg) {
        self.sltu(rd, Reg::ZERO, rs);
    }

    // ==================== Memory ordering and system ====================

    /// FENCE pred, succ
    pub fn fence(&mut self, pred: u32, succ: u32) {
        self.emit_raw((pred & 0xF) << 24 | (succ & 0xF) << 20 | opcode::MISC_MEM);
    }

    /// FENCE.I
    pub fn fence_i(&mut self) {
        self.emit_raw(FENCE_I);
    }

    /// ECALL
    pub fn ecall(&mut self) {
        self.emit_raw(ECALL);
    }

    /// EBREAK
    pub fn ebreak(&mut self) {
        self.emit_raw(EBREAK);
    }

    // ==================== Floating point ====================

    fn fp_op(&mut self, funct5: u32, double: bool, rs2: u32, rs1: u32, rm: u32, rd: u32) {
        let funct7 = funct5 << 2 | double as u32;
        self.emit_raw(r_type(funct7, rs2, rs1, rm, rd, opcode::OP_FP));
    }

    /// FADD.S / FADD.D
    pub fn fadd(&mut self, double: bool, fd: FReg, fs1: FReg, fs2: FReg) {
        self.fp_op(0b00000, double, fs2.code(), fs1.code(), RoundingMode::Rne as u32, fd.code());
    }

    /// FSUB.S / FSUB.D
    pub fn fsub(&mut self, double: bool, fd: FReg, fs1: FReg, fs2: FReg) {
        self.fp_op(0b00001, double, fs2.code(), fs1.code(), RoundingMode::Rne as u32, fd.code());
    }

    /// FMUL.S / FMUL.D
    pub fn fmul(&mut self, double: bool, fd: FReg, fs1: FReg, fs2: FReg) {
        self.fp_op(0b00010, double, fs2.code(), fs1.code(), RoundingMode::Rne as u32, fd.code());
    }

    /// FDIV.S / FDIV.D
    pub fn fdiv(&mut self, double: bool, fd: FReg, fs1: FReg, fs2: FReg) {
        self.fp_op(0b00011, double, fs2.code(), fs1.code(), RoundingMode::Rne as u32, fd.code());
    }

    /// FSGNJ.S / FSGNJ.D
    pub fn fsgnj(&mut self, double: bool, fd: FReg, fs1: FReg, fs2: FReg) {
        self.fp_op(0b00100, double, fs2.code(), fs1.code(), 0b000, fd.code());
    }

    /// FSGNJN.S / FSGNJN.D
    pub fn fsgnjn(&mut self, double: bool, fd: FReg, fs1: FReg, fs2: FReg) {
        self.fp_op(0b00100, double, fs2.code(), fs1.code(), 0b001, fd.code());
    }

    /// FMV.S / FMV.D fd, fs
    pub fn fmv(&mut self, double: bool, fd: FReg, fs: FReg) {
        self.fsgnj(double, fd, fs, fs);
    }

    /// FNEG.S / FNEG.D fd, fs
    pub fn fneg(&mut self, double: bool, fd: FReg, fs: FReg) {
        self.fsgnjn(double, fd, fs, fs);
    }

    /// FCVT.S.D (double = false) or FCVT.D.S (double = true)
    pub fn fcvt_fp(&mut self, to_double: bool, fd: FReg, fs: FReg) {
        let rs2 = if to_double { 0 } else { 1 };
        self.fp_op(0b01000, to_double, rs2, fs.code(), RoundingMode::Rne as u32, fd.code());
    }

    /// FEQ.S / FEQ.D rd, fs1, fs2
    pub fn feq(&mut self, double: bool, rd: Reg, fs1: FReg, fs2: FReg) {
        self.fp_op(0b10100, double, fs2.code(), fs1.code(), 0b010, rd.code());
    }

    /// FLT.S / FLT.D rd, fs1, fs2
    pub fn flt(&mut self, double: bool, rd: Reg, fs1: FReg, fs2: FReg) {
        self.fp_op(0b10100, double, fs2.code(), fs1.code(), 0b001, rd.code());
    }

    /// FLE.S / FLE.D rd, fs1, fs2
    pub fn fle(&mut self, double: bool, rd: Reg, fs1: FReg, fs2: FReg) {
        self.fp_op(0b10100, double, fs2.code(), fs1.code(), 0b000, rd.code());
    }

    /// FCLASS.S / FCLASS.D rd, fs
    pub fn fclass(&mut self, double: bool, rd: Reg, fs: FReg) {
        self.fp_op(0b11100, double, 0, fs.code(), 0b001, rd.code());
    }

    /// FCVT.{W,L}.{S,D} rd, fs, rtz (float to signed integer)
    pub fn fcvt_to_int(&mut self, double: bool, long: bool, rd: Reg, fs: FReg) {
        let rs2 = if long { 2 } else { 0 };
        self.fp_op(0b11000, double, rs2, fs.code(), RoundingMode::Rtz as u32, rd.code());
    }

    /// FCVT.{S,D}.{W,L} fd, rs (signed integer to float)
    pub fn fcvt_from_int(&mut self, double: bool, long: bool, fd: FReg, rs: Reg) {
        let rs2 = if long { 2 } else { 0 };
        self.fp_op(0b11010, double, rs2, rs.code(), RoundingMode::Rne as u32, fd.code());
    }

    /// FMV.X.W / FMV.X.D rd, fs
    pub fn fmv_x(&mut self, double: bool, rd: Reg, fs: FReg) {
        self.fp_op(0b11100, double, 0, fs.code(), 0b000, rd.code());
    }

    /// FMV.W.X / FMV.D.X fd, rs
    pub fn fmv_f(&mut self, double: bool, fd: FReg, rs: Reg) {
        self.fp_op(0b11110, double, 0, rs.code(), 0b000, fd.code());
    }
}
