//! RV64IMFD instruction decoder.
//!
//! Decodes every instruction the assembler emits into an [`Inst`]. The
//! simulator executes decoded instructions, the far-branch classifier
//! inspects them, and `tosca dump` prints them.

use std::fmt;

use thiserror::Error;

use super::riscv::{Cond, FReg, Reg, opcode};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("illegal instruction {0:#010x}")]
    Illegal(u32),
}

/// Integer ALU operation (register or immediate form).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    Sll,
    Slt,
    Sltu,
    Xor,
    Srl,
    Sra,
    Or,
    And,
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
}

/// Memory access width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    B,
    H,
    W,
    D,
    Bu,
    Hu,
    Wu,
}

impl Width {
    pub fn bytes(self) -> u64 {
        match self {
            Width::B | Width::Bu => 1,
            Width::H | Width::Hu => 2,
            Width::W | Width::Wu => 4,
            Width::D => 8,
        }
    }
}

/// Floating-point operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FpOp {
    Add,
    Sub,
    Mul,
    Div,
    Sqrt,
    Sgnj,
    Sgnjn,
    Sgnjx,
    Min,
    Max,
    /// Convert between single and double (target is the instruction format).
    CvtFp,
    Eq,
    Lt,
    Le,
    Class,
    /// Float to signed integer; `long` selects 64-bit.
    CvtToInt { long: bool },
    /// Signed integer to float; `long` selects 64-bit.
    CvtFromInt { long: bool },
    MvToInt,
    MvFromInt,
}

/// A decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inst {
    Lui { rd: Reg, imm: i64 },
    Auipc { rd: Reg, imm: i64 },
    Jal { rd: Reg, offset: i64 },
    Jalr { rd: Reg, rs1: Reg, offset: i64 },
    Branch { cond: Cond, rs1: Reg, rs2: Reg, offset: i64 },
    Load { width: Width, rd: Reg, rs1: Reg, offset: i64 },
    Store { width: Width, rs1: Reg, rs2: Reg, offset: i64 },
    OpImm { op: AluOp, rd: Reg, rs1: Reg, imm: i64 },
    OpImm32 { op: AluOp, rd: Reg, rs1: Reg, imm: i64 },
    Op { op: AluOp, rd: Reg, rs1: Reg, rs2: Reg },
    Op32 { op: AluOp, rd: Reg, rs1: Reg, rs2: Reg },
    Fence { pred: u32, succ: u32 },
    FenceI,
    Ecall,
    Ebreak,
    FLoad { double: bool, rd: FReg, rs1: Reg, offset: i64 },
    FStore { double: bool, rs1: Reg, rs2: FReg, offset: i64 },
    /// Register operands are raw codes; whether each names an integer or a
    /// floating-point register depends on `op`.
    Fp { op: FpOp, double: bool, rd: u8, rs1: u8, rs2: u8, rm: u8 },
}

fn sext(value: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

fn rd(inst: u32) -> Reg {
    Reg::from_code(inst >> 7)
}

fn rs1(inst: u32) -> Reg {
    Reg::from_code(inst >> 15)
}

fn rs2(inst: u32) -> Reg {
    Reg::from_code(inst >> 20)
}

fn funct3(inst: u32) -> u32 {
    (inst >> 12) & 0x7
}

fn funct7(inst: u32) -> u32 {
    inst >> 25
}

fn i_imm(inst: u32) -> i64 {
    sext((inst >> 20) as u64, 12)
}

fn s_imm(inst: u32) -> i64 {
    let imm = ((inst >> 25) << 5) | ((inst >> 7) & 0x1F);
    sext(imm as u64, 12)
}

/// Extract the byte offset of a B-type instruction.
pub fn b_imm(inst: u32) -> i64 {
    let imm = ((inst >> 31) & 1) << 12
        | ((inst >> 7) & 1) << 11
        | ((inst >> 25) & 0x3F) << 5
        | ((inst >> 8) & 0xF) << 1;
    sext(imm as u64, 13)
}

/// Extract the byte offset of a J-type instruction.
pub fn j_imm(inst: u32) -> i64 {
    let imm = ((inst >> 31) & 1) << 20
        | ((inst >> 12) & 0xFF) << 12
        | ((inst >> 20) & 1) << 11
        | ((inst >> 21) & 0x3FF) << 1;
    sext(imm as u64, 21)
}

fn u_imm(inst: u32) -> i64 {
    sext((inst & 0xFFFF_F000) as u64, 32)
}

/// Decode one 32-bit instruction word.
pub fn decode(inst: u32) -> Result<Inst, DecodeError> {
    let illegal = Err(DecodeError::Illegal(inst));
    let decoded = match inst & 0x7F {
        opcode::LUI => Inst::Lui { rd: rd(inst), imm: u_imm(inst) },
        opcode::AUIPC => Inst::Auipc { rd: rd(inst), imm: u_imm(inst) },
        opcode::JAL => Inst::Jal { rd: rd(inst), offset: j_imm(inst) },
        opcode::JALR if funct3(inst) == 0 => Inst::Jalr {
            rd: rd(inst),
            rs1: rs1(inst),
            offset: i_imm(inst),
        },
        opcode::BRANCH => {
            let cond = match funct3(inst) {
                0b000 => Cond::Eq,
                0b001 => Cond::Ne,
                0b100 => Cond::Lt,
                0b101 => Cond::Ge,
                0b110 => Cond::Ltu,
                0b111 => Cond::Geu,
                _ => return illegal,
            };
            Inst::Branch { cond, rs1: rs1(inst), rs2: rs2(inst), offset: b_imm(inst) }
        }
        opcode::LOAD => {
            let width = match funct3(inst) {
                0b000 => Width::B,
                0b001 => Width::H,
                0b010 => Width::W,
                0b011 => Width::D,
                0b100 => Width::Bu,
                0b101 => Width::Hu,
                0b110 => Width::Wu,
                _ => return illegal,
            };
            Inst::Load { width, rd: rd(inst), rs1: rs1(inst), offset: i_imm(inst) }
        }
        opcode::STORE => {
            let width = match funct3(inst) {
                0b000 => Width::B,
                0b001 => Width::H,
                0b010 => Width::W,
                0b011 => Width::D,
                _ => return illegal,
            };
            Inst::Store { width, rs1: rs1(inst), rs2: rs2(inst), offset: s_imm(inst) }
        }
        opcode::OP_IMM => {
            let imm = i_imm(inst);
            let shamt = ((inst >> 20) & 0x3F) as i64;
            let op = match funct3(inst) {
                0b000 => AluOp::Add,
                0b010 => AluOp::Slt,
                0b011 => AluOp::Sltu,
                0b100 => AluOp::Xor,
                0b110 => AluOp::Or,
                0b111 => AluOp::And,
                0b001 if inst >> 26 == 0 => {
                    return Ok(Inst::OpImm { op: AluOp::Sll, rd: rd(inst), rs1: rs1(inst), imm: shamt });
                }
                0b101 => {
                    let op = match inst >> 26 {
                        0x00 => AluOp::Srl,
                        0x10 => AluOp::Sra,
                        _ => return illegal,
                    };
                    return Ok(Inst::OpImm { op, rd: rd(inst), rs1: rs1(inst), imm: shamt });
                }
                _ => return illegal,
            };
            Inst::OpImm { op, rd: rd(inst), rs1: rs1(inst), imm }
        }
        opcode::OP_IMM_32 => {
            let shamt = ((inst >> 20) & 0x1F) as i64;
            match (funct3(inst), funct7(inst)) {
                (0b000, _) => Inst::OpImm32 { op: AluOp::Add, rd: rd(inst), rs1: rs1(inst), imm: i_imm(inst) },
                (0b001, 0x00) => Inst::OpImm32 { op: AluOp::Sll, rd: rd(inst), rs1: rs1(inst), imm: shamt },
                (0b101, 0x00) => Inst::OpImm32 { op: AluOp::Srl, rd: rd(inst), rs1: rs1(inst), imm: shamt },
                (0b101, 0x20) => Inst::OpImm32 { op: AluOp::Sra, rd: rd(inst), rs1: rs1(inst), imm: shamt },
                _ => return illegal,
            }
        }
        opcode::OP => {
            let op = match (funct7(inst), funct3(inst)) {
                (0x00, 0b000) => AluOp::Add,
                (0x20, 0b000) => AluOp::Sub,
                (0x00, 0b001) => AluOp::Sll,
                (0x00, 0b010) => AluOp::Slt,
                (0x00, 0b011) => AluOp::Sltu,
                (0x00, 0b100) => AluOp::Xor,
                (0x00, 0b101) => AluOp::Srl,
                (0x20, 0b101) => AluOp::Sra,
                (0x00, 0b110) => AluOp::Or,
                (0x00, 0b111) => AluOp::And,
                (0x01, 0b000) => AluOp::Mul,
                (0x01, 0b001) => AluOp::Mulh,
                (0x01, 0b010) => AluOp::Mulhsu,
                (0x01, 0b011) => AluOp::Mulhu,
                (0x01, 0b100) => AluOp::Div,
                (0x01, 0b101) => AluOp::Divu,
                (0x01, 0b110) => AluOp::Rem,
                (0x01, 0b111) => AluOp::Remu,
                _ => return illegal,
            };
            Inst::Op { op, rd: rd(inst), rs1: rs1(inst), rs2: rs2(inst) }
        }
        opcode::OP_32 => {
            let op = match (funct7(inst), funct3(inst)) {
                (0x00, 0b000) => AluOp::Add,
                (0x20, 0b000) => AluOp::Sub,
                (0x00, 0b001) => AluOp::Sll,
                (0x00, 0b101) => AluOp::Srl,
                (0x20, 0b101) => AluOp::Sra,
                (0x01, 0b000) => AluOp::Mul,
                (0x01, 0b100) => AluOp::Div,
                (0x01, 0b101) => AluOp::Divu,
                (0x01, 0b110) => AluOp::Rem,
                (0x01, 0b111) => AluOp::Remu,
                _ => return illegal,
            };
            Inst::Op32 { op, rd: rd(inst), rs1: rs1(inst), rs2: rs2(inst) }
        }
        opcode::MISC_MEM => match funct3(inst) {
            0b000 => Inst::Fence { pred: (inst >> 24) & 0xF, succ: (inst >> 20) & 0xF },
            0b001 => Inst::FenceI,
            _ => return illegal,
        },
        opcode::SYSTEM => match inst {
            0x0000_0073 => Inst::Ecall,
            0x0010_0073 => Inst::Ebreak,
            _ => return illegal,
        },
        opcode::LOAD_FP => match funct3(inst) {
            0b010 | 0b011 => Inst::FLoad {
                double: funct3(inst) == 0b011,
                rd: FReg::new((inst >> 7) as u8),
                rs1: rs1(inst),
                offset: i_imm(inst),
            },
            _ => return illegal,
        },
        opcode::STORE_FP => match funct3(inst) {
            0b010 | 0b011 => Inst::FStore {
                double: funct3(inst) == 0b011,
                rs1: rs1(inst),
                rs2: FReg::new((inst >> 20) as u8),
                offset: s_imm(inst),
            },
            _ => return illegal,
        },
        opcode::OP_FP => return decode_fp(inst),
        _ => return illegal,
    };
    Ok(decoded)
}

fn decode_fp(inst: u32) -> Result<Inst, DecodeError> {
    let fmt = funct7(inst) & 0x3;
    if fmt > 1 {
        return Err(DecodeError::Illegal(inst));
    }
    let double = fmt == 1;
    let f3 = funct3(inst);
    let rs2 = ((inst >> 20) & 0x1F) as u8;
    let op = match (funct7(inst) >> 2, f3) {
        (0b00000, _) => FpOp::Add,
        (0b00001, _) => FpOp::Sub,
        (0b00010, _) => FpOp::Mul,
        (0b00011, _) => FpOp::Div,
        (0b01011, _) => FpOp::Sqrt,
        (0b00100, 0b000) => FpOp::Sgnj,
        (0b00100, 0b001) => FpOp::Sgnjn,
        (0b00100, 0b010) => FpOp::Sgnjx,
        (0b00101, 0b000) => FpOp::Min,
        (0b00101, 0b001) => FpOp::Max,
        (0b01000, _) => FpOp::CvtFp,
        (0b10100, 0b010) => FpOp::Eq,
        (0b10100, 0b001) => FpOp::Lt,
        (0b10100, 0b000) => FpOp::Le,
        (0b11100, 0b001) => FpOp::Class,
        (0b11100, 0b000) => FpOp::MvToInt,
        (0b11110, 0b000) => FpOp::MvFromInt,
        (0b11000, _) if rs2 == 0 || rs2 == 2 => FpOp::CvtToInt { long: rs2 == 2 },
        (0b11010, _) if rs2 == 0 || rs2 == 2 => FpOp::CvtFromInt { long: rs2 == 2 },
        _ => return Err(DecodeError::Illegal(inst)),
    };
    Ok(Inst::Fp {
        op,
        double,
        rd: ((inst >> 7) & 0x1F) as u8,
        rs1: ((inst >> 15) & 0x1F) as u8,
        rs2,
        rm: f3 as u8,
    })
}

fn alu_name(op: AluOp) -> &'static str {
    match op {
        AluOp::Add => "add",
        AluOp::Sub => "sub",
        AluOp::Sll => "sll",
        AluOp::Slt => "slt",
        AluOp::Sltu => "sltu",
        AluOp::Xor => "xor",
        AluOp::Srl => "srl",
        AluOp::Sra => "sra",
        AluOp::Or => "or",
        AluOp::And => "and",
        AluOp::Mul => "mul",
        AluOp::Mulh => "mulh",
        AluOp::Mulhsu => "mulhsu",
        AluOp::Mulhu => "mulhu",
        AluOp::Div => "div",
        AluOp::Divu => "divu",
        AluOp::Rem => "rem",
        AluOp::Remu => "remu",
    }
}

fn fence_set(bits: u32) -> String {
    let mut s = String::new();
    for (bit, c) in [(8, 'i'), (4, 'o'), (2, 'r'), (1, 'w')] {
        if bits & bit != 0 {
            s.push(c);
        }
    }
    s
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Inst::Lui { rd, imm } => write!(f, "lui {}, {:#x}", rd.name(), (imm >> 12) & 0xFFFFF),
            Inst::Auipc { rd, imm } => write!(f, "auipc {}, {:#x}", rd.name(), (imm >> 12) & 0xFFFFF),
            Inst::Jal { rd: Reg::X0, offset } => write!(f, "j {}", offset),
            Inst::Jal { rd, offset } => write!(f, "jal {}, {}", rd.name(), offset),
            Inst::Jalr { rd: Reg::X0, rs1: Reg::X1, offset: 0 } => write!(f, "ret"),
            Inst::Jalr { rd: Reg::X0, rs1, offset: 0 } => write!(f, "jr {}", rs1.name()),
            Inst::Jalr { rd, rs1, offset } => write!(f, "jalr {}, {}({})", rd.name(), offset, rs1.name()),
            Inst::Branch { cond, rs1, rs2: Reg::X0, offset } if matches!(cond, Cond::Eq | Cond::Ne) => {
                let name = if cond == Cond::Eq { "beqz" } else { "bnez" };
                write!(f, "{} {}, {}", name, rs1.name(), offset)
            }
            Inst::Branch { cond, rs1, rs2, offset } => {
                let name = match cond {
                    Cond::Eq => "beq",
                    Cond::Ne => "bne",
                    Cond::Lt => "blt",
                    Cond::Ge => "bge",
                    Cond::Ltu => "bltu",
                    _ => "bgeu",
                };
                write!(f, "{} {}, {}, {}", name, rs1.name(), rs2.name(), offset)
            }
            Inst::Load { width, rd, rs1, offset } => {
                let name = match width {
                    Width::B => "lb",
                    Width::H => "lh",
                    Width::W => "lw",
                    Width::D => "ld",
                    Width::Bu => "lbu",
                    Width::Hu => "lhu",
                    Width::Wu => "lwu",
                };
                write!(f, "{} {}, {}({})", name, rd.name(), offset, rs1.name())
            }
            Inst::Store { width, rs1, rs2, offset } => {
                let name = match width {
                    Width::B | Width::Bu => "sb",
                    Width::H | Width::Hu => "sh",
                    Width::W | Width::Wu => "sw",
                    Width::D => "sd",
                };
                write!(f, "{} {}, {}({})", name, rs2.name(), offset, rs1.name())
            }
            Inst::OpImm { op: AluOp::Add, rd: Reg::X0, rs1: Reg::X0, imm: 0 } => write!(f, "nop"),
            Inst::OpImm { op: AluOp::Add, rd, rs1: Reg::X0, imm } => write!(f, "li {}, {}", rd.name(), imm),
            Inst::OpImm { op: AluOp::Add, rd, rs1, imm: 0 } => write!(f, "mv {}, {}", rd.name(), rs1.name()),
            Inst::OpImm { op: AluOp::Sltu, rd, rs1, imm } => {
                write!(f, "sltiu {}, {}, {}", rd.name(), rs1.name(), imm)
            }
            Inst::OpImm { op, rd, rs1, imm } => {
                write!(f, "{}i {}, {}, {}", alu_name(op), rd.name(), rs1.name(), imm)
            }
            Inst::OpImm32 { op, rd, rs1, imm } => {
                write!(f, "{}iw {}, {}, {}", alu_name(op), rd.name(), rs1.name(), imm)
            }
            Inst::Op { op, rd, rs1, rs2 } => {
                write!(f, "{} {}, {}, {}", alu_name(op), rd.name(), rs1.name(), rs2.name())
            }
            Inst::Op32 { op, rd, rs1, rs2 } => {
                write!(f, "{}w {}, {}, {}", alu_name(op), rd.name(), rs1.name(), rs2.name())
            }
            Inst::Fence { pred, succ } => write!(f, "fence {},{}", fence_set(pred), fence_set(succ)),
            Inst::FenceI => write!(f, "fence.i"),
            Inst::Ecall => write!(f, "ecall"),
            Inst::Ebreak => write!(f, "ebreak"),
            Inst::FLoad { double, rd, rs1, offset } => {
                let name = if double { "fld" } else { "flw" };
                write!(f, "{} f{}, {}({})", name, rd.code(), offset, rs1.name())
            }
            Inst::FStore { double, rs1, rs2, offset } => {
                let name = if double { "fsd" } else { "fsw" };
                write!(f, "{} f{}, {}({})", name, rs2.code(), offset, rs1.name())
            }
            Inst::Fp { op, double, rd, rs1, rs2, .. } => {
                let sfx = if double { "d" } else { "s" };
                let x = |r: u8| Reg::from_code(r as u32).name();
                match op {
                    FpOp::Eq | FpOp::Lt | FpOp::Le => {
                        let name = match op {
                            FpOp::Eq => "feq",
                            FpOp::Lt => "flt",
                            _ => "fle",
                        };
                        write!(f, "{}.{} {}, f{}, f{}", name, sfx, x(rd), rs1, rs2)
                    }
                    FpOp::Class => write!(f, "fclass.{} {}, f{}", sfx, x(rd), rs1),
                    FpOp::MvToInt => write!(f, "fmv.x.{} {}, f{}", if double { "d" } else { "w" }, x(rd), rs1),
                    FpOp::MvFromInt => write!(f, "fmv.{}.x f{}, {}", if double { "d" } else { "w" }, rd, x(rs1)),
                    FpOp::CvtToInt { long } => {
                        write!(f, "fcvt.{}.{} {}, f{}", if long { "l" } else { "w" }, sfx, x(rd), rs1)
                    }
                    FpOp::CvtFromInt { long } => {
                        write!(f, "fcvt.{}.{} f{}, {}", sfx, if long { "l" } else { "w" }, rd, x(rs1))
                    }
                    FpOp::CvtFp => {
                        write!(f, "fcvt.{}.{} f{}, f{}", sfx, if double { "s" } else { "d" }, rd, rs1)
                    }
                    FpOp::Sqrt => write!(f, "fsqrt.{} f{}, f{}", sfx, rd, rs1),
                    _ => {
                        let name = match op {
                            FpOp::Add => "fadd",
                            FpOp::Sub => "fsub",
                            FpOp::Mul => "fmul",
                            FpOp::Div => "fdiv",
                            FpOp::Sgnj => "fsgnj",
                            FpOp::Sgnjn => "fsgnjn",
                            FpOp::Sgnjx => "fsgnjx",
                            FpOp::Min => "fmin",
                            _ => "fmax",
                        };
                        write!(f, "{}.{} f{}, f{}, f{}", name, sfx, rd, rs1, rs2)
                    }
                }
            }
        }
    }
}

/// Disassemble a code region, one line per instruction.
pub fn disassemble(code: &[u8], base: u64) -> Vec<String> {
    code.chunks(4)
        .enumerate()
        .map(|(i, chunk)| {
            let addr = base + (i * 4) as u64;
            if chunk.len() < 4 {
                return format!("{:#010x}:  <{} trailing bytes>", addr, chunk.len());
            }
            let word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            match decode(word) {
                Ok(inst) => format!("{:#010x}:  {:08x}  {}", addr, word, inst),
                Err(_) => format!("{:#010x}:  {:08x}  .word", addr, word),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::codebuf::CodeBuffer;
    use crate::asm::riscv::{Assembler, fence_bits};

    fn words(asm: Assembler) -> Vec<u32> {
        let mut buf = asm.into_buffer();
        buf.patch_forward_refs().unwrap();
        buf.code()
            .chunks(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect()
    }

    #[test]
    fn test_decode_matches_encoder() {
        let mut asm = Assembler::new(CodeBuffer::new(0));
        asm.addi(Reg::SP, Reg::SP, -16);
        asm.ld(Reg::A0, Reg::X22, 8);
        asm.sw(Reg::A1, Reg::X23, -4);
        asm.srai(Reg::T0, Reg::T1, 63);
        asm.remw(Reg::A0, Reg::A1, Reg::A2);
        asm.fence(fence_bits::RW, fence_bits::W);
        asm.fsd(FReg::FS7, Reg::X23, 0);
        let decoded: Vec<Inst> = words(asm).into_iter().map(|w| decode(w).unwrap()).collect();

        assert_eq!(decoded[0], Inst::OpImm { op: AluOp::Add, rd: Reg::SP, rs1: Reg::SP, imm: -16 });
        assert_eq!(decoded[1], Inst::Load { width: Width::D, rd: Reg::A0, rs1: Reg::X22, offset: 8 });
        assert_eq!(decoded[2], Inst::Store { width: Width::W, rs1: Reg::X23, rs2: Reg::A1, offset: -4 });
        assert_eq!(decoded[3], Inst::OpImm { op: AluOp::Sra, rd: Reg::T0, rs1: Reg::T1, imm: 63 });
        assert_eq!(decoded[4], Inst::Op32 { op: AluOp::Rem, rd: Reg::A0, rs1: Reg::A1, rs2: Reg::A2 });
        assert_eq!(decoded[5], Inst::Fence { pred: 3, succ: 1 });
        assert_eq!(decoded[6], Inst::FStore { double: true, rs1: Reg::X23, rs2: FReg::FS7, offset: 0 });
    }

    #[test]
    fn test_branch_offsets() {
        let mut asm = Assembler::new(CodeBuffer::new(0));
        let top = asm.new_label();
        let end = asm.new_label();
        asm.bind(top);
        asm.beq(Reg::A0, Reg::A1, end);
        asm.j(top);
        asm.bind(end);
        let w = words(asm);

        assert_eq!(decode(w[0]).unwrap(), Inst::Branch { cond: Cond::Eq, rs1: Reg::A0, rs2: Reg::A1, offset: 8 });
        assert_eq!(decode(w[1]).unwrap(), Inst::Jal { rd: Reg::ZERO, offset: -4 });
    }

    #[test]
    fn test_display() {
        assert_eq!(decode(0x0000_0013).unwrap().to_string(), "nop");
        assert_eq!(decode(0x0000_8067).unwrap().to_string(), "ret");
        assert_eq!(decode(0x0230_000F).unwrap().to_string(), "fence r,rw");
        assert_eq!(decode(0xFF01_0113).unwrap().to_string(), "addi sp, sp, -16");
    }

    #[test]
    fn test_illegal() {
        assert_eq!(decode(0), Err(DecodeError::Illegal(0)));
        assert!(decode(0xFFFF_FFFF).is_err());
    }
}
