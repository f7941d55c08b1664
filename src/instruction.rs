//! Assembles the pure fields extracted by [`crate::decode`] into a typed
//! [`Instruction`], rejecting any opcode/funct3/funct7 combination the RV64I
//! base ISA does not define.
//!
//! This is the one place reserved-bit and reserved-encoding checks live;
//! [`crate::execute`] matches on the resulting enum and never re-inspects
//! raw instruction bits.

use log::trace;
use thiserror::Error;

use crate::decode::{
    funct3, funct7, imm_b, imm_i, imm_j, imm_s, imm_u, opcode, rd, rs1, rs2, shamt5, shamt6,
    shift_disambiguator6,
};
use crate::hart::Specifier;

/// A decoded RV64I instruction, ready for execution.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Instruction {
    Lui {
        dest: Specifier,
        immediate: i64,
    },
    Auipc {
        dest: Specifier,
        immediate: i64,
    },
    Jal {
        dest: Specifier,
        offset: i64,
    },
    Jalr {
        dest: Specifier,
        base: Specifier,
        offset: i64,
    },
    Branch {
        condition: BranchCondition,
        src1: Specifier,
        src2: Specifier,
        offset: i64,
    },
    Load {
        width: LoadWidth,
        dest: Specifier,
        base: Specifier,
        offset: i64,
    },
    Store {
        width: StoreWidth,
        src: Specifier,
        base: Specifier,
        offset: i64,
    },
    OpImm {
        op: RegImmOp,
        dest: Specifier,
        src: Specifier,
        immediate: i64,
    },
    OpShiftImm {
        op: RegShiftImmOp,
        dest: Specifier,
        src: Specifier,
        shamt: u32,
    },
    Op {
        op: RegRegOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    OpImm32 {
        dest: Specifier,
        src: Specifier,
        immediate: i64,
    },
    OpShiftImm32 {
        op: RegShiftImmOp32,
        dest: Specifier,
        src: Specifier,
        shamt: u32,
    },
    Op32 {
        op: RegRegOp32,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    Fence,
    Ecall,
    Ebreak,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegImmOp {
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegShiftImmOp {
    Slli,
    Srli,
    Srai,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegRegOp {
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
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegShiftImmOp32 {
    Slliw,
    Srliw,
    Sraiw,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegRegOp32 {
    Addw,
    Subw,
    Sllw,
    Srlw,
    Sraw,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BranchCondition {
    Beq,
    Bne,
    Blt,
    Bge,
    Bltu,
    Bgeu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoadWidth {
    Lb,
    Lh,
    Lw,
    Ld,
    Lbu,
    Lhu,
    Lwu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreWidth {
    Sb,
    Sh,
    Sw,
    Sd,
}

/// The instruction word did not name any valid RV64I opcode/funct3/funct7
/// combination.
#[derive(Error, Debug, Clone, Copy, Eq, PartialEq)]
#[error("illegal instruction {0:#010x}")]
pub struct DecodeError(pub u32);

impl Instruction {
    /// Decodes `raw_instruction` into an [`Instruction`], or reports
    /// [`DecodeError`] if the opcode/funct3/funct7 combination is reserved,
    /// unimplemented, or otherwise does not name a valid RV64I instruction.
    pub fn decode(raw_instruction: u32) -> Result<Self, DecodeError> {
        trace!("Decoding instruction {raw_instruction:#010x}");
        let illegal = || DecodeError(raw_instruction);
        match opcode(raw_instruction) {
            0x37 => Ok(Self::Lui {
                dest: rd_specifier(raw_instruction),
                immediate: imm_u(raw_instruction),
            }),
            0x17 => Ok(Self::Auipc {
                dest: rd_specifier(raw_instruction),
                immediate: imm_u(raw_instruction),
            }),
            0x6F => Ok(Self::Jal {
                dest: rd_specifier(raw_instruction),
                offset: imm_j(raw_instruction),
            }),
            0x67 => {
                if funct3(raw_instruction) != 0 {
                    return Err(illegal());
                }
                Ok(Self::Jalr {
                    dest: rd_specifier(raw_instruction),
                    base: rs1_specifier(raw_instruction),
                    offset: imm_i(raw_instruction),
                })
            }
            0x63 => {
                let condition = match funct3(raw_instruction) {
                    0b000 => BranchCondition::Beq,
                    0b001 => BranchCondition::Bne,
                    0b100 => BranchCondition::Blt,
                    0b101 => BranchCondition::Bge,
                    0b110 => BranchCondition::Bltu,
                    0b111 => BranchCondition::Bgeu,
                    _ => return Err(illegal()),
                };
                Ok(Self::Branch {
                    condition,
                    src1: rs1_specifier(raw_instruction),
                    src2: rs2_specifier(raw_instruction),
                    offset: imm_b(raw_instruction),
                })
            }
            0x03 => {
                let width = match funct3(raw_instruction) {
                    0b000 => LoadWidth::Lb,
                    0b001 => LoadWidth::Lh,
                    0b010 => LoadWidth::Lw,
                    0b011 => LoadWidth::Ld,
                    0b100 => LoadWidth::Lbu,
                    0b101 => LoadWidth::Lhu,
                    0b110 => LoadWidth::Lwu,
                    _ => return Err(illegal()),
                };
                Ok(Self::Load {
                    width,
                    dest: rd_specifier(raw_instruction),
                    base: rs1_specifier(raw_instruction),
                    offset: imm_i(raw_instruction),
                })
            }
            0x23 => {
                let width = match funct3(raw_instruction) {
                    0b000 => StoreWidth::Sb,
                    0b001 => StoreWidth::Sh,
                    0b010 => StoreWidth::Sw,
                    0b011 => StoreWidth::Sd,
                    _ => return Err(illegal()),
                };
                Ok(Self::Store {
                    width,
                    src: rs2_specifier(raw_instruction),
                    base: rs1_specifier(raw_instruction),
                    offset: imm_s(raw_instruction),
                })
            }
            0x13 => match funct3(raw_instruction) {
                0b000 => Ok(Self::op_imm(RegImmOp::Addi, raw_instruction)),
                0b010 => Ok(Self::op_imm(RegImmOp::Slti, raw_instruction)),
                0b011 => Ok(Self::op_imm(RegImmOp::Sltiu, raw_instruction)),
                0b100 => Ok(Self::op_imm(RegImmOp::Xori, raw_instruction)),
                0b110 => Ok(Self::op_imm(RegImmOp::Ori, raw_instruction)),
                0b111 => Ok(Self::op_imm(RegImmOp::Andi, raw_instruction)),
                0b001 => {
                    if shift_disambiguator6(raw_instruction) != 0b000000 {
                        return Err(illegal());
                    }
                    Ok(Self::OpShiftImm {
                        op: RegShiftImmOp::Slli,
                        dest: rd_specifier(raw_instruction),
                        src: rs1_specifier(raw_instruction),
                        shamt: shamt6(raw_instruction),
                    })
                }
                0b101 => match shift_disambiguator6(raw_instruction) {
                    0b000000 => Ok(Self::OpShiftImm {
                        op: RegShiftImmOp::Srli,
                        dest: rd_specifier(raw_instruction),
                        src: rs1_specifier(raw_instruction),
                        shamt: shamt6(raw_instruction),
                    }),
                    0b010000 => Ok(Self::OpShiftImm {
                        op: RegShiftImmOp::Srai,
                        dest: rd_specifier(raw_instruction),
                        src: rs1_specifier(raw_instruction),
                        shamt: shamt6(raw_instruction),
                    }),
                    _ => Err(illegal()),
                },
                _ => Err(illegal()),
            },
            0x33 => {
                let op = match (funct7(raw_instruction), funct3(raw_instruction)) {
                    (0b0000000, 0b000) => RegRegOp::Add,
                    (0b0100000, 0b000) => RegRegOp::Sub,
                    (0b0000000, 0b001) => RegRegOp::Sll,
                    (0b0000000, 0b010) => RegRegOp::Slt,
                    (0b0000000, 0b011) => RegRegOp::Sltu,
                    (0b0000000, 0b100) => RegRegOp::Xor,
                    (0b0000000, 0b101) => RegRegOp::Srl,
                    (0b0100000, 0b101) => RegRegOp::Sra,
                    (0b0000000, 0b110) => RegRegOp::Or,
                    (0b0000000, 0b111) => RegRegOp::And,
                    _ => return Err(illegal()),
                };
                Ok(Self::Op {
                    op,
                    dest: rd_specifier(raw_instruction),
                    src1: rs1_specifier(raw_instruction),
                    src2: rs2_specifier(raw_instruction),
                })
            }
            0x1B => match funct3(raw_instruction) {
                0b000 => Ok(Self::OpImm32 {
                    dest: rd_specifier(raw_instruction),
                    src: rs1_specifier(raw_instruction),
                    immediate: imm_i(raw_instruction),
                }),
                0b001 => {
                    if funct7(raw_instruction) != 0b0000000 {
                        return Err(illegal());
                    }
                    Ok(Self::OpShiftImm32 {
                        op: RegShiftImmOp32::Slliw,
                        dest: rd_specifier(raw_instruction),
                        src: rs1_specifier(raw_instruction),
                        shamt: shamt5(raw_instruction),
                    })
                }
                0b101 => match funct7(raw_instruction) {
                    0b0000000 => Ok(Self::OpShiftImm32 {
                        op: RegShiftImmOp32::Srliw,
                        dest: rd_specifier(raw_instruction),
                        src: rs1_specifier(raw_instruction),
                        shamt: shamt5(raw_instruction),
                    }),
                    0b0100000 => Ok(Self::OpShiftImm32 {
                        op: RegShiftImmOp32::Sraiw,
                        dest: rd_specifier(raw_instruction),
                        src: rs1_specifier(raw_instruction),
                        shamt: shamt5(raw_instruction),
                    }),
                    _ => Err(illegal()),
                },
                _ => Err(illegal()),
            },
            0x3B => {
                let op = match (funct7(raw_instruction), funct3(raw_instruction)) {
                    (0b0000000, 0b000) => RegRegOp32::Addw,
                    (0b0100000, 0b000) => RegRegOp32::Subw,
                    (0b0000000, 0b001) => RegRegOp32::Sllw,
                    (0b0000000, 0b101) => RegRegOp32::Srlw,
                    (0b0100000, 0b101) => RegRegOp32::Sraw,
                    _ => return Err(illegal()),
                };
                Ok(Self::Op32 {
                    op,
                    dest: rd_specifier(raw_instruction),
                    src1: rs1_specifier(raw_instruction),
                    src2: rs2_specifier(raw_instruction),
                })
            }
            0x0F => {
                if funct3(raw_instruction) != 0 {
                    return Err(illegal());
                }
                Ok(Self::Fence)
            }
            0x73 => {
                if funct3(raw_instruction) != 0 {
                    return Err(illegal());
                }
                match imm_i(raw_instruction) {
                    0 => Ok(Self::Ecall),
                    1 => Ok(Self::Ebreak),
                    _ => Err(illegal()),
                }
            }
            _ => Err(illegal()),
        }
    }

    fn op_imm(op: RegImmOp, raw_instruction: u32) -> Self {
        Self::OpImm {
            op,
            dest: rd_specifier(raw_instruction),
            src: rs1_specifier(raw_instruction),
            immediate: imm_i(raw_instruction),
        }
    }
}

fn rd_specifier(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(rd(raw_instruction))
}

fn rs1_specifier(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(rs1(raw_instruction))
}

fn rs2_specifier(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(rs2(raw_instruction))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_addi() {
        // addi x1, x0, -1
        let insn = 0xFFF0_0093;
        assert_eq!(
            Instruction::decode(insn).unwrap(),
            Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: Specifier::from_u5(1),
                src: Specifier::from_u5(0),
                immediate: -1,
            }
        );
    }

    #[test]
    fn test_decode_lui() {
        // lui x2, 0xABCDE
        let insn = 0xABCD_E137;
        assert_eq!(
            Instruction::decode(insn).unwrap(),
            Instruction::Lui {
                dest: Specifier::from_u5(2),
                immediate: 0xFFFF_FFFF_ABCD_E000u64 as i64,
            }
        );
    }

    #[test]
    fn test_decode_rejects_unknown_opcode() {
        let insn = 0x0000_000B;
        assert_eq!(Instruction::decode(insn), Err(DecodeError(insn)));
    }

    #[test]
    fn test_decode_rejects_reserved_branch_funct3() {
        // funct3 = 0b010, reserved for BRANCH
        let insn = 0b0000000_00000_00000_010_00000_1100011;
        assert_eq!(Instruction::decode(insn), Err(DecodeError(insn)));
    }

    #[test]
    fn test_decode_rejects_bad_shift_type() {
        // srli/srai with funct7 = 0x10, reserved (only 0x00 / 0x20 valid).
        let insn = (0b0010000u32 << 25) | (0b101 << 12) | 0x13;
        assert_eq!(Instruction::decode(insn), Err(DecodeError(insn)));
    }

    #[test]
    fn test_decode_srai_accepts_shamt_above_31() {
        // srai x1, x1, 40 — shamt=40 (0b101000) sets insn bit 25, which must
        // not be mistaken for the SRLI/SRAI funct7 discriminant.
        let shamt: u32 = 40;
        let insn = (0b010000u32 << 26) | (shamt << 20) | (1 << 15) | (0b101 << 12) | (1 << 7) | 0x13;
        assert_eq!(
            Instruction::decode(insn).unwrap(),
            Instruction::OpShiftImm {
                op: RegShiftImmOp::Srai,
                dest: Specifier::from_u5(1),
                src: Specifier::from_u5(1),
                shamt: 40,
            }
        );
    }

    #[test]
    fn test_decode_slli_accepts_shamt_above_31() {
        // slli x1, x1, 40 — same boundary for the single-variant SLLI check.
        let shamt: u32 = 40;
        let insn = (shamt << 20) | (1 << 15) | (0b001 << 12) | (1 << 7) | 0x13;
        assert_eq!(
            Instruction::decode(insn).unwrap(),
            Instruction::OpShiftImm {
                op: RegShiftImmOp::Slli,
                dest: Specifier::from_u5(1),
                src: Specifier::from_u5(1),
                shamt: 40,
            }
        );
    }

    #[test]
    fn test_decode_system() {
        assert_eq!(Instruction::decode(0x0000_0073).unwrap(), Instruction::Ecall);
        assert_eq!(Instruction::decode(0x0010_0073).unwrap(), Instruction::Ebreak);
    }

    #[test]
    fn test_decode_jalr_rejects_nonzero_funct3() {
        let insn = (0b001u32 << 12) | 0x67;
        assert_eq!(Instruction::decode(insn), Err(DecodeError(insn)));
    }
}
