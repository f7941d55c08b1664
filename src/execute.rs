//! Executes a single decoded [`Instruction`] against a [`Hart`] and a
//! [`Bus`].
//!
//! Each public method on [`Executor`] implements exactly one instruction:
//! it reads its source operands, computes the architectural effect, and
//! either writes back `rd`/`pc` or returns an [`Exception`]. No method
//! performs a partial writeback before returning an error.

use log::trace;

use crate::bus::{Bus, BusError};
use crate::exception::Exception;
use crate::hart::{Hart, Specifier};
use crate::instruction::{
    BranchCondition, Instruction, LoadWidth, RegImmOp, RegRegOp, RegRegOp32, RegShiftImmOp,
    RegShiftImmOp32, StoreWidth,
};

type ExecutionResult = Result<(), Exception>;

/// Decodes and executes a single raw instruction word.
///
/// Equivalent to `Instruction::decode(raw_instruction)` followed by
/// [`execute`]; `DecodeError`s are reported as `Exception::IllegalInstruction`.
pub fn execute_raw(hart: &mut Hart, bus: &mut impl Bus, raw_instruction: u32) -> ExecutionResult {
    let instruction =
        Instruction::decode(raw_instruction).map_err(|_| Exception::IllegalInstruction(raw_instruction))?;
    execute(hart, bus, instruction)
}

/// Executes a single already-decoded instruction.
///
/// On success, `hart.x[0]` is zero and `hart.pc` has either been
/// incremented by 4 or set to a control-flow target. On failure, `hart` is
/// left exactly as it was before the call.
pub fn execute(hart: &mut Hart, bus: &mut impl Bus, instruction: Instruction) -> ExecutionResult {
    let mut executor = Executor { hart, bus };
    let result = match instruction {
        Instruction::Lui { dest, immediate } => executor.lui(dest, immediate),
        Instruction::Auipc { dest, immediate } => executor.auipc(dest, immediate),
        Instruction::Jal { dest, offset } => executor.jal(dest, offset),
        Instruction::Jalr { dest, base, offset } => executor.jalr(dest, base, offset),
        Instruction::Branch {
            condition,
            src1,
            src2,
            offset,
        } => {
            let op = match condition {
                BranchCondition::Beq => Executor::beq,
                BranchCondition::Bne => Executor::bne,
                BranchCondition::Blt => Executor::blt,
                BranchCondition::Bge => Executor::bge,
                BranchCondition::Bltu => Executor::bltu,
                BranchCondition::Bgeu => Executor::bgeu,
            };
            op(&mut executor, src1, src2, offset)
        }
        Instruction::Load {
            width,
            dest,
            base,
            offset,
        } => {
            let op = match width {
                LoadWidth::Lb => Executor::lb,
                LoadWidth::Lh => Executor::lh,
                LoadWidth::Lw => Executor::lw,
                LoadWidth::Ld => Executor::ld,
                LoadWidth::Lbu => Executor::lbu,
                LoadWidth::Lhu => Executor::lhu,
                LoadWidth::Lwu => Executor::lwu,
            };
            op(&mut executor, dest, base, offset)
        }
        Instruction::Store {
            width,
            src,
            base,
            offset,
        } => {
            let op = match width {
                StoreWidth::Sb => Executor::sb,
                StoreWidth::Sh => Executor::sh,
                StoreWidth::Sw => Executor::sw,
                StoreWidth::Sd => Executor::sd,
            };
            op(&mut executor, src, base, offset)
        }
        Instruction::OpImm {
            op,
            dest,
            src,
            immediate,
        } => {
            let op = match op {
                RegImmOp::Addi => Executor::addi,
                RegImmOp::Slti => Executor::slti,
                RegImmOp::Sltiu => Executor::sltiu,
                RegImmOp::Xori => Executor::xori,
                RegImmOp::Ori => Executor::ori,
                RegImmOp::Andi => Executor::andi,
            };
            op(&mut executor, dest, src, immediate)
        }
        Instruction::OpShiftImm {
            op,
            dest,
            src,
            shamt,
        } => {
            let op = match op {
                RegShiftImmOp::Slli => Executor::slli,
                RegShiftImmOp::Srli => Executor::srli,
                RegShiftImmOp::Srai => Executor::srai,
            };
            op(&mut executor, dest, src, shamt)
        }
        Instruction::Op {
            op,
            dest,
            src1,
            src2,
        } => {
            let op = match op {
                RegRegOp::Add => Executor::add,
                RegRegOp::Sub => Executor::sub,
                RegRegOp::Sll => Executor::sll,
                RegRegOp::Slt => Executor::slt,
                RegRegOp::Sltu => Executor::sltu,
                RegRegOp::Xor => Executor::xor,
                RegRegOp::Srl => Executor::srl,
                RegRegOp::Sra => Executor::sra,
                RegRegOp::Or => Executor::or,
                RegRegOp::And => Executor::and,
            };
            op(&mut executor, dest, src1, src2)
        }
        Instruction::OpImm32 {
            dest,
            src,
            immediate,
        } => executor.addiw(dest, src, immediate),
        Instruction::OpShiftImm32 {
            op,
            dest,
            src,
            shamt,
        } => {
            let op = match op {
                RegShiftImmOp32::Slliw => Executor::slliw,
                RegShiftImmOp32::Srliw => Executor::srliw,
                RegShiftImmOp32::Sraiw => Executor::sraiw,
            };
            op(&mut executor, dest, src, shamt)
        }
        Instruction::Op32 {
            op,
            dest,
            src1,
            src2,
        } => {
            let op = match op {
                RegRegOp32::Addw => Executor::addw,
                RegRegOp32::Subw => Executor::subw,
                RegRegOp32::Sllw => Executor::sllw,
                RegRegOp32::Srlw => Executor::srlw,
                RegRegOp32::Sraw => Executor::sraw,
            };
            op(&mut executor, dest, src1, src2)
        }
        Instruction::Fence => executor.fence(),
        Instruction::Ecall => executor.ecall(),
        Instruction::Ebreak => executor.ebreak(),
    };
    result
}

#[derive(Debug)]
struct Executor<'a, 'b, B: Bus> {
    hart: &'a mut Hart,
    bus: &'b mut B,
}

impl<'a, 'b, B: Bus> Executor<'a, 'b, B> {
    /// Executes an `addi` instruction.
    ///
    /// > ADDI adds the sign-extended 12-bit immediate to register rs1.
    /// > Arithmetic overflow is ignored and the result is simply the low
    /// > XLEN bits of the result.
    pub fn addi(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing addi {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s.wrapping_add_signed(imm))
    }

    /// Executes a `slti` instruction.
    ///
    /// > SLTI (set less than immediate) places the value 1 in register rd
    /// > if register rs1 is less than the sign-extended immediate when both
    /// > are treated as signed numbers, else 0 is written to rd.
    pub fn slti(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing slti {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| ((s as i64) < imm) as u64)
    }

    /// Executes a `sltiu` instruction.
    ///
    /// > SLTIU is similar but compares the values as unsigned numbers (i.e.,
    /// > the immediate is first sign-extended to XLEN bits then treated as
    /// > an unsigned number).
    pub fn sltiu(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing sltiu {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| (s < (imm as u64)) as u64)
    }

    /// Executes an `andi`/`ori`/`xori` instruction.
    ///
    /// > ANDI, ORI, XORI are logical operations that perform bitwise AND,
    /// > OR, and XOR on register rs1 and the sign-extended 12-bit immediate
    /// > and place the result in rd.
    pub fn andi(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing andi {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s & (imm as u64))
    }

    pub fn ori(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing ori {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s | (imm as u64))
    }

    pub fn xori(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing xori {dest} {src} {immediate}");
        self.reg_imm_op(dest, src, immediate, |s, imm| s ^ (imm as u64))
    }

    /// Executes a `slli` instruction.
    ///
    /// > SLLI is a logical left shift (zeros are shifted into the lower
    /// > bits).
    pub fn slli(&mut self, dest: Specifier, src: Specifier, shamt: u32) -> ExecutionResult {
        trace!("Executing slli {dest} {src} {shamt}");
        self.reg_shamt_op(dest, src, shamt, |s, shamt| s << shamt)
    }

    /// Executes a `srli` instruction.
    ///
    /// > SRLI is a logical right shift (zeros are shifted into the upper
    /// > bits).
    pub fn srli(&mut self, dest: Specifier, src: Specifier, shamt: u32) -> ExecutionResult {
        trace!("Executing srli {dest} {src} {shamt}");
        self.reg_shamt_op(dest, src, shamt, |s, shamt| s >> shamt)
    }

    /// Executes a `srai` instruction.
    ///
    /// > SRAI is an arithmetic right shift (the original sign bit is copied
    /// > into the vacated upper bits).
    pub fn srai(&mut self, dest: Specifier, src: Specifier, shamt: u32) -> ExecutionResult {
        trace!("Executing srai {dest} {src} {shamt}");
        self.reg_shamt_op(dest, src, shamt, |s, shamt| ((s as i64) >> shamt) as u64)
    }

    /// Executes a `lui` instruction.
    ///
    /// > LUI (load upper immediate) places the U-immediate value in the top
    /// > 20 bits of the destination register rd, filling in the lowest 12
    /// > bits with zeros.
    pub fn lui(&mut self, dest: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing lui {dest} {immediate}");
        self.hart.set_x(dest, immediate as u64);
        increment_pc(self.hart);
        Ok(())
    }

    /// Executes an `auipc` instruction.
    ///
    /// > AUIPC (add upper immediate to pc) forms a 32-bit offset from the
    /// > 20-bit U-immediate, filling in the lowest 12 bits with zeros, adds
    /// > this offset to the address of the AUIPC instruction, then places
    /// > the result in register rd.
    pub fn auipc(&mut self, dest: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing auipc {dest} {immediate}");
        let result = self.hart.pc().wrapping_add_signed(immediate);
        self.hart.set_x(dest, result);
        increment_pc(self.hart);
        Ok(())
    }

    /// Executes an `add` instruction.
    ///
    /// > ADD performs the addition of rs1 and rs2.
    pub fn add(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing add {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_add(s2))
    }

    /// Executes a `sub` instruction.
    ///
    /// > SUB performs the subtraction of rs2 from rs1.
    pub fn sub(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sub {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_sub(s2))
    }

    /// Executes a `slt` instruction.
    ///
    /// > SLT and SLTU perform signed and unsigned compares respectively,
    /// > writing 1 to rd if rs1 < rs2, 0 otherwise.
    pub fn slt(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing slt {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| ((s1 as i64) < (s2 as i64)) as u64)
    }

    /// Executes a `sltu` instruction.
    pub fn sltu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sltu {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| (s1 < s2) as u64)
    }

    /// Executes an `and` instruction.
    pub fn and(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing and {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 & s2)
    }

    /// Executes an `or` instruction.
    pub fn or(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing or {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 | s2)
    }

    /// Executes a `xor` instruction.
    pub fn xor(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing xor {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 ^ s2)
    }

    /// Executes a `sll` instruction.
    ///
    /// > SLL, SRL, and SRA perform logical left, logical right, and
    /// > arithmetic right shifts on the value in register rs1 by the shift
    /// > amount held in the lower 6 bits of register rs2.
    pub fn sll(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sll {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 << (s2 & 0x3F))
    }

    /// Executes a `srl` instruction.
    pub fn srl(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing srl {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 >> (s2 & 0x3F))
    }

    /// Executes a `sra` instruction.
    pub fn sra(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sra {dest} {src1} {src2}");
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i64) >> (s2 & 0x3F)) as u64
        })
    }

    /// Executes an `addiw` instruction.
    ///
    /// > ADDIW is an RV64I instruction that adds the sign-extended 12-bit
    /// > immediate to register rs1 and produces the proper sign-extension
    /// > of a 32-bit result in rd. Overflows are ignored and the result is
    /// > the low 32 bits of the result sign-extended to 64 bits.
    pub fn addiw(&mut self, dest: Specifier, src: Specifier, immediate: i64) -> ExecutionResult {
        trace!("Executing addiw {dest} {src} {immediate}");
        self.reg_imm_op_w(dest, src, immediate, |s, imm| s.wrapping_add(imm as i32))
    }

    /// Executes a `slliw` instruction.
    ///
    /// > SLLIW, SRLIW, and SRAIW are RV64I-only instructions that are
    /// > analogously defined but operate on 32-bit values and sign-extend
    /// > their 32-bit results to 64 bits.
    pub fn slliw(&mut self, dest: Specifier, src: Specifier, shamt: u32) -> ExecutionResult {
        trace!("Executing slliw {dest} {src} {shamt}");
        self.reg_shamt_op_w(dest, src, shamt, |s, shamt| s.wrapping_shl(shamt))
    }

    /// Executes a `srliw` instruction.
    pub fn srliw(&mut self, dest: Specifier, src: Specifier, shamt: u32) -> ExecutionResult {
        trace!("Executing srliw {dest} {src} {shamt}");
        self.reg_shamt_op_w(dest, src, shamt, |s, shamt| {
            ((s as u32) >> shamt) as i32
        })
    }

    /// Executes a `sraiw` instruction.
    pub fn sraiw(&mut self, dest: Specifier, src: Specifier, shamt: u32) -> ExecutionResult {
        trace!("Executing sraiw {dest} {src} {shamt}");
        self.reg_shamt_op_w(dest, src, shamt, |s, shamt| s >> shamt)
    }

    /// Executes an `addw` instruction.
    pub fn addw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing addw {dest} {src1} {src2}");
        self.reg_reg_op_w(dest, src1, src2, |s1, s2| s1.wrapping_add(s2))
    }

    /// Executes a `subw` instruction.
    pub fn subw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing subw {dest} {src1} {src2}");
        self.reg_reg_op_w(dest, src1, src2, |s1, s2| s1.wrapping_sub(s2))
    }

    /// Executes a `sllw` instruction.
    ///
    /// > SLLW, SRLW, and SRAW perform the corresponding shift by the shift
    /// > amount held in the lower 5 bits of rs2.
    pub fn sllw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sllw {dest} {src1} {src2}");
        self.reg_reg_op_w(dest, src1, src2, |s1, s2| s1.wrapping_shl((s2 as u32) & 0x1F))
    }

    /// Executes a `srlw` instruction.
    pub fn srlw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing srlw {dest} {src1} {src2}");
        self.reg_reg_op_w(dest, src1, src2, |s1, s2| {
            ((s1 as u32) >> ((s2 as u32) & 0x1F)) as i32
        })
    }

    /// Executes a `sraw` instruction.
    pub fn sraw(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        trace!("Executing sraw {dest} {src1} {src2}");
        self.reg_reg_op_w(dest, src1, src2, |s1, s2| s1 >> ((s2 as u32) & 0x1F))
    }

    /// Executes a `jal` instruction.
    ///
    /// > JAL stores the address of the instruction following the jump (pc+4)
    /// > into register rd.
    pub fn jal(&mut self, dest: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing jal {dest} {offset}");
        self.jump_op(dest, |hart| hart.pc().wrapping_add_signed(offset))
    }

    /// Executes a `jalr` instruction.
    ///
    /// > The target address is obtained by adding the sign-extended
    /// > 12-bit I-immediate to the register rs1, then setting the
    /// > least-significant bit of the result to zero.
    pub fn jalr(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing jalr {dest} {base} {offset}");
        self.jump_op(dest, |hart| hart.x(base).wrapping_add_signed(offset) & !1)
    }

    pub fn beq(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing beq {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 == s2)
    }

    pub fn bne(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing bne {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 != s2)
    }

    pub fn blt(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing blt {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i64) < (s2 as i64))
    }

    pub fn bltu(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing bltu {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 < s2)
    }

    pub fn bge(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing bge {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| (s1 as i64) >= (s2 as i64))
    }

    pub fn bgeu(&mut self, src1: Specifier, src2: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing bgeu {src1} {src2} {offset}");
        self.cond_branch(src1, src2, offset, |s1, s2| s1 >= s2)
    }

    pub fn lb(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing lb {dest} {offset}({base})");
        self.load_op(dest, base, offset, |bus, address| {
            bus.load8(address).map(|value| value as i8 as u64)
        })
    }

    pub fn lbu(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing lbu {dest} {offset}({base})");
        self.load_op(dest, base, offset, |bus, address| {
            bus.load8(address).map(|value| value as u64)
        })
    }

    pub fn lh(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing lh {dest} {offset}({base})");
        self.load_op(dest, base, offset, |bus, address| {
            bus.load16(address).map(|value| value as i16 as u64)
        })
    }

    pub fn lhu(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing lhu {dest} {offset}({base})");
        self.load_op(dest, base, offset, |bus, address| {
            bus.load16(address).map(|value| value as u64)
        })
    }

    pub fn lw(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing lw {dest} {offset}({base})");
        self.load_op(dest, base, offset, |bus, address| {
            bus.load32(address).map(|value| value as i32 as u64)
        })
    }

    /// Executes an `lwu` instruction.
    ///
    /// > LWU loads a 32-bit value from memory and zero-extends this to 64
    /// > bits before storing it in register rd. LWU is only available in
    /// > RV64I.
    pub fn lwu(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing lwu {dest} {offset}({base})");
        self.load_op(dest, base, offset, |bus, address| {
            bus.load32(address).map(|value| value as u64)
        })
    }

    /// Executes an `ld` instruction.
    ///
    /// > The LD instruction loads a 64-bit value from memory into register
    /// > rd for RV64I.
    pub fn ld(&mut self, dest: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing ld {dest} {offset}({base})");
        self.load_op(dest, base, offset, |bus, address| bus.load64(address))
    }

    pub fn sb(&mut self, src: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing sb {src} {offset}({base})");
        self.store_op(src, base, offset, |bus, address, value| {
            bus.store8(address, value as u8)
        })
    }

    pub fn sh(&mut self, src: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing sh {src} {offset}({base})");
        self.store_op(src, base, offset, |bus, address, value| {
            bus.store16(address, value as u16)
        })
    }

    pub fn sw(&mut self, src: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing sw {src} {offset}({base})");
        self.store_op(src, base, offset, |bus, address, value| {
            bus.store32(address, value as u32)
        })
    }

    /// Executes an `sd` instruction.
    ///
    /// > The SD instruction stores 64-bit values from the low bits of
    /// > register rs2 to memory, for RV64I.
    pub fn sd(&mut self, src: Specifier, base: Specifier, offset: i64) -> ExecutionResult {
        trace!("Executing sd {src} {offset}({base})");
        self.store_op(src, base, offset, |bus, address, value| {
            bus.store64(address, value)
        })
    }

    /// Executes a `fence` instruction.
    ///
    /// > Fence is used to order device I/O and memory accesses as viewed by
    /// > other threads. FENCE ensures that all memory and I/O accesses
    /// > preceding it are committed before any that follow it.
    ///
    /// There is a single hart and no memory-ordering hazard to enforce, so
    /// this is implemented as a no-op.
    pub fn fence(&mut self) -> ExecutionResult {
        trace!("Executing fence");
        increment_pc(self.hart);
        Ok(())
    }

    /// Executes an `ecall` instruction.
    ///
    /// > ECALL is used to make a service request to the execution
    /// > environment.
    pub fn ecall(&mut self) -> ExecutionResult {
        trace!("Executing ecall");
        Err(Exception::EnvironmentCall)
    }

    /// Executes an `ebreak` instruction.
    ///
    /// > EBREAK was primarily designed to be used by a debugger to cause
    /// > control to be transferred back to the debugging environment.
    pub fn ebreak(&mut self) -> ExecutionResult {
        trace!("Executing ebreak");
        Err(Exception::Breakpoint)
    }

    // Private generic implementations.

    fn reg_imm_op<F>(&mut self, dest: Specifier, src: Specifier, immediate: i64, op: F) -> ExecutionResult
    where
        F: FnOnce(u64, i64) -> u64,
    {
        let value = op(self.hart.x(src), immediate);
        self.hart.set_x(dest, value);
        increment_pc(self.hart);
        Ok(())
    }

    fn reg_shamt_op<F>(&mut self, dest: Specifier, src: Specifier, shamt: u32, op: F) -> ExecutionResult
    where
        F: FnOnce(u64, u32) -> u64,
    {
        if shamt > 63 {
            panic!("out of range shift amount used");
        }
        let value = op(self.hart.x(src), shamt);
        self.hart.set_x(dest, value);
        increment_pc(self.hart);
        Ok(())
    }

    fn reg_reg_op<F>(&mut self, dest: Specifier, src1: Specifier, src2: Specifier, op: F) -> ExecutionResult
    where
        F: FnOnce(u64, u64) -> u64,
    {
        let value = op(self.hart.x(src1), self.hart.x(src2));
        self.hart.set_x(dest, value);
        increment_pc(self.hart);
        Ok(())
    }

    /// Like [`Self::reg_imm_op`], but the operation is performed on the low
    /// 32 bits and the result is sign-extended to 64 bits.
    fn reg_imm_op_w<F>(&mut self, dest: Specifier, src: Specifier, immediate: i64, op: F) -> ExecutionResult
    where
        F: FnOnce(i32, i64) -> i32,
    {
        let value = op(self.hart.x(src) as i32, immediate) as i64;
        self.hart.set_x(dest, value as u64);
        increment_pc(self.hart);
        Ok(())
    }

    /// Like [`Self::reg_shamt_op`], but shift amounts are 5-bit and the
    /// result is sign-extended to 64 bits.
    fn reg_shamt_op_w<F>(&mut self, dest: Specifier, src: Specifier, shamt: u32, op: F) -> ExecutionResult
    where
        F: FnOnce(i32, u32) -> i32,
    {
        if shamt > 31 {
            panic!("out of range shift amount used");
        }
        let value = op(self.hart.x(src) as i32, shamt) as i64;
        self.hart.set_x(dest, value as u64);
        increment_pc(self.hart);
        Ok(())
    }

    /// Like [`Self::reg_reg_op`], but the operation is performed on the low
    /// 32 bits and the result is sign-extended to 64 bits.
    fn reg_reg_op_w<F>(&mut self, dest: Specifier, src1: Specifier, src2: Specifier, op: F) -> ExecutionResult
    where
        F: FnOnce(i32, i32) -> i32,
    {
        let value = op(self.hart.x(src1) as i32, self.hart.x(src2) as i32) as i64;
        self.hart.set_x(dest, value as u64);
        increment_pc(self.hart);
        Ok(())
    }

    fn jump_op<F>(&mut self, dest: Specifier, compute_target: F) -> ExecutionResult
    where
        F: FnOnce(&Hart) -> u64,
    {
        let new_pc = compute_target(self.hart);
        if new_pc & 0x3 != 0 {
            return Err(Exception::InstructionAddressMisaligned(new_pc));
        }
        let old_pc = std::mem::replace(self.hart.pc_mut(), new_pc);
        self.hart.set_x(dest, old_pc.wrapping_add(4));
        Ok(())
    }

    fn cond_branch<P>(&mut self, src1: Specifier, src2: Specifier, offset: i64, predicate: P) -> ExecutionResult
    where
        P: FnOnce(u64, u64) -> bool,
    {
        if predicate(self.hart.x(src1), self.hart.x(src2)) {
            let new_pc = self.hart.pc().wrapping_add_signed(offset);
            if new_pc & 0x3 != 0 {
                return Err(Exception::InstructionAddressMisaligned(new_pc));
            }
            *self.hart.pc_mut() = new_pc;
        } else {
            increment_pc(self.hart);
        }
        Ok(())
    }

    fn load_op<F>(&mut self, dest: Specifier, base: Specifier, offset: i64, op: F) -> ExecutionResult
    where
        F: FnOnce(&mut B, u64) -> Result<u64, BusError>,
    {
        let address = self.hart.x(base).wrapping_add_signed(offset);
        let value = op(self.bus, address).map_err(|err| match err {
            BusError::Misaligned(addr) => Exception::LoadAddressMisaligned(addr),
            BusError::AccessFault(addr) => Exception::LoadAccessFault(addr),
        })?;
        self.hart.set_x(dest, value);
        increment_pc(self.hart);
        Ok(())
    }

    fn store_op<F>(&mut self, src: Specifier, base: Specifier, offset: i64, op: F) -> ExecutionResult
    where
        F: FnOnce(&mut B, u64, u64) -> Result<(), BusError>,
    {
        let value = self.hart.x(src);
        let address = self.hart.x(base).wrapping_add_signed(offset);
        op(self.bus, address, value).map_err(|err| match err {
            BusError::Misaligned(addr) => Exception::StoreAddressMisaligned(addr),
            BusError::AccessFault(addr) => Exception::StoreAccessFault(addr),
        })?;
        increment_pc(self.hart);
        Ok(())
    }
}

fn increment_pc(hart: &mut Hart) {
    let pc = hart.pc_mut();
    *pc = pc.wrapping_add(4);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testutil::FlatBus;

    fn hart_at(pc: u64) -> Hart {
        Hart::new(pc)
    }

    #[test]
    fn test_addi_negative_immediate() {
        let mut hart = hart_at(0);
        let mut bus = FlatBus::new(0);
        hart.set_x(Specifier::from_u5(2), 5);
        execute(
            &mut hart,
            &mut bus,
            Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: Specifier::from_u5(1),
                src: Specifier::from_u5(2),
                immediate: -1,
            },
        )
        .unwrap();
        assert_eq!(4, hart.x(Specifier::from_u5(1)));
        assert_eq!(4, hart.pc());
    }

    #[test]
    fn test_jalr_rd_equals_rs1() {
        // jalr x1, x1, 4 — writeback must use the snapshotted rs1, not the
        // half-updated rd.
        let mut hart = hart_at(0x1000);
        hart.set_x(Specifier::from_u5(1), 0x2000);
        let mut bus = FlatBus::new(0);
        execute(
            &mut hart,
            &mut bus,
            Instruction::Jalr {
                dest: Specifier::from_u5(1),
                base: Specifier::from_u5(1),
                offset: 4,
            },
        )
        .unwrap();
        assert_eq!(0x2004, hart.pc());
        assert_eq!(0x1004, hart.x(Specifier::from_u5(1)));
    }

    #[test]
    fn test_jal_misaligned_target_leaves_pc_untouched() {
        let mut hart = hart_at(0);
        let mut bus = FlatBus::new(0);
        let err = execute(
            &mut hart,
            &mut bus,
            Instruction::Jal {
                dest: Specifier::from_u5(1),
                offset: 2,
            },
        )
        .unwrap_err();
        assert_eq!(Exception::InstructionAddressMisaligned(2), err);
        assert_eq!(0, hart.pc());
        assert_eq!(0, hart.x(Specifier::from_u5(1)));
    }

    #[test]
    fn test_addw_sign_extends_32_bit_overflow() {
        let mut hart = hart_at(0);
        let mut bus = FlatBus::new(0);
        hart.set_x(Specifier::from_u5(1), 0x7FFF_FFFF);
        hart.set_x(Specifier::from_u5(2), 1);
        execute(
            &mut hart,
            &mut bus,
            Instruction::Op32 {
                op: RegRegOp32::Addw,
                dest: Specifier::from_u5(3),
                src1: Specifier::from_u5(1),
                src2: Specifier::from_u5(2),
            },
        )
        .unwrap();
        assert_eq!(0xFFFF_FFFF_8000_0000, hart.x(Specifier::from_u5(3)));
    }

    #[test]
    fn test_store_then_load_round_trip() {
        let mut hart = hart_at(0);
        let mut bus = FlatBus::new(16);
        hart.set_x(Specifier::from_u5(1), 0xDEAD_BEEF);
        execute(
            &mut hart,
            &mut bus,
            Instruction::Store {
                width: crate::instruction::StoreWidth::Sw,
                src: Specifier::from_u5(1),
                base: Specifier::X0,
                offset: 0,
            },
        )
        .unwrap();
        execute(
            &mut hart,
            &mut bus,
            Instruction::Load {
                width: LoadWidth::Lwu,
                dest: Specifier::from_u5(2),
                base: Specifier::X0,
                offset: 0,
            },
        )
        .unwrap();
        assert_eq!(0xDEAD_BEEF, hart.x(Specifier::from_u5(2)));
    }

    #[test]
    fn test_load_access_fault_leaves_hart_untouched() {
        let mut hart = hart_at(0);
        let mut bus = FlatBus::new(2);
        hart.set_x(Specifier::from_u5(5), 0xFF);
        let err = execute(
            &mut hart,
            &mut bus,
            Instruction::Load {
                width: LoadWidth::Lw,
                dest: Specifier::from_u5(5),
                base: Specifier::X0,
                offset: 0,
            },
        )
        .unwrap_err();
        assert_eq!(Exception::LoadAccessFault(0), err);
        assert_eq!(0xFF, hart.x(Specifier::from_u5(5)));
        assert_eq!(0, hart.pc());
    }

    #[test]
    fn test_write_to_x0_is_swallowed() {
        let mut hart = hart_at(0);
        let mut bus = FlatBus::new(0);
        execute(
            &mut hart,
            &mut bus,
            Instruction::OpImm {
                op: RegImmOp::Addi,
                dest: Specifier::X0,
                src: Specifier::X0,
                immediate: 42,
            },
        )
        .unwrap();
        assert_eq!(0, hart.x(Specifier::X0));
    }

    #[test]
    fn test_ecall_and_ebreak() {
        let mut hart = hart_at(0);
        let mut bus = FlatBus::new(0);
        assert_eq!(
            Exception::EnvironmentCall,
            execute(&mut hart, &mut bus, Instruction::Ecall).unwrap_err()
        );
        assert_eq!(
            Exception::Breakpoint,
            execute(&mut hart, &mut bus, Instruction::Ebreak).unwrap_err()
        );
    }
}
