// This module provides x86-64 instruction encoding on top of the iced-x86 Encoder. X64Encoder
// converts AsmReg register references and small operand descriptions (register, rbp/rsp or
// indexed memory, sign-extended imm32) into iced Instructions, encodes each one and appends the
// bytes to a capacity-checked CodeBuffer, so running out of room surfaces as BufferOverflow at
// the instruction that did not fit. It covers the instruction set the expression generator
// needs: 64-bit ALU operations, IMUL, signed and unsigned division, shifts by CL or an
// immediate, sign/zero extension to canonical form, SETcc with condition materialization,
// scalar SSE arithmetic, comparisons and conversions, stack and call instructions. Branches
// are emitted as rel32 forms through the buffer's label machinery.

//! x86-64 instruction encoding using iced-x86.

use super::calling_convention::{RBP, RSP};
use super::code_buffer::{CodeBuffer, FinalizedCode, Label};
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::{AsmReg, RegClass};
use iced_x86::{Code, Encoder, Instruction, MemoryOperand, Register};

const GP64_REGS: [Register; 16] = [
    Register::RAX, Register::RCX, Register::RDX, Register::RBX,
    Register::RSP, Register::RBP, Register::RSI, Register::RDI,
    Register::R8, Register::R9, Register::R10, Register::R11,
    Register::R12, Register::R13, Register::R14, Register::R15,
];

const GP32_REGS: [Register; 16] = [
    Register::EAX, Register::ECX, Register::EDX, Register::EBX,
    Register::ESP, Register::EBP, Register::ESI, Register::EDI,
    Register::R8D, Register::R9D, Register::R10D, Register::R11D,
    Register::R12D, Register::R13D, Register::R14D, Register::R15D,
];

const GP16_REGS: [Register; 16] = [
    Register::AX, Register::CX, Register::DX, Register::BX,
    Register::SP, Register::BP, Register::SI, Register::DI,
    Register::R8W, Register::R9W, Register::R10W, Register::R11W,
    Register::R12W, Register::R13W, Register::R14W, Register::R15W,
];

const GP8_REGS: [Register; 16] = [
    Register::AL, Register::CL, Register::DL, Register::BL,
    Register::SPL, Register::BPL, Register::SIL, Register::DIL,
    Register::R8L, Register::R9L, Register::R10L, Register::R11L,
    Register::R12L, Register::R13L, Register::R14L, Register::R15L,
];

const XMM_REGS: [Register; 16] = [
    Register::XMM0, Register::XMM1, Register::XMM2, Register::XMM3,
    Register::XMM4, Register::XMM5, Register::XMM6, Register::XMM7,
    Register::XMM8, Register::XMM9, Register::XMM10, Register::XMM11,
    Register::XMM12, Register::XMM13, Register::XMM14, Register::XMM15,
];

/// Memory operand `[base + index * scale + disp]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mem {
    pub base: AsmReg,
    pub index: Option<AsmReg>,
    pub scale: u8,
    pub disp: i32,
}

impl Mem {
    pub fn base_disp(base: AsmReg, disp: i32) -> Self {
        Self {
            base,
            index: None,
            scale: 1,
            disp,
        }
    }

    pub fn indexed(base: AsmReg, index: AsmReg, scale: u8, disp: i32) -> Self {
        Self {
            base,
            index: Some(index),
            scale,
            disp,
        }
    }

    /// Frame slot at `rbp + offset`.
    pub fn frame(offset: i32) -> Self {
        Self::base_disp(RBP, offset)
    }

    /// Outgoing argument slot at `rsp + offset`.
    pub fn outgoing(offset: i32) -> Self {
        Self::base_disp(RSP, offset)
    }
}

/// Source operand of a two-operand instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(AsmReg),
    Mem(Mem),
    /// Sign-extended to the operation width.
    Imm(i32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Cmp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShiftOp {
    Shl,
    Shr,
    Sar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseOp {
    Add,
    Sub,
    Mul,
    Div,
}

/// Width conversions into a full 64-bit register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extend {
    Sx8,
    Sx16,
    Sx32,
    Zx8,
    Zx16,
    Zx32,
}

/// x86 condition codes; the discriminant is the 4-bit encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    B = 0x2,
    Ae = 0x3,
    E = 0x4,
    Ne = 0x5,
    Be = 0x6,
    A = 0x7,
    P = 0xA,
    Np = 0xB,
    L = 0xC,
    Ge = 0xD,
    Le = 0xE,
    G = 0xF,
}

impl Cond {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn invert(self) -> Cond {
        match self {
            Cond::B => Cond::Ae,
            Cond::Ae => Cond::B,
            Cond::E => Cond::Ne,
            Cond::Ne => Cond::E,
            Cond::Be => Cond::A,
            Cond::A => Cond::Be,
            Cond::P => Cond::Np,
            Cond::Np => Cond::P,
            Cond::L => Cond::Ge,
            Cond::Ge => Cond::L,
            Cond::Le => Cond::G,
            Cond::G => Cond::Le,
        }
    }

    fn setcc_code(self) -> Code {
        match self {
            Cond::B => Code::Setb_rm8,
            Cond::Ae => Code::Setae_rm8,
            Cond::E => Code::Sete_rm8,
            Cond::Ne => Code::Setne_rm8,
            Cond::Be => Code::Setbe_rm8,
            Cond::A => Code::Seta_rm8,
            Cond::P => Code::Setp_rm8,
            Cond::Np => Code::Setnp_rm8,
            Cond::L => Code::Setl_rm8,
            Cond::Ge => Code::Setge_rm8,
            Cond::Le => Code::Setle_rm8,
            Cond::G => Code::Setg_rm8,
        }
    }
}

/// x86-64 instruction encoder using iced-x86.
pub struct X64Encoder {
    encoder: Encoder,
    buffer: CodeBuffer,
    instructions: usize,
}

impl X64Encoder {
    /// Create an encoder that emits into a buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self {
            encoder: Encoder::new(64),
            buffer: CodeBuffer::new(capacity),
            instructions: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn instruction_count(&self) -> usize {
        self.instructions
    }

    fn gp64(reg: AsmReg) -> CompileResult<Register> {
        Self::lookup(&GP64_REGS, reg, RegClass::General)
    }

    fn gp32(reg: AsmReg) -> CompileResult<Register> {
        Self::lookup(&GP32_REGS, reg, RegClass::General)
    }

    fn gp16(reg: AsmReg) -> CompileResult<Register> {
        Self::lookup(&GP16_REGS, reg, RegClass::General)
    }

    fn gp8(reg: AsmReg) -> CompileResult<Register> {
        Self::lookup(&GP8_REGS, reg, RegClass::General)
    }

    fn xmm(reg: AsmReg) -> CompileResult<Register> {
        Self::lookup(&XMM_REGS, reg, RegClass::Float)
    }

    fn lookup(table: &[Register; 16], reg: AsmReg, class: RegClass) -> CompileResult<Register> {
        if reg.class() != class {
            return Err(CompileError::Encoding {
                reason: format!("{reg:?} is not a {class:?} register"),
            });
        }
        table
            .get(reg.id as usize)
            .copied()
            .ok_or_else(|| CompileError::Encoding {
                reason: format!("invalid register {reg:?}"),
            })
    }

    fn mem(mem: Mem) -> CompileResult<MemoryOperand> {
        let base = Self::gp64(mem.base)?;
        let index = match mem.index {
            Some(index) => Self::gp64(index)?,
            None => Register::None,
        };
        Ok(MemoryOperand::new(
            base,
            index,
            mem.scale as u32,
            mem.disp as i64,
            1,
            false,
            Register::None,
        ))
    }

    fn emit(&mut self, instruction: Instruction) -> CompileResult<()> {
        let ip = self.buffer.len() as u64;
        self.encoder.encode(&instruction, ip)?;
        let mut bytes = self.encoder.take_buffer();
        let result = self.buffer.emit(&bytes);
        bytes.clear();
        self.encoder.set_buffer(bytes);
        self.instructions += 1;
        result
    }

    // Moves

    /// `mov dst, src` at 64 bits; register self-moves are dropped.
    pub fn mov(&mut self, dst: AsmReg, src: Operand) -> CompileResult<()> {
        let d = Self::gp64(dst)?;
        let instruction = match src {
            Operand::Reg(src) if src == dst => return Ok(()),
            Operand::Reg(src) => Instruction::with2(Code::Mov_r64_rm64, d, Self::gp64(src)?)?,
            Operand::Mem(mem) => Instruction::with2(Code::Mov_r64_rm64, d, Self::mem(mem)?)?,
            Operand::Imm(imm) => return self.mov_imm(dst, imm as i64),
        };
        self.emit(instruction)
    }

    /// Load a 64-bit constant with the shortest flag-preserving form.
    pub fn mov_imm(&mut self, dst: AsmReg, value: i64) -> CompileResult<()> {
        let instruction = if (0..=u32::MAX as i64).contains(&value) {
            Instruction::with2(Code::Mov_r32_imm32, Self::gp32(dst)?, value as u32)?
        } else if i32::try_from(value).is_ok() {
            Instruction::with2(Code::Mov_rm64_imm32, Self::gp64(dst)?, value as i32)?
        } else {
            Instruction::with2(Code::Mov_r64_imm64, Self::gp64(dst)?, value)?
        };
        self.emit(instruction)
    }

    /// `mov qword [mem], src`.
    pub fn store(&mut self, mem: Mem, src: AsmReg) -> CompileResult<()> {
        let instruction =
            Instruction::with2(Code::Mov_rm64_r64, Self::mem(mem)?, Self::gp64(src)?)?;
        self.emit(instruction)
    }

    /// `mov qword [mem], imm32` (sign-extended).
    pub fn store_imm(&mut self, mem: Mem, imm: i32) -> CompileResult<()> {
        let instruction = Instruction::with2(Code::Mov_rm64_imm32, Self::mem(mem)?, imm)?;
        self.emit(instruction)
    }

    /// Extend the low bits of `src` into `dst` as a canonical 64-bit value.
    pub fn extend(&mut self, kind: Extend, dst: AsmReg, src: AsmReg) -> CompileResult<()> {
        let instruction = match kind {
            Extend::Sx8 => Instruction::with2(Code::Movsx_r64_rm8, Self::gp64(dst)?, Self::gp8(src)?)?,
            Extend::Sx16 => Instruction::with2(Code::Movsx_r64_rm16, Self::gp64(dst)?, Self::gp16(src)?)?,
            Extend::Sx32 => Instruction::with2(Code::Movsxd_r64_rm32, Self::gp64(dst)?, Self::gp32(src)?)?,
            Extend::Zx8 => Instruction::with2(Code::Movzx_r32_rm8, Self::gp32(dst)?, Self::gp8(src)?)?,
            Extend::Zx16 => Instruction::with2(Code::Movzx_r32_rm16, Self::gp32(dst)?, Self::gp16(src)?)?,
            Extend::Zx32 => Instruction::with2(Code::Mov_r32_rm32, Self::gp32(dst)?, Self::gp32(src)?)?,
        };
        self.emit(instruction)
    }

    /// Load from memory with the given extension (`None` loads 64 bits).
    pub fn load(&mut self, kind: Option<Extend>, dst: AsmReg, mem: Mem) -> CompileResult<()> {
        let m = Self::mem(mem)?;
        let instruction = match kind {
            None => Instruction::with2(Code::Mov_r64_rm64, Self::gp64(dst)?, m)?,
            Some(Extend::Sx8) => Instruction::with2(Code::Movsx_r64_rm8, Self::gp64(dst)?, m)?,
            Some(Extend::Sx16) => Instruction::with2(Code::Movsx_r64_rm16, Self::gp64(dst)?, m)?,
            Some(Extend::Sx32) => Instruction::with2(Code::Movsxd_r64_rm32, Self::gp64(dst)?, m)?,
            Some(Extend::Zx8) => Instruction::with2(Code::Movzx_r32_rm8, Self::gp32(dst)?, m)?,
            Some(Extend::Zx16) => Instruction::with2(Code::Movzx_r32_rm16, Self::gp32(dst)?, m)?,
            Some(Extend::Zx32) => Instruction::with2(Code::Mov_r32_rm32, Self::gp32(dst)?, m)?,
        };
        self.emit(instruction)
    }

    // Integer arithmetic

    /// 64-bit `op dst, src`.
    pub fn alu(&mut self, op: AluOp, dst: AsmReg, src: Operand) -> CompileResult<()> {
        let d = Self::gp64(dst)?;
        let instruction = match src {
            Operand::Imm(imm) => {
                let short = i8::try_from(imm).is_ok();
                let code = match (op, short) {
                    (AluOp::Add, true) => Code::Add_rm64_imm8,
                    (AluOp::Add, false) => Code::Add_rm64_imm32,
                    (AluOp::Sub, true) => Code::Sub_rm64_imm8,
                    (AluOp::Sub, false) => Code::Sub_rm64_imm32,
                    (AluOp::And, true) => Code::And_rm64_imm8,
                    (AluOp::And, false) => Code::And_rm64_imm32,
                    (AluOp::Or, true) => Code::Or_rm64_imm8,
                    (AluOp::Or, false) => Code::Or_rm64_imm32,
                    (AluOp::Xor, true) => Code::Xor_rm64_imm8,
                    (AluOp::Xor, false) => Code::Xor_rm64_imm32,
                    (AluOp::Cmp, true) => Code::Cmp_rm64_imm8,
                    (AluOp::Cmp, false) => Code::Cmp_rm64_imm32,
                };
                Instruction::with2(code, d, imm)?
            }
            Operand::Reg(_) | Operand::Mem(_) => {
                let code = match op {
                    AluOp::Add => Code::Add_r64_rm64,
                    AluOp::Sub => Code::Sub_r64_rm64,
                    AluOp::And => Code::And_r64_rm64,
                    AluOp::Or => Code::Or_r64_rm64,
                    AluOp::Xor => Code::Xor_r64_rm64,
                    AluOp::Cmp => Code::Cmp_r64_rm64,
                };
                match src {
                    Operand::Reg(src) => Instruction::with2(code, d, Self::gp64(src)?)?,
                    Operand::Mem(mem) => Instruction::with2(code, d, Self::mem(mem)?)?,
                    Operand::Imm(_) => unreachable!("immediates handled above"),
                }
            }
        };
        self.emit(instruction)
    }

    /// 64-bit signed multiply `dst *= src`.
    pub fn imul(&mut self, dst: AsmReg, src: Operand) -> CompileResult<()> {
        let d = Self::gp64(dst)?;
        let instruction = match src {
            Operand::Reg(src) => Instruction::with2(Code::Imul_r64_rm64, d, Self::gp64(src)?)?,
            Operand::Mem(mem) => Instruction::with2(Code::Imul_r64_rm64, d, Self::mem(mem)?)?,
            Operand::Imm(imm) => Instruction::with3(Code::Imul_r64_rm64_imm32, d, d, imm)?,
        };
        self.emit(instruction)
    }

    /// `cqo; idiv src` or `div src` on rdx:rax; the caller prepares rdx.
    pub fn div(&mut self, signed: bool, src: Operand) -> CompileResult<()> {
        let code = if signed { Code::Idiv_rm64 } else { Code::Div_rm64 };
        let instruction = match src {
            Operand::Reg(src) => Instruction::with1(code, Self::gp64(src)?)?,
            Operand::Mem(mem) => Instruction::with1(code, Self::mem(mem)?)?,
            Operand::Imm(_) => {
                return Err(CompileError::Encoding {
                    reason: "div takes no immediate operand".into(),
                })
            }
        };
        self.emit(instruction)
    }

    pub fn cqo(&mut self) -> CompileResult<()> {
        self.emit(Instruction::with(Code::Cqo))
    }

    pub fn shift_cl(&mut self, op: ShiftOp, dst: AsmReg) -> CompileResult<()> {
        let code = match op {
            ShiftOp::Shl => Code::Shl_rm64_CL,
            ShiftOp::Shr => Code::Shr_rm64_CL,
            ShiftOp::Sar => Code::Sar_rm64_CL,
        };
        self.emit(Instruction::with2(code, Self::gp64(dst)?, Register::CL)?)
    }

    pub fn shift_imm(&mut self, op: ShiftOp, dst: AsmReg, count: u8) -> CompileResult<()> {
        let code = match op {
            ShiftOp::Shl => Code::Shl_rm64_imm8,
            ShiftOp::Shr => Code::Shr_rm64_imm8,
            ShiftOp::Sar => Code::Sar_rm64_imm8,
        };
        self.emit(Instruction::with2(code, Self::gp64(dst)?, (count & 63) as u32)?)
    }

    pub fn test(&mut self, a: AsmReg, b: AsmReg) -> CompileResult<()> {
        self.emit(Instruction::with2(Code::Test_rm64_r64, Self::gp64(a)?, Self::gp64(b)?)?)
    }

    pub fn setcc(&mut self, cond: Cond, dst: AsmReg) -> CompileResult<()> {
        self.emit(Instruction::with1(cond.setcc_code(), Self::gp8(dst)?)?)
    }

    pub fn and8(&mut self, dst: AsmReg, src: AsmReg) -> CompileResult<()> {
        self.emit(Instruction::with2(Code::And_rm8_r8, Self::gp8(dst)?, Self::gp8(src)?)?)
    }

    pub fn or8(&mut self, dst: AsmReg, src: AsmReg) -> CompileResult<()> {
        self.emit(Instruction::with2(Code::Or_rm8_r8, Self::gp8(dst)?, Self::gp8(src)?)?)
    }

    // Scalar SSE

    pub fn sse(&mut self, op: SseOp, double: bool, dst: AsmReg, src: Operand) -> CompileResult<()> {
        let code = match (op, double) {
            (SseOp::Add, true) => Code::Addsd_xmm_xmmm64,
            (SseOp::Add, false) => Code::Addss_xmm_xmmm32,
            (SseOp::Sub, true) => Code::Subsd_xmm_xmmm64,
            (SseOp::Sub, false) => Code::Subss_xmm_xmmm32,
            (SseOp::Mul, true) => Code::Mulsd_xmm_xmmm64,
            (SseOp::Mul, false) => Code::Mulss_xmm_xmmm32,
            (SseOp::Div, true) => Code::Divsd_xmm_xmmm64,
            (SseOp::Div, false) => Code::Divss_xmm_xmmm32,
        };
        self.xmm_op(code, dst, src)
    }

    /// `ucomisd`/`ucomiss a, b`.
    pub fn ucomis(&mut self, double: bool, a: AsmReg, b: Operand) -> CompileResult<()> {
        let code = if double {
            Code::Ucomisd_xmm_xmmm64
        } else {
            Code::Ucomiss_xmm_xmmm32
        };
        self.xmm_op(code, a, b)
    }

    fn xmm_op(&mut self, code: Code, dst: AsmReg, src: Operand) -> CompileResult<()> {
        let d = Self::xmm(dst)?;
        let instruction = match src {
            Operand::Reg(src) => Instruction::with2(code, d, Self::xmm(src)?)?,
            Operand::Mem(mem) => Instruction::with2(code, d, Self::mem(mem)?)?,
            Operand::Imm(_) => {
                return Err(CompileError::Encoding {
                    reason: "SSE instructions take no immediate operand".into(),
                })
            }
        };
        self.emit(instruction)
    }

    /// Float move into `dst`: `movaps` from a register, `movsd`/`movss` from memory.
    pub fn movf(&mut self, double: bool, dst: AsmReg, src: Operand) -> CompileResult<()> {
        match src {
            Operand::Reg(src) if src == dst => Ok(()),
            Operand::Reg(_) => self.xmm_op(Code::Movaps_xmm_xmmm128, dst, src),
            _ if double => self.xmm_op(Code::Movsd_xmm_xmmm64, dst, src),
            _ => self.xmm_op(Code::Movss_xmm_xmmm32, dst, src),
        }
    }

    /// Store the low 64 bits of `src` to memory.
    pub fn store_f(&mut self, mem: Mem, src: AsmReg) -> CompileResult<()> {
        let instruction =
            Instruction::with2(Code::Movsd_xmmm64_xmm, Self::mem(mem)?, Self::xmm(src)?)?;
        self.emit(instruction)
    }

    pub fn xorps(&mut self, dst: AsmReg) -> CompileResult<()> {
        self.xmm_op(Code::Xorps_xmm_xmmm128, dst, Operand::Reg(dst))
    }

    /// Move raw bits from a GP register (`movq`, or `movd` for 32 bits).
    pub fn mov_gp_to_xmm(&mut self, double: bool, dst: AsmReg, src: AsmReg) -> CompileResult<()> {
        let instruction = if double {
            Instruction::with2(Code::Movq_xmm_rm64, Self::xmm(dst)?, Self::gp64(src)?)?
        } else {
            Instruction::with2(Code::Movd_xmm_rm32, Self::xmm(dst)?, Self::gp32(src)?)?
        };
        self.emit(instruction)
    }

    /// Signed 64-bit integer to float.
    pub fn cvt_int_to_float(&mut self, double: bool, dst: AsmReg, src: Operand) -> CompileResult<()> {
        let code = if double {
            Code::Cvtsi2sd_xmm_rm64
        } else {
            Code::Cvtsi2ss_xmm_rm64
        };
        let d = Self::xmm(dst)?;
        let instruction = match src {
            Operand::Reg(src) => Instruction::with2(code, d, Self::gp64(src)?)?,
            Operand::Mem(mem) => Instruction::with2(code, d, Self::mem(mem)?)?,
            Operand::Imm(_) => {
                return Err(CompileError::Encoding {
                    reason: "cvtsi2s* takes no immediate operand".into(),
                })
            }
        };
        self.emit(instruction)
    }

    /// Truncating float to signed 64-bit integer.
    pub fn cvt_float_to_int(&mut self, double: bool, dst: AsmReg, src: Operand) -> CompileResult<()> {
        let code = if double {
            Code::Cvttsd2si_r64_xmmm64
        } else {
            Code::Cvttss2si_r64_xmmm32
        };
        let d = Self::gp64(dst)?;
        let instruction = match src {
            Operand::Reg(src) => Instruction::with2(code, d, Self::xmm(src)?)?,
            Operand::Mem(mem) => Instruction::with2(code, d, Self::mem(mem)?)?,
            Operand::Imm(_) => {
                return Err(CompileError::Encoding {
                    reason: "cvtts*2si takes no immediate operand".into(),
                })
            }
        };
        self.emit(instruction)
    }

    /// f32 <-> f64 conversion into `dst`.
    pub fn cvt_float_width(&mut self, to_double: bool, dst: AsmReg, src: Operand) -> CompileResult<()> {
        let code = if to_double {
            Code::Cvtss2sd_xmm_xmmm32
        } else {
            Code::Cvtsd2ss_xmm_xmmm64
        };
        self.xmm_op(code, dst, src)
    }

    // Stack and control flow

    pub fn push(&mut self, reg: AsmReg) -> CompileResult<()> {
        self.emit(Instruction::with1(Code::Push_r64, Self::gp64(reg)?)?)
    }

    pub fn pop(&mut self, reg: AsmReg) -> CompileResult<()> {
        self.emit(Instruction::with1(Code::Pop_r64, Self::gp64(reg)?)?)
    }

    pub fn ret(&mut self) -> CompileResult<()> {
        self.emit(Instruction::with(Code::Retnq))
    }

    pub fn call_reg(&mut self, target: AsmReg) -> CompileResult<()> {
        self.emit(Instruction::with1(Code::Call_rm64, Self::gp64(target)?)?)
    }

    pub fn create_label(&mut self) -> Label {
        self.buffer.create_label()
    }

    pub fn bind_label(&mut self, label: Label) -> CompileResult<()> {
        self.buffer.bind_label(label)
    }

    pub fn jmp(&mut self, label: Label) -> CompileResult<()> {
        self.instructions += 1;
        self.buffer.emit_jump(label)
    }

    pub fn jcc(&mut self, cond: Cond, label: Label) -> CompileResult<()> {
        self.instructions += 1;
        self.buffer.emit_jcc(cond.code(), label)
    }

    /// Append already encoded, position-independent bytes.
    pub fn emit_raw(&mut self, bytes: &[u8]) -> CompileResult<()> {
        self.buffer.emit(bytes)
    }

    /// Patch pending branches and return the code.
    pub fn finalize(self) -> CompileResult<FinalizedCode> {
        self.buffer.finalize()
    }
}
