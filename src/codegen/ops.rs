// Lowering of arithmetic, bitwise logic, shifts and comparisons. Integer operations work on
// the full 64-bit canonical values and re-extend narrow results where the operation can leave
// stray high bits (add, sub, mul, shl, division). The destination is the left operand's
// register when this is its last use, otherwise a fresh copy; for commutative operations the
// operands are swapped when that lets the destination reuse a register or keeps an inline
// immediate on the right. Division pins RAX and RDX, variable shifts pin RCX. Comparisons
// materialize a 0/1 byte with SETcc into a register cleared before the flags are produced;
// float equality combines the parity flag so unordered operands compare unequal.

use super::ExprCodegen;
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::{RegClass, RegOwner};
use crate::core::value_assignment::Storage;
use crate::graph::{ArithOp, CmpPred, LogicOp, NodeId, ValueType};
use crate::x64::calling_convention::{RAX, RCX, RDX, SCRATCH_FP, SCRATCH_GP};
use crate::x64::encoder::{AluOp, Cond, Operand, ShiftOp, SseOp};

#[derive(Debug, Clone, Copy)]
enum IntBinary {
    Alu(AluOp),
    Mul,
}

/// Condition that holds after `cmp lhs, rhs` for `pred`.
pub(super) fn int_condition(pred: CmpPred, signed: bool) -> Cond {
    match (pred, signed) {
        (CmpPred::Eq, _) => Cond::E,
        (CmpPred::Ne, _) => Cond::Ne,
        (CmpPred::Lt, true) => Cond::L,
        (CmpPred::Le, true) => Cond::Le,
        (CmpPred::Gt, true) => Cond::G,
        (CmpPred::Ge, true) => Cond::Ge,
        (CmpPred::Lt, false) => Cond::B,
        (CmpPred::Le, false) => Cond::Be,
        (CmpPred::Gt, false) => Cond::A,
        (CmpPred::Ge, false) => Cond::Ae,
    }
}

/// Predicates whose outcome is a single flag condition.
pub(super) fn is_single_condition(pred: CmpPred, ty: ValueType) -> bool {
    !ty.is_float() || !matches!(pred, CmpPred::Eq | CmpPred::Ne)
}

impl<'g, 'a> ExprCodegen<'g, 'a> {
    pub(super) fn compile_arithmetic(
        &mut self,
        id: NodeId,
        op: ArithOp,
        lhs: NodeId,
        rhs: NodeId,
        ty: ValueType,
    ) -> CompileResult<()> {
        if ty.is_float() {
            return self.compile_float_arithmetic(id, op, lhs, rhs, ty);
        }
        match op {
            ArithOp::Add => self.compile_int_binary(id, IntBinary::Alu(AluOp::Add), true, lhs, rhs, ty),
            ArithOp::Sub => self.compile_int_binary(id, IntBinary::Alu(AluOp::Sub), true, lhs, rhs, ty),
            ArithOp::Mul => self.compile_int_binary(id, IntBinary::Mul, true, lhs, rhs, ty),
            ArithOp::Div | ArithOp::Rem => self.compile_division(id, op, lhs, rhs, ty),
        }
    }

    pub(super) fn compile_logical(
        &mut self,
        id: NodeId,
        op: LogicOp,
        lhs: NodeId,
        rhs: NodeId,
        ty: ValueType,
    ) -> CompileResult<()> {
        match op {
            LogicOp::And => self.compile_int_binary(id, IntBinary::Alu(AluOp::And), false, lhs, rhs, ty),
            LogicOp::Or => self.compile_int_binary(id, IntBinary::Alu(AluOp::Or), false, lhs, rhs, ty),
            LogicOp::Xor => self.compile_int_binary(id, IntBinary::Alu(AluOp::Xor), false, lhs, rhs, ty),
            LogicOp::Shl | LogicOp::Shr => self.compile_shift(id, op, lhs, rhs, ty),
        }
    }

    /// Swap commutative operands when it saves a copy or an immediate load.
    fn prefer_swap(&self, lhs: NodeId, rhs: NodeId) -> bool {
        if self.is_immediate(lhs) {
            return !self.is_immediate(rhs);
        }
        !self.is_reusable(lhs) && self.is_reusable(rhs)
    }

    /// `dst = lhs op rhs` for two-operand integer instructions.
    ///
    /// `needs_extension` is false for bitwise operations, whose results stay
    /// canonical when both inputs are.
    fn compile_int_binary(
        &mut self,
        id: NodeId,
        kind: IntBinary,
        needs_extension: bool,
        lhs: NodeId,
        rhs: NodeId,
        ty: ValueType,
    ) -> CompileResult<()> {
        self.gen(lhs)?;
        self.gen(rhs)?;

        let commutative = !matches!(kind, IntBinary::Alu(AluOp::Sub));
        let (a, b) = if commutative && self.prefer_swap(lhs, rhs) {
            (rhs, lhs)
        } else {
            (lhs, rhs)
        };

        let locked = self.lock_value(b)?;
        let dst = self.take_or_copy(a, id)?;
        self.unlock(locked)?;

        let src = self.operand(b)?;
        match kind {
            IntBinary::Alu(op) => self.encoder.alu(op, dst, src)?,
            IntBinary::Mul => self.encoder.imul(dst, src)?,
        }
        self.consume(b)?;
        if needs_extension {
            self.normalize(dst, ty)?;
        }
        log::trace!("   {id} -> {dst:?}");
        self.define(id, dst)
    }

    /// Signed or unsigned 64-bit division through RDX:RAX.
    fn compile_division(
        &mut self,
        id: NodeId,
        op: ArithOp,
        lhs: NodeId,
        rhs: NodeId,
        ty: ValueType,
    ) -> CompileResult<()> {
        self.gen(lhs)?;
        self.gen(rhs)?;

        self.evict(RAX)?;
        self.evict(RDX)?;
        self.regs.take(RAX, RegOwner::Temp)?;
        self.regs.take(RDX, RegOwner::Temp)?;

        let divisor = match self.operand(rhs)? {
            Operand::Imm(value) => {
                self.encoder.mov_imm(SCRATCH_GP, value as i64)?;
                Operand::Reg(SCRATCH_GP)
            }
            other => other,
        };
        let dividend = self.operand(lhs)?;
        self.encoder.mov(RAX, dividend)?;

        let signed = ty.is_signed();
        if signed {
            self.encoder.cqo()?;
        } else {
            self.encoder.mov_imm(RDX, 0)?;
        }
        self.encoder.div(signed, divisor)?;
        self.consume(lhs)?;
        self.consume(rhs)?;

        let (result, unused) = if op == ArithOp::Div { (RAX, RDX) } else { (RDX, RAX) };
        self.regs.free(unused)?;
        self.normalize(result, ty)?;
        self.define(id, result)
    }

    fn compile_shift(
        &mut self,
        id: NodeId,
        op: LogicOp,
        lhs: NodeId,
        rhs: NodeId,
        ty: ValueType,
    ) -> CompileResult<()> {
        let shift = match op {
            LogicOp::Shl => ShiftOp::Shl,
            _ if ty.is_signed() => ShiftOp::Sar,
            _ => ShiftOp::Shr,
        };
        self.gen(lhs)?;
        self.gen(rhs)?;

        let dst = if let Storage::Immediate(count) = self.storage(rhs)? {
            let dst = self.take_or_copy(lhs, id)?;
            self.encoder.shift_imm(shift, dst, (count & 63) as u8)?;
            self.consume(rhs)?;
            dst
        } else {
            self.evict(RCX)?;
            self.regs.take(RCX, RegOwner::Temp)?;
            let count = self.operand(rhs)?;
            self.encoder.mov(RCX, count)?;
            self.consume(rhs)?;
            let dst = self.take_or_copy(lhs, id)?;
            self.encoder.shift_cl(shift, dst)?;
            self.regs.free(RCX)?;
            dst
        };

        if op == LogicOp::Shl {
            self.normalize(dst, ty)?;
        }
        self.define(id, dst)
    }

    fn compile_float_arithmetic(
        &mut self,
        id: NodeId,
        op: ArithOp,
        lhs: NodeId,
        rhs: NodeId,
        ty: ValueType,
    ) -> CompileResult<()> {
        let sse = match op {
            ArithOp::Add => SseOp::Add,
            ArithOp::Sub => SseOp::Sub,
            ArithOp::Mul => SseOp::Mul,
            ArithOp::Div => SseOp::Div,
            ArithOp::Rem => {
                return Err(CompileError::unsupported(
                    "rem",
                    format!("{ty} remainder has no native instruction"),
                ))
            }
        };
        self.gen(lhs)?;
        self.gen(rhs)?;

        let commutative = matches!(op, ArithOp::Add | ArithOp::Mul);
        let (a, b) = if commutative && self.prefer_swap(lhs, rhs) {
            (rhs, lhs)
        } else {
            (lhs, rhs)
        };

        let locked = self.lock_value(b)?;
        let dst = self.take_or_copy(a, id)?;
        self.unlock(locked)?;

        let src = self.operand(b)?;
        self.encoder.sse(sse, ty == ValueType::F64, dst, src)?;
        self.consume(b)?;
        self.define(id, dst)
    }

    pub(super) fn compile_compare(
        &mut self,
        id: NodeId,
        pred: CmpPred,
        lhs: NodeId,
        rhs: NodeId,
    ) -> CompileResult<()> {
        self.gen(lhs)?;
        self.gen(rhs)?;
        let ty = self.graph.ty(lhs)?;

        let locked_lhs = self.lock_value(lhs)?;
        let locked_rhs = self.lock_value(rhs)?;
        let dst = self.alloc_result(id, RegClass::General);
        self.unlock(locked_rhs)?;
        self.unlock(locked_lhs)?;
        let dst = dst?;

        // Cleared before the compare: setcc only writes the low byte.
        self.encoder.mov_imm(dst, 0)?;
        let cond = self.emit_compare_flags(pred, lhs, rhs)?;
        match (pred, ty.is_float()) {
            (CmpPred::Eq, true) => {
                self.encoder.setcc(Cond::E, dst)?;
                self.encoder.setcc(Cond::Np, SCRATCH_GP)?;
                self.encoder.and8(dst, SCRATCH_GP)?;
            }
            (CmpPred::Ne, true) => {
                self.encoder.setcc(Cond::Ne, dst)?;
                self.encoder.setcc(Cond::P, SCRATCH_GP)?;
                self.encoder.or8(dst, SCRATCH_GP)?;
            }
            _ => self.encoder.setcc(cond, dst)?,
        }

        self.consume(lhs)?;
        self.consume(rhs)?;
        self.define(id, dst)
    }

    /// Emit `cmp`/`ucomis` for `lhs pred rhs` and return the condition that
    /// holds when the predicate is true. For float Eq/Ne the parity flag must
    /// be combined by the caller.
    pub(super) fn emit_compare_flags(
        &mut self,
        pred: CmpPred,
        lhs: NodeId,
        rhs: NodeId,
    ) -> CompileResult<Cond> {
        let ty = self.graph.ty(lhs)?;
        if !ty.is_float() {
            let a = self.gp_register(lhs)?;
            let b = self.operand(rhs)?;
            self.encoder.alu(AluOp::Cmp, a, b)?;
            return Ok(int_condition(pred, ty.is_signed()));
        }

        // ucomis sets CF for "below" and for unordered, so only the
        // above-family conditions are false on NaN; Lt/Le swap operands.
        let (a, b, cond) = match pred {
            CmpPred::Gt => (lhs, rhs, Cond::A),
            CmpPred::Ge => (lhs, rhs, Cond::Ae),
            CmpPred::Lt => (rhs, lhs, Cond::A),
            CmpPred::Le => (rhs, lhs, Cond::Ae),
            CmpPred::Eq => (lhs, rhs, Cond::E),
            CmpPred::Ne => (lhs, rhs, Cond::Ne),
        };
        let double = ty == ValueType::F64;
        let a_reg = match self.operand(a)? {
            Operand::Reg(reg) => reg,
            src => {
                self.encoder.movf(double, SCRATCH_FP, src)?;
                SCRATCH_FP
            }
        };
        let b_operand = self.operand(b)?;
        self.encoder.ucomis(double, a_reg, b_operand)?;
        Ok(cond)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_conditions() {
        assert_eq!(int_condition(CmpPred::Lt, true), Cond::L);
        assert_eq!(int_condition(CmpPred::Lt, false), Cond::B);
        assert_eq!(int_condition(CmpPred::Ge, false), Cond::Ae);
        assert_eq!(int_condition(CmpPred::Ne, true), Cond::Ne);
    }

    #[test]
    fn test_single_condition_predicates() {
        assert!(is_single_condition(CmpPred::Eq, ValueType::I32));
        assert!(is_single_condition(CmpPred::Lt, ValueType::F64));
        assert!(!is_single_condition(CmpPred::Eq, ValueType::F32));
        assert!(!is_single_condition(CmpPred::Ne, ValueType::F64));
    }
}
