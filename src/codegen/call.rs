// Lowering of ForeignCall. Arguments are generated first; then every value living in a
// caller-saved register (all allocatable XMM registers and the caller-saved GP registers) is
// spilled, so after the call only callee-saved registers and frame slots hold values. That
// also leaves every argument register free, so arguments are moved straight from their
// current locations without parallel-move conflicts. Stack arguments are stored into a
// 16-byte aligned outgoing area below rsp; the frame guarantees rsp is aligned at that point.
// The target address is materialized in R11 and called indirectly. Narrow integer results
// are re-extended because the callee only defines the low bits.

use super::ExprCodegen;
use crate::core::error::CompileResult;
use crate::core::register_file::{RegClass, RegOwner};
use crate::graph::{NodeId, ValueType};
use crate::x64::calling_convention::{
    align_stack, is_caller_saved, return_register, ArgLocation, CCAssigner, SysVAssigner, RSP,
    SCRATCH_GP,
};
use crate::x64::encoder::{AluOp, Mem, Operand};

impl<'g, 'a> ExprCodegen<'g, 'a> {
    pub(super) fn compile_call(
        &mut self,
        id: NodeId,
        target: usize,
        args: &[NodeId],
        ret: ValueType,
    ) -> CompileResult<()> {
        for &arg in args {
            self.gen(arg)?;
        }
        self.spill_caller_saved()?;

        let mut assigner = SysVAssigner::new();
        let mut locations = Vec::with_capacity(args.len());
        for &arg in args {
            let ty = self.graph.ty(arg)?;
            locations.push((arg, ty, assigner.assign_arg(ty.reg_class())));
        }

        let stack_bytes = align_stack(assigner.stack_size());
        if stack_bytes > 0 {
            self.encoder.alu(AluOp::Sub, RSP, Operand::Imm(stack_bytes as i32))?;
        }
        for &(arg, ty, location) in &locations {
            if let ArgLocation::Stack(offset) = location {
                self.store_outgoing(arg, ty, Mem::outgoing(offset))?;
            }
        }
        for &(arg, ty, location) in &locations {
            if let ArgLocation::Register(reg) = location {
                let src = self.operand(arg)?;
                self.copy_to(reg, ty, src)?;
            }
        }

        self.encoder.mov_imm(SCRATCH_GP, target as i64)?;
        self.encoder.call_reg(SCRATCH_GP)?;
        if stack_bytes > 0 {
            self.encoder.alu(AluOp::Add, RSP, Operand::Imm(stack_bytes as i32))?;
        }

        for &arg in args {
            self.consume(arg)?;
        }

        let result = return_register(ret.reg_class());
        self.regs.take(result, RegOwner::Temp)?;
        if ret.reg_class() == RegClass::General {
            self.normalize(result, ret)?;
        }
        self.function.set_makes_calls();
        self.stats.foreign_calls += 1;
        log::trace!("📞 {id} = call {target:#x} with {} args", args.len());
        self.define(id, result)
    }

    /// Move every value out of registers the callee may clobber.
    fn spill_caller_saved(&mut self) -> CompileResult<()> {
        for reg in self.regs.allocated_in(RegClass::General) {
            if is_caller_saved(reg) {
                self.evict(reg)?;
            }
        }
        for reg in self.regs.allocated_in(RegClass::Float) {
            self.evict(reg)?;
        }
        Ok(())
    }

    fn store_outgoing(&mut self, arg: NodeId, ty: ValueType, slot: Mem) -> CompileResult<()> {
        match self.operand(arg)? {
            Operand::Reg(reg) if ty.is_float() => self.encoder.store_f(slot, reg),
            Operand::Reg(reg) => self.encoder.store(slot, reg),
            Operand::Imm(value) => self.encoder.store_imm(slot, value),
            Operand::Mem(src) => {
                self.encoder.load(None, SCRATCH_GP, src)?;
                self.encoder.store(slot, SCRATCH_GP)
            }
        }
    }
}
