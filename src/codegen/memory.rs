// Lowering of FieldDereference and ArrayElement. Both produce a single width-correct load:
// narrow integers are sign- or zero-extended into canonical form, Bool is read as a byte,
// floats go straight into an XMM register. A field load addresses [base + offset]. An element
// load uses [base + index * size] when both are in registers, folds a constant index into the
// displacement, and otherwise computes the address in R11. A base that is not in a register is
// loaded into R11 first.

use super::{extension, ExprCodegen};
use crate::core::error::CompileResult;
use crate::core::register_file::AsmReg;
use crate::graph::{NodeId, ValueType};
use crate::x64::calling_convention::SCRATCH_GP;
use crate::x64::encoder::{AluOp, Mem, Operand, ShiftOp};

impl<'g, 'a> ExprCodegen<'g, 'a> {
    pub(super) fn compile_field(
        &mut self,
        id: NodeId,
        base: NodeId,
        offset: i32,
        ty: ValueType,
    ) -> CompileResult<()> {
        self.gen(base)?;

        let dst = self.alloc_locked(base, id, ty.reg_class())?;
        let base_reg = self.gp_register(base)?;
        self.emit_load(dst, ty, Mem::base_disp(base_reg, offset))?;
        self.consume(base)?;
        log::trace!("📥 {id} = [{base} + {offset}] : {ty}");
        self.define(id, dst)
    }

    pub(super) fn compile_element(
        &mut self,
        id: NodeId,
        base: NodeId,
        index: NodeId,
        ty: ValueType,
    ) -> CompileResult<()> {
        self.gen(base)?;
        self.gen(index)?;

        let locked_base = self.lock_value(base)?;
        let locked_index = self.lock_value(index)?;
        let dst = self.alloc_result(id, ty.reg_class());
        self.unlock(locked_index)?;
        self.unlock(locked_base)?;
        let dst = dst?;

        let scale = ty.size();
        let address = match (self.operand(base)?, self.operand(index)?) {
            (_, Operand::Imm(i)) if i32::try_from(i as i64 * scale as i64).is_ok() => {
                let base_reg = self.gp_register(base)?;
                Mem::base_disp(base_reg, i * scale as i32)
            }
            (Operand::Reg(b), Operand::Reg(i)) => Mem::indexed(b, i, scale as u8, 0),
            (base_operand, Operand::Reg(i)) => {
                self.encoder.mov(SCRATCH_GP, base_operand)?;
                Mem::indexed(SCRATCH_GP, i, scale as u8, 0)
            }
            (base_operand, index_operand) => {
                self.encoder.mov(SCRATCH_GP, index_operand)?;
                if scale > 1 {
                    self.encoder
                        .shift_imm(ShiftOp::Shl, SCRATCH_GP, scale.trailing_zeros() as u8)?;
                }
                self.encoder.alu(AluOp::Add, SCRATCH_GP, base_operand)?;
                Mem::base_disp(SCRATCH_GP, 0)
            }
        };

        self.emit_load(dst, ty, address)?;
        self.consume(base)?;
        self.consume(index)?;
        log::trace!("📥 {id} = {base}[{index}] : {ty}");
        self.define(id, dst)
    }

    fn emit_load(&mut self, dst: AsmReg, ty: ValueType, address: Mem) -> CompileResult<()> {
        if ty.is_float() {
            self.encoder
                .movf(ty == ValueType::F64, dst, Operand::Mem(address))
        } else {
            self.encoder.load(extension(ty), dst, address)
        }
    }
}
