// Lowering of Cast. Integer, Bool and Ptr conversions stay in general registers: the value is
// re-extended to the target's canonical form, and a cast to Bool tests for non-zero. Integer
// to float conversion uses the signed 64-bit cvtsi2s* forms, which are exact for every
// canonical value except U64 above i64::MAX, so U64 conversions in either direction are
// rejected. Float to integer truncates through cvtts*2si, where NaN and out-of-range inputs
// yield i64::MIN before the target extension. f32/f64 use cvtss2sd and cvtsd2ss.

use super::ExprCodegen;
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::RegClass;
use crate::graph::{NodeId, ValueType};
use crate::x64::calling_convention::SCRATCH_GP;
use crate::x64::encoder::{Cond, Extend, Operand};

impl<'g, 'a> ExprCodegen<'g, 'a> {
    pub(super) fn compile_cast(&mut self, id: NodeId, value: NodeId, to: ValueType) -> CompileResult<()> {
        self.gen(value)?;
        let from = self.graph.ty(value)?;

        let no_native = (from == ValueType::U64 && to.is_float())
            || (from.is_float() && matches!(to, ValueType::U64 | ValueType::Bool));
        if no_native {
            return Err(CompileError::unsupported(
                "cast",
                format!("{from} to {to} has no native conversion"),
            ));
        }

        match (from.reg_class(), to.reg_class()) {
            (RegClass::General, RegClass::General) => {
                let dst = self.take_or_copy(value, id)?;
                if to == ValueType::Bool && from != ValueType::Bool {
                    self.encoder.test(dst, dst)?;
                    self.encoder.setcc(Cond::Ne, dst)?;
                    self.encoder.extend(Extend::Zx8, dst, dst)?;
                } else {
                    self.normalize(dst, to)?;
                }
                self.define(id, dst)
            }
            (RegClass::General, RegClass::Float) => {
                let dst = self.alloc_locked(value, id, RegClass::Float)?;
                let src = match self.operand(value)? {
                    Operand::Imm(imm) => {
                        self.encoder.mov_imm(SCRATCH_GP, imm as i64)?;
                        Operand::Reg(SCRATCH_GP)
                    }
                    other => other,
                };
                self.encoder.cvt_int_to_float(to == ValueType::F64, dst, src)?;
                self.consume(value)?;
                self.define(id, dst)
            }
            (RegClass::Float, RegClass::General) => {
                let dst = self.alloc_locked(value, id, RegClass::General)?;
                let src = self.operand(value)?;
                self.encoder.cvt_float_to_int(from == ValueType::F64, dst, src)?;
                self.normalize(dst, to)?;
                self.consume(value)?;
                self.define(id, dst)
            }
            (RegClass::Float, RegClass::Float) if from == to => {
                let dst = self.take_or_copy(value, id)?;
                self.define(id, dst)
            }
            (RegClass::Float, RegClass::Float) => {
                let dst = self.alloc_locked(value, id, RegClass::Float)?;
                let src = self.operand(value)?;
                self.encoder.cvt_float_width(to == ValueType::F64, dst, src)?;
                self.consume(value)?;
                self.define(id, dst)
            }
        }
    }
}
