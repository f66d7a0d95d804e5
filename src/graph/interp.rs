// This module is the reference evaluator for expression graphs. It computes results with the
// same canonical integer representation as the generated code: 64-bit wrapping arithmetic on
// sign- or zero-extended operands followed by truncation to the declared width, shift counts
// masked to six bits, truncating division, ordered float comparisons and round-to-nearest
// conversions. Operations that would trap in native code (division by zero, i64::MIN / -1)
// and operations without a native lowering are reported as UnsupportedOperation. The safe
// entry point refuses memory and call nodes; evaluate_unchecked performs the memory reads.

//! Reference interpreter used as the oracle for compiled code.

use super::{ArithOp, CmpPred, Constant, ExprGraph, LogicOp, NodeId, NodeKind, ValueType};
use crate::core::error::{CompileError, CompileResult};
use std::fmt;

/// A typed scalar in canonical form.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Value {
    ty: ValueType,
    bits: u64,
}

impl Value {
    /// Integer-like value; `raw` is truncated and extended to `ty`.
    pub fn from_int(ty: ValueType, raw: i64) -> Self {
        Self {
            ty,
            bits: ty.canonicalize(raw) as u64,
        }
    }

    pub fn from_i64(value: i64) -> Self {
        Self::from_int(ValueType::I64, value)
    }

    pub fn from_u64(value: u64) -> Self {
        Self::from_int(ValueType::U64, value as i64)
    }

    pub fn from_bool(value: bool) -> Self {
        Self::from_int(ValueType::Bool, value as i64)
    }

    pub fn from_ptr(address: usize) -> Self {
        Self::from_int(ValueType::Ptr, address as i64)
    }

    pub fn from_f64(value: f64) -> Self {
        Self {
            ty: ValueType::F64,
            bits: value.to_bits(),
        }
    }

    pub fn from_f32(value: f32) -> Self {
        Self {
            ty: ValueType::F32,
            bits: value.to_bits() as u64,
        }
    }

    fn from_float(ty: ValueType, value: f64) -> Self {
        if ty == ValueType::F32 {
            Self::from_f32(value as f32)
        } else {
            Self::from_f64(value)
        }
    }

    pub fn ty(&self) -> ValueType {
        self.ty
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    pub fn as_i64(&self) -> i64 {
        self.bits as i64
    }

    pub fn as_u64(&self) -> u64 {
        self.bits
    }

    pub fn as_bool(&self) -> bool {
        self.bits != 0
    }

    /// Float payload widened to f64.
    pub fn as_f64(&self) -> f64 {
        match self.ty {
            ValueType::F32 => f32::from_bits(self.bits as u32) as f64,
            _ => f64::from_bits(self.bits),
        }
    }

    pub fn as_f32(&self) -> f32 {
        f32::from_bits(self.bits as u32)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.ty.is_float() {
            write!(f, "{}:{}", self.as_f64(), self.ty)
        } else if self.ty.is_signed() {
            write!(f, "{}:{}", self.as_i64(), self.ty)
        } else {
            write!(f, "{}:{}", self.as_u64(), self.ty)
        }
    }
}

/// Evaluate `root` for `args`. Memory and call nodes are refused.
pub fn evaluate(graph: &ExprGraph<'_>, root: NodeId, args: &[Value]) -> CompileResult<Value> {
    Interpreter::new(graph, args, false)?.eval(root)
}

/// Evaluate `root` for `args`, reading memory for field and element nodes.
///
/// # Safety
///
/// Every address computed by a FieldDereference or ArrayElement node on the
/// evaluated path must be valid for an unaligned read of the node's type.
pub unsafe fn evaluate_unchecked(
    graph: &ExprGraph<'_>,
    root: NodeId,
    args: &[Value],
) -> CompileResult<Value> {
    Interpreter::new(graph, args, true)?.eval(root)
}

struct Interpreter<'g, 'a> {
    graph: &'g ExprGraph<'a>,
    args: &'g [Value],
    read_memory: bool,
    cache: Vec<Option<Value>>,
}

impl<'g, 'a> Interpreter<'g, 'a> {
    fn new(graph: &'g ExprGraph<'a>, args: &'g [Value], read_memory: bool) -> CompileResult<Self> {
        let expected = graph.param_types();
        if args.len() != expected.len() {
            return Err(CompileError::InvalidParameter {
                index: args.len(),
                count: expected.len(),
            });
        }
        for (arg, ty) in args.iter().zip(&expected) {
            if arg.ty != *ty {
                return Err(CompileError::type_mismatch(
                    "evaluate",
                    format!("argument is {}, parameter is {ty}", arg.ty),
                ));
            }
        }
        Ok(Self {
            graph,
            args,
            read_memory,
            cache: vec![None; graph.len()],
        })
    }

    fn eval(&mut self, id: NodeId) -> CompileResult<Value> {
        if let Some(value) = self.cache.get(id.index()).copied().flatten() {
            return Ok(value);
        }
        let node = self.graph.node(id)?;
        let ty = node.ty;

        let value = match node.kind {
            NodeKind::Immediate(Constant::Int(v)) => Value::from_int(ty, v),
            NodeKind::Immediate(Constant::Float(f)) => Value::from_float(ty, f),
            NodeKind::Parameter { index } => self.args[index as usize],
            NodeKind::BinaryArithmetic { op, lhs, rhs } => {
                let (a, b) = (self.eval(lhs)?, self.eval(rhs)?);
                arith(op, ty, a, b)?
            }
            NodeKind::BinaryLogical { op, lhs, rhs } => {
                let (a, b) = (self.eval(lhs)?, self.eval(rhs)?);
                logic(op, ty, a, b)
            }
            NodeKind::Compare { pred, lhs, rhs } => {
                let (a, b) = (self.eval(lhs)?, self.eval(rhs)?);
                Value::from_bool(compare(pred, a, b))
            }
            NodeKind::Conditional {
                cond,
                then_value,
                else_value,
            } => {
                if self.eval(cond)?.as_bool() {
                    self.eval(then_value)?
                } else {
                    self.eval(else_value)?
                }
            }
            NodeKind::FieldDereference { base, offset } => {
                let base = self.eval(base)?;
                let address = base.as_u64().wrapping_add(offset as i64 as u64);
                self.load(ty, address)?
            }
            NodeKind::ArrayElement { base, index } => {
                let (base, index) = (self.eval(base)?, self.eval(index)?);
                let scaled = index.as_i64().wrapping_mul(ty.size() as i64);
                self.load(ty, base.as_u64().wrapping_add(scaled as u64))?
            }
            NodeKind::ForeignCall { target, .. } => {
                return Err(CompileError::unsupported(
                    "evaluate",
                    format!("foreign call to {target:#x} cannot be interpreted"),
                ))
            }
            NodeKind::Cast { value } => {
                let value = self.eval(value)?;
                cast(value, ty)?
            }
        };

        self.cache[id.index()] = Some(value);
        Ok(value)
    }

    fn load(&self, ty: ValueType, address: u64) -> CompileResult<Value> {
        if !self.read_memory {
            return Err(CompileError::unsupported(
                "evaluate",
                "memory access requires evaluate_unchecked",
            ));
        }
        let ptr = address as usize as *const u8;
        // SAFETY: `evaluate_unchecked` requires every computed address to be readable.
        let value = unsafe {
            match ty {
                ValueType::Bool | ValueType::U8 => {
                    Value::from_int(ty, ptr.read_unaligned() as i64)
                }
                ValueType::I8 => Value::from_int(ty, ptr.cast::<i8>().read_unaligned() as i64),
                ValueType::I16 => Value::from_int(ty, ptr.cast::<i16>().read_unaligned() as i64),
                ValueType::U16 => Value::from_int(ty, ptr.cast::<u16>().read_unaligned() as i64),
                ValueType::I32 => Value::from_int(ty, ptr.cast::<i32>().read_unaligned() as i64),
                ValueType::U32 => Value::from_int(ty, ptr.cast::<u32>().read_unaligned() as i64),
                ValueType::I64 | ValueType::U64 | ValueType::Ptr => {
                    Value::from_int(ty, ptr.cast::<i64>().read_unaligned())
                }
                ValueType::F32 => Value::from_f32(ptr.cast::<f32>().read_unaligned()),
                ValueType::F64 => Value::from_f64(ptr.cast::<f64>().read_unaligned()),
            }
        };
        Ok(value)
    }
}

fn arith(op: ArithOp, ty: ValueType, a: Value, b: Value) -> CompileResult<Value> {
    if ty.is_float() {
        if op == ArithOp::Rem {
            return Err(CompileError::unsupported("rem", "floating-point remainder"));
        }
        if ty == ValueType::F32 {
            let (x, y) = (a.as_f32(), b.as_f32());
            let r = match op {
                ArithOp::Add => x + y,
                ArithOp::Sub => x - y,
                ArithOp::Mul => x * y,
                _ => x / y,
            };
            return Ok(Value::from_f32(r));
        }
        let (x, y) = (a.as_f64(), b.as_f64());
        let r = match op {
            ArithOp::Add => x + y,
            ArithOp::Sub => x - y,
            ArithOp::Mul => x * y,
            _ => x / y,
        };
        return Ok(Value::from_f64(r));
    }

    let (x, y) = (a.as_i64(), b.as_i64());
    let raw = match op {
        ArithOp::Add => x.wrapping_add(y),
        ArithOp::Sub => x.wrapping_sub(y),
        ArithOp::Mul => x.wrapping_mul(y),
        ArithOp::Div | ArithOp::Rem => {
            if y == 0 {
                return Err(CompileError::unsupported(op.name(), "division by zero"));
            }
            if ty.is_signed() {
                if x == i64::MIN && y == -1 {
                    return Err(CompileError::unsupported(op.name(), "quotient overflow"));
                }
                if op == ArithOp::Div {
                    x / y
                } else {
                    x % y
                }
            } else {
                let (ux, uy) = (x as u64, y as u64);
                let r = if op == ArithOp::Div { ux / uy } else { ux % uy };
                r as i64
            }
        }
    };
    Ok(Value::from_int(ty, raw))
}

fn logic(op: LogicOp, ty: ValueType, a: Value, b: Value) -> Value {
    let (x, y) = (a.as_i64(), b.as_i64());
    let count = (y & 63) as u32;
    let raw = match op {
        LogicOp::And => x & y,
        LogicOp::Or => x | y,
        LogicOp::Xor => x ^ y,
        LogicOp::Shl => x.wrapping_shl(count),
        LogicOp::Shr if ty.is_signed() => x.wrapping_shr(count),
        LogicOp::Shr => (x as u64).wrapping_shr(count) as i64,
    };
    Value::from_int(ty, raw)
}

fn compare(pred: CmpPred, a: Value, b: Value) -> bool {
    use std::cmp::Ordering;

    let ordering = if a.ty.is_float() {
        a.as_f64().partial_cmp(&b.as_f64())
    } else if a.ty.is_signed() {
        Some(a.as_i64().cmp(&b.as_i64()))
    } else {
        Some(a.as_u64().cmp(&b.as_u64()))
    };

    match (pred, ordering) {
        // Unordered: only "not equal" holds.
        (CmpPred::Ne, None) => true,
        (_, None) => false,
        (CmpPred::Eq, Some(o)) => o == Ordering::Equal,
        (CmpPred::Ne, Some(o)) => o != Ordering::Equal,
        (CmpPred::Lt, Some(o)) => o == Ordering::Less,
        (CmpPred::Le, Some(o)) => o != Ordering::Greater,
        (CmpPred::Gt, Some(o)) => o == Ordering::Greater,
        (CmpPred::Ge, Some(o)) => o != Ordering::Less,
    }
}

/// Truncate toward zero; NaN and out-of-range inputs give the x86 "integer indefinite" value.
pub(crate) fn truncate_to_i64(value: f64) -> i64 {
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if value.is_nan() || value >= LIMIT || value < -LIMIT {
        i64::MIN
    } else {
        value as i64
    }
}

fn cast(value: Value, to: ValueType) -> CompileResult<Value> {
    let from = value.ty;
    if from == to {
        return Ok(value);
    }
    if (from == ValueType::U64 && to.is_float()) || (from.is_float() && to == ValueType::U64) {
        return Err(CompileError::unsupported(
            "cast",
            format!("{from} to {to} has no native conversion"),
        ));
    }

    let result = if to == ValueType::Bool {
        Value::from_bool(value.bits != 0)
    } else if to.is_float() {
        if from.is_float() {
            Value::from_float(to, value.as_f64())
        } else if to == ValueType::F32 {
            Value::from_f32(value.as_i64() as f32)
        } else {
            Value::from_f64(value.as_i64() as f64)
        }
    } else if from.is_float() {
        Value::from_int(to, truncate_to_i64(value.as_f64()))
    } else {
        Value::from_int(to, value.as_i64())
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::TestContext;

    #[test]
    fn test_evaluate_polynomial() {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut graph = ExprGraph::new(&session, &[ValueType::F64]).unwrap();
        let p = graph.param(0).unwrap();
        let sq = graph.mul(p, p).unwrap();
        let pi = graph.imm_f64(3.14159265358979).unwrap();
        let area = graph.mul(sq, pi).unwrap();

        let result = evaluate(&graph, area, &[Value::from_f64(2.0)]).unwrap();
        assert!((result.as_f64() - 12.566371).abs() < 1e-5);
    }

    #[test]
    fn test_narrow_wrapping_and_shifts() {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut graph = ExprGraph::new(&session, &[ValueType::I8, ValueType::U16]).unwrap();
        let (a, b) = (graph.param(0).unwrap(), graph.param(1).unwrap());
        let sum = graph.add(a, a).unwrap();
        let one = graph.imm(ValueType::U16, Constant::Int(1)).unwrap();
        let shifted = graph.shr(b, one).unwrap();

        let args = [Value::from_int(ValueType::I8, 100), Value::from_int(ValueType::U16, 0xfffe)];
        assert_eq!(evaluate(&graph, sum, &args).unwrap().as_i64(), -56);
        assert_eq!(evaluate(&graph, shifted, &args).unwrap().as_u64(), 0x7fff);
    }

    #[test]
    fn test_division_traps_are_reported() {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut graph = ExprGraph::new(&session, &[ValueType::I64, ValueType::I64]).unwrap();
        let (a, b) = (graph.param(0).unwrap(), graph.param(1).unwrap());
        let q = graph.div(a, b).unwrap();

        let zero = [Value::from_i64(1), Value::from_i64(0)];
        assert!(matches!(
            evaluate(&graph, q, &zero),
            Err(CompileError::UnsupportedOperation { .. })
        ));
        let overflow = [Value::from_i64(i64::MIN), Value::from_i64(-1)];
        assert!(evaluate(&graph, q, &overflow).is_err());
        let ok = [Value::from_i64(-7), Value::from_i64(2)];
        assert_eq!(evaluate(&graph, q, &ok).unwrap().as_i64(), -3);
    }

    #[test]
    fn test_nan_comparisons() {
        let nan = Value::from_f64(f64::NAN);
        let one = Value::from_f64(1.0);
        assert!(!compare(CmpPred::Eq, nan, nan));
        assert!(compare(CmpPred::Ne, nan, one));
        assert!(!compare(CmpPred::Lt, nan, one));
        assert!(!compare(CmpPred::Ge, one, nan));
    }

    #[test]
    fn test_casts() {
        let v = cast(Value::from_f64(-3.9), ValueType::I32).unwrap();
        assert_eq!(v.as_i64(), -3);
        let v = cast(Value::from_f64(f64::NAN), ValueType::I64).unwrap();
        assert_eq!(v.as_i64(), i64::MIN);
        let v = cast(Value::from_int(ValueType::I32, -1), ValueType::U8).unwrap();
        assert_eq!(v.as_u64(), 255);
        let v = cast(Value::from_int(ValueType::U8, 7), ValueType::Bool).unwrap();
        assert!(v.as_bool());
        assert!(cast(Value::from_u64(1), ValueType::F64).is_err());
    }

    #[test]
    fn test_memory_requires_unchecked() {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut graph = ExprGraph::new(&session, &[ValueType::Ptr]).unwrap();
        let base = graph.param(0).unwrap();
        let field = graph.field(base, 8, ValueType::I32).unwrap();

        let data: [i32; 4] = [1, 2, 3, 4];
        let args = [Value::from_ptr(data.as_ptr() as usize)];
        assert!(evaluate(&graph, field, &args).is_err());
        let value = unsafe { evaluate_unchecked(&graph, field, &args) }.unwrap();
        assert_eq!(value.as_i64(), 3);
    }
}
