// This module defines the expression graph data model: value types, node identities, the
// closed set of node kinds and the operators they carry. Nodes are immutable once built and
// refer to their operands by NodeId, a dense index into the owning graph; because operands
// must exist before a node that uses them, every graph is acyclic by construction and every
// operand id is smaller than its parent's id. Integer values use a canonical 64-bit form:
// signed types are sign-extended, unsigned types and Bool are zero-extended. The builder,
// the reference interpreter and the code generator all rely on that representation.

//! Expression graph data model.

pub mod builder;
pub mod interp;

pub use builder::ExprGraph;
pub use interp::{evaluate, evaluate_unchecked, Value};

use crate::core::register_file::RegClass;
use std::fmt;

/// Dense handle of a node inside one [`ExprGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Result type of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Bool,
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// 64-bit address.
    Ptr,
}

impl ValueType {
    /// Size in bytes when stored in memory.
    pub fn size(self) -> u32 {
        match self {
            ValueType::Bool | ValueType::I8 | ValueType::U8 => 1,
            ValueType::I16 | ValueType::U16 => 2,
            ValueType::I32 | ValueType::U32 | ValueType::F32 => 4,
            ValueType::I64 | ValueType::U64 | ValueType::F64 | ValueType::Ptr => 8,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, ValueType::F32 | ValueType::F64)
    }

    /// Fixed-width integer types (Bool and Ptr excluded).
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            ValueType::I8
                | ValueType::I16
                | ValueType::I32
                | ValueType::I64
                | ValueType::U8
                | ValueType::U16
                | ValueType::U32
                | ValueType::U64
        )
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            ValueType::I8 | ValueType::I16 | ValueType::I32 | ValueType::I64
        )
    }

    pub fn reg_class(self) -> RegClass {
        if self.is_float() {
            RegClass::Float
        } else {
            RegClass::General
        }
    }

    /// Bring a raw 64-bit pattern into canonical form for this type.
    pub fn canonicalize(self, raw: i64) -> i64 {
        match self {
            ValueType::Bool => (raw != 0) as i64,
            ValueType::I8 => raw as i8 as i64,
            ValueType::I16 => raw as i16 as i64,
            ValueType::I32 => raw as i32 as i64,
            ValueType::U8 => raw as u8 as i64,
            ValueType::U16 => raw as u16 as i64,
            ValueType::U32 => raw as u32 as i64,
            ValueType::I64 | ValueType::U64 | ValueType::Ptr => raw,
            ValueType::F32 => raw as u32 as i64,
            ValueType::F64 => raw,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Bool => "bool",
            ValueType::I8 => "i8",
            ValueType::I16 => "i16",
            ValueType::I32 => "i32",
            ValueType::I64 => "i64",
            ValueType::U8 => "u8",
            ValueType::U16 => "u16",
            ValueType::U32 => "u32",
            ValueType::U64 => "u64",
            ValueType::F32 => "f32",
            ValueType::F64 => "f64",
            ValueType::Ptr => "ptr",
        };
        f.write_str(name)
    }
}

/// Literal payload of an Immediate node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Constant {
    Int(i64),
    Float(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl ArithOp {
    pub fn is_commutative(self) -> bool {
        matches!(self, ArithOp::Add | ArithOp::Mul)
    }

    pub fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Rem => "rem",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogicOp {
    And,
    Or,
    Xor,
    Shl,
    /// Arithmetic for signed types, logical for unsigned ones.
    Shr,
}

impl LogicOp {
    pub fn is_commutative(self) -> bool {
        matches!(self, LogicOp::And | LogicOp::Or | LogicOp::Xor)
    }

    pub fn name(self) -> &'static str {
        match self {
            LogicOp::And => "and",
            LogicOp::Or => "or",
            LogicOp::Xor => "xor",
            LogicOp::Shl => "shl",
            LogicOp::Shr => "shr",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpPred {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpPred {
    pub fn name(self) -> &'static str {
        match self {
            CmpPred::Eq => "eq",
            CmpPred::Ne => "ne",
            CmpPred::Lt => "lt",
            CmpPred::Le => "le",
            CmpPred::Gt => "gt",
            CmpPred::Ge => "ge",
        }
    }
}

/// Operation of a node. Operands always precede the node in its graph.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeKind<'a> {
    Immediate(Constant),
    Parameter {
        index: u32,
    },
    BinaryArithmetic {
        op: ArithOp,
        lhs: NodeId,
        rhs: NodeId,
    },
    BinaryLogical {
        op: LogicOp,
        lhs: NodeId,
        rhs: NodeId,
    },
    Compare {
        pred: CmpPred,
        lhs: NodeId,
        rhs: NodeId,
    },
    Conditional {
        cond: NodeId,
        then_value: NodeId,
        else_value: NodeId,
    },
    /// Load of the result type from `base + offset`.
    FieldDereference {
        base: NodeId,
        offset: i32,
    },
    /// Load of the result type from `base + index * size`.
    ArrayElement {
        base: NodeId,
        index: NodeId,
    },
    /// System V call to a native function address.
    ForeignCall {
        target: usize,
        args: &'a [NodeId],
    },
    Cast {
        value: NodeId,
    },
}

impl NodeKind<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Immediate(_) => "Immediate",
            NodeKind::Parameter { .. } => "Parameter",
            NodeKind::BinaryArithmetic { .. } => "BinaryArithmetic",
            NodeKind::BinaryLogical { .. } => "BinaryLogical",
            NodeKind::Compare { .. } => "Compare",
            NodeKind::Conditional { .. } => "Conditional",
            NodeKind::FieldDereference { .. } => "FieldDereference",
            NodeKind::ArrayElement { .. } => "ArrayElement",
            NodeKind::ForeignCall { .. } => "ForeignCall",
            NodeKind::Cast { .. } => "Cast",
        }
    }
}

/// An immutable, arena-allocated expression node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node<'a> {
    pub kind: NodeKind<'a>,
    pub ty: ValueType,
}

impl<'a> Node<'a> {
    /// Operand references in evaluation order, one entry per use.
    pub fn operands(&self) -> Operands<'a> {
        let fixed = |ids: &[NodeId]| {
            let mut buf = [NodeId(0); 3];
            buf[..ids.len()].copy_from_slice(ids);
            Operands::Fixed {
                ids: buf,
                len: ids.len(),
                pos: 0,
            }
        };
        match self.kind {
            NodeKind::Immediate(_) | NodeKind::Parameter { .. } => fixed(&[]),
            NodeKind::BinaryArithmetic { lhs, rhs, .. }
            | NodeKind::BinaryLogical { lhs, rhs, .. }
            | NodeKind::Compare { lhs, rhs, .. } => fixed(&[lhs, rhs]),
            NodeKind::Conditional {
                cond,
                then_value,
                else_value,
            } => fixed(&[cond, then_value, else_value]),
            NodeKind::FieldDereference { base, .. } => fixed(&[base]),
            NodeKind::ArrayElement { base, index } => fixed(&[base, index]),
            NodeKind::ForeignCall { args, .. } => Operands::Slice(args.iter()),
            NodeKind::Cast { value } => fixed(&[value]),
        }
    }
}

/// Iterator over the operands of a node.
#[derive(Debug, Clone)]
pub enum Operands<'a> {
    Fixed {
        ids: [NodeId; 3],
        len: usize,
        pos: usize,
    },
    Slice(std::slice::Iter<'a, NodeId>),
}

impl Iterator for Operands<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        match self {
            Operands::Fixed { ids, len, pos } => {
                if *pos < *len {
                    *pos += 1;
                    Some(ids[*pos - 1])
                } else {
                    None
                }
            }
            Operands::Slice(iter) => iter.next().copied(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_forms() {
        assert_eq!(ValueType::I8.canonicalize(0x1ff), -1);
        assert_eq!(ValueType::U8.canonicalize(-1), 255);
        assert_eq!(ValueType::I32.canonicalize(0x8000_0000), i32::MIN as i64);
        assert_eq!(ValueType::U32.canonicalize(-1), u32::MAX as i64);
        assert_eq!(ValueType::Bool.canonicalize(42), 1);
        assert_eq!(ValueType::I64.canonicalize(-5), -5);
    }

    #[test]
    fn test_operand_iteration() {
        let node = Node {
            kind: NodeKind::Conditional {
                cond: NodeId(0),
                then_value: NodeId(1),
                else_value: NodeId(1),
            },
            ty: ValueType::I64,
        };
        let ops: Vec<_> = node.operands().collect();
        assert_eq!(ops, vec![NodeId(0), NodeId(1), NodeId(1)]);

        let args = [NodeId(4), NodeId(2)];
        let call = Node {
            kind: NodeKind::ForeignCall {
                target: 0x1000,
                args: &args,
            },
            ty: ValueType::F64,
        };
        assert_eq!(call.operands().collect::<Vec<_>>(), args.to_vec());
        assert_eq!(call.kind.name(), "ForeignCall");
    }

    #[test]
    fn test_type_properties() {
        assert_eq!(ValueType::U16.size(), 2);
        assert_eq!(ValueType::Ptr.size(), 8);
        assert!(ValueType::I16.is_signed());
        assert!(!ValueType::U64.is_signed());
        assert!(!ValueType::Bool.is_integer());
        assert_eq!(ValueType::F32.reg_class(), RegClass::Float);
        assert_eq!(ValueType::Ptr.reg_class(), RegClass::General);
        assert_eq!(ValueType::F64.to_string(), "f64");
    }
}
