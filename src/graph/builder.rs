// This module implements ExprGraph, the arena-backed builder for expression DAGs. Every factory
// validates the result types of its operands before anything is allocated, so a failing call
// (TypeMismatch, InvalidParameter, UnknownNode or AllocatorExhausted) leaves the graph exactly
// as it was. Parameter nodes are declared eagerly from the signature given at construction.
// The builder also maintains the distinct-parent use count of every node, which callers can
// inspect; the code generator derives its own per-edge counts from the compiled root.

//! Type-checked expression graph builder.

use super::{ArithOp, CmpPred, Constant, LogicOp, Node, NodeId, NodeKind, ValueType};
use crate::core::error::{CompileError, CompileResult};
use crate::core::session::CompilationSession;

/// Expression DAG whose nodes live in the session arena.
pub struct ExprGraph<'a> {
    session: &'a CompilationSession<'a>,
    nodes: Vec<&'a Node<'a>>,
    /// Number of distinct parents per node.
    parents: Vec<u32>,
    params: Vec<NodeId>,
}

impl<'a> ExprGraph<'a> {
    /// Create a graph with one Parameter node per entry of `params`.
    pub fn new(session: &'a CompilationSession<'a>, params: &[ValueType]) -> CompileResult<Self> {
        let mut graph = Self {
            session,
            nodes: Vec::new(),
            parents: Vec::new(),
            params: Vec::with_capacity(params.len()),
        };
        for (index, &ty) in params.iter().enumerate() {
            let id = graph.push(
                NodeKind::Parameter {
                    index: index as u32,
                },
                ty,
            )?;
            graph.params.push(id);
        }
        Ok(graph)
    }

    pub fn session(&self) -> &'a CompilationSession<'a> {
        self.session
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn param_count(&self) -> usize {
        self.params.len()
    }

    pub fn param_types(&self) -> Vec<ValueType> {
        self.params.iter().map(|&id| self.nodes[id.index()].ty).collect()
    }

    pub fn node(&self, id: NodeId) -> CompileResult<&'a Node<'a>> {
        self.nodes
            .get(id.index())
            .copied()
            .ok_or(CompileError::UnknownNode { index: id.index() })
    }

    pub fn ty(&self, id: NodeId) -> CompileResult<ValueType> {
        Ok(self.node(id)?.ty)
    }

    /// Number of distinct nodes that use `id` as an operand.
    pub fn use_count(&self, id: NodeId) -> CompileResult<u32> {
        self.node(id)?;
        Ok(self.parents[id.index()])
    }

    fn push(&mut self, kind: NodeKind<'a>, ty: ValueType) -> CompileResult<NodeId> {
        let name = kind.name();
        let node: &'a Node<'a> = self.session.try_alloc(Node { kind, ty })?;
        let id = NodeId(self.nodes.len() as u32);

        let mut seen: Vec<NodeId> = Vec::new();
        for operand in node.operands() {
            if !seen.contains(&operand) {
                seen.push(operand);
                self.parents[operand.index()] += 1;
            }
        }

        self.nodes.push(node);
        self.parents.push(0);
        self.session.record_node_built(name);
        log::trace!("🌱 {id} = {name} : {ty}");
        Ok(id)
    }

    /// Parameter node at `index`.
    pub fn param(&self, index: usize) -> CompileResult<NodeId> {
        self.params
            .get(index)
            .copied()
            .ok_or(CompileError::InvalidParameter {
                index,
                count: self.params.len(),
            })
    }

    // Immediates

    pub fn imm(&mut self, ty: ValueType, value: Constant) -> CompileResult<NodeId> {
        let value = match (value, ty.is_float()) {
            (Constant::Int(v), false) => Constant::Int(ty.canonicalize(v)),
            (Constant::Float(f), true) => Constant::Float(f),
            (Constant::Int(_), true) => {
                return Err(CompileError::type_mismatch(
                    "imm",
                    format!("integer literal for {ty}"),
                ))
            }
            (Constant::Float(_), false) => {
                return Err(CompileError::type_mismatch(
                    "imm",
                    format!("float literal for {ty}"),
                ))
            }
        };
        self.push(NodeKind::Immediate(value), ty)
    }

    pub fn imm_i64(&mut self, value: i64) -> CompileResult<NodeId> {
        self.imm(ValueType::I64, Constant::Int(value))
    }

    pub fn imm_i32(&mut self, value: i32) -> CompileResult<NodeId> {
        self.imm(ValueType::I32, Constant::Int(value as i64))
    }

    pub fn imm_u64(&mut self, value: u64) -> CompileResult<NodeId> {
        self.imm(ValueType::U64, Constant::Int(value as i64))
    }

    pub fn imm_f64(&mut self, value: f64) -> CompileResult<NodeId> {
        self.imm(ValueType::F64, Constant::Float(value))
    }

    pub fn imm_f32(&mut self, value: f32) -> CompileResult<NodeId> {
        self.imm(ValueType::F32, Constant::Float(value as f64))
    }

    pub fn imm_bool(&mut self, value: bool) -> CompileResult<NodeId> {
        self.imm(ValueType::Bool, Constant::Int(value as i64))
    }

    pub fn imm_ptr(&mut self, address: usize) -> CompileResult<NodeId> {
        self.imm(ValueType::Ptr, Constant::Int(address as i64))
    }

    // Arithmetic

    pub fn arith(&mut self, op: ArithOp, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        let ty = self.same_type(op.name(), lhs, rhs)?;
        if !(ty.is_integer() || ty.is_float()) {
            return Err(CompileError::type_mismatch(
                op.name(),
                format!("{ty} operands are not numeric"),
            ));
        }
        self.push(NodeKind::BinaryArithmetic { op, lhs, rhs }, ty)
    }

    pub fn add(&mut self, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        self.arith(ArithOp::Add, lhs, rhs)
    }

    pub fn sub(&mut self, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        self.arith(ArithOp::Sub, lhs, rhs)
    }

    pub fn mul(&mut self, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        self.arith(ArithOp::Mul, lhs, rhs)
    }

    pub fn div(&mut self, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        self.arith(ArithOp::Div, lhs, rhs)
    }

    pub fn rem(&mut self, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        self.arith(ArithOp::Rem, lhs, rhs)
    }

    // Bitwise logic and shifts

    pub fn logic(&mut self, op: LogicOp, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        let ty = self.same_type(op.name(), lhs, rhs)?;
        let bool_ok = ty == ValueType::Bool && op.is_commutative();
        if !(ty.is_integer() || bool_ok) {
            return Err(CompileError::type_mismatch(
                op.name(),
                format!("{ty} operands are not valid for {}", op.name()),
            ));
        }
        self.push(NodeKind::BinaryLogical { op, lhs, rhs }, ty)
    }

    pub fn and(&mut self, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        self.logic(LogicOp::And, lhs, rhs)
    }

    pub fn or(&mut self, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        self.logic(LogicOp::Or, lhs, rhs)
    }

    pub fn xor(&mut self, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        self.logic(LogicOp::Xor, lhs, rhs)
    }

    pub fn shl(&mut self, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        self.logic(LogicOp::Shl, lhs, rhs)
    }

    pub fn shr(&mut self, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        self.logic(LogicOp::Shr, lhs, rhs)
    }

    /// Bitwise complement, or logical negation for Bool.
    pub fn not(&mut self, value: NodeId) -> CompileResult<NodeId> {
        let ty = self.ty(value)?;
        let mask = if ty == ValueType::Bool { 1 } else { -1 };
        if !(ty.is_integer() || ty == ValueType::Bool) {
            return Err(CompileError::type_mismatch(
                "not",
                format!("{ty} operand is not valid for not"),
            ));
        }
        let ones = self.imm(ty, Constant::Int(mask))?;
        self.logic(LogicOp::Xor, value, ones)
    }

    // Comparisons

    pub fn compare(&mut self, pred: CmpPred, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        self.same_type(pred.name(), lhs, rhs)?;
        self.push(NodeKind::Compare { pred, lhs, rhs }, ValueType::Bool)
    }

    pub fn eq(&mut self, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        self.compare(CmpPred::Eq, lhs, rhs)
    }

    pub fn ne(&mut self, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        self.compare(CmpPred::Ne, lhs, rhs)
    }

    pub fn lt(&mut self, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        self.compare(CmpPred::Lt, lhs, rhs)
    }

    pub fn le(&mut self, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        self.compare(CmpPred::Le, lhs, rhs)
    }

    pub fn gt(&mut self, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        self.compare(CmpPred::Gt, lhs, rhs)
    }

    pub fn ge(&mut self, lhs: NodeId, rhs: NodeId) -> CompileResult<NodeId> {
        self.compare(CmpPred::Ge, lhs, rhs)
    }

    /// Conditional: `then_value` if `cond` is true, `else_value` otherwise.
    pub fn select(
        &mut self,
        cond: NodeId,
        then_value: NodeId,
        else_value: NodeId,
    ) -> CompileResult<NodeId> {
        let cond_ty = self.ty(cond)?;
        if cond_ty != ValueType::Bool {
            return Err(CompileError::type_mismatch(
                "select",
                format!("condition is {cond_ty}, expected bool"),
            ));
        }
        let ty = self.same_type("select", then_value, else_value)?;
        self.push(
            NodeKind::Conditional {
                cond,
                then_value,
                else_value,
            },
            ty,
        )
    }

    // Memory access

    /// Load a `ty` value from `base + offset`.
    pub fn field(&mut self, base: NodeId, offset: i32, ty: ValueType) -> CompileResult<NodeId> {
        self.expect_ptr("field", base)?;
        self.push(NodeKind::FieldDereference { base, offset }, ty)
    }

    /// Load element `index` of a `ty` array starting at `base`.
    pub fn element(&mut self, base: NodeId, index: NodeId, ty: ValueType) -> CompileResult<NodeId> {
        self.expect_ptr("element", base)?;
        let index_ty = self.ty(index)?;
        if !index_ty.is_integer() {
            return Err(CompileError::type_mismatch(
                "element",
                format!("index is {index_ty}, expected an integer"),
            ));
        }
        self.push(NodeKind::ArrayElement { base, index }, ty)
    }

    /// Call the native function at `target` with the System V convention.
    ///
    /// The target's signature is not checked against `args` and `ret`.
    pub fn call(&mut self, target: usize, args: &[NodeId], ret: ValueType) -> CompileResult<NodeId> {
        for &arg in args {
            self.node(arg)?;
        }
        let args = self.session.try_alloc_slice_copy(args)?;
        self.push(NodeKind::ForeignCall { target, args }, ret)
    }

    /// Convert `value` to `ty`.
    pub fn cast(&mut self, value: NodeId, ty: ValueType) -> CompileResult<NodeId> {
        let from = self.ty(value)?;
        if !cast_allowed(from, ty) {
            return Err(CompileError::type_mismatch(
                "cast",
                format!("cannot cast {from} to {ty}"),
            ));
        }
        self.push(NodeKind::Cast { value }, ty)
    }

    fn same_type(&self, operation: &'static str, lhs: NodeId, rhs: NodeId) -> CompileResult<ValueType> {
        let (a, b) = (self.ty(lhs)?, self.ty(rhs)?);
        if a != b {
            return Err(CompileError::type_mismatch(operation, format!("{a} vs {b}")));
        }
        Ok(a)
    }

    fn expect_ptr(&self, operation: &'static str, base: NodeId) -> CompileResult<()> {
        let ty = self.ty(base)?;
        if ty != ValueType::Ptr {
            return Err(CompileError::type_mismatch(
                operation,
                format!("base is {ty}, expected ptr"),
            ));
        }
        Ok(())
    }
}

/// Conversion rules accepted by [`ExprGraph::cast`].
pub fn cast_allowed(from: ValueType, to: ValueType) -> bool {
    let int_like = |t: ValueType| t.is_integer() || t == ValueType::Bool;
    if from == to {
        return true;
    }
    match (from, to) {
        (a, b) if int_like(a) && int_like(b) => true,
        (a, b) if int_like(a) && b.is_float() => true,
        (a, b) if a.is_float() && b.is_integer() => true,
        (a, b) if a.is_float() && b.is_float() => true,
        (ValueType::Ptr, ValueType::I64 | ValueType::U64) => true,
        (ValueType::I64 | ValueType::U64, ValueType::Ptr) => true,
        _ => false,
    }
}
