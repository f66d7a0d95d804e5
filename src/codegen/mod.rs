// This module is the code generator that lowers an expression graph into an x86-64 function
// body. Generation is demand driven and memoized: starting from the compiled root, every node
// is generated at most once, after its operands, and its result is recorded in the
// ValueAssignment table as a register, a frame slot or an inline immediate. Before anything is
// emitted the reachable subgraph is walked once to count, per node, how many operand edges
// will read it; each read consumes one count, and when it reaches zero the node's register is
// released or handed to the consumer as its destination. Registers come from the RegisterFile
// in the System V allocation order; when a class is exhausted the clock victim is spilled to
// its frame slot and later read straight from memory. R11 and XMM15 are never allocated and
// serve as per-instruction scratch registers. Operands being read by the current instruction
// are locked while its destination is allocated, and a register held as a temporary is never
// kept across the generation of another node. Node kinds are lowered in the sibling modules:
// ops (arithmetic, logic, comparisons), memory (field and element loads), control
// (conditionals), call (foreign calls) and cast. The finished body is wrapped into a complete
// function by FunctionCodegen.

//! Expression graph to x86-64 code generation.

mod call;
mod cast;
mod control;
mod memory;
mod ops;

use crate::compiler::CompileOptions;
use crate::core::error::{CompileError, CompileResult};
use crate::core::register_file::{AsmReg, RegClass, RegOwner, RegisterFile};
use crate::core::value_assignment::{Storage, ValLocalIdx, ValueAssignmentManager};
use crate::graph::{Constant, ExprGraph, NodeId, NodeKind, ValueType};
use crate::x64::calling_convention::{
    fp_allocation_order, return_register, ArgLocation, CCAssigner, SysVAssigner,
    CALLEE_SAVED_GP, GP_ALLOCATION_ORDER, SCRATCH_GP,
};
use crate::x64::encoder::{Extend, Mem, Operand, X64Encoder};
use crate::x64::function_codegen::{AssembledFunction, FunctionCodegen};

/// Counters collected while generating one function.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodegenStats {
    pub nodes_generated: usize,
    pub registers_allocated: usize,
    pub spills: usize,
    pub foreign_calls: usize,
    pub conditionals: usize,
    pub fused_compares: usize,
    pub hoisted_nodes: usize,
    pub patched_branches: usize,
    pub instructions: usize,
}

/// A fully assembled function and its statistics.
#[derive(Debug, Clone)]
pub struct GeneratedFunction {
    pub code: AssembledFunction,
    pub stats: CodegenStats,
}

/// Generate a complete function that returns the value of `root`.
pub fn generate(
    graph: &ExprGraph<'_>,
    root: NodeId,
    options: &CompileOptions,
) -> CompileResult<GeneratedFunction> {
    let mut codegen = ExprCodegen::new(graph, root, options);
    codegen.count_uses(root)?;
    codegen.bind_parameters()?;
    codegen.gen(root)?;
    codegen.compile_return(root)?;
    codegen.finish(options.code_capacity)
}

pub(crate) struct ExprCodegen<'g, 'a> {
    graph: &'g ExprGraph<'a>,
    root: NodeId,
    encoder: X64Encoder,
    regs: RegisterFile,
    values: ValueAssignmentManager,
    function: FunctionCodegen,
    fuse_compares: bool,
    stats: CodegenStats,
}

impl<'g, 'a> ExprCodegen<'g, 'a> {
    fn new(graph: &'g ExprGraph<'a>, root: NodeId, options: &CompileOptions) -> Self {
        let gp_order = &GP_ALLOCATION_ORDER[..options.max_gp_regs.min(GP_ALLOCATION_ORDER.len())];
        let fp_order = fp_allocation_order();
        let fp_order = &fp_order[..options.max_fp_regs.min(fp_order.len())];

        Self {
            graph,
            root,
            encoder: X64Encoder::new(options.code_capacity),
            regs: RegisterFile::new(gp_order, fp_order),
            values: ValueAssignmentManager::new(graph.len()),
            function: FunctionCodegen::new(),
            fuse_compares: options.fuse_compares,
            stats: CodegenStats::default(),
        }
    }

    /// Count operand edges over the subgraph reachable from `root`.
    fn count_uses(&mut self, root: NodeId) -> CompileResult<()> {
        self.graph.node(root)?;
        self.values.get_mut(root.index()).add_ref();

        let mut visited = vec![false; self.graph.len()];
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut visited[id.index()], true) {
                continue;
            }
            for operand in self.graph.node(id)?.operands() {
                self.graph.node(operand)?;
                self.values.get_mut(operand.index()).add_ref();
                if !visited[operand.index()] {
                    stack.push(operand);
                }
            }
        }

        let reachable = visited.iter().filter(|&&v| v).count();
        log::debug!("🔍 {reachable} of {} nodes reachable from {root}", self.graph.len());
        Ok(())
    }

    /// Give every used parameter its incoming location.
    fn bind_parameters(&mut self) -> CompileResult<()> {
        let types = self.graph.param_types();
        let mut assigner = SysVAssigner::new();
        let mut relocate = Vec::new();
        let mut narrow_stack = Vec::new();

        for (index, &ty) in types.iter().enumerate() {
            let location = assigner.assign_arg(ty.reg_class());
            let idx = self.graph.param(index)?.index();
            if self.values.get(idx).references_left == 0 {
                continue;
            }
            match location {
                ArgLocation::Register(reg) if self.regs.is_allocatable(reg) => {
                    self.regs.take(reg, RegOwner::Value(idx))?;
                    self.values.get_mut(idx).storage = Some(Storage::Register(reg));
                    self.normalize(reg, ty)?;
                }
                ArgLocation::Register(reg) => relocate.push((idx, reg, ty)),
                ArgLocation::Stack(offset) => {
                    self.function.set_uses_stack_params();
                    // Return address and saved rbp sit between rbp and the first argument.
                    let disp = 16 + offset;
                    if extension(ty).is_some() {
                        narrow_stack.push((idx, disp, ty));
                    } else {
                        self.values.get_mut(idx).storage = Some(Storage::Stack(disp));
                    }
                }
            }
        }

        // Incoming registers outside the allocatable set are never handed out, so moving
        // them after every allocatable one is claimed cannot clobber an unbound argument.
        for (idx, src, ty) in relocate {
            let reg = self.alloc(ty.reg_class(), RegOwner::Value(idx))?;
            self.copy_to(reg, ty, Operand::Reg(src))?;
            self.normalize(reg, ty)?;
            self.values.get_mut(idx).storage = Some(Storage::Register(reg));
        }
        for (idx, disp, ty) in narrow_stack {
            let reg = self.alloc(RegClass::General, RegOwner::Value(idx))?;
            self.encoder.load(extension(ty), reg, Mem::frame(disp))?;
            self.values.get_mut(idx).storage = Some(Storage::Register(reg));
        }
        Ok(())
    }

    /// Generate `id` unless it already has a value.
    pub(crate) fn gen(&mut self, id: NodeId) -> CompileResult<()> {
        if self.values.get(id.index()).is_generated() {
            return Ok(());
        }
        let node = self.graph.node(id)?;
        let ty = node.ty;
        log::trace!("⚙️  Generating {id} = {} : {ty}", node.kind.name());

        match node.kind {
            NodeKind::Immediate(constant) => self.compile_immediate(id, constant, ty)?,
            NodeKind::Parameter { index } => {
                return Err(CompileError::regalloc(format!(
                    "parameter {index} was not bound at entry"
                )))
            }
            NodeKind::BinaryArithmetic { op, lhs, rhs } => {
                self.compile_arithmetic(id, op, lhs, rhs, ty)?
            }
            NodeKind::BinaryLogical { op, lhs, rhs } => self.compile_logical(id, op, lhs, rhs, ty)?,
            NodeKind::Compare { pred, lhs, rhs } => self.compile_compare(id, pred, lhs, rhs)?,
            NodeKind::Conditional {
                cond,
                then_value,
                else_value,
            } => self.compile_select(id, cond, then_value, else_value, ty)?,
            NodeKind::FieldDereference { base, offset } => self.compile_field(id, base, offset, ty)?,
            NodeKind::ArrayElement { base, index } => self.compile_element(id, base, index, ty)?,
            NodeKind::ForeignCall { target, args } => self.compile_call(id, target, args, ty)?,
            NodeKind::Cast { value } => self.compile_cast(id, value, ty)?,
        }
        self.stats.nodes_generated += 1;
        Ok(())
    }

    fn compile_immediate(&mut self, id: NodeId, constant: Constant, ty: ValueType) -> CompileResult<()> {
        let idx = id.index();
        match constant {
            Constant::Int(value) if i32::try_from(value).is_ok() => {
                self.values.get_mut(idx).storage = Some(Storage::Immediate(value));
            }
            Constant::Int(value) => {
                let reg = self.alloc(RegClass::General, RegOwner::Value(idx))?;
                self.encoder.mov_imm(reg, value)?;
                self.values.get_mut(idx).storage = Some(Storage::Register(reg));
            }
            Constant::Float(value) => {
                let reg = self.alloc(RegClass::Float, RegOwner::Value(idx))?;
                let bits = if ty == ValueType::F32 {
                    (value as f32).to_bits() as u64
                } else {
                    value.to_bits()
                };
                if bits == 0 {
                    self.encoder.xorps(reg)?;
                } else {
                    self.encoder.mov_imm(SCRATCH_GP, bits as i64)?;
                    self.encoder.mov_gp_to_xmm(ty == ValueType::F64, reg, SCRATCH_GP)?;
                }
                self.values.get_mut(idx).storage = Some(Storage::Register(reg));
            }
        }
        Ok(())
    }

    /// Move the root value into the return register.
    fn compile_return(&mut self, root: NodeId) -> CompileResult<()> {
        let ty = self.graph.ty(root)?;
        let src = self.operand(root)?;
        self.copy_to(return_register(ty.reg_class()), ty, src)?;
        self.consume(root)
    }

    fn finish(mut self, capacity: usize) -> CompileResult<GeneratedFunction> {
        for reg in self.regs.touched_among(&CALLEE_SAVED_GP) {
            self.function.add_callee_saved_register(reg);
        }
        self.stats.registers_allocated = self.regs.allocation_count();
        self.stats.instructions = self.encoder.instruction_count();

        let body = self.encoder.finalize()?;
        self.stats.patched_branches = body.patched_branches;
        let code = self.function.assemble(body, capacity)?;
        Ok(GeneratedFunction {
            code,
            stats: self.stats,
        })
    }

    // Register and value helpers shared by the lowering modules.

    /// Allocate a register, spilling the evicted value if there was one.
    fn alloc(&mut self, class: RegClass, owner: RegOwner) -> CompileResult<AsmReg> {
        self.alloc_preferring(class, owner, None)
    }

    /// [`Self::alloc`] that takes `preferred` when it is free.
    fn alloc_preferring(
        &mut self,
        class: RegClass,
        owner: RegOwner,
        preferred: Option<AsmReg>,
    ) -> CompileResult<AsmReg> {
        let allocation = self.regs.allocate(class, owner, preferred)?;
        if let Some(victim) = allocation.evicted {
            self.spill(victim, allocation.reg)?;
        }
        Ok(allocation.reg)
    }

    /// Register the value of `result` should be built in: the root goes straight to
    /// the return register.
    fn result_hint(&self, result: NodeId, class: RegClass) -> Option<AsmReg> {
        (result == self.root).then(|| return_register(class))
    }

    /// Temporary for the value of `result`.
    fn alloc_result(&mut self, result: NodeId, class: RegClass) -> CompileResult<AsmReg> {
        let preferred = self.result_hint(result, class);
        self.alloc_preferring(class, RegOwner::Temp, preferred)
    }

    /// Store the contents of `reg` to the victim's frame slot.
    fn spill(&mut self, victim: ValLocalIdx, reg: AsmReg) -> CompileResult<()> {
        let slot = match self.values.get(victim).spill_slot {
            Some(slot) => slot,
            None => {
                let slot = self.function.allocate_spill_slot();
                self.values.get_mut(victim).spill_slot = Some(slot);
                slot
            }
        };
        match reg.class() {
            RegClass::General => self.encoder.store(Mem::frame(slot), reg)?,
            RegClass::Float => self.encoder.store_f(Mem::frame(slot), reg)?,
        }
        self.values.get_mut(victim).storage = Some(Storage::Stack(slot));
        self.stats.spills += 1;
        log::trace!("💾 Spilled %{victim} from {reg:?} to [rbp{slot:+}]");
        Ok(())
    }

    /// Vacate a specific register, spilling its value.
    fn evict(&mut self, reg: AsmReg) -> CompileResult<()> {
        match self.regs.owner(reg) {
            None => Ok(()),
            Some(RegOwner::Value(victim)) => {
                if self.regs.is_locked(reg) {
                    return Err(CompileError::regalloc(format!(
                        "cannot evict locked register {reg:?}"
                    )));
                }
                self.spill(victim, reg)?;
                self.regs.free(reg)?;
                Ok(())
            }
            Some(RegOwner::Temp) => Err(CompileError::regalloc(format!(
                "{reg:?} is held by a temporary"
            ))),
        }
    }

    fn storage(&self, id: NodeId) -> CompileResult<Storage> {
        self.values
            .get(id.index())
            .storage
            .ok_or_else(|| CompileError::regalloc(format!("{id} used before it was generated")))
    }

    /// Current location of `id` as an instruction operand.
    fn operand(&self, id: NodeId) -> CompileResult<Operand> {
        Ok(match self.storage(id)? {
            Storage::Register(reg) => Operand::Reg(reg),
            Storage::Stack(offset) => Operand::Mem(Mem::frame(offset)),
            Storage::Immediate(value) => Operand::Imm(value as i32),
        })
    }

    fn is_immediate(&self, id: NodeId) -> bool {
        matches!(self.values.get(id.index()).storage, Some(Storage::Immediate(_)))
    }

    /// Last use of a value that sits in a register.
    fn is_reusable(&self, id: NodeId) -> bool {
        let value = self.values.get(id.index());
        value.references_left == 1 && value.register().is_some()
    }

    /// Lock the register holding `id`, if any.
    fn lock_value(&mut self, id: NodeId) -> CompileResult<Option<AsmReg>> {
        let idx = id.index();
        match self.values.get(idx).register() {
            Some(reg) if self.regs.owner(reg) == Some(RegOwner::Value(idx)) => {
                self.regs.lock(reg)?;
                Ok(Some(reg))
            }
            _ => Ok(None),
        }
    }

    /// Allocate the temporary for `result` without evicting `value`.
    fn alloc_locked(
        &mut self,
        value: NodeId,
        result: NodeId,
        class: RegClass,
    ) -> CompileResult<AsmReg> {
        let locked = self.lock_value(value)?;
        let dst = self.alloc_result(result, class);
        self.unlock(locked)?;
        dst
    }

    fn unlock(&mut self, reg: Option<AsmReg>) -> CompileResult<()> {
        if let Some(reg) = reg {
            self.regs.unlock(reg)?;
        }
        Ok(())
    }

    /// Read one use of `id`, releasing its register when it was the last.
    fn consume(&mut self, id: NodeId) -> CompileResult<()> {
        let idx = id.index();
        if self.values.get_mut(idx).remove_ref() {
            if let Some(reg) = self.values.get(idx).register() {
                if self.regs.owner(reg) == Some(RegOwner::Value(idx)) {
                    self.regs.free(reg)?;
                }
            }
        }
        Ok(())
    }

    /// Consume `id` into a temporary register that the caller may overwrite and
    /// that will hold `result`. The register of `id` is reused on its last use.
    fn take_or_copy(&mut self, id: NodeId, result: NodeId) -> CompileResult<AsmReg> {
        let idx = id.index();
        let ty = self.graph.ty(id)?;
        let value = *self.values.get(idx);
        if let (1, Some(reg)) = (value.references_left, value.register()) {
            if self.regs.owner(reg) == Some(RegOwner::Value(idx)) && !self.regs.is_locked(reg) {
                self.regs.reassign(reg, RegOwner::Temp)?;
                self.values.get_mut(idx).remove_ref();
                return Ok(reg);
            }
        }

        let reg = self.alloc_result(result, ty.reg_class())?;
        let src = self.operand(id)?;
        self.copy_to(reg, ty, src)?;
        self.consume(id)?;
        Ok(reg)
    }

    /// `mov dst, src` in the register class of `ty`.
    fn copy_to(&mut self, dst: AsmReg, ty: ValueType, src: Operand) -> CompileResult<()> {
        if ty.is_float() {
            self.encoder.movf(ty == ValueType::F64, dst, src)
        } else {
            self.encoder.mov(dst, src)
        }
    }

    /// General register holding `id`, loading it into R11 if necessary.
    fn gp_register(&mut self, id: NodeId) -> CompileResult<AsmReg> {
        match self.operand(id)? {
            Operand::Reg(reg) => Ok(reg),
            src => {
                self.encoder.mov(SCRATCH_GP, src)?;
                Ok(SCRATCH_GP)
            }
        }
    }

    /// Bring a 64-bit result back into canonical form for `ty`.
    fn normalize(&mut self, reg: AsmReg, ty: ValueType) -> CompileResult<()> {
        match extension(ty) {
            Some(kind) => self.encoder.extend(kind, reg, reg),
            None => Ok(()),
        }
    }

    /// Hand a temporary register to `id` as its result.
    fn define(&mut self, id: NodeId, reg: AsmReg) -> CompileResult<()> {
        self.regs.reassign(reg, RegOwner::Value(id.index()))?;
        self.values.get_mut(id.index()).storage = Some(Storage::Register(reg));
        Ok(())
    }
}

/// Extension that produces the canonical form of a narrow integer type.
pub(crate) fn extension(ty: ValueType) -> Option<Extend> {
    match ty {
        ValueType::I8 => Some(Extend::Sx8),
        ValueType::I16 => Some(Extend::Sx16),
        ValueType::I32 => Some(Extend::Sx32),
        ValueType::Bool | ValueType::U8 => Some(Extend::Zx8),
        ValueType::U16 => Some(Extend::Zx16),
        ValueType::U32 => Some(Extend::Zx32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::{generate_default, listing, TestContext};

    #[test]
    fn test_leaf_add_has_no_frame() {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut graph = ExprGraph::new(&session, &[ValueType::I64, ValueType::I64]).unwrap();
        let (a, b) = (graph.param(0).unwrap(), graph.param(1).unwrap());
        let sum = graph.add(a, b).unwrap();

        let function = generate_default(&graph, sum);
        assert_eq!(function.code.frame_size, 0);
        assert_eq!(function.stats.spills, 0);
        let lines = listing(&function);
        assert_eq!(lines.last().map(String::as_str), Some("ret"));
        assert!(lines.iter().any(|l| l.starts_with("add")));
    }

    #[test]
    fn test_root_built_in_return_register() {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut graph = ExprGraph::new(&session, &[ValueType::I64, ValueType::I64]).unwrap();
        let (a, b) = (graph.param(0).unwrap(), graph.param(1).unwrap());
        let less = graph.lt(a, b).unwrap();

        let function = generate_default(&graph, less);
        let lines = listing(&function);
        assert!(lines.iter().any(|l| l == "setl al"));
        assert!(!lines.iter().any(|l| l.starts_with("mov rax,")));
    }

    #[test]
    fn test_small_constants_stay_inline() {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut graph = ExprGraph::new(&session, &[ValueType::I32]).unwrap();
        let p = graph.param(0).unwrap();
        let k = graph.imm_i32(5).unwrap();
        let sum = graph.add(p, k).unwrap();

        let function = generate_default(&graph, sum);
        let lines = listing(&function);
        // movsxd (param), add imm, movsxd (result), mov rax, ret
        assert!(lines.iter().any(|l| l.starts_with("add") && l.ends_with(",5")));
        assert!(!lines.iter().any(|l| l.contains("mov") && l.ends_with(",5")));
    }

    #[test]
    fn test_unreachable_nodes_are_not_generated() {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let mut graph = ExprGraph::new(&session, &[ValueType::I64]).unwrap();
        let p = graph.param(0).unwrap();
        let k = graph.imm_i64(3).unwrap();
        let unused = graph.mul(p, k).unwrap();
        let root = graph.add(p, k).unwrap();
        assert!(unused.index() < root.index());

        let function = generate_default(&graph, root);
        assert_eq!(function.stats.nodes_generated, 2);
    }

    #[test]
    fn test_unknown_root() {
        let ctx = TestContext::new();
        let session = ctx.create_session();
        let graph = ExprGraph::new(&session, &[]).unwrap();
        assert_eq!(
            generate(&graph, NodeId(7), &CompileOptions::default()).unwrap_err(),
            CompileError::UnknownNode { index: 7 }
        );
    }

    #[test]
    fn test_extension_table() {
        assert_eq!(extension(ValueType::I16), Some(Extend::Sx16));
        assert_eq!(extension(ValueType::Bool), Some(Extend::Zx8));
        assert_eq!(extension(ValueType::U64), None);
        assert_eq!(extension(ValueType::F32), None);
    }
}
