// Lowering of Conditional. Only the selected arm runs, so any node that an arm could generate
// must not be needed outside that arm. Before branching, each arm is analysed by walking
// down from its root in descending id order and counting the uses that come from inside the
// arm: a node whose every remaining use is internal belongs exclusively to the arm and is
// generated there; the first node on each path that is also used elsewhere forms the arm's
// frontier and is generated ahead of the branch, so shared subexpressions (foreign calls
// included) run exactly once whichever arm is taken. The register and value state is then
// snapshotted; both arms start from it, leave their result in the same register, and reload
// any surviving value that was evicted from its snapshot register, so control reaches the
// join with one consistent assignment. Remaining-use counters of the two arms are merged as
// then + else - base. A compare whose only use is the condition is fused into the branch.

use super::ops::is_single_condition;
use super::ExprCodegen;
use crate::core::error::CompileResult;
use crate::core::register_file::{AsmReg, RegClass, RegOwner};
use crate::core::value_assignment::{Storage, ValueAssignment};
use crate::graph::{CmpPred, NodeId, NodeKind, ValueType};
use crate::x64::encoder::{Cond, Mem, Operand};
use hashbrown::HashMap;
use std::collections::BinaryHeap;

/// How the branch condition is produced.
#[derive(Debug, Clone, Copy)]
enum Branch {
    /// `cmp`/`ucomis` of the compare's operands, jumping on the inverse condition.
    Fused {
        cond: NodeId,
        pred: CmpPred,
        lhs: NodeId,
        rhs: NodeId,
    },
    /// `test` of a materialized Bool.
    Test(NodeId),
}

impl<'g, 'a> ExprCodegen<'g, 'a> {
    pub(super) fn compile_select(
        &mut self,
        id: NodeId,
        cond: NodeId,
        then_value: NodeId,
        else_value: NodeId,
        ty: ValueType,
    ) -> CompileResult<()> {
        let mut hoisted = self.arm_frontier(then_value)?;
        hoisted.extend(self.arm_frontier(else_value)?);
        hoisted.sort_unstable();
        hoisted.dedup();
        for &node in &hoisted {
            self.gen(node)?;
        }
        if !hoisted.is_empty() {
            log::trace!("⤴️  {id}: hoisted {} shared nodes", hoisted.len());
        }
        self.stats.hoisted_nodes += hoisted.len();

        let branch = self.prepare_branch(cond)?;

        // The result register is picked now so both arms agree on it, then left
        // free so either arm can use it while computing. A condition operand
        // evicted here is read back from its slot by the compare.
        let result = self.alloc_result(id, ty.reg_class())?;
        self.regs.free(result)?;

        let jump_to_else = self.emit_branch_condition(branch)?;

        let regs_snapshot = self.regs.snapshot();
        let values_snapshot = self.values.snapshot();
        let else_label = self.encoder.create_label();
        let join_label = self.encoder.create_label();
        self.encoder.jcc(jump_to_else, else_label)?;

        self.compile_arm(then_value, result, ty, &values_snapshot)?;
        let then_refs = self.values.reference_counts();
        self.encoder.jmp(join_label)?;

        self.regs.restore(&regs_snapshot);
        self.values.restore(&values_snapshot);
        self.encoder.bind_label(else_label)?;
        self.compile_arm(else_value, result, ty, &values_snapshot)?;
        self.encoder.bind_label(join_label)?;

        self.merge_arm_uses(&values_snapshot, &then_refs)?;
        self.stats.conditionals += 1;
        log::trace!("🔀 {id} = select {cond} ? {then_value} : {else_value} -> {result:?}");
        self.define(id, result)
    }

    /// Nodes reachable from `arm` that are still needed outside it and not yet generated.
    fn arm_frontier(&self, arm: NodeId) -> CompileResult<Vec<NodeId>> {
        let mut internal: HashMap<NodeId, u32> = HashMap::new();
        let mut pending: BinaryHeap<NodeId> = BinaryHeap::new();

        self.note_internal_use(arm, &mut internal, &mut pending);
        while let Some(node) = pending.pop() {
            for operand in self.graph.node(node)?.operands() {
                self.note_internal_use(operand, &mut internal, &mut pending);
            }
        }

        Ok(internal
            .into_iter()
            .filter(|&(node, uses)| uses < self.values.get(node.index()).references_left)
            .map(|(node, _)| node)
            .collect())
    }

    fn note_internal_use(
        &self,
        node: NodeId,
        internal: &mut HashMap<NodeId, u32>,
        pending: &mut BinaryHeap<NodeId>,
    ) {
        let value = self.values.get(node.index());
        if value.is_generated() {
            return;
        }
        let uses = internal.entry(node).or_insert(0);
        *uses += 1;
        if *uses == value.references_left {
            pending.push(node);
        }
    }

    /// Generate whatever the branch condition reads.
    fn prepare_branch(&mut self, cond: NodeId) -> CompileResult<Branch> {
        let value = self.values.get(cond.index());
        if self.fuse_compares && !value.is_generated() && value.references_left == 1 {
            if let NodeKind::Compare { pred, lhs, rhs } = self.graph.node(cond)?.kind {
                if is_single_condition(pred, self.graph.ty(lhs)?) {
                    self.gen(lhs)?;
                    self.gen(rhs)?;
                    return Ok(Branch::Fused {
                        cond,
                        pred,
                        lhs,
                        rhs,
                    });
                }
            }
        }
        self.gen(cond)?;
        Ok(Branch::Test(cond))
    }

    /// Set the flags and return the condition under which the else arm runs.
    fn emit_branch_condition(&mut self, branch: Branch) -> CompileResult<Cond> {
        match branch {
            Branch::Fused {
                cond,
                pred,
                lhs,
                rhs,
            } => {
                let holds = self.emit_compare_flags(pred, lhs, rhs)?;
                self.consume(lhs)?;
                self.consume(rhs)?;
                self.values.get_mut(cond.index()).remove_ref();
                self.stats.fused_compares += 1;
                Ok(holds.invert())
            }
            Branch::Test(cond) => {
                let reg = self.gp_register(cond)?;
                self.encoder.test(reg, reg)?;
                self.consume(cond)?;
                Ok(Cond::E)
            }
        }
    }

    /// Generate one arm into `result` and restore the snapshot's register assignment.
    fn compile_arm(
        &mut self,
        arm: NodeId,
        result: AsmReg,
        ty: ValueType,
        snapshot: &[ValueAssignment],
    ) -> CompileResult<()> {
        self.gen(arm)?;
        let src = self.operand(arm)?;
        self.copy_to(result, ty, src)?;
        self.consume(arm)?;
        self.regs.take(result, RegOwner::Temp)?;

        for (idx, saved) in snapshot.iter().enumerate() {
            let Some(Storage::Register(reg)) = saved.storage else {
                continue;
            };
            let current = *self.values.get(idx);
            let Some(Storage::Stack(slot)) = current.storage else {
                continue;
            };
            if current.references_left == 0 {
                continue;
            }
            self.regs.take(reg, RegOwner::Value(idx))?;
            if reg.class() == RegClass::Float {
                self.encoder.movf(true, reg, Operand::Mem(Mem::frame(slot)))?;
            } else {
                self.encoder.load(None, reg, Mem::frame(slot))?;
            }
            self.values.get_mut(idx).storage = Some(Storage::Register(reg));
            log::trace!("♻️  Reloaded %{idx} into {reg:?} at end of arm");
        }
        Ok(())
    }

    /// Combine per-arm remaining-use counters and release values that died in either arm.
    fn merge_arm_uses(&mut self, base: &[ValueAssignment], then_refs: &[u32]) -> CompileResult<()> {
        for (idx, saved) in base.iter().enumerate() {
            let else_left = self.values.get(idx).references_left;
            let then_left = then_refs[idx];
            if then_left == saved.references_left {
                continue;
            }
            let merged = (then_left + else_left).saturating_sub(saved.references_left);
            self.values.get_mut(idx).references_left = merged;
            if merged == 0 && else_left > 0 {
                if let Some(reg) = self.values.get(idx).register() {
                    if self.regs.owner(reg) == Some(RegOwner::Value(idx)) {
                        self.regs.free(reg)?;
                    }
                }
            }
        }
        Ok(())
    }
}
