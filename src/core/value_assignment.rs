// This module implements the ValueAssignment table that records, for every expression node,
// where its generated value currently lives and how many consumers still have to read it.
// A node starts without storage; code generation gives it exactly one Storage (register,
// rbp-relative stack slot or inline immediate) and from then on only spilling may move it,
// always from a register to a stack slot. The remaining-use counter drives register reuse:
// when it reaches zero the register can be handed to the consumer or released. The whole
// table can be snapshotted and restored so both arms of a conditional start from the same
// state, and the per-node counters of two arms can be merged afterwards.

//! Value assignment system for tracking register and stack locations.

use super::register_file::AsmReg;

/// Index type for local values within a function.
pub type ValLocalIdx = usize;

/// Where a generated value lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Storage {
    Register(AsmReg),
    /// Frame offset relative to rbp.
    Stack(i32),
    /// Canonical 64-bit pattern that fits a sign-extended imm32.
    Immediate(i64),
}

/// Per-value state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueAssignment {
    pub storage: Option<Storage>,
    /// Consumers that have not read the value yet.
    pub references_left: u32,
    /// Stack slot reserved for spills of this value.
    pub spill_slot: Option<i32>,
}

impl ValueAssignment {
    pub fn is_generated(&self) -> bool {
        self.storage.is_some()
    }

    pub fn register(&self) -> Option<AsmReg> {
        match self.storage {
            Some(Storage::Register(reg)) => Some(reg),
            _ => None,
        }
    }

    pub fn add_ref(&mut self) {
        self.references_left += 1;
    }

    /// Consume one reference; returns true when the value became dead.
    pub fn remove_ref(&mut self) -> bool {
        debug_assert!(self.references_left > 0, "value consumed too often");
        self.references_left = self.references_left.saturating_sub(1);
        self.references_left == 0
    }
}

/// Manages assignments for every node of one compile.
#[derive(Debug, Clone, Default)]
pub struct ValueAssignmentManager {
    assignments: Vec<ValueAssignment>,
}

impl ValueAssignmentManager {
    pub fn new(count: usize) -> Self {
        Self {
            assignments: vec![ValueAssignment::default(); count],
        }
    }

    pub fn get(&self, idx: ValLocalIdx) -> &ValueAssignment {
        &self.assignments[idx]
    }

    pub fn get_mut(&mut self, idx: ValLocalIdx) -> &mut ValueAssignment {
        &mut self.assignments[idx]
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValLocalIdx, &ValueAssignment)> {
        self.assignments.iter().enumerate()
    }

    pub fn snapshot(&self) -> Vec<ValueAssignment> {
        self.assignments.clone()
    }

    pub fn restore(&mut self, snapshot: &[ValueAssignment]) {
        self.assignments.clear();
        self.assignments.extend_from_slice(snapshot);
    }

    /// Remaining-use counters only.
    pub fn reference_counts(&self) -> Vec<u32> {
        self.assignments
            .iter()
            .map(|a| a.references_left)
            .collect()
    }
}
