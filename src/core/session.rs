// This module provides arena-based compilation session management using the bumpalo crate.
// CompilationSession owns a borrowed Bump arena that holds every expression node and operand
// slice built for one compilation unit, so the whole graph is released in one step when the
// arena is dropped. An optional allocation limit turns arena exhaustion into a recoverable
// AllocatorExhausted error instead of an abort: every allocation goes through the fallible
// try_alloc family. SessionStats tracks nodes built per kind, compiled functions and code size,
// register allocations, spills, foreign calls and patched branches, and renders them through
// its Display implementation for the exprjit-stats binary and trace logs.

//! Arena-based compilation session management.
//!
//! All graph nodes are tied to the session lifetime. The session is `!Sync`
//! by construction, so one session is driven by exactly one thread.

use crate::core::error::{CompileError, CompileResult};
use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::RefCell;
use std::fmt;

/// Arena-based compilation session.
pub struct CompilationSession<'arena> {
    /// Arena allocator for graph nodes and operand lists.
    arena: &'arena Bump,

    /// Configured arena limit, if any.
    memory_limit: Option<usize>,

    /// Session statistics for debugging and tuning.
    stats: RefCell<SessionStats>,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a new compilation session with the given arena.
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            memory_limit: None,
            stats: RefCell::new(SessionStats::default()),
        }
    }

    /// Create a session whose arena refuses to grow beyond `limit` bytes.
    pub fn with_memory_limit(arena: &'arena Bump, limit: usize) -> Self {
        arena.set_allocation_limit(Some(limit));
        log::debug!("🧮 Arena limit set to {limit} bytes");
        Self {
            arena,
            memory_limit: Some(limit),
            stats: RefCell::new(SessionStats::default()),
        }
    }

    /// Get access to the arena allocator.
    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    /// Configured arena limit.
    pub fn memory_limit(&self) -> Option<usize> {
        self.memory_limit
    }

    /// Bytes currently held by the arena.
    pub fn memory_used(&self) -> usize {
        self.arena.allocated_bytes()
    }

    fn exhausted(&self) -> CompileError {
        CompileError::AllocatorExhausted {
            limit: self.memory_limit,
            allocated: self.arena.allocated_bytes(),
        }
    }

    /// Allocate an object in the session arena.
    pub fn try_alloc<T>(&self, value: T) -> CompileResult<&'arena mut T> {
        self.arena.try_alloc(value).map_err(|_| self.exhausted())
    }

    /// Copy a slice into the session arena.
    pub fn try_alloc_slice_copy<T: Copy>(&self, values: &[T]) -> CompileResult<&'arena [T]> {
        let slice = self
            .arena
            .try_alloc_slice_copy(values)
            .map_err(|_| self.exhausted())?;
        Ok(slice)
    }

    /// Record that a node of the given kind was added to a graph.
    pub fn record_node_built(&self, kind: &'static str) {
        let mut stats = self.stats.borrow_mut();
        stats.nodes_built += 1;
        *stats.nodes_by_kind.entry(kind).or_insert(0) += 1;
    }

    /// Record completion of a function compilation.
    pub fn record_function_compiled(&self, code_size: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.functions_compiled += 1;
        stats.total_code_size += code_size;
        stats.largest_function = stats.largest_function.max(code_size);
    }

    /// Record register allocations performed by one compile.
    pub fn record_registers_allocated(&self, count: usize) {
        self.stats.borrow_mut().registers_allocated += count;
    }

    /// Record spill stores emitted by one compile.
    pub fn record_spills(&self, count: usize) {
        self.stats.borrow_mut().spills_generated += count;
    }

    /// Record foreign calls lowered by one compile.
    pub fn record_foreign_calls(&self, count: usize) {
        self.stats.borrow_mut().foreign_calls += count;
    }

    /// Record conditionals lowered and their branch patches.
    pub fn record_branches(&self, conditionals: usize, patched: usize) {
        let mut stats = self.stats.borrow_mut();
        stats.conditionals += conditionals;
        stats.branches_patched += patched;
    }

    /// Get a copy of the current statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

impl fmt::Debug for CompilationSession<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompilationSession")
            .field("memory_used", &self.memory_used())
            .field("memory_limit", &self.memory_limit)
            .field("stats", &self.stats.borrow())
            .finish()
    }
}

/// Compilation statistics.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub nodes_built: usize,
    pub nodes_by_kind: HashMap<&'static str, usize>,
    pub functions_compiled: usize,
    pub total_code_size: usize,
    pub largest_function: usize,
    pub registers_allocated: usize,
    pub spills_generated: usize,
    pub foreign_calls: usize,
    pub conditionals: usize,
    pub branches_patched: usize,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Compilation Statistics:")?;
        writeln!(f, "  Nodes built: {}", self.nodes_built)?;
        let mut kinds: Vec<_> = self.nodes_by_kind.iter().collect();
        kinds.sort();
        for (kind, count) in kinds {
            writeln!(f, "    {kind}: {count}")?;
        }
        writeln!(f, "  Functions compiled: {}", self.functions_compiled)?;
        writeln!(f, "  Total code size: {} bytes", self.total_code_size)?;
        writeln!(f, "  Largest function: {} bytes", self.largest_function)?;
        writeln!(f, "  Registers allocated: {}", self.registers_allocated)?;
        writeln!(f, "  Spills generated: {}", self.spills_generated)?;
        writeln!(f, "  Foreign calls: {}", self.foreign_calls)?;
        writeln!(f, "  Conditionals: {}", self.conditionals)?;
        write!(f, "  Branches patched: {}", self.branches_patched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::TestContext;

    #[test]
    fn test_session_allocation() {
        let ctx = TestContext::new();
        let session = ctx.create_session();

        let value = session.try_alloc(42u64).unwrap();
        assert_eq!(*value, 42);

        let slice = session.try_alloc_slice_copy(&[1u32, 2, 3]).unwrap();
        assert_eq!(slice, &[1, 2, 3]);

        let empty: &[u32] = session.try_alloc_slice_copy(&[]).unwrap();
        assert!(empty.is_empty());
        assert!(session.memory_used() > 0);
    }

    #[test]
    fn test_memory_limit_reports_exhaustion() {
        let ctx = TestContext::new();
        let session = ctx.create_limited_session(0);
        let err = session.try_alloc([0u64; 64]).unwrap_err();
        assert!(matches!(
            err,
            CompileError::AllocatorExhausted { limit: Some(0), .. }
        ));
        assert_eq!(session.memory_limit(), Some(0));

        let values = [7u64; 512];
        let err = session.try_alloc_slice_copy(&values).unwrap_err();
        assert!(matches!(
            err,
            CompileError::AllocatorExhausted { limit: Some(0), .. }
        ));
    }

    #[test]
    fn test_session_stats() {
        let ctx = TestContext::new();
        let session = ctx.create_session();

        session.record_node_built("Immediate");
        session.record_node_built("Immediate");
        session.record_node_built("Compare");
        session.record_function_compiled(120);
        session.record_function_compiled(80);
        session.record_spills(3);
        session.record_branches(1, 2);

        let stats = session.stats();
        assert_eq!(stats.nodes_built, 3);
        assert_eq!(stats.nodes_by_kind.get("Immediate"), Some(&2));
        assert_eq!(stats.functions_compiled, 2);
        assert_eq!(stats.total_code_size, 200);
        assert_eq!(stats.largest_function, 120);
        assert_eq!(stats.spills_generated, 3);
        assert_eq!(stats.branches_patched, 2);

        let rendered = stats.to_string();
        assert!(rendered.contains("Spills generated: 3"));
        assert!(rendered.contains("Compare: 1"));
    }
}
