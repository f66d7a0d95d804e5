// This module is the hub for exprjit's target-independent infrastructure: the arena-backed
// compilation session and its statistics, the error taxonomy, the register file with its
// clock-based eviction, and the per-node value assignment table used by the code generator.
// Nothing in here knows about x86-64 encodings; the target supplies register orders and the
// generator decides what to emit when the allocator reports an eviction.

//! Core exprjit infrastructure.
//!
//! # Key Components
//!
//! ## Session Management (`session`)
//! - Arena-based node allocation using `bumpalo`, with an optional limit
//! - Compilation statistics
//!
//! ## Register Allocation (`register_file`)
//! - Two disjoint classes with explicit allocation orders
//! - Clock-based eviction that never touches locked registers or temporaries
//!
//! ## Value Management (`value_assignment`)
//! - Per-node storage (register, stack slot, immediate)
//! - Remaining-use counters with snapshot/restore for conditional arms

pub mod error;
pub mod register_file;
pub mod session;
pub mod test_utils;
pub mod value_assignment;

pub use error::{CompileError, CompileResult};

pub use register_file::{
    Allocation, AsmReg, RegAllocError, RegBitSet, RegClass, RegOwner, RegisterFile,
    RegisterSnapshot,
};

pub use session::{CompilationSession, SessionStats};

pub use value_assignment::{Storage, ValLocalIdx, ValueAssignment, ValueAssignmentManager};
