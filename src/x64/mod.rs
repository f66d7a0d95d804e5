//! x86-64 architecture-specific components.
//!
//! This module contains all x86-64 specific code:
//! - Bounded code buffer with labels and branch patching
//! - Instruction encoding using iced-x86
//! - System V calling convention and frame layout
//! - Function prologue/epilogue assembly
//! - Disassembly for diagnostics

pub mod calling_convention;
pub mod code_buffer;
pub mod disasm;
pub mod encoder;
pub mod function_codegen;

pub use calling_convention::{ArgLocation, CCAssigner, FunctionFrame, SysVAssigner};
pub use code_buffer::{CodeBuffer, FinalizedCode, Label};
pub use encoder::{AluOp, Cond, Extend, Mem, Operand, ShiftOp, SseOp, X64Encoder};
pub use function_codegen::{AssembledFunction, FunctionCodegen};
