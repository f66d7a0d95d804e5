//! exprjit - runtime compilation of expression graphs to x86-64.
//!
//! An expression is built as a typed DAG inside an arena-backed session and
//! compiled in one pass into native code that follows the System V calling
//! convention. The result is called through an ordinary `extern "C" fn`.
//!
//! # Primary Usage
//!
//! ```ignore
//! use bumpalo::Bump;
//! use exprjit::{CompilationSession, CompileUnit};
//!
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//!
//! let mut unit = CompileUnit::<extern "C" fn(f64) -> f64>::new(&session)?;
//! let r = unit.param(0)?;
//! let pi = unit.imm_f64(std::f64::consts::PI)?;
//! let r2 = unit.mul(r, r)?;
//! let area = unit.mul(r2, pi)?;
//!
//! let compiled = unit.compile(area)?;
//! assert!(((compiled.entry())(2.0) - 12.566370614359172).abs() < 1e-9);
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Session arena, errors, register file and value table
//! - [`graph`] - Expression graph builder and reference evaluator
//! - [`codegen`] - Lowering of graph nodes to machine code
//! - [`x64`] - x86-64 encoder, code buffer, calling convention and frames
//! - [`runtime`] - Executable memory and typed entry points
//! - [`compiler`] - Compilation options and driver

pub mod codegen;
pub mod compiler;
pub mod core;
pub mod graph;
pub mod runtime;
pub mod x64;

pub use compiler::{compile_graph, CompileOptions, CompileUnit};
pub use core::{CompilationSession, CompileError, CompileResult, SessionStats};
pub use graph::{evaluate, ArithOp, CmpPred, ExprGraph, LogicOp, NodeId, ValueType};
pub use runtime::{CompiledFunction, ExecutableCode, NativeSignature, NativeType};
