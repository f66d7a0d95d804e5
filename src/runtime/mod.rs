// This module holds everything that exists after code generation: the W^X executable region
// that generated bytes are copied into, and the typed and untyped handles through which a
// compiled expression is called.

//! Executable memory and native entry points.

pub mod function;
pub mod region;

pub use function::{CompiledFunction, ExecutableCode, NativeSignature, NativeType};
pub use region::{ExecutableRegion, Protection};
