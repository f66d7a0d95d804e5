// This module defines the error taxonomy for exprjit using the thiserror crate. CompileError
// is the single error enum shared by graph construction, code generation, label patching and
// executable memory management. Build-time failures (TypeMismatch, InvalidParameter,
// UnknownNode, AllocatorExhausted) are raised at the factory call that caused them and leave
// the graph unchanged. Compile-time failures (UnsupportedOperation, BufferOverflow,
// UnresolvedLabel, RegisterAllocation, Encoding, ExecutableMemory) abort the whole compile
// without producing a callable. CompileResult<T> is the convenience alias used throughout.

//! Error types for exprjit.
//!
//! Using thiserror for idiomatic error handling.

use thiserror::Error;

/// Main error type for graph construction and compilation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("Type mismatch in {operation}: {detail}")]
    TypeMismatch {
        operation: &'static str,
        detail: String,
    },

    #[error("Invalid parameter index {index} (function declares {count})")]
    InvalidParameter { index: usize, count: usize },

    #[error("Unknown node #{index}")]
    UnknownNode { index: usize },

    #[error("Unsupported operation {operation}: {detail}")]
    UnsupportedOperation {
        operation: &'static str,
        detail: String,
    },

    #[error("Code buffer overflow: {requested} bytes requested, capacity is {capacity}")]
    BufferOverflow { requested: usize, capacity: usize },

    #[error("Arena allocator exhausted ({allocated} bytes allocated, limit {limit:?})")]
    AllocatorExhausted {
        limit: Option<usize>,
        allocated: usize,
    },

    #[error("Unresolved label L{label}")]
    UnresolvedLabel { label: u32 },

    #[error("Register allocation failed: {reason}")]
    RegisterAllocation { reason: String },

    #[error("Instruction encoding failed: {reason}")]
    Encoding { reason: String },

    #[error("Executable memory error: {reason}")]
    ExecutableMemory { reason: String },
}

impl CompileError {
    pub(crate) fn type_mismatch(operation: &'static str, detail: impl Into<String>) -> Self {
        CompileError::TypeMismatch {
            operation,
            detail: detail.into(),
        }
    }

    pub(crate) fn unsupported(operation: &'static str, detail: impl Into<String>) -> Self {
        CompileError::UnsupportedOperation {
            operation,
            detail: detail.into(),
        }
    }

    pub(crate) fn regalloc(reason: impl Into<String>) -> Self {
        CompileError::RegisterAllocation {
            reason: reason.into(),
        }
    }
}

impl From<iced_x86::IcedError> for CompileError {
    fn from(err: iced_x86::IcedError) -> Self {
        CompileError::Encoding {
            reason: err.to_string(),
        }
    }
}

/// Result type alias for compile operations.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CompileError::BufferOverflow {
            requested: 70,
            capacity: 64,
        };
        assert_eq!(
            err.to_string(),
            "Code buffer overflow: 70 bytes requested, capacity is 64"
        );

        let err = CompileError::type_mismatch("add", "i32 vs f64");
        assert_eq!(err.to_string(), "Type mismatch in add: i32 vs f64");

        let err = CompileError::UnresolvedLabel { label: 3 };
        assert_eq!(err.to_string(), "Unresolved label L3");
    }
}
