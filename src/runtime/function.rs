// This module ties finished machine code to a Rust-callable entry point. NativeType maps Rust
// primitives onto graph value types, and NativeSignature does the same for whole
// `extern "C" fn` pointer types with up to twelve parameters, which is how a compilation unit
// learns its parameter list and return type from its type argument. ExecutableCode is the
// untyped result of a compile: it owns the executable region and remembers the signature it
// was generated for. CompiledFunction<F> is the typed wrapper handed out by CompileUnit; it
// keeps the region alive for as long as the entry pointer can be reached through it.

//! Native entry points for compiled code.

use crate::codegen::CodegenStats;
use crate::core::error::{CompileError, CompileResult};
use crate::graph::ValueType;
use crate::runtime::region::ExecutableRegion;
use std::fmt;

/// A Rust type that can cross the native boundary as a graph value.
pub trait NativeType: Copy {
    const VALUE_TYPE: ValueType;
}

macro_rules! impl_native_type {
    ($($ty:ty => $vt:ident),* $(,)?) => {
        $(impl NativeType for $ty {
            const VALUE_TYPE: ValueType = ValueType::$vt;
        })*
    };
}

impl_native_type! {
    bool => Bool,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    isize => I64,
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    usize => U64,
    f32 => F32,
    f64 => F64,
}

impl<T> NativeType for *const T {
    const VALUE_TYPE: ValueType = ValueType::Ptr;
}

impl<T> NativeType for *mut T {
    const VALUE_TYPE: ValueType = ValueType::Ptr;
}

/// An `extern "C" fn` pointer type whose parameters and result are [`NativeType`]s.
///
/// # Safety
///
/// Implementors must be function pointer types using the platform C calling
/// convention, so that an address of code generated for `PARAMS -> RET` can be
/// reinterpreted as `Self`.
pub unsafe trait NativeSignature: Copy {
    const PARAMS: &'static [ValueType];
    const RET: ValueType;

    /// Reinterpret a code address as this function pointer type.
    ///
    /// # Safety
    ///
    /// `entry` must point to code that follows this signature and stays mapped
    /// while the returned pointer is used.
    unsafe fn from_entry(entry: *const u8) -> Self;
}

macro_rules! impl_native_signature {
    ($($arg:ident),*) => {
        unsafe impl<R: NativeType $(, $arg: NativeType)*> NativeSignature
            for extern "C" fn($($arg),*) -> R
        {
            const PARAMS: &'static [ValueType] = &[$($arg::VALUE_TYPE),*];
            const RET: ValueType = R::VALUE_TYPE;

            unsafe fn from_entry(entry: *const u8) -> Self {
                std::mem::transmute_copy::<*const u8, Self>(&entry)
            }
        }
    };
}

impl_native_signature!();
impl_native_signature!(A0);
impl_native_signature!(A0, A1);
impl_native_signature!(A0, A1, A2);
impl_native_signature!(A0, A1, A2, A3);
impl_native_signature!(A0, A1, A2, A3, A4);
impl_native_signature!(A0, A1, A2, A3, A4, A5);
impl_native_signature!(A0, A1, A2, A3, A4, A5, A6);
impl_native_signature!(A0, A1, A2, A3, A4, A5, A6, A7);
impl_native_signature!(A0, A1, A2, A3, A4, A5, A6, A7, A8);
impl_native_signature!(A0, A1, A2, A3, A4, A5, A6, A7, A8, A9);
impl_native_signature!(A0, A1, A2, A3, A4, A5, A6, A7, A8, A9, A10);
impl_native_signature!(A0, A1, A2, A3, A4, A5, A6, A7, A8, A9, A10, A11);

/// Finalized machine code for one expression, without a Rust type attached.
pub struct ExecutableCode {
    region: ExecutableRegion,
    params: Vec<ValueType>,
    ret: ValueType,
    frame_size: u32,
    stats: CodegenStats,
}

impl ExecutableCode {
    pub(crate) fn new(
        region: ExecutableRegion,
        params: Vec<ValueType>,
        ret: ValueType,
        frame_size: u32,
        stats: CodegenStats,
    ) -> Self {
        Self {
            region,
            params,
            ret,
            frame_size,
            stats,
        }
    }

    /// Address of the first instruction.
    pub fn entry_address(&self) -> usize {
        self.region.as_ptr() as usize
    }

    /// Size of the generated code in bytes.
    pub fn code_size(&self) -> usize {
        self.region.len()
    }

    /// The generated machine code.
    pub fn code(&self) -> &[u8] {
        self.region.code()
    }

    /// The executable mapping holding the code.
    pub fn region(&self) -> &ExecutableRegion {
        &self.region
    }

    pub fn param_types(&self) -> &[ValueType] {
        &self.params
    }

    pub fn return_type(&self) -> ValueType {
        self.ret
    }

    /// Bytes reserved below rbp, zero for frameless code.
    pub fn frame_size(&self) -> u32 {
        self.frame_size
    }

    pub fn stats(&self) -> &CodegenStats {
        &self.stats
    }

    fn check_signature<F: NativeSignature>(&self) -> CompileResult<()> {
        if F::PARAMS != self.params.as_slice() || F::RET != self.ret {
            return Err(CompileError::type_mismatch(
                "signature",
                format!(
                    "code was generated for {} but {} was requested",
                    describe(&self.params, self.ret),
                    describe(F::PARAMS, F::RET)
                ),
            ));
        }
        Ok(())
    }

    /// Attach a Rust signature, which must match the one the code was generated for.
    pub fn into_typed<F: NativeSignature>(self) -> CompileResult<CompiledFunction<F>> {
        self.check_signature::<F>()?;
        // SAFETY: the signature matches and the region moves into the returned
        // value together with the pointer.
        let entry = unsafe { F::from_entry(self.region.as_ptr()) };
        Ok(CompiledFunction {
            code: self,
            entry,
        })
    }
}

impl fmt::Debug for ExecutableCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutableCode")
            .field("entry", &format_args!("{:#x}", self.entry_address()))
            .field("signature", &describe(&self.params, self.ret))
            .field("code_size", &self.code_size())
            .field("frame_size", &self.frame_size)
            .finish()
    }
}

/// A compiled expression callable as `F`.
///
/// The entry pointer is valid for as long as this value is alive.
pub struct CompiledFunction<F: NativeSignature> {
    code: ExecutableCode,
    entry: F,
}

impl<F: NativeSignature> CompiledFunction<F> {
    /// The native entry point.
    pub fn entry(&self) -> &F {
        &self.entry
    }

    pub fn entry_address(&self) -> usize {
        self.code.entry_address()
    }

    pub fn code_size(&self) -> usize {
        self.code.code_size()
    }

    pub fn code(&self) -> &[u8] {
        self.code.code()
    }

    pub fn stats(&self) -> &CodegenStats {
        self.code.stats()
    }

    pub fn as_code(&self) -> &ExecutableCode {
        &self.code
    }

    /// Give up the typed view.
    pub fn into_code(self) -> ExecutableCode {
        self.code
    }
}

impl<F: NativeSignature> fmt::Debug for CompiledFunction<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CompiledFunction").field(&self.code).finish()
    }
}

fn describe(params: &[ValueType], ret: ValueType) -> String {
    let params: Vec<String> = params.iter().map(ToString::to_string).collect();
    format!("fn({}) -> {ret}", params.join(", "))
}
