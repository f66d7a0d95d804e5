// This module is the public entry to compilation. CompileOptions carries the knobs that shape
// code generation: the code buffer capacity, how many general and XMM registers the allocator
// may hand out, and whether a compare feeding only a conditional is fused into its branch. The
// options can be built in code or read from EXPRJIT_* environment variables. compile_graph
// runs the generator on one root, copies the assembled function into a fresh executable
// region and records the outcome in the session statistics. CompileUnit<F> wraps a graph whose
// parameters come from the native signature F and produces a CompiledFunction<F>, checking
// that the chosen root returns F's result type.

//! Compilation driver and options.

use crate::codegen;
use crate::core::error::{CompileError, CompileResult};
use crate::core::session::CompilationSession;
use crate::graph::{ExprGraph, NodeId};
use crate::runtime::function::{CompiledFunction, ExecutableCode, NativeSignature};
use crate::runtime::region::ExecutableRegion;
use crate::x64::disasm;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

/// Smallest general register budget that still covers division and calls.
pub const MIN_GP_REGS: usize = 4;
/// Smallest XMM register budget.
pub const MIN_FP_REGS: usize = 2;

/// Code generation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Capacity of the code buffer in bytes.
    pub code_capacity: usize,
    /// General registers available to the allocator.
    pub max_gp_regs: usize,
    /// XMM registers available to the allocator.
    pub max_fp_regs: usize,
    /// Fuse a single-use compare into the conditional branch that reads it.
    pub fuse_compares: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            code_capacity: 64 * 1024,
            max_gp_regs: 13,
            max_fp_regs: 15,
            fuse_compares: true,
        }
    }
}

impl CompileOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `EXPRJIT_CODE_CAPACITY`, `EXPRJIT_MAX_GP_REGS`,
    /// `EXPRJIT_MAX_FP_REGS` and `EXPRJIT_FUSE_COMPARES`.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Some(capacity) = env_value::<usize>("EXPRJIT_CODE_CAPACITY") {
            options = options.with_code_capacity(capacity);
        }
        if let Some(count) = env_value::<usize>("EXPRJIT_MAX_GP_REGS") {
            options = options.with_max_gp_regs(count);
        }
        if let Some(count) = env_value::<usize>("EXPRJIT_MAX_FP_REGS") {
            options = options.with_max_fp_regs(count);
        }
        if let Ok(flag) = std::env::var("EXPRJIT_FUSE_COMPARES") {
            options.fuse_compares = !matches!(flag.as_str(), "0" | "false" | "off");
        }
        options
    }

    pub fn with_code_capacity(mut self, capacity: usize) -> Self {
        self.code_capacity = capacity;
        self
    }

    /// Limit the general registers the allocator uses, never below [`MIN_GP_REGS`].
    pub fn with_max_gp_regs(mut self, count: usize) -> Self {
        if count < MIN_GP_REGS {
            log::warn!("⚠️  max_gp_regs {count} raised to {MIN_GP_REGS}");
        }
        self.max_gp_regs = count.max(MIN_GP_REGS);
        self
    }

    /// Limit the XMM registers the allocator uses, never below [`MIN_FP_REGS`].
    pub fn with_max_fp_regs(mut self, count: usize) -> Self {
        if count < MIN_FP_REGS {
            log::warn!("⚠️  max_fp_regs {count} raised to {MIN_FP_REGS}");
        }
        self.max_fp_regs = count.max(MIN_FP_REGS);
        self
    }

    pub fn with_fuse_compares(mut self, fuse: bool) -> Self {
        self.fuse_compares = fuse;
        self
    }
}

fn env_value<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            log::warn!("⚠️  Ignoring {name}={raw:?}: not a valid value");
            None
        }
    }
}

/// Compile the value of `root` into an executable function taking the graph's parameters.
pub fn compile_graph(
    graph: &ExprGraph<'_>,
    root: NodeId,
    options: &CompileOptions,
) -> CompileResult<ExecutableCode> {
    let ret = graph.ty(root)?;
    let generated = codegen::generate(graph, root, options)?;
    let region = ExecutableRegion::with_code(&generated.code.bytes)?;
    let stats = generated.stats;

    let session = graph.session();
    session.record_function_compiled(region.len());
    session.record_registers_allocated(stats.registers_allocated);
    session.record_spills(stats.spills);
    session.record_foreign_calls(stats.foreign_calls);
    session.record_branches(stats.conditionals, stats.patched_branches);

    log::info!(
        "✅ Compiled {root}: {} bytes, {} nodes, {} spills, frame {} bytes",
        region.len(),
        stats.nodes_generated,
        stats.spills,
        generated.code.frame_size
    );
    if log::log_enabled!(log::Level::Trace) {
        log::trace!(
            "📜 Disassembly of {root}:\n{}",
            disasm::listing(region.code(), region.as_ptr() as u64)
        );
    }

    Ok(ExecutableCode::new(
        region,
        graph.param_types(),
        ret,
        generated.code.frame_size,
        stats,
    ))
}

/// A graph whose parameters and result are fixed by the native signature `F`.
///
/// Graph-building methods are reached through `Deref`.
pub struct CompileUnit<'a, F: NativeSignature> {
    graph: ExprGraph<'a>,
    options: CompileOptions,
    _signature: PhantomData<F>,
}

impl<'a, F: NativeSignature> CompileUnit<'a, F> {
    pub fn new(session: &'a CompilationSession<'a>) -> CompileResult<Self> {
        Self::with_options(session, CompileOptions::default())
    }

    pub fn with_options(
        session: &'a CompilationSession<'a>,
        options: CompileOptions,
    ) -> CompileResult<Self> {
        Ok(Self {
            graph: ExprGraph::new(session, F::PARAMS)?,
            options,
            _signature: PhantomData,
        })
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn graph(&self) -> &ExprGraph<'a> {
        &self.graph
    }

    /// Compile `root` as the function's result.
    pub fn compile(&self, root: NodeId) -> CompileResult<CompiledFunction<F>> {
        self.compile_with(root, &self.options)
    }

    /// Compile into a code buffer of `capacity` bytes.
    pub fn compile_with_capacity(
        &self,
        root: NodeId,
        capacity: usize,
    ) -> CompileResult<CompiledFunction<F>> {
        let options = self.options.clone().with_code_capacity(capacity);
        self.compile_with(root, &options)
    }

    fn compile_with(
        &self,
        root: NodeId,
        options: &CompileOptions,
    ) -> CompileResult<CompiledFunction<F>> {
        let ty = self.graph.ty(root)?;
        if ty != F::RET {
            return Err(CompileError::type_mismatch(
                "compile",
                format!("root {root} is {ty} but the function returns {}", F::RET),
            ));
        }
        compile_graph(&self.graph, root, options)?.into_typed()
    }
}

impl<'a, F: NativeSignature> Deref for CompileUnit<'a, F> {
    type Target = ExprGraph<'a>;

    fn deref(&self) -> &Self::Target {
        &self.graph
    }
}

impl<F: NativeSignature> DerefMut for CompileUnit<'_, F> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.graph
    }
}
