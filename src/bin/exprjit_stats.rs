//! Compile a synthetic expression and report what the code generator did.
//!
//! The expression reads N inputs from an array and sums the products of
//! neighbouring inputs, optionally choosing between a product and a
//! difference per term with a conditional. The compiled function is checked
//! against the reference evaluator, timed, and optionally disassembled.

use std::process::ExitCode;
use std::time::Instant;

use bumpalo::Bump;
use clap::Parser;

use exprjit::graph::{evaluate_unchecked, Value};
use exprjit::x64::disasm;
use exprjit::{
    CompilationSession, CompileOptions, CompileResult, CompileUnit, CompiledFunction, ExprGraph,
    NativeSignature, NodeId, ValueType,
};

#[derive(Parser)]
#[command(name = "exprjit-stats")]
#[command(version = "0.1.0")]
#[command(about = "Compile a synthetic expression graph and print code generation statistics")]
struct Cli {
    /// Number of array inputs the expression reads.
    #[arg(short = 'n', long, default_value_t = 16)]
    inputs: usize,

    /// Use f64 inputs instead of i64.
    #[arg(long)]
    float: bool,

    /// Choose between product and difference per term with a conditional.
    #[arg(long)]
    conditionals: bool,

    /// Limit the general registers available to the allocator.
    #[arg(long)]
    max_gp_regs: Option<usize>,

    /// Limit the XMM registers available to the allocator.
    #[arg(long)]
    max_fp_regs: Option<usize>,

    /// Keep compares materialized instead of fusing them into branches.
    #[arg(long)]
    no_fuse: bool,

    /// Print the NASM disassembly of the compiled function.
    #[arg(long)]
    disasm: bool,

    /// Number of timed calls.
    #[arg(short, long, default_value_t = 1_000_000)]
    iterations: u64,
}

type IntEntry = extern "C" fn(*const i64) -> i64;
type FloatEntry = extern "C" fn(*const f64) -> f64;

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    if cli.inputs == 0 {
        eprintln!("error: --inputs must be at least 1");
        return ExitCode::FAILURE;
    }

    let mut options = CompileOptions::from_env().with_fuse_compares(!cli.no_fuse);
    if let Some(count) = cli.max_gp_regs {
        options = options.with_max_gp_regs(count);
    }
    if let Some(count) = cli.max_fp_regs {
        options = options.with_max_fp_regs(count);
    }

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let outcome = if cli.float {
        let data: Vec<f64> = (0..cli.inputs).map(|i| i as f64 * 0.75 - 3.0).collect();
        let call = |f: &FloatEntry, p: *const f64| f(p);
        run(&cli, &session, options, &data, ValueType::F64, call, |v| v.as_f64())
    } else {
        let data: Vec<i64> = (0..cli.inputs as i64).map(|i| i * 3 - 7).collect();
        let call = |f: &IntEntry, p: *const i64| f(p);
        run(&cli, &session, options, &data, ValueType::I64, call, |v| v.as_i64())
    };

    match outcome {
        Ok(true) => {
            println!("\n{}", session.stats());
            ExitCode::SUCCESS
        }
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

/// Compile, verify and time one expression over `data`.
fn run<'a, F, T>(
    cli: &Cli,
    session: &'a CompilationSession<'a>,
    options: CompileOptions,
    data: &[T],
    ty: ValueType,
    call: impl Fn(&F, *const T) -> T,
    convert: impl Fn(Value) -> T,
) -> CompileResult<bool>
where
    F: NativeSignature,
    T: Copy + PartialEq + std::fmt::Display,
{
    let mut unit = CompileUnit::<F>::with_options(session, options)?;
    let root = build(&mut unit, cli.inputs, ty, cli.conditionals)?;

    let started = Instant::now();
    let compiled: CompiledFunction<F> = unit.compile(root)?;
    let compile_time = started.elapsed();

    let stats = compiled.stats();
    println!("Code size:        {} bytes", compiled.code_size());
    println!("Compile time:     {compile_time:?}");
    println!("Nodes generated:  {}", stats.nodes_generated);
    println!("Instructions:     {}", stats.instructions);
    println!("Registers used:   {}", stats.registers_allocated);
    println!("Spills:           {}", stats.spills);
    println!("Conditionals:     {}", stats.conditionals);
    println!("Fused compares:   {}", stats.fused_compares);
    println!("Hoisted nodes:    {}", stats.hoisted_nodes);

    if cli.disasm {
        println!(
            "\n{}",
            disasm::listing(compiled.code(), compiled.entry_address() as u64)
        );
    }

    let args = [Value::from_ptr(data.as_ptr() as usize)];
    // SAFETY: every element node indexes `data` within bounds.
    let expected = convert(unsafe { evaluate_unchecked(&unit, root, &args)? });
    let actual = call(compiled.entry(), data.as_ptr());
    println!("\nResult:           {actual}");
    if expected != actual {
        eprintln!("error: evaluator returned {expected}");
        return Ok(false);
    }

    let started = Instant::now();
    for _ in 0..cli.iterations {
        std::hint::black_box(call(compiled.entry(), std::hint::black_box(data.as_ptr())));
    }
    let elapsed = started.elapsed();
    if cli.iterations > 0 {
        println!(
            "Timing:           {} calls in {elapsed:?} ({:.1} ns/call)",
            cli.iterations,
            elapsed.as_nanos() as f64 / cli.iterations as f64
        );
    }
    Ok(true)
}

/// Sum over i of input[i] * input[i + 1], wrapping around at the end.
fn build(
    graph: &mut ExprGraph<'_>,
    inputs: usize,
    ty: ValueType,
    conditionals: bool,
) -> CompileResult<NodeId> {
    let base = graph.param(0)?;
    let mut values = Vec::with_capacity(inputs);
    for i in 0..inputs {
        let index = graph.imm_i64(i as i64)?;
        values.push(graph.element(base, index, ty)?);
    }

    let mut terms = Vec::with_capacity(inputs);
    for i in 0..inputs {
        let (a, b) = (values[i], values[(i + 1) % inputs]);
        let mut term = graph.mul(a, b)?;
        if conditionals {
            let larger = graph.gt(a, b)?;
            let diff = graph.sub(a, b)?;
            term = graph.select(larger, term, diff)?;
        }
        terms.push(term);
    }

    let mut sum = terms[0];
    for &term in &terms[1..] {
        sum = graph.add(sum, term)?;
    }
    Ok(sum)
}
