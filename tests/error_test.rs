//! Test error reporting during graph construction and compilation.
//!
//! Build-time errors must leave the graph unchanged; compile-time errors must
//! not produce a callable or count as a compiled function.

#![cfg(all(target_arch = "x86_64", unix))]

use bumpalo::Bump;
use exprjit::graph::Constant;
use exprjit::{
    compile_graph, CompilationSession, CompileError, CompileOptions, CompileUnit, ExprGraph,
    ValueType,
};

#[test]
fn test_buffer_overflow() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut unit = CompileUnit::<extern "C" fn(i64, i64) -> i64>::new(&session).unwrap();

    let (a, b) = (unit.param(0).unwrap(), unit.param(1).unwrap());
    let mut acc = unit.mul(a, b).unwrap();
    for i in 0..32 {
        let k = unit.imm_i64(i * 1_000_003).unwrap();
        let term = unit.xor(acc, k).unwrap();
        acc = unit.add(term, b).unwrap();
    }

    for capacity in [0, 4, 16, 64] {
        match unit.compile_with_capacity(acc, capacity) {
            Err(CompileError::BufferOverflow {
                capacity: reported, ..
            }) => assert_eq!(reported, capacity),
            other => panic!("expected BufferOverflow for {capacity} bytes, got {other:?}"),
        }
    }
    assert_eq!(session.stats().functions_compiled, 0);

    // The same graph compiles with enough room.
    let compiled = unit.compile(acc).unwrap();
    assert!(compiled.code_size() > 64);
    assert_eq!(session.stats().functions_compiled, 1);

    println!("✅ Small code buffers rejected with BufferOverflow");
}

#[test]
fn test_type_mismatch_at_build_time() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph =
        ExprGraph::new(&session, &[ValueType::I32, ValueType::F64, ValueType::Ptr]).unwrap();
    let (i, f, p) = (
        graph.param(0).unwrap(),
        graph.param(1).unwrap(),
        graph.param(2).unwrap(),
    );
    let before = graph.len();

    let is_mismatch = |result: Result<_, CompileError>| {
        matches!(result, Err(CompileError::TypeMismatch { .. }))
    };
    assert!(is_mismatch(graph.add(i, f)));
    assert!(is_mismatch(graph.lt(i, f)));
    assert!(is_mismatch(graph.xor(f, f)));
    assert!(is_mismatch(graph.select(i, f, f)));
    assert!(is_mismatch(graph.field(i, 0, ValueType::I32)));
    assert!(is_mismatch(graph.element(p, f, ValueType::I32)));
    assert!(is_mismatch(graph.add(p, p)));
    assert!(is_mismatch(graph.cast(f, ValueType::Ptr)));
    assert!(is_mismatch(graph.cast(f, ValueType::Bool)));
    assert!(is_mismatch(graph.imm(ValueType::F64, Constant::Int(1))));
    assert!(is_mismatch(graph.imm(ValueType::I32, Constant::Float(1.0))));
    assert_eq!(graph.len(), before);

    let cond = graph.gt(f, f).unwrap();
    assert!(is_mismatch(graph.select(cond, i, f)));
    assert_eq!(graph.len(), before + 1);

    println!("✅ Type mismatches rejected without touching the graph");
}

#[test]
fn test_invalid_parameter_and_unknown_node() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut small = ExprGraph::new(&session, &[ValueType::I64]).unwrap();
    let mut large = ExprGraph::new(&session, &[ValueType::I64]).unwrap();

    assert_eq!(
        small.param(1),
        Err(CompileError::InvalidParameter { index: 1, count: 1 })
    );

    let p = large.param(0).unwrap();
    let mut foreign = p;
    for _ in 0..4 {
        foreign = large.add(foreign, p).unwrap();
    }

    let q = small.param(0).unwrap();
    let before = small.len();
    assert_eq!(
        small.add(q, foreign),
        Err(CompileError::UnknownNode {
            index: foreign.index()
        })
    );
    assert!(matches!(
        small.call(0x1000, &[q, foreign], ValueType::I64),
        Err(CompileError::UnknownNode { .. })
    ));
    assert_eq!(small.len(), before);
    assert!(matches!(
        compile_graph(&small, foreign, &CompileOptions::default()),
        Err(CompileError::UnknownNode { .. })
    ));

    println!("✅ Out-of-range parameters and foreign node ids rejected");
}

#[test]
fn test_allocator_exhausted() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let session = CompilationSession::with_memory_limit(&arena, 4096);
    let mut graph = ExprGraph::new(&session, &[ValueType::I64]).unwrap();
    let p = graph.param(0).unwrap();

    let mut acc = p;
    let mut failure = None;
    for _ in 0..100_000 {
        let before = graph.len();
        match graph.add(acc, p) {
            Ok(id) => acc = id,
            Err(err) => {
                assert_eq!(graph.len(), before);
                failure = Some(err);
                break;
            }
        }
    }

    match failure {
        Some(CompileError::AllocatorExhausted { limit, .. }) => assert_eq!(limit, Some(4096)),
        other => panic!("expected AllocatorExhausted, got {other:?}"),
    }
    assert!(session.memory_used() <= 4096);

    // Nodes built before the failure are still usable.
    let compiled = compile_graph(&graph, acc, &CompileOptions::default()).unwrap();
    assert!(compiled.code_size() > 0);

    println!("✅ Arena limit reported after {} nodes", graph.len());
}

#[test]
fn test_unsupported_operations() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut graph = ExprGraph::new(&session, &[ValueType::U64, ValueType::F64]).unwrap();
    let (u, f) = (graph.param(0).unwrap(), graph.param(1).unwrap());

    let to_float = graph.cast(u, ValueType::F64).unwrap();
    let to_unsigned = graph.cast(f, ValueType::U64).unwrap();
    let remainder = graph.rem(f, f).unwrap();

    for root in [to_float, to_unsigned, remainder] {
        assert!(matches!(
            compile_graph(&graph, root, &CompileOptions::default()),
            Err(CompileError::UnsupportedOperation { .. })
        ));
    }
    assert_eq!(session.stats().functions_compiled, 0);

    println!("✅ Operations without a native lowering rejected at compile time");
}

#[test]
fn test_root_must_match_signature() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut unit = CompileUnit::<extern "C" fn(i32) -> i64>::new(&session).unwrap();
    let p = unit.param(0).unwrap();
    let doubled = unit.add(p, p).unwrap();

    assert!(matches!(
        unit.compile(doubled),
        Err(CompileError::TypeMismatch { .. })
    ));

    let widened = unit.cast(doubled, ValueType::I64).unwrap();
    let compiled = unit.compile(widened).unwrap();
    // The i32 sum wraps before it is widened.
    assert_eq!((compiled.entry())(i32::MAX), -2);
    assert_eq!((compiled.entry())(-5), -10);

    // An untyped compile checks the signature on conversion instead.
    let code = compile_graph(&unit, widened, &CompileOptions::default()).unwrap();
    assert!(matches!(
        code.into_typed::<extern "C" fn(i64) -> i64>(),
        Err(CompileError::TypeMismatch { .. })
    ));

    println!("✅ Root and signature types checked");
}
