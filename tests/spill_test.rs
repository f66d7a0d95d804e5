//! Test code generation under register pressure.
//!
//! Expressions here keep more values live than the allocator has registers,
//! so correct results depend on spilling and reloading. Every result is
//! checked against the reference evaluator.

#![cfg(all(target_arch = "x86_64", unix))]

use bumpalo::Bump;
use exprjit::graph::Value;
use exprjit::{evaluate, CompilationSession, CompileOptions, CompileUnit, ExprGraph, NodeId};

fn tight() -> CompileOptions {
    CompileOptions::new().with_max_gp_regs(4).with_max_fp_regs(2)
}

/// (v0 + v1 + ... + vn-1) * (vn-1 - ... - v0) where vi = p * (i + 1) + p1.
///
/// Every vi is computed before either sum, so all of them are live at once.
fn wide(graph: &mut ExprGraph<'_>, count: usize, float: bool) -> NodeId {
    let (p0, p1) = (graph.param(0).unwrap(), graph.param(1).unwrap());
    let mut values = Vec::new();
    for i in 0..count {
        let k = if float {
            graph.imm_f64(i as f64 + 1.0).unwrap()
        } else {
            graph.imm_i64(i as i64 + 1).unwrap()
        };
        let scaled = graph.mul(p0, k).unwrap();
        values.push(graph.add(scaled, p1).unwrap());
    }
    let mut forward = values[0];
    for &v in &values[1..] {
        forward = graph.add(forward, v).unwrap();
    }
    let mut backward = values[count - 1];
    for &v in values[..count - 1].iter().rev() {
        backward = graph.sub(backward, v).unwrap();
    }
    graph.mul(forward, backward).unwrap()
}

#[test]
fn test_wide_integer_expression() {
    let _ = env_logger::builder().is_test(true).try_init();

    for options in [CompileOptions::new(), tight()] {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut unit =
            CompileUnit::<extern "C" fn(i64, i64) -> i64>::with_options(&session, options.clone())
                .unwrap();
        let root = wide(&mut unit, 24, false);
        let compiled = unit.compile(root).unwrap();
        assert!(compiled.stats().spills > 0);

        for (a, b) in [(3, 5), (-7, 11), (1 << 33, -1)] {
            let expected = evaluate(&unit, root, &[Value::from_i64(a), Value::from_i64(b)])
                .unwrap()
                .as_i64();
            assert_eq!((compiled.entry())(a, b), expected);
        }
        println!(
            "✅ 24 live integers with {} GP registers: {} spills",
            options.max_gp_regs,
            compiled.stats().spills
        );
    }
}

#[test]
fn test_wide_float_expression() {
    let _ = env_logger::builder().is_test(true).try_init();

    for options in [CompileOptions::new(), tight()] {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut unit =
            CompileUnit::<extern "C" fn(f64, f64) -> f64>::with_options(&session, options.clone())
                .unwrap();
        let root = wide(&mut unit, 20, true);
        let compiled = unit.compile(root).unwrap();
        assert!(compiled.stats().spills > 0);

        for (a, b) in [(0.5, 1.25), (-3.0, 1e6)] {
            let expected = evaluate(&unit, root, &[Value::from_f64(a), Value::from_f64(b)])
                .unwrap()
                .as_f64();
            assert_eq!((compiled.entry())(a, b).to_bits(), expected.to_bits());
        }
        println!(
            "✅ 20 live floats with {} XMM registers: {} spills",
            options.max_fp_regs,
            compiled.stats().spills
        );
    }
}

#[test]
fn test_deep_chain() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut unit = CompileUnit::<extern "C" fn(i64, i64) -> i64>::with_options(&session, tight())
        .unwrap();

    // acc = acc * 3 + p1 ^ i, repeated; p0 and p1 stay live throughout.
    let (p0, p1) = (unit.param(0).unwrap(), unit.param(1).unwrap());
    let three = unit.imm_i64(3).unwrap();
    let mut acc = p0;
    for i in 0..100 {
        let k = unit.imm_i64(i).unwrap();
        let tripled = unit.mul(acc, three).unwrap();
        let mixed = unit.xor(p1, k).unwrap();
        acc = unit.add(tripled, mixed).unwrap();
    }
    let root = unit.sub(acc, p0).unwrap();
    assert!(unit.len() < 500);

    let compiled = unit.compile(root).unwrap();
    for (a, b) in [(1, 2), (-9, 1 << 20), (i64::MAX, i64::MIN)] {
        let expected = evaluate(&unit, root, &[Value::from_i64(a), Value::from_i64(b)])
            .unwrap()
            .as_i64();
        assert_eq!((compiled.entry())(a, b), expected);
    }

    println!("✅ Chain of {} nodes", unit.len());
}

#[test]
fn test_spilled_values_survive_conditionals() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut unit =
        CompileUnit::<extern "C" fn(i64, i64, i64) -> i64>::with_options(&session, tight())
            .unwrap();

    // Six products live across a select whose arms each need several registers.
    let params: Vec<_> = (0..3).map(|i| unit.param(i).unwrap()).collect();
    let mut live = Vec::new();
    for i in 0..3 {
        for j in i..3 {
            live.push(unit.mul(params[i], params[j]).unwrap());
        }
    }
    let cond = unit.lt(params[0], params[1]).unwrap();
    let t1 = unit.add(live[0], live[1]).unwrap();
    let t2 = unit.mul(t1, params[2]).unwrap();
    let e1 = unit.sub(live[2], live[3]).unwrap();
    let e2 = unit.xor(e1, params[0]).unwrap();
    let picked = unit.select(cond, t2, e2).unwrap();
    let mut root = picked;
    for &v in &live {
        root = unit.add(root, v).unwrap();
    }

    let compiled = unit.compile(root).unwrap();
    for args in [[1, 2, 3], [5, -2, 7], [-4, -4, 9], [0, 100, -100]] {
        let values: Vec<Value> = args.iter().map(|&a| Value::from_i64(a)).collect();
        let expected = evaluate(&unit, root, &values).unwrap().as_i64();
        assert_eq!((compiled.entry())(args[0], args[1], args[2]), expected);
    }

    println!("✅ Values spilled around a conditional are reloaded at the join");
}

#[test]
fn test_division_under_pressure() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut unit =
        CompileUnit::<extern "C" fn(i64, i64, i64) -> i64>::with_options(&session, tight())
            .unwrap();

    // rax and rdx are claimed by each division while other values are live.
    let (a, b, c) = (
        unit.param(0).unwrap(),
        unit.param(1).unwrap(),
        unit.param(2).unwrap(),
    );
    let sum = unit.add(a, b).unwrap();
    let product = unit.mul(a, c).unwrap();
    let q = unit.div(sum, c).unwrap();
    let r = unit.rem(product, b).unwrap();
    let mixed = unit.add(q, r).unwrap();
    let tail = unit.add(sum, product).unwrap();
    let root = unit.sub(mixed, tail).unwrap();

    let compiled = unit.compile(root).unwrap();
    for args in [[100, 7, 3], [-50, 9, -4], [i64::MAX / 4, 13, 17]] {
        let values: Vec<Value> = args.iter().map(|&v| Value::from_i64(v)).collect();
        let expected = evaluate(&unit, root, &values).unwrap().as_i64();
        assert_eq!((compiled.entry())(args[0], args[1], args[2]), expected);
    }

    println!("✅ Division with a four-register budget");
}
