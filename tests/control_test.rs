//! Test conditional compilation.
//!
//! Covers nested conditionals, fused and materialized compares, Bool
//! conditions that are not compares, unsigned and floating-point predicates
//! (including unordered NaN operands), and conditionals producing floats.

#![cfg(all(target_arch = "x86_64", unix))]

use bumpalo::Bump;
use exprjit::{CmpPred, CompilationSession, CompileOptions, CompileUnit};

const PREDICATES: [CmpPred; 6] = [
    CmpPred::Eq,
    CmpPred::Ne,
    CmpPred::Lt,
    CmpPred::Le,
    CmpPred::Gt,
    CmpPred::Ge,
];

fn holds<T: PartialOrd>(pred: CmpPred, a: T, b: T) -> bool {
    match pred {
        CmpPred::Eq => a == b,
        CmpPred::Ne => a != b,
        CmpPred::Lt => a < b,
        CmpPred::Le => a <= b,
        CmpPred::Gt => a > b,
        CmpPred::Ge => a >= b,
    }
}

#[test]
fn test_nested_clamp() {
    let _ = env_logger::builder().is_test(true).try_init();

    for fuse in [true, false] {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let options = CompileOptions::new().with_fuse_compares(fuse);
        let mut unit =
            CompileUnit::<extern "C" fn(i64, i64, i64) -> i64>::with_options(&session, options)
                .unwrap();

        // clamp(x, lo, hi) = x < lo ? lo : (x > hi ? hi : x)
        let (x, lo, hi) = (
            unit.param(0).unwrap(),
            unit.param(1).unwrap(),
            unit.param(2).unwrap(),
        );
        let below = unit.lt(x, lo).unwrap();
        let above = unit.gt(x, hi).unwrap();
        let upper = unit.select(above, hi, x).unwrap();
        let clamped = unit.select(below, lo, upper).unwrap();

        let compiled = unit.compile(clamped).unwrap();
        let f = compiled.entry();
        assert_eq!(f(5, 0, 10), 5);
        assert_eq!(f(-5, 0, 10), 0);
        assert_eq!(f(50, 0, 10), 10);
        assert_eq!(f(i64::MIN, -1, 1), -1);

        assert_eq!(compiled.stats().conditionals, 2);
        assert_eq!(compiled.stats().fused_compares, if fuse { 2 } else { 0 });
    }

    println!("✅ Nested conditionals with and without compare fusion");
}

#[test]
fn test_shared_compare_is_materialized() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut unit = CompileUnit::<extern "C" fn(i64, i64) -> i64>::new(&session).unwrap();

    // The compare feeds both a conditional and an arithmetic cast.
    let (a, b) = (unit.param(0).unwrap(), unit.param(1).unwrap());
    let less = unit.lt(a, b).unwrap();
    let picked = unit.select(less, a, b).unwrap();
    let as_int = unit.cast(less, exprjit::ValueType::I64).unwrap();
    let root = unit.add(picked, as_int).unwrap();

    let compiled = unit.compile(root).unwrap();
    let f = compiled.entry();
    assert_eq!(f(1, 2), 2);
    assert_eq!(f(2, 1), 1);
    assert_eq!(f(3, 3), 3);
    assert_eq!(compiled.stats().fused_compares, 0);

    println!("✅ Compare with several users kept as a Bool");
}

#[test]
fn test_bool_parameter_condition() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut unit = CompileUnit::<extern "C" fn(bool, f64, f64) -> f64>::new(&session).unwrap();

    let (flag, a, b) = (
        unit.param(0).unwrap(),
        unit.param(1).unwrap(),
        unit.param(2).unwrap(),
    );
    let product = unit.mul(a, b).unwrap();
    let quotient = unit.div(a, b).unwrap();
    let picked = unit.select(flag, product, quotient).unwrap();

    let compiled = unit.compile(picked).unwrap();
    let f = compiled.entry();
    assert_eq!(f(true, 3.0, 4.0), 12.0);
    assert_eq!(f(false, 3.0, 4.0), 0.75);

    println!("✅ Bool parameter used directly as a condition");
}

#[test]
fn test_unsigned_predicates() {
    let _ = env_logger::builder().is_test(true).try_init();

    let pairs = [(0u32, 1u32), (u32::MAX, 1), (1, u32::MAX), (7, 7), (0x8000_0000, 0x7FFF_FFFF)];
    for pred in PREDICATES {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut unit = CompileUnit::<extern "C" fn(u32, u32) -> bool>::new(&session).unwrap();
        let (a, b) = (unit.param(0).unwrap(), unit.param(1).unwrap());
        let cmp = unit.compare(pred, a, b).unwrap();
        let compiled = unit.compile(cmp).unwrap();
        for (a, b) in pairs {
            assert_eq!((compiled.entry())(a, b), holds(pred, a, b), "{pred:?} {a} {b}");
        }
    }

    println!("✅ Unsigned compares use unsigned conditions");
}

#[test]
fn test_signed_narrow_predicates() {
    let _ = env_logger::builder().is_test(true).try_init();

    let pairs = [(-1i8, 1i8), (i8::MIN, i8::MAX), (5, -5), (0, 0)];
    for pred in PREDICATES {
        let arena = Bump::new();
        let session = CompilationSession::new(&arena);
        let mut unit = CompileUnit::<extern "C" fn(i8, i8) -> i8>::new(&session).unwrap();
        let (a, b) = (unit.param(0).unwrap(), unit.param(1).unwrap());
        let cmp = unit.compare(pred, a, b).unwrap();
        let picked = unit.select(cmp, a, b).unwrap();
        let compiled = unit.compile(picked).unwrap();
        for (a, b) in pairs {
            let expected = if holds(pred, a, b) { a } else { b };
            assert_eq!((compiled.entry())(a, b), expected, "{pred:?} {a} {b}");
        }
    }

    println!("✅ Signed narrow compares fused into branches");
}

#[test]
fn test_float_predicates_with_nan() {
    let _ = env_logger::builder().is_test(true).try_init();

    let pairs = [
        (1.0f64, 2.0f64),
        (2.0, 1.0),
        (2.0, 2.0),
        (-0.0, 0.0),
        (f64::NAN, 1.0),
        (1.0, f64::NAN),
        (f64::NAN, f64::NAN),
    ];
    for pred in PREDICATES {
        for fuse in [true, false] {
            let arena = Bump::new();
            let session = CompilationSession::new(&arena);
            let options = CompileOptions::new().with_fuse_compares(fuse);

            let mut unit =
                CompileUnit::<extern "C" fn(f64, f64) -> bool>::with_options(&session, options.clone())
                    .unwrap();
            let (a, b) = (unit.param(0).unwrap(), unit.param(1).unwrap());
            let cmp = unit.compare(pred, a, b).unwrap();
            let materialized = unit.compile(cmp).unwrap();

            let mut unit =
                CompileUnit::<extern "C" fn(f64, f64) -> i64>::with_options(&session, options)
                    .unwrap();
            let (a, b) = (unit.param(0).unwrap(), unit.param(1).unwrap());
            let cmp = unit.compare(pred, a, b).unwrap();
            let one = unit.imm_i64(1).unwrap();
            let zero = unit.imm_i64(0).unwrap();
            let picked = unit.select(cmp, one, zero).unwrap();
            let branched = unit.compile(picked).unwrap();

            for (a, b) in pairs {
                let expected = holds(pred, a, b);
                assert_eq!((materialized.entry())(a, b), expected, "{pred:?} {a} {b}");
                assert_eq!((branched.entry())(a, b) == 1, expected, "{pred:?} {a} {b}");
            }
        }
    }

    println!("✅ Float compares are false on unordered operands except Ne");
}

#[test]
fn test_f32_conditional_arms() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let options = CompileOptions::new().with_max_fp_regs(2);
    let mut unit =
        CompileUnit::<extern "C" fn(f32, f32) -> f32>::with_options(&session, options).unwrap();

    // |a - b| * (a + b), with the absolute value taken by a conditional.
    let (a, b) = (unit.param(0).unwrap(), unit.param(1).unwrap());
    let diff = unit.sub(a, b).unwrap();
    let zero = unit.imm_f32(0.0).unwrap();
    let negative = unit.lt(diff, zero).unwrap();
    let flipped = unit.sub(zero, diff).unwrap();
    let magnitude = unit.select(negative, flipped, diff).unwrap();
    let sum = unit.add(a, b).unwrap();
    let root = unit.mul(magnitude, sum).unwrap();

    let compiled = unit.compile(root).unwrap();
    let f = compiled.entry();
    assert_eq!(f(1.0, 4.0), 15.0);
    assert_eq!(f(4.0, 1.0), 15.0);
    assert_eq!(f(2.5, 2.5), 0.0);

    println!("✅ f32 conditional with two XMM registers");
}
