//! End-to-end compilation of the reference scenarios.
//!
//! Each test builds an expression graph, compiles it to native code and
//! calls the result through its typed entry point.

#![cfg(all(target_arch = "x86_64", unix))]

use bumpalo::Bump;
use exprjit::{CompilationSession, CompileUnit, ValueType};

#[test]
fn test_circle_area() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut unit = CompileUnit::<extern "C" fn(f64) -> f64>::new(&session).unwrap();

    let p1 = unit.param(0).unwrap();
    let squared = unit.mul(p1, p1).unwrap();
    let pi = unit.imm_f64(3.14159265358979).unwrap();
    let area = unit.mul(squared, pi).unwrap();

    let compiled = unit.compile(area).unwrap();
    let f = compiled.entry();
    assert!((f(2.0) - 12.566371).abs() < 1e-5);
    assert_eq!(f(0.0), 0.0);
    assert!((f(-1.0) - 3.14159265358979).abs() < 1e-12);

    let stats = session.stats();
    assert_eq!(stats.functions_compiled, 1);
    assert_eq!(stats.total_code_size, compiled.code_size());

    println!("✅ Circle area compiled to {} bytes", compiled.code_size());
}

#[test]
fn test_max_of_two() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut unit = CompileUnit::<extern "C" fn(i64, i64) -> i64>::new(&session).unwrap();

    let (p1, p2) = (unit.param(0).unwrap(), unit.param(1).unwrap());
    let greater = unit.gt(p1, p2).unwrap();
    let max = unit.select(greater, p1, p2).unwrap();

    let compiled = unit.compile(max).unwrap();
    let f = compiled.entry();
    assert_eq!(f(3, 7), 7);
    assert_eq!(f(7, 3), 7);
    assert_eq!(f(5, 5), 5);
    assert_eq!(f(-10, -20), -10);
    assert_eq!(f(i64::MIN, i64::MAX), i64::MAX);

    assert_eq!(compiled.stats().conditionals, 1);
    assert_eq!(compiled.stats().fused_compares, 1);

    println!("✅ Conditional max compiled to {} bytes", compiled.code_size());
}

#[repr(C)]
struct Record {
    id: u32,
    values: *const i64,
}

#[test]
fn test_field_then_element() {
    let _ = env_logger::builder().is_test(true).try_init();

    let data = [11i64, -22, 33, i64::MAX, 55];
    let record = Record {
        id: 9,
        values: data.as_ptr(),
    };

    let arena = Bump::new();
    let session = CompilationSession::new(&arena);
    let mut unit = CompileUnit::<extern "C" fn(*const Record, i64) -> i64>::new(&session).unwrap();

    let (base, index) = (unit.param(0).unwrap(), unit.param(1).unwrap());
    let offset = std::mem::offset_of!(Record, values) as i32;
    let values = unit.field(base, offset, ValueType::Ptr).unwrap();
    let element = unit.element(values, index, ValueType::I64).unwrap();

    let compiled = unit.compile(element).unwrap();
    let f = compiled.entry();
    for (i, expected) in data.iter().enumerate() {
        assert_eq!(f(&record, i as i64), *expected);
    }
    assert_eq!(record.id, 9);

    println!("✅ base.field[index] compiled to {} bytes", compiled.code_size());
}
