// The end-to-end scenarios every conforming build must pass.

use crate::test::{run, run_int, run_str};
use crate::value::Value;

#[test]
fn test_arithmetic_precedence() {
    assert_eq!(run_int("return 1 + 2 * 3"), 7);
}

#[test]
fn test_upvalue_capture_by_reference() {
    let source = r#"
        local function make(n) return function() n = n + 1; return n end end
        local c = make(10); c(); c(); return c()
    "#;
    assert_eq!(run_int(source), 13);
}

#[test]
fn test_pcall_catches_error_with_location() {
    let source = r#"
        local ok, err = pcall(function() error("boom") end)
        return ok, err
    "#;
    let mut vm = crate::Vm::new();
    crate::stdlib::open_libs(&mut vm);
    let values = crate::execute_with_vm(&mut vm, source).unwrap();
    assert!(matches!(values[0], Value::Boolean(false)));
    let err = vm.display_value(values[1]);
    assert!(err.ends_with(": boom"), "error was {err:?}");
}

#[test]
fn test_index_function_metamethod() {
    let source = r#"
        local t = {}
        setmetatable(t, { __index = function(_, k) return k .. "!" end })
        return t.hello
    "#;
    assert_eq!(run_str(source), "hello!");
}

#[test]
fn test_multi_return_truncation_and_padding() {
    let source = r#"
        local function f() return 1, 2, 3 end
        local a, b, c, d = f()
        return a, b, c, d
    "#;
    let values = run(source);
    assert_eq!(values.len(), 4);
    assert!(values[0].raw_equals(&Value::Integer(1)));
    assert!(values[1].raw_equals(&Value::Integer(2)));
    assert!(values[2].raw_equals(&Value::Integer(3)));
    assert!(values[3].is_nil());
}

#[test]
fn test_numeric_for_sum() {
    let source = r#"
        local s = 0
        for i = 1, 10 do s = s + i end
        return s
    "#;
    assert_eq!(run_int(source), 55);
}
