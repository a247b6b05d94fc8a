// Values, arithmetic rules, truthiness and the global environment.

use crate::test::{run, run_bool, run_float, run_int, run_str};
use crate::value::Value;

#[test]
fn test_integer_arithmetic_stays_integer() {
    assert_eq!(run_int("return 2 + 3"), 5);
    assert_eq!(run_int("return 7 - 11"), -4);
    assert_eq!(run_int("return 6 * 7"), 42);
    assert_eq!(run_int("return 7 // 2"), 3);
    assert_eq!(run_int("return 7 % 3"), 1);
    assert_eq!(run_int("return -7 // 2"), -4);
    assert_eq!(run_int("return -7 % 3"), 2);
}

#[test]
fn test_float_contamination() {
    assert_eq!(run_float("return 1 + 0.5"), 1.5);
    // Division always yields a float.
    let values = run("return 4 / 2");
    assert!(matches!(values[0], Value::Float(n) if n == 2.0));
    let values = run("return 2 ^ 3");
    assert!(matches!(values[0], Value::Float(n) if n == 8.0));
    // Floor division of integers stays integer.
    let values = run("return 4 // 2");
    assert!(matches!(values[0], Value::Integer(2)));
}

#[test]
fn test_runtime_arithmetic_matches_folded() {
    // One operand through a local defeats the constant folder.
    let folded = run_int("return 10 - 3 * 2");
    let runtime = run_int("local a = 10 local b = 3 return a - b * 2");
    assert_eq!(folded, runtime);
}

#[test]
fn test_bitwise() {
    assert_eq!(run_int("return 0xF0 | 0x0F"), 0xFF);
    assert_eq!(run_int("return 0xFF & 0x0F"), 0x0F);
    assert_eq!(run_int("return 0xFF ~ 0x0F"), 0xF0);
    assert_eq!(run_int("return 1 << 4"), 16);
    assert_eq!(run_int("return 256 >> 4"), 16);
    assert_eq!(run_int("return ~0"), -1);
    // Shift counts of 64 or more flush to zero.
    assert_eq!(run_int("local n = 64 return 1 << n"), 0);
}

#[test]
fn test_string_number_coercion() {
    assert_eq!(run_int("return \"10\" + 1"), 11);
    assert_eq!(run_str("return 1 .. 2"), "12");
    assert_eq!(run_str("return \"x\" .. 1.5"), "x1.5");
}

#[test]
fn test_comparisons() {
    assert!(run_bool("return 1 < 2"));
    assert!(run_bool("return 2 <= 2"));
    assert!(run_bool("return 3 > 2"));
    assert!(!run_bool("return 1 ~= 1"));
    assert!(run_bool("return 1 == 1.0"));
    assert!(run_bool("return 'abc' < 'abd'"));
    assert!(!run_bool("return 'b' < 'a'"));
    // Comparison against a local defeats the immediate encodings.
    assert!(run_bool("local n = 5 return n > 4 and n >= 5 and n < 6 and n <= 5"));
}

#[test]
fn test_short_circuit_does_not_evaluate() {
    let source = r#"
        local called = false
        local function effect() called = true return true end
        local _ = false and effect()
        return called
    "#;
    assert!(!run_bool(source));

    let source = r#"
        local called = false
        local function effect() called = true return true end
        local _ = true or effect()
        return called
    "#;
    assert!(!run_bool(source));
}

#[test]
fn test_and_or_values() {
    assert_eq!(run_int("return false or 5"), 5);
    assert_eq!(run_int("return nil and 1 or 2"), 2);
    assert_eq!(run_int("return 1 and 2"), 2);
    assert_eq!(run_str("return nil or 'default'"), "default");
}

#[test]
fn test_not_and_truthiness() {
    assert!(run_bool("return not nil"));
    assert!(run_bool("return not false"));
    assert!(!run_bool("return not 0")); // 0 is truthy
    assert!(!run_bool("return not ''"));
}

#[test]
fn test_globals() {
    assert_eq!(run_int("x = 41 return x + 1"), 42);
    assert!(run("return never_defined")[0].is_nil());
    assert!(run_bool("return _G.print == print"));
}

#[test]
fn test_multiple_assignment_order() {
    // RHS evaluated fully before any store; swap works.
    assert_eq!(run_int("local a, b = 1, 2 a, b = b, a return a * 10 + b"), 21);
    // Earlier target's index expression sees the old value.
    let source = r#"
        local t = { x = 0 }
        local a = t
        a.x, a = 99, { x = 1 }
        return t.x
    "#;
    assert_eq!(run_int(source), 99);
}

#[test]
fn test_tostring_tonumber_roundtrip() {
    assert_eq!(run_str("return tostring(tonumber('42'))"), "42");
    assert_eq!(run_str("return tostring(tonumber('1.5'))"), "1.5");
    assert_eq!(run_str("return tostring(1.0)"), "1.0");
}

#[test]
fn test_length_operator() {
    assert_eq!(run_int("return #'hello'"), 5);
    assert_eq!(run_int("return #{1, 2, 3}"), 3);
    assert_eq!(run_int("return #{}"), 0);
}

#[test]
fn test_concat_chain() {
    assert_eq!(run_str("return 'a' .. 'b' .. 'c' .. 'd'"), "abcd");
    assert_eq!(run_str("local a = 'x' return a .. 'y' .. 'z'"), "xyz");
}

#[test]
fn test_unary_minus() {
    assert_eq!(run_int("return -(3)"), -3);
    assert_eq!(run_int("local n = 3 return -n"), -3);
    assert_eq!(run_float("return -(1.5)"), -1.5);
}

#[test]
fn test_integer_overflow_wraps() {
    assert_eq!(
        run_int("return math.maxinteger + 1"),
        i64::MIN
    );
}
