// Table semantics: constructors, borders, iteration, key normalization.

use crate::test::{run, run_bool, run_int, run_str};
use crate::value::Value;

#[test]
fn test_constructor_flavors() {
    let source = r#"
        local t = { 10, 20, x = "ex", ["y"] = "why", [10] = "ten", 30 }
        return t[1] + t[2] + t[3], t.x, t.y, t[10]
    "#;
    let mut vm = crate::Vm::new();
    crate::stdlib::open_libs(&mut vm);
    let values = crate::execute_with_vm(&mut vm, source).unwrap();
    assert!(values[0].raw_equals(&Value::Integer(60)));
    assert_eq!(vm.display_value(values[1]), "ex");
    assert_eq!(vm.display_value(values[2]), "why");
    assert_eq!(vm.display_value(values[3]), "ten");
}

#[test]
fn test_trailing_call_spreads() {
    let source = r#"
        local function three() return 7, 8, 9 end
        local t = { 1, three() }
        return #t, t[4]
    "#;
    let values = run(source);
    assert!(values[0].raw_equals(&Value::Integer(4)));
    assert!(values[1].raw_equals(&Value::Integer(9)));
    // A call in the middle contributes exactly one value.
    let source = r#"
        local function three() return 7, 8, 9 end
        local t = { three(), 100 }
        return #t, t[1], t[2]
    "#;
    let values = run(source);
    assert!(values[0].raw_equals(&Value::Integer(2)));
    assert!(values[1].raw_equals(&Value::Integer(7)));
    assert!(values[2].raw_equals(&Value::Integer(100)));
}

#[test]
fn test_large_constructor_flushes() {
    // More than one SETLIST flush worth of items.
    let mut source = String::from("local t = {");
    for i in 1..=120 {
        source.push_str(&format!("{i},"));
    }
    source.push_str("} return #t, t[1], t[60], t[120]");
    let values = run(&source);
    assert!(values[0].raw_equals(&Value::Integer(120)));
    assert!(values[1].raw_equals(&Value::Integer(1)));
    assert!(values[2].raw_equals(&Value::Integer(60)));
    assert!(values[3].raw_equals(&Value::Integer(120)));
}

#[test]
fn test_border_contract() {
    // n consecutive keys and nothing at n+1: length is exactly n.
    assert_eq!(run_int("local t = {} for i = 1, 7 do t[i] = i end return #t"), 7);
    assert_eq!(run_int("return #{ [1] = 1, [2] = 2, [3] = 3 }"), 3);
}

#[test]
fn test_length_after_removal() {
    assert_eq!(
        run_int("local t = { 1, 2, 3 } t[3] = nil return #t"),
        2
    );
}

#[test]
fn test_float_keys_normalize() {
    assert!(run_bool("local t = {} t[2.0] = true return t[2]"));
    assert_eq!(run_int("local t = {} t[3] = 9 return t[3.0]"), 9);
}

#[test]
fn test_mixed_key_types() {
    let source = r#"
        local t = {}
        t[true] = "bool"
        t["1"] = "string-one"
        t[1] = "number-one"
        return t[true], t["1"], t[1]
    "#;
    let mut vm = crate::Vm::new();
    crate::stdlib::open_libs(&mut vm);
    let values = crate::execute_with_vm(&mut vm, source).unwrap();
    assert_eq!(vm.display_value(values[0]), "bool");
    assert_eq!(vm.display_value(values[1]), "string-one");
    assert_eq!(vm.display_value(values[2]), "number-one");
}

#[test]
fn test_next_covers_all_entries() {
    let source = r#"
        local t = { 1, 2, 3, alpha = 4, beta = 5 }
        local count, sum = 0, 0
        local k, v = next(t)
        while k ~= nil do
            count = count + 1
            sum = sum + v
            k, v = next(t, k)
        end
        return count, sum
    "#;
    let values = run(source);
    assert!(values[0].raw_equals(&Value::Integer(5)));
    assert!(values[1].raw_equals(&Value::Integer(15)));
}

#[test]
fn test_tables_compare_by_identity() {
    assert!(run_bool("local a = {} local b = a return a == b"));
    assert!(!run_bool("return {} == {}"));
}

#[test]
fn test_nested_access() {
    assert_eq!(
        run_int("local t = { inner = { deep = { 42 } } } return t.inner.deep[1]"),
        42
    );
    assert_eq!(
        run_str("local t = {} t.a = {} t.a.b = 'leaf' return t['a']['b']"),
        "leaf"
    );
}
