// Coroutines: resume/yield value flow, status transitions, wrap, and the
// native-boundary restriction.

use crate::test::{run, run_bool, run_int, run_str};
use crate::value::Value;

#[test]
fn test_create_resume_yield() {
    let source = r#"
        local co = coroutine.create(function(a, b)
            local c = coroutine.yield(a + b)
            return a + b + c
        end)
        local ok1, first = coroutine.resume(co, 1, 2)
        local ok2, second = coroutine.resume(co, 10)
        return first, second
    "#;
    let values = run(source);
    assert!(values[0].raw_equals(&Value::Integer(3)));
    assert!(values[1].raw_equals(&Value::Integer(13)));
}

#[test]
fn test_yield_multiple_values() {
    let source = r#"
        local co = coroutine.create(function()
            coroutine.yield(1, 2, 3)
            return "end"
        end)
        local _, a, b, c = coroutine.resume(co)
        return a + b + c
    "#;
    assert_eq!(run_int(source), 6);
}

#[test]
fn test_status_transitions() {
    let source = r#"
        local co = coroutine.create(function() coroutine.yield() end)
        local s1 = coroutine.status(co)   -- suspended
        coroutine.resume(co)
        local s2 = coroutine.status(co)   -- suspended at yield
        coroutine.resume(co)
        local s3 = coroutine.status(co)   -- dead
        return s1 .. "/" .. s2 .. "/" .. s3
    "#;
    assert_eq!(run_str(source), "suspended/suspended/dead");
}

#[test]
fn test_resume_dead_coroutine_fails() {
    let source = r#"
        local co = coroutine.create(function() return 1 end)
        coroutine.resume(co)
        local ok = coroutine.resume(co)
        return ok
    "#;
    assert!(!run_bool(source));
}

#[test]
fn test_coroutine_error_reported_to_resumer() {
    let source = r#"
        local co = coroutine.create(function() error("inside") end)
        local ok, err = coroutine.resume(co)
        return ok, err
    "#;
    let mut vm = crate::Vm::new();
    crate::stdlib::open_libs(&mut vm);
    let values = crate::execute_with_vm(&mut vm, source).unwrap();
    assert!(matches!(values[0], Value::Boolean(false)));
    assert!(vm.display_value(values[1]).contains("inside"));
}

#[test]
fn test_producer_consumer_loop() {
    let source = r#"
        local producer = coroutine.create(function()
            for i = 1, 5 do coroutine.yield(i) end
        end)
        local sum = 0
        while true do
            local ok, v = coroutine.resume(producer)
            if not v then break end
            sum = sum + v
        end
        return sum
    "#;
    assert_eq!(run_int(source), 15);
}

#[test]
fn test_wrap() {
    let source = r#"
        local gen = coroutine.wrap(function()
            coroutine.yield(10)
            coroutine.yield(20)
        end)
        return gen() + gen()
    "#;
    assert_eq!(run_int(source), 30);
}

#[test]
fn test_nested_coroutines() {
    let source = r#"
        local inner = coroutine.create(function()
            coroutine.yield("inner-yield")
        end)
        local outer = coroutine.create(function()
            local _, v = coroutine.resume(inner)
            coroutine.yield("outer:" .. v)
        end)
        local _, got = coroutine.resume(outer)
        return got
    "#;
    assert_eq!(run_str(source), "outer:inner-yield");
}

#[test]
fn test_yield_from_main_is_error() {
    let source = r#"
        local ok, err = pcall(coroutine.yield, 1)
        return not ok
    "#;
    assert!(run_bool(source));
}

#[test]
fn test_yield_across_pcall_is_error() {
    // pcall is a native boundary; yields cannot cross it.
    let source = r#"
        local co = coroutine.create(function()
            local ok, err = pcall(function() coroutine.yield(1) end)
            coroutine.yield(ok)
        end)
        local _, v = coroutine.resume(co)
        return v == false
    "#;
    assert!(run_bool(source));
}

#[test]
fn test_isyieldable() {
    let source = r#"
        local outside = coroutine.isyieldable()
        local inside
        local co = coroutine.create(function()
            inside = coroutine.isyieldable()
        end)
        coroutine.resume(co)
        return not outside and inside
    "#;
    assert!(run_bool(source));
}
