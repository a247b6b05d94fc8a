// Closures, upvalue sharing and the open/close protocol.

use crate::test::{run, run_int};
use crate::value::Value;

#[test]
fn test_two_closures_share_one_cell() {
    let source = r#"
        local function pair()
            local n = 0
            local function inc() n = n + 1 end
            local function get() return n end
            return inc, get
        end
        local inc, get = pair()
        inc(); inc(); inc()
        return get()
    "#;
    assert_eq!(run_int(source), 3);
}

#[test]
fn test_sharing_survives_scope_exit() {
    // After pair() returns, the cell is closed but still shared.
    let source = r#"
        local inc, get
        do
            local n = 10
            inc = function() n = n + 5 end
            get = function() return n end
        end
        inc()
        return get()
    "#;
    assert_eq!(run_int(source), 15);
}

#[test]
fn test_loop_iterations_get_fresh_cells() {
    let source = r#"
        local fns = {}
        for i = 1, 3 do
            local x = i
            fns[i] = function() return x end
        end
        return fns[1]() * 100 + fns[2]() * 10 + fns[3]()
    "#;
    assert_eq!(run_int(source), 123);
}

#[test]
fn test_while_loop_fresh_cells() {
    let source = r#"
        local fns = {}
        local i = 1
        while i <= 3 do
            local x = i
            fns[i] = function() return x end
            i = i + 1
        end
        return fns[1]() + fns[2]() + fns[3]()
    "#;
    assert_eq!(run_int(source), 6);
}

#[test]
fn test_capture_through_two_levels() {
    let source = r#"
        local function outer()
            local x = 1
            return function()      -- middle captures x
                return function()  -- inner captures through middle
                    x = x + 1
                    return x
                end
            end
        end
        local f = outer()()
        f()
        return f()
    "#;
    assert_eq!(run_int(source), 3);
}

#[test]
fn test_counter_factory_independence() {
    let source = r#"
        local function counter()
            local n = 0
            return function() n = n + 1 return n end
        end
        local a, b = counter(), counter()
        a(); a()
        b()
        return a() * 10 + b()
    "#;
    assert_eq!(run_int(source), 32);
}

#[test]
fn test_parameter_capture() {
    let source = r#"
        local function adder(n)
            return function(m) return n + m end
        end
        local add5 = adder(5)
        return add5(10) + add5(1)
    "#;
    assert_eq!(run_int(source), 21);
}

#[test]
fn test_recursive_local_function() {
    let source = r#"
        local function fib(n)
            if n < 2 then return n end
            return fib(n - 1) + fib(n - 2)
        end
        return fib(12)
    "#;
    assert_eq!(run_int(source), 144);
}

#[test]
fn test_upvalue_from_main_chunk() {
    let source = r#"
        local acc = 0
        local function bump() acc = acc + 7 end
        bump()
        bump()
        return acc
    "#;
    assert_eq!(run_int(source), 14);
}

#[test]
fn test_closure_returned_through_pcall() {
    let source = r#"
        local ok, f = pcall(function()
            local v = 42
            return function() return v end
        end)
        return f()
    "#;
    let values = run(source);
    assert!(values[0].raw_equals(&Value::Integer(42)));
}
