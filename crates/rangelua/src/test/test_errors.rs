// Error raising, pcall/xpcall recovery and the failure boundaries.

use crate::test::{compile_err, run, run_bool, run_err, run_int, run_str};
use crate::value::Value;

#[test]
fn test_type_errors_carry_type_names() {
    let err = run_err("return nil + 1");
    assert!(err.contains("arithmetic"), "error was {err:?}");
    let err = run_err("local t = {} return t < t");
    assert!(err.contains("compare"), "error was {err:?}");
    let err = run_err("local x = nil return x.field");
    assert!(err.contains("index"), "error was {err:?}");
    let err = run_err("local x = 5 x()");
    assert!(err.contains("call"), "error was {err:?}");
    let err = run_err("return #5");
    assert!(err.contains("length"), "error was {err:?}");
}

#[test]
fn test_error_messages_carry_location() {
    let err = run_err("\n\nerror('line three')");
    assert!(err.contains(":3:"), "error was {err:?}");
}

#[test]
fn test_error_with_non_string_value() {
    let source = r#"
        local ok, err = pcall(function() error({ code = 42 }) end)
        return ok, err.code
    "#;
    let values = run(source);
    assert!(matches!(values[0], Value::Boolean(false)));
    assert!(values[1].raw_equals(&Value::Integer(42)));
}

#[test]
fn test_error_level_zero_unprefixed() {
    let source = r#"
        local ok, err = pcall(function() error("bare", 0) end)
        return err
    "#;
    assert_eq!(run_str(source), "bare");
}

#[test]
fn test_pcall_restores_execution() {
    let source = r#"
        local results = 0
        for i = 1, 5 do
            local ok = pcall(function()
                if i % 2 == 0 then error("even") end
            end)
            if ok then results = results + 1 end
        end
        return results
    "#;
    assert_eq!(run_int(source), 3);
}

#[test]
fn test_nested_pcall() {
    let source = r#"
        local ok_outer, res = pcall(function()
            local ok_inner, err = pcall(function() error("inner") end)
            return ok_inner
        end)
        return ok_outer, res
    "#;
    let values = run(source);
    assert!(matches!(values[0], Value::Boolean(true)));
    assert!(matches!(values[1], Value::Boolean(false)));
}

#[test]
fn test_xpcall_handler_runs() {
    let source = r#"
        local ok, handled = xpcall(
            function() error("original") end,
            function(e) return "handled: " .. e end
        )
        return handled
    "#;
    assert!(run_str(source).starts_with("handled: "));
}

#[test]
fn test_pcall_passes_arguments_and_results() {
    let source = r#"
        local ok, a, b = pcall(function(x, y) return x + y, x * y end, 3, 4)
        return a + b
    "#;
    assert_eq!(run_int(source), 19);
}

#[test]
fn test_deep_recursion_overflows_cleanly() {
    let err = run_err(
        r#"
        local function f(n) return f(n) + 1 end
        return f(0)
        "#,
    );
    assert!(err.contains("stack overflow"), "error was {err:?}");
}

#[test]
fn test_stack_overflow_is_catchable() {
    let source = r#"
        local function f(n) return f(n) + 1 end
        local ok = pcall(f, 0)
        return not ok
    "#;
    assert!(run_bool(source));
}

#[test]
fn test_nil_and_nan_keys_rejected() {
    let err = run_err("local t = {} t[nil] = 1");
    assert!(err.contains("nil"), "error was {err:?}");
    let err = run_err("local t = {} t[0/0] = 1");
    assert!(err.contains("NaN"), "error was {err:?}");
}

#[test]
fn test_for_step_zero() {
    let err = run_err("for i = 1, 10, 0 do end");
    assert!(err.contains("'for' step is zero"), "error was {err:?}");
}

#[test]
fn test_integer_division_by_zero() {
    let err = run_err("local a = 1 local b = 0 return a // b");
    assert!(err.contains("n//0"), "error was {err:?}");
    // Float division by zero is fine and infinite.
    assert!(run_bool("return 1 / 0 == math.huge"));
}

#[test]
fn test_compile_errors_have_location() {
    let err = compile_err("local x = ");
    assert!(err.contains("chunk:1"), "error was {err:?}");
    let err = compile_err("return )");
    assert!(err.contains("chunk:1"), "error was {err:?}");
}

#[test]
fn test_break_outside_loop_is_compile_error() {
    let err = compile_err("break");
    assert!(err.contains("break"), "error was {err:?}");
}

#[test]
fn test_goto_without_label_is_compile_error() {
    let err = compile_err("goto nowhere");
    assert!(err.contains("nowhere"), "error was {err:?}");
}

#[test]
fn test_assign_to_const_is_compile_error() {
    let err = compile_err("local x <const> = 1 x = 2");
    assert!(err.contains("const"), "error was {err:?}");
}

#[test]
fn test_vararg_outside_vararg_function() {
    let err = compile_err("local f = function() return ... end f()");
    assert!(err.contains("..."), "error was {err:?}");
}

#[test]
fn test_local_limit_boundary() {
    // 255 locals compile; one more is a compile error.
    let mut ok_source = String::new();
    for i in 0..255 {
        ok_source.push_str(&format!("local v{i}\n"));
    }
    assert!(crate::execute(&ok_source).is_ok());

    let mut bad_source = ok_source;
    bad_source.push_str("local overflow\n");
    assert!(matches!(
        crate::execute(&bad_source),
        Err(crate::LuaError::Compile(_))
    ));
}

#[test]
fn test_uncaught_error_reports_traceback() {
    match crate::execute("local function f() error('deep') end f()") {
        Err(crate::LuaError::Runtime(e)) => {
            assert!(e.message.contains("deep"));
            assert!(e.traceback.contains("main chunk"), "tb: {}", e.traceback);
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}
