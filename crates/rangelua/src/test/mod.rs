// Integration tests: full source through compile + execute on the public
// API.

mod test_basic;
mod test_closures;
mod test_codegen;
mod test_control_flow;
mod test_coroutine;
mod test_errors;
mod test_gc;
mod test_metamethods;
mod test_scenarios;
mod test_stdlib;
mod test_tables;

use crate::value::Value;

/// Run a chunk on a fresh VM with the standard libraries open.
pub(crate) fn run(source: &str) -> Vec<Value> {
    match crate::execute(source) {
        Ok(values) => values,
        Err(e) => panic!("execution failed: {e}\nsource:\n{source}"),
    }
}

/// Run and demand a single integer result.
pub(crate) fn run_int(source: &str) -> i64 {
    let values = run(source);
    match values.first() {
        Some(Value::Integer(i)) => *i,
        other => panic!("expected integer result, got {other:?}"),
    }
}

/// Run and demand a single float result.
pub(crate) fn run_float(source: &str) -> f64 {
    let values = run(source);
    match values.first() {
        Some(Value::Float(n)) => *n,
        Some(Value::Integer(i)) => *i as f64,
        other => panic!("expected number result, got {other:?}"),
    }
}

/// Run and demand a single boolean result.
pub(crate) fn run_bool(source: &str) -> bool {
    let values = run(source);
    match values.first() {
        Some(Value::Boolean(b)) => *b,
        other => panic!("expected boolean result, got {other:?}"),
    }
}

/// Run and render the first result with a VM that stays alive for string
/// access.
pub(crate) fn run_str(source: &str) -> String {
    let mut vm = crate::Vm::new();
    crate::stdlib::open_libs(&mut vm);
    let values = match crate::execute_with_vm(&mut vm, source) {
        Ok(values) => values,
        Err(e) => panic!("execution failed: {e}\nsource:\n{source}"),
    };
    match values.first() {
        Some(v) => vm.display_value(*v),
        None => panic!("expected a result"),
    }
}

/// Expect a runtime error; returns its rendered message.
pub(crate) fn run_err(source: &str) -> String {
    match crate::execute(source) {
        Ok(v) => panic!("expected an error, got {v:?}"),
        Err(crate::LuaError::Runtime(e)) => e.message,
        Err(other) => panic!("expected a runtime error, got {other}"),
    }
}

/// Expect a compile-time error; returns its message.
pub(crate) fn compile_err(source: &str) -> String {
    match crate::execute(source) {
        Ok(v) => panic!("expected a compile error, got {v:?}"),
        Err(crate::LuaError::Compile(e)) => e.to_string(),
        Err(other) => panic!("expected a compile error, got {other}"),
    }
}
