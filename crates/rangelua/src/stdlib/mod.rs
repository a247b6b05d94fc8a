// Standard library surface: the interface layer between native functions
// and the VM, plus the minimal implementations the runtime and tests need.

pub mod basic;
pub mod coroutine;
pub mod math;
pub mod string;
pub mod table;

use crate::value::Value;
use crate::vm::{Control, Vm};

/// Open every library into the VM's global environment.
pub fn open_libs(vm: &mut Vm) {
    basic::open(vm);
    math::open(vm);
    string::open(vm);
    table::open(vm);
    coroutine::open(vm);
}

// ---- argument helpers shared by the libraries ----

pub(crate) fn arg(args: &[Value], idx: usize) -> Value {
    args.get(idx).copied().unwrap_or(Value::Nil)
}

pub(crate) fn bad_arg(vm: &mut Vm, idx: usize, fname: &str, expected: &str, got: &Value) -> Control {
    vm.rt_error(format!(
        "bad argument #{} to '{}' ({} expected, got {})",
        idx + 1,
        fname,
        expected,
        got.type_name()
    ))
}

pub(crate) fn check_integer(
    vm: &mut Vm,
    args: &[Value],
    idx: usize,
    fname: &str,
) -> Result<i64, Control> {
    let v = arg(args, idx);
    match v.as_integer() {
        Some(i) => Ok(i),
        None => match &v {
            Value::String(id) => {
                let s = vm.pool.str(*id).to_string();
                match crate::vm::execute::arith::str_to_number(&s).and_then(|n| n.as_integer()) {
                    Some(i) => Ok(i),
                    None => Err(bad_arg(vm, idx, fname, "number", &v)),
                }
            }
            _ => Err(bad_arg(vm, idx, fname, "number", &v)),
        },
    }
}

pub(crate) fn check_number(
    vm: &mut Vm,
    args: &[Value],
    idx: usize,
    fname: &str,
) -> Result<f64, Control> {
    let v = arg(args, idx);
    match vm.coerce_number(&v) {
        Some(n) => Ok(n.as_float().unwrap_or(0.0)),
        None => Err(bad_arg(vm, idx, fname, "number", &v)),
    }
}

pub(crate) fn check_string(
    vm: &mut Vm,
    args: &[Value],
    idx: usize,
    fname: &str,
) -> Result<String, Control> {
    let v = arg(args, idx);
    match &v {
        Value::String(id) => Ok(vm.pool.str(*id).to_string()),
        Value::Integer(_) | Value::Float(_) => Ok(vm.display_value(v)),
        _ => Err(bad_arg(vm, idx, fname, "string", &v)),
    }
}

pub(crate) fn check_table(
    vm: &mut Vm,
    args: &[Value],
    idx: usize,
    fname: &str,
) -> Result<crate::gc::TableId, Control> {
    let v = arg(args, idx);
    match v.as_table_id() {
        Some(id) => Ok(id),
        None => Err(bad_arg(vm, idx, fname, "table", &v)),
    }
}

/// Register a table of native functions under a global name.
pub(crate) fn register_lib(vm: &mut Vm, name: &str, fns: &[(&str, crate::vm::NativeFn)]) -> Value {
    let lib = vm.create_table(0, fns.len());
    let Some(lib_id) = lib.as_table_id() else {
        return Value::Nil;
    };
    for (fname, f) in fns {
        let key = vm.create_string(fname);
        let _ = vm.pool.table_mut(lib_id).set(key, Value::Native(*f));
    }
    vm.set_global(name, lib);
    lib
}
