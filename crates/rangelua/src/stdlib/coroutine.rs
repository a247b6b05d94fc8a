// The coroutine library. `wrap` is bootstrapped in Lua because it needs a
// per-coroutine closure, which native functions (plain fn pointers) cannot
// capture.

use crate::stdlib::{arg, bad_arg, register_lib};
use crate::value::Value;
use crate::vm::{Control, Vm};

pub fn open(vm: &mut Vm) {
    register_lib(
        vm,
        "coroutine",
        &[
            ("create", lua_create),
            ("resume", lua_resume),
            ("yield", lua_yield),
            ("status", lua_status),
            ("isyieldable", lua_isyieldable),
        ],
    );

    let bootstrap = r#"
        local create, resume = coroutine.create, coroutine.resume
        local function finish(ok, ...)
            if ok then return ... end
            error((...), 0)
        end
        coroutine.wrap = function(f)
            local co = create(f)
            return function(...)
                return finish(resume(co, ...))
            end
        end
    "#;
    if let Ok(proto) = vm.compile(bootstrap, "=coroutine") {
        let _ = vm.execute(proto);
    }
}

fn lua_create(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let f = arg(&args, 0);
    if !f.is_function() {
        return Err(bad_arg(vm, 0, "create", "function", &f));
    }
    Ok(vec![vm.coroutine_create(f)?])
}

fn lua_resume(vm: &mut Vm, mut args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let co = arg(&args, 0);
    let Value::Thread(id) = co else {
        return Err(bad_arg(vm, 0, "resume", "coroutine", &co));
    };
    args.remove(0);
    let (ok, mut values) = vm.coroutine_resume(id, args)?;
    let mut out = Vec::with_capacity(values.len() + 1);
    out.push(Value::Boolean(ok));
    out.append(&mut values);
    Ok(out)
}

fn lua_yield(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    Err(vm.coroutine_yield(args))
}

fn lua_status(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let co = arg(&args, 0);
    let Value::Thread(id) = co else {
        return Err(bad_arg(vm, 0, "status", "coroutine", &co));
    };
    let status = vm.thread_status(id);
    Ok(vec![vm.create_string(status)])
}

fn lua_isyieldable(vm: &mut Vm, _args: Vec<Value>) -> Result<Vec<Value>, Control> {
    Ok(vec![Value::Boolean(!vm.resume_chain.is_empty())])
}
