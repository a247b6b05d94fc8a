// The basic library: the globals every chunk expects.

use crate::stdlib::{arg, bad_arg, check_integer, check_table};
use crate::value::Value;
use crate::vm::execute::arith::str_to_number;
use crate::vm::{Control, Vm};

pub fn open(vm: &mut Vm) {
    vm.register_native("print", lua_print);
    vm.register_native("type", lua_type);
    vm.register_native("tostring", lua_tostring);
    vm.register_native("tonumber", lua_tonumber);
    vm.register_native("ipairs", lua_ipairs);
    vm.register_native("pairs", lua_pairs);
    vm.register_native("next", lua_next);
    vm.register_native("error", lua_error);
    vm.register_native("assert", lua_assert);
    vm.register_native("pcall", lua_pcall);
    vm.register_native("xpcall", lua_xpcall);
    vm.register_native("select", lua_select);
    vm.register_native("rawget", lua_rawget);
    vm.register_native("rawset", lua_rawset);
    vm.register_native("rawequal", lua_rawequal);
    vm.register_native("rawlen", lua_rawlen);
    vm.register_native("setmetatable", lua_setmetatable);
    vm.register_native("getmetatable", lua_getmetatable);
    vm.register_native("collectgarbage", lua_collectgarbage);
}

fn lua_print(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let mut out = String::new();
    for (i, v) in args.iter().enumerate() {
        if i > 0 {
            out.push('\t');
        }
        out.push_str(&vm.tostring_value(*v)?);
    }
    println!("{out}");
    Ok(Vec::new())
}

fn lua_type(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    if args.is_empty() {
        return Err(vm.rt_error("bad argument #1 to 'type' (value expected)"));
    }
    Ok(vec![vm.create_string(args[0].type_name())])
}

fn lua_tostring(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let s = vm.tostring_value(arg(&args, 0))?;
    Ok(vec![vm.create_string_owned(s)])
}

fn lua_tonumber(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let v = arg(&args, 0);
    if args.len() >= 2 && !args[1].is_nil() {
        let base = check_integer(vm, &args, 1, "tonumber")?;
        if !(2..=36).contains(&base) {
            return Err(vm.rt_error("bad argument #2 to 'tonumber' (base out of range)"));
        }
        let Value::String(id) = v else {
            return Err(bad_arg(vm, 0, "tonumber", "string", &v));
        };
        let text = vm.pool.str(id).trim().to_ascii_lowercase();
        let mut acc: i64 = 0;
        if text.is_empty() {
            return Ok(vec![Value::Nil]);
        }
        for c in text.chars() {
            match c.to_digit(base as u32) {
                Some(d) => acc = acc.wrapping_mul(base).wrapping_add(d as i64),
                None => return Ok(vec![Value::Nil]),
            }
        }
        return Ok(vec![Value::Integer(acc)]);
    }
    let result = match &v {
        Value::Integer(_) | Value::Float(_) => v,
        Value::String(id) => str_to_number(vm.pool.str(*id)).unwrap_or(Value::Nil),
        _ => Value::Nil,
    };
    Ok(vec![result])
}

fn ipairs_iter(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let t = arg(&args, 0);
    let i = arg(&args, 1).as_integer().unwrap_or(0) + 1;
    let v = vm.index_get(t, Value::Integer(i))?;
    if v.is_nil() {
        Ok(vec![Value::Nil])
    } else {
        Ok(vec![Value::Integer(i), v])
    }
}

fn lua_ipairs(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let t = arg(&args, 0);
    if t.is_nil() {
        return Err(bad_arg(vm, 0, "ipairs", "table", &t));
    }
    Ok(vec![Value::Native(ipairs_iter), t, Value::Integer(0)])
}

fn lua_pairs(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let t = arg(&args, 0);
    check_table(vm, &args, 0, "pairs")?;
    Ok(vec![Value::Native(lua_next), t, Value::Nil])
}

fn lua_next(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let id = check_table(vm, &args, 0, "next")?;
    let key = arg(&args, 1);
    match vm.pool.table(id).next(&key) {
        Ok(Some((k, v))) => Ok(vec![k, v]),
        Ok(None) => Ok(vec![Value::Nil]),
        Err(()) => Err(vm.rt_error("invalid key to 'next'")),
    }
}

fn lua_error(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let v = arg(&args, 0);
    let level = args
        .get(1)
        .and_then(|l| l.as_integer())
        .unwrap_or(1);
    // String errors at level > 0 get the caller's position prefixed.
    if level > 0 {
        if let Value::String(id) = v {
            let message = vm.pool.str(id).to_string();
            return Err(vm.rt_error(message));
        }
    }
    Err(vm.throw_value(v))
}

fn lua_assert(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let v = arg(&args, 0);
    if v.is_truthy() {
        return Ok(args);
    }
    match args.get(1) {
        Some(Value::String(id)) => {
            let message = vm.pool.str(*id).to_string();
            Err(vm.rt_error(message))
        }
        Some(other) => Err(vm.throw_value(*other)),
        None => Err(vm.rt_error("assertion failed!")),
    }
}

fn lua_pcall(vm: &mut Vm, mut args: Vec<Value>) -> Result<Vec<Value>, Control> {
    if args.is_empty() {
        return Err(vm.rt_error("bad argument #1 to 'pcall' (value expected)"));
    }
    let f = args.remove(0);
    let (ok, mut values) = vm.call_protected(f, args)?;
    let mut out = Vec::with_capacity(values.len() + 1);
    out.push(Value::Boolean(ok));
    out.append(&mut values);
    Ok(out)
}

fn lua_xpcall(vm: &mut Vm, mut args: Vec<Value>) -> Result<Vec<Value>, Control> {
    if args.len() < 2 {
        return Err(vm.rt_error("bad argument #2 to 'xpcall' (value expected)"));
    }
    let f = args.remove(0);
    let handler = args.remove(0);
    match vm.call_protected(f, args)? {
        (true, mut values) => {
            let mut out = vec![Value::Boolean(true)];
            out.append(&mut values);
            Ok(out)
        }
        (false, errs) => {
            // The message handler runs before control returns.
            let mut handled = vm.call(handler, errs)?;
            let mut out = vec![Value::Boolean(false)];
            out.append(&mut handled);
            Ok(out)
        }
    }
}

fn lua_select(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let n = arg(&args, 0);
    if let Value::String(id) = n {
        if vm.pool.str(id) == "#" {
            return Ok(vec![Value::Integer(args.len() as i64 - 1)]);
        }
    }
    let idx = check_integer(vm, &args, 0, "select")?;
    let rest = args.len() as i64 - 1;
    let start = if idx < 0 {
        let s = rest + idx;
        if s < 0 {
            return Err(vm.rt_error("bad argument #1 to 'select' (index out of range)"));
        }
        s
    } else if idx == 0 {
        return Err(vm.rt_error("bad argument #1 to 'select' (index out of range)"));
    } else {
        idx - 1
    };
    Ok(args.into_iter().skip(1 + start as usize).collect())
}

fn lua_rawget(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let id = check_table(vm, &args, 0, "rawget")?;
    Ok(vec![vm.pool.table(id).get(&arg(&args, 1))])
}

fn lua_rawset(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let id = check_table(vm, &args, 0, "rawset")?;
    vm.pool
        .table_mut(id)
        .set(arg(&args, 1), arg(&args, 2))
        .map_err(|e| vm.rt_error(e.message()))?;
    Ok(vec![arg(&args, 0)])
}

fn lua_rawequal(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let _ = vm;
    Ok(vec![Value::Boolean(arg(&args, 0).raw_equals(&arg(&args, 1)))])
}

fn lua_rawlen(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let v = arg(&args, 0);
    match v {
        Value::Table(id) => Ok(vec![Value::Integer(vm.pool.table(id).length())]),
        Value::String(id) => Ok(vec![Value::Integer(vm.pool.str(id).len() as i64)]),
        _ => Err(bad_arg(vm, 0, "rawlen", "table or string", &v)),
    }
}

fn lua_setmetatable(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let id = check_table(vm, &args, 0, "setmetatable")?;
    let mt = arg(&args, 1);
    // A protected metatable cannot be replaced.
    if let Some(current) = vm.pool.table(id).metatable {
        let protected_key = vm.create_string("__metatable");
        if !vm.pool.table(current).get(&protected_key).is_nil() {
            return Err(vm.rt_error("cannot change a protected metatable"));
        }
    }
    match mt {
        Value::Nil => vm.pool.table_mut(id).metatable = None,
        Value::Table(mid) => vm.pool.table_mut(id).metatable = Some(mid),
        _ => return Err(bad_arg(vm, 1, "setmetatable", "nil or table", &mt)),
    }
    Ok(vec![arg(&args, 0)])
}

fn lua_getmetatable(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let v = arg(&args, 0);
    match vm.metatable_of(&v) {
        None => Ok(vec![Value::Nil]),
        Some(mt) => {
            let protected_key = vm.create_string("__metatable");
            let guard = vm.pool.table(mt).get(&protected_key);
            if guard.is_nil() {
                Ok(vec![Value::Table(mt)])
            } else {
                Ok(vec![guard])
            }
        }
    }
}

fn lua_collectgarbage(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let opt = match arg(&args, 0) {
        Value::Nil => "collect".to_string(),
        Value::String(id) => vm.pool.str(id).to_string(),
        other => return Err(bad_arg(vm, 0, "collectgarbage", "string", &other)),
    };
    match opt.as_str() {
        "collect" => {
            vm.collect_garbage();
            Ok(vec![Value::Integer(0)])
        }
        "count" => Ok(vec![Value::Float(vm.gc_allocated_bytes() as f64 / 1024.0)]),
        "stop" => {
            vm.gc.enabled = false;
            Ok(vec![Value::Integer(0)])
        }
        "restart" => {
            vm.gc.enabled = true;
            Ok(vec![Value::Integer(0)])
        }
        other => Err(vm.rt_error(format!(
            "bad argument #1 to 'collectgarbage' (invalid option '{other}')"
        ))),
    }
}
