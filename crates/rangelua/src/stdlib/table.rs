// The table library subset.

use crate::stdlib::{arg, check_integer, check_string, check_table, register_lib};
use crate::value::Value;
use crate::vm::{Control, Vm};

pub fn open(vm: &mut Vm) {
    register_lib(
        vm,
        "table",
        &[
            ("insert", lua_insert),
            ("remove", lua_remove),
            ("concat", lua_concat),
            ("unpack", lua_unpack),
            ("pack", lua_pack),
        ],
    );
}

fn lua_insert(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let id = check_table(vm, &args, 0, "insert")?;
    let len = vm.pool.table(id).length();
    match args.len() {
        2 => {
            vm.pool.table_mut(id).set_int(len + 1, arg(&args, 1));
            Ok(Vec::new())
        }
        3 => {
            let pos = check_integer(vm, &args, 1, "insert")?;
            if pos < 1 || pos > len + 1 {
                return Err(vm.rt_error("bad argument #2 to 'insert' (position out of bounds)"));
            }
            // Shift the tail up.
            let mut i = len;
            while i >= pos {
                let v = vm.pool.table(id).get_int(i);
                vm.pool.table_mut(id).set_int(i + 1, v);
                i -= 1;
            }
            vm.pool.table_mut(id).set_int(pos, arg(&args, 2));
            Ok(Vec::new())
        }
        _ => Err(vm.rt_error("wrong number of arguments to 'insert'")),
    }
}

fn lua_remove(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let id = check_table(vm, &args, 0, "remove")?;
    let len = vm.pool.table(id).length();
    let pos = if args.len() > 1 {
        check_integer(vm, &args, 1, "remove")?
    } else {
        len
    };
    if len == 0 {
        return Ok(vec![Value::Nil]);
    }
    if pos < 1 || pos > len + 1 {
        return Err(vm.rt_error("bad argument #2 to 'remove' (position out of bounds)"));
    }
    let removed = vm.pool.table(id).get_int(pos);
    let mut i = pos;
    while i < len {
        let v = vm.pool.table(id).get_int(i + 1);
        vm.pool.table_mut(id).set_int(i, v);
        i += 1;
    }
    vm.pool.table_mut(id).set_int(len, Value::Nil);
    Ok(vec![removed])
}

fn lua_concat(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let id = check_table(vm, &args, 0, "concat")?;
    let sep = if args.len() > 1 && !arg(&args, 1).is_nil() {
        check_string(vm, &args, 1, "concat")?
    } else {
        String::new()
    };
    let first = if args.len() > 2 {
        check_integer(vm, &args, 2, "concat")?
    } else {
        1
    };
    let last = if args.len() > 3 {
        check_integer(vm, &args, 3, "concat")?
    } else {
        vm.pool.table(id).length()
    };
    let mut out = String::new();
    for i in first..=last {
        let v = vm.pool.table(id).get_int(i);
        match v {
            Value::String(sid) => out.push_str(vm.pool.str(sid)),
            Value::Integer(_) | Value::Float(_) => out.push_str(&vm.display_value(v)),
            _ => {
                return Err(vm.rt_error(format!(
                    "invalid value (at index {i}) in table for 'concat'"
                )));
            }
        }
        if i < last {
            out.push_str(&sep);
        }
    }
    Ok(vec![vm.create_string_owned(out)])
}

fn lua_unpack(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let id = check_table(vm, &args, 0, "unpack")?;
    let first = if args.len() > 1 && !arg(&args, 1).is_nil() {
        check_integer(vm, &args, 1, "unpack")?
    } else {
        1
    };
    let last = if args.len() > 2 && !arg(&args, 2).is_nil() {
        check_integer(vm, &args, 2, "unpack")?
    } else {
        vm.pool.table(id).length()
    };
    if last - first >= 1_000_000 {
        return Err(vm.rt_error("too many results to unpack"));
    }
    let mut out = Vec::new();
    for i in first..=last {
        out.push(vm.pool.table(id).get_int(i));
    }
    Ok(out)
}

fn lua_pack(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let n = args.len();
    let t = vm.pool.new_table(n, 1);
    for (i, v) in args.into_iter().enumerate() {
        vm.pool.table_mut(t).set_int(i as i64 + 1, v);
    }
    let key = vm.create_string("n");
    let _ = vm.pool.table_mut(t).set(key, Value::Integer(n as i64));
    Ok(vec![Value::Table(t)])
}
