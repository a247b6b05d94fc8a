// The math library subset the runtime carries.

use rand::Rng;

use crate::stdlib::{arg, check_integer, check_number, register_lib};
use crate::value::{Value, float_to_integer};
use crate::vm::{Control, Vm};

pub fn open(vm: &mut Vm) {
    let lib = register_lib(
        vm,
        "math",
        &[
            ("floor", lua_floor),
            ("ceil", lua_ceil),
            ("abs", lua_abs),
            ("sqrt", lua_sqrt),
            ("max", lua_max),
            ("min", lua_min),
            ("fmod", lua_fmod),
            ("tointeger", lua_tointeger),
            ("type", lua_type),
            ("random", lua_random),
            ("randomseed", lua_randomseed),
        ],
    );
    if let Some(id) = lib.as_table_id() {
        let entries = [
            ("pi", Value::Float(std::f64::consts::PI)),
            ("huge", Value::Float(f64::INFINITY)),
            ("maxinteger", Value::Integer(i64::MAX)),
            ("mininteger", Value::Integer(i64::MIN)),
        ];
        for (name, v) in entries {
            let key = vm.create_string(name);
            let _ = vm.pool.table_mut(id).set(key, v);
        }
    }
}

fn lua_floor(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    if let Value::Integer(i) = arg(&args, 0) {
        return Ok(vec![Value::Integer(i)]);
    }
    let n = check_number(vm, &args, 0, "floor")?.floor();
    Ok(vec![float_to_integer(n).map(Value::Integer).unwrap_or(Value::Float(n))])
}

fn lua_ceil(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    if let Value::Integer(i) = arg(&args, 0) {
        return Ok(vec![Value::Integer(i)]);
    }
    let n = check_number(vm, &args, 0, "ceil")?.ceil();
    Ok(vec![float_to_integer(n).map(Value::Integer).unwrap_or(Value::Float(n))])
}

fn lua_abs(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    match arg(&args, 0) {
        Value::Integer(i) => Ok(vec![Value::Integer(i.wrapping_abs())]),
        v => {
            let _ = v;
            let n = check_number(vm, &args, 0, "abs")?;
            Ok(vec![Value::Float(n.abs())])
        }
    }
}

fn lua_sqrt(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let n = check_number(vm, &args, 0, "sqrt")?;
    Ok(vec![Value::Float(n.sqrt())])
}

fn lua_max(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    minmax(vm, args, "max", true)
}

fn lua_min(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    minmax(vm, args, "min", false)
}

fn minmax(vm: &mut Vm, args: Vec<Value>, fname: &str, want_max: bool) -> Result<Vec<Value>, Control> {
    if args.is_empty() {
        return Err(vm.rt_error(format!("bad argument #1 to '{fname}' (value expected)")));
    }
    let mut best = args[0];
    for candidate in args.iter().skip(1).copied() {
        let replace = if want_max {
            vm.less_than(best, candidate)?
        } else {
            vm.less_than(candidate, best)?
        };
        if replace {
            best = candidate;
        }
    }
    Ok(vec![best])
}

fn lua_fmod(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let a = check_number(vm, &args, 0, "fmod")?;
    let b = check_number(vm, &args, 1, "fmod")?;
    Ok(vec![Value::Float(a % b)])
}

fn lua_tointeger(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let _ = vm;
    Ok(vec![arg(&args, 0)
        .as_integer()
        .map(Value::Integer)
        .unwrap_or(Value::Nil)])
}

fn lua_type(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let v = match arg(&args, 0) {
        Value::Integer(_) => vm.create_string("integer"),
        Value::Float(_) => vm.create_string("float"),
        _ => Value::Nil,
    };
    Ok(vec![v])
}

fn lua_random(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    match args.len() {
        0 => Ok(vec![Value::Float(vm.rng.r#gen::<f64>())]),
        1 => {
            let m = check_integer(vm, &args, 0, "random")?;
            if m < 1 {
                return Err(vm.rt_error("bad argument #1 to 'random' (interval is empty)"));
            }
            Ok(vec![Value::Integer(vm.rng.gen_range(1..=m))])
        }
        _ => {
            let m = check_integer(vm, &args, 0, "random")?;
            let n = check_integer(vm, &args, 1, "random")?;
            if m > n {
                return Err(vm.rt_error("bad argument #2 to 'random' (interval is empty)"));
            }
            Ok(vec![Value::Integer(vm.rng.gen_range(m..=n))])
        }
    }
}

fn lua_randomseed(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let seed = arg(&args, 0).as_integer().unwrap_or(0);
    vm.rng = rand::SeedableRng::seed_from_u64(seed as u64);
    Ok(Vec::new())
}
