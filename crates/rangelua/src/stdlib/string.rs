// The string library subset, plus the shared string metatable that makes
// `("x"):upper()` work.

use crate::stdlib::{arg, check_integer, check_string, register_lib};
use crate::value::Value;
use crate::vm::execute::arith::float_to_lua_string;
use crate::vm::{Control, Vm};

pub fn open(vm: &mut Vm) {
    let lib = register_lib(
        vm,
        "string",
        &[
            ("len", lua_len),
            ("sub", lua_sub),
            ("upper", lua_upper),
            ("lower", lua_lower),
            ("rep", lua_rep),
            ("reverse", lua_reverse),
            ("byte", lua_byte),
            ("char", lua_char),
            ("format", lua_format),
        ],
    );
    // All strings share one metatable with __index = string.
    let mt = vm.pool.new_table(0, 1);
    let key = vm.create_string("__index");
    let _ = vm.pool.table_mut(mt).set(key, lib);
    vm.string_mt = Some(mt);
}

fn lua_len(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let s = check_string(vm, &args, 0, "len")?;
    Ok(vec![Value::Integer(s.len() as i64)])
}

/// Resolve a 1-based, possibly negative string position.
fn str_pos(len: i64, pos: i64, default: i64) -> i64 {
    let p = if pos == 0 { default } else { pos };
    if p >= 0 { p } else { (len + p + 1).max(0) }
}

fn lua_sub(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let s = check_string(vm, &args, 0, "sub")?;
    let len = s.len() as i64;
    let i = args
        .get(1)
        .and_then(|v| v.as_integer())
        .unwrap_or(1);
    let j = args
        .get(2)
        .and_then(|v| v.as_integer())
        .unwrap_or(-1);
    let start = str_pos(len, i, 1).max(1);
    let end = str_pos(len, j, -1).min(len);
    let out = if start > end {
        String::new()
    } else {
        s.as_bytes()[(start - 1) as usize..end as usize]
            .iter()
            .map(|&b| b as char)
            .collect()
    };
    Ok(vec![vm.create_string_owned(out)])
}

fn lua_upper(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let s = check_string(vm, &args, 0, "upper")?;
    Ok(vec![vm.create_string_owned(s.to_uppercase())])
}

fn lua_lower(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let s = check_string(vm, &args, 0, "lower")?;
    Ok(vec![vm.create_string_owned(s.to_lowercase())])
}

fn lua_rep(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let s = check_string(vm, &args, 0, "rep")?;
    let n = check_integer(vm, &args, 1, "rep")?;
    let sep = if args.len() > 2 {
        check_string(vm, &args, 2, "rep")?
    } else {
        String::new()
    };
    if n <= 0 {
        let empty = vm.create_string("");
        return Ok(vec![empty]);
    }
    let mut out = String::with_capacity(s.len() * n as usize);
    for i in 0..n {
        if i > 0 {
            out.push_str(&sep);
        }
        out.push_str(&s);
    }
    Ok(vec![vm.create_string_owned(out)])
}

fn lua_reverse(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let s = check_string(vm, &args, 0, "reverse")?;
    let out: String = s.chars().rev().collect();
    Ok(vec![vm.create_string_owned(out)])
}

fn lua_byte(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let s = check_string(vm, &args, 0, "byte")?;
    let len = s.len() as i64;
    let i = args.get(1).and_then(|v| v.as_integer()).unwrap_or(1);
    let j = args.get(2).and_then(|v| v.as_integer()).unwrap_or(i);
    let start = str_pos(len, i, 1).max(1);
    let end = str_pos(len, j, -1).min(len);
    let mut out = Vec::new();
    for idx in start..=end {
        if idx >= 1 && idx <= len {
            out.push(Value::Integer(s.as_bytes()[(idx - 1) as usize] as i64));
        }
    }
    Ok(out)
}

fn lua_char(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let mut out = String::with_capacity(args.len());
    for i in 0..args.len() {
        let c = check_integer(vm, &args, i, "char")?;
        if !(0..=255).contains(&c) {
            return Err(vm.rt_error(format!(
                "bad argument #{} to 'char' (value out of range)",
                i + 1
            )));
        }
        out.push(c as u8 as char);
    }
    Ok(vec![vm.create_string_owned(out)])
}

fn lua_format(vm: &mut Vm, args: Vec<Value>) -> Result<Vec<Value>, Control> {
    let fmt = check_string(vm, &args, 0, "format")?;
    let mut out = String::with_capacity(fmt.len());
    let mut next_arg = 1usize;
    let mut chars = fmt.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        // flags / width / precision
        let mut spec = String::from("%");
        while let Some(&f) = chars.peek() {
            if matches!(f, '-' | '+' | ' ' | '#' | '0') {
                spec.push(f);
                chars.next();
            } else {
                break;
            }
        }
        while let Some(&d) = chars.peek() {
            if d.is_ascii_digit() {
                spec.push(d);
                chars.next();
            } else {
                break;
            }
        }
        let mut precision: Option<usize> = None;
        if chars.peek() == Some(&'.') {
            chars.next();
            let mut p = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_ascii_digit() {
                    p.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            precision = Some(p.parse().unwrap_or(0));
        }
        let Some(conv) = chars.next() else {
            return Err(vm.rt_error("invalid conversion to 'format'"));
        };
        if conv == '%' {
            out.push('%');
            continue;
        }
        let v = arg(&args, next_arg);
        let rendered = match conv {
            'd' | 'i' => {
                let n = check_integer(vm, &args, next_arg, "format")?;
                n.to_string()
            }
            'u' => {
                let n = check_integer(vm, &args, next_arg, "format")?;
                (n as u64).to_string()
            }
            'x' => {
                let n = check_integer(vm, &args, next_arg, "format")?;
                format!("{:x}", n as u64)
            }
            'X' => {
                let n = check_integer(vm, &args, next_arg, "format")?;
                format!("{:X}", n as u64)
            }
            'o' => {
                let n = check_integer(vm, &args, next_arg, "format")?;
                format!("{:o}", n as u64)
            }
            'c' => {
                let n = check_integer(vm, &args, next_arg, "format")?;
                ((n as u8) as char).to_string()
            }
            'f' | 'F' => {
                let n = crate::stdlib::check_number(vm, &args, next_arg, "format")?;
                format!("{:.*}", precision.unwrap_or(6), n)
            }
            'e' | 'E' => {
                let n = crate::stdlib::check_number(vm, &args, next_arg, "format")?;
                format!("{:.*e}", precision.unwrap_or(6), n)
            }
            'g' | 'G' => {
                let n = crate::stdlib::check_number(vm, &args, next_arg, "format")?;
                float_to_lua_string(n)
            }
            's' => {
                let s = vm.tostring_value(v)?;
                match precision {
                    Some(p) if p < s.len() => s[..p].to_string(),
                    _ => s,
                }
            }
            'q' => {
                let s = vm.tostring_value(v)?;
                let mut quoted = String::with_capacity(s.len() + 2);
                quoted.push('"');
                for ch in s.chars() {
                    match ch {
                        '"' => quoted.push_str("\\\""),
                        '\\' => quoted.push_str("\\\\"),
                        '\n' => quoted.push_str("\\n"),
                        '\r' => quoted.push_str("\\r"),
                        '\0' => quoted.push_str("\\0"),
                        c => quoted.push(c),
                    }
                }
                quoted.push('"');
                quoted
            }
            other => {
                return Err(vm.rt_error(format!(
                    "invalid conversion '%{other}' to 'format'"
                )));
            }
        };
        next_arg += 1;
        out.push_str(&pad(&spec, rendered));
    }
    Ok(vec![vm.create_string_owned(out)])
}

/// Apply the width/zero/left-align part of a format spec.
fn pad(spec: &str, s: String) -> String {
    let left = spec.contains('-');
    let zero = spec.contains('0') && !left;
    let width: usize = spec
        .chars()
        .skip(1)
        .skip_while(|c| matches!(c, '-' | '+' | ' ' | '#' | '0'))
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse()
        .unwrap_or(0);
    if s.len() >= width {
        return s;
    }
    let fill = width - s.len();
    if left {
        format!("{}{}", s, " ".repeat(fill))
    } else if zero {
        format!("{}{}", "0".repeat(fill), s)
    } else {
        format!("{}{}", " ".repeat(fill), s)
    }
}
