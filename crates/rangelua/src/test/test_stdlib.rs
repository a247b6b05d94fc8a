// Standard library behavior exercised through the VM.

use crate::test::{run, run_bool, run_int, run_str};
use crate::value::Value;

#[test]
fn test_type() {
    assert_eq!(run_str("return type(nil)"), "nil");
    assert_eq!(run_str("return type(true)"), "boolean");
    assert_eq!(run_str("return type(1)"), "number");
    assert_eq!(run_str("return type('s')"), "string");
    assert_eq!(run_str("return type({})"), "table");
    assert_eq!(run_str("return type(print)"), "function");
    assert_eq!(run_str("return type(coroutine.create(print))"), "thread");
}

#[test]
fn test_tostring_tonumber() {
    assert_eq!(run_str("return tostring(nil)"), "nil");
    assert_eq!(run_str("return tostring(true)"), "true");
    assert_eq!(run_str("return tostring(-17)"), "-17");
    assert!(run_bool("return tonumber('0x10') == 16"));
    assert!(run_bool("return tonumber('ff', 16) == 255"));
    assert!(run_bool("return tonumber('z') == nil"));
    assert!(run_bool("return tonumber('10', 2) == 2"));
}

#[test]
fn test_select() {
    assert_eq!(run_int("return select('#', 'a', 'b', 'c')"), 3);
    assert_eq!(run_int("return select(2, 10, 20, 30)"), 20);
    assert_eq!(run_int("return (select(-1, 10, 20, 30))"), 30);
}

#[test]
fn test_assert_passes_values() {
    let values = run("return assert(1, 'msg', 3)");
    assert!(values[0].raw_equals(&Value::Integer(1)));
    assert_eq!(values.len(), 3);
}

#[test]
fn test_rawget_rawset_bypass_metamethods() {
    let source = r#"
        local t = setmetatable({}, {
            __index = function() return "shadow" end,
            __newindex = function() error("blocked") end,
        })
        rawset(t, "k", "direct")
        return rawget(t, "k"), rawget(t, "missing"), t.missing
    "#;
    let mut vm = crate::Vm::new();
    crate::stdlib::open_libs(&mut vm);
    let values = crate::execute_with_vm(&mut vm, source).unwrap();
    assert_eq!(vm.display_value(values[0]), "direct");
    assert!(values[1].is_nil());
    assert_eq!(vm.display_value(values[2]), "shadow");
}

#[test]
fn test_rawequal_rawlen() {
    assert!(run_bool("local t = {} return rawequal(t, t)"));
    assert!(!run_bool(
        "local a = setmetatable({}, {__eq = function() return true end})
         local b = setmetatable({}, getmetatable(a))
         return rawequal(a, b)"
    ));
    assert_eq!(run_int("return rawlen({1, 2, 3})"), 3);
    assert_eq!(run_int("return rawlen('four')"), 4);
}

#[test]
fn test_math_library() {
    assert_eq!(run_int("return math.floor(3.7)"), 3);
    assert_eq!(run_int("return math.ceil(3.2)"), 4);
    assert_eq!(run_int("return math.abs(-9)"), 9);
    assert_eq!(run_int("return math.max(3, 9, 5)"), 9);
    assert_eq!(run_int("return math.min(3, 9, 5)"), 3);
    assert!(run_bool("return math.sqrt(16) == 4.0"));
    assert_eq!(run_str("return math.type(1)"), "integer");
    assert_eq!(run_str("return math.type(1.0)"), "float");
    assert!(run_bool("return math.type('x') == nil"));
    assert!(run_bool("return math.tointeger(3.0) == 3"));
    assert!(run_bool("return math.tointeger(3.5) == nil"));
    assert!(run_bool("return math.pi > 3.14 and math.pi < 3.15"));
}

#[test]
fn test_math_random_ranges() {
    assert!(run_bool(
        r#"
        math.randomseed(7)
        for i = 1, 50 do
            local r = math.random(10)
            if r < 1 or r > 10 then return false end
            local f = math.random()
            if f < 0.0 or f >= 1.0 then return false end
        end
        return true
        "#
    ));
}

#[test]
fn test_string_library() {
    assert_eq!(run_int("return string.len('hello')"), 5);
    assert_eq!(run_str("return string.sub('hello', 2, 4)"), "ell");
    assert_eq!(run_str("return string.sub('hello', -3)"), "llo");
    assert_eq!(run_str("return string.upper('mixed')"), "MIXED");
    assert_eq!(run_str("return string.lower('MiXeD')"), "mixed");
    assert_eq!(run_str("return string.rep('ab', 3)"), "ababab");
    assert_eq!(run_str("return string.rep('a', 3, '-')"), "a-a-a");
    assert_eq!(run_str("return string.reverse('abc')"), "cba");
    assert_eq!(run_int("return string.byte('A')"), 65);
    assert_eq!(run_str("return string.char(104, 105)"), "hi");
}

#[test]
fn test_string_methods_via_metatable() {
    assert_eq!(run_str("return ('abc'):upper()"), "ABC");
    assert_eq!(run_int("local s = 'hello' return s:len()"), 5);
}

#[test]
fn test_string_format() {
    assert_eq!(run_str("return string.format('%d/%d', 3, 4)"), "3/4");
    assert_eq!(run_str("return string.format('%s!', 'hey')"), "hey!");
    assert_eq!(run_str("return string.format('%x', 255)"), "ff");
    assert_eq!(run_str("return string.format('%5d', 42)"), "   42");
    assert_eq!(run_str("return string.format('%-5d|', 42)"), "42   |");
    assert_eq!(run_str("return string.format('%05d', 42)"), "00042");
    assert_eq!(run_str("return string.format('%.2f', 1.5)"), "1.50");
    assert_eq!(run_str("return string.format('%%')"), "%");
    assert_eq!(run_str("return string.format('%q', 'a\"b')"), r#""a\"b""#);
}

#[test]
fn test_table_library() {
    assert_eq!(
        run_int("local t = {1, 2} table.insert(t, 3) return #t * 10 + t[3]"),
        33
    );
    assert_eq!(
        run_int("local t = {1, 3} table.insert(t, 2, 2) return t[2]"),
        2
    );
    assert_eq!(
        run_int("local t = {1, 2, 3} local v = table.remove(t) return v * 10 + #t"),
        32
    );
    assert_eq!(
        run_int("local t = {9, 1, 2} table.remove(t, 1) return t[1]"),
        1
    );
    assert_eq!(run_str("return table.concat({'a', 'b', 'c'}, '-')"), "a-b-c");
    assert_eq!(run_int("return select('#', table.unpack({1, 2, 3}))"), 3);
    assert_eq!(
        run_int("local a, b = table.unpack({10, 20}) return a + b"),
        30
    );
    assert_eq!(run_int("local p = table.pack(4, 5, 6) return p.n + p[1]"), 7);
}
