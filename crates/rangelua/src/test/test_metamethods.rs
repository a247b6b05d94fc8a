// Metamethod dispatch: arithmetic, comparison, index chains, call, length,
// concat and to-be-closed.

use crate::test::{run_bool, run_int, run_str};

#[test]
fn test_arith_metamethods() {
    let source = r#"
        local mt = {
            __add = function(a, b) return a.v + b.v end,
            __sub = function(a, b) return a.v - b.v end,
            __mul = function(a, b) return a.v * b.v end,
        }
        local function box(v) return setmetatable({ v = v }, mt) end
        local a, b = box(10), box(4)
        return (a + b) * 100 + (a - b) * 10 + (box(2) * box(3))
    "#;
    assert_eq!(run_int(source), 1466);
}

#[test]
fn test_arith_metamethod_operand_order_with_immediate() {
    // AddI flips operands; the metamethod must still see them in source
    // order.
    let source = r#"
        local mt = { __add = function(a, b)
            if type(a) == "number" then return "num-first" end
            return "obj-first"
        end }
        local t = setmetatable({}, mt)
        local r1 = t + 1
        local r2 = 1 + t
        return r1 .. "/" .. r2
    "#;
    assert_eq!(run_str(source), "obj-first/num-first");
}

#[test]
fn test_index_table_chain() {
    let source = r#"
        local base = { greet = "hi" }
        local mid = setmetatable({}, { __index = base })
        local leaf = setmetatable({}, { __index = mid })
        return leaf.greet
    "#;
    assert_eq!(run_str(source), "hi");
}

#[test]
fn test_newindex_function() {
    let source = r#"
        local log = {}
        local t = setmetatable({}, {
            __newindex = function(t, k, v) rawset(t, k, v * 2) end,
        })
        t.x = 21
        return t.x
    "#;
    assert_eq!(run_int(source), 42);
}

#[test]
fn test_newindex_skipped_for_existing_key() {
    let source = r#"
        local t = setmetatable({ x = 1 }, {
            __newindex = function() error("should not fire") end,
        })
        t.x = 2
        return t.x
    "#;
    assert_eq!(run_int(source), 2);
}

#[test]
fn test_eq_metamethod() {
    let source = r#"
        local mt = { __eq = function(a, b) return a.id == b.id end }
        local a = setmetatable({ id = 1 }, mt)
        local b = setmetatable({ id = 1 }, mt)
        local c = setmetatable({ id = 2 }, mt)
        return a == b and a ~= c
    "#;
    assert!(run_bool(source));
}

#[test]
fn test_eq_not_consulted_for_different_types() {
    let source = r#"
        local a = setmetatable({}, { __eq = function() return true end })
        return a == 5
    "#;
    assert!(!run_bool(source));
}

#[test]
fn test_lt_le_metamethods() {
    let source = r#"
        local mt = {
            __lt = function(a, b) return a.v < b.v end,
            __le = function(a, b) return a.v <= b.v end,
        }
        local function box(v) return setmetatable({ v = v }, mt) end
        return box(1) < box(2) and box(2) <= box(2) and not (box(3) < box(2))
    "#;
    assert!(run_bool(source));
}

#[test]
fn test_call_metamethod() {
    let source = r#"
        local callable = setmetatable({ factor = 3 }, {
            __call = function(self, n) return self.factor * n end,
        })
        return callable(14)
    "#;
    assert_eq!(run_int(source), 42);
}

#[test]
fn test_len_metamethod() {
    let source = r#"
        local t = setmetatable({}, { __len = function() return 99 end })
        return #t
    "#;
    assert_eq!(run_int(source), 99);
}

#[test]
fn test_concat_metamethod() {
    let source = r#"
        local mt = { __concat = function(a, b)
            local av = type(a) == "table" and a.v or a
            local bv = type(b) == "table" and b.v or b
            return av .. bv
        end }
        local t = setmetatable({ v = "mid" }, mt)
        return "pre-" .. t .. "-post"
    "#;
    assert_eq!(run_str(source), "pre-mid-post");
}

#[test]
fn test_unm_metamethod() {
    let source = r#"
        local t = setmetatable({ v = 5 }, { __unm = function(x) return -x.v end })
        return -t
    "#;
    assert_eq!(run_int(source), -5);
}

#[test]
fn test_tostring_metamethod() {
    let source = r#"
        local t = setmetatable({}, { __tostring = function() return "custom" end })
        return tostring(t)
    "#;
    assert_eq!(run_str(source), "custom");
}

#[test]
fn test_to_be_closed_variable() {
    let source = r#"
        local closed = false
        do
            local guard <close> = setmetatable({}, {
                __close = function() closed = true end,
            })
        end
        return closed
    "#;
    assert!(run_bool(source));
}

#[test]
fn test_tbc_closes_on_error_in_reverse_order() {
    let source = r#"
        local order = ""
        local function guard(name)
            return setmetatable({}, { __close = function() order = order .. name end })
        end
        pcall(function()
            local a <close> = guard("a")
            local b <close> = guard("b")
            error("unwind")
        end)
        return order
    "#;
    assert_eq!(run_str(source), "ba");
}

#[test]
fn test_protected_metatable() {
    let source = r#"
        local t = setmetatable({}, { __metatable = "locked" })
        local ok = pcall(setmetatable, t, {})
        return not ok and getmetatable(t) == "locked"
    "#;
    assert!(run_bool(source));
}
