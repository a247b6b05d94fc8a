// Control flow: conditionals, loops, break, goto, repeat.

use crate::test::{run_int, run_str};

#[test]
fn test_if_elseif_else() {
    let source = r#"
        local function classify(n)
            if n < 0 then return "neg"
            elseif n == 0 then return "zero"
            else return "pos" end
        end
        return classify(-5) .. classify(0) .. classify(5)
    "#;
    assert_eq!(run_str(source), "negzeropos");
}

#[test]
fn test_while_loop() {
    let source = r#"
        local n, steps = 27, 0
        while n ~= 1 do
            if n % 2 == 0 then n = n // 2 else n = 3 * n + 1 end
            steps = steps + 1
        end
        return steps
    "#;
    assert_eq!(run_int(source), 111);
}

#[test]
fn test_while_break() {
    let source = r#"
        local i = 0
        while true do
            i = i + 1
            if i >= 5 then break end
        end
        return i
    "#;
    assert_eq!(run_int(source), 5);
}

#[test]
fn test_repeat_until() {
    let source = r#"
        local i = 0
        repeat i = i + 1 until i >= 3
        return i
    "#;
    assert_eq!(run_int(source), 3);
}

#[test]
fn test_repeat_sees_body_locals() {
    let source = r#"
        local count = 0
        repeat
            local done = count >= 2
            count = count + 1
        until done
        return count
    "#;
    assert_eq!(run_int(source), 3);
}

#[test]
fn test_numeric_for_variants() {
    assert_eq!(run_int("local s = 0 for i = 1, 5 do s = s + i end return s"), 15);
    assert_eq!(run_int("local s = 0 for i = 10, 1, -2 do s = s + i end return s"), 30);
    // Empty range: body never runs.
    assert_eq!(run_int("local s = 0 for i = 5, 1 do s = s + 1 end return s"), 0);
    // Float control values.
    assert_eq!(
        run_int("local n = 0 for x = 0.5, 2.5, 0.5 do n = n + 1 end return n"),
        5
    );
}

#[test]
fn test_numeric_for_loop_var_is_local_copy() {
    let source = r#"
        local last = 0
        for i = 1, 3 do
            i = i * 10 -- does not affect iteration
            last = i
        end
        return last
    "#;
    assert_eq!(run_int(source), 30);
}

#[test]
fn test_generic_for_pairs() {
    let source = r#"
        local t = { 10, 20, 30, extra = 40 }
        local sum = 0
        for _, v in pairs(t) do sum = sum + v end
        return sum
    "#;
    assert_eq!(run_int(source), 100);
}

#[test]
fn test_generic_for_ipairs_stops_at_hole() {
    let source = r#"
        local t = { 1, 2, 3 }
        t[5] = 5
        local sum = 0
        for _, v in ipairs(t) do sum = sum + v end
        return sum
    "#;
    assert_eq!(run_int(source), 6);
}

#[test]
fn test_generic_for_break() {
    let source = r#"
        local sum = 0
        for i, v in ipairs({ 5, 6, 7, 8 }) do
            if i == 3 then break end
            sum = sum + v
        end
        return sum
    "#;
    assert_eq!(run_int(source), 11);
}

#[test]
fn test_nested_loops_break_inner() {
    let source = r#"
        local hits = 0
        for i = 1, 3 do
            for j = 1, 10 do
                if j > i then break end
                hits = hits + 1
            end
        end
        return hits
    "#;
    assert_eq!(run_int(source), 6);
}

#[test]
fn test_goto_forward() {
    let source = r#"
        local sum = 0
        for i = 1, 10 do
            if i % 2 == 0 then goto continue end
            sum = sum + i
            ::continue::
        end
        return sum
    "#;
    assert_eq!(run_int(source), 25);
}

#[test]
fn test_goto_backward() {
    let source = r#"
        local i = 0
        ::again::
        i = i + 1
        if i < 4 then goto again end
        return i
    "#;
    assert_eq!(run_int(source), 4);
}

#[test]
fn test_do_block_scoping() {
    let source = r#"
        local x = 1
        do
            local x = 2
        end
        return x
    "#;
    assert_eq!(run_int(source), 1);
}

#[test]
fn test_method_calls() {
    let source = r#"
        local account = { balance = 100 }
        function account:deposit(n) self.balance = self.balance + n end
        function account:get() return self.balance end
        account:deposit(23)
        return account:get()
    "#;
    assert_eq!(run_int(source), 123);
}

#[test]
fn test_vararg_functions() {
    let source = r#"
        local function count(...) return select('#', ...) end
        return count(1, nil, 3)
    "#;
    assert_eq!(run_int(source), 3);

    let source = r#"
        local function sum(...)
            local s = 0
            for _, v in ipairs({...}) do s = s + v end
            return s
        end
        return sum(1, 2, 3, 4)
    "#;
    assert_eq!(run_int(source), 10);

    let source = r#"
        local function passthrough(...) return ... end
        local a, b, c = passthrough(7, 8, 9)
        return a + b + c
    "#;
    assert_eq!(run_int(source), 24);
}

#[test]
fn test_tail_call_does_not_grow_stack() {
    let source = r#"
        local function loop(n)
            if n == 0 then return "done" end
            return loop(n - 1)
        end
        return loop(100000)
    "#;
    assert_eq!(run_str(source), "done");
}
