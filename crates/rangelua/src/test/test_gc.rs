// Garbage collection: reclamation, root coverage, cycles, and survival of
// reachable state across cycles.

use crate::stdlib;
use crate::test::run_int;
use crate::value::Value;
use crate::vm::Vm;

#[test]
fn test_garbage_is_reclaimed() {
    let mut vm = Vm::new();
    stdlib::open_libs(&mut vm);
    let baseline = {
        vm.collect_garbage();
        vm.gc_live_objects()
    };
    vm.execute_str(
        r#"
        for i = 1, 100 do
            local t = { i, i + 1, i + 2 }
        end
        "#,
        "gc-test",
    )
    .unwrap();
    vm.collect_garbage();
    let after = vm.gc_live_objects();
    assert!(
        after <= baseline + 10,
        "garbage survived: {baseline} -> {after}"
    );
}

#[test]
fn test_reachable_values_survive() {
    let mut vm = Vm::new();
    stdlib::open_libs(&mut vm);
    vm.execute_str("keep = { answer = 42 }", "gc-test").unwrap();
    vm.collect_garbage();
    vm.collect_garbage();
    let values = vm.execute_str("return keep.answer", "gc-test").unwrap();
    assert!(values[0].raw_equals(&Value::Integer(42)));
}

#[test]
fn test_cycles_are_collected() {
    let mut vm = Vm::new();
    stdlib::open_libs(&mut vm);
    vm.collect_garbage();
    let baseline = vm.gc_live_objects();
    vm.execute_str(
        r#"
        for i = 1, 50 do
            local a, b = {}, {}
            a.peer = b
            b.peer = a
            a.selfref = a
        end
        "#,
        "gc-test",
    )
    .unwrap();
    vm.collect_garbage();
    assert!(
        vm.gc_live_objects() <= baseline + 10,
        "cycle leaked: {baseline} -> {}",
        vm.gc_live_objects()
    );
}

#[test]
fn test_closed_upvalues_survive_collection() {
    let mut vm = Vm::new();
    stdlib::open_libs(&mut vm);
    vm.execute_str(
        r#"
        do
            local secret = "survives"
            getter = function() return secret end
        end
        "#,
        "gc-test",
    )
    .unwrap();
    vm.collect_garbage();
    let values = vm.execute_str("return getter()", "gc-test").unwrap();
    assert_eq!(vm.display_value(values[0]), "survives");
}

#[test]
fn test_metatables_survive_collection() {
    let mut vm = Vm::new();
    stdlib::open_libs(&mut vm);
    vm.execute_str(
        "obj = setmetatable({}, { __index = function() return 7 end })",
        "gc-test",
    )
    .unwrap();
    vm.collect_garbage();
    let values = vm.execute_str("return obj.anything", "gc-test").unwrap();
    assert!(values[0].raw_equals(&Value::Integer(7)));
}

#[test]
fn test_compiled_chunk_constants_survive() {
    let mut vm = Vm::new();
    stdlib::open_libs(&mut vm);
    // A compiled but not yet executed chunk keeps its string constants
    // alive through the prototype registry.
    let proto = vm.compile("return 'constant text'", "pending").unwrap();
    vm.collect_garbage();
    let values = vm.execute(proto).unwrap();
    assert_eq!(vm.display_value(values[0]), "constant text");
}

#[test]
fn test_collectgarbage_from_lua() {
    assert_eq!(
        run_int(
            r#"
            for i = 1, 20 do local _ = { i } end
            collectgarbage("collect")
            local kept = { 5 }
            collectgarbage("collect")
            return kept[1]
            "#
        ),
        5
    );
}

#[test]
fn test_automatic_collection_under_pressure() {
    let mut vm = Vm::new();
    stdlib::open_libs(&mut vm);
    // Enough allocation to cross the debt threshold several times.
    vm.execute_str(
        r#"
        local keep = {}
        for i = 1, 2000 do
            local t = { data = "padding padding padding " .. i }
            if i % 100 == 0 then keep[#keep + 1] = t end
        end
        result = #keep
        "#,
        "gc-test",
    )
    .unwrap();
    assert!(vm.gc.cycles > 0, "no automatic collection happened");
    let values = vm.execute_str("return result", "gc-test").unwrap();
    assert!(values[0].raw_equals(&Value::Integer(20)));
}

#[test]
fn test_suspended_coroutine_stack_is_rooted() {
    let mut vm = Vm::new();
    stdlib::open_libs(&mut vm);
    vm.execute_str(
        r#"
        co = coroutine.create(function()
            local held = "held by a parked stack"
            coroutine.yield()
            return held
        end)
        coroutine.resume(co)
        "#,
        "gc-test",
    )
    .unwrap();
    vm.collect_garbage();
    let values = vm
        .execute_str("local _, v = coroutine.resume(co) return v", "gc-test")
        .unwrap();
    assert_eq!(vm.display_value(values[0]), "held by a parked stack");
}
