// Code generator properties: validation of everything it emits, constant
// folding, register discipline, serialization round trips and the
// disassembler.

use crate::bytecode::{Instruction, OpCode, disasm, dump, validate};
use crate::stdlib;
use crate::test::run_int;
use crate::vm::Vm;

fn compile(source: &str) -> (Vm, std::rc::Rc<crate::Proto>) {
    let mut vm = Vm::new();
    stdlib::open_libs(&mut vm);
    let proto = vm.compile(source, "test").unwrap();
    (vm, proto)
}

#[test]
fn test_generated_code_validates() {
    let sources = [
        "return 1 + 2",
        "local t = { 1, 2, x = 3 } return t.x",
        "for i = 1, 10 do end for k, v in pairs({}) do end",
        "local function f(a, ...) return a, ... end return f(1, 2, 3)",
        "if a then return 1 elseif b then return 2 else return 3 end",
        "local a = 1 while a < 10 do a = a + 1 end return a",
        "return function() local up = 1 return function() return up end end",
        "local s = 'x' return s .. 'y' .. 1 .. 2.5",
        "goto done do end ::done:: return",
    ];
    for source in sources {
        let (_vm, proto) = compile(source);
        validate::validate_proto(&proto).unwrap();
    }
}

#[test]
fn test_constant_folding() {
    // Literal arithmetic folds to a single load.
    let (_vm, proto) = compile("return 2 + 3 * 4");
    let loads_fourteen = proto.code.iter().any(|&i| {
        Instruction::get_opcode(i) == OpCode::LoadI && Instruction::get_sbx(i) == 14
    });
    assert!(loads_fourteen, "expected folded LOADI 14");
    let has_arith = proto
        .code
        .iter()
        .any(|&i| matches!(Instruction::get_opcode(i), OpCode::Add | OpCode::Mul));
    assert!(!has_arith, "arithmetic was not folded");
}

#[test]
fn test_division_by_zero_not_folded() {
    let (_vm, proto) = compile("return 1 // 0");
    let has_idiv = proto
        .code
        .iter()
        .any(|&i| matches!(Instruction::get_opcode(i), OpCode::IDiv | OpCode::IDivK));
    assert!(has_idiv, "integer division by zero must defer to runtime");
}

#[test]
fn test_literal_string_concat_folds() {
    let (vm, proto) = compile("return 'a' .. 'b' .. 'c'");
    let folded = proto.constants.iter().any(|k| match k {
        crate::Value::String(id) => vm.pool.str(*id) == "abc",
        _ => false,
    });
    assert!(folded, "expected folded string constant");
}

#[test]
fn test_immediate_operand_selection() {
    let (_vm, proto) = compile("local a = 1 return a + 2");
    assert!(
        proto
            .code
            .iter()
            .any(|&i| Instruction::get_opcode(i) == OpCode::AddI),
        "small integer addend should use ADDI"
    );

    let (_vm, proto) = compile("local a = 1 return a + 10000");
    assert!(
        proto
            .code
            .iter()
            .any(|&i| Instruction::get_opcode(i) == OpCode::AddK),
        "large integer addend should use ADDK"
    );
}

#[test]
fn test_mmbin_follows_arithmetic() {
    let (_vm, proto) = compile("local a, b = {}, {} return a + b");
    let code = &proto.code;
    let add_at = code
        .iter()
        .position(|&i| Instruction::get_opcode(i) == OpCode::Add)
        .expect("no ADD emitted");
    assert_eq!(
        Instruction::get_opcode(code[add_at + 1]),
        OpCode::MmBin,
        "ADD must be followed by its MMBIN hook"
    );
}

#[test]
fn test_tail_call_emitted() {
    let (_vm, proto) = compile("local function f() end return f()");
    assert!(
        proto
            .code
            .iter()
            .any(|&i| Instruction::get_opcode(i) == OpCode::TailCall),
        "return f() should compile to TAILCALL"
    );
}

#[test]
fn test_self_for_method_calls() {
    let (_vm, proto) = compile("local t = {} return t:m(1)");
    assert!(
        proto
            .code
            .iter()
            .any(|&i| Instruction::get_opcode(i) == OpCode::Self_),
        "method call should use SELF"
    );
}

#[test]
fn test_main_chunk_shape() {
    let (_vm, proto) = compile("return 1");
    assert!(proto.is_vararg);
    assert_eq!(proto.upvalues.len(), 1);
    assert_eq!(proto.upvalues[0].name.as_str(), "_ENV");
    assert_eq!(
        Instruction::get_opcode(proto.code[0]),
        OpCode::VarargPrep
    );
}

#[test]
fn test_max_stack_covers_registers() {
    let (_vm, proto) = compile(
        "local a, b, c, d = 1, 2, 3, 4 return a + b + c + d",
    );
    assert!(proto.max_stack_size >= 5);
}

#[test]
fn test_chunk_serialization_roundtrip() {
    let source = r#"
        local function helper(x) return x * 2 end
        local t = { 'strings', 1, 2.5, true }
        return helper(21), t
    "#;
    let (mut vm, proto) = compile(source);
    let bytes = dump::dump_chunk(&proto, &vm.pool);
    assert!(dump::is_compiled_chunk(&bytes));
    let loaded = dump::load_chunk(&bytes, &mut vm.pool).unwrap();
    validate::validate_proto(&loaded).unwrap();
    // Equivalent prototype: same instructions, same shapes.
    assert_eq!(loaded.code, proto.code);
    assert_eq!(loaded.constants.len(), proto.constants.len());
    assert_eq!(loaded.protos.len(), proto.protos.len());
    assert_eq!(loaded.protos[0].code, proto.protos[0].code);
    // And it still runs.
    let proto = vm.adopt_proto(std::rc::Rc::new(loaded));
    let values = vm.execute(proto).unwrap();
    assert!(values[0].raw_equals(&crate::Value::Integer(42)));
}

#[test]
fn test_disassembler_output() {
    let (vm, proto) = compile("local x = 1 return x + 1");
    let listing = disasm::disassemble(&proto, &vm.pool);
    assert!(listing.contains("LOADI"));
    assert!(listing.contains("RETURN"));
    assert!(listing.contains("main"));
}

#[test]
fn test_jump_patch_boundaries() {
    // A long but in-range control structure compiles and runs.
    let mut source = String::from("local n = 0\nif x then\n");
    for _ in 0..500 {
        source.push_str("n = n + 1\n");
    }
    source.push_str("end\nreturn n");
    assert_eq!(run_int(&source), 0);
}

#[test]
fn test_line_info_parallel_to_code() {
    let (_vm, proto) = compile("local a = 1\nlocal b = 2\nreturn a + b");
    assert_eq!(proto.code.len(), proto.line_info.len());
    // Later instructions carry later lines.
    assert!(proto.line_info.last().copied().unwrap_or(0) >= 3);
}
