// Human-readable bytecode listing, used by the `dump` CLI subcommand and by
// the round-trip tests.

use crate::bytecode::{Instruction, OpCode, OpMode, Proto};
use crate::gc::ObjectPool;
use crate::value::Value;

/// Render a prototype tree as a listing in the style of `luac -l`.
pub fn disassemble(proto: &Proto, pool: &ObjectPool) -> String {
    let mut out = String::new();
    disasm_proto(proto, pool, &mut out, 0);
    out
}

fn disasm_proto(proto: &Proto, pool: &ObjectPool, out: &mut String, depth: usize) {
    use std::fmt::Write;

    let kind = if depth == 0 { "main" } else { "function" };
    let _ = writeln!(
        out,
        "{} <{}:{}> ({} instructions, {} constants, {} upvalues, {} registers{})",
        kind,
        proto.source,
        proto.line_defined,
        proto.code.len(),
        proto.constants.len(),
        proto.upvalues.len(),
        proto.max_stack_size,
        if proto.is_vararg { ", vararg" } else { "" },
    );

    for (pc, &i) in proto.code.iter().enumerate() {
        let op = Instruction::get_opcode(i);
        let line = proto.line_at(pc);
        let fields = match op.mode() {
            OpMode::IABC => format!(
                "{} {} {}{}",
                Instruction::get_a(i),
                Instruction::get_b(i),
                Instruction::get_c(i),
                if Instruction::get_k(i) { " k" } else { "" }
            ),
            OpMode::IABx => format!("{} {}", Instruction::get_a(i), Instruction::get_bx(i)),
            OpMode::IAsBx => format!("{} {}", Instruction::get_a(i), Instruction::get_sbx(i)),
            OpMode::IAx => format!("{}", Instruction::get_ax(i)),
            OpMode::IsJ => format!("{}", Instruction::get_sj(i)),
        };
        let note = annotate(proto, pool, pc, i, op);
        let _ = writeln!(
            out,
            "\t{}\t[{}]\t{:<12}\t{}{}",
            pc + 1,
            line,
            op.name(),
            fields,
            note
        );
    }

    for child in &proto.protos {
        out.push('\n');
        disasm_proto(child, pool, out, depth + 1);
    }
}

fn annotate(proto: &Proto, pool: &ObjectPool, pc: usize, i: u32, op: OpCode) -> String {
    match op {
        OpCode::LoadK => constant_note(proto, pool, Instruction::get_bx(i)),
        OpCode::GetTabUp | OpCode::GetField | OpCode::Self_ => {
            constant_note(proto, pool, Instruction::get_c(i))
        }
        OpCode::SetTabUp | OpCode::SetField | OpCode::EqK => {
            constant_note(proto, pool, Instruction::get_b(i))
        }
        OpCode::AddK
        | OpCode::SubK
        | OpCode::MulK
        | OpCode::ModK
        | OpCode::PowK
        | OpCode::DivK
        | OpCode::IDivK
        | OpCode::BAndK
        | OpCode::BOrK
        | OpCode::BXorK => constant_note(proto, pool, Instruction::get_c(i)),
        OpCode::Jmp => format!("\t; to {}", pc as i64 + 2 + Instruction::get_sj(i) as i64),
        OpCode::ForPrep | OpCode::TForPrep => {
            format!("\t; to {}", pc as i64 + 2 + Instruction::get_bx(i) as i64)
        }
        OpCode::ForLoop | OpCode::TForLoop => {
            format!("\t; to {}", pc as i64 + 2 - Instruction::get_bx(i) as i64)
        }
        _ => String::new(),
    }
}

fn constant_note(proto: &Proto, pool: &ObjectPool, idx: u32) -> String {
    match proto.constants.get(idx as usize) {
        Some(k) => format!("\t; {}", display_constant(k, pool)),
        None => String::new(),
    }
}

pub fn display_constant(k: &Value, pool: &ObjectPool) -> String {
    match k {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Integer(i) => i.to_string(),
        Value::Float(n) => format!("{n:?}"),
        Value::String(id) => format!("{:?}", pool.str(*id)),
        _ => "<object>".to_string(),
    }
}
