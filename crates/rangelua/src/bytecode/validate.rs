// Prototype validation: every index an instruction can carry is checked once
// here, so dispatch may assume it is in range.

use crate::bytecode::{Instruction, OpCode, OPCODE_COUNT, Proto};

/// Validate a prototype tree. Checked properties:
/// - every opcode byte is in range,
/// - constant-pool, upvalue and nested-prototype indices exist,
/// - every jump lands inside the instruction vector,
/// - string-keyed table opcodes reference string constants,
/// - instructions that demand a following EXTRAARG/JMP have one.
pub fn validate_proto(proto: &Proto) -> Result<(), String> {
    let nk = proto.constants.len() as u32;
    let nup = proto.upvalues.len() as u32;
    let ncode = proto.code.len();

    if ncode == 0 {
        return Err(format!("{}: empty instruction vector", proto.source));
    }

    for (pc, &i) in proto.code.iter().enumerate() {
        let raw = Instruction::raw_opcode(i);
        if raw >= OPCODE_COUNT {
            return Err(format!("{}: pc {}: bad opcode {}", proto.source, pc, raw));
        }
        let op = Instruction::get_opcode(i);
        let fail = |what: &str| -> Result<(), String> {
            Err(format!(
                "{}: pc {}: {} in {}",
                proto.source,
                pc,
                what,
                op.name()
            ))
        };

        match op {
            OpCode::LoadK => {
                if Instruction::get_bx(i) >= nk {
                    return fail("constant index out of range");
                }
            }
            OpCode::LoadKX => {
                let Some(&next) = proto.code.get(pc + 1) else {
                    return fail("missing EXTRAARG");
                };
                if Instruction::get_opcode(next) != OpCode::ExtraArg {
                    return fail("missing EXTRAARG");
                }
                if Instruction::get_ax(next) >= nk {
                    return fail("constant index out of range");
                }
            }
            OpCode::GetUpval | OpCode::SetUpval => {
                if Instruction::get_b(i) >= nup {
                    return fail("upvalue index out of range");
                }
            }
            OpCode::GetTabUp => {
                if Instruction::get_b(i) >= nup {
                    return fail("upvalue index out of range");
                }
                if !constant_is_string(proto, Instruction::get_c(i)) {
                    return fail("key is not a string constant");
                }
            }
            OpCode::SetTabUp => {
                if Instruction::get_a(i) >= nup {
                    return fail("upvalue index out of range");
                }
                if !constant_is_string(proto, Instruction::get_b(i)) {
                    return fail("key is not a string constant");
                }
            }
            OpCode::GetField | OpCode::Self_ => {
                if !constant_is_string(proto, Instruction::get_c(i)) {
                    return fail("key is not a string constant");
                }
            }
            OpCode::SetField => {
                if !constant_is_string(proto, Instruction::get_b(i)) {
                    return fail("key is not a string constant");
                }
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
            | OpCode::BXorK => {
                if Instruction::get_c(i) >= nk {
                    return fail("constant index out of range");
                }
            }
            OpCode::MmBinK | OpCode::EqK => {
                if Instruction::get_b(i) >= nk {
                    return fail("constant index out of range");
                }
            }
            OpCode::SetTable | OpCode::SetI => {
                if Instruction::get_k(i) && Instruction::get_c(i) >= nk {
                    return fail("constant index out of range");
                }
            }
            OpCode::Jmp => {
                let target = pc as i64 + 1 + Instruction::get_sj(i) as i64;
                if target < 0 || target > ncode as i64 {
                    return fail("jump target out of range");
                }
            }
            OpCode::ForPrep | OpCode::TForPrep => {
                let target = pc as i64 + 1 + Instruction::get_bx(i) as i64;
                if target < 0 || target >= ncode as i64 {
                    return fail("jump target out of range");
                }
            }
            OpCode::ForLoop | OpCode::TForLoop => {
                let target = pc as i64 + 1 - Instruction::get_bx(i) as i64;
                if target < 0 || target >= ncode as i64 {
                    return fail("jump target out of range");
                }
            }
            OpCode::Closure => {
                if Instruction::get_bx(i) as usize >= proto.protos.len() {
                    return fail("prototype index out of range");
                }
            }
            OpCode::SetList => {
                if Instruction::get_k(i) {
                    let Some(&next) = proto.code.get(pc + 1) else {
                        return fail("missing EXTRAARG");
                    };
                    if Instruction::get_opcode(next) != OpCode::ExtraArg {
                        return fail("missing EXTRAARG");
                    }
                }
            }
            _ => {}
        }
    }

    for child in &proto.protos {
        validate_proto(child)?;
    }
    Ok(())
}

fn constant_is_string(proto: &Proto, idx: u32) -> bool {
    proto
        .constants
        .get(idx as usize)
        .map(|v| v.is_string())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use smol_str::SmolStr;

    fn tiny_proto(code: Vec<u32>) -> Proto {
        let mut p = Proto::new(SmolStr::new("test"));
        p.code = code;
        p.line_info = vec![1; p.code.len()];
        p
    }

    #[test]
    fn test_rejects_bad_opcode() {
        let p = tiny_proto(vec![0x7F]);
        assert!(validate_proto(&p).is_err());
    }

    #[test]
    fn test_rejects_bad_constant_index() {
        let p = tiny_proto(vec![
            Instruction::abx(OpCode::LoadK, 0, 3),
            Instruction::abc(OpCode::Return0, 0, 1, 0),
        ]);
        assert!(validate_proto(&p).is_err());
    }

    #[test]
    fn test_rejects_wild_jump() {
        let p = tiny_proto(vec![
            Instruction::sj(OpCode::Jmp, 100),
            Instruction::abc(OpCode::Return0, 0, 1, 0),
        ]);
        assert!(validate_proto(&p).is_err());
    }

    #[test]
    fn test_accepts_minimal_function() {
        let p = tiny_proto(vec![Instruction::abc(OpCode::Return0, 0, 1, 0)]);
        assert!(validate_proto(&p).is_ok());
    }
}
