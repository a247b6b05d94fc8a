// Instruction emission, the bump register allocator and the jump-list
// machinery. Forward jumps are linked through their own offset fields and
// resolved by patching.

use crate::bytecode::{Instruction, OpCode};
use crate::codegen::{CgResult, Codegen, ExpDesc, ExpKind, MAX_REGS, NO_JUMP, NO_REG};

impl<'vm> Codegen<'vm> {
    // ============ emission ============

    pub(crate) fn emit(&mut self, instr: u32) -> CgResult<i32> {
        let fs = self.fs_mut();
        let pc = fs.pc();
        let line = fs.line;
        fs.proto.code.push(instr);
        fs.proto.line_info.push(line);
        Ok(pc)
    }

    pub(crate) fn code_abc(&mut self, op: OpCode, a: u32, b: u32, c: u32) -> CgResult<i32> {
        self.emit(Instruction::abc(op, a, b, c))
    }

    pub(crate) fn code_abck(
        &mut self,
        op: OpCode,
        a: u32,
        b: u32,
        c: u32,
        k: bool,
    ) -> CgResult<i32> {
        self.emit(Instruction::abck(op, a, b, c, k))
    }

    pub(crate) fn code_abx(&mut self, op: OpCode, a: u32, bx: u32) -> CgResult<i32> {
        self.emit(Instruction::abx(op, a, bx))
    }

    pub(crate) fn code_asbx(&mut self, op: OpCode, a: u32, sbx: i32) -> CgResult<i32> {
        if !(-Instruction::OFFSET_SBX..=Instruction::OFFSET_SBX + 1).contains(&sbx) {
            return Err(self.err("value out of instruction range"));
        }
        self.emit(Instruction::asbx(op, a, sbx))
    }

    pub(crate) fn set_line(&mut self, line: u32) {
        self.fs_mut().line = line;
    }

    // ============ registers ============

    pub(crate) fn reserve_regs(&mut self, n: u32) -> CgResult<()> {
        let fs = self.fs_mut();
        let new_free = fs.freereg as u32 + n;
        if new_free > MAX_REGS {
            return Err(self.err("function or expression needs too many registers"));
        }
        let fs = self.fs_mut();
        fs.freereg = new_free as u8;
        if new_free > fs.proto.max_stack_size as u32 {
            fs.proto.max_stack_size = new_free as u8;
        }
        Ok(())
    }

    /// Release a temporary register. Only the top-of-stack temporary is
    /// freeable, never a slot pinned by a local.
    pub(crate) fn free_reg(&mut self, reg: u32) {
        if reg >= self.nvarstack() {
            let fs = self.fs_mut();
            fs.freereg -= 1;
            debug_assert_eq!(reg, fs.freereg as u32, "register freed out of order");
        }
    }

    pub(crate) fn free_exp(&mut self, e: &ExpDesc) {
        if e.kind == ExpKind::NonReloc {
            self.free_reg(e.info);
        }
    }

    /// Free both operand registers, higher one first.
    pub(crate) fn free_exps(&mut self, e1: &ExpDesc, e2: &ExpDesc) {
        let r1 = if e1.kind == ExpKind::NonReloc {
            e1.info as i64
        } else {
            -1
        };
        let r2 = if e2.kind == ExpKind::NonReloc {
            e2.info as i64
        } else {
            -1
        };
        if r1 > r2 {
            self.free_exp(e1);
            self.free_exp(e2);
        } else {
            self.free_exp(e2);
            self.free_exp(e1);
        }
    }

    // ============ jumps ============

    /// Emit an unconditional forward jump with an unresolved target.
    pub(crate) fn jump(&mut self) -> CgResult<i32> {
        self.emit(Instruction::sj(OpCode::Jmp, NO_JUMP))
    }

    pub(crate) fn jump_to(&mut self, target: i32) -> CgResult<()> {
        let pc = self.jump()?;
        self.patch_list(pc, target)
    }

    pub(crate) fn get_label(&self) -> i32 {
        self.fs().pc()
    }

    /// Next entry of a jump list, or NO_JUMP at its end.
    fn get_jump(&self, pc: i32) -> i32 {
        let offset = Instruction::get_sj(self.fs().proto.code[pc as usize]);
        if offset == NO_JUMP {
            NO_JUMP
        } else {
            pc + 1 + offset
        }
    }

    fn fix_jump(&mut self, pc: i32, target: i32) -> CgResult<()> {
        let offset = target - (pc + 1);
        if offset == NO_JUMP || offset.abs() > Instruction::OFFSET_SJ {
            return Err(self.err("control structure too long"));
        }
        let instr = &mut self.fs_mut().proto.code[pc as usize];
        Instruction::set_sj(instr, offset);
        Ok(())
    }

    /// Concatenate jump list `l2` onto `*l1`.
    pub(crate) fn concat_jumps(&mut self, l1: &mut i32, l2: i32) -> CgResult<()> {
        if l2 == NO_JUMP {
            return Ok(());
        }
        if *l1 == NO_JUMP {
            *l1 = l2;
            return Ok(());
        }
        let mut list = *l1;
        loop {
            let next = self.get_jump(list);
            if next == NO_JUMP {
                break;
            }
            list = next;
        }
        self.fix_jump(list, l2)
    }

    /// The instruction controlling a jump: the test immediately before it, if
    /// any.
    fn jump_control(&self, pc: i32) -> i32 {
        if pc >= 1 {
            let prev = self.fs().proto.code[(pc - 1) as usize];
            if Instruction::get_opcode(prev).is_test() {
                return pc - 1;
            }
        }
        pc
    }

    /// Patch a TESTSET node to produce its value in `reg`, or degrade it to
    /// TEST when no value is needed. Returns false when the node cannot
    /// produce a value (its control is not TESTSET).
    fn patch_test_reg(&mut self, node: i32, reg: u32) -> bool {
        let ctrl = self.jump_control(node);
        let instr = self.fs().proto.code[ctrl as usize];
        if Instruction::get_opcode(instr) != OpCode::TestSet {
            return false;
        }
        let b = Instruction::get_b(instr);
        let new = if reg != NO_REG && reg != b {
            let mut i = instr;
            Instruction::set_a(&mut i, reg);
            i
        } else {
            // No register to put the value, or the value is already there:
            // degrade to a plain TEST.
            Instruction::abck(OpCode::Test, b, 0, 0, Instruction::get_k(instr))
        };
        self.fs_mut().proto.code[ctrl as usize] = new;
        true
    }

    /// True if some jump in the list does not come from a TESTSET (so the
    /// expression needs explicit LOADTRUE/LFALSESKIP values).
    pub(crate) fn need_value(&self, mut list: i32) -> bool {
        while list != NO_JUMP {
            let ctrl = self.jump_control(list);
            let instr = self.fs().proto.code[ctrl as usize];
            if Instruction::get_opcode(instr) != OpCode::TestSet {
                return true;
            }
            list = self.get_jump(list);
        }
        false
    }

    /// Patch every jump of `list`: value-producing nodes to `vtarget`,
    /// plain jumps to `dtarget`.
    pub(crate) fn patch_list_aux(
        &mut self,
        mut list: i32,
        vtarget: i32,
        reg: u32,
        dtarget: i32,
    ) -> CgResult<()> {
        while list != NO_JUMP {
            let next = self.get_jump(list);
            if self.patch_test_reg(list, reg) {
                self.fix_jump(list, vtarget)?;
            } else {
                self.fix_jump(list, dtarget)?;
            }
            list = next;
        }
        Ok(())
    }

    pub(crate) fn patch_list(&mut self, list: i32, target: i32) -> CgResult<()> {
        self.patch_list_aux(list, target, NO_REG, target)
    }

    pub(crate) fn patch_to_here(&mut self, list: i32) -> CgResult<()> {
        let here = self.get_label();
        self.patch_list(list, here)
    }

    /// Remove the value-producing side of every TESTSET in a list (used by
    /// `not`, whose operand value is discarded).
    pub(crate) fn remove_values(&mut self, mut list: i32) {
        while list != NO_JUMP {
            self.patch_test_reg(list, NO_REG);
            list = self.get_jump(list);
        }
    }

    /// Emit a conditional test followed by its jump; returns the jump pc.
    pub(crate) fn cond_jump(
        &mut self,
        op: OpCode,
        a: u32,
        b: u32,
        c: u32,
        k: bool,
    ) -> CgResult<i32> {
        self.code_abck(op, a, b, c, k)?;
        self.jump()
    }

    /// Flip the expected outcome of the comparison controlling a jump.
    pub(crate) fn negate_condition(&mut self, e: &mut ExpDesc) {
        let ctrl = self.jump_control(e.info as i32);
        let instr = &mut self.fs_mut().proto.code[ctrl as usize];
        let k = Instruction::get_k(*instr);
        Instruction::set_k(instr, !k);
    }
}
