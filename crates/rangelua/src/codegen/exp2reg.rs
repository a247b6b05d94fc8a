// Discharging expressions into registers: the minimal-code materialization
// family, store-to-variable, indexing and the boolean-jump plumbing.

use crate::bytecode::{Instruction, OpCode};
use crate::codegen::{CgResult, Codegen, ExpDesc, ExpKind, NO_JUMP, NO_REG};

impl<'vm> Codegen<'vm> {
    /// Turn variable kinds into value kinds, emitting the read they imply.
    pub(crate) fn discharge_vars(&mut self, e: &mut ExpDesc) -> CgResult<()> {
        match e.kind {
            ExpKind::Local => {
                e.kind = ExpKind::NonReloc;
            }
            ExpKind::Upval => {
                e.info = self.code_abc(OpCode::GetUpval, 0, e.info, 0)? as u32;
                e.kind = ExpKind::Reloc;
            }
            ExpKind::IndexUp => {
                e.info = self.code_abc(OpCode::GetTabUp, 0, e.tab, e.idx)? as u32;
                e.kind = ExpKind::Reloc;
            }
            ExpKind::IndexI => {
                self.free_reg(e.tab);
                e.info = self.code_abc(OpCode::GetI, 0, e.tab, e.idx)? as u32;
                e.kind = ExpKind::Reloc;
            }
            ExpKind::IndexStr => {
                self.free_reg(e.tab);
                e.info = self.code_abc(OpCode::GetField, 0, e.tab, e.idx)? as u32;
                e.kind = ExpKind::Reloc;
            }
            ExpKind::Indexed => {
                if e.idx > e.tab {
                    self.free_reg(e.idx);
                    self.free_reg(e.tab);
                } else {
                    self.free_reg(e.tab);
                    self.free_reg(e.idx);
                }
                e.info = self.code_abc(OpCode::GetTable, 0, e.tab, e.idx)? as u32;
                e.kind = ExpKind::Reloc;
            }
            ExpKind::Call | ExpKind::Vararg => {
                self.set_one_ret(e);
            }
            _ => {}
        }
        Ok(())
    }

    /// Emit the minimal code putting the expression's value into `reg`.
    fn discharge_to_reg(&mut self, e: &mut ExpDesc, reg: u32) -> CgResult<()> {
        self.discharge_vars(e)?;
        match e.kind {
            ExpKind::Nil => {
                self.code_nil(reg, 1)?;
            }
            ExpKind::False => {
                self.code_abc(OpCode::LoadFalse, reg, 0, 0)?;
            }
            ExpKind::True => {
                self.code_abc(OpCode::LoadTrue, reg, 0, 0)?;
            }
            ExpKind::K | ExpKind::KStr => {
                self.code_load_k(reg, e.info)?;
            }
            ExpKind::KInt => {
                self.code_load_int(reg, e.ival)?;
            }
            ExpKind::KFlt => {
                self.code_load_float(reg, e.nval)?;
            }
            ExpKind::Reloc => {
                let pc = e.info as usize;
                let instr = &mut self.fs_mut().proto.code[pc];
                Instruction::set_a(instr, reg);
            }
            ExpKind::NonReloc => {
                if e.info != reg {
                    self.code_abc(OpCode::Move, reg, e.info, 0)?;
                }
            }
            ExpKind::Jmp => return Ok(()),
            _ => {
                debug_assert!(e.kind == ExpKind::Void, "cannot discharge {:?}", e.kind);
                return Ok(());
            }
        }
        e.info = reg;
        e.kind = ExpKind::NonReloc;
        Ok(())
    }

    fn discharge_to_any_reg(&mut self, e: &mut ExpDesc) -> CgResult<()> {
        if e.kind != ExpKind::NonReloc {
            self.reserve_regs(1)?;
            let reg = self.fs().freereg as u32 - 1;
            self.discharge_to_reg(e, reg)?;
        }
        Ok(())
    }

    /// Materialize into a fresh register at the top of the frame.
    pub(crate) fn exp_to_next_reg(&mut self, e: &mut ExpDesc) -> CgResult<()> {
        self.discharge_vars(e)?;
        self.free_exp(e);
        self.reserve_regs(1)?;
        let reg = self.fs().freereg as u32 - 1;
        self.exp_to_reg(e, reg)
    }

    /// Materialize into some register, reusing the current one if possible.
    pub(crate) fn exp_to_any_reg(&mut self, e: &mut ExpDesc) -> CgResult<u32> {
        self.discharge_vars(e)?;
        if e.kind == ExpKind::NonReloc {
            if !e.has_jumps() {
                return Ok(e.info);
            }
            if e.info >= self.nvarstack() {
                let reg = e.info;
                self.exp_to_reg(e, reg)?;
                return Ok(e.info);
            }
        }
        self.exp_to_next_reg(e)?;
        Ok(e.info)
    }

    /// Value usable in place: register or upvalue.
    pub(crate) fn exp_to_any_reg_up(&mut self, e: &mut ExpDesc) -> CgResult<()> {
        if e.kind != ExpKind::Upval || e.has_jumps() {
            self.exp_to_any_reg(e)?;
        }
        Ok(())
    }

    /// Value anywhere (register or constant); discharges variable reads.
    pub(crate) fn exp_to_val(&mut self, e: &mut ExpDesc) -> CgResult<()> {
        if e.has_jumps() {
            self.exp_to_any_reg(e)?;
        } else {
            self.discharge_vars(e)?;
        }
        Ok(())
    }

    /// Full materialization into `reg`, resolving any pending boolean jump
    /// chains into actual true/false values.
    pub(crate) fn exp_to_reg(&mut self, e: &mut ExpDesc, reg: u32) -> CgResult<()> {
        self.discharge_to_reg(e, reg)?;
        if e.kind == ExpKind::Jmp {
            let info = e.info as i32;
            self.concat_jumps(&mut e.t, info)?;
        }
        if e.has_jumps() {
            let mut p_f = NO_JUMP;
            let mut p_t = NO_JUMP;
            if self.need_value(e.t) || self.need_value(e.f) {
                let fj = if e.kind == ExpKind::Jmp {
                    NO_JUMP
                } else {
                    self.jump()?
                };
                p_f = self.code_abc(OpCode::LFalseSkip, reg, 0, 0)?;
                p_t = self.code_abc(OpCode::LoadTrue, reg, 0, 0)?;
                self.patch_to_here(fj)?;
            }
            let final_pc = self.get_label();
            self.patch_list_aux(e.f, final_pc, reg, p_f)?;
            self.patch_list_aux(e.t, final_pc, reg, p_t)?;
        }
        e.f = NO_JUMP;
        e.t = NO_JUMP;
        e.info = reg;
        e.kind = ExpKind::NonReloc;
        Ok(())
    }

    /// Fix a multi-return expression to produce exactly one value.
    pub(crate) fn set_one_ret(&mut self, e: &mut ExpDesc) {
        if e.kind == ExpKind::Call {
            let pc = e.info as usize;
            let instr = self.fs().proto.code[pc];
            e.kind = ExpKind::NonReloc;
            e.info = Instruction::get_a(instr);
        } else if e.kind == ExpKind::Vararg {
            let pc = e.info as usize;
            let instr = &mut self.fs_mut().proto.code[pc];
            Instruction::set_c(instr, 2);
            e.kind = ExpKind::Reloc;
        }
    }

    /// Fix a multi-return expression to produce `nresults` values (-1 for
    /// all).
    pub(crate) fn set_returns(&mut self, e: &mut ExpDesc, nresults: i32) -> CgResult<()> {
        let want = (nresults + 1) as u32;
        if e.kind == ExpKind::Call {
            let pc = e.info as usize;
            let instr = &mut self.fs_mut().proto.code[pc];
            Instruction::set_c(instr, want);
        } else if e.kind == ExpKind::Vararg {
            let pc = e.info as usize;
            let freereg = self.fs().freereg as u32;
            let instr = &mut self.fs_mut().proto.code[pc];
            Instruction::set_c(instr, want);
            Instruction::set_a(instr, freereg);
            self.reserve_regs(1)?;
        }
        Ok(())
    }

    pub(crate) fn set_multi_ret(&mut self, e: &mut ExpDesc) -> CgResult<()> {
        self.set_returns(e, -1)
    }

    /// Try to fold the expression into a constant-pool operand; true on
    /// success (kind becomes K with `info` = index).
    pub(crate) fn exp_to_k(&mut self, e: &mut ExpDesc) -> CgResult<bool> {
        if e.has_jumps() {
            return Ok(false);
        }
        let idx = match e.kind {
            ExpKind::Nil => self.nil_k(),
            ExpKind::True => self.bool_k(true),
            ExpKind::False => self.bool_k(false),
            ExpKind::KInt => self.int_k(e.ival),
            ExpKind::KFlt => self.float_k(e.nval),
            ExpKind::KStr | ExpKind::K => {
                if e.info > 255 {
                    return Ok(false);
                }
                e.kind = ExpKind::K;
                return Ok(true);
            }
            _ => return Ok(false),
        };
        // Constant operands must fit the 8-bit field of ...K instructions.
        if idx > 255 {
            return Ok(false);
        }
        e.kind = ExpKind::K;
        e.info = idx;
        Ok(true)
    }

    /// Emit `op A B rk(e)`: the value operand is a constant (k=1) when it
    /// fits the pool, otherwise a register.
    pub(crate) fn code_abrk(&mut self, op: OpCode, a: u32, b: u32, e: &mut ExpDesc) -> CgResult<()> {
        if self.exp_to_k(e)? && e.info <= 255 {
            self.code_abck(op, a, b, e.info, true)?;
        } else {
            let r = self.exp_to_any_reg(e)?;
            self.code_abck(op, a, b, r, false)?;
        }
        Ok(())
    }

    /// Assign `ex` into the variable described by `var`.
    pub(crate) fn store_var(&mut self, var: &ExpDesc, ex: &mut ExpDesc) -> CgResult<()> {
        match var.kind {
            ExpKind::Local => {
                self.free_exp(ex);
                self.exp_to_reg(ex, var.info)?;
            }
            ExpKind::Upval => {
                let r = self.exp_to_any_reg(ex)?;
                self.code_abc(OpCode::SetUpval, r, var.info, 0)?;
                self.free_exp(ex);
            }
            ExpKind::IndexUp => {
                self.code_abrk(OpCode::SetTabUp, var.tab, var.idx, ex)?;
                self.free_exp(ex);
            }
            ExpKind::IndexI => {
                self.code_abrk(OpCode::SetI, var.tab, var.idx, ex)?;
                self.free_exp(ex);
            }
            ExpKind::IndexStr => {
                self.code_abrk(OpCode::SetField, var.tab, var.idx, ex)?;
                self.free_exp(ex);
            }
            ExpKind::Indexed => {
                self.code_abrk(OpCode::SetTable, var.tab, var.idx, ex)?;
                self.free_exp(ex);
            }
            _ => return Err(self.err("cannot assign to this expression")),
        }
        Ok(())
    }

    /// Turn `t` into an indexed descriptor over key `k`, picking the
    /// register/integer-immediate/short-string-constant variant.
    pub(crate) fn indexed(&mut self, t: &mut ExpDesc, k: &mut ExpDesc) -> CgResult<()> {
        if k.kind == ExpKind::KStr {
            k.kind = ExpKind::K;
        }
        debug_assert!(
            matches!(t.kind, ExpKind::NonReloc | ExpKind::Local | ExpKind::Upval),
            "table operand not discharged: {:?}",
            t.kind
        );
        let k_is_short_str = self.is_short_string_k(k);
        if t.kind == ExpKind::Upval && !k_is_short_str {
            // Upvalues can only be indexed directly by short-string
            // constants; anything else goes through a register.
            self.exp_to_any_reg(t)?;
        }
        let t_reg = t.info;
        if self.is_short_string_k(k) {
            if t.kind == ExpKind::Upval {
                t.kind = ExpKind::IndexUp;
            } else {
                t.kind = ExpKind::IndexStr;
            }
            t.tab = t_reg;
            t.idx = k.info;
        } else if k.kind == ExpKind::KInt && !k.has_jumps() && (0..=255).contains(&k.ival) {
            t.kind = ExpKind::IndexI;
            t.tab = t_reg;
            t.idx = k.ival as u32;
        } else {
            let k_reg = self.exp_to_any_reg(k)?;
            t.kind = ExpKind::Indexed;
            t.tab = t_reg;
            t.idx = k_reg;
        }
        Ok(())
    }

    fn is_short_string_k(&self, e: &ExpDesc) -> bool {
        e.kind == ExpKind::K
            && !e.has_jumps()
            && e.info <= 255
            && self
                .fs()
                .proto
                .constants
                .get(e.info as usize)
                .map(|v| v.is_string())
                .unwrap_or(false)
    }

    // ============ boolean jump plumbing ============

    /// Emit code so that control falls through when the expression is true;
    /// its false-exits accumulate in `e.f`.
    pub(crate) fn go_if_true(&mut self, e: &mut ExpDesc) -> CgResult<()> {
        self.discharge_vars(e)?;
        let pc = match e.kind {
            ExpKind::Jmp => {
                self.negate_condition(e);
                e.info as i32
            }
            _ if e.is_always_true() => NO_JUMP,
            _ => self.jump_on_cond(e, false)?,
        };
        self.concat_jumps(&mut e.f, pc)?;
        self.patch_to_here(e.t)?;
        e.t = NO_JUMP;
        Ok(())
    }

    /// Dual of `go_if_true`: fall through when false, true-exits in `e.t`.
    pub(crate) fn go_if_false(&mut self, e: &mut ExpDesc) -> CgResult<()> {
        self.discharge_vars(e)?;
        let pc = match e.kind {
            ExpKind::Jmp => e.info as i32,
            ExpKind::Nil | ExpKind::False => NO_JUMP,
            _ => self.jump_on_cond(e, true)?,
        };
        self.concat_jumps(&mut e.t, pc)?;
        self.patch_to_here(e.f)?;
        e.f = NO_JUMP;
        Ok(())
    }

    /// Emit a TEST/TESTSET + JMP pair on the expression's truthiness.
    fn jump_on_cond(&mut self, e: &mut ExpDesc, cond: bool) -> CgResult<i32> {
        if e.kind == ExpKind::Reloc {
            let instr = self.fs().proto.code[e.info as usize];
            if Instruction::get_opcode(instr) == OpCode::Not {
                // `not x` in test position: drop the NOT and test its
                // operand with the condition inverted.
                let fs = self.fs_mut();
                fs.proto.code.pop();
                fs.proto.line_info.pop();
                return self.cond_jump(
                    OpCode::Test,
                    Instruction::get_b(instr),
                    0,
                    0,
                    !cond,
                );
            }
        }
        self.discharge_to_any_reg(e)?;
        self.free_exp(e);
        self.cond_jump(OpCode::TestSet, NO_REG, e.info, 0, cond)
    }

    // ============ load helpers ============

    pub(crate) fn code_nil(&mut self, from: u32, n: u32) -> CgResult<()> {
        // LOADNIL B is the number of *extra* registers to clear.
        if n > 0 {
            self.code_abc(OpCode::LoadNil, from, n - 1, 0)?;
        }
        Ok(())
    }

    pub(crate) fn code_load_k(&mut self, reg: u32, k: u32) -> CgResult<()> {
        if k <= Instruction::MAX_BX {
            self.code_abx(OpCode::LoadK, reg, k)?;
        } else {
            self.code_abx(OpCode::LoadKX, reg, 0)?;
            self.emit(Instruction::ax(OpCode::ExtraArg, k))?;
        }
        Ok(())
    }

    pub(crate) fn code_load_int(&mut self, reg: u32, i: i64) -> CgResult<()> {
        if (-(Instruction::OFFSET_SBX as i64)..=Instruction::OFFSET_SBX as i64 + 1).contains(&i) {
            self.code_asbx(OpCode::LoadI, reg, i as i32)?;
        } else {
            let k = self.int_k(i);
            self.code_load_k(reg, k)?;
        }
        Ok(())
    }

    pub(crate) fn code_load_float(&mut self, reg: u32, n: f64) -> CgResult<()> {
        let as_int = n as i64;
        if (as_int as f64) == n
            && (-(Instruction::OFFSET_SBX as i64)..=Instruction::OFFSET_SBX as i64 + 1)
                .contains(&as_int)
        {
            self.code_asbx(OpCode::LoadF, reg, as_int as i32)?;
        } else {
            let k = self.float_k(n);
            self.code_load_k(reg, k)?;
        }
        Ok(())
    }

    /// Load a string literal, interning it and registering the constant.
    pub(crate) fn string_exp(&mut self, s: &str) -> ExpDesc {
        let k = self.string_k(s);
        ExpDesc::kstr(k)
    }

}
