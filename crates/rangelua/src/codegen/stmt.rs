// Statement lowering: declarations, assignments, control flow, loops,
// returns and the break/goto/label machinery.

use smol_str::SmolStr;

use crate::bytecode::{Instruction, OpCode};
use crate::codegen::{CgResult, Codegen, ExpDesc, ExpKind};
use crate::frontend::ast::{Attrib, Block, Expr, FuncBody, FuncTarget, Stat};

impl<'vm> Codegen<'vm> {
    pub(crate) fn statlist(&mut self, block: &Block) -> CgResult<()> {
        for stat in &block.stmts {
            self.statement(stat)?;
        }
        Ok(())
    }

    /// A block in its own scope.
    pub(crate) fn block(&mut self, body: &Block) -> CgResult<()> {
        self.enter_block(false);
        self.statlist(body)?;
        self.leave_block()
    }

    fn statement(&mut self, stat: &Stat) -> CgResult<()> {
        match stat {
            Stat::Expr { expr, span } => {
                self.set_line(span.line);
                let mut e = ExpDesc::void();
                self.expr(expr, &mut e)?;
                if e.kind != ExpKind::Call {
                    return Err(self.err("syntax error (expression cannot be a statement)"));
                }
                // Statement calls discard all results.
                self.set_returns(&mut e, 0)?;
            }
            Stat::Assign {
                targets,
                values,
                span,
            } => {
                self.set_line(span.line);
                self.assign_stat(targets, values)?;
            }
            Stat::Local {
                names,
                values,
                span,
            } => {
                self.set_line(span.line);
                self.local_stat(names, values)?;
            }
            Stat::If {
                arms,
                else_block,
                span,
            } => {
                self.set_line(span.line);
                self.if_stat(arms, else_block.as_ref())?;
            }
            Stat::While { cond, body, span } => {
                self.set_line(span.line);
                self.while_stat(cond, body)?;
            }
            Stat::Repeat { body, cond, span } => {
                self.set_line(span.line);
                self.repeat_stat(body, cond)?;
            }
            Stat::NumericFor {
                var,
                start,
                limit,
                step,
                body,
                span,
            } => {
                self.set_line(span.line);
                self.numeric_for(var, start, limit, step.as_ref(), body, span.line)?;
            }
            Stat::GenericFor {
                names,
                exprs,
                body,
                span,
            } => {
                self.set_line(span.line);
                self.generic_for(names, exprs, body, span.line)?;
            }
            Stat::Do { body, span } => {
                self.set_line(span.line);
                self.block(body)?;
            }
            Stat::Return { exprs, span } => {
                self.set_line(span.line);
                self.return_stat(exprs)?;
            }
            Stat::Break { span } => {
                self.set_line(span.line);
                self.pending_goto(&SmolStr::new("break"))?;
            }
            Stat::Goto { label, span } => {
                self.set_line(span.line);
                self.goto_stat(label)?;
            }
            Stat::Label { name, span } => {
                self.set_line(span.line);
                self.define_label(name)?;
            }
            Stat::Function { target, body, span } => {
                self.set_line(span.line);
                self.function_stat(target, body)?;
            }
            Stat::LocalFunction { name, body, span } => {
                self.set_line(span.line);
                self.local_function(name, body)?;
            }
        }
        // Statement boundary: temporaries die, locals stay.
        let level = self.fs().nactvar;
        self.fs_mut().freereg = level;
        Ok(())
    }

    // ============ declarations and assignment ============

    fn local_stat(&mut self, names: &[(SmolStr, Attrib)], values: &[Expr]) -> CgResult<()> {
        let mut tbc_seen = false;
        for (name, attrib) in names {
            if *attrib == Attrib::Close {
                if tbc_seen {
                    return Err(self.err("multiple to-be-closed variables in local list"));
                }
                tbc_seen = true;
            }
            self.new_local(name.clone(), *attrib)?;
        }
        let base = self.fs().nactvar as u32;
        self.adjust_assign(names.len(), values)?;
        self.adjust_local_vars(names.len());
        for (i, (_, attrib)) in names.iter().enumerate() {
            if *attrib == Attrib::Close {
                self.code_abc(OpCode::Tbc, base + i as u32, 0, 0)?;
                self.fs_mut().needclose = true;
                if let Some(bl) = self.fs_mut().blocks.last_mut() {
                    bl.inside_tbc = true;
                }
            }
        }
        Ok(())
    }

    /// Evaluate `values` into `nvars` consecutive fresh registers, padding
    /// with nils or dropping extras.
    fn adjust_assign(&mut self, nvars: usize, values: &[Expr]) -> CgResult<()> {
        let nexps = values.len();
        let mut e = ExpDesc::void();
        for (i, v) in values.iter().enumerate() {
            self.expr(v, &mut e)?;
            if i + 1 < nexps {
                self.exp_to_next_reg(&mut e)?;
            }
        }
        let needed = nvars as i64 - nexps as i64;
        if e.is_multiret() {
            let extra = (needed + 1).max(0);
            self.set_returns(&mut e, extra as i32)?;
        } else {
            if e.kind != ExpKind::Void {
                self.exp_to_next_reg(&mut e)?;
            }
            if needed > 0 {
                let free = self.fs().freereg as u32;
                self.code_nil(free, needed as u32)?;
            }
        }
        if needed > 0 {
            self.reserve_regs(needed as u32)?;
        } else {
            let fs = self.fs_mut();
            fs.freereg = (fs.freereg as i64 + needed) as u8;
        }
        Ok(())
    }

    fn assign_stat(&mut self, targets: &[Expr], values: &[Expr]) -> CgResult<()> {
        let n = targets.len();
        let mut descs: Vec<ExpDesc> = Vec::with_capacity(n);
        for t in targets {
            let mut d = ExpDesc::void();
            match t {
                Expr::Name(name, span) => {
                    self.set_line(span.line);
                    self.single_var(name, &mut d)?;
                    if d.kind == ExpKind::Local {
                        let attrib = self.local_attrib(d.vidx);
                        if attrib != Attrib::None {
                            return Err(self.err(format!(
                                "attempt to assign to const variable '{name}'"
                            )));
                        }
                    }
                }
                Expr::Index { obj, key, span } => {
                    self.set_line(span.line);
                    self.expr(obj, &mut d)?;
                    self.exp_to_any_reg_up(&mut d)?;
                    let mut k = ExpDesc::void();
                    self.expr(key, &mut k)?;
                    self.exp_to_val(&mut k)?;
                    self.indexed(&mut d, &mut k)?;
                }
                _ => return Err(self.err("cannot assign to this expression")),
            }
            if n > 1 {
                self.protect_target(&mut d)?;
            }
            descs.push(d);
        }

        self.adjust_assign(n, values)?;
        // Values occupy the top n registers; assign right-to-left so an
        // earlier target's index registers never see a later store.
        let first_value = self.fs().freereg as u32 - n as u32;
        for (i, d) in descs.iter().enumerate().rev() {
            let mut v = ExpDesc::nonreloc(first_value + i as u32);
            self.store_var(d, &mut v)?;
        }
        Ok(())
    }

    /// With multiple targets, an indexed target whose table or key lives in
    /// a local register could observe a later store to that local; snapshot
    /// such registers into temporaries.
    fn protect_target(&mut self, d: &mut ExpDesc) -> CgResult<()> {
        let nvars = self.nvarstack();
        match d.kind {
            ExpKind::IndexStr | ExpKind::IndexI | ExpKind::Indexed => {
                if d.tab < nvars {
                    let tmp = self.fs().freereg as u32;
                    self.reserve_regs(1)?;
                    self.code_abc(OpCode::Move, tmp, d.tab, 0)?;
                    d.tab = tmp;
                }
                if d.kind == ExpKind::Indexed && d.idx < nvars {
                    let tmp = self.fs().freereg as u32;
                    self.reserve_regs(1)?;
                    self.code_abc(OpCode::Move, tmp, d.idx, 0)?;
                    d.idx = tmp;
                }
            }
            _ => {}
        }
        Ok(())
    }

    // ============ control flow ============

    fn if_stat(&mut self, arms: &[(Expr, Block)], else_block: Option<&Block>) -> CgResult<()> {
        let mut escapes = crate::codegen::NO_JUMP;
        let narms = arms.len();
        for (i, (cond, body)) in arms.iter().enumerate() {
            let mut v = ExpDesc::void();
            self.expr(cond, &mut v)?;
            self.go_if_true(&mut v)?;
            self.block(body)?;
            if i + 1 < narms || else_block.is_some() {
                let j = self.jump()?;
                self.concat_jumps(&mut escapes, j)?;
            }
            self.patch_to_here(v.f)?;
        }
        if let Some(body) = else_block {
            self.block(body)?;
        }
        self.patch_to_here(escapes)
    }

    fn while_stat(&mut self, cond: &Expr, body: &Block) -> CgResult<()> {
        let start = self.get_label();
        let mut v = ExpDesc::void();
        self.expr(cond, &mut v)?;
        self.go_if_true(&mut v)?;
        self.enter_block(true);
        self.block(body)?;
        self.jump_to(start)?;
        self.leave_block()?;
        self.patch_to_here(v.f)
    }

    fn repeat_stat(&mut self, body: &Block, cond: &Expr) -> CgResult<()> {
        let start = self.get_label();
        self.enter_block(true); // loop block (break target)
        self.enter_block(false); // scope block: locals visible in `until`
        let scope_level = self.fs().nactvar as u32;
        self.statlist(body)?;
        let mut v = ExpDesc::void();
        self.expr(cond, &mut v)?;
        self.go_if_true(&mut v)?;
        let mut condexit = v.f;
        let scope_upval = self.fs().blocks.last().map(|b| b.upval).unwrap_or(false);
        if scope_upval {
            // Repeating must close the body's captured locals first.
            let exit = self.jump()?;
            self.patch_to_here(condexit)?;
            self.code_abc(OpCode::Close, scope_level, 0, 0)?;
            condexit = self.jump()?;
            self.patch_to_here(exit)?;
        }
        self.patch_list(condexit, start)?;
        self.leave_block()?; // scope
        self.leave_block()?; // loop
        Ok(())
    }

    fn numeric_for(
        &mut self,
        var: &SmolStr,
        start: &Expr,
        limit: &Expr,
        step: Option<&Expr>,
        body: &Block,
        line: u32,
    ) -> CgResult<()> {
        self.enter_block(true); // loop block
        let base = self.fs().freereg as u32;
        self.new_local(SmolStr::new("(for state)"), Attrib::None)?;
        self.new_local(SmolStr::new("(for state)"), Attrib::None)?;
        self.new_local(SmolStr::new("(for state)"), Attrib::None)?;
        self.new_local(var.clone(), Attrib::None)?;
        self.expr_single_to_next_reg(start)?;
        self.expr_single_to_next_reg(limit)?;
        match step {
            Some(s) => self.expr_single_to_next_reg(s)?,
            None => {
                let free = self.fs().freereg as u32;
                self.code_load_int(free, 1)?;
                self.reserve_regs(1)?;
            }
        }
        self.adjust_local_vars(3);
        self.for_body(base, 1, false, body, line)?;
        self.leave_block()
    }

    fn generic_for(
        &mut self,
        names: &[SmolStr],
        exprs: &[Expr],
        body: &Block,
        line: u32,
    ) -> CgResult<()> {
        self.enter_block(true); // loop block
        let base = self.fs().freereg as u32;
        // Four-slot protocol block: iterator, state, control, closing slot.
        self.new_local(SmolStr::new("(for state)"), Attrib::None)?;
        self.new_local(SmolStr::new("(for state)"), Attrib::None)?;
        self.new_local(SmolStr::new("(for state)"), Attrib::None)?;
        self.new_local(SmolStr::new("(for state)"), Attrib::None)?;
        for name in names {
            self.new_local(name.clone(), Attrib::None)?;
        }
        self.adjust_assign(4, exprs)?;
        self.adjust_local_vars(4);
        self.for_body(base, names.len() as u32, true, body, line)?;
        self.leave_block()
    }

    fn expr_single_to_next_reg(&mut self, e: &Expr) -> CgResult<()> {
        let mut d = ExpDesc::void();
        self.expr(e, &mut d)?;
        self.exp_to_next_reg(&mut d)
    }

    fn for_body(
        &mut self,
        base: u32,
        nvars: u32,
        is_generic: bool,
        body: &Block,
        line: u32,
    ) -> CgResult<()> {
        let prep_op = if is_generic {
            OpCode::TForPrep
        } else {
            OpCode::ForPrep
        };
        let prep = self.code_abx(prep_op, base, 0)?;
        self.enter_block(false); // scope of the declared loop variables
        self.adjust_local_vars(nvars as usize);
        self.reserve_regs(nvars)?;
        self.block(body)?;
        self.leave_block()?;
        let dest = self.get_label();
        self.fix_for_jump(prep, dest, false)?;
        if is_generic {
            self.set_line(line);
            self.code_abc(OpCode::TForCall, base, 0, nvars)?;
        }
        let loop_op = if is_generic {
            OpCode::TForLoop
        } else {
            OpCode::ForLoop
        };
        let endfor = self.code_abx(loop_op, base, 0)?;
        self.fix_for_jump(endfor, prep + 1, true)?;
        Ok(())
    }

    fn fix_for_jump(&mut self, pc: i32, dest: i32, back: bool) -> CgResult<()> {
        let mut offset = dest - (pc + 1);
        if back {
            offset = -offset;
        }
        if offset < 0 || offset as u32 > Instruction::MAX_BX {
            return Err(self.err("control structure too long"));
        }
        let instr = &mut self.fs_mut().proto.code[pc as usize];
        Instruction::set_bx(instr, offset as u32);
        Ok(())
    }

    // ============ return ============

    fn return_stat(&mut self, exprs: &[Expr]) -> CgResult<()> {
        let mut first = self.nvarstack();
        let mut nret = exprs.len() as i32;
        if nret > 0 {
            let mut e = ExpDesc::void();
            for (i, v) in exprs.iter().enumerate() {
                self.expr(v, &mut e)?;
                if i + 1 < exprs.len() {
                    self.exp_to_next_reg(&mut e)?;
                }
            }
            if e.is_multiret() {
                self.set_multi_ret(&mut e)?;
                let inside_tbc = self
                    .fs()
                    .blocks
                    .last()
                    .map(|b| b.inside_tbc)
                    .unwrap_or(false);
                if e.kind == ExpKind::Call && nret == 1 && !inside_tbc {
                    // Tail position: reuse the frame instead of growing it.
                    let pc = e.info as usize;
                    let instr = self.fs().proto.code[pc];
                    self.fs_mut().proto.code[pc] = Instruction::abck(
                        OpCode::TailCall,
                        Instruction::get_a(instr),
                        Instruction::get_b(instr),
                        0,
                        false,
                    );
                }
                nret = -1;
            } else if nret == 1 {
                first = self.exp_to_any_reg(&mut e)?;
            } else {
                self.exp_to_next_reg(&mut e)?;
                debug_assert_eq!(self.fs().freereg as u32 - first, nret as u32);
            }
        }
        let op = match nret {
            0 => OpCode::Return0,
            1 => OpCode::Return1,
            _ => OpCode::Return,
        };
        self.code_abc(op, first, (nret + 1) as u32, 0)?;
        Ok(())
    }

    // ============ goto ============

    fn goto_stat(&mut self, name: &SmolStr) -> CgResult<()> {
        // Backward goto to a visible label, or pending forward goto.
        let found = self
            .fs()
            .labels
            .iter()
            .rev()
            .find(|l| l.name == *name)
            .map(|l| (l.pc, l.nactvar));
        match found {
            Some((pc, label_nactvar)) => {
                if (label_nactvar as u32) < self.nvarstack() {
                    // Jumping down a scope level; close anything above the
                    // label's level.
                    self.code_abc(OpCode::Close, label_nactvar as u32, 0, 0)?;
                }
                self.jump_to(pc)
            }
            None => self.pending_goto(name),
        }
    }

    // ============ function statements ============

    fn function_stat(&mut self, target: &FuncTarget, body: &FuncBody) -> CgResult<()> {
        let mut v = ExpDesc::void();
        self.single_var(&target.base, &mut v)?;
        let mut keys: Vec<&SmolStr> = target.fields.iter().collect();
        if let Some(m) = &target.method {
            keys.push(m);
        }
        for key in keys {
            self.exp_to_any_reg_up(&mut v)?;
            let mut k = self.string_exp(key);
            self.indexed(&mut v, &mut k)?;
        }
        let mut cl = ExpDesc::void();
        self.function_body(body, &mut cl)?;
        self.store_var(&v, &mut cl)
    }

    fn local_function(&mut self, name: &SmolStr, body: &FuncBody) -> CgResult<()> {
        self.new_local(name.clone(), Attrib::None)?;
        self.adjust_local_vars(1);
        let mut cl = ExpDesc::void();
        self.function_body(body, &mut cl)?;
        // The closure lands exactly in the new local's register.
        self.exp_to_next_reg(&mut cl)
    }
}
