// Expression lowering: literals, variables, operators with constant folding
// and immediate/constant operand variants, calls, table constructors and
// closures.

use smol_str::SmolStr;

use crate::bytecode::{Instruction, OpCode, Tm};
use crate::codegen::{
    CgResult, Codegen, ExpDesc, ExpKind, FIELDS_PER_FLUSH, NO_JUMP, VarKind,
};
use crate::frontend::ast::{Attrib, BinOp, Expr, FuncBody, TableField, UnOp};
use crate::value::float_to_integer;
use crate::vm::execute::arith::{float_mod, int_floor_div, int_mod, int_shl};

impl<'vm> Codegen<'vm> {
    /// Lower one expression into a descriptor.
    pub(crate) fn expr(&mut self, ast: &Expr, e: &mut ExpDesc) -> CgResult<()> {
        self.set_line(ast.span().line);
        match ast {
            Expr::Nil(_) => *e = ExpDesc::new(ExpKind::Nil),
            Expr::True(_) => *e = ExpDesc::new(ExpKind::True),
            Expr::False(_) => *e = ExpDesc::new(ExpKind::False),
            Expr::Integer(i, _) => *e = ExpDesc::int(*i),
            Expr::Float(n, _) => *e = ExpDesc::float(*n),
            Expr::Str(s, _) => *e = self.string_exp(s),
            Expr::Vararg(_) => {
                if !self.fs().proto.is_vararg {
                    return Err(self.err("cannot use '...' outside a vararg function"));
                }
                let pc = self.code_abc(OpCode::Vararg, 0, 0, 1)?;
                *e = ExpDesc::new(ExpKind::Vararg);
                e.info = pc as u32;
            }
            Expr::Name(name, _) => self.single_var(name, e)?,
            Expr::Paren { inner, .. } => {
                self.expr(inner, e)?;
                self.discharge_vars(e)?;
            }
            Expr::Index { obj, key, .. } => {
                self.expr(obj, e)?;
                self.exp_to_any_reg_up(e)?;
                let mut k = ExpDesc::void();
                self.expr(key, &mut k)?;
                self.exp_to_val(&mut k)?;
                self.indexed(e, &mut k)?;
            }
            Expr::Call { func, args, span } => {
                self.call_expr(func, None, args, span.line, e)?;
            }
            Expr::MethodCall {
                obj,
                method,
                args,
                span,
            } => {
                self.call_expr(obj, Some(method), args, span.line, e)?;
            }
            Expr::Function(body) => self.function_body(body, e)?,
            Expr::Table { fields, .. } => self.table_constructor(fields, e)?,
            Expr::Binary { op, lhs, rhs, span } => {
                self.binary_expr(*op, lhs, rhs, span.line, e)?;
            }
            Expr::Unary { op, operand, span } => {
                self.unary_expr(*op, operand, span.line, e)?;
            }
        }
        Ok(())
    }

    /// Resolve a bare name: local, upvalue, else a field of _ENV.
    pub(crate) fn single_var(&mut self, name: &str, e: &mut ExpDesc) -> CgResult<()> {
        match self.resolve_name(name)? {
            VarKind::Local(reg, vidx) => *e = ExpDesc::local(reg, vidx),
            VarKind::Upvalue(idx) => *e = ExpDesc::upval(idx),
            VarKind::Global => {
                // `x` is shorthand for `_ENV.x`; _ENV always resolves.
                match self.resolve_name("_ENV")? {
                    VarKind::Local(reg, vidx) => *e = ExpDesc::local(reg, vidx),
                    VarKind::Upvalue(idx) => *e = ExpDesc::upval(idx),
                    VarKind::Global => {
                        return Err(self.err("internal: _ENV not resolvable"));
                    }
                }
                self.exp_to_any_reg_up(e)?;
                let mut key = self.string_exp(name);
                self.indexed(e, &mut key)?;
            }
        }
        Ok(())
    }

    // ============ calls ============

    /// Lower a call or method call; leaves a Call descriptor wanting one
    /// result (callers adjust via set_returns / set_one_ret).
    fn call_expr(
        &mut self,
        callee: &Expr,
        method: Option<&SmolStr>,
        args: &[Expr],
        line: u32,
        e: &mut ExpDesc,
    ) -> CgResult<()> {
        let base;
        match method {
            None => {
                self.expr(callee, e)?;
                self.exp_to_next_reg(e)?;
                base = e.info;
            }
            Some(name) => {
                // o:m(...) loads o and o[m] with one SELF instruction.
                self.expr(callee, e)?;
                let obj_reg = self.exp_to_any_reg(e)?;
                self.free_exp(e);
                base = self.fs().freereg as u32;
                self.reserve_regs(2)?;
                let mut key = self.string_exp(name);
                self.set_line(line);
                self.code_abrk(OpCode::Self_, base, obj_reg, &mut key)?;
                self.free_exp(&key);
            }
        }

        // Arguments are evaluated left-to-right into consecutive registers.
        let mut multret = false;
        let nargs = args.len();
        for (i, arg) in args.iter().enumerate() {
            let mut ea = ExpDesc::void();
            self.expr(arg, &mut ea)?;
            if i + 1 == nargs && ea.is_multiret() {
                self.set_multi_ret(&mut ea)?;
                multret = true;
            } else {
                self.exp_to_next_reg(&mut ea)?;
            }
        }

        let b = if multret {
            0
        } else {
            self.fs().freereg as u32 - base
        };
        self.set_line(line);
        let pc = self.code_abc(OpCode::Call, base, b, 2)?;
        *e = ExpDesc::new(ExpKind::Call);
        e.info = pc as u32;
        // The call consumes callee and arguments, leaving one result slot.
        self.fs_mut().freereg = base as u8 + 1;
        Ok(())
    }

    // ============ closures ============

    pub(crate) fn function_body(&mut self, body: &FuncBody, e: &mut ExpDesc) -> CgResult<()> {
        self.push_function(body.span.line);
        {
            let fs = self.fs_mut();
            fs.proto.param_count = body.params.len() as u8;
            fs.proto.is_vararg = body.is_vararg;
        }
        for p in &body.params {
            self.new_local(p.clone(), Attrib::None)?;
        }
        self.adjust_local_vars(body.params.len());
        self.reserve_regs(body.params.len() as u32)?;
        if body.is_vararg {
            self.code_abc(OpCode::VarargPrep, body.params.len() as u32, 0, 0)?;
        }
        self.enter_block(false);
        self.statlist(&body.block)?;
        let ret_level = self.fs().freereg as u32;
        self.leave_block()?;
        self.check_pending_gotos()?;
        self.code_abc(OpCode::Return0, ret_level, 1, 0)?;

        let idx = self.pop_function()?;
        let pc = self.code_abx(OpCode::Closure, 0, idx)?;
        *e = ExpDesc::new(ExpKind::Reloc);
        e.info = pc as u32;
        Ok(())
    }

    // ============ table constructors ============

    fn table_constructor(&mut self, fields: &[TableField], e: &mut ExpDesc) -> CgResult<()> {
        let base = self.fs().freereg as u32;
        self.reserve_regs(1)?;
        let pc_new = self.code_abc(OpCode::NewTable, base, 0, 0)?;

        let mut pending: u32 = 0;
        let mut flushed: u32 = 0;
        let mut total_items: u32 = 0;
        let mut hash_count: u32 = 0;
        let nfields = fields.len();

        for (i, field) in fields.iter().enumerate() {
            match field {
                TableField::Item(value) => {
                    let mut ev = ExpDesc::void();
                    self.expr(value, &mut ev)?;
                    total_items += 1;
                    if i + 1 == nfields && ev.is_multiret() {
                        // Trailing call/vararg spreads into the list part.
                        self.set_multi_ret(&mut ev)?;
                        self.set_list(base, flushed, 0)?;
                        pending = 0;
                    } else {
                        self.exp_to_next_reg(&mut ev)?;
                        pending += 1;
                        if pending == FIELDS_PER_FLUSH {
                            self.set_list(base, flushed, pending)?;
                            flushed += pending;
                            pending = 0;
                        }
                    }
                }
                TableField::Named(name, value) => {
                    let mut t = ExpDesc::nonreloc(base);
                    let mut key = self.string_exp(name);
                    self.indexed(&mut t, &mut key)?;
                    let mut ev = ExpDesc::void();
                    self.expr(value, &mut ev)?;
                    self.store_var(&t, &mut ev)?;
                    hash_count += 1;
                }
                TableField::Keyed(key, value) => {
                    let mut t = ExpDesc::nonreloc(base);
                    let mut ek = ExpDesc::void();
                    self.expr(key, &mut ek)?;
                    self.exp_to_val(&mut ek)?;
                    self.indexed(&mut t, &mut ek)?;
                    let mut ev = ExpDesc::void();
                    self.expr(value, &mut ev)?;
                    self.store_var(&t, &mut ev)?;
                    hash_count += 1;
                }
            }
        }
        if pending > 0 {
            self.set_list(base, flushed, pending)?;
        }

        // Patch the size hints now that the field counts are known.
        let instr = &mut self.fs_mut().proto.code[pc_new as usize];
        Instruction::set_b(instr, total_items.min(255));
        Instruction::set_c(instr, hash_count.min(255));

        *e = ExpDesc::nonreloc(base);
        self.fs_mut().freereg = base as u8 + 1;
        Ok(())
    }

    /// Flush pending list items: R[base][start+i] := R[base+i]. `tostore` 0
    /// means "through the stack top" (trailing multi-return).
    fn set_list(&mut self, base: u32, start: u32, tostore: u32) -> CgResult<()> {
        if start <= Instruction::MAX_C {
            self.code_abc(OpCode::SetList, base, tostore, start)?;
        } else {
            let extra = start / (Instruction::MAX_C + 1);
            let c = start % (Instruction::MAX_C + 1);
            self.code_abck(OpCode::SetList, base, tostore, c, true)?;
            self.emit(Instruction::ax(OpCode::ExtraArg, extra))?;
        }
        self.fs_mut().freereg = base as u8 + 1;
        Ok(())
    }

    // ============ binary operators ============

    fn binary_expr(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        line: u32,
        e: &mut ExpDesc,
    ) -> CgResult<()> {
        // Whole-literal concat chains fold to a single string constant.
        if op == BinOp::Concat {
            if let Some(folded) = fold_literal_concat(lhs, rhs) {
                *e = self.string_exp(&folded);
                return Ok(());
            }
        }

        self.expr(lhs, e)?;
        self.infix(op, e)?;
        let mut e2 = ExpDesc::void();
        self.expr(rhs, &mut e2)?;
        self.set_line(line);
        self.posfix(op, e, &mut e2)
    }

    /// Prepare the left operand before the right one is generated.
    fn infix(&mut self, op: BinOp, e: &mut ExpDesc) -> CgResult<()> {
        self.discharge_vars(e)?;
        match op {
            BinOp::And => self.go_if_true(e)?,
            BinOp::Or => self.go_if_false(e)?,
            BinOp::Concat => self.exp_to_next_reg(e)?,
            BinOp::Add
            | BinOp::Sub
            | BinOp::Mul
            | BinOp::Div
            | BinOp::IDiv
            | BinOp::Mod
            | BinOp::Pow
            | BinOp::BAnd
            | BinOp::BOr
            | BinOp::BXor
            | BinOp::Shl
            | BinOp::Shr => {
                if !e.is_numeral() {
                    self.exp_to_any_reg(e)?;
                }
            }
            BinOp::Eq | BinOp::Ne => {
                if !e.is_numeral() && !self.exp_to_k(e)? {
                    self.exp_to_any_reg(e)?;
                }
            }
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                if e.int_fits_sc().is_none() {
                    self.exp_to_any_reg(e)?;
                }
            }
        }
        Ok(())
    }

    fn posfix(&mut self, op: BinOp, e1: &mut ExpDesc, e2: &mut ExpDesc) -> CgResult<()> {
        match op {
            BinOp::And => {
                debug_assert_eq!(e1.t, NO_JUMP);
                self.discharge_vars(e2)?;
                let f = e1.f;
                self.concat_jumps(&mut e2.f, f)?;
                *e1 = *e2;
            }
            BinOp::Or => {
                debug_assert_eq!(e1.f, NO_JUMP);
                self.discharge_vars(e2)?;
                let t = e1.t;
                self.concat_jumps(&mut e2.t, t)?;
                *e1 = *e2;
            }
            BinOp::Concat => {
                self.exp_to_val(e2)?;
                self.code_concat(e1, e2)?;
            }
            BinOp::Add | BinOp::Mul => {
                if !self.const_fold(op, e1, e2)? {
                    self.code_commutative(op, e1, e2)?;
                }
            }
            BinOp::Sub | BinOp::Div | BinOp::IDiv | BinOp::Mod | BinOp::Pow => {
                if !self.const_fold(op, e1, e2)? {
                    self.code_arith(op, e1, e2, false)?;
                }
            }
            BinOp::BAnd | BinOp::BOr | BinOp::BXor => {
                if !self.const_fold(op, e1, e2)? {
                    self.code_arith(op, e1, e2, false)?;
                }
            }
            BinOp::Shl => {
                if !self.const_fold(op, e1, e2)? {
                    if e1.int_fits_sc().is_some() {
                        // imm << x has its own immediate form.
                        std::mem::swap(e1, e2);
                        self.code_bin_i(OpCode::ShlI, Tm::Shl, e1, e2, true)?;
                    } else {
                        self.code_bin_expval(OpCode::Shl, Tm::Shl, e1, e2, false)?;
                    }
                }
            }
            BinOp::Shr => {
                if !self.const_fold(op, e1, e2)? {
                    if e2.int_fits_sc().is_some() {
                        self.code_bin_i(OpCode::ShrI, Tm::Shr, e1, e2, false)?;
                    } else {
                        self.code_bin_expval(OpCode::Shr, Tm::Shr, e1, e2, false)?;
                    }
                }
            }
            BinOp::Eq => self.code_eq(false, e1, e2)?,
            BinOp::Ne => self.code_eq(true, e1, e2)?,
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => self.code_order(op, e1, e2)?,
        }
        Ok(())
    }

    /// `e1 .. e2` with the adjacent-CONCAT merge for chains.
    fn code_concat(&mut self, e1: &mut ExpDesc, e2: &mut ExpDesc) -> CgResult<()> {
        let prev_pc = self.fs().pc() - 1;
        let merged = prev_pc >= 0 && {
            let prev = self.fs().proto.code[prev_pc as usize];
            Instruction::get_opcode(prev) == OpCode::Concat
                && e1.info + 1 == Instruction::get_a(prev)
        };
        if merged {
            let prev = &mut self.fs_mut().proto.code[prev_pc as usize];
            let b = Instruction::get_b(*prev);
            Instruction::set_a(prev, e1.info);
            Instruction::set_b(prev, b + 1);
            self.free_exp(e2);
        } else {
            self.exp_to_next_reg(e2)?;
            self.code_abc(OpCode::Concat, e1.info, 2, 0)?;
            self.free_exp(e2);
        }
        Ok(())
    }

    fn code_commutative(&mut self, op: BinOp, e1: &mut ExpDesc, e2: &mut ExpDesc) -> CgResult<()> {
        let mut flip = false;
        if e1.is_numeral() {
            std::mem::swap(e1, e2);
            flip = true;
        }
        if op == BinOp::Add && e2.int_fits_sc().is_some() {
            self.code_bin_i(OpCode::AddI, Tm::Add, e1, e2, flip)
        } else {
            self.code_arith(op, e1, e2, flip)
        }
    }

    fn code_arith(&mut self, op: BinOp, e1: &mut ExpDesc, e2: &mut ExpDesc, flip: bool) -> CgResult<()> {
        let (op_rr, op_k, tm) = arith_opcodes(op);
        if e2.is_numeral() && self.exp_to_k(e2)? {
            self.code_bin_k(op_k, tm, e1, e2, flip)
        } else {
            self.code_bin_expval(op_rr, tm, e1, e2, flip)
        }
    }

    /// Register/register form plus its MMBIN follow-up.
    fn code_bin_expval(
        &mut self,
        op: OpCode,
        tm: Tm,
        e1: &mut ExpDesc,
        e2: &mut ExpDesc,
        flip: bool,
    ) -> CgResult<()> {
        let v2 = self.exp_to_any_reg(e2)?;
        self.finish_bin_exp(e1, e2, op, v2, OpCode::MmBin, tm, flip)
    }

    /// Register/constant form.
    fn code_bin_k(
        &mut self,
        op: OpCode,
        tm: Tm,
        e1: &mut ExpDesc,
        e2: &mut ExpDesc,
        flip: bool,
    ) -> CgResult<()> {
        debug_assert_eq!(e2.kind, ExpKind::K);
        let v2 = e2.info;
        self.finish_bin_exp(e1, e2, op, v2, OpCode::MmBinK, tm, flip)
    }

    /// Register/immediate form.
    fn code_bin_i(
        &mut self,
        op: OpCode,
        tm: Tm,
        e1: &mut ExpDesc,
        e2: &mut ExpDesc,
        flip: bool,
    ) -> CgResult<()> {
        let im = match e2.int_fits_sc() {
            Some(im) => im,
            None => return Err(self.err("immediate operand out of range")),
        };
        let v2 = (im + Instruction::OFFSET_SC) as u32;
        self.finish_bin_exp(e1, e2, op, v2, OpCode::MmBinI, tm, flip)
    }

    /// Emit the arithmetic instruction with an open destination and the
    /// trailing metamethod hook.
    fn finish_bin_exp(
        &mut self,
        e1: &mut ExpDesc,
        e2: &mut ExpDesc,
        op: OpCode,
        v2: u32,
        mmop: OpCode,
        tm: Tm,
        flip: bool,
    ) -> CgResult<()> {
        let v1 = self.exp_to_any_reg(e1)?;
        let pc = self.code_abc(op, 0, v1, v2)?;
        self.free_exps(e1, e2);
        e1.kind = ExpKind::Reloc;
        e1.info = pc as u32;
        e1.t = NO_JUMP;
        e1.f = NO_JUMP;
        self.code_abck(mmop, v1, v2, tm as u8 as u32, flip)?;
        Ok(())
    }

    fn code_eq(&mut self, ne: bool, e1: &mut ExpDesc, e2: &mut ExpDesc) -> CgResult<()> {
        if !matches!(e1.kind, ExpKind::NonReloc | ExpKind::Local) {
            // Constant on the left: equality is symmetric, put the register
            // operand first.
            std::mem::swap(e1, e2);
        }
        let r1 = self.exp_to_any_reg(e1)?;
        let (op, b) = if e2.int_fits_sc().is_some() && e2.kind == ExpKind::KInt {
            let im = e2.ival as i32;
            (OpCode::EqI, (im + Instruction::OFFSET_SB) as u32)
        } else if self.exp_to_k(e2)? {
            (OpCode::EqK, e2.info)
        } else {
            let r2 = self.exp_to_any_reg(e2)?;
            (OpCode::Eq, r2)
        };
        self.free_exps(e1, e2);
        let pc = self.cond_jump(op, r1, b, 0, !ne)?;
        *e1 = ExpDesc::new(ExpKind::Jmp);
        e1.info = pc as u32;
        Ok(())
    }

    fn code_order(&mut self, op: BinOp, e1: &mut ExpDesc, e2: &mut ExpDesc) -> CgResult<()> {
        let (opcode, a, b);
        match op {
            BinOp::Lt | BinOp::Le => {
                if let Some(im) = e2.int_fits_sc() {
                    a = self.exp_to_any_reg(e1)?;
                    b = (im + Instruction::OFFSET_SB) as u32;
                    opcode = if op == BinOp::Lt {
                        OpCode::LtI
                    } else {
                        OpCode::LeI
                    };
                } else if let Some(im) = e1.int_fits_sc() {
                    // imm < x  <=>  x > imm
                    a = self.exp_to_any_reg(e2)?;
                    b = (im + Instruction::OFFSET_SB) as u32;
                    opcode = if op == BinOp::Lt {
                        OpCode::GtI
                    } else {
                        OpCode::GeI
                    };
                } else {
                    a = self.exp_to_any_reg(e1)?;
                    b = self.exp_to_any_reg(e2)?;
                    opcode = if op == BinOp::Lt { OpCode::Lt } else { OpCode::Le };
                }
            }
            BinOp::Gt | BinOp::Ge => {
                if let Some(im) = e2.int_fits_sc() {
                    a = self.exp_to_any_reg(e1)?;
                    b = (im + Instruction::OFFSET_SB) as u32;
                    opcode = if op == BinOp::Gt {
                        OpCode::GtI
                    } else {
                        OpCode::GeI
                    };
                } else if let Some(im) = e1.int_fits_sc() {
                    // imm > x  <=>  x < imm
                    a = self.exp_to_any_reg(e2)?;
                    b = (im + Instruction::OFFSET_SB) as u32;
                    opcode = if op == BinOp::Gt {
                        OpCode::LtI
                    } else {
                        OpCode::LeI
                    };
                } else {
                    // a > b  <=>  b < a
                    a = self.exp_to_any_reg(e2)?;
                    let r1 = self.exp_to_any_reg(e1)?;
                    self.free_exps(e1, e2);
                    let pc = self.cond_jump(
                        if op == BinOp::Gt { OpCode::Lt } else { OpCode::Le },
                        a,
                        r1,
                        0,
                        true,
                    )?;
                    *e1 = ExpDesc::new(ExpKind::Jmp);
                    e1.info = pc as u32;
                    return Ok(());
                }
            }
            _ => return Err(self.err("internal: not an order operator")),
        }
        self.free_exps(e1, e2);
        let pc = self.cond_jump(opcode, a, b, 0, true)?;
        *e1 = ExpDesc::new(ExpKind::Jmp);
        e1.info = pc as u32;
        Ok(())
    }

    /// Fold arithmetic on numeric literals. Division/modulo by integer zero
    /// and out-of-range shifts fall through to runtime.
    fn const_fold(&mut self, op: BinOp, e1: &mut ExpDesc, e2: &mut ExpDesc) -> CgResult<bool> {
        if !e1.is_numeral() || !e2.is_numeral() {
            return Ok(false);
        }
        let folded: Option<ExpDesc> = match op {
            BinOp::Add | BinOp::Sub | BinOp::Mul => {
                if e1.kind == ExpKind::KInt && e2.kind == ExpKind::KInt {
                    let (a, b) = (e1.ival, e2.ival);
                    Some(ExpDesc::int(match op {
                        BinOp::Add => a.wrapping_add(b),
                        BinOp::Sub => a.wrapping_sub(b),
                        _ => a.wrapping_mul(b),
                    }))
                } else {
                    let (a, b) = (numeral_as_float(e1), numeral_as_float(e2));
                    float_fold(match op {
                        BinOp::Add => a + b,
                        BinOp::Sub => a - b,
                        _ => a * b,
                    })
                }
            }
            BinOp::Div => float_fold(numeral_as_float(e1) / numeral_as_float(e2)),
            BinOp::Pow => float_fold(numeral_as_float(e1).powf(numeral_as_float(e2))),
            BinOp::IDiv => {
                if e1.kind == ExpKind::KInt && e2.kind == ExpKind::KInt {
                    if e2.ival == 0 {
                        None
                    } else {
                        Some(ExpDesc::int(int_floor_div(e1.ival, e2.ival)))
                    }
                } else {
                    float_fold((numeral_as_float(e1) / numeral_as_float(e2)).floor())
                }
            }
            BinOp::Mod => {
                if e1.kind == ExpKind::KInt && e2.kind == ExpKind::KInt {
                    if e2.ival == 0 {
                        None
                    } else {
                        Some(ExpDesc::int(int_mod(e1.ival, e2.ival)))
                    }
                } else {
                    float_fold(float_mod(numeral_as_float(e1), numeral_as_float(e2)))
                }
            }
            BinOp::BAnd | BinOp::BOr | BinOp::BXor => {
                match (numeral_as_int(e1), numeral_as_int(e2)) {
                    (Some(a), Some(b)) => Some(ExpDesc::int(match op {
                        BinOp::BAnd => a & b,
                        BinOp::BOr => a | b,
                        _ => a ^ b,
                    })),
                    _ => None,
                }
            }
            BinOp::Shl | BinOp::Shr => match (numeral_as_int(e1), numeral_as_int(e2)) {
                (Some(a), Some(n)) if (0..64).contains(&n) => {
                    let n = if op == BinOp::Shl { n } else { -n };
                    Some(ExpDesc::int(int_shl(a, n)))
                }
                _ => None,
            },
            _ => None,
        };
        match folded {
            Some(result) => {
                *e1 = result;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ============ unary operators ============

    fn unary_expr(&mut self, op: UnOp, operand: &Expr, line: u32, e: &mut ExpDesc) -> CgResult<()> {
        self.expr(operand, e)?;
        self.set_line(line);
        match op {
            UnOp::Neg => {
                if e.kind == ExpKind::KInt && !e.has_jumps() {
                    e.ival = e.ival.wrapping_neg();
                } else if e.kind == ExpKind::KFlt && !e.has_jumps() {
                    e.nval = -e.nval;
                } else {
                    self.code_unary(OpCode::Unm, e)?;
                }
            }
            UnOp::BNot => {
                if let Some(i) = numeral_as_int_checked(e) {
                    *e = ExpDesc::int(!i);
                } else {
                    self.code_unary(OpCode::BNot, e)?;
                }
            }
            UnOp::Len => self.code_unary(OpCode::Len, e)?,
            UnOp::Not => self.code_not(e)?,
        }
        Ok(())
    }

    fn code_unary(&mut self, op: OpCode, e: &mut ExpDesc) -> CgResult<()> {
        let r = self.exp_to_any_reg(e)?;
        self.free_exp(e);
        let pc = self.code_abc(op, 0, r, 0)?;
        e.kind = ExpKind::Reloc;
        e.info = pc as u32;
        e.t = NO_JUMP;
        e.f = NO_JUMP;
        Ok(())
    }

    fn code_not(&mut self, e: &mut ExpDesc) -> CgResult<()> {
        self.discharge_vars(e)?;
        match e.kind {
            ExpKind::Nil | ExpKind::False => e.kind = ExpKind::True,
            ExpKind::K | ExpKind::KStr | ExpKind::KInt | ExpKind::KFlt | ExpKind::True => {
                e.kind = ExpKind::False
            }
            ExpKind::Jmp => self.negate_condition(e),
            ExpKind::Reloc | ExpKind::NonReloc => {
                self.discharge_to_any_reg_pub(e)?;
                self.free_exp(e);
                let pc = self.code_abc(OpCode::Not, 0, e.info, 0)?;
                e.kind = ExpKind::Reloc;
                e.info = pc as u32;
            }
            _ => return Err(self.err("internal: bad operand to 'not'")),
        }
        std::mem::swap(&mut e.t, &mut e.f);
        self.remove_values(e.f);
        self.remove_values(e.t);
        Ok(())
    }

    pub(crate) fn discharge_to_any_reg_pub(&mut self, e: &mut ExpDesc) -> CgResult<()> {
        if e.kind != ExpKind::NonReloc {
            self.reserve_regs(1)?;
            let reg = self.fs().freereg as u32 - 1;
            self.exp_to_reg(e, reg)?;
        }
        Ok(())
    }
}

fn arith_opcodes(op: BinOp) -> (OpCode, OpCode, Tm) {
    match op {
        BinOp::Add => (OpCode::Add, OpCode::AddK, Tm::Add),
        BinOp::Sub => (OpCode::Sub, OpCode::SubK, Tm::Sub),
        BinOp::Mul => (OpCode::Mul, OpCode::MulK, Tm::Mul),
        BinOp::Mod => (OpCode::Mod, OpCode::ModK, Tm::Mod),
        BinOp::Pow => (OpCode::Pow, OpCode::PowK, Tm::Pow),
        BinOp::Div => (OpCode::Div, OpCode::DivK, Tm::Div),
        BinOp::IDiv => (OpCode::IDiv, OpCode::IDivK, Tm::IDiv),
        BinOp::BAnd => (OpCode::BAnd, OpCode::BAndK, Tm::BAnd),
        BinOp::BOr => (OpCode::BOr, OpCode::BOrK, Tm::BOr),
        BinOp::BXor => (OpCode::BXor, OpCode::BXorK, Tm::BXor),
        // Shifts have immediate forms only; the register form is the
        // fallback for both.
        BinOp::Shl => (OpCode::Shl, OpCode::Shl, Tm::Shl),
        BinOp::Shr => (OpCode::Shr, OpCode::Shr, Tm::Shr),
        _ => unreachable!("not an arithmetic operator"),
    }
}

fn numeral_as_float(e: &ExpDesc) -> f64 {
    if e.kind == ExpKind::KInt {
        e.ival as f64
    } else {
        e.nval
    }
}

/// Integer value of a numeral operand, converting exact floats.
fn numeral_as_int(e: &ExpDesc) -> Option<i64> {
    match e.kind {
        ExpKind::KInt => Some(e.ival),
        ExpKind::KFlt => float_to_integer(e.nval),
        _ => None,
    }
}

fn numeral_as_int_checked(e: &ExpDesc) -> Option<i64> {
    if e.has_jumps() {
        return None;
    }
    numeral_as_int(e)
}

/// Avoid folding floats into NaN or zero (sign of zero must be preserved by
/// runtime arithmetic).
fn float_fold(n: f64) -> Option<ExpDesc> {
    if n.is_nan() || n == 0.0 {
        None
    } else {
        Some(ExpDesc::float(n))
    }
}

/// Fold `"a" .. "b"` chains built purely from string literals.
fn fold_literal_concat(lhs: &Expr, rhs: &Expr) -> Option<String> {
    fn collect(e: &Expr, out: &mut String) -> bool {
        match e {
            Expr::Str(s, _) => {
                out.push_str(s);
                true
            }
            Expr::Binary {
                op: BinOp::Concat,
                lhs,
                rhs,
                ..
            } => collect(lhs, out) && collect(rhs, out),
            _ => false,
        }
    }
    let mut out = String::new();
    if collect(lhs, &mut out) && collect(rhs, &mut out) {
        Some(out)
    } else {
        None
    }
}
