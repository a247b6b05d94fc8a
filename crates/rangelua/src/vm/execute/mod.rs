// The instruction dispatch loop. Frames are data in the thread state, so
// Lua-to-Lua calls never recurse on the Rust stack: a call pushes a frame
// and re-enters at 'startfunc, a return pops one. Native calls and
// metamethods run nested dispatch on the same thread.

pub(crate) mod arith;
pub(crate) mod calls;
pub(crate) mod metamethod;
pub(crate) mod table_ops;

use crate::bytecode::{Instruction, OpCode, Tm};
use crate::value::Value;
use crate::vm::execute::arith::{ArithOp, ArithResult};
use crate::vm::execute::calls::CallAction;
use crate::vm::{Control, Vm};

impl Vm {
    /// Execute frames until the frame stack drops back to `target_depth`.
    pub(crate) fn run_to_depth(&mut self, target_depth: usize) -> Result<(), Control> {
        'startfunc: loop {
            if self.exec.frames.len() <= target_depth {
                return Ok(());
            }
            // Collection only ever runs here, between instructions.
            if self.gc.should_collect(&self.pool) {
                crate::gc::collect(self);
            }

            let frame_idx = self.exec.frames.len() - 1;
            let frame = self.exec.frames[frame_idx];
            debug_assert!(!frame.is_native, "native frame reached dispatch");
            let Value::Function(fid) = frame.func else {
                return Err(self.rt_error("internal: non-function frame"));
            };
            let proto = self.pool.closure(fid).proto.clone();
            let mut base = frame.base;
            let mut pc = frame.pc;
            let code = &proto.code;
            let constants = &proto.constants;

            loop {
                if self.gc.should_collect(&self.pool) {
                    crate::gc::collect(self);
                }
                let i = code[pc];
                pc += 1;
                // Keep the frame's pc current for errors, calls and the GC.
                self.exec.frames[frame_idx].pc = pc;

                match Instruction::get_opcode(i) {
                    OpCode::Move => {
                        let v = self.exec.get(base + Instruction::get_b(i) as usize);
                        self.exec.set(base + Instruction::get_a(i) as usize, v);
                    }
                    OpCode::LoadI => {
                        let a = base + Instruction::get_a(i) as usize;
                        self.exec.set(a, Value::Integer(Instruction::get_sbx(i) as i64));
                    }
                    OpCode::LoadF => {
                        let a = base + Instruction::get_a(i) as usize;
                        self.exec.set(a, Value::Float(Instruction::get_sbx(i) as f64));
                    }
                    OpCode::LoadK => {
                        let a = base + Instruction::get_a(i) as usize;
                        let k = constants[Instruction::get_bx(i) as usize];
                        self.exec.set(a, k);
                    }
                    OpCode::LoadKX => {
                        let a = base + Instruction::get_a(i) as usize;
                        let ax = Instruction::get_ax(code[pc]) as usize;
                        pc += 1;
                        self.exec.frames[frame_idx].pc = pc;
                        self.exec.set(a, constants[ax]);
                    }
                    OpCode::LoadFalse => {
                        let a = base + Instruction::get_a(i) as usize;
                        self.exec.set(a, Value::Boolean(false));
                    }
                    OpCode::LFalseSkip => {
                        let a = base + Instruction::get_a(i) as usize;
                        self.exec.set(a, Value::Boolean(false));
                        pc += 1;
                    }
                    OpCode::LoadTrue => {
                        let a = base + Instruction::get_a(i) as usize;
                        self.exec.set(a, Value::Boolean(true));
                    }
                    OpCode::LoadNil => {
                        let a = base + Instruction::get_a(i) as usize;
                        let b = Instruction::get_b(i) as usize;
                        for j in 0..=b {
                            self.exec.set(a + j, Value::Nil);
                        }
                    }

                    // ---- upvalues ----
                    OpCode::GetUpval => {
                        let a = base + Instruction::get_a(i) as usize;
                        let upid =
                            self.pool.closure(fid).upvalues[Instruction::get_b(i) as usize];
                        let v = self.upvalue_get(upid);
                        self.exec.set(a, v);
                    }
                    OpCode::SetUpval => {
                        let v = self.exec.get(base + Instruction::get_a(i) as usize);
                        let upid =
                            self.pool.closure(fid).upvalues[Instruction::get_b(i) as usize];
                        self.upvalue_set(upid, v);
                    }

                    // ---- table reads ----
                    OpCode::GetTabUp => {
                        let a = base + Instruction::get_a(i) as usize;
                        let upid =
                            self.pool.closure(fid).upvalues[Instruction::get_b(i) as usize];
                        let t = self.upvalue_get(upid);
                        let k = constants[Instruction::get_c(i) as usize];
                        let v = self.index_get(t, k)?;
                        self.exec.set(a, v);
                    }
                    OpCode::GetTable => {
                        let a = base + Instruction::get_a(i) as usize;
                        let t = self.exec.get(base + Instruction::get_b(i) as usize);
                        let k = self.exec.get(base + Instruction::get_c(i) as usize);
                        let v = self.index_get(t, k)?;
                        self.exec.set(a, v);
                    }
                    OpCode::GetI => {
                        let a = base + Instruction::get_a(i) as usize;
                        let t = self.exec.get(base + Instruction::get_b(i) as usize);
                        let k = Value::Integer(Instruction::get_c(i) as i64);
                        let v = self.index_get(t, k)?;
                        self.exec.set(a, v);
                    }
                    OpCode::GetField => {
                        let a = base + Instruction::get_a(i) as usize;
                        let t = self.exec.get(base + Instruction::get_b(i) as usize);
                        let k = constants[Instruction::get_c(i) as usize];
                        let v = self.index_get(t, k)?;
                        self.exec.set(a, v);
                    }

                    // ---- table writes ----
                    OpCode::SetTabUp => {
                        let upid =
                            self.pool.closure(fid).upvalues[Instruction::get_a(i) as usize];
                        let t = self.upvalue_get(upid);
                        let k = constants[Instruction::get_b(i) as usize];
                        let v = self.rk_c(i, base, constants);
                        self.index_set(t, k, v)?;
                    }
                    OpCode::SetTable => {
                        let t = self.exec.get(base + Instruction::get_a(i) as usize);
                        let k = self.exec.get(base + Instruction::get_b(i) as usize);
                        let v = self.rk_c(i, base, constants);
                        self.index_set(t, k, v)?;
                    }
                    OpCode::SetI => {
                        let t = self.exec.get(base + Instruction::get_a(i) as usize);
                        let k = Value::Integer(Instruction::get_b(i) as i64);
                        let v = self.rk_c(i, base, constants);
                        self.index_set(t, k, v)?;
                    }
                    OpCode::SetField => {
                        let t = self.exec.get(base + Instruction::get_a(i) as usize);
                        let k = constants[Instruction::get_b(i) as usize];
                        let v = self.rk_c(i, base, constants);
                        self.index_set(t, k, v)?;
                    }

                    OpCode::NewTable => {
                        let a = base + Instruction::get_a(i) as usize;
                        let t = self.pool.new_table(
                            Instruction::get_b(i) as usize,
                            Instruction::get_c(i) as usize,
                        );
                        self.exec.set(a, Value::Table(t));
                    }

                    OpCode::Self_ => {
                        let a = base + Instruction::get_a(i) as usize;
                        let obj = self.exec.get(base + Instruction::get_b(i) as usize);
                        let k = if Instruction::get_k(i) {
                            constants[Instruction::get_c(i) as usize]
                        } else {
                            self.exec.get(base + Instruction::get_c(i) as usize)
                        };
                        self.exec.set(a + 1, obj);
                        let v = self.index_get(obj, k)?;
                        self.exec.set(a, v);
                    }

                    // ---- arithmetic (register-register) ----
                    OpCode::Add => self.arith_rr(i, base, ArithOp::Add, &mut pc)?,
                    OpCode::Sub => self.arith_rr(i, base, ArithOp::Sub, &mut pc)?,
                    OpCode::Mul => self.arith_rr(i, base, ArithOp::Mul, &mut pc)?,
                    OpCode::Mod => self.arith_rr(i, base, ArithOp::Mod, &mut pc)?,
                    OpCode::Pow => self.arith_rr(i, base, ArithOp::Pow, &mut pc)?,
                    OpCode::Div => self.arith_rr(i, base, ArithOp::Div, &mut pc)?,
                    OpCode::IDiv => self.arith_rr(i, base, ArithOp::IDiv, &mut pc)?,
                    OpCode::BAnd => self.arith_rr(i, base, ArithOp::BAnd, &mut pc)?,
                    OpCode::BOr => self.arith_rr(i, base, ArithOp::BOr, &mut pc)?,
                    OpCode::BXor => self.arith_rr(i, base, ArithOp::BXor, &mut pc)?,
                    OpCode::Shl => self.arith_rr(i, base, ArithOp::Shl, &mut pc)?,
                    OpCode::Shr => self.arith_rr(i, base, ArithOp::Shr, &mut pc)?,

                    // ---- arithmetic (register-constant) ----
                    OpCode::AddK => self.arith_rk(i, base, constants, ArithOp::Add, &mut pc)?,
                    OpCode::SubK => self.arith_rk(i, base, constants, ArithOp::Sub, &mut pc)?,
                    OpCode::MulK => self.arith_rk(i, base, constants, ArithOp::Mul, &mut pc)?,
                    OpCode::ModK => self.arith_rk(i, base, constants, ArithOp::Mod, &mut pc)?,
                    OpCode::PowK => self.arith_rk(i, base, constants, ArithOp::Pow, &mut pc)?,
                    OpCode::DivK => self.arith_rk(i, base, constants, ArithOp::Div, &mut pc)?,
                    OpCode::IDivK => self.arith_rk(i, base, constants, ArithOp::IDiv, &mut pc)?,
                    OpCode::BAndK => self.arith_rk(i, base, constants, ArithOp::BAnd, &mut pc)?,
                    OpCode::BOrK => self.arith_rk(i, base, constants, ArithOp::BOr, &mut pc)?,
                    OpCode::BXorK => self.arith_rk(i, base, constants, ArithOp::BXor, &mut pc)?,

                    // ---- arithmetic (register-immediate) ----
                    OpCode::AddI => {
                        let vb = self.exec.get(base + Instruction::get_b(i) as usize);
                        let im = Value::Integer(Instruction::get_sc(i) as i64);
                        self.arith_imm(i, base, ArithOp::Add, vb, im, &mut pc)?;
                    }
                    OpCode::ShrI => {
                        let vb = self.exec.get(base + Instruction::get_b(i) as usize);
                        let im = Value::Integer(Instruction::get_sc(i) as i64);
                        self.arith_imm(i, base, ArithOp::Shr, vb, im, &mut pc)?;
                    }
                    OpCode::ShlI => {
                        // sC << R[B]: the immediate is the left operand.
                        let vb = self.exec.get(base + Instruction::get_b(i) as usize);
                        let im = Value::Integer(Instruction::get_sc(i) as i64);
                        let a = base + Instruction::get_a(i) as usize;
                        match self.arith(ArithOp::Shl, &im, &vb) {
                            ArithResult::Value(v) => {
                                self.exec.set(a, v);
                                pc += 1;
                            }
                            ArithResult::NoNumbers => {}
                            ArithResult::DivByZero => {
                                return Err(self.rt_error("attempt to perform 'n//0'"));
                            }
                        }
                    }

                    // ---- metamethod follow-ups ----
                    OpCode::MmBin => {
                        let v1 = self.exec.get(base + Instruction::get_a(i) as usize);
                        let v2 = self.exec.get(base + Instruction::get_b(i) as usize);
                        self.mm_bin_fallback(i, code, pc, base, v1, v2)?;
                    }
                    OpCode::MmBinI => {
                        let v1 = self.exec.get(base + Instruction::get_a(i) as usize);
                        let v2 = Value::Integer(Instruction::get_sb(i) as i64);
                        self.mm_bin_fallback(i, code, pc, base, v1, v2)?;
                    }
                    OpCode::MmBinK => {
                        let v1 = self.exec.get(base + Instruction::get_a(i) as usize);
                        let v2 = constants[Instruction::get_b(i) as usize];
                        self.mm_bin_fallback(i, code, pc, base, v1, v2)?;
                    }

                    // ---- unary ----
                    OpCode::Unm => {
                        let a = base + Instruction::get_a(i) as usize;
                        let vb = self.exec.get(base + Instruction::get_b(i) as usize);
                        match self.coerce_number(&vb) {
                            Some(Value::Integer(x)) => {
                                self.exec.set(a, Value::Integer(x.wrapping_neg()))
                            }
                            Some(Value::Float(x)) => self.exec.set(a, Value::Float(-x)),
                            _ => {
                                let r = self.try_bin_metamethod(Tm::Unm, vb, vb)?;
                                self.exec.set(a, r);
                            }
                        }
                    }
                    OpCode::BNot => {
                        let a = base + Instruction::get_a(i) as usize;
                        let vb = self.exec.get(base + Instruction::get_b(i) as usize);
                        match self.coerce_integer(&vb) {
                            Some(x) => self.exec.set(a, Value::Integer(!x)),
                            None => {
                                let r = self.try_bin_metamethod(Tm::BNot, vb, vb)?;
                                self.exec.set(a, r);
                            }
                        }
                    }
                    OpCode::Not => {
                        let a = base + Instruction::get_a(i) as usize;
                        let vb = self.exec.get(base + Instruction::get_b(i) as usize);
                        self.exec.set(a, Value::Boolean(!vb.is_truthy()));
                    }
                    OpCode::Len => {
                        let a = base + Instruction::get_a(i) as usize;
                        let vb = self.exec.get(base + Instruction::get_b(i) as usize);
                        let r = self.value_length(vb)?;
                        self.exec.set(a, r);
                    }

                    OpCode::Concat => {
                        let a = base + Instruction::get_a(i) as usize;
                        let n = Instruction::get_b(i) as usize;
                        let r = self.concat_values(a, n)?;
                        self.exec.set(a, r);
                    }

                    // ---- upvalue/TBC management ----
                    OpCode::Close => {
                        self.close_slots(base + Instruction::get_a(i) as usize)?;
                    }
                    OpCode::Tbc => {
                        let slot = base + Instruction::get_a(i) as usize;
                        let v = self.exec.get(slot);
                        if v.is_truthy() {
                            if self.get_metamethod(&v, Tm::Close).is_none() {
                                return Err(self.rt_error(format!(
                                    "variable of type {} got a non-closable value",
                                    v.type_name()
                                )));
                            }
                            self.exec.tbc.push(slot);
                        }
                    }

                    OpCode::Jmp => {
                        pc = (pc as i64 + Instruction::get_sj(i) as i64) as usize;
                        self.exec.frames[frame_idx].pc = pc;
                    }

                    // ---- comparisons ----
                    OpCode::Eq => {
                        let va = self.exec.get(base + Instruction::get_a(i) as usize);
                        let vb = self.exec.get(base + Instruction::get_b(i) as usize);
                        let cond = self.values_equal(va, vb)?;
                        if cond != Instruction::get_k(i) {
                            pc += 1;
                        }
                    }
                    OpCode::Lt => {
                        let va = self.exec.get(base + Instruction::get_a(i) as usize);
                        let vb = self.exec.get(base + Instruction::get_b(i) as usize);
                        let cond = self.less_than(va, vb)?;
                        if cond != Instruction::get_k(i) {
                            pc += 1;
                        }
                    }
                    OpCode::Le => {
                        let va = self.exec.get(base + Instruction::get_a(i) as usize);
                        let vb = self.exec.get(base + Instruction::get_b(i) as usize);
                        let cond = self.less_equal(va, vb)?;
                        if cond != Instruction::get_k(i) {
                            pc += 1;
                        }
                    }
                    OpCode::EqK => {
                        let va = self.exec.get(base + Instruction::get_a(i) as usize);
                        let k = constants[Instruction::get_b(i) as usize];
                        let cond = va.raw_equals(&k);
                        if cond != Instruction::get_k(i) {
                            pc += 1;
                        }
                    }
                    OpCode::EqI => {
                        let va = self.exec.get(base + Instruction::get_a(i) as usize);
                        let cond =
                            va.raw_equals(&Value::Integer(Instruction::get_sb(i) as i64));
                        if cond != Instruction::get_k(i) {
                            pc += 1;
                        }
                    }
                    OpCode::LtI => {
                        let va = self.exec.get(base + Instruction::get_a(i) as usize);
                        let im = Value::Integer(Instruction::get_sb(i) as i64);
                        let cond = self.less_than(va, im)?;
                        if cond != Instruction::get_k(i) {
                            pc += 1;
                        }
                    }
                    OpCode::LeI => {
                        let va = self.exec.get(base + Instruction::get_a(i) as usize);
                        let im = Value::Integer(Instruction::get_sb(i) as i64);
                        let cond = self.less_equal(va, im)?;
                        if cond != Instruction::get_k(i) {
                            pc += 1;
                        }
                    }
                    OpCode::GtI => {
                        let va = self.exec.get(base + Instruction::get_a(i) as usize);
                        let im = Value::Integer(Instruction::get_sb(i) as i64);
                        let cond = self.less_than(im, va)?;
                        if cond != Instruction::get_k(i) {
                            pc += 1;
                        }
                    }
                    OpCode::GeI => {
                        let va = self.exec.get(base + Instruction::get_a(i) as usize);
                        let im = Value::Integer(Instruction::get_sb(i) as i64);
                        let cond = self.less_equal(im, va)?;
                        if cond != Instruction::get_k(i) {
                            pc += 1;
                        }
                    }

                    OpCode::Test => {
                        let va = self.exec.get(base + Instruction::get_a(i) as usize);
                        if !va.is_truthy() == Instruction::get_k(i) {
                            pc += 1;
                        }
                    }
                    OpCode::TestSet => {
                        let vb = self.exec.get(base + Instruction::get_b(i) as usize);
                        if !vb.is_truthy() == Instruction::get_k(i) {
                            pc += 1;
                        } else {
                            self.exec.set(base + Instruction::get_a(i) as usize, vb);
                        }
                    }

                    // ---- calls and returns ----
                    OpCode::Call => {
                        let a = Instruction::get_a(i) as usize;
                        let b = Instruction::get_b(i) as usize;
                        let c = Instruction::get_c(i) as usize;
                        let func_idx = base + a;
                        let nargs = if b == 0 {
                            self.exec.top - func_idx - 1
                        } else {
                            b - 1
                        };
                        let nres = c as i32 - 1;
                        match self.call_at(func_idx, nargs, nres)? {
                            CallAction::Entered => continue 'startfunc,
                            CallAction::Native => {}
                        }
                    }
                    OpCode::TailCall => {
                        if Instruction::get_k(i) {
                            self.close_slots(base)?;
                        }
                        let a = Instruction::get_a(i) as usize;
                        let b = Instruction::get_b(i) as usize;
                        let func_idx = base + a;
                        let nargs = if b == 0 {
                            self.exec.top - func_idx - 1
                        } else {
                            b - 1
                        };
                        let frame = self.exec.frames[frame_idx];
                        // Slide callee and arguments down; the stack must
                        // not grow on a tail call.
                        for j in 0..=nargs {
                            let v = self.exec.get(func_idx + j);
                            self.exec.set(frame.ret_dest + j, v);
                        }
                        self.exec.top = frame.ret_dest + nargs + 1;
                        self.exec.frames.pop();
                        match self.call_at(frame.ret_dest, nargs, frame.nresults)? {
                            CallAction::Entered | CallAction::Native => continue 'startfunc,
                        }
                    }
                    OpCode::Return => {
                        let a_idx = base + Instruction::get_a(i) as usize;
                        let b = Instruction::get_b(i) as usize;
                        let nret = if b == 0 {
                            self.exec.top.saturating_sub(a_idx)
                        } else {
                            b - 1
                        };
                        if Instruction::get_k(i) {
                            self.close_slots(base)?;
                        }
                        self.do_return(frame_idx, a_idx, nret);
                        continue 'startfunc;
                    }
                    OpCode::Return0 => {
                        self.do_return(frame_idx, base, 0);
                        continue 'startfunc;
                    }
                    OpCode::Return1 => {
                        let a_idx = base + Instruction::get_a(i) as usize;
                        self.do_return(frame_idx, a_idx, 1);
                        continue 'startfunc;
                    }

                    // ---- numeric for ----
                    OpCode::ForPrep => {
                        let a = base + Instruction::get_a(i) as usize;
                        let bx = Instruction::get_bx(i) as usize;
                        if self.for_prep(a)? {
                            pc += bx + 1; // empty loop: skip body and FORLOOP
                            self.exec.frames[frame_idx].pc = pc;
                        }
                    }
                    OpCode::ForLoop => {
                        let a = base + Instruction::get_a(i) as usize;
                        let bx = Instruction::get_bx(i) as usize;
                        if self.for_loop(a)? {
                            pc -= bx;
                            self.exec.frames[frame_idx].pc = pc;
                        }
                    }

                    // ---- generic for ----
                    OpCode::TForPrep => {
                        let a = base + Instruction::get_a(i) as usize;
                        let bx = Instruction::get_bx(i) as usize;
                        // The 4th control slot is to-be-closed.
                        let closing = self.exec.get(a + 3);
                        if closing.is_truthy() {
                            if self.get_metamethod(&closing, Tm::Close).is_none() {
                                return Err(self.rt_error(
                                    "variable in 'for' loop got a non-closable value",
                                ));
                            }
                            self.exec.tbc.push(a + 3);
                        }
                        pc += bx;
                        self.exec.frames[frame_idx].pc = pc;
                    }
                    OpCode::TForCall => {
                        let a = base + Instruction::get_a(i) as usize;
                        let c = Instruction::get_c(i) as usize;
                        // Copy iterator, state and control above the loop
                        // registers, then call for `c` results.
                        let func = self.exec.get(a);
                        let state = self.exec.get(a + 1);
                        let control = self.exec.get(a + 2);
                        self.exec.set(a + 4, func);
                        self.exec.set(a + 5, state);
                        self.exec.set(a + 6, control);
                        self.exec.top = a + 7;
                        match self.call_at(a + 4, 2, c as i32)? {
                            CallAction::Entered => continue 'startfunc,
                            CallAction::Native => {}
                        }
                    }
                    OpCode::TForLoop => {
                        let a = base + Instruction::get_a(i) as usize;
                        let bx = Instruction::get_bx(i) as usize;
                        let ctrl = self.exec.get(a + 4);
                        if !ctrl.is_nil() {
                            self.exec.set(a + 2, ctrl);
                            pc -= bx;
                            self.exec.frames[frame_idx].pc = pc;
                        }
                    }

                    OpCode::SetList => {
                        let a = base + Instruction::get_a(i) as usize;
                        let b = Instruction::get_b(i) as usize;
                        let mut start = Instruction::get_c(i) as i64;
                        let mut n = b;
                        if b == 0 {
                            n = self.exec.top.saturating_sub(a + 1);
                        }
                        if Instruction::get_k(i) {
                            start +=
                                Instruction::get_ax(code[pc]) as i64 * (Instruction::MAX_C as i64 + 1);
                            pc += 1;
                            self.exec.frames[frame_idx].pc = pc;
                        }
                        let Some(tid) = self.exec.get(a).as_table_id() else {
                            return Err(self.rt_error("internal: SETLIST target is not a table"));
                        };
                        for j in 1..=n {
                            let v = self.exec.get(a + j);
                            self.pool.table_mut(tid).set_int(start + j as i64, v);
                        }
                        self.exec.top = self.exec.frames[frame_idx].top;
                    }

                    OpCode::Closure => {
                        let a = base + Instruction::get_a(i) as usize;
                        let bx = Instruction::get_bx(i) as usize;
                        let child = proto.protos[bx].clone();
                        let mut ups = Vec::with_capacity(child.upvalues.len());
                        for ud in &child.upvalues {
                            if ud.in_stack {
                                ups.push(self.find_or_create_upvalue(base + ud.index as usize));
                            } else {
                                ups.push(self.pool.closure(fid).upvalues[ud.index as usize]);
                            }
                        }
                        let f = self.pool.new_closure(child, ups);
                        self.exec.set(a, Value::Function(f));
                    }

                    // ---- varargs ----
                    OpCode::Vararg => {
                        let a = base + Instruction::get_a(i) as usize;
                        let c = Instruction::get_c(i) as usize;
                        let nextra = self.exec.frames[frame_idx].nextra;
                        let vstart = base - 1 - nextra;
                        if c == 0 {
                            if a + nextra > self.config.stack_limit {
                                return Err(self.rt_error("stack overflow"));
                            }
                            for j in 0..nextra {
                                let v = self.exec.get(vstart + j);
                                self.exec.set(a + j, v);
                            }
                            self.exec.top = a + nextra;
                        } else {
                            let want = c - 1;
                            for j in 0..want {
                                let v = if j < nextra {
                                    self.exec.get(vstart + j)
                                } else {
                                    Value::Nil
                                };
                                self.exec.set(a + j, v);
                            }
                        }
                    }
                    OpCode::VarargPrep => {
                        let nparams = Instruction::get_a(i) as usize;
                        let nargs = self.exec.top.saturating_sub(base);
                        let nextra = nargs.saturating_sub(nparams);
                        if nextra > 0 && self.exec.frames[frame_idx].nextra == 0 {
                            // Relocate the frame above the extra arguments:
                            // [func][fixed..][extra..][func'][fixed'..]
                            let new_func = base + nargs;
                            let frame = self.exec.frames[frame_idx];
                            let new_base = new_func + 1;
                            let new_top = new_base + proto.max_stack_size as usize;
                            if new_top > self.config.stack_limit {
                                return Err(self.rt_error("stack overflow"));
                            }
                            self.exec.ensure_stack(new_top);
                            self.exec.set(new_func, frame.func);
                            for j in 0..nparams {
                                let v = self.exec.get(base + j);
                                self.exec.set(new_base + j, v);
                                self.exec.set(base + j, Value::Nil);
                            }
                            let fr = &mut self.exec.frames[frame_idx];
                            fr.base = new_base;
                            fr.nextra = nextra;
                            fr.top = new_top;
                            base = new_base;
                            self.exec.top = new_base + nparams;
                        }
                    }

                    OpCode::ExtraArg => {
                        return Err(self.rt_error("internal: stray EXTRAARG"));
                    }
                }
            }
        }
    }

    /// Pop the current frame and deliver `nret` results starting at `a_idx`.
    fn do_return(&mut self, frame_idx: usize, a_idx: usize, nret: usize) {
        let frame = self.exec.frames[frame_idx];
        self.exec.frames.truncate(frame_idx);
        for j in 0..nret {
            let v = self.exec.get(a_idx + j);
            self.exec.set(frame.ret_dest + j, v);
        }
        if frame.nresults < 0 {
            self.exec.top = frame.ret_dest + nret;
        } else {
            let want = frame.nresults as usize;
            for j in nret..want {
                self.exec.set(frame.ret_dest + j, Value::Nil);
            }
            self.exec.top = frame.ret_dest + want;
        }
    }

    /// RK(C): constant when the k bit is set, register otherwise.
    #[inline]
    fn rk_c(&self, i: u32, base: usize, constants: &[Value]) -> Value {
        if Instruction::get_k(i) {
            constants[Instruction::get_c(i) as usize]
        } else {
            self.exec.get(base + Instruction::get_c(i) as usize)
        }
    }

    fn arith_rr(
        &mut self,
        i: u32,
        base: usize,
        op: ArithOp,
        pc: &mut usize,
    ) -> Result<(), Control> {
        let vb = self.exec.get(base + Instruction::get_b(i) as usize);
        let vc = self.exec.get(base + Instruction::get_c(i) as usize);
        self.arith_store(i, base, op, vb, vc, pc)
    }

    fn arith_rk(
        &mut self,
        i: u32,
        base: usize,
        constants: &[Value],
        op: ArithOp,
        pc: &mut usize,
    ) -> Result<(), Control> {
        let vb = self.exec.get(base + Instruction::get_b(i) as usize);
        let vc = constants[Instruction::get_c(i) as usize];
        self.arith_store(i, base, op, vb, vc, pc)
    }

    fn arith_imm(
        &mut self,
        i: u32,
        base: usize,
        op: ArithOp,
        vb: Value,
        im: Value,
        pc: &mut usize,
    ) -> Result<(), Control> {
        self.arith_store(i, base, op, vb, im, pc)
    }

    /// Shared arithmetic tail: store on success and skip the MMBIN
    /// follow-up, fall through on a coercion miss.
    fn arith_store(
        &mut self,
        i: u32,
        base: usize,
        op: ArithOp,
        vb: Value,
        vc: Value,
        pc: &mut usize,
    ) -> Result<(), Control> {
        match self.arith(op, &vb, &vc) {
            ArithResult::Value(v) => {
                self.exec.set(base + Instruction::get_a(i) as usize, v);
                *pc += 1;
                Ok(())
            }
            ArithResult::NoNumbers => Ok(()),
            ArithResult::DivByZero => Err(self.rt_error(if op == ArithOp::IDiv {
                "attempt to perform 'n//0'"
            } else {
                "attempt to perform 'n%%0'"
            })),
        }
    }

    /// MMBIN family: the preceding arithmetic instruction fell through, so
    /// dispatch its metamethod; the result lands in that instruction's A.
    fn mm_bin_fallback(
        &mut self,
        i: u32,
        code: &[u32],
        pc: usize,
        base: usize,
        v1: Value,
        v2: Value,
    ) -> Result<(), Control> {
        let tm = Tm::from_u8(Instruction::get_c(i) as u8);
        let prev = code[pc - 2];
        let dest = base + Instruction::get_a(prev) as usize;
        let (x, y) = if Instruction::get_k(i) {
            (v2, v1)
        } else {
            (v1, v2)
        };
        let r = self.try_bin_metamethod(tm, x, y)?;
        self.exec.set(dest, r);
        Ok(())
    }

    /// FORPREP: type-check and prime the control values. Returns true when
    /// the loop body must be skipped.
    fn for_prep(&mut self, a: usize) -> Result<bool, Control> {
        let start = self.exec.get(a);
        let limit = self.exec.get(a + 1);
        let step = self.exec.get(a + 2);

        if let (Value::Integer(s), Value::Integer(l), Value::Integer(st)) = (start, limit, step) {
            if st == 0 {
                return Err(self.rt_error("'for' step is zero"));
            }
            if (st > 0 && s > l) || (st < 0 && s < l) {
                return Ok(true);
            }
            // Counter-based iteration avoids overflow at the range ends.
            let count: u64 = if st > 0 {
                (l as u64).wrapping_sub(s as u64) / (st as u64)
            } else {
                (s as u64).wrapping_sub(l as u64) / ((st as i128).unsigned_abs() as u64)
            };
            self.exec.set(a + 1, Value::Integer(count as i64));
            self.exec.set(a + 3, Value::Integer(s));
            return Ok(false);
        }

        let (Some(s), Some(l), Some(st)) = (
            start.as_float(),
            limit.as_float(),
            step.as_float(),
        ) else {
            let culprit = if !start.is_number() {
                "initial"
            } else if !limit.is_number() {
                "limit"
            } else {
                "step"
            };
            return Err(self.rt_error(format!("'for' {culprit} value must be a number")));
        };
        if st == 0.0 {
            return Err(self.rt_error("'for' step is zero"));
        }
        if (st > 0.0 && s > l) || (st < 0.0 && s < l) {
            return Ok(true);
        }
        self.exec.set(a, Value::Float(s));
        self.exec.set(a + 1, Value::Float(l));
        self.exec.set(a + 2, Value::Float(st));
        self.exec.set(a + 3, Value::Float(s));
        Ok(false)
    }

    /// FORLOOP: advance the counter; true means branch back to the body.
    fn for_loop(&mut self, a: usize) -> Result<bool, Control> {
        match (self.exec.get(a), self.exec.get(a + 1), self.exec.get(a + 2)) {
            (Value::Integer(idx), Value::Integer(count), Value::Integer(step)) => {
                let count = count as u64;
                if count > 0 {
                    let next = idx.wrapping_add(step);
                    self.exec.set(a, Value::Integer(next));
                    self.exec.set(a + 1, Value::Integer((count - 1) as i64));
                    self.exec.set(a + 3, Value::Integer(next));
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            (Value::Float(idx), Value::Float(limit), Value::Float(step)) => {
                let next = idx + step;
                let more = if step > 0.0 {
                    next <= limit
                } else {
                    next >= limit
                };
                if more {
                    self.exec.set(a, Value::Float(next));
                    self.exec.set(a + 3, Value::Float(next));
                }
                Ok(more)
            }
            _ => Err(self.rt_error("internal: corrupt 'for' control values")),
        }
    }
}
