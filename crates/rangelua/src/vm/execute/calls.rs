// The calling convention: frame setup for Lua and native callees, result
// placement, protected calls, the upvalue open/close protocol, to-be-closed
// unwinding and coroutine switching.

use crate::bytecode::Tm;
use crate::gc::{ThreadId, UpvalueId, UpvalueState};
use crate::value::Value;
use crate::vm::state::{CallFrame, OpenUpvalue, ThreadState, ThreadStatus};
use crate::vm::{Control, Vm};

/// What `call_at` did with the callee.
pub(crate) enum CallAction {
    /// A Lua frame was pushed; dispatch must re-enter at 'startfunc.
    Entered,
    /// A native function ran to completion; results are already placed.
    Native,
}

impl Vm {
    /// Set up a call: the callee sits at `func_idx`, `nargs` arguments
    /// follow it. `nresults` is the caller's expectation (-1 = all).
    pub(crate) fn call_at(
        &mut self,
        func_idx: usize,
        nargs: usize,
        nresults: i32,
    ) -> Result<CallAction, Control> {
        let mut func = self.exec.get(func_idx);
        let mut nargs = nargs;

        // Resolve __call chains: the original callee becomes the first
        // argument of its handler.
        let mut hops = 0;
        while !func.is_function() {
            let Some(h) = self.get_metamethod(&func, Tm::Call) else {
                return Err(self.rt_error(format!(
                    "attempt to call a {} value",
                    func.type_name()
                )));
            };
            hops += 1;
            if hops > 8 {
                return Err(self.rt_error("'__call' chain too long; possible loop"));
            }
            self.exec.ensure_stack(func_idx + nargs + 2);
            for i in (func_idx..=func_idx + nargs).rev() {
                let v = self.exec.get(i);
                self.exec.set(i + 1, v);
            }
            self.exec.set(func_idx, h);
            if self.exec.top > func_idx {
                self.exec.top += 1;
            }
            nargs += 1;
            func = h;
        }

        match func {
            Value::Function(id) => {
                if self.exec.frames.len() >= self.config.call_depth_limit {
                    return Err(self.rt_error("stack overflow"));
                }
                let proto = self.pool.closure(id).proto.clone();
                let base = func_idx + 1;
                let frame_top = base + proto.max_stack_size as usize;
                if frame_top + nargs > self.config.stack_limit {
                    return Err(self.rt_error("stack overflow"));
                }
                self.exec.ensure_stack(frame_top.max(base + nargs));
                // Missing fixed parameters read as nil.
                for i in nargs..proto.param_count as usize {
                    self.exec.set(base + i, Value::Nil);
                }
                self.exec.top = base + nargs.max(proto.param_count as usize);
                self.exec.frames.push(CallFrame {
                    func,
                    base,
                    ret_dest: func_idx,
                    top: frame_top,
                    pc: 0,
                    nresults,
                    nextra: 0,
                    is_native: false,
                });
                Ok(CallAction::Entered)
            }
            Value::Native(f) => {
                if self.exec.frames.len() >= self.config.call_depth_limit {
                    return Err(self.rt_error("stack overflow"));
                }
                let base = func_idx + 1;
                self.exec.frames.push(CallFrame {
                    func,
                    base,
                    ret_dest: func_idx,
                    top: base + nargs,
                    pc: 0,
                    nresults,
                    nextra: 0,
                    is_native: true,
                });
                let args: Vec<Value> = (0..nargs).map(|i| self.exec.get(base + i)).collect();
                match f(self, args) {
                    Ok(results) => {
                        self.exec.frames.pop();
                        self.place_results(func_idx, results, nresults);
                        Ok(CallAction::Native)
                    }
                    // A yield keeps its native frame: resuming delivers the
                    // resume arguments through it.
                    Err(y @ Control::Yield(_)) => Err(y),
                    Err(e) => {
                        self.exec.frames.pop();
                        Err(e)
                    }
                }
            }
            _ => Err(self.rt_error("attempt to call a non-function value")),
        }
    }

    /// Write call results to `dest`, padding or truncating to the caller's
    /// expectation, and fix the stack top.
    pub(crate) fn place_results(&mut self, dest: usize, results: Vec<Value>, nresults: i32) {
        let n = results.len();
        for (i, v) in results.into_iter().enumerate() {
            self.exec.set(dest + i, v);
        }
        if nresults < 0 {
            self.exec.top = dest + n;
        } else {
            let want = nresults as usize;
            for i in n..want {
                self.exec.set(dest + i, Value::Nil);
            }
            self.exec.top = dest + want;
        }
    }

    /// Call a function value with arguments, running nested dispatch on the
    /// current thread, and collect all results. This is a native-call
    /// boundary: a yield crossing it is an error.
    pub fn call(&mut self, f: Value, args: Vec<Value>) -> Result<Vec<Value>, Control> {
        // Push above the running frame's register ceiling: the logical top
        // is only maintained at call boundaries, so slots between it and
        // the frame ceiling may hold live registers.
        let ceiling = self.exec.frames.last().map(|fr| fr.top).unwrap_or(0);
        let func_idx = self.exec.top.max(ceiling);
        self.exec.top = func_idx;
        self.exec.push(f);
        for a in args {
            self.exec.push(a);
        }
        let nargs = self.exec.top - func_idx - 1;
        let entry_depth = self.exec.frames.len();

        let run = (|| -> Result<(), Control> {
            match self.call_at(func_idx, nargs, -1)? {
                CallAction::Entered => self.run_to_depth(entry_depth),
                CallAction::Native => Ok(()),
            }
        })();
        match run {
            Ok(()) => {}
            Err(Control::Yield(_)) => {
                return Err(self.rt_error("attempt to yield across a C-call boundary"));
            }
            Err(e) => return Err(e),
        }

        let results: Vec<Value> = (func_idx..self.exec.top)
            .map(|i| self.exec.get(i))
            .collect();
        self.exec.top = func_idx;
        Ok(results)
    }

    /// Protected call: on error, restore the stack, frames and upvalue list
    /// to their state at entry and hand back `(false, error value)`.
    pub fn call_protected(
        &mut self,
        f: Value,
        args: Vec<Value>,
    ) -> Result<(bool, Vec<Value>), Control> {
        let top0 = self.exec.top;
        let depth0 = self.exec.frames.len();
        let tbc0 = self.exec.tbc.len();

        match self.call(f, args) {
            Ok(values) => Ok((true, values)),
            Err(Control::Error(errval)) => {
                // To-be-closed slots above the boundary close during the
                // unwind; a __close error supersedes the original one.
                let errval = self.unwind_tbc(tbc0, errval);
                self.close_upvalues_from(top0);
                self.exec.frames.truncate(depth0);
                self.exec.top = top0;
                self.last_error = Value::Nil;
                Ok((false, vec![errval]))
            }
            Err(y @ Control::Yield(_)) => Err(y),
        }
    }

    /// Run every pending `__close` above the mark, in reverse declaration
    /// order, folding close errors over the original.
    fn unwind_tbc(&mut self, tbc_floor: usize, mut errval: Value) -> Value {
        while self.exec.tbc.len() > tbc_floor {
            let slot = match self.exec.tbc.pop() {
                Some(s) => s,
                None => break,
            };
            let v = self.exec.get(slot);
            if !v.is_truthy() {
                continue;
            }
            if let Some(h) = self.get_metamethod(&v, Tm::Close) {
                match self.call(h, vec![v, errval]) {
                    Ok(_) => {}
                    Err(Control::Error(e2)) => errval = e2,
                    Err(Control::Yield(_)) => {}
                }
            }
        }
        errval
    }

    // ============ upvalues ============

    /// Find or create the open upvalue cell for a stack slot; all closures
    /// capturing the slot share it. The list stays sorted by descending
    /// slot.
    pub(crate) fn find_or_create_upvalue(&mut self, slot: usize) -> UpvalueId {
        let mut insert_at = None;
        for (i, o) in self.exec.open_upvalues.iter().enumerate() {
            if o.slot == slot {
                return o.id;
            }
            if o.slot < slot {
                insert_at = Some(i);
                break;
            }
        }
        let id = self.pool.new_upvalue_open(self.current_thread, slot);
        match insert_at {
            Some(i) => self.exec.open_upvalues.insert(i, OpenUpvalue { slot, id }),
            None => self.exec.open_upvalues.push(OpenUpvalue { slot, id }),
        }
        id
    }

    /// Close every open upvalue at or above `level`: the value moves from
    /// the stack into the cell.
    pub(crate) fn close_upvalues_from(&mut self, level: usize) {
        while let Some(head) = self.exec.open_upvalues.first().copied() {
            if head.slot < level {
                break;
            }
            self.exec.open_upvalues.remove(0);
            let v = self.exec.get(head.slot);
            self.pool.upvalue_mut(head.id).close(v);
        }
    }

    /// The CLOSE instruction: close upvalues and run `__close` handlers at
    /// or above `level`.
    pub(crate) fn close_slots(&mut self, level: usize) -> Result<(), Control> {
        self.close_upvalues_from(level);
        while let Some(&slot) = self.exec.tbc.last() {
            if slot < level {
                break;
            }
            self.exec.tbc.pop();
            let v = self.exec.get(slot);
            if !v.is_truthy() {
                continue;
            }
            if let Some(h) = self.get_metamethod(&v, Tm::Close) {
                self.call(h, vec![v, Value::Nil])?;
            }
        }
        Ok(())
    }

    /// Read through an upvalue cell.
    pub(crate) fn upvalue_get(&self, id: UpvalueId) -> Value {
        match self.pool.upvalue(id).state {
            UpvalueState::Closed(v) => v,
            UpvalueState::Open { thread, slot } => {
                if thread == self.current_thread {
                    self.exec.get(slot)
                } else {
                    self.pool
                        .threads
                        .get(thread.0)
                        .and_then(|t| t.state.as_ref())
                        .map(|s| s.get(slot))
                        .unwrap_or(Value::Nil)
                }
            }
        }
    }

    /// Write through an upvalue cell.
    pub(crate) fn upvalue_set(&mut self, id: UpvalueId, v: Value) {
        match self.pool.upvalue(id).state {
            UpvalueState::Closed(_) => {
                self.pool.upvalue_mut(id).state = UpvalueState::Closed(v);
            }
            UpvalueState::Open { thread, slot } => {
                if thread == self.current_thread {
                    self.exec.set(slot, v);
                } else if let Some(t) = self.pool.threads.get_mut(thread.0) {
                    if let Some(s) = t.state.as_mut() {
                        s.set(slot, v);
                    }
                }
            }
        }
    }

    // ============ coroutines ============

    pub fn coroutine_create(&mut self, f: Value) -> Result<Value, Control> {
        if !f.is_function() {
            return Err(self.rt_error("cannot create a coroutine from a non-function"));
        }
        let id = self.pool.new_thread(f, Some(ThreadState::new()));
        Ok(Value::Thread(id))
    }

    /// Resume a coroutine: park the current thread state, load the target's
    /// and run it until it yields, returns or errors.
    pub fn coroutine_resume(
        &mut self,
        co: ThreadId,
        args: Vec<Value>,
    ) -> Result<(bool, Vec<Value>), Control> {
        if co == self.current_thread || self.resume_chain.contains(&co) {
            let msg = self.create_string("cannot resume non-suspended coroutine");
            return Ok((false, vec![msg]));
        }
        let status = self
            .pool
            .thread(co)
            .state
            .as_ref()
            .map(|s| s.status)
            .unwrap_or(ThreadStatus::Running);
        if !matches!(status, ThreadStatus::Ready | ThreadStatus::Suspended) {
            let msg = self.create_string("cannot resume dead coroutine");
            return Ok((false, vec![msg]));
        }

        let Some(target_state) = self.pool.take_thread_state(co) else {
            let msg = self.create_string("cannot resume non-suspended coroutine");
            return Ok((false, vec![msg]));
        };

        // Swap: the caller's whole state parks in its arena slot so the GC
        // still sees its stack while the target runs.
        let caller = self.current_thread;
        let caller_state = std::mem::replace(&mut self.exec, target_state);
        self.pool.park_thread_state(caller, caller_state);
        self.resume_chain.push(caller);
        self.current_thread = co;

        let run_result: Result<(), Control> = (|| {
            self.exec.status = ThreadStatus::Running;
            if status == ThreadStatus::Ready {
                // First resume: call the entry function with the arguments.
                let entry = self.pool.thread(co).entry;
                let func_idx = self.exec.top;
                self.exec.push(entry);
                for a in args {
                    self.exec.push(a);
                }
                let nargs = self.exec.top - func_idx - 1;
                match self.call_at(func_idx, nargs, -1)? {
                    CallAction::Entered => self.run_to_depth(0),
                    CallAction::Native => Ok(()),
                }
            } else {
                // Deliver the resume arguments as the pending yield's
                // results, then continue where the thread left off.
                if let Some(frame) = self.exec.frames.last().copied() {
                    if frame.is_native {
                        self.exec.frames.pop();
                        self.place_results(frame.ret_dest, args, frame.nresults);
                    }
                }
                self.run_to_depth(0)
            }
        })();

        // Swap back.
        let caller_state = match self.pool.take_thread_state(caller) {
            Some(s) => s,
            None => ThreadState::new(),
        };
        let mut co_state = std::mem::replace(&mut self.exec, caller_state);
        self.current_thread = caller;
        self.resume_chain.pop();

        match run_result {
            Ok(()) => {
                let values: Vec<Value> = (0..co_state.top).map(|i| co_state.get(i)).collect();
                co_state.status = ThreadStatus::Finished;
                co_state.top = 0;
                self.pool.park_thread_state(co, co_state);
                Ok((true, values))
            }
            Err(Control::Yield(values)) => {
                co_state.status = ThreadStatus::Suspended;
                self.pool.park_thread_state(co, co_state);
                Ok((true, values))
            }
            Err(Control::Error(e)) => {
                co_state.status = ThreadStatus::Error;
                self.pool.park_thread_state(co, co_state);
                Ok((false, vec![e]))
            }
        }
    }

    /// Yield out of the innermost resume. Raised as a control signal; native
    /// boundaries in between turn it into an error.
    pub fn coroutine_yield(&mut self, values: Vec<Value>) -> Control {
        if self.resume_chain.is_empty() {
            return self.rt_error("attempt to yield from outside a coroutine");
        }
        Control::Yield(values)
    }
}
