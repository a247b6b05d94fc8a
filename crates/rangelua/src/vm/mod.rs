// Global VM state: the object pool, the collector, the global/registry
// tables, the currently executing thread (inline) and the thread arena for
// suspended coroutines.

pub mod error;
pub(crate) mod execute;
pub mod state;

pub use error::{CompileError, Control, LuaError, LuaResult, RuntimeError};

use std::rc::{Rc, Weak};

use smol_str::SmolStr;

use crate::bytecode::{Proto, TM_COUNT, Tm, validate};
use crate::codegen;
use crate::frontend;
use crate::gc::{Gc, ObjectPool, StringId, TableId, ThreadId};
use crate::value::Value;
use crate::vm::state::{ThreadState, ThreadStatus};

/// Native function: opaque callable taking the VM and an argument vector.
pub type NativeFn = fn(&mut Vm, Vec<Value>) -> Result<Vec<Value>, Control>;

/// Execution limits.
pub struct VmConfig {
    /// Hard ceiling on the value stack, in slots.
    pub stack_limit: usize,
    /// Maximum number of simultaneously active call frames.
    pub call_depth_limit: usize,
    /// Maximum `__index`/`__newindex` chain length before reporting a loop.
    pub index_chain_limit: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            stack_limit: 1 << 20,
            call_depth_limit: 256,
            index_chain_limit: 100,
        }
    }
}

/// Interned metamethod names, also GC roots.
pub(crate) struct ConstNames {
    pub tm: [StringId; TM_COUNT],
}

impl ConstNames {
    fn new(pool: &mut ObjectPool) -> Self {
        let mut tm = [StringId(0); TM_COUNT];
        for (i, slot) in tm.iter_mut().enumerate() {
            *slot = pool.intern(Tm::from_u8(i as u8).name());
        }
        ConstNames { tm }
    }

    pub fn all(&self) -> impl Iterator<Item = StringId> + '_ {
        self.tm.iter().copied()
    }
}

pub struct Vm {
    /// All heap objects; public so embedders can intern strings and walk
    /// tables directly.
    pub pool: ObjectPool,
    pub(crate) gc: Gc,
    pub(crate) globals: TableId,
    pub(crate) registry: TableId,
    /// The running thread's state, inline for direct access. Its arena slot
    /// is empty while it runs.
    pub(crate) exec: ThreadState,
    pub(crate) current_thread: ThreadId,
    pub(crate) main_thread: ThreadId,
    /// Threads waiting on a nested resume, outermost first.
    pub(crate) resume_chain: Vec<ThreadId>,
    /// Every live compiled prototype; roots its constants.
    pub(crate) protos: Vec<Weak<Proto>>,
    pub(crate) names: ConstNames,
    /// Shared metatable for all strings (set by the string library).
    pub(crate) string_mt: Option<TableId>,
    /// Error value in flight; rooted so unwinding cannot lose it.
    pub(crate) last_error: Value,
    pub(crate) last_traceback: String,
    pub(crate) config: VmConfig,
    /// Generator behind math.random.
    pub(crate) rng: rand::rngs::StdRng,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let mut pool = ObjectPool::new();
        let names = ConstNames::new(&mut pool);
        let globals = pool.new_table(0, 32);
        let registry = pool.new_table(2, 4);
        let main_thread = pool.new_thread(Value::Nil, None);

        let mut vm = Vm {
            pool,
            gc: Gc::new(),
            globals,
            registry,
            exec: ThreadState::new(),
            current_thread: main_thread,
            main_thread,
            resume_chain: Vec::new(),
            protos: Vec::new(),
            names,
            string_mt: None,
            last_error: Value::Nil,
            last_traceback: String::new(),
            config,
            rng: rand::SeedableRng::from_entropy(),
        };

        // The registry protects the global table and the main thread.
        vm.pool
            .table_mut(registry)
            .set_int(1, Value::Table(globals));
        vm.pool
            .table_mut(registry)
            .set_int(2, Value::Thread(main_thread));
        vm.set_global("_G", Value::Table(globals));
        let version = vm.create_string("Lua 5.5");
        vm.set_global("_VERSION", version);
        vm
    }

    // ============ compilation ============

    /// Compile source text to a prototype tree, validating the result.
    pub fn compile(&mut self, source: &str, chunk_name: &str) -> LuaResult<Rc<Proto>> {
        let ast = frontend::parse_chunk(source).map_err(|e| {
            LuaError::Compile(CompileError::new(e.to_string(), chunk_name, e.line))
        })?;
        let proto = codegen::compile_chunk(self, &ast, chunk_name).map_err(LuaError::Compile)?;
        if let Err(msg) = validate::validate_proto(&proto) {
            return Err(LuaError::Compile(CompileError::new(
                format!("internal: generated bytecode failed validation: {msg}"),
                chunk_name,
                0,
            )));
        }
        tracing::debug!(
            chunk = chunk_name,
            instructions = proto.code.len(),
            constants = proto.constants.len(),
            "chunk compiled"
        );
        let proto = Rc::new(proto);
        self.protos.push(Rc::downgrade(&proto));
        Ok(proto)
    }

    /// Register an externally loaded prototype (deserialized chunks) so its
    /// constants are rooted.
    pub fn adopt_proto(&mut self, proto: Rc<Proto>) -> Rc<Proto> {
        self.protos.push(Rc::downgrade(&proto));
        proto
    }

    // ============ execution ============

    /// Instantiate a prototype as the main chunk (closed over `_ENV`) and
    /// run it to completion.
    pub fn execute(&mut self, proto: Rc<Proto>) -> LuaResult<Vec<Value>> {
        let env = self.pool.new_upvalue_closed(Value::Table(self.globals));
        let f = self.pool.new_closure(proto, vec![env]);
        self.call_toplevel(Value::Function(f), Vec::new())
    }

    /// Compile and run in one step.
    pub fn execute_str(&mut self, source: &str, chunk_name: &str) -> LuaResult<Vec<Value>> {
        let proto = self.compile(source, chunk_name)?;
        self.execute(proto)
    }

    fn call_toplevel(&mut self, f: Value, args: Vec<Value>) -> LuaResult<Vec<Value>> {
        self.exec.status = ThreadStatus::Running;
        let result = self.call(f, args);
        match result {
            Ok(values) => {
                self.exec.status = ThreadStatus::Finished;
                debug_assert!(self.exec.frames.is_empty());
                debug_assert!(self.exec.open_upvalues.is_empty());
                // Ready for the next chunk on the same VM.
                self.exec.top = 0;
                self.exec.status = ThreadStatus::Ready;
                Ok(values)
            }
            Err(Control::Error(errval)) => {
                self.exec.status = ThreadStatus::Error;
                let message = self.display_value(errval);
                let traceback = std::mem::take(&mut self.last_traceback);
                // An error is terminal for this execution, not for the VM.
                self.exec.frames.clear();
                self.exec.open_upvalues.clear();
                self.exec.tbc.clear();
                self.exec.top = 0;
                self.exec.status = ThreadStatus::Ready;
                self.last_error = Value::Nil;
                Err(LuaError::Runtime(RuntimeError { message, traceback }))
            }
            Err(Control::Yield(_)) => Err(LuaError::Runtime(RuntimeError {
                message: "attempt to yield from outside a coroutine".to_string(),
                traceback: String::new(),
            })),
        }
    }

    // ============ object creation ============

    pub fn create_string(&mut self, s: &str) -> Value {
        Value::String(self.pool.intern(s))
    }

    pub fn create_string_owned(&mut self, s: String) -> Value {
        Value::String(self.pool.intern_owned(s))
    }

    pub fn create_table(&mut self, array_hint: usize, hash_hint: usize) -> Value {
        Value::Table(self.pool.new_table(array_hint, hash_hint))
    }

    // ============ globals ============

    pub fn get_global(&mut self, name: &str) -> Value {
        let key = self.create_string(name);
        self.pool.table(self.globals).get(&key)
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        let key = self.create_string(name);
        let globals = self.globals;
        let _ = self.pool.table_mut(globals).set(key, value);
    }

    /// Register a native function under a global name.
    pub fn register_native(&mut self, name: &str, f: NativeFn) {
        self.set_global(name, Value::Native(f));
    }

    // ============ GC ============

    /// Run a full collection cycle now.
    pub fn collect_garbage(&mut self) {
        crate::gc::collect(self);
    }

    pub fn gc_live_objects(&self) -> usize {
        self.pool.live_objects()
    }

    pub fn gc_allocated_bytes(&self) -> usize {
        self.pool.allocated_bytes
    }

    // ============ errors and tracebacks ============

    /// Raise a runtime error with the current source location prefixed.
    pub(crate) fn rt_error(&mut self, message: impl Into<String>) -> Control {
        let message = message.into();
        let located = match self.current_location() {
            Some((source, line)) => format!("{source}:{line}: {message}"),
            None => message,
        };
        let value = self.create_string_owned(located);
        self.throw_value(value)
    }

    /// Raise an arbitrary Lua value as an error (the `error` builtin).
    pub(crate) fn throw_value(&mut self, value: Value) -> Control {
        self.last_error = value;
        self.last_traceback = self.build_traceback();
        Control::Error(value)
    }

    /// Location of the instruction currently executing.
    pub(crate) fn current_location(&self) -> Option<(SmolStr, u32)> {
        for frame in self.exec.frames.iter().rev() {
            if frame.is_native {
                continue;
            }
            if let Value::Function(id) = frame.func {
                let proto = &self.pool.closure(id).proto;
                let pc = frame.pc.saturating_sub(1);
                return Some((proto.source.clone(), proto.line_at(pc)));
            }
        }
        None
    }

    /// Render the frame stack, innermost first.
    pub(crate) fn build_traceback(&self) -> String {
        let mut out = String::new();
        let total = self.exec.frames.len();
        for (i, frame) in self.exec.frames.iter().enumerate().rev() {
            if !out.is_empty() {
                out.push('\n');
            }
            if frame.is_native {
                out.push_str("\tin a C function");
            } else if let Value::Function(id) = frame.func {
                let proto = &self.pool.closure(id).proto;
                let line = proto.line_at(frame.pc.saturating_sub(1));
                if i == 0 && self.current_thread == self.main_thread && total > 0 {
                    out.push_str(&format!("\t{}:{}: in main chunk", proto.source, line));
                } else {
                    out.push_str(&format!(
                        "\t{}:{}: in function <{}:{}>",
                        proto.source, line, proto.source, proto.line_defined
                    ));
                }
            }
        }
        out
    }

    // ============ value display ============

    /// Raw `tostring` without metamethods, used for error rendering and the
    /// default print path.
    pub fn display_value(&self, v: Value) -> String {
        match v {
            Value::Nil => "nil".to_string(),
            Value::Boolean(b) => b.to_string(),
            Value::Integer(i) => {
                let mut buf = itoa::Buffer::new();
                buf.format(i).to_string()
            }
            Value::Float(n) => execute::arith::float_to_lua_string(n),
            Value::String(id) => self.pool.str(id).to_string(),
            Value::Table(id) => format!("table: 0x{:08x}", id.0),
            Value::Function(id) => format!("function: 0x{:08x}", id.0),
            Value::Native(f) => format!("function: builtin: {:p}", f as *const ()),
            Value::Userdata(id) => format!("userdata: 0x{:08x}", id.0),
            Value::Thread(id) => format!("thread: 0x{:08x}", id.0),
        }
    }

    /// Status string of a coroutine, from the current thread's perspective.
    pub fn thread_status(&self, id: ThreadId) -> &'static str {
        if id == self.current_thread {
            return "running";
        }
        if self.resume_chain.contains(&id) {
            return "normal";
        }
        match self.pool.thread(id).state.as_ref().map(|s| s.status) {
            Some(ThreadStatus::Ready) | Some(ThreadStatus::Suspended) => "suspended",
            Some(ThreadStatus::Finished) | Some(ThreadStatus::Error) => "dead",
            Some(ThreadStatus::Running) | None => "running",
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}
