// Single-pass code generator: walks the AST once, emitting bytecode with
// on-the-fly register allocation, deferred expressions, short-circuit jump
// patching and scope/upvalue resolution. No other component allocates
// registers, emits instructions or patches jumps.

mod exp2reg;
mod expdesc;
mod expr;
mod helpers;
mod stmt;

pub(crate) use expdesc::{ExpDesc, ExpKind, NO_JUMP};

use ahash::AHashMap;
use smol_str::SmolStr;

use crate::bytecode::{Instruction, OpCode, Proto};
use crate::frontend::ast::{Attrib, Block};
use crate::gc::StringId;
use crate::value::Value;
use crate::vm::{CompileError, Vm};

pub(crate) type CgResult<T> = Result<T, CompileError>;

/// Register ceiling; register 255 doubles as the NO_REG marker in TESTSET.
pub(crate) const MAX_REGS: u32 = 255;
pub(crate) const NO_REG: u32 = MAX_REGS;
pub(crate) const MAX_VARS: usize = 255;
pub(crate) const MAX_UPVALUES: usize = 255;
/// List items accumulated before a SETLIST flush.
pub(crate) const FIELDS_PER_FLUSH: u32 = 50;

/// Key for constant-pool deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum ConstKey {
    Nil,
    True,
    False,
    Int(i64),
    Float(u64),
    Str(StringId),
}

#[derive(Debug)]
pub(crate) struct LocalVar {
    pub name: SmolStr,
    pub attrib: Attrib,
    /// Captured by some inner closure; scope exit must close its slot.
    pub captured: bool,
}

/// Per-block bookkeeping (the BlockCnt of the reference compiler).
#[derive(Debug)]
pub(crate) struct BlockCnt {
    /// Number of active locals outside this block.
    pub nactvar: u8,
    pub first_label: usize,
    pub first_goto: usize,
    /// Some local declared in this block is captured as an upvalue.
    pub upval: bool,
    pub is_loop: bool,
    pub inside_tbc: bool,
}

#[derive(Debug)]
pub(crate) struct LabelDesc {
    pub name: SmolStr,
    pub pc: i32,
    pub nactvar: u8,
}

#[derive(Debug)]
pub(crate) struct GotoDesc {
    pub name: SmolStr,
    /// pc of the pending JMP.
    pub pc: i32,
    pub line: u32,
    pub nactvar: u8,
    /// Leaving a block with captured locals; target label must close.
    pub needs_close: bool,
}

/// Compilation state of one function body.
pub(crate) struct FuncState {
    pub proto: Proto,
    pub kmap: AHashMap<ConstKey, u32>,
    pub actvar: Vec<LocalVar>,
    pub blocks: Vec<BlockCnt>,
    pub labels: Vec<LabelDesc>,
    pub gotos: Vec<GotoDesc>,
    /// Number of active locals (== register level of the locals).
    pub nactvar: u8,
    /// First free register.
    pub freereg: u8,
    /// Function has captured locals or TBC slots; RETURN carries the close
    /// bit.
    pub needclose: bool,
    /// Current source line, stamped onto emitted instructions.
    pub line: u32,
}

impl FuncState {
    fn new(source: SmolStr, line: u32) -> Self {
        let mut proto = Proto::new(source);
        proto.line_defined = line;
        FuncState {
            proto,
            kmap: AHashMap::new(),
            actvar: Vec::new(),
            blocks: Vec::new(),
            labels: Vec::new(),
            gotos: Vec::new(),
            nactvar: 0,
            freereg: 0,
            needclose: false,
            line,
        }
    }

    #[inline]
    pub fn pc(&self) -> i32 {
        self.proto.code.len() as i32
    }
}

/// Result of name resolution.
pub(crate) enum VarKind {
    Local(u32, u32),
    Upvalue(u32),
    Global,
}

pub struct Codegen<'vm> {
    pub(crate) vm: &'vm mut Vm,
    pub(crate) fs: Vec<FuncState>,
    pub(crate) chunk_name: SmolStr,
}

/// Compile a parsed chunk into its main prototype. The main chunk is a
/// vararg function closed over a single upvalue `_ENV`.
pub fn compile_chunk(vm: &mut Vm, block: &Block, chunk_name: &str) -> Result<Proto, CompileError> {
    let mut cg = Codegen {
        vm,
        fs: Vec::new(),
        chunk_name: SmolStr::new(chunk_name),
    };
    cg.fs.push(FuncState::new(cg.chunk_name.clone(), 0));
    {
        let fs = cg.fs_mut();
        fs.proto.is_vararg = true;
        fs.proto.upvalues.push(crate::bytecode::UpvalDesc {
            name: SmolStr::new("_ENV"),
            in_stack: true,
            index: 0,
        });
    }
    cg.emit(Instruction::abc(OpCode::VarargPrep, 0, 0, 0))?;

    cg.enter_block(false);
    cg.statlist(block)?;
    let ret_level = cg.fs().freereg as u32;
    cg.leave_block()?;
    cg.check_pending_gotos()?;
    cg.emit(Instruction::abc(OpCode::Return, ret_level, 1, 0))?;
    cg.finish_function();

    let fs = match cg.fs.pop() {
        Some(fs) => fs,
        None => unreachable!("function state stack underflow"),
    };
    Ok(fs.proto)
}

impl<'vm> Codegen<'vm> {
    #[inline]
    pub(crate) fn fs(&self) -> &FuncState {
        match self.fs.last() {
            Some(fs) => fs,
            None => unreachable!("function state stack underflow"),
        }
    }

    #[inline]
    pub(crate) fn fs_mut(&mut self) -> &mut FuncState {
        match self.fs.last_mut() {
            Some(fs) => fs,
            None => unreachable!("function state stack underflow"),
        }
    }

    pub(crate) fn err(&self, message: impl Into<String>) -> CompileError {
        CompileError::new(message, self.chunk_name.as_str(), self.fs().line)
    }

    // ============ scopes and variables ============

    pub(crate) fn enter_block(&mut self, is_loop: bool) {
        let fs = self.fs_mut();
        let inside_tbc = fs.blocks.last().map(|b| b.inside_tbc).unwrap_or(false);
        let block = BlockCnt {
            nactvar: fs.nactvar,
            first_label: fs.labels.len(),
            first_goto: fs.gotos.len(),
            upval: false,
            is_loop,
            inside_tbc,
        };
        fs.blocks.push(block);
    }

    pub(crate) fn leave_block(&mut self) -> CgResult<()> {
        let (nactvar, is_loop, upval, first_label, first_goto) = {
            let fs = self.fs_mut();
            let bl = match fs.blocks.pop() {
                Some(b) => b,
                None => unreachable!("block stack underflow"),
            };
            (bl.nactvar, bl.is_loop, bl.upval, bl.first_label, bl.first_goto)
        };

        self.remove_vars(nactvar);
        let level = nactvar as u32;

        let mut has_close = false;
        if is_loop {
            has_close = self.create_label_from(&SmolStr::new("break"), level, first_goto)?;
        }
        let in_nested_block = !self.fs().blocks.is_empty();
        if !has_close && in_nested_block && upval {
            self.emit(Instruction::abc(OpCode::Close, level, 0, 0))?;
        }
        let fs = self.fs_mut();
        fs.freereg = nactvar;
        fs.labels.truncate(first_label);

        // Move pending gotos out to the enclosing block, flagging them when
        // they escape a block with captured locals.
        for g in fs.gotos.iter_mut().skip(first_goto) {
            if g.nactvar > nactvar {
                g.nactvar = nactvar;
            }
            if upval {
                g.needs_close = true;
            }
        }
        Ok(())
    }

    fn remove_vars(&mut self, to_level: u8) {
        let fs = self.fs_mut();
        while fs.nactvar > to_level {
            fs.nactvar -= 1;
            fs.actvar.pop();
        }
    }

    /// Declare a local; it becomes active (visible) only after
    /// `adjust_local_vars`.
    pub(crate) fn new_local(&mut self, name: SmolStr, attrib: Attrib) -> CgResult<()> {
        if self.fs().actvar.len() >= MAX_VARS {
            return Err(self.err("too many local variables"));
        }
        let fs = self.fs_mut();
        fs.proto.locals.push(name.clone());
        fs.actvar.push(LocalVar {
            name,
            attrib,
            captured: false,
        });
        Ok(())
    }

    /// Activate the last `n` declared locals, pinning the registers their
    /// values already occupy. Does not move the free-register mark.
    pub(crate) fn adjust_local_vars(&mut self, n: usize) {
        let fs = self.fs_mut();
        fs.nactvar += n as u8;
    }

    /// Register level below which registers are pinned by locals.
    #[inline]
    pub(crate) fn nvarstack(&self) -> u32 {
        self.fs().nactvar as u32
    }

    /// Resolve a name: innermost scope outward, then captured upvalues, then
    /// global.
    pub(crate) fn resolve_name(&mut self, name: &str) -> CgResult<VarKind> {
        let top = self.fs.len() - 1;
        self.resolve_in(top, name)
    }

    fn resolve_in(&mut self, level: usize, name: &str) -> CgResult<VarKind> {
        // Active local of this function? Declared-but-inactive locals (the
        // tail beyond nactvar) must not shadow anything yet.
        let nactvar = self.fs[level].nactvar as usize;
        if let Some(vidx) = self.fs[level].actvar[..nactvar]
            .iter()
            .rposition(|v| v.name.as_str() == name)
        {
            return Ok(VarKind::Local(vidx as u32, vidx as u32));
        }
        // Already-captured upvalue?
        if let Some(idx) = self.fs[level]
            .proto
            .upvalues
            .iter()
            .position(|u| u.name.as_str() == name)
        {
            return Ok(VarKind::Upvalue(idx as u32));
        }
        if level == 0 {
            return Ok(VarKind::Global);
        }
        // Capture from the enclosing function.
        match self.resolve_in(level - 1, name)? {
            VarKind::Local(reg, vidx) => {
                self.mark_captured(level - 1, vidx);
                self.add_upvalue(level, name, true, reg)
            }
            VarKind::Upvalue(idx) => self.add_upvalue(level, name, false, idx),
            VarKind::Global => Ok(VarKind::Global),
        }
    }

    fn add_upvalue(&mut self, level: usize, name: &str, in_stack: bool, index: u32) -> CgResult<VarKind> {
        if self.fs[level].proto.upvalues.len() >= MAX_UPVALUES {
            return Err(self.err("too many upvalues"));
        }
        let fs = &mut self.fs[level];
        fs.proto.upvalues.push(crate::bytecode::UpvalDesc {
            name: SmolStr::new(name),
            in_stack,
            index: index as u8,
        });
        Ok(VarKind::Upvalue((fs.proto.upvalues.len() - 1) as u32))
    }

    /// A local was captured by an inner function: flag it and the block that
    /// declared it, so scope exit emits CLOSE.
    fn mark_captured(&mut self, level: usize, vidx: u32) {
        let fs = &mut self.fs[level];
        if let Some(var) = fs.actvar.get_mut(vidx as usize) {
            var.captured = true;
        }
        for bl in fs.blocks.iter_mut().rev() {
            if (bl.nactvar as u32) <= vidx {
                bl.upval = true;
                break;
            }
        }
        fs.needclose = true;
    }

    /// The local's attribute, for assignment checking.
    pub(crate) fn local_attrib(&self, vidx: u32) -> Attrib {
        self.fs()
            .actvar
            .get(vidx as usize)
            .map(|v| v.attrib)
            .unwrap_or(Attrib::None)
    }

    // ============ labels and gotos ============

    /// Record a pending goto (or break) and emit its jump.
    pub(crate) fn pending_goto(&mut self, name: &SmolStr) -> CgResult<()> {
        let line = self.fs().line;
        let nactvar = self.fs().nactvar;
        let pc = self.jump()?;
        self.fs_mut().gotos.push(GotoDesc {
            name: name.clone(),
            pc,
            line,
            nactvar,
            needs_close: false,
        });
        Ok(())
    }

    /// Define a label here, resolving every matching pending goto. Returns
    /// true if a CLOSE was emitted on behalf of a resolved goto.
    pub(crate) fn create_label(&mut self, name: &SmolStr, level: u32) -> CgResult<bool> {
        let first_goto = self.fs().blocks.last().map(|b| b.first_goto).unwrap_or(0);
        self.create_label_from(name, level, first_goto)
    }

    fn create_label_from(&mut self, name: &SmolStr, level: u32, first_goto: usize) -> CgResult<bool> {
        let mut matched: Vec<i32> = Vec::new();
        let mut needs_close = false;
        {
            let fs = self.fs_mut();
            let mut i = first_goto;
            while i < fs.gotos.len() {
                if fs.gotos[i].name == *name {
                    let g = fs.gotos.remove(i);
                    needs_close |= g.needs_close;
                    matched.push(g.pc);
                } else {
                    i += 1;
                }
            }
        }
        if matched.is_empty() {
            return Ok(false);
        }
        // Gotos land on the CLOSE when one is needed, so arriving through
        // them closes the abandoned scope.
        let here = self.fs().pc();
        if needs_close {
            self.emit(Instruction::abc(OpCode::Close, level, 0, 0))?;
        }
        for pc in matched {
            self.patch_list(pc, here)?;
        }
        Ok(needs_close)
    }

    /// Record an explicit `::label::` for backward gotos.
    pub(crate) fn define_label(&mut self, name: &SmolStr) -> CgResult<()> {
        let nactvar = self.fs().nactvar;
        if self
            .fs()
            .labels
            .iter()
            .skip(self.fs().blocks.last().map(|b| b.first_label).unwrap_or(0))
            .any(|l| l.name == *name)
        {
            return Err(self.err(format!("label '{name}' already defined")));
        }
        self.create_label(name, nactvar as u32)?;
        let pc = self.fs().pc();
        self.fs_mut().labels.push(LabelDesc {
            name: name.clone(),
            pc,
            nactvar,
        });
        Ok(())
    }

    /// At function end, every pending goto except breaks must have matched a
    /// label.
    pub(crate) fn check_pending_gotos(&mut self) -> CgResult<()> {
        if let Some(g) = self.fs().gotos.first() {
            let msg = if g.name.as_str() == "break" {
                format!("break outside a loop at line {}", g.line)
            } else {
                format!("no visible label '{}' for goto at line {}", g.name, g.line)
            };
            return Err(self.err(msg));
        }
        Ok(())
    }

    // ============ finishing ============

    /// Final pass over the emitted code: widen RETURN0/RETURN1 to RETURN with
    /// the close bit when the function has captured locals or TBC slots.
    pub(crate) fn finish_function(&mut self) {
        let fs = self.fs_mut();
        if !fs.needclose {
            return;
        }
        for pc in 0..fs.proto.code.len() {
            let i = fs.proto.code[pc];
            match Instruction::get_opcode(i) {
                OpCode::Return0 => {
                    fs.proto.code[pc] =
                        Instruction::abck(OpCode::Return, Instruction::get_a(i), 1, 0, true);
                }
                OpCode::Return1 => {
                    fs.proto.code[pc] =
                        Instruction::abck(OpCode::Return, Instruction::get_a(i), 2, 0, true);
                }
                OpCode::Return | OpCode::TailCall => {
                    let mut updated = i;
                    Instruction::set_k(&mut updated, true);
                    fs.proto.code[pc] = updated;
                }
                _ => {}
            }
        }
    }

    /// Compile a nested function body and return its prototype index in the
    /// enclosing prototype.
    pub(crate) fn push_function(&mut self, line: u32) {
        self.fs.push(FuncState::new(self.chunk_name.clone(), line));
    }

    pub(crate) fn pop_function(&mut self) -> CgResult<u32> {
        self.finish_function();
        let fs = match self.fs.pop() {
            Some(fs) => fs,
            None => unreachable!("function state stack underflow"),
        };
        let parent = self.fs_mut();
        parent.proto.protos.push(std::rc::Rc::new(fs.proto));
        Ok((parent.proto.protos.len() - 1) as u32)
    }

    // ============ constants ============

    pub(crate) fn add_constant(&mut self, key: ConstKey, value: Value) -> u32 {
        let fs = self.fs_mut();
        if let Some(&idx) = fs.kmap.get(&key) {
            return idx;
        }
        let idx = fs.proto.constants.len() as u32;
        fs.proto.constants.push(value);
        fs.kmap.insert(key, idx);
        idx
    }

    pub(crate) fn string_k(&mut self, s: &str) -> u32 {
        let id = self.vm.pool.intern(s);
        self.add_constant(ConstKey::Str(id), Value::String(id))
    }

    pub(crate) fn int_k(&mut self, i: i64) -> u32 {
        self.add_constant(ConstKey::Int(i), Value::Integer(i))
    }

    pub(crate) fn float_k(&mut self, n: f64) -> u32 {
        self.add_constant(ConstKey::Float(n.to_bits()), Value::Float(n))
    }

    pub(crate) fn nil_k(&mut self) -> u32 {
        self.add_constant(ConstKey::Nil, Value::Nil)
    }

    pub(crate) fn bool_k(&mut self, b: bool) -> u32 {
        self.add_constant(
            if b { ConstKey::True } else { ConstKey::False },
            Value::Boolean(b),
        )
    }
}
