// Function prototype: the immutable compiled representation of one Lua
// function body.

use std::rc::Rc;

use smol_str::SmolStr;

use crate::value::Value;

/// How a closure binds one upvalue at creation time: from the parent frame's
/// register (`in_stack`) or shared from the parent closure's upvalue list.
#[derive(Debug, Clone)]
pub struct UpvalDesc {
    pub name: SmolStr,
    pub in_stack: bool,
    pub index: u8,
}

#[derive(Debug, Clone)]
pub struct Proto {
    pub code: Vec<u32>,
    /// Constant pool. Strings are interned through the owning VM at compile
    /// time, so these are ready-to-use values.
    pub constants: Vec<Value>,
    pub protos: Vec<Rc<Proto>>,
    pub upvalues: Vec<UpvalDesc>,
    /// Local variable names, for debug output.
    pub locals: Vec<SmolStr>,
    /// Source line per instruction, parallel to `code`.
    pub line_info: Vec<u32>,
    pub source: SmolStr,
    pub line_defined: u32,
    pub param_count: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
}

impl Proto {
    pub fn new(source: SmolStr) -> Self {
        Proto {
            code: Vec::new(),
            constants: Vec::new(),
            protos: Vec::new(),
            upvalues: Vec::new(),
            locals: Vec::new(),
            line_info: Vec::new(),
            source,
            line_defined: 0,
            param_count: 0,
            is_vararg: false,
            max_stack_size: 2,
        }
    }

    /// Source line of the instruction at `pc`, for error messages.
    pub fn line_at(&self, pc: usize) -> u32 {
        self.line_info.get(pc).copied().unwrap_or(0)
    }
}
