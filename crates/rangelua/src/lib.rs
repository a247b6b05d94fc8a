// RangeLua runtime
// A Lua 5.5 bytecode compiler and register-based VM with a mark-and-sweep GC

#[cfg(test)]
mod test;

pub mod bytecode;
pub mod codegen;
pub mod frontend;
pub mod gc;
pub mod stdlib;
pub mod value;
pub mod vm;

pub use bytecode::{Instruction, OpCode, Proto};
pub use value::Value;
pub use vm::{Control, LuaError, LuaResult, NativeFn, Vm};

/// Compile and run a chunk of Lua source on a fresh VM with the standard
/// libraries opened. Returns the values of the chunk's top-level `return`.
pub fn execute(source: &str) -> LuaResult<Vec<Value>> {
    let mut vm = Vm::new();
    stdlib::open_libs(&mut vm);
    let proto = vm.compile(source, "chunk")?;
    vm.execute(proto)
}

/// Run source on an existing VM instance.
pub fn execute_with_vm(vm: &mut Vm, source: &str) -> LuaResult<Vec<Value>> {
    let proto = vm.compile(source, "chunk")?;
    vm.execute(proto)
}
