//! Moonlet standard library: base functions, coroutines, strings (with the
//! pattern engine), tables and math.

pub mod base_lib;
pub mod coroutine_lib;
pub mod math;
pub mod pattern;
pub mod string_lib;
pub mod table_lib;

use moonlet_core::value::TValue;
use moonlet_vm::vm::Vm;
use moonlet_vm::{LuaError, VmConfig};

/// Register every library into the VM's globals.
pub fn open_libs(vm: &mut Vm) {
    base_lib::register(vm);
    coroutine_lib::register(vm);
    string_lib::register(vm);
    table_lib::register(vm);
    math::register(vm);
}

/// A VM with the standard library loaded.
pub fn new_vm(config: VmConfig) -> Vm {
    let mut vm = Vm::with_config(config);
    open_libs(&mut vm);
    vm
}

/// Compile and run `source` on `vm`.
pub fn execute_source(vm: &mut Vm, source: &str, chunk_name: &str) -> Result<Vec<TValue>, LuaError> {
    tracing::debug!(target: "moonlet::compile", chunk = chunk_name, bytes = source.len(), "executing");
    vm.execute(source, chunk_name)
}
