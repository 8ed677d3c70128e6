use crate::error::VmError;
use crate::value::Value;
use crate::vm::Vm;

/// An external compiler that turns source text into a callable value.
///
/// The VM itself has no parser; a compiler installed with
/// [`Vm::set_compiler`] produces a closure (usually by registering native
/// closures that drive the VM) which [`Vm::compile_buffer`] returns.
pub trait ScriptCompiler {
    fn compile(&mut self, vm: &mut Vm, source: &str, source_name: &str) -> Result<Value, VmError>;
}

impl<F> ScriptCompiler for F
where
    F: FnMut(&mut Vm, &str, &str) -> Result<Value, VmError>,
{
    fn compile(&mut self, vm: &mut Vm, source: &str, source_name: &str) -> Result<Value, VmError> {
        self(vm, source, source_name)
    }
}
