//! Compiled script handles.

use std::fs;
use std::path::Path;

use sqbridge_core::Vm;
use tracing::debug;

use crate::error::{BindError, BindResult};
use crate::handle::{Function, Object};

/// A compiled script, run with the root table as `this`.
///
/// Compilation goes through the compiler installed with
/// [`Vm::set_compiler`](sqbridge_core::Vm::set_compiler).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    main: Object,
}

impl Script {
    /// Compile `source`, naming it `source_name` in diagnostics.
    pub fn compile_string(vm: &mut Vm, source: &str, source_name: &str) -> BindResult<Self> {
        let main = vm.compile_buffer(source, source_name)?;
        Ok(Self {
            main: Object::from_value(vm, main),
        })
    }

    /// Read and compile a script file.
    pub fn compile_file(vm: &mut Vm, path: impl AsRef<Path>) -> BindResult<Self> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|err| BindError::ScriptRead {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        debug!(target: "sqbridge::vm", path = %path.display(), bytes = source.len(), "read script file");
        Self::compile_string(vm, &source, &path.display().to_string())
    }

    pub fn is_null(&self) -> bool {
        self.main.is_null()
    }

    /// Run the script's main function.
    pub fn run(&self, vm: &mut Vm) -> BindResult<()> {
        let root = Object::from_value(vm, vm.root_table());
        Function::new(root, self.main.clone()).execute(vm, ())
    }

    pub fn release(&mut self) {
        self.main.release();
    }
}
