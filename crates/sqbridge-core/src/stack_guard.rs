use std::ops::{Deref, DerefMut};

use crate::vm::Vm;

/// Restores the VM stack depth when dropped.
///
/// Anything pushed while the guard is alive is popped on every exit path,
/// including early returns through `?`.
pub struct StackGuard<'vm> {
    vm: &'vm mut Vm,
    depth: usize,
}

impl<'vm> StackGuard<'vm> {
    pub(crate) fn new(vm: &'vm mut Vm) -> Self {
        let depth = vm.stack_depth();
        Self { vm, depth }
    }

    /// Depth the stack will be restored to.
    pub fn depth(&self) -> usize {
        self.depth
    }
}

impl Deref for StackGuard<'_> {
    type Target = Vm;

    fn deref(&self) -> &Vm {
        self.vm
    }
}

impl DerefMut for StackGuard<'_> {
    fn deref_mut(&mut self) -> &mut Vm {
        self.vm
    }
}

impl Drop for StackGuard<'_> {
    fn drop(&mut self) {
        self.vm.truncate_stack(self.depth);
    }
}

#[cfg(test)]
mod tests {
    use crate::value::Value;
    use crate::vm::Vm;

    #[test]
    fn guard_restores_depth() {
        let mut vm = Vm::new();
        vm.push(Value::Integer(1));
        {
            let mut guard = vm.guard();
            guard.push(Value::Integer(2));
            guard.push(Value::Integer(3));
            assert_eq!(guard.top(), 3);
        }
        assert_eq!(vm.top(), 1);
    }

    #[test]
    fn guard_restores_after_error() {
        fn failing(vm: &mut Vm) -> Result<(), crate::VmError> {
            let mut guard = vm.guard();
            guard.push(Value::Null);
            guard.pop(5)?;
            Ok(())
        }

        let mut vm = Vm::new();
        assert!(failing(&mut vm).is_err());
        assert_eq!(vm.top(), 0);
    }
}
