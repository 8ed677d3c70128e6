//! VM-scoped binding state.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use sqbridge_core::{TypeHash, Vm};

use crate::config::BindingConfig;
use crate::error::{BindError, BindResult};
use crate::type_registry::{TypeDescriptor, TypeRegistry};

/// Binding state owned by one VM: the type registry, the configuration and
/// the error slot.
///
/// Stored in the VM's extension map, so every VM has its own registry and
/// two VMs never observe each other's bindings.
#[derive(Debug, Default)]
pub struct BindingContext {
    types: RefCell<TypeRegistry>,
    config: Cell<BindingConfig>,
    last_error: RefCell<Option<BindError>>,
}

impl BindingContext {
    /// Get the context of `vm`, creating it on first use.
    pub fn of(vm: &mut Vm) -> Rc<BindingContext> {
        vm.extensions_mut()
            .get_or_insert_with(|| Rc::new(BindingContext::default()))
            .clone()
    }

    /// Get the context of `vm` if bindings have been used on it.
    pub fn get(vm: &Vm) -> Option<Rc<BindingContext>> {
        vm.extensions().get::<Rc<BindingContext>>().cloned()
    }

    pub fn types(&self) -> &RefCell<TypeRegistry> {
        &self.types
    }

    pub fn config(&self) -> BindingConfig {
        self.config.get()
    }

    pub fn set_config(&self, config: BindingConfig) {
        self.config.set(config);
    }

    /// Descriptor of a registered type.
    pub fn descriptor(&self, hash: TypeHash) -> Option<Rc<TypeDescriptor>> {
        self.types.borrow().get(hash)
    }

    /// Descriptor of `T`, or `UnregisteredType`.
    pub fn descriptor_of<T: 'static>(&self) -> BindResult<Rc<TypeDescriptor>> {
        self.descriptor(TypeHash::of::<T>())
            .ok_or_else(|| BindError::UnregisteredType(std::any::type_name::<T>().to_string()))
    }

    pub fn last_error(&self) -> Option<BindError> {
        self.last_error.borrow().clone()
    }

    pub(crate) fn record_error(&self, err: BindError) {
        *self.last_error.borrow_mut() = Some(err);
    }

    pub(crate) fn clear_error(&self) {
        self.last_error.borrow_mut().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_created_once_per_vm() {
        let mut vm = Vm::new();
        assert!(BindingContext::get(&vm).is_none());
        let a = BindingContext::of(&mut vm);
        let b = BindingContext::of(&mut vm);
        assert!(Rc::ptr_eq(&a, &b));
        assert!(BindingContext::get(&vm).is_some());
    }

    #[test]
    fn unregistered_descriptor() {
        struct Unbound;
        let mut vm = Vm::new();
        let ctx = BindingContext::of(&mut vm);
        assert!(matches!(
            ctx.descriptor_of::<Unbound>(),
            Err(BindError::UnregisteredType(_))
        ));
    }
}
