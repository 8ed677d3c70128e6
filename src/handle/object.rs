//! Owning, borrowed and context-free handles to script values.

use std::fmt;
use std::mem;

use sqbridge_core::{Value, ValueKind, Vm, VmId, WeakValue};

use crate::ambient;
use crate::bind::to_value;
use crate::error::{BindError, BindResult, errors};
use crate::marshal::{FromScript, ToScript};

#[derive(Clone, Default)]
enum Slot {
    #[default]
    Null,
    Owned(Value),
    Borrowed(WeakValue),
}

/// A handle to a script value, tied to the VM that produced it.
///
/// An owning handle keeps the value alive: cloning it adds a script
/// reference, dropping or [`release`](Object::release)-ing it removes one.
/// A borrowed handle refers to the value without keeping it alive.
///
/// # Example
///
/// ```
/// use sqbridge::{Object, Vm};
///
/// let mut vm = Vm::new();
/// let table = Object::from_value(&vm, vm.new_table());
/// table.set_value(&mut vm, "answer", 42)?;
/// assert_eq!(table.get_value::<i32>(&mut vm, "answer")?, 42);
/// assert!(table.has_slot(&vm, "answer"));
/// # Ok::<(), sqbridge::BindError>(())
/// ```
#[derive(Clone, Default)]
pub struct Object {
    vm: Option<VmId>,
    slot: Slot,
}

impl Object {
    /// The null handle.
    pub fn null() -> Self {
        Self::default()
    }

    fn owned(vm: Option<VmId>, value: Value) -> Self {
        let slot = if value.is_null() { Slot::Null } else { Slot::Owned(value) };
        Self { vm, slot }
    }

    /// An owning handle to `value`.
    pub fn from_value(vm: &Vm, value: Value) -> Self {
        Self::owned(Some(vm.id()), value)
    }

    /// A non-owning handle to `value`.
    pub fn borrowed(vm: &Vm, value: &Value) -> Self {
        let slot = if value.is_null() {
            Slot::Null
        } else {
            Slot::Borrowed(value.downgrade())
        };
        Self { vm: Some(vm.id()), slot }
    }

    /// An owning handle to the stack slot at `index`.
    pub fn from_stack(vm: &Vm, index: isize) -> BindResult<Self> {
        Ok(Self::from_value(vm, vm.value_at(index)?))
    }

    /// Convert a native value and hold the result.
    pub fn from_native<T: ToScript>(vm: &mut Vm, value: T) -> BindResult<Self> {
        let mut guard = vm.guard();
        let value = to_value(&mut guard, value)?;
        Ok(Self::from_value(&guard, value))
    }

    /// The VM this handle belongs to, if any.
    pub fn vm_id(&self) -> Option<VmId> {
        self.vm
    }

    /// The referenced value; null when released or when a borrowed value
    /// has died.
    pub fn value(&self) -> Value {
        match &self.slot {
            Slot::Null => Value::Null,
            Slot::Owned(value) => value.clone(),
            Slot::Borrowed(weak) => weak.upgrade().unwrap_or_default(),
        }
    }

    pub fn kind(&self) -> ValueKind {
        self.value().kind()
    }

    pub fn is_null(&self) -> bool {
        self.value().is_null()
    }

    pub fn is_owned(&self) -> bool {
        matches!(self.slot, Slot::Owned(_))
    }

    /// Script reference count of the value, not counting temporaries.
    pub fn ref_count(&self) -> usize {
        match &self.slot {
            Slot::Null => 0,
            Slot::Owned(value) => value.ref_count(),
            Slot::Borrowed(weak) => weak.upgrade().map_or(0, |value| value.ref_count().saturating_sub(1)),
        }
    }

    /// Fail with `ForeignContext` if this handle belongs to another VM.
    pub fn check_context(&self, vm: &Vm) -> BindResult<()> {
        match self.vm {
            Some(expected) if expected != vm.id() => Err(BindError::ForeignContext {
                expected,
                actual: vm.id(),
            }),
            _ => Ok(()),
        }
    }

    /// Read the value back as a native `T`.
    ///
    /// The value is pushed, read and popped; the stack depth is restored
    /// on failure too. Failures are recorded for [`errors::occurred`].
    pub fn cast<T: FromScript>(&self, vm: &mut Vm) -> BindResult<T> {
        let result = self.check_context(vm).and_then(|()| {
            let mut guard = vm.guard();
            guard.push(self.value());
            T::from_script(&mut guard, -1)
        });
        result.map_err(|err| errors::report(vm, err))
    }

    /// Get a slot, invoking `_get` on instances.
    pub fn get_slot(&self, vm: &mut Vm, key: impl Into<Value>) -> BindResult<Object> {
        let result = self
            .check_context(vm)
            .and_then(|()| Ok(vm.get_slot(&self.value(), &key.into())?));
        match result {
            Ok(value) => Ok(Object::from_value(vm, value)),
            Err(err) => Err(errors::report(vm, err)),
        }
    }

    /// Get a slot and convert it to `T`.
    pub fn get_value<T: FromScript>(&self, vm: &mut Vm, key: impl Into<Value>) -> BindResult<T> {
        self.get_slot(vm, key)?.cast(vm)
    }

    /// Store a native value under `key`.
    ///
    /// Tables and classes get the slot created if missing; other values
    /// go through a plain set (and `_set` on instances).
    pub fn set_value<V: ToScript>(&self, vm: &mut Vm, key: impl Into<Value>, value: V) -> BindResult<()> {
        self.store(vm, key.into(), value).map_err(|err| errors::report(vm, err))
    }

    fn store<V: ToScript>(&self, vm: &mut Vm, key: Value, value: V) -> BindResult<()> {
        self.check_context(vm)?;
        let target = self.value();
        let value = to_value(vm, value)?;
        match target.kind() {
            ValueKind::Table | ValueKind::Class => vm.new_slot(&target, key, value)?,
            _ => vm.set_slot(&target, key, value)?,
        }
        Ok(())
    }

    pub fn has_slot(&self, vm: &Vm, key: impl Into<Value>) -> bool {
        self.check_context(vm).is_ok() && vm.has_slot(&self.value(), &key.into())
    }

    pub fn len(&self, vm: &Vm) -> BindResult<usize> {
        self.check_context(vm)?;
        Ok(vm.len(&self.value())?)
    }

    /// Snapshot of the key/value pairs of a table, array, class or instance.
    pub fn entries(&self, vm: &Vm) -> BindResult<Vec<(Value, Object)>> {
        self.check_context(vm)?;
        let entries = vm.entries(&self.value())?;
        Ok(entries
            .into_iter()
            .map(|(key, value)| (key, Object::owned(self.vm, value)))
            .collect())
    }

    /// Move the value out, leaving this handle null.
    pub fn take(&mut self) -> Object {
        mem::take(self)
    }

    /// Drop the reference held by this handle. Calling it again is a no-op.
    pub fn release(&mut self) {
        self.slot = Slot::Null;
    }
}

impl PartialEq for Object {
    fn eq(&self, other: &Self) -> bool {
        self.value().same(&other.value())
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Object")
            .field("vm", &self.vm)
            .field("kind", &self.kind())
            .field("owned", &self.is_owned())
            .finish()
    }
}

impl FromScript for Object {
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        Object::from_stack(vm, index)
    }
}

impl ToScript for Object {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        self.check_context(vm)?;
        vm.push(self.value());
        Ok(())
    }
}

impl ToScript for &Object {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        self.check_context(vm)?;
        vm.push(self.value());
        Ok(())
    }
}

/// A context-free handle to a script value.
///
/// Carries no VM identity; conversion to [`Object`] uses the ambient
/// default VM set with [`ambient::set_default_vm`].
#[derive(Clone, Default, PartialEq)]
pub struct LightObj {
    value: Value,
}

impl LightObj {
    pub fn new(value: Value) -> Self {
        Self { value }
    }

    pub fn from_stack(vm: &Vm, index: isize) -> BindResult<Self> {
        Ok(Self::new(vm.value_at(index)?))
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    pub fn ref_count(&self) -> usize {
        self.value.ref_count()
    }

    /// Read the value back as a native `T`, balancing the stack.
    pub fn cast<T: FromScript>(&self, vm: &mut Vm) -> BindResult<T> {
        let result = {
            let mut guard = vm.guard();
            guard.push(self.value.clone());
            T::from_script(&mut guard, -1)
        };
        result.map_err(|err| errors::report(vm, err))
    }

    pub fn take(&mut self) -> LightObj {
        mem::take(self)
    }

    pub fn release(&mut self) {
        self.value = Value::Null;
    }

    /// Attach the value to the ambient default VM.
    pub fn into_object(self) -> BindResult<Object> {
        let vm = ambient::default_vm().ok_or(BindError::NoDefaultVm)?;
        Ok(Object::owned(Some(vm), self.value))
    }
}

impl fmt::Debug for LightObj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("LightObj").field(&self.value.kind()).finish()
    }
}

impl FromScript for LightObj {
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        LightObj::from_stack(vm, index)
    }
}

impl ToScript for LightObj {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        vm.push(self.value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_handle_is_null() {
        let object = Object::default();
        assert!(object.is_null());
        assert_eq!(object.ref_count(), 0);
        assert_eq!(object.vm_id(), None);
    }

    #[test]
    fn clone_take_and_release() {
        let vm = Vm::new();
        let mut a = Object::from_value(&vm, vm.new_table());
        assert_eq!(a.ref_count(), 1);

        let b = a.clone();
        assert_eq!(a.ref_count(), 2);
        assert_eq!(a, b);

        let mut c = a.take();
        assert!(a.is_null());
        assert_eq!(c.ref_count(), 2);

        c.release();
        c.release();
        assert!(c.is_null());
        assert_eq!(b.ref_count(), 1);
    }

    #[test]
    fn borrowed_handles_do_not_keep_values_alive() {
        let vm = Vm::new();
        let table = vm.new_table();
        let borrowed = Object::borrowed(&vm, &table);
        assert!(!borrowed.is_owned());
        assert_eq!(borrowed.ref_count(), 1);
        drop(table);
        assert!(borrowed.is_null());
    }

    #[test]
    fn cast_balances_the_stack() {
        let mut vm = Vm::new();
        vm.push(Value::Integer(1));
        let number = Object::from_value(&vm, Value::Integer(7));
        assert_eq!(number.cast::<i32>(&mut vm).unwrap(), 7);
        assert_eq!(number.cast::<String>(&mut vm).unwrap(), "7");

        let table = Object::from_value(&vm, vm.new_table());
        assert!(table.cast::<i32>(&mut vm).is_err());
        assert_eq!(vm.top(), 1);
    }

    #[test]
    fn failed_casts_are_visible_to_the_error_query() {
        let mut vm = Vm::new();
        let table = Object::from_value(&vm, vm.new_table());
        assert!(!errors::occurred(&vm));

        let err = table.cast::<i32>(&mut vm).unwrap_err();
        assert!(matches!(err, BindError::TypeMismatch { .. }));
        assert!(errors::occurred(&vm));
        assert_eq!(errors::message(&vm), Some(err.to_string()));
        assert_eq!(errors::last(&vm), Some(err));

        errors::clear(&mut vm);
        let light = LightObj::new(Value::from("text"));
        assert!(light.cast::<bool>(&mut vm).is_err());
        assert!(errors::occurred(&vm));

        errors::clear(&mut vm);
        assert!(table.get_slot(&mut vm, "missing").is_err());
        assert!(errors::message(&vm).is_some());
    }

    #[test]
    fn foreign_context_is_refused() {
        let mut a = Vm::new();
        let b = Vm::new();
        let object = Object::from_value(&b, b.new_table());
        assert!(matches!(
            object.cast::<Value>(&mut a),
            Err(BindError::ForeignContext { .. })
        ));
        assert!(!object.has_slot(&a, "x"));
    }

    #[test]
    fn table_slots_and_entries() {
        let mut vm = Vm::new();
        let table = Object::from_native(&mut vm, Value::Null).unwrap();
        assert!(table.is_null());

        let table = Object::from_value(&vm, vm.new_table());
        table.set_value(&mut vm, "a", 1).unwrap();
        table.set_value(&mut vm, "b", "two").unwrap();
        assert_eq!(table.len(&vm).unwrap(), 2);
        assert_eq!(table.get_value::<String>(&mut vm, "b").unwrap(), "two");

        let entries = table.entries(&vm).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|(k, v)| k == &Value::from("a") && v.value() == Value::Integer(1)));
        assert!(table.get_slot(&mut vm, "missing").is_err());
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn light_object_needs_a_default_vm() {
        let vm = Vm::new();
        ambient::clear_default_vm();
        let light = LightObj::new(vm.new_table());
        assert!(matches!(light.clone().into_object(), Err(BindError::NoDefaultVm)));

        ambient::set_default_vm(&vm);
        let object = light.into_object().unwrap();
        assert_eq!(object.vm_id(), Some(vm.id()));
        ambient::clear_default_vm();
    }
}
