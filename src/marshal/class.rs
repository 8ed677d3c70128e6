//! Bound native classes.
//!
//! A bound type crosses the boundary in three ways:
//!
//! - by value (`T`): reads copy the native object through the type's copy
//!   function, writes move the value into a new script-owned instance
//! - by reference ([`InstanceRef<T>`]): reads borrow the native object
//!   behind a compatible script instance, writes push the same instance
//! - shared (`Rc<RefCell<T>>`): reads copy into a fresh cell, writes expose
//!   the cell without handing ownership to the script

use std::any::{Any, type_name};
use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use sqbridge_core::{TypeHash, Value, ValueKind, Vm};
use tracing::debug;

use super::{FromScript, ToScript};
use crate::context::BindingContext;
use crate::error::{BindError, BindResult};
use crate::instance_registry::{BoundValue, NativeObject, Ownership, release_bound};
use crate::type_registry::{TypeDescriptor, Upcast, UpcastMut};

/// A native type that can be registered with [`Class`](crate::Class).
///
/// The integer hooks let enum-like types travel as plain script integers
/// when they are not wrapped in an instance. Both default to "no integer
/// form".
///
/// ```
/// use sqbridge::Bindable;
///
/// #[derive(Debug, Clone, Copy, PartialEq)]
/// enum Mode { Off = 0, On = 1 }
///
/// impl Bindable for Mode {
///     fn from_script_integer(value: i64) -> Option<Self> {
///         match value {
///             0 => Some(Mode::Off),
///             1 => Some(Mode::On),
///             _ => None,
///         }
///     }
///
///     fn to_script_integer(&self) -> Option<i64> {
///         Some(*self as i64)
///     }
/// }
/// ```
pub trait Bindable: Any + Sized {
    /// Build a value from a script integer.
    fn from_script_integer(value: i64) -> Option<Self> {
        let _ = value;
        None
    }

    /// Integer form used when the type has no registered class.
    fn to_script_integer(&self) -> Option<i64> {
        None
    }
}

fn context<T: 'static>(vm: &Vm) -> BindResult<Rc<BindingContext>> {
    BindingContext::get(vm).ok_or_else(|| BindError::UnregisteredType(type_name::<T>().to_string()))
}

/// Registered name of `T`, falling back to its Rust name.
pub(crate) fn type_label<T: 'static>(vm: &Vm) -> String {
    BindingContext::get(vm)
        .and_then(|ctx| ctx.descriptor(TypeHash::of::<T>()))
        .map(|descriptor| descriptor.name().to_string())
        .unwrap_or_else(|| type_name::<T>().to_string())
}

// ============================================================================
// Instance wrapping
// ============================================================================

/// Script instance for `object`, reusing the registered one if it exists.
pub(crate) fn wrap_native(
    vm: &mut Vm,
    descriptor: &Rc<TypeDescriptor>,
    object: NativeObject,
    ownership: Ownership,
) -> BindResult<Value> {
    if let Some(existing) = descriptor.instances().acquire(&object) {
        return Ok(existing);
    }
    let instance = vm.create_instance(descriptor.class())?;
    attach(vm, &instance, descriptor, object, ownership)?;
    Ok(instance)
}

/// Bind `object` to an existing script instance.
///
/// Any payload the instance carried before is released first.
pub(crate) fn attach(
    vm: &mut Vm,
    instance: &Value,
    descriptor: &Rc<TypeDescriptor>,
    object: NativeObject,
    ownership: Ownership,
) -> BindResult<()> {
    if instance.kind() != ValueKind::Instance {
        return Err(BindError::mismatch("instance", instance.type_name()));
    }
    descriptor.instances().insert(&object, instance)?;
    let bound = BoundValue::new(descriptor.clone(), object, ownership);
    debug!(
        target: "sqbridge::instances",
        type_name = %descriptor.name(),
        key = ?bound.key(),
        ?ownership,
        "bound native object"
    );
    if let Some(previous) = vm.set_instance_payload(instance, Box::new(bound))? {
        release_bound(previous);
    }
    vm.set_release_hook(instance, Some(release_bound))?;
    Ok(())
}

// ============================================================================
// InstanceRef
// ============================================================================

/// Borrowed view of the native `T` behind a script instance.
///
/// The instance may be of `T` itself or of any bound type deriving from it;
/// access goes through the registered upcast chain.
pub struct InstanceRef<T> {
    instance: Value,
    object: NativeObject,
    path: Vec<(Upcast, UpcastMut)>,
    type_name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: 'static> InstanceRef<T> {
    /// Resolve a script value to the `T` behind it.
    pub fn from_value(vm: &Vm, value: Value) -> BindResult<Self> {
        let expected = type_label::<T>(vm);
        if value.kind() != ValueKind::Instance || !vm.instance_of_tag(&value, TypeHash::of::<T>()) {
            return Err(BindError::mismatch(expected, value.type_name()));
        }
        let ctx = context::<T>(vm)?;
        let (object, from) = {
            let Some(heap) = value.heap().and_then(|heap| heap.as_instance()) else {
                return Err(BindError::mismatch(expected, value.type_name()));
            };
            let payload = heap.payload();
            let Some(bound) = payload.as_ref().and_then(|p| p.downcast_ref::<BoundValue>()) else {
                return Err(BindError::unconstructed(expected));
            };
            let Some(object) = bound.object() else {
                return Err(BindError::unconstructed(expected));
            };
            (object, bound.descriptor().hash())
        };
        let path = ctx
            .types()
            .borrow()
            .cast_path(from, TypeHash::of::<T>())
            .ok_or_else(|| BindError::mismatch(expected.clone(), value.type_name()))?;
        Ok(Self {
            instance: value,
            object,
            path,
            type_name: expected,
            _marker: PhantomData,
        })
    }

    /// Shared borrow of the native value.
    pub fn borrow(&self) -> BindResult<Ref<'_, T>> {
        let cell = self.object.try_borrow().map_err(|_| self.busy())?;
        let path = &self.path;
        Ref::filter_map(cell, |any| {
            path.iter()
                .try_fold(any, |current, (up, _)| up(current))
                .and_then(|any| any.downcast_ref::<T>())
        })
        .map_err(|_| BindError::mismatch(self.type_name.clone(), "foreign object"))
    }

    /// Exclusive borrow of the native value.
    pub fn borrow_mut(&self) -> BindResult<RefMut<'_, T>> {
        let cell = self.object.try_borrow_mut().map_err(|_| self.busy())?;
        let path = &self.path;
        RefMut::filter_map(cell, |any| {
            path.iter()
                .try_fold(any, |current, (_, up)| up(current))
                .and_then(|any| any.downcast_mut::<T>())
        })
        .map_err(|_| BindError::mismatch(self.type_name.clone(), "foreign object"))
    }

    /// The script instance.
    pub fn instance(&self) -> &Value {
        &self.instance
    }

    /// The shared cell of the most derived native object.
    pub fn native(&self) -> &NativeObject {
        &self.object
    }

    fn busy(&self) -> BindError {
        BindError::InstanceBorrowed {
            type_name: self.type_name.clone(),
        }
    }
}

impl<T> Clone for InstanceRef<T> {
    fn clone(&self) -> Self {
        Self {
            instance: self.instance.clone(),
            object: self.object.clone(),
            path: self.path.clone(),
            type_name: self.type_name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for InstanceRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRef")
            .field("type", &self.type_name)
            .field("instance", &self.instance)
            .field("depth", &self.path.len())
            .finish()
    }
}

impl<T: 'static> FromScript for InstanceRef<T> {
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        let value = vm.value_at(index)?;
        InstanceRef::from_value(vm, value)
    }
}

impl<T> ToScript for InstanceRef<T> {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        vm.push(self.instance);
        Ok(())
    }
}

// ============================================================================
// By value
// ============================================================================

impl<T: Bindable> FromScript for T {
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        let value = vm.value_at(index)?;
        if value.kind() == ValueKind::Instance {
            let instance = InstanceRef::<T>::from_value(vm, value)?;
            let descriptor = context::<T>(vm)?.descriptor_of::<T>()?;
            let copy = {
                let borrowed = instance.borrow()?;
                descriptor.copy(&*borrowed)?
            };
            return copy
                .downcast::<T>()
                .map(|boxed| *boxed)
                .map_err(|_| BindError::mismatch(descriptor.name(), "foreign object"));
        }
        if let Some(converted) = value.as_integer().and_then(T::from_script_integer) {
            return Ok(converted);
        }
        Err(BindError::mismatch(type_label::<T>(vm), value.type_name()))
    }
}

impl<T: Bindable> ToScript for T {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        let descriptor = BindingContext::get(vm).and_then(|ctx| ctx.descriptor(TypeHash::of::<T>()));
        let Some(descriptor) = descriptor else {
            return match self.to_script_integer() {
                Some(i) => {
                    vm.push(Value::Integer(i));
                    Ok(())
                }
                None => Err(BindError::UnregisteredType(type_name::<T>().to_string())),
            };
        };
        let object: NativeObject = Rc::new(RefCell::new(self));
        let instance = wrap_native(vm, &descriptor, object, Ownership::Owned)?;
        vm.push(instance);
        Ok(())
    }
}

// ============================================================================
// Shared cells
// ============================================================================

/// Reads copy the native value into a new cell.
impl<T: Bindable> FromScript for Rc<RefCell<T>> {
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        T::from_script(vm, index).map(|value| Rc::new(RefCell::new(value)))
    }
}

/// Writes expose the cell by reference; the script never owns it.
impl<T: Bindable> ToScript for Rc<RefCell<T>> {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        let descriptor = context::<T>(vm)?.descriptor_of::<T>()?;
        let object: NativeObject = self;
        let instance = wrap_native(vm, &descriptor, object, Ownership::Borrowed)?;
        vm.push(instance);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{AllocatorFlags, DefaultAllocator};
    use crate::type_registry::{TypeRegistration, copy_with};

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Counter {
        count: i32,
    }

    impl Bindable for Counter {}

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Level {
        Low = 1,
        High = 2,
    }

    impl Bindable for Level {
        fn from_script_integer(value: i64) -> Option<Self> {
            match value {
                1 => Some(Level::Low),
                2 => Some(Level::High),
                _ => None,
            }
        }

        fn to_script_integer(&self) -> Option<i64> {
            Some(*self as i64)
        }
    }

    fn register_counter(vm: &mut Vm) -> Rc<TypeDescriptor> {
        let class = vm.new_class(None).unwrap();
        vm.set_type_tag(&class, TypeHash::of::<Counter>()).unwrap();
        let ctx = BindingContext::of(vm);
        let descriptor = ctx
            .types()
            .borrow_mut()
            .register(TypeRegistration {
                name: "Counter".to_string(),
                hash: TypeHash::of::<Counter>(),
                base: None,
                copy: Some(copy_with::<Counter, DefaultAllocator>),
                flags: AllocatorFlags::all(),
                class,
            })
            .unwrap();
        descriptor
    }

    #[test]
    fn by_value_write_then_read_copies() {
        let mut vm = Vm::new();
        register_counter(&mut vm);
        Counter { count: 3 }.to_script(&mut vm).unwrap();
        assert_eq!(vm.kind_at(-1).unwrap(), ValueKind::Instance);

        let copy = Counter::from_script(&mut vm, -1).unwrap();
        assert_eq!(copy, Counter { count: 3 });

        let view = InstanceRef::<Counter>::from_script(&mut vm, -1).unwrap();
        view.borrow_mut().unwrap().count = 9;
        assert_eq!(copy.count, 3);
        assert_eq!(view.borrow().unwrap().count, 9);
    }

    #[test]
    fn shared_cells_keep_identity() {
        let mut vm = Vm::new();
        let descriptor = register_counter(&mut vm);
        let shared = Rc::new(RefCell::new(Counter::default()));

        shared.clone().to_script(&mut vm).unwrap();
        shared.clone().to_script(&mut vm).unwrap();
        assert!(vm.get(-1).unwrap().same(vm.get(-2).unwrap()));
        assert_eq!(descriptor.instances().len(), 1);

        let view = InstanceRef::<Counter>::from_script(&mut vm, -1).unwrap();
        view.borrow_mut().unwrap().count = 4;
        assert_eq!(shared.borrow().count, 4);
    }

    #[test]
    fn borrowed_object_dropped_by_host_is_unconstructed() {
        let mut vm = Vm::new();
        register_counter(&mut vm);
        let shared = Rc::new(RefCell::new(Counter::default()));
        shared.clone().to_script(&mut vm).unwrap();
        drop(shared);

        assert!(matches!(
            InstanceRef::<Counter>::from_script(&mut vm, -1),
            Err(BindError::UnconstructedInstance { .. })
        ));
    }

    #[test]
    fn instance_without_payload_is_unconstructed() {
        let mut vm = Vm::new();
        let descriptor = register_counter(&mut vm);
        let bare = vm.create_instance(descriptor.class()).unwrap();
        vm.push(bare);
        assert_eq!(
            Counter::from_script(&mut vm, -1).unwrap_err().to_string(),
            "unconstructed Counter instance"
        );
    }

    #[test]
    fn exclusive_borrow_is_reported() {
        let mut vm = Vm::new();
        register_counter(&mut vm);
        Counter::default().to_script(&mut vm).unwrap();
        let view = InstanceRef::<Counter>::from_script(&mut vm, -1).unwrap();
        let _guard = view.borrow_mut().unwrap();
        assert!(matches!(view.borrow(), Err(BindError::InstanceBorrowed { .. })));
    }

    #[test]
    fn integer_fallback_is_opt_in() {
        let mut vm = Vm::new();
        Level::High.to_script(&mut vm).unwrap();
        assert_eq!(vm.get(-1).unwrap(), &Value::Integer(2));
        assert_eq!(Level::from_script(&mut vm, -1).unwrap(), Level::High);

        vm.push(Value::Integer(1));
        assert!(matches!(
            Counter::from_script(&mut vm, -1),
            Err(BindError::TypeMismatch { .. })
        ));
        assert!(matches!(
            Counter::default().to_script(&mut vm),
            Err(BindError::UnregisteredType(_))
        ));
    }

    #[test]
    fn wrong_class_is_a_mismatch() {
        let mut vm = Vm::new();
        register_counter(&mut vm);
        let other = vm.new_class(None).unwrap();
        let instance = vm.create_instance(&other).unwrap();
        vm.push(instance);
        assert!(matches!(
            InstanceRef::<Counter>::from_script(&mut vm, -1),
            Err(BindError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn dropping_the_instance_releases_the_entry() {
        let mut vm = Vm::new();
        let descriptor = register_counter(&mut vm);
        Counter::default().to_script(&mut vm).unwrap();
        assert_eq!(descriptor.instances().len(), 1);
        vm.pop(1).unwrap();
        assert!(descriptor.instances().is_empty());
    }
}
