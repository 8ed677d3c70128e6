//! Identity map between native objects and their script instances.
//!
//! Native objects shared with scripts live in `Rc<RefCell<dyn Any>>` cells.
//! The allocation address of the cell is the object's identity: exposing the
//! same cell twice yields the same script instance. Entries only hold weak
//! references on both sides, so the registry never keeps anything alive on
//! its own; dead entries are purged on lookup.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::{Rc, Weak};

use rustc_hash::FxHashMap;
use sqbridge_core::{Value, WeakObjectRef};
use tracing::{debug, warn};

use crate::error::{BindError, BindResult};
use crate::policy::AllocatorFlags;
use crate::type_registry::TypeDescriptor;

/// A native object shared with scripts.
pub type NativeObject = Rc<RefCell<dyn Any>>;

/// Identity of a native object: the address of its shared cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceKey(usize);

impl InstanceKey {
    pub fn of(object: &NativeObject) -> Self {
        InstanceKey(Rc::as_ptr(object) as *const () as usize)
    }
}

struct Entry {
    instance: WeakObjectRef,
    native: Weak<RefCell<dyn Any>>,
}

impl Entry {
    fn live_instance(&self) -> Option<Value> {
        if self.native.strong_count() == 0 {
            return None;
        }
        self.instance.upgrade().map(Value::Object)
    }
}

/// Per-type map from native identity to script instance.
pub struct InstanceRegistry {
    type_name: String,
    entries: RefCell<FxHashMap<InstanceKey, Entry>>,
    parked: RefCell<Vec<NativeObject>>,
}

impl InstanceRegistry {
    pub fn new(type_name: &str) -> Self {
        Self {
            type_name: type_name.to_string(),
            entries: RefCell::default(),
            parked: RefCell::default(),
        }
    }

    /// The script instance currently bound to `object`, if any.
    ///
    /// Entries whose instance or native object has died are removed.
    pub fn acquire(&self, object: &NativeObject) -> Option<Value> {
        let key = InstanceKey::of(object);
        let mut entries = self.entries.borrow_mut();
        let live = entries.get(&key)?.live_instance();
        if live.is_none() {
            entries.remove(&key);
            debug!(target: "sqbridge::instances", type_name = %self.type_name, "purged stale instance entry");
        }
        live
    }

    /// Bind `object` to `instance`.
    pub fn insert(&self, object: &NativeObject, instance: &Value) -> BindResult<()> {
        let Some(instance_ref) = instance.as_object() else {
            return Err(BindError::mismatch("instance", instance.type_name()));
        };
        let key = InstanceKey::of(object);
        let mut entries = self.entries.borrow_mut();
        if entries.get(&key).is_some_and(|entry| entry.live_instance().is_some()) {
            return Err(BindError::DuplicateInstance {
                type_name: self.type_name.clone(),
            });
        }
        entries.insert(
            key,
            Entry {
                instance: instance_ref.downgrade(),
                native: Rc::downgrade(object),
            },
        );
        Ok(())
    }

    /// Drop the entry for `key`. Returns whether an entry existed.
    pub fn remove(&self, key: InstanceKey) -> bool {
        match self.entries.try_borrow_mut() {
            Ok(mut entries) => entries.remove(&key).is_some(),
            Err(_) => {
                warn!(target: "sqbridge::instances", type_name = %self.type_name, "registry busy during release; entry left for purge");
                false
            }
        }
    }

    pub fn contains(&self, object: &NativeObject) -> bool {
        self.entries.borrow().contains_key(&InstanceKey::of(object))
    }

    /// Number of entries, including ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// Keep a script-released object that the policy forbids destroying.
    pub fn park(&self, object: NativeObject) {
        match self.parked.try_borrow_mut() {
            Ok(mut parked) => parked.push(object),
            Err(_) => warn!(target: "sqbridge::instances", type_name = %self.type_name, "parking list busy; object dropped"),
        }
    }

    pub fn parked(&self) -> usize {
        self.parked.borrow().len()
    }

    /// Hand all parked objects back to the host.
    pub fn take_parked(&self) -> Vec<NativeObject> {
        std::mem::take(&mut *self.parked.borrow_mut())
    }
}

impl fmt::Debug for InstanceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InstanceRegistry")
            .field("type_name", &self.type_name)
            .field("entries", &self.len())
            .field("parked", &self.parked())
            .finish()
    }
}

/// Who keeps the native object alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// The script instance holds the only guaranteed reference.
    Owned,
    /// The host owns the object; the instance refers to it weakly.
    Borrowed,
}

enum Storage {
    Owned(NativeObject),
    Borrowed(Weak<RefCell<dyn Any>>),
}

/// Payload attached to a script instance that wraps a native object.
pub struct BoundValue {
    key: InstanceKey,
    storage: Storage,
    registry: Rc<InstanceRegistry>,
    descriptor: Rc<TypeDescriptor>,
}

impl BoundValue {
    pub fn new(descriptor: Rc<TypeDescriptor>, object: NativeObject, ownership: Ownership) -> Self {
        let storage = match ownership {
            Ownership::Owned => Storage::Owned(object.clone()),
            Ownership::Borrowed => Storage::Borrowed(Rc::downgrade(&object)),
        };
        Self {
            key: InstanceKey::of(&object),
            storage,
            registry: descriptor.instances().clone(),
            descriptor,
        }
    }

    pub fn key(&self) -> InstanceKey {
        self.key
    }

    pub fn ownership(&self) -> Ownership {
        match self.storage {
            Storage::Owned(_) => Ownership::Owned,
            Storage::Borrowed(_) => Ownership::Borrowed,
        }
    }

    /// The native object, unless a borrowed one has been dropped.
    pub fn object(&self) -> Option<NativeObject> {
        match &self.storage {
            Storage::Owned(object) => Some(object.clone()),
            Storage::Borrowed(weak) => weak.upgrade(),
        }
    }

    /// Descriptor of the most derived bound type.
    pub fn descriptor(&self) -> &Rc<TypeDescriptor> {
        &self.descriptor
    }

    fn release(self) {
        self.registry.remove(self.key);
        if let Storage::Owned(object) = self.storage {
            if self.descriptor.flags().contains(AllocatorFlags::DESTRUCT) {
                drop(object);
            } else {
                self.registry.park(object);
            }
        }
    }
}

impl fmt::Debug for BoundValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundValue")
            .field("type", &self.descriptor.name())
            .field("key", &self.key)
            .field("ownership", &self.ownership())
            .finish()
    }
}

/// Release hook installed on every instance carrying a [`BoundValue`].
///
/// Detaches the registry entry, then frees or parks the native object per
/// the type's policy. Panics from native destructors are contained here.
pub fn release_bound(payload: Box<dyn Any>) {
    let bound = match payload.downcast::<BoundValue>() {
        Ok(bound) => bound,
        Err(_) => {
            warn!(target: "sqbridge::instances", "release hook received a foreign payload");
            return;
        }
    };
    let type_name = bound.descriptor.name().to_string();
    if catch_unwind(AssertUnwindSafe(move || (*bound).release())).is_err() {
        warn!(target: "sqbridge::instances", %type_name, "native destructor panicked during release");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqbridge_core::Vm;

    fn native(value: i32) -> NativeObject {
        Rc::new(RefCell::new(value))
    }

    fn instance(vm: &Vm) -> Value {
        let class = vm.new_class(None).unwrap();
        vm.create_instance(&class).unwrap()
    }

    #[test]
    fn acquire_preserves_identity() {
        let vm = Vm::new();
        let registry = InstanceRegistry::new("i32");
        let object = native(1);
        let script = instance(&vm);

        assert!(registry.acquire(&object).is_none());
        registry.insert(&object, &script).unwrap();
        assert_eq!(registry.acquire(&object), Some(script.clone()));
        assert!(registry.contains(&object));
    }

    #[test]
    fn insert_existing_key_fails() {
        let vm = Vm::new();
        let registry = InstanceRegistry::new("i32");
        let object = native(1);
        let first = instance(&vm);
        registry.insert(&object, &first).unwrap();

        let second = instance(&vm);
        assert!(matches!(
            registry.insert(&object, &second),
            Err(BindError::DuplicateInstance { .. })
        ));
        assert_eq!(registry.acquire(&object), Some(first));
    }

    #[test]
    fn dead_instance_is_purged() {
        let vm = Vm::new();
        let registry = InstanceRegistry::new("i32");
        let object = native(1);
        let script = instance(&vm);
        registry.insert(&object, &script).unwrap();
        drop(script);

        assert_eq!(registry.len(), 1);
        assert!(registry.acquire(&object).is_none());
        assert!(registry.is_empty());

        // The key is free again.
        let replacement = instance(&vm);
        assert!(registry.insert(&object, &replacement).is_ok());
    }

    #[test]
    fn dead_native_object_is_purged() {
        let vm = Vm::new();
        let registry = InstanceRegistry::new("i32");
        let object = native(1);
        let script = instance(&vm);
        registry.insert(&object, &script).unwrap();
        let key = InstanceKey::of(&object);
        drop(object);

        // The script instance survives its host object; the entry is dead
        // and goes away with the release path.
        assert_eq!(script.kind(), sqbridge_core::ValueKind::Instance);
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(key));
        assert!(!registry.remove(key));
    }

    #[test]
    fn parked_objects_can_be_reclaimed() {
        let registry = InstanceRegistry::new("i32");
        registry.park(native(5));
        assert_eq!(registry.parked(), 1);
        let parked = registry.take_parked();
        assert_eq!(parked.len(), 1);
        assert_eq!(parked[0].borrow().downcast_ref::<i32>(), Some(&5));
        assert_eq!(registry.parked(), 0);
    }

    #[test]
    fn release_hook_ignores_foreign_payloads() {
        release_bound(Box::new("not a bound value"));
    }
}
