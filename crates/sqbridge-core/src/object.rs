//! Objects living in the VM's reference-counted object space.

use std::any::Any;
use std::cell::{Cell, Ref, RefCell, RefMut};

use crate::closure::NativeClosure;
use crate::table::Table;
use crate::type_hash::TypeHash;
use crate::value::{ObjectRef, Value, ValueKind};

/// Finalizer invoked with an object's host payload when the object dies.
///
/// Runs from `Drop`, so it must not panic.
pub type ReleaseHook = fn(Box<dyn Any>);

/// A heap object.
#[derive(Debug)]
pub enum HeapObject {
    Table(RefCell<Table>),
    Array(RefCell<Vec<Value>>),
    Class(ClassObject),
    Instance(InstanceObject),
    Closure(NativeClosure),
    UserData(UserDataObject),
}

impl HeapObject {
    pub fn kind(&self) -> ValueKind {
        match self {
            HeapObject::Table(_) => ValueKind::Table,
            HeapObject::Array(_) => ValueKind::Array,
            HeapObject::Class(_) => ValueKind::Class,
            HeapObject::Instance(_) => ValueKind::Instance,
            HeapObject::Closure(_) => ValueKind::Closure,
            HeapObject::UserData(_) => ValueKind::UserData,
        }
    }

    pub fn as_table(&self) -> Option<&RefCell<Table>> {
        match self {
            HeapObject::Table(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&RefCell<Vec<Value>>> {
        match self {
            HeapObject::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_class(&self) -> Option<&ClassObject> {
        match self {
            HeapObject::Class(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_instance(&self) -> Option<&InstanceObject> {
        match self {
            HeapObject::Instance(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_closure(&self) -> Option<&NativeClosure> {
        match self {
            HeapObject::Closure(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_user_data(&self) -> Option<&UserDataObject> {
        match self {
            HeapObject::UserData(u) => Some(u),
            _ => None,
        }
    }
}

/// A script class: a member table, an optional base class and a type tag.
#[derive(Debug)]
pub struct ClassObject {
    base: Option<ObjectRef>,
    members: RefCell<Table>,
    type_tag: Cell<Option<TypeHash>>,
}

impl ClassObject {
    pub(crate) fn new(base: Option<ObjectRef>) -> Self {
        Self {
            base,
            members: RefCell::new(Table::new()),
            type_tag: Cell::new(None),
        }
    }

    pub fn base(&self) -> Option<&ObjectRef> {
        self.base.as_ref()
    }

    pub fn members(&self) -> Ref<'_, Table> {
        self.members.borrow()
    }

    pub fn members_mut(&self) -> RefMut<'_, Table> {
        self.members.borrow_mut()
    }

    pub fn type_tag(&self) -> Option<TypeHash> {
        self.type_tag.get()
    }

    pub fn set_type_tag(&self, tag: TypeHash) {
        self.type_tag.set(Some(tag));
    }

    /// Look a member up in this class and then its bases.
    pub fn lookup(&self, key: &Value) -> Option<Value> {
        if let Some(value) = self.members.borrow().get(key) {
            return Some(value.clone());
        }
        self.base
            .as_ref()
            .and_then(|base| base.heap().as_class())
            .and_then(|base| base.lookup(key))
    }

    /// Check if this class or one of its bases carries `tag`.
    pub fn has_tag(&self, tag: TypeHash) -> bool {
        if self.type_tag.get() == Some(tag) {
            return true;
        }
        self.base
            .as_ref()
            .and_then(|base| base.heap().as_class())
            .is_some_and(|base| base.has_tag(tag))
    }

    /// Non-closure members of the class chain, base first.
    pub(crate) fn field_defaults(&self, out: &mut Table) {
        if let Some(base) = self.base.as_ref().and_then(|b| b.heap().as_class()) {
            base.field_defaults(out);
        }
        for (key, value) in self.members.borrow().iter() {
            if value.kind() != ValueKind::Closure {
                out.insert(key.clone(), value.clone());
            }
        }
    }
}

/// An instance of a script class, optionally backed by a host payload.
#[derive(Debug)]
pub struct InstanceObject {
    class: ObjectRef,
    fields: RefCell<Table>,
    payload: RefCell<Option<Box<dyn Any>>>,
    release_hook: Cell<Option<ReleaseHook>>,
}

impl InstanceObject {
    pub(crate) fn new(class: ObjectRef, fields: Table) -> Self {
        Self {
            class,
            fields: RefCell::new(fields),
            payload: RefCell::new(None),
            release_hook: Cell::new(None),
        }
    }

    pub fn class(&self) -> &ObjectRef {
        &self.class
    }

    pub fn class_object(&self) -> Option<&ClassObject> {
        self.class.heap().as_class()
    }

    pub fn fields(&self) -> Ref<'_, Table> {
        self.fields.borrow()
    }

    pub fn fields_mut(&self) -> RefMut<'_, Table> {
        self.fields.borrow_mut()
    }

    /// Host payload attached with [`Vm::set_instance_payload`](crate::Vm::set_instance_payload).
    pub fn payload(&self) -> Ref<'_, Option<Box<dyn Any>>> {
        self.payload.borrow()
    }

    pub fn has_payload(&self) -> bool {
        self.payload.borrow().is_some()
    }

    pub(crate) fn set_payload(&self, payload: Box<dyn Any>) -> Option<Box<dyn Any>> {
        self.payload.borrow_mut().replace(payload)
    }

    pub(crate) fn set_release_hook(&self, hook: Option<ReleaseHook>) {
        self.release_hook.set(hook);
    }

    pub fn type_tag(&self) -> Option<TypeHash> {
        self.class_object().and_then(ClassObject::type_tag)
    }
}

impl Drop for InstanceObject {
    fn drop(&mut self) {
        let payload = self.payload.get_mut().take();
        if let (Some(payload), Some(hook)) = (payload, self.release_hook.get()) {
            hook(payload);
        }
    }
}

/// An opaque host-owned block with a type tag and release hook.
#[derive(Debug)]
pub struct UserDataObject {
    data: RefCell<Option<Box<dyn Any>>>,
    type_tag: Cell<Option<TypeHash>>,
    release_hook: Cell<Option<ReleaseHook>>,
}

impl UserDataObject {
    pub(crate) fn new(data: Box<dyn Any>) -> Self {
        Self {
            data: RefCell::new(Some(data)),
            type_tag: Cell::new(None),
            release_hook: Cell::new(None),
        }
    }

    pub fn data(&self) -> Ref<'_, Option<Box<dyn Any>>> {
        self.data.borrow()
    }

    pub fn data_mut(&self) -> RefMut<'_, Option<Box<dyn Any>>> {
        self.data.borrow_mut()
    }

    pub fn type_tag(&self) -> Option<TypeHash> {
        self.type_tag.get()
    }

    pub(crate) fn set_type_tag(&self, tag: TypeHash) {
        self.type_tag.set(Some(tag));
    }

    pub(crate) fn set_release_hook(&self, hook: Option<ReleaseHook>) {
        self.release_hook.set(hook);
    }
}

impl Drop for UserDataObject {
    fn drop(&mut self) {
        let data = self.data.get_mut().take();
        if let (Some(data), Some(hook)) = (data, self.release_hook.get()) {
            hook(data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    thread_local! {
        static RELEASED: Cell<i64> = const { Cell::new(0) };
    }

    fn record(payload: Box<dyn Any>) {
        if let Ok(n) = payload.downcast::<i64>() {
            RELEASED.with(|r| r.set(*n));
        }
    }

    fn class(base: Option<ObjectRef>) -> ObjectRef {
        ObjectRef::new(HeapObject::Class(ClassObject::new(base)))
    }

    #[test]
    fn class_lookup_walks_bases() {
        let base = class(None);
        base.heap()
            .as_class()
            .unwrap()
            .members_mut()
            .insert(Value::from("x"), Value::Integer(1));
        let derived = class(Some(base.clone()));
        let derived_class = derived.heap().as_class().unwrap();

        assert_eq!(derived_class.lookup(&Value::from("x")), Some(Value::Integer(1)));
        assert_eq!(derived_class.lookup(&Value::from("y")), None);
    }

    #[test]
    fn type_tag_found_on_base() {
        let base = class(None);
        base.heap().as_class().unwrap().set_type_tag(TypeHash::from_name("Base"));
        let derived = class(Some(base));
        let derived_class = derived.heap().as_class().unwrap();

        assert!(derived_class.has_tag(TypeHash::from_name("Base")));
        assert!(!derived_class.has_tag(TypeHash::from_name("Other")));
        assert_eq!(derived_class.type_tag(), None);
    }

    #[test]
    fn instance_release_hook_runs_on_drop() {
        let instance = InstanceObject::new(class(None), Table::new());
        instance.set_payload(Box::new(41_i64));
        instance.set_release_hook(Some(record));
        drop(instance);
        assert_eq!(RELEASED.with(Cell::get), 41);
    }

    #[test]
    fn user_data_release_hook_runs_on_drop() {
        let data = UserDataObject::new(Box::new(7_i64));
        data.set_release_hook(Some(record));
        drop(data);
        assert_eq!(RELEASED.with(Cell::get), 7);
    }
}
