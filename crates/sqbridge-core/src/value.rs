//! Runtime value type for VM stack slots and aggregate entries.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::{Rc, Weak};

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::object::HeapObject;

/// The kind of a script value.
///
/// The discriminant doubles as the bit position of the kind inside a
/// [`TypeMask`](crate::TypeMask).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum ValueKind {
    Null = 0,
    Bool = 1,
    Integer = 2,
    Float = 3,
    String = 4,
    UserPointer = 5,
    Table = 6,
    Array = 7,
    Class = 8,
    Instance = 9,
    Closure = 10,
    UserData = 11,
}

impl ValueKind {
    /// Number of value kinds.
    pub const COUNT: u8 = 12;

    /// Get a human-readable name for this kind.
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Null => "null",
            ValueKind::Bool => "bool",
            ValueKind::Integer => "integer",
            ValueKind::Float => "float",
            ValueKind::String => "string",
            ValueKind::UserPointer => "userpointer",
            ValueKind::Table => "table",
            ValueKind::Array => "array",
            ValueKind::Class => "class",
            ValueKind::Instance => "instance",
            ValueKind::Closure => "function",
            ValueKind::UserData => "userdata",
        }
    }

    /// Check if values of this kind live in the object space.
    pub fn is_object(self) -> bool {
        u8::from(self) >= u8::from(ValueKind::Table)
    }
}

/// A shared reference to an object living in the VM's object space.
///
/// Cloning increments the object's reference count; dropping the last
/// reference finalizes the object (running its release hook, if any).
#[derive(Clone)]
pub struct ObjectRef(pub(crate) Rc<HeapObject>);

impl ObjectRef {
    pub(crate) fn new(object: HeapObject) -> Self {
        ObjectRef(Rc::new(object))
    }

    /// Access the underlying heap object.
    pub fn heap(&self) -> &HeapObject {
        &self.0
    }

    /// The kind of the referenced object.
    pub fn kind(&self) -> ValueKind {
        self.0.kind()
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    /// Address of the object, stable while it is alive.
    pub fn address(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    /// Number of strong references to the object.
    pub fn ref_count(&self) -> usize {
        Rc::strong_count(&self.0)
    }

    /// Create a non-owning reference.
    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef(Rc::downgrade(&self.0))
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.kind().name(), self.address())
    }
}

/// A non-owning reference to an object in the VM's object space.
#[derive(Clone)]
pub struct WeakObjectRef(Weak<HeapObject>);

impl WeakObjectRef {
    /// Upgrade to a strong reference if the object is still alive.
    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.0.upgrade().map(ObjectRef)
    }

    /// Check whether the referenced object is the given one.
    pub fn points_to(&self, object: &ObjectRef) -> bool {
        std::ptr::eq(self.0.as_ptr(), Rc::as_ptr(&object.0))
    }
}

impl fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WeakObjectRef({:#x})", self.0.as_ptr() as *const () as usize)
    }
}

/// A dynamic value stored on the VM stack or inside aggregates.
///
/// Primitive values are stored inline; everything else is a reference into
/// the object space. Equality on objects is identity.
#[derive(Clone, Default)]
pub enum Value {
    /// Null
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Immutable shared string
    String(Rc<str>),
    /// Opaque address owned by the host
    UserPointer(usize),
    /// Reference into the object space
    Object(ObjectRef),
}

impl Value {
    /// Get the kind of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Null => ValueKind::Null,
            Value::Bool(_) => ValueKind::Bool,
            Value::Integer(_) => ValueKind::Integer,
            Value::Float(_) => ValueKind::Float,
            Value::String(_) => ValueKind::String,
            Value::UserPointer(_) => ValueKind::UserPointer,
            Value::Object(object) => object.kind(),
        }
    }

    /// Get a human-readable name for this value's kind.
    pub fn type_name(&self) -> &'static str {
        self.kind().name()
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(object) => Some(object),
            _ => None,
        }
    }

    /// Access the heap object behind this value, if any.
    pub fn heap(&self) -> Option<&HeapObject> {
        self.as_object().map(ObjectRef::heap)
    }

    /// Identity comparison: primitives compare by value, objects by address.
    pub fn same(&self, other: &Value) -> bool {
        self == other
    }

    /// Number of strong references for objects, zero for primitives.
    pub fn ref_count(&self) -> usize {
        self.as_object().map_or(0, ObjectRef::ref_count)
    }

    /// Create a non-owning counterpart of this value.
    pub fn downgrade(&self) -> WeakValue {
        match self {
            Value::Object(object) => WeakValue::Object(object.downgrade()),
            other => WeakValue::Inline(other.clone()),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Integer(a), Value::Integer(b)) => a == b,
            // Bitwise so that equality agrees with `Hash`.
            (Value::Float(a), Value::Float(b)) => a.to_bits() == b.to_bits(),
            (Value::String(a), Value::String(b)) => a == b,
            (Value::UserPointer(a), Value::UserPointer(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        u8::from(self.kind()).hash(state);
        match self {
            Value::Null => {}
            Value::Bool(v) => v.hash(state),
            Value::Integer(v) => v.hash(state),
            Value::Float(v) => v.to_bits().hash(state),
            Value::String(s) => s.hash(state),
            Value::UserPointer(p) => p.hash(state),
            Value::Object(object) => object.address().hash(state),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Bool(v) => write!(f, "Bool({})", v),
            Value::Integer(v) => write!(f, "Integer({})", v),
            Value::Float(v) => write!(f, "Float({})", v),
            Value::String(s) => write!(f, "String({:?})", s),
            Value::UserPointer(p) => write!(f, "UserPointer({:#x})", p),
            Value::Object(object) => write!(f, "Object({:?})", object),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(Rc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Rc::from(v))
    }
}

impl From<Rc<str>> for Value {
    fn from(v: Rc<str>) -> Self {
        Value::String(v)
    }
}

impl From<ObjectRef> for Value {
    fn from(v: ObjectRef) -> Self {
        Value::Object(v)
    }
}

/// Non-owning counterpart of [`Value`].
///
/// Inline values are kept as-is; object references do not keep the object
/// alive.
#[derive(Clone, Debug)]
pub enum WeakValue {
    Inline(Value),
    Object(WeakObjectRef),
}

impl WeakValue {
    /// Recover the value if it is still alive.
    pub fn upgrade(&self) -> Option<Value> {
        match self {
            WeakValue::Inline(value) => Some(value.clone()),
            WeakValue::Object(weak) => weak.upgrade().map(Value::Object),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::HeapObject;
    use crate::table::Table;
    use std::cell::RefCell;

    fn table() -> Value {
        Value::Object(ObjectRef::new(HeapObject::Table(RefCell::new(Table::new()))))
    }

    #[test]
    fn value_type_names() {
        assert_eq!(Value::Null.type_name(), "null");
        assert_eq!(Value::Integer(0).type_name(), "integer");
        assert_eq!(Value::Float(0.0).type_name(), "float");
        assert_eq!(Value::Bool(false).type_name(), "bool");
        assert_eq!(Value::from("").type_name(), "string");
        assert_eq!(table().type_name(), "table");
    }

    #[test]
    fn object_equality_is_identity() {
        let a = table();
        let b = table();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn ref_count_tracks_clones() {
        let a = table();
        assert_eq!(a.ref_count(), 1);
        let b = a.clone();
        assert_eq!(a.ref_count(), 2);
        drop(b);
        assert_eq!(a.ref_count(), 1);
        assert_eq!(Value::Integer(3).ref_count(), 0);
    }

    #[test]
    fn weak_value_does_not_keep_object_alive() {
        let a = table();
        let weak = a.downgrade();
        assert!(weak.upgrade().is_some());
        drop(a);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn weak_inline_values_always_upgrade() {
        let weak = Value::Integer(7).downgrade();
        assert_eq!(weak.upgrade(), Some(Value::Integer(7)));
    }

    #[test]
    fn kind_roundtrips_through_u8() {
        for raw in 0..ValueKind::COUNT {
            let kind = ValueKind::try_from(raw).unwrap();
            assert_eq!(u8::from(kind), raw);
        }
        assert!(ValueKind::try_from(ValueKind::COUNT).is_err());
    }

    #[test]
    fn object_kinds() {
        assert!(ValueKind::Table.is_object());
        assert!(ValueKind::Instance.is_object());
        assert!(!ValueKind::String.is_object());
    }

    #[test]
    fn debug_format() {
        assert_eq!(format!("{:?}", Value::Integer(42)), "Integer(42)");
        assert!(format!("{:?}", table()).starts_with("Object(table@"));
    }
}
