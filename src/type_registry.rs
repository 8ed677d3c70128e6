//! Per-type metadata and safe upcasting through the base chain.
//!
//! Every bound native type has exactly one [`TypeDescriptor`] per VM. The
//! descriptors live in an arena owned by the [`TypeRegistry`]; a derived
//! type links to its nearest bound base by arena index and carries the
//! projection that turns a reference to itself into a reference to that
//! base. Walking those links is how an instance of a derived type is handed
//! to a method of one of its bases.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use sqbridge_core::{TypeHash, Value, Vm};
use tracing::debug;

use crate::error::{BindError, BindResult};
use crate::instance_registry::{InstanceRegistry, NativeObject};
use crate::policy::{AllocatorFlags, AllocatorPolicy};

/// Projection from a derived object to its direct base.
pub type Upcast = fn(&dyn Any) -> Option<&dyn Any>;
/// Mutable projection from a derived object to its direct base.
pub type UpcastMut = fn(&mut dyn Any) -> Option<&mut dyn Any>;
/// Type-erased copy through the type's allocator policy.
pub type CopyFn = fn(&dyn Any, &str) -> BindResult<Box<dyn Any>>;
/// Constructor selected by script argument count.
pub type CtorFn = Rc<dyn Fn(&mut Vm) -> BindResult<NativeObject>>;

/// Composition-based inheritance: `Self` embeds a `B` it can expose.
///
/// ```
/// use sqbridge::Inherits;
///
/// #[derive(Default, Clone)]
/// struct Shape { id: u32 }
///
/// #[derive(Default, Clone)]
/// struct Circle { shape: Shape, radius: f64 }
///
/// impl Inherits<Shape> for Circle {
///     fn base(&self) -> &Shape { &self.shape }
///     fn base_mut(&mut self) -> &mut Shape { &mut self.shape }
/// }
/// ```
pub trait Inherits<B: 'static>: 'static {
    fn base(&self) -> &B;
    fn base_mut(&mut self) -> &mut B;
}

pub(crate) fn upcast<D: Inherits<B>, B: 'static>(value: &dyn Any) -> Option<&dyn Any> {
    value.downcast_ref::<D>().map(|derived| derived.base() as &dyn Any)
}

pub(crate) fn upcast_mut<D: Inherits<B>, B: 'static>(value: &mut dyn Any) -> Option<&mut dyn Any> {
    value
        .downcast_mut::<D>()
        .map(|derived| derived.base_mut() as &mut dyn Any)
}

pub(crate) fn copy_with<T: 'static, A: AllocatorPolicy<T>>(
    value: &dyn Any,
    class_name: &str,
) -> BindResult<Box<dyn Any>> {
    let source = value
        .downcast_ref::<T>()
        .ok_or_else(|| BindError::mismatch(class_name, "foreign object"))?;
    let copy = A::copy(source, class_name)?;
    Ok(Box::new(copy))
}

/// Index of a descriptor in the registry arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeIndex(u32);

/// Registration request for a new type.
pub struct TypeRegistration {
    pub name: String,
    pub hash: TypeHash,
    pub base: Option<(TypeHash, Upcast, UpcastMut)>,
    pub copy: Option<CopyFn>,
    pub flags: AllocatorFlags,
    pub class: Value,
}

/// Metadata for one bound native type.
pub struct TypeDescriptor {
    name: String,
    hash: TypeHash,
    index: TypeIndex,
    base: Option<TypeIndex>,
    upcast: Option<(Upcast, UpcastMut)>,
    copy: Option<CopyFn>,
    flags: AllocatorFlags,
    instances: Rc<InstanceRegistry>,
    class: Value,
    getters: RefCell<FxHashMap<Rc<str>, Value>>,
    setters: RefCell<FxHashMap<Rc<str>, Value>>,
    ctors: RefCell<FxHashMap<usize, CtorFn>>,
}

impl TypeDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hash(&self) -> TypeHash {
        self.hash
    }

    pub fn index(&self) -> TypeIndex {
        self.index
    }

    pub fn base(&self) -> Option<TypeIndex> {
        self.base
    }

    pub fn flags(&self) -> AllocatorFlags {
        self.flags
    }

    pub fn is_copyable(&self) -> bool {
        self.copy.is_some()
    }

    /// Copy a native object of this exact type.
    pub fn copy(&self, value: &dyn Any) -> BindResult<Box<dyn Any>> {
        match self.copy {
            Some(copy) => copy(value, &self.name),
            None => Err(BindError::CloningForbidden(self.name.clone())),
        }
    }

    pub fn instances(&self) -> &Rc<InstanceRegistry> {
        &self.instances
    }

    /// The script class object of this type.
    pub fn class(&self) -> &Value {
        &self.class
    }

    pub(crate) fn add_getter(&self, name: &str, getter: Value) {
        self.getters.borrow_mut().insert(Rc::from(name), getter);
    }

    pub(crate) fn add_setter(&self, name: &str, setter: Value) {
        self.setters.borrow_mut().insert(Rc::from(name), setter);
    }

    pub(crate) fn getter(&self, name: &str) -> Option<Value> {
        self.getters.borrow().get(name).cloned()
    }

    pub(crate) fn setter(&self, name: &str) -> Option<Value> {
        self.setters.borrow().get(name).cloned()
    }

    pub(crate) fn add_ctor(&self, arity: usize, ctor: CtorFn) {
        self.ctors.borrow_mut().insert(arity, ctor);
    }

    pub(crate) fn ctor(&self, arity: usize) -> Option<CtorFn> {
        self.ctors.borrow().get(&arity).cloned()
    }
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("hash", &self.hash)
            .field("base", &self.base)
            .field("flags", &self.flags)
            .field("copyable", &self.copy.is_some())
            .finish()
    }
}

/// Arena of type descriptors keyed by type hash.
#[derive(Debug, Default)]
pub struct TypeRegistry {
    types: Vec<Rc<TypeDescriptor>>,
    by_hash: FxHashMap<TypeHash, TypeIndex>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the descriptor for a type.
    ///
    /// Fails with `DuplicateRegistration` if the type is already known and
    /// with `UnregisteredType` if its base has not been registered yet, so
    /// base chains are always acyclic.
    pub fn register(&mut self, registration: TypeRegistration) -> BindResult<Rc<TypeDescriptor>> {
        if self.by_hash.contains_key(&registration.hash) {
            return Err(BindError::DuplicateRegistration(registration.name));
        }
        let (base, upcast) = match registration.base {
            Some((base_hash, up, up_mut)) => {
                let base_index = self
                    .by_hash
                    .get(&base_hash)
                    .copied()
                    .ok_or_else(|| BindError::UnregisteredType(format!("base of {}", registration.name)))?;
                (Some(base_index), Some((up, up_mut)))
            }
            None => (None, None),
        };
        let index = TypeIndex(self.types.len() as u32);
        let descriptor = Rc::new(TypeDescriptor {
            instances: Rc::new(InstanceRegistry::new(&registration.name)),
            name: registration.name,
            hash: registration.hash,
            index,
            base,
            upcast,
            copy: registration.copy,
            flags: registration.flags,
            class: registration.class,
            getters: RefCell::default(),
            setters: RefCell::default(),
            ctors: RefCell::default(),
        });
        debug!(
            target: "sqbridge::registry",
            name = %descriptor.name,
            hash = %descriptor.hash,
            base = ?descriptor.base,
            "registered type"
        );
        self.by_hash.insert(descriptor.hash, index);
        self.types.push(descriptor.clone());
        Ok(descriptor)
    }

    pub fn get(&self, hash: TypeHash) -> Option<Rc<TypeDescriptor>> {
        self.by_hash.get(&hash).map(|&index| self.types[index.0 as usize].clone())
    }

    pub fn at(&self, index: TypeIndex) -> Option<&Rc<TypeDescriptor>> {
        self.types.get(index.0 as usize)
    }

    /// Never fails.
    pub fn has_registration(&self, hash: TypeHash) -> bool {
        self.by_hash.contains_key(&hash)
    }

    pub fn class_name(&self, hash: TypeHash) -> BindResult<String> {
        self.get(hash)
            .map(|descriptor| descriptor.name.clone())
            .ok_or_else(|| BindError::UnregisteredType(format!("{hash}")))
    }

    /// Base descriptor of `hash`, if any.
    pub fn base_of(&self, hash: TypeHash) -> Option<Rc<TypeDescriptor>> {
        let descriptor = self.get(hash)?;
        descriptor.base.and_then(|index| self.at(index).cloned())
    }

    /// Iterate a type and its bases, most derived first.
    pub fn chain(&self, hash: TypeHash) -> impl Iterator<Item = &Rc<TypeDescriptor>> {
        let start = self.by_hash.get(&hash).and_then(|&index| self.at(index));
        std::iter::successors(start, move |descriptor| descriptor.base.and_then(|index| self.at(index)))
    }

    /// Upcast projections leading from `from` to `to`.
    ///
    /// Empty when `from == to`; `None` when `to` is not a base of `from`.
    pub fn cast_path(&self, from: TypeHash, to: TypeHash) -> Option<Vec<(Upcast, UpcastMut)>> {
        let mut path = Vec::new();
        for descriptor in self.chain(from) {
            if descriptor.hash == to {
                return Some(path);
            }
            path.push(descriptor.upcast?);
        }
        None
    }

    /// Apply the upcast chain from `from` to `to` to a native reference.
    pub fn cast<'a>(&self, value: &'a dyn Any, from: TypeHash, to: TypeHash) -> Option<&'a dyn Any> {
        self.cast_path(from, to)?
            .iter()
            .try_fold(value, |current, (up, _)| up(current))
    }

    /// Mutable counterpart of [`cast`](Self::cast).
    pub fn cast_mut<'a>(
        &self,
        value: &'a mut dyn Any,
        from: TypeHash,
        to: TypeHash,
    ) -> Option<&'a mut dyn Any> {
        self.cast_path(from, to)?
            .iter()
            .try_fold(value, |current, (_, up)| up(current))
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
