//! Class builder for bound native types.

use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use sqbridge_core::vm::{CONSTRUCTOR, META_CLONED, META_GET, META_SET};
use sqbridge_core::{NativeClosure, TypeHash, Value, Vm, VmError};
use tracing::debug;

use super::{bind_function, bind_overload, bind_raw, new_slot};
use crate::context::BindingContext;
use crate::error::{BindError, BindResult};
use crate::forward::{FIRST_ARG, NativeFunction, native_closure, trampoline};
use crate::instance_registry::{NativeObject, Ownership};
use crate::marshal::{Bindable, FromScript, InstanceRef, ToScript, attach};
use crate::policy::{AllocatorFlags, AllocatorPolicy, DefaultAllocator};
use crate::type_registry::{
    CopyFn, Inherits, TypeDescriptor, TypeRegistration, Upcast, UpcastMut, copy_with, upcast, upcast_mut,
};

/// A native constructor callable from scripts, selected by argument count.
pub trait Constructor<T, Args>: 'static {
    const ARITY: usize;

    /// Read the constructor arguments of the current frame and build a `T`.
    fn construct(&self, vm: &mut Vm) -> BindResult<T>;
}

macro_rules! impl_constructor {
    ($count:expr $(; $($arg:ident $var:ident $pos:expr),+)?) => {
        impl<F, T $($(, $arg)+)?> Constructor<T, ($($($arg,)+)?)> for F
        where
            F: Fn($($($arg),+)?) -> T + 'static,
            $($($arg: FromScript,)+)?
        {
            const ARITY: usize = $count;

            #[allow(unused_variables)]
            fn construct(&self, vm: &mut Vm) -> BindResult<T> {
                $($(let $var = $arg::from_script(vm, FIRST_ARG + $pos)?;)+)?
                Ok((self)($($($var),+)?))
            }
        }
    };
}

impl_constructor!(0);
impl_constructor!(1; A1 a1 0);
impl_constructor!(2; A1 a1 0, A2 a2 1);
impl_constructor!(3; A1 a1 0, A2 a2 1, A3 a3 2);
impl_constructor!(4; A1 a1 0, A2 a2 1, A3 a3 2, A4 a4 3);
impl_constructor!(5; A1 a1 0, A2 a2 1, A3 a3 2, A4 a4 3, A5 a5 4);
impl_constructor!(6; A1 a1 0, A2 a2 1, A3 a3 2, A4 a4 3, A5 a5 4, A6 a6 5);
impl_constructor!(7; A1 a1 0, A2 a2 1, A3 a3 2, A4 a4 3, A5 a5 4, A6 a6 5, A7 a7 6);
impl_constructor!(8; A1 a1 0, A2 a2 1, A3 a3 2, A4 a4 3, A5 a5 4, A6 a6 5, A7 a7 6, A8 a8 7);
impl_constructor!(9; A1 a1 0, A2 a2 1, A3 a3 2, A4 a4 3, A5 a5 4, A6 a6 5, A7 a7 6, A8 a8 7, A9 a9 8);
impl_constructor!(10; A1 a1 0, A2 a2 1, A3 a3 2, A4 a4 3, A5 a5 4, A6 a6 5, A7 a7 6, A8 a8 7, A9 a9 8, A10 a10 9);

/// Builder for registering a native type as a script class.
///
/// The allocator policy `A` decides whether scripts may construct, copy
/// and destroy instances; see [`policy`](crate::policy).
///
/// # Type Parameters
///
/// - `'vm`: Lifetime of the mutable borrow of the VM
/// - `T`: The Rust type being bound
/// - `A`: The allocator policy, [`DefaultAllocator`] unless given
///
/// # Example
///
/// ```
/// use sqbridge::{Class, Value, Vm};
///
/// #[derive(Debug, Default, Clone)]
/// struct Point { x: i32, y: i32 }
///
/// impl sqbridge::Bindable for Point {}
///
/// let mut vm = Vm::new();
/// let class = Class::<Point>::new(&mut vm, "Point")?
///     .ctor(|x: i32, y: i32| Point { x, y })?
///     .var("x", |p: &Point| p.x, |p: &mut Point, x: i32| p.x = x)?
///     .var("y", |p: &Point| p.y, |p: &mut Point, y: i32| p.y = y)?
///     .func("sum", |p: &Point| p.x + p.y)?
///     .build()?;
///
/// let point = vm.call_value(&class, &Value::Null, &[Value::Integer(1), Value::Integer(2)])?;
/// vm.set_slot(&point, Value::from("x"), Value::Integer(5))?;
/// assert_eq!(vm.call_method(&point, "sum", &[])?, Value::Integer(7));
/// # Ok::<(), sqbridge::BindError>(())
/// ```
pub struct Class<'vm, T, A = DefaultAllocator> {
    vm: &'vm mut Vm,
    descriptor: Rc<TypeDescriptor>,
    _marker: PhantomData<fn() -> (T, A)>,
}

impl<'vm, T, A> Class<'vm, T, A>
where
    T: Bindable,
    A: AllocatorPolicy<T>,
{
    /// Register `T` under `name`.
    ///
    /// Fails with `DuplicateRegistration` if `T` is already bound in this VM.
    pub fn new(vm: &'vm mut Vm, name: &str) -> BindResult<Self> {
        let class = vm.new_class(None)?;
        Self::create(vm, name, class, None)
    }

    /// Register `T` as deriving from the already bound type `B`.
    ///
    /// The script class inherits the base class's members, and `T` values
    /// are accepted wherever a `B` is expected.
    pub fn derived<B: 'static>(vm: &'vm mut Vm, name: &str) -> BindResult<Self>
    where
        T: Inherits<B>,
    {
        let base = BindingContext::of(vm).descriptor_of::<B>()?;
        let class = vm.new_class(Some(base.class()))?;
        let link: (TypeHash, Upcast, UpcastMut) = (TypeHash::of::<B>(), upcast::<T, B>, upcast_mut::<T, B>);
        Self::create(vm, name, class, Some(link))
    }

    fn create(
        vm: &'vm mut Vm,
        name: &str,
        class: Value,
        base: Option<(TypeHash, Upcast, UpcastMut)>,
    ) -> BindResult<Self> {
        let ctx = BindingContext::of(vm);
        let copy = A::FLAGS
            .contains(AllocatorFlags::COPY)
            .then_some(copy_with::<T, A> as CopyFn);
        let descriptor = ctx.types().borrow_mut().register(TypeRegistration {
            name: name.to_string(),
            hash: TypeHash::of::<T>(),
            base,
            copy,
            flags: A::FLAGS,
            class: class.clone(),
        })?;
        vm.set_type_tag(&class, TypeHash::of::<T>())?;
        install_metamethods::<T, A>(vm, &class)?;
        Ok(Self {
            vm,
            descriptor,
            _marker: PhantomData,
        })
    }

    /// Bind a method or static function under `name`.
    ///
    /// Methods take the receiver as their first parameter, `&T` or `&mut T`.
    pub fn func<M, F>(self, name: &str, f: F) -> BindResult<Self>
    where
        M: 'static,
        F: NativeFunction<M>,
    {
        bind_function(self.vm, self.descriptor.class(), name, f)?;
        Ok(self)
    }

    /// Bind one overload of `name`, selected by argument count.
    pub fn overload<M, F>(self, name: &str, f: F) -> BindResult<Self>
    where
        M: 'static,
        F: NativeFunction<M>,
    {
        bind_overload(self.vm, self.descriptor.class(), name, f)?;
        Ok(self)
    }

    /// Bind a raw VM closure as a method. See [`Table::squirrel_func`](crate::Table::squirrel_func).
    pub fn squirrel_func<F>(self, name: &str, f: F, params: isize, typemask: Option<&str>) -> BindResult<Self>
    where
        F: Fn(&mut Vm) -> Result<usize, VmError> + 'static,
    {
        bind_raw(self.vm, self.descriptor.class(), name, f, params, typemask)?;
        Ok(self)
    }

    /// Bind a read-write data member.
    pub fn var<MG, G, MS, S>(self, name: &str, getter: G, setter: S) -> BindResult<Self>
    where
        MG: 'static,
        G: NativeFunction<MG>,
        MS: 'static,
        S: NativeFunction<MS>,
    {
        let get = self.vm.new_closure(native_closure(name, getter, true));
        let set = self.vm.new_closure(native_closure(name, setter, true));
        self.descriptor.add_getter(name, get);
        self.descriptor.add_setter(name, set);
        debug!(target: "sqbridge::registry", class = %self.descriptor.name(), name, "bound member");
        Ok(self)
    }

    /// Bind a read-only data member. Script writes fail with
    /// "Variable not found".
    pub fn const_var<MG, G>(self, name: &str, getter: G) -> BindResult<Self>
    where
        MG: 'static,
        G: NativeFunction<MG>,
    {
        let get = self.vm.new_closure(native_closure(name, getter, true));
        self.descriptor.add_getter(name, get);
        debug!(target: "sqbridge::registry", class = %self.descriptor.name(), name, "bound read-only member");
        Ok(self)
    }

    /// Bind a member shared by every instance, backed by `cell`.
    pub fn static_var<V>(self, name: &str, cell: Rc<RefCell<V>>) -> BindResult<Self>
    where
        V: FromScript + ToScript + Clone + 'static,
    {
        let read = cell.clone();
        self.var(
            name,
            move || read.borrow().clone(),
            move |value: V| {
                *cell.borrow_mut() = value;
            },
        )
    }

    /// Add a constructor taking `Constructor::ARITY` script arguments.
    ///
    /// Refused with `ConstructionForbidden` when the policy does not allow
    /// scripts to construct `T`.
    pub fn ctor<Args, F>(self, f: F) -> BindResult<Self>
    where
        Args: 'static,
        F: Constructor<T, Args>,
    {
        if !A::FLAGS.contains(AllocatorFlags::CONSTRUCT) {
            return Err(BindError::ConstructionForbidden(self.descriptor.name().to_string()));
        }
        self.descriptor.add_ctor(
            F::ARITY,
            Rc::new(move |vm: &mut Vm| {
                let value = f.construct(vm)?;
                let object: NativeObject = Rc::new(RefCell::new(value));
                Ok(object)
            }),
        );
        Ok(self)
    }

    pub fn descriptor(&self) -> &Rc<TypeDescriptor> {
        &self.descriptor
    }

    /// The script class object.
    pub fn class(&self) -> &Value {
        self.descriptor.class()
    }

    /// Store the class in the root table under its name.
    pub fn build(self) -> BindResult<Value> {
        let root = self.vm.root_table();
        self.build_in(&root)
    }

    /// Store the class in `table` under its name.
    pub fn build_in(self, table: &Value) -> BindResult<Value> {
        let class = self.descriptor.class().clone();
        new_slot(self.vm, table, self.descriptor.name(), class.clone())?;
        debug!(target: "sqbridge::registry", class = %self.descriptor.name(), "bound class");
        Ok(class)
    }
}

impl<T, A> fmt::Debug for Class<'_, T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Class").field("descriptor", &self.descriptor).finish()
    }
}

// ============================================================================
// Metamethods
// ============================================================================

fn install_metamethods<T, A>(vm: &mut Vm, class: &Value) -> BindResult<()>
where
    T: Bindable,
    A: AllocatorPolicy<T>,
{
    let closures = [
        (CONSTRUCTOR, NativeClosure::from_fn(CONSTRUCTOR, |vm: &mut Vm| trampoline(vm, construct::<T, A>))),
        (META_CLONED, NativeClosure::from_fn(META_CLONED, |vm: &mut Vm| trampoline(vm, clone_native::<T>))),
        (META_GET, NativeClosure::from_fn(META_GET, |vm: &mut Vm| trampoline(vm, get_member::<T>))),
        (META_SET, NativeClosure::from_fn(META_SET, |vm: &mut Vm| trampoline(vm, set_member::<T>))),
    ];
    for (name, closure) in closures {
        let closure = vm.new_closure(closure);
        new_slot(vm, class, name, closure)?;
    }
    Ok(())
}

/// `constructor(this, ..)`: build the native object and attach it.
fn construct<T, A>(vm: &mut Vm) -> BindResult<usize>
where
    T: Bindable,
    A: AllocatorPolicy<T>,
{
    let descriptor = BindingContext::of(vm).descriptor_of::<T>()?;
    if !A::FLAGS.contains(AllocatorFlags::CONSTRUCT) {
        return Err(BindError::ConstructionForbidden(descriptor.name().to_string()));
    }
    let argc = vm.top().saturating_sub(1);
    let this = vm.value_at(1)?;
    let object: NativeObject = match descriptor.ctor(argc) {
        Some(ctor) => ctor(vm)?,
        None if argc == 0 => Rc::new(RefCell::new(A::construct(descriptor.name())?)),
        None => {
            return Err(BindError::OverloadNotFound {
                name: CONSTRUCTOR.to_string(),
                argc,
            });
        }
    };
    attach(vm, &this, &descriptor, object, Ownership::Owned)?;
    Ok(0)
}

/// `_cloned(copy, original)`: copy the native object into the new instance.
fn clone_native<T: Bindable>(vm: &mut Vm) -> BindResult<usize> {
    let descriptor = BindingContext::of(vm).descriptor_of::<T>()?;
    let copy_instance = vm.value_at(1)?;
    let original = InstanceRef::<T>::from_script(vm, FIRST_ARG)?;
    let copied = {
        let source = original.borrow()?;
        descriptor.copy(&*source)?
    };
    let value = copied
        .downcast::<T>()
        .map_err(|_| BindError::mismatch(descriptor.name(), "foreign object"))?;
    let object: NativeObject = Rc::new(RefCell::new(*value));
    attach(vm, &copy_instance, &descriptor, object, Ownership::Owned)?;
    Ok(0)
}

/// Look a member accessor up along the bound base chain of `T`.
fn find_accessor<T: 'static>(vm: &Vm, name: &str, setter: bool) -> Option<Value> {
    let ctx = BindingContext::get(vm)?;
    let types = ctx.types().borrow();
    types.chain(TypeHash::of::<T>()).find_map(|descriptor| {
        if setter {
            descriptor.setter(name)
        } else {
            descriptor.getter(name)
        }
    })
}

fn key_name(key: &Value) -> String {
    match key.as_str() {
        Some(name) => name.to_string(),
        None => key.type_name().to_string(),
    }
}

/// `_get(this, key)`: route reads of bound members to their getter.
fn get_member<T: 'static>(vm: &mut Vm) -> BindResult<usize> {
    let this = vm.value_at(1)?;
    let key = vm.value_at(FIRST_ARG)?;
    let getter = key.as_str().and_then(|name| find_accessor::<T>(vm, name, false));
    let Some(getter) = getter else {
        return Err(VmError::IndexNotFound(key_name(&key)).into());
    };
    let value = vm.call_value(&getter, &this, &[])?;
    vm.push(value);
    Ok(1)
}

/// `_set(this, key, value)`: route writes of bound members to their setter.
fn set_member<T: 'static>(vm: &mut Vm) -> BindResult<usize> {
    let this = vm.value_at(1)?;
    let key = vm.value_at(FIRST_ARG)?;
    let value = vm.value_at(FIRST_ARG + 1)?;
    let setter = key.as_str().and_then(|name| find_accessor::<T>(vm, name, true));
    let Some(setter) = setter else {
        return Err(BindError::VariableNotFound { name: key_name(&key) });
    };
    vm.call_value(&setter, &this, &[value])?;
    Ok(0)
}
