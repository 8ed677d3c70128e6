//! Fluent builders that register native functions, values and classes.
//!
//! - [`Table`]: functions and values on a script table (or the root table)
//! - [`ConstTable`] and [`Enumeration`]: compile-time constants
//! - [`Class`]: a bound native type with its methods, members and
//!   constructors

mod class;
mod table;

pub use class::{Class, Constructor};
pub use table::{ConstTable, Enumeration, Table};
pub(crate) use table::to_value;

use sqbridge_core::{NativeClosure, ParamCheck, TypeMask, Value, Vm, VmError};
use tracing::debug;

use crate::error::BindResult;
use crate::forward::{NativeFunction, native_closure};
use crate::overload::{dispatcher, mangle};

/// Create or overwrite `name` on a table or class.
pub(crate) fn new_slot(vm: &mut Vm, target: &Value, name: &str, value: Value) -> BindResult<()> {
    vm.new_slot(target, Value::from(name), value)?;
    Ok(())
}

pub(crate) fn bind_function<M, F>(vm: &mut Vm, target: &Value, name: &str, f: F) -> BindResult<()>
where
    M: 'static,
    F: NativeFunction<M>,
{
    let closure = vm.new_closure(native_closure(name, f, true));
    new_slot(vm, target, name, closure)?;
    debug!(target: "sqbridge::registry", name, arity = F::ARITY, "bound function");
    Ok(())
}

/// Bind one overload of `name`, keyed by the callable's arity.
pub(crate) fn bind_overload<M, F>(vm: &mut Vm, target: &Value, name: &str, f: F) -> BindResult<()>
where
    M: 'static,
    F: NativeFunction<M>,
{
    let mangled = mangle(name, F::ARITY);
    let closure = vm.new_closure(native_closure(&mangled, f, false));
    new_slot(vm, target, &mangled, closure)?;
    let front = vm.new_closure(dispatcher(name));
    new_slot(vm, target, name, front)?;
    debug!(target: "sqbridge::registry", name, arity = F::ARITY, "bound overload");
    Ok(())
}

/// Bind a raw VM closure with a parameter count check and type mask.
///
/// `params` counts `this`; a negative value means "at least `-params`" and
/// zero disables the check.
pub(crate) fn bind_raw<F>(
    vm: &mut Vm,
    target: &Value,
    name: &str,
    f: F,
    params: isize,
    typemask: Option<&str>,
) -> BindResult<()>
where
    F: Fn(&mut Vm) -> Result<usize, VmError> + 'static,
{
    let mut closure = NativeClosure::from_fn(name, f).with_params(ParamCheck::from_count(params));
    if let Some(mask) = typemask {
        closure = closure.with_typemask(TypeMask::parse(mask)?);
    }
    let closure = vm.new_closure(closure);
    new_slot(vm, target, name, closure)?;
    debug!(target: "sqbridge::registry", name, params, "bound raw closure");
    Ok(())
}
