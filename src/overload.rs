//! Arity-based overloading.
//!
//! The VM's native call convention has no notion of overloads, so each
//! overload of `name` taking `argc` arguments is stored under the mangled
//! name `_o<argc>_<name>`, and `name` itself holds a dispatcher closure. The
//! dispatcher counts the supplied arguments, looks the mangled target up on
//! `this` without metamethods, and calls it with the same `this` and
//! arguments.

use sqbridge_core::{NativeClosure, Value, Vm, VmError};

use crate::error::{BindError, errors};

/// Mangled name of the `argc`-argument overload of `name`.
pub fn mangle(name: &str, argc: usize) -> String {
    format!("_o{argc}_{name}")
}

/// Dispatcher closure for the overload set `name`.
pub(crate) fn dispatcher(name: &str) -> NativeClosure {
    NativeClosure::from_fn(name, dispatch).with_free_vars(vec![Value::from(name)])
}

#[cfg_attr(feature = "profiling", profiling::function)]
fn dispatch(vm: &mut Vm) -> Result<usize, VmError> {
    let name = vm.free_variable(0)?;
    let name = name.as_str().unwrap_or_default().to_string();
    let top = vm.top();
    let argc = top.saturating_sub(1);
    let this = vm.value_at(1)?;
    let target = vm.raw_get(&this, &Value::from(mangle(&name, argc)));
    let Some(target) = target else {
        return Err(errors::raise(vm, BindError::OverloadNotFound { name, argc }));
    };
    vm.push(target);
    for index in 1..=top {
        vm.push_copy(index as isize)?;
    }
    vm.call(top, true)?;
    Ok(1)
}
