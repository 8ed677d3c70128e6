//! Conversion between native values and VM stack slots.
//!
//! - [`FromScript`]: read a stack slot into a Rust value
//! - [`ToScript`]: push a Rust value as exactly one stack slot
//! - [`ReturnValue`]: push whatever a native callable returned
//! - [`ScriptArgs`]: push a tuple of call arguments
//!
//! ## Supported Types
//!
//! - `bool`, all integer widths, `f32`/`f64` (duck-typed, see [`BindingConfig`])
//! - `String`, `Rc<str>`, `char`, [`ScriptStr`], [`FormatStr`]
//! - `*const T`, `*mut T` as user pointers
//! - `Option<T>` (null is `None`)
//! - bound classes by value, through [`InstanceRef`], or as `Rc<RefCell<T>>`
//! - [`Value`] and the handle types, passed through unchanged
//!
//! ## Example
//!
//! ```
//! use sqbridge::{FromScript, ToScript, Vm};
//!
//! let mut vm = Vm::new();
//! 42i32.to_script(&mut vm).unwrap();
//! assert_eq!(f64::from_script(&mut vm, -1).unwrap(), 42.0);
//! ```
//!
//! [`BindingConfig`]: crate::BindingConfig

mod class;
mod pointer;
mod primitive;
mod string;

pub use class::{Bindable, InstanceRef};
pub(crate) use class::attach;
pub use string::{FormatStr, ScriptStr};

use std::fmt::Display;

use sqbridge_core::{Value, Vm};

use crate::error::{BindError, BindResult};

/// Read a Rust value from a VM stack slot.
pub trait FromScript: Sized {
    /// Whether this type swallows surplus call arguments as printf-style
    /// parameters when it is the last parameter of a bound function.
    const AUTO_FORMAT: bool = false;

    /// Convert the value at `index`.
    ///
    /// The stack is left as it was found.
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self>;

    /// Convert the value at `index` when it is the last declared parameter
    /// and the frame holds `top` slots.
    fn from_script_tail(vm: &mut Vm, index: isize, top: usize) -> BindResult<Self> {
        let _ = top;
        Self::from_script(vm, index)
    }
}

/// Push a Rust value onto the VM stack.
pub trait ToScript {
    /// Push exactly one value on success and nothing on failure.
    fn to_script(self, vm: &mut Vm) -> BindResult<()>;
}

/// Result of a native callable, pushed back to the VM.
pub trait ReturnValue {
    /// Push the result and report how many values were pushed.
    fn push_return(self, vm: &mut Vm) -> BindResult<usize>;
}

impl ReturnValue for () {
    fn push_return(self, _vm: &mut Vm) -> BindResult<usize> {
        Ok(0)
    }
}

impl<T: ToScript> ReturnValue for T {
    fn push_return(self, vm: &mut Vm) -> BindResult<usize> {
        self.to_script(vm)?;
        Ok(1)
    }
}

/// Fallible callables surface their error as a native exception.
impl<R: ReturnValue, E: Display> ReturnValue for Result<R, E> {
    fn push_return(self, vm: &mut Vm) -> BindResult<usize> {
        match self {
            Ok(value) => value.push_return(vm),
            Err(err) => Err(BindError::NativeException(err.to_string())),
        }
    }
}

/// A marshalled value of type `T`.
///
/// Thin wrapper used where the direction of a conversion should be explicit
/// at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Var<T>(pub T);

impl<T: FromScript> Var<T> {
    pub fn read(vm: &mut Vm, index: isize) -> BindResult<Self> {
        T::from_script(vm, index).map(Var)
    }
}

impl<T: ToScript> Var<T> {
    pub fn push(self, vm: &mut Vm) -> BindResult<()> {
        self.0.to_script(vm)
    }
}

impl<T> Var<T> {
    pub fn into_inner(self) -> T {
        self.0
    }
}

// ============================================================================
// Pass-through
// ============================================================================

impl FromScript for Value {
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        Ok(vm.value_at(index)?)
    }
}

impl ToScript for Value {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        vm.push(self);
        Ok(())
    }
}

impl ToScript for &Value {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        vm.push(self.clone());
        Ok(())
    }
}

// ============================================================================
// Argument lists
// ============================================================================

/// Arguments of a script call made from native code.
pub trait ScriptArgs {
    const COUNT: usize;

    /// Push every argument, left to right.
    ///
    /// On failure some arguments may already be on the stack; callers run
    /// under a stack guard.
    fn push_all(self, vm: &mut Vm) -> BindResult<()>;
}

impl ScriptArgs for () {
    const COUNT: usize = 0;

    fn push_all(self, _vm: &mut Vm) -> BindResult<()> {
        Ok(())
    }
}

macro_rules! impl_script_args {
    ($count:expr; $($name:ident),+) => {
        impl<$($name: ToScript),+> ScriptArgs for ($($name,)+) {
            const COUNT: usize = $count;

            #[allow(non_snake_case)]
            fn push_all(self, vm: &mut Vm) -> BindResult<()> {
                let ($($name,)+) = self;
                $($name.to_script(vm)?;)+
                Ok(())
            }
        }
    };
}

impl_script_args!(1; A1);
impl_script_args!(2; A1, A2);
impl_script_args!(3; A1, A2, A3);
impl_script_args!(4; A1, A2, A3, A4);
impl_script_args!(5; A1, A2, A3, A4, A5);
impl_script_args!(6; A1, A2, A3, A4, A5, A6);
impl_script_args!(7; A1, A2, A3, A4, A5, A6, A7);
impl_script_args!(8; A1, A2, A3, A4, A5, A6, A7, A8);
impl_script_args!(9; A1, A2, A3, A4, A5, A6, A7, A8, A9);
impl_script_args!(10; A1, A2, A3, A4, A5, A6, A7, A8, A9, A10);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_pass_through_keeps_identity() {
        let mut vm = Vm::new();
        let table = vm.new_table();
        (&table).to_script(&mut vm).unwrap();
        let read = Value::from_script(&mut vm, -1).unwrap();
        assert!(read.same(&table));
        assert_eq!(vm.top(), 1);
    }

    #[test]
    fn unit_returns_nothing() {
        let mut vm = Vm::new();
        assert_eq!(().push_return(&mut vm).unwrap(), 0);
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn result_error_becomes_native_exception() {
        let mut vm = Vm::new();
        let result: Result<i32, String> = Err("boom".to_string());
        assert_eq!(
            result.push_return(&mut vm),
            Err(BindError::NativeException("boom".to_string()))
        );
        assert_eq!(vm.top(), 0);

        let ok: Result<i32, String> = Ok(3);
        assert_eq!(ok.push_return(&mut vm).unwrap(), 1);
        assert_eq!(vm.get(-1).unwrap(), &Value::Integer(3));
    }

    #[test]
    fn tuples_push_left_to_right() {
        let mut vm = Vm::new();
        (1i32, "two", 3.0f64).push_all(&mut vm).unwrap();
        assert_eq!(<(i32, &str, f64) as ScriptArgs>::COUNT, 3);
        assert_eq!(vm.get(1).unwrap(), &Value::Integer(1));
        assert_eq!(vm.get(2).unwrap().as_str(), Some("two"));
        assert_eq!(vm.get(3).unwrap(), &Value::Float(3.0));
    }

    #[test]
    fn var_wraps_both_directions() {
        let mut vm = Vm::new();
        Var(7u8).push(&mut vm).unwrap();
        assert_eq!(Var::<i64>::read(&mut vm, 1).unwrap().into_inner(), 7);
    }
}
