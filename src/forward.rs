//! Forwarding of script calls into typed Rust callables.
//!
//! A bound callable is any `Fn` whose parameters implement [`FromScript`]
//! and whose result implements [`ReturnValue`]. The marker types
//! [`Static`], [`Method`] and [`MethodMut`] tell the three shapes apart:
//!
//! - `Fn(A1, .., An) -> R`: free function, `this` is ignored
//! - `Fn(&T, A1, .., An) -> R`: method reading the native `T` behind `this`
//! - `Fn(&mut T, A1, .., An) -> R`: method mutating it
//!
//! Arguments are read left to right from stack index 2; index 1 holds
//! `this`. Up to ten arguments are supported.
//!
//! The trampoline built by [`native_closure`] is the only place where a
//! [`BindError`] or a panic turns into a script error.

use std::any::Any;
use std::marker::PhantomData;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use sqbridge_core::{NativeClosure, NativeFn, Vm, VmError};
use tracing::warn;

use crate::error::{BindError, BindResult, errors};
use crate::marshal::{FromScript, InstanceRef, ReturnValue};

/// Stack index of the first declared argument.
pub const FIRST_ARG: isize = 2;

/// Marker for free functions taking `Args`.
pub struct Static<Args, R>(PhantomData<fn(Args) -> R>);

/// Marker for methods borrowing `T` immutably.
pub struct Method<T, Args, R>(PhantomData<fn(&T, Args) -> R>);

/// Marker for methods borrowing `T` mutably.
pub struct MethodMut<T, Args, R>(PhantomData<fn(&mut T, Args) -> R>);

/// A Rust callable that can be invoked from a native VM frame.
pub trait NativeFunction<Marker>: 'static {
    /// Number of declared script arguments, not counting `this`.
    const ARITY: usize;

    /// Whether the last declared argument absorbs surplus arguments.
    const AUTO_FORMAT: bool;

    /// Read the arguments of the current frame, run the callable and push
    /// its result. Returns the number of values pushed.
    ///
    /// With `validate` set the supplied argument count is checked first.
    fn invoke(&self, vm: &mut Vm, validate: bool) -> BindResult<usize>;
}

pub(crate) const fn last_flag(flags: &[bool]) -> bool {
    if flags.is_empty() { false } else { flags[flags.len() - 1] }
}

/// Check the supplied argument count against a declared arity.
pub(crate) fn check_arity(arity: usize, auto_format: bool, supplied: usize) -> BindResult<()> {
    let accepted = if auto_format {
        supplied >= arity
    } else {
        supplied == arity
    };
    if accepted {
        Ok(())
    } else {
        Err(BindError::ArgumentCountMismatch {
            expected: arity,
            actual: supplied,
        })
    }
}

/// Number of script arguments in the current frame.
fn supplied(vm: &Vm) -> usize {
    vm.top().saturating_sub(1)
}

/// Read declared argument `position`; the last one sees the whole frame.
fn read_arg<A: FromScript>(vm: &mut Vm, position: usize, arity: usize, top: usize) -> BindResult<A> {
    let index = FIRST_ARG + position as isize;
    if position + 1 == arity {
        A::from_script_tail(vm, index, top)
    } else {
        A::from_script(vm, index)
    }
}

macro_rules! impl_native_function {
    ($count:expr $(; $($arg:ident $var:ident $pos:expr),+)?) => {
        impl<F, R $($(, $arg)+)?> NativeFunction<Static<($($($arg,)+)?), R>> for F
        where
            F: Fn($($($arg),+)?) -> R + 'static,
            R: ReturnValue,
            $($($arg: FromScript,)+)?
        {
            const ARITY: usize = $count;
            const AUTO_FORMAT: bool = last_flag(&[$($(<$arg as FromScript>::AUTO_FORMAT),+)?]);

            #[allow(unused_variables)]
            fn invoke(&self, vm: &mut Vm, validate: bool) -> BindResult<usize> {
                let top = vm.top();
                if validate {
                    check_arity(Self::ARITY, Self::AUTO_FORMAT, supplied(vm))?;
                }
                $($(let $var = read_arg::<$arg>(vm, $pos, Self::ARITY, top)?;)+)?
                (self)($($($var),+)?).push_return(vm)
            }
        }

        impl<F, T, R $($(, $arg)+)?> NativeFunction<Method<T, ($($($arg,)+)?), R>> for F
        where
            F: Fn(&T $($(, $arg)+)?) -> R + 'static,
            T: 'static,
            R: ReturnValue,
            $($($arg: FromScript,)+)?
        {
            const ARITY: usize = $count;
            const AUTO_FORMAT: bool = last_flag(&[$($(<$arg as FromScript>::AUTO_FORMAT),+)?]);

            #[allow(unused_variables)]
            fn invoke(&self, vm: &mut Vm, validate: bool) -> BindResult<usize> {
                let top = vm.top();
                if validate {
                    check_arity(Self::ARITY, Self::AUTO_FORMAT, supplied(vm))?;
                }
                let this = InstanceRef::<T>::from_script(vm, 1)?;
                $($(let $var = read_arg::<$arg>(vm, $pos, Self::ARITY, top)?;)+)?
                let result = {
                    let receiver = this.borrow()?;
                    (self)(&*receiver $($(, $var)+)?)
                };
                result.push_return(vm)
            }
        }

        impl<F, T, R $($(, $arg)+)?> NativeFunction<MethodMut<T, ($($($arg,)+)?), R>> for F
        where
            F: Fn(&mut T $($(, $arg)+)?) -> R + 'static,
            T: 'static,
            R: ReturnValue,
            $($($arg: FromScript,)+)?
        {
            const ARITY: usize = $count;
            const AUTO_FORMAT: bool = last_flag(&[$($(<$arg as FromScript>::AUTO_FORMAT),+)?]);

            #[allow(unused_variables)]
            fn invoke(&self, vm: &mut Vm, validate: bool) -> BindResult<usize> {
                let top = vm.top();
                if validate {
                    check_arity(Self::ARITY, Self::AUTO_FORMAT, supplied(vm))?;
                }
                let this = InstanceRef::<T>::from_script(vm, 1)?;
                $($(let $var = read_arg::<$arg>(vm, $pos, Self::ARITY, top)?;)+)?
                let result = {
                    let mut receiver = this.borrow_mut()?;
                    (self)(&mut *receiver $($(, $var)+)?)
                };
                result.push_return(vm)
            }
        }
    };
}

impl_native_function!(0);
impl_native_function!(1; A1 a1 0);
impl_native_function!(2; A1 a1 0, A2 a2 1);
impl_native_function!(3; A1 a1 0, A2 a2 1, A3 a3 2);
impl_native_function!(4; A1 a1 0, A2 a2 1, A3 a3 2, A4 a4 3);
impl_native_function!(5; A1 a1 0, A2 a2 1, A3 a3 2, A4 a4 3, A5 a5 4);
impl_native_function!(6; A1 a1 0, A2 a2 1, A3 a3 2, A4 a4 3, A5 a5 4, A6 a6 5);
impl_native_function!(7; A1 a1 0, A2 a2 1, A3 a3 2, A4 a4 3, A5 a5 4, A6 a6 5, A7 a7 6);
impl_native_function!(8; A1 a1 0, A2 a2 1, A3 a3 2, A4 a4 3, A5 a5 4, A6 a6 5, A7 a7 6, A8 a8 7);
impl_native_function!(9; A1 a1 0, A2 a2 1, A3 a3 2, A4 a4 3, A5 a5 4, A6 a6 5, A7 a7 6, A8 a8 7, A9 a9 8);
impl_native_function!(10; A1 a1 0, A2 a2 1, A3 a3 2, A4 a4 3, A5 a5 4, A6 a6 5, A7 a7 6, A8 a8 7, A9 a9 8, A10 a10 9);

/// Message carried by a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown exception occurred".to_string()
    }
}

/// Run a native body inside a VM frame, converting failures exactly once.
///
/// Errors and panics are recorded in the binding error slot and returned
/// to the VM as a raised error; nothing unwinds through the VM.
pub(crate) fn trampoline<B>(vm: &mut Vm, body: B) -> Result<usize, VmError>
where
    B: FnOnce(&mut Vm) -> BindResult<usize>,
{
    match catch_unwind(AssertUnwindSafe(|| body(vm))) {
        Ok(Ok(count)) => Ok(count),
        Ok(Err(err)) => Err(errors::raise(vm, err)),
        Err(payload) => {
            let message = panic_message(&*payload);
            warn!(
                target: "sqbridge::call",
                function = vm.current_function().unwrap_or("?"),
                %message,
                "native function panicked"
            );
            Err(errors::raise(vm, BindError::NativeException(message)))
        }
    }
}

/// Wrap a typed callable into a VM closure.
///
/// With `validate` set, the closure checks the supplied argument count
/// against the callable's arity before reading anything.
#[cfg_attr(feature = "profiling", profiling::function)]
pub fn native_closure<M, F>(name: &str, f: F, validate: bool) -> NativeClosure
where
    M: 'static,
    F: NativeFunction<M>,
{
    let func: NativeFn = Rc::new(move |vm: &mut Vm| trampoline(vm, |vm| f.invoke(vm, validate)));
    NativeClosure::new(name, func)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marshal::FormatStr;
    use sqbridge_core::Value;

    fn call(vm: &mut Vm, closure: NativeClosure, args: &[Value]) -> Result<Value, VmError> {
        let callee = vm.new_closure(closure);
        vm.call_value(&callee, &Value::Null, args)
    }

    fn arity<M, F: NativeFunction<M>>(_f: &F) -> (usize, bool) {
        (F::ARITY, F::AUTO_FORMAT)
    }

    #[test]
    fn arity_and_auto_format_flags() {
        assert_eq!(arity(&|| 1i32), (0, false));
        assert_eq!(arity(&|a: i32, b: i32| a + b), (2, false));
        assert_eq!(arity(&|_a: i32, _f: FormatStr| ()), (2, true));
        assert_eq!(arity(&|_f: FormatStr, _a: i32| ()), (2, false));
    }

    #[test]
    fn free_function_reads_arguments_in_order() {
        let mut vm = Vm::new();
        let closure = native_closure("sub", |a: i32, b: i32| a - b, true);
        let result = call(&mut vm, closure, &[Value::Integer(10), Value::Integer(3)]).unwrap();
        assert_eq!(result, Value::Integer(7));
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn argument_count_is_validated() {
        let mut vm = Vm::new();
        let closure = native_closure("sub", |a: i32, b: i32| a - b, true);
        let err = call(&mut vm, closure, &[Value::Integer(10)]).unwrap_err();
        assert!(err.is_raised());
        assert_eq!(
            errors::last(&vm),
            Some(BindError::ArgumentCountMismatch { expected: 2, actual: 1 })
        );
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn format_tail_accepts_surplus_arguments() {
        let mut vm = Vm::new();
        let closure = native_closure("fmt", |prefix: String, rest: FormatStr| format!("{prefix}{rest}"), true);
        let args = [Value::from(">"), Value::from("%d-%d"), Value::Integer(1), Value::Integer(2)];
        assert_eq!(call(&mut vm, closure.clone(), &args).unwrap().as_str(), Some(">1-2"));

        let args = [Value::from(">"), Value::from("%d")];
        assert_eq!(call(&mut vm, closure.clone(), &args).unwrap().as_str(), Some(">%d"));

        assert!(call(&mut vm, closure, &[Value::from(">")]).is_err());
    }

    #[test]
    fn errors_and_panics_become_script_errors() {
        let mut vm = Vm::new();
        let failing = native_closure("fail", || -> Result<i32, String> { Err("no luck".into()) }, true);
        let err = call(&mut vm, failing, &[]).unwrap_err();
        assert_eq!(err.to_string(), "no luck");

        let panicking = native_closure("panic", || -> i32 { panic!("exploded") }, true);
        let err = call(&mut vm, panicking, &[]).unwrap_err();
        assert_eq!(err.to_string(), "exploded");

        let opaque = native_closure("opaque", || -> i32 { std::panic::panic_any(17u8) }, true);
        let err = call(&mut vm, opaque, &[]).unwrap_err();
        assert_eq!(err.to_string(), "unknown exception occurred");
        assert_eq!(vm.top(), 0);
    }

    #[test]
    fn unvalidated_calls_skip_the_count_check() {
        let mut vm = Vm::new();
        let closure = native_closure("first", |a: i32| a, false);
        let result = call(&mut vm, closure, &[Value::Integer(4), Value::Integer(5)]).unwrap();
        assert_eq!(result, Value::Integer(4));
    }
}
