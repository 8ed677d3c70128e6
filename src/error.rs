//! Binding-layer errors and the VM-scoped error slot.
//!
//! Rust callers get a [`BindError`] on the immediate `Result` path. Native
//! calls made by the VM convert the error exactly once, at the trampoline,
//! into a raised script error; the same failure is also recorded in the
//! VM's binding error slot so that it can be queried later through
//! [`errors::occurred`] and [`errors::message`].

use sqbridge_core::{VmError, VmId};
use thiserror::Error;

/// Errors produced while binding, marshalling or calling.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BindError {
    // ========================================================================
    // Marshalling
    // ========================================================================
    /// A stack value could not be converted to the requested native type.
    #[error("wrong type ({expected} expected, got {actual})")]
    TypeMismatch { expected: String, actual: String },

    /// An integer does not fit the requested native integer type.
    #[error("integer {value} out of range for {target}")]
    IntegerOverflow { value: String, target: &'static str },

    /// A script instance has no native object behind it, or the borrowed
    /// native object has been dropped by its owner.
    #[error("unconstructed {type_name} instance")]
    UnconstructedInstance { type_name: String },

    /// The native object is already mutably borrowed (re-entrant access).
    #[error("{type_name} instance is already in use")]
    InstanceBorrowed { type_name: String },

    // ========================================================================
    // Calls
    // ========================================================================
    /// Argument count does not match the bound function.
    #[error("wrong number of parameters (expected {expected}, got {actual})")]
    ArgumentCountMismatch { expected: usize, actual: usize },

    /// No overload target exists for the supplied argument count.
    #[error("wrong number of parameters")]
    OverloadNotFound { name: String, argc: usize },

    /// A native callable returned an error or panicked.
    #[error("{0}")]
    NativeException(String),

    /// A write to a data member without setter.
    #[error("Variable not found")]
    VariableNotFound { name: String },

    /// A printf-style format string could not be applied.
    #[error("{0}")]
    Format(String),

    // ========================================================================
    // Allocation policies
    // ========================================================================
    #[error("{0} constructing is not allowed")]
    ConstructionForbidden(String),

    #[error("{0} cloning is not allowed")]
    CloningForbidden(String),

    // ========================================================================
    // Registries
    // ========================================================================
    #[error("type {0} is not registered")]
    UnregisteredType(String),

    #[error("type {0} is already registered")]
    DuplicateRegistration(String),

    #[error("native {type_name} object is already bound to a script instance")]
    DuplicateInstance { type_name: String },

    // ========================================================================
    // Handles
    // ========================================================================
    /// A handle was used with a VM other than the one that created it.
    #[error("handle belongs to {expected}, used with {actual}")]
    ForeignContext { expected: VmId, actual: VmId },

    /// A context-free handle was converted without an ambient VM.
    #[error("no default VM is set")]
    NoDefaultVm,

    /// A script source file could not be read.
    #[error("failed to read script '{path}': {message}")]
    ScriptRead { path: String, message: String },

    #[error(transparent)]
    Vm(#[from] VmError),
}

impl BindError {
    /// Create a type mismatch error.
    pub fn mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        BindError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an unconstructed-instance error.
    pub fn unconstructed(type_name: impl Into<String>) -> Self {
        BindError::UnconstructedInstance {
            type_name: type_name.into(),
        }
    }
}

/// Result alias used throughout the binding layer.
pub type BindResult<T> = Result<T, BindError>;

/// Uniform error query over the VM-scoped error slot.
pub mod errors {
    use sqbridge_core::{Vm, VmError};
    use tracing::debug;

    use super::BindError;
    use crate::context::BindingContext;

    /// Check whether a binding or VM error has been recorded.
    pub fn occurred(vm: &Vm) -> bool {
        let recorded = BindingContext::get(vm).is_some_and(|ctx| ctx.last_error().is_some());
        recorded || vm.last_error().is_some()
    }

    /// Message of the most recent error, binding slot first.
    pub fn message(vm: &Vm) -> Option<String> {
        BindingContext::get(vm)
            .and_then(|ctx| ctx.last_error())
            .map(|err| err.to_string())
            .or_else(|| vm.last_error().map(ToString::to_string))
    }

    /// The most recent binding error, if any.
    pub fn last(vm: &Vm) -> Option<BindError> {
        BindingContext::get(vm).and_then(|ctx| ctx.last_error())
    }

    /// Clear both the binding slot and the VM's last error.
    pub fn clear(vm: &mut Vm) {
        if let Some(ctx) = BindingContext::get(vm) {
            ctx.clear_error();
        }
        vm.reset_error();
    }

    /// Record `err` in the binding slot and pass it through.
    pub fn record(vm: &mut Vm, err: BindError) -> BindError {
        BindingContext::of(vm).record_error(err.clone());
        err
    }

    /// Record a failure of a host-side operation so the error query sees it.
    ///
    /// Raised script errors are already in the VM's error slot and keep
    /// whatever binding error the raising call recorded.
    pub(crate) fn report(vm: &mut Vm, err: BindError) -> BindError {
        if matches!(err, BindError::Vm(VmError::Raised(_))) {
            return err;
        }
        debug!(target: "sqbridge::call", error = %err, "host operation failed");
        record(vm, err)
    }

    /// Raise a script error with `message` and return it for propagation.
    ///
    /// ```
    /// use sqbridge::{errors, Vm};
    ///
    /// let mut vm = Vm::new();
    /// let err = errors::throw(&mut vm, format!("bad value {}", 3));
    /// assert_eq!(err.to_string(), "bad value 3");
    /// assert_eq!(errors::message(&vm).as_deref(), Some("bad value 3"));
    /// ```
    pub fn throw(vm: &mut Vm, message: impl Into<String>) -> VmError {
        let message = message.into();
        BindingContext::of(vm).record_error(BindError::NativeException(message.clone()));
        vm.raise_error(message)
    }

    /// Convert a binding error into the VM's error channel.
    ///
    /// Errors raised by a nested call are already recorded and pass through
    /// unchanged.
    pub(crate) fn raise(vm: &mut Vm, err: BindError) -> VmError {
        if let BindError::Vm(raised @ VmError::Raised(_)) = err {
            return raised;
        }
        debug!(target: "sqbridge::call", error = %err, "native call failed");
        let message = err.to_string();
        BindingContext::of(vm).record_error(err);
        vm.raise_error(message)
    }
}

/// Raise a formatted script error from inside a native closure.
///
/// Expands to an expression of type [`VmError`](sqbridge_core::VmError),
/// ready to be returned as `Err(..)`.
#[macro_export]
macro_rules! raise_error {
    ($vm:expr, $($arg:tt)*) => {
        $crate::errors::throw($vm, ::std::format!($($arg)*))
    };
}
