//! Reference VM interface consumed by the `sqbridge` binding layer.
//!
//! This crate provides a minimal stack-based scripting VM: an evaluation
//! stack with frame-relative indexing, a reference-counted object space
//! (tables, arrays, classes, instances, native closures, user data), type
//! tags, release hooks, an error slot and a pluggable compiler hook.
//!
//! It has no parser, bytecode or garbage collector. Script behaviour is
//! driven through the same operations a compiled script would use: call,
//! get/set slot, clone and instantiate.
//!
//! ```
//! use sqbridge_core::{NativeClosure, Value, Vm};
//!
//! let mut vm = Vm::new();
//! let double = vm.new_closure(NativeClosure::from_fn("double", |vm| {
//!     let n = vm.get(2)?.as_integer().unwrap_or(0);
//!     vm.push(Value::Integer(n * 2));
//!     Ok(1)
//! }));
//! let result = vm.call_value(&double, &Value::Null, &[Value::Integer(21)]).unwrap();
//! assert_eq!(result, Value::Integer(42));
//! ```

pub mod closure;
pub mod compiler;
pub mod config;
pub mod error;
pub mod extensions;
pub mod object;
pub mod stack_guard;
pub mod table;
pub mod type_hash;
pub mod value;
pub mod vm;

pub use closure::{NativeClosure, NativeFn, ParamCheck, TypeMask};
pub use compiler::ScriptCompiler;
pub use config::{VmConfig, VmProperty};
pub use error::VmError;
pub use extensions::Extensions;
pub use object::{ClassObject, HeapObject, InstanceObject, ReleaseHook, UserDataObject};
pub use stack_guard::StackGuard;
pub use table::Table;
pub use type_hash::TypeHash;
pub use value::{ObjectRef, Value, ValueKind, WeakObjectRef, WeakValue};
pub use vm::{Vm, VmId};
