//! Bind native Rust types and functions to a stack-based scripting VM.
//!
//! `sqbridge` sits between host code and the VM from [`sqbridge_core`]. It
//! registers native types as script classes, converts values in both
//! directions, forwards script calls to typed Rust callables and gives the
//! host safe handles to script values.
//!
//! # Example
//!
//! ```
//! use sqbridge::{Class, Function, Table, Value, Vm};
//!
//! #[derive(Debug, Default, Clone)]
//! struct Point { x: i32, y: i32 }
//!
//! impl sqbridge::Bindable for Point {}
//!
//! let mut vm = Vm::new();
//! Table::root(&mut vm).func("Add", |a: i32, b: i32| a + b)?;
//! Class::<Point>::new(&mut vm, "Point")?
//!     .var("x", |p: &Point| p.x, |p: &mut Point, x: i32| p.x = x)?
//!     .var("y", |p: &Point| p.y, |p: &mut Point, y: i32| p.y = y)?
//!     .build()?;
//!
//! let add = Function::global(&mut vm, "Add")?;
//! assert_eq!(add.call::<i32, _>(&mut vm, (2, 3))?, 5);
//!
//! let point = vm.call_global("Point", &[])?;
//! vm.set_slot(&point, Value::from("x"), Value::Integer(5))?;
//! assert_eq!(vm.get_slot(&point, &Value::from("x"))?, Value::Integer(5));
//! # Ok::<(), sqbridge::BindError>(())
//! ```
//!
//! # Modules
//!
//! - [`bind`]: fluent builders for tables, constants, enumerations and classes
//! - [`marshal`]: conversions between script values and native types
//! - [`forward`]: typed callables as VM closures
//! - [`handle`]: host handles to script values and functions
//! - [`policy`]: per-type construction, copy and destruction rules

pub mod ambient;
pub mod bind;
pub mod config;
pub mod context;
pub mod error;
pub mod format;
pub mod forward;
pub mod handle;
pub mod instance_registry;
pub mod marshal;
pub mod overload;
pub mod policy;
pub mod script;
pub mod type_registry;

pub use bind::{Class, ConstTable, Constructor, Enumeration, Table};
pub use config::BindingConfig;
pub use context::BindingContext;
pub use error::{BindError, BindResult, errors};
pub use forward::{NativeFunction, native_closure};
pub use handle::{Function, LightObj, Object};
pub use instance_registry::{NativeObject, Ownership};
pub use marshal::{Bindable, FormatStr, FromScript, InstanceRef, ReturnValue, ScriptArgs, ScriptStr, ToScript, Var};
pub use policy::{AllocatorFlags, AllocatorPolicy, CopyOnly, DefaultAllocator, NoConstructor, NoCopy, NoDestructor};
pub use script::Script;
pub use type_registry::Inherits;

pub use sqbridge_core::{NativeClosure, TypeHash, Value, ValueKind, Vm, VmConfig, VmError, VmId, VmProperty};
