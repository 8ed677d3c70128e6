//! Host-side handles to script values.
//!
//! - [`Object`]: a handle bound to one VM, owning or borrowing its value
//! - [`LightObj`]: a context-free handle resolved through the ambient VM
//! - [`Function`]: an environment plus a callable, with typed calls

mod function;
mod object;

pub use function::Function;
pub use object::{LightObj, Object};
