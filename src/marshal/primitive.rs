//! Booleans, integers and floats.
//!
//! Reads duck-type between the three numeric kinds unless number coercion
//! is disabled in the VM's [`BindingConfig`]. Integer reads are range
//! checked against the target width.

use sqbridge_core::{Value, Vm};

use super::{FromScript, ToScript};
use crate::config::BindingConfig;
use crate::error::{BindError, BindResult};

fn coerces(vm: &Vm) -> bool {
    BindingConfig::current(vm).coerce_numbers
}

/// Read any numeric slot as an `i64`, truncating floats.
fn read_integer(vm: &Vm, index: isize, target: &'static str) -> BindResult<i64> {
    let value = vm.get(index)?;
    match value {
        Value::Integer(i) => Ok(*i),
        Value::Float(f) if coerces(vm) => {
            if f.is_finite() {
                Ok(f.trunc() as i64)
            } else {
                Err(BindError::IntegerOverflow {
                    value: f.to_string(),
                    target,
                })
            }
        }
        Value::Bool(b) if coerces(vm) => Ok(i64::from(*b)),
        other => Err(BindError::mismatch("integer", other.type_name())),
    }
}

fn read_float(vm: &Vm, index: isize) -> BindResult<f64> {
    let value = vm.get(index)?;
    match value {
        Value::Float(f) => Ok(*f),
        Value::Integer(i) if coerces(vm) => Ok(*i as f64),
        Value::Bool(b) if coerces(vm) => Ok(if *b { 1.0 } else { 0.0 }),
        other => Err(BindError::mismatch("float", other.type_name())),
    }
}

// ============================================================================
// bool
// ============================================================================

impl FromScript for bool {
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        let value = vm.get(index)?;
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Integer(i) if coerces(vm) => Ok(*i != 0),
            Value::Float(f) if coerces(vm) => Ok(*f != 0.0),
            other => Err(BindError::mismatch("bool", other.type_name())),
        }
    }
}

impl ToScript for bool {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        vm.push(Value::Bool(self));
        Ok(())
    }
}

// ============================================================================
// Integers
// ============================================================================

macro_rules! impl_integer {
    ($($ty:ty),*) => {
        $(
            impl FromScript for $ty {
                fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
                    let value = read_integer(vm, index, stringify!($ty))?;
                    <$ty>::try_from(value).map_err(|_| BindError::IntegerOverflow {
                        value: value.to_string(),
                        target: stringify!($ty),
                    })
                }
            }

            impl ToScript for $ty {
                fn to_script(self, vm: &mut Vm) -> BindResult<()> {
                    let value = i64::try_from(self).map_err(|_| BindError::IntegerOverflow {
                        value: self.to_string(),
                        target: "integer",
                    })?;
                    vm.push(Value::Integer(value));
                    Ok(())
                }
            }
        )*
    };
}

impl_integer!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

// ============================================================================
// Floats
// ============================================================================

impl FromScript for f64 {
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        read_float(vm, index)
    }
}

impl ToScript for f64 {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        vm.push(Value::Float(self));
        Ok(())
    }
}

impl FromScript for f32 {
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        read_float(vm, index).map(|f| f as f32)
    }
}

impl ToScript for f32 {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        vm.push(Value::Float(f64::from(self)));
        Ok(())
    }
}
