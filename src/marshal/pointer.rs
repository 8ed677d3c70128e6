//! Raw pointers and nullable values.

use sqbridge_core::{Value, Vm};

use super::{FromScript, ToScript};
use crate::error::{BindError, BindResult};

fn read_address(vm: &Vm, index: isize) -> BindResult<usize> {
    match vm.get(index)? {
        Value::UserPointer(address) => Ok(*address),
        Value::Null => Ok(0),
        other => Err(BindError::mismatch("userpointer", other.type_name())),
    }
}

fn push_address(vm: &mut Vm, address: usize) {
    if address == 0 {
        vm.push(Value::Null);
    } else {
        vm.push(Value::UserPointer(address));
    }
}

impl<T> FromScript for *const T {
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        read_address(vm, index).map(|address| address as *const T)
    }
}

impl<T> ToScript for *const T {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        push_address(vm, self as usize);
        Ok(())
    }
}

impl<T> FromScript for *mut T {
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        read_address(vm, index).map(|address| address as *mut T)
    }
}

impl<T> ToScript for *mut T {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        push_address(vm, self as usize);
        Ok(())
    }
}

/// Null reads as `None`; anything else is read as `T`.
impl<T: FromScript> FromScript for Option<T> {
    fn from_script(vm: &mut Vm, index: isize) -> BindResult<Self> {
        if vm.get(index)?.is_null() {
            Ok(None)
        } else {
            T::from_script(vm, index).map(Some)
        }
    }
}

impl<T: ToScript> ToScript for Option<T> {
    fn to_script(self, vm: &mut Vm) -> BindResult<()> {
        match self {
            Some(value) => value.to_script(vm),
            None => {
                vm.push(Value::Null);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointers_become_user_pointers() {
        let mut vm = Vm::new();
        let target = 7u32;
        let ptr = &target as *const u32;
        ptr.to_script(&mut vm).unwrap();
        assert_eq!(vm.kind_at(-1).unwrap(), sqbridge_core::ValueKind::UserPointer);
        assert_eq!(<*const u32>::from_script(&mut vm, -1).unwrap(), ptr);
    }

    #[test]
    fn null_pointers_are_null() {
        let mut vm = Vm::new();
        std::ptr::null_mut::<u8>().to_script(&mut vm).unwrap();
        assert!(vm.get(-1).unwrap().is_null());
        assert!(<*mut u8>::from_script(&mut vm, -1).unwrap().is_null());
    }

    #[test]
    fn options_map_null() {
        let mut vm = Vm::new();
        None::<i32>.to_script(&mut vm).unwrap();
        assert_eq!(Option::<i32>::from_script(&mut vm, -1).unwrap(), None);
        Some(3i32).to_script(&mut vm).unwrap();
        assert_eq!(Option::<i32>::from_script(&mut vm, -1).unwrap(), Some(3));
        vm.push(Value::from("x"));
        assert!(Option::<bool>::from_script(&mut vm, -1).is_err());
    }
}
