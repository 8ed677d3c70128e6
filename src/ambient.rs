//! Thread-local default VM.
//!
//! Context-free handles such as [`LightObj`](crate::LightObj) resolve the
//! VM they belong to through this shim. Everything else takes the VM
//! explicitly.

use std::cell::Cell;

use sqbridge_core::{Vm, VmId};
use tracing::debug;

thread_local! {
    static DEFAULT_VM: Cell<Option<VmId>> = const { Cell::new(None) };
}

/// Make `vm` the default VM of the current thread.
pub fn set_default_vm(vm: &Vm) {
    debug!(target: "sqbridge::vm", vm = %vm.id(), "default vm set");
    DEFAULT_VM.with(|slot| slot.set(Some(vm.id())));
}

/// The default VM of the current thread, if one is set.
pub fn default_vm() -> Option<VmId> {
    DEFAULT_VM.with(Cell::get)
}

pub fn clear_default_vm() {
    DEFAULT_VM.with(|slot| slot.set(None));
}

/// Check whether `vm` is the default VM of the current thread.
pub fn is_default(vm: &Vm) -> bool {
    default_vm() == Some(vm.id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_vm_is_per_thread() {
        let vm = Vm::new();
        set_default_vm(&vm);
        assert!(is_default(&vm));

        let other = std::thread::spawn(default_vm).join().unwrap();
        assert_eq!(other, None);

        clear_default_vm();
        assert_eq!(default_vm(), None);
    }
}
