//! Per-VM binding configuration.

use sqbridge_core::Vm;

use crate::context::BindingContext;

/// Marshalling behaviour for one VM.
///
/// Allocator policies are chosen per type at compile time and are not part
/// of this configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindingConfig {
    /// Read non-string values as their script text when a string is expected.
    pub coerce_strings: bool,
    /// Duck-type between bool, integer and float on reads.
    pub coerce_numbers: bool,
    /// Upper bound on the length of an auto-formatted string.
    pub max_format_length: usize,
}

impl BindingConfig {
    pub const DEFAULT_MAX_FORMAT_LENGTH: usize = 64 * 1024;

    /// Configuration currently installed on `vm`.
    pub fn of(vm: &mut Vm) -> BindingConfig {
        BindingContext::of(vm).config()
    }

    /// Configuration of `vm` without creating its binding context.
    pub fn current(vm: &Vm) -> BindingConfig {
        BindingContext::get(vm).map(|ctx| ctx.config()).unwrap_or_default()
    }

    /// Install this configuration on `vm`.
    pub fn apply(self, vm: &mut Vm) {
        BindingContext::of(vm).set_config(self);
    }

    pub fn with_string_coercion(mut self, enabled: bool) -> Self {
        self.coerce_strings = enabled;
        self
    }

    pub fn with_number_coercion(mut self, enabled: bool) -> Self {
        self.coerce_numbers = enabled;
        self
    }

    pub fn with_max_format_length(mut self, length: usize) -> Self {
        self.max_format_length = length;
        self
    }
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            coerce_strings: true,
            coerce_numbers: true,
            max_format_length: Self::DEFAULT_MAX_FORMAT_LENGTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_coercion() {
        let config = BindingConfig::default();
        assert!(config.coerce_strings);
        assert!(config.coerce_numbers);
        assert_eq!(config.max_format_length, 64 * 1024);
    }

    #[test]
    fn apply_is_per_vm() {
        let mut a = Vm::new();
        let mut b = Vm::new();
        BindingConfig::default().with_number_coercion(false).apply(&mut a);

        assert!(!BindingConfig::of(&mut a).coerce_numbers);
        assert!(BindingConfig::of(&mut b).coerce_numbers);
    }
}
