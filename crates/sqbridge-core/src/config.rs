use rustc_hash::FxHashMap;

/// Tunable VM properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VmProperty {
    /// Maximum depth of nested native/script calls before `StackOverflow`.
    MaxCallDepth,
    /// Number of stack slots reserved up front.
    InitialStackSize,
}

impl VmProperty {
    pub const ALL: [VmProperty; 2] = [VmProperty::MaxCallDepth, VmProperty::InitialStackSize];

    pub fn default_value(&self) -> usize {
        match self {
            VmProperty::MaxCallDepth => 256,
            VmProperty::InitialStackSize => 1024,
        }
    }
}

/// Property storage for a [`Vm`](crate::Vm).
#[derive(Debug, Clone)]
pub struct VmConfig {
    properties: FxHashMap<VmProperty, usize>,
}

impl VmConfig {
    pub fn new() -> Self {
        let mut properties = FxHashMap::default();
        for prop in VmProperty::ALL {
            properties.insert(prop, prop.default_value());
        }
        Self { properties }
    }

    /// Builder-style property override.
    pub fn with(mut self, property: VmProperty, value: usize) -> Self {
        self.set(property, value);
        self
    }

    pub fn set(&mut self, property: VmProperty, value: usize) {
        self.properties.insert(property, value);
    }

    pub fn get(&self, property: VmProperty) -> usize {
        self.properties
            .get(&property)
            .copied()
            .unwrap_or_else(|| property.default_value())
    }

    pub fn max_call_depth(&self) -> usize {
        self.get(VmProperty::MaxCallDepth)
    }

    pub fn initial_stack_size(&self) -> usize {
        self.get(VmProperty::InitialStackSize)
    }
}

impl Default for VmConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = VmConfig::default();
        assert_eq!(config.max_call_depth(), 256);
        assert_eq!(config.initial_stack_size(), 1024);
    }

    #[test]
    fn override_property() {
        let config = VmConfig::new().with(VmProperty::MaxCallDepth, 8);
        assert_eq!(config.max_call_depth(), 8);
        assert_eq!(config.get(VmProperty::InitialStackSize), 1024);
    }
}
