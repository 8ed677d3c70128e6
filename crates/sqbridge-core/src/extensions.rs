//! Typed per-VM storage for host layers.

use std::any::{Any, TypeId};

use rustc_hash::FxHashMap;

/// A map from Rust type to a single value of that type.
///
/// Binding layers keep their VM-scoped state (type registries, error
/// slots) here instead of in process-wide statics.
#[derive(Default)]
pub struct Extensions {
    map: FxHashMap<TypeId, Box<dyn Any>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: 'static>(&mut self, value: T) -> Option<T> {
        self.map
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T: 'static>(&self) -> Option<&T> {
        self.map.get(&TypeId::of::<T>()).and_then(|v| v.downcast_ref())
    }

    pub fn get_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|v| v.downcast_mut())
    }

    pub fn get_or_insert_with<T: 'static>(&mut self, f: impl FnOnce() -> T) -> &mut T {
        let slot = self
            .map
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(f()));
        match slot.downcast_mut() {
            Some(value) => value,
            None => unreachable!("extension slot keyed by TypeId holds another type"),
        }
    }

    pub fn remove<T: 'static>(&mut self) -> Option<T> {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|v| v.downcast::<T>().ok())
            .map(|v| *v)
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions").field("len", &self.map.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Counter(u32);

    #[test]
    fn insert_get_remove() {
        let mut ext = Extensions::new();
        assert!(ext.get::<Counter>().is_none());
        assert!(ext.insert(Counter(1)).is_none());
        assert_eq!(ext.get::<Counter>(), Some(&Counter(1)));
        assert_eq!(ext.insert(Counter(2)), Some(Counter(1)));
        assert_eq!(ext.remove::<Counter>(), Some(Counter(2)));
        assert!(ext.get::<Counter>().is_none());
    }

    #[test]
    fn get_or_insert_with_initializes_once() {
        let mut ext = Extensions::new();
        ext.get_or_insert_with(|| Counter(0)).0 += 1;
        ext.get_or_insert_with(|| Counter(100)).0 += 1;
        assert_eq!(ext.get::<Counter>(), Some(&Counter(2)));
    }
}
