//! Deterministic hash-based type identity.
//!
//! [`TypeHash`] is a 64-bit hash used as the stable identifier of a bound
//! native type. It doubles as the type tag attached to script classes, so a
//! tag comparison at the script boundary and a registry lookup use the same
//! key.
//!
//! # Examples
//!
//! ```
//! use sqbridge_core::TypeHash;
//!
//! let a = TypeHash::from_name("Point");
//! let b = TypeHash::from_name("Point");
//! assert_eq!(a, b);
//!
//! struct Point;
//! assert_eq!(TypeHash::of::<Point>(), TypeHash::of::<Point>());
//! ```

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

use xxhash_rust::xxh64::{Xxh64, xxh64};

/// Domain-specific mixing constants for hash computation.
pub mod hash_constants {
    /// Domain marker for names hashed with [`TypeHash::from_name`](super::TypeHash::from_name).
    pub const NAME: u64 = 0x2fac10b63a6cc57c;

    /// Domain marker for Rust types hashed with [`TypeHash::of`](super::TypeHash::of).
    pub const RUST_TYPE: u64 = 0x9a7f3d5e2b8c4601;
}

/// A deterministic 64-bit hash identifying a type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TypeHash(pub u64);

impl TypeHash {
    /// Empty/invalid hash constant.
    pub const EMPTY: TypeHash = TypeHash(0);

    /// Create a type hash from a name.
    #[inline]
    pub fn from_name(name: &str) -> Self {
        TypeHash(hash_constants::NAME ^ xxh64(name.as_bytes(), 0))
    }

    /// Create a type hash for a Rust type.
    ///
    /// Derived from the type's [`TypeId`], so two distinct types never share
    /// an identity even when their printed names coincide. Stable for the
    /// lifetime of the process, not across builds.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        let mut hasher = Xxh64::new(0);
        TypeId::of::<T>().hash(&mut hasher);
        TypeHash(hash_constants::RUST_TYPE ^ hasher.finish())
    }

    /// Check if this is the empty hash.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeHash({:#018x})", self.0)
    }
}

impl fmt::Display for TypeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Alpha;
    struct Beta;

    #[test]
    fn from_name_is_deterministic() {
        assert_eq!(TypeHash::from_name("int"), TypeHash::from_name("int"));
        assert_ne!(TypeHash::from_name("int"), TypeHash::from_name("float"));
    }

    #[test]
    fn rust_types_are_distinct() {
        assert_eq!(TypeHash::of::<Alpha>(), TypeHash::of::<Alpha>());
        assert_ne!(TypeHash::of::<Alpha>(), TypeHash::of::<Beta>());
    }

    #[test]
    fn same_named_types_in_different_scopes_are_distinct() {
        mod first {
            pub struct Item;
        }
        mod second {
            pub struct Item;
        }
        assert_ne!(TypeHash::of::<first::Item>(), TypeHash::of::<second::Item>());
        assert_ne!(TypeHash::of::<Vec<Alpha>>(), TypeHash::of::<Vec<Beta>>());
    }

    #[test]
    fn rust_type_hash_differs_from_name_hash() {
        let name = std::any::type_name::<Alpha>();
        assert_ne!(TypeHash::of::<Alpha>(), TypeHash::from_name(name));
    }

    #[test]
    fn empty_hash() {
        assert!(TypeHash::EMPTY.is_empty());
        assert!(!TypeHash::from_name("x").is_empty());
    }

    #[test]
    fn debug_and_display() {
        let hash = TypeHash(0x1234);
        assert_eq!(format!("{hash}"), "0x0000000000001234");
        assert!(format!("{hash:?}").starts_with("TypeHash("));
    }
}
