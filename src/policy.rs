//! Allocator policies.
//!
//! A policy decides, per bound type, whether scripts may default-construct
//! it, copy it (clone or by-value reads) and destroy it when the last script
//! reference goes away. The choice is made at compile time through the
//! policy type parameter of [`Class`](crate::Class).
//!
//! | Policy             | construct | copy | destruct |
//! |--------------------|-----------|------|----------|
//! | [`DefaultAllocator`] | yes     | yes  | yes      |
//! | [`NoCopy`]         | yes       | no   | yes      |
//! | [`CopyOnly`]       | no        | yes  | yes      |
//! | [`NoConstructor`]  | no        | no   | yes      |
//! | [`NoDestructor`]   | yes       | yes  | no       |

use bitflags::bitflags;

use crate::error::{BindError, BindResult};

bitflags! {
    /// Capabilities granted to scripts by an allocator policy.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AllocatorFlags: u8 {
        const CONSTRUCT = 1 << 0;
        const COPY = 1 << 1;
        const DESTRUCT = 1 << 2;
    }
}

/// Construction and copy strategy for a bound type `T`.
pub trait AllocatorPolicy<T: 'static>: 'static {
    const FLAGS: AllocatorFlags;

    /// Default-construct a new `T` for a script-side constructor call.
    fn construct(class_name: &str) -> BindResult<T>;

    /// Copy a `T` for a clone or a by-value read.
    fn copy(source: &T, class_name: &str) -> BindResult<T>;
}

fn forbid_construct<T>(class_name: &str) -> BindResult<T> {
    Err(BindError::ConstructionForbidden(class_name.to_string()))
}

fn forbid_copy<T>(class_name: &str) -> BindResult<T> {
    Err(BindError::CloningForbidden(class_name.to_string()))
}

/// Construct, copy and destroy.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultAllocator;

impl<T: Default + Clone + 'static> AllocatorPolicy<T> for DefaultAllocator {
    const FLAGS: AllocatorFlags = AllocatorFlags::all();

    fn construct(_class_name: &str) -> BindResult<T> {
        Ok(T::default())
    }

    fn copy(source: &T, _class_name: &str) -> BindResult<T> {
        Ok(source.clone())
    }
}

/// Construct and destroy; copies are refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCopy;

impl<T: Default + 'static> AllocatorPolicy<T> for NoCopy {
    const FLAGS: AllocatorFlags = AllocatorFlags::CONSTRUCT.union(AllocatorFlags::DESTRUCT);

    fn construct(_class_name: &str) -> BindResult<T> {
        Ok(T::default())
    }

    fn copy(_source: &T, class_name: &str) -> BindResult<T> {
        forbid_copy(class_name)
    }
}

/// Copy and destroy; scripts cannot construct new values.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyOnly;

impl<T: Clone + 'static> AllocatorPolicy<T> for CopyOnly {
    const FLAGS: AllocatorFlags = AllocatorFlags::COPY.union(AllocatorFlags::DESTRUCT);

    fn construct(class_name: &str) -> BindResult<T> {
        forbid_construct(class_name)
    }

    fn copy(source: &T, _class_name: &str) -> BindResult<T> {
        Ok(source.clone())
    }
}

/// Only destruction; instances come from native code.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConstructor;

impl<T: 'static> AllocatorPolicy<T> for NoConstructor {
    const FLAGS: AllocatorFlags = AllocatorFlags::DESTRUCT;

    fn construct(class_name: &str) -> BindResult<T> {
        forbid_construct(class_name)
    }

    fn copy(_source: &T, class_name: &str) -> BindResult<T> {
        forbid_copy(class_name)
    }
}

/// Construct and copy; objects are never destroyed on behalf of scripts.
///
/// Script-owned objects whose instance is finalized are parked in the type's
/// instance registry, where the host can reclaim them.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoDestructor;

impl<T: Default + Clone + 'static> AllocatorPolicy<T> for NoDestructor {
    const FLAGS: AllocatorFlags = AllocatorFlags::CONSTRUCT.union(AllocatorFlags::COPY);

    fn construct(_class_name: &str) -> BindResult<T> {
        Ok(T::default())
    }

    fn copy(source: &T, _class_name: &str) -> BindResult<T> {
        Ok(source.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default, Clone, PartialEq)]
    struct Sample(i32);

    fn flags<A: AllocatorPolicy<Sample>>() -> AllocatorFlags {
        A::FLAGS
    }

    #[test]
    fn capability_table() {
        assert_eq!(flags::<DefaultAllocator>(), AllocatorFlags::all());
        assert_eq!(
            flags::<NoCopy>(),
            AllocatorFlags::CONSTRUCT | AllocatorFlags::DESTRUCT
        );
        assert_eq!(flags::<CopyOnly>(), AllocatorFlags::COPY | AllocatorFlags::DESTRUCT);
        assert_eq!(flags::<NoConstructor>(), AllocatorFlags::DESTRUCT);
        assert_eq!(
            flags::<NoDestructor>(),
            AllocatorFlags::CONSTRUCT | AllocatorFlags::COPY
        );
    }

    #[test]
    fn refused_operations_report_class_name() {
        let err = <CopyOnly as AllocatorPolicy<Sample>>::construct("Sample").unwrap_err();
        assert_eq!(err.to_string(), "Sample constructing is not allowed");

        let err = <NoCopy as AllocatorPolicy<Sample>>::copy(&Sample(1), "Sample").unwrap_err();
        assert_eq!(err.to_string(), "Sample cloning is not allowed");
    }

    #[test]
    fn default_allocator_copies() {
        let copy = <DefaultAllocator as AllocatorPolicy<Sample>>::copy(&Sample(4), "Sample").unwrap();
        assert_eq!(copy, Sample(4));
    }
}
