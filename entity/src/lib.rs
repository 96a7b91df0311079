//! Densely numbered entity references as mapping keys.
//!
//! This crate defines an `EntityRef` trait together with the primary and
//! secondary map types used to associate data with lightweight integer
//! handles instead of live pointers. It exists so the IR compiler can model
//! cyclic graphs (nodes referencing ports referencing arcs referencing
//! nodes...) without reference counting: everything is an index into an
//! arena, and arenas never move.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

#[cfg(not(feature = "std"))]
compile_error!("dataflow-entity currently requires the std feature");

mod iter;
mod keys;
mod map;
pub mod packed_option;
mod primary;

pub use crate::iter::{Iter, IterMut};
pub use crate::keys::Keys;
pub use crate::map::SecondaryMap;
pub use crate::packed_option::{PackedOption, ReservedValue};
pub use crate::primary::PrimaryMap;

/// A type wrapping a small integer index should implement `EntityRef` so it
/// can be used as the key of a [`PrimaryMap`] or [`SecondaryMap`].
///
/// Implementations should be a thin wrapper around `u32`, and the `new`
/// constructor should be infallible: callers of `PrimaryMap::push` rely on
/// `new(index)` round-tripping through `index()`.
pub trait EntityRef: Copy + Eq {
    /// Create a new entity reference from a linear index.
    fn new(index: usize) -> Self;

    /// Get the index of this reference.
    fn index(self) -> usize;
}

/// Macro which provides the common implementation of a 32-bit entity
/// reference. This mirrors the pattern used throughout the IR: a newtype
/// over `u32`, `Display`/`Debug` in the `prefixNN` style, and a reserved
/// `u32::MAX` sentinel used by `PackedOption`.
#[macro_export]
macro_rules! entity_impl {
    ($entity:ident) => {
        impl $crate::EntityRef for $entity {
            #[inline]
            fn new(index: usize) -> Self {
                debug_assert!(index < (::std::u32::MAX as usize));
                $entity(index as u32)
            }

            #[inline]
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $crate::packed_option::ReservedValue for $entity {
            fn reserved_value() -> $entity {
                $entity(::std::u32::MAX)
            }
        }

        impl ::std::fmt::Display for $entity {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, "{}{}", stringify!($entity).to_lowercase(), self.0)
            }
        }

        impl ::std::fmt::Debug for $entity {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                (self as &dyn ::std::fmt::Display).fmt(f)
            }
        }
    };

    ($entity:ident, $display_prefix:expr) => {
        impl $crate::EntityRef for $entity {
            #[inline]
            fn new(index: usize) -> Self {
                debug_assert!(index < (::std::u32::MAX as usize));
                $entity(index as u32)
            }

            #[inline]
            fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl $crate::packed_option::ReservedValue for $entity {
            fn reserved_value() -> $entity {
                $entity(::std::u32::MAX)
            }
        }

        impl ::std::fmt::Display for $entity {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                write!(f, "{}{}", $display_prefix, self.0)
            }
        }

        impl ::std::fmt::Debug for $entity {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                (self as &dyn ::std::fmt::Display).fmt(f)
            }
        }
    };
}
