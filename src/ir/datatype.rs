//! Data types carried by arcs.
//!
//! Mirrors the property set the GraphML ingester imports:
//! `single`/`double`/`boolean`/`int8`..`int64`/`uint8`..`uint64`/
//! `sfixN_EnM`/`ufixN_EnM`/`fixdt(s,N,M)`, each reducible to the tuple of
//! {floating-point?, signed?, complex?, total-bits, fractional-bits,
//! dimensions[]} that the core actually reasons about.

use smallvec::SmallVec;

/// A scalar or multi-dimensional numeric type.
///
/// Equality is structural: two `DataType`s describe the same wire format iff
/// every field matches, dimensions included.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DataType {
    /// Whether this is an IEEE floating-point type (`single`/`double`).
    pub floating_point: bool,
    /// Whether this is a signed integer / fixed-point type.
    pub signed: bool,
    /// Whether this carries a real and an imaginary component.
    pub complex: bool,
    /// Total bit width of one (real) element.
    pub total_bits: u32,
    /// Number of fractional bits for fixed-point types (0 for int/float).
    pub fractional_bits: u32,
    /// Shape; a scalar is `{1}`, a length-N vector is `{N}`, etc.
    pub dimensions: SmallVec<[u32; 2]>,
}

impl DataType {
    /// Construct a scalar data type.
    pub fn scalar(floating_point: bool, signed: bool, complex: bool, total_bits: u32) -> Self {
        DataType {
            floating_point,
            signed,
            complex,
            total_bits,
            fractional_bits: 0,
            dimensions: SmallVec::from_slice(&[1]),
        }
    }

    /// The `boolean` type used by enable ports: a single unsigned bit.
    pub fn boolean() -> Self {
        DataType {
            floating_point: false,
            signed: false,
            complex: false,
            total_bits: 1,
            fractional_bits: 0,
            dimensions: SmallVec::from_slice(&[1]),
        }
    }

    /// A plain signed integer scalar of the given width, used by select
    /// ports and mux sub-context indices.
    pub fn int(total_bits: u32) -> Self {
        DataType::scalar(false, true, false, total_bits)
    }

    /// `true` if every dimension is 1 (i.e. this is not a vector/matrix).
    pub fn is_scalar(&self) -> bool {
        self.dimensions.iter().all(|&d| d == 1)
    }

    /// Total number of scalar elements described by `dimensions`.
    pub fn element_count(&self) -> u32 {
        self.dimensions.iter().product()
    }

    /// Number of fractional bits; 0 for plain integer/floating-point types.
    pub fn fractional_bits(&self) -> u32 {
        self.fractional_bits
    }

    /// Expand this type for a block of size `b` (`b > 1`): prepend `b` to
    /// the outermost dimension of a non-scalar type, or replace the scalar
    /// `{1}` shape with `{b}`.
    pub fn expand_for_block(&self, b: u32) -> DataType {
        debug_assert!(b > 1, "expand_for_block is only meaningful for b > 1");
        let mut expanded = self.clone();
        if self.is_scalar() {
            expanded.dimensions = SmallVec::from_slice(&[b]);
        } else {
            expanded.dimensions.insert(0, b);
        }
        expanded
    }

    /// Inverse of [`Self::expand_for_block`]: strip the outermost dimension
    /// that a prior block expansion introduced.
    pub fn reduce_for_subblock(&self, b: u32) -> DataType {
        debug_assert!(b > 1, "reduce_for_subblock is only meaningful for b > 1");
        let mut reduced = self.clone();
        if reduced.dimensions.len() > 1 {
            debug_assert_eq!(reduced.dimensions[0], b);
            reduced.dimensions.remove(0);
        } else {
            debug_assert_eq!(reduced.dimensions[0], b);
            reduced.dimensions[0] = 1;
        }
        reduced
    }
}
