//! Shared scalar and storage types for the transducer DP engines.

mod matrix;
mod params;
mod region;
mod score;

pub use matrix::{matrix2_size, matrix3_size, matrix4_size, Matrix2, Matrix3, Matrix4};
pub use params::DpParams;
pub use region::Region;
pub use score::{Protect, Score, IMPOSSIBLY_HIGH, IMPOSSIBLY_LOW};

/// Type used for sequence positions and lengths.
pub type I = i32;

/// A sequence slice over a small alphabet.
pub type Seq<'a> = &'a [u8];
