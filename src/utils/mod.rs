use std::fmt::Debug;
use std::hash::Hash;
use std::iter::Sum;
use std::ops::AddAssign;

use nalgebra::Scalar;
use num_traits::{Float, NumCast, Zero};

/// Scalar types that can be stored in an expression matrix.
pub trait NumericOps: Scalar + Copy + NumCast + Zero + PartialOrd + Send + Sync + Debug {}

impl<T> NumericOps for T where
    T: Scalar + Copy + NumCast + Zero + PartialOrd + Send + Sync + Debug
{
}

/// Floating point types used for statistics accumulators.
pub trait FloatOps: NumericOps + Float + AddAssign + Sum {}

impl<T> FloatOps for T where T: NumericOps + Float + AddAssign + Sum {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    COLUMN,
    ROW,
}

pub trait Normalize<T: FloatOps> {
    /// Divides every entry along `direction` by its entry in `sums` and multiplies by `target`.
    /// Lanes whose sum is zero are left untouched.
    fn normalize(&mut self, sums: &[T], target: T, direction: &Direction) -> anyhow::Result<()>;
}

/// Trait for types that can be used to identify samples
pub trait SampleIdentifier: Clone + Eq + Hash + Ord + Debug {}

// Implement SampleIdentifier for common types
impl SampleIdentifier for String {}
impl SampleIdentifier for &str {}
impl SampleIdentifier for i32 {}
impl SampleIdentifier for u32 {}
impl SampleIdentifier for usize {}
