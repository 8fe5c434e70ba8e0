//! Array shapes, memory order, and per-field shape maps

use std::{collections::BTreeMap, fmt};

use serde::{Deserialize, Serialize};

/// Dimensions of an array view.
///
/// A rank-0 shape describes a single element.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<usize>,
}

/// Multi-dimensional layout of a flat buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Order {
    /// C order: the last axis varies fastest
    #[default]
    RowMajor,
    /// Fortran order: the first axis varies fastest
    ColumnMajor,
}

impl Shape {
    /// Creates a new shape from the given dimensions.
    pub fn new(dims: Vec<usize>) -> Self {
        Self { dims }
    }

    /// Creates a scalar shape (rank 0).
    pub fn scalar() -> Self {
        Self { dims: vec![] }
    }

    /// Creates a 1-D shape.
    pub fn vector(len: usize) -> Self {
        Self { dims: vec![len] }
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Returns `true` for the rank-0 shape.
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Total number of elements; 1 for a scalar shape.
    ///
    /// `None` when the product of the dimensions overflows `usize`.
    pub fn num_elements(&self) -> Option<usize> {
        element_count(&self.dims)
    }

    /// Dimensions as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Size of a dimension, or `None` if out of bounds.
    pub fn dim(&self, index: usize) -> Option<usize> {
        self.dims.get(index).copied()
    }

    /// Element strides for this shape laid out in `order`.
    pub fn strides(&self, order: Order) -> Vec<usize> {
        strides_for(&self.dims, order)
    }
}

/// Product of `dims`, or `None` on overflow.
pub(crate) fn element_count(dims: &[usize]) -> Option<usize> {
    dims.iter().try_fold(1usize, |acc, &dim| acc.checked_mul(dim))
}

/// Element strides of a contiguous array with `dims` laid out in `order`.
pub(crate) fn strides_for(dims: &[usize], order: Order) -> Vec<usize> {
    let rank = dims.len();
    let mut strides = vec![0usize; rank];
    let mut step = 1usize;
    match order {
        Order::RowMajor => {
            for i in (0..rank).rev() {
                strides[i] = step;
                step = step.saturating_mul(dims[i].max(1));
            }
        }
        Order::ColumnMajor => {
            for i in 0..rank {
                strides[i] = step;
                step = step.saturating_mul(dims[i].max(1));
            }
        }
    }
    strides
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        if self.dims.len() == 1 {
            write!(f, ",")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(dims: Vec<usize>) -> Self {
        Self::new(dims)
    }
}

impl From<&[usize]> for Shape {
    fn from(dims: &[usize]) -> Self {
        Self::new(dims.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(dims: [usize; N]) -> Self {
        Self::new(dims.to_vec())
    }
}

impl From<usize> for Shape {
    fn from(len: usize) -> Self {
        Self::vector(len)
    }
}

/// How the fields of a buffer record are shaped.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShapeSpec {
    /// Every field is a flat view over its whole buffer
    #[default]
    Flat,
    /// Every field shares one shape
    Uniform(Shape),
    /// Each field carries its own shape; scalar shapes view as one element
    PerField(BTreeMap<String, Shape>),
}

impl ShapeSpec {
    /// Shape a field should be viewed with; `None` means flat.
    ///
    /// Returns `None` for a field missing from a per-field map; callers
    /// decide whether that is an error.
    pub fn shape_for(&self, field: &str) -> Option<Shape> {
        match self {
            ShapeSpec::Flat => None,
            ShapeSpec::Uniform(shape) => Some(shape.clone()),
            ShapeSpec::PerField(map) => map.get(field).map(|shape| {
                if shape.is_scalar() {
                    Shape::vector(1)
                } else {
                    shape.clone()
                }
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_shape() {
        let s = Shape::scalar();
        assert_eq!(s.rank(), 0);
        assert_eq!(s.num_elements(), Some(1));
        assert!(s.strides(Order::RowMajor).is_empty());
    }

    #[test]
    fn test_row_major_strides() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(s.strides(Order::RowMajor), vec![12, 4, 1]);
    }

    #[test]
    fn test_column_major_strides() {
        let s = Shape::new(vec![2, 3, 4]);
        assert_eq!(s.strides(Order::ColumnMajor), vec![1, 2, 6]);
    }

    #[test]
    fn test_element_count_overflow() {
        assert_eq!(Shape::from([usize::MAX, 2]).num_elements(), None);
        assert_eq!(Shape::from([3, 0]).num_elements(), Some(0));
        let strides = Shape::from([usize::MAX, usize::MAX, 2]).strides(Order::RowMajor);
        assert_eq!(strides, vec![usize::MAX, 2, 1]);
    }

    #[test]
    fn test_display() {
        assert_eq!(Shape::from([2, 3]).to_string(), "(2, 3)");
        assert_eq!(Shape::vector(5).to_string(), "(5,)");
        assert_eq!(Shape::scalar().to_string(), "()");
    }

    #[test]
    fn test_shape_spec_lookup() {
        let mut map = BTreeMap::new();
        map.insert("x".to_string(), Shape::scalar());
        map.insert("y".to_string(), Shape::vector(10));
        let spec = ShapeSpec::PerField(map);

        assert_eq!(spec.shape_for("x"), Some(Shape::vector(1)));
        assert_eq!(spec.shape_for("y"), Some(Shape::vector(10)));
        assert_eq!(spec.shape_for("z"), None);
        assert_eq!(ShapeSpec::Flat.shape_for("x"), None);
        assert_eq!(
            ShapeSpec::Uniform(Shape::from([2, 2])).shape_for("any"),
            Some(Shape::from([2, 2]))
        );
    }
}
