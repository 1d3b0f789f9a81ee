use std::fmt::Display;

use crate::dtype::ElementType;

/// An ordered sequence of dimension sizes. The empty shape is a scalar.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<usize>);

impl Shape {
    pub fn new(dims: Vec<usize>) -> Self {
        Self(dims)
    }

    pub fn scalar() -> Self {
        Self(Vec::new())
    }

    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Number of elements. A scalar has one element.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product()
    }
}

impl Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "(")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, ")")
    }
}

impl From<Vec<usize>> for Shape {
    fn from(value: Vec<usize>) -> Self {
        Self(value)
    }
}

impl From<&[usize]> for Shape {
    fn from(value: &[usize]) -> Self {
        Self(value.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(value: [usize; N]) -> Self {
        Self(value.to_vec())
    }
}

impl From<()> for Shape {
    fn from(_: ()) -> Self {
        Self::scalar()
    }
}

/// Compute default (contiguous) strides for a tensor of given shape.
pub(crate) fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = Vec::with_capacity(shape.len());
    let mut acc = 1;
    // Iterate dims in reverse to accumulate products
    for dim in shape.iter().rev() {
        strides.push(acc);
        acc *= *dim;
    }
    strides.reverse();
    strides
}

/// Shape, strides and placement of a tensor view. Owns no storage.
///
/// Strides are expressed in elements, the offset in bytes from the start of
/// the backing buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TensorDescriptor {
    pub dtype: ElementType,
    pub shape: Shape,
    pub strides: Vec<usize>,
    pub byte_offset: usize,
}

impl TensorDescriptor {
    /// A row-major descriptor starting at the beginning of its buffer.
    pub fn contiguous(dtype: ElementType, shape: Shape) -> Self {
        let strides = contiguous_strides(shape.dims());
        Self {
            dtype,
            shape,
            strides,
            byte_offset: 0,
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    /// Offset of the first element, in elements.
    pub fn elem_offset(&self) -> usize {
        self.byte_offset / self.dtype.size_in_bytes()
    }

    pub fn is_contiguous(&self) -> bool {
        let mut acc = 1;
        for (dim, stride) in self.shape.dims().iter().zip(&self.strides).rev() {
            if *dim != 1 && *stride != acc {
                return false;
            }
            acc *= *dim;
        }
        true
    }

    /// Number of buffer elements spanned by this view, counted from the buffer start.
    pub fn extent(&self) -> usize {
        if self.elem_count() == 0 {
            return self.elem_offset();
        }
        let span: usize = self
            .shape
            .dims()
            .iter()
            .zip(&self.strides)
            .map(|(d, s)| (d - 1) * s)
            .sum();
        self.elem_offset() + span + 1
    }

    /// Buffer index of the row-major element `linear` of this view.
    pub fn offset_of(&self, linear: usize) -> usize {
        let mut rem = linear;
        let mut offset = self.elem_offset();
        for (dim, stride) in self.shape.dims().iter().zip(&self.strides).rev() {
            offset += (rem % dim) * stride;
            rem /= dim;
        }
        offset
    }

    /// The same placement reinterpreted with a new contiguous shape.
    pub(crate) fn reshaped(&self, shape: Shape) -> Self {
        let strides = contiguous_strides(shape.dims());
        Self {
            dtype: self.dtype,
            shape,
            strides,
            byte_offset: self.byte_offset,
        }
    }

    /// The same placement with axes permuted, so that output axis `i` is input axis `order[i]`.
    pub(crate) fn permuted(&self, order: &[usize]) -> Self {
        let dims = order.iter().map(|&a| self.shape.dims()[a]).collect::<Vec<_>>();
        let strides = order.iter().map(|&a| self.strides[a]).collect();
        Self {
            dtype: self.dtype,
            shape: Shape::new(dims),
            strides,
            byte_offset: self.byte_offset,
        }
    }

    /// The same placement viewed with zero-stride axes inserted at `axes` of `shape`.
    pub(crate) fn broadcast(&self, shape: Shape, axes: &[usize]) -> Self {
        let mut src = self.strides.iter();
        let strides = (0..shape.rank())
            .map(|i| {
                if axes.contains(&i) {
                    0
                } else {
                    src.next().copied().unwrap_or(0)
                }
            })
            .collect();
        Self {
            dtype: self.dtype,
            shape,
            strides,
            byte_offset: self.byte_offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strides_are_row_major() {
        assert_eq!(contiguous_strides(&[2, 3, 4]), vec![12, 4, 1]);
        assert_eq!(contiguous_strides(&[]), Vec::<usize>::new());
    }

    #[test]
    fn scalar_has_one_element() {
        let desc = TensorDescriptor::contiguous(ElementType::F32, Shape::scalar());
        assert_eq!(desc.elem_count(), 1);
        assert_eq!(desc.extent(), 1);
        assert_eq!(desc.offset_of(0), 0);
        assert!(desc.is_contiguous());
    }

    #[test]
    fn permuted_view_walks_transposed() {
        let desc = TensorDescriptor::contiguous(ElementType::F32, Shape::from([2, 3]));
        let t = desc.permuted(&[1, 0]);
        assert_eq!(t.shape.dims(), &[3, 2]);
        assert!(!t.is_contiguous());
        let offsets = (0..6).map(|i| t.offset_of(i)).collect::<Vec<_>>();
        assert_eq!(offsets, vec![0, 3, 1, 4, 2, 5]);
        assert_eq!(t.extent(), 6);
    }

    #[test]
    fn broadcast_view_repeats() {
        let desc = TensorDescriptor::contiguous(ElementType::F64, Shape::from([3]));
        let b = desc.broadcast(Shape::from([2, 3]), &[0]);
        assert_eq!(b.strides, vec![0, 1]);
        let offsets = (0..6).map(|i| b.offset_of(i)).collect::<Vec<_>>();
        assert_eq!(offsets, vec![0, 1, 2, 0, 1, 2]);
        assert_eq!(b.extent(), 3);
    }
}
