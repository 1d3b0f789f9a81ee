use crate::{DType, Error, Result, Shape};

/// A host-side value exchanged with a compiled computation.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T: DType> {
    shape: Shape,
    data: Vec<T>,
}

impl<T: DType> Tensor<T> {
    /// Fails when `data` does not hold exactly one element per position of `shape`.
    pub fn new(shape: impl Into<Shape>, data: Vec<T>) -> Result<Self> {
        let shape = shape.into();
        if shape.elem_count() != data.len() {
            return Err(Error::shape(
                "tensor",
                format!(
                    "shape {shape} needs {} elements, got {}",
                    shape.elem_count(),
                    data.len()
                ),
            ));
        }
        Ok(Self { shape, data })
    }

    pub fn scalar(v: T) -> Self {
        Self {
            shape: Shape::scalar(),
            data: vec![v],
        }
    }

    pub fn full(shape: impl Into<Shape>, v: T) -> Self {
        let shape = shape.into();
        let data = vec![v; shape.elem_count()];
        Self { shape, data }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Row-major elements.
    pub fn data(&self) -> &[T] {
        &self.data
    }

    pub fn into_data(self) -> Vec<T> {
        self.data
    }

    /// The single element of a scalar (or one-element) tensor.
    pub fn to_scalar(&self) -> Result<T> {
        match self.data.as_slice() {
            [v] => Ok(*v),
            _ => Err(Error::shape(
                "tensor",
                format!("{} is not a scalar", self.shape),
            )),
        }
    }
}

impl<T: DType> From<T> for Tensor<T> {
    fn from(value: T) -> Self {
        Self::scalar(value)
    }
}

impl<T: DType> From<Vec<T>> for Tensor<T> {
    fn from(value: Vec<T>) -> Self {
        Self {
            shape: Shape::new(vec![value.len()]),
            data: value,
        }
    }
}
