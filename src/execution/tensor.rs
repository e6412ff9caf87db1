use ndarray::{ArrayD, ArrayViewD, IxDyn};

use crate::error::{Error, Result};

/// Dense f32 tensor copied out of the native engine
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor, checking the element count against the shape
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::Shape(format!(
                "shape {:?} needs {} elements, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of examples along the leading axis
    pub fn batch_size(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Elements per example
    pub fn per_example_size(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    /// Data of example `index` along the batch axis
    pub fn batch_slice(&self, index: usize) -> Option<&[f32]> {
        if index >= self.batch_size() {
            return None;
        }
        let size = self.per_example_size();
        self.data.get(index * size..(index + 1) * size)
    }

    /// Borrow as an n-dimensional array view
    pub fn view(&self) -> Result<ArrayViewD<'_, f32>> {
        ArrayViewD::from_shape(IxDyn(&self.shape), &self.data)
            .map_err(|e| Error::Shape(e.to_string()))
    }

    /// Convert into an owned n-dimensional array
    pub fn into_array(self) -> Result<ArrayD<f32>> {
        ArrayD::from_shape_vec(IxDyn(&self.shape), self.data)
            .map_err(|e| Error::Shape(e.to_string()))
    }
}
