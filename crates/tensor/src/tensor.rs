//! # Runtime Tensors
//!
//! A dense, row-major `f32` tensor with a runtime shape. The parser works
//! almost entirely with rank-3 batches:
//!
//! | Tensor | Shape |
//! |--------|-------|
//! | contextual query vectors | `[B, Q, Dq]` |
//! | contextual key vectors | `[B, K, Dk]` |
//! | edge head scores | `[B, Q, K+1]` |
//! | edge type scores | `[B, Q, L]` |
//!
//! Shape checks return [`ParserError::ShapeMismatch`] instead of panicking,
//! so a malformed batch aborts one step rather than the whole process.

use std::fmt;

use deeptree_core::{ParserError, Result, Shape};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

/// A runtime-shaped tensor.
#[derive(Clone, PartialEq)]
pub struct Tensor {
    /// Shape of the tensor
    pub shape: Vec<usize>,
    /// Flattened data in row-major order
    pub data: Vec<f32>,
}

impl Tensor {
    /// Create a tensor filled with zeros.
    pub fn zeros(shape: Vec<usize>) -> Self {
        Self::full(shape, 0.0)
    }

    /// Create a tensor filled with a constant value.
    pub fn full(shape: Vec<usize>, value: f32) -> Self {
        let size: usize = shape.iter().product();
        Self {
            shape,
            data: vec![value; size],
        }
    }

    /// Create a tensor from data with given shape.
    pub fn from_data(shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(ParserError::shape_mismatch(
                "tensor data",
                &[expected],
                &[data.len()],
            ));
        }
        Ok(Self { shape, data })
    }

    /// Create a 1D vector tensor.
    pub fn vector(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Build a `[B, N, D]` batch from nested rows.
    ///
    /// Every sentence must have the same number of rows and every row the
    /// same width; pad upstream and describe the padding with a mask.
    ///
    /// ```rust
    /// use deeptree_tensor::Tensor;
    ///
    /// let t = Tensor::from_batch(&[
    ///     vec![vec![1.0, 2.0], vec![3.0, 4.0]],
    ///     vec![vec![5.0, 6.0], vec![7.0, 8.0]],
    /// ]).unwrap();
    /// assert_eq!(t.shape, vec![2, 2, 2]);
    /// assert_eq!(t.at3(1, 0, 1), 6.0);
    /// ```
    pub fn from_batch(rows: &[Vec<Vec<f32>>]) -> Result<Self> {
        let batch = rows.len();
        let len = rows.first().map_or(0, |s| s.len());
        let dim = rows
            .first()
            .and_then(|s| s.first())
            .map_or(0, |r| r.len());

        let mut data = Vec::with_capacity(batch * len * dim);
        for sentence in rows {
            if sentence.len() != len {
                return Err(ParserError::shape_mismatch(
                    "batch rows",
                    &[batch, len, dim],
                    &[batch, sentence.len(), dim],
                ));
            }
            for row in sentence {
                if row.len() != dim {
                    return Err(ParserError::shape_mismatch(
                        "batch rows",
                        &[batch, len, dim],
                        &[batch, len, row.len()],
                    ));
                }
                data.extend_from_slice(row);
            }
        }

        Ok(Self {
            shape: vec![batch, len, dim],
            data,
        })
    }

    /// Create a tensor with values drawn from N(0, scale²).
    ///
    /// The same seed always yields the same tensor.
    pub fn randn_seeded(shape: Vec<usize>, scale: f32, seed: u64) -> Self {
        let size: usize = shape.iter().product();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let data = match Normal::new(0.0f32, scale.abs()) {
            Ok(normal) => (0..size).map(|_| normal.sample(&mut rng)).collect(),
            Err(_) => vec![0.0; size],
        };
        Self { shape, data }
    }

    /// Shape descriptor for error reporting.
    pub fn shape_of(&self) -> Shape {
        Shape::f32(self.shape.clone())
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Dimensions of a rank-3 tensor, or a `ShapeMismatch` naming `context`.
    pub fn dims3(&self, context: &'static str) -> Result<(usize, usize, usize)> {
        match self.shape.as_slice() {
            &[b, n, d] => Ok((b, n, d)),
            other => Err(ParserError::ShapeMismatch {
                context,
                expected: Shape::f32(vec![0, 0, 0]),
                got: Shape::f32(other.to_vec()),
            }),
        }
    }

    /// Element `[b, i, j]` of a rank-3 tensor.
    pub fn at3(&self, b: usize, i: usize, j: usize) -> f32 {
        self.data[(b * self.shape[1] + i) * self.shape[2] + j]
    }

    /// Innermost row `[b, i, ..]` of a rank-3 tensor.
    pub fn row(&self, b: usize, i: usize) -> &[f32] {
        let width = self.shape[2];
        let start = (b * self.shape[1] + i) * width;
        &self.data[start..start + width]
    }

    /// Mutable innermost row `[b, i, ..]` of a rank-3 tensor.
    pub fn row_mut(&mut self, b: usize, i: usize) -> &mut [f32] {
        let width = self.shape[2];
        let start = (b * self.shape[1] + i) * width;
        &mut self.data[start..start + width]
    }

    /// Iterate over all innermost rows.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        let width = self.shape.last().copied().unwrap_or(1).max(1);
        self.data.chunks(width)
    }

    /// Apply a function to each element.
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| f(x)).collect(),
        }
    }

    /// True when no element is NaN or infinite.
    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }

    /// Flat position of the first non-finite element, if any.
    pub fn first_non_finite(&self) -> Option<usize> {
        self.data.iter().position(|x| !x.is_finite())
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.shape.is_empty() {
            write!(f, "Tensor(scalar={})", self.data[0])
        } else {
            write!(f, "Tensor(shape={:?}, data={:?})", self.shape, self.data)
        }
    }
}
