//! # Validity Masks
//!
//! A `Mask` marks which positions are real. Two layouts are used:
//!
//! - **query masks** `[B, Q]`: which query tokens are real (not padding)
//! - **edge masks** `[B, Q, K]` or `[B, 1, K]`: which (query, key) pairs may
//!   be attached. The `[B, 1, K]` form broadcasts over queries.
//!
//! An absent mask (`Option<&Mask>::None`) means every position is valid.

use deeptree_core::{ParserError, Result, Shape};

/// Boolean validity mask with a runtime shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    /// Shape of the mask
    pub shape: Vec<usize>,
    /// Flattened flags in row-major order
    pub data: Vec<bool>,
}

impl Mask {
    /// Create a mask from flags with given shape.
    pub fn new(shape: Vec<usize>, data: Vec<bool>) -> Result<Self> {
        let expected: usize = shape.iter().product();
        if data.len() != expected {
            return Err(ParserError::ShapeMismatch {
                context: "mask data",
                expected: Shape::bool(vec![expected]),
                got: Shape::bool(vec![data.len()]),
            });
        }
        Ok(Self { shape, data })
    }

    /// An all-valid mask.
    pub fn ones(shape: Vec<usize>) -> Self {
        let size: usize = shape.iter().product();
        Self {
            shape,
            data: vec![true; size],
        }
    }

    /// A `[B, max_len]` query mask from per-sentence lengths.
    ///
    /// ```rust
    /// use deeptree_tensor::Mask;
    ///
    /// let mask = Mask::from_lengths(&[3, 2], 3).unwrap();
    /// assert_eq!(mask.count(), 5);
    /// assert!(!mask.at2(1, 2));
    /// ```
    pub fn from_lengths(lengths: &[usize], max_len: usize) -> Result<Self> {
        let mut data = Vec::with_capacity(lengths.len() * max_len);
        for &len in lengths {
            if len > max_len {
                return Err(ParserError::InvalidIndex {
                    axis: "sentence length",
                    index: len,
                    size: max_len,
                });
            }
            data.extend((0..max_len).map(|i| i < len));
        }
        Ok(Self {
            shape: vec![lengths.len(), max_len],
            data,
        })
    }

    /// Nested `[B][Q][K]` flags into a rank-3 mask.
    pub fn from_nested(rows: &[Vec<Vec<bool>>]) -> Result<Self> {
        let batch = rows.len();
        let len = rows.first().map_or(0, |s| s.len());
        let width = rows
            .first()
            .and_then(|s| s.first())
            .map_or(0, |r| r.len());
        let mut data = Vec::with_capacity(batch * len * width);
        for sentence in rows {
            for row in sentence {
                data.extend_from_slice(row);
            }
            if sentence.len() != len || sentence.iter().any(|r| r.len() != width) {
                return Err(ParserError::ShapeMismatch {
                    context: "nested mask",
                    expected: Shape::bool(vec![batch, len, width]),
                    got: Shape::bool(vec![batch, sentence.len(), width]),
                });
            }
        }
        Ok(Self {
            shape: vec![batch, len, width],
            data,
        })
    }

    /// Pairwise mask `[B, Q, K]`: pair (q, k) is valid when both the query
    /// token and the key token are valid.
    pub fn pairwise(query_mask: &Mask, key_mask: &Mask) -> Result<Self> {
        let (batch, queries) = query_mask.dims2("query mask")?;
        let (key_batch, keys) = key_mask.dims2("key mask")?;
        if batch != key_batch {
            return Err(ParserError::ShapeMismatch {
                context: "pairwise mask batch",
                expected: Shape::bool(vec![batch, keys]),
                got: key_mask.shape_of(),
            });
        }
        let mut data = Vec::with_capacity(batch * queries * keys);
        for b in 0..batch {
            for q in 0..queries {
                for k in 0..keys {
                    data.push(query_mask.at2(b, q) && key_mask.at2(b, k));
                }
            }
        }
        Ok(Self {
            shape: vec![batch, queries, keys],
            data,
        })
    }

    /// Shape descriptor for error reporting.
    pub fn shape_of(&self) -> Shape {
        Shape::bool(self.shape.clone())
    }

    /// Dimensions of a rank-2 mask.
    pub fn dims2(&self, context: &'static str) -> Result<(usize, usize)> {
        match self.shape.as_slice() {
            &[b, n] => Ok((b, n)),
            _ => Err(ParserError::ShapeMismatch {
                context,
                expected: Shape::bool(vec![0, 0]),
                got: self.shape_of(),
            }),
        }
    }

    /// Flag `[b, i]` of a rank-2 mask.
    pub fn at2(&self, b: usize, i: usize) -> bool {
        self.data[b * self.shape[1] + i]
    }

    /// Flag `[b, q, k]` of a rank-3 mask, broadcasting a size-1 query axis.
    pub fn at3(&self, b: usize, q: usize, k: usize) -> bool {
        let q = if self.shape[1] == 1 { 0 } else { q };
        self.data[(b * self.shape[1] + q) * self.shape[2] + k]
    }

    /// Number of valid positions.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// Check that this edge mask broadcasts to a `[B, Q, K]` score tensor.
    pub fn check_broadcast(&self, context: &'static str, target: &[usize]) -> Result<()> {
        let target_shape = Shape::bool(target.to_vec());
        if target.len() == 3 && self.shape_of().broadcasts_along(&target_shape, 1) {
            Ok(())
        } else {
            Err(ParserError::ShapeMismatch {
                context,
                expected: target_shape,
                got: self.shape_of(),
            })
        }
    }

    /// Prepend an all-valid column on the last axis: `[B, Q, K] → [B, Q, K+1]`.
    pub fn prepend_valid_column(&self) -> Result<Self> {
        let (batch, rows, width) = match self.shape.as_slice() {
            &[b, q, k] => (b, q, k),
            _ => {
                return Err(ParserError::ShapeMismatch {
                    context: "edge mask",
                    expected: Shape::bool(vec![0, 0, 0]),
                    got: self.shape_of(),
                })
            }
        };
        let mut data = Vec::with_capacity(batch * rows * (width + 1));
        for row in 0..batch * rows {
            data.push(true);
            data.extend_from_slice(&self.data[row * width..(row + 1) * width]);
        }
        Ok(Self {
            shape: vec![batch, rows, width + 1],
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_lengths() {
        let mask = Mask::from_lengths(&[3, 1], 3).unwrap();
        assert_eq!(mask.shape, vec![2, 3]);
        assert_eq!(mask.data, vec![true, true, true, true, false, false]);
        assert!(Mask::from_lengths(&[4], 3).is_err());
    }

    #[test]
    fn test_pairwise() {
        let q = Mask::from_lengths(&[2], 2).unwrap();
        let k = Mask::from_lengths(&[1], 3).unwrap();
        let pair = Mask::pairwise(&q, &k).unwrap();
        assert_eq!(pair.shape, vec![1, 2, 3]);
        assert!(pair.at3(0, 1, 0));
        assert!(!pair.at3(0, 1, 1));
    }

    #[test]
    fn test_broadcast_query_axis() {
        let mask = Mask::new(vec![1, 1, 3], vec![true, false, true]).unwrap();
        assert!(mask.check_broadcast("edge", &[1, 4, 3]).is_ok());
        assert!(!mask.at3(0, 3, 1));
        assert!(mask.at3(0, 2, 2));
        assert!(mask.check_broadcast("edge", &[1, 4, 2]).is_err());
    }

    #[test]
    fn test_prepend_valid_column() {
        let mask = Mask::new(vec![1, 2, 2], vec![false, false, true, false]).unwrap();
        let extended = mask.prepend_valid_column().unwrap();
        assert_eq!(extended.shape, vec![1, 2, 3]);
        assert_eq!(
            extended.data,
            vec![true, false, false, true, true, false]
        );
    }

    #[test]
    fn test_prepend_to_empty_key_axis() {
        let mask = Mask::ones(vec![2, 3, 0]);
        let extended = mask.prepend_valid_column().unwrap();
        assert_eq!(extended.shape, vec![2, 3, 1]);
        assert_eq!(extended.count(), 6);
    }

    #[test]
    fn test_from_nested_rejects_ragged() {
        let ok = Mask::from_nested(&[vec![vec![true, false], vec![true, true]]]).unwrap();
        assert_eq!(ok.shape, vec![1, 2, 2]);
        assert!(Mask::from_nested(&[vec![vec![true, false], vec![true]]]).is_err());
    }
}
