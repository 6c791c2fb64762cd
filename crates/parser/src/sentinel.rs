//! # Root Sentinel
//!
//! Every query needs at least one legal head. Rather than special-casing the
//! root everywhere, a single learned vector is prepended to the key
//! sequence of every batch element:
//!
//! ```text
//!   key  [B, K, Dk]      ──▶  [ sentinel | key ]   [B, K+1, Dk]
//!   mask [B, Q, K]       ──▶  [   true   | mask ]  [B, Q, K+1]
//! ```
//!
//! Head index 0 therefore always means "attach to the root", and key token
//! `k` moves to index `k + 1`.

use deeptree_core::{ParserError, Result};
use deeptree_tensor::ops::concat_seq;
use deeptree_tensor::{Mask, Tensor};

/// The learned root key vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Sentinel {
    /// `[Dk]`
    pub vector: Tensor,
}

impl Sentinel {
    /// Normal-initialised sentinel of width `key_dim`.
    pub fn new(key_dim: usize, seed: u64) -> Self {
        Self {
            vector: Tensor::randn_seeded(vec![key_dim], 1.0, seed),
        }
    }

    pub fn from_vector(vector: Vec<f32>) -> Self {
        Self {
            vector: Tensor::vector(vector),
        }
    }

    pub fn dim(&self) -> usize {
        self.vector.size()
    }

    /// The sentinel repeated for each batch element: `[B, 1, Dk]`.
    fn expand(&self, batch: usize) -> Tensor {
        let dim = self.dim();
        let mut data = Vec::with_capacity(batch * dim);
        for _ in 0..batch {
            data.extend_from_slice(&self.vector.data);
        }
        Tensor {
            shape: vec![batch, 1, dim],
            data,
        }
    }

    /// Prepend the sentinel to `key` and a valid column to `mask`.
    ///
    /// - `key = None`: the sentinel is the only key and the returned mask is
    ///   an all-valid `[B, Q, 1]`.
    /// - `mask = None` with a key: the mask stays absent (everything valid).
    pub fn add_root(
        &self,
        query: &Tensor,
        key: Option<&Tensor>,
        mask: Option<&Mask>,
    ) -> Result<(Tensor, Option<Mask>)> {
        let (batch, queries, _) = query.dims3("query")?;
        let sentinel = self.expand(batch);

        let key = match key {
            Some(key) => key,
            None => return Ok((sentinel, Some(Mask::ones(vec![batch, queries, 1])))),
        };

        let (key_batch, keys, key_dim) = key.dims3("key")?;
        if key_batch != batch || key_dim != self.dim() {
            return Err(ParserError::shape_mismatch(
                "key",
                &[batch, keys, self.dim()],
                &key.shape,
            ));
        }
        let new_key = concat_seq(&sentinel, key)?;

        let new_mask = match mask {
            Some(mask) => {
                mask.check_broadcast("edge mask", &[batch, queries, keys])?;
                Some(mask.prepend_valid_column()?)
            }
            None => None,
        };
        Ok((new_key, new_mask))
    }
}
