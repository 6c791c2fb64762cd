//! # Edge Attention
//!
//! A [`PairwiseScorer`] assigns a compatibility score to every
//! (query, key) pair of a sentence:
//!
//! ```text
//!   query [B, Q, Dq] ─┐
//!                     ├─▶ score ─▶ [B, Q, K]
//!   key   [B, K, Dk] ─┘
//! ```
//!
//! Key sequences passed in by the parser already contain the root sentinel
//! at position 0, but scorers do not need to know that.
//!
//! | Scorer | Score |
//! |--------|-------|
//! | [`DotProductAttention`] | `q · k` |
//! | [`BilinearAttention`] | `qᵀ W k` |
//! | [`BiaffineAttention`] | `qᵀ U k + w_q · q + w_k · k + b` |

use deeptree_core::{ParserError, Result};
use deeptree_tensor::ops::{matmul_last, pairwise_dot};
use deeptree_tensor::Tensor;

/// Scores every query against every key of the same batch element.
pub trait PairwiseScorer: Send + Sync {
    /// `query [B, Q, Dq]`, `key [B, K, Dk]` → `[B, Q, K]`
    fn score(&self, query: &Tensor, key: &Tensor) -> Result<Tensor>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

impl<S: PairwiseScorer + ?Sized> PairwiseScorer for Box<S> {
    fn score(&self, query: &Tensor, key: &Tensor) -> Result<Tensor> {
        (**self).score(query, key)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Plain dot-product compatibility. Query and key widths must agree.
#[derive(Debug, Clone, Copy, Default)]
pub struct DotProductAttention;

impl PairwiseScorer for DotProductAttention {
    fn score(&self, query: &Tensor, key: &Tensor) -> Result<Tensor> {
        pairwise_dot(query, key)
    }

    fn name(&self) -> &'static str {
        "dot_product"
    }
}

/// Bilinear compatibility `qᵀ W k`.
#[derive(Debug, Clone)]
pub struct BilinearAttention {
    /// `[Dq, Dk]`
    pub weight: Tensor,
}

impl BilinearAttention {
    pub fn new(query_dim: usize, key_dim: usize, seed: u64) -> Self {
        let scale = 1.0 / (query_dim.max(1) as f32).sqrt();
        Self {
            weight: Tensor::randn_seeded(vec![query_dim, key_dim], scale, seed),
        }
    }

    pub fn from_weight(weight: Tensor) -> Result<Self> {
        if weight.rank() != 2 {
            return Err(ParserError::shape_mismatch(
                "bilinear attention weight",
                &[0, 0],
                &weight.shape,
            ));
        }
        Ok(Self { weight })
    }
}

impl PairwiseScorer for BilinearAttention {
    fn score(&self, query: &Tensor, key: &Tensor) -> Result<Tensor> {
        let projected = matmul_last(query, &self.weight)?;
        pairwise_dot(&projected, key)
    }

    fn name(&self) -> &'static str {
        "bilinear"
    }
}

/// Biaffine compatibility (Dozat & Manning style):
///
/// `s(q, k) = qᵀ U k + w_q · q + w_k · k + b`
///
/// The `w_k · k` term lets a key be a good head regardless of the query,
/// which is what makes the root sentinel learnable as a generic attachment
/// point.
#[derive(Debug, Clone)]
pub struct BiaffineAttention {
    /// `[Dq, Dk]`
    pub u: Tensor,
    /// `[Dq]`
    pub w_query: Tensor,
    /// `[Dk]`
    pub w_key: Tensor,
    pub bias: f32,
}

impl BiaffineAttention {
    pub fn new(query_dim: usize, key_dim: usize, seed: u64) -> Self {
        let scale = 1.0 / (query_dim.max(1) as f32).sqrt();
        Self {
            u: Tensor::randn_seeded(vec![query_dim, key_dim], scale, seed),
            w_query: Tensor::randn_seeded(vec![query_dim], scale, seed.wrapping_add(1)),
            w_key: Tensor::randn_seeded(vec![key_dim], scale, seed.wrapping_add(2)),
            bias: 0.0,
        }
    }

    pub fn from_parts(u: Tensor, w_query: Tensor, w_key: Tensor, bias: f32) -> Result<Self> {
        match u.shape.as_slice() {
            &[dq, dk] if w_query.shape == [dq] && w_key.shape == [dk] => Ok(Self {
                u,
                w_query,
                w_key,
                bias,
            }),
            &[dq, dk] => Err(ParserError::shape_mismatch(
                "biaffine linear terms",
                &[dq, dk],
                &[w_query.size(), w_key.size()],
            )),
            other => Err(ParserError::shape_mismatch("biaffine weight", &[0, 0], other)),
        }
    }
}

impl PairwiseScorer for BiaffineAttention {
    fn score(&self, query: &Tensor, key: &Tensor) -> Result<Tensor> {
        let (batch, queries, dq) = query.dims3("biaffine query")?;
        let (_, keys, dk) = key.dims3("biaffine key")?;
        if dq != self.w_query.size() || dk != self.w_key.size() {
            return Err(ParserError::shape_mismatch(
                "biaffine inputs",
                &[self.w_query.size(), self.w_key.size()],
                &[dq, dk],
            ));
        }

        let mut scores = pairwise_dot(&matmul_last(query, &self.u)?, key)?;
        for b in 0..batch {
            let key_terms: Vec<f32> = (0..keys)
                .map(|k| dot(key.row(b, k), &self.w_key.data))
                .collect();
            for q in 0..queries {
                let query_term = dot(query.row(b, q), &self.w_query.data) + self.bias;
                for (s, kt) in scores.row_mut(b, q).iter_mut().zip(&key_terms) {
                    *s += query_term + kt;
                }
            }
        }
        Ok(scores)
    }

    fn name(&self) -> &'static str {
        "biaffine"
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
