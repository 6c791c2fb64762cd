//! # Edge Label Scoring
//!
//! Once a head is fixed for every query (gold during training, decoded at
//! inference), the key vector at that head is gathered and paired with the
//! query to score each label:
//!
//! ```text
//!   key [B, K', D] ──gather(heads)──▶ selected [B, Q, D] ─┐
//!                                                        ├─▶ [B, Q, L]
//!   query [B, Q, D] ─────────────────────────────────────┘
//! ```

use deeptree_core::{ParserError, Result};
use deeptree_tensor::ops::gather_rows;
use deeptree_tensor::Tensor;

/// Scores the label distribution of a (query, selected head) pair.
pub trait LabelScorer: Send + Sync {
    /// Size of the label inventory.
    fn num_labels(&self) -> usize;

    /// `query [B, Q, D]`, `selected_key [B, Q, D]` → `[B, Q, L]`
    fn score_labels(&self, query: &Tensor, selected_key: &Tensor) -> Result<Tensor>;

    /// Gather `key` at `heads` and score labels against it.
    ///
    /// `heads[b][q]` must lie in `0..K'`; anything else is an
    /// `InvalidIndex` error.
    fn score_at_heads(&self, query: &Tensor, key: &Tensor, heads: &[Vec<usize>]) -> Result<Tensor> {
        let selected = gather_rows(key, heads)?;
        self.score_labels(query, &selected)
    }
}

impl<S: LabelScorer + ?Sized> LabelScorer for Box<S> {
    fn num_labels(&self) -> usize {
        (**self).num_labels()
    }

    fn score_labels(&self, query: &Tensor, selected_key: &Tensor) -> Result<Tensor> {
        (**self).score_labels(query, selected_key)
    }
}

/// `s_l(x, y) = xᵀ A_l y + b_l`
#[derive(Debug, Clone)]
pub struct BilinearLabelScorer {
    /// `[L, D1, D2]`
    pub weight: Tensor,
    /// `[L]`
    pub bias: Tensor,
}

impl BilinearLabelScorer {
    pub fn new(query_dim: usize, key_dim: usize, num_labels: usize, seed: u64) -> Self {
        let scale = 1.0 / (query_dim.max(1) as f32).sqrt();
        Self {
            weight: Tensor::randn_seeded(vec![num_labels, query_dim, key_dim], scale, seed),
            bias: Tensor::zeros(vec![num_labels]),
        }
    }

    pub fn from_parts(weight: Tensor, bias: Tensor) -> Result<Self> {
        match weight.shape.as_slice() {
            &[labels, _, _] if bias.shape == [labels] => Ok(Self { weight, bias }),
            &[labels, _, _] => Err(ParserError::shape_mismatch(
                "label bias",
                &[labels],
                &bias.shape,
            )),
            other => Err(ParserError::shape_mismatch("label weight", &[0, 0, 0], other)),
        }
    }

    /// Replace the parameters with fresh ones for a new label inventory,
    /// keeping the input widths.
    pub fn reset_labels(&mut self, num_labels: usize, seed: u64) {
        let (d1, d2) = (self.weight.shape[1], self.weight.shape[2]);
        *self = Self::new(d1, d2, num_labels, seed);
    }

    fn dims(&self) -> (usize, usize, usize) {
        (self.weight.shape[0], self.weight.shape[1], self.weight.shape[2])
    }
}

impl LabelScorer for BilinearLabelScorer {
    fn num_labels(&self) -> usize {
        self.weight.shape[0]
    }

    fn score_labels(&self, query: &Tensor, selected_key: &Tensor) -> Result<Tensor> {
        let (labels, d1, d2) = self.dims();
        let (batch, queries, dq) = query.dims3("label query")?;
        let (kb, kq, dk) = selected_key.dims3("label key")?;
        if dq != d1 {
            return Err(ParserError::shape_mismatch(
                "label query",
                &[batch, queries, d1],
                &query.shape,
            ));
        }
        if (kb, kq, dk) != (batch, queries, d2) {
            return Err(ParserError::shape_mismatch(
                "label key",
                &[batch, queries, d2],
                &selected_key.shape,
            ));
        }

        let mut out = Tensor::zeros(vec![batch, queries, labels]);
        for b in 0..batch {
            for q in 0..queries {
                let x = query.row(b, q);
                let y = selected_key.row(b, q);
                let dst = out.row_mut(b, q);
                for (l, slot) in dst.iter_mut().enumerate() {
                    let a = &self.weight.data[l * d1 * d2..(l + 1) * d1 * d2];
                    let mut s = self.bias.data[l];
                    for (i, &xi) in x.iter().enumerate() {
                        let a_row = &a[i * d2..(i + 1) * d2];
                        s += xi * a_row.iter().zip(y).map(|(w, yj)| w * yj).sum::<f32>();
                    }
                    *slot = s;
                }
            }
        }
        Ok(out)
    }
}
