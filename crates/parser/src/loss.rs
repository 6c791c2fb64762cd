//! # Training Loss
//!
//! Negative log-likelihood of the gold structure:
//!
//! ```text
//!   loss = (Σ_valid −log P(gold head) + Σ_valid −log P(gold label | gold head)) / #valid
//! ```
//!
//! Log-likelihoods are gathered at every query position, padded ones
//! included, and padded positions are then replaced by exactly zero. Their
//! gold entries can hold any in-range placeholder without affecting the
//! result.

use deeptree_core::{ParserError, Result};
use deeptree_tensor::ops::gather_last;
use deeptree_tensor::{Mask, Tensor};

use crate::structure::DecodedStructure;

/// Summed negative log-likelihoods over the valid query positions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GoldNll {
    pub edge_head_nll: f64,
    pub edge_label_nll: f64,
    pub num_instances: usize,
}

impl GoldNll {
    pub fn total(&self) -> f64 {
        self.edge_head_nll + self.edge_label_nll
    }
}

/// What [`crate::DeepTreeParser::loss`] returns.
#[derive(Debug, Clone, PartialEq)]
pub struct LossOutput {
    /// `total_loss / num_instances`, or 0 when there are no valid tokens
    pub loss: f64,
    /// `edge_head_nll + edge_label_nll`
    pub total_loss: f64,
    pub edge_head_nll: f64,
    pub edge_label_nll: f64,
    /// Number of valid query positions.
    pub num_instances: usize,
    /// Greedy predictions for the same batch, for metrics.
    pub predictions: DecodedStructure,
}

impl LossOutput {
    /// Normalise summed NLLs into a per-token loss.
    ///
    /// A batch with no valid tokens has zero loss, so callers summing
    /// `total_loss` and `num_instances` across batches are unaffected by it.
    /// A non-finite total is a `NumericDegeneracy`.
    pub fn new(nll: GoldNll, predictions: DecodedStructure) -> Result<Self> {
        let total_loss = nll.total();
        let loss = match nll.num_instances {
            0 => 0.0,
            n => total_loss / n as f64,
        };
        if !loss.is_finite() {
            tracing::error!(
                edge_head_nll = nll.edge_head_nll,
                edge_label_nll = nll.edge_label_nll,
                num_instances = nll.num_instances,
                "non-finite parser loss"
            );
            return Err(ParserError::NumericDegeneracy {
                context: format!("parser loss is {}", loss),
            });
        }
        Ok(Self {
            loss,
            total_loss,
            edge_head_nll: nll.edge_head_nll,
            edge_label_nll: nll.edge_label_nll,
            num_instances: nll.num_instances,
            predictions,
        })
    }
}

/// Sum the gold NLLs of a batch.
///
/// - `edge_head_ll`: `[B, Q, K']` masked log-softmax over keys
/// - `edge_label_ll`: `[B, Q, L]` log-softmax over labels, scored at the gold heads
/// - `edge_mask`: the root-augmented mask used for `edge_head_ll`, if any
///
/// A gold head or label outside its axis is `InvalidIndex` at every
/// position. A valid query whose gold head is a masked key is also
/// `InvalidIndex`: its likelihood is zero by construction.
pub fn gold_nll(
    edge_head_ll: &Tensor,
    edge_label_ll: &Tensor,
    gold_heads: &[Vec<usize>],
    gold_labels: &[Vec<usize>],
    query_mask: Option<&Mask>,
    edge_mask: Option<&Mask>,
) -> Result<GoldNll> {
    let (batch, queries, _) = edge_head_ll.dims3("edge head log-likelihood")?;
    let (label_batch, label_queries, _) = edge_label_ll.dims3("edge label log-likelihood")?;
    if (label_batch, label_queries) != (batch, queries) {
        return Err(ParserError::shape_mismatch(
            "edge label log-likelihood",
            &[batch, queries, edge_label_ll.shape[2]],
            &edge_label_ll.shape,
        ));
    }
    if let Some(mask) = query_mask {
        if mask.dims2("query mask")? != (batch, queries) {
            return Err(ParserError::shape_mismatch(
                "query mask",
                &[batch, queries],
                &mask.shape,
            ));
        }
    }
    if let Some(mask) = edge_mask {
        mask.check_broadcast("edge mask", &edge_head_ll.shape)?;
    }

    let head_ll = gather_last(edge_head_ll, gold_heads, "head")?;
    let label_ll = gather_last(edge_label_ll, gold_labels, "label")?;

    let mut nll = GoldNll {
        edge_head_nll: 0.0,
        edge_label_nll: 0.0,
        num_instances: 0,
    };
    for b in 0..batch {
        for q in 0..queries {
            if !query_mask.map_or(true, |m| m.at2(b, q)) {
                continue;
            }
            let head = gold_heads[b][q];
            if let Some(mask) = edge_mask {
                if !mask.at3(b, q, head) {
                    return Err(ParserError::InvalidIndex {
                        axis: "masked head",
                        index: head,
                        size: edge_head_ll.shape[2],
                    });
                }
            }
            nll.edge_head_nll -= f64::from(head_ll[b][q]);
            nll.edge_label_nll -= f64::from(label_ll[b][q]);
            nll.num_instances += 1;
        }
    }

    if !nll.total().is_finite() {
        tracing::error!(
            edge_head_nll = nll.edge_head_nll,
            edge_label_nll = nll.edge_label_nll,
            "non-finite gold log-likelihood"
        );
        return Err(ParserError::NumericDegeneracy {
            context: "gold log-likelihood is not finite".to_string(),
        });
    }
    Ok(nll)
}
