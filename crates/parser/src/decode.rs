//! # Greedy Decoding
//!
//! Inference picks, independently for every query, the highest scoring
//! valid head and then the highest scoring label at that head:
//!
//! ```text
//!   edge scores [B, Q, K'] ──masked_fill(MINUS_INF)──▶ argmax ──▶ heads [B, Q]
//!   label key   [B, K', Dt] ──gather(heads)──▶ label scores [B, Q, L] ──▶ argmax ──▶ labels
//! ```
//!
//! Masked positions are filled with a large finite negative value rather
//! than `-inf`, so a row can never produce NaN. Exact ties resolve to the
//! lowest index. The result is not forced to be a tree.

use deeptree_core::{ParserError, Result};
use deeptree_tensor::ops::{argmax_last, masked_fill, MINUS_INF};
use deeptree_tensor::{Mask, Tensor};

use crate::label::LabelScorer;
use crate::structure::DecodedStructure;

/// Fail with `DegenerateMask` if any query row of `mask` has no valid key.
///
/// After root augmentation this cannot happen; it guards hand-built masks.
pub fn ensure_attachable(mask: &Mask) -> Result<()> {
    let (batch, rows, keys) = match mask.shape.as_slice() {
        &[b, q, k] => (b, q, k),
        other => return Err(ParserError::shape_mismatch("edge mask", &[0, 0, 0], other)),
    };
    for b in 0..batch {
        for q in 0..rows {
            if !(0..keys).any(|k| mask.at3(b, q, k)) {
                return Err(ParserError::DegenerateMask { batch: b, query: q });
            }
        }
    }
    Ok(())
}

/// Highest scoring valid head per query. `scores` are left untouched.
pub fn select_heads(scores: &Tensor, mask: Option<&Mask>) -> Result<Vec<Vec<usize>>> {
    match mask {
        Some(mask) => argmax_last(&masked_fill(scores, mask, MINUS_INF)?),
        None => argmax_last(scores),
    }
}

/// Decode heads from `edge_scores`, then labels at those heads.
///
/// `label_query` is `[B, Q, Dt]` and `label_key` is the root-augmented
/// `[B, K', Dt]`, in the same key order as `edge_scores`.
pub fn greedy_decode<L: LabelScorer + ?Sized>(
    label_scorer: &L,
    label_query: &Tensor,
    label_key: &Tensor,
    edge_scores: &Tensor,
    mask: Option<&Mask>,
) -> Result<DecodedStructure> {
    let (_, _, keys) = edge_scores.dims3("edge scores")?;
    let (_, label_keys, _) = label_key.dims3("label key")?;
    if keys != label_keys {
        return Err(ParserError::shape_mismatch(
            "label key",
            &[label_key.shape[0], keys, label_key.shape[2]],
            &label_key.shape,
        ));
    }
    if let Some(mask) = mask {
        ensure_attachable(mask)?;
    }

    decode_with_label_scores(label_scorer, label_query, label_key, edge_scores, mask)
        .map(|(decoded, _)| decoded)
}

/// [`greedy_decode`], also returning the `[B, Q, L]` label scores at the
/// decoded heads.
pub(crate) fn decode_with_label_scores<L: LabelScorer + ?Sized>(
    label_scorer: &L,
    label_query: &Tensor,
    label_key: &Tensor,
    edge_scores: &Tensor,
    mask: Option<&Mask>,
) -> Result<(DecodedStructure, Tensor)> {
    let heads = select_heads(edge_scores, mask)?;
    let label_scores = label_scorer.score_at_heads(label_query, label_key, &heads)?;
    // a NaN never wins a comparison, so argmax would quietly pick label 0
    if let Some(position) = label_scores.first_non_finite() {
        tracing::error!(position, "non-finite label score");
        return Err(ParserError::NumericDegeneracy {
            context: format!("label score at flat position {} is not finite", position),
        });
    }
    let labels = argmax_last(&label_scores)?;
    Ok((DecodedStructure::new(heads, labels), label_scores))
}
