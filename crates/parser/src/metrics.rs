//! # Attachment Metrics
//!
//! Running accuracy and likelihood statistics across batches. The caller
//! owns an [`AttachmentMetrics`], feeds it every batch, and reads the
//! aggregate whenever it wants:
//!
//! | Key | Meaning |
//! |-----|---------|
//! | `UAS` | fraction of valid tokens with the correct head |
//! | `LAS` | fraction with the correct head and label |
//! | `EL` | fraction with the correct label |
//! | `UEM` | fraction of sentences whose heads are all correct |
//! | `LEM` | fraction of sentences whose heads and labels are all correct |
//! | `EHL` | mean head NLL per valid token |
//! | `ELL` | mean label NLL per valid token |
//!
//! Every ratio is `0.0` when its denominator is zero.

use std::collections::BTreeMap;

use deeptree_core::{ParserError, Result};
use deeptree_tensor::Mask;
use serde::{Deserialize, Serialize};

/// Accumulated counts. Serializable so a training loop can checkpoint it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentMetrics {
    pub total_tokens: u64,
    pub correct_heads: u64,
    pub correct_labels: u64,
    pub correct_heads_and_labels: u64,
    pub total_sentences: u64,
    pub exact_unlabeled: u64,
    pub exact_labeled: u64,
    pub head_nll: f64,
    pub label_nll: f64,
}

impl AttachmentMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one batch.
    ///
    /// All four index matrices are `[B][Q]`; `valid_mask` is `[B, Q]` and
    /// treats every position as valid when absent. `head_nll` and
    /// `label_nll` are the batch's summed NLLs. Sentences with no valid
    /// tokens do not count towards exact match.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &mut self,
        pred_heads: &[Vec<usize>],
        pred_labels: &[Vec<usize>],
        gold_heads: &[Vec<usize>],
        gold_labels: &[Vec<usize>],
        valid_mask: Option<&Mask>,
        head_nll: f64,
        label_nll: f64,
    ) -> Result<()> {
        let batch = gold_heads.len();
        for (name, m) in [
            ("predicted heads", pred_heads),
            ("predicted labels", pred_labels),
            ("gold labels", gold_labels),
        ] {
            if m.len() != batch {
                return Err(ParserError::shape_mismatch(name, &[batch], &[m.len()]));
            }
        }

        let mut tokens = 0u64;
        let mut heads_ok = 0u64;
        let mut labels_ok = 0u64;
        let mut both_ok = 0u64;
        let mut sentences = 0u64;
        let mut exact_u = 0u64;
        let mut exact_l = 0u64;

        for b in 0..batch {
            let len = gold_heads[b].len();
            for (name, row) in [
                ("predicted heads", &pred_heads[b]),
                ("predicted labels", &pred_labels[b]),
                ("gold labels", &gold_labels[b]),
            ] {
                if row.len() != len {
                    return Err(ParserError::shape_mismatch(
                        name,
                        &[batch, len],
                        &[batch, row.len()],
                    ));
                }
            }
            if let Some(mask) = valid_mask {
                if mask.dims2("valid mask")? != (batch, len) {
                    return Err(ParserError::shape_mismatch(
                        "valid mask",
                        &[batch, len],
                        &mask.shape,
                    ));
                }
            }

            let mut sentence_tokens = 0u64;
            let mut sentence_heads = true;
            let mut sentence_labels = true;
            for q in 0..len {
                if !valid_mask.map_or(true, |m| m.at2(b, q)) {
                    continue;
                }
                let head = pred_heads[b][q] == gold_heads[b][q];
                let label = pred_labels[b][q] == gold_labels[b][q];
                sentence_tokens += 1;
                heads_ok += u64::from(head);
                labels_ok += u64::from(label);
                both_ok += u64::from(head && label);
                sentence_heads &= head;
                sentence_labels &= head && label;
            }
            if sentence_tokens > 0 {
                sentences += 1;
                exact_u += u64::from(sentence_heads);
                exact_l += u64::from(sentence_labels);
            }
            tokens += sentence_tokens;
        }

        self.total_tokens += tokens;
        self.correct_heads += heads_ok;
        self.correct_labels += labels_ok;
        self.correct_heads_and_labels += both_ok;
        self.total_sentences += sentences;
        self.exact_unlabeled += exact_u;
        self.exact_labeled += exact_l;
        self.head_nll += head_nll;
        self.label_nll += label_nll;
        Ok(())
    }

    /// Current aggregate. Does not reset.
    pub fn compute(&self) -> BTreeMap<String, f64> {
        let tokens = self.total_tokens as f64;
        let sentences = self.total_sentences as f64;
        let mut out = BTreeMap::new();
        out.insert("UAS".to_string(), ratio(self.correct_heads as f64, tokens));
        out.insert("LAS".to_string(), ratio(self.correct_heads_and_labels as f64, tokens));
        out.insert("EL".to_string(), ratio(self.correct_labels as f64, tokens));
        out.insert("UEM".to_string(), ratio(self.exact_unlabeled as f64, sentences));
        out.insert("LEM".to_string(), ratio(self.exact_labeled as f64, sentences));
        out.insert("EHL".to_string(), ratio(self.head_nll, tokens));
        out.insert("ELL".to_string(), ratio(self.label_nll, tokens));
        out
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}
