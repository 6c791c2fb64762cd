//! # Deep Biaffine Parser
//!
//! Wires the pieces together for one batch:
//!
//! ```text
//!   key ──Sentinel::add_root──▶ key' [B, K+1, Dk]
//!
//!   query ─▶ edge_head_query ─┐                    ┌─▶ masked log-softmax ─▶ head NLL   (loss)
//!   key'  ─▶ edge_head_key  ──┴─▶ attention [B,Q,K+1] ┤
//!                                                   └─▶ masked argmax ─▶ heads        (decode)
//!   query ─▶ edge_type_query ─┐
//!   key'  ─▶ edge_type_key  ──┴─▶ labels at (gold | decoded) heads [B,Q,L]
//! ```
//!
//! The parser owns only parameters. Nothing about a batch outlives the
//! call, and metrics live with the caller.

use std::sync::atomic::{AtomicU64, Ordering};

use deeptree_core::{ParserError, Result};
use deeptree_tensor::ops::{log_softmax, masked_log_softmax};
use deeptree_tensor::{ChannelDropout, FeedForward, Mask, Tensor};

use crate::attention::PairwiseScorer;
use crate::batch::ContextualBatch;
use crate::config::ParserConfig;
use crate::decode::{decode_with_label_scores, ensure_attachable, greedy_decode};
use crate::label::{BilinearLabelScorer, LabelScorer};
use crate::loss::{gold_nll, LossOutput};
use crate::metrics::AttachmentMetrics;
use crate::sentinel::Sentinel;
use crate::structure::DecodedStructure;

/// The four feed-forward projections applied before scoring.
#[derive(Debug, Clone)]
pub struct Projections {
    pub edge_head_query: FeedForward,
    pub edge_head_key: FeedForward,
    pub edge_type_query: FeedForward,
    pub edge_type_key: FeedForward,
}

impl Projections {
    /// ELU projections with fresh parameters.
    pub fn new(
        query_dim: usize,
        key_dim: usize,
        head_dim: usize,
        type_dim: usize,
        seed: u64,
    ) -> Self {
        Self {
            edge_head_query: FeedForward::new(query_dim, head_dim, seed),
            edge_head_key: FeedForward::new(key_dim, head_dim, seed.wrapping_add(1)),
            edge_type_query: FeedForward::new(query_dim, type_dim, seed.wrapping_add(2)),
            edge_type_key: FeedForward::new(key_dim, type_dim, seed.wrapping_add(3)),
        }
    }

    /// Pass-through projections, so scores can be computed by hand.
    pub fn identity(dim: usize) -> Self {
        Self {
            edge_head_query: FeedForward::identity(dim),
            edge_head_key: FeedForward::identity(dim),
            edge_type_query: FeedForward::identity(dim),
            edge_type_key: FeedForward::identity(dim),
        }
    }
}

/// Everything computed for a batch in one forward pass.
///
/// `predictions` and the score tensors are always greedy. The
/// log-likelihoods are only filled in when gold heads are given, and
/// `edge_type_ll` is then scored at the gold heads.
#[derive(Debug, Clone)]
pub struct ParserOutput {
    /// Greedy heads and labels.
    pub predictions: DecodedStructure,
    /// Raw edge scores `[B, Q, K+1]`; column 0 is the root.
    pub edge_head_scores: Tensor,
    /// Label scores `[B, Q, L]` at the greedy heads.
    pub edge_type_scores: Tensor,
    /// Masked log-softmax of `edge_head_scores`.
    pub edge_head_ll: Option<Tensor>,
    /// Label log-softmax `[B, Q, L]` at the gold heads.
    pub edge_type_ll: Option<Tensor>,
    /// Root-augmented edge mask, if the batch had one.
    pub edge_mask: Option<Mask>,
}

/// Projected and scored tensors shared by every entry point.
struct Encoded {
    edge_scores: Tensor,
    label_query: Tensor,
    label_key: Tensor,
    mask: Option<Mask>,
}

/// A biaffine head selector and edge labeler.
///
/// `A` scores (query, key) pairs for attachment and `L` scores labels at a
/// chosen head. Both are fixed at construction; see
/// [`DeepTreeParser::from_config`] for the configured variant.
pub struct DeepTreeParser<A, L> {
    projections: Projections,
    attention: A,
    label_scorer: L,
    sentinel: Sentinel,
    dropout: Option<ChannelDropout>,
    dropout_seed: u64,
    dropout_calls: AtomicU64,
    training: bool,
}

impl DeepTreeParser<Box<dyn PairwiseScorer>, BilinearLabelScorer> {
    /// Build a parser with fresh parameters from a validated config.
    pub fn from_config(config: &ParserConfig) -> Result<Self> {
        config.validate()?;
        let projections = Projections::new(
            config.query_vector_dim,
            config.key_vector_dim,
            config.edge_head_vector_dim,
            config.edge_type_vector_dim,
            config.seed.wrapping_add(10),
        );
        let sentinel = Sentinel::new(config.key_vector_dim, config.seed.wrapping_add(20));
        let parser = Self::new(
            projections,
            config.build_attention(),
            config.build_label_scorer(),
            sentinel,
        )?;
        tracing::debug!(
            attention = parser.attention.name(),
            num_labels = config.num_labels,
            dropout = config.dropout,
            "built parser from config"
        );
        let dropout = ChannelDropout::new(config.dropout)?;
        Ok(parser.with_dropout(dropout, config.seed.wrapping_add(30)))
    }
}

impl<A> DeepTreeParser<A, BilinearLabelScorer> {
    /// Swap in a fresh label scorer for a new label inventory.
    pub fn reset_labels(&mut self, num_labels: usize, seed: u64) -> Result<()> {
        if num_labels == 0 {
            return Err(ParserError::InvalidConfig {
                reason: "num_labels must be greater than 0".to_string(),
            });
        }
        self.label_scorer.reset_labels(num_labels, seed);
        tracing::debug!(num_labels, "label scorer reset");
        Ok(())
    }
}

impl<A: PairwiseScorer, L: LabelScorer> DeepTreeParser<A, L> {
    /// Assemble a parser from its parts. Starts in evaluation mode.
    pub fn new(
        projections: Projections,
        attention: A,
        label_scorer: L,
        sentinel: Sentinel,
    ) -> Result<Self> {
        let p = &projections;
        if p.edge_head_query.input_dim() != p.edge_type_query.input_dim() {
            return Err(ParserError::shape_mismatch(
                "edge type query projection",
                &[p.edge_head_query.input_dim()],
                &[p.edge_type_query.input_dim()],
            ));
        }
        for (name, ff) in [
            ("edge head key projection", &p.edge_head_key),
            ("edge type key projection", &p.edge_type_key),
        ] {
            if ff.input_dim() != sentinel.dim() {
                return Err(ParserError::shape_mismatch(
                    name,
                    &[sentinel.dim()],
                    &[ff.input_dim()],
                ));
            }
        }
        if label_scorer.num_labels() == 0 {
            return Err(ParserError::InvalidConfig {
                reason: "label scorer has no labels".to_string(),
            });
        }

        Ok(Self {
            projections,
            attention,
            label_scorer,
            sentinel,
            dropout: None,
            dropout_seed: 0,
            dropout_calls: AtomicU64::new(0),
            training: false,
        })
    }

    /// Enable channel dropout on the projected vectors during training.
    pub fn with_dropout(mut self, dropout: ChannelDropout, seed: u64) -> Self {
        self.dropout = (dropout.p > 0.0).then_some(dropout);
        self.dropout_seed = seed;
        self
    }

    pub fn train(&mut self) {
        self.training = true;
    }

    pub fn eval(&mut self) {
        self.training = false;
    }

    pub fn is_training(&self) -> bool {
        self.training
    }

    pub fn num_labels(&self) -> usize {
        self.label_scorer.num_labels()
    }

    /// Score and greedily decode a batch. With `gold_heads`, the head and
    /// label log-likelihoods of the gold structure are added.
    pub fn forward(
        &self,
        batch: &ContextualBatch,
        gold_heads: Option<&[Vec<usize>]>,
    ) -> Result<ParserOutput> {
        let encoded = self.encode(batch)?;
        let (predictions, edge_type_scores) = decode_with_label_scores(
            &self.label_scorer,
            &encoded.label_query,
            &encoded.label_key,
            &encoded.edge_scores,
            encoded.mask.as_ref(),
        )?;

        let (edge_head_ll, edge_type_ll) = match gold_heads {
            Some(gold) => {
                let (head_ll, type_ll) = self.gold_log_likelihoods(&encoded, gold)?;
                (Some(head_ll), Some(type_ll))
            }
            None => (None, None),
        };

        Ok(ParserOutput {
            predictions,
            edge_head_scores: encoded.edge_scores,
            edge_type_scores,
            edge_head_ll,
            edge_type_ll,
            edge_mask: encoded.mask,
        })
    }

    /// Greedy heads and labels for a batch.
    pub fn decode(&self, batch: &ContextualBatch) -> Result<DecodedStructure> {
        let span = tracing::debug_span!(
            "decode",
            batch = batch.batch_size(),
            queries = batch.num_queries()
        );
        let _enter = span.enter();

        let encoded = self.encode(batch)?;
        greedy_decode(
            &self.label_scorer,
            &encoded.label_query,
            &encoded.label_key,
            &encoded.edge_scores,
            encoded.mask.as_ref(),
        )
    }

    /// Per-token NLL of the gold structure, plus greedy predictions.
    pub fn loss(
        &self,
        batch: &ContextualBatch,
        gold_heads: &[Vec<usize>],
        gold_labels: &[Vec<usize>],
    ) -> Result<LossOutput> {
        let span = tracing::debug_span!(
            "loss",
            batch = batch.batch_size(),
            queries = batch.num_queries(),
            training = self.training
        );
        let _enter = span.enter();

        let encoded = self.encode(batch)?;
        let mask = encoded.mask.as_ref();

        let (edge_head_ll, edge_label_ll) = self.gold_log_likelihoods(&encoded, gold_heads)?;
        let nll = gold_nll(
            &edge_head_ll,
            &edge_label_ll,
            gold_heads,
            gold_labels,
            batch.query_mask.as_ref(),
            mask,
        )?;

        let predictions = greedy_decode(
            &self.label_scorer,
            &encoded.label_query,
            &encoded.label_key,
            &encoded.edge_scores,
            mask,
        )?;

        let output = LossOutput::new(nll, predictions)?;
        tracing::debug!(
            loss = output.loss,
            edge_head_nll = output.edge_head_nll,
            edge_label_nll = output.edge_label_nll,
            num_instances = output.num_instances,
            "computed parser loss"
        );
        Ok(output)
    }

    /// [`DeepTreeParser::loss`], then feed the predictions into `metrics`.
    pub fn loss_with_metrics(
        &self,
        batch: &ContextualBatch,
        gold_heads: &[Vec<usize>],
        gold_labels: &[Vec<usize>],
        metrics: &mut AttachmentMetrics,
    ) -> Result<LossOutput> {
        let output = self.loss(batch, gold_heads, gold_labels)?;
        metrics.update(
            &output.predictions.heads,
            &output.predictions.labels,
            gold_heads,
            gold_labels,
            batch.query_mask.as_ref(),
            output.edge_head_nll,
            output.edge_label_nll,
        )?;
        Ok(output)
    }

    /// Masked head log-softmax, and label log-softmax at the gold heads.
    fn gold_log_likelihoods(
        &self,
        encoded: &Encoded,
        gold_heads: &[Vec<usize>],
    ) -> Result<(Tensor, Tensor)> {
        let edge_head_ll = masked_log_softmax(&encoded.edge_scores, encoded.mask.as_ref())?;
        let gold_label_scores = self.label_scorer.score_at_heads(
            &encoded.label_query,
            &encoded.label_key,
            gold_heads,
        )?;
        Ok((edge_head_ll, log_softmax(&gold_label_scores)))
    }

    fn encode(&self, batch: &ContextualBatch) -> Result<Encoded> {
        let (key, mask) = self
            .sentinel
            .add_root(&batch.query, batch.key.as_ref(), batch.edge_mask.as_ref())?;
        if let Some(mask) = &mask {
            ensure_attachable(mask)?;
        }

        let p = &self.projections;
        let mut head_query = p.edge_head_query.forward(&batch.query)?;
        let mut head_key = p.edge_head_key.forward(&key)?;
        let mut label_query = p.edge_type_query.forward(&batch.query)?;
        let mut label_key = p.edge_type_key.forward(&key)?;

        if let (true, Some(dropout)) = (self.training, &self.dropout) {
            let call = self.dropout_calls.fetch_add(1, Ordering::Relaxed);
            let seed = self.dropout_seed.wrapping_add(call.wrapping_mul(2));
            (head_query, head_key) = dropout.apply_pair(&head_query, &head_key, seed)?;
            (label_query, label_key) =
                dropout.apply_pair(&label_query, &label_key, seed.wrapping_add(1))?;
            tracing::trace!(seed, p = dropout.p, "applied channel dropout");
        }

        let edge_scores = self.attention.score(&head_query, &head_key)?;
        if let Some(position) = edge_scores.first_non_finite() {
            tracing::error!(
                attention = self.attention.name(),
                position,
                "non-finite edge score"
            );
            return Err(ParserError::NumericDegeneracy {
                context: format!("edge score at flat position {} is not finite", position),
            });
        }
        tracing::trace!(
            attention = self.attention.name(),
            shape = ?edge_scores.shape,
            "edge scores"
        );

        Ok(Encoded {
            edge_scores,
            label_query,
            label_key,
            mask,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attention::DotProductAttention;
    use crate::config::AttentionKind;

    fn small_parser() -> DeepTreeParser<Box<dyn PairwiseScorer>, BilinearLabelScorer> {
        let mut config = ParserConfig::new(6, 6, 3);
        config.edge_head_vector_dim = 5;
        config.edge_type_vector_dim = 4;
        DeepTreeParser::from_config(&config).unwrap()
    }

    fn tokens() -> ContextualBatch {
        let x = Tensor::randn_seeded(vec![2, 4, 6], 1.0, 42);
        let lengths = Mask::from_lengths(&[4, 2], 4).unwrap();
        let edge_mask = Mask::pairwise(&lengths, &lengths).unwrap();
        ContextualBatch::self_attached(x, Some(edge_mask), Some(lengths)).unwrap()
    }

    #[test]
    fn test_output_shapes() {
        let parser = small_parser();
        let out = parser.forward(&tokens(), None).unwrap();
        assert_eq!(out.edge_head_scores.shape, vec![2, 4, 5]);
        assert_eq!(out.edge_type_scores.shape, vec![2, 4, 3]);
        assert!(out.edge_head_ll.is_none());
        assert!(out.edge_type_ll.is_none());
        assert_eq!(out.edge_mask.unwrap().shape, vec![2, 4, 5]);
    }

    #[test]
    fn test_forward_with_gold_fills_log_likelihoods() {
        let parser = small_parser();
        let gold = vec![vec![0, 1, 2, 3], vec![2, 0, 0, 0]];
        let out = parser.forward(&tokens(), Some(&gold)).unwrap();
        assert_eq!(out.edge_type_ll.as_ref().unwrap().shape, vec![2, 4, 3]);

        let head_ll = out.edge_head_ll.unwrap();
        for q in 0..4 {
            let total: f32 = head_ll.row(0, q).iter().map(|v| v.exp()).sum();
            assert!((total - 1.0).abs() < 1e-4);
        }
        assert!(out.edge_type_ll.unwrap().all_finite());
    }

    #[test]
    fn test_forward_predictions_match_decode() {
        let parser = small_parser();
        let batch = tokens();
        let decoded = parser.decode(&batch).unwrap();
        let plain = parser.forward(&batch, None).unwrap();
        assert_eq!(plain.predictions, decoded);
    }

    #[test]
    fn test_gold_heads_do_not_replace_predictions() {
        // two tokens that both prefer the second token over the root
        let parser = DeepTreeParser::new(
            Projections::identity(2),
            DotProductAttention,
            BilinearLabelScorer::new(2, 2, 2, 3),
            Sentinel::from_vector(vec![0.0, 0.0]),
        )
        .unwrap();
        let x = Tensor::from_batch(&[vec![vec![1.0, 0.0], vec![5.0, 0.0]]]).unwrap();
        let batch = ContextualBatch::self_attached(x, None, None).unwrap();
        let gold = vec![vec![0, 0]];

        let plain = parser.forward(&batch, None).unwrap();
        let scored = parser.forward(&batch, Some(&gold)).unwrap();
        assert_eq!(plain.predictions.heads, vec![vec![2, 2]]);
        assert_eq!(scored.predictions, plain.predictions);
        assert_eq!(scored.edge_type_scores, plain.edge_type_scores);

        // the root key is zero and the bias starts at zero, so at the gold
        // heads every label is equally likely
        let type_ll = scored.edge_type_ll.unwrap();
        for q in 0..2 {
            for &ll in type_ll.row(0, q) {
                assert!((ll - 0.5f32.ln()).abs() < 1e-6);
            }
        }
        assert!(plain.edge_type_ll.is_none());
    }

    #[test]
    fn test_non_finite_edge_scores_are_rejected() {
        let parser = DeepTreeParser::new(
            Projections::identity(2),
            DotProductAttention,
            BilinearLabelScorer::new(2, 2, 2, 3),
            Sentinel::from_vector(vec![0.0, 0.0]),
        )
        .unwrap();
        let x = Tensor::from_batch(&[vec![vec![f32::INFINITY, 0.0]]]).unwrap();
        let batch = ContextualBatch::self_attached(x, None, None).unwrap();

        let err = parser.decode(&batch).unwrap_err();
        assert_eq!(err.kind(), "numeric");
        let err = parser.loss(&batch, &[vec![0]], &[vec![0]]).unwrap_err();
        assert_eq!(err.kind(), "numeric");
        let err = parser.forward(&batch, None).unwrap_err();
        assert_eq!(err.kind(), "numeric");
    }

    #[test]
    fn test_dropout_only_in_training() {
        let mut config = ParserConfig::new(6, 6, 3);
        config.edge_head_vector_dim = 8;
        config.edge_type_vector_dim = 8;
        config.dropout = 0.5;
        let mut parser = DeepTreeParser::from_config(&config).unwrap();
        let batch = tokens();

        let a = parser.forward(&batch, None).unwrap();
        let b = parser.forward(&batch, None).unwrap();
        assert_eq!(a.edge_head_scores, b.edge_head_scores);

        parser.train();
        assert!(parser.is_training());
        let c = parser.forward(&batch, None).unwrap();
        assert_ne!(a.edge_head_scores, c.edge_head_scores);

        parser.eval();
        let d = parser.forward(&batch, None).unwrap();
        assert_eq!(a.edge_head_scores, d.edge_head_scores);
    }

    #[test]
    fn test_same_seed_same_parser() {
        let batch = tokens();
        let a = small_parser().forward(&batch, None).unwrap();
        let b = small_parser().forward(&batch, None).unwrap();
        assert_eq!(a.edge_head_scores, b.edge_head_scores);
        assert_eq!(a.edge_type_scores, b.edge_type_scores);
    }

    #[test]
    fn test_reset_labels() {
        let mut parser = small_parser();
        parser.reset_labels(11, 5).unwrap();
        assert_eq!(parser.num_labels(), 11);
        assert!(parser.reset_labels(0, 5).is_err());
        let out = parser.forward(&tokens(), None).unwrap();
        assert_eq!(out.edge_type_scores.shape, vec![2, 4, 11]);
    }

    #[test]
    fn test_mismatched_projection_is_rejected() {
        let mut projections = Projections::identity(4);
        projections.edge_type_key = FeedForward::identity(3);
        let labels = BilinearLabelScorer::new(4, 3, 2, 1);
        let sentinel = Sentinel::from_vector(vec![0.0; 4]);
        let err = DeepTreeParser::new(projections, DotProductAttention, labels, sentinel);
        assert!(err.is_err());
    }

    #[test]
    fn test_all_attention_kinds_run() {
        let kinds = [AttentionKind::DotProduct, AttentionKind::Bilinear, AttentionKind::Biaffine];
        for kind in kinds {
            let mut config = ParserConfig::new(6, 6, 3);
            config.edge_head_vector_dim = 5;
            config.edge_type_vector_dim = 4;
            config.attention = kind;
            let parser = DeepTreeParser::from_config(&config).unwrap();
            let batch = tokens();
            let gold = vec![vec![0, 1, 2, 3], vec![2, 0, 0, 0]];
            let labels = vec![vec![0, 1, 2, 0], vec![1, 0, 0, 0]];
            let out = parser.loss(&batch, &gold, &labels).unwrap();
            assert!(out.loss.is_finite());
            assert_eq!(out.num_instances, 6);
        }
    }
}
