//! # Parser - Biaffine Head Selection and Edge Labeling
//!
//! Given contextual vectors for a padded batch of sentences, score every
//! head-modifier attachment, pick one head and one label per token, and
//! compute the negative log-likelihood of a gold structure.
//!
//! ## Modules
//!
//! - [`attention`]: `PairwiseScorer` and the dot-product / bilinear / biaffine scorers
//! - [`label`]: `LabelScorer` and the bilinear label scorer
//! - [`sentinel`]: root sentinel prepended to every key sequence
//! - [`batch`]: `ContextualBatch`, the validated input bundle
//! - [`decode`]: masked greedy decoding
//! - [`loss`]: gold NLL and `LossOutput`
//! - [`metrics`]: `AttachmentMetrics` (UAS, LAS, exact match, NLL)
//! - [`structure`]: `DecodedStructure` and its graph view
//! - [`config`]: `ParserConfig`
//! - [`parser`]: `DeepTreeParser`, tying it all together
//!
//! ## Example
//!
//! ```rust
//! use deeptree_parser::{AttentionKind, ContextualBatch, DeepTreeParser, ParserConfig};
//! use deeptree_tensor::{Mask, Tensor};
//!
//! let mut config = ParserConfig::new(8, 8, 4);
//! config.attention = AttentionKind::Biaffine;
//! let parser = DeepTreeParser::from_config(&config).unwrap();
//!
//! let tokens = Tensor::randn_seeded(vec![1, 3, 8], 1.0, 0);
//! let lengths = Mask::from_lengths(&[3], 3).unwrap();
//! let batch = ContextualBatch::self_attached(tokens, None, Some(lengths)).unwrap();
//!
//! let decoded = parser.decode(&batch).unwrap();
//! assert_eq!(decoded.heads[0].len(), 3);
//! assert!(decoded.heads[0].iter().all(|&h| h <= 3));
//! ```

pub mod attention;
pub mod batch;
pub mod config;
pub mod decode;
pub mod label;
pub mod loss;
pub mod metrics;
pub mod parser;
pub mod sentinel;
pub mod structure;

pub use attention::{BiaffineAttention, BilinearAttention, DotProductAttention, PairwiseScorer};
pub use batch::ContextualBatch;
pub use config::{AttentionKind, ParserConfig};
pub use decode::greedy_decode;
pub use label::{BilinearLabelScorer, LabelScorer};
pub use loss::{GoldNll, LossOutput};
pub use metrics::AttachmentMetrics;
pub use parser::{DeepTreeParser, ParserOutput, Projections};
pub use sentinel::Sentinel;
pub use structure::DecodedStructure;

pub use deeptree_core::{ParserError, Result};
