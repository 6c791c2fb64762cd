//! Parser configuration.
//!
//! Deserialised from whatever the training harness uses (JSON in the tests)
//! and validated before a parser is built from it.

use deeptree_core::{ParserError, Result};
use serde::{Deserialize, Serialize};

use crate::attention::{BiaffineAttention, BilinearAttention, DotProductAttention, PairwiseScorer};
use crate::label::BilinearLabelScorer;

/// Which edge scorer to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AttentionKind {
    /// `q · k`
    DotProduct,
    /// `qᵀ W k`
    Bilinear,
    /// `qᵀ U k + w_q · q + w_k · k + b`
    #[default]
    Biaffine,
}

/// Sizes and options of a [`crate::DeepTreeParser`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserConfig {
    /// Width of the incoming query vectors.
    pub query_vector_dim: usize,

    /// Width of the incoming key vectors (and of the root sentinel).
    pub key_vector_dim: usize,

    /// Width of the projected vectors used for head scoring.
    #[serde(default = "default_edge_head_vector_dim")]
    pub edge_head_vector_dim: usize,

    /// Width of the projected vectors used for label scoring.
    #[serde(default = "default_edge_type_vector_dim")]
    pub edge_type_vector_dim: usize,

    /// Size of the edge label inventory.
    pub num_labels: usize,

    /// Channel dropout on the projected vectors, training only.
    #[serde(default)]
    pub dropout: f32,

    #[serde(default)]
    pub attention: AttentionKind,

    /// Seed for parameter initialisation and dropout masks.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

fn default_edge_head_vector_dim() -> usize {
    256
}

fn default_edge_type_vector_dim() -> usize {
    128
}

fn default_seed() -> u64 {
    13
}

impl ParserConfig {
    /// Config with default projection sizes for the given input widths.
    pub fn new(query_vector_dim: usize, key_vector_dim: usize, num_labels: usize) -> Self {
        Self {
            query_vector_dim,
            key_vector_dim,
            edge_head_vector_dim: default_edge_head_vector_dim(),
            edge_type_vector_dim: default_edge_type_vector_dim(),
            num_labels,
            dropout: 0.0,
            attention: AttentionKind::default(),
            seed: default_seed(),
        }
    }

    /// Validate the configuration.
    ///
    /// # Errors
    /// - `ParserError::InvalidConfig` if any dimension or `num_labels` is 0
    /// - `ParserError::InvalidConfig` if `dropout` is outside `[0, 1)` or NaN
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("query_vector_dim", self.query_vector_dim),
            ("key_vector_dim", self.key_vector_dim),
            ("edge_head_vector_dim", self.edge_head_vector_dim),
            ("edge_type_vector_dim", self.edge_type_vector_dim),
            ("num_labels", self.num_labels),
        ] {
            if value == 0 {
                return Err(ParserError::InvalidConfig {
                    reason: format!("{} must be greater than 0", name),
                });
            }
        }

        if !(0.0..1.0).contains(&self.dropout) {
            return Err(ParserError::InvalidConfig {
                reason: format!("dropout must be in [0, 1), got {}", self.dropout),
            });
        }

        Ok(())
    }

    /// The configured edge scorer over projected head vectors.
    pub fn build_attention(&self) -> Box<dyn PairwiseScorer> {
        let dim = self.edge_head_vector_dim;
        match self.attention {
            AttentionKind::DotProduct => Box::new(DotProductAttention),
            AttentionKind::Bilinear => Box::new(BilinearAttention::new(dim, dim, self.seed)),
            AttentionKind::Biaffine => Box::new(BiaffineAttention::new(dim, dim, self.seed)),
        }
    }

    /// The label scorer over projected label vectors.
    pub fn build_label_scorer(&self) -> BilinearLabelScorer {
        let dim = self.edge_type_vector_dim;
        BilinearLabelScorer::new(dim, dim, self.num_labels, self.seed.wrapping_add(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: ParserConfig = serde_json::from_str(
            r#"{"query_vector_dim": 512, "key_vector_dim": 512, "num_labels": 40}"#,
        )
        .unwrap();
        assert_eq!(config, ParserConfig::new(512, 512, 40));
        assert_eq!(config.edge_head_vector_dim, 256);
        assert_eq!(config.edge_type_vector_dim, 128);
        assert_eq!(config.attention, AttentionKind::Biaffine);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_num_labels_is_required() {
        let parsed: std::result::Result<ParserConfig, _> =
            serde_json::from_str(r#"{"query_vector_dim": 8, "key_vector_dim": 8}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_attention_kind_names() {
        let config: ParserConfig = serde_json::from_str(
            r#"{
                "query_vector_dim": 4,
                "key_vector_dim": 4,
                "num_labels": 2,
                "attention": "dot_product"
            }"#,
        )
        .unwrap();
        assert_eq!(config.attention, AttentionKind::DotProduct);
        assert_eq!(config.build_attention().name(), "dot_product");
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let mut config = ParserConfig::new(4, 4, 0);
        assert!(config.validate().is_err());
        config.num_labels = 3;
        config.edge_type_vector_dim = 0;
        let err = config.validate().unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn test_validate_rejects_bad_dropout() {
        let mut config = ParserConfig::new(4, 4, 2);
        config.dropout = 1.0;
        assert!(config.validate().is_err());
        config.dropout = f32::NAN;
        assert!(config.validate().is_err());
        config.dropout = 0.33;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builders_use_projected_sizes() {
        let mut config = ParserConfig::new(16, 16, 7);
        config.edge_head_vector_dim = 6;
        config.edge_type_vector_dim = 5;
        config.attention = AttentionKind::Bilinear;
        assert_eq!(config.build_attention().name(), "bilinear");
        let labels = config.build_label_scorer();
        assert_eq!(labels.weight.shape, vec![7, 5, 5]);
    }
}
