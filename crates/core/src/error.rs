//! # Error Types
//!
//! Every failure the parsing core can report. Each variant names the check
//! that failed so a training or inference loop can abort the current batch
//! with a clear message and decide its own recovery policy.
//!
//! | Variant | Raised when |
//! |---------|-------------|
//! | `ShapeMismatch` | query/key/mask sizes disagree |
//! | `InvalidIndex` | a gold or decoded index is outside its axis |
//! | `DegenerateMask` | a query row has no valid key after root augmentation |
//! | `NumericDegeneracy` | a log-likelihood or loss is NaN or infinite |
//! | `InvalidConfig` | a parser configuration cannot build a model |

use thiserror::Error;

use crate::shape::Shape;

/// Errors raised by the scoring, decoding and loss operations.
///
/// None of these are recovered internally. They surface synchronously to
/// the caller, which owns retry/skip/abort decisions.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParserError {
    /// Two tensors (or a tensor and a mask) that must agree do not.
    #[error("Shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: &'static str,
        expected: Shape,
        got: Shape,
    },

    /// An index is out of range for the axis it addresses.
    #[error("Invalid index on {axis} axis: {index} (size {size})")]
    InvalidIndex {
        axis: &'static str,
        index: usize,
        size: usize,
    },

    /// A query row has zero valid key positions.
    ///
    /// The root sentinel makes this impossible on the normal path, so seeing
    /// it means an invariant was broken upstream.
    #[error("Degenerate mask: query {query} of batch element {batch} has no valid head")]
    DegenerateMask { batch: usize, query: usize },

    /// A NaN or infinity appeared where a finite value is required.
    #[error("Numeric degeneracy: {context}")]
    NumericDegeneracy { context: String },

    /// Configuration values cannot produce a working parser.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },
}

impl ParserError {
    /// Build a `ShapeMismatch` from raw dimension lists.
    pub fn shape_mismatch(context: &'static str, expected: &[usize], got: &[usize]) -> Self {
        ParserError::ShapeMismatch {
            context,
            expected: Shape::f32(expected.to_vec()),
            got: Shape::f32(got.to_vec()),
        }
    }

    /// Short name of the failed check, suitable for a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            ParserError::ShapeMismatch { .. } => "shape",
            ParserError::InvalidIndex { .. } => "index",
            ParserError::DegenerateMask { .. } => "mask",
            ParserError::NumericDegeneracy { .. } => "numeric",
            ParserError::InvalidConfig { .. } => "config",
        }
    }
}

/// Result alias used across the workspace.
pub type Result<T> = std::result::Result<T, ParserError>;
