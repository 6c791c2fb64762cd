//! # Tensor - Batched Numerics for Biaffine Parsing
//!
//! Runtime-shaped tensors and masks plus the handful of numerically stable
//! primitives the parser needs. Everything here is a pure function of its
//! inputs; shape and index problems come back as
//! [`deeptree_core::ParserError`] values.
//!
//! ## Modules
//!
//! - [`tensor`]: `Tensor`, a dense row-major `f32` array with a runtime shape
//! - [`mask`]: `Mask`, boolean validity flags with query-axis broadcasting
//! - [`ops`]: matmul, pairwise dot, gather, masked fill, (masked) log-softmax, argmax
//! - [`nn`]: linear / feed-forward projections and channel dropout
//!
//! ## Example
//!
//! ```rust
//! use deeptree_tensor::{ops, Mask, Tensor};
//!
//! let scores = Tensor::from_batch(&[vec![vec![0.0, 2.0, 1.0]]]).unwrap();
//! let mask = Mask::new(vec![1, 1, 3], vec![true, false, true]).unwrap();
//!
//! let probs = ops::masked_softmax(&scores, Some(&mask)).unwrap();
//! assert_eq!(probs.at3(0, 0, 1), 0.0);
//!
//! let filled = ops::masked_fill(&scores, &mask, ops::MINUS_INF).unwrap();
//! assert_eq!(ops::argmax_last(&filled).unwrap(), vec![vec![2]]);
//! ```

pub mod mask;
pub mod nn;
pub mod ops;
pub mod tensor;

pub use mask::Mask;
pub use nn::{Activation, ChannelDropout, FeedForward, Linear};
pub use tensor::Tensor;
