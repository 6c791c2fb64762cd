//! # Projection Layers
//!
//! The parser maps contextual vectors into a smaller "edge" space and a
//! "label" space before scoring:
//!
//! ```text
//!   x [B, N, D_in] ──▶ Linear ──▶ ELU ──▶ ChannelDropout ──▶ [B, N, D_out]
//! ```
//!
//! Query and key projections share one dropout mask per batch element, so a
//! dropped feature channel is dropped on both sides of every score.

use deeptree_core::{ParserError, Result};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::ops::{elu, matmul_last};
use crate::tensor::Tensor;

/// A linear layer over the last axis: `y = x @ W + b`.
#[derive(Debug, Clone)]
pub struct Linear {
    /// Weight matrix `[input_dim, output_dim]`
    pub weight: Tensor,
    /// Bias vector `[output_dim]`
    pub bias: Tensor,
}

impl Linear {
    /// Create a layer with Xavier-scaled normal weights and zero bias.
    pub fn new(input_dim: usize, output_dim: usize, seed: u64) -> Self {
        let scale = (2.0 / (input_dim + output_dim).max(1) as f32).sqrt();
        Self {
            weight: Tensor::randn_seeded(vec![input_dim, output_dim], scale, seed),
            bias: Tensor::zeros(vec![output_dim]),
        }
    }

    /// Create a layer from explicit parameters.
    pub fn from_parts(weight: Tensor, bias: Tensor) -> Result<Self> {
        match (weight.shape.as_slice(), bias.shape.as_slice()) {
            (&[_, out], &[b]) if out == b => Ok(Self { weight, bias }),
            (&[_, out], _) => Err(ParserError::shape_mismatch(
                "linear bias",
                &[out],
                &bias.shape,
            )),
            _ => Err(ParserError::shape_mismatch(
                "linear weight",
                &[0, 0],
                &weight.shape,
            )),
        }
    }

    /// The identity map on `dim` features.
    pub fn identity(dim: usize) -> Self {
        let mut weight = Tensor::zeros(vec![dim, dim]);
        for i in 0..dim {
            weight.data[i * dim + i] = 1.0;
        }
        Self {
            weight,
            bias: Tensor::zeros(vec![dim]),
        }
    }

    /// Input feature size.
    pub fn input_dim(&self) -> usize {
        self.weight.shape[0]
    }

    /// Output feature size.
    pub fn output_dim(&self) -> usize {
        self.weight.shape[1]
    }

    /// `[B, N, input_dim] → [B, N, output_dim]`
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let mut y = matmul_last(x, &self.weight)?;
        let width = self.output_dim();
        for row in y.data.chunks_mut(width.max(1)) {
            for (v, b) in row.iter_mut().zip(&self.bias.data) {
                *v += b;
            }
        }
        Ok(y)
    }
}

/// Nonlinearity applied after a projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Activation {
    /// Exponential linear unit
    #[default]
    Elu,
    /// No nonlinearity
    Identity,
}

impl Activation {
    /// Apply element-wise.
    pub fn apply(self, x: Tensor) -> Tensor {
        match self {
            Activation::Elu => elu(&x),
            Activation::Identity => x,
        }
    }
}

/// `activation(linear(x))`
#[derive(Debug, Clone)]
pub struct FeedForward {
    pub linear: Linear,
    pub activation: Activation,
}

impl FeedForward {
    /// An ELU projection from `input_dim` to `output_dim`.
    pub fn new(input_dim: usize, output_dim: usize, seed: u64) -> Self {
        Self {
            linear: Linear::new(input_dim, output_dim, seed),
            activation: Activation::Elu,
        }
    }

    /// A pass-through projection, for tests and hand-built scores.
    pub fn identity(dim: usize) -> Self {
        Self {
            linear: Linear::identity(dim),
            activation: Activation::Identity,
        }
    }

    pub fn input_dim(&self) -> usize {
        self.linear.input_dim()
    }

    pub fn output_dim(&self) -> usize {
        self.linear.output_dim()
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Ok(self.activation.apply(self.linear.forward(x)?))
    }
}

/// Feature-channel dropout.
///
/// For each batch element, each feature channel is either zeroed along the
/// whole sequence (probability `p`) or scaled by `1 / (1 - p)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelDropout {
    pub p: f32,
}

impl ChannelDropout {
    pub fn new(p: f32) -> Result<Self> {
        if !(0.0..1.0).contains(&p) {
            return Err(ParserError::InvalidConfig {
                reason: format!("dropout must be in [0, 1), got {}", p),
            });
        }
        Ok(Self { p })
    }

    /// Apply one shared channel mask to a query/key pair of projections.
    ///
    /// Both tensors must be `[B, *, D]` with the same `B` and `D`.
    pub fn apply_pair(&self, query: &Tensor, key: &Tensor, seed: u64) -> Result<(Tensor, Tensor)> {
        let (batch, _, dim) = query.dims3("dropout query")?;
        let (key_batch, _, key_dim) = key.dims3("dropout key")?;
        if batch != key_batch || dim != key_dim {
            return Err(ParserError::shape_mismatch(
                "dropout key",
                &[batch, key.shape[1], dim],
                &key.shape,
            ));
        }
        if self.p == 0.0 {
            return Ok((query.clone(), key.clone()));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let keep_scale = 1.0 / (1.0 - self.p);
        let channel_scale: Vec<f32> = (0..batch * dim)
            .map(|_| {
                if rng.gen::<f32>() < self.p {
                    0.0
                } else {
                    keep_scale
                }
            })
            .collect();

        Ok((
            scale_channels(query, &channel_scale),
            scale_channels(key, &channel_scale),
        ))
    }
}

fn scale_channels(x: &Tensor, channel_scale: &[f32]) -> Tensor {
    let (len, dim) = (x.shape[1], x.shape[2]);
    let mut out = x.clone();
    for (i, v) in out.data.iter_mut().enumerate() {
        let b = i / (len * dim).max(1);
        let d = i % dim.max(1);
        *v *= channel_scale[b * dim + d];
    }
    out
}
