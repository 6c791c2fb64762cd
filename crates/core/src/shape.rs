//! # Shapes
//!
//! Tensors in the parser are runtime-shaped (`Vec<usize>`), so shape
//! agreement is checked when operations are wired together rather than at
//! compile time. A `Shape` pairs the dimensions with the element type, which
//! keeps error messages readable when a bool mask is compared against an f32
//! score tensor.
//!
//! ```text
//!   query  f32[B, Q, Dq]  ─┐
//!                          ├─ scorer ─▶ f32[B, Q, K+1] ◀─ mask bool[B, Q, K+1]
//!   key    f32[B, K, Dk]  ─┘
//! ```

use std::fmt;

/// Element type tag for a shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub &'static str);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Element type plus dimension sizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    /// The element type
    pub ty: TypeId,
    /// Dimension sizes (empty = scalar)
    pub dims: Vec<usize>,
}

impl Shape {
    /// Create a new shape with given type and dimensions.
    pub fn new(ty: TypeId, dims: Vec<usize>) -> Self {
        Self { ty, dims }
    }

    /// An f32 shape.
    pub fn f32(dims: Vec<usize>) -> Self {
        Self::new(TypeId("f32"), dims)
    }

    /// A bool (mask) shape.
    pub fn bool(dims: Vec<usize>) -> Self {
        Self::new(TypeId("bool"), dims)
    }

    /// Number of dimensions (rank).
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// True when `self` can stand in for `target` with `axis` broadcast:
    /// same rank, every dimension equal except `axis`, which may also be 1.
    pub fn broadcasts_along(&self, target: &Shape, axis: usize) -> bool {
        self.ty == target.ty
            && self.rank() == target.rank()
            && self
                .dims
                .iter()
                .zip(target.dims.iter())
                .enumerate()
                .all(|(i, (&a, &b))| a == b || (i == axis && a == 1))
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{}]",
            self.ty,
            self.dims
                .iter()
                .map(|d| d.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}
