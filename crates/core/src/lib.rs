//! # Core - Shared Foundations for the Deep Tree Parser
//!
//! The types every other crate in the workspace speaks:
//!
//! - **Shapes**: runtime tensor shapes tagged with an element type
//! - **Errors**: the failure taxonomy of the scoring/decoding core
//!   (shape, index, mask and numeric checks)
//!
//! A shape disagreement between two components is reported, never silently
//! broadcast, and every error names the check that failed.

pub mod error;
pub mod shape;

pub use error::{ParserError, Result};
pub use shape::{Shape, TypeId};
