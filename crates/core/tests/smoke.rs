//! Smoke tests for the core crate.
//!
//! These tests verify that the shared vocabulary works across crate
//! boundaries:
//! - Shapes render readably and broadcast along the query axis only
//! - Errors carry enough context to log and classify

use deeptree_core::{ParserError, Result, Shape};

// ============================================================================
// Shape Tests
// ============================================================================

#[test]
fn smoke_edge_mask_shapes() {
    let scores = Shape::bool(vec![4, 7, 8]);
    let shared = Shape::bool(vec![4, 1, 8]);
    let per_query = Shape::bool(vec![4, 7, 8]);
    let missing_root = Shape::bool(vec![4, 7, 7]);

    assert!(shared.broadcasts_along(&scores, 1));
    assert!(per_query.broadcasts_along(&scores, 1));
    assert!(!missing_root.broadcasts_along(&scores, 1));
}

// ============================================================================
// Error Tests
// ============================================================================

#[test]
fn smoke_error_messages() {
    let err = ParserError::shape_mismatch("edge mask", &[2, 3, 4], &[2, 3, 3]);
    assert_eq!(
        err.to_string(),
        "Shape mismatch in edge mask: expected f32[2, 3, 4], got f32[2, 3, 3]"
    );

    let err = ParserError::InvalidIndex {
        axis: "head",
        index: 9,
        size: 4,
    };
    assert!(err.to_string().contains("head"));
    assert!(err.to_string().contains("9"));
}

#[test]
fn smoke_error_kinds() {
    let errors = [
        ParserError::shape_mismatch("x", &[1], &[2]),
        ParserError::InvalidIndex {
            axis: "label",
            index: 3,
            size: 3,
        },
        ParserError::DegenerateMask { batch: 0, query: 2 },
        ParserError::NumericDegeneracy {
            context: "loss is NaN".to_string(),
        },
        ParserError::InvalidConfig {
            reason: "num_labels must be greater than 0".to_string(),
        },
    ];
    let kinds: Vec<&str> = errors.iter().map(|e| e.kind()).collect();
    assert_eq!(kinds, vec!["shape", "index", "mask", "numeric", "config"]);
}

#[test]
fn smoke_errors_propagate_with_question_mark() {
    fn check(size: usize, index: usize) -> Result<usize> {
        if index >= size {
            return Err(ParserError::InvalidIndex {
                axis: "head",
                index,
                size,
            });
        }
        Ok(index)
    }

    fn lookup() -> Result<usize> {
        let i = check(3, 1)?;
        check(i, 5)
    }

    assert_eq!(lookup().unwrap_err().kind(), "index");
}

#[test]
fn smoke_errors_are_std_errors() {
    let err: Box<dyn std::error::Error> =
        Box::new(ParserError::DegenerateMask { batch: 1, query: 0 });
    assert!(err.to_string().contains("no valid head"));
}
