//! # Numeric Primitives
//!
//! Pure functions over [`Tensor`] and [`Mask`] used by scoring, decoding
//! and the loss. None of them mutate their inputs: masking returns a new
//! tensor, so the same raw scores can feed both the loss and a decode.
//!
//! | Primitive | Shapes |
//! |-----------|--------|
//! | `matmul_last` | `[B,N,D] @ [D,E] → [B,N,E]` |
//! | `pairwise_dot` | `[B,Q,D] · [B,K,D] → [B,Q,K]` |
//! | `concat_seq` | `[B,N1,D] ++ [B,N2,D] → [B,N1+N2,D]` |
//! | `gather_rows` | `[B,K,D]`, `idx[B][Q] → [B,Q,D]` |
//! | `gather_last` | `[B,Q,N]`, `idx[B][Q] → [B][Q]` |
//! | `masked_log_softmax` | `[B,Q,K]`, mask → `[B,Q,K]` |
//! | `argmax_last` | `[B,Q,N] → [B][Q]` |

use deeptree_core::{ParserError, Result};

use crate::mask::Mask;
use crate::tensor::Tensor;

/// Fill value for invalid positions before an argmax.
///
/// Large enough to lose every comparison against a real score, finite so
/// later arithmetic never sees NaN.
pub const MINUS_INF: f32 = -1e8;

/// Log-probability reported for masked positions by [`masked_log_softmax`].
///
/// `exp(MASKED_LOG_PROB)` underflows to exactly 0.
pub const MASKED_LOG_PROB: f32 = -1e8;

/// Exponential linear unit with α = 1.
pub fn elu(x: &Tensor) -> Tensor {
    x.map(|v| if v > 0.0 { v } else { v.exp_m1() })
}

/// Multiply the last axis by a matrix: `[B, N, D] @ [D, E] → [B, N, E]`.
pub fn matmul_last(x: &Tensor, w: &Tensor) -> Result<Tensor> {
    let (batch, len, dim) = x.dims3("matmul input")?;
    let (rows, cols) = match w.shape.as_slice() {
        &[r, c] => (r, c),
        other => return Err(ParserError::shape_mismatch("matmul weight", &[dim, 0], other)),
    };
    if rows != dim {
        return Err(ParserError::shape_mismatch(
            "matmul weight",
            &[dim, cols],
            &w.shape,
        ));
    }

    let mut out = Tensor::zeros(vec![batch, len, cols]);
    for b in 0..batch {
        for i in 0..len {
            let src = x.row(b, i);
            let dst = out.row_mut(b, i);
            for (k, &xv) in src.iter().enumerate() {
                let w_row = &w.data[k * cols..(k + 1) * cols];
                for (d, &wv) in dst.iter_mut().zip(w_row) {
                    *d += xv * wv;
                }
            }
        }
    }
    Ok(out)
}

/// Dot product between every query and every key of the same sentence.
///
/// `[B, Q, D] · [B, K, D] → [B, Q, K]`
pub fn pairwise_dot(query: &Tensor, key: &Tensor) -> Result<Tensor> {
    let (batch, queries, dim) = query.dims3("query")?;
    let (key_batch, keys, key_dim) = key.dims3("key")?;
    if batch != key_batch || dim != key_dim {
        return Err(ParserError::shape_mismatch(
            "pairwise key",
            &[batch, keys, dim],
            &key.shape,
        ));
    }

    let mut out = Tensor::zeros(vec![batch, queries, keys]);
    for b in 0..batch {
        for q in 0..queries {
            let qv = query.row(b, q);
            let dst = out.row_mut(b, q);
            for (k, slot) in dst.iter_mut().enumerate() {
                *slot = dot(qv, key.row(b, k));
            }
        }
    }
    Ok(out)
}

/// Concatenate two batches along the sequence axis.
pub fn concat_seq(first: &Tensor, second: &Tensor) -> Result<Tensor> {
    let (batch, n1, dim) = first.dims3("concat first")?;
    let (batch2, n2, dim2) = second.dims3("concat second")?;
    if batch != batch2 || dim != dim2 {
        return Err(ParserError::shape_mismatch(
            "concat second",
            &[batch, n2, dim],
            &second.shape,
        ));
    }

    let mut data = Vec::with_capacity(batch * (n1 + n2) * dim);
    for b in 0..batch {
        data.extend_from_slice(&first.data[b * n1 * dim..(b + 1) * n1 * dim]);
        data.extend_from_slice(&second.data[b * n2 * dim..(b + 1) * n2 * dim]);
    }
    Tensor::from_data(vec![batch, n1 + n2, dim], data)
}

/// Select one row of `source` per (batch, query) position.
///
/// `out[b, q] = source[b, index[b][q]]`. Out-of-range indices are an
/// upstream bug and fail with `InvalidIndex`; they are never clamped.
pub fn gather_rows(source: &Tensor, index: &[Vec<usize>]) -> Result<Tensor> {
    let (batch, rows, dim) = source.dims3("gather source")?;
    let queries = check_index_matrix(index, batch, rows, "head")?;

    let mut data = Vec::with_capacity(batch * queries * dim);
    for (b, row_index) in index.iter().enumerate() {
        for &i in row_index {
            data.extend_from_slice(source.row(b, i));
        }
    }
    Tensor::from_data(vec![batch, queries, dim], data)
}

/// Select one element of the last axis per (batch, query) position.
///
/// `out[b][q] = source[b, q, index[b][q]]`.
pub fn gather_last(
    source: &Tensor,
    index: &[Vec<usize>],
    axis: &'static str,
) -> Result<Vec<Vec<f32>>> {
    let (batch, queries, width) = source.dims3("gather source")?;
    let index_queries = check_index_matrix(index, batch, width, axis)?;
    if index_queries != queries {
        return Err(ParserError::shape_mismatch(
            "gather index",
            &[batch, queries],
            &[batch, index_queries],
        ));
    }

    Ok(index
        .iter()
        .enumerate()
        .map(|(b, row)| {
            row.iter()
                .enumerate()
                .map(|(q, &i)| source.at3(b, q, i))
                .collect()
        })
        .collect())
}

/// Copy of `scores` with every invalid position replaced by `value`.
pub fn masked_fill(scores: &Tensor, mask: &Mask, value: f32) -> Result<Tensor> {
    let (batch, queries, keys) = scores.dims3("masked_fill scores")?;
    mask.check_broadcast("masked_fill mask", &scores.shape)?;

    let mut out = scores.clone();
    for b in 0..batch {
        for q in 0..queries {
            let row = out.row_mut(b, q);
            for (k, slot) in row.iter_mut().enumerate().take(keys) {
                if !mask.at3(b, q, k) {
                    *slot = value;
                }
            }
        }
    }
    Ok(out)
}

/// Log-softmax over the last axis.
pub fn log_softmax(scores: &Tensor) -> Tensor {
    let width = scores.shape.last().copied().unwrap_or(1).max(1);
    let mut out = scores.clone();
    for row in out.data.chunks_mut(width) {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let lse = max + row.iter().map(|&x| (x - max).exp()).sum::<f32>().ln();
        for x in row.iter_mut() {
            *x -= lse;
        }
    }
    out
}

/// Log-softmax over the valid subset of the last axis.
///
/// Valid entries form a proper distribution (their exponentials sum to 1).
/// Masked entries are set to [`MASKED_LOG_PROB`], i.e. zero probability,
/// and never influence the normaliser. A fully masked row is all
/// `MASKED_LOG_PROB` rather than NaN; callers that require at least one
/// valid entry check that separately.
pub fn masked_log_softmax(scores: &Tensor, mask: Option<&Mask>) -> Result<Tensor> {
    let mask = match mask {
        Some(mask) => mask,
        None => return Ok(log_softmax(scores)),
    };
    let (batch, queries, keys) = scores.dims3("masked_log_softmax scores")?;
    mask.check_broadcast("masked_log_softmax mask", &scores.shape)?;

    let mut out = scores.clone();
    for b in 0..batch {
        for q in 0..queries {
            let valid: Vec<bool> = (0..keys).map(|k| mask.at3(b, q, k)).collect();
            let row = out.row_mut(b, q);
            if !valid.contains(&true) {
                tracing::trace!(batch = b, query = q, "fully masked score row");
                row.iter_mut().for_each(|x| *x = MASKED_LOG_PROB);
                continue;
            }

            let mut max = f32::NEG_INFINITY;
            for k in 0..keys {
                if valid[k] {
                    max = max.max(row[k]);
                }
            }
            let mut sum = 0.0f32;
            for k in 0..keys {
                if valid[k] {
                    sum += (row[k] - max).exp();
                }
            }
            let lse = max + sum.ln();
            for (x, &v) in row.iter_mut().zip(&valid) {
                *x = if v { *x - lse } else { MASKED_LOG_PROB };
            }
        }
    }
    Ok(out)
}

/// Probabilities over the valid subset of the last axis.
pub fn masked_softmax(scores: &Tensor, mask: Option<&Mask>) -> Result<Tensor> {
    Ok(masked_log_softmax(scores, mask)?.map(f32::exp))
}

/// Index of the largest element of each innermost row.
///
/// Exact ties resolve to the lowest index, so decoding is reproducible.
pub fn argmax_last(scores: &Tensor) -> Result<Vec<Vec<usize>>> {
    let (batch, queries, _) = scores.dims3("argmax scores")?;
    Ok((0..batch)
        .map(|b| (0..queries).map(|q| argmax(scores.row(b, q))).collect())
        .collect())
}

fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, &x) in row.iter().enumerate().skip(1) {
        if x > row[best] {
            best = i;
        }
    }
    best
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Validate an index matrix against `[batch, *]` and an axis of size
/// `size`; returns the common row length.
fn check_index_matrix(
    index: &[Vec<usize>],
    batch: usize,
    size: usize,
    axis: &'static str,
) -> Result<usize> {
    if index.len() != batch {
        return Err(ParserError::shape_mismatch(
            "index batch",
            &[batch],
            &[index.len()],
        ));
    }
    let queries = index.first().map_or(0, |r| r.len());
    for row in index {
        if row.len() != queries {
            return Err(ParserError::shape_mismatch(
                "index rows",
                &[batch, queries],
                &[batch, row.len()],
            ));
        }
        if let Some(&bad) = row.iter().find(|&&i| i >= size) {
            return Err(ParserError::InvalidIndex {
                axis,
                index: bad,
                size,
            });
        }
    }
    Ok(queries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores_2x3() -> Tensor {
        Tensor::from_batch(&[vec![vec![1.0, 2.0, 3.0], vec![0.5, 0.5, -1.0]]]).unwrap()
    }

    #[test]
    fn test_elu() {
        let x = Tensor::vector(vec![-1.0, 0.0, 2.0]);
        let y = elu(&x);
        assert!((y.data[0] - ((-1.0f32).exp() - 1.0)).abs() < 1e-6);
        assert_eq!(y.data[1], 0.0);
        assert_eq!(y.data[2], 2.0);
    }

    #[test]
    fn test_matmul_last() {
        // [1 2] × [1 0 1]   [3 4 1]
        //         [1 2 0] =
        let x = Tensor::from_batch(&[vec![vec![1.0, 2.0]]]).unwrap();
        let w = Tensor::from_data(vec![2, 3], vec![1.0, 0.0, 1.0, 1.0, 2.0, 0.0]).unwrap();
        let y = matmul_last(&x, &w).unwrap();
        assert_eq!(y.shape, vec![1, 1, 3]);
        assert_eq!(y.data, vec![3.0, 4.0, 1.0]);

        let bad = Tensor::zeros(vec![3, 3]);
        assert!(matmul_last(&x, &bad).is_err());
    }

    #[test]
    fn test_pairwise_dot() {
        let q = Tensor::from_batch(&[vec![vec![1.0, 0.0], vec![0.0, 1.0]]]).unwrap();
        let k = Tensor::from_batch(&[vec![vec![2.0, 3.0], vec![4.0, 5.0], vec![6.0, 7.0]]])
            .unwrap();
        let s = pairwise_dot(&q, &k).unwrap();
        assert_eq!(s.shape, vec![1, 2, 3]);
        assert_eq!(s.data, vec![2.0, 4.0, 6.0, 3.0, 5.0, 7.0]);
    }

    #[test]
    fn test_concat_seq() {
        let a = Tensor::from_batch(&[vec![vec![1.0]], vec![vec![2.0]]]).unwrap();
        let b = Tensor::from_batch(&[vec![vec![3.0], vec![4.0]], vec![vec![5.0], vec![6.0]]])
            .unwrap();
        let c = concat_seq(&a, &b).unwrap();
        assert_eq!(c.shape, vec![2, 3, 1]);
        assert_eq!(c.data, vec![1.0, 3.0, 4.0, 2.0, 5.0, 6.0]);
    }

    #[test]
    fn test_gather_rows_matches_source() {
        let key = Tensor::from_batch(&[
            vec![vec![0.0, 1.0], vec![2.0, 3.0], vec![4.0, 5.0]],
            vec![vec![6.0, 7.0], vec![8.0, 9.0], vec![10.0, 11.0]],
        ])
        .unwrap();
        let heads = vec![vec![2, 0], vec![1, 1]];
        let selected = gather_rows(&key, &heads).unwrap();
        for (b, row) in heads.iter().enumerate() {
            for (q, &h) in row.iter().enumerate() {
                assert_eq!(selected.row(b, q), key.row(b, h));
            }
        }
    }

    #[test]
    fn test_gather_rows_rejects_out_of_range() {
        let key = Tensor::zeros(vec![1, 3, 2]);
        let err = gather_rows(&key, &[vec![0, 3]]).unwrap_err();
        assert_eq!(
            err,
            ParserError::InvalidIndex {
                axis: "head",
                index: 3,
                size: 3
            }
        );
        assert!(gather_rows(&key, &[vec![0], vec![1]]).is_err());
    }

    #[test]
    fn test_gather_last() {
        let s = scores_2x3();
        let picked = gather_last(&s, &[vec![2, 0]], "label").unwrap();
        assert_eq!(picked, vec![vec![3.0, 0.5]]);
        assert!(gather_last(&s, &[vec![3, 0]], "label").is_err());
    }

    #[test]
    fn test_masked_fill_is_pure() {
        let s = scores_2x3();
        let mask = Mask::new(vec![1, 1, 3], vec![true, false, true]).unwrap();
        let filled = masked_fill(&s, &mask, MINUS_INF).unwrap();
        assert_eq!(filled.at3(0, 0, 1), MINUS_INF);
        assert_eq!(filled.at3(0, 1, 1), MINUS_INF);
        assert_eq!(filled.at3(0, 1, 0), 0.5);
        // Input untouched
        assert_eq!(s.at3(0, 0, 1), 2.0);
    }

    #[test]
    fn test_log_softmax_normalises() {
        let s = scores_2x3();
        let ll = log_softmax(&s);
        for row in ll.rows() {
            let total: f32 = row.iter().map(|x| x.exp()).sum();
            assert!((total - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_masked_softmax_rows_sum_to_one() {
        let s = scores_2x3();
        let mask = Mask::new(vec![1, 2, 3], vec![true, false, true, false, true, true]).unwrap();
        let p = masked_softmax(&s, Some(&mask)).unwrap();
        for q in 0..2 {
            let total: f32 = p.row(0, q).iter().sum();
            assert!((total - 1.0).abs() < 1e-6);
        }
        assert_eq!(p.at3(0, 0, 1), 0.0);
        assert_eq!(p.at3(0, 1, 0), 0.0);
        // exp(1) / (exp(1) + exp(3))
        let expected = 1.0 / (1.0 + 2.0f32.exp());
        assert!((p.at3(0, 0, 0) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_masked_log_softmax_fully_masked_row_is_finite() {
        let s = scores_2x3();
        let mask = Mask::new(vec![1, 2, 3], vec![false, false, false, true, true, true]).unwrap();
        let ll = masked_log_softmax(&s, Some(&mask)).unwrap();
        assert!(ll.all_finite());
        assert!(ll.row(0, 0).iter().all(|&x| x == MASKED_LOG_PROB));
        let p = ll.map(f32::exp);
        assert_eq!(p.row(0, 0).iter().sum::<f32>(), 0.0);
    }

    #[test]
    fn test_masked_log_softmax_large_scores_stay_finite() {
        let s = Tensor::from_batch(&[vec![vec![1e4, 1e4 - 1.0, -1e4]]]).unwrap();
        let ll = masked_log_softmax(&s, None).unwrap();
        assert!(ll.all_finite());
        assert!((ll.at3(0, 0, 0) - (-(1.0 + (-1.0f32).exp()).ln())).abs() < 1e-5);
    }

    #[test]
    fn test_argmax_ties_take_lowest_index() {
        let s = Tensor::from_batch(&[vec![vec![1.0, 3.0, 3.0], vec![2.0, 2.0, 2.0]]]).unwrap();
        assert_eq!(argmax_last(&s).unwrap(), vec![vec![1, 0]]);
    }
}
