//! Input bundle for one parser call.

use deeptree_core::{ParserError, Result};
use deeptree_tensor::{Mask, Tensor};

/// Contextual vectors for a padded batch of sentences.
///
/// - `query`: `[B, Q, Dq]`, one vector per token that needs a head
/// - `key`: `[B, K, Dk]`, candidate heads (root is added by the parser)
/// - `edge_mask`: `[B, Q, K]` or `[B, 1, K]`, which (query, key) pairs may attach
/// - `query_mask`: `[B, Q]`, which query positions are real tokens
#[derive(Debug, Clone)]
pub struct ContextualBatch {
    pub query: Tensor,
    pub key: Option<Tensor>,
    pub edge_mask: Option<Mask>,
    pub query_mask: Option<Mask>,
}

impl ContextualBatch {
    /// Bundle and validate the inputs.
    pub fn new(
        query: Tensor,
        key: Option<Tensor>,
        edge_mask: Option<Mask>,
        query_mask: Option<Mask>,
    ) -> Result<Self> {
        let (batch, queries, _) = query.dims3("query")?;

        let keys = match &key {
            Some(key) => {
                let (key_batch, keys, _) = key.dims3("key")?;
                if key_batch != batch {
                    return Err(ParserError::shape_mismatch(
                        "key batch",
                        &[batch],
                        &[key_batch],
                    ));
                }
                Some(keys)
            }
            None => None,
        };

        if let Some(mask) = &edge_mask {
            match keys {
                Some(keys) => mask.check_broadcast("edge mask", &[batch, queries, keys])?,
                // Without a key there is nothing for an edge mask to address.
                None => {
                    return Err(ParserError::shape_mismatch(
                        "edge mask without key",
                        &[batch, queries, 0],
                        &mask.shape,
                    ))
                }
            }
        }

        if let Some(mask) = &query_mask {
            if mask.dims2("query mask")? != (batch, queries) {
                return Err(ParserError::shape_mismatch(
                    "query mask",
                    &[batch, queries],
                    &mask.shape,
                ));
            }
        }

        Ok(Self {
            query,
            key,
            edge_mask,
            query_mask,
        })
    }

    /// Query and key are the same token sequence, the usual dependency
    /// parsing setup.
    pub fn self_attached(
        tokens: Tensor,
        edge_mask: Option<Mask>,
        query_mask: Option<Mask>,
    ) -> Result<Self> {
        let key = tokens.clone();
        Self::new(tokens, Some(key), edge_mask, query_mask)
    }

    pub fn batch_size(&self) -> usize {
        self.query.shape[0]
    }

    pub fn num_queries(&self) -> usize {
        self.query.shape[1]
    }

    /// Number of valid query positions (all of them without a query mask).
    pub fn num_valid_tokens(&self) -> usize {
        match &self.query_mask {
            Some(mask) => mask.count(),
            None => self.batch_size() * self.num_queries(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_batch() {
        let batch = ContextualBatch::new(
            Tensor::zeros(vec![2, 3, 4]),
            Some(Tensor::zeros(vec![2, 5, 4])),
            Some(Mask::ones(vec![2, 1, 5])),
            Some(Mask::from_lengths(&[3, 1], 3).unwrap()),
        )
        .unwrap();
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.num_queries(), 3);
        assert_eq!(batch.num_valid_tokens(), 4);
    }

    #[test]
    fn test_key_batch_must_match() {
        let err = ContextualBatch::new(
            Tensor::zeros(vec![2, 3, 4]),
            Some(Tensor::zeros(vec![1, 3, 4])),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "shape");
    }

    #[test]
    fn test_edge_mask_must_match_key_length() {
        let err = ContextualBatch::new(
            Tensor::zeros(vec![1, 3, 4]),
            Some(Tensor::zeros(vec![1, 3, 4])),
            Some(Mask::ones(vec![1, 3, 4])),
            None,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_edge_mask_requires_key() {
        let err = ContextualBatch::new(
            Tensor::zeros(vec![1, 1, 4]),
            None,
            Some(Mask::ones(vec![1, 1, 1])),
            None,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_query_mask_shape() {
        let err = ContextualBatch::new(
            Tensor::zeros(vec![2, 3, 4]),
            None,
            None,
            Some(Mask::ones(vec![2, 2])),
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_without_query_mask_every_position_counts() {
        let tokens = Tensor::zeros(vec![2, 3, 1]);
        let batch = ContextualBatch::self_attached(tokens, None, None).unwrap();
        assert_eq!(batch.num_valid_tokens(), 6);
    }
}
