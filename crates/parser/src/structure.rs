//! # Decoded Structures
//!
//! The output of greedy decoding: one `(head, label)` pair per query
//! position. Head `0` is the root sentinel and head `h > 0` is key token
//! `h - 1`.
//!
//! Greedy decoding picks every head independently, so the result is not
//! guaranteed to be a tree. [`DecodedStructure::to_graph`] exposes a
//! sentence as a `petgraph` graph and [`DecodedStructure::has_cycle`]
//! reports whether it contains a cycle.

use deeptree_core::{ParserError, Result};
use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};

/// Heads and labels for a padded batch, `[B][Q]` each.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecodedStructure {
    pub heads: Vec<Vec<usize>>,
    pub labels: Vec<Vec<usize>>,
}

impl DecodedStructure {
    pub fn new(heads: Vec<Vec<usize>>, labels: Vec<Vec<usize>>) -> Self {
        Self { heads, labels }
    }

    pub fn batch_size(&self) -> usize {
        self.heads.len()
    }

    /// `(head, label)` pairs for the first `len` tokens of sentence `b`.
    pub fn sentence(&self, b: usize, len: usize) -> Result<Vec<(usize, usize)>> {
        let (heads, labels) = self.rows(b, len)?;
        Ok(heads.iter().copied().zip(labels.iter().copied()).collect())
    }

    /// Sentence `b` as a directed graph.
    ///
    /// Node 0 is the root and node `q + 1` is token `q`. Each token gets one
    /// incoming edge from its head, weighted by its label. This assumes the
    /// keys are the sentence's own tokens, so every head must be `<= len`.
    pub fn to_graph(&self, b: usize, len: usize) -> Result<DiGraph<usize, usize>> {
        let (heads, labels) = self.rows(b, len)?;
        let mut graph = DiGraph::with_capacity(len + 1, len);
        let nodes: Vec<NodeIndex> = (0..=len).map(|i| graph.add_node(i)).collect();
        for (q, (&head, &label)) in heads.iter().zip(labels).enumerate() {
            if head > len {
                return Err(ParserError::InvalidIndex {
                    axis: "head",
                    index: head,
                    size: len + 1,
                });
            }
            graph.add_edge(nodes[head], nodes[q + 1], label);
        }
        Ok(graph)
    }

    /// Whether sentence `b` contains a cycle (self-attachments included).
    pub fn has_cycle(&self, b: usize, len: usize) -> Result<bool> {
        Ok(is_cyclic_directed(&self.to_graph(b, len)?))
    }

    fn rows(&self, b: usize, len: usize) -> Result<(&[usize], &[usize])> {
        let heads = self.heads.get(b).ok_or(ParserError::InvalidIndex {
            axis: "batch",
            index: b,
            size: self.heads.len(),
        })?;
        let labels = self.labels.get(b).ok_or(ParserError::InvalidIndex {
            axis: "batch",
            index: b,
            size: self.labels.len(),
        })?;
        let available = heads.len().min(labels.len());
        if len > available {
            return Err(ParserError::InvalidIndex {
                axis: "sentence length",
                index: len,
                size: available,
            });
        }
        Ok((&heads[..len], &labels[..len]))
    }
}
