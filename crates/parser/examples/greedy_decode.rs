//! Greedy Decoding and Loss on a Toy Batch
//!
//! Run with: RUST_LOG=deeptree_parser=debug cargo run -p deeptree-parser --example greedy_decode
//!
//! This example demonstrates:
//! - Building a parser from a JSON config
//! - Root sentinel and padding masks on a two-sentence batch
//! - Training loss with channel dropout, then evaluation-mode decoding
//! - Aggregating attachment metrics across batches

use deeptree_parser::{AttachmentMetrics, ContextualBatch, DeepTreeParser, ParserConfig};
use deeptree_tensor::{Mask, Tensor};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    println!("=== Greedy Biaffine Decoding ===\n");

    // -------------------------------------------------------------------------
    // 1. Configuration
    // -------------------------------------------------------------------------
    println!("1. Configuration");
    println!("----------------");
    let config: ParserConfig = serde_json::from_str(
        r#"{
            "query_vector_dim": 16,
            "key_vector_dim": 16,
            "edge_head_vector_dim": 12,
            "edge_type_vector_dim": 8,
            "num_labels": 4,
            "dropout": 0.2,
            "attention": "biaffine",
            "seed": 7
        }"#,
    )?;
    println!("  {:?}\n", config);
    let mut parser = DeepTreeParser::from_config(&config)?;

    // -------------------------------------------------------------------------
    // 2. A padded batch
    // -------------------------------------------------------------------------
    println!("2. Batch");
    println!("--------");
    let lengths = [5usize, 3];
    let tokens = Tensor::randn_seeded(vec![2, 5, 16], 1.0, 1);
    let query_mask = Mask::from_lengths(&lengths, 5)?;
    let edge_mask = Mask::pairwise(&query_mask, &query_mask)?;
    let batch = ContextualBatch::self_attached(tokens, Some(edge_mask), Some(query_mask))?;
    println!("  sentence lengths: {:?}", lengths);
    println!("  valid tokens:     {}\n", batch.num_valid_tokens());

    let gold_heads = vec![vec![2, 0, 2, 5, 3], vec![0, 1, 1, 0, 0]];
    let gold_labels = vec![vec![1, 0, 2, 3, 1], vec![0, 2, 1, 0, 0]];

    // -------------------------------------------------------------------------
    // 3. Training-mode loss
    // -------------------------------------------------------------------------
    println!("3. Training loss (dropout on)");
    println!("-----------------------------");
    parser.train();
    let mut metrics = AttachmentMetrics::new();
    for step in 0..3 {
        let out = parser.loss_with_metrics(&batch, &gold_heads, &gold_labels, &mut metrics)?;
        println!(
            "  step {}: loss = {:.4} (head {:.4}, label {:.4}, {} tokens)",
            step, out.loss, out.edge_head_nll, out.edge_label_nll, out.num_instances
        );
    }
    println!();

    // -------------------------------------------------------------------------
    // 4. Evaluation-mode decoding
    // -------------------------------------------------------------------------
    println!("4. Greedy decode (dropout off)");
    println!("------------------------------");
    parser.eval();
    let decoded = parser.decode(&batch)?;
    for (b, &len) in lengths.iter().enumerate() {
        let sentence = decoded.sentence(b, len)?;
        let cyclic = decoded.has_cycle(b, len)?;
        println!("  sentence {}: (head, label) = {:?}  cycle: {}", b, sentence, cyclic);
    }
    println!();

    // -------------------------------------------------------------------------
    // 5. Metrics
    // -------------------------------------------------------------------------
    println!("5. Metrics over the training steps");
    println!("----------------------------------");
    println!("  {}", serde_json::to_string(&metrics.compute())?);

    Ok(())
}
