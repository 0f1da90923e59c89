//! Generate a devnet genesis block.
//!
//! Emits a height-0 block with seeded validator keys (seeds 1..=n),
//! suitable for local multi-node networks.
//!
//! Usage:
//!   cargo run --example generate_genesis [n] > block.v1.json

use diva_chain::genesis;

fn main() {
    let n = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(5usize);

    let (block, keys) = genesis::generate_devnet(n);

    for (i, key) in keys.iter().enumerate() {
        eprintln!("validator {}: {}", i + 1, key.public_key());
    }

    println!(
        "{}",
        serde_json::to_string_pretty(&block).expect("genesis block serializes")
    );
}
