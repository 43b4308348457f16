//! Property-Based Tests for the Erasure Pipeline
//!
//! Systematically verifies codec and bitrot correctness across a wide
//! range of inputs and configurations.
//!
//! # Test Properties
//!
//! 1. **Roundtrip Correctness**: any stream survives encode → decode
//! 2. **Fault Tolerance**: any `data` of `data + parity` shards suffice
//! 3. **Bitrot Detection**: a single flipped bit never goes unnoticed
//! 4. **Size Arithmetic**: shard file sizes match the written shards

#![cfg(test)]

use proptest::prelude::*;

use super::bitrot::{bitrot_verify, BitrotAlgorithm};
use super::Erasure;

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for (data, parity) configurations.
fn coding_strategy() -> impl Strategy<Value = (usize, usize)> {
    (2usize..=6, 1usize..=3)
}

/// Strategy for stream bodies spanning several small blocks.
fn body_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..4000)
}

/// Encode a body block-by-block into whole shard files.
fn encode_to_files(erasure: &Erasure, body: &[u8]) -> Vec<Vec<u8>> {
    let mut files = vec![Vec::new(); erasure.total_shards()];
    for block in body.chunks(erasure.block_size() as usize) {
        let shards = erasure.encode_block(block).unwrap();
        for (file, shard) in files.iter_mut().zip(shards) {
            file.extend_from_slice(&shard);
        }
    }
    files
}

// =============================================================================
// Roundtrip Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: encoding then decoding without losses returns the body.
    #[test]
    fn prop_roundtrip_no_loss(
        (data, parity) in coding_strategy(),
        body in body_strategy(),
    ) {
        let erasure = Erasure::new(data, parity, 256).unwrap();
        let files = encode_to_files(&erasure, &body);

        let shards: Vec<Option<Vec<u8>>> = files.into_iter().map(Some).collect();
        let back = erasure.decode_stream(&shards, body.len() as u64).unwrap();
        prop_assert_eq!(back, body);
    }

    /// Property: recovery succeeds for any erasure pattern of up to
    /// `parity` shards.
    #[test]
    fn prop_roundtrip_any_erasure_pattern(
        (data, parity) in coding_strategy(),
        body in body_strategy(),
        seed in any::<u64>(),
    ) {
        let erasure = Erasure::new(data, parity, 256).unwrap();
        let files = encode_to_files(&erasure, &body);
        let total = erasure.total_shards();

        // Derive a loss pattern of at most `parity` distinct indices.
        let mut lost: Vec<usize> = (0..parity)
            .map(|i| ((seed >> (8 * (i % 8))) as usize + i) % total)
            .collect();
        lost.sort_unstable();
        lost.dedup();

        let mut shards: Vec<Option<Vec<u8>>> = files.into_iter().map(Some).collect();
        for &i in &lost {
            shards[i] = None;
        }

        let back = erasure.decode_stream(&shards, body.len() as u64).unwrap();
        prop_assert_eq!(back, body);
    }

    /// Property: one shard more than parity lost makes decoding fail.
    #[test]
    fn prop_too_many_losses_fail(
        (data, parity) in coding_strategy(),
        body in prop::collection::vec(any::<u8>(), 64..512),
    ) {
        let erasure = Erasure::new(data, parity, 128).unwrap();
        let files = encode_to_files(&erasure, &body);

        let mut shards: Vec<Option<Vec<u8>>> = files.into_iter().map(Some).collect();
        for shard in shards.iter_mut().take(parity + 1) {
            *shard = None;
        }

        prop_assert!(erasure.decode_stream(&shards, body.len() as u64).is_err());
    }
}

// =============================================================================
// Size Arithmetic Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: the declared shard file size matches what block-wise
    /// encoding actually produces.
    #[test]
    fn prop_shard_file_size_matches_encoding(
        (data, parity) in coding_strategy(),
        body in body_strategy(),
    ) {
        let erasure = Erasure::new(data, parity, 256).unwrap();
        let files = encode_to_files(&erasure, &body);

        let expected = erasure.shard_file_size(body.len() as i64);
        for file in &files {
            prop_assert_eq!(file.len() as i64, expected);
        }
    }
}

// =============================================================================
// Bitrot Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: a verified chain returns the exact payload, and any
    /// single bit flip anywhere in the file is detected.
    #[test]
    fn prop_bitrot_chain_detects_any_flip(
        payload in prop::collection::vec(any::<u8>(), 1..800),
        flip_bit in any::<prop::sample::Index>(),
    ) {
        let algorithm = BitrotAlgorithm::Blake3;
        let shard_size = 128usize;

        // Build the chained file the writer would produce.
        let mut file = Vec::new();
        let mut prev: Vec<u8> = Vec::new();
        for chunk in payload.chunks(shard_size) {
            let digest = algorithm.chain(&prev, chunk);
            file.extend_from_slice(&digest);
            file.extend_from_slice(chunk);
            prev = digest;
        }
        let sum = hex::encode(&prev);

        let clean = bitrot_verify(&file, algorithm, shard_size, &sum).unwrap();
        prop_assert_eq!(&clean, &payload);

        let bit = flip_bit.index(file.len() * 8);
        let mut rotted = file.clone();
        rotted[bit / 8] ^= 1 << (bit % 8);

        prop_assert!(bitrot_verify(&rotted, algorithm, shard_size, &sum).is_err());
    }
}
