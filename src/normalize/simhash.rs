//! 64-bit SimHash over word 3-shingles, for near-duplicate detection.

use sha2::{Digest, Sha256};

const SHINGLE: usize = 3;

fn shingles(text: &str) -> Vec<String> {
    let words: Vec<String> = text.split_whitespace().map(|w| w.to_lowercase()).collect();
    if words.is_empty() {
        return Vec::new();
    }
    if words.len() < SHINGLE {
        return vec![words.join(" ")];
    }
    words.windows(SHINGLE).map(|w| w.join(" ")).collect()
}

fn hash64(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(bytes)
}

/// Zero for empty text.
pub fn simhash(text: &str) -> u64 {
    let tokens = shingles(text);
    if tokens.is_empty() {
        return 0;
    }
    let mut v = [0i64; 64];
    for t in &tokens {
        let h = hash64(t);
        for (bit, acc) in v.iter_mut().enumerate() {
            if h & (1u64 << bit) != 0 {
                *acc += 1;
            } else {
                *acc -= 1;
            }
        }
    }
    v.iter()
        .enumerate()
        .filter(|(_, acc)| **acc > 0)
        .fold(0u64, |fp, (bit, _)| fp | (1u64 << bit))
}

pub fn hamming(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}
