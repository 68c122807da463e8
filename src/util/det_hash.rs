//! Deterministic hashing for definition tables.
//!
//! Definition hashes pick the bucket a definition lands in, and unification
//! walks tables in bucket-independent sequence order, so the numbering does
//! not depend on the hash. The hasher is still seeded with a constant so that
//! bucket chains, and therefore lookup cost, are identical from run to run
//! and across ranks.

use std::hash::Hasher;

/// Deterministic, non-cryptographic hasher with a fixed seed.
#[derive(Debug, Clone)]
pub struct DetHasher {
    state: u64,
}

impl DetHasher {
    const SEED: u64 = 0x16f1_1fe8_9b0d_677c;
    const MULTIPLIER: u64 = 0x517c_c1b7_2722_0a95;

    #[inline]
    fn mix(&mut self, value: u64) {
        self.state = self.state.rotate_left(5).wrapping_mul(Self::MULTIPLIER) ^ value;
    }
}

impl Default for DetHasher {
    fn default() -> Self {
        Self { state: Self::SEED }
    }
}

impl Hasher for DetHasher {
    fn write(&mut self, bytes: &[u8]) {
        let mut chunks = bytes.chunks_exact(8);
        for chunk in &mut chunks {
            let mut word = [0u8; 8];
            word.copy_from_slice(chunk);
            self.mix(u64::from_le_bytes(word));
        }
        for &byte in chunks.remainder() {
            self.mix(u64::from(byte));
        }
    }

    fn write_u8(&mut self, i: u8) {
        self.mix(u64::from(i));
    }

    fn write_u32(&mut self, i: u32) {
        self.mix(u64::from(i));
    }

    fn write_u64(&mut self, i: u64) {
        self.mix(i);
    }

    fn write_usize(&mut self, i: usize) {
        self.mix(i as u64);
    }

    fn finish(&self) -> u64 {
        let mut h = self.state;
        h ^= h >> 33;
        h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
        h ^= h >> 33;
        h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
        h ^= h >> 33;
        h
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::Hash;

    fn hash_value<T: Hash>(value: &T) -> u64 {
        let mut hasher = DetHasher::default();
        value.hash(&mut hasher);
        hasher.finish()
    }

    #[test]
    fn same_input_same_hash() {
        assert_eq!(hash_value(&"main"), hash_value(&"main"));
        assert_eq!(hash_value(&(10u32, 20u32)), hash_value(&(10u32, 20u32)));
    }

    #[test]
    fn different_input_different_hash() {
        assert_ne!(hash_value(&"foo"), hash_value(&"bar"));
        assert_ne!(hash_value(&(10u32, 20u32)), hash_value(&(20u32, 10u32)));
    }

    #[test]
    fn chunked_and_tail_bytes_both_contribute() {
        let a = hash_value(&"file.c:0010");
        let b = hash_value(&"file.c:0011");
        assert_ne!(a, b);
    }
}
