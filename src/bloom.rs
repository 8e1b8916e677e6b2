//! Bloom filter, serialized to `.cidx.bloom`.
//!
//! Directly grounded on `storage/sstable/bloom.rs`: the same
//! double-hashing scheme (`h1 + i*h2`), the same optimal bit/hash-count
//! formulas, and the same `bincode` serialization — narrowed to a
//! little-endian parameter header for cross-platform compatibility.

use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

use crate::error::Error;
use crate::Result;

/// File magic bytes, prepended before the bincode-serialized parameters
/// and bit array.
pub const MAGIC: &[u8; 4] = b"BLMF";

/// A classic counting-free multi-hash bloom filter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BloomFilter {
    bits: Vec<u64>,
    hash_count: u32,
    bit_count: u64,
}

impl BloomFilter {
    /// Size a filter for `expected_elements` entries at the given target
    /// false-positive rate, using the standard optimal formulas:
    /// `m = -(n * ln(p)) / ln(2)^2`, `k = (m/n) * ln(2)`.
    pub fn new(expected_elements: u64, false_positive_rate: f64) -> Result<Self> {
        if !(0.0..1.0).contains(&false_positive_rate) || false_positive_rate <= 0.0 {
            return Err(Error::invalid_input(
                "false_positive_rate must be in (0, 1)",
            ));
        }
        let expected_elements = expected_elements.max(1);

        let bit_count = (-(expected_elements as f64 * false_positive_rate.ln())
            / (2.0_f64.ln().powi(2)))
        .ceil() as u64;
        let bit_count = bit_count.max(1);

        let hash_count =
            ((bit_count as f64 / expected_elements as f64) * 2.0_f64.ln()).ceil() as u32;
        let hash_count = hash_count.max(1);

        let word_count = (bit_count + 63) / 64;

        Ok(Self {
            bits: vec![0u64; word_count as usize],
            hash_count,
            bit_count,
        })
    }

    /// Insert a key.
    pub fn add(&mut self, key: &[u8]) {
        let (h1, h2) = Self::hashes(key);
        for i in 0..self.hash_count {
            let bit = self.bit_index(h1, h2, i);
            self.bits[bit / 64] |= 1u64 << (bit % 64);
        }
    }

    /// Test membership. `false` is authoritative; `true` may be a false
    /// positive.
    pub fn might_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::hashes(key);
        for i in 0..self.hash_count {
            let bit = self.bit_index(h1, h2, i);
            if self.bits[bit / 64] & (1u64 << (bit % 64)) == 0 {
                return false;
            }
        }
        true
    }

    fn bit_index(&self, h1: u64, h2: u64, i: u32) -> usize {
        (h1.wrapping_add((i as u64).wrapping_mul(h2)) % self.bit_count) as usize
    }

    fn hashes(key: &[u8]) -> (u64, u64) {
        let mut h1 = DefaultHasher::new();
        h1.write(key);
        h1.write(&[0xAA]);

        let mut h2 = DefaultHasher::new();
        h2.write(key);
        h2.write(&[0x55]);

        (h1.finish(), h2.finish())
    }

    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    pub fn bit_count(&self) -> u64 {
        self.bit_count
    }

    /// Serialize as magic + little-endian parameters + bit array.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = MAGIC.to_vec();
        bincode::serialize_into(&mut out, self).map_err(Error::from)?;
        Ok(out)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < MAGIC.len() || &data[..MAGIC.len()] != MAGIC {
            return Err(Error::corrupt("bad bloom filter magic"));
        }
        bincode::deserialize(&data[MAGIC.len()..]).map_err(Error::from)
    }

    pub fn save(&self, path: impl AsRef<std::path::Path>) -> Result<()> {
        std::fs::write(path, self.serialize()?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::deserialize(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_false_negatives() {
        let mut bloom = BloomFilter::new(1000, 0.01).unwrap();
        let keys: Vec<String> = (0..1000).map(|i| format!("key-{i}")).collect();
        for k in &keys {
            bloom.add(k.as_bytes());
        }
        for k in &keys {
            assert!(bloom.might_contain(k.as_bytes()), "false negative on {k}");
        }
    }

    #[test]
    fn absent_keys_are_usually_rejected() {
        let mut bloom = BloomFilter::new(100, 0.01).unwrap();
        for i in 0..100 {
            bloom.add(format!("present-{i}").as_bytes());
        }
        let false_positives = (0..1000)
            .filter(|i| bloom.might_contain(format!("absent-{i}").as_bytes()))
            .count();
        // Generous bound — this is a probabilistic property, not exact.
        assert!(false_positives < 200, "fp rate way out of line: {false_positives}/1000");
    }

    #[test]
    fn serialization_round_trips() {
        let mut bloom = BloomFilter::new(100, 0.01).unwrap();
        bloom.add(b"a");
        bloom.add(b"b");
        let bytes = bloom.serialize().unwrap();
        let back = BloomFilter::deserialize(&bytes).unwrap();
        assert!(back.might_contain(b"a"));
        assert!(back.might_contain(b"b"));
    }

    #[test]
    fn deserialize_rejects_bad_magic() {
        let mut bloom = BloomFilter::new(100, 0.01).unwrap();
        bloom.add(b"a");
        let mut bytes = bloom.serialize().unwrap();
        bytes[0] = !bytes[0];
        let err = BloomFilter::deserialize(&bytes).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Corrupt);
    }

    #[test]
    fn rejects_invalid_fp_rate() {
        assert!(BloomFilter::new(1000, 0.0).is_err());
        assert!(BloomFilter::new(1000, 1.0).is_err());
    }
}
