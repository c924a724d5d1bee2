//! Perceptual hashing for near-duplicate detection.
//!
//! Uses Blockhash, which produces a 64-bit (8 byte) hash that survives JPEG
//! re-compression, resizing and small crops. Hashes read from manifests may
//! have a different length; comparison then charges 8 bits per missing byte.
//!
//! ```no_run
//! use mediaquiz_core::fingerprint::PerceptualHasher;
//!
//! let hasher = PerceptualHasher::default();
//! let a = hasher.hash_bytes(&std::fs::read("a.jpg").unwrap()).unwrap();
//! let b = hasher.hash_bytes(&std::fs::read("b.jpg").unwrap()).unwrap();
//! let near_duplicate = a.distance(&b) <= 5;
//! ```

use std::path::Path;

use blockhash::{blockhash64, Blockhash64};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use crate::error::{MediaError, Result};

/// Hash size in bytes produced by this crate.
pub const PERCEPTUAL_HASH_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HashAlgorithm {
    #[default]
    Blockhash64,
}

/// A perceptual hash as produced locally or read from a hash manifest.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerceptualHash {
    bytes: Vec<u8>,
}

impl PerceptualHash {
    pub fn new(hash: [u8; PERCEPTUAL_HASH_SIZE]) -> Self {
        Self {
            bytes: hash.to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Parse the hex form used in hash manifests.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| MediaError::PerceptualHashError(format!("Invalid hex string: {}", e)))?;
        if bytes.is_empty() {
            return Err(MediaError::PerceptualHashError("Empty hash".into()));
        }
        Ok(Self { bytes })
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    /// Number of differing bits, plus 8 bits per byte of length mismatch.
    pub fn distance(&self, other: &Self) -> u32 {
        hamming_distance(&self.bytes, &other.bytes).unwrap_or(u32::MAX)
    }
}

/// Computes perceptual hashes from encoded image data.
#[derive(Debug, Clone, Default)]
pub struct PerceptualHasher {
    algorithm: HashAlgorithm,
}

impl PerceptualHasher {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Decode and hash raw image bytes (JPEG, PNG, GIF or WebP).
    pub fn hash_bytes(&self, image_data: &[u8]) -> Result<PerceptualHash> {
        let image = image::load_from_memory(image_data).map_err(|e| {
            MediaError::PerceptualHashError(format!("Failed to decode image: {}", e))
        })?;

        Ok(self.hash_image(&image))
    }

    pub fn hash_file(&self, path: &Path) -> Result<PerceptualHash> {
        let data = std::fs::read(path)?;
        self.hash_bytes(&data)
    }

    pub fn hash_image(&self, image: &DynamicImage) -> PerceptualHash {
        match self.algorithm {
            HashAlgorithm::Blockhash64 => {
                let hash: Blockhash64 = blockhash64(image);
                let hash_bytes: [u8; 8] = hash.into();
                PerceptualHash::new(hash_bytes)
            }
        }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }
}

/// Hamming distance between two hash byte arrays.
///
/// Compares the overlapping prefix and adds 8 bits per byte of length
/// difference. Returns `None` if either side is empty.
pub fn hamming_distance(hash1: &[u8], hash2: &[u8]) -> Option<u32> {
    if hash1.is_empty() || hash2.is_empty() {
        return None;
    }

    let min_len = hash1.len().min(hash2.len());

    let distance: u32 = hash1[..min_len]
        .iter()
        .zip(hash2[..min_len].iter())
        .map(|(a, b)| (a ^ b).count_ones())
        .sum();

    let size_penalty = (hash1.len().abs_diff(hash2.len()) * 8) as u32;

    Some(distance + size_penalty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hamming_distance_identical() {
        let hash = [0x00, 0xFF, 0xAA, 0x55, 0x00, 0xFF, 0xAA, 0x55];
        assert_eq!(hamming_distance(&hash, &hash), Some(0));
    }

    #[test]
    fn test_hamming_distance_all_bits() {
        assert_eq!(hamming_distance(&[0x00; 8], &[0xFF; 8]), Some(64));
    }

    #[test]
    fn test_hamming_distance_length_penalty() {
        assert_eq!(hamming_distance(&[0x00; 5], &[0x00; 8]), Some(24));
        assert_eq!(hamming_distance(&[], &[0x00]), None);
    }

    #[test]
    fn test_hex_roundtrip_and_distance() {
        let a = PerceptualHash::from_hex("deadbeefcafebabe").unwrap();
        assert_eq!(a.to_hex(), "deadbeefcafebabe");

        let b = PerceptualHash::from_hex("deadbeefcafebabf").unwrap();
        assert_eq!(a.distance(&b), 1);
        assert!(PerceptualHash::from_hex("").is_err());
        assert!(PerceptualHash::from_hex("xyz").is_err());
    }

    #[test]
    fn test_hasher_is_deterministic() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_fn(64, 64, |x, y| {
            image::Rgb([(x * 4) as u8, (y * 4) as u8, ((x + y) * 2) as u8])
        }));
        let hasher = PerceptualHasher::default();
        let a = hasher.hash_image(&img);
        let b = hasher.hash_image(&img);
        assert_eq!(a, b);
        assert_eq!(a.as_bytes().len(), PERCEPTUAL_HASH_SIZE);
        assert_eq!(hasher.algorithm(), HashAlgorithm::Blockhash64);
    }
}
