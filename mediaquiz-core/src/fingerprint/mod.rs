//! Image identity.
//!
//! Two fingerprints identify every asset in the pipeline:
//!
//! - **Content hash**: SHA3-256 over the exact bytes. Used as the image id and
//!   for exact-duplicate rejection.
//! - **Perceptual hash**: 64-bit Blockhash that stays close for visually similar
//!   images, compared by Hamming distance for near-duplicate detection.
//!
//! [`ImageKind`] sniffs the encoded format from magic bytes so uploads are not
//! trusted by their file names.

pub mod content;
pub mod perceptual;

pub use content::{ContentHash, ImageKind};
pub use perceptual::*;
