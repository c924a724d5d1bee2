//! Content hashing and format sniffing.

use std::fmt;
use std::path::Path;

use image::ImageFormat;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

use crate::error::{MediaError, Result};

/// SHA3-256 digest of an asset's exact bytes.
///
/// The lowercase hex form is the image id used in file names, manifests,
/// tallies and HTTP routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha3_256::new();
        hasher.update(data);
        let result = hasher.finalize();

        let mut digest = [0u8; 32];
        digest.copy_from_slice(&result);
        Self(digest)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(Self::from_bytes(&data))
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str.trim())
            .map_err(|e| MediaError::UnknownImage(format!("{hex_str}: {e}")))?;
        let digest: [u8; 32] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| MediaError::UnknownImage(format!("expected 32 bytes, got {}", v.len())))?;
        Ok(Self(digest))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Encoded image formats the pipeline knows how to stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
}

impl ImageKind {
    /// Detect the format from magic bytes.
    pub fn sniff(data: &[u8]) -> Option<Self> {
        match image::guess_format(data).ok()? {
            ImageFormat::Jpeg => Some(Self::Jpeg),
            ImageFormat::Png => Some(Self::Png),
            ImageFormat::Gif => Some(Self::Gif),
            _ => None,
        }
    }

    /// Detect the format of a file on disk from its first bytes.
    pub fn sniff_file(path: &Path) -> Option<Self> {
        use std::io::Read;

        let mut head = [0u8; 16];
        let mut file = std::fs::File::open(path).ok()?;
        let n = file.read(&mut head).ok()?;
        Self::sniff(&head[..n])
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::Gif => "gif",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::Gif => "image/gif",
        }
    }

    /// Whether uploads of this kind may enter the staging collection.
    pub fn is_stageable(&self) -> bool {
        matches!(self, Self::Jpeg | Self::Png)
    }

    /// Map a file extension to a MIME type for serving files back.
    pub fn mime_for_extension(ext: &str) -> &'static str {
        match ext.to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => "image/jpeg",
            "png" => "image/png",
            "gif" => "image/gif",
            _ => "application/octet-stream",
        }
    }
}
