//! Manifest generation for a collection working tree.
//!
//! Produces the identity manifest (`ids.csv`) and perceptual hash manifest
//! (`hashes.csv`) that [`ContentIndex`](crate::index::ContentIndex) consumes.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::error::Result;
use crate::fingerprint::{ContentHash, ImageKind, PerceptualHash, PerceptualHasher};

pub const IDS_FILE: &str = "ids.csv";
pub const HASHES_FILE: &str = "hashes.csv";

/// One image found in a collection.
#[derive(Debug, Clone)]
pub struct ManifestEntry {
    /// Path relative to the collection root, `/`-separated
    pub path: String,
    pub content: ContentHash,
    pub perceptual: PerceptualHash,
    pub kind: ImageKind,
}

impl ManifestEntry {
    /// Image id (content hash hex).
    pub fn id(&self) -> String {
        self.content.to_hex()
    }

    /// Parent directory name, which is the item label in collection layouts.
    pub fn item(&self) -> Option<&str> {
        let parent = self.path.rsplit_once('/')?.0;
        Some(parent.rsplit('/').next().unwrap_or(parent))
    }
}

/// Walk `root` and fingerprint every decodable JPEG or PNG file.
///
/// Hidden directories such as `.git` are skipped. Entries are sorted by path.
pub fn scan_collection(root: &Path) -> Result<Vec<ManifestEntry>> {
    let hasher = PerceptualHasher::default();
    let mut entries = Vec::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e));

    for entry in walker {
        let entry = entry.map_err(|e| {
            std::io::Error::other(format!("walking {}: {e}", root.display()))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let Some(kind) = ImageKind::sniff_file(path).filter(ImageKind::is_stageable) else {
            continue;
        };

        let data = std::fs::read(path)?;
        let image = match image::load_from_memory(&data) {
            Ok(image) => image,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Skipping undecodable image");
                continue;
            }
        };
        let perceptual = hasher.hash_image(&image);

        entries.push(ManifestEntry {
            path: relative_path(root, path),
            content: ContentHash::from_bytes(&data),
            perceptual,
            kind,
        });
    }

    entries.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(root = %root.display(), images = entries.len(), "Collection scanned");
    Ok(entries)
}

/// `./path,contentHashHex` rows.
pub fn render_ids(entries: &[ManifestEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(out, "./{},{}", entry.path, entry.content.to_hex());
    }
    out
}

/// `./path,perceptualHashHex` rows.
pub fn render_hashes(entries: &[ManifestEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        let _ = writeln!(out, "./{},{}", entry.path, entry.perceptual.to_hex());
    }
    out
}

/// Scan `root` and write both manifests into `out_dir`.
pub fn write_manifests(root: &Path, out_dir: &Path) -> Result<(PathBuf, PathBuf, usize)> {
    let entries = scan_collection(root)?;
    std::fs::create_dir_all(out_dir)?;

    let ids_path = out_dir.join(IDS_FILE);
    let hashes_path = out_dir.join(HASHES_FILE);
    std::fs::write(&ids_path, render_ids(&entries))?;
    std::fs::write(&hashes_path, render_hashes(&entries))?;

    info!(
        root = %root.display(),
        images = entries.len(),
        ids = %ids_path.display(),
        hashes = %hashes_path.display(),
        "Manifests written"
    );
    Ok((ids_path, hashes_path, entries.len()))
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn relative_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ContentIndex;
    use image::{ImageBuffer, ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(seed: u8) -> Vec<u8> {
        let img = ImageBuffer::from_fn(32, 32, |x, y| {
            Rgb([(x as u8).wrapping_mul(seed), (y as u8).wrapping_add(seed), seed])
        });
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_scan_skips_hidden_and_non_images() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("birds/robin")).unwrap();
        std::fs::create_dir_all(root.join(".git/objects")).unwrap();
        std::fs::write(root.join("birds/robin/a.png"), png_bytes(3)).unwrap();
        std::fs::write(root.join(".git/objects/b.png"), png_bytes(4)).unwrap();
        std::fs::write(root.join("birds/robin/notes.txt"), "hello").unwrap();
        std::fs::write(root.join("birds/robin/broken.png"), &png_bytes(5)[..20]).unwrap();

        let entries = scan_collection(root).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "birds/robin/a.png");
        assert_eq!(entries[0].item(), Some("robin"));
    }

    #[test]
    fn test_written_manifests_parse_back() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("collection");
        std::fs::create_dir_all(root.join("birds/robin")).unwrap();
        let bytes = png_bytes(7);
        std::fs::write(root.join("birds/robin/a.png"), &bytes).unwrap();

        let out = dir.path().join("out");
        let (ids, hashes, count) = write_manifests(&root, &out).unwrap();
        assert_eq!(count, 1);

        let index = ContentIndex::from_manifests(
            &std::fs::read_to_string(ids).unwrap(),
            &std::fs::read_to_string(hashes).unwrap(),
        )
        .unwrap();
        let id = ContentHash::from_bytes(&bytes).to_hex();
        assert_eq!(index.path_for_content(&id), Some("birds/robin/a.png"));
    }
}
