//! Content identity index built from published manifests.
//!
//! Each manifest source publishes two CSV-like files:
//!
//! - identity manifest: `relativePath,contentHashHex`
//! - hash manifest: `relativePath,perceptualHashHex`
//!
//! The index is rebuilt from scratch on every call and never cached, so it
//! always reflects what the remotes currently publish.

use std::collections::{BTreeMap, HashMap};
#[cfg(feature = "network")]
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::config::{ManifestSource, SourceKind};
use crate::error::{MediaError, Result};
use crate::fingerprint::PerceptualHash;

/// Which manifest sources take part in a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexScope {
    All,
    /// Skip staging sources so a staged image does not match itself.
    CanonicalOnly,
}

impl IndexScope {
    fn includes(self, kind: SourceKind) -> bool {
        match self {
            IndexScope::All => true,
            IndexScope::CanonicalOnly => kind == SourceKind::Canonical,
        }
    }
}

/// Retrieves manifest text by URL.
#[async_trait]
pub trait ManifestFetch: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String>;
}

/// Fetches manifests over HTTP(S), or from disk for `file://` URLs.
#[cfg(feature = "network")]
pub struct HttpManifestFetcher {
    client: reqwest::Client,
}

#[cfg(feature = "network")]
impl HttpManifestFetcher {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MediaError::Config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

#[cfg(feature = "network")]
#[async_trait]
impl ManifestFetch for HttpManifestFetcher {
    #[instrument(level = "debug", skip(self))]
    async fn fetch(&self, url: &str) -> Result<String> {
        let unavailable = |reason: String| MediaError::IndexUnavailable {
            url: url.to_string(),
            reason,
        };

        let parsed = url::Url::parse(url).map_err(|e| unavailable(e.to_string()))?;
        if parsed.scheme() == "file" {
            let path = parsed
                .to_file_path()
                .map_err(|_| unavailable("not a local path".to_string()))?;
            return tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| unavailable(e.to_string()));
        }

        let response = self.client.get(parsed).send().await.map_err(|e| {
            warn!(url, error = %e, "Manifest request failed");
            unavailable(e.to_string())
        })?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            warn!(url, status = %status, "Manifest request returned non-200");
            return Err(unavailable(format!("status {status}")));
        }

        response.text().await.map_err(|e| unavailable(e.to_string()))
    }
}

/// Serves manifests from memory, keyed by URL.
#[derive(Debug, Clone, Default)]
pub struct InMemoryManifests {
    bodies: HashMap<String, String>,
}

impl InMemoryManifests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, url: impl Into<String>, body: impl Into<String>) {
        self.bodies.insert(url.into(), body.into());
    }
}

#[async_trait]
impl ManifestFetch for InMemoryManifests {
    async fn fetch(&self, url: &str) -> Result<String> {
        self.bodies
            .get(url)
            .cloned()
            .ok_or_else(|| MediaError::IndexUnavailable {
                url: url.to_string(),
                reason: "status 404 Not Found".to_string(),
            })
    }
}

/// Merged view over all selected manifests.
#[derive(Debug, Clone, Default)]
pub struct ContentIndex {
    content: BTreeMap<String, String>,
    perceptual: BTreeMap<String, PerceptualHash>,
}

impl ContentIndex {
    /// Fetch and merge every manifest of the selected sources.
    ///
    /// Any fetch failure fails the whole build.
    #[instrument(level = "debug", skip_all, fields(sources = sources.len(), scope = ?scope))]
    pub async fn build(
        fetcher: &dyn ManifestFetch,
        sources: &[ManifestSource],
        scope: IndexScope,
    ) -> Result<Self> {
        let mut index = ContentIndex::default();

        for source in sources.iter().filter(|s| scope.includes(s.kind)) {
            let (ids, hashes) =
                tokio::try_join!(fetcher.fetch(&source.ids_url), fetcher.fetch(&source.hashes_url))?;
            index.merge(ContentIndex::from_manifests(&ids, &hashes)?);
            debug!(source = %source.label, "Merged manifest source");
        }

        info!(
            content_entries = index.content.len(),
            perceptual_entries = index.perceptual.len(),
            "Content index built"
        );
        Ok(index)
    }

    /// Parse one identity manifest and one hash manifest.
    pub fn from_manifests(ids: &str, hashes: &str) -> Result<Self> {
        let content = parse_manifest(ids)?
            .into_iter()
            .map(|(path, hash)| (path, hash.to_ascii_lowercase()))
            .collect();

        let mut perceptual = BTreeMap::new();
        for (line, (path, hash)) in parse_rows(hashes)? {
            let hash = PerceptualHash::from_hex(&hash).map_err(|e| MediaError::ManifestParse {
                line,
                reason: e.to_string(),
            })?;
            perceptual.insert(path, hash);
        }

        Ok(Self {
            content,
            perceptual,
        })
    }

    /// Union keyed on path; entries from `other` win.
    pub fn merge(&mut self, other: ContentIndex) {
        self.content.extend(other.content);
        self.perceptual.extend(other.perceptual);
    }

    pub fn insert_perceptual(&mut self, path: impl Into<String>, hash: PerceptualHash) {
        self.perceptual.insert(path.into(), hash);
    }

    pub fn insert_content(&mut self, path: impl Into<String>, content_hash: &str) {
        self.content
            .insert(path.into(), content_hash.to_ascii_lowercase());
    }

    pub fn contains_content_hash(&self, content_hash: &str) -> bool {
        self.path_for_content(content_hash).is_some()
    }

    pub fn path_for_content(&self, content_hash: &str) -> Option<&str> {
        let wanted = content_hash.to_ascii_lowercase();
        self.content
            .iter()
            .find(|(_, hash)| **hash == wanted)
            .map(|(path, _)| path.as_str())
    }

    pub fn perceptual_entries(&self) -> impl Iterator<Item = (&str, &PerceptualHash)> {
        self.perceptual.iter().map(|(p, h)| (p.as_str(), h))
    }

    pub fn content_len(&self) -> usize {
        self.content.len()
    }

    pub fn perceptual_len(&self) -> usize {
        self.perceptual.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.perceptual.is_empty()
    }
}

/// Parse `path,value` rows into pairs.
pub fn parse_manifest(text: &str) -> Result<Vec<(String, String)>> {
    Ok(parse_rows(text)?.into_iter().map(|(_, row)| row).collect())
}

fn parse_rows(text: &str) -> Result<Vec<(usize, (String, String))>> {
    let mut rows = Vec::new();
    for (i, raw) in text.lines().enumerate() {
        let line = i + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }

        let (path, value) = trimmed
            .rsplit_once(',')
            .ok_or_else(|| MediaError::ManifestParse {
                line,
                reason: "missing ',' separator".to_string(),
            })?;

        let path = normalize_path(path);
        let value = unquote(value);
        if path.is_empty() || value.is_empty() {
            return Err(MediaError::ManifestParse {
                line,
                reason: "empty path or hash".to_string(),
            });
        }
        rows.push((line, (path, value.to_string())));
    }
    Ok(rows)
}

fn unquote(field: &str) -> &str {
    field.trim().trim_matches('"').trim()
}

/// Strip quoting and a leading `./` from a manifest path.
pub fn normalize_path(path: &str) -> String {
    let path = unquote(path);
    path.strip_prefix("./").unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDS: &str = "./animals/cat/a.jpg,AAAA\n\n\"./animals/dog/b.png\",bbbb\n";
    const HASHES: &str = "./animals/cat/a.jpg,00000000000000ff\nanimals/dog/b.png,ffffffffffffffff\n";

    fn source(label: &str, kind: SourceKind) -> ManifestSource {
        ManifestSource {
            label: label.to_string(),
            ids_url: format!("mem://{label}/ids.csv"),
            hashes_url: format!("mem://{label}/hashes.csv"),
            kind,
        }
    }

    #[test]
    fn test_parse_strips_prefix_and_quotes() {
        let rows = parse_manifest(IDS).unwrap();
        assert_eq!(
            rows,
            vec![
                ("animals/cat/a.jpg".to_string(), "AAAA".to_string()),
                ("animals/dog/b.png".to_string(), "bbbb".to_string()),
            ]
        );
    }

    #[test]
    fn test_malformed_row_reports_line() {
        let err = parse_manifest("a.jpg,1\nno-separator\n").unwrap_err();
        assert!(matches!(err, MediaError::ManifestParse { line: 2, .. }));
    }

    #[test]
    fn test_content_lookup_is_case_insensitive() {
        let index = ContentIndex::from_manifests(IDS, HASHES).unwrap();
        assert!(index.contains_content_hash("aaaa"));
        assert_eq!(index.path_for_content("BBBB"), Some("animals/dog/b.png"));
        assert!(!index.contains_content_hash("cccc"));
        assert_eq!(index.perceptual_len(), 2);
    }

    #[tokio::test]
    async fn test_build_merges_sources_by_path() {
        let mut manifests = InMemoryManifests::new();
        manifests.insert("mem://canonical/ids.csv", IDS);
        manifests.insert("mem://canonical/hashes.csv", HASHES);
        manifests.insert("mem://staging/ids.csv", "./animals/cat/a.jpg,cccc\nx/y/z.jpg,dddd\n");
        manifests.insert("mem://staging/hashes.csv", "x/y/z.jpg,0000000000000000\n");

        let sources = vec![
            source("canonical", SourceKind::Canonical),
            source("staging", SourceKind::Staging),
        ];

        let all = ContentIndex::build(&manifests, &sources, IndexScope::All)
            .await
            .unwrap();
        assert_eq!(all.content_len(), 3);
        assert!(all.contains_content_hash("cccc"));
        assert!(!all.contains_content_hash("aaaa"));

        let canonical = ContentIndex::build(&manifests, &sources, IndexScope::CanonicalOnly)
            .await
            .unwrap();
        assert_eq!(canonical.content_len(), 2);
        assert!(canonical.contains_content_hash("aaaa"));
    }

    #[tokio::test]
    async fn test_single_fetch_failure_fails_build() {
        let mut manifests = InMemoryManifests::new();
        manifests.insert("mem://canonical/ids.csv", IDS);

        let err = ContentIndex::build(
            &manifests,
            &[source("canonical", SourceKind::Canonical)],
            IndexScope::All,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, MediaError::IndexUnavailable { .. }));
    }

    #[cfg(feature = "network")]
    #[tokio::test]
    async fn test_http_fetcher_reads_file_urls() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ids.csv");
        std::fs::write(&path, IDS).unwrap();
        let url = url::Url::from_file_path(&path).unwrap();

        let fetcher = HttpManifestFetcher::new(Duration::from_secs(1)).unwrap();
        let body = fetcher.fetch(url.as_str()).await.unwrap();
        assert_eq!(body, IDS);
    }
}
