//! Item catalog: which quiz items exist and which category each belongs to.
//!
//! Loaded from a directory holding one `{category}.txt` file per category,
//! one item per line. Items and categories are matched case-insensitively.

use std::collections::BTreeMap;
use std::path::Path;

use tracing::{debug, info};

use crate::error::{MediaError, Result};

#[derive(Debug, Clone, Default)]
pub struct ItemCatalog {
    /// category -> items, all lowercase
    groups: BTreeMap<String, Vec<String>>,
}

impl ItemCatalog {
    pub fn load(dir: &Path) -> Result<Self> {
        let mut groups = BTreeMap::new();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("txt") {
                continue;
            }
            let Some(category) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };

            let items: Vec<String> = std::fs::read_to_string(&path)?
                .lines()
                .map(|line| line.trim().to_lowercase())
                .filter(|line| !line.is_empty())
                .collect();

            debug!(category, items = items.len(), "Loaded item list");
            groups.insert(category.to_lowercase(), items);
        }

        if groups.is_empty() {
            return Err(MediaError::Config(format!(
                "no item lists found in {}",
                dir.display()
            )));
        }

        info!(categories = groups.len(), "Item catalog loaded");
        Ok(Self { groups })
    }

    /// Build a catalog from `(category, item)` pairs.
    pub fn from_pairs<I, C, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (C, T)>,
        C: AsRef<str>,
        T: AsRef<str>,
    {
        let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (category, item) in pairs {
            groups
                .entry(category.as_ref().to_lowercase())
                .or_default()
                .push(item.as_ref().trim().to_lowercase());
        }
        Self { groups }
    }

    pub fn category_of(&self, item: &str) -> Option<&str> {
        let item = item.trim().to_lowercase();
        self.groups
            .iter()
            .find(|(_, items)| items.contains(&item))
            .map(|(category, _)| category.as_str())
    }

    /// Like [`category_of`](Self::category_of), failing with `UnknownItem`.
    pub fn require_category(&self, item: &str) -> Result<&str> {
        self.category_of(item)
            .ok_or_else(|| MediaError::UnknownItem(item.to_string()))
    }

    pub fn contains(&self, item: &str) -> bool {
        self.category_of(item).is_some()
    }

    /// Every item across categories, deduplicated and sorted.
    pub fn items(&self) -> Vec<&str> {
        let mut items: Vec<&str> = self
            .groups
            .values()
            .flat_map(|items| items.iter().map(String::as_str))
            .collect();
        items.sort_unstable();
        items.dedup();
        items
    }

    pub fn categories(&self) -> impl Iterator<Item = &str> {
        self.groups.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_lowercases_and_skips_blank_lines() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Birds.txt"), "Blue Jay\n\nCardinal\n").unwrap();
        std::fs::write(dir.path().join("trees.txt"), "oak\n").unwrap();
        std::fs::write(dir.path().join("README.md"), "ignored").unwrap();

        let catalog = ItemCatalog::load(dir.path()).unwrap();
        assert_eq!(catalog.category_of("BLUE JAY"), Some("birds"));
        assert_eq!(catalog.category_of("oak"), Some("trees"));
        assert_eq!(catalog.items(), vec!["blue jay", "cardinal", "oak"]);
        assert!(!catalog.contains("maple"));
    }

    #[test]
    fn test_empty_directory_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ItemCatalog::load(dir.path()),
            Err(MediaError::Config(_))
        ));
    }

    #[test]
    fn test_require_category_unknown_item() {
        let catalog = ItemCatalog::from_pairs([("birds", "robin")]);
        assert!(matches!(
            catalog.require_category("eagle"),
            Err(MediaError::UnknownItem(item)) if item == "eagle"
        ));
    }
}
