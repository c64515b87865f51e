//! Per-category checkpoint of the last completed month.
//!
//! Stored as a flat JSON object keyed by the category's tab label:
//!
//! ```json
//! { "아파트": "202405", "토지": "202312" }
//! ```

use crate::models::{Category, YearMonth};
use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressStore {
    entries: BTreeMap<String, YearMonth>,
}

impl ProgressStore {
    /// Load the store; a missing file is an empty store
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No progress file yet");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read progress file {}", path.display()))?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        let entries: BTreeMap<String, YearMonth> = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed progress file {}", path.display()))?;
        info!(path = %path.display(), categories = entries.len(), "Loaded progress");
        Ok(Self { entries })
    }

    pub fn last_completed(&self, category: Category) -> Option<YearMonth> {
        self.entries.get(category.label()).copied()
    }

    pub fn is_complete(&self, category: Category, ym: YearMonth) -> bool {
        self.last_completed(category).is_some_and(|last| ym <= last)
    }

    /// Move the category's watermark forward to `ym`. Never moves it back.
    /// Returns whether the stored value changed.
    pub fn record(&mut self, category: Category, ym: YearMonth) -> bool {
        match self.entries.get(category.label()) {
            Some(last) if *last >= ym => false,
            _ => {
                self.entries.insert(category.label().to_string(), ym);
                true
            }
        }
    }

    /// Write the store atomically next to its final location
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;

        let json = serde_json::to_string_pretty(&self.entries)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create temporary progress file")?;
        tmp.write_all(json.as_bytes())?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .with_context(|| format!("Failed to replace progress file {}", path.display()))?;

        debug!(path = %path.display(), "Saved progress");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ym(s: &str) -> YearMonth {
        s.parse().unwrap()
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = ProgressStore::load(&dir.path().join("progress.json")).unwrap();
        assert_eq!(store.last_completed(Category::Apartment), None);
        assert!(!store.is_complete(Category::Apartment, ym("202001")));
    }

    #[test]
    fn record_is_monotonic() {
        let mut store = ProgressStore::default();
        assert!(store.record(Category::Land, ym("202403")));
        assert!(!store.record(Category::Land, ym("202401")));
        assert!(!store.record(Category::Land, ym("202403")));
        assert_eq!(store.last_completed(Category::Land), Some(ym("202403")));
        assert!(store.record(Category::Land, ym("202404")));
        assert!(store.is_complete(Category::Land, ym("202312")));
        assert!(!store.is_complete(Category::Land, ym("202405")));
    }

    #[test]
    fn round_trips_as_flat_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state").join("progress.json");

        let mut store = ProgressStore::default();
        store.record(Category::RowHouse, ym("202402"));
        store.record(Category::Apartment, ym("202405"));
        store.save(&path).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["아파트"], "202405");
        assert_eq!(raw["연립/다세대"], "202402");

        assert_eq!(ProgressStore::load(&path).unwrap(), store);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("progress.json");
        std::fs::write(&path, "{\"아파트\": \"soon\"}").unwrap();
        assert!(ProgressStore::load(&path).is_err());
    }
}
