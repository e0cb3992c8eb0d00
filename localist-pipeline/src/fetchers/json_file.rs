//! Local JSON fetcher
//!
//! Reads one JSON array file, or every `*.json` file of a directory in
//! name order. Everything arrives as a single page.

use super::{split_records, FetchError, FetchPage, RequestGate, SourceFetcher};
use std::path::{Path, PathBuf};
use tracing::debug;

pub struct JsonFileFetcher {
    path: PathBuf,
}

impl JsonFileFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_file(path: &Path, page: &mut FetchPage) {
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) => {
                page.failures.push(format!("{}: {}", path.display(), e));
                return;
            }
        };

        match serde_json::from_str(&text).map_err(|e| e.to_string()).and_then(split_records) {
            Ok(items) => {
                debug!(file = %path.display(), count = items.len(), "Read raw records");
                page.items.extend(items);
            }
            Err(e) => page.failures.push(format!("{}: {}", path.display(), e)),
        }
    }

    async fn json_files(dir: &Path) -> Result<Vec<PathBuf>, FetchError> {
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| FetchError::Fatal(format!("cannot list {}: {}", dir.display(), e)))?;

        let mut files = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| FetchError::Fatal(format!("cannot list {}: {}", dir.display(), e)))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

#[async_trait::async_trait]
impl SourceFetcher for JsonFileFetcher {
    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }

    async fn fetch_page(&self, page: u32, gate: &RequestGate) -> Result<Option<FetchPage>, FetchError> {
        if page > 1 {
            return Ok(None);
        }

        let metadata = tokio::fs::metadata(&self.path)
            .await
            .map_err(|e| FetchError::Fatal(format!("{}: {}", self.path.display(), e)))?;

        let mut out = FetchPage::default();
        if metadata.is_dir() {
            for file in Self::json_files(&self.path).await? {
                gate.wait().await;
                Self::read_file(&file, &mut out).await;
            }
        } else {
            gate.wait().await;
            Self::read_file(&self.path, &mut out).await;
        }

        Ok(Some(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_reads_single_array_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("venues.json");
        std::fs::write(&file, r#"[{"name": "a"}, {"name": "b"}]"#).unwrap();

        let fetcher = JsonFileFetcher::new(&file);
        let gate = RequestGate::from_millis(0);
        let page = fetcher.fetch_page(1, &gate).await.unwrap().unwrap();
        assert_eq!(page.items.len(), 2);
        assert!(page.failures.is_empty());
        assert!(fetcher.fetch_page(2, &gate).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_directory_counts_bad_file_as_failure() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.json"), r#"[{"name": "a"}]"#).unwrap();
        std::fs::write(dir.path().join("b.json"), "not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let fetcher = JsonFileFetcher::new(dir.path());
        let page = fetcher
            .fetch_page(1, &RequestGate::from_millis(0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.failures.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_path_is_fatal() {
        let dir = TempDir::new().unwrap();
        let fetcher = JsonFileFetcher::new(dir.path().join("missing.json"));
        let result = fetcher.fetch_page(1, &RequestGate::from_millis(0)).await;
        assert!(matches!(result, Err(FetchError::Fatal(_))));
    }
}
