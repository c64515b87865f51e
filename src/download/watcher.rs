use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Suffixes Chrome and friends use while a download is still being written
const IN_PROGRESS_SUFFIXES: [&str; 3] = [".crdownload", ".tmp", ".part"];

/// Anything this small is an error page or an empty export, not a spreadsheet
pub const MIN_FILE_SIZE: u64 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("no completed download in {dir} after {waited:?}")]
    Timeout { dir: PathBuf, waited: Duration },

    #[error("failed to scan download directory {dir}: {source}")]
    Io {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Watches a download directory for a newly finished file.
#[derive(Debug, Clone)]
pub struct DownloadWatcher {
    dir: PathBuf,
    poll_interval: Duration,
    timeout: Duration,
    stable_polls: u32,
}

impl DownloadWatcher {
    pub fn new(dir: impl Into<PathBuf>, poll_interval: Duration, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            poll_interval,
            timeout,
            stable_polls: 3,
        }
    }

    /// Names of the files already in the directory, taken before an export is triggered
    pub fn snapshot(&self) -> Result<HashSet<String>, DownloadError> {
        Ok(self.scan()?.into_keys().collect())
    }

    /// Remove leftovers from earlier runs so they can't be mistaken for new downloads
    pub fn clear(&self) -> Result<usize, DownloadError> {
        std::fs::create_dir_all(&self.dir).map_err(|e| self.io(e))?;
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.dir).map_err(|e| self.io(e))? {
            let entry = entry.map_err(|e| self.io(e))?;
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                std::fs::remove_file(entry.path()).map_err(|e| self.io(e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Single poll step. Returns a file that is new, large enough, and whose size
    /// has been identical for `stable_polls` consecutive calls.
    pub fn poll(
        &self,
        before: &HashSet<String>,
        sizes: &mut HashMap<String, (u64, u32)>,
    ) -> Result<Option<PathBuf>, DownloadError> {
        let files = self.scan()?;
        // partials abandoned before the click never finish; only fresh ones hold us back
        let in_progress = files
            .keys()
            .any(|name| is_in_progress(name) && !before.contains(name));

        sizes.retain(|name, _| files.contains_key(name));

        let mut ready = None;
        for (name, size) in files {
            if before.contains(&name) || is_in_progress(&name) || size <= MIN_FILE_SIZE {
                continue;
            }
            let seen = sizes.entry(name.clone()).or_insert((size, 0));
            if seen.0 == size {
                seen.1 += 1;
            } else {
                trace!(file = %name, from = seen.0, to = size, "Download still growing");
                *seen = (size, 1);
            }
            if seen.1 >= self.stable_polls && ready.is_none() {
                ready = Some(self.dir.join(&name));
            }
        }

        if in_progress {
            return Ok(None);
        }
        Ok(ready)
    }

    /// Poll until a completed download appears or the timeout runs out
    pub async fn wait_for_download(&self, before: &HashSet<String>) -> Result<PathBuf, DownloadError> {
        let started = Instant::now();
        let mut sizes = HashMap::new();

        loop {
            if let Some(path) = self.poll(before, &mut sizes)? {
                debug!(file = %path.display(), elapsed = ?started.elapsed(), "Download complete");
                return Ok(path);
            }
            if started.elapsed() >= self.timeout {
                return Err(DownloadError::Timeout {
                    dir: self.dir.clone(),
                    waited: started.elapsed(),
                });
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn scan(&self) -> Result<HashMap<String, u64>, DownloadError> {
        let mut files = HashMap::new();
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(self.io(e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| self.io(e))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') {
                continue;
            }
            // the file may vanish between listing and stat while Chrome renames it
            let Ok(meta) = entry.metadata() else { continue };
            if meta.is_file() {
                files.insert(name, meta.len());
            }
        }
        Ok(files)
    }

    fn io(&self, source: std::io::Error) -> DownloadError {
        DownloadError::Io {
            dir: self.dir.clone(),
            source,
        }
    }
}

fn is_in_progress(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    IN_PROGRESS_SUFFIXES.iter().any(|s| lower.ends_with(s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn watcher(dir: &Path) -> DownloadWatcher {
        DownloadWatcher::new(dir, Duration::from_millis(20), Duration::from_millis(600))
    }

    #[test]
    fn requires_three_identical_sizes() {
        let dir = TempDir::new().unwrap();
        let w = watcher(dir.path());
        let before = w.snapshot().unwrap();
        let mut sizes = HashMap::new();

        fs::write(dir.path().join("export.xlsx"), vec![0u8; 2048]).unwrap();
        assert!(w.poll(&before, &mut sizes).unwrap().is_none());
        assert!(w.poll(&before, &mut sizes).unwrap().is_none());

        // growth resets the counter
        fs::write(dir.path().join("export.xlsx"), vec![0u8; 4096]).unwrap();
        assert!(w.poll(&before, &mut sizes).unwrap().is_none());
        assert!(w.poll(&before, &mut sizes).unwrap().is_none());
        let done = w.poll(&before, &mut sizes).unwrap();
        assert_eq!(done, Some(dir.path().join("export.xlsx")));
    }

    #[test]
    fn ignores_old_small_and_partial_files() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("old.xlsx"), vec![0u8; 4096]).unwrap();
        let w = watcher(dir.path());
        let before = w.snapshot().unwrap();
        let mut sizes = HashMap::new();

        fs::write(dir.path().join("tiny.xlsx"), vec![0u8; 100]).unwrap();
        fs::write(dir.path().join("big.xlsx.crdownload"), vec![0u8; 8192]).unwrap();
        for _ in 0..5 {
            assert!(w.poll(&before, &mut sizes).unwrap().is_none());
        }
    }

    #[test]
    fn waits_while_another_download_is_in_flight() {
        let dir = TempDir::new().unwrap();
        let mut w = watcher(dir.path());
        w.stable_polls = 1;
        let before = w.snapshot().unwrap();
        let mut sizes = HashMap::new();

        fs::write(dir.path().join("a.xlsx"), vec![0u8; 2048]).unwrap();
        fs::write(dir.path().join("b.xlsx.crdownload"), vec![0u8; 2048]).unwrap();
        assert!(w.poll(&before, &mut sizes).unwrap().is_none());

        fs::remove_file(dir.path().join("b.xlsx.crdownload")).unwrap();
        assert!(w.poll(&before, &mut sizes).unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_partial_from_before_does_not_block() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("old.xlsx.crdownload"), vec![0u8; 2048]).unwrap();
        let w = watcher(dir.path());
        let before = w.snapshot().unwrap();

        fs::write(dir.path().join("new.xlsx"), vec![0u8; 4096]).unwrap();
        let found = w.wait_for_download(&before).await.unwrap();
        assert_eq!(found, dir.path().join("new.xlsx"));
    }

    #[tokio::test]
    async fn returns_file_once_writer_stops() {
        let dir = TempDir::new().unwrap();
        let w = watcher(dir.path());
        let before = w.snapshot().unwrap();

        let target = dir.path().join("report.xlsx");
        let writer = tokio::spawn({
            let target = target.clone();
            async move {
                for chunk in 1..=4u64 {
                    fs::write(&target, vec![1u8; (chunk * 2048) as usize]).unwrap();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            }
        });

        let found = w.wait_for_download(&before).await.unwrap();
        writer.await.unwrap();
        assert_eq!(found, target);
        assert_eq!(fs::metadata(&found).unwrap().len(), 4 * 2048);
    }

    #[tokio::test]
    async fn times_out_without_a_file() {
        let dir = TempDir::new().unwrap();
        let w = watcher(dir.path());
        let before = w.snapshot().unwrap();
        let err = w.wait_for_download(&before).await.unwrap_err();
        assert!(matches!(err, DownloadError::Timeout { .. }));
    }

    #[test]
    fn clear_removes_stale_downloads() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x.xlsx"), b"stale").unwrap();
        fs::write(dir.path().join("y.crdownload"), b"stale").unwrap();
        assert_eq!(watcher(dir.path()).clear().unwrap(), 2);
        assert!(watcher(dir.path()).snapshot().unwrap().is_empty());
    }
}
