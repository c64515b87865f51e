use super::{UploadStatus, Uploader};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::info;

/// Copies files into `{root}/{folder}/`, e.g. a synced OneDrive or NAS folder
pub struct LocalFolderUploader {
    root: PathBuf,
}

impl LocalFolderUploader {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Uploader for LocalFolderUploader {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn upload(&self, local: &Path, folder: &str, file_name: &str) -> Result<UploadStatus> {
        let dest_dir = self.root.join(folder);
        tokio::fs::create_dir_all(&dest_dir)
            .await
            .with_context(|| format!("Failed to create {}", dest_dir.display()))?;
        let dest = dest_dir.join(file_name);

        let size = tokio::fs::metadata(local)
            .await
            .with_context(|| format!("Missing local file {}", local.display()))?
            .len();
        let status = match tokio::fs::metadata(&dest).await {
            Ok(meta) if meta.len() == size => return Ok(UploadStatus::Unchanged),
            Ok(_) => UploadStatus::Replaced,
            Err(_) => UploadStatus::Created,
        };

        tokio::fs::copy(local, &dest)
            .await
            .with_context(|| format!("Failed to copy to {}", dest.display()))?;
        info!(file = %dest.display(), ?status, "Copied to upload folder");
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn creates_replaces_and_skips() {
        let src = TempDir::new().unwrap();
        let dst = TempDir::new().unwrap();
        let file = src.path().join("아파트 202401.xlsx");
        std::fs::write(&file, b"first").unwrap();

        let up = LocalFolderUploader::new(dst.path().to_path_buf());
        let status = up.upload(&file, "아파트", "아파트 202401.xlsx").await.unwrap();
        assert_eq!(status, UploadStatus::Created);
        assert_eq!(
            std::fs::read(dst.path().join("아파트").join("아파트 202401.xlsx")).unwrap(),
            b"first"
        );

        let status = up.upload(&file, "아파트", "아파트 202401.xlsx").await.unwrap();
        assert_eq!(status, UploadStatus::Unchanged);

        std::fs::write(&file, b"second version").unwrap();
        let status = up.upload(&file, "아파트", "아파트 202401.xlsx").await.unwrap();
        assert_eq!(status, UploadStatus::Replaced);
    }
}
