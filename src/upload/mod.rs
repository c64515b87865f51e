pub mod local;
pub mod onedrive;

pub use local::LocalFolderUploader;
pub use onedrive::OneDriveUploader;

use crate::config::UploadTarget;
use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

/// What happened to a file pushed to a storage target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    Created,
    Replaced,
    Unchanged,
    Skipped,
}

/// Storage target for finished spreadsheets.
/// Files are addressed by category folder and file name; same name overwrites.
#[async_trait]
pub trait Uploader: Send + Sync {
    fn name(&self) -> &'static str;

    async fn upload(&self, local: &Path, folder: &str, file_name: &str) -> Result<UploadStatus>;
}

/// Used when no storage target is configured
pub struct NoopUploader;

#[async_trait]
impl Uploader for NoopUploader {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn upload(&self, _local: &Path, _folder: &str, _file_name: &str) -> Result<UploadStatus> {
        Ok(UploadStatus::Skipped)
    }
}

pub fn from_target(target: &UploadTarget) -> Result<Box<dyn Uploader>> {
    Ok(match target {
        UploadTarget::None => Box::new(NoopUploader),
        UploadTarget::Local(root) => Box::new(LocalFolderUploader::new(root.clone())),
        UploadTarget::OneDrive { token, base_path } => {
            Box::new(OneDriveUploader::new(token.clone(), base_path.clone())?)
        }
    })
}
