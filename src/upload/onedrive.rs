use super::{UploadStatus, Uploader};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

const GRAPH_ROOT: &str = "https://graph.microsoft.com/v1.0/me/drive/root";

/// Files below this go up in a single PUT; larger ones use an upload session
const SIMPLE_UPLOAD_LIMIT: u64 = 4 * 1024 * 1024;
/// Session chunks must be multiples of 320 KiB
const CHUNK_SIZE: usize = 320 * 1024;

#[derive(Debug, Deserialize)]
struct DriveItem {
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadSession {
    upload_url: String,
}

/// Microsoft Graph upload into `{base_path}/{folder}/{file}` of the signed-in drive
pub struct OneDriveUploader {
    client: Client,
    token: String,
    base_path: Vec<String>,
    known_folders: Mutex<HashSet<String>>,
}

impl OneDriveUploader {
    pub fn new(token: String, base_path: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            token,
            base_path: split_path(&base_path),
            known_folders: Mutex::new(HashSet::new()),
        })
    }

    /// `root:/a/b/c.xlsx:` style item address, optionally followed by an action
    fn item_url(&self, parts: &[&str], action: Option<&str>) -> Result<Url> {
        item_url(&self.base_path, parts, action)
    }

    async fn remote_size(&self, folder: &str, file_name: &str) -> Result<Option<u64>> {
        let url = self.item_url(&[folder, file_name], None)?;
        let resp = self.client.get(url).bearer_auth(&self.token).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => Ok(resp.json::<DriveItem>().await?.size),
            s => bail!("OneDrive lookup of {folder}/{file_name} failed: {s}"),
        }
    }

    /// Create every folder along `{base_path}/{folder}`; existing ones are fine
    async fn ensure_folder(&self, folder: &str) -> Result<()> {
        let mut known = self.known_folders.lock().await;
        if known.contains(folder) {
            return Ok(());
        }

        let mut chain: Vec<&str> = self.base_path.iter().map(String::as_str).collect();
        chain.push(folder);
        for depth in 0..chain.len() {
            let (parent, name) = (&chain[..depth], chain[depth]);
            let url = if parent.is_empty() {
                Url::parse(&format!("{GRAPH_ROOT}/children"))?
            } else {
                item_url(&[], parent, Some("children"))?
            };
            let resp = self
                .client
                .post(url)
                .bearer_auth(&self.token)
                .json(&json!({
                    "name": name,
                    "folder": {},
                    "@microsoft.graph.conflictBehavior": "fail",
                }))
                .send()
                .await?;
            match resp.status() {
                StatusCode::CONFLICT => debug!(folder = name, "Folder exists"),
                s if s.is_success() => info!(folder = name, "Created OneDrive folder"),
                s => bail!("Failed to create OneDrive folder {name}: {s} {}", resp.text().await.unwrap_or_default()),
            }
        }

        known.insert(folder.to_string());
        Ok(())
    }

    async fn put_simple(&self, bytes: Vec<u8>, folder: &str, file_name: &str) -> Result<()> {
        let url = self.item_url(&[folder, file_name], Some("content"))?;
        let resp = self
            .client
            .put(url)
            .bearer_auth(&self.token)
            .body(bytes)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            bail!("Upload of {file_name} failed: {status} {}", resp.text().await.unwrap_or_default());
        }
        Ok(())
    }

    async fn put_session(&self, bytes: Vec<u8>, folder: &str, file_name: &str) -> Result<()> {
        let url = self.item_url(&[folder, file_name], Some("createUploadSession"))?;
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .json(&json!({ "item": { "@microsoft.graph.conflictBehavior": "replace" } }))
            .send()
            .await?;
        if !resp.status().is_success() {
            bail!("Could not open upload session for {file_name}: {}", resp.status());
        }
        let session: UploadSession = resp.json().await?;

        let total = bytes.len();
        for (i, chunk) in bytes.chunks(CHUNK_SIZE).enumerate() {
            let start = i * CHUNK_SIZE;
            let end = start + chunk.len() - 1;
            let resp = self
                .client
                .put(&session.upload_url)
                .header("Content-Range", format!("bytes {start}-{end}/{total}"))
                .body(chunk.to_vec())
                .send()
                .await?;
            if !resp.status().is_success() {
                bail!("Chunk {start}-{end} of {file_name} rejected: {}", resp.status());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Uploader for OneDriveUploader {
    fn name(&self) -> &'static str {
        "onedrive"
    }

    async fn upload(&self, local: &Path, folder: &str, file_name: &str) -> Result<UploadStatus> {
        let bytes = tokio::fs::read(local)
            .await
            .with_context(|| format!("Missing local file {}", local.display()))?;
        let size = bytes.len() as u64;

        self.ensure_folder(folder).await?;
        let status = match self.remote_size(folder, file_name).await? {
            Some(remote) if remote == size => return Ok(UploadStatus::Unchanged),
            Some(_) => UploadStatus::Replaced,
            None => UploadStatus::Created,
        };

        if size < SIMPLE_UPLOAD_LIMIT {
            self.put_simple(bytes, folder, file_name).await?;
        } else {
            self.put_session(bytes, folder, file_name).await?;
        }
        info!(folder, file = file_name, ?status, "Uploaded to OneDrive");
        Ok(status)
    }
}

fn split_path(path: &str) -> Vec<String> {
    path.replace('\\', "/")
        .split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn item_url(base: &[String], parts: &[&str], action: Option<&str>) -> Result<Url> {
    let mut url = Url::parse(GRAPH_ROOT)?;
    let segments: Vec<&str> = base.iter().map(String::as_str).chain(parts.iter().copied()).collect();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Graph root is not a hierarchical URL"))?;
        path.pop().push("root:");
        let last = segments.len().saturating_sub(1);
        for (i, seg) in segments.iter().enumerate() {
            if i == last {
                path.push(&format!("{seg}:"));
            } else {
                path.push(seg);
            }
        }
        if let Some(action) = action {
            path.push(action);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_items_by_path() {
        let base = split_path("office work\\부동산 실거래 데이터/");
        assert_eq!(base, vec!["office work", "부동산 실거래 데이터"]);

        let url = item_url(&base, &["아파트", "아파트 202401.xlsx"], Some("content")).unwrap();
        let decoded = url.path().replace("%20", " ");
        assert!(url.as_str().starts_with("https://graph.microsoft.com/v1.0/me/drive/root:/office%20work/"));
        assert!(decoded.ends_with(":/content"));
        assert!(!url.as_str().contains(' '));
    }

    #[test]
    fn folder_children_url() {
        let url = item_url(&[], &["a", "b"], Some("children")).unwrap();
        assert_eq!(url.as_str(), "https://graph.microsoft.com/v1.0/me/drive/root:/a/b:/children");
    }
}
