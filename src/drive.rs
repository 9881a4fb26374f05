use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use once_cell::sync::Lazy;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use std::fmt;
use tracing::info;

use crate::config::Config;
use crate::model::MediaAsset;

const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// One entry of a folder listing.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "mimeType", default)]
    pub mime_type: String,
}

/// Remote file-storage operations used by the reconciler and the upload
/// path. The real client talks to the Drive v3 REST surface; tests plug in
/// a recording mock.
#[async_trait]
pub trait DriveService: Send + Sync {
    async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveFile>>;

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String>;

    async fn upload_file(
        &self,
        name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
        parent_id: &str,
    ) -> Result<String>;

    /// Reparent a file. Setting the parent is absolute, so repeating the
    /// same move is a no-op on the remote side.
    async fn move_file(&self, file_id: &str, from_parent: &str, to_parent: &str) -> Result<()>;

    async fn download(&self, url: &str) -> Result<Vec<u8>>;
}

#[derive(Clone)]
pub struct DriveClient {
    http: Client,
    api_base: Url,
    upload_base: Url,
    token: String,
}

impl fmt::Debug for DriveClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriveClient")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl DriveClient {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let api_base = Url::parse(&cfg.drive.api_base).context("invalid drive.api_base")?;
        let upload_base =
            Url::parse(&cfg.drive.upload_base).context("invalid drive.upload_base")?;
        Ok(Self::with_base_urls(
            cfg.drive.access_token.clone(),
            api_base,
            upload_base,
        ))
    }

    pub fn with_base_urls(token: String, api_base: Url, upload_base: Url) -> Self {
        let http = Client::builder()
            .user_agent("kioskflow/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            api_base,
            upload_base,
            token,
        }
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }

    pub fn build_move_request(
        &self,
        file_id: &str,
        from_parent: &str,
        to_parent: &str,
    ) -> Result<reqwest::Request> {
        let mut url = self
            .api_base
            .join(&format!("files/{}", file_id))
            .context("invalid drive base URL")?;
        url.query_pairs_mut()
            .append_pair("addParents", to_parent)
            .append_pair("removeParents", from_parent);
        self.http
            .patch(url)
            .header("Authorization", self.bearer())
            .json(&json!({}))
            .build()
            .context("failed to build move request")
    }

    async fn execute_json<T: serde::de::DeserializeOwned>(
        &self,
        request: reqwest::Request,
    ) -> Result<T> {
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach drive API")?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("drive error {}: {}", status, body));
        }
        let body = res.text().await.context("failed to read drive response")?;
        serde_json::from_str(&body).context("invalid drive response JSON")
    }
}

#[derive(Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
struct FileResponse {
    id: String,
}

#[async_trait]
impl DriveService for DriveClient {
    async fn list_children(&self, folder_id: &str) -> Result<Vec<DriveFile>> {
        let mut url = self.api_base.join("files").context("invalid drive base URL")?;
        url.query_pairs_mut()
            .append_pair("q", &format!("'{}' in parents and trashed = false", folder_id))
            .append_pair("fields", "files(id,name,mimeType)");
        let request = self
            .http
            .get(url)
            .header("Authorization", self.bearer())
            .build()
            .context("failed to build list request")?;
        let listing: FileListResponse = self.execute_json(request).await?;
        Ok(listing.files)
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<String> {
        let url = self.api_base.join("files").context("invalid drive base URL")?;
        let body = json!({
            "name": name,
            "mimeType": FOLDER_MIME,
            "parents": [parent_id],
        });
        let request = self
            .http
            .post(url)
            .header("Authorization", self.bearer())
            .json(&body)
            .build()
            .context("failed to build create-folder request")?;
        let created: FileResponse = self.execute_json(request).await?;
        info!(folder = %name, id = %created.id, "created drive folder");
        Ok(created.id)
    }

    async fn upload_file(
        &self,
        name: &str,
        mime_type: &str,
        bytes: Vec<u8>,
        parent_id: &str,
    ) -> Result<String> {
        let mut url = self
            .upload_base
            .join("files")
            .context("invalid drive upload URL")?;
        url.query_pairs_mut().append_pair("uploadType", "multipart");

        let metadata = json!({ "name": name, "parents": [parent_id] }).to_string();
        let form = reqwest::multipart::Form::new()
            .part(
                "metadata",
                reqwest::multipart::Part::text(metadata).mime_str("application/json")?,
            )
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes)
                    .file_name(name.to_string())
                    .mime_str(mime_type)?,
            );

        let res = self
            .http
            .post(url)
            .header("Authorization", self.bearer())
            .multipart(form)
            .send()
            .await
            .context("failed to reach drive upload API")?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("drive upload error {}: {}", status, body));
        }
        let created: FileResponse = res.json().await.context("invalid upload response JSON")?;
        info!(file = %name, id = %created.id, "uploaded file to drive");
        Ok(created.id)
    }

    async fn move_file(&self, file_id: &str, from_parent: &str, to_parent: &str) -> Result<()> {
        let request = self.build_move_request(file_id, from_parent, to_parent)?;
        let _: serde_json::Value = self.execute_json(request).await?;
        Ok(())
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let res = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed to fetch {}", url))?;
        let status = res.status();
        if !status.is_success() {
            return Err(anyhow!("download error {} for {}", status, url));
        }
        let bytes = res.bytes().await.context("failed to read download body")?;
        Ok(bytes.to_vec())
    }
}

static MIME_BY_EXTENSION: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("jpg", "image/jpeg"),
        ("jpeg", "image/jpeg"),
        ("png", "image/png"),
        ("gif", "image/gif"),
        ("webp", "image/webp"),
        ("bmp", "image/bmp"),
        ("svg", "image/svg+xml"),
        ("mp4", "video/mp4"),
        ("mov", "video/quicktime"),
        ("avi", "video/x-msvideo"),
        ("webm", "video/webm"),
        ("mkv", "video/x-matroska"),
        ("pdf", "application/pdf"),
    ])
});

/// MIME type for an asset file name, by extension.
pub fn mime_type_for(file_name: &str) -> &'static str {
    std::path::Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .and_then(|ext| MIME_BY_EXTENSION.get(ext.as_str()).copied())
        .unwrap_or("application/octet-stream")
}

/// Where an asset's bytes come from for an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssetSource {
    Url(String),
    Inline(Vec<u8>),
}

/// Resolve the bytes source for an asset: explicit URL, then a public URL in
/// the upload metadata, then a derived storage URL, then inline base64 data
/// as last resort. `None` means the asset was never given fetchable content.
pub fn resolve_asset_source(asset: &MediaAsset, storage_public_base: &str) -> Option<AssetSource> {
    if let Some(url) = asset.file_url.as_deref() {
        if !url.trim().is_empty() {
            return Some(AssetSource::Url(url.to_string()));
        }
    }

    if let Some(url) = asset
        .metadata
        .as_ref()
        .and_then(|m| m.get("public_url"))
        .and_then(|v| v.as_str())
    {
        if !url.trim().is_empty() {
            return Some(AssetSource::Url(url.to_string()));
        }
    }

    if let Some(path) = asset.file_path.as_deref() {
        if !path.trim().is_empty() && !storage_public_base.trim().is_empty() {
            return Some(AssetSource::Url(format!(
                "{}/{}",
                storage_public_base.trim_end_matches('/'),
                path.trim_start_matches('/')
            )));
        }
    }

    if let Some(data) = asset
        .metadata
        .as_ref()
        .and_then(|m| m.get("data"))
        .and_then(|v| v.as_str())
    {
        if let Ok(bytes) = base64::engine::general_purpose::STANDARD.decode(data) {
            return Some(AssetSource::Inline(bytes));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AssetStatus;

    fn asset() -> MediaAsset {
        MediaAsset {
            id: "a1".into(),
            campaign_id: "c1".into(),
            status: AssetStatus::Approved,
            file_name: "creative.jpg".into(),
            file_url: None,
            file_path: None,
            metadata: None,
            drive_file_id: None,
        }
    }

    #[test]
    fn mime_lookup() {
        assert_eq!(mime_type_for("ad.JPG"), "image/jpeg");
        assert_eq!(mime_type_for("clip.mp4"), "video/mp4");
        assert_eq!(mime_type_for("doc.pdf"), "application/pdf");
        assert_eq!(mime_type_for("noext"), "application/octet-stream");
        assert_eq!(mime_type_for("weird.xyz"), "application/octet-stream");
    }

    #[test]
    fn source_prefers_explicit_url() {
        let mut a = asset();
        a.file_url = Some("https://cdn.example/ad.jpg".into());
        a.file_path = Some("media/ad.jpg".into());
        assert_eq!(
            resolve_asset_source(&a, "https://storage.example.com"),
            Some(AssetSource::Url("https://cdn.example/ad.jpg".into()))
        );
    }

    #[test]
    fn source_falls_back_to_metadata_public_url() {
        let mut a = asset();
        a.metadata = Some(serde_json::json!({ "public_url": "https://pub.example/x.png" }));
        assert_eq!(
            resolve_asset_source(&a, ""),
            Some(AssetSource::Url("https://pub.example/x.png".into()))
        );
    }

    #[test]
    fn source_derives_storage_url_from_path() {
        let mut a = asset();
        a.file_path = Some("/media/ad.jpg".into());
        assert_eq!(
            resolve_asset_source(&a, "https://storage.example.com/"),
            Some(AssetSource::Url(
                "https://storage.example.com/media/ad.jpg".into()
            ))
        );
    }

    #[test]
    fn source_uses_inline_base64_last() {
        let mut a = asset();
        a.metadata = Some(serde_json::json!({
            "data": base64::engine::general_purpose::STANDARD.encode(b"bytes")
        }));
        assert_eq!(
            resolve_asset_source(&a, ""),
            Some(AssetSource::Inline(b"bytes".to_vec()))
        );
    }

    #[test]
    fn source_unresolvable_when_nothing_is_set() {
        assert_eq!(resolve_asset_source(&asset(), ""), None);
    }

    #[test]
    fn move_request_sets_parents_and_auth() {
        let client = DriveClient::with_base_urls(
            "token".into(),
            Url::parse("https://www.googleapis.com/drive/v3/").unwrap(),
            Url::parse("https://www.googleapis.com/upload/drive/v3/").unwrap(),
        );
        let request = client
            .build_move_request("file-1", "folder-a", "folder-b")
            .unwrap();
        assert_eq!(request.method(), reqwest::Method::PATCH);
        assert_eq!(request.url().path(), "/drive/v3/files/file-1");
        let query = request.url().query().unwrap();
        assert!(query.contains("addParents=folder-b"));
        assert!(query.contains("removeParents=folder-a"));
        assert_eq!(
            request
                .headers()
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer token"
        );
    }
}
