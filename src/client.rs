//! Google Drive API client: listing, media download/export and resumable
//! upload.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use futures::StreamExt;
use reqwest::header::{CONTENT_RANGE, LOCATION, RANGE};
use reqwest::{Client, Response, StatusCode};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::auth::Credential;
use crate::error::{DriveError, Result};
use crate::models::{ApiErrorResponse, CreatedItem, ItemPage};
use crate::pager::ItemPager;

/// Base URL for Google Drive API v3.
pub const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Upload URL for Google Drive API.
pub const UPLOAD_API_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Default transfer chunk (100 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

/// Resumable upload chunks must be multiples of this, except the last.
const UPLOAD_CHUNK_ALIGN: u64 = 256 * 1024;

/// Largest page the files.list endpoint accepts.
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Field projection for listings.
const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType, driveId, size, modifiedTime, createdTime, shortcutDetails, parents)";

/// Where the client sends its requests.
#[derive(Debug, Clone)]
pub struct DriveEndpoints {
    pub api_base: String,
    pub upload_base: String,
}

impl Default for DriveEndpoints {
    fn default() -> Self {
        Self {
            api_base: DRIVE_API_BASE.to_string(),
            upload_base: UPLOAD_API_BASE.to_string(),
        }
    }
}

impl DriveEndpoints {
    /// Both bases under one root, e.g. a mock server.
    pub fn with_root(root: &str) -> Self {
        let root = root.trim_end_matches('/');
        Self {
            api_base: format!("{}/drive/v3", root),
            upload_base: format!("{}/upload/drive/v3", root),
        }
    }
}

/// Session handle for one job run.
pub struct DriveClient {
    access_token: String,
    endpoints: DriveEndpoints,
    chunk_size: u64,
    http: Client,
}

impl DriveClient {
    /// Create a client that authorizes every call with `credential`.
    pub fn new(credential: &Credential) -> Self {
        Self {
            access_token: credential.token.clone(),
            endpoints: DriveEndpoints::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            http: Client::new(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: DriveEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Set the transfer chunk size in bytes (at least 1).
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    fn upload_chunk_size(&self) -> u64 {
        if self.chunk_size >= UPLOAD_CHUNK_ALIGN {
            self.chunk_size - self.chunk_size % UPLOAD_CHUNK_ALIGN
        } else {
            self.chunk_size
        }
    }

    /// Lazily list every item of a Shared Drive.
    ///
    /// # Arguments
    /// * `drive_id` - The ID of the Shared Drive
    /// * `page_size` - Items per request, clamped to 1..=1000
    pub fn list_items(&self, drive_id: &str, page_size: u32) -> ItemPager<'_> {
        ItemPager::new(self, drive_id, page_size.clamp(1, MAX_PAGE_SIZE))
    }

    /// Fetch one page of a Shared Drive listing.
    pub async fn list_page(
        &self,
        drive_id: &str,
        page_size: u32,
        page_token: Option<&str>,
    ) -> Result<ItemPage> {
        let mut request = self
            .http
            .get(format!("{}/files", self.endpoints.api_base))
            .bearer_auth(&self.access_token)
            .query(&[
                ("pageSize", page_size.to_string().as_str()),
                ("corpora", "drive"),
                ("driveId", drive_id),
                ("includeItemsFromAllDrives", "true"),
                ("supportsAllDrives", "true"),
                ("fields", LIST_FIELDS),
            ]);

        if let Some(token) = page_token {
            request = request.query(&[("pageToken", token)]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        Ok(response.json().await?)
    }

    /// Download the content of a binary file to `destination`.
    ///
    /// `on_progress` gets `(bytes_received, total_bytes)` after each chunk.
    /// Returns the number of bytes written.
    pub async fn download_media<F>(
        &self,
        file_id: &str,
        destination: &Path,
        on_progress: F,
    ) -> Result<u64>
    where
        F: FnMut(u64, Option<u64>),
    {
        let url = format!("{}/files/{}", self.endpoints.api_base, file_id);
        let query = [("alt", "media"), ("supportsAllDrives", "true")];
        self.fetch_to_file(&url, &query, destination, on_progress)
            .await
    }

    /// Export a Google Workspace document converted to `mime_type`.
    pub async fn export_media<F>(
        &self,
        file_id: &str,
        mime_type: &str,
        destination: &Path,
        on_progress: F,
    ) -> Result<u64>
    where
        F: FnMut(u64, Option<u64>),
    {
        let url = format!("{}/files/{}/export", self.endpoints.api_base, file_id);
        let query = [("mimeType", mime_type)];
        self.fetch_to_file(&url, &query, destination, on_progress)
            .await
    }

    /// Stream into `<destination>.part` and move it into place once
    /// complete. A failed transfer removes the partial file.
    async fn fetch_to_file<F>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        destination: &Path,
        on_progress: F,
    ) -> Result<u64>
    where
        F: FnMut(u64, Option<u64>),
    {
        let part_path = part_path(destination);

        match self.fetch_chunks(url, query, &part_path, on_progress).await {
            Ok(received) => {
                tokio::fs::rename(&part_path, destination).await?;
                Ok(received)
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(&part_path).await {
                    if rm.kind() != std::io::ErrorKind::NotFound {
                        warn!("Could not remove partial file {:?}: {}", part_path, rm);
                    }
                }
                Err(e)
            }
        }
    }

    async fn fetch_chunks<F>(
        &self,
        url: &str,
        query: &[(&str, &str)],
        part_path: &Path,
        mut on_progress: F,
    ) -> Result<u64>
    where
        F: FnMut(u64, Option<u64>),
    {
        let mut file = File::create(part_path).await?;
        let mut received: u64 = 0;
        let mut total: Option<u64> = None;

        loop {
            let range = format!("bytes={}-{}", received, received + self.chunk_size - 1);
            let response = self
                .http
                .get(url)
                .bearer_auth(&self.access_token)
                .query(query)
                .header(RANGE, &range)
                .send()
                .await?;

            let status = response.status();

            // Empty content cannot satisfy any range.
            if status == StatusCode::RANGE_NOT_SATISFIABLE
                && content_range_total(&response) == Some(received)
            {
                total = Some(received);
                on_progress(received, total);
                break;
            }

            if !status.is_success() {
                return Err(api_error(response).await);
            }

            let partial = status == StatusCode::PARTIAL_CONTENT;
            if partial {
                total = content_range_total(&response).or(total);
            }

            let mut chunk_bytes: u64 = 0;
            let mut stream = response.bytes_stream();
            while let Some(chunk) = stream.next().await {
                let chunk = chunk?;
                file.write_all(&chunk).await?;
                chunk_bytes += chunk.len() as u64;
            }
            received += chunk_bytes;
            debug!("Fetched {} bytes ({} so far) via {}", chunk_bytes, received, range);

            if !partial {
                // Server ignored the range and sent everything.
                total = Some(received);
            }
            on_progress(received, total);

            let done = match total {
                _ if !partial || chunk_bytes == 0 => true,
                Some(t) => received >= t,
                None => chunk_bytes < self.chunk_size,
            };
            if done {
                break;
            }
        }

        file.flush().await?;
        Ok(received)
    }

    /// Upload a local file as a new item using the resumable protocol.
    ///
    /// # Arguments
    /// * `local_path` - Path to the local file
    /// * `name` - Display name of the new item
    /// * `mime_type` - Content type recorded for the item
    /// * `parent_id` - ID of the destination folder
    ///
    /// Returns the ID assigned to the new item.
    pub async fn upload_resumable(
        &self,
        local_path: &Path,
        name: &str,
        mime_type: &str,
        parent_id: &str,
    ) -> Result<String> {
        let file_size = match tokio::fs::metadata(local_path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => return Err(DriveError::FileNotFound(local_path.display().to_string())),
        };

        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent_id]
        });

        // Step 1: open an upload session
        let init_response = self
            .http
            .post(format!("{}/files", self.endpoints.upload_base))
            .bearer_auth(&self.access_token)
            .query(&[
                ("uploadType", "resumable"),
                ("supportsAllDrives", "true"),
                ("fields", "id"),
            ])
            .header("X-Upload-Content-Type", mime_type)
            .header("X-Upload-Content-Length", file_size.to_string())
            .json(&metadata)
            .send()
            .await?;

        if !init_response.status().is_success() {
            return Err(api_error(init_response).await);
        }

        let session_url = init_response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| DriveError::UploadProtocol("no session URL in response".to_string()))?
            .to_string();
        debug!("Upload session for {:?} opened", local_path);

        // Step 2: send the content chunk by chunk
        let chunk_size = self.upload_chunk_size();
        let mut file = File::open(local_path).await?;
        let mut offset: u64 = 0;

        loop {
            let len = chunk_size.min(file_size - offset);
            let mut buf = vec![0u8; len as usize];
            file.seek(SeekFrom::Start(offset)).await?;
            file.read_exact(&mut buf).await?;

            let content_range = if len == 0 {
                format!("bytes */{}", file_size)
            } else {
                format!("bytes {}-{}/{}", offset, offset + len - 1, file_size)
            };

            let response = self
                .http
                .put(&session_url)
                .header(CONTENT_RANGE, &content_range)
                .body(buf)
                .send()
                .await?;

            match response.status().as_u16() {
                200 | 201 => {
                    let created: CreatedItem = response.json().await?;
                    info!("Uploaded {:?} as {}", local_path, created.id);
                    return Ok(created.id);
                }
                308 => {
                    let committed = committed_bytes(&response);
                    if committed <= offset {
                        return Err(DriveError::UploadProtocol(format!(
                            "server committed {} bytes after chunk {}",
                            committed, content_range
                        )));
                    }
                    if committed > file_size {
                        return Err(DriveError::UploadProtocol(format!(
                            "server committed {} bytes of a {} byte file",
                            committed, file_size
                        )));
                    }
                    debug!("Server committed {} of {} bytes", committed, file_size);
                    offset = committed;
                }
                _ => return Err(api_error(response).await),
            }
        }
    }
}

/// `<name>.part` next to the final destination.
fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

/// Total length from `Content-Range: bytes a-b/total` (or `bytes */total`).
fn content_range_total(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_RANGE)?
        .to_str()
        .ok()?
        .rsplit_once('/')?
        .1
        .trim()
        .parse()
        .ok()
}

/// Bytes the server holds after a `308`, from `Range: bytes=0-N`.
fn committed_bytes(response: &Response) -> u64 {
    response
        .headers()
        .get(RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.rsplit_once('-'))
        .and_then(|(_, last)| last.trim().parse::<u64>().ok())
        .map_or(0, |last| last + 1)
}

/// Turn a non-success response into an `ApiError`, preferring the message
/// from Google's JSON error body.
async fn api_error(response: Response) -> DriveError {
    let status = response.status();
    let error_body = response.text().await.unwrap_or_default();
    if let Ok(api_error) = serde_json::from_str::<ApiErrorResponse>(&error_body) {
        return DriveError::ApiError {
            status: api_error.error.code,
            message: api_error.error.message,
        };
    }
    DriveError::ApiError {
        status: status.as_u16(),
        message: error_body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(chunk_size: u64) -> DriveClient {
        let credential = Credential {
            token: "t".to_string(),
            refresh_token: None,
            token_uri: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            scopes: Vec::new(),
            expiry: None,
        };
        DriveClient::new(&credential).with_chunk_size(chunk_size)
    }

    #[test]
    fn test_part_path() {
        assert_eq!(
            part_path(Path::new("out/abc123")),
            PathBuf::from("out/abc123.part")
        );
    }

    #[test]
    fn test_upload_chunk_alignment() {
        assert_eq!(client(DEFAULT_CHUNK_SIZE).upload_chunk_size(), DEFAULT_CHUNK_SIZE);
        assert_eq!(
            client(UPLOAD_CHUNK_ALIGN * 3 + 17).upload_chunk_size(),
            UPLOAD_CHUNK_ALIGN * 3
        );
        assert_eq!(client(10).upload_chunk_size(), 10);
        assert_eq!(client(0).chunk_size(), 1);
    }

    #[test]
    fn test_endpoints_with_root() {
        let endpoints = DriveEndpoints::with_root("http://127.0.0.1:1234/");
        assert_eq!(endpoints.api_base, "http://127.0.0.1:1234/drive/v3");
        assert_eq!(endpoints.upload_base, "http://127.0.0.1:1234/upload/drive/v3");
    }
}
