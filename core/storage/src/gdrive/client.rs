//! Google Drive API client.

use futures::StreamExt;
use reqwest::{header, Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::io::ReaderStream;

use driveup_common::{Error, Result};

use super::auth::TokenManager;

/// Google Drive API base URL.
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";
/// Google Drive upload API base URL.
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// MIME type Drive uses for folders.
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// Chunk size for resumable uploads (must be a multiple of 256KB).
const CHUNK_SIZE: usize = 8 * 256 * 1024; // 2MB

/// Fields requested for every file resource.
const FILE_FIELDS: &str = "id,name,mimeType,size,parents";

/// Google Drive file metadata from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// File ID.
    pub id: String,
    /// File name.
    pub name: String,
    /// MIME type.
    pub mime_type: String,
    /// File size in bytes (only for files, not folders).
    #[serde(default)]
    pub size: Option<String>,
    /// Parent folder IDs.
    #[serde(default)]
    pub parents: Vec<String>,
}

impl DriveFile {
    /// Get size as u64.
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_ref().and_then(|s| s.parse().ok())
    }
}

/// Map a failed `send()` onto the error taxonomy.
fn transport_error(context: &str, err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Timeout(format!("{}: {}", context, err))
    } else {
        Error::Network(format!("{}: {}", context, err))
    }
}

/// Map a non-success HTTP status onto the error taxonomy.
///
/// Drive reports quota exhaustion as 403 with a rate limit reason, which
/// is retryable unlike a genuine permission failure.
pub fn status_error(status: StatusCode, body: &str) -> Error {
    let detail = format!("{} - {}", status, body);

    match status {
        StatusCode::UNAUTHORIZED => Error::Authentication(format!("Invalid or expired token: {}", detail)),
        StatusCode::FORBIDDEN
            if body.contains("rateLimitExceeded") || body.contains("userRateLimitExceeded") =>
        {
            Error::RateLimited(detail)
        }
        StatusCode::FORBIDDEN => Error::PermissionDenied(detail),
        StatusCode::NOT_FOUND => Error::NotFound(detail),
        StatusCode::TOO_MANY_REQUESTS => Error::RateLimited(detail),
        StatusCode::REQUEST_TIMEOUT => Error::Timeout(detail),
        s if s.is_server_error() => Error::Server(detail),
        _ => Error::Remote(detail),
    }
}

/// Build the `multipart/related` body for a metadata + media upload.
fn multipart_body(boundary: &str, metadata_json: &str, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + metadata_json.len() + 256);

    // Metadata part
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/json; charset=UTF-8\r\n\r\n");
    body.extend_from_slice(metadata_json.as_bytes());
    body.extend_from_slice(b"\r\n");

    // Data part
    body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(data);
    body.extend_from_slice(b"\r\n");

    // End boundary
    body.extend_from_slice(format!("--{}--", boundary).as_bytes());
    body
}

/// Google Drive API client.
pub struct DriveClient {
    http: Client,
    token_manager: Arc<TokenManager>,
}

impl DriveClient {
    /// Create a new Drive client.
    ///
    /// `request_timeout` bounds every single request, chunk uploads included.
    pub fn new(token_manager: Arc<TokenManager>, request_timeout: Duration) -> Result<Self> {
        // 308 is Drive's "resume incomplete", never a redirect to follow
        let http = Client::builder()
            .user_agent(concat!("driveup/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            token_manager,
        })
    }

    /// Get authorization header.
    async fn auth_header(&self) -> Result<String> {
        let token = self.token_manager.get_access_token().await?;
        Ok(format!("Bearer {}", token))
    }

    /// Create a folder.
    pub async fn create_folder(&self, name: &str, parent_id: Option<&str>) -> Result<DriveFile> {
        let url = format!("{}/files", DRIVE_API_BASE);
        let auth = self.auth_header().await?;

        let mut metadata = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME_TYPE
        });

        if let Some(parent) = parent_id {
            metadata["parents"] = serde_json::json!([parent]);
        }

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .query(&[("fields", FILE_FIELDS)])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| transport_error("Failed to create folder", e))?;

        self.handle_response(response).await
    }

    /// Upload a small file in a single multipart request.
    pub async fn upload_simple(
        &self,
        name: &str,
        parent_id: &str,
        data: Vec<u8>,
    ) -> Result<DriveFile> {
        let url = format!("{}/files", DRIVE_UPLOAD_BASE);
        let auth = self.auth_header().await?;

        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent_id]
        });
        let metadata_json = serde_json::to_string(&metadata)?;

        let boundary = format!("driveup-{}", uuid::Uuid::new_v4().simple());
        let body = multipart_body(&boundary, &metadata_json, &data);

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/related; boundary={}", boundary),
            )
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .body(body)
            .send()
            .await
            .map_err(|e| transport_error("Failed to upload file", e))?;

        self.handle_response(response).await
    }

    /// Start a resumable upload session.
    pub async fn start_resumable_upload(
        &self,
        name: &str,
        parent_id: &str,
        total_size: u64,
    ) -> Result<String> {
        let url = format!("{}/files", DRIVE_UPLOAD_BASE);
        let auth = self.auth_header().await?;

        let metadata = serde_json::json!({
            "name": name,
            "parents": [parent_id]
        });

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .header("X-Upload-Content-Length", total_size.to_string())
            .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| transport_error("Failed to start resumable upload", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(status, &body));
        }

        // Extract upload URI from Location header
        let upload_uri = response
            .headers()
            .get(header::LOCATION)
            .ok_or_else(|| Error::Remote("No upload URI in response".to_string()))?
            .to_str()
            .map_err(|e| Error::Remote(format!("Invalid upload URI: {}", e)))?
            .to_string();

        Ok(upload_uri)
    }

    /// Upload a chunk to a resumable upload session.
    ///
    /// Returns the file once the last chunk has been accepted.
    pub async fn upload_chunk(
        &self,
        upload_uri: &str,
        data: Vec<u8>,
        start_byte: u64,
        total_size: u64,
    ) -> Result<Option<DriveFile>> {
        let end_byte = start_byte + data.len() as u64 - 1;
        let content_range = format!("bytes {}-{}/{}", start_byte, end_byte, total_size);

        let response = self
            .http
            .put(upload_uri)
            .header(header::CONTENT_LENGTH, data.len().to_string())
            .header(header::CONTENT_RANGE, content_range)
            .body(data)
            .send()
            .await
            .map_err(|e| transport_error("Failed to upload chunk", e))?;

        let status = response.status();

        if status == StatusCode::OK || status == StatusCode::CREATED {
            let file: DriveFile = response
                .json()
                .await
                .map_err(|e| Error::Network(format!("Failed to parse upload response: {}", e)))?;
            Ok(Some(file))
        } else if status == StatusCode::PERMANENT_REDIRECT {
            // More chunks needed (308 Resume Incomplete)
            Ok(None)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, &body))
        }
    }

    /// Upload a large file using resumable upload, streaming it from disk.
    pub async fn upload_resumable(
        &self,
        name: &str,
        parent_id: &str,
        source: &Path,
        total_size: u64,
    ) -> Result<DriveFile> {
        let upload_uri = self
            .start_resumable_upload(name, parent_id, total_size)
            .await?;

        self.upload_chunks(&upload_uri, source, total_size)
            .await
            .map_err(|e| match e {
                Error::Network(detail) => Error::Network(format!("'{}': {}", name, detail)),
                other => other,
            })
    }

    /// Send `source` to an open upload session in `CHUNK_SIZE` pieces.
    ///
    /// Every chunk but the last is exactly `CHUNK_SIZE` bytes.
    async fn upload_chunks(&self, upload_uri: &str, source: &Path, total_size: u64) -> Result<DriveFile> {
        let file = tokio::fs::File::open(source).await?;
        let mut stream = ReaderStream::with_capacity(file, CHUNK_SIZE);

        let mut bytes_uploaded = 0u64;
        let mut buffer = Vec::with_capacity(CHUNK_SIZE);
        let mut finished = false;

        while !finished {
            match stream.next().await {
                Some(chunk) => buffer.extend_from_slice(&chunk?),
                None => finished = true,
            }

            // Full chunks go out as they fill; the tail goes out at end of file
            while buffer.len() >= CHUNK_SIZE || (finished && !buffer.is_empty()) {
                let take = buffer.len().min(CHUNK_SIZE);
                let chunk: Vec<u8> = buffer.drain(..take).collect();
                let len = chunk.len() as u64;

                if bytes_uploaded + len > total_size {
                    return Err(Error::Network(format!(
                        "File grew beyond the announced {} bytes during upload",
                        total_size
                    )));
                }

                let result = self
                    .upload_chunk(upload_uri, chunk, bytes_uploaded, total_size)
                    .await?;
                bytes_uploaded += len;

                if let Some(file) = result {
                    return Ok(file);
                }
            }
        }

        Err(Error::Network(format!(
            "Upload ended after {} of {} bytes without Drive acknowledging it",
            bytes_uploaded, total_size
        )))
    }

    /// Handle API response with error checking.
    async fn handle_response<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();

        if status.is_success() {
            response
                .json()
                .await
                .map_err(|e| Error::Network(format!("Failed to parse response: {}", e)))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(status_error(status, &body))
        }
    }
}
