//! Pin endpoint: store raw bytes or a gzip'd tarball of files under a
//! bearer token issued by this node.

use std::io::Read;

use async_compression::tokio::bufread::GzipDecoder;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::Json;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tracing::info;

use skein_shared::token;
use skein_shared::types::BlockHash;

use crate::api::AppState;
use crate::error::ServerError;

#[derive(Debug, Serialize, Deserialize)]
pub struct PinResponse {
    pub id: String,
}

/// Stored in place of a pinned archive.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PinManifest {
    pub files: Vec<PinnedFile>,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PinnedFile {
    pub name: String,
    pub id: String,
    pub size: u64,
}

/// Check the `Authorization: Bearer` header against this node's key.
fn authorize(headers: &HeaderMap, state: &AppState) -> Result<token::Claims, ServerError> {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let bearer = auth.strip_prefix("Bearer ").unwrap_or("");

    Ok(token::validate(
        bearer,
        &state.node.peer_id(),
        &state.config.pin_audience,
    )?)
}

pub async fn pin(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<PinResponse>), ServerError> {
    let claims = authorize(&headers, &state)?;

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    let id = match essence.as_str() {
        "application/octet-stream" => {
            if body.is_empty() {
                return Err(ServerError::BadRequest("Empty body".to_string()));
            }
            state.node.store().store(&body).await?
        }
        "application/gzip" | "application/x-gzip" => pin_archive(&state, &body).await?,
        other => {
            return Err(ServerError::BadRequest(format!(
                "Unsupported content type '{other}'"
            )))
        }
    };

    info!(
        id = %id.short(),
        subject = %claims.subject,
        size = body.len(),
        "Pinned content"
    );
    Ok((StatusCode::CREATED, Json(PinResponse { id: id.to_hex() })))
}

async fn pin_archive(state: &AppState, body: &[u8]) -> Result<BlockHash, ServerError> {
    let max = state.config.max_pin_size;

    let mut tarball = Vec::new();
    GzipDecoder::new(body)
        .take(max as u64 + 1)
        .read_to_end(&mut tarball)
        .await
        .map_err(|e| ServerError::BadRequest(format!("Invalid gzip stream: {e}")))?;
    if tarball.len() > max {
        return Err(ServerError::PayloadTooLarge {
            size: tarball.len(),
            max,
        });
    }

    let entries = unpack(&tarball)?;
    if entries.is_empty() {
        return Err(ServerError::BadRequest("Archive contains no files".to_string()));
    }

    let mut manifest = PinManifest { files: Vec::new() };
    for (name, data) in entries {
        let size = data.len() as u64;
        let id = state.node.store().store(&data).await?;
        manifest.files.push(PinnedFile {
            name,
            id: id.to_hex(),
            size,
        });
    }

    let encoded = serde_json::to_vec(&manifest)
        .map_err(|e| ServerError::Internal(format!("Failed to encode manifest: {e}")))?;
    Ok(state.node.store().store(&encoded).await?)
}

/// Regular files of a tar archive, in archive order. Anything else is
/// rejected.
fn unpack(tarball: &[u8]) -> Result<Vec<(String, Vec<u8>)>, ServerError> {
    let bad = |e: std::io::Error| ServerError::BadRequest(format!("Invalid tar archive: {e}"));

    let mut archive = tar::Archive::new(tarball);
    let mut files = Vec::new();
    for entry in archive.entries().map_err(bad)? {
        let mut entry = entry.map_err(bad)?;
        let entry_type = entry.header().entry_type();
        let name = entry.path().map_err(bad)?.to_string_lossy().into_owned();

        if entry_type.is_dir() {
            return Err(ServerError::BadRequest(format!(
                "Directories are not supported: {name}"
            )));
        }
        if !entry_type.is_file() {
            return Err(ServerError::BadRequest(format!(
                "Unsupported archive entry: {name}"
            )));
        }
        if name.is_empty() || name.split('/').any(|c| c == "..") {
            return Err(ServerError::BadRequest(format!("Invalid file name: {name}")));
        }

        let mut data = Vec::new();
        entry.read_to_end(&mut data).map_err(bad)?;
        files.push((name, data));
    }
    Ok(files)
}
