use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use skein_core::{BlockStore, FsBlockStore, NewThread, Node};
use skein_shared::constants::{HTTP_API_VERSION, PEER_HEADER};
use skein_shared::invite::InviteCode;
use skein_shared::types::{BlockHash, PeerId, ThreadId, ThreadType};
use skein_store::{BlockRecord, ContactRecord, ThreadRecord};

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::{pin, updates};

#[derive(Clone)]
pub struct AppState {
    pub node: Arc<Node>,
    /// Objects held on this machine, served to peers.
    pub blocks: Arc<FsBlockStore>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let api = Router::new()
        .route(
            "/pin",
            post(pin::pin).layer(DefaultBodyLimit::max(state.config.max_pin_size)),
        )
        .route(
            "/inbox",
            post(inbox).layer(DefaultBodyLimit::max(state.config.max_block_size)),
        )
        .route("/blocks/:hash", get(block_bytes))
        .route("/blocks/:hash/comments", post(add_comment))
        .route("/blocks/:hash/likes", post(add_like))
        .route("/blocks/:hash/ignore", post(ignore_block))
        .route("/profile", get(get_profile).put(set_profile))
        .route("/contacts", get(list_contacts).post(add_contact))
        .route("/threads", get(list_threads).post(add_thread))
        .route("/threads/default", get(default_thread))
        .route("/threads/:id", get(get_thread).delete(remove_thread))
        .route("/threads/:id/blocks", get(thread_blocks))
        .route("/threads/:id/peers", get(thread_peers))
        .route("/threads/:id/messages", post(add_message))
        .route("/threads/:id/files", post(add_files))
        .route("/threads/:id/announce", post(announce))
        .route("/threads/:id/invites", post(add_invite))
        .route("/threads/:id/updates", get(updates::thread_updates))
        .route("/invites", get(list_invites).post(accept_external_invite))
        .route("/invites/:id/accept", post(accept_invite));

    Router::new()
        .route("/", get(index))
        .route("/health", get(health_check))
        .nest(&format!("/api/{HTTP_API_VERSION}"), api)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn parse_hash(s: &str) -> Result<BlockHash, ServerError> {
    BlockHash::from_hex(s).map_err(|e| ServerError::BadRequest(e.to_string()))
}

#[derive(Serialize, Deserialize)]
pub struct IdResponse {
    pub id: String,
}

fn created(id: BlockHash) -> (StatusCode, Json<IdResponse>) {
    (StatusCode::CREATED, Json(IdResponse { id: id.to_hex() }))
}

// ─── Node ───

#[derive(Serialize)]
struct IndexResponse {
    api_version: &'static str,
    node_version: &'static str,
    peer_id: PeerId,
}

async fn index(State(state): State<AppState>) -> Json<IndexResponse> {
    Json(IndexResponse {
        api_version: HTTP_API_VERSION,
        node_version: env!("CARGO_PKG_VERSION"),
        peer_id: state.node.peer_id(),
    })
}

async fn health_check() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Peer transport ingress.
async fn inbox(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ServerError> {
    let from = headers
        .get(PEER_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::BadRequest(format!("Missing {PEER_HEADER} header")))?;
    let from = PeerId::from_hex(from).map_err(|e| ServerError::BadRequest(e.to_string()))?;

    state.node.receive(from, &body).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn block_bytes(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let hash = parse_hash(&hash)?;
    let data = state.blocks.fetch(&hash).await?;
    Ok(([(header::CONTENT_TYPE, "application/octet-stream")], data))
}

// ─── Contacts ───

#[derive(Deserialize)]
struct ProfileRequest {
    username: String,
    avatar: Option<String>,
    inbox: Option<String>,
}

async fn get_profile(State(state): State<AppState>) -> Result<Json<ContactRecord>, ServerError> {
    state
        .node
        .profile()?
        .map(Json)
        .ok_or_else(|| ServerError::NotFound("No profile set".to_string()))
}

async fn set_profile(
    State(state): State<AppState>,
    Json(req): Json<ProfileRequest>,
) -> Result<Json<ContactRecord>, ServerError> {
    if req.username.trim().is_empty() {
        return Err(ServerError::BadRequest("Username is empty".to_string()));
    }
    let inbox = req.inbox.or_else(|| state.config.public_url.clone());
    let contact = state.node.set_profile(req.username.trim(), req.avatar, inbox)?;
    Ok(Json(contact))
}

#[derive(Deserialize)]
struct ContactRequest {
    peer_id: PeerId,
    username: String,
    avatar: Option<String>,
    inbox: Option<String>,
}

async fn list_contacts(
    State(state): State<AppState>,
) -> Result<Json<Vec<ContactRecord>>, ServerError> {
    Ok(Json(state.node.contacts()?))
}

async fn add_contact(
    State(state): State<AppState>,
    Json(req): Json<ContactRequest>,
) -> Result<StatusCode, ServerError> {
    state.node.add_contact(ContactRecord {
        peer_id: req.peer_id,
        username: req.username,
        avatar: req.avatar,
        inbox: req.inbox,
        updated_at: Utc::now(),
    })?;
    Ok(StatusCode::NO_CONTENT)
}

// ─── Threads ───

#[derive(Deserialize)]
struct AddThreadRequest {
    name: String,
    key: Option<String>,
    #[serde(rename = "type")]
    thread_type: Option<ThreadType>,
    schema: Option<String>,
}

#[derive(Serialize)]
struct ThreadView {
    #[serde(flatten)]
    thread: ThreadRecord,
    block_count: u64,
    peers: Vec<PeerId>,
}

async fn add_thread(
    State(state): State<AppState>,
    Json(req): Json<AddThreadRequest>,
) -> Result<(StatusCode, Json<ThreadRecord>), ServerError> {
    if req.name.trim().is_empty() {
        return Err(ServerError::BadRequest("Thread name is empty".to_string()));
    }
    let thread = state
        .node
        .add_thread(NewThread {
            name: req.name,
            key: req.key,
            thread_type: req.thread_type.unwrap_or(ThreadType::Private),
            schema: req.schema,
        })
        .await?;
    info!(thread = %thread.id, "Thread added via API");
    Ok((StatusCode::CREATED, Json(thread)))
}

async fn list_threads(
    State(state): State<AppState>,
) -> Result<Json<Vec<ThreadRecord>>, ServerError> {
    Ok(Json(state.node.threads().await?))
}

async fn thread_view(state: &AppState, id: &ThreadId) -> Result<ThreadView, ServerError> {
    let thread = state.node.thread(id)?;
    Ok(ThreadView {
        thread: thread.info().await,
        block_count: state.node.index().count_blocks(id)?,
        peers: thread.peers()?,
    })
}

async fn get_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ThreadView>, ServerError> {
    Ok(Json(thread_view(&state, &ThreadId(id)).await?))
}

/// The thread named by `DEFAULT_THREAD`, by id or key.
async fn default_thread(State(state): State<AppState>) -> Result<Json<ThreadView>, ServerError> {
    let wanted = state
        .config
        .default_thread
        .as_deref()
        .ok_or_else(|| ServerError::NotFound("No default thread configured".to_string()))?;
    let id = match state.node.index().thread_by_key(wanted)? {
        Some(record) => record.id,
        None => ThreadId::from(wanted),
    };
    Ok(Json(thread_view(&state, &id).await?))
}

async fn remove_thread(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<IdResponse>, ServerError> {
    let leave = state.node.remove_thread(&ThreadId(id)).await?;
    Ok(Json(IdResponse { id: leave.to_hex() }))
}

#[derive(Deserialize)]
struct Page {
    #[serde(default)]
    offset: u32,
    #[serde(default = "default_limit")]
    limit: u32,
}

fn default_limit() -> u32 {
    50
}

async fn thread_blocks(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<BlockRecord>>, ServerError> {
    Ok(Json(state.node.blocks(&ThreadId(id), page.offset, page.limit)?))
}

async fn thread_peers(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<PeerId>>, ServerError> {
    Ok(Json(state.node.peers(&ThreadId(id))?))
}

#[derive(Deserialize)]
struct MessageRequest {
    body: String,
}

async fn add_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<MessageRequest>,
) -> Result<(StatusCode, Json<IdResponse>), ServerError> {
    let hash = state.node.add_message(&ThreadId(id), &req.body).await?;
    Ok(created(hash))
}

#[derive(Deserialize)]
struct FilesRequest {
    /// Root of the file graph the block points at.
    target: String,
    caption: Option<String>,
    /// Per-file decryption keys by path.
    #[serde(default)]
    keys: BTreeMap<String, String>,
}

async fn add_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<FilesRequest>,
) -> Result<(StatusCode, Json<IdResponse>), ServerError> {
    let keys = req.keys.into_iter().collect();
    let hash = state
        .node
        .add_files(&ThreadId(id), &req.target, req.caption, keys)
        .await?;
    Ok(created(hash))
}

async fn add_comment(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Json(req): Json<MessageRequest>,
) -> Result<(StatusCode, Json<IdResponse>), ServerError> {
    let hash = state.node.add_comment(&parse_hash(&hash)?, &req.body).await?;
    Ok(created(hash))
}

async fn add_like(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<(StatusCode, Json<IdResponse>), ServerError> {
    let hash = state.node.add_like(&parse_hash(&hash)?).await?;
    Ok(created(hash))
}

async fn ignore_block(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<(StatusCode, Json<IdResponse>), ServerError> {
    let hash = state.node.ignore(&parse_hash(&hash)?).await?;
    Ok(created(hash))
}

async fn announce(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<IdResponse>), ServerError> {
    let hash = state.node.announce(&ThreadId(id)).await?;
    Ok(created(hash))
}

// ─── Invites ───

#[derive(Deserialize)]
struct InviteRequest {
    /// Invite a known peer directly; without it an external invite code is
    /// created.
    peer: Option<PeerId>,
}

#[derive(Serialize, Deserialize)]
pub struct InviteResponse {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

async fn add_invite(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<InviteRequest>,
) -> Result<(StatusCode, Json<InviteResponse>), ServerError> {
    let id = ThreadId(id);
    let response = match req.peer {
        Some(peer) => {
            let block = state.node.add_invite(&id, peer).await?;
            InviteResponse {
                id: block.to_hex(),
                code: None,
            }
        }
        None => {
            let code = state.node.add_external_invite(&id).await?;
            let encoded = code
                .encode()
                .map_err(|e| ServerError::Internal(e.to_string()))?;
            InviteResponse {
                id: code.id.to_hex(),
                code: Some(encoded),
            }
        }
    };
    Ok((StatusCode::CREATED, Json(response)))
}

#[derive(Serialize)]
struct PendingInvite {
    id: BlockHash,
    inviter: PeerId,
    thread_id: ThreadId,
    thread_name: String,
}

async fn list_invites(
    State(state): State<AppState>,
) -> Result<Json<Vec<PendingInvite>>, ServerError> {
    let invites = state
        .node
        .invites()?
        .into_iter()
        .map(|i| PendingInvite {
            id: i.block,
            inviter: i.inviter,
            thread_id: i.thread.id,
            thread_name: i.thread.name,
        })
        .collect();
    Ok(Json(invites))
}

async fn accept_invite(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<IdResponse>), ServerError> {
    let join = state.node.accept_invite(&parse_hash(&id)?).await?;
    Ok(created(join))
}

#[derive(Deserialize)]
struct AcceptRequest {
    code: String,
}

async fn accept_external_invite(
    State(state): State<AppState>,
    Json(req): Json<AcceptRequest>,
) -> Result<(StatusCode, Json<IdResponse>), ServerError> {
    let code = InviteCode::decode(&req.code).map_err(|e| ServerError::BadRequest(e.to_string()))?;
    let join = state.node.accept_external_invite(&code).await?;
    Ok(created(join))
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
