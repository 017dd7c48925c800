//! HTTP API server.
//!
//! Exposes ingestion, retrieval, chat and user/file administration as a JSON
//! HTTP API. All long-lived collaborators (database pool, vector index,
//! embedding and LLM providers) are built once in [`AppState::new`] and
//! shared by every handler.
//!
//! # Endpoints
//!
//! | Method | Path | Auth | Description |
//! |--------|------|------|-------------|
//! | `GET`    | `/health` | | Health check (returns version) |
//! | `POST`   | `/v1/chat` | bearer | Access-aware chat completion |
//! | `POST`   | `/v1/chunks` | | Deduplicated sources relevant to a text |
//! | `POST`   | `/v1/most_relevant_chunk` | | Single best chunk, or `null` |
//! | `POST`   | `/v1/ingest/file` | | Multipart upload; records File/FileDoc rows |
//! | `POST`   | `/v1/ingest/text` | | Ingest raw text (no owning File) |
//! | `GET`    | `/v1/ingest/list` | | Ingested documents |
//! | `DELETE` | `/v1/ingest/{doc_id}` | | Remove one document |
//! | `GET`    | `/v1/files/` | | Files and their access levels |
//! | `PUT`    | `/v1/files/{file_name}` | | Change a file's access level |
//! | `DELETE` | `/v1/files/{file_name}` | | Remove a file and all its documents |
//! | `POST`   | `/v1/token` | | Password grant, returns a bearer token |
//! | `POST`   | `/v1/register` | | Create a user |
//! | `GET`    | `/v1/users` | | List users |
//! | `PUT`    | `/v1/users/{username}` | bearer | Change a user's access level |
//! | `DELETE` | `/v1/users/{username}` | | Remove a user |
//!
//! Errors use the contract documented in [`crate::error`].

use anyhow::Result;
use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{self, CurrentUser};
use crate::chat::{ChatOutcome, ChatRequest, ChatService};
use crate::config::Config;
use crate::embedding::create_provider;
use crate::error::ApiError;
use crate::extract::ExtractError;
use crate::files;
use crate::index::VectorIndex;
use crate::ingest::IngestService;
use crate::llm::create_llm;
use crate::models::{Chunk, ContextFilter, File, IngestedDoc, Source, UserView};
use crate::retrieval::{curate_sources, ChunksService};
use crate::users;
use crate::{db, migrate};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub pool: SqlitePool,
    pub index: Arc<VectorIndex>,
    pub ingest: Arc<IngestService>,
    pub chunks: Arc<ChunksService>,
    pub chat: Arc<ChatService>,
}

impl AppState {
    /// Connect the credential store, run migrations, load (or create) the
    /// vector index and construct the providers named in `config`.
    pub async fn new(config: Config) -> Result<Self> {
        let pool = db::connect(&config).await?;
        migrate::run_migrations(&pool).await?;

        let index = Arc::new(VectorIndex::open(&config.storage.persist_dir).await?);
        let embedder = create_provider(&config.embedding)?;
        let llm = create_llm(&config.llm)?;
        tracing::info!(
            embedding = %config.embedding.provider,
            embedding_model = embedder.model_name(),
            llm = llm.name(),
            llm_model = llm.model(),
            "providers ready"
        );

        let ingest = Arc::new(IngestService::new(
            index.clone(),
            embedder.clone(),
            config.chunking.clone(),
        ));
        let chunks = Arc::new(ChunksService::new(
            index.clone(),
            embedder,
            config.retrieval.most_relevant_window,
        ));
        let chat = Arc::new(ChatService::new(
            pool.clone(),
            chunks.clone(),
            llm,
            config.retrieval.clone(),
            config.auth.access_policy,
            config.prompt.default_system_prompt.clone(),
        ));

        Ok(Self {
            config: Arc::new(config),
            pool,
            index,
            ingest,
            chunks,
            chat,
        })
    }
}

/// Starts the HTTP server on `[server].bind` and runs until the process is
/// terminated.
pub async fn run_server(config: Config) -> Result<()> {
    let bind_addr = config.server.bind.clone();
    let state = AppState::new(config).await?;
    let listener = TcpListener::bind(&bind_addr).await?;
    serve(listener, state).await
}

/// Serve the API on an already bound listener.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    tracing::info!(addr = %listener.local_addr()?, "authrag listening");
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let mut app = Router::new()
        .route("/health", get(handle_health))
        .route("/v1/chat", post(handle_chat))
        .route("/v1/chunks", post(handle_chunks))
        .route("/v1/most_relevant_chunk", post(handle_most_relevant_chunk))
        .route("/v1/ingest/file", post(handle_ingest_file))
        .route("/v1/ingest/text", post(handle_ingest_text))
        .route("/v1/ingest/list", get(handle_list_ingested))
        .route("/v1/ingest/{doc_id}", axum::routing::delete(handle_delete_ingested))
        .route("/v1/files", get(handle_list_files))
        .route("/v1/files/", get(handle_list_files))
        .route(
            "/v1/files/{file_name}",
            put(handle_update_file).delete(handle_delete_file),
        )
        .route("/v1/token", post(handle_token))
        .route("/v1/register", post(handle_register))
        .route("/v1/users", get(handle_list_users))
        .route(
            "/v1/users/{username}",
            put(handle_update_user).delete(handle_delete_user),
        )
        .layer(DefaultBodyLimit::max(state.config.ingest.max_upload_bytes))
        .layer(TraceLayer::new_for_http());

    if state.config.server.cors_enabled {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);
        app = app.layer(cors);
    }

    app.with_state(state)
}

/// JSON body extractor whose rejections use the API error contract.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
struct ApiJson<T>(T);

/// Form body extractor whose rejections use the API error contract.
#[derive(FromRequest)]
#[from_request(via(axum::Form), rejection(ApiError))]
struct ApiForm<T>(T);

/// Multipart extractor whose rejections use the API error contract.
struct ApiMultipart(Multipart);

impl<S: Send + Sync> FromRequest<S> for ApiMultipart {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Ok(Self(Multipart::from_request(req, state).await?))
    }
}

#[derive(Serialize)]
struct MessageResponse {
    message: String,
}

impl MessageResponse {
    fn new(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            message: message.into(),
        })
    }
}

/// Extraction failures are the caller's fault; everything else is ours.
fn ingest_error(err: anyhow::Error) -> ApiError {
    match err.downcast::<ExtractError>() {
        Ok(extract) => extract.into(),
        Err(other) => ApiError::Internal(other),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /v1/chat ============

#[derive(Deserialize)]
struct CompletionsBody {
    prompt: String,
    #[serde(default)]
    system_prompt: Option<String>,
    /// Accepted for client compatibility; context is always used.
    #[serde(default)]
    #[allow(dead_code)]
    use_context: bool,
    #[serde(default)]
    context_filter: Option<ContextFilter>,
    #[serde(default = "default_include_sources")]
    include_sources: bool,
    /// Accepted for client compatibility; responses are never streamed.
    #[serde(default)]
    #[allow(dead_code)]
    stream: bool,
}

fn default_include_sources() -> bool {
    true
}

/// Handler for `POST /v1/chat`.
///
/// Answers from the documents the caller may read. When relevant documents
/// exist above the caller's reach, the system prompt names someone who can
/// read them.
async fn handle_chat(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    ApiJson(body): ApiJson<CompletionsBody>,
) -> Result<Json<ChatOutcome>, ApiError> {
    if body.prompt.trim().is_empty() {
        return Err(ApiError::bad_request("prompt must not be empty"));
    }
    let request = ChatRequest {
        prompt: body.prompt,
        system_prompt: body.system_prompt,
        context_filter: body.context_filter,
        include_sources: body.include_sources,
    };
    Ok(Json(state.chat.chat(&user, request).await?))
}

// ============ POST /v1/chunks, /v1/most_relevant_chunk ============

#[derive(Deserialize)]
struct ChunksBody {
    text: String,
}

async fn handle_chunks(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ChunksBody>,
) -> Result<Json<Vec<Source>>, ApiError> {
    let chunks = state
        .chunks
        .retrieve_relevant(&body.text, state.config.retrieval.chunks_limit, None)
        .await?;
    Ok(Json(curate_sources(&chunks)))
}

async fn handle_most_relevant_chunk(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<ChunksBody>,
) -> Result<Json<Option<Chunk>>, ApiError> {
    Ok(Json(state.chunks.retrieve_most_relevant(&body.text, None).await?))
}

// ============ /v1/ingest ============

#[derive(Serialize)]
struct IngestResponse {
    object: &'static str,
    model: &'static str,
    data: Vec<IngestedDoc>,
}

impl IngestResponse {
    fn list(data: Vec<IngestedDoc>) -> Json<Self> {
        Json(Self {
            object: "list",
            model: "authrag",
            data,
        })
    }
}

/// Handler for `POST /v1/ingest/file`.
///
/// Expects a multipart field named `file`. New files are registered at
/// `[ingest].default_access_level`; re-uploads keep the file's level.
async fn handle_ingest_file(
    State(state): State<AppState>,
    ApiMultipart(mut multipart): ApiMultipart,
) -> Result<Json<IngestResponse>, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| ApiError::bad_request("No file name provided"))?;
        let bytes = field.bytes().await?;

        let docs = state
            .ingest
            .ingest_bin_data(&file_name, &bytes)
            .await
            .map_err(ingest_error)?;

        state
            .ingest
            .record_or_undo(&state.pool, &docs, state.config.ingest.default_access_level)
            .await?;
        return Ok(IngestResponse::list(docs));
    }
    Err(ApiError::bad_request("missing multipart field `file`"))
}

#[derive(Deserialize)]
struct IngestTextBody {
    file_name: String,
    text: String,
}

async fn handle_ingest_text(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<IngestTextBody>,
) -> Result<Json<IngestResponse>, ApiError> {
    if body.file_name.trim().is_empty() {
        return Err(ApiError::bad_request("No file name provided"));
    }
    let docs = state
        .ingest
        .ingest_text(&body.file_name, &body.text)
        .await
        .map_err(ingest_error)?;
    Ok(IngestResponse::list(docs))
}

async fn handle_list_ingested(State(state): State<AppState>) -> Json<IngestResponse> {
    IngestResponse::list(state.ingest.list_ingested().await)
}

/// Handler for `DELETE /v1/ingest/{doc_id}`. Unknown ids succeed.
async fn handle_delete_ingested(
    State(state): State<AppState>,
    Path(doc_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.ingest.delete(&doc_id).await?;
    files::forget_doc(&state.pool, &doc_id).await?;
    Ok(StatusCode::OK)
}

// ============ /v1/files ============

#[derive(Deserialize)]
struct AccessLevelBody {
    access_level: i64,
}

async fn handle_list_files(State(state): State<AppState>) -> Result<Json<Vec<File>>, ApiError> {
    Ok(Json(files::list_files(&state.pool).await?))
}

async fn handle_update_file(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
    ApiJson(body): ApiJson<AccessLevelBody>,
) -> Result<Json<File>, ApiError> {
    files::update_access_level(&state.pool, &file_name, body.access_level)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found("File not found"))
}

/// Handler for `DELETE /v1/files/{file_name}`.
///
/// Removes the File and its FileDoc rows in one transaction, then drops each
/// of its documents from the index.
async fn handle_delete_file(
    State(state): State<AppState>,
    Path(file_name): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    let doc_ids = files::delete_file(&state.pool, &file_name)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("File '{}' not found", file_name)))?;

    for doc_id in &doc_ids {
        state.ingest.delete(doc_id).await?;
    }
    tracing::info!(file_name = %file_name, documents = doc_ids.len(), "deleted file");

    Ok(MessageResponse::new(format!(
        "File '{}' and related docs deleted successfully",
        file_name
    )))
}

// ============ POST /v1/token ============

#[derive(Deserialize)]
struct TokenForm {
    username: String,
    password: String,
}

#[derive(Serialize)]
struct TokenResponse {
    access_token: String,
    token_type: &'static str,
}

async fn handle_token(
    State(state): State<AppState>,
    ApiForm(form): ApiForm<TokenForm>,
) -> Result<Json<TokenResponse>, ApiError> {
    let user = users::authenticate(&state.pool, &form.username, &form.password)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Incorrect username or password"))?;

    let auth_config = &state.config.auth;
    let access_token = auth::create_token(
        &auth_config.secret,
        &user.username,
        auth_config.token_expire_minutes,
    )?;

    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer",
    }))
}

// ============ /v1/register, /v1/users ============

#[derive(Deserialize)]
struct RegisterBody {
    username: String,
    password: String,
    access_level: i64,
}

async fn handle_register(
    State(state): State<AppState>,
    ApiJson(body): ApiJson<RegisterBody>,
) -> Result<Json<UserView>, ApiError> {
    if body.username.trim().is_empty() {
        return Err(ApiError::bad_request("username must not be empty"));
    }
    if body.password.is_empty() {
        return Err(ApiError::bad_request("password must not be empty"));
    }
    let user = users::create_user(&state.pool, &body.username, &body.password, body.access_level)
        .await?
        .ok_or_else(|| ApiError::conflict("Username already registered"))?;
    Ok(Json(UserView::from(&user)))
}

async fn handle_list_users(State(state): State<AppState>) -> Result<Json<Vec<UserView>>, ApiError> {
    let all = users::list_users(&state.pool).await?;
    Ok(Json(all.iter().map(UserView::from).collect()))
}

/// Handler for `PUT /v1/users/{username}`. Any authenticated user may call
/// it; the path names the target.
async fn handle_update_user(
    State(state): State<AppState>,
    CurrentUser(caller): CurrentUser,
    Path(username): Path<String>,
    ApiJson(body): ApiJson<AccessLevelBody>,
) -> Result<Json<UserView>, ApiError> {
    let user = users::update_access_level(&state.pool, &username, body.access_level)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;
    tracing::info!(
        caller = %caller.username,
        username = %user.username,
        access_level = user.access_level,
        "updated user access level"
    );
    Ok(Json(UserView::from(&user)))
}

async fn handle_delete_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<MessageResponse>, ApiError> {
    if users::delete_user(&state.pool, &username).await? {
        Ok(MessageResponse::new("User deleted"))
    } else {
        Err(ApiError::not_found("User not found"))
    }
}
