//! HTTP and websocket transport.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `POST` | `/` | Upload a document (multipart field `file`) and ingest it |
//! | `POST` | `/text` | `{"message": ...}` → streamed `text/plain` answer |
//! | `POST` | `/audio` | `{"message": ...}` → streamed audio answer |
//! | `GET`  | `/socket_audio` | Websocket session, one turn per text frame |
//! | `GET`  | `/health` | Status, version and memory counts |
//! | `GET`  | `/documents` | Ingested documents with chunk counts |
//!
//! # Error Contract
//!
//! Failures that happen before a response starts are returned as:
//!
//! ```json
//! { "error": { "code": "load_error", "message": "unsupported document format: .png" } }
//! ```
//!
//! Error codes: `bad_request` (400), `load_error` (422), `embedding_error` (502),
//! `generation_error` (502), `timeout` (504), `internal` (500).
//!
//! A failure after the first streamed byte aborts the response body; the
//! client sees the connection end early.
//!
//! # Websocket protocol
//!
//! Each text frame `"<prefix>:<message><terminator>"` starts a turn. The
//! server answers with binary audio frames as they are synthesized, then one
//! text frame holding the full generated text. A malformed frame is logged
//! and skipped; the connection stays open.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        DefaultBodyLimit, Multipart, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use futures::{SinkExt, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

use crate::context::AppContext;
use crate::error::{EmbeddingError, Error, GenerationError, LoadError};
use crate::ingest::ingest_upload;
use crate::models::{DocumentSummary, IngestReport};
use crate::orchestrator::Outbound;
use crate::session::SessionState;

/// Shared state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
struct AppState {
    ctx: Arc<AppContext>,
    /// Cancelled when the process shuts down; each websocket derives a
    /// child token from it.
    shutdown: CancellationToken,
}

/// Builds the router with all routes and layers.
pub fn router(ctx: Arc<AppContext>, shutdown: CancellationToken) -> Router {
    let body_limit = usize::try_from(ctx.config.ingest.max_file_bytes)
        .unwrap_or(usize::MAX)
        .saturating_add(64 * 1024);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(handle_upload))
        .route("/text", post(handle_text))
        .route("/audio", post(handle_audio))
        .route("/socket_audio", get(handle_socket_audio))
        .route("/health", get(handle_health))
        .route("/documents", get(handle_documents))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(AppState { ctx, shutdown })
}

/// Serves until `shutdown` is cancelled, then clears the process state.
pub async fn run_server(ctx: Arc<AppContext>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let bind_addr = ctx.config.server.bind.clone();
    let app = router(Arc::clone(&ctx), shutdown.clone());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    ctx.shutdown();
    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

#[derive(Debug)]
struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request",
        message: message.into(),
    }
}

impl From<Error> for AppError {
    fn from(err: Error) -> Self {
        let message = err.to_string();
        let (status, code) = match &err {
            Error::Load(LoadError::InvalidName(_)) | Error::Transport(_) => {
                (StatusCode::BAD_REQUEST, "bad_request")
            }
            Error::Load(LoadError::Io { .. }) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
            Error::Load(_) => (StatusCode::UNPROCESSABLE_ENTITY, "load_error"),
            Error::Embedding(EmbeddingError::DimensionMismatch { .. }) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
            Error::Embedding(_) => (StatusCode::BAD_GATEWAY, "embedding_error"),
            Error::Generation(GenerationError::Timeout(_)) => {
                (StatusCode::GATEWAY_TIMEOUT, "timeout")
            }
            Error::Generation(_) => (StatusCode::BAD_GATEWAY, "generation_error"),
        };
        AppError {
            status,
            code,
            message,
        }
    }
}

// ============ POST / ============

async fn handle_upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<IngestReport>, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| bad_request("file field has no file name"))?;
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(e.to_string()))?;

        let report = ingest_upload(&state.ctx, &file_name, &bytes)
            .await
            .map_err(|e| {
                warn!(file = %file_name, error = %e, "upload failed");
                AppError::from(e)
            })?;
        return Ok(Json(report));
    }
    Err(bad_request("multipart field 'file' is required"))
}

// ============ POST /text, POST /audio ============

#[derive(Debug, Deserialize)]
struct QueryRequest {
    message: String,
}

/// Logs a mid-stream failure before hyper aborts the body.
fn log_stream_errors<T, S>(route: &'static str, stream: S) -> impl Stream<Item = Result<T, GenerationError>>
where
    S: Stream<Item = Result<T, GenerationError>>,
{
    stream.inspect(move |item| {
        if let Err(e) = item {
            warn!(route, error = %e, "stream ended early");
        }
    })
}

async fn handle_text(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Response, AppError> {
    let stream = state.ctx.orchestrator().respond_text(&req.message).await?;
    let body = Body::from_stream(log_stream_errors("/text", stream.map(|r| r.map(Bytes::from))));
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], body).into_response())
}

async fn handle_audio(
    State(state): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Response, AppError> {
    let stream = state.ctx.orchestrator().respond_audio(&req.message).await?;
    let media_type = state.ctx.engine.media_type().to_string();
    let body = Body::from_stream(log_stream_errors("/audio", stream));
    Ok(([(header::CONTENT_TYPE, media_type)], body).into_response())
}

// ============ GET /socket_audio ============

async fn handle_socket_audio(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Drives one websocket connection.
///
/// A reader task forwards text frames over a channel and cancels the
/// connection token when the client goes away; a writer task owns the
/// socket's send half. The turn loop races every turn against the token,
/// so a disconnect drops the in-flight generation.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let ctx = state.ctx;
    let connection_id = ctx.connections.connect();
    let session = SessionState::new(connection_id);
    let closed = state.shutdown.child_token();

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (frame_tx, mut frame_rx) = tokio::sync::mpsc::channel::<String>(16);
    let reader = {
        let closed = closed.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_receiver.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if frame_tx.send(text.to_string()).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
            closed.cancel();
        })
    };

    let (mut out_tx, mut out_rx) = futures::channel::mpsc::channel::<Outbound>(32);
    let writer = tokio::spawn(async move {
        while let Some(out) = out_rx.next().await {
            let msg = match out {
                Outbound::Audio(bytes) => Message::Binary(bytes),
                Outbound::Text(text) => Message::Text(text.into()),
            };
            if ws_sender.send(msg).await.is_err() {
                break;
            }
        }
    });

    let orchestrator = ctx.orchestrator();
    loop {
        let frame = tokio::select! {
            _ = closed.cancelled() => break,
            frame = frame_rx.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        tokio::select! {
            _ = closed.cancelled() => {
                debug!(connection_id = %connection_id, "client left mid-turn");
                break;
            }
            result = orchestrator.run_turn(&session, &frame, &mut out_tx) => {
                if let Err(e) = result {
                    warn!(connection_id = %connection_id, error = %e, "turn failed");
                }
            }
        }
    }

    ctx.connections.disconnect(&connection_id);
    reader.abort();
    drop(out_tx);
    let _ = writer.await;
}

// ============ GET /health, GET /documents ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    documents: usize,
    chunks: usize,
    current_document: Option<String>,
    connections: usize,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let ctx = &state.ctx;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        documents: ctx.memory.documents().len(),
        chunks: ctx.memory.len(),
        current_document: ctx.current_document(),
        connections: ctx.connections.len(),
    })
}

#[derive(Serialize)]
struct DocumentsResponse {
    documents: Vec<DocumentSummary>,
}

async fn handle_documents(State(state): State<AppState>) -> Json<DocumentsResponse> {
    Json(DocumentsResponse {
        documents: state.ctx.memory.documents(),
    })
}
