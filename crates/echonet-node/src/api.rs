//! HTTP API for an Echo-Net node.
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | GET | `/` | Platform info |
//! | GET | `/health` | Liveness |
//! | GET | `/api/status` | Network status |
//! | GET | `/api/proposals` | Active proposals |
//! | POST | `/api/proposals` | Create and announce a proposal |
//! | GET | `/api/proposals/{id}` | One active or finished proposal |
//! | DELETE | `/api/proposals/{id}` | Withdraw an own proposal |
//! | POST | `/api/proposals/{id}/votes` | Vote and share the vote |
//! | POST | `/api/messages` | Send a text message to a peer |
//! | GET | `/api/history` | Echo log and finished proposals |

use crate::error::NodeError;
use crate::node::EchoNode;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use echonet_consensus::{ConsensusError, ProposalId};
use echonet_types::NodeId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The local node.
    pub node: Arc<EchoNode>,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// A node operation failed.
    #[error(transparent)]
    Node(#[from] NodeError),
    /// The requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// The request was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl ApiError {
    fn reason(&self) -> &'static str {
        match self {
            Self::Node(e) => e.reason_code(),
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
        }
    }

    fn status(&self) -> StatusCode {
        match self.reason() {
            "not_found" | "proposal_not_found" | "peer_unknown" => StatusCode::NOT_FOUND,
            "proposal_expired" => StatusCode::GONE,
            "bad_request" | "invalid_vote" | "invalid_proposal" | "invalid_message" => {
                StatusCode::BAD_REQUEST
            }
            "not_proposer" => StatusCode::FORBIDDEN,
            "not_connected" | "transport_unavailable" => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse {
            error: self.to_string(),
            reason: self.reason(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    reason: &'static str,
}

/// Request to create a proposal.
#[derive(Debug, Deserialize)]
pub struct CreateProposalRequest {
    /// Title.
    pub title: String,
    /// Description.
    #[serde(default)]
    pub description: String,
    /// Type tag.
    #[serde(default = "default_proposal_type")]
    pub proposal_type: String,
    /// Lifetime in seconds; the node default when absent.
    #[serde(default)]
    pub duration_secs: Option<i64>,
}

fn default_proposal_type() -> String {
    "general".into()
}

/// Request to vote on a proposal.
#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    /// `resonant`, `dissonant`, `inquiry` or `abstain`.
    pub vote: String,
    /// Free-form commentary.
    #[serde(default)]
    pub commentary: String,
}

/// Request to send a text message.
#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    /// Recipient node id.
    pub to: String,
    /// Message text.
    pub content: String,
    /// Payload type label.
    #[serde(default = "default_message_type")]
    pub message_type: String,
}

fn default_message_type() -> String {
    "general".into()
}

/// Query for `/api/history`.
#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    /// Maximum echo log records returned.
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

fn default_history_limit() -> usize {
    50
}

/// Creates the API router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/api/status", get(network_status))
        .route("/api/proposals", get(list_proposals).post(create_proposal))
        .route(
            "/api/proposals/{id}",
            get(get_proposal).delete(withdraw_proposal),
        )
        .route("/api/proposals/{id}/votes", post(vote))
        .route("/api/messages", post(send_message))
        .route("/api/history", get(history))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn root(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.node.network_status();
    Json(serde_json::json!({
        "platform": "Echo-Net",
        "version": env!("CARGO_PKG_VERSION"),
        "node_id": status.node_id,
        "status": status.state,
        "timestamp": status.timestamp,
        "nodes": {
            "known": status.known_peers.len(),
        }
    }))
}

async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "alive",
        "network": state.node.network_status().health,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn network_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.node.network_status())
}

async fn list_proposals(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.node.list_active())
}

async fn create_proposal(
    State(state): State<AppState>,
    Json(req): Json<CreateProposalRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let duration = req
        .duration_secs
        .map(|secs| {
            chrono::Duration::try_seconds(secs).ok_or_else(|| {
                NodeError::from(ConsensusError::InvalidProposal(format!(
                    "duration_secs {secs} out of range"
                )))
            })
        })
        .transpose()?;
    let created = state
        .node
        .create_proposal_for(&req.title, &req.description, &req.proposal_type, duration)
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_proposal_id(&id)?;
    state
        .node
        .status(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("proposal {id}")))
}

async fn withdraw_proposal(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_proposal_id(&id)?;
    Ok(Json(state.node.withdraw(&id)?))
}

async fn vote(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<VoteRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_proposal_id(&id)?;
    let cast = state.node.vote(&id, &req.vote, &req.commentary).await?;
    Ok(Json(cast))
}

async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let to: NodeId = req
        .to
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("recipient: {e}")))?;
    state
        .node
        .send_message(&to, &req.content, &req.message_type)
        .await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "sent", "to": to })),
    ))
}

async fn history(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    Json(serde_json::json!({
        "messages": state.node.history(query.limit),
        "proposals": state.node.proposal_history(),
    }))
}

fn parse_proposal_id(raw: &str) -> Result<ProposalId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("malformed proposal id {raw:?}")))
}
