//! Text Bounty Server
//!
//! HTTP surface over the ledger. Mutating calls are signed by the caller's
//! sr25519 hotkey (see [`crate::auth`]); the oracle callback may instead
//! require the shared `x-oracle-token` secret.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequest, Path, Query, Request, State},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::{
    self, AuthFailure, ReplayGuard, CALLER_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use crate::config::Config;
use crate::error::LedgerError;
use crate::events::{EventLog, Fanout};
use crate::ledger::BountyLedger;
use crate::oracle::Resolution;
use crate::storage::{EventJournal, JournalWriter};
use crate::types::{Amount, BountyId, ContentRef, Identity};

pub const ORACLE_TOKEN_HEADER: &str = "x-oracle-token";

/// Largest request body accepted on signed routes.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Missing {0} header")]
    MissingHeader(&'static str),

    #[error("Authentication failed: {0}")]
    Unauthenticated(&'static str),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Invalid oracle callback token")]
    InvalidCallbackToken,

    #[error("Event journal is not enabled")]
    JournalDisabled,

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::Ledger(e) => {
                let status = match e {
                    LedgerError::BountyNotFound(_) | LedgerError::ReferenceNotFound(_) => {
                        StatusCode::NOT_FOUND
                    }
                    LedgerError::Unauthorized { .. } => StatusCode::FORBIDDEN,
                    LedgerError::Destroyed => StatusCode::GONE,
                    LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                    LedgerError::Closed(_)
                    | LedgerError::Paused
                    | LedgerError::AlreadyUsed { .. }
                    | LedgerError::NotResolved(_)
                    | LedgerError::Mismatch { .. }
                    | LedgerError::InsufficientBalance { .. } => StatusCode::CONFLICT,
                };
                (status, e.kind())
            }
            ApiError::MissingHeader(_) => (StatusCode::UNAUTHORIZED, "MISSING_CALLER"),
            ApiError::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::InvalidCallbackToken => (StatusCode::FORBIDDEN, "UNAUTHORIZED"),
            ApiError::JournalDisabled => (StatusCode::NOT_FOUND, "JOURNAL_DISABLED"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = ErrorResponse {
            error: self.to_string(),
            code: code.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<AuthFailure> for ApiError {
    fn from(failure: AuthFailure) -> Self {
        match failure {
            AuthFailure::MissingHeader(header) => ApiError::MissingHeader(header),
            AuthFailure::InvalidHotkey => ApiError::Unauthenticated("caller is not an SS58 hotkey"),
            AuthFailure::InvalidTimestamp => ApiError::Unauthenticated("timestamp outside window"),
            AuthFailure::BadSignature => ApiError::Unauthenticated("signature does not verify"),
            AuthFailure::Replayed => ApiError::Unauthenticated("request already seen"),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// STATE
// ============================================================================

/// Shared server state.
///
/// Every handler runs its ledger call under `ledger`, so event sinks run
/// under that lock too. The in-memory log is cheap; the SQLite journal is
/// wired through a [`JournalWriter`] by `from_config` so disk I/O happens on
/// a blocking thread instead.
pub struct AppState {
    pub ledger: Mutex<BountyLedger>,
    pub events: Arc<EventLog>,
    pub journal: Option<Arc<EventJournal>>,
    pub reference_prefix: String,
    pub callback_token: Option<String>,
    pub replay_guard: ReplayGuard,
    pub started_at: std::time::Instant,
}

impl AppState {
    pub fn new(ledger: BountyLedger, events: Arc<EventLog>, reference_prefix: impl Into<String>) -> Self {
        Self {
            ledger: Mutex::new(ledger),
            events,
            journal: None,
            reference_prefix: reference_prefix.into(),
            callback_token: None,
            replay_guard: ReplayGuard::new(),
            started_at: std::time::Instant::now(),
        }
    }

    /// Wire up the ledger, its event sinks and the optional journal.
    ///
    /// Must run inside a tokio runtime when a journal is configured.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let events = Arc::new(EventLog::with_capacity(config.storage.event_log_capacity));
        let mut sinks = Fanout::new().with(events.clone());

        let journal = match config.journal_path() {
            Some(path) => {
                let journal = Arc::new(EventJournal::new(&path)?);
                info!("Event journal enabled at {}", path.display());
                let (writer, _handle) = JournalWriter::spawn(journal.clone());
                sinks = sinks.with(Arc::new(writer));
                Some(journal)
            }
            None => None,
        };

        let owner = config.owner();
        if !auth::is_valid_ss58_hotkey(&owner) {
            warn!("Ledger owner {} is not an SS58 hotkey and cannot sign requests", owner);
        }
        let ledger = BountyLedger::builder(Identity::new(owner)?)
            .events(Arc::new(sinks))
            .low_balance_policy(config.ledger.low_balance_policy)
            .build();

        let mut state = Self::new(ledger, events, config.oracle.reference_prefix.clone());
        state.journal = journal;
        state.callback_token = config.callback_token();
        Ok(state)
    }

    fn reference(&self, raw: &str) -> ApiResult<ContentRef> {
        Ok(ContentRef::parse(raw, &self.reference_prefix)?)
    }
}

// ============================================================================
// SIGNED CALLERS
// ============================================================================

fn header<'a>(parts: &'a Parts, name: &'static str) -> Result<&'a str, AuthFailure> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(AuthFailure::MissingHeader(name))
}

async fn authenticate_request(req: Request, state: &AppState) -> ApiResult<(Identity, axum::body::Bytes)> {
    let (parts, body) = req.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|e| ApiError::BadRequest(format!("unreadable body: {}", e)))?;

    let path = parts
        .uri
        .path_and_query()
        .map(|p| p.as_str())
        .unwrap_or_else(|| parts.uri.path());
    let hotkey = auth::authenticate(
        &state.replay_guard,
        header(&parts, CALLER_HEADER)?,
        header(&parts, TIMESTAMP_HEADER)?,
        header(&parts, SIGNATURE_HEADER)?,
        parts.method.as_str(),
        path,
        &bytes,
    )
    .map_err(|failure| {
        warn!("Rejected signed request to {}: {:?}", path, failure);
        ApiError::from(failure)
    })?;

    Ok((Identity::new(hotkey)?, bytes))
}

/// Authenticated caller of a request without a body.
pub struct Caller(pub Identity);

#[async_trait]
impl FromRequest<Arc<AppState>> for Caller {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let (caller, _) = authenticate_request(req, state).await?;
        Ok(Caller(caller))
    }
}

/// Authenticated caller plus the JSON body the signature covers.
pub struct Signed<T> {
    pub caller: Identity,
    pub body: T,
}

#[async_trait]
impl<T> FromRequest<Arc<AppState>> for Signed<T>
where
    T: DeserializeOwned + Send,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let (caller, bytes) = authenticate_request(req, state).await?;
        let body = serde_json::from_slice(&bytes)
            .map_err(|e| ApiError::BadRequest(format!("invalid JSON body: {}", e)))?;
        Ok(Signed { caller, body })
    }
}

// ============================================================================
// ROUTES
// ============================================================================

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/bounties", get(list_bounties).post(create_bounty))
        .route("/bounties/:id", get(get_bounty))
        .route("/bounties/:id/contribute", post(contribute))
        .route("/bounties/:id/fulfill", post(fulfill_bounty))
        .route("/bounties/:id/check", post(check_fulfillment))
        .route("/bounties/:id/close", post(close_bounty))
        .route("/bounties/:id/payout", post(change_payout))
        .route("/bounties/:id/history", get(bounty_history))
        .route("/oracle/requests", post(request_resolution))
        .route("/oracle/text", get(resolved_text))
        .route("/oracle/pending", get(pending_references))
        .route("/oracle/callback", post(resolution_callback))
        .route("/admin/pause", post(pause))
        .route("/admin/unpause", post(unpause))
        .route("/admin/destroy", post(destroy))
        .route("/accounts/:identity/credits", get(credits))
        .route("/events", get(list_events))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct CreateBountyRequest {
    pub fulfillment_amount: Amount,
    pub reference: String,
    #[serde(default)]
    pub initial_contribution: Amount,
}

#[derive(Debug, Deserialize)]
pub struct AmountRequest {
    pub amount: Amount,
}

#[derive(Debug, Deserialize)]
pub struct ReferenceRequest {
    pub reference: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub reference: String,
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub since: Option<u64>,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let lifecycle = state.ledger.lock().lifecycle();
    Json(json!({
        "healthy": true,
        "lifecycle": lifecycle,
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_bounties(State(state): State<Arc<AppState>>) -> ApiResult<Json<serde_json::Value>> {
    let ledger = state.ledger.lock();
    let bounties = ledger.bounties()?;
    Ok(Json(json!({
        "count": ledger.num_bounties()?,
        "bounties": bounties,
    })))
}

async fn create_bounty(
    State(state): State<Arc<AppState>>,
    Signed { caller, body: req }: Signed<CreateBountyRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let reference = state.reference(&req.reference)?;
    let bounty_id = state.ledger.lock().create_bounty(
        &caller,
        req.fulfillment_amount,
        &reference,
        req.initial_contribution,
    )?;
    Ok((StatusCode::CREATED, Json(json!({ "bounty_id": bounty_id }))))
}

async fn get_bounty(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<Json<serde_json::Value>> {
    let view = state.ledger.lock().get_bounty(BountyId(id))?;
    Ok(Json(json!(view)))
}

async fn contribute(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Signed { caller, body: req }: Signed<AmountRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let balance = state
        .ledger
        .lock()
        .contribute(&caller, BountyId(id), req.amount)?;
    Ok(Json(json!({ "bounty_id": id, "balance": balance })))
}

async fn fulfill_bounty(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Signed { caller, body: req }: Signed<ReferenceRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let reference = state.reference(&req.reference)?;
    let paid = state
        .ledger
        .lock()
        .fulfill_bounty(&caller, BountyId(id), &reference)?;
    Ok(Json(json!({ "bounty_id": id, "reference": reference, "paid": paid })))
}

async fn check_fulfillment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Json(req): Json<ReferenceRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let reference = state.reference(&req.reference)?;
    let payout = state
        .ledger
        .lock()
        .check_fulfillment(BountyId(id), &reference)?;
    Ok(Json(json!({ "bounty_id": id, "reference": reference, "payout": payout })))
}

async fn close_bounty(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Caller(caller): Caller,
) -> ApiResult<Json<serde_json::Value>> {
    state.ledger.lock().close_bounty(&caller, BountyId(id))?;
    Ok(Json(json!({ "bounty_id": id, "open": false })))
}

async fn change_payout(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
    Signed { caller, body: req }: Signed<AmountRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    state
        .ledger
        .lock()
        .change_payout(&caller, BountyId(id), req.amount)?;
    Ok(Json(json!({ "bounty_id": id, "fulfillment_amount": req.amount })))
}

async fn bounty_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<Json<serde_json::Value>> {
    // Existence check also rejects reads after destruction.
    state.ledger.lock().get_bounty(BountyId(id))?;
    let journal = state.journal.as_ref().ok_or(ApiError::JournalDisabled)?;
    let history = journal
        .events_for_bounty(BountyId(id))
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(Json(json!({ "bounty_id": id, "history": history })))
}

async fn request_resolution(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReferenceRequest>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let reference = state.reference(&req.reference)?;
    let resolution = state.ledger.lock().request_resolution(&reference)?;
    let (status, body) = match resolution {
        Resolution::Dispatched => (
            StatusCode::ACCEPTED,
            json!({ "reference": reference, "state": "requested", "dispatched": true }),
        ),
        Resolution::Pending => (
            StatusCode::ACCEPTED,
            json!({ "reference": reference, "state": "requested", "dispatched": false }),
        ),
        Resolution::Resolved(text) => (
            StatusCode::OK,
            json!({ "reference": reference, "state": "resolved", "text": text }),
        ),
    };
    Ok((status, Json(body)))
}

async fn resolved_text(
    State(state): State<Arc<AppState>>,
    Query(req): Query<ReferenceRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let reference = state.reference(&req.reference)?;
    let ledger = state.ledger.lock();
    let record = ledger.oracle_record(&reference)?;
    Ok(Json(json!({
        "reference": reference,
        "state": record.map(|r| r.state),
        "text": record.and_then(|r| r.resolved_text()),
    })))
}

async fn pending_references(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<serde_json::Value>> {
    let pending = state.ledger.lock().pending_references()?;
    Ok(Json(json!({ "pending": pending })))
}

async fn resolution_callback(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CallbackRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if let Some(expected) = &state.callback_token {
        let presented = headers
            .get(ORACLE_TOKEN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !auth::tokens_match(presented, expected) {
            warn!("Rejected resolution callback with a bad token");
            return Err(ApiError::InvalidCallbackToken);
        }
    }
    let reference = state.reference(&req.reference)?;
    let stored = state
        .ledger
        .lock()
        .resolution_callback(&reference, req.text)?;
    Ok(Json(json!({ "reference": reference, "stored": stored })))
}

async fn pause(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> ApiResult<Json<serde_json::Value>> {
    state.ledger.lock().pause(&caller)?;
    Ok(Json(json!({ "lifecycle": "paused" })))
}

async fn unpause(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> ApiResult<Json<serde_json::Value>> {
    state.ledger.lock().unpause(&caller)?;
    Ok(Json(json!({ "lifecycle": "active" })))
}

async fn destroy(
    State(state): State<Arc<AppState>>,
    Caller(caller): Caller,
) -> ApiResult<Json<serde_json::Value>> {
    let swept = state.ledger.lock().destroy(&caller)?;
    Ok(Json(json!({ "lifecycle": "destroyed", "swept": swept })))
}

async fn credits(
    State(state): State<Arc<AppState>>,
    Path(identity): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let identity = Identity::new(identity)?;
    let credited = state.ledger.lock().credits_of(&identity)?;
    Ok(Json(json!({ "identity": identity, "credits": credited })))
}

async fn list_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    // Event history is a read like any other.
    state.ledger.lock().num_bounties()?;
    let events = state.events.since(query.since.unwrap_or(0));
    Ok(Json(json!({
        "first_retained": state.events.first_seq(),
        "events": events,
    })))
}

/// Run the server
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting Text Bounty server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use sp_core::crypto::Ss58Codec;
    use sp_core::sr25519;
    use sp_core::Pair;
    use tower::util::ServiceExt;

    fn pair(seed: &str) -> sr25519::Pair {
        sr25519::Pair::from_string(&format!("//{}", seed), None).unwrap()
    }

    fn hotkey(pair: &sr25519::Pair) -> String {
        pair.public().to_ss58check()
    }

    struct Accounts {
        owner: sr25519::Pair,
        issuer: sr25519::Pair,
        funder: sr25519::Pair,
        fulfiller: sr25519::Pair,
        mallory: sr25519::Pair,
    }

    fn accounts() -> Accounts {
        Accounts {
            owner: pair("Alice"),
            issuer: pair("Bob"),
            funder: pair("Charlie"),
            fulfiller: pair("Dave"),
            mallory: pair("Eve"),
        }
    }

    fn state_with(ledger: BountyLedger, events: Arc<EventLog>) -> AppState {
        AppState::new(ledger, events, crate::types::DEFAULT_REFERENCE_PREFIX)
    }

    fn test_state() -> Arc<AppState> {
        let events = Arc::new(EventLog::new());
        let ledger = BountyLedger::builder(Identity::new(hotkey(&pair("Alice"))).unwrap())
            .events(events.clone())
            .build();
        Arc::new(state_with(ledger, events))
    }

    fn build_request(
        method: &str,
        uri: &str,
        signer: Option<&sr25519::Pair>,
        body: Option<serde_json::Value>,
    ) -> Request<Body> {
        let bytes = body.map(|b| b.to_string()).unwrap_or_default();
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(signer) = signer {
            let timestamp = chrono::Utc::now().timestamp();
            let message = auth::create_request_message(method, uri, bytes.as_bytes(), timestamp);
            let signature = signer.sign(message.as_bytes());
            let signature: &[u8] = signature.as_ref();
            builder = builder
                .header(CALLER_HEADER, hotkey(signer))
                .header(TIMESTAMP_HEADER, timestamp.to_string())
                .header(SIGNATURE_HEADER, hex::encode(signature));
        }
        if !bytes.is_empty() {
            builder = builder.header("content-type", "application/json");
        }
        builder.body(Body::from(bytes)).unwrap()
    }

    async fn call(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        signer: Option<&sr25519::Pair>,
        body: Option<serde_json::Value>,
    ) -> (StatusCode, serde_json::Value) {
        call(app, build_request(method, uri, signer, body)).await
    }

    async fn resolve(app: &Router, reference: &str, text: &str) {
        let (status, _) = send(
            app,
            "POST",
            "/oracle/requests",
            None,
            Some(json!({ "reference": reference })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let (status, body) = send(
            app,
            "POST",
            "/oracle/callback",
            None,
            Some(json!({ "reference": reference, "text": text })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stored"], true);
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_router(test_state());
        let (status, body) = send(&app, "GET", "/health", None, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["lifecycle"], "active");
    }

    #[tokio::test]
    async fn test_bounty_flow_over_http() {
        let who = accounts();
        let app = create_router(test_state());
        resolve(&app, "https://twitter.com/deturbanator/status/1", "test").await;
        resolve(&app, "deturb/status/2", "test").await;

        let (status, body) = send(
            &app,
            "POST",
            "/bounties",
            Some(&who.issuer),
            Some(json!({
                "fulfillment_amount": 100,
                "reference": "https://twitter.com/deturbanator/status/1",
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["bounty_id"], 0);

        let (status, body) = send(
            &app,
            "POST",
            "/bounties/0/contribute",
            Some(&who.funder),
            Some(json!({ "amount": 1000 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["balance"], 1000);

        let (status, body) = send(
            &app,
            "POST",
            "/bounties/0/check",
            None,
            Some(json!({ "reference": "deturb/status/2" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["payout"], 100);

        let (status, body) = send(
            &app,
            "POST",
            "/bounties/0/fulfill",
            Some(&who.fulfiller),
            Some(json!({ "reference": "deturb/status/2" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["paid"], 100);

        let (status, body) = send(
            &app,
            "POST",
            "/bounties/0/fulfill",
            Some(&who.fulfiller),
            Some(json!({ "reference": "deturb/status/2" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "ALREADY_USED");

        let (_, body) = send(&app, "GET", "/bounties/0", None, None).await;
        assert_eq!(body["balance"], 900);
        assert_eq!(body["required_text"], "test");

        let uri = format!("/accounts/{}/credits", hotkey(&who.fulfiller));
        let (_, body) = send(&app, "GET", &uri, None, None).await;
        assert_eq!(body["credits"], 100);

        let (status, body) =
            send(&app, "POST", "/bounties/0/close", Some(&who.fulfiller), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "UNAUTHORIZED");

        let (status, _) = send(&app, "POST", "/bounties/0/close", Some(&who.issuer), None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, "GET", "/bounties", None, None).await;
        assert_eq!(body["count"], 1);
        assert_eq!(body["bounties"][0]["open"], false);
    }

    #[tokio::test]
    async fn test_missing_caller_is_rejected() {
        let app = create_router(test_state());
        let (status, body) = send(
            &app,
            "POST",
            "/bounties",
            None,
            Some(json!({ "fulfillment_amount": 1, "reference": "a/status/1" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "MISSING_CALLER");
    }

    #[tokio::test]
    async fn test_spoofed_caller_header_is_rejected() {
        let who = accounts();
        let app = create_router(test_state());
        send(
            &app,
            "POST",
            "/bounties",
            Some(&who.issuer),
            Some(json!({ "fulfillment_amount": 1, "reference": "a/status/1", "initial_contribution": 50 })),
        )
        .await;

        // Bare header naming the issuer, no signature.
        let request = Request::builder()
            .method("POST")
            .uri("/bounties/0/close")
            .header(CALLER_HEADER, hotkey(&who.issuer))
            .body(Body::empty())
            .unwrap();
        let (status, _) = call(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Mallory signs but claims to be the owner.
        let mut request = build_request("POST", "/admin/destroy", Some(&who.mallory), None);
        request.headers_mut().insert(
            CALLER_HEADER,
            hotkey(&who.owner).parse().unwrap(),
        );
        let (status, body) = call(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHENTICATED");

        let (_, body) = send(&app, "GET", "/bounties/0", None, None).await;
        assert_eq!(body["open"], true);
        let (_, body) = send(&app, "GET", "/health", None, None).await;
        assert_eq!(body["lifecycle"], "active");
    }

    #[tokio::test]
    async fn test_signature_covers_path_and_body() {
        let who = accounts();
        let app = create_router(test_state());
        send(
            &app,
            "POST",
            "/bounties",
            Some(&who.issuer),
            Some(json!({ "fulfillment_amount": 1, "reference": "a/status/1" })),
        )
        .await;

        // Signed for a contribution of 1, body swapped to 1000.
        let signed = build_request(
            "POST",
            "/bounties/0/contribute",
            Some(&who.funder),
            Some(json!({ "amount": 1 })),
        );
        let (parts, _) = signed.into_parts();
        let tampered = Request::from_parts(parts, Body::from(json!({ "amount": 1000 }).to_string()));
        let (status, _) = call(&app, tampered).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Signed for one bounty, sent to another path.
        let signed = build_request("POST", "/bounties/1/close", Some(&who.issuer), None);
        let (mut parts, body) = signed.into_parts();
        parts.uri = "/bounties/0/close".parse().unwrap();
        let (status, _) = call(&app, Request::from_parts(parts, body)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (_, body) = send(&app, "GET", "/bounties/0", None, None).await;
        assert_eq!(body["balance"], 0);
        assert_eq!(body["open"], true);
    }

    #[tokio::test]
    async fn test_replayed_request_is_rejected() {
        let who = accounts();
        let app = create_router(test_state());
        send(
            &app,
            "POST",
            "/bounties",
            Some(&who.issuer),
            Some(json!({ "fulfillment_amount": 1, "reference": "a/status/1" })),
        )
        .await;

        let request = build_request(
            "POST",
            "/bounties/0/contribute",
            Some(&who.funder),
            Some(json!({ "amount": 5 })),
        );
        let (parts, body) = request.into_parts();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();

        let first = Request::from_parts(parts.clone(), Body::from(body.clone()));
        let (status, _) = call(&app, first).await;
        assert_eq!(status, StatusCode::OK);

        let replay = Request::from_parts(parts, Body::from(body));
        let (status, body) = call(&app, replay).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHENTICATED");

        let (_, body) = send(&app, "GET", "/bounties/0", None, None).await;
        assert_eq!(body["balance"], 5);
    }

    #[tokio::test]
    async fn test_bad_reference_is_rejected() {
        let app = create_router(test_state());
        let (status, body) = send(
            &app,
            "POST",
            "/oracle/requests",
            None,
            Some(json!({ "reference": "https://example.com/x" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_INPUT");
    }

    #[tokio::test]
    async fn test_resolved_text_polling() {
        let app = create_router(test_state());
        let (_, body) = send(&app, "GET", "/oracle/text?reference=a/status/1", None, None).await;
        assert_eq!(body["text"], serde_json::Value::Null);
        assert_eq!(body["state"], serde_json::Value::Null);

        send(
            &app,
            "POST",
            "/oracle/requests",
            None,
            Some(json!({ "reference": "a/status/1" })),
        )
        .await;
        let (_, body) = send(&app, "GET", "/oracle/pending", None, None).await;
        assert_eq!(body["pending"][0], "a/status/1");

        let (_, body) = send(&app, "GET", "/oracle/text?reference=a/status/1", None, None).await;
        assert_eq!(body["state"], "requested");
        assert_eq!(body["text"], serde_json::Value::Null);

        send(
            &app,
            "POST",
            "/oracle/callback",
            None,
            Some(json!({ "reference": "a/status/1", "text": "test" })),
        )
        .await;
        let (_, body) = send(&app, "GET", "/oracle/text?reference=a/status/1", None, None).await;
        assert_eq!(body["state"], "resolved");
        assert_eq!(body["text"], "test");
    }

    #[tokio::test]
    async fn test_callback_token_enforced() {
        let events = Arc::new(EventLog::new());
        let ledger = BountyLedger::new(Identity::new(hotkey(&pair("Alice"))).unwrap());
        let mut state = state_with(ledger, events);
        state.callback_token = Some("secret".to_string());
        let app = create_router(Arc::new(state));

        send(
            &app,
            "POST",
            "/oracle/requests",
            None,
            Some(json!({ "reference": "a/status/1" })),
        )
        .await;

        let (status, _) = send(
            &app,
            "POST",
            "/oracle/callback",
            None,
            Some(json!({ "reference": "a/status/1", "text": "forged" })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let mut request = build_request(
            "POST",
            "/oracle/callback",
            None,
            Some(json!({ "reference": "a/status/1", "text": "forged" })),
        );
        request
            .headers_mut()
            .insert(ORACLE_TOKEN_HEADER, "secre".parse().unwrap());
        let (status, _) = call(&app, request).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let mut request = build_request(
            "POST",
            "/oracle/callback",
            None,
            Some(json!({ "reference": "a/status/1", "text": "test" })),
        );
        request
            .headers_mut()
            .insert(ORACLE_TOKEN_HEADER, "secret".parse().unwrap());
        let (status, body) = call(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["stored"], true);
    }

    #[tokio::test]
    async fn test_pause_and_destroy_over_http() {
        let who = accounts();
        let app = create_router(test_state());

        let (status, _) = send(&app, "POST", "/admin/pause", Some(&who.mallory), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = send(&app, "POST", "/admin/pause", Some(&who.owner), None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            &app,
            "POST",
            "/oracle/requests",
            None,
            Some(json!({ "reference": "a/status/1" })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "PAUSED");

        let (status, _) = send(&app, "GET", "/bounties", None, None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = send(&app, "GET", "/events", None, None).await;
        assert_eq!(body["events"][0]["event"], "paused");
        assert_eq!(body["first_retained"], 0);

        let (status, body) = send(&app, "POST", "/admin/destroy", Some(&who.owner), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["swept"], 0);

        let (status, body) = send(&app, "GET", "/bounties", None, None).await;
        assert_eq!(status, StatusCode::GONE);
        assert_eq!(body["code"], "DESTROYED");

        let (_, body) = send(&app, "GET", "/health", None, None).await;
        assert_eq!(body["lifecycle"], "destroyed");
    }

    #[tokio::test]
    async fn test_history_requires_journal() {
        let who = accounts();
        let app = create_router(test_state());
        send(
            &app,
            "POST",
            "/bounties",
            Some(&who.issuer),
            Some(json!({ "fulfillment_amount": 1, "reference": "a/status/1" })),
        )
        .await;
        let (status, body) = send(&app, "GET", "/bounties/0/history", None, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "JOURNAL_DISABLED");
    }

    #[tokio::test]
    async fn test_history_from_journal() {
        let who = accounts();
        let events = Arc::new(EventLog::new());
        let journal = Arc::new(EventJournal::in_memory().unwrap());
        let sinks = Fanout::new().with(events.clone()).with(journal.clone());
        let ledger = BountyLedger::builder(Identity::new(hotkey(&who.owner)).unwrap())
            .events(Arc::new(sinks))
            .build();
        let mut state = state_with(ledger, events);
        state.journal = Some(journal);
        let app = create_router(Arc::new(state));

        send(
            &app,
            "POST",
            "/bounties",
            Some(&who.issuer),
            Some(json!({ "fulfillment_amount": 1, "reference": "a/status/1" })),
        )
        .await;
        send(
            &app,
            "POST",
            "/bounties/0/contribute",
            Some(&who.funder),
            Some(json!({ "amount": 7 })),
        )
        .await;

        let (status, body) = send(&app, "GET", "/bounties/0/history", None, None).await;
        assert_eq!(status, StatusCode::OK);
        let history = body["history"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["kind"], "BountyCreated");
        assert_eq!(history[1]["event"]["amount"], 7);
    }
}
