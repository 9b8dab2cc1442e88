//! HTTP surface.
//!
//! Thin axum adapter over [`Relay`]: routes, the authentication middleware
//! (which buffers the body for signature verification and enforces the 256
//! KiB cap before parsing), per-identity rate limiting, and the error to
//! status mapping.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::{Body, to_bytes},
    extract::{DefaultBodyLimit, Extension, Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use moltdm_crypto::Environment;
use moltdm_proto::{
    ConsumedPreKey, Conversation, CreateConversationRequest, ErrorBody, IdentityBundle,
    MAX_BODY_BYTES, MOLTBOT_ID_HEADER, MemberRequest, MessageList, MessageRecord, MoltbotId,
    PairKeysRequest, PairStatusResponse, PairSubmitRequest, PollResponse, PreKeyUpload,
    RATE_LIMIT_PER_MINUTE, RegisterRequest, RegisterResponse, SIGNATURE_HEADER, SendMessageRequest,
    TIMESTAMP_HEADER, UpdateConversationRequest,
};
use serde::Deserialize;

use crate::{
    auth::{AuthHeaders, authenticate},
    error::RelayError,
    rate_limit::RateLimiter,
    relay::Relay,
    storage::Storage,
};

/// Shared handler state.
pub struct AppState<S: Storage, E: Environment> {
    relay: Arc<Relay<S, E>>,
    limiter: Arc<RateLimiter>,
}

impl<S: Storage, E: Environment> Clone for AppState<S, E> {
    fn clone(&self) -> Self {
        Self { relay: self.relay.clone(), limiter: self.limiter.clone() }
    }
}

/// The authenticated caller, inserted by the middleware.
#[derive(Clone)]
struct Caller(MoltbotId);

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Authentication(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "storage failure");
            // Internal details stay out of responses.
            return (status, Json(ErrorBody::new("internal error"))).into_response();
        }

        (status, Json(ErrorBody::new(self.to_string()))).into_response()
    }
}

/// Build the relay router.
pub fn router<S: Storage, E: Environment>(relay: Arc<Relay<S, E>>) -> Router {
    let state = AppState {
        relay,
        limiter: Arc::new(RateLimiter::new(RATE_LIMIT_PER_MINUTE)),
    };

    let public = Router::new()
        .route("/api/identity/register", post(register::<S, E>))
        .route("/api/identity/:id", get(identity::<S, E>))
        .route("/api/identity/:id/prekey", get(consume_prekey::<S, E>))
        .route("/api/pair/submit", post(pair_submit::<S, E>))
        .route("/api/pair/status/:token", get(pair_status::<S, E>));

    let authenticated = Router::new()
        .route("/api/identity/:id/prekeys", post(upload_prekeys::<S, E>))
        .route(
            "/api/conversations",
            post(create_conversation::<S, E>).get(list_conversations::<S, E>),
        )
        .route(
            "/api/conversations/:id",
            get(conversation::<S, E>)
                .patch(update_conversation::<S, E>)
                .delete(delete_conversation::<S, E>),
        )
        .route("/api/conversations/:id/members", post(add_member::<S, E>))
        .route("/api/conversations/:id/members/:member_id", delete(remove_member::<S, E>))
        .route("/api/conversations/:id/admins", post(add_admin::<S, E>))
        .route("/api/conversations/:id/admins/:member_id", delete(remove_admin::<S, E>))
        .route(
            "/api/conversations/:id/messages",
            post(post_message::<S, E>).get(list_messages::<S, E>),
        )
        .route("/api/poll", get(poll::<S, E>))
        .route("/api/pair/:token/keys", post(attach_pair_keys::<S, E>))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth::<S, E>));

    public
        .merge(authenticated)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
}

/// Buffer the body, verify the signature, rate-limit, and stash the caller.
async fn require_auth<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    request: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = request.into_parts();

    // The signature covers the raw body bytes, so the body must be
    // buffered here; this is also where the size cap lands, before any
    // parsing.
    let bytes = match to_bytes(body, MAX_BODY_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return (StatusCode::PAYLOAD_TOO_LARGE, Json(ErrorBody::new("body too large")))
                .into_response();
        },
    };

    let header = |name: &str| parts.headers.get(name).and_then(|value| value.to_str().ok());
    let auth_headers = AuthHeaders {
        moltbot_id: header(MOLTBOT_ID_HEADER),
        timestamp: header(TIMESTAMP_HEADER),
        signature: header(SIGNATURE_HEADER),
    };

    let now_ms = state.relay.env().now_ms();
    let caller = match authenticate(
        state.relay.storage(),
        now_ms,
        auth_headers,
        parts.method.as_str(),
        parts.uri.path(),
        &bytes,
    ) {
        Ok(caller) => caller,
        Err(err) => return err.into_response(),
    };

    if !state.limiter.check(caller.as_str(), now_ms) {
        return RelayError::RateLimited.into_response();
    }

    parts.extensions.insert(Caller(caller));
    next.run(Request::from_parts(parts, Body::from(bytes))).await
}

// Public handlers

async fn register<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, RelayError> {
    let identity = state.relay.register_identity(&request)?;
    Ok(Json(RegisterResponse { identity }))
}

async fn identity<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Path(id): Path<String>,
) -> Result<Json<IdentityBundle>, RelayError> {
    Ok(Json(state.relay.identity(&MoltbotId::new(id))?))
}

async fn consume_prekey<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Path(id): Path<String>,
) -> Result<Json<ConsumedPreKey>, RelayError> {
    Ok(Json(state.relay.consume_prekey(&MoltbotId::new(id))?))
}

async fn pair_submit<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Json(request): Json<PairSubmitRequest>,
) -> Result<Json<PairStatusResponse>, RelayError> {
    Ok(Json(state.relay.pair_submit(&request)?))
}

async fn pair_status<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Path(token): Path<String>,
) -> Result<Json<PairStatusResponse>, RelayError> {
    Ok(Json(state.relay.pair_status(&token)?))
}

// Authenticated handlers

async fn upload_prekeys<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Extension(Caller(caller)): Extension<Caller>,
    Path(id): Path<String>,
    Json(upload): Json<PreKeyUpload>,
) -> Result<Json<IdentityBundle>, RelayError> {
    Ok(Json(state.relay.append_prekeys(&caller, &MoltbotId::new(id), &upload)?))
}

async fn create_conversation<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Extension(Caller(caller)): Extension<Caller>,
    Json(request): Json<CreateConversationRequest>,
) -> Result<Json<Conversation>, RelayError> {
    Ok(Json(state.relay.create_conversation(&caller, &request)?))
}

async fn list_conversations<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Extension(Caller(caller)): Extension<Caller>,
) -> Result<Json<Vec<Conversation>>, RelayError> {
    Ok(Json(state.relay.conversations_for(&caller)?))
}

async fn conversation<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Extension(Caller(caller)): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<Json<Conversation>, RelayError> {
    Ok(Json(state.relay.conversation(&caller, &id)?))
}

async fn update_conversation<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Extension(Caller(caller)): Extension<Caller>,
    Path(id): Path<String>,
    Json(request): Json<UpdateConversationRequest>,
) -> Result<Json<Conversation>, RelayError> {
    Ok(Json(state.relay.update_conversation(&caller, &id, &request)?))
}

async fn delete_conversation<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Extension(Caller(caller)): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<StatusCode, RelayError> {
    state.relay.delete_conversation(&caller, &id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn add_admin<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Extension(Caller(caller)): Extension<Caller>,
    Path(id): Path<String>,
    Json(request): Json<MemberRequest>,
) -> Result<Json<Conversation>, RelayError> {
    Ok(Json(state.relay.add_admin(&caller, &id, &request.member_id)?))
}

async fn remove_admin<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Extension(Caller(caller)): Extension<Caller>,
    Path((id, member_id)): Path<(String, String)>,
) -> Result<Json<Conversation>, RelayError> {
    Ok(Json(state.relay.remove_admin(&caller, &id, &MoltbotId::new(member_id))?))
}

async fn add_member<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Extension(Caller(caller)): Extension<Caller>,
    Path(id): Path<String>,
    Json(request): Json<MemberRequest>,
) -> Result<Json<Conversation>, RelayError> {
    Ok(Json(state.relay.add_member(&caller, &id, &request.member_id)?))
}

async fn remove_member<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Extension(Caller(caller)): Extension<Caller>,
    Path((id, member_id)): Path<(String, String)>,
) -> Result<Json<Conversation>, RelayError> {
    Ok(Json(state.relay.remove_member(&caller, &id, &MoltbotId::new(member_id))?))
}

async fn post_message<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Extension(Caller(caller)): Extension<Caller>,
    Path(id): Path<String>,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<MessageRecord>, RelayError> {
    Ok(Json(state.relay.post_message(&caller, &id, &request)?))
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    since: Option<u64>,
    limit: Option<usize>,
}

async fn list_messages<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Extension(Caller(caller)): Extension<Caller>,
    Path(id): Path<String>,
    Query(query): Query<MessagesQuery>,
) -> Result<Json<MessageList>, RelayError> {
    let messages = state.relay.messages(&caller, &id, query.since, query.limit)?;
    Ok(Json(MessageList { messages }))
}

async fn poll<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Extension(Caller(caller)): Extension<Caller>,
) -> Result<Json<PollResponse>, RelayError> {
    Ok(Json(state.relay.poll(&caller)?))
}

async fn attach_pair_keys<S: Storage, E: Environment>(
    State(state): State<AppState<S, E>>,
    Extension(Caller(caller)): Extension<Caller>,
    Path(token): Path<String>,
    Json(request): Json<PairKeysRequest>,
) -> Result<Json<PairStatusResponse>, RelayError> {
    Ok(Json(state.relay.pair_attach_keys(&caller, &token, &request)?))
}
