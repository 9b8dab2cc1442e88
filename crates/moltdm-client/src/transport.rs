//! HTTP transport to the relay.
//!
//! A thin reqwest wrapper: protocol logic stays in [`MoltClient`]; this
//! layer builds URLs, signs authenticated requests (timestamp + Ed25519
//! over the canonical request string), and parses responses. Signatures
//! cover the raw percent-encoded path; query strings are not signed.
//!
//! [`MoltClient`]: crate::MoltClient

use moltdm_crypto::{Environment, auth};
use moltdm_proto::{
    ConsumedPreKey, Conversation, CreateConversationRequest, ErrorBody, IdentityBundle,
    MOLTBOT_ID_HEADER, MemberRequest, MessageList, MessageRecord, MoltbotId, PairKeysRequest,
    PairStatusResponse, PairSubmitRequest, PollResponse, PreKeyUpload, RegisterRequest,
    RegisterResponse, SIGNATURE_HEADER, SendMessageRequest, TIMESTAMP_HEADER,
};
use reqwest::Method;
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::identity_store::ClientIdentity;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection, timeout, or protocol-level HTTP failure
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// The relay rejected the request
    #[error("relay rejected ({status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error body from the relay
        message: String,
    },

    /// Request body failed to serialize
    #[error("encode: {0}")]
    Encode(#[from] serde_json::Error),
}

impl TransportError {
    /// The taxonomy category for this error.
    ///
    /// Everything here is transport: by the time a request fails, local
    /// ratchet state has already been persisted, so the message is lost
    /// but the chain never rewinds.
    pub fn category(&self) -> crate::ErrorCategory {
        crate::ErrorCategory::Transport
    }
}

/// HTTP client for one relay.
pub struct RelayClient<E: Environment> {
    http: reqwest::Client,
    base_url: String,
    env: E,
}

impl<E: Environment> RelayClient<E> {
    /// Create a client for the relay at `base_url` (no trailing slash).
    pub fn new(base_url: impl Into<String>, env: E) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { http: reqwest::Client::new(), base_url, env }
    }

    // Public endpoints (no signature).

    /// `POST /api/identity/register`
    pub async fn register(
        &self,
        request: &RegisterRequest,
    ) -> Result<RegisterResponse, TransportError> {
        let response = self
            .http
            .post(format!("{}/api/identity/register", self.base_url))
            .json(request)
            .send()
            .await?;
        parse(response).await
    }

    /// `GET /api/identity/:id`
    pub async fn fetch_identity(&self, id: &MoltbotId) -> Result<IdentityBundle, TransportError> {
        let response =
            self.http.get(format!("{}/api/identity/{id}", self.base_url)).send().await?;
        parse(response).await
    }

    /// `GET /api/identity/:id/prekey` - consumes at most one one-time
    /// pre-key.
    pub async fn consume_prekey(&self, id: &MoltbotId) -> Result<ConsumedPreKey, TransportError> {
        let response =
            self.http.get(format!("{}/api/identity/{id}/prekey", self.base_url)).send().await?;
        parse(response).await
    }

    /// `POST /api/pair/submit`
    pub async fn pair_submit(
        &self,
        request: &PairSubmitRequest,
    ) -> Result<PairStatusResponse, TransportError> {
        let response =
            self.http.post(format!("{}/api/pair/submit", self.base_url)).json(request).send().await?;
        parse(response).await
    }

    /// `GET /api/pair/status/:token`
    pub async fn pair_status(&self, token: &str) -> Result<PairStatusResponse, TransportError> {
        let response =
            self.http.get(format!("{}/api/pair/status/{token}", self.base_url)).send().await?;
        parse(response).await
    }

    // Authenticated endpoints.

    /// `POST /api/identity/:id/prekeys` - replenish one-time pre-keys.
    pub async fn upload_prekeys(
        &self,
        identity: &ClientIdentity,
        upload: &PreKeyUpload,
    ) -> Result<IdentityBundle, TransportError> {
        let path = format!("/api/identity/{}/prekeys", identity.moltbot_id);
        self.signed(identity, Method::POST, &path, None, Some(upload)).await
    }

    /// `POST /api/conversations`
    pub async fn create_conversation(
        &self,
        identity: &ClientIdentity,
        request: &CreateConversationRequest,
    ) -> Result<Conversation, TransportError> {
        self.signed(identity, Method::POST, "/api/conversations", None, Some(request)).await
    }

    /// `GET /api/conversations`
    pub async fn conversations(
        &self,
        identity: &ClientIdentity,
    ) -> Result<Vec<Conversation>, TransportError> {
        self.signed::<Vec<Conversation>, ()>(identity, Method::GET, "/api/conversations", None, None)
            .await
    }

    /// `GET /api/conversations/:id`
    pub async fn conversation(
        &self,
        identity: &ClientIdentity,
        conversation_id: &str,
    ) -> Result<Conversation, TransportError> {
        let path = format!("/api/conversations/{conversation_id}");
        self.signed::<Conversation, ()>(identity, Method::GET, &path, None, None).await
    }

    /// `POST /api/conversations/:id/members`
    pub async fn add_member(
        &self,
        identity: &ClientIdentity,
        conversation_id: &str,
        request: &MemberRequest,
    ) -> Result<Conversation, TransportError> {
        let path = format!("/api/conversations/{conversation_id}/members");
        self.signed(identity, Method::POST, &path, None, Some(request)).await
    }

    /// `DELETE /api/conversations/:id/members/:mid` - removal, or leave
    /// when `member_id` is the caller.
    pub async fn remove_member(
        &self,
        identity: &ClientIdentity,
        conversation_id: &str,
        member_id: &MoltbotId,
    ) -> Result<Conversation, TransportError> {
        let path = format!("/api/conversations/{conversation_id}/members/{member_id}");
        self.signed::<Conversation, ()>(identity, Method::DELETE, &path, None, None).await
    }

    /// `POST /api/conversations/:id/messages`
    pub async fn send_message(
        &self,
        identity: &ClientIdentity,
        conversation_id: &str,
        request: &SendMessageRequest,
    ) -> Result<MessageRecord, TransportError> {
        let path = format!("/api/conversations/{conversation_id}/messages");
        self.signed(identity, Method::POST, &path, None, Some(request)).await
    }

    /// `GET /api/conversations/:id/messages?since=&limit=`
    pub async fn messages(
        &self,
        identity: &ClientIdentity,
        conversation_id: &str,
        since: Option<u64>,
        limit: Option<usize>,
    ) -> Result<MessageList, TransportError> {
        let path = format!("/api/conversations/{conversation_id}/messages");

        let mut query = Vec::new();
        if let Some(since) = since {
            query.push(format!("since={since}"));
        }
        if let Some(limit) = limit {
            query.push(format!("limit={limit}"));
        }
        let query = (!query.is_empty()).then(|| query.join("&"));

        self.signed::<MessageList, ()>(identity, Method::GET, &path, query.as_deref(), None).await
    }

    /// `GET /api/poll`
    pub async fn poll(&self, identity: &ClientIdentity) -> Result<PollResponse, TransportError> {
        self.signed::<PollResponse, ()>(identity, Method::GET, "/api/poll", None, None).await
    }

    /// `POST /api/pair/:token/keys` - attach the wrapped snapshot.
    pub async fn attach_pair_keys(
        &self,
        identity: &ClientIdentity,
        token: &str,
        request: &PairKeysRequest,
    ) -> Result<PairStatusResponse, TransportError> {
        let path = format!("/api/pair/{token}/keys");
        self.signed(identity, Method::POST, &path, None, Some(request)).await
    }

    async fn signed<T: DeserializeOwned, B: Serialize>(
        &self,
        identity: &ClientIdentity,
        method: Method,
        path: &str,
        query: Option<&str>,
        body: Option<&B>,
    ) -> Result<T, TransportError> {
        let timestamp_ms = self.env.now_ms();
        let body_bytes = match body {
            Some(body) => serde_json::to_vec(body)?,
            None => Vec::new(),
        };

        let signature = auth::sign_request(
            identity.identity_keys(),
            timestamp_ms,
            method.as_str(),
            path,
            &body_bytes,
        );

        let url = match query {
            Some(query) => format!("{}{path}?{query}", self.base_url),
            None => format!("{}{path}", self.base_url),
        };

        let mut request = self
            .http
            .request(method, url)
            .header(MOLTBOT_ID_HEADER, identity.moltbot_id.as_str())
            .header(TIMESTAMP_HEADER, timestamp_ms.to_string())
            .header(SIGNATURE_HEADER, signature);

        if !body_bytes.is_empty() {
            request = request
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body_bytes);
        }

        parse(request.send().await?).await
    }
}

async fn parse<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TransportError> {
    let status = response.status();
    if !status.is_success() {
        let message = match response.json::<ErrorBody>().await {
            Ok(body) => body.error,
            Err(_) => status.to_string(),
        };
        return Err(TransportError::Api { status: status.as_u16(), message });
    }
    Ok(response.json().await?)
}
