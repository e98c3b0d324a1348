//! REST collaborator: the chat service's HTTP endpoints.
//!
//! The engine talks to the service through two traits, [`AuthApi`] and
//! [`MessageApi`], so the session store and the send coordinator can be
//! driven by in-process fakes. [`RestClient`] is the reqwest-backed
//! implementation.
//!
//! Every call converts transport, status and decode failures into a
//! [`ChatError`] at its own boundary:
//! - 401 → [`ChatError::Authentication`]
//! - 429 → [`ChatError::RateLimited`]
//! - other non-2xx → [`ChatError::Request`] with the server's `detail`

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::{Method, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ChatError, Result};
use crate::timeline::MessageId;

// ---------------------------------------------------------------------------
// Wire records
// ---------------------------------------------------------------------------

/// One stored message as returned by `GET messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    #[serde(default)]
    pub id: Option<MessageId>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub created_by: String,
}

/// Body of `POST send-message`.
#[derive(Debug, Clone, Serialize)]
pub struct NewMessage {
    pub content: String,
    pub created_at: String,
    pub created_by: String,
}

/// Username/password pair for sign-in and sign-up.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    id: MessageId,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HistoryBody {
    Bare(Vec<MessageRecord>),
    Wrapped { messages: Vec<MessageRecord> },
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Credential exchange endpoints (unauthenticated).
pub trait AuthApi {
    /// `POST token`, form-encoded. Returns the bearer token.
    fn request_token(&self, credentials: &Credentials) -> impl Future<Output = Result<String>> + Send;

    /// `POST sign-up`.
    fn register(&self, credentials: &Credentials) -> impl Future<Output = Result<()>> + Send;

    /// `PATCH change-password`, bearer-authenticated.
    fn change_password(
        &self,
        token: &str,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Message endpoints (bearer-authenticated).
pub trait MessageApi {
    /// `GET messages`.
    fn fetch_messages(&self) -> impl Future<Output = Result<Vec<MessageRecord>>> + Send;

    /// `POST send-message`. Returns the server-assigned id.
    fn send_message(&self, message: &NewMessage) -> impl Future<Output = Result<MessageId>> + Send;

    /// `PATCH update-message`.
    fn update_message(&self, id: &MessageId, content: &str) -> impl Future<Output = Result<()>> + Send;

    /// `DELETE delete-message`.
    fn delete_message(&self, id: &MessageId) -> impl Future<Output = Result<()>> + Send;
}

// ---------------------------------------------------------------------------
// RestClient
// ---------------------------------------------------------------------------

/// Connection settings for [`RestClient`].
#[derive(Debug, Clone)]
pub struct RestConfig {
    /// Base URL every endpoint is joined onto, e.g. `http://localhost:8000/api/`.
    pub base_url: String,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl RestConfig {
    /// Defaults: connect timeout 3 s, request timeout 10 s.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// reqwest-backed implementation of [`AuthApi`] and [`MessageApi`].
///
/// Cheap to clone; clones share the HTTP pool and the bearer token slot.
#[derive(Debug, Clone)]
pub struct RestClient {
    base: Url,
    client: reqwest::Client,
    token: Arc<RwLock<Option<String>>>,
}

impl RestClient {
    /// # Errors
    /// [`ChatError::Config`] when `base_url` is not a valid URL.
    pub fn new(config: &RestConfig) -> Result<Self> {
        let mut raw = config.base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        let base = Url::parse(&raw)
            .map_err(|e| ChatError::Config(format!("invalid api base url '{raw}': {e}")))?;

        // Builder failure only happens in broken TLS environments; fall back
        // to the default client rather than refusing to start.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .unwrap_or_default();

        Ok(Self {
            base,
            client,
            token: Arc::new(RwLock::new(None)),
        })
    }

    /// Install (or clear) the bearer token used by message endpoints.
    pub fn set_token(&self, token: Option<String>) {
        if let Ok(mut slot) = self.token.write() {
            *slot = token;
        }
    }

    fn bearer(&self) -> Option<String> {
        self.token.read().ok().and_then(|t| t.clone())
    }

    fn url(&self, endpoint: &str) -> Result<Url> {
        self.base
            .join(endpoint)
            .map_err(|e| ChatError::Config(format!("invalid endpoint '{endpoint}': {e}")))
    }

    fn request(&self, method: Method, endpoint: &str, token: Option<&str>) -> Result<reqwest::RequestBuilder> {
        let url = self.url(endpoint)?;
        let mut builder = self.client.request(method, url);
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }
        Ok(builder)
    }

    /// Send a request and map connection failures and non-2xx statuses.
    async fn execute(
        &self,
        endpoint: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response> {
        self.execute_with(endpoint, builder, status_error).await
    }

    /// Like [`execute`](Self::execute) with a custom mapping for rejections.
    async fn execute_with(
        &self,
        endpoint: &str,
        builder: reqwest::RequestBuilder,
        reject: fn(&str, StatusCode, Option<String>) -> ChatError,
    ) -> Result<reqwest::Response> {
        let resp = builder.send().await.map_err(|e| ChatError::Connect {
            url: self.url(endpoint).map(|u| u.to_string()).unwrap_or_default(),
            detail: e.to_string(),
        })?;

        let status = resp.status();
        if status.is_success() {
            debug!(endpoint, status = status.as_u16(), "request ok");
            return Ok(resp);
        }

        let detail = resp
            .json::<ErrorBody>()
            .await
            .ok()
            .and_then(|b| b.detail)
            .map(|d| match d {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            });
        warn!(endpoint, status = status.as_u16(), detail = ?detail, "request rejected");
        Err(reject(endpoint, status, detail))
    }

    async fn decode<T: for<'de> Deserialize<'de>>(endpoint: &str, resp: reqwest::Response) -> Result<T> {
        let bytes = resp.bytes().await.map_err(|e| ChatError::Decode {
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        })?;
        serde_json::from_slice(&bytes).map_err(|e| ChatError::Decode {
            endpoint: endpoint.to_string(),
            detail: e.to_string(),
        })
    }
}

/// Map a non-2xx status onto the error taxonomy.
pub fn status_error(endpoint: &str, status: StatusCode, detail: Option<String>) -> ChatError {
    match status {
        StatusCode::UNAUTHORIZED => {
            ChatError::Authentication(detail.unwrap_or_else(|| "Authentication required".into()))
        }
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimited,
        _ => ChatError::Request {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            detail: detail.unwrap_or_else(|| "Request failed".into()),
        },
    }
}

fn token_rejection(_endpoint: &str, status: StatusCode, detail: Option<String>) -> ChatError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimited,
        _ => ChatError::Authentication(detail.unwrap_or_else(|| "Authentication failed".into())),
    }
}

fn sign_up_rejection(_endpoint: &str, status: StatusCode, detail: Option<String>) -> ChatError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimited,
        _ => ChatError::Registration(detail.unwrap_or_else(|| "Registration failed".into())),
    }
}

/// Parse either a bare array or a `{"messages": [...]}` wrapper.
pub fn parse_history(bytes: &[u8]) -> std::result::Result<Vec<MessageRecord>, serde_json::Error> {
    serde_json::from_slice::<HistoryBody>(bytes).map(|body| match body {
        HistoryBody::Bare(v) => v,
        HistoryBody::Wrapped { messages } => messages,
    })
}

impl AuthApi for RestClient {
    async fn request_token(&self, credentials: &Credentials) -> Result<String> {
        let builder = self
            .request(Method::POST, "token", None)?
            .form(&[("username", &credentials.username), ("password", &credentials.password)]);
        let resp = self.execute_with("token", builder, token_rejection).await?;
        let body: TokenResponse = Self::decode("token", resp).await?;
        Ok(body.access_token)
    }

    async fn register(&self, credentials: &Credentials) -> Result<()> {
        let builder = self.request(Method::POST, "sign-up", None)?.json(credentials);
        self.execute_with("sign-up", builder, sign_up_rejection).await?;
        Ok(())
    }

    async fn change_password(
        &self,
        token: &str,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let body = serde_json::json!({
            "username": username,
            "old_password": old_password,
            "new_password": new_password,
        });
        let builder = self
            .request(Method::PATCH, "change-password", Some(token))?
            .json(&body);
        let resp = self.execute("change-password", builder).await?;

        // The service answers either `true`/`false` or `{"success": bool}`.
        let value: serde_json::Value = Self::decode("change-password", resp).await?;
        let ok = value
            .as_bool()
            .or_else(|| value.get("success").and_then(|v| v.as_bool()))
            .unwrap_or(true);
        if ok {
            Ok(())
        } else {
            Err(ChatError::Request {
                endpoint: "change-password".into(),
                status: 200,
                detail: "password was not changed".into(),
            })
        }
    }
}

impl MessageApi for RestClient {
    async fn fetch_messages(&self) -> Result<Vec<MessageRecord>> {
        let token = self.bearer();
        let builder = self.request(Method::GET, "messages", token.as_deref())?;
        let resp = self.execute("messages", builder).await?;
        let bytes = resp.bytes().await.map_err(|e| ChatError::Decode {
            endpoint: "messages".into(),
            detail: e.to_string(),
        })?;
        parse_history(&bytes).map_err(|e| ChatError::Decode {
            endpoint: "messages".into(),
            detail: e.to_string(),
        })
    }

    async fn send_message(&self, message: &NewMessage) -> Result<MessageId> {
        let token = self.bearer();
        let builder = self
            .request(Method::POST, "send-message", token.as_deref())?
            .json(message);
        let resp = self.execute("send-message", builder).await?;
        let body: SendResponse = Self::decode("send-message", resp).await?;
        Ok(body.id)
    }

    async fn update_message(&self, id: &MessageId, content: &str) -> Result<()> {
        let token = self.bearer();
        let body = serde_json::json!({ "id": id, "content": content });
        let builder = self
            .request(Method::PATCH, "update-message", token.as_deref())?
            .json(&body);
        self.execute("update-message", builder).await?;
        Ok(())
    }

    async fn delete_message(&self, id: &MessageId) -> Result<()> {
        let token = self.bearer();
        let body = serde_json::json!({ "id": id });
        let builder = self
            .request(Method::DELETE, "delete-message", token.as_deref())?
            .json(&body);
        self.execute("delete-message", builder).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rest_config_defaults() {
        let cfg = RestConfig::new("http://localhost:8000/api/");
        assert_eq!(cfg.connect_timeout, Duration::from_secs(3));
        assert_eq!(cfg.request_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_rest_client_rejects_bad_base_url() {
        let err = RestClient::new(&RestConfig::new("not a url")).unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }

    #[test]
    fn test_endpoints_join_under_base_path() {
        let client = RestClient::new(&RestConfig::new("http://localhost:8000/api")).unwrap();
        assert_eq!(
            client.url("send-message").unwrap().as_str(),
            "http://localhost:8000/api/send-message"
        );
    }

    #[test]
    fn test_status_error_401_is_authentication() {
        let e = status_error("messages", StatusCode::UNAUTHORIZED, None);
        assert!(matches!(e, ChatError::Authentication(ref m) if m == "Authentication required"));
    }

    #[test]
    fn test_status_error_429_is_rate_limited() {
        let e = status_error("send-message", StatusCode::TOO_MANY_REQUESTS, Some("slow".into()));
        assert!(matches!(e, ChatError::RateLimited));
    }

    #[test]
    fn test_status_error_other_keeps_detail() {
        let e = status_error("send-message", StatusCode::BAD_REQUEST, Some("content missing".into()));
        match e {
            ChatError::Request { status, detail, .. } => {
                assert_eq!(status, 400);
                assert_eq!(detail, "content missing");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_status_error_generic_detail() {
        match status_error("x", StatusCode::INTERNAL_SERVER_ERROR, None) {
            ChatError::Request { detail, .. } => assert_eq!(detail, "Request failed"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_token_rejection_uses_detail_or_generic() {
        let e = token_rejection("token", StatusCode::BAD_REQUEST, Some("Incorrect username or password".into()));
        assert!(matches!(e, ChatError::Authentication(ref m) if m == "Incorrect username or password"));
        let e = token_rejection("token", StatusCode::UNAUTHORIZED, None);
        assert!(matches!(e, ChatError::Authentication(ref m) if m == "Authentication failed"));
    }

    #[test]
    fn test_sign_up_rejection_is_registration() {
        let e = sign_up_rejection("sign-up", StatusCode::CONFLICT, Some("User exists".into()));
        assert!(matches!(e, ChatError::Registration(ref m) if m == "User exists"));
        let e = sign_up_rejection("sign-up", StatusCode::BAD_REQUEST, None);
        assert!(matches!(e, ChatError::Registration(ref m) if m == "Registration failed"));
    }

    #[test]
    fn test_parse_history_bare_array() {
        let body = br#"[{"id":1,"content":"hi","created_at":"2024-01-01T10:00:00Z","created_by":"alice"}]"#;
        let records = parse_history(body).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, Some(MessageId::from(1)));
        assert_eq!(records[0].created_by, "alice");
    }

    #[test]
    fn test_parse_history_wrapped() {
        let body = br#"{"messages":[{"id":"7","content":"x","created_at":"t","created_by":"bob"}]}"#;
        let records = parse_history(body).unwrap();
        assert_eq!(records[0].id, Some(MessageId::from(7)));
    }

    #[test]
    fn test_parse_history_rejects_other_shapes() {
        assert!(parse_history(br#"{"items":[]}"#).is_err());
    }

    #[test]
    fn test_new_message_serializes_wire_fields() {
        let m = NewMessage {
            content: "hi".into(),
            created_at: "2024-01-01T10:00:00+00:00".into(),
            created_by: "alice".into(),
        };
        let v: serde_json::Value = serde_json::to_value(&m).unwrap();
        assert_eq!(v["content"], "hi");
        assert_eq!(v["created_by"], "alice");
        assert!(v.get("id").is_none());
    }

    #[test]
    fn test_set_token_roundtrip() {
        let client = RestClient::new(&RestConfig::new("http://localhost:8000/api/")).unwrap();
        assert!(client.bearer().is_none());
        client.set_token(Some("abc".into()));
        assert_eq!(client.bearer().as_deref(), Some("abc"));
        client.set_token(None);
        assert!(client.bearer().is_none());
    }
}
