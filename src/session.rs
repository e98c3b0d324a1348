//! # Session store
//!
//! ## Responsibility
//! Owns the bearer credential and its validity window, persisted in the
//! state directory as two files that are always written and cleared
//! together:
//! - `jwt_token`: the raw bearer token
//! - `auth_user.json`: `{"username": "..."}`
//!
//! ## Guarantees
//! - A token is usable only while its `exp` claim is absent or strictly in
//!   the future; expired or malformed tokens are discarded at load time.
//! - A reload never yields a username without a token or a token without a
//!   username: a half-present pair is cleared.
//! - `sign_out` clears both files unconditionally.
//!
//! ## NOT Responsible For
//! - Verifying the token signature (the server does that on every call)

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::api::{AuthApi, Credentials};
use crate::error::{ChatError, Result};

const TOKEN_FILE: &str = "jwt_token";
const USER_FILE: &str = "auth_user.json";

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub token: String,
    /// `exp` claim in unix seconds; `None` means no expiry.
    pub expiry: Option<i64>,
    pub username: Option<String>,
}

impl Session {
    /// Build a session from a token, reading its expiry claim.
    ///
    /// Returns `None` when the token is not a decodable JWT.
    pub fn from_token(token: impl Into<String>, username: Option<String>) -> Option<Self> {
        let token = token.into();
        let claims = decode_claims(&token)?;
        Some(Self {
            token,
            expiry: claims.exp,
            username,
        })
    }

    /// Usable while the expiry is absent or strictly after `now`.
    pub fn is_valid_at(&self, now: i64) -> bool {
        self.expiry.map_or(true, |exp| exp > now)
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(now_secs())
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default, deserialize_with = "de_exp")]
    exp: Option<i64>,
}

fn de_exp<'de, D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Option<i64>, D::Error> {
    let v: Option<serde_json::Value> = Option::deserialize(d)?;
    Ok(v.and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))))
}

/// Decode the payload segment of a JWT without verifying it.
fn decode_claims(token: &str) -> Option<Claims> {
    let mut parts = token.split('.');
    let (_header, payload, _sig) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Current unix time in seconds.
pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredUser {
    username: String,
}

/// Usernames may not look like the reserved `<System>` / `<Date>` senders.
pub fn validate_username(username: &str) -> std::result::Result<(), String> {
    let trimmed = username.trim();
    if trimmed.is_empty() {
        return Err("username must not be empty".into());
    }
    if trimmed.contains('<') || trimmed.contains('>') {
        return Err("username must not contain '<' or '>'".into());
    }
    Ok(())
}

/// Persisted bearer credential plus the in-memory current session.
#[derive(Debug)]
pub struct SessionStore {
    dir: PathBuf,
    current: Option<Session>,
}

impl SessionStore {
    /// Store rooted at `dir`. Nothing is read until [`load`](Self::load).
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            current: None,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }

    /// Username of the current session, if any.
    pub fn username(&self) -> Option<&str> {
        self.current.as_ref().and_then(|s| s.username.as_deref())
    }

    /// Token for an outbound call, only while still valid.
    pub fn bearer(&self) -> Option<&str> {
        self.current
            .as_ref()
            .filter(|s| s.is_valid())
            .map(|s| s.token.as_str())
    }

    /// Load the persisted session, validating it against the clock.
    pub fn load(&mut self) -> Option<Session> {
        self.load_at(now_secs())
    }

    /// Load the persisted session as of `now` (unix seconds).
    pub fn load_at(&mut self, now: i64) -> Option<Session> {
        self.current = None;
        let token = read_optional(&self.dir.join(TOKEN_FILE));
        let user = read_optional(&self.dir.join(USER_FILE));

        let (token, user) = match (token, user) {
            (None, None) => return None,
            (Some(t), Some(u)) => (t, u),
            _ => {
                warn!(dir = %self.dir.display(), "half-persisted session, clearing");
                self.clear_files();
                return None;
            }
        };

        let username = match serde_json::from_str::<StoredUser>(&user) {
            Ok(u) => u.username,
            Err(e) => {
                warn!(error = %e, "stored user record unreadable, clearing session");
                self.clear_files();
                return None;
            }
        };

        let Some(session) = Session::from_token(token.trim(), Some(username)) else {
            warn!("stored token is malformed, clearing session");
            self.clear_files();
            return None;
        };

        if !session.is_valid_at(now) {
            info!(expiry = ?session.expiry, "stored token expired, clearing session");
            self.clear_files();
            return None;
        }

        debug!(username = ?session.username, "restored session");
        self.current = Some(session.clone());
        Some(session)
    }

    /// Exchange credentials for a token and persist it with the username.
    ///
    /// # Errors
    /// [`ChatError::Authentication`] on rejection or an unreadable token;
    /// [`ChatError::Storage`] if the pair cannot be written.
    pub async fn sign_in<A: AuthApi>(&mut self, api: &A, credentials: &Credentials) -> Result<Session> {
        validate_username(&credentials.username).map_err(ChatError::Authentication)?;
        let token = api.request_token(credentials).await?;
        let session = Session::from_token(token, Some(credentials.username.clone()))
            .ok_or_else(|| ChatError::Authentication("server returned an unreadable token".into()))?;
        if !session.is_valid() {
            return Err(ChatError::Authentication("server returned an expired token".into()));
        }
        self.persist(&session)?;
        info!(username = %credentials.username, "signed in");
        self.current = Some(session.clone());
        Ok(session)
    }

    /// Register, then sign in with the same credentials.
    ///
    /// # Errors
    /// [`ChatError::Registration`] if registration is rejected; otherwise
    /// whatever [`sign_in`](Self::sign_in) returns.
    pub async fn sign_up<A: AuthApi>(&mut self, api: &A, credentials: &Credentials) -> Result<Session> {
        validate_username(&credentials.username).map_err(ChatError::Registration)?;
        api.register(credentials).await?;
        info!(username = %credentials.username, "registered");
        self.sign_in(api, credentials).await
    }

    /// Forget the session and clear both persisted files.
    pub fn sign_out(&mut self) {
        self.current = None;
        self.clear_files();
        info!("signed out");
    }

    /// Change the current user's password.
    ///
    /// # Errors
    /// [`ChatError::Authentication`] when there is no valid session.
    pub async fn change_password<A: AuthApi>(&self, api: &A, old_password: &str, new_password: &str) -> Result<()> {
        let session = self
            .current
            .as_ref()
            .filter(|s| s.is_valid())
            .ok_or_else(|| ChatError::Authentication("Authentication required".into()))?;
        let username = session.username.as_deref().unwrap_or_default();
        api.change_password(&session.token, username, old_password, new_password)
            .await
    }

    fn persist(&self, session: &Session) -> Result<()> {
        let username = session.username.clone().unwrap_or_default();
        let user = serde_json::to_string(&StoredUser { username }).map_err(|e| ChatError::Storage {
            path: self.dir.join(USER_FILE).display().to_string(),
            detail: e.to_string(),
        })?;

        fs::create_dir_all(&self.dir).map_err(|e| self.storage_err(&self.dir, e))?;
        let token_tmp = self.dir.join(format!("{TOKEN_FILE}.tmp"));
        let user_tmp = self.dir.join(format!("{USER_FILE}.tmp"));
        fs::write(&token_tmp, &session.token).map_err(|e| self.storage_err(&token_tmp, e))?;
        fs::write(&user_tmp, user).map_err(|e| self.storage_err(&user_tmp, e))?;

        let token_path = self.dir.join(TOKEN_FILE);
        let user_path = self.dir.join(USER_FILE);
        if let Err(e) = fs::rename(&token_tmp, &token_path) {
            let _ = fs::remove_file(&user_tmp);
            return Err(self.storage_err(&token_path, e));
        }
        if let Err(e) = fs::rename(&user_tmp, &user_path) {
            self.clear_files();
            return Err(self.storage_err(&user_path, e));
        }
        Ok(())
    }

    fn clear_files(&self) {
        for name in [TOKEN_FILE, USER_FILE] {
            let path = self.dir.join(name);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "could not remove session file"),
            }
        }
    }

    fn storage_err(&self, path: &Path, e: io::Error) -> ChatError {
        ChatError::Storage {
            path: path.display().to_string(),
            detail: e.to_string(),
        }
    }
}

fn read_optional(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().filter(|s| !s.trim().is_empty())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
