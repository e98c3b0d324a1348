//! Persisted session handling against a real temporary directory.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{json, Value};
use tempfile::TempDir;

use chatline::api::{AuthApi, Credentials};
use chatline::session::{now_secs, SessionStore};
use chatline::{ChatError, Result};

struct StaticAuth {
    token: String,
}

impl AuthApi for StaticAuth {
    async fn request_token(&self, credentials: &Credentials) -> Result<String> {
        if credentials.password == "right" {
            Ok(self.token.clone())
        } else {
            Err(ChatError::Authentication("Incorrect username or password".into()))
        }
    }

    async fn register(&self, _credentials: &Credentials) -> Result<()> {
        Err(ChatError::Registration("Username already registered".into()))
    }

    async fn change_password(&self, _token: &str, _username: &str, _old: &str, _new: &str) -> Result<()> {
        Ok(())
    }
}

fn unsigned_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.sig")
}

fn write_pair(dir: &Path, token: &str, username: &str) {
    fs::write(dir.join("jwt_token"), token).unwrap();
    fs::write(dir.join("auth_user.json"), json!({ "username": username }).to_string()).unwrap();
}

#[test]
fn test_expired_token_is_never_loaded() {
    let dir = TempDir::new().unwrap();
    write_pair(dir.path(), &unsigned_token(&json!({ "exp": now_secs() - 5 })), "alice");

    let mut store = SessionStore::new(dir.path());
    assert!(store.load().is_none());
    assert!(store.current().is_none());
    assert!(!dir.path().join("jwt_token").exists());
    assert!(!dir.path().join("auth_user.json").exists());
}

#[test]
fn test_token_expiring_exactly_now_is_not_loaded() {
    let dir = TempDir::new().unwrap();
    let now = 1_700_000_000;
    write_pair(dir.path(), &unsigned_token(&json!({ "exp": now })), "alice");
    assert!(SessionStore::new(dir.path()).load_at(now).is_none());
}

#[test]
fn test_valid_token_survives_restart() {
    let dir = TempDir::new().unwrap();
    write_pair(dir.path(), &unsigned_token(&json!({ "exp": now_secs() + 600 })), "alice");

    let mut store = SessionStore::new(dir.path());
    let session = store.load().unwrap();
    assert_eq!(session.username.as_deref(), Some("alice"));
    assert!(store.bearer().is_some());
}

#[tokio::test]
async fn test_sign_in_then_reload_from_disk() {
    let dir = TempDir::new().unwrap();
    let api = StaticAuth {
        token: unsigned_token(&json!({ "sub": "bob", "exp": now_secs() + 600 })),
    };

    let mut store = SessionStore::new(dir.path());
    tokio_test::assert_ok!(store.sign_in(&api, &Credentials::new("bob", "right")).await);

    let mut reopened = SessionStore::new(dir.path());
    let session = reopened.load().unwrap();
    assert_eq!(session.username.as_deref(), Some("bob"));
}

#[tokio::test]
async fn test_wrong_password_leaves_no_files() {
    let dir = TempDir::new().unwrap();
    let api = StaticAuth {
        token: unsigned_token(&json!({ "exp": now_secs() + 600 })),
    };
    let mut store = SessionStore::new(dir.path());
    let err = store.sign_in(&api, &Credentials::new("bob", "wrong")).await.unwrap_err();
    assert!(err.requires_reauth());
    assert!(!dir.path().join("jwt_token").exists());
}

#[tokio::test]
async fn test_duplicate_sign_up_is_registration_error() {
    let dir = TempDir::new().unwrap();
    let api = StaticAuth {
        token: unsigned_token(&json!({ "exp": now_secs() + 600 })),
    };
    let mut store = SessionStore::new(dir.path());
    let err = store.sign_up(&api, &Credentials::new("bob", "right")).await.unwrap_err();
    assert!(matches!(err, ChatError::Registration(ref d) if d.contains("already")));
    assert!(store.current().is_none());
}
