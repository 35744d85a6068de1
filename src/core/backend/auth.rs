use async_trait::async_trait;
use hmac::{Hmac, Mac};
use reqwest::Client;
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tokio::sync::Mutex;

use super::BackendError;
use crate::core::dates;

const MIN_PASSWORD_LEN: usize = 6;

/// Local sessions older than this no longer authenticate.
pub const SESSION_TTL_DAYS: i64 = 14;

const HASH_SCHEME: &str = "pbkdf2-sha256";
const HASH_ROUNDS: u32 = if cfg!(test) { 1_000 } else { 120_000 };

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    pub user: AuthUser,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("メールアドレスまたはパスワードが正しくありません")]
    InvalidCredentials,
    #[error("このメールアドレスは既に登録されています")]
    EmailTaken,
    #[error("パスワードは6文字以上にしてください")]
    WeakPassword,
    #[error("確認メールを送信しました。メール内のリンクから登録を完了してください")]
    ConfirmationPending,
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Email/password sessions and bearer-token lookup.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthError>;
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError>;
    /// `None` when the token is unknown or expired.
    async fn user_for_token(&self, token: &str) -> Result<Option<AuthUser>, AuthError>;
}

fn check_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        Err(AuthError::WeakPassword)
    } else {
        Ok(())
    }
}

fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// PBKDF2-HMAC-SHA256 with a single 32-byte block.
fn pbkdf2_sha256(password: &str, salt: &str, rounds: u32) -> Option<[u8; 32]> {
    let keyed = HmacSha256::new_from_slice(password.as_bytes()).ok()?;
    let mut mac = keyed.clone();
    mac.update(salt.as_bytes());
    mac.update(&1u32.to_be_bytes());
    let mut block = [0u8; 32];
    block.copy_from_slice(&mac.finalize().into_bytes());
    let mut out = block;
    for _ in 1..rounds {
        let mut mac = keyed.clone();
        mac.update(&block);
        block.copy_from_slice(&mac.finalize().into_bytes());
        for (o, b) in out.iter_mut().zip(block.iter()) {
            *o ^= b;
        }
    }
    Some(out)
}

/// `pbkdf2-sha256$<rounds>$<hex>`
fn hash_password(salt: &str, password: &str) -> Result<String, AuthError> {
    let digest = pbkdf2_sha256(password, salt, HASH_ROUNDS).ok_or(AuthError::InvalidCredentials)?;
    Ok(format!("{}${}${}", HASH_SCHEME, HASH_ROUNDS, hex::encode(digest)))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Checks a stored hash. Rows written before key stretching hold a bare
/// salted SHA-256 hex digest and are still accepted.
fn verify_password(salt: &str, password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(HASH_SCHEME), Some(rounds), Some(expected)) => {
            let Ok(rounds) = rounds.parse::<u32>() else {
                return false;
            };
            match pbkdf2_sha256(password, salt, rounds.max(1)) {
                Some(digest) => constant_time_eq(hex::encode(digest).as_bytes(), expected.as_bytes()),
                None => false,
            }
        }
        (Some(legacy), None, None) => constant_time_eq(
            sha256_hex(&format!("{}:{}", salt, password)).as_bytes(),
            legacy.as_bytes(),
        ),
        _ => false,
    }
}

fn generate_raw_token() -> String {
    let bytes: [u8; 24] = rand::random();
    format!("pmb_{}", hex::encode(bytes))
}

// ── GoTrue ──

pub struct HostedAuth {
    base_url: String,
    api_key: String,
    client: Client,
}

#[derive(Deserialize)]
struct GoTrueSession {
    access_token: Option<String>,
    user: Option<AuthUser>,
}

impl HostedAuth {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            client: Client::new(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<reqwest::Response, AuthError> {
        self.client
            .post(format!("{}/auth/v1/{}", self.base_url, path))
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AuthError::Backend(e.into()))
    }

    async fn backend_error(res: reqwest::Response) -> AuthError {
        let status = res.status().as_u16();
        let message = res.text().await.unwrap_or_default();
        AuthError::Backend(BackendError::Http { status, message })
    }
}

#[async_trait]
impl AuthProvider for HostedAuth {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        check_password(password)?;
        let res = self
            .post("signup", json!({"email": email, "password": password}))
            .await?;
        match res.status().as_u16() {
            200..=299 => {}
            422 => return Err(AuthError::EmailTaken),
            _ => return Err(Self::backend_error(res).await),
        }
        let body: GoTrueSession = res.json().await.map_err(|e| AuthError::Backend(e.into()))?;
        // Projects with email confirmation return a user but no session.
        match (body.access_token, body.user) {
            (Some(access_token), Some(user)) => Ok(Session { access_token, user }),
            _ => Err(AuthError::ConfirmationPending),
        }
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let res = self
            .post(
                "token?grant_type=password",
                json!({"email": email, "password": password}),
            )
            .await?;
        match res.status().as_u16() {
            200..=299 => {}
            400 | 401 => return Err(AuthError::InvalidCredentials),
            _ => return Err(Self::backend_error(res).await),
        }
        let body: GoTrueSession = res.json().await.map_err(|e| AuthError::Backend(e.into()))?;
        match (body.access_token, body.user) {
            (Some(access_token), Some(user)) => Ok(Session { access_token, user }),
            _ => Err(AuthError::InvalidCredentials),
        }
    }

    async fn user_for_token(&self, token: &str) -> Result<Option<AuthUser>, AuthError> {
        let res = self
            .client
            .get(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", token))
            .send()
            .await
            .map_err(|e| AuthError::Backend(e.into()))?;
        match res.status().as_u16() {
            200..=299 => Ok(Some(
                res.json().await.map_err(|e| AuthError::Backend(e.into()))?,
            )),
            401 | 403 => Ok(None),
            _ => Err(Self::backend_error(res).await),
        }
    }
}

// ── Local users ──

/// Users and sessions stored next to the local backend's tables.
pub struct LocalAuth {
    db: Arc<Mutex<Connection>>,
}

impl LocalAuth {
    pub async fn new(db: Arc<Mutex<Connection>>) -> Result<Self, AuthError> {
        {
            let conn = db.lock().await;
            conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS auth_users (
                    id TEXT PRIMARY KEY,
                    email TEXT NOT NULL UNIQUE,
                    salt TEXT NOT NULL,
                    password_hash TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS auth_sessions (
                    token_hash TEXT PRIMARY KEY,
                    user_id TEXT NOT NULL REFERENCES auth_users(id) ON DELETE CASCADE,
                    created_at TEXT NOT NULL
                );",
            )
            .map_err(BackendError::from)?;
        }
        Ok(Self { db })
    }

    /// Also drops the user's expired sessions so the table does not only grow.
    fn open_session(conn: &Connection, user: AuthUser) -> Result<Session, AuthError> {
        conn.execute(
            "DELETE FROM auth_sessions
             WHERE user_id = ?1 AND julianday(created_at) < julianday('now', ?2)",
            params![user.id, ttl_modifier()],
        )
        .map_err(BackendError::from)?;
        let raw_token = generate_raw_token();
        conn.execute(
            "INSERT INTO auth_sessions (token_hash, user_id, created_at) VALUES (?1, ?2, ?3)",
            params![sha256_hex(&raw_token), user.id, dates::now_rfc3339()],
        )
        .map_err(BackendError::from)?;
        Ok(Session {
            access_token: raw_token,
            user,
        })
    }
}

fn ttl_modifier() -> String {
    format!("-{} days", SESSION_TTL_DAYS)
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
impl AuthProvider for LocalAuth {
    async fn sign_up(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        check_password(password)?;
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }
        let conn = self.db.lock().await;
        let exists: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM auth_users WHERE email = ?1",
                params![email],
                |row| row.get(0),
            )
            .map_err(BackendError::from)?;
        if exists > 0 {
            return Err(AuthError::EmailTaken);
        }
        let id = uuid::Uuid::new_v4().to_string();
        let salt = hex::encode(rand::random::<[u8; 16]>());
        conn.execute(
            "INSERT INTO auth_users (id, email, salt, password_hash, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![id, email, salt, hash_password(&salt, password)?, dates::now_rfc3339()],
        )
        .map_err(BackendError::from)?;
        Self::open_session(
            &conn,
            AuthUser {
                id,
                email: Some(email),
            },
        )
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, AuthError> {
        let email = normalize_email(email);
        let conn = self.db.lock().await;
        let found = conn
            .query_row(
                "SELECT id, salt, password_hash FROM auth_users WHERE email = ?1",
                params![email],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .map_err(BackendError::from)?;
        let Some((id, salt, stored)) = found else {
            return Err(AuthError::InvalidCredentials);
        };
        if !verify_password(&salt, password, &stored) {
            return Err(AuthError::InvalidCredentials);
        }
        Self::open_session(
            &conn,
            AuthUser {
                id,
                email: Some(email),
            },
        )
    }

    async fn user_for_token(&self, token: &str) -> Result<Option<AuthUser>, AuthError> {
        let conn = self.db.lock().await;
        let user = conn
            .query_row(
                "SELECT u.id, u.email FROM auth_sessions s
                 JOIN auth_users u ON u.id = s.user_id
                 WHERE s.token_hash = ?1
                   AND julianday(s.created_at) >= julianday('now', ?2)",
                params![sha256_hex(token), ttl_modifier()],
                |row| {
                    Ok(AuthUser {
                        id: row.get(0)?,
                        email: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(BackendError::from)?;
        Ok(user)
    }
}
