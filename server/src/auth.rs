//! Admin accounts and sealed session cookies.
//!
//! A session cookie is the hex encoding of AES-GCM sealed JSON claims
//! (user id + expiry). Every request re-checks that the user still exists and
//! carries the admin role.

use crate::database::{is_unique_violation, new_id, now, Database};
use crate::error::AppError;
use crate::models::User;
use crate::security::{self, KEY_LEN};
use crate::state::AppState;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use chrono::{Duration, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

pub const SESSION_COOKIE: &str = "atelier_session";
pub const ADMIN_ROLE: &str = "admin";
const MIN_PASSWORD_LEN: usize = 8;
const SESSION_KEY_SALT: &[u8] = b"atelier-session-v1";

#[derive(Serialize, Deserialize)]
struct SessionClaims {
    uid: String,
    exp: i64,
}

pub struct SessionKeys {
    key: [u8; KEY_LEN],
    ttl: Duration,
    secure: bool,
}

impl SessionKeys {
    pub fn new(secret: &str, ttl: Duration) -> Self {
        Self {
            key: security::derive_key(secret, SESSION_KEY_SALT),
            ttl,
            secure: true,
        }
    }

    /// Drops the `Secure` cookie attribute, for serving over plain HTTP.
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, user_id: &str) -> Result<String, AppError> {
        let claims = SessionClaims {
            uid: user_id.to_string(),
            exp: (Utc::now() + self.ttl).timestamp(),
        };
        let payload =
            serde_json::to_vec(&claims).map_err(|e| AppError::Internal(e.to_string()))?;
        let sealed = security::encrypt_data(&payload, &self.key)?;
        Ok(hex::encode(sealed))
    }

    /// The user id inside a valid, unexpired token.
    pub fn verify(&self, token: &str) -> Option<String> {
        let sealed = hex::decode(token).ok()?;
        let payload = security::decrypt_data(&sealed, &self.key).ok()?;
        let claims: SessionClaims = serde_json::from_slice(&payload).ok()?;
        (claims.exp > Utc::now().timestamp()).then_some(claims.uid)
    }

    pub fn cookie(&self, token: &str) -> String {
        format!(
            "{SESSION_COOKIE}={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}{}",
            self.ttl.num_seconds(),
            self.secure_attr()
        )
    }

    pub fn clear_cookie(&self) -> String {
        format!(
            "{SESSION_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0{}",
            self.secure_attr()
        )
    }

    fn secure_attr(&self) -> &'static str {
        if self.secure {
            "; Secure"
        } else {
            ""
        }
    }
}

fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

fn user_row(row: &rusqlite::Row) -> rusqlite::Result<(User, String, String)> {
    Ok((
        User {
            id: row.get(0)?,
            email: row.get(1)?,
            role: row.get(2)?,
        },
        row.get(3)?,
        row.get(4)?,
    ))
}

pub fn find_user(db: &Database, id: &str) -> Result<Option<User>, AppError> {
    let user = db
        .conn
        .query_row(
            "SELECT id, email, role, password_hash, salt FROM users WHERE id = ?1",
            [id],
            user_row,
        )
        .optional()?;
    Ok(user.map(|(user, _, _)| user))
}

pub fn create_user(db: &Database, email: &str, password: &str, role: &str) -> Result<User, AppError> {
    let email = validate_email(email)?;
    validate_password(password)?;
    let (hash, salt) = security::hash_password(password);
    let user = User {
        id: new_id(),
        email,
        role: role.to_string(),
    };
    db.conn
        .execute(
            "INSERT INTO users (id, email, password_hash, salt, role, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![user.id, user.email, hash, salt, user.role, now()],
        )
        .map_err(email_conflict)?;
    Ok(user)
}

/// Creates the admin account unless a user with that email already exists.
pub fn ensure_admin(db: &Database, email: &str, password: &str) -> Result<(), AppError> {
    let exists: Option<String> = db
        .conn
        .query_row("SELECT id FROM users WHERE email = ?1", [email.trim()], |row| row.get(0))
        .optional()?;
    if exists.is_none() {
        let user = create_user(db, email, password, ADMIN_ROLE)?;
        info!(user = %user.id, email = %user.email, "Seeded admin account");
    }
    Ok(())
}

/// The user for `email` when `password` matches.
pub fn authenticate(db: &Database, email: &str, password: &str) -> Result<Option<User>, AppError> {
    let row = db
        .conn
        .query_row(
            "SELECT id, email, role, password_hash, salt FROM users WHERE email = ?1",
            [email.trim()],
            user_row,
        )
        .optional()?;

    match row {
        Some((user, hash, salt)) if security::verify_password(password, &salt, &hash) => {
            Ok(Some(user))
        }
        _ => {
            warn!(email = %email.trim(), "Failed sign-in attempt");
            Ok(None)
        }
    }
}

pub fn change_password(
    db: &Database,
    user_id: &str,
    current: &str,
    new_password: &str,
) -> Result<(), AppError> {
    let (hash, salt): (String, String) = db
        .conn
        .query_row(
            "SELECT password_hash, salt FROM users WHERE id = ?1",
            [user_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?
        .ok_or(AppError::Unauthorized)?;

    if !security::verify_password(current, &salt, &hash) {
        return Err(AppError::InvalidInput("Current password is incorrect".to_string()));
    }
    validate_password(new_password)?;

    let (hash, salt) = security::hash_password(new_password);
    db.conn.execute(
        "UPDATE users SET password_hash = ?1, salt = ?2 WHERE id = ?3",
        params![hash, salt, user_id],
    )?;
    info!(user = %user_id, "Password changed");
    Ok(())
}

pub fn change_email(db: &Database, user_id: &str, new_email: &str) -> Result<User, AppError> {
    let email = validate_email(new_email)?;
    db.conn
        .execute("UPDATE users SET email = ?1 WHERE id = ?2", params![email, user_id])
        .map_err(email_conflict)?;
    info!(user = %user_id, "Email changed");
    find_user(db, user_id)?.ok_or(AppError::Unauthorized)
}

fn validate_email(email: &str) -> Result<String, AppError> {
    let email = email.trim();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email.to_string()),
        _ => Err(AppError::InvalidInput("Invalid email format".to_string())),
    }
}

fn validate_password(password: &str) -> Result<(), AppError> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::InvalidInput(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    Ok(())
}

fn email_conflict(err: rusqlite::Error) -> AppError {
    if is_unique_violation(&err) {
        AppError::Conflict("Email already in use".to_string())
    } else {
        err.into()
    }
}

/// Any signed-in user.
pub struct CurrentUser(pub User);

/// A signed-in user with the admin role. Rejects with a bare 401.
pub struct AdminSession(pub User);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers).ok_or(AppError::Unauthorized)?;
        let user_id = state.sessions.verify(&token).ok_or(AppError::Unauthorized)?;
        let user = {
            let db = state.db()?;
            find_user(&db, &user_id)?
        };
        user.map(CurrentUser).ok_or(AppError::Unauthorized)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for AdminSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
        if user.role != ADMIN_ROLE {
            return Err(AppError::Unauthorized);
        }
        Ok(AdminSession(user))
    }
}
