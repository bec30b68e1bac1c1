//! User accounts and bearer tokens.
//!
//! Tokens are HMAC-SHA256 signed (`user_id.expiry.sig`, base64url) and
//! verified constant-time. The stored role is authoritative: login never
//! accepts a client-supplied role override.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::{Digest, Sha256};
use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::error::{ErrorKind, PortalError};
use crate::types::{User, UserRole};

type HmacSha256 = Hmac<Sha256>;

pub struct AuthService {
    pool: SqlitePool,
    secret: Vec<u8>,
    token_ttl_secs: u64,
}

impl AuthService {
    pub async fn new(
        pool: SqlitePool,
        token_secret: &str,
        token_ttl_secs: u64,
    ) -> anyhow::Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                email TEXT NOT NULL UNIQUE,
                password_digest TEXT NOT NULL,
                salt TEXT NOT NULL,
                role TEXT NOT NULL DEFAULT 'viewer',
                language TEXT NOT NULL DEFAULT 'en'
            )",
        )
        .execute(&pool)
        .await?;

        let secret = if token_secret.is_empty() {
            // Ephemeral secret: tokens die with the process.
            let mut bytes = [0u8; 32];
            rand::thread_rng().fill_bytes(&mut bytes);
            tracing::warn!("No token_secret configured; issued tokens will not survive restarts");
            bytes.to_vec()
        } else {
            token_secret.as_bytes().to_vec()
        };

        Ok(Self {
            pool,
            secret,
            token_ttl_secs,
        })
    }

    pub async fn register(
        &self,
        name: &str,
        email: &str,
        password: &str,
        language: &str,
    ) -> Result<(User, String), PortalError> {
        if name.trim().is_empty() || email.trim().is_empty() || password.is_empty() {
            return Err(PortalError::validation(
                "Please provide name, email and password",
            ));
        }

        let existing = sqlx::query("SELECT id FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortalError::storage(e.to_string()))?;
        if existing.is_some() {
            return Err(PortalError::validation("User already exists"));
        }

        let mut salt_bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt_bytes);
        let salt = hex(&salt_bytes);
        let digest = password_digest(&salt, password);

        let user = User {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            email: email.to_string(),
            role: UserRole::Viewer,
            language: if language.is_empty() {
                "en".to_string()
            } else {
                language.to_string()
            },
        };

        sqlx::query(
            "INSERT INTO users (id, name, email, password_digest, salt, role, language)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.name)
        .bind(&user.email)
        .bind(&digest)
        .bind(&salt)
        .bind(user.role.as_str())
        .bind(&user.language)
        .execute(&self.pool)
        .await
        .map_err(|e| PortalError::storage(e.to_string()))?;

        info!(user_id = %user.id, "User registered");
        let token = self.mint_token(&user.id);
        Ok((user, token))
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<(User, String), PortalError> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(PortalError::validation("Please provide email and password"));
        }

        let row = sqlx::query("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortalError::storage(e.to_string()))?
            .ok_or_else(|| PortalError::new(ErrorKind::Auth, "Invalid credentials"))?;

        let salt: String = row.get("salt");
        let stored_digest: String = row.get("password_digest");
        if !constant_time_eq(
            password_digest(&salt, password).as_bytes(),
            stored_digest.as_bytes(),
        ) {
            return Err(PortalError::new(ErrorKind::Auth, "Invalid credentials"));
        }

        let user = user_from_row(&row)?;
        let token = self.mint_token(&user.id);
        Ok((user, token))
    }

    pub async fn get_user(&self, user_id: &str) -> Result<User, PortalError> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PortalError::storage(e.to_string()))?
            .ok_or_else(|| PortalError::not_found("User not found"))?;
        user_from_row(&row)
    }

    pub async fn update_profile(
        &self,
        user_id: &str,
        name: Option<&str>,
        language: Option<&str>,
    ) -> Result<User, PortalError> {
        let mut user = self.get_user(user_id).await?;
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            user.name = name.to_string();
        }
        if let Some(language) = language.filter(|l| !l.trim().is_empty()) {
            user.language = language.to_string();
        }

        sqlx::query("UPDATE users SET name = ?, language = ? WHERE id = ?")
            .bind(&user.name)
            .bind(&user.language)
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(|e| PortalError::storage(e.to_string()))?;
        Ok(user)
    }

    /// Promote or demote an account. Used at boot to seed the configured
    /// admin; roles are never taken from client input.
    pub async fn set_role_by_email(&self, email: &str, role: UserRole) -> Result<(), PortalError> {
        let result = sqlx::query("UPDATE users SET role = ? WHERE email = ?")
            .bind(role.as_str())
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(|e| PortalError::storage(e.to_string()))?;
        if result.rows_affected() == 0 {
            return Err(PortalError::not_found("User not found"));
        }
        Ok(())
    }

    fn mint_token(&self, user_id: &str) -> String {
        let expiry = chrono::Utc::now().timestamp() as u64 + self.token_ttl_secs;
        let payload = format!("{}.{}", URL_SAFE_NO_PAD.encode(user_id), expiry);
        let sig = self.sign(&payload);
        format!("{}.{}", payload, URL_SAFE_NO_PAD.encode(sig))
    }

    /// Resolve a bearer token to its user. Any malformed, forged or expired
    /// token maps to the same Auth error.
    pub async fn verify_token(&self, token: &str) -> Result<User, PortalError> {
        let invalid = || PortalError::new(ErrorKind::Auth, "Not authorized");

        let mut parts = token.rsplitn(2, '.');
        let sig_b64 = parts.next().ok_or_else(invalid)?;
        let payload = parts.next().ok_or_else(invalid)?;
        let sig = URL_SAFE_NO_PAD.decode(sig_b64).map_err(|_| invalid())?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| invalid())?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&sig).map_err(|_| invalid())?;

        let (user_b64, expiry_raw) = payload.split_once('.').ok_or_else(invalid)?;
        let expiry: u64 = expiry_raw.parse().map_err(|_| invalid())?;
        if (chrono::Utc::now().timestamp() as u64) >= expiry {
            return Err(invalid());
        }

        let user_id_bytes = URL_SAFE_NO_PAD.decode(user_b64).map_err(|_| invalid())?;
        let user_id = String::from_utf8(user_id_bytes).map_err(|_| invalid())?;
        self.get_user(&user_id).await.map_err(|_| invalid())
    }

    fn sign(&self, payload: &str) -> Vec<u8> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC can take a key of any size");
        mac.update(payload.as_bytes());
        mac.finalize().into_bytes().to_vec()
    }
}

fn user_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<User, PortalError> {
    let role_raw: String = row.get("role");
    Ok(User {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        role: UserRole::parse(&role_raw)
            .ok_or_else(|| PortalError::storage(format!("unknown role: {}", role_raw)))?,
        language: row.get("language"),
    })
}

fn password_digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex(&hasher.finalize())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_auth() -> (AuthService, tempfile::NamedTempFile) {
        let db_file = tempfile::NamedTempFile::new().unwrap();
        let store =
            crate::store::SqliteLocalStore::new(db_file.path().to_str().unwrap(), 5 * 1024 * 1024)
                .await
                .unwrap();
        let auth = AuthService::new(store.pool().clone(), "test-secret", 3600)
            .await
            .unwrap();
        (auth, db_file)
    }

    #[tokio::test]
    async fn register_then_login_round_trip() {
        let (auth, _db) = setup_auth().await;
        let (user, _token) = auth
            .register("Sita", "sita@example.org", "hunter2", "hi")
            .await
            .unwrap();
        assert_eq!(user.role, UserRole::Viewer);
        assert_eq!(user.language, "hi");

        let (logged_in, token) = auth.login("sita@example.org", "hunter2").await.unwrap();
        assert_eq!(logged_in.id, user.id);

        let verified = auth.verify_token(&token).await.unwrap();
        assert_eq!(verified.id, user.id);
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let (auth, _db) = setup_auth().await;
        auth.register("A", "a@example.org", "pw", "en").await.unwrap();
        let err = auth
            .register("A again", "a@example.org", "pw2", "en")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.message, "User already exists");
    }

    #[tokio::test]
    async fn wrong_password_and_unknown_user_fail_identically() {
        let (auth, _db) = setup_auth().await;
        auth.register("A", "a@example.org", "pw", "en").await.unwrap();

        let e1 = auth.login("a@example.org", "wrong").await.unwrap_err();
        let e2 = auth.login("b@example.org", "pw").await.unwrap_err();
        assert_eq!(e1.kind, ErrorKind::Auth);
        assert_eq!(e1.message, e2.message);
    }

    #[tokio::test]
    async fn tampered_and_expired_tokens_are_rejected() {
        let (auth, _db) = setup_auth().await;
        let (_, token) = auth
            .register("A", "a@example.org", "pw", "en")
            .await
            .unwrap();

        let mut forged = token.clone();
        forged.pop();
        forged.push('A');
        assert!(auth.verify_token(&forged).await.is_err());
        assert!(auth.verify_token("garbage").await.is_err());

        let db_file2 = tempfile::NamedTempFile::new().unwrap();
        let store2 = crate::store::SqliteLocalStore::new(
            db_file2.path().to_str().unwrap(),
            5 * 1024 * 1024,
        )
        .await
        .unwrap();
        let expired_auth = AuthService::new(store2.pool().clone(), "test-secret", 0)
            .await
            .unwrap();
        let (_, dead_token) = expired_auth
            .register("B", "b@example.org", "pw", "en")
            .await
            .unwrap();
        assert!(expired_auth.verify_token(&dead_token).await.is_err());
    }

    #[tokio::test]
    async fn update_profile_changes_only_provided_fields() {
        let (auth, _db) = setup_auth().await;
        let (user, _) = auth
            .register("Old Name", "u@example.org", "pw", "en")
            .await
            .unwrap();

        let updated = auth
            .update_profile(&user.id, Some("New Name"), None)
            .await
            .unwrap();
        assert_eq!(updated.name, "New Name");
        assert_eq!(updated.language, "en");

        let updated = auth.update_profile(&user.id, None, Some("hi")).await.unwrap();
        assert_eq!(updated.name, "New Name");
        assert_eq!(updated.language, "hi");
    }
}
