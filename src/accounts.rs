//! User accounts and credential verification.
//!
//! Accounts are persisted as a pretty-printed JSON file under the data
//! directory, like the other small stores in this service. Passwords are
//! stored as PBKDF2-HMAC-SHA256 hashes with a per-account random salt;
//! plaintext never touches disk.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tokio::sync::RwLock;
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Identity & Account Types
// ─────────────────────────────────────────────────────────────────────────────

/// Minimum accepted password length.
pub const MIN_PASSWORD_LEN: usize = 6;

const PBKDF2_ROUNDS: u32 = 100_000;

/// The authenticated identity handed to the rest of the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Opaque account id; the owner tag on task records.
    pub uid: String,
    /// Display label ("logged in as ...").
    pub email: String,
}

/// A stored user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    /// Unique identifier, assigned at registration
    pub uid: String,
    /// Login email, stored lowercased
    pub email: String,
    /// Hex-encoded PBKDF2-HMAC-SHA256 password hash
    pub password_hash: String,
    /// Hex-encoded per-account salt
    pub salt: String,
    /// Registration timestamp
    pub created_at: DateTime<Utc>,
}

impl UserAccount {
    pub fn identity(&self) -> Identity {
        Identity {
            uid: self.uid.clone(),
            email: self.email.clone(),
        }
    }
}

/// Errors from account operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccountError {
    #[error("email address already registered")]
    EmailTaken,
    #[error("invalid email address")]
    InvalidEmail,
    #[error("password must be at least {} characters", MIN_PASSWORD_LEN)]
    WeakPassword,
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("account storage error: {0}")]
    Storage(String),
}

fn hash_password(password: &str, salt: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, PBKDF2_ROUNDS, &mut out);
    out
}

/// Run the key derivation on the blocking pool; at 100k rounds it takes
/// long enough to stall an async worker thread.
async fn hash_password_blocking(password: String, salt: Vec<u8>) -> Result<[u8; 32], AccountError> {
    tokio::task::spawn_blocking(move || hash_password(&password, &salt))
        .await
        .map_err(|e| AccountError::Storage(format!("hashing task failed: {}", e)))
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    let a_bytes = a.as_bytes();
    let b_bytes = b.as_bytes();
    if a_bytes.len() != b_bytes.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for i in 0..a_bytes.len() {
        diff |= a_bytes[i] ^ b_bytes[i];
    }
    diff == 0
}

// ─────────────────────────────────────────────────────────────────────────────
// Account Store
// ─────────────────────────────────────────────────────────────────────────────

/// Persistent store for user accounts with JSON file backing.
pub struct AccountStore {
    accounts: RwLock<HashMap<String, UserAccount>>,
    storage_path: PathBuf,
}

impl AccountStore {
    /// Create an account store, loading existing accounts from disk.
    ///
    /// A missing file yields an empty store; an unreadable or corrupt file
    /// is an error, so a bad deploy cannot silently wipe the account list
    /// on the next save.
    pub async fn new(storage_path: PathBuf) -> anyhow::Result<Self> {
        let store = Self {
            accounts: RwLock::new(HashMap::new()),
            storage_path,
        };

        let loaded = store.load_from_disk()?;
        if !loaded.is_empty() {
            tracing::info!("Loaded {} account(s)", loaded.len());
        }
        *store.accounts.write().await = loaded;

        Ok(store)
    }

    fn load_from_disk(&self) -> anyhow::Result<HashMap<String, UserAccount>> {
        if !self.storage_path.exists() {
            return Ok(HashMap::new());
        }

        let contents = std::fs::read_to_string(&self.storage_path)
            .with_context(|| format!("failed to read {}", self.storage_path.display()))?;
        let accounts: Vec<UserAccount> = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse {}", self.storage_path.display()))?;

        Ok(accounts.into_iter().map(|a| (a.uid.clone(), a)).collect())
    }

    async fn save_to_disk(&self) -> anyhow::Result<()> {
        let accounts = self.accounts.read().await;
        let accounts_vec: Vec<&UserAccount> = accounts.values().collect();

        if let Some(parent) = self.storage_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let contents = serde_json::to_string_pretty(&accounts_vec)?;
        std::fs::write(&self.storage_path, contents)
            .with_context(|| format!("failed to write {}", self.storage_path.display()))?;
        Ok(())
    }

    /// Register a new account and return its identity.
    ///
    /// The email is trimmed and lowercased before any checks, so lookups
    /// and the duplicate check are case-insensitive.
    pub async fn register(&self, email: &str, password: &str) -> Result<Identity, AccountError> {
        let email = email.trim().to_ascii_lowercase();
        if email.is_empty() || !email.contains('@') {
            return Err(AccountError::InvalidEmail);
        }
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AccountError::WeakPassword);
        }

        // Cheap duplicate check before paying for the key derivation.
        {
            let guard = self.accounts.read().await;
            if guard.values().any(|a| a.email == email) {
                return Err(AccountError::EmailTaken);
            }
        }

        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let hash = hash_password_blocking(password.to_string(), salt.to_vec()).await?;

        let account = {
            let mut guard = self.accounts.write().await;
            // Re-check under the write lock: a concurrent registration may
            // have claimed the email while we hashed.
            if guard.values().any(|a| a.email == email) {
                return Err(AccountError::EmailTaken);
            }

            let account = UserAccount {
                uid: Uuid::new_v4().to_string(),
                email,
                password_hash: hex::encode(hash),
                salt: hex::encode(salt),
                created_at: Utc::now(),
            };
            guard.insert(account.uid.clone(), account.clone());
            account
        };

        if let Err(e) = self.save_to_disk().await {
            // Roll back so "registered" always means "persisted".
            tracing::error!("Failed to save accounts to disk: {}", e);
            self.accounts.write().await.remove(&account.uid);
            return Err(AccountError::Storage(e.to_string()));
        }

        tracing::info!("Registered account {} ({})", account.uid, account.email);
        Ok(account.identity())
    }

    /// Verify credentials and return the matching identity.
    ///
    /// Unknown email and wrong password both map to the same generic error
    /// to prevent account enumeration, and the unknown-email path burns the
    /// same hashing work so the two are indistinguishable by timing.
    pub async fn verify(&self, email: &str, password: &str) -> Result<Identity, AccountError> {
        let email = email.trim().to_ascii_lowercase();
        let account = {
            let guard = self.accounts.read().await;
            guard.values().find(|a| a.email == email).cloned()
        };

        match account {
            Some(account) => {
                let salt = hex::decode(&account.salt)
                    .map_err(|e| AccountError::Storage(format!("corrupt salt: {}", e)))?;
                let hash = hash_password_blocking(password.to_string(), salt).await?;
                if constant_time_eq(&hex::encode(hash), &account.password_hash) {
                    Ok(account.identity())
                } else {
                    Err(AccountError::InvalidCredentials)
                }
            }
            None => {
                let _ = hash_password_blocking(password.to_string(), vec![0u8; 16]).await;
                Err(AccountError::InvalidCredentials)
            }
        }
    }

    /// Look up an account by uid.
    pub async fn get(&self, uid: &str) -> Option<UserAccount> {
        let guard = self.accounts.read().await;
        guard.get(uid).cloned()
    }
}

/// Shared account store type.
pub type SharedAccountStore = Arc<AccountStore>;
