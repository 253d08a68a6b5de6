//! 用户凭据存储：注册、校验与主目录映射。

use rusqlite::{ErrorCode, OptionalExtension, params};
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tracing::info;

use crate::config::USER_ID_PREFIX;
use crate::db::Database;
use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("username already exists")]
    DuplicateUsername,
    #[error("invalid username")]
    InvalidUsername,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("user not found")]
    UnknownUser,
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for CredentialError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::Io(err) => CredentialError::Io(err),
            StorageError::InvalidUsername | StorageError::InvalidFilename => {
                CredentialError::InvalidUsername
            }
        }
    }
}

#[derive(Clone, Debug)]
pub struct User {
    pub id: String,
    pub username: String,
    pub home_dir: PathBuf,
}

pub struct CredentialStore {
    db: Arc<Database>,
    storage: Arc<Storage>,
}

impl CredentialStore {
    pub fn new(db: Arc<Database>, storage: Arc<Storage>) -> Self {
        Self { db, storage }
    }

    /// 创建用户及其主目录。目录已存在不视为错误。
    pub async fn create_user(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<User, CredentialError> {
        let id = user_id_for(username);
        let home_dir = self.storage.home_dir_for(username)?;
        fs::create_dir_all(&home_dir).await?;
        let home_str = home_dir.to_string_lossy().into_owned();

        let result = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, username, password_hash, home_dir) VALUES (?1, ?2, ?3, ?4)",
                params![id, username, password_hash, home_str],
            )
        });
        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == ErrorCode::ConstraintViolation =>
            {
                return Err(CredentialError::DuplicateUsername);
            }
            Err(err) => return Err(err.into()),
        }

        info!(user_id = id, home_dir = ?home_dir, "user created");
        Ok(User {
            id,
            username: username.to_string(),
            home_dir,
        })
    }

    /// 校验用户名与密码哈希，成功时返回用户 ID。
    pub fn verify_credentials(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<String, CredentialError> {
        let row: Option<(String, String)> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, password_hash FROM users WHERE username = ?1",
                params![username],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
        })?;

        match row {
            Some((id, stored_hash))
                if constant_time_eq(stored_hash.as_bytes(), password_hash.as_bytes()) =>
            {
                Ok(id)
            }
            _ => Err(CredentialError::InvalidCredentials),
        }
    }

    pub fn home_dir(&self, user_id: &str) -> Result<PathBuf, CredentialError> {
        let home: Option<String> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT home_dir FROM users WHERE id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()
        })?;
        home.map(PathBuf::from).ok_or(CredentialError::UnknownUser)
    }
}

pub fn user_id_for(username: &str) -> String {
    format!("{USER_ID_PREFIX}{username}")
}

/// Hex encoding of the raw password bytes. Not a cryptographic hash; kept so
/// rows written by earlier deployments still verify.
pub fn hash_password(password: &str) -> String {
    hex::encode(password.as_bytes())
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |diff, (x, y)| diff | (x ^ y)) == 0
}
