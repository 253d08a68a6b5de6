//! 文件记录存储：按用户隔离的上传记录。

use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

use crate::db::Database;

#[derive(Debug, Error)]
pub enum RecordError {
    /// 记录不存在或不属于调用者，两者不做区分。
    #[error("file not found")]
    NotFound,
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

#[derive(Clone, Debug, Serialize)]
pub struct FileRecord {
    pub id: i64,
    #[serde(skip)]
    pub user_id: String,
    pub filename: String,
    pub filepath: String,
}

impl FileRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            filename: row.get(2)?,
            filepath: row.get(3)?,
        })
    }
}

pub struct FileRecordStore {
    db: Arc<Database>,
}

impl FileRecordStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// 插入新记录。同名文件会产生新的记录而不是覆盖。
    pub fn record_file(
        &self,
        user_id: &str,
        filename: &str,
        full_path: &str,
    ) -> Result<FileRecord, RecordError> {
        let id = self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO files (user_id, filename, filepath) VALUES (?1, ?2, ?3)",
                params![user_id, filename, full_path],
            )?;
            Ok(conn.last_insert_rowid())
        })?;
        Ok(FileRecord {
            id,
            user_id: user_id.to_string(),
            filename: filename.to_string(),
            filepath: full_path.to_string(),
        })
    }

    pub fn list_files(&self, user_id: &str) -> Result<Vec<FileRecord>, RecordError> {
        let records = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, filename, filepath FROM files
                 WHERE user_id = ?1
                 ORDER BY filename ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![user_id], FileRecord::from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
        })?;
        Ok(records)
    }

    pub fn find_file(&self, user_id: &str, file_id: i64) -> Result<FileRecord, RecordError> {
        self.db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT id, user_id, filename, filepath FROM files
                     WHERE id = ?1 AND user_id = ?2",
                    params![file_id, user_id],
                    FileRecord::from_row,
                )
                .optional()
            })?
            .ok_or(RecordError::NotFound)
    }

    pub fn resolve_path(&self, user_id: &str, file_id: i64) -> Result<PathBuf, RecordError> {
        self.find_file(user_id, file_id)
            .map(|record| PathBuf::from(record.filepath))
    }
}
