//! 文件访问服务：上传、列表、预览与下载。

use axum::body::{Body as AxumBody, Bytes};
use axum::extract::multipart::MultipartError;
use axum::extract::{Extension, Multipart, Path as UrlPath, Query};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Json as JsonResponse, Response};
use futures_util::stream::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::fmt::Display;
use std::io::ErrorKind;
use std::pin::pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::io::ReaderStream;
use tracing::{debug, info};

use crate::atomic::AtomicFile;
use crate::auth::AuthUser;
use crate::config::DEFAULT_PREVIEW_LINES;
use crate::credentials::{CredentialError, CredentialStore};
use crate::error::ApiError;
use crate::records::{FileRecord, FileRecordStore, RecordError};
use crate::storage::{Storage, StorageError};

#[derive(Debug, Error)]
pub enum FileError {
    #[error("invalid filename")]
    InvalidFilename,
    #[error("file not found")]
    NotFound,
    #[error("upload stream failed: {0}")]
    Stream(String),
    #[error(transparent)]
    Credentials(#[from] CredentialError),
    #[error(transparent)]
    Records(RecordError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<RecordError> for FileError {
    fn from(error: RecordError) -> Self {
        match error {
            RecordError::NotFound => FileError::NotFound,
            other => FileError::Records(other),
        }
    }
}

impl From<StorageError> for FileError {
    fn from(error: StorageError) -> Self {
        match error {
            StorageError::InvalidFilename | StorageError::InvalidUsername => {
                FileError::InvalidFilename
            }
            StorageError::Io(err) => FileError::Io(err),
        }
    }
}

/// 打开待下载文件的结果。
pub struct Download {
    pub record: FileRecord,
    pub file: File,
    pub size: u64,
}

pub struct FileService {
    credentials: Arc<CredentialStore>,
    records: Arc<FileRecordStore>,
    storage: Arc<Storage>,
    preview_lines: usize,
}

impl FileService {
    pub fn new(
        credentials: Arc<CredentialStore>,
        records: Arc<FileRecordStore>,
        storage: Arc<Storage>,
    ) -> Self {
        Self {
            credentials,
            records,
            storage,
            preview_lines: DEFAULT_PREVIEW_LINES,
        }
    }

    pub fn with_preview_lines(mut self, preview_lines: usize) -> Self {
        self.preview_lines = preview_lines;
        self
    }

    /// 写入 `home/<清理后的文件名>`，落盘成功后以原始文件名记录。
    pub async fn upload<S, E>(
        &self,
        user_id: &str,
        filename: &str,
        content: S,
    ) -> Result<FileRecord, FileError>
    where
        S: Stream<Item = Result<Bytes, E>>,
        E: Display,
    {
        let home = self.credentials.home_dir(user_id)?;
        let target = self.storage.resolve_in_home(&home, filename).await?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut atomic = AtomicFile::create(&target).await?;
        let mut content = pin!(content);
        let write_result: Result<u64, FileError> = async {
            let mut written: u64 = 0;
            while let Some(chunk) = content.next().await {
                let chunk = chunk.map_err(|err| FileError::Stream(err.to_string()))?;
                atomic.file_mut().write_all(&chunk).await?;
                written += chunk.len() as u64;
            }
            Ok(written)
        }
        .await;
        let written = match write_result {
            Ok(value) => value,
            Err(err) => {
                atomic.discard().await;
                return Err(err);
            }
        };
        atomic.commit().await?;

        let record =
            self.records
                .record_file(user_id, filename, &target.to_string_lossy())?;
        info!(
            user_id,
            file_id = record.id,
            filename,
            bytes = written,
            "file uploaded"
        );
        Ok(record)
    }

    pub fn list(&self, user_id: &str) -> Result<Vec<FileRecord>, FileError> {
        Ok(self.records.list_files(user_id)?)
    }

    /// 读取文件开头至多 `line_limit` 行，保留换行符。
    pub async fn preview(
        &self,
        user_id: &str,
        file_id: i64,
        line_limit: usize,
    ) -> Result<Vec<u8>, FileError> {
        let path = self.records.resolve_path(user_id, file_id)?;
        let file = File::open(&path).await.map_err(not_found_or_io)?;
        let mut reader = BufReader::new(file);
        let mut output = Vec::new();
        for _ in 0..line_limit {
            let read = reader.read_until(b'\n', &mut output).await?;
            if read == 0 {
                break;
            }
        }
        debug!(user_id, file_id, bytes = output.len(), "preview generated");
        Ok(output)
    }

    pub async fn download(&self, user_id: &str, file_id: i64) -> Result<Download, FileError> {
        let record = self.records.find_file(user_id, file_id)?;
        let file = File::open(&record.filepath)
            .await
            .map_err(not_found_or_io)?;
        let metadata = file.metadata().await?;
        if metadata.is_dir() {
            return Err(FileError::NotFound);
        }
        Ok(Download {
            record,
            file,
            size: metadata.len(),
        })
    }
}

fn not_found_or_io(err: std::io::Error) -> FileError {
    if err.kind() == ErrorKind::NotFound {
        FileError::NotFound
    } else {
        FileError::Io(err)
    }
}

/// Preview and download take the file id as text so malformed ids map to 400.
fn parse_file_id(raw: Option<&str>) -> Result<i64, ApiError> {
    let raw = raw
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::BadRequest("missing file_id parameter".into()))?;
    raw.parse::<i64>()
        .map_err(|_| ApiError::BadRequest("invalid file_id".into()))
}

#[derive(Deserialize)]
pub(crate) struct PreviewQuery {
    file_id: Option<String>,
}

/// 上传接口：读取 multipart 字段 `file`。
pub async fn upload_file(
    Extension(service): Extension<Arc<FileService>>,
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("missing file name".into()))?;
        service.upload(&user.user_id, &filename, field).await?;
        return Ok((
            StatusCode::CREATED,
            JsonResponse(json!({ "status": "uploaded" })),
        )
            .into_response());
    }
    Err(ApiError::BadRequest("missing file field".into()))
}

/// 列出当前用户的文件。
pub async fn list_files(
    Extension(service): Extension<Arc<FileService>>,
    Extension(user): Extension<AuthUser>,
) -> Result<JsonResponse<Vec<FileRecord>>, ApiError> {
    let files = service.list(&user.user_id)?;
    info!(user_id = user.user_id, count = files.len(), "list files");
    Ok(JsonResponse(files))
}

/// 预览文件开头若干行。
pub async fn preview_file(
    Extension(service): Extension<Arc<FileService>>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<PreviewQuery>,
) -> Result<Response, ApiError> {
    let file_id = parse_file_id(query.file_id.as_deref())?;
    let content = service
        .preview(&user.user_id, file_id, service.preview_lines)
        .await?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        content,
    )
        .into_response())
}

/// 下载完整文件。
pub async fn download_file(
    Extension(service): Extension<Arc<FileService>>,
    Extension(user): Extension<AuthUser>,
    UrlPath(raw_id): UrlPath<String>,
) -> Result<Response, ApiError> {
    let file_id = parse_file_id(Some(raw_id.as_str()))?;
    let Download { record, file, size } = service.download(&user.user_id, file_id).await?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&record.filename)?,
    );
    info!(user_id = user.user_id, file_id, size, "download file");
    Ok((StatusCode::OK, headers, AxumBody::from_stream(ReaderStream::new(file))).into_response())
}

/// 使用原始文件名的基名：`filename` 为 ASCII 回退，`filename*` 保留 UTF-8 原名。
fn content_disposition(filename: &str) -> Result<HeaderValue, ApiError> {
    let base = filename
        .rsplit(['/', '\\'])
        .find(|segment| !segment.is_empty())
        .unwrap_or("download");
    let safe: String = base
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let value = if safe == base {
        format!("attachment; filename=\"{safe}\"")
    } else {
        format!(
            "attachment; filename=\"{safe}\"; filename*=UTF-8''{}",
            urlencoding::encode(base)
        )
    };
    HeaderValue::from_str(&value)
        .map_err(|_| ApiError::Internal("failed to build response header".into()))
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::BadRequest(err.body_text())
    }
}
