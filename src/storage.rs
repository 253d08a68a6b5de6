//! 用户主目录布局与上传路径解析。

use std::io;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::ErrorKind;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid filename")]
    InvalidFilename,
    #[error("invalid username")]
    InvalidUsername,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// 所有用户主目录的根。
#[derive(Clone, Debug)]
pub struct Storage {
    root: PathBuf,
}

impl Storage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    /// 创建根目录并将其规范化为绝对路径。
    pub async fn open(root: impl AsRef<Path>) -> io::Result<Self> {
        fs::create_dir_all(root.as_ref()).await?;
        let root = fs::canonicalize(root.as_ref()).await?;
        Ok(Self::new(root))
    }

    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// 用户名必须是单个普通路径段。
    pub fn home_dir_for(&self, username: &str) -> Result<PathBuf, StorageError> {
        let mut components = Path::new(username).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(segment)), None) if segment == username => {
                Ok(self.root.join(segment))
            }
            _ => Err(StorageError::InvalidUsername),
        }
    }

    /// 解析主目录内的写入目标，拒绝越界和符号链接。
    pub async fn resolve_in_home(&self, home: &Path, filename: &str) -> Result<PathBuf, StorageError> {
        let cleaned = clean_filename(filename)?;
        let target = home.join(cleaned);
        ensure_no_symlink_components(home, &target).await?;
        Ok(target)
    }
}

/// 词法清理文件名；清理后仍需回到上级目录或为空时返回错误。
pub fn clean_filename(name: &str) -> Result<PathBuf, StorageError> {
    let trimmed = name.trim_start_matches(['/', '\\']);
    let mut normalized = PathBuf::new();
    for component in Path::new(trimmed).components() {
        match component {
            Component::Normal(segment) => normalized.push(segment),
            Component::CurDir | Component::RootDir => continue,
            Component::ParentDir => {
                if !normalized.pop() {
                    return Err(StorageError::InvalidFilename);
                }
            }
            Component::Prefix(_) => return Err(StorageError::InvalidFilename),
        }
    }
    if normalized.as_os_str().is_empty() {
        return Err(StorageError::InvalidFilename);
    }
    Ok(normalized)
}

async fn ensure_no_symlink_components(base: &Path, target: &Path) -> Result<(), StorageError> {
    let relative = target
        .strip_prefix(base)
        .map_err(|_| StorageError::InvalidFilename)?;
    let mut current = base.to_path_buf();
    let mut components = relative.components().peekable();

    while let Some(component) = components.next() {
        current.push(component.as_os_str());
        match fs::symlink_metadata(&current).await {
            Ok(metadata) => {
                if metadata.file_type().is_symlink() {
                    return Err(StorageError::InvalidFilename);
                }
                if components.peek().is_some() && !metadata.is_dir() {
                    return Err(StorageError::InvalidFilename);
                }
            }
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(StorageError::Io(err)),
        }
    }

    Ok(())
}
