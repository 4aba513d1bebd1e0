//! Storage backend consumed by file handles
//!
//! The third-party-copy layer never touches the disk itself, it opens, reads, writes and closes
//! through [`Storage`]. [`LocalStorage`] serves files below a root directory.

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::caller::Caller;
use crate::error::TpcError;
use remote::protocol::OpenMode;

#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    async fn open(
        &self,
        path: &str,
        mode: OpenMode,
        create_mode: u32,
        caller: &Caller,
        opaque: &str,
    ) -> Result<Box<dyn StorageFile>, TpcError>;

    async fn remove(&self, path: &str) -> Result<(), TpcError>;
}

#[async_trait::async_trait]
pub trait StorageFile: Send {
    /// Reads at `offset` until `buf` is full or the file ends, returns the bytes read.
    async fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, TpcError>;

    /// Writes `data` at `offset`, returns the bytes written.
    async fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize, TpcError>;

    async fn sync(&mut self) -> Result<(), TpcError>;

    /// Closes the file, any further call fails.
    async fn close(&mut self) -> Result<(), TpcError>;
}

/// Files below a root directory, paths are interpreted relative to it.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: std::path::PathBuf,
}

impl LocalStorage {
    pub fn new(root: impl Into<std::path::PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    /// Maps a request path below the root, rejecting anything that could escape it.
    pub fn resolve(&self, path: &str) -> Result<std::path::PathBuf, TpcError> {
        let mut resolved = self.root.clone();
        let mut components = 0;
        for component in std::path::Path::new(path).components() {
            match component {
                std::path::Component::Normal(name) => {
                    resolved.push(name);
                    components += 1;
                }
                std::path::Component::RootDir | std::path::Component::CurDir => {}
                std::path::Component::ParentDir | std::path::Component::Prefix(_) => {
                    return Err(TpcError::InvalidArgument(format!(
                        "open - path {path:?} escapes the storage root"
                    )));
                }
            }
        }
        if components == 0 {
            return Err(TpcError::InvalidArgument(format!(
                "open - path {path:?} does not name a file"
            )));
        }
        Ok(resolved)
    }
}

#[async_trait::async_trait]
impl Storage for LocalStorage {
    async fn open(
        &self,
        path: &str,
        mode: OpenMode,
        create_mode: u32,
        caller: &Caller,
        opaque: &str,
    ) -> Result<Box<dyn StorageFile>, TpcError> {
        let resolved = self.resolve(path)?;
        tracing::debug!(
            path = %path,
            tident = %caller.tident,
            opaque = %opaque,
            "opening {:?} {:?} {:o}",
            resolved,
            mode,
            create_mode
        );
        if mode.create
            && let Some(parent) = resolved.parent()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|error| TpcError::from_io("open - failed to create parent", &error))?;
        }
        let mut options = tokio::fs::OpenOptions::new();
        options
            .read(true)
            .write(mode.write || mode.create || mode.truncate)
            .create(mode.create)
            .truncate(mode.truncate);
        if create_mode != 0 {
            options.mode(create_mode);
        }
        let file = options
            .open(&resolved)
            .await
            .map_err(|error| TpcError::from_io(&format!("open - {path}"), &error))?;
        Ok(Box::new(LocalFile {
            path: path.to_string(),
            file: Some(file),
        }))
    }

    async fn remove(&self, path: &str) -> Result<(), TpcError> {
        let resolved = self.resolve(path)?;
        tokio::fs::remove_file(&resolved)
            .await
            .map_err(|error| TpcError::from_io(&format!("remove - {path}"), &error))
    }
}

#[derive(Debug)]
struct LocalFile {
    path: String,
    file: Option<tokio::fs::File>,
}

impl LocalFile {
    fn file(&mut self, operation: &str) -> Result<&mut tokio::fs::File, TpcError> {
        self.file
            .as_mut()
            .ok_or_else(|| TpcError::not_open(operation))
    }
}

#[async_trait::async_trait]
impl StorageFile for LocalFile {
    async fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, TpcError> {
        let path = self.path.clone();
        let file = self.file("read")?;
        let io_error = |error: std::io::Error| TpcError::from_io(&format!("read - {path}"), &error);
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(io_error)?;
        let mut total = 0;
        while total < buf.len() {
            let n = file.read(&mut buf[total..]).await.map_err(io_error)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        Ok(total)
    }

    async fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize, TpcError> {
        let path = self.path.clone();
        let file = self.file("write")?;
        let io_error = |error: std::io::Error| TpcError::from_io(&format!("write - {path}"), &error);
        file.seek(std::io::SeekFrom::Start(offset))
            .await
            .map_err(io_error)?;
        file.write_all(data).await.map_err(io_error)?;
        Ok(data.len())
    }

    async fn sync(&mut self) -> Result<(), TpcError> {
        let path = self.path.clone();
        let file = self.file("sync")?;
        file.sync_all()
            .await
            .map_err(|error| TpcError::from_io(&format!("sync - {path}"), &error))
    }

    async fn close(&mut self) -> Result<(), TpcError> {
        let mut file = self.file.take().ok_or_else(|| TpcError::not_open("close"))?;
        file.flush()
            .await
            .map_err(|error| TpcError::from_io(&format!("close - {}", self.path), &error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caller() -> Caller {
        Caller::new("test.1:1@localhost", "localhost", "unix")
    }

    #[tokio::test]
    async fn write_then_read_at_offsets() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let storage = LocalStorage::new(root.path());
        let mut file = storage
            .open("/dir/f", OpenMode::create_truncate(), 0o644, &caller(), "")
            .await?;
        assert_eq!(file.write(0, b"hello ").await?, 6);
        assert_eq!(file.write(6, b"world").await?, 5);
        file.close().await?;
        assert_eq!(
            tokio::fs::read_to_string(root.path().join("dir/f")).await?,
            "hello world"
        );
        let mut file = storage
            .open("dir/f", OpenMode::read_only(), 0, &caller(), "")
            .await?;
        let mut buf = [0u8; 32];
        assert_eq!(file.read(6, &mut buf).await?, 5);
        assert_eq!(&buf[..5], b"world");
        assert_eq!(file.read(11, &mut buf).await?, 0);
        file.close().await?;
        assert!(matches!(
            file.read(0, &mut buf).await,
            Err(TpcError::Storage { errno, .. }) if errno == libc::EBADF
        ));
        Ok(())
    }

    #[tokio::test]
    async fn missing_file_reports_enoent() -> anyhow::Result<()> {
        let root = tempfile::tempdir()?;
        let storage = LocalStorage::new(root.path());
        let result = storage
            .open("/nope", OpenMode::read_only(), 0, &caller(), "")
            .await;
        assert!(matches!(
            result.err(),
            Some(TpcError::Storage { errno, .. }) if errno == libc::ENOENT
        ));
        assert_eq!(
            storage.remove("/nope").await.unwrap_err().errno(),
            libc::ENOENT
        );
        Ok(())
    }

    #[test]
    fn paths_stay_below_root() {
        let storage = LocalStorage::new("/srv/data");
        assert_eq!(
            storage.resolve("/a/./b").unwrap(),
            std::path::PathBuf::from("/srv/data/a/b")
        );
        assert!(storage.resolve("/a/../../etc/passwd").is_err());
        assert!(storage.resolve("/").is_err());
    }
}
