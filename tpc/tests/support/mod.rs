//! Helpers shared by the integration tests: an in-memory storage backend and remote connectors
//! that stand in for the source server without any networking.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use remote::protocol::OpenMode;
use remote::url::SourceUrl;
use remote::{RemoteConnector, RemoteReader};
use tpc::{Caller, Storage, StorageFile, TpcConfig, TpcError, TpcFs};

pub const SOURCE_ENDPOINT: &str = "source.example:1094";

/// The client orchestrating the copy, it talks to both servers.
pub fn client() -> Caller {
    Caller::new("alice.4242:1@client", "client.example", "unix")
}

/// The destination server's connection to the source server.
pub fn puller() -> Caller {
    Caller::new("tpcd.77:9@dst", "dst.example", "unix")
}

pub fn destination_opaque(key: &str, lfn: &str) -> String {
    format!("tpc.key={key}&tpc.src={SOURCE_ENDPOINT}&tpc.lfn={lfn}")
}

pub fn source_opaque(key: &str) -> String {
    format!("tpc.key={key}&tpc.dst=dst.example")
}

/// `len` bytes of a repeating, offset dependent pattern.
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

fn errno(errno: i32, message: String) -> TpcError {
    TpcError::Storage { errno, message }
}

/// Files kept in memory, shared by every clone.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    short_writes: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write with more than one byte stores one byte less than it was given.
    pub fn with_short_writes() -> Self {
        Self {
            short_writes: true,
            ..Self::default()
        }
    }

    pub fn insert(&self, path: &str, data: Vec<u8>) {
        self.files.lock().unwrap().insert(path.to_string(), data);
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn exists(&self, path: &str) -> bool {
        self.files.lock().unwrap().contains_key(path)
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn open(
        &self,
        path: &str,
        mode: OpenMode,
        _create_mode: u32,
        _caller: &Caller,
        _opaque: &str,
    ) -> Result<Box<dyn StorageFile>, TpcError> {
        let mut files = self.files.lock().unwrap();
        if mode.create {
            files.entry(path.to_string()).or_default();
        }
        let Some(data) = files.get_mut(path) else {
            return Err(errno(libc::ENOENT, format!("open - {path}: not found")));
        };
        if mode.truncate {
            data.clear();
        }
        Ok(Box::new(MemoryFile {
            files: self.files.clone(),
            path: path.to_string(),
            short_writes: self.short_writes,
            open: true,
        }))
    }

    async fn remove(&self, path: &str) -> Result<(), TpcError> {
        match self.files.lock().unwrap().remove(path) {
            Some(_) => Ok(()),
            None => Err(errno(libc::ENOENT, format!("remove - {path}: not found"))),
        }
    }
}

struct MemoryFile {
    files: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    path: String,
    short_writes: bool,
    open: bool,
}

impl MemoryFile {
    fn check_open(&self, operation: &str) -> Result<(), TpcError> {
        if self.open {
            Ok(())
        } else {
            Err(errno(libc::EBADF, format!("{operation} - file is not open")))
        }
    }
}

#[async_trait::async_trait]
impl StorageFile for MemoryFile {
    async fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, TpcError> {
        self.check_open("read")?;
        let files = self.files.lock().unwrap();
        let data = files.get(&self.path).map(Vec::as_slice).unwrap_or_default();
        let start = (offset as usize).min(data.len());
        let len = buf.len().min(data.len() - start);
        buf[..len].copy_from_slice(&data[start..start + len]);
        Ok(len)
    }

    async fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize, TpcError> {
        self.check_open("write")?;
        let data = if self.short_writes && data.len() > 1 {
            &data[..data.len() - 1]
        } else {
            data
        };
        let mut files = self.files.lock().unwrap();
        let file = files.entry(self.path.clone()).or_default();
        let end = offset as usize + data.len();
        if file.len() < end {
            file.resize(end, 0);
        }
        file[offset as usize..end].copy_from_slice(data);
        Ok(data.len())
    }

    async fn sync(&mut self) -> Result<(), TpcError> {
        self.check_open("sync")
    }

    async fn close(&mut self) -> Result<(), TpcError> {
        self.check_open("close")?;
        self.open = false;
        Ok(())
    }
}

/// Connector refusing every open.
#[derive(Debug, Default)]
pub struct UnreachableConnector;

#[async_trait::async_trait]
impl RemoteConnector for UnreachableConnector {
    async fn open(
        &self,
        url: &SourceUrl,
        _timeout: std::time::Duration,
    ) -> anyhow::Result<Box<dyn RemoteReader>> {
        anyhow::bail!("failed to connect to {}: connection refused", url.endpoint)
    }
}

/// Serves pulls from a second, in-process server: the url is opened on `source` the way the
/// source server would open it for a connection from the destination.
pub struct LoopbackConnector {
    source: TpcFs,
    urls: Mutex<Vec<SourceUrl>>,
}

impl LoopbackConnector {
    pub fn new(source: TpcFs) -> Self {
        Self {
            source,
            urls: Mutex::new(Vec::new()),
        }
    }

    /// Every url a pull asked for, in order.
    pub fn urls(&self) -> Vec<SourceUrl> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl RemoteConnector for LoopbackConnector {
    async fn open(
        &self,
        url: &SourceUrl,
        _timeout: std::time::Duration,
    ) -> anyhow::Result<Box<dyn RemoteReader>> {
        self.urls.lock().unwrap().push(url.clone());
        let mut file = self.source.new_file();
        file.open(&url.path, OpenMode::read_only(), 0, &puller(), &url.opaque)
            .await?;
        Ok(Box::new(LoopbackReader { file }))
    }
}

struct LoopbackReader {
    file: tpc::TpcFile,
}

#[async_trait::async_trait]
impl RemoteReader for LoopbackReader {
    async fn read(
        &mut self,
        offset: u64,
        buf: &mut [u8],
        _timeout: std::time::Duration,
    ) -> anyhow::Result<usize> {
        Ok(self.file.read(offset, buf).await?)
    }

    async fn close(&mut self, _timeout: std::time::Duration) -> anyhow::Result<()> {
        Ok(self.file.close().await?)
    }
}

/// Connector handing out readers over fixed data whose reads only proceed when the test
/// releases them through the gate.
pub struct GatedConnector {
    data: Arc<Vec<u8>>,
    gate: Arc<tokio::sync::Semaphore>,
    reads: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<usize>>>,
    failing_read: Option<usize>,
    failing_close: bool,
}

impl GatedConnector {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            gate: Arc::new(tokio::sync::Semaphore::new(0)),
            reads: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
            failing_read: None,
            failing_close: false,
        }
    }

    /// The read with index `read` (counting from zero) fails once it passes the gate.
    pub fn failing_read(mut self, read: usize) -> Self {
        self.failing_read = Some(read);
        self
    }

    /// Closing a reader fails.
    pub fn failing_close(mut self) -> Self {
        self.failing_close = true;
        self
    }

    /// Lets `reads` more reads through.
    pub fn release(&self, reads: usize) {
        self.gate.add_permits(reads);
    }

    /// Number of reads started so far, including one waiting at the gate.
    pub fn reads_started(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Buffer length of every read that passed the gate, in order.
    pub fn request_sizes(&self) -> Vec<usize> {
        self.requests.lock().unwrap().clone()
    }

    pub async fn wait_for_reads(&self, reads: usize) {
        while self.reads_started() < reads {
            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }
}

#[async_trait::async_trait]
impl RemoteConnector for GatedConnector {
    async fn open(
        &self,
        _url: &SourceUrl,
        _timeout: std::time::Duration,
    ) -> anyhow::Result<Box<dyn RemoteReader>> {
        Ok(Box::new(GatedReader {
            data: self.data.clone(),
            gate: self.gate.clone(),
            reads: self.reads.clone(),
            requests: self.requests.clone(),
            failing_read: self.failing_read,
            failing_close: self.failing_close,
        }))
    }
}

struct GatedReader {
    data: Arc<Vec<u8>>,
    gate: Arc<tokio::sync::Semaphore>,
    reads: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<usize>>>,
    failing_read: Option<usize>,
    failing_close: bool,
}

#[async_trait::async_trait]
impl RemoteReader for GatedReader {
    async fn read(
        &mut self,
        offset: u64,
        buf: &mut [u8],
        _timeout: std::time::Duration,
    ) -> anyhow::Result<usize> {
        let index = self.reads.fetch_add(1, Ordering::SeqCst);
        self.gate.acquire().await?.forget();
        self.requests.lock().unwrap().push(buf.len());
        if self.failing_read == Some(index) {
            anyhow::bail!("connection reset by peer");
        }
        let start = (offset as usize).min(self.data.len());
        let len = buf.len().min(self.data.len() - start);
        buf[..len].copy_from_slice(&self.data[start..start + len]);
        Ok(len)
    }

    async fn close(&mut self, _timeout: std::time::Duration) -> anyhow::Result<()> {
        if self.failing_close {
            anyhow::bail!("server checksum differs");
        }
        Ok(())
    }
}

pub fn server(storage: MemoryStorage, connector: Arc<dyn RemoteConnector>) -> TpcFs {
    server_with_config(storage, connector, TpcConfig::default())
}

pub fn server_with_config(
    storage: MemoryStorage,
    connector: Arc<dyn RemoteConnector>,
    config: TpcConfig,
) -> TpcFs {
    TpcFs::new(Arc::new(storage), connector, config)
}
