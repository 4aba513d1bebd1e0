//! Destination-side transfer: the progress state machine and the pull worker
//!
//! A destination-setup handle moves `Idle -> Enabled -> Running -> Done`. The first sync only
//! enables the transfer, the second launches the worker on its own task and returns at once.
//! The worker reports its outcome exactly once through the [`TransferCallback`] captured at
//! launch. Erasing the session from the registry is the only way to stop a running worker; it
//! checks liveness before opening the remote source, after opening it, and after every chunk.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::instrument;

use crate::error::TpcError;
use crate::session::AccessMode;
use crate::storage::StorageFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    #[default]
    Idle,
    Enabled,
    Running,
    Done,
}

/// Receives the outcome of a transfer.
pub trait TransferCallback: Send {
    fn complete(self: Box<Self>, outcome: Result<(), TpcError>);
}

impl TransferCallback for tokio::sync::oneshot::Sender<Result<(), TpcError>> {
    fn complete(self: Box<Self>, outcome: Result<(), TpcError>) {
        // the requester may have gone away, nobody is left to tell
        let _ = self.send(outcome);
    }
}

/// Local file shared between a handle and its worker, `None` once closed.
pub(crate) type SharedLocalFile = std::sync::Arc<tokio::sync::Mutex<Option<Box<dyn StorageFile>>>>;

/// Per-handle transfer state, shared with the worker.
#[derive(Debug, Default)]
pub(crate) struct TransferControl {
    state: std::sync::Mutex<TransferState>,
    succeeded: AtomicBool,
}

impl TransferControl {
    pub fn state(&self) -> TransferState {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    pub fn set_state(&self, state: TransferState) {
        *self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = state;
    }

    /// Applies `transition` to the current state atomically and returns its result.
    pub fn transition<T>(&self, transition: impl FnOnce(&mut TransferState) -> T) -> T {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        transition(&mut state)
    }

    pub fn succeeded(&self) -> bool {
        self.succeeded.load(Ordering::Acquire)
    }

    fn mark_succeeded(&self) {
        self.succeeded.store(true, Ordering::Release);
    }
}

/// Everything the worker needs, captured when the transfer starts.
pub(crate) struct TransferJob {
    pub shared: std::sync::Arc<crate::fs::Shared>,
    pub key: String,
    pub mode: AccessMode,
    pub block_size: u64,
    pub local: SharedLocalFile,
    pub control: std::sync::Arc<TransferControl>,
}

fn aborted() -> TpcError {
    TpcError::ConnectionAborted("sync - TPC session has been closed by disconnect".to_string())
}

impl TransferJob {
    fn check_alive(&self) -> Result<(), TpcError> {
        if self.shared.registry.exists(self.mode, &self.key) {
            Ok(())
        } else {
            tracing::info!(key = %self.key, "tpc session invalidated during sync");
            Err(aborted())
        }
    }

    fn source_url(&self) -> Result<remote::url::SourceUrl, TpcError> {
        let entry = self
            .shared
            .registry
            .lookup(self.mode, &self.key)
            .ok_or_else(|| {
                tracing::info!(key = %self.key, "tpc session invalidated during sync");
                aborted()
            })?;
        // only the key and origin travel to the source, it has its own copy of the rest
        let cgi = format!("tpc.key={}&tpc.org={}", entry.key, entry.org);
        Ok(remote::url::SourceUrl::new(&entry.src, &entry.lfn, &cgi))
    }

    async fn write_local(&self, offset: u64, data: &[u8]) -> Result<usize, TpcError> {
        let mut local = self.local.lock().await;
        let file = local
            .as_mut()
            .ok_or_else(|| TpcError::Io("sync - tpc local file already closed".to_string()))?;
        file.write(offset, data)
            .await
            .map_err(|error| TpcError::Io(format!("sync - tpc local write failed: {error}")))
    }

    async fn pull(&self) -> Result<(), TpcError> {
        let config = &self.shared.config;
        let url = self.source_url()?;
        tracing::debug!("sync-url={}", url);
        let mut source = self
            .shared
            .connector
            .open(&url, config.remote_open_timeout)
            .await
            .map_err(|error| {
                TpcError::RemoteFault(format!(
                    "sync - TPC open failed for url={url}: {error:#}"
                ))
            })?;
        self.check_alive()?;
        let progress = common::get_progress();
        let mut buffer = vec![0u8; self.block_size as usize];
        let mut offset = 0u64;
        tracing::debug!("tpc pull");
        loop {
            throttle::get_chunk_token().await;
            let read = source
                .read(offset, &mut buffer, config.remote_read_timeout)
                .await
                .map_err(|error| {
                    tracing::info!("tpc transfer terminated - remote read failed: {:#}", error);
                    TpcError::Io(format!("sync - tpc remote read failed: {error:#}"))
                })?;
            tracing::trace!(offset, read, request = buffer.len(), "tpc read");
            if read == 0 {
                break;
            }
            let written = self.write_local(offset, &buffer[..read]).await?;
            tracing::trace!(offset, read, written, "tpc write");
            if written != read {
                tracing::info!("tpc transfer terminated - local write failed");
                return Err(TpcError::Io(format!(
                    "sync - tpc local write failed: wrote {written} of {read} bytes at offset {offset}"
                )));
            }
            progress.chunks_pulled.inc();
            progress.bytes_pulled.add(read as u64);
            offset += read as u64;
            self.check_alive()?;
        }
        source
            .close(config.remote_close_timeout)
            .await
            .map_err(|error| {
                TpcError::Io(format!(
                    "sync - tpc remote close failed, possible checksum mismatch: {error:#}"
                ))
            })?;
        self.close_local().await
    }

    // a completed transfer closes the destination like a client close would
    async fn close_local(&self) -> Result<(), TpcError> {
        self.shared.registry.erase(self.mode, &self.key);
        let file = self.local.lock().await.take();
        match file {
            Some(mut file) => file
                .close()
                .await
                .map_err(|error| TpcError::Io(format!("sync - tpc local close failed: {error}"))),
            None => Err(TpcError::Io(
                "sync - tpc local file already closed".to_string(),
            )),
        }
    }
}

/// Runs one transfer to completion and reports the outcome through `callback`.
#[instrument(skip_all, fields(key = %job.key))]
pub(crate) async fn run_worker(job: TransferJob, callback: Box<dyn TransferCallback>) {
    let _slot = throttle::transfer_permit().await;
    let progress = common::get_progress();
    let outcome = {
        let _guard = progress.transfers.guard();
        tracing::info!("tpc transfer started");
        job.pull().await
    };
    match &outcome {
        Ok(()) => {
            tracing::info!("tpc transfer finished");
            job.control.mark_succeeded();
        }
        Err(error) => {
            tracing::warn!("tpc transfer failed: {}", error);
            progress.transfers_failed.inc();
        }
    }
    job.control.set_state(TransferState::Done);
    callback.complete(outcome);
}
