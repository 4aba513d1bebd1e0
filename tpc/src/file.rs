use std::sync::Arc;
use tracing::instrument;

use crate::caller::Caller;
use crate::error::TpcError;
use crate::fs::Shared;
use crate::handshake::{self, Role};
use crate::session::AccessMode;
use crate::transfer::{
    SharedLocalFile, TransferCallback, TransferControl, TransferJob, TransferState,
};
use remote::protocol::OpenMode;

/// Answer to a sync (progress) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// nothing to wait for, the outcome of a finished transfer went through its callback
    Ok,
    /// a transfer is running, poll again after the given delay
    Started { poll_after: std::time::Duration },
}

/// One open file as seen by a client connection.
///
/// Opens carrying `tpc.*` parameters take part in a third-party copy (see
/// [`crate::handshake`]); on a destination-setup handle sync drives the transfer.
pub struct TpcFile {
    shared: Arc<Shared>,
    path: String,
    mode: AccessMode,
    role: Role,
    key: Option<String>,
    block_size: u64,
    local: SharedLocalFile,
    control: Arc<TransferControl>,
    worker: Option<tokio::task::JoinHandle<()>>,
    is_open: bool,
    // opened with create or truncate, or as a transfer target
    truncate_on_delete: bool,
}

impl TpcFile {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let block_size = shared.config.effective_block_size();
        Self {
            shared,
            path: String::new(),
            mode: AccessMode::Read,
            role: Role::None,
            key: None,
            block_size,
            local: Arc::new(tokio::sync::Mutex::new(None)),
            control: Arc::new(TransferControl::default()),
            worker: None,
            is_open: false,
            truncate_on_delete: false,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> TransferState {
        self.control.state()
    }

    /// Path actually opened, differs from the requested one for a verifying open.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    /// Whether a transfer run by this handle completed successfully.
    pub fn transfer_succeeded(&self) -> bool {
        self.control.succeeded()
    }

    #[instrument(skip(self, caller, opaque), fields(tident = %caller.tident))]
    pub async fn open(
        &mut self,
        path: &str,
        mode: OpenMode,
        create_mode: u32,
        caller: &Caller,
        opaque: &str,
    ) -> Result<(), TpcError> {
        if self.is_open {
            return Err(TpcError::InvalidArgument(
                "open - file is already open".to_string(),
            ));
        }
        let access = AccessMode::of(&mode);
        let handshake = handshake::handshake(
            &self.shared.registry,
            &self.shared.config,
            caller,
            path,
            opaque,
            access,
        )
        .await?;
        self.mode = access;
        self.role = handshake.role;
        self.key = handshake.key.clone();
        let mut mode = mode;
        if handshake.truncate {
            mode.write = true;
            mode.truncate = true;
        }
        match self.open_storage(&handshake, mode, create_mode, caller).await {
            Ok(()) => {
                self.is_open = true;
                self.path = handshake.path;
                self.truncate_on_delete =
                    mode.is_create_or_truncate() || self.role == Role::DestinationSetup;
                Ok(())
            }
            Err(error) => {
                // a handle that failed to open must not keep the session alive
                if let Some(key) = self.key.take() {
                    self.shared.registry.erase(self.mode, &key);
                }
                self.role = Role::None;
                Err(error)
            }
        }
    }

    async fn open_storage(
        &mut self,
        handshake: &handshake::Handshake,
        mode: OpenMode,
        create_mode: u32,
        caller: &Caller,
    ) -> Result<(), TpcError> {
        let sizing = crate::opaque::apply_sizing(&handshake.opaque, self.shared.config.block_size)?;
        let file = self
            .shared
            .storage
            .open(&handshake.path, mode, create_mode, caller, &sizing.opaque)
            .await?;
        self.block_size = sizing.block_size;
        *self.local.lock().await = Some(file);
        Ok(())
    }

    pub async fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<usize, TpcError> {
        let mut local = self.local.lock().await;
        local
            .as_mut()
            .ok_or_else(|| TpcError::not_open("read"))?
            .read(offset, buf)
            .await
    }

    pub async fn write(&mut self, offset: u64, data: &[u8]) -> Result<usize, TpcError> {
        let mut local = self.local.lock().await;
        local
            .as_mut()
            .ok_or_else(|| TpcError::not_open("write"))?
            .write(offset, data)
            .await
    }

    /// Progress call.
    ///
    /// On a destination-setup handle the first call enables the transfer and the second launches
    /// it in the background, answering [`SyncOutcome::Started`] without waiting; `callback`
    /// receives the outcome once the transfer finishes. Callbacks passed to any other call are
    /// dropped unused. All other handles just flush the underlying file.
    #[instrument(skip_all, fields(path = %self.path, role = ?self.role))]
    pub async fn sync(
        &mut self,
        callback: Box<dyn TransferCallback>,
    ) -> Result<SyncOutcome, TpcError> {
        if self.role != Role::DestinationSetup {
            let mut local = self.local.lock().await;
            local
                .as_mut()
                .ok_or_else(|| TpcError::not_open("sync"))?
                .sync()
                .await?;
            return Ok(SyncOutcome::Ok);
        }
        let poll_after = self.shared.config.poll_after;
        let previous = self.control.transition(|state| {
            let previous = *state;
            *state = match previous {
                TransferState::Idle => TransferState::Enabled,
                TransferState::Enabled => TransferState::Running,
                other => other,
            };
            previous
        });
        match previous {
            TransferState::Idle => {
                tracing::debug!("tpc enabled - 1st sync");
                Ok(SyncOutcome::Ok)
            }
            TransferState::Running => {
                tracing::debug!("tpc already running - >2nd sync");
                Ok(SyncOutcome::Started { poll_after })
            }
            TransferState::Done => {
                tracing::debug!("tpc already finished - >2nd sync");
                Ok(SyncOutcome::Ok)
            }
            TransferState::Enabled => {
                tracing::debug!("tpc now running - 2nd sync");
                let Some(key) = self.key.clone() else {
                    self.control.set_state(TransferState::Done);
                    return Err(TpcError::InvalidArgument(
                        "sync - destination handle without tpc key".to_string(),
                    ));
                };
                let job = TransferJob {
                    shared: self.shared.clone(),
                    key,
                    mode: self.mode,
                    block_size: self.block_size,
                    local: self.local.clone(),
                    control: self.control.clone(),
                };
                self.worker = Some(tokio::spawn(crate::transfer::run_worker(job, callback)));
                Ok(SyncOutcome::Started { poll_after })
            }
        }
    }

    /// Closes the handle: erases the session it owns, waits for a running transfer and closes
    /// the file. The target of a transfer that did not succeed is removed. Closing twice is fine.
    pub async fn close(&mut self) -> Result<(), TpcError> {
        self.teardown(false).await
    }

    /// Like [`TpcFile::close`], for a client that went away without closing. Files it created
    /// or truncated are removed unless a transfer into them succeeded.
    pub async fn disconnect(&mut self) -> Result<(), TpcError> {
        self.teardown(true).await
    }

    #[instrument(skip(self), fields(path = %self.path))]
    async fn teardown(&mut self, disconnect: bool) -> Result<(), TpcError> {
        if let Some(key) = self.key.take() {
            self.shared.registry.erase(self.mode, &key);
        }
        if let Some(worker) = self.worker.take()
            && let Err(error) = worker.await
        {
            tracing::error!("tpc worker did not finish cleanly: {}", error);
        }
        let file = self.local.lock().await.take();
        let result = match file {
            Some(mut file) => file.close().await,
            None => Ok(()),
        };
        if std::mem::replace(&mut self.is_open, false) {
            let succeeded = self.control.succeeded();
            let failed_transfer = self.role == Role::DestinationSetup && !succeeded;
            let abandoned = disconnect && self.truncate_on_delete && !succeeded;
            if failed_transfer || abandoned {
                tracing::info!("removing incomplete file {}", self.path);
                if let Err(error) = self.shared.storage.remove(&self.path).await {
                    tracing::warn!("failed to remove incomplete file {}: {}", self.path, error);
                }
            }
        }
        result
    }
}
