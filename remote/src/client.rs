use anyhow::{Context, anyhow, bail};
use tracing::instrument;

use crate::protocol::{
    ClientHello, ErrorReply, OpenMode, Request, RequestFrame, Response, ServerHello,
    ServerMessage,
};
use crate::streams::{Connection, RecvStream, SendStream};

/// Error reported by the peer server, carries the POSIX errno it failed with.
///
/// Client methods return it wrapped in [`anyhow::Error`], use `downcast_ref` to inspect it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message} (errno {errno})")]
pub struct ServerError {
    pub errno: i32,
    pub message: String,
}

impl From<ErrorReply> for ServerError {
    fn from(reply: ErrorReply) -> Self {
        Self {
            errno: reply.errno,
            message: reply.message,
        }
    }
}

/// Answer to a progress (sync) call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    Done,
    Started { poll_after: std::time::Duration },
}

/// Name of the user running this process, falls back to the numeric uid.
pub fn local_user() -> String {
    let uid = nix::unistd::getuid();
    match nix::unistd::User::from_uid(uid) {
        Ok(Some(user)) => user.name,
        _ => uid.to_string(),
    }
}

/// One open connection to a tpcd server, operating on at most one file.
///
/// Requests are answered in order. The only unsolicited message is the completion of a
/// transfer started with [`Client::sync`]; if it overtakes a reply it is kept until
/// [`Client::wait_completed`] asks for it.
#[derive(Debug)]
pub struct Client {
    endpoint: String,
    send: SendStream,
    recv: RecvStream,
    next_id: u64,
    completion: Option<Option<ErrorReply>>,
}

impl Client {
    #[instrument(level = "debug")]
    pub async fn connect(endpoint: &str, timeout: std::time::Duration) -> anyhow::Result<Self> {
        tokio::time::timeout(timeout, Self::handshake(endpoint))
            .await
            .map_err(|_| anyhow!("timed out connecting to {endpoint} after {timeout:?}"))?
    }

    async fn handshake(endpoint: &str) -> anyhow::Result<Self> {
        let stream = tokio::net::TcpStream::connect(endpoint)
            .await
            .with_context(|| format!("failed to connect to {endpoint}"))?;
        stream.set_nodelay(true)?;
        let mut connection = Connection::new(stream);
        connection
            .send_mut()
            .send_control_message(&ClientHello {
                version: common::version::ProtocolVersion::current(),
                user: local_user(),
                pid: std::process::id(),
            })
            .await
            .with_context(|| format!("failed to send hello to {endpoint}"))?;
        let hello: ServerHello = connection
            .recv_mut()
            .recv_object()
            .await?
            .ok_or_else(|| anyhow!("{endpoint} closed the connection during hello"))?;
        match hello {
            ServerHello::Accepted { version } => {
                let ours = common::version::ProtocolVersion::current();
                if !ours.is_compatible_with(&version) {
                    bail!("{endpoint} runs incompatible version {version}, ours is {ours}");
                }
                tracing::debug!("connected to {} running {}", endpoint, version);
            }
            ServerHello::Rejected { reason } => {
                bail!("{endpoint} rejected the connection: {reason}");
            }
        }
        let (send, recv) = connection.into_parts();
        Ok(Self {
            endpoint: endpoint.to_string(),
            send,
            recv,
            next_id: 0,
            completion: None,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn recv_message(&mut self) -> anyhow::Result<ServerMessage> {
        self.recv
            .recv_object()
            .await?
            .ok_or_else(|| anyhow!("{} closed the connection", self.endpoint))
    }

    async fn exchange(&mut self, request: Request) -> anyhow::Result<Response> {
        let id = self.next_id;
        self.next_id += 1;
        self.send
            .send_control_message(&RequestFrame { id, request })
            .await?;
        loop {
            match self.recv_message().await? {
                ServerMessage::Reply {
                    id: reply_id,
                    response,
                } if reply_id == id => {
                    return match response {
                        Response::Error(reply) => Err(ServerError::from(reply).into()),
                        response => Ok(response),
                    };
                }
                // answer to a request that timed out earlier
                ServerMessage::Reply { id: reply_id, .. } if reply_id < id => {
                    tracing::debug!("dropping stale reply {} from {}", reply_id, self.endpoint);
                }
                ServerMessage::Reply { id: reply_id, .. } => {
                    bail!(
                        "unexpected reply {} from {}, expected {}",
                        reply_id,
                        self.endpoint,
                        id
                    );
                }
                ServerMessage::Completed { error } => {
                    self.completion = Some(error);
                }
            }
        }
    }

    async fn request(
        &mut self,
        request: Request,
        timeout: std::time::Duration,
        what: &str,
    ) -> anyhow::Result<Response> {
        let endpoint = self.endpoint.clone();
        tokio::time::timeout(timeout, self.exchange(request))
            .await
            .map_err(|_| anyhow!("{what} on {endpoint} timed out after {timeout:?}"))?
    }

    fn unexpected(&self, what: &str, response: &Response) -> anyhow::Error {
        anyhow!("unexpected answer to {} from {}: {:?}", what, self.endpoint, response)
    }

    pub async fn open(
        &mut self,
        path: &str,
        mode: OpenMode,
        create_mode: u32,
        opaque: &str,
        timeout: std::time::Duration,
    ) -> anyhow::Result<()> {
        let request = Request::Open {
            path: path.to_string(),
            mode,
            create_mode,
            opaque: opaque.to_string(),
        };
        match self.request(request, timeout, "open").await? {
            Response::Ok => Ok(()),
            response => Err(self.unexpected("open", &response)),
        }
    }

    /// Reads up to `len` bytes, an empty result means end of file.
    pub async fn read(
        &mut self,
        offset: u64,
        len: u64,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Vec<u8>> {
        match self
            .request(Request::Read { offset, len }, timeout, "read")
            .await?
        {
            Response::Data(data) => Ok(data),
            response => Err(self.unexpected("read", &response)),
        }
    }

    pub async fn write(
        &mut self,
        offset: u64,
        data: Vec<u8>,
        timeout: std::time::Duration,
    ) -> anyhow::Result<u64> {
        match self
            .request(Request::Write { offset, data }, timeout, "write")
            .await?
        {
            Response::Written(written) => Ok(written),
            response => Err(self.unexpected("write", &response)),
        }
    }

    /// Progress call, on a third-party destination this drives the transfer.
    pub async fn sync(&mut self, timeout: std::time::Duration) -> anyhow::Result<SyncStatus> {
        match self.request(Request::Sync, timeout, "sync").await? {
            Response::Ok => Ok(SyncStatus::Done),
            Response::Started { poll_after_secs } => Ok(SyncStatus::Started {
                poll_after: std::time::Duration::from_secs(poll_after_secs),
            }),
            response => Err(self.unexpected("sync", &response)),
        }
    }

    /// Waits for the outcome of a transfer started by [`Client::sync`].
    pub async fn wait_completed(&mut self, timeout: std::time::Duration) -> anyhow::Result<()> {
        let completion = match self.completion.take() {
            Some(completion) => completion,
            None => {
                let endpoint = self.endpoint.clone();
                tokio::time::timeout(timeout, async {
                    loop {
                        match self.recv_message().await? {
                            ServerMessage::Completed { error } => {
                                return Ok::<_, anyhow::Error>(error);
                            }
                            ServerMessage::Reply { id, .. } => {
                                tracing::debug!("dropping stale reply {} from {}", id, endpoint);
                            }
                        }
                    }
                })
                .await
                .map_err(|_| {
                    anyhow!("transfer on {endpoint} did not complete within {timeout:?}")
                })??
            }
        };
        match completion {
            None => Ok(()),
            Some(reply) => Err(ServerError::from(reply).into()),
        }
    }

    pub async fn close(&mut self, timeout: std::time::Duration) -> anyhow::Result<()> {
        match self.request(Request::Close, timeout, "close").await? {
            Response::Ok => Ok(()),
            response => Err(self.unexpected("close", &response)),
        }
    }
}
