//! TCP front end: one [`TpcFile`] per client connection
//!
//! After the hello exchange a connection carries [`RequestFrame`]s, each answered by one reply
//! with the same id, in order. A sync that launched a transfer is additionally answered by a
//! single unsolicited [`ServerMessage::Completed`] once the transfer finishes. A client that
//! drops the connection gets its handle disconnected, which stops any transfer it started.

use anyhow::Context;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::instrument;

use crate::caller::Caller;
use crate::error::TpcError;
use crate::file::{SyncOutcome, TpcFile};
use crate::fs::TpcFs;
use remote::protocol::{
    ClientHello, ErrorReply, MAX_READ_LEN, Request, RequestFrame, Response, ServerHello,
    ServerMessage,
};
use remote::streams::{Connection, RecvStream, SharedSendStream};

/// Security protocol reported for every caller of the plain TCP front end.
pub const PROTOCOL: &str = "unix";

/// Totals reported when the server stops.
#[derive(Debug, Default, Clone, Copy)]
pub struct ServeSummary {
    pub connections: u64,
}

impl std::fmt::Display for ServeSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "connections served: {}", self.connections)?;
        write!(
            f,
            "{}",
            common::progress::ProgressPrinter::new(common::get_progress()).print()
        )
    }
}

pub async fn bind(addr: &str) -> anyhow::Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))
}

/// Accepts connections until `cancel` fires, then waits for the open ones to finish.
#[instrument(skip_all, fields(addr = ?listener.local_addr().ok()))]
pub async fn serve(
    listener: tokio::net::TcpListener,
    fs: TpcFs,
    cancel: tokio_util::sync::CancellationToken,
) -> anyhow::Result<ServeSummary> {
    let sequence = std::sync::Arc::new(AtomicU64::new(0));
    let mut connections = tokio::task::JoinSet::new();
    loop {
        let (stream, peer) = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(error) => {
                    tracing::warn!("failed to accept connection: {}", error);
                    continue;
                }
            },
        };
        let id = sequence.fetch_add(1, Ordering::Relaxed);
        tracing::info!("accepted connection {} from {}", id, peer);
        let fs = fs.clone();
        connections.spawn(async move {
            if let Err(error) = handle_connection(stream, peer, id, fs).await {
                tracing::warn!("connection {} from {} failed: {:#}", id, peer, error);
            }
        });
        // reap finished connections so the set does not grow without bound
        while connections.try_join_next().is_some() {}
    }
    tracing::info!("shutting down, waiting for {} connections", connections.len());
    while connections.join_next().await.is_some() {}
    Ok(ServeSummary {
        connections: sequence.load(Ordering::Relaxed),
    })
}

fn caller_host(peer: &std::net::SocketAddr) -> String {
    if peer.ip().is_loopback()
        && let Ok(hostname) = nix::unistd::gethostname()
    {
        return hostname.to_string_lossy().into_owned();
    }
    peer.ip().to_string()
}

#[instrument(skip(stream, fs))]
async fn handle_connection(
    stream: tokio::net::TcpStream,
    peer: std::net::SocketAddr,
    id: u64,
    fs: TpcFs,
) -> anyhow::Result<()> {
    stream.set_nodelay(true)?;
    let mut connection = Connection::new(stream);
    let Some(hello) = connection.recv_mut().recv_object::<ClientHello>().await? else {
        tracing::debug!("connection closed before hello");
        return Ok(());
    };
    let ours = common::version::ProtocolVersion::current();
    if !ours.is_compatible_with(&hello.version) {
        let reason = format!("incompatible version {}, server runs {}", hello.version, ours);
        tracing::warn!("rejecting {}: {}", peer, reason);
        connection
            .send_mut()
            .send_control_message(&ServerHello::Rejected { reason })
            .await?;
        return Ok(());
    }
    connection
        .send_mut()
        .send_control_message(&ServerHello::Accepted { version: ours })
        .await?;
    let host = caller_host(&peer);
    let caller = Caller::new(
        &format!("{}.{}:{}@{}", hello.user, hello.pid, id, host),
        &host,
        PROTOCOL,
    );
    let (send, mut recv) = connection.into_split();
    let mut file = fs.new_file();
    let result = serve_requests(&mut file, &caller, &send, &mut recv).await;
    if let Err(error) = file.disconnect().await {
        tracing::warn!("disconnect of {} failed: {}", caller.tident, error);
    }
    result
}

async fn serve_requests(
    file: &mut TpcFile,
    caller: &Caller,
    send: &SharedSendStream,
    recv: &mut RecvStream,
) -> anyhow::Result<()> {
    loop {
        let Some(RequestFrame { id, request }) = recv.recv_object::<RequestFrame>().await? else {
            tracing::debug!("{} closed the connection", caller.tident);
            return Ok(());
        };
        let response = match dispatch(file, caller, request, send).await {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!("request {} failed: {}", id, error);
                Response::Error(ErrorReply::from(&error))
            }
        };
        send.lock()
            .await
            .send_control_message(&ServerMessage::Reply { id, response })
            .await?;
    }
}

async fn dispatch(
    file: &mut TpcFile,
    caller: &Caller,
    request: Request,
    send: &SharedSendStream,
) -> Result<Response, TpcError> {
    match request {
        Request::Open {
            path,
            mode,
            create_mode,
            opaque,
        } => {
            file.open(&path, mode, create_mode, caller, &opaque).await?;
            Ok(Response::Ok)
        }
        Request::Read { offset, len } => {
            let mut buffer = vec![0u8; len.min(MAX_READ_LEN) as usize];
            let read = file.read(offset, &mut buffer).await?;
            buffer.truncate(read);
            Ok(Response::Data(buffer))
        }
        Request::Write { offset, data } => {
            let written = file.write(offset, &data).await?;
            Ok(Response::Written(written as u64))
        }
        Request::Sync => {
            let (tx, rx) = tokio::sync::oneshot::channel();
            match file.sync(Box::new(tx)).await? {
                SyncOutcome::Ok => Ok(Response::Ok),
                SyncOutcome::Started { poll_after } => {
                    tokio::spawn(forward_completion(rx, send.clone()));
                    Ok(Response::Started {
                        poll_after_secs: poll_after.as_secs(),
                    })
                }
            }
        }
        Request::Close => {
            file.close().await?;
            Ok(Response::Ok)
        }
    }
}

// only the sync that launched the transfer keeps its sender, every other receiver sees a drop
async fn forward_completion(
    rx: tokio::sync::oneshot::Receiver<Result<(), TpcError>>,
    send: SharedSendStream,
) {
    let Ok(outcome) = rx.await else {
        return;
    };
    let message = ServerMessage::Completed {
        error: outcome.as_ref().err().map(ErrorReply::from),
    };
    if let Err(error) = send.lock().await.send_control_message(&message).await {
        tracing::debug!("failed to deliver transfer completion: {:#}", error);
    }
}
