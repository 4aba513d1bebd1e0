//! Networking between tpcd servers
//!
//! A destination server pulls file contents from a source server over a plain TCP connection
//! carrying length-delimited, bincode encoded frames ([`streams`]). The message set is defined
//! in [`protocol`]; [`client::Client`] implements the requesting side and the `tpc` crate the
//! serving side.
//!
//! The transfer worker does not use the client directly but goes through [`RemoteConnector`],
//! which lets tests substitute an in-process source.

use anyhow::Context;

pub mod client;
pub mod protocol;
pub mod streams;
pub mod url;

pub use client::{Client, ServerError, SyncStatus};

/// Read side of a remote source file.
#[async_trait::async_trait]
pub trait RemoteReader: Send {
    /// Reads into `buf` at `offset`, returns the number of bytes read, 0 at end of file.
    async fn read(
        &mut self,
        offset: u64,
        buf: &mut [u8],
        timeout: std::time::Duration,
    ) -> anyhow::Result<usize>;

    async fn close(&mut self, timeout: std::time::Duration) -> anyhow::Result<()>;
}

/// Opens remote source files for reading.
#[async_trait::async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn open(
        &self,
        url: &url::SourceUrl,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Box<dyn RemoteReader>>;
}

/// Connects to the source server named in the url over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

#[async_trait::async_trait]
impl RemoteConnector for TcpConnector {
    async fn open(
        &self,
        url: &url::SourceUrl,
        timeout: std::time::Duration,
    ) -> anyhow::Result<Box<dyn RemoteReader>> {
        let open = async {
            let mut client = Client::connect(&url.endpoint, timeout).await?;
            client
                .open(
                    &url.path,
                    protocol::OpenMode::read_only(),
                    0,
                    &url.opaque,
                    timeout,
                )
                .await?;
            Ok::<_, anyhow::Error>(client)
        };
        let client = tokio::time::timeout(timeout, open)
            .await
            .map_err(|_| anyhow::anyhow!("opening {} timed out after {:?}", url, timeout))?
            .with_context(|| format!("failed to open {url}"))?;
        Ok(Box::new(client))
    }
}

#[async_trait::async_trait]
impl RemoteReader for Client {
    async fn read(
        &mut self,
        offset: u64,
        buf: &mut [u8],
        timeout: std::time::Duration,
    ) -> anyhow::Result<usize> {
        let data = Client::read(self, offset, buf.len() as u64, timeout).await?;
        if data.len() > buf.len() {
            anyhow::bail!(
                "{} returned {} bytes for a read of {}",
                self.endpoint(),
                data.len(),
                buf.len()
            );
        }
        buf[..data.len()].copy_from_slice(&data);
        Ok(data.len())
    }

    async fn close(&mut self, timeout: std::time::Duration) -> anyhow::Result<()> {
        Client::close(self, timeout).await
    }
}
