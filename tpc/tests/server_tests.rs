//! End-to-end tests: real tpcd servers on loopback TCP, driven through `remote::Client`.

use std::sync::Arc;
use std::time::Duration;

use remote::protocol::OpenMode;
use remote::{Client, ServerError, SyncStatus};
use tpc::TpcConfig;

const TIMEOUT: Duration = Duration::from_secs(30);

struct TestServer {
    addr: std::net::SocketAddr,
    root: tempfile::TempDir,
    cancel: tokio_util::sync::CancellationToken,
    task: tokio::task::JoinHandle<anyhow::Result<tpc::server::ServeSummary>>,
}

impl TestServer {
    async fn start(config: TpcConfig) -> anyhow::Result<Self> {
        let root = tempfile::tempdir()?;
        let fs = tpc::TpcFs::new(
            Arc::new(tpc::LocalStorage::new(root.path())),
            Arc::new(remote::TcpConnector),
            config,
        );
        let listener = tpc::server::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let cancel = tokio_util::sync::CancellationToken::new();
        let task = tokio::spawn(tpc::server::serve(listener, fs, cancel.clone()));
        Ok(Self {
            addr,
            root,
            cancel,
            task,
        })
    }

    fn endpoint(&self) -> String {
        self.addr.to_string()
    }

    fn path(&self, relative: &str) -> std::path::PathBuf {
        self.root.path().join(relative)
    }

    async fn stop(self) -> anyhow::Result<tpc::server::ServeSummary> {
        self.cancel.cancel();
        self.task.await?
    }
}

fn content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

fn server_errno(error: &anyhow::Error) -> Option<i32> {
    error.downcast_ref::<ServerError>().map(|error| error.errno)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn third_party_copy_over_tcp() -> anyhow::Result<()> {
    let source = TestServer::start(TpcConfig::default()).await?;
    let destination = TestServer::start(TpcConfig::default()).await?;
    let data = content(5 * 1024 * 1024 + 17);
    std::fs::create_dir_all(source.path("data"))?;
    std::fs::write(source.path("data/f"), &data)?;

    let mut source_client = Client::connect(&source.endpoint(), TIMEOUT).await?;
    source_client
        .open(
            "/data/f",
            OpenMode::read_only(),
            0,
            &format!("tpc.key=K42&tpc.dst={}", destination.endpoint()),
            TIMEOUT,
        )
        .await?;
    let mut destination_client = Client::connect(&destination.endpoint(), TIMEOUT).await?;
    destination_client
        .open(
            "/copies/f",
            OpenMode::create_truncate(),
            0o644,
            &format!(
                "tpc.key=K42&tpc.src={}&tpc.lfn=/data/f",
                source.endpoint()
            ),
            TIMEOUT,
        )
        .await?;

    assert_eq!(destination_client.sync(TIMEOUT).await?, SyncStatus::Done);
    assert_eq!(
        destination_client.sync(TIMEOUT).await?,
        SyncStatus::Started {
            poll_after: Duration::from_secs(1800)
        }
    );
    destination_client.wait_completed(TIMEOUT).await?;
    destination_client.close(TIMEOUT).await?;
    source_client.close(TIMEOUT).await?;
    assert_eq!(std::fs::read(destination.path("copies/f"))?, data);

    drop(destination_client);
    drop(source_client);
    let summary = destination.stop().await?;
    assert_eq!(summary.connections, 1);
    // the client's connection and the destination's pull
    let summary = source.stop().await?;
    assert_eq!(summary.connections, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn failed_pull_is_reported_and_cleaned_up() -> anyhow::Result<()> {
    let source = TestServer::start(TpcConfig {
        verify_attempts: 5,
        verify_interval: Duration::from_millis(20),
        ..Default::default()
    })
    .await?;
    let destination = TestServer::start(TpcConfig::default()).await?;

    // no source-side open ever registers this key
    let mut client = Client::connect(&destination.endpoint(), TIMEOUT).await?;
    client
        .open(
            "/copy",
            OpenMode::create_truncate(),
            0o644,
            &format!("tpc.key=nokey&tpc.src={}&tpc.lfn=/data/f", source.endpoint()),
            TIMEOUT,
        )
        .await?;
    assert_eq!(client.sync(TIMEOUT).await?, SyncStatus::Done);
    assert!(matches!(
        client.sync(TIMEOUT).await?,
        SyncStatus::Started { .. }
    ));
    let error = client.wait_completed(TIMEOUT).await.unwrap_err();
    assert_eq!(server_errno(&error), Some(libc::EFAULT), "{error:#}");
    client.close(TIMEOUT).await?;
    assert!(!destination.path("copy").exists());

    drop(client);
    destination.stop().await?;
    source.stop().await?;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn plain_file_access_and_errors() -> anyhow::Result<()> {
    let server = TestServer::start(TpcConfig::default()).await?;
    let mut client = Client::connect(&server.endpoint(), TIMEOUT).await?;
    let error = client
        .open("/missing", OpenMode::read_only(), 0, "", TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(server_errno(&error), Some(libc::ENOENT), "{error:#}");
    let error = client.read(0, 10, TIMEOUT).await.unwrap_err();
    assert_eq!(server_errno(&error), Some(libc::EBADF), "{error:#}");

    client
        .open("/notes", OpenMode::create_truncate(), 0o600, "", TIMEOUT)
        .await?;
    assert_eq!(client.write(0, b"hello tpc".to_vec(), TIMEOUT).await?, 9);
    assert_eq!(client.sync(TIMEOUT).await?, SyncStatus::Done);
    assert_eq!(client.read(6, 100, TIMEOUT).await?, b"tpc".to_vec());
    client.close(TIMEOUT).await?;
    assert_eq!(std::fs::read(server.path("notes"))?, b"hello tpc");

    // a replayed key is refused with EPERM
    let opaque = "tpc.key=dup&tpc.dst=elsewhere:1094";
    client
        .open("/notes", OpenMode::read_only(), 0, opaque, TIMEOUT)
        .await?;
    let mut other = Client::connect(&server.endpoint(), TIMEOUT).await?;
    let error = other
        .open("/notes", OpenMode::read_only(), 0, opaque, TIMEOUT)
        .await
        .unwrap_err();
    assert_eq!(server_errno(&error), Some(libc::EPERM), "{error:#}");

    drop(other);
    drop(client);
    let summary = server.stop().await?;
    assert_eq!(summary.connections, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn abandoned_files_are_removed_on_disconnect() -> anyhow::Result<()> {
    let server = TestServer::start(TpcConfig::default()).await?;
    let mut client = Client::connect(&server.endpoint(), TIMEOUT).await?;
    client
        .open("/partial", OpenMode::create_truncate(), 0o600, "", TIMEOUT)
        .await?;
    client.write(0, b"half".to_vec(), TIMEOUT).await?;
    let partial = server.path("partial");
    assert!(partial.exists());
    drop(client);
    // the server notices the dropped connection asynchronously
    tokio::time::timeout(TIMEOUT, async {
        while partial.exists() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    server.stop().await?;
    Ok(())
}
