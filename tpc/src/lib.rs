//! Third-party-copy coordination for a file server
//!
//! A third-party copy moves a file between two storage servers on behalf of a client that never
//! touches the data. The client opens the target on the destination server with `tpc.*`
//! parameters, the destination pulls the file from the source server, and the source checks
//! that whoever reads is the party the client authorized.
//!
//! # Session handshake
//!
//! Both servers keep short-lived sessions keyed by the client chosen `tpc.key`, one
//! [`session::SessionTable`] per access mode:
//!
//! - the client opens the target for writing with `tpc.key`, `tpc.src` and `tpc.lfn`; the
//!   destination creates a session and becomes a [`Role::DestinationSetup`] handle
//! - the client opens the source for reading with `tpc.key` and `tpc.dst`; the source creates a
//!   session and becomes a [`Role::SourceSetup`] handle
//! - the destination opens the source with `tpc.key` and `tpc.org`; the source verifies the key
//!   against its session, consumes it, and serves the read as a [`Role::SourceRead`] handle
//!
//! A key can be created once and consumed once. A verifying open that does not find its key
//! waits a little for the client's source-side open to arrive (see
//! [`TpcConfig::verify_window`]).
//!
//! # Transfer
//!
//! On a destination-setup handle sync drives the transfer state machine
//! ([`transfer::TransferState`]): the first sync enables it, the second launches a background
//! worker and returns at once, the outcome arrives through a [`TransferCallback`]. The worker
//! pulls the source block by block and stops when the session disappears, which is what
//! closing either handle does.
//!
//! # Serving
//!
//! [`TpcFs`] owns the session registry and hands out [`TpcFile`] handles, [`server`] exposes
//! them over TCP and is what the `tpcd` binary runs.

pub mod caller;
pub mod config;
pub mod error;
pub mod file;
pub mod fs;
pub mod handshake;
pub mod opaque;
pub mod server;
pub mod session;
pub mod storage;
pub mod transfer;

pub use caller::Caller;
pub use config::TpcConfig;
pub use error::TpcError;
pub use file::{SyncOutcome, TpcFile};
pub use fs::TpcFs;
pub use handshake::Role;
pub use storage::{LocalStorage, Storage, StorageFile};
pub use transfer::{TransferCallback, TransferState};
