//! Session handshake of opens carrying `tpc.*` parameters
//!
//! A third-party copy involves two opens on two servers that only share the session key:
//!
//! - the client opens the file on the **source** server with `tpc.key` (and `tpc.dst`), which
//!   registers a source-setup session there
//! - the client opens the target on the **destination** server with `tpc.key`, `tpc.src` and
//!   `tpc.lfn`, which registers a destination-setup session; its sync calls later start the pull
//! - the destination server's pull opens `tpc.lfn` on the source server with `tpc.key` and
//!   `tpc.org`; this open verifies and consumes the source-setup session and is redirected to the
//!   path the client registered
//!
//! An open carrying `tpc.src`, a placement stage or no `tpc.org` creates a session. Any other
//! open carrying `tpc.org` is a pull and verifies one. A pull may arrive before the matching
//! create, so it waits for the key for a bounded time.

use tokio::time::Instant;
use tracing::instrument;

use crate::caller::Caller;
use crate::config::TpcConfig;
use crate::error::TpcError;
use crate::opaque::TpcParams;
use crate::session::{AccessMode, SessionEntry, SessionRegistry, SessionTable};

/// What an open is to the third-party-copy protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Role {
    /// ordinary open
    #[default]
    None,
    /// registered the source side of a transfer
    SourceSetup,
    /// registered the destination side, sync calls drive the pull
    DestinationSetup,
    /// the pull reading from a source, consumed a source-setup session
    SourceRead,
    /// placement probe without a key, asking whether this server can act as a source
    SourceProbe,
}

/// Outcome of a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub role: Role,
    /// session created or consumed by the open, erased again when the file closes
    pub key: Option<String>,
    /// path to open, the registered path for a verifying open
    pub path: String,
    /// opaque to apply, the registered opaque for a verifying open
    pub opaque: String,
    /// destination writes always start from an empty file
    pub truncate: bool,
}

fn sweep(table: &mut SessionTable, now: Instant, config: &TpcConfig) {
    let expired = table.sweep(now, config.sweep_grace);
    if expired > 0 {
        common::get_progress().sessions_expired.add(expired as u64);
    }
}

// one open's view of its session, `now` is taken once when the open arrives
struct Attempt<'a> {
    key: &'a str,
    params: &'a TpcParams,
    caller: &'a Caller,
    path: &'a str,
    opaque: &'a str,
    now: Instant,
    config: &'a TpcConfig,
}

fn create(table: &mut SessionTable, attempt: &Attempt<'_>) -> Result<Role, TpcError> {
    let Attempt {
        key,
        params,
        caller,
        path,
        opaque,
        now,
        config,
    } = *attempt;
    if table.exists(key) {
        return Err(TpcError::PermissionDenied(
            "open - tpc key replayed".to_string(),
        ));
    }
    if key.is_empty() {
        return Err(TpcError::InvalidArgument(
            "open - tpc key missing".to_string(),
        ));
    }
    let role = if !params.src.is_empty() {
        if params.lfn.is_empty() {
            return Err(TpcError::InvalidArgument(
                "open - tpc lfn missing".to_string(),
            ));
        }
        Role::DestinationSetup
    } else {
        Role::SourceSetup
    };
    let entry = SessionEntry {
        key: key.to_string(),
        org: caller.origin(),
        src: params.src.clone(),
        dst: params.dst.clone(),
        path: path.to_string(),
        lfn: params.lfn.clone(),
        opaque: opaque.to_string(),
        expires: now + config.session_ttl,
    };
    if role == Role::DestinationSetup {
        tracing::info!(
            key = %entry.key,
            org = %entry.org,
            src = %entry.src,
            path = %entry.path,
            lfn = %entry.lfn,
            "tpc dst session"
        );
    } else {
        tracing::info!(
            key = %entry.key,
            org = %entry.org,
            dst = %entry.dst,
            path = %entry.path,
            "tpc src session"
        );
    }
    table.set(entry);
    common::get_progress().sessions_created.inc();
    Ok(role)
}

fn verify(table: &mut SessionTable, attempt: &Attempt<'_>) -> Result<(String, String), TpcError> {
    let Attempt {
        key,
        params,
        caller,
        now,
        config,
        ..
    } = *attempt;
    let entry = table
        .get_mut(key)
        .ok_or_else(|| TpcError::PermissionDenied("open - tpc key not valid".to_string()))?;
    if entry.expires < now {
        return Err(TpcError::PermissionDenied(
            "open - tpc key expired".to_string(),
        ));
    }
    // the trusted protocol does not expose the client host, its origin cannot be compared
    if caller.protocol != config.trusted_protocol && entry.org != params.org {
        return Err(TpcError::PermissionDenied(
            "open - tpc origin mismatch".to_string(),
        ));
    }
    entry.expires = now.checked_sub(config.consumed_backdate).unwrap_or(now);
    entry.org = params.org.clone();
    tracing::info!(
        key = %entry.key,
        org = %entry.org,
        path = %entry.path,
        "tpc read"
    );
    common::get_progress().sessions_verified.inc();
    Ok((entry.path.clone(), entry.opaque.clone()))
}

async fn wait_and_verify(
    registry: &SessionRegistry,
    mode: AccessMode,
    attempt: &Attempt<'_>,
) -> Result<(String, String), TpcError> {
    let deadline = attempt.now + attempt.config.verify_window();
    loop {
        // register for insert notifications before looking, an insert in between is not lost
        let inserted = registry.inserted().notified();
        tokio::pin!(inserted);
        inserted.as_mut().enable();
        {
            let mut tables = registry.lock();
            let table = &mut tables[mode];
            if table.exists(attempt.key) || Instant::now() >= deadline {
                let result = verify(table, attempt);
                sweep(table, attempt.now, attempt.config);
                return result;
            }
        }
        tracing::trace!(key = %attempt.key, "waiting for tpc key");
        // an insert of an unrelated key wakes us early, the deadline keeps the bound
        let _ = tokio::time::timeout(attempt.config.verify_interval, inserted).await;
    }
}

/// Creates, verifies or rejects the session named by the `tpc.*` parameters of an open.
///
/// Opens without `tpc.key` pass through untouched, except that a placement probe is tagged. A
/// placement probe carrying a key registers a source-setup session like any other create.
/// Every open carrying a key sweeps long-expired sessions from its table.
#[instrument(level = "debug", skip_all, fields(path = %path, mode = %mode))]
pub async fn handshake(
    registry: &SessionRegistry,
    config: &TpcConfig,
    caller: &Caller,
    path: &str,
    opaque: &str,
    mode: AccessMode,
) -> Result<Handshake, TpcError> {
    let now = Instant::now();
    let params = TpcParams::from_opaque(opaque);
    let mut outcome = Handshake {
        role: if params.is_placement() {
            Role::SourceProbe
        } else {
            Role::None
        },
        key: None,
        path: path.to_string(),
        opaque: opaque.to_string(),
        truncate: false,
    };
    let Some(key) = params.key.as_deref() else {
        return Ok(outcome);
    };
    let attempt = Attempt {
        key,
        params: &params,
        caller,
        path,
        opaque,
        now,
        config,
    };
    if params.is_placement() || !params.src.is_empty() || params.org.is_empty() {
        let result = {
            let mut tables = registry.lock();
            let table = &mut tables[mode];
            let result = create(table, &attempt);
            sweep(table, now, config);
            result
        };
        let role = result?;
        registry.notify_inserted();
        outcome.role = role;
        outcome.truncate = role == Role::DestinationSetup;
    } else {
        let (path, opaque) =
            match wait_and_verify(registry, mode, &attempt).await {
                Ok(target) => target,
                Err(error) => {
                    tracing::warn!(key = %key, origin = %params.org, "{}", error);
                    common::get_progress().sessions_rejected.inc();
                    return Err(error);
                }
            };
        outcome.role = Role::SourceRead;
        outcome.path = path;
        outcome.opaque = opaque;
    }
    outcome.key = Some(key.to_string());
    Ok(outcome)
}
