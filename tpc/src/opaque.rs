//! Opaque (query string) handling of open requests
//!
//! Opaque strings are `&` separated `key=value` pairs. Keys without `=` carry an empty value and
//! when a key repeats the first occurrence wins.

use crate::config::MAX_BLOCK_SIZE;
use crate::error::TpcError;

pub const STAGE_PLACEMENT: &str = "placement";

#[derive(Debug, Clone, Default)]
pub struct Opaque<'a> {
    pairs: Vec<(&'a str, &'a str)>,
}

impl<'a> Opaque<'a> {
    pub fn parse(opaque: &'a str) -> Self {
        let pairs = opaque
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
            .collect();
        Self { pairs }
    }

    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.pairs
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, value)| *value)
    }
}

/// The `tpc.*` parameters of an open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TpcParams {
    pub stage: String,
    /// `None` when the open carries no key, `Some("")` when the key is present but empty
    pub key: Option<String>,
    pub src: String,
    pub dst: String,
    pub org: String,
    pub lfn: String,
}

impl TpcParams {
    pub fn from_opaque(opaque: &str) -> Self {
        let parsed = Opaque::parse(opaque);
        let value = |key| parsed.get(key).unwrap_or_default().to_string();
        Self {
            stage: value("tpc.stage"),
            key: parsed.get("tpc.key").map(str::to_string),
            src: value("tpc.src"),
            dst: value("tpc.dst"),
            org: value("tpc.org"),
            lfn: value("tpc.lfn"),
        }
    }

    pub fn is_placement(&self) -> bool {
        self.stage == STAGE_PLACEMENT
    }
}

/// Opaque and block size after applying the sizing parameters of an open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sizing {
    pub opaque: String,
    pub block_size: u64,
}

fn parse_size(key: &str, value: &str) -> Result<u64, TpcError> {
    common::units::parse_unit(value).map_err(|error| {
        TpcError::InvalidArgument(format!("open - illegal {key} parameter {value:?}: {error}"))
    })
}

/// Applies `tpc.stripe` and `tpc.blocksize`.
///
/// A stripe size is handed to the storage backend as `oss.stripe=<bytes>`, any `oss.stripe`
/// the client put there itself is disabled. The block size is raised to the configured floor
/// and a requested block size above [`MAX_BLOCK_SIZE`] is refused.
pub fn apply_sizing(opaque: &str, block_size: u64) -> Result<Sizing, TpcError> {
    let parsed = Opaque::parse(opaque);
    let mut sizing = Sizing {
        opaque: opaque.to_string(),
        block_size: crate::config::clamp_block_size(block_size),
    };
    if let Some(stripe) = parsed.get("tpc.stripe") {
        let stripe = parse_size("stripe size", stripe)?;
        let mut rewritten = opaque.replace("oss.stripe=", "illegal=");
        if !rewritten.is_empty() && !rewritten.ends_with('&') {
            rewritten.push('&');
        }
        rewritten.push_str(&format!("oss.stripe={stripe}"));
        tracing::debug!("opaque rewritten for stripe size: {}", rewritten);
        sizing.opaque = rewritten;
    }
    if let Some(block) = parsed.get("tpc.blocksize") {
        let requested = parse_size("block size", block)?;
        if requested > MAX_BLOCK_SIZE {
            return Err(TpcError::InvalidArgument(format!(
                "open - illegal block size parameter {block:?}: more than {MAX_BLOCK_SIZE} bytes"
            )));
        }
        sizing.block_size = crate::config::clamp_block_size(requested);
    }
    Ok(sizing)
}
