// version information exchanged in the wire hello between tpcd peers

use serde::{Deserialize, Serialize};

/// Protocol version of a tpcd build.
///
/// Two servers pulling from each other must agree on the wire protocol; the semantic version
/// decides compatibility, git information only helps when debugging mixed deployments.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolVersion {
    /// Semantic version from Cargo.toml (e.g., "0.4.0")
    pub semantic: String,

    /// Git describe output (e.g., "v0.3.1-7-g644da27"), absent for builds without git
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_describe: Option<String>,

    /// Full git commit hash, absent for builds without git
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_hash: Option<String>,
}

impl ProtocolVersion {
    /// Version of this build, git fields are filled in by build.rs when available.
    pub fn current() -> Self {
        Self {
            semantic: env!("CARGO_PKG_VERSION").to_string(),
            git_describe: option_env!("TPC_GIT_DESCRIBE").map(String::from),
            git_hash: option_env!("TPC_GIT_HASH").map(String::from),
        }
    }

    fn major_minor(&self) -> Option<(u64, u64)> {
        let mut parts = self.semantic.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        Some((major, minor))
    }

    /// Check if this version can talk to a peer running `other`.
    ///
    /// Patch releases never change the wire format, so only major and minor have to match.
    /// Unparseable versions are only compatible with an identical string.
    ///
    /// # Examples
    ///
    /// ```
    /// use common::version::ProtocolVersion;
    ///
    /// let v1 = ProtocolVersion {
    ///     semantic: "0.4.0".to_string(),
    ///     git_describe: None,
    ///     git_hash: None,
    /// };
    /// let v2 = ProtocolVersion {
    ///     semantic: "0.4.3".to_string(),
    ///     git_describe: Some("v0.4.3-2-g1a2b3c4".to_string()),
    ///     git_hash: None,
    /// };
    /// assert!(v1.is_compatible_with(&v2));
    /// ```
    pub fn is_compatible_with(&self, other: &Self) -> bool {
        match (self.major_minor(), other.major_minor()) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => self.semantic == other.semantic,
        }
    }

    /// Human-readable version, including git describe output when present.
    pub fn display(&self) -> String {
        if let Some(ref git_describe) = self.git_describe {
            format!("{} ({})", self.semantic, git_describe)
        } else {
            self.semantic.clone()
        }
    }

    /// Serialize to JSON string
    ///
    /// # Errors
    ///
    /// Returns an error if JSON serialization fails.
    pub fn to_json(&self) -> anyhow::Result<String> {
        serde_json::to_string(self)
            .map_err(|e| anyhow::anyhow!("failed to serialize version: {:#}", e))
    }

    /// Deserialize from JSON string
    ///
    /// # Errors
    ///
    /// Returns an error if JSON deserialization fails or the format is invalid.
    pub fn from_json(json: &str) -> anyhow::Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| anyhow::anyhow!("failed to parse version JSON: {:#}", e))
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}
