//! Addresses of remote source files: `tpc://<host>:<port>/<path>?<opaque>`

const SCHEME: &str = "tpc://";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceUrl {
    /// `host:port` of the source server
    pub endpoint: String,
    /// path on the source server, passed verbatim to its open
    pub path: String,
    /// query string passed verbatim to the source server's open
    pub opaque: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    #[error("url {0:?} does not start with {SCHEME}")]
    Scheme(String),
    #[error("url {0:?} has no endpoint")]
    Endpoint(String),
    #[error("url {0:?} has no path")]
    Path(String),
}

impl SourceUrl {
    pub fn new(endpoint: &str, path: &str, opaque: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            path: path.to_string(),
            opaque: opaque.to_string(),
        }
    }

    /// Parses a url produced by the [`std::fmt::Display`] implementation.
    ///
    /// ```
    /// use remote::url::SourceUrl;
    ///
    /// let url = SourceUrl::parse("tpc://src.example:1094//data/f?tpc.key=K").unwrap();
    /// assert_eq!(url.endpoint, "src.example:1094");
    /// assert_eq!(url.path, "/data/f");
    /// assert_eq!(url.opaque, "tpc.key=K");
    /// ```
    pub fn parse(url: &str) -> Result<Self, UrlError> {
        let rest = url
            .strip_prefix(SCHEME)
            .ok_or_else(|| UrlError::Scheme(url.to_string()))?;
        let (rest, opaque) = rest.split_once('?').unwrap_or((rest, ""));
        let (endpoint, path) = rest
            .split_once('/')
            .ok_or_else(|| UrlError::Path(url.to_string()))?;
        if endpoint.is_empty() {
            return Err(UrlError::Endpoint(url.to_string()));
        }
        if path.is_empty() {
            return Err(UrlError::Path(url.to_string()));
        }
        Ok(Self::new(endpoint, path, opaque))
    }
}

impl std::fmt::Display for SourceUrl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}/{}", SCHEME, self.endpoint, self.path)?;
        if !self.opaque.is_empty() {
            write!(f, "?{}", self.opaque)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_keep_their_slash() {
        let url = SourceUrl::new("h:1", "/data/file", "tpc.key=K&tpc.org=u@h");
        assert_eq!(url.to_string(), "tpc://h:1//data/file?tpc.key=K&tpc.org=u@h");
        assert_eq!(SourceUrl::parse(&url.to_string()).unwrap(), url);
    }

    #[test]
    fn relative_path_without_opaque() {
        let url = SourceUrl::parse("tpc://h:1/data/file").unwrap();
        assert_eq!(url.path, "data/file");
        assert!(url.opaque.is_empty());
        assert_eq!(url.to_string(), "tpc://h:1/data/file");
    }

    #[test]
    fn malformed_urls() {
        assert!(matches!(
            SourceUrl::parse("root://h:1//f"),
            Err(UrlError::Scheme(_))
        ));
        assert!(matches!(SourceUrl::parse("tpc:///f"), Err(UrlError::Endpoint(_))));
        assert!(matches!(SourceUrl::parse("tpc://h:1"), Err(UrlError::Path(_))));
        assert!(matches!(SourceUrl::parse("tpc://h:1/"), Err(UrlError::Path(_))));
    }
}
