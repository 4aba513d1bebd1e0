/// Failure of a third-party-copy operation.
///
/// Every variant maps onto a POSIX errno ([`TpcError::errno`]) which is what travels to the
/// client. Protocol and liveness errors are reported at open time, transport errors and
/// disconnects through the transfer callback.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TpcError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    PermissionDenied(String),
    #[error("{0}")]
    ConnectionAborted(String),
    #[error("{0}")]
    RemoteFault(String),
    #[error("{0}")]
    Io(String),
    #[error("{message}")]
    Storage { errno: i32, message: String },
}

impl TpcError {
    pub fn errno(&self) -> i32 {
        match self {
            TpcError::InvalidArgument(_) => libc::EINVAL,
            TpcError::PermissionDenied(_) => libc::EPERM,
            TpcError::ConnectionAborted(_) => libc::ECONNABORTED,
            TpcError::RemoteFault(_) => libc::EFAULT,
            TpcError::Io(_) => libc::EIO,
            TpcError::Storage { errno, .. } => *errno,
        }
    }

    pub(crate) fn from_io(context: &str, error: &std::io::Error) -> Self {
        TpcError::Storage {
            errno: error.raw_os_error().unwrap_or(libc::EIO),
            message: format!("{context}: {error}"),
        }
    }

    pub(crate) fn not_open(operation: &str) -> Self {
        TpcError::Storage {
            errno: libc::EBADF,
            message: format!("{operation} - file is not open"),
        }
    }
}

impl From<&TpcError> for remote::protocol::ErrorReply {
    fn from(error: &TpcError) -> Self {
        Self {
            errno: error.errno(),
            message: error.to_string(),
        }
    }
}
