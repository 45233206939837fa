use std::{io, net::SocketAddr, path::PathBuf, time::Duration};

use thiserror::Error;

use super::connection::ConnectionId;

#[derive(Debug, Error)]
pub enum Error {
    // CONFIGURATION
    #[error("could not read manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("manifest {path} does not name an output file")]
    EmptyManifest { path: PathBuf },
    #[error("could not open fragment {path}: {source}")]
    Fragment {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("could not write output {path}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    // SOCKETS
    #[error("could not listen on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("could not connect to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    // TRANSFER
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("i/o failure mid-transfer: {0}")]
    Io(#[from] io::Error),
    #[error("no readiness for {after:?}")]
    TimedOut { after: Duration },

    /// A readiness event named a connection the reactor no longer tracks.
    /// Registration and deregistration are out of sync, so the run is over.
    #[error("event for unregistered connection {0}")]
    UnknownConnection(ConnectionId),
}

impl Error {
    /// Whether this error only concerns the connection it happened on.
    pub fn is_isolated(&self) -> bool {
        matches!(
            self,
            Error::Protocol(_) | Error::Io(_) | Error::TimedOut { .. }
        )
    }
}

/// A message (or a fragment line) that does not follow the line protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("line {line:?} has no separator after its line number")]
    MissingSeparator { line: String },
    #[error("line {line:?} does not start with a decimal line number")]
    InvalidLineNumber { line: String },
    #[error("message is not valid utf-8")]
    InvalidUtf8,
    #[error("text of line {line_number} contains byte {byte:#04x}")]
    ForbiddenByte { line_number: i64, byte: u8 },
    #[error("message exceeded {limit} bytes without an end marker")]
    MessageTooLarge { limit: usize },
    #[error("peer closed the stream before the end marker")]
    UnterminatedMessage,
    #[error("{count} bytes followed the end marker")]
    TrailingBytes { count: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_errors_stay_with_their_connection() {
        let isolated = [
            Error::Protocol(ProtocolError::UnterminatedMessage),
            Error::Io(io::ErrorKind::ConnectionReset.into()),
            Error::TimedOut {
                after: Duration::from_secs(1),
            },
        ];
        assert!(isolated.iter().all(Error::is_isolated));
    }

    #[test]
    fn setup_and_bookkeeping_errors_end_the_run() {
        let addr = SocketAddr::from(([127, 0, 0, 1], 7411));
        let fatal = [
            Error::UnknownConnection(ConnectionId(3)),
            Error::Bind {
                addr,
                source: io::ErrorKind::AddrInUse.into(),
            },
            Error::Output {
                path: "out.txt".into(),
                source: io::ErrorKind::PermissionDenied.into(),
            },
        ];
        assert!(!fatal.iter().any(Error::is_isolated));
    }
}
