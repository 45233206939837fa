// Everything that touches a socket lives under here. The reactor multiplexes
// every participant on one thread: a connection never blocks another, and the
// session's merge list is only ever written from inside a readiness handler.
// Participants run the same inbox/outbox machinery against a single stream.

pub mod connection;
pub mod error;
pub mod fragment;
#[cfg(feature = "participant")]
pub mod participant;
#[cfg(feature = "server")]
pub mod reactor;
pub mod wire;

/// Port used by the CLI when none is given.
pub const SHARDLINE_PORT: u16 = 7411;

/// Size of the scratch buffer used for a single `try_read`.
pub const READ_BUFFER_SIZE: usize = 4096;

/// Upper bound on the fragment bytes pulled into the outbox per refill.
pub const WRITE_BUFFER_SIZE: usize = 4096;

/// A single message may not grow past this many bytes before its marker.
pub const MAX_MESSAGE_BYTES: usize = 64 * 1024 * 1024;
