//! Splits a line-numbered text file across TCP participants and stitches
//! their echoes back into one globally ordered file.
//!
//! The server side is a single-threaded reactor ([`net::reactor::Reactor`])
//! that owns a [`session::Session`] for its whole run. Participants
//! ([`net::participant::participate`]) reuse the same inbox, outbox and
//! [`merge::MergeList`] against one connection.

pub mod config;
pub mod manifest;
pub mod merge;
pub mod net;
pub mod output;
pub mod session;

pub use config::{ParticipantConfig, ServerConfig};
pub use merge::MergeList;
pub use net::error::{Error, ProtocolError};
pub use net::wire::Record;
