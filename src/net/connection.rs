use std::{fmt, io, net::SocketAddr};

use tokio::{io::Interest, net::TcpStream};
use tracing::{debug, debug_span, trace, Span};

use crate::config::ServerConfig;

use super::{
    error::{Error, ProtocolError},
    fragment::{Fragment, FragmentFeed},
    wire::END_OF_MESSAGE,
};

/// Identifies one accepted participant for the lifetime of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Read-side protocol phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Accumulating the participant's echo.
    Open,
    /// The end marker arrived; the payload has not been merged yet.
    MessageComplete,
    /// Merged; waiting for our own fragment to finish flushing.
    Closing,
    Closed,
}

/// Write-side phase, independent of [`Phase`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WritePhase {
    SendingFragment,
    FragmentExhausted,
}

#[derive(Debug, PartialEq, Eq)]
pub enum ReadProgress {
    /// Bytes arrived but no marker yet.
    Pending,
    /// Nothing to read right now.
    Blocked,
    /// The full message, marker stripped.
    Complete(Vec<u8>),
}

#[derive(Debug, PartialEq, Eq)]
pub enum WriteProgress {
    Sent(usize),
    Blocked,
    /// Everything including the end marker is on the wire.
    Flushed,
}

/// Accumulates one incoming message across any number of readiness events.
pub struct Inbox {
    buf: Vec<u8>,
    scratch: Box<[u8]>,
    limit: usize,
}

impl Inbox {
    pub fn new(read_buffer_size: usize, limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            scratch: vec![0u8; read_buffer_size.max(1)].into_boxed_slice(),
            limit,
        }
    }

    /// Performs exactly one read through `read` and scans only the bytes it
    /// produced for the end marker.
    pub fn read_with<F>(&mut self, read: F) -> Result<ReadProgress, Error>
    where
        F: FnOnce(&mut [u8]) -> io::Result<usize>,
    {
        let n = match read(&mut self.scratch[..]) {
            Ok(0) => Err(ProtocolError::UnterminatedMessage)?,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                return Ok(ReadProgress::Blocked)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                return Ok(ReadProgress::Pending)
            }
            Err(e) => Err(e)?,
        };

        let fresh = &self.scratch[..n];
        match fresh.iter().position(|b| *b == END_OF_MESSAGE) {
            Some(at) => {
                if self.buf.len() + at > self.limit {
                    Err(ProtocolError::MessageTooLarge { limit: self.limit })?
                }
                let trailing = n - at - 1;
                if trailing > 0 {
                    Err(ProtocolError::TrailingBytes { count: trailing })?
                }
                let mut payload = std::mem::take(&mut self.buf);
                payload.extend_from_slice(&fresh[..at]);
                Ok(ReadProgress::Complete(payload))
            }
            None => {
                if self.buf.len() + n > self.limit {
                    Err(ProtocolError::MessageTooLarge { limit: self.limit })?
                }
                self.buf.extend_from_slice(fresh);
                Ok(ReadProgress::Pending)
            }
        }
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Bytes waiting to go out, plus where we are in them.
pub struct Outbox {
    feed: Option<FragmentFeed>,
    pending: Vec<u8>,
    cursor: usize,
    exhausted: bool,
}

impl Outbox {
    /// Streams `fragment` chunk by chunk.
    pub fn from_fragment(fragment: Fragment, write_buffer_size: usize) -> Self {
        Self {
            feed: Some(fragment.into_feed(write_buffer_size)),
            pending: Vec::new(),
            cursor: 0,
            exhausted: false,
        }
    }

    /// Sends an already terminated message.
    pub fn from_message(message: Vec<u8>) -> Self {
        Self {
            feed: None,
            pending: message,
            cursor: 0,
            exhausted: true,
        }
    }

    pub fn is_flushed(&self) -> bool {
        self.exhausted && self.cursor == self.pending.len()
    }

    /// Tops up the pending bytes if drained, then performs exactly one write
    /// through `write`.
    pub fn write_with<F>(&mut self, write: F) -> Result<WriteProgress, Error>
    where
        F: FnOnce(&[u8]) -> io::Result<usize>,
    {
        if self.cursor == self.pending.len() {
            self.refill()?;
        }
        if self.is_flushed() {
            return Ok(WriteProgress::Flushed);
        }
        let unsent = &self.pending[self.cursor..];
        if unsent.is_empty() {
            // the chunk ended mid-line; pull more next time
            return Ok(WriteProgress::Sent(0));
        }
        match write(unsent) {
            Ok(0) => Err(io::Error::from(io::ErrorKind::WriteZero))?,
            Ok(n) => {
                self.cursor += n;
                if self.is_flushed() {
                    Ok(WriteProgress::Flushed)
                } else {
                    Ok(WriteProgress::Sent(n))
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                Ok(WriteProgress::Blocked)
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                Ok(WriteProgress::Sent(0))
            }
            Err(e) => Err(e)?,
        }
    }

    fn refill(&mut self) -> Result<(), Error> {
        let Some(feed) = self.feed.as_mut() else {
            return Ok(());
        };
        if self.exhausted {
            return Ok(());
        }
        self.pending.clear();
        self.cursor = 0;
        self.exhausted = feed.fill(&mut self.pending)?;
        Ok(())
    }
}

/// What a readiness event did to a connection.
#[derive(Debug, PartialEq, Eq)]
pub enum Advance {
    Continue,
    /// A complete message is ready to be decoded and merged.
    Message(Vec<u8>),
}

/// Per-participant state: one inbox for the echo, one outbox for the
/// assigned fragment.
pub struct Connection {
    peer: SocketAddr,
    fragment: String,
    phase: Phase,
    inbox: Inbox,
    outbox: Outbox,
    span: Span,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        fragment: Fragment,
        config: &ServerConfig,
    ) -> Self {
        let span = debug_span!(
            "connection",
            id = id.0,
            %peer,
            fragment = fragment.index
        );
        Self {
            peer,
            fragment: fragment.label.clone(),
            phase: Phase::Open,
            inbox: Inbox::new(
                config.read_buffer_size,
                config.max_message_bytes,
            ),
            outbox: Outbox::from_fragment(fragment, config.write_buffer_size),
            span,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Label of the fragment assigned to this connection.
    pub fn fragment(&self) -> &str {
        &self.fragment
    }

    pub fn write_phase(&self) -> WritePhase {
        if self.outbox.is_flushed() {
            WritePhase::FragmentExhausted
        } else {
            WritePhase::SendingFragment
        }
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn wants_read(&self) -> bool {
        self.phase == Phase::Open
    }

    pub fn wants_write(&self) -> bool {
        self.phase != Phase::Closed
            && self.write_phase() == WritePhase::SendingFragment
    }

    /// Interest to register for the next wait, or `None` when both sides are
    /// done.
    pub fn interest(&self) -> Option<Interest> {
        match (self.wants_read(), self.wants_write()) {
            (true, true) => Some(Interest::READABLE.add(Interest::WRITABLE)),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Both the echo has been merged and the fragment is fully sent.
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Closing
            && self.write_phase() == WritePhase::FragmentExhausted
    }

    pub fn read_advance(
        &mut self,
        stream: &TcpStream,
    ) -> Result<Advance, Error> {
        match self.inbox.read_with(|buf| stream.try_read(buf))? {
            ReadProgress::Complete(payload) => {
                debug!(bytes = payload.len(), "message complete");
                self.phase = Phase::MessageComplete;
                Ok(Advance::Message(payload))
            }
            ReadProgress::Pending => {
                trace!(buffered = self.inbox.buffered(), "partial message");
                Ok(Advance::Continue)
            }
            ReadProgress::Blocked => Ok(Advance::Continue),
        }
    }

    pub fn write_advance(
        &mut self,
        stream: &TcpStream,
    ) -> Result<Advance, Error> {
        match self.outbox.write_with(|buf| stream.try_write(buf))? {
            WriteProgress::Sent(n) => trace!(bytes = n, "wrote fragment bytes"),
            WriteProgress::Blocked => trace!("write would block"),
            WriteProgress::Flushed => debug!("fragment fully sent"),
        }
        Ok(Advance::Continue)
    }

    /// The completed message has been merged.
    pub fn mark_closing(&mut self) {
        self.phase = Phase::Closing;
    }

    pub fn mark_closed(&mut self) {
        self.phase = Phase::Closed;
    }
}
