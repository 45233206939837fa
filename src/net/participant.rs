use std::{io, net::SocketAddr};

use tokio::{io::AsyncWriteExt, net::TcpStream, time::timeout};
use tracing::{debug, debug_span, info, Instrument};

use crate::{config::ParticipantConfig, merge::MergeList};

use super::{
    connection::{Inbox, Outbox, ReadProgress, WriteProgress},
    error::Error,
    wire,
};

/// What a participant did with its fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParticipantReport {
    pub records: usize,
    pub bytes_received: usize,
    pub bytes_sent: usize,
}

/// Joins a session: receives one fragment, restores its line order and sends
/// it back before closing.
///
/// This is the reactor's read/merge/write cycle run against a single stream,
/// so it shares the inbox, outbox and merge list with the server side.
pub async fn participate(
    addr: SocketAddr,
    config: &ParticipantConfig,
) -> Result<ParticipantReport, Error> {
    let span = debug_span!("participant", server = %addr);
    async move {
        let mut stream = connect(addr, config).await?;
        debug!("connected");

        let mut inbox =
            Inbox::new(config.read_buffer_size, config.max_message_bytes);
        let payload = loop {
            stream.readable().await?;
            if let ReadProgress::Complete(payload) =
                inbox.read_with(|buf| stream.try_read(buf))?
            {
                break payload;
            }
        };
        let bytes_received = payload.len() + 1;

        let merge: MergeList = wire::decode(&payload)?.into_iter().collect();
        debug!(records = merge.len(), "fragment received");

        let echo = merge.encode()?;
        let bytes_sent = echo.len();
        let mut outbox = Outbox::from_message(echo);
        loop {
            stream.writable().await?;
            if outbox.write_with(|buf| stream.try_write(buf))?
                == WriteProgress::Flushed
            {
                break;
            }
        }
        stream.shutdown().await?;
        info!(records = merge.len(), "fragment returned in order");

        Ok(ParticipantReport {
            records: merge.len(),
            bytes_received,
            bytes_sent,
        })
    }
    .instrument(span)
    .await
}

async fn connect(
    addr: SocketAddr,
    config: &ParticipantConfig,
) -> Result<TcpStream, Error> {
    let to_error = |source: io::Error| Error::Connect { addr, source };
    match config.connect_timeout {
        Some(after) => match timeout(after, TcpStream::connect(addr)).await {
            Ok(stream) => stream.map_err(to_error),
            Err(_) => Err(Error::TimedOut { after }),
        },
        None => TcpStream::connect(addr).await.map_err(to_error),
    }
}
