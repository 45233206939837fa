use std::{io, net::SocketAddr, time::Duration};

use futures::{
    future::BoxFuture, stream::FuturesUnordered, FutureExt, StreamExt,
};
use tokio::{
    io::{Interest, Ready},
    net::{TcpListener, TcpStream},
    select,
    time::timeout,
};
use tracing::{debug, debug_span, info, warn, Instrument};

use crate::{
    config::ServerConfig,
    output::Output,
    session::{Session, SessionReport, Step},
};

use super::{connection::ConnectionId, error::Error};

/// Something the reactor has to react to.
enum Event {
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    /// A participant's socket became ready (or its wait failed). The stream
    /// travels with the event and goes back into the wait set on rearm.
    Ready {
        id: ConnectionId,
        stream: TcpStream,
        readiness: Result<Ready, Error>,
    },
}

/// Single-threaded multiplexer over the listener and every participant.
///
/// [`Reactor::run`] only ever suspends inside [`Reactor::wait`]. Each handler
/// does at most one `try_read` and one `try_write` per socket and returns.
pub struct Reactor {
    listener: TcpListener,
    config: ServerConfig,
    output: Output,
    waiting: FuturesUnordered<BoxFuture<'static, Event>>,
}

impl Reactor {
    pub async fn bind(
        config: ServerConfig,
        output: Output,
    ) -> Result<Self, Error> {
        let listener = TcpListener::bind(config.bind).await.map_err(
            |source| Error::Bind {
                addr: config.bind,
                source,
            },
        )?;
        Ok(Self {
            listener,
            config,
            output,
            waiting: FuturesUnordered::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves `session` until every fragment has been echoed back or given
    /// up on, then writes the output once.
    pub async fn run(self, session: Session) -> Result<SessionReport, Error> {
        let span = debug_span!("reactor", addr = ?self.local_addr().ok());
        self.serve(session).instrument(span).await
    }

    async fn serve(
        mut self,
        mut session: Session,
    ) -> Result<SessionReport, Error> {
        info!(
            fragments = session.expected(),
            output = %self.output.path().display(),
            "waiting for participants"
        );

        while !session.is_resolved() {
            match self.wait().await {
                Event::Accepted(Ok((stream, peer))) => {
                    self.admit(&mut session, stream, peer)
                }
                Event::Accepted(Err(e)) => warn!(error = %e, "accept failed"),
                Event::Ready {
                    id,
                    stream,
                    readiness,
                } => self.dispatch(&mut session, id, stream, readiness)?,
            }
        }

        debug!(
            completed = session.completed(),
            failed = session.failed(),
            "all fragments resolved"
        );
        self.output.materialize(session.merge())?;
        Ok(session.into_report())
    }

    /// The only suspension point of the loop.
    async fn wait(&mut self) -> Event {
        select! {
            accepted = self.listener.accept() => Event::Accepted(accepted),
            Some(event) = self.waiting.next() => event,
        }
    }

    fn admit(
        &mut self,
        session: &mut Session,
        stream: TcpStream,
        peer: SocketAddr,
    ) {
        match session.open(peer, &self.config) {
            Some((id, interest)) => self.arm(id, stream, interest),
            None => {
                warn!(%peer, "every fragment is already assigned; dropping");
            }
        }
    }

    fn dispatch(
        &mut self,
        session: &mut Session,
        id: ConnectionId,
        stream: TcpStream,
        readiness: Result<Ready, Error>,
    ) -> Result<(), Error> {
        let step = match readiness {
            Ok(ready) => session.on_ready(id, &stream, ready)?,
            Err(e) => Step::Failed(e),
        };
        match step {
            Step::Rearm(interest) => self.arm(id, stream, interest),
            // dropping the stream closes the socket
            Step::Finished => session.complete(id)?,
            Step::Failed(e) if e.is_isolated() => session.fail(id, e)?,
            Step::Failed(e) => return Err(e),
        }
        Ok(())
    }

    /// Parks `stream` in the wait set until it is ready for `interest`.
    fn arm(
        &mut self,
        id: ConnectionId,
        stream: TcpStream,
        interest: Interest,
    ) {
        let idle = self.config.idle_timeout;
        self.waiting.push(
            async move {
                let readiness = ready_within(&stream, interest, idle).await;
                Event::Ready {
                    id,
                    stream,
                    readiness,
                }
            }
            .boxed(),
        );
    }
}

async fn ready_within(
    stream: &TcpStream,
    interest: Interest,
    idle: Option<Duration>,
) -> Result<Ready, Error> {
    match idle {
        Some(after) => match timeout(after, stream.ready(interest)).await {
            Ok(ready) => Ok(ready?),
            Err(_) => Err(Error::TimedOut { after }),
        },
        None => Ok(stream.ready(interest).await?),
    }
}
