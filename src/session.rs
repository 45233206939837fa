use std::{collections::VecDeque, net::SocketAddr};

use hashbrown::HashMap;
use tokio::{
    io::{Interest, Ready},
    net::TcpStream,
};
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig,
    merge::MergeList,
    net::{
        connection::{Advance, Connection, ConnectionId},
        error::{Error, ProtocolError},
        fragment::Fragment,
        wire,
    },
};

/// Everything one transfer run owns: the fragments still to hand out, the
/// live connections, the merge list and the completion counters.
///
/// A session is only ever touched from the reactor task, so nothing in here
/// is shared or locked.
pub struct Session {
    expected: usize,
    completed: usize,
    failures: Vec<FailedTransfer>,
    merge: MergeList,
    connections: HashMap<ConnectionId, Connection>,
    unassigned: VecDeque<Fragment>,
    next_id: u64,
}

/// A participant that was cut off. Whatever it had merged before failing
/// stays merged.
#[derive(Debug)]
pub struct FailedTransfer {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub fragment: String,
    pub error: Error,
}

#[derive(Debug)]
pub struct SessionReport {
    pub expected: usize,
    pub completed: usize,
    pub records: usize,
    pub failures: Vec<FailedTransfer>,
}

impl SessionReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty() && self.completed == self.expected
    }
}

/// What the reactor should do with a connection after handling an event.
#[derive(Debug)]
pub enum Step {
    /// Wait again with this interest.
    Rearm(Interest),
    /// Transfer finished; deregister and close.
    Finished,
    /// Isolate this connection.
    Failed(Error),
}

impl Session {
    pub fn new(fragments: Vec<Fragment>) -> Self {
        Self {
            expected: fragments.len(),
            completed: 0,
            failures: Vec::new(),
            merge: MergeList::new(),
            connections: HashMap::new(),
            unassigned: fragments.into(),
            next_id: 0,
        }
    }

    pub fn expected(&self) -> usize {
        self.expected
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn active(&self) -> usize {
        self.connections.len()
    }

    pub fn merge(&self) -> &MergeList {
        &self.merge
    }

    /// Every fragment has either been echoed back or given up on.
    pub fn is_resolved(&self) -> bool {
        self.completed + self.failures.len() >= self.expected
    }

    /// Hands the next unassigned fragment to a freshly accepted peer. `None`
    /// means every fragment is already taken.
    pub fn open(
        &mut self,
        peer: SocketAddr,
        config: &ServerConfig,
    ) -> Option<(ConnectionId, Interest)> {
        let fragment = self.unassigned.pop_front()?;
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        let conn = Connection::new(id, peer, fragment, config);
        // a fresh connection is still Open, so it always wants to read
        let interest = conn.interest()?;
        {
            let _guard = conn.span().enter();
            info!(fragment = conn.fragment(), "participant connected");
        }
        self.connections.insert(id, conn);
        Some((id, interest))
    }

    /// Decodes a complete message and merges all of it, or none of it.
    pub fn merge_message(
        &mut self,
        payload: &[u8],
    ) -> Result<usize, ProtocolError> {
        merge_into(&mut self.merge, payload)
    }

    /// Runs the read and write advances for one readiness event.
    ///
    /// Per-connection failures come back as [`Step::Failed`]; `Err` is only
    /// returned for an id the session does not know.
    pub fn on_ready(
        &mut self,
        id: ConnectionId,
        stream: &TcpStream,
        ready: Ready,
    ) -> Result<Step, Error> {
        let conn = self
            .connections
            .get_mut(&id)
            .ok_or(Error::UnknownConnection(id))?;
        let span = conn.span().clone();
        let _guard = span.enter();

        if conn.wants_read() && (ready.is_readable() || ready.is_read_closed())
        {
            match conn.read_advance(stream) {
                Ok(Advance::Message(payload)) => {
                    match merge_into(&mut self.merge, &payload) {
                        Ok(count) => debug!(records = count, "merged echo"),
                        Err(e) => return Ok(Step::Failed(e.into())),
                    }
                    conn.mark_closing();
                }
                Ok(Advance::Continue) => {}
                Err(e) => return Ok(Step::Failed(e)),
            }
        }

        if conn.wants_write()
            && (ready.is_writable() || ready.is_write_closed())
        {
            if let Err(e) = conn.write_advance(stream) {
                return Ok(Step::Failed(e));
            }
        }

        if conn.is_finished() {
            return Ok(Step::Finished);
        }
        match conn.interest() {
            Some(interest) => Ok(Step::Rearm(interest)),
            None => Ok(Step::Finished),
        }
    }

    /// Deregisters a finished connection and counts it complete.
    pub fn complete(&mut self, id: ConnectionId) -> Result<(), Error> {
        let mut conn = self
            .connections
            .remove(&id)
            .ok_or(Error::UnknownConnection(id))?;
        conn.mark_closed();
        self.completed += 1;
        let _guard = conn.span().enter();
        info!(
            completed = self.completed,
            expected = self.expected,
            "participant finished"
        );
        Ok(())
    }

    /// Deregisters a connection without counting it complete.
    pub fn fail(
        &mut self,
        id: ConnectionId,
        error: Error,
    ) -> Result<(), Error> {
        let mut conn = self
            .connections
            .remove(&id)
            .ok_or(Error::UnknownConnection(id))?;
        conn.mark_closed();
        {
            let _guard = conn.span().enter();
            warn!(%error, "participant dropped");
        }
        self.failures.push(FailedTransfer {
            id,
            peer: conn.peer(),
            fragment: conn.fragment().to_owned(),
            error,
        });
        Ok(())
    }

    pub fn into_report(self) -> SessionReport {
        SessionReport {
            expected: self.expected,
            completed: self.completed,
            records: self.merge.len(),
            failures: self.failures,
        }
    }
}

fn merge_into(
    merge: &mut MergeList,
    payload: &[u8],
) -> Result<usize, ProtocolError> {
    let records = wire::decode(payload)?;
    let count = records.len();
    merge.extend(records);
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::net::{Ipv4Addr, SocketAddr};

    use super::*;

    fn peer() -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, 4000))
    }

    fn texts(session: &Session) -> Vec<String> {
        session.merge().produce().map(|r| r.text.clone()).collect()
    }

    #[test]
    fn messages_from_any_participant_merge_in_order() {
        let mut session = Session::new(Vec::new());
        session.merge_message(b"4 d\n").unwrap();
        session.merge_message(b"1 a\n3 c\n").unwrap();
        session.merge_message(b"2 b\n").unwrap();
        assert_eq!(texts(&session), ["a", "b", "c", "d"]);
    }

    #[test]
    fn duplicate_line_numbers_keep_latest_first() {
        let mut session = Session::new(Vec::new());
        session.merge_message(b"5 e1\n").unwrap();
        session.merge_message(b"5 e2\n").unwrap();
        assert_eq!(texts(&session), ["e2", "e1"]);
    }

    #[test]
    fn malformed_message_merges_nothing() {
        let mut session = Session::new(Vec::new());
        session.merge_message(b"1 a\n").unwrap();
        let err = session.merge_message(b"2 b\nhello world\n").unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidLineNumber { .. }));
        assert_eq!(texts(&session), ["a"]);
    }

    #[test]
    fn fragments_are_assigned_in_order_until_exhausted() {
        let config = ServerConfig::default();
        let mut session = Session::new(vec![
            Fragment::from_bytes(0, "zero", ""),
            Fragment::from_bytes(1, "one", ""),
        ]);
        let (first, interest) = session.open(peer(), &config).unwrap();
        assert!(interest.is_readable() && interest.is_writable());
        let (second, _) = session.open(peer(), &config).unwrap();
        assert_ne!(first, second);
        assert!(session.open(peer(), &config).is_none());
        assert_eq!(session.active(), 2);
    }

    #[test]
    fn resolution_counts_failures_and_completions() {
        let config = ServerConfig::default();
        let mut session = Session::new(vec![
            Fragment::from_bytes(0, "zero", ""),
            Fragment::from_bytes(1, "one", ""),
        ]);
        let (a, _) = session.open(peer(), &config).unwrap();
        let (b, _) = session.open(peer(), &config).unwrap();
        assert!(!session.is_resolved());

        session.complete(a).unwrap();
        session
            .fail(b, ProtocolError::UnterminatedMessage.into())
            .unwrap();
        assert!(session.is_resolved());

        let report = session.into_report();
        assert_eq!(report.completed, 1);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].fragment, "one");
        assert!(!report.is_success());
    }

    #[test]
    fn unknown_ids_are_an_invariant_violation() {
        let mut session = Session::new(Vec::new());
        let err = session.complete(ConnectionId(9)).unwrap_err();
        assert!(matches!(err, Error::UnknownConnection(ConnectionId(9))));
    }

    #[test]
    fn no_fragments_is_already_resolved() {
        assert!(Session::new(Vec::new()).is_resolved());
    }
}
