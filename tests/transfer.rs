//! End-to-end runs of the reactor against real participants on loopback.
//!
//! Each test binds a reactor on an OS-chosen port, runs it in the test task
//! and spawns participants as separate tasks on the same runtime.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use shardline::{
    net::{
        error::{Error, ProtocolError},
        fragment::Fragment,
        participant::{participate, ParticipantReport},
        reactor::Reactor,
    },
    output::Output,
    session::{Session, SessionReport},
    ParticipantConfig, ServerConfig,
};
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    task::JoinHandle,
    time::timeout,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Harness {
    reactor: Reactor,
    addr: SocketAddr,
    output: PathBuf,
    _dir: TempDir,
}

async fn harness(config: ServerConfig) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("out.txt");
    let reactor = Reactor::bind(config, Output::new(&output))
        .await
        .expect("bind reactor");
    let addr = reactor.local_addr().unwrap();
    Harness {
        reactor,
        addr,
        output,
        _dir: dir,
    }
}

fn loopback() -> ServerConfig {
    ServerConfig::builder()
        .bind("127.0.0.1:0".parse().unwrap())
        .build()
}

fn fragments(contents: &[&str]) -> Vec<Fragment> {
    contents
        .iter()
        .enumerate()
        .map(|(i, c)| Fragment::from_bytes(i, format!("frag-{i}"), *c))
        .collect()
}

fn spawn_participant(
    addr: SocketAddr,
) -> JoinHandle<Result<ParticipantReport, Error>> {
    tokio::spawn(async move {
        participate(addr, &ParticipantConfig::default()).await
    })
}

async fn run(h: Harness, session: Session) -> (SessionReport, String) {
    let report = timeout(Duration::from_secs(10), h.reactor.run(session))
        .await
        .expect("reactor timed out")
        .expect("reactor failed");
    let output = std::fs::read_to_string(&h.output).unwrap();
    (report, output)
}

/// Reads raw bytes up to and including the end marker.
async fn read_message(stream: &mut TcpStream) -> Vec<u8> {
    let mut msg = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let n = stream.read(&mut buf).await.unwrap();
        assert!(n > 0, "server closed before the marker");
        msg.extend_from_slice(&buf[..n]);
        if msg.last() == Some(&0) {
            return msg;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn three_participants_reassemble_in_order() {
    let h = harness(loopback()).await;
    let participants: Vec<_> =
        (0..3).map(|_| spawn_participant(h.addr)).collect();

    let session = Session::new(fragments(&["3 c\n1 a\n", "2 b\n", "4 d\n"]));
    let (report, output) = run(h, session).await;

    assert_eq!(output, "a\nb\nc\nd\n");
    assert!(report.is_success());
    assert_eq!(report.completed, 3);
    assert_eq!(report.records, 4);

    let mut returned = 0;
    for p in participants {
        returned += p.await.unwrap().unwrap().records;
    }
    assert_eq!(returned, 4);
}

#[tokio::test]
async fn empty_fragment_still_completes() {
    let h = harness(loopback()).await;
    let participants: Vec<_> =
        (0..2).map(|_| spawn_participant(h.addr)).collect();

    let session = Session::new(fragments(&["", "1 only line\n"]));
    let (report, output) = run(h, session).await;

    assert_eq!(output, "only line\n");
    assert_eq!(report.completed, 2);
    for p in participants {
        p.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn no_fragments_writes_empty_output() {
    let h = harness(loopback()).await;
    let (report, output) = run(h, Session::new(Vec::new())).await;
    assert_eq!(output, "");
    assert!(report.is_success());
}

#[tokio::test]
async fn malformed_echo_isolates_only_that_participant() {
    let h = harness(loopback()).await;
    let addr = h.addr;

    let driver = tokio::spawn(async move {
        // connect first so this socket is handed fragment 0
        let mut bad = TcpStream::connect(addr).await.unwrap();
        let fragment = read_message(&mut bad).await;
        assert_eq!(fragment, b"10 x\n\0");

        let good: Vec<_> = (0..2).map(|_| spawn_participant(addr)).collect();
        bad.write_all(b"hello world\n\0").await.unwrap();
        for p in good {
            p.await.unwrap().unwrap();
        }
    });

    let session = Session::new(fragments(&["10 x\n", "2 b\n", "1 a\n"]));
    let (report, output) = run(h, session).await;
    driver.await.unwrap();

    assert_eq!(output, "a\nb\n");
    assert_eq!(report.completed, 2);
    assert_eq!(report.failures.len(), 1);
    let failure = &report.failures[0];
    assert_eq!(failure.fragment, "frag-0");
    assert!(matches!(
        failure.error,
        Error::Protocol(ProtocolError::InvalidLineNumber { .. })
    ));
}

#[tokio::test]
async fn silent_participant_times_out() {
    let config = ServerConfig::builder()
        .bind("127.0.0.1:0".parse().unwrap())
        .idle_timeout(Some(Duration::from_millis(200)))
        .build();
    let h = harness(config).await;
    let addr = h.addr;

    let driver = tokio::spawn(async move {
        let mut silent = TcpStream::connect(addr).await.unwrap();
        read_message(&mut silent).await;
        spawn_participant(addr).await.unwrap().unwrap();
        // hold the socket open well past the idle timeout
        tokio::time::sleep(Duration::from_secs(2)).await;
        drop(silent);
    });

    let session = Session::new(fragments(&["1 never\n", "2 echoed\n"]));
    let (report, output) = run(h, session).await;

    assert_eq!(output, "echoed\n");
    assert_eq!(report.completed, 1);
    assert!(matches!(report.failures[0].error, Error::TimedOut { .. }));
    driver.abort();
}

#[tokio::test]
async fn large_fragments_survive_partial_reads_and_writes() {
    let config = ServerConfig::builder()
        .bind("127.0.0.1:0".parse().unwrap())
        .read_buffer_size(64)
        .write_buffer_size(37)
        .build();
    let h = harness(config).await;

    // interleave odd and even lines across two fragments, each reversed
    let odd: String = (1..2000)
        .rev()
        .filter(|n| n % 2 == 1)
        .map(|n| format!("{n} line {n}\n"))
        .collect();
    let even: String = (1..2000)
        .rev()
        .filter(|n| n % 2 == 0)
        .map(|n| format!("{n} line {n}\n"))
        .collect();

    let small_reads = ParticipantConfig::builder().read_buffer_size(16).build();
    let addr = h.addr;
    let participants: Vec<_> = (0..2)
        .map(|_| {
            let config = small_reads.clone();
            tokio::spawn(async move { participate(addr, &config).await })
        })
        .collect();

    let session = Session::new(vec![
        Fragment::from_bytes(0, "odd", odd),
        Fragment::from_bytes(1, "even", even),
    ]);
    let (report, output) = run(h, session).await;

    let expected: String =
        (1..2000).map(|n| format!("line {n}\n")).collect();
    assert_eq!(output, expected);
    assert!(report.is_success());
    for p in participants {
        p.await.unwrap().unwrap();
    }
}

#[tokio::test]
async fn surplus_participant_is_turned_away() {
    let h = harness(loopback()).await;
    let participants: Vec<_> =
        (0..2).map(|_| spawn_participant(h.addr)).collect();

    let session = Session::new(fragments(&["2 b\n1 a\n"]));
    let (report, output) = run(h, session).await;

    assert_eq!(output, "a\nb\n");
    assert_eq!(report.completed, 1);

    let mut ok = 0;
    for p in participants {
        if p.await.unwrap().is_ok() {
            ok += 1;
        }
    }
    assert_eq!(ok, 1);
}
