use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    process::ExitCode,
    time::Duration,
};

use clap::{Parser, Subcommand};
use shardline::{
    manifest::Manifest,
    net::{
        participant::participate, reactor::Reactor, MAX_MESSAGE_BYTES,
        READ_BUFFER_SIZE, WRITE_BUFFER_SIZE,
    },
    output::Output,
    session::{Session, SessionReport},
    Error, ParticipantConfig, ServerConfig,
};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Hand out line-numbered fragments over TCP and stitch the echoes back
/// together in order.
#[derive(Parser, Debug)]
#[command(name = "shardline", version, about)]
struct Args {
    /// Log at debug level regardless of RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the fragments listed in a manifest and write the merged output
    Serve {
        /// First line: output path. Every further line: one fragment path.
        manifest: PathBuf,
        port: u16,
        #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
        bind: IpAddr,
        /// Drop a participant that stays silent for this many seconds
        #[arg(long)]
        idle_timeout_secs: Option<u64>,
        #[arg(long, default_value_t = MAX_MESSAGE_BYTES)]
        max_message_bytes: usize,
        #[arg(long, default_value_t = WRITE_BUFFER_SIZE)]
        write_buffer_size: usize,
    },
    /// Receive one fragment, put it in order and send it back
    Join {
        address: IpAddr,
        port: u16,
        #[arg(long)]
        connect_timeout_secs: Option<u64>,
        #[arg(long, default_value_t = MAX_MESSAGE_BYTES)]
        max_message_bytes: usize,
    },
}

const PARTIAL_FAILURE: u8 = 1;
const BOOTSTRAP_FAILURE: u8 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    match args.command {
        Command::Serve {
            manifest,
            port,
            bind,
            idle_timeout_secs,
            max_message_bytes,
            write_buffer_size,
        } => {
            let config = ServerConfig::builder()
                .bind(SocketAddr::new(bind, port))
                .idle_timeout(idle_timeout_secs.map(Duration::from_secs))
                .max_message_bytes(max_message_bytes)
                .read_buffer_size(READ_BUFFER_SIZE)
                .write_buffer_size(write_buffer_size)
                .build();
            match serve(manifest, config).await {
                Ok(report) => summarize(&report),
                Err(e) => {
                    error!("{e}");
                    ExitCode::from(BOOTSTRAP_FAILURE)
                }
            }
        }
        Command::Join {
            address,
            port,
            connect_timeout_secs,
            max_message_bytes,
        } => {
            let config = ParticipantConfig::builder()
                .connect_timeout(connect_timeout_secs.map(Duration::from_secs))
                .max_message_bytes(max_message_bytes)
                .build();
            match participate(SocketAddr::new(address, port), &config).await {
                Ok(report) => {
                    info!(records = report.records, "done");
                    ExitCode::SUCCESS
                }
                Err(e @ (Error::Connect { .. } | Error::TimedOut { .. })) => {
                    error!("{e}");
                    ExitCode::from(BOOTSTRAP_FAILURE)
                }
                Err(e) => {
                    error!("{e}");
                    ExitCode::from(PARTIAL_FAILURE)
                }
            }
        }
    }
}

async fn serve(
    manifest: PathBuf,
    config: ServerConfig,
) -> Result<SessionReport, Error> {
    let manifest = Manifest::load(&manifest)?;
    let fragments = manifest.open_fragments()?;
    let reactor =
        Reactor::bind(config, Output::new(manifest.output.clone())).await?;
    info!(addr = ?reactor.local_addr().ok(), "listening");
    reactor.run(Session::new(fragments)).await
}

fn summarize(report: &SessionReport) -> ExitCode {
    for failure in &report.failures {
        warn!(
            connection = %failure.id,
            peer = %failure.peer,
            fragment = %failure.fragment,
            "{}",
            failure.error
        );
    }
    info!(
        completed = report.completed,
        expected = report.expected,
        records = report.records,
        "session finished"
    );
    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(PARTIAL_FAILURE)
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
