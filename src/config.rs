use std::{
    net::{Ipv4Addr, SocketAddr},
    time::Duration,
};

use typed_builder::TypedBuilder;

use crate::net::{
    MAX_MESSAGE_BYTES, READ_BUFFER_SIZE, SHARDLINE_PORT, WRITE_BUFFER_SIZE,
};

/// Settings for the multiplexing side.
#[derive(Clone, Debug, TypedBuilder)]
pub struct ServerConfig {
    #[builder(default = SocketAddr::from((Ipv4Addr::UNSPECIFIED, SHARDLINE_PORT)))]
    pub bind: SocketAddr,
    /// A connection that sees no readiness for this long is dropped and
    /// recorded as failed. `None` waits forever.
    #[builder(default)]
    pub idle_timeout: Option<Duration>,
    #[builder(default = MAX_MESSAGE_BYTES)]
    pub max_message_bytes: usize,
    #[builder(default = READ_BUFFER_SIZE)]
    pub read_buffer_size: usize,
    #[builder(default = WRITE_BUFFER_SIZE)]
    pub write_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Settings for a single participant.
#[derive(Clone, Debug, TypedBuilder)]
pub struct ParticipantConfig {
    #[builder(default)]
    pub connect_timeout: Option<Duration>,
    #[builder(default = MAX_MESSAGE_BYTES)]
    pub max_message_bytes: usize,
    #[builder(default = READ_BUFFER_SIZE)]
    pub read_buffer_size: usize,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}
