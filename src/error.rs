use std::path::PathBuf;

/// The error kinds the bot distinguishes when it matters who broke: the
/// operator (config, map), the machine (listeners, database) or a peer
/// (protocol, rejection). Peer-driven errors never take down the reactor;
/// they detach the offender.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("invalid map config file [{0}]")]
    MapInvalid(PathBuf),

    #[error("failed to bind {what} listener on port {port}")]
    ListenerBindFailed {
        what: &'static str,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    #[error("invalid protocol data: {0}")]
    ProtocolInvalid(String),

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("player rejected: {0}")]
    PlayerRejected(&'static str),

    #[error("database error: {0}")]
    Database(String),

    #[error("reconnect rejected (reason {0})")]
    ReconnectRejected(u32),
}
