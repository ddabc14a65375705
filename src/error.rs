use std::io;

use thiserror::Error;

/// Errors raised by strategies, transports and configuration loading.
///
/// Cancelling a tick is not an error, see [`TickOutcome`](crate::TickOutcome).
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid creation bounds: {0}")]
    InvalidBounds(String),
    #[error("expected {expected} bodies, got {actual}")]
    BodyCountMismatch { expected: usize, actual: usize },
    #[error("bodies have not been created yet")]
    BodiesNotCreated,
    #[error("unknown strategy `{0}`")]
    UnknownStrategy(String),
    #[error("shard {0} disconnected")]
    ShardDisconnected(usize),
    #[error("the cluster has no members")]
    EmptyCluster,
    #[error("protocol violation: {0}")]
    Protocol(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Codec(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
