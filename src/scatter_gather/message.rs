use serde::{Deserialize, Serialize};

use crate::{
    body::{Body, BodyBounds},
    matrix::InteractionMatrix,
};

/// Work sent by the coordinator to one shard.
///
/// `from..from + count` is the shard's range of body indices. Every message is
/// tagged with the tick it belongs to so that late replies can be recognised.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ShardRequest {
    CreateBodies {
        tick: u64,
        from: usize,
        count: usize,
        bounds: BodyBounds,
    },
    /// Compute the rows of the shard against every higher body.
    ComputeForces {
        tick: u64,
        from: usize,
        count: usize,
        bodies: Vec<Body>,
    },
    /// Move the bodies of the shard.
    ///
    /// `bodies` holds the shard's own bodies, `forces` the assembled matrix
    /// restricted to the rows before the end of the shard.
    MoveBodies {
        tick: u64,
        from: usize,
        count: usize,
        bodies: Vec<Body>,
        forces: InteractionMatrix,
        delta_time: f64,
    },
}

/// Result of a [`ShardRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ShardReply {
    BodiesCreated {
        tick: u64,
        from: usize,
        bodies: Vec<Body>,
    },
    /// Row-restricted matrix in shard-local indices: cell `(i, j)` holds the pair
    /// `(from + i, from + j)`.
    ForcesComputed {
        tick: u64,
        from: usize,
        forces: InteractionMatrix,
    },
    BodiesMoved {
        tick: u64,
        from: usize,
        bodies: Vec<Body>,
    },
    Failed {
        tick: u64,
        reason: String,
    },
}

impl ShardRequest {
    #[must_use]
    pub fn tick(&self) -> u64 {
        match self {
            ShardRequest::CreateBodies { tick, .. }
            | ShardRequest::ComputeForces { tick, .. }
            | ShardRequest::MoveBodies { tick, .. } => *tick,
        }
    }
}

impl ShardReply {
    #[must_use]
    pub fn tick(&self) -> u64 {
        match self {
            ShardReply::BodiesCreated { tick, .. }
            | ShardReply::ForcesComputed { tick, .. }
            | ShardReply::BodiesMoved { tick, .. }
            | ShardReply::Failed { tick, .. } => *tick,
        }
    }
}
