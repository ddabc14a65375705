//! Coordinator that partitions the bodies into shards and runs every phase as
//! scatter, gather and combine.

mod cluster;
mod local;
mod message;
mod shard;

pub use cluster::*;
pub use local::*;
pub use message::*;
pub use shard::*;

use std::{ops::Range, time::Instant};

use log::{debug, info, warn};

use crate::{
    body::{self, Body, BodyBounds},
    error::{Error, Result},
    matrix::InteractionMatrix,
    strategy::{check_body_count, InterruptHandle, Strategy, StrategyKind, TickOutcome},
};

/// Default number of shards.
pub const DEFAULT_SHARDS: usize = 10;

/// Carries shard messages between the coordinator and its shards.
pub trait Transport: Send {
    fn kind(&self) -> StrategyKind;

    /// Number of shards currently reachable.
    fn shards(&self) -> usize;

    fn send(&mut self, shard: usize, request: ShardRequest) -> Result<()>;

    /// Block until any shard replies.
    fn recv(&mut self) -> Result<ShardReply>;
}

/// Scatter/gather over any [`Transport`].
///
/// The coordinator owns the canonical bodies; shards only ever see copies.
#[derive(Debug)]
pub struct ScatterGather<T: Transport> {
    transport: T,
    n_bodies: usize,
    delta_time: f64,
    bodies: Vec<Body>,
    /// Sequence number of the last dispatched phase set.
    tick: u64,
    interrupt: InterruptHandle,
}

impl ScatterGather<LocalShards> {
    /// In-process scatter/gather with [`DEFAULT_SHARDS`] shards.
    #[must_use]
    pub fn new(n_bodies: usize, delta_time: f64) -> Self {
        Self::with_shards(n_bodies, delta_time, DEFAULT_SHARDS)
    }

    #[must_use]
    pub fn with_shards(n_bodies: usize, delta_time: f64, num_shards: usize) -> Self {
        Self::with_transport(LocalShards::spawn(num_shards), n_bodies, delta_time)
    }
}

impl ScatterGather<Cluster> {
    /// Scatter/gather over the members of `cluster`.
    #[must_use]
    pub fn distributed(cluster: Cluster, n_bodies: usize, delta_time: f64) -> Self {
        Self::with_transport(cluster, n_bodies, delta_time)
    }
}

impl<T: Transport> ScatterGather<T> {
    #[must_use]
    pub fn with_transport(transport: T, n_bodies: usize, delta_time: f64) -> Self {
        info!(
            "{} coordinator for {n_bodies} bodies on {} shards",
            transport.kind(),
            transport.shards()
        );
        Self {
            transport,
            n_bodies,
            delta_time,
            bodies: Vec::new(),
            tick: 0,
            interrupt: InterruptHandle::default(),
        }
    }

    #[must_use]
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Access to the transport between ticks, e.g. to change cluster membership.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Send one request per shard; the shard ranges follow [`body::partition`].
    fn scatter(&mut self, mut request: impl FnMut(Range<usize>) -> ShardRequest) -> Result<usize> {
        let shards = self.transport.shards();
        if shards == 0 {
            return Err(Error::EmptyCluster);
        }
        for (shard, range) in body::partition(self.n_bodies, shards).into_iter().enumerate() {
            self.transport.send(shard, request(range))?;
        }
        Ok(shards)
    }

    /// Wait for `expected` replies of the current tick.
    fn gather(&mut self, expected: usize, mut combine: impl FnMut(ShardReply) -> Result<()>) -> Result<()> {
        let mut arrived = 0;
        while arrived < expected {
            let reply = self.transport.recv()?;
            if reply.tick() != self.tick {
                warn!(
                    "dropped a reply of tick {} during tick {}",
                    reply.tick(),
                    self.tick
                );
                continue;
            }
            if let ShardReply::Failed { reason, .. } = reply {
                return Err(Error::Protocol(reason));
            }
            combine(reply)?;
            arrived += 1;
        }
        Ok(())
    }

    fn compute_forces(&mut self) -> Result<InteractionMatrix> {
        let tick = self.tick;
        let bodies = self.bodies.clone();
        let shards = self.scatter(|range| ShardRequest::ComputeForces {
            tick,
            from: range.start,
            count: range.len(),
            bodies: bodies.clone(),
        })?;

        let mut matrix: InteractionMatrix = InteractionMatrix::new(self.n_bodies);
        self.gather(shards, |reply| match reply {
            ShardReply::ForcesComputed { from, forces, .. } => {
                for i in 0..forces.rows() {
                    for j in i + 1..forces.cols() {
                        matrix.set(from + i, from + j, forces.get(i, j));
                    }
                }
                Ok(())
            }
            other => Err(unexpected(&other)),
        })?;
        Ok(matrix)
    }

    fn move_bodies(&mut self, matrix: &InteractionMatrix) -> Result<Vec<Body>> {
        let delta_time = self.delta_time;
        let tick = self.tick;
        let bodies = self.bodies.clone();
        let shards = self.scatter(|range| ShardRequest::MoveBodies {
            tick,
            from: range.start,
            count: range.len(),
            bodies: bodies[range.clone()].to_vec(),
            forces: matrix.restrict_rows(range.end),
            delta_time,
        })?;

        let mut moved = bodies;
        self.gather(shards, |reply| match reply {
            ShardReply::BodiesMoved { from, bodies, .. } => place(&mut moved, from, &bodies),
            other => Err(unexpected(&other)),
        })?;
        Ok(moved)
    }

    fn cancelled(&self) -> bool {
        if self.interrupt.take() {
            warn!("{} tick {} interrupted, snapshot kept", self.kind(), self.tick);
            return true;
        }
        false
    }
}

fn unexpected(reply: &ShardReply) -> Error {
    let name = match reply {
        ShardReply::BodiesCreated { .. } => "bodies created",
        ShardReply::ForcesComputed { .. } => "forces computed",
        ShardReply::BodiesMoved { .. } => "bodies moved",
        ShardReply::Failed { .. } => "failed",
    };
    Error::Protocol(format!("unexpected `{name}` reply"))
}

/// Copy a shard's bodies into their slots of `target`.
fn place(target: &mut [Body], from: usize, bodies: &[Body]) -> Result<()> {
    let slots = target
        .get_mut(from..from + bodies.len())
        .ok_or_else(|| Error::Protocol(format!("{} bodies from {from} are out of range", bodies.len())))?;
    slots.copy_from_slice(bodies);
    Ok(())
}

impl<T: Transport> Strategy for ScatterGather<T> {
    fn kind(&self) -> StrategyKind {
        self.transport.kind()
    }

    fn create_bodies(&mut self, bounds: &BodyBounds) -> Result<()> {
        bounds.validate()?;
        self.tick += 1;

        let tick = self.tick;
        let bounds = *bounds;
        let shards = self.scatter(|range| ShardRequest::CreateBodies {
            tick,
            from: range.start,
            count: range.len(),
            bounds,
        })?;

        let mut created = vec![Body::new(0., Default::default(), Default::default()); self.n_bodies];
        self.gather(shards, |reply| match reply {
            ShardReply::BodiesCreated { from, bodies, .. } => place(&mut created, from, &bodies),
            other => Err(unexpected(&other)),
        })?;

        self.bodies = created;
        info!("{} created {} bodies on {shards} shards", self.kind(), self.n_bodies);
        Ok(())
    }

    fn calculate_and_move(&mut self) -> Result<TickOutcome> {
        if self.bodies.len() != self.n_bodies {
            return Err(Error::BodiesNotCreated);
        }
        self.tick += 1;
        if self.cancelled() {
            return Ok(TickOutcome::Interrupted);
        }

        let start = Instant::now();
        let matrix = self.compute_forces()?;
        debug!("{} tick {} forces: {:?}", self.kind(), self.tick, start.elapsed());

        if self.cancelled() {
            return Ok(TickOutcome::Interrupted);
        }

        let moved = self.move_bodies(&matrix)?;
        if self.cancelled() {
            return Ok(TickOutcome::Interrupted);
        }
        self.bodies = moved;
        debug!("{} tick {}: {:?}", self.kind(), self.tick, start.elapsed());

        Ok(TickOutcome::Completed)
    }

    fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    fn bodies(&self) -> &[Body] {
        &self.bodies
    }

    fn set_bodies(&mut self, bodies: Vec<Body>) -> Result<()> {
        check_body_count(self.n_bodies, &bodies)?;
        self.bodies = bodies;
        Ok(())
    }
}
