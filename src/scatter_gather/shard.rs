use crate::{
    body::{Body, BodyCreator, UniformBodyCreator},
    force::force_between,
    matrix::InteractionMatrix,
};

use super::message::{ShardReply, ShardRequest};

/// The work done by one shard.
///
/// A shard keeps no state between messages: everything it needs arrives by value.
#[derive(Clone, Copy, Debug, Default)]
pub struct Shard;

impl Shard {
    #[must_use]
    pub fn handle(&self, request: ShardRequest) -> ShardReply {
        match request {
            ShardRequest::CreateBodies {
                tick,
                from,
                count,
                bounds,
            } => match UniformBodyCreator::new(&bounds) {
                Ok(mut creator) => ShardReply::BodiesCreated {
                    tick,
                    from,
                    bodies: creator.create_bodies(count),
                },
                Err(e) => ShardReply::Failed {
                    tick,
                    reason: e.to_string(),
                },
            },
            ShardRequest::ComputeForces {
                tick,
                from,
                count,
                bodies,
            } => ShardReply::ForcesComputed {
                tick,
                from,
                forces: compute_forces(&bodies, from, count),
            },
            ShardRequest::MoveBodies {
                tick,
                from,
                count,
                bodies,
                forces,
                delta_time,
            } => {
                if bodies.len() != count || forces.rows() < from + count {
                    return ShardReply::Failed {
                        tick,
                        reason: format!(
                            "move of {count} bodies from {from} got {} bodies and {} rows",
                            bodies.len(),
                            forces.rows()
                        ),
                    };
                }
                ShardReply::BodiesMoved {
                    tick,
                    from,
                    bodies: move_bodies(bodies, &forces, from, delta_time),
                }
            }
        }
    }
}

/// Forces of the rows `from..from + count` in shard-local indices.
fn compute_forces(bodies: &[Body], from: usize, count: usize) -> InteractionMatrix {
    let n = bodies.len();
    let mut forces: InteractionMatrix = InteractionMatrix::with_rows(count, n.saturating_sub(from));

    for i in from..(from + count).min(n) {
        for j in i + 1..n {
            forces.set(i - from, j - from, force_between(bodies.get(i), bodies.get(j)));
        }
    }
    forces
}

fn move_bodies(mut bodies: Vec<Body>, forces: &InteractionMatrix, from: usize, delta_time: f64) -> Vec<Body> {
    for (i, body) in (from..).zip(bodies.iter_mut()) {
        body.apply(forces.total_force(i), delta_time);
    }
    bodies
}
