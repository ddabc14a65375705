use std::{sync::mpsc, thread, time::Instant};

use log::{debug, info, warn};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

use crate::{
    body::{self, Body, BodyBounds, BodyCreator, UniformBodyCreator},
    error::{Error, Result},
    force::{force_between, Force},
    strategy::{check_body_count, InterruptHandle, Strategy, StrategyKind, TickOutcome},
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum Execution {
    #[default]
    SingleThreaded,
    Multithreaded {
        num_threads: usize,
    },
    #[cfg(feature = "rayon")]
    RayonIter,
}

/// Every body sums the forces of all other bodies, nothing is shared between pairs.
#[derive(Debug)]
pub struct DirectSummation {
    execution: Execution,
    n_bodies: usize,
    delta_time: f64,
    bodies: Vec<Body>,
    interrupt: InterruptHandle,
}

impl DirectSummation {
    #[must_use]
    pub fn new(n_bodies: usize, delta_time: f64) -> Self {
        Self {
            execution: Execution::SingleThreaded,
            n_bodies,
            delta_time,
            bodies: Vec::new(),
            interrupt: InterruptHandle::default(),
        }
    }

    /// Split the bodies into `num_threads` static partitions, each summed on its own thread.
    #[must_use]
    pub fn multithreaded(mut self, num_threads: usize) -> Self {
        self.execution = Execution::Multithreaded {
            num_threads: num_threads.max(1),
        };
        self
    }

    /// Use Rayon to sum the forces of every body in parallel.
    #[cfg(feature = "rayon")]
    #[must_use]
    pub fn rayon_iter(mut self) -> Self {
        self.execution = Execution::RayonIter;
        self
    }

    #[must_use]
    pub fn execution(&self) -> Execution {
        self.execution
    }

    /// Sums in the order of [`InteractionMatrix::total_force`]: the row `j > i`,
    /// then the reversed column `k < i`. Every strategy then rounds identically.
    ///
    /// [`InteractionMatrix::total_force`]: crate::matrix::InteractionMatrix::total_force
    fn total_force(bodies: &[Body], i: usize) -> Force {
        let row: Force = (i + 1..bodies.len())
            .map(|j| force_between(bodies.get(i), bodies.get(j)))
            .sum();
        let column: Force = (0..i)
            .map(|k| force_between(bodies.get(k), bodies.get(i)).reversed())
            .sum();
        row + column
    }

    fn calculate_forces(&self) -> Vec<Force> {
        let bodies = &self.bodies;

        match self.execution {
            Execution::SingleThreaded => (0..bodies.len())
                .map(|i| Self::total_force(bodies, i))
                .collect(),
            Execution::Multithreaded { num_threads } => {
                let (tx, rx) = mpsc::channel();
                let chunks = body::partition(bodies.len(), num_threads);

                thread::scope(|s| {
                    for chunk in &chunks {
                        let tx = tx.clone();
                        let chunk = chunk.clone();

                        s.spawn(move || {
                            let totals: Vec<_> = chunk
                                .clone()
                                .map(|i| Self::total_force(bodies, i))
                                .collect();
                            // the receiver outlives the scope
                            let _ = tx.send((chunk.start, totals));
                        });
                    }
                });
                drop(tx);

                let mut forces = vec![Force::null(); bodies.len()];
                for (start, totals) in rx {
                    forces[start..start + totals.len()].copy_from_slice(&totals);
                }
                forces
            }
            #[cfg(feature = "rayon")]
            Execution::RayonIter => (0..bodies.len())
                .into_par_iter()
                .map(|i| Self::total_force(bodies, i))
                .collect(),
        }
    }

    fn move_bodies(&self, forces: &[Force]) -> Vec<Body> {
        let mut moved = self.bodies.clone();
        let delta_time = self.delta_time;

        match self.execution {
            Execution::SingleThreaded => {
                for (b, f) in moved.iter_mut().zip(forces) {
                    b.apply(*f, delta_time);
                }
            }
            Execution::Multithreaded { num_threads } => {
                let per_thread = moved.len().div_ceil(num_threads).max(1);
                thread::scope(|s| {
                    for (bodies, forces) in moved.chunks_mut(per_thread).zip(forces.chunks(per_thread)) {
                        s.spawn(move || {
                            for (b, f) in bodies.iter_mut().zip(forces) {
                                b.apply(*f, delta_time);
                            }
                        });
                    }
                });
            }
            #[cfg(feature = "rayon")]
            Execution::RayonIter => {
                moved.par_iter_mut().zip(forces).for_each(|(b, f)| {
                    b.apply(*f, delta_time);
                });
            }
        }

        moved
    }

    fn cancelled(&self) -> bool {
        if self.interrupt.take() {
            warn!("{} tick interrupted, bodies left unchanged", self.kind());
            return true;
        }
        false
    }
}

impl Strategy for DirectSummation {
    fn kind(&self) -> StrategyKind {
        match self.execution {
            Execution::SingleThreaded => StrategyKind::Sequential,
            Execution::Multithreaded { .. } => StrategyKind::MultiThread,
            #[cfg(feature = "rayon")]
            Execution::RayonIter => StrategyKind::ParallelMap,
        }
    }

    fn create_bodies(&mut self, bounds: &BodyBounds) -> Result<()> {
        let mut creator = UniformBodyCreator::new(bounds)?;
        self.bodies = creator.create_bodies(self.n_bodies);
        info!("{} created {} bodies", self.kind(), self.n_bodies);
        Ok(())
    }

    fn calculate_and_move(&mut self) -> Result<TickOutcome> {
        if self.bodies.len() != self.n_bodies {
            return Err(Error::BodiesNotCreated);
        }
        if self.cancelled() {
            return Ok(TickOutcome::Interrupted);
        }

        let start = Instant::now();
        let forces = self.calculate_forces();
        debug!("{} forces: {:?}", self.kind(), start.elapsed());

        if self.cancelled() {
            return Ok(TickOutcome::Interrupted);
        }

        let moved = self.move_bodies(&forces);
        if self.cancelled() {
            return Ok(TickOutcome::Interrupted);
        }
        self.bodies = moved;
        debug!("{} tick: {:?}", self.kind(), start.elapsed());

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
