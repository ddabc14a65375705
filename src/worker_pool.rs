//! Dependency-driven pipeline from "row of forces computed" to "body moved".
//!
//! Row job `i` computes the forces between body `i` and every body `j > i`.
//! Body `i` can be moved as soon as rows `0..=i` are complete, since its total force
//! needs its column as well as its row. Moves of early bodies overlap with rows of
//! later ones. Rows read a snapshot taken when the tick starts, never the moved bodies.

use std::{
    collections::VecDeque,
    mem,
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    thread,
    time::Instant,
};

use log::{debug, info, warn};

use crate::{
    body::{Body, BodyBounds, BodyCreator, UniformBodyCreator},
    error::{Error, Result},
    force::force_between,
    matrix::SharedInteractionMatrix,
    strategy::{check_body_count, default_workers, InterruptHandle, Strategy, StrategyKind, TickOutcome},
};

#[cfg(test)]
type MoveHook = Box<dyn Fn(usize) + Send + Sync>;

pub struct WorkerPool {
    n_bodies: usize,
    delta_time: f64,
    num_workers: usize,
    bodies: Vec<Body>,
    interrupt: InterruptHandle,
    #[cfg(test)]
    after_move: Option<MoveHook>,
}

impl WorkerPool {
    /// A pool with one worker per available core plus one.
    #[must_use]
    pub fn new(n_bodies: usize, delta_time: f64) -> Self {
        Self {
            n_bodies,
            delta_time,
            num_workers: default_workers(),
            bodies: Vec::new(),
            interrupt: InterruptHandle::default(),
            #[cfg(test)]
            after_move: None,
        }
    }

    #[must_use]
    pub fn workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers.max(1);
        self
    }

    #[must_use]
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Called by the worker with the number of bodies moved so far.
    #[cfg(test)]
    fn on_move(mut self, hook: impl Fn(usize) + Send + Sync + 'static) -> Self {
        self.after_move = Some(Box::new(hook));
        self
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("n_bodies", &self.n_bodies)
            .field("delta_time", &self.delta_time)
            .field("num_workers", &self.num_workers)
            .finish_non_exhaustive()
    }
}

/// A body and its state before the current tick touched it.
struct Slot {
    body: Body,
    backup: Option<Body>,
}

enum Job {
    Row(usize),
    Move(usize),
    Stop,
}

struct Queue {
    rows: VecDeque<usize>,
    moves: VecDeque<usize>,
    completed: Vec<bool>,
    /// First row that is not part of the complete prefix `0..frontier`.
    frontier: usize,
    moved: usize,
    stop: bool,
    cancelled: bool,
}

/// Everything the workers of one tick share.
struct Tick<'a> {
    /// Bodies as they were when the tick started; rows only read these.
    snapshot: &'a [Body],
    slots: Vec<Mutex<Slot>>,
    matrix: SharedInteractionMatrix,
    queue: Mutex<Queue>,
    ready: Condvar,
    interrupt: &'a InterruptHandle,
    delta_time: f64,
    #[cfg(test)]
    after_move: Option<&'a MoveHook>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // a panicking worker is re-raised when the scope joins it
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Tick<'_> {
    fn run_worker(&self, id: usize) {
        loop {
            match self.next_job(id) {
                Job::Row(i) => {
                    self.compute_row(i);
                    self.complete_row(i);
                }
                Job::Move(i) => {
                    self.move_body(i);
                    self.complete_move();
                }
                Job::Stop => return,
            }
        }
    }

    /// Block until there is something to do.
    ///
    /// Rows are handed out first. Even workers take moves from the front of the
    /// queue, odd workers from the back.
    fn next_job(&self, id: usize) -> Job {
        let mut queue = lock(&self.queue);
        loop {
            if queue.stop {
                return Job::Stop;
            }
            if self.interrupt.is_requested() {
                queue.cancelled = true;
                queue.stop = true;
                self.ready.notify_all();
                return Job::Stop;
            }
            if let Some(i) = queue.rows.pop_front() {
                return Job::Row(i);
            }
            let next_move = if id % 2 == 0 {
                queue.moves.pop_front()
            } else {
                queue.moves.pop_back()
            };
            if let Some(i) = next_move {
                return Job::Move(i);
            }
            // spurious wake-ups just go around the loop
            queue = self
                .ready
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn compute_row(&self, i: usize) {
        let bi = self.snapshot.get(i);
        for j in i + 1..self.snapshot.len() {
            self.matrix.set(i, j, force_between(bi, self.snapshot.get(j)));
        }
    }

    fn complete_row(&self, i: usize) {
        let mut queue = lock(&self.queue);
        queue.completed[i] = true;

        let start = queue.frontier;
        while queue.frontier < queue.completed.len() && queue.completed[queue.frontier] {
            queue.frontier += 1;
        }
        if queue.frontier > start {
            let newly_movable = start..queue.frontier;
            queue.moves.extend(newly_movable);
        }
        // moves may have become available and idle workers wait for them
        self.ready.notify_all();
    }

    fn move_body(&self, i: usize) {
        let total = self.matrix.total_force(i);

        let mut slot = lock(&self.slots[i]);
        slot.backup = Some(slot.body);
        slot.body.apply(total, self.delta_time);
    }

    fn complete_move(&self) {
        let mut queue = lock(&self.queue);
        queue.moved += 1;
        #[cfg(test)]
        if let Some(hook) = self.after_move {
            hook(queue.moved);
        }
        if queue.moved == self.slots.len() {
            queue.stop = true;
            self.ready.notify_all();
        }
    }
}

impl Strategy for WorkerPool {
    fn kind(&self) -> StrategyKind {
        StrategyKind::WorkerPool
    }

    fn create_bodies(&mut self, bounds: &BodyBounds) -> Result<()> {
        let mut creator = UniformBodyCreator::new(bounds)?;
        self.bodies = creator.create_bodies(self.n_bodies);
        info!(
            "worker pool created {} bodies for {} workers",
            self.n_bodies, self.num_workers
        );
        Ok(())
    }

    fn calculate_and_move(&mut self) -> Result<TickOutcome> {
        if self.bodies.len() != self.n_bodies {
            return Err(Error::BodiesNotCreated);
        }

        let start = Instant::now();
        let n = self.n_bodies;
        let snapshot = mem::take(&mut self.bodies);
        let tick = Tick {
            snapshot: &snapshot,
            slots: snapshot
                .iter()
                .map(|&body| Mutex::new(Slot { body, backup: None }))
                .collect(),
            matrix: SharedInteractionMatrix::new(n),
            queue: Mutex::new(Queue {
                rows: (0..n).collect(),
                moves: VecDeque::with_capacity(n),
                completed: vec![false; n],
                frontier: 0,
                moved: 0,
                stop: n == 0,
                cancelled: false,
            }),
            ready: Condvar::new(),
            interrupt: &self.interrupt,
            delta_time: self.delta_time,
            #[cfg(test)]
            after_move: self.after_move.as_ref(),
        };

        thread::scope(|s| {
            for id in 0..self.num_workers {
                let tick = &tick;
                s.spawn(move || tick.run_worker(id));
            }
        });

        let cancelled = tick
            .queue
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
            .cancelled;
        let interrupted = self.interrupt.take() || cancelled;

        let mut restored = 0;
        self.bodies = tick
            .slots
            .into_iter()
            .map(|slot| {
                let slot = slot.into_inner().unwrap_or_else(PoisonError::into_inner);
                match slot.backup {
                    Some(backup) if interrupted => {
                        restored += 1;
                        backup
                    }
                    _ => slot.body,
                }
            })
            .collect();

        if interrupted {
            warn!("worker pool tick interrupted, restored {restored} moved bodies");
            return Ok(TickOutcome::Interrupted);
        }
        debug!(
            "worker pool tick with {} workers: {:?}",
            self.num_workers,
            start.elapsed()
        );
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

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use approx::assert_abs_diff_eq;
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;
    use crate::direct_summation::DirectSummation;

    fn random_bodies(n: usize, seed: u64) -> Vec<Body> {
        UniformBodyCreator::rng(&BodyBounds::default(), StdRng::seed_from_u64(seed))
            .unwrap()
            .create_bodies(n)
    }

    #[test]
    fn matches_direct_summation() {
        let bodies = random_bodies(200, 1);

        let mut reference = DirectSummation::new(200, 1e4);
        reference.set_bodies(bodies.clone()).unwrap();
        assert_eq!(reference.calculate_and_move().unwrap(), TickOutcome::Completed);

        for num_workers in [1, 2, 5] {
            let mut pool = WorkerPool::new(200, 1e4).workers(num_workers);
            pool.set_bodies(bodies.clone()).unwrap();
            assert_eq!(pool.calculate_and_move().unwrap(), TickOutcome::Completed);

            for (p, r) in pool.bodies().iter().zip(reference.bodies()) {
                assert_eq!(p.mass, r.mass);
                assert_abs_diff_eq!(p.position, r.position, epsilon = 1e-11);
                assert_abs_diff_eq!(p.velocity, r.velocity, epsilon = 1e-11);
            }
            // rows only see pre-tick bodies, so the result does not depend on scheduling
            assert_eq!(pool.bodies(), reference.bodies(), "{num_workers} workers");
        }
    }

    #[test]
    fn several_ticks() {
        let mut pool = WorkerPool::new(30, 1e4).workers(3);
        pool.create_bodies(&BodyBounds::default()).unwrap();
        for _ in 0..5 {
            assert_eq!(pool.calculate_and_move().unwrap(), TickOutcome::Completed);
        }
        assert_eq!(pool.bodies().len(), 30);
    }

    #[test]
    fn tiny_body_sets() {
        for n in [0, 1, 2] {
            let mut pool = WorkerPool::new(n, 1.).workers(4);
            pool.set_bodies(random_bodies(n, 3)).unwrap();
            assert_eq!(pool.calculate_and_move().unwrap(), TickOutcome::Completed);
            assert_eq!(pool.bodies().len(), n);
        }
    }

    #[test]
    fn interrupted_before_any_move() {
        let bodies = random_bodies(50, 2);
        let mut pool = WorkerPool::new(50, 1e4).workers(4);
        pool.set_bodies(bodies.clone()).unwrap();

        pool.interrupt();
        assert_eq!(pool.calculate_and_move().unwrap(), TickOutcome::Interrupted);
        assert_eq!(pool.bodies(), bodies.as_slice());
    }

    #[test]
    fn interrupted_after_some_moves() {
        const N: usize = 100;
        const M: usize = 17;

        let bodies = random_bodies(N, 4);
        let handle = InterruptHandle::default();
        let hook_handle = handle.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let hook_seen = seen.clone();
        let fired = AtomicBool::new(false);

        let mut pool = WorkerPool::new(N, 1e4).workers(4).on_move(move |moved| {
            hook_seen.store(moved, Ordering::SeqCst);
            // only the first tick is cut short
            if moved == M && !fired.swap(true, Ordering::SeqCst) {
                hook_handle.interrupt();
            }
        });
        pool.interrupt = handle.clone();
        pool.set_bodies(bodies.clone()).unwrap();

        assert_eq!(pool.calculate_and_move().unwrap(), TickOutcome::Interrupted);
        let moved = seen.load(Ordering::SeqCst);
        assert!((M..N).contains(&moved), "moved {moved} bodies");
        assert_eq!(pool.bodies(), bodies.as_slice());

        // the next tick runs normally
        assert_eq!(pool.calculate_and_move().unwrap(), TickOutcome::Completed);
        assert_eq!(seen.load(Ordering::SeqCst), N);
        assert!(!handle.is_requested());

        let mut reference = DirectSummation::new(N, 1e4);
        reference.set_bodies(bodies).unwrap();
        assert_eq!(reference.calculate_and_move().unwrap(), TickOutcome::Completed);
        assert_eq!(pool.bodies(), reference.bodies());
    }
}
