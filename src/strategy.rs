use std::{
    fmt::{self, Display},
    num::NonZeroUsize,
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
};

use serde::Deserialize;

use crate::{
    body::{Body, BodyBounds},
    error::{Error, Result},
};

/// How a call to [`Strategy::calculate_and_move`] ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[must_use]
pub enum TickOutcome {
    /// Every body advanced by one tick.
    Completed,
    /// The tick was cancelled and every body is back to its pre-tick state.
    Interrupted,
}

/// Cloneable handle used to cancel the tick running on another thread.
///
/// A request made while no tick runs cancels the next one.
/// The tick that observes a request consumes it.
#[derive(Clone, Debug, Default)]
pub struct InterruptHandle(Arc<AtomicBool>);

impl InterruptHandle {
    pub fn interrupt(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Consume a pending request, returning whether there was one.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// Common contract of all concurrency strategies.
pub trait Strategy: Send {
    fn kind(&self) -> StrategyKind;

    /// Replace the bodies with random ones drawn from `bounds`.
    fn create_bodies(&mut self, bounds: &BodyBounds) -> Result<()>;

    /// Advance every body by exactly one tick.
    ///
    /// If an interrupt is requested before the tick ends, every body is restored
    /// to the state it had when the call started.
    fn calculate_and_move(&mut self) -> Result<TickOutcome>;

    fn interrupt_handle(&self) -> InterruptHandle;

    fn interrupt(&self) {
        self.interrupt_handle().interrupt();
    }

    fn bodies(&self) -> &[Body];

    /// Explicitly reset the bodies, e.g. to run several strategies from the same state.
    fn set_bodies(&mut self, bodies: Vec<Body>) -> Result<()>;
}

/// Check that a strategy built for `expected` bodies gets exactly that many.
pub(crate) fn check_body_count(expected: usize, bodies: &[Body]) -> Result<()> {
    if bodies.len() != expected {
        return Err(Error::BodyCountMismatch {
            expected,
            actual: bodies.len(),
        });
    }
    Ok(())
}

/// Default number of threads: one per available core plus one.
#[must_use]
pub fn default_workers() -> usize {
    thread::available_parallelism().map_or(1, NonZeroUsize::get) + 1
}

/// Names under which strategies can be selected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// All pairs, one thread.
    Sequential,
    /// All pairs, static row partitions on scoped threads.
    #[serde(alias = "multi_thread")]
    MultiThread,
    /// All pairs, one rayon task per body.
    #[cfg(feature = "rayon")]
    #[serde(alias = "stream")]
    ParallelMap,
    /// Dependency-driven worker pool.
    #[default]
    #[serde(alias = "task")]
    WorkerPool,
    /// Scatter/gather over in-process shards.
    #[serde(alias = "actor")]
    ScatterGather,
    /// Scatter/gather over a cluster of shard nodes.
    Distributed,
}

impl StrategyKind {
    pub const ALL: &'static [StrategyKind] = &[
        StrategyKind::Sequential,
        StrategyKind::MultiThread,
        #[cfg(feature = "rayon")]
        StrategyKind::ParallelMap,
        StrategyKind::WorkerPool,
        StrategyKind::ScatterGather,
        StrategyKind::Distributed,
    ];

    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Sequential => "sequential",
            StrategyKind::MultiThread => "multi-thread",
            #[cfg(feature = "rayon")]
            StrategyKind::ParallelMap => "parallel-map",
            StrategyKind::WorkerPool => "worker-pool",
            StrategyKind::ScatterGather => "scatter-gather",
            StrategyKind::Distributed => "distributed",
        }
    }
}

impl Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase().replace(|c: char| c == '_' || c == ' ', "-");
        let kind = match normalized.as_str() {
            "sequential" => StrategyKind::Sequential,
            "multi-thread" => StrategyKind::MultiThread,
            #[cfg(feature = "rayon")]
            "parallel-map" | "stream" => StrategyKind::ParallelMap,
            "worker-pool" | "task" => StrategyKind::WorkerPool,
            "scatter-gather" | "actor" => StrategyKind::ScatterGather,
            "distributed" => StrategyKind::Distributed,
            _ => return Err(Error::UnknownStrategy(s.to_owned())),
        };
        Ok(kind)
    }
}
