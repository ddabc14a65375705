//! Run configuration loaded from YAML.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```yaml
//! strategy: worker-pool     # sequential, multi-thread, parallel-map, worker-pool,
//!                           # scatter-gather or distributed
//! bodies: 1000
//! delta_time: 10000.0       # seconds per tick
//! workers: 8                # threads of multi-thread and worker-pool, cores + 1 if absent
//! shards: 10                # shards of scatter-gather and distributed
//! ticks: 100                # 0 runs until the process is killed
//! cadence_ms: 20            # a tick running longer than this is interrupted
//! bounds:
//!   mass_min: 1.0e5
//!   mass_max: 1.0e6
//!   pos_x_max: 300.0
//!   pos_y_max: 300.0
//!   speed_min: -1.0e-6
//!   speed_max: 1.0e-6
//! peers:                    # cluster nodes, spawned locally if empty
//!   - 10.0.0.2:7878
//! ```

use std::{fs::File, io::BufReader, net::SocketAddr, path::Path, time::Duration};

use log::info;
use serde::Deserialize;

use crate::{
    body::BodyBounds,
    direct_summation::DirectSummation,
    error::Result,
    scatter_gather::{Cluster, ScatterGather, DEFAULT_SHARDS},
    strategy::{default_workers, Strategy, StrategyKind},
    worker_pool::WorkerPool,
};

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub strategy: StrategyKind,
    pub bodies: usize,
    pub delta_time: f64,
    pub workers: Option<usize>,
    pub shards: usize,
    pub ticks: usize,
    pub cadence_ms: u64,
    pub bounds: BodyBounds,
    pub peers: Vec<SocketAddr>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            bodies: 1000,
            delta_time: 10_000.,
            workers: None,
            shards: DEFAULT_SHARDS,
            ticks: 100,
            cadence_ms: 20,
            bounds: BodyBounds::default(),
            peers: Vec::new(),
        }
    }
}

impl SimulationConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_yaml::from_reader(reader)?)
    }

    #[must_use]
    pub fn cadence(&self) -> Duration {
        Duration::from_millis(self.cadence_ms)
    }

    #[must_use]
    pub fn workers(&self) -> usize {
        self.workers.unwrap_or_else(default_workers)
    }

    /// Build the configured strategy. Bodies still have to be created.
    pub fn build_strategy(&self) -> Result<Box<dyn Strategy>> {
        let (n, dt) = (self.bodies, self.delta_time);

        let strategy: Box<dyn Strategy> = match self.strategy {
            StrategyKind::Sequential => Box::new(DirectSummation::new(n, dt)),
            StrategyKind::MultiThread => Box::new(DirectSummation::new(n, dt).multithreaded(self.workers())),
            #[cfg(feature = "rayon")]
            StrategyKind::ParallelMap => Box::new(DirectSummation::new(n, dt).rayon_iter()),
            StrategyKind::WorkerPool => Box::new(WorkerPool::new(n, dt).workers(self.workers())),
            StrategyKind::ScatterGather => Box::new(ScatterGather::with_shards(n, dt, self.shards)),
            StrategyKind::Distributed => {
                let cluster = if self.peers.is_empty() {
                    Cluster::local(self.shards)?
                } else {
                    let mut cluster = Cluster::new();
                    for peer in &self.peers {
                        cluster.join(peer)?;
                    }
                    cluster
                };
                Box::new(ScatterGather::distributed(cluster, n, dt))
            }
        };
        info!("using the {} strategy for {n} bodies", strategy.kind());

        Ok(strategy)
    }
}
