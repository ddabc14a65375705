//! Gravitational interaction of point masses in the plane, advanced tick by tick
//! by interchangeable concurrency strategies that all agree numerically.
//!
//! ```no_run
//! use nbody_strategies::{BodyBounds, Strategy, TickOutcome, WorkerPool};
//!
//! let mut strategy = WorkerPool::new(1000, 10_000.);
//! strategy.create_bodies(&BodyBounds::default())?;
//! if strategy.calculate_and_move()? == TickOutcome::Completed {
//!     println!("{:?}", strategy.bodies()[0]);
//! }
//! # Ok::<(), nbody_strategies::Error>(())
//! ```

pub mod body;
pub mod config;
pub mod direct_summation;
pub mod error;
pub mod force;
pub mod matrix;
pub mod scatter_gather;
pub mod strategy;
pub mod worker_pool;

pub use body::{Body, BodyBounds, BodyCreator, Position, UniformBodyCreator, Velocity};
pub use config::SimulationConfig;
pub use direct_summation::{DirectSummation, Execution};
pub use error::{Error, Result};
pub use force::{force_between, sum_forces, Force, G};
pub use matrix::{InteractionMatrix, SharedInteractionMatrix};
pub use scatter_gather::{Cluster, ClusterNode, LocalShards, NodeHandle, ScatterGather, Transport};
pub use strategy::{default_workers, InterruptHandle, Strategy, StrategyKind, TickOutcome};
pub use worker_pool::WorkerPool;
