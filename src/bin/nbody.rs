use std::{
    net::SocketAddr,
    path::PathBuf,
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError},
        Arc, Mutex, MutexGuard, PoisonError,
    },
    thread,
    time::{Duration, Instant},
};

use clap::{Parser, Subcommand};
use log::{debug, info, warn};
use nbody_strategies::{
    ClusterNode, InterruptHandle, Result, SimulationConfig, Strategy, StrategyKind, TickOutcome,
};

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a simulation
    Run {
        /// YAML configuration, defaults are used if absent
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        strategy: Option<StrategyKind>,
        #[arg(short, long)]
        ticks: Option<usize>,
    },
    /// Host a shard for distributed runs
    Node {
        #[arg(short, long, default_value = "127.0.0.1:7878")]
        listen: SocketAddr,
    },
}

enum Watch {
    Started(usize),
    Finished,
}

/// The tick that is currently running, if any.
type Running = Arc<Mutex<Option<usize>>>;

fn lock(running: &Running) -> MutexGuard<'_, Option<usize>> {
    running.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Interrupt every tick that runs longer than `cadence`.
fn watchdog(handle: InterruptHandle, running: Running, cadence: Duration, events: Receiver<Watch>) {
    while let Ok(Watch::Started(tick)) = events.recv() {
        match events.recv_timeout(cadence) {
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {
                // a tick that ended in the meantime must not leave a request behind
                let current = lock(&running);
                if *current == Some(tick) {
                    warn!("tick {tick} overran {cadence:?}, interrupting");
                    handle.interrupt();
                }
                drop(current);
                if events.recv().is_err() {
                    return;
                }
            }
            Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// Mark `tick` as ended and drop an interrupt that arrived too late to cancel it.
fn end_tick(running: &Running, handle: &InterruptHandle, tick: usize) {
    let mut current = lock(running);
    *current = None;
    if handle.take() {
        debug!("dropped an interrupt that arrived after tick {tick} ended");
    }
}

fn run(mut config: SimulationConfig) -> Result<()> {
    let mut strategy = config.build_strategy()?;
    strategy.create_bodies(&config.bounds)?;

    let cadence = config.cadence();
    let handle = strategy.interrupt_handle();
    let running = Running::default();
    let (tx, rx) = mpsc::channel();
    let watchdog = (!cadence.is_zero()).then(|| {
        let (handle, running) = (handle.clone(), running.clone());
        thread::spawn(move || watchdog(handle, running, cadence, rx))
    });

    if config.ticks == 0 {
        config.ticks = usize::MAX;
    }
    let (mut completed, mut interrupted) = (0, 0);
    for tick in 0..config.ticks {
        let start = Instant::now();
        *lock(&running) = Some(tick);
        let _ = tx.send(Watch::Started(tick));
        let outcome = strategy.calculate_and_move();
        end_tick(&running, &handle, tick);
        let _ = tx.send(Watch::Finished);
        let outcome = outcome?;

        let elapsed = start.elapsed();
        match outcome {
            TickOutcome::Completed => {
                completed += 1;
                info!("tick {tick} took {elapsed:?}");
            }
            TickOutcome::Interrupted => {
                interrupted += 1;
                info!("tick {tick} interrupted after {elapsed:?}");
            }
        }
        if let Some(rest) = cadence.checked_sub(elapsed) {
            thread::sleep(rest);
        }
    }

    drop(tx);
    if let Some(watchdog) = watchdog {
        let _ = watchdog.join();
    }
    info!(
        "{} finished: {completed} ticks completed, {interrupted} interrupted",
        strategy.kind()
    );
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match Args::parse().command {
        Command::Run {
            config,
            strategy,
            ticks,
        } => {
            let mut config = match config {
                Some(path) => SimulationConfig::from_path(path)?,
                None => SimulationConfig::default(),
            };
            if let Some(strategy) = strategy {
                config.strategy = strategy;
            }
            if let Some(ticks) = ticks {
                config.ticks = ticks;
            }
            run(config)
        }
        Command::Node { listen } => {
            let node = ClusterNode::bind(listen)?;
            info!("serving a shard on {}", node.local_addr()?);
            node.serve();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CADENCE: Duration = Duration::from_millis(5);
    const OVERRUN: Duration = Duration::from_millis(100);

    fn spawn_watchdog() -> (InterruptHandle, Running, mpsc::Sender<Watch>, thread::JoinHandle<()>) {
        let handle = InterruptHandle::default();
        let running = Running::default();
        let (tx, rx) = mpsc::channel();
        let watcher = {
            let (handle, running) = (handle.clone(), running.clone());
            thread::spawn(move || watchdog(handle, running, CADENCE, rx))
        };
        (handle, running, tx, watcher)
    }

    #[test]
    fn interrupts_an_overrunning_tick() {
        let (handle, running, tx, watcher) = spawn_watchdog();

        *lock(&running) = Some(0);
        tx.send(Watch::Started(0)).unwrap();
        thread::sleep(OVERRUN);
        assert!(handle.is_requested());

        end_tick(&running, &handle, 0);
        tx.send(Watch::Finished).unwrap();
        drop(tx);
        watcher.join().unwrap();
        assert!(!handle.is_requested());
    }

    #[test]
    fn late_timeout_leaves_no_request() {
        let (handle, running, tx, watcher) = spawn_watchdog();

        // the tick ended before the watchdog heard about it
        *lock(&running) = Some(3);
        tx.send(Watch::Started(3)).unwrap();
        end_tick(&running, &handle, 3);
        thread::sleep(OVERRUN);
        tx.send(Watch::Finished).unwrap();

        drop(tx);
        watcher.join().unwrap();
        assert!(!handle.is_requested());
    }
}
