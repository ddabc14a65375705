use approx::assert_abs_diff_eq;
use nbody_strategies::{
    force_between, Body, BodyBounds, BodyCreator, Cluster, ClusterNode, DirectSummation, Force,
    InteractionMatrix, ScatterGather, SimulationConfig, Strategy, StrategyKind, TickOutcome,
    Transport, UniformBodyCreator, WorkerPool,
};
use rand::{rngs::StdRng, SeedableRng};

const N_BODIES: usize = 1000;
const DELTA_TIME: f64 = 10_000.;
const EPS: f64 = 1e-11;

fn random_bodies(n: usize, seed: u64) -> Vec<Body> {
    UniformBodyCreator::rng(&BodyBounds::default(), StdRng::seed_from_u64(seed))
        .unwrap()
        .create_bodies(n)
}

fn run(strategy: &mut dyn Strategy, bodies: &[Body], ticks: usize) -> Vec<Body> {
    strategy.set_bodies(bodies.to_vec()).unwrap();
    for _ in 0..ticks {
        assert_eq!(strategy.calculate_and_move().unwrap(), TickOutcome::Completed);
    }
    strategy.bodies().to_vec()
}

fn assert_close(left: &[Body], right: &[Body]) {
    assert_eq!(left.len(), right.len());
    for (l, r) in left.iter().zip(right) {
        assert_abs_diff_eq!(l.mass, r.mass, epsilon = 1e-13);
        assert_abs_diff_eq!(l.position.x, r.position.x, epsilon = EPS);
        assert_abs_diff_eq!(l.position.y, r.position.y, epsilon = EPS);
        assert_abs_diff_eq!(l.velocity.x, r.velocity.x, epsilon = EPS);
        assert_abs_diff_eq!(l.velocity.y, r.velocity.y, epsilon = EPS);
    }
}

#[test]
fn worker_pool_matches_direct_summation() {
    let bodies = random_bodies(N_BODIES, 0);

    let pool = run(&mut WorkerPool::new(N_BODIES, DELTA_TIME), &bodies, 1);
    let direct = run(&mut DirectSummation::new(N_BODIES, DELTA_TIME), &bodies, 1);
    assert_close(&pool, &direct);
    // both reduce every body's forces in the same order
    assert_eq!(pool, direct);

    let multi = run(
        &mut DirectSummation::new(N_BODIES, DELTA_TIME).multithreaded(6),
        &bodies,
        1,
    );
    assert_close(&multi, &direct);
}

#[test]
fn worker_pool_matches_scatter_gather() {
    let bodies = random_bodies(N_BODIES, 1);

    let pool = run(&mut WorkerPool::new(N_BODIES, DELTA_TIME), &bodies, 3);
    let scatter = run(&mut ScatterGather::new(N_BODIES, DELTA_TIME), &bodies, 3);
    assert_close(&pool, &scatter);
}

#[test]
fn cluster_matches_in_process() {
    const N: usize = 150;
    let bodies = random_bodies(N, 2);

    let local = run(&mut ScatterGather::with_shards(N, DELTA_TIME, 3), &bodies, 2);
    let mut distributed = ScatterGather::distributed(Cluster::local(3).unwrap(), N, DELTA_TIME);
    assert_eq!(distributed.kind(), StrategyKind::Distributed);
    let remote = run(&mut distributed, &bodies, 2);

    assert_eq!(local, remote);
}

#[test]
fn cluster_membership_between_ticks() {
    const N: usize = 64;
    let bodies = random_bodies(N, 3);
    let nodes: Vec<_> = (0..3)
        .map(|_| ClusterNode::bind("127.0.0.1:0").unwrap().spawn().unwrap())
        .collect();

    let mut cluster = Cluster::new();
    cluster.join(nodes[0].addr()).unwrap();
    cluster.join(nodes[1].addr()).unwrap();
    let mut distributed = ScatterGather::distributed(cluster, N, DELTA_TIME);
    distributed.set_bodies(bodies.clone()).unwrap();
    assert_eq!(distributed.calculate_and_move().unwrap(), TickOutcome::Completed);

    distributed.transport_mut().join(nodes[2].addr()).unwrap();
    distributed.transport_mut().leave(0).unwrap();
    assert_eq!(distributed.transport().shards(), 2);
    assert_eq!(distributed.calculate_and_move().unwrap(), TickOutcome::Completed);

    let reference = run(&mut ScatterGather::with_shards(N, DELTA_TIME, 1), &bodies, 2);
    assert_eq!(distributed.bodies(), reference.as_slice());
}

#[test]
fn forces_nearly_cancel() {
    let bodies = random_bodies(N_BODIES, 4);
    let mut matrix: InteractionMatrix = InteractionMatrix::new(N_BODIES);
    for i in 0..N_BODIES {
        for j in i + 1..N_BODIES {
            matrix.set(i, j, force_between(Some(&bodies[i]), Some(&bodies[j])));
        }
    }

    let total: Force = (0..N_BODIES).map(|i| matrix.total_force(i)).sum();
    assert!(total.magnitude() < 1e-9, "total force {total:?}");
}

#[test]
fn interrupt_before_tick_keeps_bodies() {
    let bodies = random_bodies(40, 5);

    for &kind in StrategyKind::ALL {
        let config = SimulationConfig {
            strategy: kind,
            bodies: 40,
            workers: Some(3),
            shards: 4,
            ..Default::default()
        };
        let mut strategy = config.build_strategy().unwrap();
        strategy.set_bodies(bodies.clone()).unwrap();

        let handle = strategy.interrupt_handle();
        handle.interrupt();
        assert_eq!(
            strategy.calculate_and_move().unwrap(),
            TickOutcome::Interrupted,
            "{kind}"
        );
        assert_eq!(strategy.bodies(), bodies.as_slice(), "{kind}");
        assert!(!handle.is_requested(), "{kind}");
    }
}

#[test]
fn interrupt_from_another_thread() {
    let bodies = random_bodies(N_BODIES, 6);
    let mut pool = WorkerPool::new(N_BODIES, DELTA_TIME).workers(2);
    pool.set_bodies(bodies.clone()).unwrap();

    let handle = pool.interrupt_handle();
    let outcome = std::thread::scope(|s| {
        let tick = s.spawn(|| pool.calculate_and_move().unwrap());
        handle.interrupt();
        tick.join().unwrap()
    });

    // the request may land after the tick finished, then it cancels the next one
    if outcome == TickOutcome::Completed {
        assert_eq!(pool.calculate_and_move().unwrap(), TickOutcome::Interrupted);
        assert_ne!(pool.bodies(), bodies.as_slice());
    } else {
        assert_eq!(pool.bodies(), bodies.as_slice());
    }
}
