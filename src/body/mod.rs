mod creator;

pub use creator::*;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::force::Force;

/// A position in the plane, in metres.
pub type Position = Vector2<f64>;

/// A velocity in the plane, in metres per second.
pub type Velocity = Vector2<f64>;

/// Distances are floored at this value so that coinciding bodies never divide by zero.
pub const MIN_DISTANCE: f64 = 1e-13;

/// A point mass.
///
/// The mass never changes, position and velocity are advanced once per tick by
/// [`Body::apply`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Body {
    pub mass: f64,
    pub position: Position,
    pub velocity: Velocity,
}

impl Body {
    #[must_use]
    pub fn new(mass: f64, position: Position, velocity: Velocity) -> Self {
        Self {
            mass,
            position,
            velocity,
        }
    }

    /// Apply the total force acting on this body for `delta_time` seconds.
    ///
    /// The position moves by the pre-update velocity plus half the velocity change,
    /// then the velocity change is added.
    pub fn apply(&mut self, force: Force, delta_time: f64) -> &mut Self {
        let acceleration = force.0 / self.mass;
        let delta_velocity = acceleration * delta_time;

        self.position += (delta_velocity / 2. + self.velocity) * delta_time;
        self.velocity += delta_velocity;

        self
    }
}

/// Distance between two positions, never below [`MIN_DISTANCE`].
#[must_use]
pub fn distance(pi: &Position, pj: &Position) -> f64 {
    ((pj.x - pi.x).powi(2) + (pj.y - pi.y).powi(2))
        .sqrt()
        .max(MIN_DISTANCE)
}

/// The vector pointing from `pi` to `pj`.
#[must_use]
pub fn difference(pi: &Position, pj: &Position) -> Position {
    pj - pi
}

/// Split `n` bodies into `parts` contiguous ranges.
///
/// Every range has `n / parts` bodies, the last one also takes the remainder.
pub(crate) fn partition(n: usize, parts: usize) -> Vec<std::ops::Range<usize>> {
    let parts = parts.max(1);
    let per_part = n / parts;

    (0..parts)
        .map(|i| {
            let from = i * per_part;
            let to = if i == parts - 1 { n } else { from + per_part };
            from..to
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;

    use super::*;
    use crate::force::{force_between, sum_forces};

    const EPS: f64 = 1e-13;

    fn three_bodies() -> [Body; 3] {
        [
            Body::new(1e5, Vector2::new(2., 2.), Vector2::new(10., 1.)),
            Body::new(2e5, Vector2::new(6., 5.), Vector2::new(20., 2.)),
            Body::new(3e5, Vector2::new(6., 3.), Vector2::new(30., 3.)),
        ]
    }

    #[test]
    fn positions() {
        let [bi, bj, bk] = three_bodies();
        let (pi, pj, pk) = (bi.position, bj.position, bk.position);

        assert_abs_diff_eq!(distance(&pi, &pj), 5., epsilon = EPS);
        assert_abs_diff_eq!(distance(&pj, &pi), 5., epsilon = EPS);
        assert_abs_diff_eq!(distance(&pi, &pk), 4.12310562561766, epsilon = EPS);
        assert_abs_diff_eq!(distance(&pj, &pk), 2., epsilon = EPS);
        assert_eq!(distance(&pi, &pi), MIN_DISTANCE);

        assert_eq!(difference(&pi, &pj), Vector2::new(4., 3.));
        assert_eq!(difference(&pj, &pi), Vector2::new(-4., -3.));
        assert_eq!(difference(&pk, &pj), Vector2::new(0., 2.));
    }

    #[test]
    fn apply_single_force() {
        let [mut bi, mut bj, mut bk] = three_bodies();
        let force = Force::new(-3., 2.);

        bi.apply(force, 1.);
        assert_abs_diff_eq!(bi.position.x, 11.999985, epsilon = EPS);
        assert_abs_diff_eq!(bi.position.y, 3.00001, epsilon = EPS);
        assert_abs_diff_eq!(bi.velocity.x, 9.99997, epsilon = EPS);
        assert_abs_diff_eq!(bi.velocity.y, 1.00002, epsilon = EPS);

        bj.apply(force, 4.);
        assert_abs_diff_eq!(bj.position.x, 85.99988, epsilon = EPS);
        assert_abs_diff_eq!(bj.velocity.y, 2.00004, epsilon = EPS);

        bk.apply(force, 7.5);
        assert_abs_diff_eq!(bk.position.x, 230.99971875, epsilon = EPS);
        assert_abs_diff_eq!(bk.position.y, 25.5001875, epsilon = EPS);
        assert_abs_diff_eq!(bk.velocity.x, 29.999925, epsilon = EPS);
        assert_eq!(bk.mass, 3e5);
    }

    #[test]
    fn apply_total_forces() {
        let bodies = three_bodies();
        let totals: Vec<Force> = bodies
            .iter()
            .map(|b| {
                let forces: Vec<Force> = bodies
                    .iter()
                    .filter(|other| *other != b)
                    .map(|other| force_between(Some(b), Some(other)))
                    .collect();
                sum_forces(&forces)
            })
            .collect();

        let mut moved = bodies;
        for (body, total) in moved.iter_mut().zip(totals) {
            body.apply(total, 3.);
        }

        let [bi, bj, bk] = moved;
        assert_abs_diff_eq!(bi.position.x, 32.00000706389490, epsilon = EPS);
        assert_abs_diff_eq!(bi.position.y, 5.00000272704123, epsilon = EPS);
        assert_abs_diff_eq!(bi.velocity.x, 10.00000470926320, epsilon = EPS);
        assert_abs_diff_eq!(bi.velocity.y, 1.00000181802749, epsilon = EPS);

        assert_abs_diff_eq!(bj.position.x, 65.99999903893250, epsilon = EPS);
        assert_abs_diff_eq!(bj.position.y, 10.99997675417940, epsilon = EPS);
        assert_abs_diff_eq!(bj.velocity.x, 19.99999935928830, epsilon = EPS);
        assert_abs_diff_eq!(bj.velocity.y, 1.99998450278624, epsilon = EPS);

        assert_abs_diff_eq!(bk.position.x, 95.99999828608010, epsilon = EPS);
        assert_abs_diff_eq!(bk.position.y, 12.00001458820000, epsilon = EPS);
        assert_abs_diff_eq!(bk.velocity.x, 29.99999885738670, epsilon = EPS);
        assert_abs_diff_eq!(bk.velocity.y, 3.00000972546668, epsilon = EPS);
    }

    #[test]
    fn partitions() {
        assert_eq!(partition(10, 3), vec![0..3, 3..6, 6..10]);
        assert_eq!(partition(2, 4), vec![0..0, 0..0, 0..0, 0..2]);
        assert_eq!(partition(7, 1), vec![0..7]);
        assert_eq!(partition(5, 0), vec![0..5]);
    }
}
