use nalgebra::Vector2;
use rand::{rngs::ThreadRng, Rng};
use rand_distr::{Distribution, Uniform};
use serde::{Deserialize, Serialize};

use super::Body;
use crate::error::{Error, Result};

/// Bounds used to draw random bodies.
///
/// Masses are drawn in `[mass_min, mass_max]`, positions in `[0, pos_x_max] x [0, pos_y_max]`
/// and every velocity component in `[speed_min, speed_max]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BodyBounds {
    pub mass_min: f64,
    pub mass_max: f64,
    pub pos_x_max: f64,
    pub pos_y_max: f64,
    pub speed_min: f64,
    pub speed_max: f64,
}

impl Default for BodyBounds {
    fn default() -> Self {
        Self {
            mass_min: 1e5,
            mass_max: 1e6,
            pos_x_max: 300.,
            pos_y_max: 300.,
            speed_min: -1e-6,
            speed_max: 1e-6,
        }
    }
}

impl BodyBounds {
    pub fn validate(&self) -> Result<()> {
        let fields = [
            self.mass_min,
            self.mass_max,
            self.pos_x_max,
            self.pos_y_max,
            self.speed_min,
            self.speed_max,
        ];
        if fields.iter().any(|f| !f.is_finite()) {
            return Err(Error::InvalidBounds("all bounds must be finite".into()));
        }
        if self.mass_min <= 0. || self.mass_min > self.mass_max {
            return Err(Error::InvalidBounds(format!(
                "mass range [{}, {}] must be positive and ordered",
                self.mass_min, self.mass_max
            )));
        }
        if self.pos_x_max < 0. || self.pos_y_max < 0. {
            return Err(Error::InvalidBounds("position bounds must not be negative".into()));
        }
        if self.speed_min > self.speed_max {
            return Err(Error::InvalidBounds(format!(
                "speed range [{}, {}] is empty",
                self.speed_min, self.speed_max
            )));
        }
        Ok(())
    }
}

pub trait BodyCreator {
    fn create_body(&mut self) -> Body;

    fn create_bodies(&mut self, n: usize) -> Vec<Body> {
        (0..n).map(|_| self.create_body()).collect()
    }
}

/// Draws every quantity from an independent uniform distribution.
pub struct UniformBodyCreator<R: Rng> {
    rng: R,
    mass_distr: Uniform<f64>,
    position_x_distr: Uniform<f64>,
    position_y_distr: Uniform<f64>,
    velocity_distr: Uniform<f64>,
}

impl UniformBodyCreator<ThreadRng> {
    pub fn new(bounds: &BodyBounds) -> Result<Self> {
        Self::rng(bounds, rand::thread_rng())
    }
}

impl<R: Rng> UniformBodyCreator<R> {
    /// Use a caller-provided generator, e.g. a seeded one in tests.
    pub fn rng(bounds: &BodyBounds, rng: R) -> Result<Self> {
        bounds.validate()?;

        Ok(Self {
            rng,
            mass_distr: Uniform::new_inclusive(bounds.mass_min, bounds.mass_max),
            position_x_distr: Uniform::new_inclusive(0., bounds.pos_x_max),
            position_y_distr: Uniform::new_inclusive(0., bounds.pos_y_max),
            velocity_distr: Uniform::new_inclusive(bounds.speed_min, bounds.speed_max),
        })
    }
}

impl<R: Rng> BodyCreator for UniformBodyCreator<R> {
    fn create_body(&mut self) -> Body {
        let rng = &mut self.rng;

        let mass = self.mass_distr.sample(rng);
        let position = Vector2::new(
            self.position_x_distr.sample(rng),
            self.position_y_distr.sample(rng),
        );
        let velocity = Vector2::new(
            self.velocity_distr.sample(rng),
            self.velocity_distr.sample(rng),
        );

        Body::new(mass, position, velocity)
    }
}

#[cfg(test)]
mod tests {
    use rand::{rngs::StdRng, SeedableRng};

    use super::*;

    #[test]
    fn bodies_within_bounds() {
        let bounds = BodyBounds::default();
        let mut creator = UniformBodyCreator::rng(&bounds, StdRng::seed_from_u64(0)).unwrap();
        let bodies = creator.create_bodies(500);

        assert_eq!(bodies.len(), 500);
        for b in &bodies {
            assert!(b.mass >= bounds.mass_min && b.mass <= bounds.mass_max);
            assert!(b.position.x >= 0. && b.position.x <= bounds.pos_x_max);
            assert!(b.position.y >= 0. && b.position.y <= bounds.pos_y_max);
            for v in b.velocity.iter() {
                assert!(*v >= bounds.speed_min && *v <= bounds.speed_max);
            }
        }
    }

    #[test]
    fn degenerate_ranges() {
        let bounds = BodyBounds {
            mass_min: 5.,
            mass_max: 5.,
            pos_x_max: 0.,
            pos_y_max: 0.,
            speed_min: 1.,
            speed_max: 1.,
        };
        let body = UniformBodyCreator::new(&bounds).unwrap().create_body();
        assert_eq!(body, Body::new(5., Vector2::zeros(), Vector2::new(1., 1.)));
    }

    #[test]
    fn rejects_invalid_bounds() {
        let negative_mass = BodyBounds {
            mass_min: -1.,
            ..Default::default()
        };
        assert!(matches!(
            UniformBodyCreator::new(&negative_mass),
            Err(Error::InvalidBounds(_))
        ));

        let swapped_speed = BodyBounds {
            speed_min: 1.,
            speed_max: -1.,
            ..Default::default()
        };
        assert!(swapped_speed.validate().is_err());

        let infinite = BodyBounds {
            pos_x_max: f64::INFINITY,
            ..Default::default()
        };
        assert!(infinite.validate().is_err());
    }
}
