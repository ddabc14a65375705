use std::{
    iter::Sum,
    ops::{Add, AddAssign, Neg},
};

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::body::{self, Body};

/// Gravitational constant in N·m²/kg².
pub const G: f64 = 6.67408 * 1e-11;

/// A force acting on a body, in newton.
///
/// The all-zero value doubles as the "no interaction" sentinel, see [`Force::null`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Force(pub Vector2<f64>);

impl Force {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self(Vector2::new(x, y))
    }

    /// The sentinel returned for self pairs, missing bodies and invalid matrix indices.
    #[must_use]
    pub fn null() -> Self {
        Self(Vector2::zeros())
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.x == 0. && self.0.y == 0.
    }

    #[must_use]
    pub fn x(&self) -> f64 {
        self.0.x
    }

    #[must_use]
    pub fn y(&self) -> f64 {
        self.0.y
    }

    #[must_use]
    pub fn magnitude(&self) -> f64 {
        self.0.norm()
    }

    /// The same force seen from the other body of the pair.
    #[must_use]
    pub fn reversed(self) -> Self {
        -self
    }
}

impl Neg for Force {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl Add for Force {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for Force {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sum for Force {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Force::null(), |acc, f| acc + f)
    }
}

impl<'a> Sum<&'a Force> for Force {
    fn sum<I: Iterator<Item = &'a Self>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

/// Newton's law of universal gravitation: the force `bi` feels towards `bj`.
///
/// Returns [`Force::null`] if a body is missing or both sit closer than
/// [`body::MIN_DISTANCE`].
#[must_use]
pub fn force_between(bi: Option<&Body>, bj: Option<&Body>) -> Force {
    let (Some(bi), Some(bj)) = (bi, bj) else {
        return Force::null();
    };

    let distance = body::distance(&bi.position, &bj.position);
    if distance == body::MIN_DISTANCE {
        return Force::null();
    }

    let direction = body::difference(&bi.position, &bj.position);
    let magnitude = bi.mass * bj.mass * G / distance.powi(2);
    let lambda = magnitude / direction.norm();

    Force(direction * lambda)
}

/// Order-independent sum of forces, [`Force::null`] for no input.
#[must_use]
pub fn sum_forces<'a>(forces: impl IntoIterator<Item = &'a Force>) -> Force {
    forces.into_iter().sum()
}
