//! Compact storage for pairwise forces.
//!
//! Only the strict upper triangle (`i < j`) is stored, column after column:
//!
//! ```text
//!        j=1  j=2  j=3  j=4
//! i=0     0    1    3    6
//! i=1          2    4    7
//! i=2               5    8
//! i=3                    9
//! ```
//!
//! The slot of `(i, j)` is `T(j - 1) + i` with `T(n) = n (n + 1) / 2`.
//! A row-restricted matrix keeps only the rows `i < R`; columns past `R` then hold
//! `R` cells each, so the first slot of column `j` is `T(j - 1) - T(j - 1 - R)`.
//! For `R = N` both formulas agree.
//!
//! Cell `(i, j)` holds the force on body `i` caused by body `j`. The force on `j`
//! caused by `i` is its negation and is never stored.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::force::Force;

/// Sum of the first `n` positive integers.
#[inline(always)]
fn triangular(n: usize) -> usize {
    (n * n + n) / 2
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InteractionMatrix<C = Force> {
    rows: usize,
    cols: usize,
    cells: Vec<C>,
}

impl<C: Default> InteractionMatrix<C> {
    /// Storage for every unordered pair among `n` bodies.
    #[must_use]
    pub fn new(n: usize) -> Self {
        Self::with_rows(n, n)
    }

    /// Storage for the pairs `(i, j)` with `i < rows` and `j < total_cols`.
    #[must_use]
    pub fn with_rows(rows: usize, total_cols: usize) -> Self {
        let rows = rows.min(total_cols);
        let mut matrix = Self {
            rows,
            cols: total_cols,
            cells: Vec::new(),
        };
        let len = matrix.column_start(total_cols);
        matrix.cells.resize_with(len, C::default);
        matrix
    }
}

impl<C> InteractionMatrix<C> {
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Number of stored cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Index of the first cell of column `col`.
    fn column_start(&self, col: usize) -> usize {
        let Some(prec) = col.checked_sub(1) else {
            return 0;
        };
        let owned = triangular(prec);
        match prec.checked_sub(self.rows) {
            Some(delta) if delta > 0 => owned - triangular(delta),
            _ => owned,
        }
    }

    /// Storage slot of `(i, j)`, `None` outside of the stored triangle.
    #[inline]
    fn slot(&self, i: usize, j: usize) -> Option<usize> {
        (i < j && i < self.rows && j < self.cols).then(|| self.column_start(j) + i)
    }
}

impl InteractionMatrix<Force> {
    /// Store the force of the pair `(i, j)`. Invalid pairs are ignored.
    pub fn set(&mut self, i: usize, j: usize, force: Force) {
        if let Some(slot) = self.slot(i, j) {
            self.cells[slot] = force;
        }
    }

    /// The force of the pair `(i, j)`, or [`Force::null`] for invalid pairs.
    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> Force {
        self.slot(i, j)
            .map_or_else(Force::null, |slot| self.cells[slot])
    }

    /// A row-restricted copy holding the first `rows` rows.
    #[must_use]
    pub fn restrict_rows(&self, rows: usize) -> Self {
        let mut restricted = Self::with_rows(rows, self.cols);
        for i in 0..restricted.rows {
            for j in i + 1..self.cols {
                restricted.set(i, j, self.get(i, j));
            }
        }
        restricted
    }

    /// Total force acting on body `i`: its own row plus the negated column.
    ///
    /// Both loops visit their contributions in index order, exactly `cols - 1` of them.
    #[must_use]
    pub fn total_force(&self, i: usize) -> Force {
        let row: Force = (i + 1..self.cols).map(|j| self.get(i, j)).sum();
        let column: Force = (0..i).map(|k| self.get(k, i).reversed()).sum();
        row + column
    }
}

/// A force cell that can be written through a shared reference.
///
/// Every cell is written at most once per tick by the worker owning its row,
/// readers synchronize through the lock that publishes row completion.
#[derive(Debug, Default)]
pub struct AtomicForce {
    x: AtomicU64,
    y: AtomicU64,
}

impl AtomicForce {
    fn store(&self, force: Force) {
        self.x.store(force.x().to_bits(), Ordering::Relaxed);
        self.y.store(force.y().to_bits(), Ordering::Relaxed);
    }

    fn load(&self) -> Force {
        Force::new(
            f64::from_bits(self.x.load(Ordering::Relaxed)),
            f64::from_bits(self.y.load(Ordering::Relaxed)),
        )
    }
}

/// Interaction matrix shared between the workers of one tick.
pub type SharedInteractionMatrix = InteractionMatrix<AtomicForce>;

impl InteractionMatrix<AtomicForce> {
    pub fn set(&self, i: usize, j: usize, force: Force) {
        if let Some(slot) = self.slot(i, j) {
            self.cells[slot].store(force);
        }
    }

    #[must_use]
    pub fn get(&self, i: usize, j: usize) -> Force {
        self.slot(i, j)
            .map_or_else(Force::null, |slot| self.cells[slot].load())
    }

    #[must_use]
    pub fn total_force(&self, i: usize) -> Force {
        let row: Force = (i + 1..self.cols).map(|j| self.get(i, j)).sum();
        let column: Force = (0..i).map(|k| self.get(k, i).reversed()).sum();
        row + column
    }

    /// Freeze the shared cells into a plain matrix.
    #[must_use]
    pub fn into_plain(self) -> InteractionMatrix<Force> {
        InteractionMatrix {
            rows: self.rows,
            cols: self.cols,
            cells: self.cells.into_iter().map(|c| c.load()).collect(),
        }
    }
}
