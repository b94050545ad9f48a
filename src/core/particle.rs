use crate::error::{Error, Result};

/// Fixed spatial dimension of the simulator output (2D).
pub const DIM: usize = 2;

/// Number of values stored per particle row: x, y, vx, vy.
pub const STATE_WIDTH: usize = 2 * DIM;

/// Recorded kinematic state of one particle at one stored instant.
///
/// Fields:
/// - `r`: position vector [x, y]
/// - `v`: velocity vector [vx, vy]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParticleState {
    /// Position (x, y).
    pub r: [f64; DIM],
    /// Velocity (vx, vy).
    pub v: [f64; DIM],
}

impl ParticleState {
    /// Create a new state after validating that every component is finite.
    ///
    /// Errors:
    /// - `Error::InvalidParam` if any component is NaN/inf.
    pub fn new(r: [f64; DIM], v: [f64; DIM]) -> Result<Self> {
        if !r.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParam("position must be finite".into()));
        }
        if !v.iter().all(|x| x.is_finite()) {
            return Err(Error::InvalidParam("velocity must be finite".into()));
        }
        Ok(Self { r, v })
    }

    /// Build a state from a stored `[x, y, vx, vy]` row. Rows are validated when parsed.
    #[inline]
    pub(crate) fn from_row(row: &[f64]) -> Self {
        Self {
            r: [row[0], row[1]],
            v: [row[2], row[3]],
        }
    }

    /// Returns the kinetic energy 1/2 m |v|^2 for a particle of the given mass.
    #[inline]
    pub fn kinetic_energy(&self, mass: f64) -> f64 {
        0.5 * mass * dot(&self.v, &self.v)
    }

    /// Euclidean distance from `point` to this particle's center.
    #[inline]
    pub fn distance_to(&self, point: [f64; DIM]) -> f64 {
        norm(&sub(&self.r, &point))
    }

    /// Squared displacement of this state's position relative to `origin`.
    #[inline]
    pub fn squared_displacement(&self, origin: [f64; DIM]) -> f64 {
        let d = sub(&self.r, &origin);
        dot(&d, &d)
    }
}

// ============ Vector helpers ============

#[inline]
pub fn dot(a: &[f64; DIM], b: &[f64; DIM]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn norm(a: &[f64; DIM]) -> f64 {
    dot(a, a).sqrt()
}

#[inline]
pub fn sub(a: &[f64; DIM], b: &[f64; DIM]) -> [f64; DIM] {
    [a[0] - b[0], a[1] - b[1]]
}

/// Unit vector from `from` toward `to`, or `None` when the points coincide.
#[inline]
pub fn unit_from(from: &[f64; DIM], to: &[f64; DIM]) -> Option<[f64; DIM]> {
    let d = sub(to, from);
    let len = norm(&d);
    if len <= f64::EPSILON {
        return None;
    }
    Some([d[0] / len, d[1] / len])
}
