//! Host-side particle state

use crate::error::SimulationError;
use crate::physics::math::{Scalar, Vector};

/// State of a single particle, used to build and inspect an ensemble
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Particle {
    pub position: Vector,
    pub velocity: Vector,
    pub charge: Scalar,
    pub mass: Scalar,
}

impl Particle {
    pub fn at_rest(position: Vector, charge: Scalar, mass: Scalar) -> Self {
        Self {
            position,
            velocity: Vector::ZERO,
            charge,
            mass,
        }
    }
}

/// Per-particle state for N particles, stored as parallel arrays.
///
/// Index `i` refers to the same particle in every array. The particle count is
/// derived from the `x` array; every other array must agree with it, which
/// [`ParticleEnsemble::validate`] checks before any device work.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleEnsemble {
    x: Vec<Scalar>,
    y: Vec<Scalar>,
    z: Vec<Scalar>,
    vx: Vec<Scalar>,
    vy: Vec<Scalar>,
    vz: Vec<Scalar>,
    q: Vec<Scalar>,
    m: Vec<Scalar>,
}

impl ParticleEnsemble {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            x: Vec::with_capacity(capacity),
            y: Vec::with_capacity(capacity),
            z: Vec::with_capacity(capacity),
            vx: Vec::with_capacity(capacity),
            vy: Vec::with_capacity(capacity),
            vz: Vec::with_capacity(capacity),
            q: Vec::with_capacity(capacity),
            m: Vec::with_capacity(capacity),
        }
    }

    /// Build an ensemble from complete columns.
    ///
    /// # Errors
    ///
    /// Returns [`SimulationError::DimensionMismatch`] naming the first column
    /// whose length differs from `x`.
    #[allow(clippy::too_many_arguments)]
    pub fn from_columns(
        x: Vec<Scalar>,
        y: Vec<Scalar>,
        z: Vec<Scalar>,
        vx: Vec<Scalar>,
        vy: Vec<Scalar>,
        vz: Vec<Scalar>,
        q: Vec<Scalar>,
        m: Vec<Scalar>,
    ) -> Result<Self, SimulationError> {
        let ensemble = Self {
            x,
            y,
            z,
            vx,
            vy,
            vz,
            q,
            m,
        };
        ensemble.validate()?;
        Ok(ensemble)
    }

    pub fn from_particles(particles: impl IntoIterator<Item = Particle>) -> Self {
        let mut ensemble = Self::new();
        ensemble.extend(particles);
        ensemble
    }

    /// Number of particles, derived from the array shape
    #[inline]
    pub fn count(&self) -> usize {
        self.x.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    /// Check that every array holds exactly [`count`](Self::count) entries.
    pub fn validate(&self) -> Result<usize, SimulationError> {
        let expected = self.count();
        for (array, found) in self.column_lengths() {
            if found != expected {
                return Err(SimulationError::DimensionMismatch {
                    array,
                    expected,
                    found,
                });
            }
        }
        Ok(expected)
    }

    fn column_lengths(&self) -> [(&'static str, usize); 7] {
        [
            ("y", self.y.len()),
            ("z", self.z.len()),
            ("vx", self.vx.len()),
            ("vy", self.vy.len()),
            ("vz", self.vz.len()),
            ("q", self.q.len()),
            ("m", self.m.len()),
        ]
    }

    pub fn push(&mut self, particle: Particle) {
        self.x.push(particle.position.x);
        self.y.push(particle.position.y);
        self.z.push(particle.position.z);
        self.vx.push(particle.velocity.x);
        self.vy.push(particle.velocity.y);
        self.vz.push(particle.velocity.z);
        self.q.push(particle.charge);
        self.m.push(particle.mass);
    }

    /// Resize every array to `count` particles.
    ///
    /// New particles sit at rest at the origin with zero charge and unit mass.
    pub fn resize(&mut self, count: usize) {
        for column in [
            &mut self.x,
            &mut self.y,
            &mut self.z,
            &mut self.vx,
            &mut self.vy,
            &mut self.vz,
            &mut self.q,
        ] {
            column.resize(count, 0.0);
        }
        self.m.resize(count, 1.0);
    }

    pub fn clear(&mut self) {
        self.resize(0);
    }

    pub fn particle(&self, index: usize) -> Option<Particle> {
        if index >= self.count() {
            return None;
        }
        Some(Particle {
            position: Vector::new(self.x[index], self.y[index], self.z[index]),
            velocity: Vector::new(self.vx[index], self.vy[index], self.vz[index]),
            charge: self.q[index],
            mass: self.m[index],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = Particle> + '_ {
        (0..self.count()).filter_map(|index| self.particle(index))
    }

    pub fn positions(&self) -> [&[Scalar]; 3] {
        [&self.x, &self.y, &self.z]
    }

    pub fn positions_mut(&mut self) -> [&mut [Scalar]; 3] {
        [&mut self.x, &mut self.y, &mut self.z]
    }

    pub fn velocities(&self) -> [&[Scalar]; 3] {
        [&self.vx, &self.vy, &self.vz]
    }

    pub fn velocities_mut(&mut self) -> [&mut [Scalar]; 3] {
        [&mut self.vx, &mut self.vy, &mut self.vz]
    }

    pub fn x(&self) -> &[Scalar] {
        &self.x
    }

    pub fn y(&self) -> &[Scalar] {
        &self.y
    }

    pub fn z(&self) -> &[Scalar] {
        &self.z
    }

    pub fn vx(&self) -> &[Scalar] {
        &self.vx
    }

    pub fn vy(&self) -> &[Scalar] {
        &self.vy
    }

    pub fn vz(&self) -> &[Scalar] {
        &self.vz
    }

    pub fn x_mut(&mut self) -> &mut [Scalar] {
        &mut self.x
    }

    pub fn y_mut(&mut self) -> &mut [Scalar] {
        &mut self.y
    }

    pub fn z_mut(&mut self) -> &mut [Scalar] {
        &mut self.z
    }

    pub fn vx_mut(&mut self) -> &mut [Scalar] {
        &mut self.vx
    }

    pub fn vy_mut(&mut self) -> &mut [Scalar] {
        &mut self.vy
    }

    pub fn vz_mut(&mut self) -> &mut [Scalar] {
        &mut self.vz
    }

    pub fn charges(&self) -> &[Scalar] {
        &self.q
    }

    pub fn charges_mut(&mut self) -> &mut [Scalar] {
        &mut self.q
    }

    pub fn masses(&self) -> &[Scalar] {
        &self.m
    }

    pub fn masses_mut(&mut self) -> &mut [Scalar] {
        &mut self.m
    }
}

impl Extend<Particle> for ParticleEnsemble {
    fn extend<I: IntoIterator<Item = Particle>>(&mut self, particles: I) {
        for particle in particles {
            self.push(particle);
        }
    }
}
