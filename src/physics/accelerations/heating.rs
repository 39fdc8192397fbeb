//! Recoil heating from photon scattering

use super::{Acceleration, EvaluationPoint, check_coefficient};
use crate::error::SimulationError;
use crate::physics::device::{ComputeContext, EnsembleState};
use crate::physics::math::{Scalar, Vector, random_unit_vector};
use rand_chacha::{ChaCha8Rng, rand_core::SeedableRng};
use rand_distr::{Distribution, Poisson};

/// Random recoil kicks from scattered photons.
///
/// During each half kick a particle scatters a Poisson-distributed number of
/// photons with mean `scatter_rate * dt / 2`; every event adds a velocity of
/// magnitude `recoil_velocity` in a uniformly random direction. The velocity
/// change is reported as the acceleration that produces it over the half kick.
///
/// Random numbers come from a ChaCha8 stream keyed by the seed, the evaluation
/// time, the particle index and the kick phase. Re-running from the same state
/// therefore reproduces the same kicks regardless of thread count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeatingAcceleration {
    recoil_velocity: Scalar,
    scatter_rate: Scalar,
    seed: u64,
}

impl HeatingAcceleration {
    pub fn new(recoil_velocity: Scalar, scatter_rate: Scalar, seed: u64) -> Self {
        Self {
            recoil_velocity,
            scatter_rate,
            seed,
        }
    }

    pub fn recoil_velocity(&self) -> Scalar {
        self.recoil_velocity
    }

    pub fn scatter_rate(&self) -> Scalar {
        self.scatter_rate
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Event-count distribution for one half kick of `dt`, `None` when no
    /// events can occur
    fn events_per_half_kick(
        &self,
        dt: Scalar,
    ) -> Result<Option<Poisson<Scalar>>, SimulationError> {
        let mean_events = self.scatter_rate * 0.5 * dt;
        if mean_events == 0.0 || dt <= 0.0 {
            return Ok(None);
        }
        Poisson::new(mean_events).map(Some).map_err(|e| {
            SimulationError::incompatible(
                self.name(),
                format!("cannot sample {mean_events} scattering events per half kick: {e}"),
            )
        })
    }

    fn stream_rng(&self, point: &EvaluationPoint<'_>, index: usize) -> ChaCha8Rng {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed ^ point.time.to_bits());
        rng.set_stream(2 * index as u64 + point.phase.index());
        rng
    }
}

impl Acceleration for HeatingAcceleration {
    fn name(&self) -> &'static str {
        "heating"
    }

    fn check(
        &self,
        _state: &EnsembleState<'_>,
        point: &EvaluationPoint<'_>,
    ) -> Result<(), SimulationError> {
        check_coefficient(self.name(), "recoil velocity", self.recoil_velocity)?;
        check_coefficient(self.name(), "scatter rate", self.scatter_rate)?;
        self.events_per_half_kick(point.dt).map(|_| ())
    }

    fn accumulate(
        &self,
        context: &ComputeContext,
        _state: &EnsembleState<'_>,
        point: &EvaluationPoint<'_>,
        output: &mut [Vector],
    ) -> Result<(), SimulationError> {
        let Some(events) = self.events_per_half_kick(point.dt)? else {
            return Ok(());
        };
        let half_dt = 0.5 * point.dt;

        context.run_chunks(output, |offset, chunk| {
            for (local, acceleration) in chunk.iter_mut().enumerate() {
                let mut rng = self.stream_rng(point, offset + local);
                let count = events.sample(&mut rng) as u64;

                let mut recoil = Vector::ZERO;
                for _ in 0..count {
                    recoil += random_unit_vector(&mut rng) * self.recoil_velocity;
                }
                *acceleration += recoil / half_dt;
            }
            Ok(())
        })
    }

    fn is_stochastic(&self) -> bool {
        true
    }
}
