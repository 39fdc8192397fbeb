//! Bend-kick splitting for particles in a rotating trap

use crate::error::SimulationError;
use crate::physics::accelerations::{AccelerationList, EvaluationPoint, KickPhase};
use crate::physics::device::{
    CommandQueue, ComputeContext, DeviceEnsemble, EnsembleState, QueueSession,
};
use crate::physics::math::{Scalar, Vector, rotate_about_z};
use crate::physics::trap::TrapConfiguration;
use bevy::log::trace;
use iontrap_macros::ConfigDefaults;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Velocity damping applied analytically during the bend
#[derive(ConfigDefaults, Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct DampingCoefficients {
    /// Decay rate of the axial velocity (1/s)
    #[default(0.0)]
    #[non_negative]
    pub axial: Scalar,

    /// Decay rate of the in-plane azimuthal velocity (1/s)
    #[default(0.0)]
    #[non_negative]
    pub angular: Scalar,
}

impl DampingCoefficients {
    pub const NONE: Self = Self {
        axial: 0.0,
        angular: 0.0,
    };

    pub fn new(axial: Scalar, angular: Scalar) -> Self {
        Self { axial, angular }
    }
}

/// Second-order bend-kick integrator
///
/// One sub-step of size `dt` is
/// 1. Half kick: `v += a(r, t) * dt/2`
/// 2. Bend: rotate `r` and `v` about the trap axis by `ω dt`, damp `v`,
///    then drift `r += v dt`
/// 3. Half kick: `v += a(r, t + dt) * dt/2`
///
/// The rotation is exact, so a particle with no forces acting on it turns
/// through exactly `ω dt` per sub-step. Accelerations are evaluated on the
/// device through the command queue; a sub-step either completes or leaves the
/// device buffers as they were before it began.
#[derive(Debug, Clone)]
pub struct BendKickUpdater {
    context: Arc<ComputeContext>,
    queue: Arc<CommandQueue>,
    damping: DampingCoefficients,
}

impl BendKickUpdater {
    pub fn new(context: Arc<ComputeContext>, queue: Arc<CommandQueue>) -> Self {
        Self {
            context,
            queue,
            damping: DampingCoefficients::NONE,
        }
    }

    pub fn with_damping(mut self, damping: DampingCoefficients) -> Self {
        self.damping = damping;
        self
    }

    pub fn context(&self) -> &Arc<ComputeContext> {
        &self.context
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        &self.queue
    }

    pub fn damping(&self) -> DampingCoefficients {
        self.damping
    }

    pub fn set_damping(&mut self, damping: DampingCoefficients) {
        self.damping = damping;
    }

    /// Advance the device state by `steps` sub-steps of size `dt`.
    ///
    /// Returns the time after the last sub-step. Time advances by repeated
    /// addition of `dt`, so two calls of `n` steps land on the same state as
    /// one call of `2n`. On error the device buffers hold the state from
    /// before the failing sub-step and the returned error is the first fault.
    #[allow(clippy::too_many_arguments)]
    pub fn update(
        &self,
        session: &mut QueueSession<'_>,
        device: &mut DeviceEnsemble,
        accelerations: &AccelerationList,
        trap: &TrapConfiguration,
        time: Scalar,
        dt: Scalar,
        steps: usize,
    ) -> Result<Scalar, SimulationError> {
        check_time_step(dt)?;
        if steps == 0 {
            return Ok(time);
        }
        if let Some(field) = self.damping.invalid_fields().into_iter().next() {
            return Err(SimulationError::incompatible(
                "damping",
                format!("damping coefficient `{field}` must be non-negative"),
            ));
        }

        let opening = EvaluationPoint {
            time,
            dt,
            phase: KickPhase::Opening,
            trap,
        };
        accelerations.check(&device.state(), &opening)?;

        let bend = Bend::new(trap.omega, dt, self.damping);
        let mut time = time;
        for step in 0..steps {
            device.checkpoint();
            match self.sub_step(session, device, accelerations, trap, time, dt, bend) {
                Ok(next) => time = next,
                Err(error) => {
                    device.restore();
                    trace!("Sub-step {step} failed at t = {time:e}: {error}");
                    return Err(error);
                }
            }
        }

        Ok(time)
    }

    #[allow(clippy::too_many_arguments)]
    fn sub_step(
        &self,
        session: &mut QueueSession<'_>,
        device: &mut DeviceEnsemble,
        accelerations: &AccelerationList,
        trap: &TrapConfiguration,
        time: Scalar,
        dt: Scalar,
        bend: Bend,
    ) -> Result<Scalar, SimulationError> {
        self.kick(
            session,
            device,
            accelerations,
            &EvaluationPoint {
                time,
                dt,
                phase: KickPhase::Opening,
                trap,
            },
        )?;

        session.dispatch("bend", |context| {
            context.run_chunk_pairs(
                &mut device.positions,
                &mut device.velocities,
                |_, positions, velocities| {
                    for (position, velocity) in positions.iter_mut().zip(velocities.iter_mut()) {
                        (*position, *velocity) = bend.apply(*position, *velocity);
                    }
                    Ok(())
                },
            )
        })?;

        let time = time + dt;
        self.kick(
            session,
            device,
            accelerations,
            &EvaluationPoint {
                time,
                dt,
                phase: KickPhase::Closing,
                trap,
            },
        )?;
        Ok(time)
    }

    fn kick(
        &self,
        session: &mut QueueSession<'_>,
        device: &mut DeviceEnsemble,
        accelerations: &AccelerationList,
        point: &EvaluationPoint<'_>,
    ) -> Result<(), SimulationError> {
        let DeviceEnsemble {
            positions,
            velocities,
            charges,
            masses,
            accelerations: field,
            ..
        } = device;

        let state = EnsembleState {
            positions: positions.as_slice(),
            velocities: velocities.as_slice(),
            charges: charges.as_slice(),
            masses: masses.as_slice(),
        };
        session.dispatch("accelerations", |context| {
            accelerations.evaluate_into(context, &state, point, field)
        })?;

        let half_dt = 0.5 * point.dt;
        let field: &[Vector] = field;
        session.dispatch("kick", |context| {
            context.run_chunks(velocities, |offset, chunk| {
                for (velocity, acceleration) in chunk.iter_mut().zip(&field[offset..]) {
                    *velocity += *acceleration * half_dt;
                }
                Ok(())
            })
        })
    }
}

/// Reject time steps that are negative or not finite
pub(crate) fn check_time_step(dt: Scalar) -> Result<(), SimulationError> {
    if dt.is_finite() && dt >= 0.0 {
        Ok(())
    } else {
        Err(SimulationError::InvalidTimeStep(dt))
    }
}

/// Per-sub-step constants of the bend, computed once per update
#[derive(Debug, Clone, Copy)]
struct Bend {
    cos_phi: Scalar,
    sin_phi: Scalar,
    dt: Scalar,
    angular_decay: Scalar,
    axial_decay: Scalar,
}

impl Bend {
    fn new(omega: Scalar, dt: Scalar, damping: DampingCoefficients) -> Self {
        let (sin_phi, cos_phi) = libm::sincos(omega * dt);
        Self {
            cos_phi,
            sin_phi,
            dt,
            angular_decay: libm::exp(-damping.angular * dt),
            axial_decay: libm::exp(-damping.axial * dt),
        }
    }

    #[inline]
    fn apply(&self, position: Vector, velocity: Vector) -> (Vector, Vector) {
        let position = rotate_about_z(position, self.cos_phi, self.sin_phi);
        let velocity = self.damp(position, rotate_about_z(velocity, self.cos_phi, self.sin_phi));
        (position + velocity * self.dt, velocity)
    }

    /// Decay the azimuthal and axial velocity components
    #[inline]
    fn damp(&self, position: Vector, mut velocity: Vector) -> Vector {
        if self.angular_decay != 1.0 {
            let radius = position.truncate().length();
            if radius > 0.0 {
                let azimuthal = Vector::new(-position.y / radius, position.x / radius, 0.0);
                let removed = velocity.dot(azimuthal) * (1.0 - self.angular_decay);
                velocity -= azimuthal * removed;
            }
        }
        velocity.z *= self.axial_decay;
        velocity
    }
}
