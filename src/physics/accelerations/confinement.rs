//! Harmonic confinement from the trap electrodes and the rotating wall

use super::{Acceleration, EvaluationPoint, check_charge_and_mass};
use crate::error::SimulationError;
use crate::physics::device::{ComputeContext, EnsembleState};
use crate::physics::math::{Vector, rotate_about_z};

/// Confining acceleration derived from the shared [`TrapConfiguration`].
///
/// Axially the particle sees `-(q/m) k_z z`. In the plane the field is
/// evaluated in the wall frame at the current frame angle, where the two axes
/// carry curvatures `k_r (1 + δ)` and `k_r (1 - δ)`, and rotated back into the
/// lab frame.
///
/// [`TrapConfiguration`]: crate::physics::trap::TrapConfiguration
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TrapAcceleration;

impl Acceleration for TrapAcceleration {
    fn name(&self) -> &'static str {
        "trap"
    }

    fn check(
        &self,
        state: &EnsembleState<'_>,
        point: &EvaluationPoint<'_>,
    ) -> Result<(), SimulationError> {
        if !point.trap.is_finite() {
            return Err(SimulationError::incompatible(
                self.name(),
                "trap configuration contains a non-finite parameter",
            ));
        }
        check_charge_and_mass(self.name(), state)
    }

    fn accumulate(
        &self,
        context: &ComputeContext,
        state: &EnsembleState<'_>,
        point: &EvaluationPoint<'_>,
        output: &mut [Vector],
    ) -> Result<(), SimulationError> {
        let trap = point.trap;
        let (sin_angle, cos_angle) = libm::sincos(trap.frame_angle(point.time));
        let curvature = Vector::new(
            trap.radial_curvature * (1.0 + trap.wall_anisotropy),
            trap.radial_curvature * (1.0 - trap.wall_anisotropy),
            trap.axial_curvature,
        );

        let positions = state.positions;
        let charges = state.charges;
        let masses = state.masses;

        context.run_chunks(output, |offset, chunk| {
            for (local, acceleration) in chunk.iter_mut().enumerate() {
                let i = offset + local;
                let charge_to_mass = charges[i] / masses[i];

                let in_wall_frame = rotate_about_z(positions[i], cos_angle, -sin_angle);
                let restoring = -charge_to_mass * curvature * in_wall_frame;
                *acceleration += rotate_about_z(restoring, cos_angle, sin_angle);
            }
            Ok(())
        })
    }
}
