//! Linear velocity damping

use super::{Acceleration, EvaluationPoint, check_coefficient};
use crate::error::SimulationError;
use crate::physics::device::{ComputeContext, EnsembleState};
use crate::physics::math::{Scalar, Vector};

/// Viscous drag `a = -γ v` applied during the kicks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrictionAcceleration {
    coefficient: Scalar,
}

impl FrictionAcceleration {
    pub fn new(coefficient: Scalar) -> Self {
        Self { coefficient }
    }

    pub fn coefficient(&self) -> Scalar {
        self.coefficient
    }
}

impl Acceleration for FrictionAcceleration {
    fn name(&self) -> &'static str {
        "friction"
    }

    fn check(
        &self,
        _state: &EnsembleState<'_>,
        _point: &EvaluationPoint<'_>,
    ) -> Result<(), SimulationError> {
        check_coefficient(self.name(), "friction coefficient", self.coefficient)
    }

    fn accumulate(
        &self,
        context: &ComputeContext,
        state: &EnsembleState<'_>,
        _point: &EvaluationPoint<'_>,
        output: &mut [Vector],
    ) -> Result<(), SimulationError> {
        if self.coefficient == 0.0 {
            return Ok(());
        }

        let velocities = state.velocities;
        let coefficient = self.coefficient;
        context.run_chunks(output, |offset, chunk| {
            for (acceleration, velocity) in chunk.iter_mut().zip(&velocities[offset..]) {
                *acceleration -= coefficient * *velocity;
            }
            Ok(())
        })
    }
}
