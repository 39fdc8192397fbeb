//! Direct-summation Coulomb repulsion between every pair of particles

use super::{Acceleration, EvaluationPoint, check_charge_and_mass, check_coefficient};
use crate::error::SimulationError;
use crate::physics::device::{ComputeContext, EnsembleState};
use crate::physics::math::{Scalar, Vector};

/// Pairwise Coulomb acceleration, `k q_i / m_i * Σ_j q_j (r_i - r_j) / |r_i - r_j|³`.
///
/// Each particle sums over every other particle in index order, so the result
/// does not depend on how the work is split across threads. Coincident
/// particles produce a non-finite acceleration, which the list reports as a
/// device failure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoulombAcceleration {
    coulomb_constant: Scalar,
}

impl CoulombAcceleration {
    /// Coulomb constant in SI units (N·m²/C²)
    pub const SI_COULOMB_CONSTANT: Scalar = 8.987_551_792_3e9;

    pub fn new() -> Self {
        Self::with_constant(Self::SI_COULOMB_CONSTANT)
    }

    /// Use a different force constant, for example 1.0 in natural units
    pub fn with_constant(coulomb_constant: Scalar) -> Self {
        Self { coulomb_constant }
    }

    pub fn coulomb_constant(&self) -> Scalar {
        self.coulomb_constant
    }
}

impl Default for CoulombAcceleration {
    fn default() -> Self {
        Self::new()
    }
}

impl Acceleration for CoulombAcceleration {
    fn name(&self) -> &'static str {
        "coulomb"
    }

    fn check(
        &self,
        state: &EnsembleState<'_>,
        _point: &EvaluationPoint<'_>,
    ) -> Result<(), SimulationError> {
        check_coefficient(self.name(), "coulomb constant", self.coulomb_constant)?;
        check_charge_and_mass(self.name(), state)
    }

    fn accumulate(
        &self,
        context: &ComputeContext,
        state: &EnsembleState<'_>,
        _point: &EvaluationPoint<'_>,
        output: &mut [Vector],
    ) -> Result<(), SimulationError> {
        let positions = state.positions;
        let charges = state.charges;
        let masses = state.masses;
        let coulomb_constant = self.coulomb_constant;

        context.run_chunks(output, |offset, chunk| {
            for (local, acceleration) in chunk.iter_mut().enumerate() {
                let i = offset + local;
                let position = positions[i];

                let mut field = Vector::ZERO;
                for (j, (other, charge)) in positions.iter().zip(charges).enumerate() {
                    if j == i {
                        continue;
                    }
                    let separation = position - *other;
                    let distance = separation.length();
                    field += separation * (charge / (distance * distance * distance));
                }

                *acceleration += field * (coulomb_constant * charges[i] / masses[i]);
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::{AccelerationList, AccelerationSource};
    use super::*;
    use crate::physics::trap::TrapConfiguration;

    #[test]
    fn test_two_charges_repel_along_separation() {
        let trap = TrapConfiguration::default();
        let fixture = Fixture::at_rest(vec![Vector::ZERO, Vector::new(2.0, 0.0, 0.0)], 1.0, 1.0);
        let source = AccelerationSource::from(CoulombAcceleration::with_constant(1.0));

        let accelerations = source
            .evaluate(&context(), &fixture.state(), &point(&trap))
            .unwrap();

        // k q² / (m d²) = 1 / 4
        assert!((accelerations[0] - Vector::new(-0.25, 0.0, 0.0)).length() < 1e-15);
        assert!((accelerations[1] - Vector::new(0.25, 0.0, 0.0)).length() < 1e-15);
    }

    #[test]
    fn test_newtons_third_law_with_unequal_masses() {
        let trap = TrapConfiguration::default();
        let mut fixture = Fixture::at_rest(
            vec![
                Vector::new(0.1, -0.3, 0.2),
                Vector::new(-0.4, 0.7, 0.05),
                Vector::new(0.9, 0.2, -0.6),
            ],
            1.0,
            1.0,
        );
        fixture.charges = vec![1.0, 2.0, -0.5];
        fixture.masses = vec![1.0, 3.0, 0.25];

        let source = AccelerationSource::from(CoulombAcceleration::default());
        let accelerations = source
            .evaluate(&context(), &fixture.state(), &point(&trap))
            .unwrap();

        let net_force: Vector = accelerations
            .iter()
            .zip(&fixture.masses)
            .map(|(a, m)| *a * *m)
            .sum();
        let scale: Scalar = accelerations
            .iter()
            .zip(&fixture.masses)
            .map(|(a, m)| (*a * *m).length())
            .sum();
        assert!(net_force.length() <= scale * 1e-12);
    }

    #[test]
    fn test_coincident_particles_fail_evaluation() {
        let trap = TrapConfiguration::default();
        let position = Vector::new(1.0e-5, 0.0, 0.0);
        let fixture = Fixture::at_rest(vec![position, position], 1.0, 1.0);
        let list = AccelerationList::new().with(CoulombAcceleration::default());

        let result = list.evaluate(&context(), &fixture.state(), &point(&trap));
        assert!(matches!(
            result,
            Err(SimulationError::DeviceExecutionFailure {
                kernel: "coulomb",
                ..
            })
        ));
    }

    #[test]
    fn test_single_particle_feels_nothing() {
        let trap = TrapConfiguration::default();
        let fixture = Fixture::at_rest(vec![Vector::new(0.3, 0.2, 0.1)], 1.0, 1.0);
        let source = AccelerationSource::from(CoulombAcceleration::default());

        let accelerations = source
            .evaluate(&context(), &fixture.state(), &point(&trap))
            .unwrap();
        assert_eq!(accelerations, vec![Vector::ZERO]);
    }

    #[test]
    fn test_result_independent_of_work_split() {
        let trap = TrapConfiguration::default();
        let fixture = Fixture::at_rest(
            (0..17)
                .map(|i| {
                    let angle = i as Scalar * 0.37;
                    Vector::new(angle.cos(), angle.sin(), 0.01 * i as Scalar)
                })
                .collect(),
            1.0,
            1.0,
        );
        let source = AccelerationSource::from(CoulombAcceleration::with_constant(1.0));

        let serial = source
            .evaluate(
                &ComputeContext::with_threads(1).with_work_group_size(64),
                &fixture.state(),
                &point(&trap),
            )
            .unwrap();
        let split = source
            .evaluate(&context(), &fixture.state(), &point(&trap))
            .unwrap();
        assert_eq!(serial, split);
    }

    #[test]
    fn test_check_rejects_zero_mass() {
        let trap = TrapConfiguration::default();
        let mut fixture = Fixture::at_rest(vec![Vector::ZERO, Vector::X], 1.0, 1.0);
        fixture.masses[0] = 0.0;

        let result = CoulombAcceleration::default().check(&fixture.state(), &point(&trap));
        assert!(matches!(
            result,
            Err(SimulationError::IncompatibleAccelerationSource {
                source_name: "coulomb",
                ..
            })
        ));
    }
}
