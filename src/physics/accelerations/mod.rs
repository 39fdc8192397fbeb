//! Acceleration sources summed into the per-step force field
//!
//! Every source implements [`Acceleration`]: it reads a snapshot of the
//! ensemble and adds its contribution to an acceleration buffer. The set of
//! sources is closed; [`AccelerationSource`] enumerates them so callers can
//! tell which ones carry stochastic state.

use crate::error::SimulationError;
use crate::physics::device::{ComputeContext, EnsembleState};
use crate::physics::math::{Scalar, Vector};
use crate::physics::trap::TrapConfiguration;

pub mod confinement;
pub mod coulomb;
pub mod friction;
pub mod heating;

pub use confinement::TrapAcceleration;
pub use coulomb::CoulombAcceleration;
pub use friction::FrictionAcceleration;
pub use heating::HeatingAcceleration;

/// Which half kick of a sub-step an evaluation feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KickPhase {
    /// Before the bend, at the start of the sub-step
    Opening,
    /// After the bend, at the end of the sub-step
    Closing,
}

impl KickPhase {
    #[inline]
    pub fn index(self) -> u64 {
        match self {
            KickPhase::Opening => 0,
            KickPhase::Closing => 1,
        }
    }
}

/// Time and configuration at which the force field is evaluated
#[derive(Debug, Clone, Copy)]
pub struct EvaluationPoint<'a> {
    pub time: Scalar,
    /// Size of the sub-step being integrated
    pub dt: Scalar,
    pub phase: KickPhase,
    pub trap: &'a TrapConfiguration,
}

/// A contributor to the force field
pub trait Acceleration {
    /// Short identifier used in errors and logs
    fn name(&self) -> &'static str;

    /// Reject ensembles or parameters this source cannot evaluate.
    ///
    /// Called once before the first sub-step of an integration run.
    fn check(
        &self,
        state: &EnsembleState<'_>,
        point: &EvaluationPoint<'_>,
    ) -> Result<(), SimulationError>;

    /// Add this source's acceleration for every particle to `output`.
    fn accumulate(
        &self,
        context: &ComputeContext,
        state: &EnsembleState<'_>,
        point: &EvaluationPoint<'_>,
        output: &mut [Vector],
    ) -> Result<(), SimulationError>;

    /// Whether evaluation draws random numbers
    fn is_stochastic(&self) -> bool {
        false
    }
}

/// Every force source the integrator knows how to evaluate
#[derive(Debug, Clone, PartialEq)]
pub enum AccelerationSource {
    Coulomb(CoulombAcceleration),
    Trap(TrapAcceleration),
    Friction(FrictionAcceleration),
    Heating(HeatingAcceleration),
}

impl AccelerationSource {
    pub fn name(&self) -> &'static str {
        match self {
            AccelerationSource::Coulomb(source) => source.name(),
            AccelerationSource::Trap(source) => source.name(),
            AccelerationSource::Friction(source) => source.name(),
            AccelerationSource::Heating(source) => source.name(),
        }
    }

    pub fn is_stochastic(&self) -> bool {
        match self {
            AccelerationSource::Coulomb(source) => source.is_stochastic(),
            AccelerationSource::Trap(source) => source.is_stochastic(),
            AccelerationSource::Friction(source) => source.is_stochastic(),
            AccelerationSource::Heating(source) => source.is_stochastic(),
        }
    }

    pub fn check(
        &self,
        state: &EnsembleState<'_>,
        point: &EvaluationPoint<'_>,
    ) -> Result<(), SimulationError> {
        match self {
            AccelerationSource::Coulomb(source) => source.check(state, point),
            AccelerationSource::Trap(source) => source.check(state, point),
            AccelerationSource::Friction(source) => source.check(state, point),
            AccelerationSource::Heating(source) => source.check(state, point),
        }
    }

    /// Add this source's contribution, rejecting non-finite results.
    pub fn accumulate(
        &self,
        context: &ComputeContext,
        state: &EnsembleState<'_>,
        point: &EvaluationPoint<'_>,
        output: &mut [Vector],
    ) -> Result<(), SimulationError> {
        match self {
            AccelerationSource::Coulomb(source) => {
                source.accumulate(context, state, point, output)?
            }
            AccelerationSource::Trap(source) => source.accumulate(context, state, point, output)?,
            AccelerationSource::Friction(source) => {
                source.accumulate(context, state, point, output)?
            }
            AccelerationSource::Heating(source) => {
                source.accumulate(context, state, point, output)?
            }
        }

        if let Some(index) = output.iter().position(|a| !a.is_finite()) {
            return Err(SimulationError::device(
                self.name(),
                format!("non-finite acceleration for particle {index}"),
            ));
        }
        Ok(())
    }

    /// Acceleration of every particle due to this source alone
    pub fn evaluate(
        &self,
        context: &ComputeContext,
        state: &EnsembleState<'_>,
        point: &EvaluationPoint<'_>,
    ) -> Result<Vec<Vector>, SimulationError> {
        let mut output = vec![Vector::ZERO; state.len()];
        self.accumulate(context, state, point, &mut output)?;
        Ok(output)
    }
}

impl From<CoulombAcceleration> for AccelerationSource {
    fn from(source: CoulombAcceleration) -> Self {
        AccelerationSource::Coulomb(source)
    }
}

impl From<TrapAcceleration> for AccelerationSource {
    fn from(source: TrapAcceleration) -> Self {
        AccelerationSource::Trap(source)
    }
}

impl From<FrictionAcceleration> for AccelerationSource {
    fn from(source: FrictionAcceleration) -> Self {
        AccelerationSource::Friction(source)
    }
}

impl From<HeatingAcceleration> for AccelerationSource {
    fn from(source: HeatingAcceleration) -> Self {
        AccelerationSource::Heating(source)
    }
}

/// Ordered set of sources whose contributions are summed before each kick
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccelerationList {
    sources: Vec<AccelerationSource>,
}

impl AccelerationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source: impl Into<AccelerationSource>) -> Self {
        self.push(source);
        self
    }

    pub fn push(&mut self, source: impl Into<AccelerationSource>) {
        self.sources.push(source.into());
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &AccelerationSource> {
        self.sources.iter()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.sources.iter().map(AccelerationSource::name).collect()
    }

    pub fn has_stochastic_sources(&self) -> bool {
        self.sources.iter().any(AccelerationSource::is_stochastic)
    }

    /// Check every source against the ensemble before integration starts.
    pub fn check(
        &self,
        state: &EnsembleState<'_>,
        point: &EvaluationPoint<'_>,
    ) -> Result<(), SimulationError> {
        state.validate()?;
        self.sources
            .iter()
            .try_for_each(|source| source.check(state, point))
    }

    /// Overwrite `output` with the summed acceleration of every source.
    pub fn evaluate_into(
        &self,
        context: &ComputeContext,
        state: &EnsembleState<'_>,
        point: &EvaluationPoint<'_>,
        output: &mut [Vector],
    ) -> Result<(), SimulationError> {
        if output.len() != state.len() {
            return Err(SimulationError::DimensionMismatch {
                array: "accelerations",
                expected: state.len(),
                found: output.len(),
            });
        }

        output.fill(Vector::ZERO);
        for source in &self.sources {
            source.accumulate(context, state, point, output)?;
        }
        Ok(())
    }

    pub fn evaluate(
        &self,
        context: &ComputeContext,
        state: &EnsembleState<'_>,
        point: &EvaluationPoint<'_>,
    ) -> Result<Vec<Vector>, SimulationError> {
        let mut output = vec![Vector::ZERO; state.len()];
        self.evaluate_into(context, state, point, &mut output)?;
        Ok(output)
    }
}

impl FromIterator<AccelerationSource> for AccelerationList {
    fn from_iter<I: IntoIterator<Item = AccelerationSource>>(iter: I) -> Self {
        Self {
            sources: iter.into_iter().collect(),
        }
    }
}

impl<'a> IntoIterator for &'a AccelerationList {
    type Item = &'a AccelerationSource;
    type IntoIter = std::slice::Iter<'a, AccelerationSource>;

    fn into_iter(self) -> Self::IntoIter {
        self.sources.iter()
    }
}

/// Reject particles whose charge-to-mass ratio is undefined
pub(crate) fn check_charge_and_mass(
    source_name: &'static str,
    state: &EnsembleState<'_>,
) -> Result<(), SimulationError> {
    if let Some(index) = state.masses.iter().position(|m| !(m.is_finite() && *m > 0.0)) {
        return Err(SimulationError::incompatible(
            source_name,
            format!(
                "particle {index} has mass {}; masses must be finite and positive",
                state.masses[index]
            ),
        ));
    }
    if let Some(index) = state.charges.iter().position(|q| !q.is_finite()) {
        return Err(SimulationError::incompatible(
            source_name,
            format!("particle {index} has a non-finite charge"),
        ));
    }
    Ok(())
}

/// Reject coefficients that are negative or not finite
pub(crate) fn check_coefficient(
    source_name: &'static str,
    label: &str,
    value: Scalar,
) -> Result<(), SimulationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SimulationError::incompatible(
            source_name,
            format!("{label} must be finite and non-negative, got {value}"),
        ))
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[test]
    fn test_list_sums_contributions() {
        let trap = TrapConfiguration::default();
        let fixture = Fixture {
            velocities: vec![Vector::new(1.0, -2.0, 0.5)],
            ..Fixture::at_rest(vec![Vector::ZERO], 0.0, 1.0)
        };
        let context = context();

        let list = AccelerationList::new()
            .with(FrictionAcceleration::new(0.5))
            .with(FrictionAcceleration::new(1.5));
        let total = list
            .evaluate(&context, &fixture.state(), &point(&trap))
            .unwrap();

        assert_eq!(total, vec![Vector::new(-2.0, 4.0, -1.0)]);
    }

    #[test]
    fn test_evaluation_overwrites_stale_output() {
        let trap = TrapConfiguration::default();
        let fixture = Fixture::at_rest(vec![Vector::ZERO; 3], 1.0, 1.0);
        let list = AccelerationList::new();
        let mut output = vec![Vector::ONE; 3];

        list.evaluate_into(&context(), &fixture.state(), &point(&trap), &mut output)
            .unwrap();
        assert_eq!(output, vec![Vector::ZERO; 3]);
    }

    #[test]
    fn test_output_length_must_match() {
        let trap = TrapConfiguration::default();
        let fixture = Fixture::at_rest(vec![Vector::ZERO; 3], 1.0, 1.0);
        let mut output = vec![Vector::ZERO; 2];

        let result = AccelerationList::new().evaluate_into(
            &context(),
            &fixture.state(),
            &point(&trap),
            &mut output,
        );
        assert!(matches!(
            result,
            Err(SimulationError::DimensionMismatch {
                array: "accelerations",
                ..
            })
        ));
    }

    #[test]
    fn test_list_metadata() {
        let list: AccelerationList = [
            AccelerationSource::from(CoulombAcceleration::default()),
            AccelerationSource::from(TrapAcceleration),
            AccelerationSource::from(HeatingAcceleration::new(0.1, 1.0e3, 7)),
        ]
        .into_iter()
        .collect();

        assert_eq!(list.len(), 3);
        assert_eq!(list.names(), vec!["coulomb", "trap", "heating"]);
        assert!(list.has_stochastic_sources());
        assert!(!AccelerationList::new().with(TrapAcceleration).has_stochastic_sources());
    }

    #[test]
    fn test_each_variant_reports_its_own_identity() {
        let sources = [
            (AccelerationSource::from(CoulombAcceleration::default()), "coulomb", false),
            (AccelerationSource::from(TrapAcceleration), "trap", false),
            (AccelerationSource::from(FrictionAcceleration::new(1.0)), "friction", false),
            (
                AccelerationSource::from(HeatingAcceleration::new(0.1, 1.0e3, 7)),
                "heating",
                true,
            ),
        ];

        for (source, name, stochastic) in sources {
            assert_eq!(source.name(), name);
            assert_eq!(source.is_stochastic(), stochastic);
        }
    }

    #[test]
    fn test_non_finite_output_names_the_variant() {
        let trap = TrapConfiguration::default();
        let mut fixture = Fixture::at_rest(vec![Vector::X], 1.0, 1.0);
        fixture.velocities[0] = Vector::new(Scalar::INFINITY, 0.0, 0.0);

        let result = AccelerationSource::from(FrictionAcceleration::new(2.0)).evaluate(
            &context(),
            &fixture.state(),
            &point(&trap),
        );
        assert!(matches!(
            result,
            Err(SimulationError::DeviceExecutionFailure {
                kernel: "friction",
                ..
            })
        ));
    }

    #[test]
    fn test_check_reports_zero_mass() {
        let trap = TrapConfiguration::default();
        let mut fixture = Fixture::at_rest(vec![Vector::ZERO, Vector::X], 1.0, 1.0);
        fixture.masses[1] = 0.0;

        let list = AccelerationList::new().with(CoulombAcceleration::default());
        let result = list.check(&fixture.state(), &point(&trap));
        assert!(matches!(
            result,
            Err(SimulationError::IncompatibleAccelerationSource {
                source_name: "coulomb",
                ..
            })
        ));
    }

    #[test]
    fn test_check_reports_inconsistent_state() {
        let trap = TrapConfiguration::default();
        let mut fixture = Fixture::at_rest(vec![Vector::ZERO, Vector::X], 1.0, 1.0);
        fixture.charges.pop();

        let result = AccelerationList::new().check(&fixture.state(), &point(&trap));
        assert_eq!(
            result,
            Err(SimulationError::DimensionMismatch {
                array: "charges",
                expected: 2,
                found: 1,
            })
        );
    }
}
