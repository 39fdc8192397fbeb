//! Typed errors for the integration engine.
//!
//! Every failure surfaces synchronously to the caller of the orchestrator
//! operation that triggered it; nothing is retried.

use crate::physics::math::Scalar;
use thiserror::Error;

/// Errors raised by the ensemble, the compute device and the integrator.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimulationError {
    /// Per-particle arrays disagree on the particle count.
    #[error("array `{array}` has {found} entries but the ensemble holds {expected} particles")]
    DimensionMismatch {
        array: &'static str,
        expected: usize,
        found: usize,
    },

    /// Integration was attempted before device buffers were allocated.
    #[error("device buffers are not allocated; call initialize() before advancing")]
    NotInitialized,

    /// An acceleration source cannot evaluate against the current state.
    #[error("acceleration source `{source_name}` cannot run: {reason}")]
    IncompatibleAccelerationSource {
        source_name: &'static str,
        reason: String,
    },

    /// A kernel, transfer or barrier on the compute device failed.
    #[error("device execution failed in `{kernel}`: {reason}")]
    DeviceExecutionFailure {
        kernel: &'static str,
        reason: String,
    },

    /// The requested sub-step size would move time backwards or is not finite.
    #[error("time step must be finite and non-negative, got {0}")]
    InvalidTimeStep(Scalar),
}

impl SimulationError {
    pub(crate) fn incompatible(source_name: &'static str, reason: impl Into<String>) -> Self {
        Self::IncompatibleAccelerationSource {
            source_name,
            reason: reason.into(),
        }
    }

    pub(crate) fn device(kernel: &'static str, reason: impl Into<String>) -> Self {
        Self::DeviceExecutionFailure {
            kernel,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_dimension_mismatch() {
        let err = SimulationError::DimensionMismatch {
            array: "vy",
            expected: 4,
            found: 3,
        };
        assert_eq!(
            err.to_string(),
            "array `vy` has 3 entries but the ensemble holds 4 particles"
        );
    }

    #[test]
    fn display_not_initialized() {
        assert!(
            SimulationError::NotInitialized
                .to_string()
                .contains("initialize()")
        );
    }

    #[test]
    fn display_incompatible_source() {
        let err = SimulationError::incompatible("coulomb", "particle 2 has mass 0");
        assert_eq!(
            err.to_string(),
            "acceleration source `coulomb` cannot run: particle 2 has mass 0"
        );
    }

    #[test]
    fn display_device_failure() {
        let err = SimulationError::device("bend", "worker panicked");
        assert_eq!(
            err.to_string(),
            "device execution failed in `bend`: worker panicked"
        );
    }

    #[test]
    fn error_trait_works() {
        let err = SimulationError::InvalidTimeStep(-1.0);
        let dyn_err: &dyn std::error::Error = &err;
        assert!(dyn_err.to_string().contains("-1"));
    }
}
