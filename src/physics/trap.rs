//! Trap geometry shared by the integrator and the confinement source

use crate::physics::math::{Scalar, Vector, rotate_about_z};
use iontrap_macros::ConfigDefaults;
use serde::{Deserialize, Serialize};

/// Parameters of the confining field.
///
/// The wall frame rotates at `omega` about the trap (z) axis; at time `t` it
/// sits at angle `theta + omega * t`. Confinement is harmonic with per-axis
/// curvatures, scaled by each particle's charge-to-mass ratio. The in-plane
/// curvature is split `1 ± wall_anisotropy` between the wall-frame axes.
#[derive(ConfigDefaults, Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct TrapConfiguration {
    /// Rotation rate of the wall frame (rad/s)
    #[default(2.0 * std::f64::consts::PI * 43.0e3)]
    pub omega: Scalar,

    /// Wall frame angle at t = 0 (rad)
    #[default(0.0)]
    pub theta: Scalar,

    /// Axial field curvature (V/m²)
    #[default(2.0e6)]
    #[non_negative]
    pub axial_curvature: Scalar,

    /// In-plane field curvature (V/m²)
    #[default(1.0e6)]
    #[non_negative]
    pub radial_curvature: Scalar,

    /// Relative strength of the rotating-wall quadrupole
    #[default(0.01)]
    #[non_negative]
    pub wall_anisotropy: Scalar,
}

impl TrapConfiguration {
    /// A trap that only rotates: no confining curvature in any direction
    pub fn rotation_only(omega: Scalar) -> Self {
        Self {
            omega,
            theta: 0.0,
            axial_curvature: 0.0,
            radial_curvature: 0.0,
            wall_anisotropy: 0.0,
        }
    }

    /// Angle of the wall frame at time `t`
    #[inline]
    pub fn frame_angle(&self, time: Scalar) -> Scalar {
        self.theta + self.omega * time
    }

    /// Express a lab-frame vector in the wall frame at time `t`
    pub fn to_rotating_frame(&self, vector: Vector, time: Scalar) -> Vector {
        let (sin_angle, cos_angle) = libm::sincos(self.frame_angle(time));
        rotate_about_z(vector, cos_angle, -sin_angle)
    }

    /// Express a wall-frame vector in the lab frame at time `t`
    pub fn to_lab_frame(&self, vector: Vector, time: Scalar) -> Vector {
        let (sin_angle, cos_angle) = libm::sincos(self.frame_angle(time));
        rotate_about_z(vector, cos_angle, sin_angle)
    }

    /// Whether every parameter is a finite number
    pub fn is_finite(&self) -> bool {
        [
            self.omega,
            self.theta,
            self.axial_curvature,
            self.radial_curvature,
            self.wall_anisotropy,
        ]
        .iter()
        .all(|value| value.is_finite())
    }
}
