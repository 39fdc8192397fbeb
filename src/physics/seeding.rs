//! Initial conditions for particle clouds

use crate::physics::ensemble::{Particle, ParticleEnsemble};
use crate::physics::math::{Scalar, Vector};
use rand::Rng;

/// Append `count` particles at rest, spread uniformly over a disk.
///
/// Particles fill a disk of the given `radius` in the trap plane, each with a
/// uniform axial offset in `[-thickness/2, thickness/2)`.
#[allow(clippy::too_many_arguments)]
pub fn seed_disk<R: Rng + ?Sized>(
    ensemble: &mut ParticleEnsemble,
    rng: &mut R,
    count: usize,
    radius: Scalar,
    thickness: Scalar,
    charge: Scalar,
    mass: Scalar,
) {
    for _ in 0..count {
        // sqrt keeps the areal density uniform
        let r = radius * rng.random::<Scalar>().sqrt();
        let (sin_angle, cos_angle) =
            libm::sincos(rng.random_range(0.0..2.0 * std::f64::consts::PI));
        let z = thickness * (rng.random::<Scalar>() - 0.5);

        ensemble.push(Particle::at_rest(
            Vector::new(r * cos_angle, r * sin_angle, z),
            charge,
            mass,
        ));
    }
}
