use rand::Rng;

/// Scalar type for physics calculations (f64 for precision)
pub type Scalar = f64;

/// 3D vector type for positions, velocities, and accelerations
pub type Vector = bevy::math::DVec3;

/// Rotate the xy components of `vector` about the z axis.
///
/// `cos_phi` and `sin_phi` are passed in precomputed so that kernels can hoist
/// the trigonometry out of their per-particle loops.
#[inline]
pub fn rotate_about_z(vector: Vector, cos_phi: Scalar, sin_phi: Scalar) -> Vector {
    Vector::new(
        cos_phi * vector.x - sin_phi * vector.y,
        sin_phi * vector.x + cos_phi * vector.y,
        vector.z,
    )
}

/// Uniformly distributed direction on the unit sphere
pub fn random_unit_vector<R: Rng + ?Sized>(rng: &mut R) -> Vector {
    let theta = rng.random_range(0.0..=2.0 * std::f64::consts::PI);
    let phi = libm::acos(rng.random_range(-1.0..=1.0));

    Vector::new(
        libm::sin(phi) * libm::cos(theta),
        libm::sin(phi) * libm::sin(theta),
        libm::cos(phi),
    )
}
