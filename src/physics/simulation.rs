//! Simulation orchestrator
//!
//! Owns the host ensemble, the trap configuration and the acceleration list,
//! and drives the bend-kick integrator on the compute device. Every call to
//! [`Simulation::advance`] uploads the ensemble, integrates, waits on the queue
//! barrier and downloads the result; on failure the host state is untouched.

use crate::config::SimulationConfig;
use crate::error::SimulationError;
use crate::physics::accelerations::{
    AccelerationList, AccelerationSource, CoulombAcceleration, FrictionAcceleration,
    HeatingAcceleration, TrapAcceleration,
};
use crate::physics::device::{CommandQueue, ComputeContext, DeviceEnsemble};
use crate::physics::ensemble::ParticleEnsemble;
use crate::physics::integrators::bend_kick::check_time_step;
use crate::physics::integrators::{BendKickUpdater, DampingCoefficients};
use crate::physics::math::{Scalar, Vector};
use crate::physics::seeding::seed_disk;
use crate::physics::trap::TrapConfiguration;
use bevy::log::{debug, info};
use rand::Rng;
use std::sync::Arc;

/// Recoil velocity used when `configure` is not given one (m/s)
pub const DEFAULT_RECOIL_VELOCITY: Scalar = 0.1;

/// Scatter rate used when `configure` is not given one (1/s)
pub const DEFAULT_SCATTER_RATE: Scalar = 0.0;

pub struct Simulation {
    ensemble: ParticleEnsemble,
    trap: TrapConfiguration,
    accelerations: AccelerationList,
    /// Sources added after `configure`, replayed by `clone`
    auxiliary: Vec<AccelerationSource>,
    updater: BendKickUpdater,
    device: Option<DeviceEnsemble>,
    time: Scalar,
    recoil_velocity: Scalar,
    scatter_rate: Scalar,
    coulomb_constant: Scalar,
    seed: u64,
}

impl Simulation {
    /// Simulation on a fresh compute context using every available core
    pub fn new() -> Self {
        let context = Arc::new(ComputeContext::new());
        let queue = Arc::new(CommandQueue::new(Arc::clone(&context)));
        Self::with_device(context, queue)
    }

    /// Simulation sharing an existing context and queue
    pub fn with_device(context: Arc<ComputeContext>, queue: Arc<CommandQueue>) -> Self {
        let mut simulation = Self {
            ensemble: ParticleEnsemble::new(),
            trap: TrapConfiguration::default(),
            accelerations: AccelerationList::new(),
            auxiliary: Vec::new(),
            updater: BendKickUpdater::new(context, queue),
            device: None,
            time: 0.0,
            recoil_velocity: DEFAULT_RECOIL_VELOCITY,
            scatter_rate: DEFAULT_SCATTER_RATE,
            coulomb_constant: CoulombAcceleration::SI_COULOMB_CONSTANT,
            seed: rand::random(),
        };
        simulation.rebuild_accelerations();
        simulation
    }

    /// Fix the seed used by stochastic sources.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rebuild_accelerations();
        self
    }

    /// Use a different Coulomb constant, for example 1.0 in natural units.
    pub fn with_coulomb_constant(mut self, coulomb_constant: Scalar) -> Self {
        self.coulomb_constant = coulomb_constant;
        self.rebuild_accelerations();
        self
    }

    /// Build a seeded, initialized and configured simulation from `config`.
    pub fn from_config<R: Rng + ?Sized>(
        config: &SimulationConfig,
        rng: &mut R,
    ) -> Result<Self, SimulationError> {
        let physics = &config.physics;
        let mut simulation = Self::new()
            .with_seed(rng.random())
            .with_coulomb_constant(physics.coulomb_constant);

        seed_disk(
            simulation.ensemble_mut(),
            rng,
            physics.particle_count,
            physics.seed_radius,
            physics.seed_thickness,
            physics.charge,
            physics.mass,
        );

        simulation.configure(
            config.trap.clone(),
            physics.damping,
            Some(physics.recoil_velocity),
            Some(physics.scatter_rate),
        );
        if physics.friction_coefficient > 0.0 {
            simulation.add_acceleration(FrictionAcceleration::new(physics.friction_coefficient));
        }
        if physics.spin_up {
            simulation.spin_up();
        }

        simulation.initialize()?;
        Ok(simulation)
    }

    fn rebuild_accelerations(&mut self) {
        let mut accelerations = AccelerationList::new()
            .with(CoulombAcceleration::with_constant(self.coulomb_constant))
            .with(TrapAcceleration);
        if self.scatter_rate > 0.0 {
            accelerations.push(HeatingAcceleration::new(
                self.recoil_velocity,
                self.scatter_rate,
                self.seed,
            ));
        }
        for source in &self.auxiliary {
            accelerations.push(source.clone());
        }
        self.accelerations = accelerations;
    }

    /// Allocate device buffers for the current ensemble.
    ///
    /// Must be called again whenever the particle count changes.
    pub fn initialize(&mut self) -> Result<(), SimulationError> {
        let count = self.ensemble.validate()?;
        self.device = Some(DeviceEnsemble::allocate(count));
        info!("Allocated device buffers for {count} particles");
        Ok(())
    }

    /// Install a trap and integrator parameters and start from `t = 0`.
    ///
    /// The acceleration list becomes Coulomb plus trap confinement, with recoil
    /// heating when `scatter_rate` is positive. Sources added through
    /// [`add_acceleration`](Self::add_acceleration) are removed.
    pub fn configure(
        &mut self,
        trap: TrapConfiguration,
        damping: DampingCoefficients,
        recoil_velocity: Option<Scalar>,
        scatter_rate: Option<Scalar>,
    ) {
        self.trap = trap;
        self.updater.set_damping(damping);
        self.recoil_velocity = recoil_velocity.unwrap_or(DEFAULT_RECOIL_VELOCITY);
        self.scatter_rate = scatter_rate.unwrap_or(DEFAULT_SCATTER_RATE);
        self.auxiliary.clear();
        self.rebuild_accelerations();
        self.time = 0.0;

        info!(
            "Configured trap: omega = {:.4e} rad/s, sources = {:?}",
            self.trap.omega,
            self.accelerations.names()
        );
    }

    /// Append a source after the configured ones.
    pub fn add_acceleration(&mut self, source: impl Into<AccelerationSource>) {
        let source = source.into();
        self.auxiliary.push(source.clone());
        self.accelerations.push(source);
    }

    /// Integrate `steps` sub-steps of size `dt`.
    ///
    /// Either every sub-step completes and the ensemble and time are updated,
    /// or an error is returned and both are left as they were.
    pub fn advance(&mut self, dt: Scalar, steps: usize) -> Result<(), SimulationError> {
        let Some(device) = self.device.as_mut() else {
            return Err(SimulationError::NotInitialized);
        };
        check_time_step(dt)?;
        if steps == 0 {
            return Ok(());
        }

        let queue = Arc::clone(self.updater.queue());
        let mut session = queue.begin();
        session.upload(&self.ensemble, device)?;
        let time = self.updater.update(
            &mut session,
            device,
            &self.accelerations,
            &self.trap,
            self.time,
            dt,
            steps,
        )?;
        session.finish()?;
        session.download(device, &mut self.ensemble)?;
        self.time = time;

        debug!("Advanced to t = {time:.6e}; queue profile: {:?}", session.profile());
        Ok(())
    }

    /// Give every particle the in-plane velocity of rigid rotation at `omega`.
    pub fn spin_up(&mut self) {
        let omega = self.trap.omega;
        let count = self.ensemble.count();
        for i in 0..count {
            let (x, y) = (self.ensemble.x()[i], self.ensemble.y()[i]);
            let (vx, vy) = match azimuthal_direction(x, y) {
                Some((ux, uy)) => {
                    let speed = omega * x.hypot(y);
                    (speed * ux, speed * uy)
                }
                None => (0.0, 0.0),
            };
            self.ensemble.vx_mut()[i] = vx;
            self.ensemble.vy_mut()[i] = vy;
        }
    }

    /// Distance of each particle from the trap axis
    pub fn radii(&self) -> Vec<Scalar> {
        self.ensemble
            .x()
            .iter()
            .zip(self.ensemble.y())
            .map(|(x, y)| x.hypot(*y))
            .collect()
    }

    /// In-plane velocity component pointing away from the axis
    pub fn radial_velocities(&self) -> Vec<Scalar> {
        self.project_in_plane(radial_direction)
    }

    /// In-plane velocity component along the direction of rotation
    pub fn angular_velocities(&self) -> Vec<Scalar> {
        self.project_in_plane(azimuthal_direction)
    }

    fn project_in_plane(
        &self,
        direction: impl Fn(Scalar, Scalar) -> Option<(Scalar, Scalar)>,
    ) -> Vec<Scalar> {
        let [x, y, _] = self.ensemble.positions();
        let [vx, vy, _] = self.ensemble.velocities();
        (0..self.ensemble.count())
            .map(|i| match direction(x[i], y[i]) {
                Some((ux, uy)) => ux * vx[i] + uy * vy[i],
                None => 0.0,
            })
            .collect()
    }

    /// In-plane coordinates in the wall frame at the current time
    pub fn rotating_frame_coordinates(&self) -> (Vec<Scalar>, Vec<Scalar>) {
        self.ensemble
            .x()
            .iter()
            .zip(self.ensemble.y())
            .map(|(x, y)| {
                let rotated = self
                    .trap
                    .to_rotating_frame(Vector::new(*x, *y, 0.0), self.time);
                (rotated.x, rotated.y)
            })
            .unzip()
    }

    /// Total kinetic energy `Σ ½ m v²`
    pub fn kinetic_energy(&self) -> Scalar {
        self.ensemble
            .iter()
            .map(|particle| 0.5 * particle.mass * particle.velocity.length_squared())
            .sum()
    }

    /// Mean distance from the trap axis, zero for an empty ensemble
    pub fn mean_radius(&self) -> Scalar {
        if self.ensemble.is_empty() {
            return 0.0;
        }
        self.radii().iter().sum::<Scalar>() / self.ensemble.count() as Scalar
    }

    pub fn time(&self) -> Scalar {
        self.time
    }

    pub fn ensemble(&self) -> &ParticleEnsemble {
        &self.ensemble
    }

    pub fn ensemble_mut(&mut self) -> &mut ParticleEnsemble {
        &mut self.ensemble
    }

    pub fn trap_configuration(&self) -> &TrapConfiguration {
        &self.trap
    }

    /// Changes take effect from the next `advance`
    pub fn trap_configuration_mut(&mut self) -> &mut TrapConfiguration {
        &mut self.trap
    }

    pub fn damping(&self) -> DampingCoefficients {
        self.updater.damping()
    }

    pub fn accelerations(&self) -> &AccelerationList {
        &self.accelerations
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn recoil_velocity(&self) -> Scalar {
        self.recoil_velocity
    }

    pub fn scatter_rate(&self) -> Scalar {
        self.scatter_rate
    }

    pub fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    pub fn context(&self) -> &Arc<ComputeContext> {
        self.updater.context()
    }

    pub fn queue(&self) -> &Arc<CommandQueue> {
        self.updater.queue()
    }
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

/// Independent copy sharing the compute context and queue.
///
/// The ensemble, trap configuration and seed are copied, the acceleration list
/// is rebuilt through `configure`, and device buffers are reallocated if the
/// original had them.
impl Clone for Simulation {
    fn clone(&self) -> Self {
        let mut copy = Self::with_device(Arc::clone(self.context()), Arc::clone(self.queue()))
            .with_seed(self.seed)
            .with_coulomb_constant(self.coulomb_constant);

        copy.ensemble = self.ensemble.clone();
        copy.configure(
            self.trap.clone(),
            self.damping(),
            Some(self.recoil_velocity),
            Some(self.scatter_rate),
        );
        for source in &self.auxiliary {
            copy.add_acceleration(source.clone());
        }
        copy.time = self.time;
        copy.device = self
            .device
            .as_ref()
            .map(|device| DeviceEnsemble::allocate(device.len()));
        copy
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("particles", &self.ensemble.count())
            .field("time", &self.time)
            .field("trap", &self.trap)
            .field("sources", &self.accelerations.names())
            .field("initialized", &self.is_initialized())
            .finish_non_exhaustive()
    }
}

fn radial_direction(x: Scalar, y: Scalar) -> Option<(Scalar, Scalar)> {
    let radius = x.hypot(y);
    (radius > 0.0).then(|| (x / radius, y / radius))
}

fn azimuthal_direction(x: Scalar, y: Scalar) -> Option<(Scalar, Scalar)> {
    radial_direction(x, y).map(|(ux, uy)| (-uy, ux))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::ensemble::Particle;
    use rand_chacha::{ChaCha8Rng, rand_core::SeedableRng};

    fn simulation(particles: impl IntoIterator<Item = Particle>) -> Simulation {
        let context = Arc::new(ComputeContext::with_threads(2).with_work_group_size(4));
        let queue = Arc::new(CommandQueue::new(Arc::clone(&context)));
        let mut simulation = Simulation::with_device(context, queue).with_seed(17);
        simulation.ensemble_mut().extend(particles);
        simulation
    }

    #[test]
    fn test_configure_builds_default_sources() {
        let mut sim = simulation([]);
        sim.configure(
            TrapConfiguration::default(),
            DampingCoefficients::NONE,
            None,
            None,
        );
        assert_eq!(sim.accelerations().names(), vec!["coulomb", "trap"]);
        assert_eq!(sim.recoil_velocity(), DEFAULT_RECOIL_VELOCITY);

        sim.configure(
            TrapConfiguration::default(),
            DampingCoefficients::NONE,
            Some(0.2),
            Some(1.0e4),
        );
        assert_eq!(sim.accelerations().names(), vec!["coulomb", "trap", "heating"]);
        assert!(sim.accelerations().has_stochastic_sources());
    }

    #[test]
    fn test_configure_clears_auxiliary_sources_and_time() {
        let mut sim = simulation([Particle::at_rest(Vector::X, 1.0, 1.0)]);
        sim.configure(
            TrapConfiguration::rotation_only(1.0),
            DampingCoefficients::NONE,
            None,
            None,
        );
        sim.add_acceleration(FrictionAcceleration::new(0.1));
        sim.initialize().unwrap();
        sim.advance(0.1, 3).unwrap();
        assert!(sim.time() > 0.0);
        assert_eq!(sim.accelerations().len(), 3);

        sim.configure(
            TrapConfiguration::rotation_only(1.0),
            DampingCoefficients::NONE,
            None,
            None,
        );
        assert_eq!(sim.time(), 0.0);
        assert_eq!(sim.accelerations().len(), 2);
    }

    #[test]
    fn test_advance_requires_initialize() {
        let mut sim = simulation([Particle::at_rest(Vector::X, 1.0, 1.0)]);
        assert_eq!(sim.advance(1.0e-3, 1), Err(SimulationError::NotInitialized));
        assert_eq!(sim.time(), 0.0);
    }

    #[test]
    fn test_zero_steps_is_noop() {
        let mut sim = simulation([Particle::at_rest(Vector::X, 1.0, 1.0)]);
        sim.initialize().unwrap();
        let before = sim.ensemble().clone();
        sim.advance(1.0e-3, 0).unwrap();
        assert_eq!(sim.time(), 0.0);
        assert_eq!(sim.ensemble(), &before);
    }

    #[test]
    fn test_spin_up_sets_rigid_rotation() {
        let mut sim = simulation([
            Particle::at_rest(Vector::new(0.0, 2.0, 0.0), 1.0, 1.0),
            Particle::at_rest(Vector::new(0.0, 0.0, 1.0), 1.0, 1.0),
        ]);
        sim.trap_configuration_mut().omega = 3.0;
        sim.spin_up();

        assert!((sim.ensemble().vx()[0] + 6.0).abs() < 1e-12);
        assert!(sim.ensemble().vy()[0].abs() < 1e-12);
        assert_eq!(sim.ensemble().vx()[1], 0.0);
        assert!((sim.angular_velocities()[0] - 6.0).abs() < 1e-12);
        assert!(sim.radial_velocities()[0].abs() < 1e-12);
    }

    #[test]
    fn test_projections_on_axis_are_zero() {
        let sim = simulation([Particle {
            velocity: Vector::new(1.0, 1.0, 1.0),
            ..Particle::at_rest(Vector::new(0.0, 0.0, 3.0), 1.0, 1.0)
        }]);
        assert_eq!(sim.radii(), vec![0.0]);
        assert_eq!(sim.radial_velocities(), vec![0.0]);
        assert_eq!(sim.angular_velocities(), vec![0.0]);
    }

    #[test]
    fn test_kinetic_energy_and_mean_radius() {
        let sim = simulation([
            Particle {
                velocity: Vector::new(2.0, 0.0, 0.0),
                ..Particle::at_rest(Vector::new(3.0, 4.0, 0.0), 1.0, 0.5)
            },
            Particle::at_rest(Vector::new(1.0, 0.0, 0.0), 1.0, 2.0),
        ]);
        assert_eq!(sim.kinetic_energy(), 1.0);
        assert_eq!(sim.mean_radius(), 3.0);
        assert_eq!(simulation([]).mean_radius(), 0.0);
    }

    #[test]
    fn test_rotating_frame_coordinates_follow_time() {
        let mut sim = simulation([Particle::at_rest(Vector::X, 1.0, 1.0)]);
        sim.configure(
            TrapConfiguration::rotation_only(std::f64::consts::FRAC_PI_2),
            DampingCoefficients::NONE,
            None,
            None,
        );
        sim.initialize().unwrap();

        let (x0, y0) = sim.rotating_frame_coordinates();
        assert_eq!((x0[0], y0[0]), (1.0, 0.0));

        sim.advance(0.01, 100).unwrap();
        let (x1, y1) = sim.rotating_frame_coordinates();
        assert!((x1[0] - 1.0).abs() < 1e-9);
        assert!(y1[0].abs() < 1e-9);
    }

    #[test]
    fn test_clone_replays_configuration() {
        let mut sim = simulation([Particle::at_rest(Vector::X, 1.0, 1.0)]);
        sim.configure(
            TrapConfiguration::rotation_only(2.0),
            DampingCoefficients::new(0.5, 0.25),
            Some(0.3),
            Some(5.0),
        );
        sim.add_acceleration(FrictionAcceleration::new(0.1));
        sim.initialize().unwrap();
        sim.advance(0.01, 5).unwrap();

        let copy = sim.clone();
        assert!(Arc::ptr_eq(copy.queue(), sim.queue()));
        assert_eq!(copy.time(), sim.time());
        assert_eq!(copy.seed(), sim.seed());
        assert_eq!(copy.damping(), sim.damping());
        assert_eq!(copy.accelerations(), sim.accelerations());
        assert_eq!(copy.ensemble(), sim.ensemble());
        assert!(copy.is_initialized());
    }

    #[test]
    fn test_from_config_seeds_and_initializes() {
        let mut config = SimulationConfig::default();
        config.physics.particle_count = 12;
        config.physics.friction_coefficient = 1.0;
        let mut rng = ChaCha8Rng::seed_from_u64(3);

        let sim = Simulation::from_config(&config, &mut rng).unwrap();
        assert_eq!(sim.ensemble().count(), 12);
        assert!(sim.is_initialized());
        assert_eq!(sim.accelerations().names(), vec!["coulomb", "trap", "friction"]);
    }
}
