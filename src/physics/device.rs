//! Compute device for the integration engine
//!
//! The device is a data-parallel worker pool with its own memory. Host arrays
//! are copied into [`DeviceEnsemble`] buffers, kernels run chunked across the
//! pool, and results are copied back only after a queue barrier.
//!
//! ## Queue model
//!
//! A [`CommandQueue`] executes commands in submission order. Work is submitted
//! through a [`QueueSession`], an exclusive guard over the queue; two sessions
//! on the same queue never overlap, so simulations sharing a queue serialize.
//!
//! A failing kernel latches its error. Later submissions in the same session
//! are skipped and report the latched fault, and [`QueueSession::finish`]
//! surfaces it at the barrier. Dropping a session drains the queue on every
//! exit path.

use crate::error::SimulationError;
use crate::physics::ensemble::ParticleEnsemble;
use crate::physics::math::{Scalar, Vector};
use bevy::log::{debug, trace, warn};
use bevy::tasks::{TaskPool, TaskPoolBuilder};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Data-parallel execution context shared by every simulation on a device.
pub struct ComputeContext {
    pool: TaskPool,
    threads: usize,
    work_group_size: usize,
}

impl ComputeContext {
    /// Particles handled by one task unless configured otherwise
    pub const DEFAULT_WORK_GROUP_SIZE: usize = 256;

    /// Context using every available core
    pub fn new() -> Self {
        Self::with_threads(bevy::tasks::available_parallelism())
    }

    pub fn with_threads(threads: usize) -> Self {
        let threads = threads.max(1);
        let pool = TaskPoolBuilder::new()
            .num_threads(threads)
            .thread_name("iontrap compute".to_string())
            .build();

        Self {
            pool,
            threads,
            work_group_size: Self::DEFAULT_WORK_GROUP_SIZE,
        }
    }

    /// Set the number of particles each task processes.
    pub fn with_work_group_size(mut self, work_group_size: usize) -> Self {
        self.work_group_size = work_group_size.max(1);
        self
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    pub fn work_group_size(&self) -> usize {
        self.work_group_size
    }

    /// Run `kernel` over consecutive chunks of `output` in parallel.
    ///
    /// The kernel receives the index of the chunk's first element. Returns
    /// after every chunk has completed; the first chunk error wins.
    pub fn run_chunks<A, F>(&self, output: &mut [A], kernel: F) -> Result<(), SimulationError>
    where
        A: Send,
        F: Fn(usize, &mut [A]) -> Result<(), SimulationError> + Sync,
    {
        let chunk_size = self.work_group_size;
        let kernel = &kernel;
        self.pool
            .scope(|scope| {
                for (index, chunk) in output.chunks_mut(chunk_size).enumerate() {
                    scope.spawn(async move { kernel(index * chunk_size, chunk) });
                }
            })
            .into_iter()
            .collect()
    }

    /// Run `kernel` over matching chunks of two equally sized buffers.
    pub fn run_chunk_pairs<A, B, F>(
        &self,
        first: &mut [A],
        second: &mut [B],
        kernel: F,
    ) -> Result<(), SimulationError>
    where
        A: Send,
        B: Send,
        F: Fn(usize, &mut [A], &mut [B]) -> Result<(), SimulationError> + Sync,
    {
        if first.len() != second.len() {
            return Err(SimulationError::device(
                "chunk_pairs",
                format!(
                    "paired buffers differ in length ({} vs {})",
                    first.len(),
                    second.len()
                ),
            ));
        }

        let chunk_size = self.work_group_size;
        let kernel = &kernel;
        self.pool
            .scope(|scope| {
                for (index, (a, b)) in first
                    .chunks_mut(chunk_size)
                    .zip(second.chunks_mut(chunk_size))
                    .enumerate()
                {
                    scope.spawn(async move { kernel(index * chunk_size, a, b) });
                }
            })
            .into_iter()
            .collect()
    }
}

impl Default for ComputeContext {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ComputeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeContext")
            .field("threads", &self.threads)
            .field("work_group_size", &self.work_group_size)
            .finish_non_exhaustive()
    }
}

/// Read-only snapshot of particle state handed to acceleration sources
#[derive(Debug, Clone, Copy)]
pub struct EnsembleState<'a> {
    pub positions: &'a [Vector],
    pub velocities: &'a [Vector],
    pub charges: &'a [Scalar],
    pub masses: &'a [Scalar],
}

impl EnsembleState<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Check that every buffer matches the position buffer's length.
    pub fn validate(&self) -> Result<usize, SimulationError> {
        let expected = self.len();
        for (array, found) in [
            ("velocities", self.velocities.len()),
            ("charges", self.charges.len()),
            ("masses", self.masses.len()),
        ] {
            if found != expected {
                return Err(SimulationError::DimensionMismatch {
                    array,
                    expected,
                    found,
                });
            }
        }
        Ok(expected)
    }
}

/// Device-resident particle buffers sized for one ensemble
#[derive(Debug, Clone, Default)]
pub struct DeviceEnsemble {
    pub(crate) positions: Vec<Vector>,
    pub(crate) velocities: Vec<Vector>,
    pub(crate) charges: Vec<Scalar>,
    pub(crate) masses: Vec<Scalar>,
    pub(crate) accelerations: Vec<Vector>,
    checkpoint_positions: Vec<Vector>,
    checkpoint_velocities: Vec<Vector>,
}

impl DeviceEnsemble {
    pub fn allocate(count: usize) -> Self {
        Self {
            positions: vec![Vector::ZERO; count],
            velocities: vec![Vector::ZERO; count],
            charges: vec![0.0; count],
            masses: vec![0.0; count],
            accelerations: vec![Vector::ZERO; count],
            checkpoint_positions: vec![Vector::ZERO; count],
            checkpoint_velocities: vec![Vector::ZERO; count],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn state(&self) -> EnsembleState<'_> {
        EnsembleState {
            positions: &self.positions,
            velocities: &self.velocities,
            charges: &self.charges,
            masses: &self.masses,
        }
    }

    pub fn positions(&self) -> &[Vector] {
        &self.positions
    }

    pub fn velocities(&self) -> &[Vector] {
        &self.velocities
    }

    /// Record positions and velocities so a failed sub-step can be undone
    pub(crate) fn checkpoint(&mut self) {
        self.checkpoint_positions.copy_from_slice(&self.positions);
        self.checkpoint_velocities.copy_from_slice(&self.velocities);
    }

    /// Return positions and velocities to the last checkpoint
    pub(crate) fn restore(&mut self) {
        self.positions.copy_from_slice(&self.checkpoint_positions);
        self.velocities.copy_from_slice(&self.checkpoint_velocities);
    }

    fn check_host(&self, host: &ParticleEnsemble) -> Result<(), SimulationError> {
        let count = host.validate()?;
        if count != self.len() {
            return Err(SimulationError::DimensionMismatch {
                array: "device buffers",
                expected: self.len(),
                found: count,
            });
        }
        Ok(())
    }
}

/// Bytes moved per particle by a full host/device transfer
const TRANSFER_BYTES_PER_PARTICLE: u64 = 8 * size_of::<Scalar>() as u64;
const READBACK_BYTES_PER_PARTICLE: u64 = 6 * size_of::<Scalar>() as u64;

/// Counters accumulated by a command queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueProfile {
    pub kernels_dispatched: u64,
    pub bytes_uploaded: u64,
    pub bytes_downloaded: u64,
    pub barriers: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    profile: QueueProfile,
    pending: usize,
    fault: Option<SimulationError>,
}

/// In-order command queue on a [`ComputeContext`].
#[derive(Debug)]
pub struct CommandQueue {
    context: Arc<ComputeContext>,
    state: Mutex<QueueState>,
}

impl CommandQueue {
    pub fn new(context: Arc<ComputeContext>) -> Self {
        Self {
            context,
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn context(&self) -> &Arc<ComputeContext> {
        &self.context
    }

    /// Acquire the queue for a batch of transfers and kernels.
    ///
    /// Blocks while another session holds the queue.
    pub fn begin(&self) -> QueueSession<'_> {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| {
            warn!("Command queue recovered after a panic inside a previous session");
            let mut state = poisoned.into_inner();
            state.pending = 0;
            state.fault = None;
            state
        });
        state.pending = 0;

        QueueSession {
            context: &self.context,
            state,
        }
    }

    /// Snapshot of the profiling counters.
    ///
    /// Blocks while a session holds the queue.
    pub fn profile(&self) -> QueueProfile {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .profile
    }
}

/// Exclusive handle for submitting work to a [`CommandQueue`]
pub struct QueueSession<'q> {
    context: &'q ComputeContext,
    state: MutexGuard<'q, QueueState>,
}

impl QueueSession<'_> {
    pub fn context(&self) -> &ComputeContext {
        self.context
    }

    pub fn profile(&self) -> QueueProfile {
        self.state.profile
    }

    /// Commands submitted since the last barrier
    pub fn pending(&self) -> usize {
        self.state.pending
    }

    fn submit<F>(&mut self, kernel: &'static str, command: F) -> Result<(), SimulationError>
    where
        F: FnOnce(&ComputeContext) -> Result<(), SimulationError>,
    {
        if let Some(fault) = &self.state.fault {
            trace!("Skipping `{kernel}` after latched fault");
            return Err(fault.clone());
        }

        self.state.pending += 1;
        let context = self.context;
        if let Err(error) = command(context) {
            self.state.fault = Some(error.clone());
            return Err(error);
        }
        Ok(())
    }

    /// Copy host particle state into the device buffers.
    pub fn upload(
        &mut self,
        host: &ParticleEnsemble,
        device: &mut DeviceEnsemble,
    ) -> Result<(), SimulationError> {
        device.check_host(host)?;

        self.submit("upload", |context| {
            let [x, y, z] = host.positions();
            let [vx, vy, vz] = host.velocities();
            context.run_chunk_pairs(
                &mut device.positions,
                &mut device.velocities,
                |offset, positions, velocities| {
                    for (i, (position, velocity)) in
                        positions.iter_mut().zip(velocities.iter_mut()).enumerate()
                    {
                        let p = offset + i;
                        *position = Vector::new(x[p], y[p], z[p]);
                        *velocity = Vector::new(vx[p], vy[p], vz[p]);
                    }
                    Ok(())
                },
            )?;
            device.charges.copy_from_slice(host.charges());
            device.masses.copy_from_slice(host.masses());
            Ok(())
        })?;

        self.state.profile.bytes_uploaded += TRANSFER_BYTES_PER_PARTICLE * device.len() as u64;
        Ok(())
    }

    /// Run a kernel in queue order.
    pub fn dispatch<F>(&mut self, kernel: &'static str, command: F) -> Result<(), SimulationError>
    where
        F: FnOnce(&ComputeContext) -> Result<(), SimulationError>,
    {
        self.submit(kernel, command)?;
        self.state.profile.kernels_dispatched += 1;
        Ok(())
    }

    /// Block until every submitted command has completed.
    ///
    /// Returns the fault latched by any command since the last barrier.
    pub fn finish(&mut self) -> Result<(), SimulationError> {
        self.state.profile.barriers += 1;
        let completed = std::mem::take(&mut self.state.pending);
        trace!("Queue barrier after {completed} commands");

        match self.state.fault.take() {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }

    /// Copy positions and velocities back into host memory.
    ///
    /// Must follow a successful [`finish`](Self::finish); reading back while
    /// commands are pending is rejected.
    pub fn download(
        &mut self,
        device: &DeviceEnsemble,
        host: &mut ParticleEnsemble,
    ) -> Result<(), SimulationError> {
        if self.state.pending > 0 {
            return Err(SimulationError::device(
                "download",
                format!(
                    "{} commands are still pending; read-back requires a queue barrier",
                    self.state.pending
                ),
            ));
        }
        device.check_host(host)?;

        let [x, y, z] = host.positions_mut();
        for (i, position) in device.positions.iter().enumerate() {
            x[i] = position.x;
            y[i] = position.y;
            z[i] = position.z;
        }
        let [vx, vy, vz] = host.velocities_mut();
        for (i, velocity) in device.velocities.iter().enumerate() {
            vx[i] = velocity.x;
            vy[i] = velocity.y;
            vz[i] = velocity.z;
        }

        self.state.profile.bytes_downloaded += READBACK_BYTES_PER_PARTICLE * device.len() as u64;
        Ok(())
    }
}

impl Drop for QueueSession<'_> {
    fn drop(&mut self) {
        if self.state.pending == 0 && self.state.fault.is_none() {
            return;
        }

        if let Err(fault) = self.finish() {
            warn!("Discarding device fault on session release: {fault}");
        }
        debug!("Drained command queue on session release");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::physics::ensemble::Particle;

    fn small_context() -> Arc<ComputeContext> {
        Arc::new(ComputeContext::with_threads(2).with_work_group_size(3))
    }

    fn sample_ensemble(count: usize) -> ParticleEnsemble {
        ParticleEnsemble::from_particles((0..count).map(|i| Particle {
            position: Vector::new(i as Scalar, 2.0 * i as Scalar, -(i as Scalar)),
            velocity: Vector::new(0.5, -0.5, i as Scalar),
            charge: 1.0,
            mass: 2.0,
        }))
    }

    #[test]
    fn test_run_chunks_covers_every_element() {
        let context = small_context();
        let mut output = vec![0usize; 10];

        context
            .run_chunks(&mut output, |offset, chunk| {
                for (i, value) in chunk.iter_mut().enumerate() {
                    *value = offset + i;
                }
                Ok(())
            })
            .unwrap();

        assert_eq!(output, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_run_chunks_reports_kernel_error() {
        let context = small_context();
        let mut output = vec![0.0; 7];

        let result = context.run_chunks(&mut output, |offset, _| {
            if offset == 3 {
                Err(SimulationError::device("test", "chunk failed"))
            } else {
                Ok(())
            }
        });

        assert_eq!(result, Err(SimulationError::device("test", "chunk failed")));
    }

    #[test]
    fn test_run_chunk_pairs_rejects_mismatched_buffers() {
        let context = small_context();
        let result = context.run_chunk_pairs(&mut [0.0; 3], &mut [0.0; 4], |_, _, _| Ok(()));
        assert!(matches!(
            result,
            Err(SimulationError::DeviceExecutionFailure { .. })
        ));
    }

    #[test]
    fn test_upload_then_download_restores_host() {
        let queue = CommandQueue::new(small_context());
        let host = sample_ensemble(8);
        let mut device = DeviceEnsemble::allocate(8);

        let mut session = queue.begin();
        session.upload(&host, &mut device).unwrap();
        assert_eq!(device.positions()[5], Vector::new(5.0, 10.0, -5.0));
        assert_eq!(device.state().masses, &[2.0; 8]);

        session.finish().unwrap();
        let mut copy = sample_ensemble(8);
        copy.vx_mut().fill(0.0);
        session.download(&device, &mut copy).unwrap();
        assert_eq!(copy, host);
    }

    #[test]
    fn test_upload_rejects_resized_host() {
        let queue = CommandQueue::new(small_context());
        let mut device = DeviceEnsemble::allocate(4);
        let mut session = queue.begin();

        let result = session.upload(&sample_ensemble(5), &mut device);
        assert_eq!(
            result,
            Err(SimulationError::DimensionMismatch {
                array: "device buffers",
                expected: 4,
                found: 5,
            })
        );
    }

    #[test]
    fn test_download_requires_barrier() {
        let queue = CommandQueue::new(small_context());
        let mut host = sample_ensemble(2);
        let mut device = DeviceEnsemble::allocate(2);

        let mut session = queue.begin();
        session.upload(&host, &mut device).unwrap();
        assert_eq!(session.pending(), 1);
        assert!(session.download(&device, &mut host).is_err());

        session.finish().unwrap();
        assert_eq!(session.pending(), 0);
        assert!(session.download(&device, &mut host).is_ok());
    }

    #[test]
    fn test_fault_latches_until_barrier() {
        let queue = CommandQueue::new(small_context());
        let mut session = queue.begin();
        let mut ran_after_fault = false;

        let fault = SimulationError::device("bad_kernel", "out of bounds");
        assert_eq!(
            session.dispatch("bad_kernel", |_| Err(fault.clone())),
            Err(fault.clone())
        );
        assert_eq!(
            session.dispatch("next_kernel", |_| {
                ran_after_fault = true;
                Ok(())
            }),
            Err(fault.clone())
        );
        assert!(!ran_after_fault, "kernels after a fault must not run");

        assert_eq!(session.finish(), Err(fault));
        assert!(session.dispatch("recovered", |_| Ok(())).is_ok());
        session.finish().unwrap();
    }

    #[test]
    fn test_profile_counts_work() {
        let queue = CommandQueue::new(small_context());
        let host = sample_ensemble(3);
        let mut device = DeviceEnsemble::allocate(3);

        {
            let mut session = queue.begin();
            session.upload(&host, &mut device).unwrap();
            session.dispatch("noop", |_| Ok(())).unwrap();
            session.dispatch("noop", |_| Ok(())).unwrap();
            session.finish().unwrap();
        }

        let profile = queue.profile();
        assert_eq!(profile.kernels_dispatched, 2);
        assert_eq!(profile.barriers, 1);
        assert_eq!(profile.bytes_uploaded, 3 * 64);
        assert_eq!(profile.bytes_downloaded, 0);
    }

    #[test]
    fn test_dropped_session_is_drained() {
        let queue = CommandQueue::new(small_context());
        {
            let mut session = queue.begin();
            let _ = session.dispatch("failing", |_| Err(SimulationError::device("failing", "x")));
        }

        let mut session = queue.begin();
        assert_eq!(session.pending(), 0);
        assert!(session.dispatch("fresh", |_| Ok(())).is_ok());
        assert_eq!(queue_barriers(&session), 1);
    }

    fn queue_barriers(session: &QueueSession<'_>) -> u64 {
        session.profile().barriers
    }

    #[test]
    fn test_checkpoint_restore() {
        let mut device = DeviceEnsemble::allocate(2);
        device.positions[0] = Vector::X;
        device.checkpoint();
        device.positions[0] = Vector::Y;
        device.velocities[1] = Vector::Z;
        device.restore();

        assert_eq!(device.positions()[0], Vector::X);
        assert_eq!(device.velocities()[1], Vector::ZERO);
    }
}
