use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bevy::prelude::*;
use liquid3d::manipulators::ManipulatorData;
use liquid3d::solver::{
    BackendError, BackendResult, BufferDesc, BufferHandle, CameraKey, CameraView, ComputeBackend,
    CpuBackend, InstanceId, Kernel, LiquidSimulation, ParameterBlock, ReadbackConfig,
    SimulationState,
};
use liquid3d::{BakedState, Emitter, LiquidConfig, LiquidError, Manipulator, ManipulatorId};

fn small_config() -> LiquidConfig {
    LiquidConfig {
        container_size: Vec3::splat(2.0),
        grid_resolution: 16,
        max_num_particles: 4096,
        ..LiquidConfig::default()
    }
}

fn emitter_sim() -> LiquidSimulation {
    let mut sim = LiquidSimulation::new(small_config(), Box::new(CpuBackend::new(7)), 0);
    sim.add_manipulator(
        Manipulator::emitter(0, Emitter::default()).with_transform(
            Vec3::ZERO,
            Quat::IDENTITY,
            Vec3::splat(0.5),
        ),
    );
    sim
}

fn advance(sim: &mut LiquidSimulation, frames: usize) {
    for _ in 0..frames {
        sim.begin_frame();
        sim.step(1.0 / 60.0).unwrap();
        sim.update_readback().unwrap();
    }
}

fn camera_view() -> CameraView {
    CameraView {
        view: Mat4::look_at_rh(Vec3::new(0.0, 1.0, 4.0), Vec3::ZERO, Vec3::Y),
        projection: Mat4::perspective_rh(1.0, 16.0 / 9.0, 0.1, 100.0),
        position: Vec3::new(0.0, 1.0, 4.0),
        resolution: UVec2::new(1920, 1080),
    }
}

/// CPU backend that fails one kernel a set number of times and counts the
/// instances it holds
struct FailingBackend {
    inner: CpuBackend,
    kernel: Kernel,
    failures_left: Arc<AtomicUsize>,
    live_instances: Arc<AtomicUsize>,
}

impl FailingBackend {
    fn new(kernel: Kernel, failures: usize) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let failures_left = Arc::new(AtomicUsize::new(failures));
        let live_instances = Arc::new(AtomicUsize::new(0));
        let backend = Self {
            inner: CpuBackend::new(0),
            kernel,
            failures_left: failures_left.clone(),
            live_instances: live_instances.clone(),
        };
        (backend, failures_left, live_instances)
    }
}

impl ComputeBackend for FailingBackend {
    fn name(&self) -> &str {
        "failing-cpu"
    }

    fn create_instance(&mut self, instance: InstanceId) -> BackendResult<()> {
        self.inner.create_instance(instance)?;
        self.live_instances.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn allocate_buffer(&mut self, instance: InstanceId, desc: BufferDesc) -> BackendResult<BufferHandle> {
        self.inner.allocate_buffer(instance, desc)
    }

    fn write_buffer(&mut self, handle: BufferHandle, offset: usize, data: &[u8]) -> BackendResult<()> {
        self.inner.write_buffer(handle, offset, data)
    }

    fn read_buffer(&self, handle: BufferHandle) -> BackendResult<Vec<u8>> {
        self.inner.read_buffer(handle)
    }

    fn upload_parameters(&mut self, instance: InstanceId, block: ParameterBlock) -> BackendResult<()> {
        self.inner.upload_parameters(instance, block)
    }

    fn dispatch(&mut self, instance: InstanceId, kernel: Kernel) -> BackendResult<()> {
        if kernel == self.kernel
            && self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(BackendError::NotReady {
                kernel,
                reason: "device lost".into(),
            });
        }
        self.inner.dispatch(instance, kernel)
    }

    fn draw(&mut self, instance: InstanceId, camera: u32) -> BackendResult<()> {
        self.inner.draw(instance, camera)
    }

    fn configure_readback(&mut self, instance: InstanceId, config: ReadbackConfig) -> BackendResult<()> {
        self.inner.configure_readback(instance, config)
    }

    fn request_readback(&mut self, instance: InstanceId) -> BackendResult<()> {
        self.inner.request_readback(instance)
    }

    fn poll_readback(&mut self, instance: InstanceId) -> BackendResult<Option<Vec<i32>>> {
        self.inner.poll_readback(instance)
    }

    fn current_affine_index(&self, instance: InstanceId) -> BackendResult<usize> {
        self.inner.current_affine_index(instance)
    }

    fn release_instance(&mut self, instance: InstanceId) -> BackendResult<()> {
        self.inner.release_instance(instance)?;
        self.live_instances.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[test]
fn init_without_emitter_or_baked_state_fails_cleanly() {
    let mut sim = LiquidSimulation::new(small_config(), Box::new(CpuBackend::new(0)), 3);
    sim.add_manipulator(Manipulator::void(0));

    assert!(matches!(sim.init(), Err(LiquidError::Config(_))));
    assert_eq!(sim.state(), SimulationState::Uninitialized);
    assert!(sim.has_manipulator(ManipulatorId(0)));

    // still retriable once the missing piece is added
    sim.add_manipulator(Manipulator::emitter(1, Emitter::default()));
    sim.init().unwrap();
    assert_eq!(sim.state(), SimulationState::Initialized);
}

#[test]
fn emitters_fill_the_store_and_report_counts() {
    let mut sim = emitter_sim();
    sim.init().unwrap();
    advance(&mut sim, 4);

    let count = sim.active_particle_count();
    assert!(count > 0);
    assert!(count <= sim.particles().capacity());
    assert_eq!(sim.simulation_frame(), 4);

    let created = sim
        .manipulators()
        .find_map(|m| match &m.data {
            ManipulatorData::Emitter(emitter) => Some(emitter.created_particles_total),
            _ => None,
        })
        .unwrap();
    assert_eq!(created as usize, count);
}

#[test]
fn detector_counts_particles_inside_its_volume() {
    let mut sim = emitter_sim();
    sim.add_manipulator(Manipulator::detector(5).with_transform(
        Vec3::ZERO,
        Quat::IDENTITY,
        Vec3::splat(1.5),
    ));
    sim.init().unwrap();
    advance(&mut sim, 1);

    let inside = sim
        .manipulators()
        .find_map(|m| match &m.data {
            ManipulatorData::Detector(detector) => Some(detector.particles_inside),
            _ => None,
        })
        .unwrap();
    assert!(inside > 0);
    assert_eq!(inside as usize, sim.active_particle_count());
}

#[test]
fn stop_is_idempotent_and_allows_reinit() {
    let mut sim = emitter_sim();
    sim.stop();
    assert_eq!(sim.state(), SimulationState::Uninitialized);

    sim.init().unwrap();
    advance(&mut sim, 2);
    sim.stop();
    sim.stop();
    assert_eq!(sim.state(), SimulationState::Uninitialized);
    assert_eq!(sim.simulation_frame(), 0);
    assert_eq!(sim.active_particle_count(), 0);
    assert!(sim.render_buffers().is_none());
    assert!(!sim.particles().is_allocated());
    assert_eq!(sim.backend().name(), "cpu");

    sim.init().unwrap();
    assert!(sim.render_buffers().is_some());
    assert!(sim.scratch_buffers().is_some());
    let statistics = sim.statistics_buffer().unwrap();
    assert_eq!(statistics.size_bytes, 8 * 4);
}

#[test]
fn baked_liquid_restarts_from_its_baked_state() {
    let baked = BakedState::at_rest(vec![Vec3::new(0.1, -0.5, 0.0), Vec3::new(-0.2, -0.5, 0.3)]);
    let mut sim = LiquidSimulation::new(small_config(), Box::new(CpuBackend::new(0)), 0);
    assert!(sim.set_baked_state(baked.clone()));
    sim.init().unwrap();
    assert_eq!(sim.active_particle_count(), 2);

    advance(&mut sim, 2);
    sim.stop();
    assert_eq!(sim.state(), SimulationState::Uninitialized);

    sim.init().unwrap();
    assert_eq!(sim.active_particle_count(), 2);
    assert_eq!(sim.serialize_current_state().unwrap(), baked);
}

#[test]
fn backend_failure_during_init_releases_everything() {
    let (backend, failures_left, live_instances) =
        FailingBackend::new(Kernel::RegisterSolverBuffers, 1);
    let mut sim = LiquidSimulation::new(small_config(), Box::new(backend), 0);
    sim.set_baked_state(BakedState::at_rest(vec![Vec3::new(0.0, -0.5, 0.0); 8]));
    sim.add_manipulator(Manipulator::detector(1));

    assert!(matches!(sim.init(), Err(LiquidError::Backend(_))));
    assert_eq!(sim.state(), SimulationState::Uninitialized);
    assert_eq!(live_instances.load(Ordering::SeqCst), 0);
    assert!(!sim.particles().is_allocated());
    assert!(sim.scratch_buffers().is_none());
    assert!(sim.statistics_buffer().is_none());
    assert!(sim.render_buffers().is_none());
    assert_eq!(sim.active_particle_count(), 0);
    assert!(sim.has_manipulator(ManipulatorId(1)));

    sim.init().unwrap();
    assert_eq!(failures_left.load(Ordering::SeqCst), 0);
    assert_eq!(live_instances.load(Ordering::SeqCst), 1);
    assert_eq!(sim.active_particle_count(), 8);
    assert_eq!(sim.registry().len(), 1);

    sim.stop();
    assert_eq!(live_instances.load(Ordering::SeqCst), 0);
}

#[test]
fn stepping_an_uninitialized_liquid_does_nothing() {
    let mut sim = emitter_sim();
    sim.step(1.0 / 60.0).unwrap();
    assert_eq!(sim.simulation_frame(), 0);
    assert!(!sim.update_readback().unwrap());
}

#[test]
fn sub_steps_follow_the_iteration_count() {
    let mut config = small_config();
    config.iterations_per_frame = 3;
    let mut sim = LiquidSimulation::new(config, Box::new(CpuBackend::new(0)), 0);
    sim.add_manipulator(Manipulator::emitter(0, Emitter::default()));
    sim.init().unwrap();

    sim.step(0.03).unwrap();
    assert_eq!(sim.simulation_frame(), 3);
    // 40 sim units per second, split over 3 sub-steps
    assert!((sim.simulation_time() - 1.2).abs() < 1e-4);
}

#[test]
fn baked_state_survives_a_serialize_round_trip() {
    let baked = BakedState::new(
        vec![Vec3::new(0.1, -0.2, 0.3), Vec3::new(-0.4, 0.0, 0.25)],
        vec![[1, 2], [3, -4]],
    )
    .unwrap();
    let mut sim = LiquidSimulation::new(small_config(), Box::new(CpuBackend::new(0)), 0);
    assert!(sim.set_baked_state(baked.clone()));
    sim.init().unwrap();

    assert_eq!(sim.active_particle_count(), 2);
    assert_eq!(sim.serialize_current_state().unwrap(), baked);
    assert!(!sim.set_baked_state(BakedState::default()));
}

#[test]
fn oversized_baked_state_starts_empty() {
    let mut config = small_config();
    config.max_num_particles = 1;
    let baked = BakedState::at_rest(vec![Vec3::ZERO; 2]);
    let mut sim = LiquidSimulation::new(config, Box::new(CpuBackend::new(0)), 0);
    sim.set_baked_state(baked);
    sim.init().unwrap();
    assert_eq!(sim.active_particle_count(), 0);
}

#[test]
fn render_needs_camera_parameters_from_this_frame() {
    let mut sim = emitter_sim();
    let key = CameraKey(11);
    assert_eq!(sim.update_camera(key, &camera_view()).unwrap(), None);

    sim.init().unwrap();
    sim.begin_frame();
    assert!(!sim.render(key).unwrap());

    assert_eq!(sim.update_camera(key, &camera_view()).unwrap(), Some(0));
    assert!(sim.cameras().get(key).unwrap().registered);
    assert!(sim.render(key).unwrap());

    sim.begin_frame();
    assert!(!sim.render(key).unwrap());
    assert_eq!(sim.update_camera(CameraKey(12), &camera_view()).unwrap(), Some(1));
}

#[test]
fn footprint_is_known_before_init() {
    let sim = emitter_sim();
    let footprint = sim.footprint();
    assert!(footprint.particles > 0);
    assert!(footprint.grid > 0);
    assert_eq!(footprint.colliders, 0);
    assert_eq!(
        footprint.total(),
        footprint.particles + footprint.grid + footprint.colliders
    );
}

#[test]
fn moving_manipulators_after_init_is_allowed() {
    let mut sim = emitter_sim();
    sim.init().unwrap();
    let emitter = sim.manipulator_mut(ManipulatorId(0)).unwrap();
    emitter.position = Vec3::new(0.2, 0.0, 0.0);
    advance(&mut sim, 1);
    assert!(sim.active_particle_count() > 0);
}
