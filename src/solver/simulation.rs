//! Liquid simulation orchestrator
//!
//! Owns one liquid's host state and drives a [`ComputeBackend`] through the
//! `Uninitialized -> Initialized -> Stepping -> Initialized` lifecycle.
//! `stop` releases every backend resource and returns to `Uninitialized`.

use bevy::prelude::*;

use super::backend::{
    BackendResult, BufferDesc, BufferHandle, BufferKind, ComputeBackend, InstanceId, Kernel,
    ParameterBlock, ReadbackConfig,
};
use super::camera::{CameraKey, CameraTable, CameraView, RenderParams};
use super::params::{SimulationParams, compute_timestep};
use super::readback::{ReadbackBridge, ReadbackSnapshot};
use crate::config::{
    InitialState, LiquidConfig, RenderPipeline, STATISTICS_PER_MANIPULATOR, SolverParams,
};
use crate::core::baked_state::BakedState;
use crate::core::grid::{GridBuffers, GridLayout};
use crate::core::particle_store::{
    AFFINE_SLOTS, AffineBlock, ParticleBuffers, ParticleStore, SolverScratchBuffers, VELOCITY_SLOT,
};
use crate::error::{LiquidError, LiquidResult};
use crate::manipulators::registry::collider_footprint;
use crate::manipulators::{
    Manipulator, ManipulatorId, ManipulatorIndices, ManipulatorKind, ManipulatorRecord,
    ManipulatorRegistry, StatisticsContext,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SimulationState {
    Uninitialized,
    Initialized,
    /// Inside `step`, between the first and last sub-step
    Stepping,
}

#[derive(Clone, Copy, Debug)]
struct ManipulatorBuffers {
    records: BufferHandle,
    indices: BufferHandle,
    const_data: BufferHandle,
    statistics: BufferHandle,
}

/// Buffers a renderer binds to draw the liquid
#[derive(Clone, Copy, Debug)]
pub struct RenderBuffers {
    pub particles: ParticleBuffers,
    /// Affine buffer holding the latest state
    pub current_affine: BufferHandle,
    pub grid: GridBuffers,
}

/// Backend memory in bytes, in closed form
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MemoryFootprint {
    pub particles: u64,
    pub colliders: u64,
    pub grid: u64,
}

impl MemoryFootprint {
    pub fn total(&self) -> u64 {
        self.particles + self.colliders + self.grid
    }
}

pub struct LiquidSimulation {
    config: LiquidConfig,
    backend: Box<dyn ComputeBackend>,
    instance: InstanceId,
    state: SimulationState,
    running: bool,

    /// Manipulators added before init; the registry owns them afterwards
    pending: Vec<Manipulator>,
    registry: ManipulatorRegistry,
    baked_state: Option<BakedState>,

    particles: ParticleStore,
    grid: GridLayout,
    grid_buffers: Option<GridBuffers>,
    scratch_buffers: Option<SolverScratchBuffers>,
    manipulator_buffers: Option<ManipulatorBuffers>,

    cameras: CameraTable,
    readback: ReadbackBridge,
    params: SimulationParams,

    simulation_time: f32,
    simulation_frame: i32,
    host_frame: u64,
}

impl LiquidSimulation {
    pub fn new(mut config: LiquidConfig, backend: Box<dyn ComputeBackend>, instance: InstanceId) -> Self {
        config.validate();
        let particles = ParticleStore::new(config.max_num_particles);
        let grid = GridLayout::new(config.container_size, config.grid_resolution);
        let running = config.run_simulation;
        Self {
            config,
            backend,
            instance,
            state: SimulationState::Uninitialized,
            running,
            pending: Vec::new(),
            registry: ManipulatorRegistry::new(),
            baked_state: None,
            particles,
            grid,
            grid_buffers: None,
            scratch_buffers: None,
            manipulator_buffers: None,
            cameras: CameraTable::default(),
            readback: ReadbackBridge::default(),
            params: SimulationParams::default(),
            simulation_time: 0.0,
            simulation_frame: 0,
            host_frame: 0,
        }
    }

    pub fn instance(&self) -> InstanceId {
        self.instance
    }

    pub fn state(&self) -> SimulationState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state != SimulationState::Uninitialized
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn config(&self) -> &LiquidConfig {
        &self.config
    }

    pub fn backend(&self) -> &dyn ComputeBackend {
        self.backend.as_ref()
    }

    pub fn grid(&self) -> &GridLayout {
        &self.grid
    }

    pub fn particles(&self) -> &ParticleStore {
        &self.particles
    }

    pub fn registry(&self) -> &ManipulatorRegistry {
        &self.registry
    }

    pub fn cameras(&self) -> &CameraTable {
        &self.cameras
    }

    pub fn params(&self) -> &SimulationParams {
        &self.params
    }

    pub fn simulation_time(&self) -> f32 {
        self.simulation_time
    }

    pub fn simulation_frame(&self) -> i32 {
        self.simulation_frame
    }

    pub fn host_frame(&self) -> u64 {
        self.host_frame
    }

    /// Live particle count as of the latest readback
    pub fn active_particle_count(&self) -> usize {
        self.particles.active_count()
    }

    pub fn latest_readback(&self) -> Option<&ReadbackSnapshot> {
        self.readback.latest()
    }

    /// Advance the host frame counter. Readback and camera updates are
    /// tracked per host frame.
    pub fn begin_frame(&mut self) {
        self.host_frame += 1;
    }

    // ---- manipulators ----

    pub fn add_manipulator(&mut self, manipulator: Manipulator) -> bool {
        if self.is_initialized() {
            warn!(
                "Cannot add manipulator {:?} while liquid {} is initialized",
                manipulator.id, self.instance
            );
            return false;
        }
        if self.has_manipulator(manipulator.id) {
            warn!("Manipulator {:?} is already registered", manipulator.id);
            return false;
        }
        self.pending.push(manipulator);
        true
    }

    pub fn remove_manipulator(&mut self, id: ManipulatorId) -> Option<Manipulator> {
        if self.is_initialized() {
            warn!(
                "Cannot remove manipulator {:?} while liquid {} is initialized",
                id, self.instance
            );
            return None;
        }
        let index = self.pending.iter().position(|m| m.id == id)?;
        Some(self.pending.remove(index))
    }

    pub fn has_manipulator(&self, id: ManipulatorId) -> bool {
        self.manipulators().any(|m| m.id == id)
    }

    pub fn has_emitter(&self) -> bool {
        self.registry.has_kind(ManipulatorKind::Emitter)
            || self.pending.iter().any(|m| m.kind() == ManipulatorKind::Emitter)
    }

    /// Every manipulator, in registry order once initialized
    pub fn manipulators(&self) -> impl Iterator<Item = &Manipulator> {
        self.pending.iter().chain(self.registry.manipulators())
    }

    /// Transforms, enabled flags and shape parameters may change at any time;
    /// the set of manipulators may not
    pub fn manipulator_mut(&mut self, id: ManipulatorId) -> Option<&mut Manipulator> {
        if self.is_initialized() {
            self.registry.get_mut(id)
        } else {
            self.pending.iter_mut().find(|m| m.id == id)
        }
    }

    // ---- configuration ----

    pub fn set_baked_state(&mut self, baked: BakedState) -> bool {
        if self.is_initialized() {
            warn!("Baked state is only applied on init, liquid {} is running", self.instance);
            return false;
        }
        self.baked_state = Some(baked);
        true
    }

    pub fn set_solver_params(&mut self, mut solver: SolverParams) {
        solver.validate();
        self.config.solver = solver;
    }

    /// Container or resolution changes need fresh grid buffers, so they are
    /// rejected while initialized
    pub fn resize_grid(&mut self, container_size: Vec3, resolution: u32) -> bool {
        if self.is_initialized() {
            warn!("Cannot resize the grid of liquid {} while it is initialized", self.instance);
            return false;
        }
        self.config.container_size = container_size;
        self.config.grid_resolution = resolution;
        self.config.validate();
        self.grid
            .resize(self.config.container_size, self.config.grid_resolution);
        true
    }

    pub fn set_particle_capacity(&mut self, capacity: usize) -> bool {
        if self.is_initialized() {
            warn!("Particle capacity of liquid {} is fixed until stop", self.instance);
            return false;
        }
        self.config.max_num_particles = capacity;
        self.particles.set_capacity(capacity);
        true
    }

    // ---- lifecycle ----

    /// Allocate backend resources and register everything with the backend.
    /// A failure releases what was allocated and leaves the simulation
    /// uninitialized.
    pub fn init(&mut self) -> LiquidResult<()> {
        if self.is_initialized() {
            return Ok(());
        }

        let baked_configured = self.baked_state.is_some()
            || matches!(self.config.initial_state, InitialState::Baked { .. });
        if !self.has_emitter() && !baked_configured {
            return Err(LiquidError::Config(format!(
                "liquid {} needs at least one emitter or a baked initial state",
                self.instance
            )));
        }
        self.check_render_settings()?;

        let baked = self.resolve_baked_state();
        match self.try_init(baked.as_ref()) {
            Ok(()) => {
                info!(
                    "Initialized liquid {} on {}: {} manipulators, {} particles, grid {:?}",
                    self.instance,
                    self.backend.name(),
                    self.registry.len(),
                    self.particles.active_count(),
                    self.grid.dims
                );
                Ok(())
            }
            Err(err) => {
                error!("Failed to initialize liquid {}: {}", self.instance, err);
                self.release();
                Err(err.into())
            }
        }
    }

    fn check_render_settings(&self) -> LiquidResult<()> {
        let render = &self.config.render;
        if render.pipeline != RenderPipeline::HighDefinition {
            return Ok(());
        }
        let mut missing = Vec::new();
        if render.custom_light.is_none() {
            error!("The HD render pipeline needs a custom light");
            missing.push("custom light");
        }
        if render.reflection_probe.is_none() {
            error!("The HD render pipeline needs a reflection probe");
            missing.push("reflection probe");
        }
        if missing.is_empty() {
            return Ok(());
        }
        Err(LiquidError::Config(format!(
            "HD render pipeline is missing: {}",
            missing.join(", ")
        )))
    }

    /// Explicit baked state first, then the configured file. Rejected data
    /// falls back to an empty store. The explicit state is kept so a stopped
    /// or failed liquid starts from it again.
    fn resolve_baked_state(&self) -> Option<BakedState> {
        let capacity = self.particles.capacity();
        if let Some(baked) = &self.baked_state {
            if baked.len() <= capacity {
                return Some(baked.clone());
            }
            error!(
                "Baked state holds {} particles, capacity is {}; starting empty",
                baked.len(),
                capacity
            );
            return None;
        }
        let bytes = match self.config.load_baked_state() {
            Ok(bytes) => bytes?,
            Err(err) => {
                error!("Failed to read baked state: {}; starting empty", err);
                return None;
            }
        };
        match BakedState::from_bytes(&bytes, capacity) {
            Ok(baked) => Some(baked),
            Err(err) => {
                error!("{}; starting empty", err);
                None
            }
        }
    }

    fn try_init(&mut self, baked: Option<&BakedState>) -> BackendResult<()> {
        let instance = self.instance;
        self.backend.create_instance(instance)?;
        self.dispatch(Kernel::CreateFluidInstance)?;

        let particle_buffers = self.particles.allocate(self.backend.as_mut(), instance)?;
        let count = baked.map_or(0, |b| b.len());
        if let Some(baked) = baked {
            self.apply_baked_state(&particle_buffers, baked)?;
        }
        self.backend.write_buffer(
            particle_buffers.particle_number,
            0,
            bytemuck::bytes_of(&(count as i32)),
        )?;
        self.particles.set_active_count(count);
        self.dispatch(Kernel::RegisterParticlesBuffers)?;

        let (manipulators, colliders): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|m| !m.kind().is_collider());
        self.registry.rebuild(manipulators, colliders);
        self.registry.serialize_dynamic(
            self.config.container_pos,
            self.config.container_size,
            0.0,
        );
        let manipulator_buffers = self.allocate_manipulator_buffers()?;
        self.manipulator_buffers = Some(manipulator_buffers);
        self.upload_manipulators(&manipulator_buffers)?;
        self.backend.write_buffer(
            manipulator_buffers.const_data,
            0,
            bytemuck::cast_slice(self.registry.const_data()),
        )?;
        self.dispatch(Kernel::RegisterManipulators)?;
        if !self.registry.is_empty() {
            self.dispatch(Kernel::InitializeManipulators)?;
        }

        self.readback.configure(
            self.backend.as_mut(),
            instance,
            ReadbackConfig {
                statistics_len: self.registry.len() * STATISTICS_PER_MANIPULATOR,
                max_frames_in_flight: self.config.max_frames_in_flight,
            },
        )?;
        self.dispatch(Kernel::InitializeGpuReadback)?;

        self.grid_buffers = Some(self.grid.allocate(self.backend.as_mut(), instance)?);
        self.scratch_buffers = Some(self.particles.allocate_scratch(self.backend.as_mut(), instance)?);
        self.dispatch(Kernel::RegisterSolverBuffers)?;
        self.dispatch(Kernel::RegisterRenderResources)?;

        self.params = SimulationParams::default();
        self.params.particle_count = count as i32;
        self.params
            .refresh(&self.config, &self.grid, 0.0, self.simulation_frame);
        self.backend
            .upload_parameters(instance, ParameterBlock::Simulation(self.params))?;
        self.dispatch(Kernel::UpdateLiquidParameters)?;
        self.upload_render_params()?;

        self.state = SimulationState::Initialized;
        self.running = self.config.run_simulation;
        Ok(())
    }

    fn apply_baked_state(&mut self, buffers: &ParticleBuffers, baked: &BakedState) -> BackendResult<()> {
        self.backend.write_buffer(
            buffers.position_mass,
            0,
            bytemuck::cast_slice(&baked.position_mass()),
        )?;
        let affine: Vec<AffineBlock> = baked
            .affine_velocity()
            .iter()
            .map(|&velocity| {
                let mut block = [[0; 2]; AFFINE_SLOTS];
                block[VELOCITY_SLOT] = velocity;
                block
            })
            .collect();
        let current = self.backend.current_affine_index(self.instance)?;
        self.backend
            .write_buffer(buffers.affine[current], 0, bytemuck::cast_slice(&affine))
    }

    fn allocate_manipulator_buffers(&mut self) -> BackendResult<ManipulatorBuffers> {
        let instance = self.instance;
        let count = self.registry.len();
        let mut alloc = |kind, count, stride| {
            self.backend
                .allocate_buffer(instance, BufferDesc::new(kind, count, stride))
        };
        Ok(ManipulatorBuffers {
            records: alloc(
                BufferKind::Manipulators,
                count,
                std::mem::size_of::<ManipulatorRecord>(),
            )?,
            indices: alloc(
                BufferKind::ManipulatorIndices,
                1,
                std::mem::size_of::<ManipulatorIndices>(),
            )?,
            const_data: alloc(
                BufferKind::ManipulatorConstData,
                self.registry.const_data().len(),
                4,
            )?,
            statistics: alloc(
                BufferKind::ManipulatorStatistics,
                count * STATISTICS_PER_MANIPULATOR,
                4,
            )?,
        })
    }

    fn upload_manipulators(&mut self, buffers: &ManipulatorBuffers) -> BackendResult<()> {
        self.backend.write_buffer(
            buffers.records,
            0,
            bytemuck::cast_slice(self.registry.records()),
        )?;
        self.backend.write_buffer(
            buffers.indices,
            0,
            bytemuck::bytes_of(self.registry.indices()),
        )?;
        self.dispatch(Kernel::UpdateManipulatorParameters)
    }

    fn upload_render_params(&mut self) -> BackendResult<()> {
        let params = self.render_params();
        self.backend
            .upload_parameters(self.instance, ParameterBlock::Render(params))?;
        self.dispatch(Kernel::SetRenderParameters)
    }

    fn dispatch(&mut self, kernel: Kernel) -> BackendResult<()> {
        debug!(
            "Liquid {} dispatch {:?} (event {})",
            self.instance,
            kernel,
            kernel.event_id(self.instance)
        );
        self.backend.dispatch(self.instance, kernel)
    }

    /// Advance the simulation by `dt` seconds of real time
    pub fn step(&mut self, dt: f32) -> LiquidResult<()> {
        if self.state != SimulationState::Initialized
            || !self.running
            || self.config.sim_time_per_sec == 0.0
            || dt <= 0.0
        {
            return Ok(());
        }

        self.state = SimulationState::Stepping;
        let result = self.run_substeps(dt);
        self.state = SimulationState::Initialized;
        if let Err(err) = &result {
            error!("Liquid {} step failed: {}", self.instance, err);
        }
        Ok(result?)
    }

    fn run_substeps(&mut self, dt: f32) -> BackendResult<()> {
        self.upload_render_params()?;

        let iterations = self.config.iterations_per_frame.max(1);
        let timestep = compute_timestep(
            self.config.sim_time_per_sec,
            dt,
            iterations,
            self.config.time_step_max,
        );
        let manipulator_dt = timestep / self.config.sim_time_per_sec;
        let Some(manipulator_buffers) = self.manipulator_buffers else {
            return Ok(());
        };

        for _ in 0..iterations {
            self.dispatch(Kernel::ClearSdfAndId)?;

            self.params
                .refresh(&self.config, &self.grid, timestep, self.simulation_frame);
            self.registry.serialize_dynamic(
                self.config.container_pos,
                self.config.container_size,
                manipulator_dt,
            );
            self.backend
                .upload_parameters(self.instance, ParameterBlock::Simulation(self.params))?;
            self.dispatch(Kernel::UpdateLiquidParameters)?;
            self.upload_manipulators(&manipulator_buffers)?;

            self.dispatch(Kernel::StepPhysics)?;
            self.simulation_time += timestep;
            self.simulation_frame += 1;
        }
        Ok(())
    }

    pub fn run(&mut self) {
        self.running = true;
    }

    pub fn pause(&mut self) {
        self.running = false;
    }

    /// Release every backend resource. Manipulators return to the pending
    /// list so the simulation can be initialized again.
    pub fn stop(&mut self) {
        if !self.is_initialized() {
            return;
        }
        if let Err(err) = self.dispatch(Kernel::ReleaseResources) {
            warn!("Liquid {} failed to release resources: {}", self.instance, err);
        }
        self.release();
        info!("Stopped liquid {}", self.instance);
    }

    fn release(&mut self) {
        if let Err(err) = self.backend.release_instance(self.instance) {
            debug!("Liquid {} had no backend instance to release: {}", self.instance, err);
        }
        let manipulators = self.registry.take();
        self.pending.extend(manipulators);
        self.particles.release();
        self.grid = GridLayout::new(self.config.container_size, self.config.grid_resolution);
        self.grid_buffers = None;
        self.scratch_buffers = None;
        self.manipulator_buffers = None;
        self.cameras.clear();
        self.readback.reset();
        self.params = SimulationParams::default();
        self.simulation_time = 0.0;
        self.simulation_frame = 0;
        self.state = SimulationState::Uninitialized;
    }

    // ---- render / readback ----

    /// Request a fresh readback and apply any completed one. Returns whether
    /// new data arrived this call.
    pub fn update_readback(&mut self) -> LiquidResult<bool> {
        if !self.is_initialized() {
            return Ok(false);
        }
        let frame = self.host_frame;
        if self.readback.request(self.backend.as_mut(), self.instance, frame)? {
            self.dispatch(Kernel::UpdateReadback)?;
        }
        let Some(snapshot) = self.readback.poll(self.backend.as_mut(), self.instance, frame)? else {
            return Ok(false);
        };

        let count = snapshot.particle_count;
        let statistics = snapshot.statistics.clone();
        self.particles.set_active_count(count);
        let ctx = StatisticsContext {
            force_interaction_strength: self.config.solver.force_interaction_strength,
        };
        self.registry.apply_statistics(&statistics, &ctx);
        Ok(true)
    }

    /// Store this frame's parameters for a camera and upload them. Returns
    /// the camera's backend id.
    pub fn update_camera(&mut self, key: CameraKey, view: &CameraView) -> LiquidResult<Option<u32>> {
        if !self.is_initialized() {
            warn!("Camera update ignored, liquid {} is not initialized", self.instance);
            return Ok(None);
        }
        let (camera, first_use) = self
            .cameras
            .update(key, view, &self.config.render, self.host_frame);
        let params = match self.cameras.get(key) {
            Some(entry) => entry.params,
            None => return Ok(None),
        };
        self.backend
            .upload_parameters(self.instance, ParameterBlock::Camera { camera, params })?;
        self.dispatch(Kernel::SetCameraParameters)?;
        if first_use {
            debug!("Registered camera {:?} as {} for liquid {}", key, camera, self.instance);
            self.cameras.mark_registered(key);
        }
        Ok(Some(camera))
    }

    /// Draw the liquid for a camera whose parameters were updated this frame
    pub fn render(&mut self, key: CameraKey) -> LiquidResult<bool> {
        if !self.is_initialized() {
            return Ok(false);
        }
        let Some(entry) = self.cameras.get(key) else {
            warn!("Camera {:?} was never updated for liquid {}", key, self.instance);
            return Ok(false);
        };
        if entry.updated_frame != self.host_frame {
            warn!(
                "Camera {:?} parameters are from frame {}, current frame is {}",
                key, entry.updated_frame, self.host_frame
            );
            return Ok(false);
        }
        let camera = entry.params.camera_id as u32;
        self.backend.draw(self.instance, camera)?;
        Ok(true)
    }

    pub fn render_params(&self) -> RenderParams {
        let material = &self.config.material;
        RenderParams::new(
            material.particle_scale,
            self.grid.cell_size,
            self.config.solver.particle_density,
            material.blur_radius,
        )
    }

    pub fn render_buffers(&self) -> Option<RenderBuffers> {
        let particles = *self.particles.buffers()?;
        let grid = self.grid_buffers?;
        let current = self.backend.current_affine_index(self.instance).ok()?;
        Some(RenderBuffers {
            particles,
            current_affine: particles.affine[current],
            grid,
        })
    }

    pub fn scratch_buffers(&self) -> Option<&SolverScratchBuffers> {
        self.scratch_buffers.as_ref()
    }

    /// Raw per-manipulator counters, 8 per manipulator in registry order
    pub fn statistics_buffer(&self) -> Option<BufferHandle> {
        self.manipulator_buffers.map(|b| b.statistics)
    }

    /// Read the live particles back from the backend as a bakeable state
    pub fn serialize_current_state(&self) -> LiquidResult<BakedState> {
        let Some(buffers) = self.particles.buffers() else {
            return Err(LiquidError::Config(format!(
                "liquid {} is not initialized, nothing to serialize",
                self.instance
            )));
        };
        let current = self.backend.current_affine_index(self.instance)?;

        let count_bytes = self.backend.read_buffer(buffers.particle_number)?;
        let count = bytemuck::try_pod_read_unaligned::<i32>(&count_bytes[..4.min(count_bytes.len())])
            .map_err(|_| LiquidError::Data("particle number buffer is empty".to_string()))?
            .max(0) as usize;

        let position_bytes = self.backend.read_buffer(buffers.position_mass)?;
        let affine_bytes = self.backend.read_buffer(buffers.affine[current])?;
        let positions: Vec<[f32; 4]> = bytemuck::pod_collect_to_vec(&position_bytes);
        let affine: Vec<AffineBlock> = bytemuck::pod_collect_to_vec(&affine_bytes);
        let count = count.min(positions.len()).min(affine.len());

        BakedState::new(
            positions[..count]
                .iter()
                .map(|p| Vec3::new(p[0], p[1], p[2]))
                .collect(),
            affine[..count].iter().map(|block| block[VELOCITY_SLOT]).collect(),
        )
    }

    pub fn footprint(&self) -> MemoryFootprint {
        let colliders = self.manipulators().filter(|m| m.kind().is_collider());
        MemoryFootprint {
            particles: self.particles.footprint(),
            colliders: collider_footprint(colliders),
            grid: self.grid.footprint(),
        }
    }
}

impl Drop for LiquidSimulation {
    fn drop(&mut self) {
        self.stop();
    }
}
