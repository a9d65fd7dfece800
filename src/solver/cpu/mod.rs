//! CPU reference backend
//!
//! Runs a compact 3D MLS-MPM liquid on the host so the orchestrator can be
//! exercised without a GPU. Buffers are plain word vectors viewed through
//! `bytemuck`; kernels that only matter to a GPU are accepted as no-ops.

pub mod buffers;
pub mod colliders;
pub mod g2p;
pub mod grid_update;
pub mod instance;
pub mod manipulators;
pub mod p2g;
pub mod render;
pub mod sort;
pub mod state;
pub mod step;

use std::collections::HashMap;

use bevy::prelude::*;

use self::instance::CpuInstance;
use super::backend::{
    BackendError, BackendResult, BufferDesc, BufferHandle, BufferKind, ComputeBackend, InstanceId,
    Kernel, ParameterBlock, ReadbackConfig,
};

#[derive(Debug, Default)]
pub struct CpuBackend {
    seed: u64,
    instances: HashMap<InstanceId, CpuInstance>,
}

impl CpuBackend {
    /// `seed` drives emitter jitter; each instance mixes in its id
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            instances: HashMap::new(),
        }
    }

    fn instance(&self, instance: InstanceId) -> BackendResult<&CpuInstance> {
        self.instances
            .get(&instance)
            .ok_or(BackendError::UnknownInstance(instance))
    }

    fn instance_mut(&mut self, instance: InstanceId) -> BackendResult<&mut CpuInstance> {
        self.instances
            .get_mut(&instance)
            .ok_or(BackendError::UnknownInstance(instance))
    }

    /// Number of draws issued for an instance
    pub fn draw_count(&self, instance: InstanceId) -> u64 {
        self.instances.get(&instance).map_or(0, |i| i.draws)
    }

    /// Number of completed solver steps for an instance
    pub fn step_count(&self, instance: InstanceId) -> u64 {
        self.instances.get(&instance).map_or(0, |i| i.steps)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.len()
    }
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn create_instance(&mut self, instance: InstanceId) -> BackendResult<()> {
        if self.instances.contains_key(&instance) {
            return Err(BackendError::InstanceExists(instance));
        }
        self.instances
            .insert(instance, CpuInstance::new(instance, self.seed));
        debug!("Created CPU liquid instance {}", instance);
        Ok(())
    }

    fn allocate_buffer(
        &mut self,
        instance: InstanceId,
        desc: BufferDesc,
    ) -> BackendResult<BufferHandle> {
        let state = self.instance_mut(instance)?;
        let size_bytes = desc.size_bytes();
        state.buffers.allocate(desc.kind, size_bytes);
        Ok(BufferHandle {
            instance,
            kind: desc.kind,
            size_bytes,
        })
    }

    fn write_buffer(
        &mut self,
        handle: BufferHandle,
        offset: usize,
        data: &[u8],
    ) -> BackendResult<()> {
        self.instance_mut(handle.instance)?
            .buffers
            .write_bytes(handle.kind, offset, data)
    }

    fn read_buffer(&self, handle: BufferHandle) -> BackendResult<Vec<u8>> {
        let mut bytes = self.instance(handle.instance)?.buffers.read_bytes(handle.kind)?;
        bytes.truncate(handle.size_bytes);
        Ok(bytes)
    }

    fn upload_parameters(
        &mut self,
        instance: InstanceId,
        block: ParameterBlock,
    ) -> BackendResult<()> {
        let state = self.instance_mut(instance)?;
        match block {
            ParameterBlock::Simulation(params) => state.simulation = Some(params),
            ParameterBlock::Render(params) => state.render = Some(params),
            ParameterBlock::Camera { camera, params } => {
                state.cameras.insert(camera, params);
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, instance: InstanceId, kernel: Kernel) -> BackendResult<()> {
        let state = self.instance_mut(instance)?;
        match kernel {
            Kernel::StepPhysics => step::step_physics(state),
            Kernel::InitializeManipulators => {
                for kind in [
                    BufferKind::Manipulators,
                    BufferKind::ManipulatorIndices,
                    BufferKind::ManipulatorStatistics,
                ] {
                    if !state.buffers.contains(kind) {
                        return Err(BackendError::MissingBuffer { instance, kind });
                    }
                }
                state.manipulators_initialized = true;
                Ok(())
            }
            Kernel::ClearSdfAndId => {
                state.grid.clear_sdf_and_ids();
                Ok(())
            }
            Kernel::ReleaseResources => {
                state.release();
                Ok(())
            }
            Kernel::Draw => Err(BackendError::NotReady {
                kernel,
                reason: "draws go through draw() with a camera".to_string(),
            }),
            Kernel::UpdateLiquidParameters
            | Kernel::UpdateManipulatorParameters
            | Kernel::CreateFluidInstance
            | Kernel::RegisterParticlesBuffers
            | Kernel::SetCameraParameters
            | Kernel::SetRenderParameters
            | Kernel::RegisterManipulators
            | Kernel::RegisterSolverBuffers
            | Kernel::RegisterRenderResources
            | Kernel::InitializeGpuReadback
            | Kernel::UpdateReadback => Ok(()),
        }
    }

    fn draw(&mut self, instance: InstanceId, camera: u32) -> BackendResult<()> {
        let state = self.instance_mut(instance)?;
        if !state.cameras.contains_key(&camera) {
            return Err(BackendError::UnknownCamera(camera));
        }
        state.draws += 1;
        Ok(())
    }

    fn configure_readback(
        &mut self,
        instance: InstanceId,
        config: ReadbackConfig,
    ) -> BackendResult<()> {
        let state = self.instance_mut(instance)?;
        state.readback = Some(config);
        state.mailbox = None;
        Ok(())
    }

    fn request_readback(&mut self, instance: InstanceId) -> BackendResult<()> {
        let state = self.instance_mut(instance)?;
        let config = state.readback.ok_or(BackendError::ReadbackNotConfigured)?;

        let count = state
            .buffers
            .view::<i32>(BufferKind::ParticleNumber)?
            .first()
            .copied()
            .unwrap_or(0);
        let statistics = state.buffers.view_mut::<i32>(BufferKind::ManipulatorStatistics)?;
        let len = config.statistics_len.min(statistics.len());

        let mut snapshot = Vec::with_capacity(1 + config.statistics_len);
        snapshot.push(count);
        snapshot.extend_from_slice(&statistics[..len]);
        snapshot.resize(1 + config.statistics_len, 0);
        // counters accumulate between readbacks
        statistics.fill(0);

        state.mailbox = Some(snapshot);
        Ok(())
    }

    fn poll_readback(&mut self, instance: InstanceId) -> BackendResult<Option<Vec<i32>>> {
        Ok(self.instance_mut(instance)?.mailbox.take())
    }

    fn current_affine_index(&self, instance: InstanceId) -> BackendResult<usize> {
        Ok(self.instance(instance)?.affine_index)
    }

    fn release_instance(&mut self, instance: InstanceId) -> BackendResult<()> {
        if self.instances.remove(&instance).is_none() {
            return Err(BackendError::UnknownInstance(instance));
        }
        debug!("Released CPU liquid instance {}", instance);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::camera::CameraParams;

    #[test]
    fn instances_are_unique() {
        let mut backend = CpuBackend::new(0);
        backend.create_instance(1).unwrap();
        assert_eq!(backend.create_instance(1), Err(BackendError::InstanceExists(1)));
        assert!(matches!(
            backend.allocate_buffer(2, BufferDesc::new(BufferKind::GridSdf, 4, 4)),
            Err(BackendError::UnknownInstance(2))
        ));
        backend.release_instance(1).unwrap();
        assert_eq!(backend.instance_count(), 0);
    }

    #[test]
    fn readback_snapshots_and_clears_statistics() {
        let mut backend = CpuBackend::new(0);
        backend.create_instance(0).unwrap();
        let number = backend
            .allocate_buffer(0, BufferDesc::new(BufferKind::ParticleNumber, 1, 4))
            .unwrap();
        let stats = backend
            .allocate_buffer(0, BufferDesc::new(BufferKind::ManipulatorStatistics, 8, 4))
            .unwrap();
        backend.write_buffer(number, 0, bytemuck::bytes_of(&42i32)).unwrap();
        backend.write_buffer(stats, 0, bytemuck::bytes_of(&7i32)).unwrap();

        assert_eq!(backend.request_readback(0), Err(BackendError::ReadbackNotConfigured));
        backend
            .configure_readback(
                0,
                ReadbackConfig {
                    statistics_len: 8,
                    max_frames_in_flight: 3,
                },
            )
            .unwrap();
        assert_eq!(backend.poll_readback(0).unwrap(), None);
        backend.request_readback(0).unwrap();

        let snapshot = backend.poll_readback(0).unwrap().unwrap();
        assert_eq!(snapshot.len(), 9);
        assert_eq!(snapshot[0], 42);
        assert_eq!(snapshot[1], 7);
        assert_eq!(backend.poll_readback(0).unwrap(), None);
        assert_eq!(backend.read_buffer(stats).unwrap(), vec![0; 32]);
    }

    #[test]
    fn draw_requires_registered_camera() {
        let mut backend = CpuBackend::new(0);
        backend.create_instance(0).unwrap();
        assert_eq!(backend.draw(0, 0), Err(BackendError::UnknownCamera(0)));
        backend
            .upload_parameters(
                0,
                ParameterBlock::Camera {
                    camera: 0,
                    params: CameraParams::default(),
                },
            )
            .unwrap();
        backend.draw(0, 0).unwrap();
        assert_eq!(backend.draw_count(0), 1);
    }

    #[test]
    fn step_before_parameters_is_rejected() {
        let mut backend = CpuBackend::new(0);
        backend.create_instance(0).unwrap();
        assert!(matches!(
            backend.dispatch(0, Kernel::StepPhysics),
            Err(BackendError::NotReady { .. })
        ));
    }
}
