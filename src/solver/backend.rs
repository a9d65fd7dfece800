//! Compute backend seam
//!
//! Every numerical kernel runs behind [`ComputeBackend`]. The orchestrator only
//! allocates buffers, uploads parameter blocks, dispatches named kernels and
//! polls readbacks.

use thiserror::Error;

use super::camera::{CameraParams, RenderParams};
use super::params::SimulationParams;

pub type InstanceId = u32;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("unknown liquid instance {0}")]
    UnknownInstance(InstanceId),
    #[error("liquid instance {0} already exists")]
    InstanceExists(InstanceId),
    #[error("buffer {kind:?} is not allocated for instance {instance}")]
    MissingBuffer { instance: InstanceId, kind: BufferKind },
    #[error("access of {len} bytes at offset {offset} is out of range for {kind:?} ({size} bytes)")]
    OutOfRange {
        kind: BufferKind,
        offset: usize,
        len: usize,
        size: usize,
    },
    #[error("kernel {kernel:?} dispatched before its inputs were uploaded: {reason}")]
    NotReady { kernel: Kernel, reason: String },
    #[error("camera {0} was never registered")]
    UnknownCamera(u32),
    #[error("readback is not configured")]
    ReadbackNotConfigured,
    #[error("buffer {kind:?} cannot be viewed as {len}-byte elements")]
    Layout { kind: BufferKind, len: usize },
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Every buffer an instance owns on the backend
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferKind {
    // particles
    PositionMass,
    PositionRadius,
    AffineVelocity0,
    AffineVelocity1,
    ParticleNumber,
    // manipulators
    Manipulators,
    ManipulatorIndices,
    ManipulatorConstData,
    ManipulatorStatistics,
    // grid
    GridData,
    GridNormal,
    GridBlur0,
    GridBlur1,
    GridSdf,
    GridNodePositions,
    IndexGrid,
    // solver scratch
    PositionMassCopy,
    NodeParticlePairs,
    SortTemp,
    RadixGroupData,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferDesc {
    pub kind: BufferKind,
    pub count: usize,
    /// Element size in bytes
    pub stride: usize,
}

impl BufferDesc {
    pub fn new(kind: BufferKind, count: usize, stride: usize) -> Self {
        Self {
            kind,
            count,
            stride,
        }
    }

    pub fn size_bytes(&self) -> usize {
        self.count * self.stride
    }
}

/// Opaque reference to a backend buffer. Only valid for the instance that
/// allocated it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BufferHandle {
    pub instance: InstanceId,
    pub kind: BufferKind,
    pub size_bytes: usize,
}

/// Named kernels, numbered as the event ids native plugins expect
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Kernel {
    StepPhysics = 1,
    Draw = 2,
    InitializeManipulators = 3,
    UpdateLiquidParameters = 4,
    UpdateManipulatorParameters = 5,
    ClearSdfAndId = 6,
    CreateFluidInstance = 7,
    RegisterParticlesBuffers = 8,
    SetCameraParameters = 9,
    SetRenderParameters = 10,
    RegisterManipulators = 11,
    RegisterSolverBuffers = 12,
    RegisterRenderResources = 13,
    ReleaseResources = 14,
    InitializeGpuReadback = 15,
    UpdateReadback = 16,
}

impl Kernel {
    /// Single integer tag combining the kernel and the instance
    pub fn event_id(self, instance: InstanceId) -> u32 {
        (self as u32) | (instance << 8)
    }
}

/// Parameter blocks uploaded as a whole
#[derive(Clone, Copy, Debug)]
pub enum ParameterBlock {
    Simulation(SimulationParams),
    Render(RenderParams),
    Camera { camera: u32, params: CameraParams },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadbackConfig {
    /// Number of i32 counters past the particle count
    pub statistics_len: usize,
    pub max_frames_in_flight: u32,
}

impl ReadbackConfig {
    pub fn size_bytes(&self) -> usize {
        4 + self.statistics_len * 4
    }
}

pub trait ComputeBackend: Send + Sync {
    fn name(&self) -> &str;

    fn create_instance(&mut self, instance: InstanceId) -> BackendResult<()>;

    fn allocate_buffer(
        &mut self,
        instance: InstanceId,
        desc: BufferDesc,
    ) -> BackendResult<BufferHandle>;

    fn write_buffer(
        &mut self,
        handle: BufferHandle,
        offset: usize,
        data: &[u8],
    ) -> BackendResult<()>;

    fn read_buffer(&self, handle: BufferHandle) -> BackendResult<Vec<u8>>;

    fn upload_parameters(
        &mut self,
        instance: InstanceId,
        block: ParameterBlock,
    ) -> BackendResult<()>;

    fn dispatch(&mut self, instance: InstanceId, kernel: Kernel) -> BackendResult<()>;

    /// Issue the draw for one registered camera
    fn draw(&mut self, instance: InstanceId, camera: u32) -> BackendResult<()>;

    fn configure_readback(
        &mut self,
        instance: InstanceId,
        config: ReadbackConfig,
    ) -> BackendResult<()>;

    /// Start an asynchronous copy of the particle count and statistics
    fn request_readback(&mut self, instance: InstanceId) -> BackendResult<()>;

    /// Latest completed readback, never blocks
    fn poll_readback(&mut self, instance: InstanceId) -> BackendResult<Option<Vec<i32>>>;

    /// Index (0 or 1) of the affine buffer holding the latest particle state
    fn current_affine_index(&self, instance: InstanceId) -> BackendResult<usize>;

    fn release_instance(&mut self, instance: InstanceId) -> BackendResult<()>;
}
