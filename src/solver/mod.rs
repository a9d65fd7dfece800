// src/solver/mod.rs
pub mod backend;
pub mod camera;
pub mod cpu;
pub mod params;
pub mod readback;
pub mod simulation;

// Re-export from the solver module
pub use backend::{
    BackendError, BackendResult, BufferDesc, BufferHandle, BufferKind, ComputeBackend, InstanceId,
    Kernel, ParameterBlock, ReadbackConfig,
};
pub use camera::{CameraKey, CameraParams, CameraTable, CameraView, RenderParams};
pub use cpu::CpuBackend;
pub use params::{SimulationParams, compute_timestep};
pub use readback::{ReadbackBridge, ReadbackSnapshot};
pub use simulation::{LiquidSimulation, MemoryFootprint, RenderBuffers, SimulationState};

// Create a prelude module for easy imports
pub mod prelude {
    pub use super::backend::{ComputeBackend, InstanceId, Kernel};
    pub use super::camera::{CameraKey, CameraView};
    pub use super::cpu::CpuBackend;
    pub use super::simulation::{LiquidSimulation, SimulationState};
}
