use std::collections::HashMap;

use rand::SeedableRng;
use rand::rngs::StdRng;

use super::buffers::BufferStore;
use super::state::GridState;
use crate::solver::backend::{BufferKind, InstanceId, ReadbackConfig};
use crate::solver::camera::{CameraParams, RenderParams};
use crate::solver::params::SimulationParams;

/// Everything the CPU backend keeps for one liquid
#[derive(Debug)]
pub struct CpuInstance {
    pub buffers: BufferStore,
    pub simulation: Option<SimulationParams>,
    pub render: Option<RenderParams>,
    pub cameras: HashMap<u32, CameraParams>,
    pub readback: Option<ReadbackConfig>,
    /// Completed readback waiting to be polled
    pub mailbox: Option<Vec<i32>>,
    /// Affine buffer holding the latest particle state
    pub affine_index: usize,
    pub manipulators_initialized: bool,
    pub grid: GridState,
    pub rng: StdRng,
    pub draws: u64,
    pub steps: u64,
}

impl CpuInstance {
    pub fn new(instance: InstanceId, seed: u64) -> Self {
        Self {
            buffers: BufferStore::new(instance),
            simulation: None,
            render: None,
            cameras: HashMap::new(),
            readback: None,
            mailbox: None,
            affine_index: 0,
            manipulators_initialized: false,
            grid: GridState::default(),
            rng: StdRng::seed_from_u64(seed ^ instance as u64),
            draws: 0,
            steps: 0,
        }
    }

    pub fn affine_kind(index: usize) -> BufferKind {
        if index == 0 {
            BufferKind::AffineVelocity0
        } else {
            BufferKind::AffineVelocity1
        }
    }

    pub fn current_affine(&self) -> BufferKind {
        Self::affine_kind(self.affine_index)
    }

    pub fn next_affine(&self) -> BufferKind {
        Self::affine_kind(1 - self.affine_index)
    }

    /// Drop every buffer and all uploaded state
    pub fn release(&mut self) {
        self.buffers.clear();
        self.simulation = None;
        self.render = None;
        self.cameras.clear();
        self.readback = None;
        self.mailbox = None;
        self.affine_index = 0;
        self.manipulators_initialized = false;
        self.grid = GridState::default();
    }
}
