//! Background grid layout
//!
//! A regular 3D lattice sized from the container bounds. Node buffers live on
//! the compute backend and are rebuilt from scratch every sub-step, so the
//! host only tracks the layout and the buffer handles.

use bevy::prelude::*;

use crate::config::GRID_NODE_WARNING_THRESHOLD;
use crate::solver::backend::{
    BackendResult, BufferDesc, BufferHandle, BufferKind, ComputeBackend, InstanceId,
};

// Per-node strides in bytes
pub const GRID_DATA_STRIDE: usize = 4 * 4;
pub const GRID_NORMAL_STRIDE: usize = 4 * 4;
pub const GRID_BLUR_STRIDE: usize = 4 * 4;
pub const GRID_SDF_STRIDE: usize = 4;
pub const GRID_NODE_POSITION_STRIDE: usize = 4 * 4;
pub const INDEX_GRID_STRIDE: usize = 2 * 4;

#[derive(Clone, Debug, PartialEq)]
pub struct GridLayout {
    pub container_size: Vec3,
    pub resolution: u32,
    pub cell_size: f32,
    pub dims: UVec3,
    pub node_count: usize,
    invalidated: bool,
}

impl GridLayout {
    pub fn new(container_size: Vec3, resolution: u32) -> Self {
        let mut layout = Self {
            container_size,
            resolution,
            cell_size: 0.0,
            dims: UVec3::ZERO,
            node_count: 0,
            invalidated: true,
        };
        layout.recompute();
        layout
    }

    /// Recompute cell size and dimensions. Buffers sized from the old layout
    /// are no longer valid afterwards.
    pub fn resize(&mut self, container_size: Vec3, resolution: u32) {
        self.container_size = container_size;
        self.resolution = resolution;
        self.recompute();
        self.invalidated = true;
    }

    fn recompute(&mut self) {
        let resolution = self.resolution.max(1) as f32;
        self.cell_size = self.container_size.max_element() / resolution;
        self.dims = (self.container_size / self.cell_size).ceil().as_uvec3().max(UVec3::ONE);
        self.node_count = self.dims.x as usize * self.dims.y as usize * self.dims.z as usize;

        if self.node_count > GRID_NODE_WARNING_THRESHOLD {
            warn!(
                "Grid has {} nodes, above the recommended {}. Performance may be poor.",
                self.node_count, GRID_NODE_WARNING_THRESHOLD
            );
        }
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated
    }

    pub(crate) fn mark_allocated(&mut self) {
        self.invalidated = false;
    }

    #[inline]
    pub fn node_index(&self, coord: UVec3) -> usize {
        coord.x as usize
            + self.dims.x as usize * (coord.y as usize + self.dims.y as usize * coord.z as usize)
    }

    /// Grid-space position of a world point
    pub fn world_to_grid(&self, container_pos: Vec3, world: Vec3) -> Vec3 {
        (world - (container_pos - self.container_size * 0.5)) / self.cell_size
    }

    pub fn grid_to_world(&self, container_pos: Vec3, grid: Vec3) -> Vec3 {
        grid * self.cell_size + container_pos - self.container_size * 0.5
    }

    /// Bytes of all node buffers
    pub fn footprint(&self) -> u64 {
        let per_node = GRID_DATA_STRIDE
            + GRID_NORMAL_STRIDE
            + 2 * GRID_BLUR_STRIDE
            + GRID_SDF_STRIDE
            + GRID_NODE_POSITION_STRIDE
            + INDEX_GRID_STRIDE;
        self.node_count as u64 * per_node as u64
    }

    pub fn allocate(
        &mut self,
        backend: &mut dyn ComputeBackend,
        instance: InstanceId,
    ) -> BackendResult<GridBuffers> {
        let nodes = self.node_count;
        let mut alloc = |kind, stride| backend.allocate_buffer(instance, BufferDesc::new(kind, nodes, stride));
        let buffers = GridBuffers {
            data: alloc(BufferKind::GridData, GRID_DATA_STRIDE)?,
            normal: alloc(BufferKind::GridNormal, GRID_NORMAL_STRIDE)?,
            blur0: alloc(BufferKind::GridBlur0, GRID_BLUR_STRIDE)?,
            blur1: alloc(BufferKind::GridBlur1, GRID_BLUR_STRIDE)?,
            sdf: alloc(BufferKind::GridSdf, GRID_SDF_STRIDE)?,
            node_positions: alloc(BufferKind::GridNodePositions, GRID_NODE_POSITION_STRIDE)?,
            index_grid: alloc(BufferKind::IndexGrid, INDEX_GRID_STRIDE)?,
        };
        self.mark_allocated();
        Ok(buffers)
    }
}

#[derive(Clone, Copy, Debug)]
pub struct GridBuffers {
    pub data: BufferHandle,
    pub normal: BufferHandle,
    pub blur0: BufferHandle,
    pub blur1: BufferHandle,
    pub sdf: BufferHandle,
    pub node_positions: BufferHandle,
    pub index_grid: BufferHandle,
}
