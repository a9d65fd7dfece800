//! Host-side working state of the CPU solver
//!
//! Particles are unpacked from the backend buffers into grid space at the
//! start of a step and packed back at the end. Node arrays persist between
//! steps so the SDF and collider ids survive `ClearSdfAndId`.

use bevy::prelude::*;

use super::buffers::BufferStore;
use crate::core::particle_store::{AffineBlock, pack_affine, unpack_affine};
use crate::solver::backend::{BackendError, BackendResult, BufferKind, Kernel};
use crate::solver::params::SimulationParams;

/// Values every phase reads, derived once per step from the parameter block
#[derive(Clone, Copy, Debug)]
pub struct StepContext {
    pub dims: UVec3,
    pub node_count: usize,
    pub cell_size: f32,
    /// World position of grid coordinate zero
    pub origin: Vec3,
    pub container_pos: Vec3,
    pub dt: f32,
    pub gravity: Vec3,
    pub affine_amount: f32,
    pub divergence_decay: f32,
    pub velocity_limit: f32,
    pub minimum_velocity: f32,
    pub stiffness: f32,
    pub stiffness_power: f32,
    pub rest_density: f32,
    pub surface_tension: f32,
    pub capacity: usize,
}

impl StepContext {
    pub fn new(params: &SimulationParams, buffer_capacity: usize) -> BackendResult<Self> {
        let dims = params.grid_size();
        let node_count = dims.x as usize * dims.y as usize * dims.z as usize;
        if node_count == 0 || node_count != params.node_count as usize {
            return Err(BackendError::NotReady {
                kernel: Kernel::StepPhysics,
                reason: format!(
                    "grid of {:?} does not match {} nodes",
                    dims, params.node_count
                ),
            });
        }

        let scale = params.container_scale();
        let cell_size = (scale / dims.as_vec3()).max_element();
        let container_pos = params.container_pos();
        let max_particles = params.max_particle_count.max(0) as usize;

        Ok(Self {
            dims,
            node_count,
            cell_size,
            origin: container_pos - scale * 0.5,
            container_pos,
            dt: params.time_step,
            gravity: params.gravity(),
            affine_amount: params.affine_amount,
            divergence_decay: params.affine_divergence_decay,
            velocity_limit: params.velocity_limit,
            minimum_velocity: params.minimum_velocity,
            stiffness: params.liquid_stiffness,
            stiffness_power: params.liquid_stiffness_power.max(1.0),
            rest_density: params.rest_density.max(1e-3),
            surface_tension: params.surface_tension,
            capacity: max_particles.min(buffer_capacity),
        })
    }

    #[inline]
    pub fn world_to_grid(&self, world: Vec3) -> Vec3 {
        (world - self.origin) / self.cell_size
    }

    #[inline]
    pub fn grid_to_world(&self, grid: Vec3) -> Vec3 {
        grid * self.cell_size + self.origin
    }

    /// World position of the node at `coord`
    #[inline]
    pub fn node_world(&self, coord: UVec3) -> Vec3 {
        self.grid_to_world(coord.as_vec3() + 0.5)
    }

    #[inline]
    pub fn node_index(&self, coord: IVec3) -> Option<usize> {
        if coord.cmplt(IVec3::ZERO).any() || coord.as_uvec3().cmpge(self.dims).any() {
            return None;
        }
        let c = coord.as_uvec3();
        Some(c.x as usize + self.dims.x as usize * (c.y as usize + self.dims.y as usize * c.z as usize))
    }

    #[inline]
    pub fn node_coord(&self, index: usize) -> UVec3 {
        let x = index % self.dims.x as usize;
        let y = (index / self.dims.x as usize) % self.dims.y as usize;
        let z = index / (self.dims.x as usize * self.dims.y as usize);
        UVec3::new(x as u32, y as u32, z as u32)
    }

    /// Range particles are kept in so their full stencil stays on the grid
    #[inline]
    pub fn clamp_to_grid(&self, position: Vec3) -> Vec3 {
        position.clamp(Vec3::ONE, self.dims.as_vec3() - 1.001)
    }
}

/// Live particles, positions in grid units
#[derive(Clone, Debug, Default)]
pub struct ParticleState {
    pub positions: Vec<Vec3>,
    pub velocities: Vec<Vec3>,
    pub affine: Vec<Mat3>,
}

impl ParticleState {
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn push(&mut self, position: Vec3, velocity: Vec3) {
        self.positions.push(position);
        self.velocities.push(velocity);
        self.affine.push(Mat3::ZERO);
    }

    pub fn swap_remove(&mut self, index: usize) {
        self.positions.swap_remove(index);
        self.velocities.swap_remove(index);
        self.affine.swap_remove(index);
    }

    /// Keep only the particles for which `keep` returns true
    pub fn retain(&mut self, mut keep: impl FnMut(Vec3, Vec3) -> bool) -> usize {
        let mut removed = 0;
        let mut i = 0;
        while i < self.len() {
            if keep(self.positions[i], self.velocities[i]) {
                i += 1;
            } else {
                self.swap_remove(i);
                removed += 1;
            }
        }
        removed
    }

    /// Reorder every array by `order`, a permutation of particle indices
    pub fn permute(&mut self, order: &[usize]) {
        self.positions = order.iter().map(|&i| self.positions[i]).collect();
        self.velocities = order.iter().map(|&i| self.velocities[i]).collect();
        self.affine = order.iter().map(|&i| self.affine[i]).collect();
    }

    pub fn load(store: &BufferStore, affine_kind: BufferKind, ctx: &StepContext) -> BackendResult<Self> {
        let count = store
            .view::<i32>(BufferKind::ParticleNumber)?
            .first()
            .copied()
            .unwrap_or(0)
            .max(0) as usize;
        let position_mass = store.view::<[f32; 4]>(BufferKind::PositionMass)?;
        let affine = store.view::<AffineBlock>(affine_kind)?;
        let count = count.min(position_mass.len()).min(affine.len());

        let mut state = Self {
            positions: Vec::with_capacity(count),
            velocities: Vec::with_capacity(count),
            affine: Vec::with_capacity(count),
        };
        for (pm, block) in position_mass.iter().zip(affine).take(count) {
            let (rows, velocity) = unpack_affine(block);
            state
                .positions
                .push(ctx.world_to_grid(Vec3::new(pm[0], pm[1], pm[2])));
            state.velocities.push(Vec3::from_array(velocity));
            state.affine.push(Mat3::from_cols_array_2d(&rows).transpose());
        }
        Ok(state)
    }

    /// Write positions, render radii and the affine state into the other
    /// affine buffer
    pub fn store(
        &self,
        store: &mut BufferStore,
        affine_kind: BufferKind,
        ctx: &StepContext,
        radius: f32,
    ) -> BackendResult<()> {
        let position_mass: Vec<[f32; 4]> = self
            .positions
            .iter()
            .map(|&p| ctx.grid_to_world(p).extend(1.0).to_array())
            .collect();
        let position_radius: Vec<[f32; 4]> = position_mass
            .iter()
            .map(|&[x, y, z, _]| [x, y, z, radius])
            .collect();
        let affine: Vec<AffineBlock> = self
            .affine
            .iter()
            .zip(&self.velocities)
            .map(|(c, v)| {
                let rows = c.transpose().to_cols_array_2d();
                pack_affine(rows, v.to_array())
            })
            .collect();

        store.store(BufferKind::PositionMass, &position_mass)?;
        store.store(BufferKind::PositionRadius, &position_radius)?;
        store.store(affine_kind, &affine)?;
        store.store(BufferKind::ParticleNumber, &[self.len() as i32])?;
        Ok(())
    }
}

/// Node arrays of the CPU grid
#[derive(Clone, Debug, Default)]
pub struct GridState {
    pub mass: Vec<f32>,
    pub momentum: Vec<Vec3>,
    pub velocity: Vec<Vec3>,
    /// Signed distance to the nearest collider surface in world units
    pub sdf: Vec<f32>,
    /// Record index of the nearest collider, -1 for none
    pub collider: Vec<i32>,
    /// Outward collider normal
    pub collider_normal: Vec<Vec3>,
}

impl GridState {
    pub fn ensure_size(&mut self, node_count: usize) {
        if self.mass.len() == node_count {
            return;
        }
        self.mass = vec![0.0; node_count];
        self.momentum = vec![Vec3::ZERO; node_count];
        self.velocity = vec![Vec3::ZERO; node_count];
        self.collider_normal = vec![Vec3::ZERO; node_count];
        self.sdf = vec![f32::MAX; node_count];
        self.collider = vec![-1; node_count];
    }

    pub fn clear_sdf_and_ids(&mut self) {
        self.sdf.fill(f32::MAX);
        self.collider.fill(-1);
        self.collider_normal.fill(Vec3::ZERO);
    }

    pub fn clear_transfer(&mut self) {
        self.mass.fill(0.0);
        self.momentum.fill(Vec3::ZERO);
        self.velocity.fill(Vec3::ZERO);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> SimulationParams {
        SimulationParams {
            grid_size: [8.0, 4.0, 4.0],
            node_count: 128,
            container_scale: [2.0, 1.0, 1.0],
            max_particle_count: 64,
            ..SimulationParams::default()
        }
    }

    #[test]
    fn context_rejects_mismatched_node_count() {
        let mut bad = params();
        bad.node_count = 7;
        assert!(StepContext::new(&bad, 64).is_err());
        assert!(StepContext::new(&params(), 64).is_ok());
    }

    #[test]
    fn node_indexing_round_trips() {
        let ctx = StepContext::new(&params(), 64).unwrap();
        assert_eq!(ctx.cell_size, 0.25);
        let coord = UVec3::new(5, 2, 3);
        let index = ctx.node_index(coord.as_ivec3()).unwrap();
        assert_eq!(ctx.node_coord(index), coord);
        assert_eq!(ctx.node_index(IVec3::new(8, 0, 0)), None);
        assert_eq!(ctx.node_index(IVec3::new(0, -1, 0)), None);
    }

    #[test]
    fn retain_reports_removed_particles() {
        let mut state = ParticleState::default();
        for i in 0..5 {
            state.push(Vec3::splat(i as f32), Vec3::ZERO);
        }
        let removed = state.retain(|p, _| p.x != 1.0 && p.x != 3.0);
        assert_eq!(removed, 2);
        assert_eq!(state.len(), 3);
        assert_eq!(state.affine.len(), 3);
    }
}
