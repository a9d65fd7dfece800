//! Fixed-capacity particle storage
//!
//! The particle arrays live on the compute backend. The host keeps the
//! capacity, the buffer handles and the live count learned from readback.

use crate::config::{HISTO_WIDTH, MPM_THREADS, RADIX_THREADS};
use crate::solver::backend::{
    BackendResult, BufferDesc, BufferHandle, BufferKind, ComputeBackend, InstanceId,
};

/// xyz position + mass / radius
pub const POSITION_STRIDE: usize = 4 * 4;
/// Four `[i32; 2]` slots per particle
pub const AFFINE_STRIDE: usize = 4 * 2 * 4;
pub const AFFINE_SLOTS: usize = 4;
/// Slot of the affine block that carries the packed velocity
pub const VELOCITY_SLOT: usize = 3;

/// Fixed-point scale of the packed affine and velocity halves
pub const AFFINE_FIXED_SCALE: f32 = 2048.0;

pub const NODE_PARTICLE_PAIR_STRIDE: usize = 2 * 4;
pub const SORT_TEMP_STRIDE: usize = 2 * 4;
/// Three histogram rows per radix workgroup
pub const RADIX_GROUP_STRIDE: usize = 3 * HISTO_WIDTH * 4;

#[derive(Clone, Copy, Debug)]
pub struct ParticleBuffers {
    pub position_mass: BufferHandle,
    pub position_radius: BufferHandle,
    pub affine: [BufferHandle; 2],
    pub particle_number: BufferHandle,
}

#[derive(Clone, Copy, Debug)]
pub struct SolverScratchBuffers {
    pub position_mass_copy: BufferHandle,
    pub node_particle_pairs: BufferHandle,
    pub sort_temp: BufferHandle,
    pub radix_group_data: BufferHandle,
}

#[derive(Clone, Debug)]
pub struct ParticleStore {
    capacity: usize,
    active_count: usize,
    buffers: Option<ParticleBuffers>,
}

impl ParticleStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            active_count: 0,
            buffers: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Capacity rounded up to the solver workgroup size
    pub fn rounded_capacity(&self) -> usize {
        round_to_workgroup(self.capacity)
    }

    pub fn radix_work_groups(&self) -> usize {
        self.capacity.div_ceil(RADIX_THREADS)
    }

    pub fn active_count(&self) -> usize {
        self.active_count
    }

    pub(crate) fn set_active_count(&mut self, count: usize) {
        self.active_count = count.min(self.capacity);
    }

    pub fn buffers(&self) -> Option<&ParticleBuffers> {
        self.buffers.as_ref()
    }

    pub fn is_allocated(&self) -> bool {
        self.buffers.is_some()
    }

    /// Capacity can only change while nothing is allocated
    pub(crate) fn set_capacity(&mut self, capacity: usize) {
        debug_assert!(self.buffers.is_none());
        self.capacity = capacity;
    }

    pub fn allocate(
        &mut self,
        backend: &mut dyn ComputeBackend,
        instance: InstanceId,
    ) -> BackendResult<ParticleBuffers> {
        let capacity = self.capacity;
        let rounded = self.rounded_capacity();
        let buffers = ParticleBuffers {
            position_mass: backend.allocate_buffer(
                instance,
                BufferDesc::new(BufferKind::PositionMass, capacity, POSITION_STRIDE),
            )?,
            position_radius: backend.allocate_buffer(
                instance,
                BufferDesc::new(BufferKind::PositionRadius, capacity, POSITION_STRIDE),
            )?,
            affine: [
                backend.allocate_buffer(
                    instance,
                    BufferDesc::new(BufferKind::AffineVelocity0, rounded, AFFINE_STRIDE),
                )?,
                backend.allocate_buffer(
                    instance,
                    BufferDesc::new(BufferKind::AffineVelocity1, rounded, AFFINE_STRIDE),
                )?,
            ],
            particle_number: backend.allocate_buffer(
                instance,
                BufferDesc::new(BufferKind::ParticleNumber, 1, 4),
            )?,
        };
        self.buffers = Some(buffers);
        Ok(buffers)
    }

    pub fn allocate_scratch(
        &self,
        backend: &mut dyn ComputeBackend,
        instance: InstanceId,
    ) -> BackendResult<SolverScratchBuffers> {
        let rounded = self.rounded_capacity();
        Ok(SolverScratchBuffers {
            position_mass_copy: backend.allocate_buffer(
                instance,
                BufferDesc::new(BufferKind::PositionMassCopy, rounded, POSITION_STRIDE),
            )?,
            node_particle_pairs: backend.allocate_buffer(
                instance,
                BufferDesc::new(BufferKind::NodeParticlePairs, rounded, NODE_PARTICLE_PAIR_STRIDE),
            )?,
            sort_temp: backend.allocate_buffer(
                instance,
                BufferDesc::new(BufferKind::SortTemp, rounded, SORT_TEMP_STRIDE),
            )?,
            radix_group_data: backend.allocate_buffer(
                instance,
                BufferDesc::new(
                    BufferKind::RadixGroupData,
                    self.radix_work_groups() + 1,
                    RADIX_GROUP_STRIDE,
                ),
            )?,
        })
    }

    /// Forget all handles. The backend frees the memory with the instance.
    pub(crate) fn release(&mut self) {
        self.buffers = None;
        self.active_count = 0;
    }

    /// Bytes of every particle-sized buffer, matching what `allocate` and
    /// `allocate_scratch` request
    pub fn footprint(&self) -> u64 {
        let max = self.capacity as u64;
        let rounded = self.rounded_capacity() as u64;
        let radix_groups = self.radix_work_groups() as u64;

        let mut total = 0;
        total += max * POSITION_STRIDE as u64 * 2; // PositionMass, PositionRadius
        total += 2 * rounded * AFFINE_STRIDE as u64; // AffineVelocity0/1
        total += rounded * POSITION_STRIDE as u64; // PositionMassCopy
        total += rounded * NODE_PARTICLE_PAIR_STRIDE as u64;
        total += rounded * SORT_TEMP_STRIDE as u64;
        total += (radix_groups + 1) * RADIX_GROUP_STRIDE as u64;
        total
    }
}

pub fn round_to_workgroup(count: usize) -> usize {
    count.div_ceil(MPM_THREADS) * MPM_THREADS
}

/// Pack two 16-bit fixed point values into one `i32`
#[inline]
pub fn pack_i16_pair(a: f32, b: f32, scale: f32) -> i32 {
    let qa = (a * scale).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    let qb = (b * scale).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
    ((qa as u16 as u32) | ((qb as u16 as u32) << 16)) as i32
}

#[inline]
pub fn unpack_i16_pair(packed: i32, scale: f32) -> (f32, f32) {
    let bits = packed as u32;
    let a = (bits & 0xFFFF) as u16 as i16;
    let b = (bits >> 16) as u16 as i16;
    (a as f32 / scale, b as f32 / scale)
}

/// One particle's four affine slots
pub type AffineBlock = [[i32; 2]; AFFINE_SLOTS];

/// Pack a velocity into the `[i32; 2]` velocity slot
pub fn pack_velocity(velocity: [f32; 3]) -> [i32; 2] {
    [
        pack_i16_pair(velocity[0], velocity[1], AFFINE_FIXED_SCALE),
        pack_i16_pair(velocity[2], 0.0, AFFINE_FIXED_SCALE),
    ]
}

pub fn unpack_velocity(slot: [i32; 2]) -> [f32; 3] {
    let (x, y) = unpack_i16_pair(slot[0], AFFINE_FIXED_SCALE);
    let (z, _) = unpack_i16_pair(slot[1], AFFINE_FIXED_SCALE);
    [x, y, z]
}

/// Affine rows go in slots 0..3, the velocity in [`VELOCITY_SLOT`]
pub fn pack_affine(rows: [[f32; 3]; 3], velocity: [f32; 3]) -> AffineBlock {
    let mut block = [[0; 2]; AFFINE_SLOTS];
    for (slot, row) in block.iter_mut().zip(rows) {
        *slot = pack_velocity(row);
    }
    block[VELOCITY_SLOT] = pack_velocity(velocity);
    block
}

pub fn unpack_affine(block: &AffineBlock) -> ([[f32; 3]; 3], [f32; 3]) {
    let rows = [
        unpack_velocity(block[0]),
        unpack_velocity(block[1]),
        unpack_velocity(block[2]),
    ];
    (rows, unpack_velocity(block[VELOCITY_SLOT]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn affine_block_keeps_velocity_in_its_slot() {
        let block = pack_affine([[1.0, 0.0, 0.0], [0.0, -2.0, 0.0], [0.0, 0.0, 0.5]], [0.25, -1.0, 3.0]);
        assert_eq!(block[VELOCITY_SLOT], pack_velocity([0.25, -1.0, 3.0]));
        let (rows, velocity) = unpack_affine(&block);
        assert_eq!(velocity, [0.25, -1.0, 3.0]);
        assert_eq!(rows[1], [0.0, -2.0, 0.0]);
    }

    #[test]
    fn capacity_rounds_to_workgroup() {
        assert_eq!(round_to_workgroup(1), 256);
        assert_eq!(round_to_workgroup(256), 256);
        assert_eq!(round_to_workgroup(1000), 1024);
        assert_eq!(ParticleStore::new(1000).radix_work_groups(), 4);
    }

    #[test]
    fn footprint_matches_closed_form() {
        let store = ParticleStore::new(1000);
        let expected = 1000 * 16 * 2 + 2 * 4 * 1024 * 8 + 1024 * 16 + 1024 * 8 + 1024 * 8 + 5 * 3 * 16 * 4;
        assert_eq!(store.footprint(), expected as u64);
    }

    #[test]
    fn active_count_is_bounded_by_capacity() {
        let mut store = ParticleStore::new(1024);
        store.set_active_count(5000);
        assert_eq!(store.active_count(), 1024);
        store.release();
        assert_eq!(store.active_count(), 0);
    }

    #[test]
    fn fixed_point_pairs_keep_sign() {
        let packed = pack_i16_pair(-1.5, 0.25, 1024.0);
        let (a, b) = unpack_i16_pair(packed, 1024.0);
        assert_eq!(a, -1.5);
        assert_eq!(b, 0.25);
    }
}
