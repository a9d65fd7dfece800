//! Neural collider voxel representation
//!
//! A sparse set of voxels on a 32^3 grid, each with a 29-float embedding the
//! solver decodes into a signed distance field.

use bevy::prelude::*;

use crate::error::{LiquidError, LiquidResult};

pub const EMBEDDING_SIZE: usize = 29;
pub const ALIGNED_EMBEDDING_SIZE: usize = 32;
pub const VOXEL_COUNT_ALIGNMENT: usize = 32;
pub const EMBED_COORDINATES_COUNT: usize = 3;
pub const SDF_GRID_DIMENSION: usize = 32;
pub const SDF_APPROX_DIMENSION: usize = 40;
pub const SDF_GRID_SIZE: usize = SDF_GRID_DIMENSION * SDF_GRID_DIMENSION * SDF_GRID_DIMENSION;
pub const SDF_APPROX_SIZE: usize =
    SDF_APPROX_DIMENSION * SDF_APPROX_DIMENSION * SDF_APPROX_DIMENSION;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct NeuralRepresentation {
    /// Embedding width, must equal `EMBEDDING_SIZE`
    pub shape: usize,
    pub embeddings: Vec<f32>,
    /// xyz voxel coordinates, three per voxel
    pub vox_ids: Vec<i32>,
    pub bbox_min: Vec3,
    pub bbox_max: Vec3,
}

impl NeuralRepresentation {
    pub fn validate(&self) -> LiquidResult<()> {
        if self.shape != EMBEDDING_SIZE {
            return Err(LiquidError::Data(format!(
                "embedding width {} is not {}",
                self.shape, EMBEDDING_SIZE
            )));
        }
        if self.embeddings.len() % self.shape != 0 {
            return Err(LiquidError::Data(format!(
                "{} embedding values are not a multiple of {}",
                self.embeddings.len(),
                self.shape
            )));
        }
        if self.vox_ids.len() % EMBED_COORDINATES_COUNT != 0 {
            return Err(LiquidError::Data(format!(
                "{} voxel coordinates are not whole triples",
                self.vox_ids.len()
            )));
        }
        let voxels = self.vox_ids.len() / EMBED_COORDINATES_COUNT;
        if self.embeddings.len() / self.shape != voxels {
            return Err(LiquidError::Data(format!(
                "{} embeddings for {} voxels",
                self.embeddings.len() / self.shape,
                voxels
            )));
        }
        let grid = 0..SDF_GRID_DIMENSION as i32;
        if let Some(coords) = self
            .vox_ids
            .chunks_exact(EMBED_COORDINATES_COUNT)
            .find(|coords| !coords.iter().all(|c| grid.contains(c)))
        {
            return Err(LiquidError::Data(format!(
                "voxel {:?} is outside the {}^3 grid",
                coords, SDF_GRID_DIMENSION
            )));
        }
        Ok(())
    }

    pub fn voxel_count(&self) -> usize {
        self.vox_ids.len() / EMBED_COORDINATES_COUNT
    }

    /// Linear voxel ids padded to 32 entries, then 32-float aligned
    /// embeddings, then the SDF approximation block. Invalid data yields an
    /// empty blob.
    pub fn const_data(&self) -> Vec<f32> {
        if let Err(err) = self.validate() {
            error!("Incorrect neural collider data: {}", err);
            return Vec::new();
        }

        let voxels = self.voxel_count();
        let aligned_voxels = voxels.next_multiple_of(VOXEL_COUNT_ALIGNMENT);
        let mut data = vec![0.0; aligned_voxels + voxels * ALIGNED_EMBEDDING_SIZE + SDF_APPROX_SIZE];

        for (i, coords) in self.vox_ids.chunks_exact(EMBED_COORDINATES_COUNT).enumerate() {
            let linear = coords[0]
                + SDF_GRID_DIMENSION as i32 * coords[1]
                + (SDF_GRID_DIMENSION * SDF_GRID_DIMENSION) as i32 * coords[2];
            data[i] = linear as f32;

            let start = aligned_voxels + i * ALIGNED_EMBEDDING_SIZE;
            data[start..start + EMBEDDING_SIZE]
                .copy_from_slice(&self.embeddings[i * EMBEDDING_SIZE..(i + 1) * EMBEDDING_SIZE]);
        }
        data
    }

    pub fn memory_footprint(&self) -> u64 {
        let mut result = 0u64;
        result += (SDF_GRID_SIZE * 4 * 4) as u64; // voxel positions
        result += (2 * SDF_GRID_SIZE * 4 * 4) as u64; // voxel id grid
        result += (EMBEDDING_SIZE * self.voxel_count() * 4) as u64; // embeddings
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn representation(voxels: usize) -> NeuralRepresentation {
        NeuralRepresentation {
            shape: EMBEDDING_SIZE,
            embeddings: (0..voxels * EMBEDDING_SIZE).map(|v| v as f32).collect(),
            vox_ids: (0..voxels).flat_map(|i| [i as i32, 1, 2]).collect(),
            bbox_min: Vec3::splat(-1.0),
            bbox_max: Vec3::splat(1.0),
        }
    }

    #[test]
    fn mismatched_counts_are_rejected() {
        let mut bad = representation(2);
        bad.vox_ids.truncate(3);
        assert!(bad.validate().is_err());

        let mut bad = representation(2);
        bad.shape = 28;
        assert!(bad.validate().is_err());

        let mut bad = representation(2);
        bad.vox_ids.pop();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn voxels_outside_the_grid_are_rejected() {
        let mut bad = representation(2);
        bad.vox_ids[4] = 32;
        assert!(matches!(bad.validate(), Err(LiquidError::Data(_))));
        assert!(bad.const_data().is_empty());

        let mut bad = representation(2);
        bad.vox_ids[0] = -1;
        assert!(bad.validate().is_err());

        let mut edge = representation(1);
        edge.vox_ids = vec![31, 31, 31];
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn const_data_layout() {
        let rep = representation(2);
        let data = rep.const_data();
        assert_eq!(data.len(), 32 + 2 * 32 + SDF_APPROX_SIZE);
        assert_eq!(data[0], (0 + 32 + 2 * 1024) as f32);
        assert_eq!(data[1], (1 + 32 + 2 * 1024) as f32);
        assert_eq!(data[32], 0.0);
        assert_eq!(data[32 + 32 + 28], (2 * EMBEDDING_SIZE - 1) as f32);
        assert_eq!(data[32 + 29], 0.0);
    }

    #[test]
    fn invalid_data_gives_empty_blob() {
        let mut bad = representation(1);
        bad.embeddings.push(1.0);
        assert!(bad.const_data().is_empty());
    }

    #[test]
    fn footprint_counts_embeddings() {
        let rep = representation(10);
        let base = (32 * 32 * 32 * 16 * 3) as u64;
        assert_eq!(rep.memory_footprint(), base + 29 * 10 * 4);
    }
}
