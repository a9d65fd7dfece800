//! Baked particle snapshots
//!
//! Little-endian layout: `i32` magic header, `i32` particle count, `count`
//! xyz `f32` positions, then `count` pairs of `i32` affine velocity words.

use bevy::prelude::*;

use crate::config::BAKED_LIQUID_HEADER_VALUE;
use crate::error::{LiquidError, LiquidResult};

/// Particle positions with one packed velocity slot per particle
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BakedState {
    positions: Vec<Vec3>,
    affine_velocity: Vec<[i32; 2]>,
}

impl BakedState {
    pub fn new(positions: Vec<Vec3>, affine_velocity: Vec<[i32; 2]>) -> LiquidResult<Self> {
        if positions.len() != affine_velocity.len() {
            return Err(LiquidError::Data(format!(
                "{} positions but {} velocity slots",
                positions.len(),
                affine_velocity.len()
            )));
        }
        Ok(Self {
            positions,
            affine_velocity,
        })
    }

    /// Particles with zero velocity
    pub fn at_rest(positions: Vec<Vec3>) -> Self {
        let affine_velocity = vec![[0, 0]; positions.len()];
        Self {
            positions,
            affine_velocity,
        }
    }

    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// Packed velocity slot of each particle
    pub fn affine_velocity(&self) -> &[[i32; 2]] {
        &self.affine_velocity
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn from_bytes(bytes: &[u8], max_particles: usize) -> LiquidResult<Self> {
        let mut reader = WordReader { bytes, offset: 0 };

        let header = reader.read_i32()?;
        if header != BAKED_LIQUID_HEADER_VALUE {
            return Err(LiquidError::Data(format!(
                "baked state header {:#010x} does not match {:#010x}",
                header, BAKED_LIQUID_HEADER_VALUE
            )));
        }

        let count = reader.read_i32()?;
        if count < 0 || count as usize > max_particles {
            return Err(LiquidError::Data(format!(
                "baked state holds {} particles, capacity is {}",
                count, max_particles
            )));
        }
        let count = count as usize;

        let expected = 8 + count * 3 * 4 + count * 2 * 4;
        if bytes.len() < expected {
            return Err(LiquidError::Data(format!(
                "baked state is truncated: {} bytes, expected {}",
                bytes.len(),
                expected
            )));
        }

        let mut positions = Vec::with_capacity(count);
        for _ in 0..count {
            positions.push(Vec3::new(reader.read_f32()?, reader.read_f32()?, reader.read_f32()?));
        }
        let mut affine_velocity = Vec::with_capacity(count);
        for _ in 0..count {
            affine_velocity.push([reader.read_i32()?, reader.read_i32()?]);
        }

        Ok(Self {
            positions,
            affine_velocity,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let count = self.positions.len();
        let mut out = Vec::with_capacity(8 + count * 20);
        out.extend_from_slice(&BAKED_LIQUID_HEADER_VALUE.to_le_bytes());
        out.extend_from_slice(&(count as i32).to_le_bytes());
        for p in &self.positions {
            for v in p.to_array() {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        for pair in &self.affine_velocity {
            out.extend_from_slice(&pair[0].to_le_bytes());
            out.extend_from_slice(&pair[1].to_le_bytes());
        }
        out
    }

    /// PositionMass words (w = 1) for the backend
    pub fn position_mass(&self) -> Vec<[f32; 4]> {
        self.positions.iter().map(|p| [p.x, p.y, p.z, 1.0]).collect()
    }
}

struct WordReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl WordReader<'_> {
    fn read_word(&mut self) -> LiquidResult<[u8; 4]> {
        let word = self
            .bytes
            .get(self.offset..self.offset + 4)
            .ok_or_else(|| LiquidError::Data("baked state is truncated".into()))?;
        self.offset += 4;
        Ok([word[0], word[1], word[2], word[3]])
    }

    fn read_i32(&mut self) -> LiquidResult<i32> {
        Ok(i32::from_le_bytes(self.read_word()?))
    }

    fn read_f32(&mut self) -> LiquidResult<f32> {
        Ok(f32::from_le_bytes(self.read_word()?))
    }
}
