//! Manipulator registry
//!
//! Keeps manipulators sorted by (kind, id) so every kind is one contiguous
//! record range, and converts them to and from the solver's flat buffers.

use bevy::prelude::*;

use super::record::{ManipulatorIndices, ManipulatorRecord};
use super::{Manipulator, ManipulatorData, ManipulatorId, ManipulatorKind};
use crate::config::STATISTICS_PER_MANIPULATOR;

/// Values needed to decode statistics
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct StatisticsContext {
    pub force_interaction_strength: f32,
}

#[derive(Clone, Debug, Default)]
pub struct ManipulatorRegistry {
    manipulators: Vec<Manipulator>,
    /// `type_index[k]` is the first record whose kind ordinal is >= k
    type_index: [usize; ManipulatorKind::TYPE_NUM + 1],
    indices: ManipulatorIndices,
    const_data: Vec<f32>,
    const_offsets: Vec<i32>,
    records: Vec<ManipulatorRecord>,
}

impl ManipulatorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge colliders into the manipulator list, sort, and rebuild the
    /// per-kind ranges and the constant data blob.
    pub fn rebuild(
        &mut self,
        manipulators: impl IntoIterator<Item = Manipulator>,
        colliders: impl IntoIterator<Item = Manipulator>,
    ) {
        let mut merged: Vec<Manipulator> = manipulators.into_iter().chain(colliders).collect();
        merged.sort_by_key(|m| (m.kind(), m.id));
        self.manipulators = merged;

        let count = self.manipulators.len();
        let mut cursor = 0;
        for kind in 0..=ManipulatorKind::TYPE_NUM {
            while cursor < count && self.manipulators[cursor].kind().ordinal() < kind {
                cursor += 1;
            }
            self.type_index[kind] = cursor;
        }
        self.type_index[ManipulatorKind::TYPE_NUM] = count;

        self.indices = ManipulatorIndices::default();
        for (slot, range) in self.indices.ranges.iter_mut().enumerate() {
            let kind = slot + 1;
            *range = [self.type_index[kind] as i32, self.type_index[kind + 1] as i32];
        }

        self.const_data.clear();
        self.const_offsets.clear();
        for manipulator in &self.manipulators {
            self.const_offsets.push(self.const_data.len() as i32);
            self.const_data.extend(manipulator.const_data());
        }

        self.records = vec![ManipulatorRecord::default(); count];
    }

    /// Fill one record per manipulator for the coming sub-step
    pub fn serialize_dynamic(
        &mut self,
        container_pos: Vec3,
        container_size: Vec3,
        dt: f32,
    ) -> &[ManipulatorRecord] {
        self.records.resize(self.manipulators.len(), ManipulatorRecord::default());

        for index in 0..self.manipulators.len() {
            let manipulator = &self.manipulators[index];
            let transform = manipulator.effective_transform(container_pos, container_size);
            let bounds = manipulator.bounds_for(&transform);

            let mut additional = manipulator.additional_data(dt);
            if let ManipulatorData::Portal(portal) = &manipulator.data {
                additional.x = portal
                    .linked
                    .and_then(|id| self.index_of(id))
                    .map_or(-1.0, |i| i as f32);
            }

            self.records[index] = ManipulatorRecord {
                transform: transform.to_cols_array(),
                previous_transform: manipulator.previous_transform().to_cols_array(),
                to_object_space: transform.inverse().to_cols_array(),
                position: transform.w_axis.truncate().to_array(),
                const_data_begin: self.const_offsets.get(index).copied().unwrap_or(0),
                scale: manipulator.scale.to_array(),
                _pad0: 0.0,
                rotation: manipulator.rotation.to_array(),
                bbox_min: bounds.min.to_array(),
                kind: manipulator.kind() as i32,
                bbox_max: bounds.max.to_array(),
                enabled: manipulator.enabled as i32,
                additional_data: additional.to_array(),
            };

            self.manipulators[index].set_previous_transform(transform);
        }

        &self.records
    }

    /// Demultiplex the per-manipulator counters (8 per manipulator)
    pub fn apply_statistics(&mut self, counters: &[i32], ctx: &StatisticsContext) {
        let needed = self.manipulators.len() * STATISTICS_PER_MANIPULATOR;
        if counters.len() < needed {
            warn!(
                "Statistics readback holds {} counters, {} manipulators need {}",
                counters.len(),
                self.manipulators.len(),
                needed
            );
            return;
        }

        for (manipulator, slots) in self
            .manipulators
            .iter_mut()
            .zip(counters.chunks_exact(STATISTICS_PER_MANIPULATOR))
        {
            manipulator.apply_statistics(slots, ctx);
        }
    }

    pub fn len(&self) -> usize {
        self.manipulators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.manipulators.is_empty()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Hand the manipulators back, leaving the registry empty
    pub fn take(&mut self) -> Vec<Manipulator> {
        let manipulators = std::mem::take(&mut self.manipulators);
        self.clear();
        manipulators
    }

    pub fn manipulators(&self) -> &[Manipulator] {
        &self.manipulators
    }

    pub fn get(&self, id: ManipulatorId) -> Option<&Manipulator> {
        self.manipulators.iter().find(|m| m.id == id)
    }

    pub fn get_mut(&mut self, id: ManipulatorId) -> Option<&mut Manipulator> {
        self.manipulators.iter_mut().find(|m| m.id == id)
    }

    pub fn index_of(&self, id: ManipulatorId) -> Option<usize> {
        self.manipulators.iter().position(|m| m.id == id)
    }

    pub fn has_kind(&self, kind: ManipulatorKind) -> bool {
        !self.range(kind).is_empty()
    }

    pub fn range(&self, kind: ManipulatorKind) -> std::ops::Range<usize> {
        match kind {
            ManipulatorKind::None => 0..0,
            _ => self.type_index[kind.ordinal()]..self.type_index[kind.ordinal() + 1],
        }
    }

    pub fn indices(&self) -> &ManipulatorIndices {
        &self.indices
    }

    pub fn const_data(&self) -> &[f32] {
        &self.const_data
    }

    pub fn const_offsets(&self) -> &[i32] {
        &self.const_offsets
    }

    pub fn records(&self) -> &[ManipulatorRecord] {
        &self.records
    }
}

/// Backend bytes used by a set of colliders: their own data plus one record
/// and one index per collider
pub fn collider_footprint<'a>(colliders: impl IntoIterator<Item = &'a Manipulator>) -> u64 {
    let mut total = 0u64;
    let mut count = 0u64;
    for collider in colliders {
        total += collider.memory_footprint();
        count += 1;
    }
    total + count * std::mem::size_of::<ManipulatorRecord>() as u64 + count * 4
}
