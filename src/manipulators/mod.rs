//! Manipulators
//!
//! Scene objects that act on or observe the liquid. Each kind is one variant
//! of [`ManipulatorData`]; the registry serializes them into fixed records.

pub mod collider;
pub mod neural;
pub mod record;
pub mod registry;

use bevy::prelude::*;

pub use collider::{Collider, ColliderShape, RigidBodyLink, SdfShape};
pub use neural::NeuralRepresentation;
pub use record::{ManipulatorIndices, ManipulatorRecord};
pub use registry::{ManipulatorRegistry, StatisticsContext};

use crate::config::{EMITTER_CLAMP_FRACTION, STATISTICS_PER_MANIPULATOR};
use crate::math::{Aabb, transformed_unit_bounds};

/// Kind ordinals shared with the solver kernels
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(i32)]
pub enum ManipulatorKind {
    None = 0,
    Emitter = 1,
    Void = 2,
    ForceField = 3,
    AnalyticCollider = 4,
    NeuralCollider = 5,
    Detector = 6,
    Portal = 7,
}

impl ManipulatorKind {
    /// Number of kind ordinals, `None` included
    pub const TYPE_NUM: usize = 8;

    pub fn from_ordinal(ordinal: i32) -> Option<Self> {
        Some(match ordinal {
            0 => Self::None,
            1 => Self::Emitter,
            2 => Self::Void,
            3 => Self::ForceField,
            4 => Self::AnalyticCollider,
            5 => Self::NeuralCollider,
            6 => Self::Detector,
            7 => Self::Portal,
            _ => return None,
        })
    }

    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn is_collider(self) -> bool {
        matches!(self, Self::AnalyticCollider | Self::NeuralCollider)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManipulatorId(pub u32);

#[derive(Clone, Debug, PartialEq)]
pub struct Emitter {
    pub particles_per_second: f32,
    /// World-space velocity of emitted particles, in the emitter's frame
    pub initial_velocity: Vec3,
    /// Keep the emission volume inside the container
    pub clamp_to_container: bool,
    pub created_particles_per_frame: i32,
    pub created_particles_total: i64,
}

impl Default for Emitter {
    fn default() -> Self {
        Self {
            particles_per_second: 1000.0,
            initial_velocity: Vec3::ZERO,
            clamp_to_container: true,
            created_particles_per_frame: 0,
            created_particles_total: 0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Void {
    pub deleted_particles_per_frame: i32,
    pub deleted_particles_total: i64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum ForceFieldType {
    #[default]
    Radial = 0,
    Directional = 1,
    Swirl = 2,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum ForceFieldShape {
    #[default]
    Sphere = 0,
    Cube = 1,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ForceField {
    pub field_type: ForceFieldType,
    pub shape: ForceFieldShape,
    /// In [-1, 1], negative values push outward for radial fields
    pub strength: f32,
    /// In [0, 10], falloff with distance from the field surface
    pub distance_decay: f32,
}

impl Default for ForceField {
    fn default() -> Self {
        Self {
            field_type: ForceFieldType::Radial,
            shape: ForceFieldShape::Sphere,
            strength: 1.0,
            distance_decay: 1.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Detector {
    pub particles_inside: i32,
}

/// Particles entering a portal leave through the linked portal
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Portal {
    pub linked: Option<ManipulatorId>,
    pub teleported_particles_per_frame: i32,
}

#[derive(Clone, Debug)]
pub enum ManipulatorData {
    Emitter(Emitter),
    Void(Void),
    ForceField(ForceField),
    Collider(Collider),
    Detector(Detector),
    Portal(Portal),
}

#[derive(Clone, Debug)]
pub struct Manipulator {
    pub id: ManipulatorId,
    pub enabled: bool,
    pub position: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
    pub data: ManipulatorData,
    previous_transform: Option<Mat4>,
}

impl Manipulator {
    pub fn new(id: ManipulatorId, data: ManipulatorData) -> Self {
        Self {
            id,
            enabled: true,
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            data,
            previous_transform: None,
        }
    }

    pub fn emitter(id: u32, emitter: Emitter) -> Self {
        Self::new(ManipulatorId(id), ManipulatorData::Emitter(emitter))
    }

    pub fn void(id: u32) -> Self {
        Self::new(ManipulatorId(id), ManipulatorData::Void(Void::default()))
    }

    pub fn force_field(id: u32, field: ForceField) -> Self {
        Self::new(ManipulatorId(id), ManipulatorData::ForceField(field))
    }

    pub fn collider(id: u32, collider: Collider) -> Self {
        Self::new(ManipulatorId(id), ManipulatorData::Collider(collider))
    }

    pub fn detector(id: u32) -> Self {
        Self::new(ManipulatorId(id), ManipulatorData::Detector(Detector::default()))
    }

    pub fn portal(id: u32, linked: Option<u32>) -> Self {
        Self::new(
            ManipulatorId(id),
            ManipulatorData::Portal(Portal {
                linked: linked.map(ManipulatorId),
                ..Portal::default()
            }),
        )
    }

    pub fn with_transform(mut self, position: Vec3, rotation: Quat, scale: Vec3) -> Self {
        self.position = position;
        self.rotation = rotation;
        self.scale = scale;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn kind(&self) -> ManipulatorKind {
        match &self.data {
            ManipulatorData::Emitter(_) => ManipulatorKind::Emitter,
            ManipulatorData::Void(_) => ManipulatorKind::Void,
            ManipulatorData::ForceField(_) => ManipulatorKind::ForceField,
            ManipulatorData::Collider(collider) => match collider.shape {
                ColliderShape::Analytic(_) => ManipulatorKind::AnalyticCollider,
                ColliderShape::Neural(_) => ManipulatorKind::NeuralCollider,
            },
            ManipulatorData::Detector(_) => ManipulatorKind::Detector,
            ManipulatorData::Portal(_) => ManipulatorKind::Portal,
        }
    }

    pub fn transform(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(self.scale, self.rotation, self.position)
    }

    /// Transform of the previous serialized sub-step, or the current one
    /// before the first serialization
    pub fn previous_transform(&self) -> Mat4 {
        self.previous_transform.unwrap_or_else(|| self.transform())
    }

    pub(crate) fn set_previous_transform(&mut self, transform: Mat4) {
        self.previous_transform = Some(transform);
    }

    /// Type-specific scalars packed into the record's additional data slot
    pub fn additional_data(&self, dt: f32) -> Vec4 {
        match &self.data {
            ManipulatorData::Emitter(emitter) => {
                let velocity = self.rotation * emitter.initial_velocity;
                Vec4::new(
                    (emitter.particles_per_second * dt).floor(),
                    velocity.x,
                    velocity.y,
                    velocity.z,
                )
            }
            ManipulatorData::ForceField(field) => Vec4::new(
                field.field_type as i32 as f32,
                field.strength,
                field.distance_decay,
                field.shape as i32 as f32,
            ),
            ManipulatorData::Collider(collider) => collider.additional_data(),
            ManipulatorData::Portal(portal) => Vec4::new(
                portal.linked.map_or(-1.0, |id| id.0 as f32),
                0.0,
                0.0,
                0.0,
            ),
            ManipulatorData::Void(_) | ManipulatorData::Detector(_) => Vec4::ZERO,
        }
    }

    /// One-time constant data; only neural colliders carry any
    pub fn const_data(&self) -> Vec<f32> {
        match &self.data {
            ManipulatorData::Collider(collider) => match &collider.shape {
                ColliderShape::Neural(representation) => representation.const_data(),
                ColliderShape::Analytic(_) => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// Bounds reported in the record: object-space bounds for neural
    /// colliders, world bounds of the transformed unit cube otherwise
    pub(crate) fn bounds_for(&self, transform: &Mat4) -> Aabb {
        match &self.data {
            ManipulatorData::Collider(Collider {
                shape: ColliderShape::Neural(representation),
                ..
            }) => Aabb {
                min: representation.bbox_min,
                max: representation.bbox_max,
            },
            _ => transformed_unit_bounds(transform),
        }
    }

    /// Bytes this manipulator keeps on the backend beyond its record
    pub fn memory_footprint(&self) -> u64 {
        match &self.data {
            ManipulatorData::Collider(collider) => collider.memory_footprint(),
            _ => 0,
        }
    }

    /// Effective transform for this sub-step. Clamped emitters are moved so
    /// their unit cube stays within the container's inner region.
    pub fn effective_transform(&self, container_pos: Vec3, container_size: Vec3) -> Mat4 {
        let transform = self.transform();
        match &self.data {
            ManipulatorData::Emitter(emitter) if emitter.clamp_to_container => {
                clamp_to_container(transform, container_pos, container_size)
            }
            _ => transform,
        }
    }

    /// Write this manipulator's counters back into its typed fields
    pub fn apply_statistics(&mut self, slots: &[i32], ctx: &StatisticsContext) {
        debug_assert_eq!(slots.len(), STATISTICS_PER_MANIPULATOR);
        let id = self.id;
        match &mut self.data {
            ManipulatorData::Emitter(emitter) => {
                emitter.created_particles_per_frame = slots[0];
                emitter.created_particles_total += slots[0] as i64;
            }
            ManipulatorData::Void(void) => {
                void.deleted_particles_per_frame = slots[0];
                void.deleted_particles_total += slots[0] as i64;
            }
            ManipulatorData::Detector(detector) => {
                detector.particles_inside = slots[0];
            }
            ManipulatorData::Portal(portal) => {
                portal.teleported_particles_per_frame = slots[0];
            }
            ManipulatorData::Collider(collider) => collider.apply_statistics(id, slots, ctx),
            ManipulatorData::ForceField(_) => {}
        }
    }
}

/// Translate `transform` so its unit cube lies within
/// `container_pos +- EMITTER_CLAMP_FRACTION * container_size`. Axes that are
/// already inside are left unchanged.
pub fn clamp_to_container(transform: Mat4, container_pos: Vec3, container_size: Vec3) -> Mat4 {
    let bounds = transformed_unit_bounds(&transform);
    let container_min = container_pos - EMITTER_CLAMP_FRACTION * container_size;
    let container_max = container_pos + EMITTER_CLAMP_FRACTION * container_size;

    let offsets_min = (container_min - bounds.min).max(Vec3::ZERO);
    let offsets_max = (bounds.max - container_max).max(Vec3::ZERO);

    Mat4::from_translation(offsets_min - offsets_max) * transform
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emitter_additional_data_carries_spawn_count_and_velocity() {
        let emitter = Manipulator::emitter(
            1,
            Emitter {
                particles_per_second: 250.0,
                initial_velocity: Vec3::X,
                ..Emitter::default()
            },
        )
        .with_transform(Vec3::ZERO, Quat::from_rotation_z(std::f32::consts::FRAC_PI_2), Vec3::ONE);
        let data = emitter.additional_data(0.01);
        assert_eq!(data.x, 2.0);
        assert!(data.yzw().abs_diff_eq(Vec3::Y, 1e-6));
    }

    #[test]
    fn clamp_moves_only_violating_axes() {
        let transform = Mat4::from_scale_rotation_translation(
            Vec3::splat(2.0),
            Quat::IDENTITY,
            Vec3::new(4.5, 0.0, -4.4),
        );
        let clamped = clamp_to_container(transform, Vec3::ZERO, Vec3::splat(10.0));
        let bounds = transformed_unit_bounds(&clamped);
        assert!((bounds.max.x - 4.5).abs() < 1e-5);
        assert!((bounds.min.z + 4.5).abs() < 1e-5);
        assert_eq!(clamped.w_axis.y, 0.0);
    }

    #[test]
    fn kinds_sort_by_ordinal() {
        assert!(ManipulatorKind::Emitter < ManipulatorKind::Void);
        assert!(ManipulatorKind::AnalyticCollider < ManipulatorKind::NeuralCollider);
        assert_eq!(ManipulatorKind::from_ordinal(7), Some(ManipulatorKind::Portal));
        assert_eq!(ManipulatorKind::from_ordinal(8), None);
    }

    #[test]
    fn statistics_accumulate_totals() {
        let mut void = Manipulator::void(3);
        let ctx = StatisticsContext::default();
        void.apply_statistics(&[5, 0, 0, 0, 0, 0, 0, 0], &ctx);
        void.apply_statistics(&[2, 0, 0, 0, 0, 0, 0, 0], &ctx);
        match &void.data {
            ManipulatorData::Void(v) => {
                assert_eq!(v.deleted_particles_per_frame, 2);
                assert_eq!(v.deleted_particles_total, 7);
            }
            _ => unreachable!(),
        }
    }
}
