//! Analytic and neural colliders

use std::fmt;
use std::sync::Arc;

use bevy::prelude::*;

use super::ManipulatorId;
use super::neural::NeuralRepresentation;
use super::registry::StatisticsContext;
use crate::config::{F2I_SCALE, FORCE_STRENGTH_EXPONENT};

/// Host physics object a collider pushes forces into
pub trait RigidBodyLink: Send + Sync {
    fn apply_force_and_torque(&self, force: Vec3, torque: Vec3);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(i32)]
pub enum SdfShape {
    #[default]
    Sphere = 0,
    Box = 1,
    Capsule = 2,
    Torus = 3,
    Cylinder = 4,
}

impl SdfShape {
    pub fn from_ordinal(ordinal: i32) -> Self {
        match ordinal {
            1 => Self::Box,
            2 => Self::Capsule,
            3 => Self::Torus,
            4 => Self::Cylinder,
            _ => Self::Sphere,
        }
    }

    /// Signed distance from `p`, given in the collider's rotated frame
    /// relative to its position, for a collider of the given scale.
    ///
    /// Sphere radius and capsule/torus/cylinder radii follow `0.5 * scale.x`;
    /// heights follow `scale.y`.
    pub fn distance(self, p: Vec3, scale: Vec3) -> f32 {
        match self {
            SdfShape::Sphere => p.length() - 0.5 * scale.x,
            SdfShape::Box => {
                let q = p.abs() - 0.5 * scale;
                q.max(Vec3::ZERO).length() + q.max_element().min(0.0)
            }
            SdfShape::Capsule => {
                let half_height = 0.5 * scale.y;
                let clamped = Vec3::new(0.0, p.y.clamp(-half_height, half_height), 0.0);
                (p - clamped).length() - 0.5 * scale.x
            }
            SdfShape::Torus => {
                let major = 0.5 * scale.x;
                let minor = 0.25 * scale.y;
                let q = Vec2::new(Vec2::new(p.x, p.z).length() - major, p.y);
                q.length() - minor
            }
            SdfShape::Cylinder => {
                let d = Vec2::new(Vec2::new(p.x, p.z).length(), p.y).abs()
                    - Vec2::new(0.5 * scale.x, 0.5 * scale.y);
                d.max_element().min(0.0) + d.max(Vec2::ZERO).length()
            }
        }
    }
}

#[derive(Clone, Debug)]
pub enum ColliderShape {
    Analytic(SdfShape),
    Neural(NeuralRepresentation),
}

#[derive(Clone)]
pub struct Collider {
    pub shape: ColliderShape,
    /// Liquid can only exist inside an inverted collider
    pub invert: bool,
    /// 0 lets liquid slide freely, 1 makes it stick
    pub fluid_friction: f32,
    pub force_interaction: bool,
    pub rigid_body: Option<Arc<dyn RigidBodyLink>>,
    pub force: Vec3,
    pub torque: Vec3,
}

impl fmt::Debug for Collider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collider")
            .field("shape", &self.shape)
            .field("invert", &self.invert)
            .field("fluid_friction", &self.fluid_friction)
            .field("force_interaction", &self.force_interaction)
            .field("rigid_body", &self.rigid_body.is_some())
            .field("force", &self.force)
            .field("torque", &self.torque)
            .finish()
    }
}

impl Collider {
    pub fn analytic(shape: SdfShape) -> Self {
        Self::with_shape(ColliderShape::Analytic(shape))
    }

    pub fn neural(representation: NeuralRepresentation) -> Self {
        Self::with_shape(ColliderShape::Neural(representation))
    }

    fn with_shape(shape: ColliderShape) -> Self {
        Self {
            shape,
            invert: false,
            fluid_friction: 0.0,
            force_interaction: false,
            rigid_body: None,
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
        }
    }

    pub fn with_friction(mut self, friction: f32) -> Self {
        self.fluid_friction = friction.clamp(0.0, 1.0);
        self
    }

    pub fn inverted(mut self) -> Self {
        self.invert = true;
        self
    }

    pub fn with_rigid_body(mut self, link: Arc<dyn RigidBodyLink>) -> Self {
        self.force_interaction = true;
        self.rigid_body = Some(link);
        self
    }

    /// x: SDF shape, y: voxel count, z: +-1 invert sign, w: friction
    pub fn additional_data(&self) -> Vec4 {
        let (shape, voxels) = match &self.shape {
            ColliderShape::Analytic(shape) => (*shape as i32 as f32, 0.0),
            ColliderShape::Neural(representation) => (0.0, representation.voxel_count() as f32),
        };
        Vec4::new(
            shape,
            voxels,
            if self.invert { -1.0 } else { 1.0 },
            self.fluid_friction,
        )
    }

    pub fn memory_footprint(&self) -> u64 {
        match &self.shape {
            ColliderShape::Analytic(_) => 0,
            ColliderShape::Neural(representation) => representation.memory_footprint(),
        }
    }

    /// Decode force and torque from the collider's fixed-point counters and
    /// feed them to the rigid body
    pub fn apply_statistics(&mut self, id: ManipulatorId, slots: &[i32], ctx: &StatisticsContext) {
        let scale = (FORCE_STRENGTH_EXPONENT * ctx.force_interaction_strength).exp();
        self.force = scale * decode_fixed(&slots[0..3]);
        self.torque = scale * decode_fixed(&slots[3..6]);

        if !self.force_interaction {
            return;
        }
        match &self.rigid_body {
            Some(link) => link.apply_force_and_torque(self.force, self.torque),
            None => warn!(
                "Collider {:?} has force interaction enabled but no rigid body attached",
                id
            ),
        }
    }
}

/// Fixed-point `i32` counters back to floats
pub fn decode_fixed(values: &[i32]) -> Vec3 {
    Vec3::new(
        values[0] as f32 / F2I_SCALE,
        values[1] as f32 / F2I_SCALE,
        values[2] as f32 / F2I_SCALE,
    )
}

/// Inverse of [`decode_fixed`], saturating at the counter range
pub fn encode_fixed(value: f32) -> i32 {
    let scaled = (value * F2I_SCALE) as f64;
    scaled.clamp(i32::MIN as f64, i32::MAX as f64) as i32
}
