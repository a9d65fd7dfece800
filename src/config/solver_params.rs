use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::constants::{DEFAULT_GRAVITY, GRAVITY_THRESHOLD};

/// Physical parameters of the liquid solver
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverParams {
    /// Gravity in m/s^2, clamped per axis to +-100
    pub gravity: Vec3,

    /// Stiffness of the liquid
    pub fluid_stiffness: f32,

    /// Sharpness of the stiffness (equation of state exponent)
    pub fluid_stiffness_power: f32,

    /// Resting density in particles per cell. Higher values mean smaller
    /// particles and a higher quality simulation.
    pub particle_density: f32,

    /// Velocity limit of the particles
    pub maximum_velocity: f32,

    /// Non-zero values make an infinite flow. Plain liquid keeps this at 0.
    pub minimum_velocity: f32,

    pub viscosity: f32,

    /// Negative values give a spaghettification effect
    pub surface_tension: f32,

    /// Strength of the force acting on rigid bodies, exponential scale from
    /// exp(-4) to exp(4)
    pub force_interaction_strength: f32,
}

impl Default for SolverParams {
    fn default() -> Self {
        Self {
            gravity: DEFAULT_GRAVITY,
            fluid_stiffness: 0.1,
            fluid_stiffness_power: 3.0,
            particle_density: 1.0,
            maximum_velocity: 3.0,
            minimum_velocity: 0.0,
            viscosity: 0.0,
            surface_tension: 0.0,
            force_interaction_strength: 0.0,
        }
    }
}

impl SolverParams {
    /// Clamp each gravity axis to the supported range
    pub fn validate_gravity(&mut self) {
        self.gravity = self
            .gravity
            .clamp(Vec3::splat(-GRAVITY_THRESHOLD), Vec3::splat(GRAVITY_THRESHOLD));
    }

    /// Clamp every parameter into its supported range
    pub fn validate(&mut self) {
        self.validate_gravity();
        self.fluid_stiffness = self.fluid_stiffness.max(0.0);
        self.fluid_stiffness_power = self.fluid_stiffness_power.clamp(1.0, 8.0);
        self.particle_density = self.particle_density.clamp(0.1, 10.0);
        self.maximum_velocity = self.maximum_velocity.clamp(0.0, 10.0);
        self.minimum_velocity = self.minimum_velocity.clamp(0.0, 10.0);
        self.viscosity = self.viscosity.clamp(0.0, 1.0);
        self.surface_tension = self.surface_tension.clamp(-1.0, 1.0);
        self.force_interaction_strength = self.force_interaction_strength.clamp(-1.0, 1.0);
    }

    pub fn with_gravity(mut self, gravity: Vec3) -> Self {
        self.gravity = gravity;
        self.validate_gravity();
        self
    }
}

/// Rendering parameters the solver needs to size particles
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterialParams {
    pub particle_scale: f32,
    pub blur_radius: f32,
    pub roughness: f32,
    pub metalness: f32,
    pub opacity: f32,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            particle_scale: 1.5,
            blur_radius: 0.04,
            roughness: 0.04,
            metalness: 0.3,
            opacity: 3.0,
        }
    }
}
