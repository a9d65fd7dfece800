//! Per-step simulation parameter block

use bevy::prelude::*;
use bytemuck::{Pod, Zeroable};

use crate::config::{
    DIVERGENCE_DECAY_C0, DIVERGENCE_DECAY_C1, DIVERGENCE_DECAY_C2, DIVERGENCE_DECAY_MAX,
    GRAVITY_UPLOAD_SCALE, LiquidConfig,
};
use crate::core::GridLayout;

/// Parameter block mirrored by the solver kernels. Rebuilt every sub-step.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct SimulationParams {
    pub grid_size: [f32; 3],
    pub particle_count: i32,

    pub container_scale: [f32; 3],
    pub node_count: i32,

    pub container_pos: [f32; 3],
    pub time_step: f32,

    pub gravity: [f32; 3],
    pub simulation_frame: i32,

    pub blur_direction: [f32; 3],
    pub affine_amount: f32,

    pub particle_translation: [f32; 3],
    pub velocity_limit: f32,

    pub liquid_stiffness: f32,
    pub rest_density: f32,
    pub surface_tension: f32,
    pub affine_divergence_decay: f32,

    pub minimum_velocity: f32,
    pub blur_normalization_constant: f32,
    pub max_particle_count: i32,
    pub visualize_sdf: i32,

    // Trailing extension, kept 16-byte aligned
    pub liquid_stiffness_power: f32,
    pub _pad: [f32; 3],
}

impl SimulationParams {
    /// Refresh the block from the current config, grid and step counters.
    /// Fields owned by the kernels (blur direction, translation, blur
    /// normalization, particle count) are left untouched.
    pub fn refresh(
        &mut self,
        config: &LiquidConfig,
        grid: &GridLayout,
        timestep: f32,
        simulation_frame: i32,
    ) {
        let solver = &config.solver;
        self.grid_size = grid.dims.as_vec3().to_array();
        self.container_scale = config.container_size.to_array();
        self.node_count = grid.node_count as i32;
        self.container_pos = config.container_pos.to_array();
        self.time_step = timestep;
        self.gravity = (solver.gravity / GRAVITY_UPLOAD_SCALE).to_array();
        self.simulation_frame = simulation_frame;
        self.affine_amount = 4.0 * (1.0 - solver.viscosity);
        self.velocity_limit = solver.maximum_velocity;
        self.liquid_stiffness = solver.fluid_stiffness;
        self.rest_density = solver.particle_density;
        self.surface_tension = solver.surface_tension;
        self.affine_divergence_decay = divergence_decay_curve(timestep);
        self.minimum_velocity = solver.minimum_velocity;
        self.max_particle_count = config.max_num_particles as i32;
        self.visualize_sdf = config.visualize_sdf as i32;
        self.liquid_stiffness_power = solver.fluid_stiffness_power;
    }

    pub fn gravity(&self) -> Vec3 {
        Vec3::from_array(self.gravity)
    }

    pub fn container_pos(&self) -> Vec3 {
        Vec3::from_array(self.container_pos)
    }

    pub fn container_scale(&self) -> Vec3 {
        Vec3::from_array(self.container_scale)
    }

    pub fn grid_size(&self) -> UVec3 {
        Vec3::from_array(self.grid_size).as_uvec3()
    }
}

/// Stability calibration curve for the affine divergence decay.
///
/// `f(x) = 1.8 a / (a + 1)` with `a = (0.177 - 0.85 x + 9 x^2) / 1.8`.
pub fn divergence_decay_curve(x: f32) -> f32 {
    let a = (DIVERGENCE_DECAY_C0 - DIVERGENCE_DECAY_C1 * x + DIVERGENCE_DECAY_C2 * x * x)
        / DIVERGENCE_DECAY_MAX;
    DIVERGENCE_DECAY_MAX * a / (a + 1.0)
}

/// Sub-step length for a frame of `dt` seconds
pub fn compute_timestep(
    sim_time_per_sec: f32,
    dt: f32,
    iterations_per_frame: u32,
    time_step_max: f32,
) -> f32 {
    let iterations = iterations_per_frame.max(1) as f32;
    (sim_time_per_sec * dt / iterations).min(time_step_max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_layout_is_stable() {
        assert_eq!(std::mem::size_of::<SimulationParams>(), 144);
    }

    #[test]
    fn timestep_is_clamped_to_max() {
        assert_eq!(compute_timestep(40.0, 0.1, 2, 1.0), 1.0);
        assert!((compute_timestep(40.0, 0.01, 2, 1.0) - 0.2).abs() < 1e-6);
    }

    #[test]
    fn divergence_decay_matches_calibration() {
        let x = 0.5_f32;
        let a = (0.177 - 0.85 * x + 9.0 * x * x) / 1.8;
        assert_eq!(divergence_decay_curve(x), 1.8 * a / (a + 1.0));
        assert!(divergence_decay_curve(100.0) > 1.79);
    }

    #[test]
    fn refresh_scales_gravity_and_viscosity() {
        let mut config = LiquidConfig::default();
        config.solver.viscosity = 0.25;
        let grid = GridLayout::new(config.container_size, config.grid_resolution);
        let mut params = SimulationParams::default();
        params.refresh(&config, &grid, 0.5, 7);
        assert!((params.gravity[1] + 0.0981).abs() < 1e-6);
        assert_eq!(params.affine_amount, 3.0);
        assert_eq!(params.simulation_frame, 7);
        assert_eq!(params.node_count, 128 * 128 * 128);
    }
}
