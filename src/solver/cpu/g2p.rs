//! Grid-to-Particle (G2P) transfer operations
//!
//! Gathers velocity and the APIC affine matrix back to particles, then
//! advects them.

use bevy::prelude::*;

use super::state::{GridState, ParticleState, StepContext};
use crate::config::DIVERGENCE_DECAY_MAX;
use crate::core::kernel::GridInterpolation;
use crate::math::{DecomposedTensor, outer_product};

pub fn grid_to_particle(particles: &mut ParticleState, grid: &GridState, ctx: &StepContext) {
    // Damps the volumetric part of the affine matrix; the deviatoric part
    // carries the rotation and shear
    let spherical_scale = 1.0 - ctx.divergence_decay / DIVERGENCE_DECAY_MAX;

    for i in 0..particles.len() {
        let position = particles.positions[i];
        let interpolation = GridInterpolation::compute_for_particle(position);

        let mut velocity = Vec3::ZERO;
        let mut b = Mat3::ZERO;
        for (coord, weight, cell_distance) in interpolation.iter_neighbors(position) {
            if let Some(node) = ctx.node_index(coord) {
                let weighted_velocity = grid.velocity[node] * weight;
                velocity += weighted_velocity;
                b += outer_product(weighted_velocity, cell_distance);
            }
        }

        let mut affine = DecomposedTensor::decompose(&(b * ctx.affine_amount));
        affine.spherical_part *= spherical_scale;

        velocity = velocity.clamp_length_max(ctx.velocity_limit);
        if velocity.length() < ctx.minimum_velocity {
            velocity = Vec3::ZERO;
        }

        particles.velocities[i] = velocity;
        particles.affine[i] = affine.recompose();
        particles.positions[i] = position + velocity * ctx.dt;
    }
}

/// Drop particles that went non-finite or left the grid, clamp the rest so
/// their stencil stays inside. Returns how many were removed.
pub fn remove_escaped_particles(particles: &mut ParticleState, ctx: &StepContext) -> usize {
    let extent = ctx.dims.as_vec3();
    let removed = particles.retain(|p, v| {
        p.is_finite() && v.is_finite() && p.cmpge(Vec3::ZERO).all() && p.cmplt(extent).all()
    });
    for position in &mut particles.positions {
        *position = ctx.clamp_to_grid(*position);
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solver::params::SimulationParams;

    fn context() -> StepContext {
        let params = SimulationParams {
            grid_size: [8.0, 8.0, 8.0],
            node_count: 512,
            container_scale: [1.0, 1.0, 1.0],
            time_step: 0.5,
            affine_amount: 4.0,
            velocity_limit: 1.0,
            minimum_velocity: 0.01,
            max_particle_count: 64,
            ..SimulationParams::default()
        };
        StepContext::new(&params, 64).unwrap()
    }

    #[test]
    fn uniform_grid_velocity_is_recovered_and_clamped() {
        let ctx = context();
        let mut grid = GridState::default();
        grid.ensure_size(ctx.node_count);
        grid.velocity.fill(Vec3::new(0.4, 0.0, 0.0));

        let mut particles = ParticleState::default();
        particles.push(Vec3::new(4.2, 4.6, 3.3), Vec3::ZERO);
        grid_to_particle(&mut particles, &grid, &ctx);

        assert!(particles.velocities[0].abs_diff_eq(Vec3::new(0.4, 0.0, 0.0), 1e-5));
        assert!(particles.affine[0].abs_diff_eq(Mat3::ZERO, 1e-5));
        assert!((particles.positions[0].x - 4.4).abs() < 1e-5);

        grid.velocity.fill(Vec3::new(3.0, 0.0, 0.0));
        grid_to_particle(&mut particles, &grid, &ctx);
        assert!((particles.velocities[0].length() - 1.0).abs() < 1e-5);
    }

    #[test]
    fn slow_particles_come_to_rest() {
        let ctx = context();
        let mut grid = GridState::default();
        grid.ensure_size(ctx.node_count);
        grid.velocity.fill(Vec3::new(0.005, 0.0, 0.0));

        let mut particles = ParticleState::default();
        particles.push(Vec3::new(4.0, 4.0, 4.0), Vec3::ZERO);
        grid_to_particle(&mut particles, &grid, &ctx);
        assert_eq!(particles.velocities[0], Vec3::ZERO);
    }

    #[test]
    fn escaped_and_invalid_particles_are_removed() {
        let ctx = context();
        let mut particles = ParticleState::default();
        particles.push(Vec3::new(4.0, 4.0, 4.0), Vec3::ZERO);
        particles.push(Vec3::new(f32::NAN, 4.0, 4.0), Vec3::ZERO);
        particles.push(Vec3::new(9.0, 4.0, 4.0), Vec3::ZERO);
        particles.push(Vec3::new(0.2, 4.0, 4.0), Vec3::ZERO);

        assert_eq!(remove_escaped_particles(&mut particles, &ctx), 2);
        assert_eq!(particles.len(), 2);
        assert!(particles.positions.iter().all(|p| p.x >= 1.0));
    }
}
