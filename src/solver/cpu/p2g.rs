//! Particle-to-Grid (P2G) transfer operations
//!
//! Transfers mass and APIC momentum from particles to grid nodes, then the
//! pressure force of the weakly compressible equation of state.

use bevy::prelude::*;

use super::state::{GridState, ParticleState, StepContext};
use crate::core::kernel::{GridInterpolation, inv_d};

/// Every particle carries the same mass
pub const PARTICLE_MASS: f32 = 1.0;

/// Lower bound of the equation of state before surface tension
const EOS_PRESSURE_FLOOR: f32 = -0.1;

pub fn transfer_mass_momentum(particles: &ParticleState, grid: &mut GridState, ctx: &StepContext) {
    for i in 0..particles.len() {
        let position = particles.positions[i];
        let velocity = particles.velocities[i];
        let affine = particles.affine[i];
        let interpolation = GridInterpolation::compute_for_particle(position);

        for (coord, weight, cell_distance) in interpolation.iter_neighbors(position) {
            let Some(node) = ctx.node_index(coord) else {
                continue;
            };
            let q = affine * cell_distance;
            let mass_contribution = weight * PARTICLE_MASS;
            grid.mass[node] += mass_contribution;
            grid.momentum[node] += mass_contribution * (velocity + q);
        }
    }
}

/// Equation of state: `max(floor, k ((rho / rho0)^gamma - 1))`. Surface
/// tension lowers the floor so the liquid can hold together under tension.
#[inline]
pub fn eos_pressure(density: f32, ctx: &StepContext) -> f32 {
    let floor = EOS_PRESSURE_FLOOR - ctx.stiffness * ctx.surface_tension.max(0.0);
    let pressure = ctx.stiffness * ((density / ctx.rest_density).powf(ctx.stiffness_power) - 1.0);
    pressure.max(floor)
}

pub fn transfer_forces(particles: &ParticleState, grid: &mut GridState, ctx: &StepContext) {
    let inv_d = inv_d(1.0);

    for &position in &particles.positions {
        let interpolation = GridInterpolation::compute_for_particle(position);

        let mut density = 0.0;
        for (coord, weight, _) in interpolation.iter_neighbors(position) {
            if let Some(node) = ctx.node_index(coord) {
                density += grid.mass[node] * weight;
            }
        }
        if density <= 0.0 {
            continue;
        }

        let volume = PARTICLE_MASS / density;
        let stress = Mat3::IDENTITY * -eos_pressure(density, ctx);
        let eq_16_term_0 = stress * (-volume * inv_d * ctx.dt);

        for (coord, weight, cell_distance) in interpolation.iter_neighbors(position) {
            if let Some(node) = ctx.node_index(coord) {
                grid.momentum[node] += eq_16_term_0 * (weight * cell_distance);
            }
        }
    }
}
