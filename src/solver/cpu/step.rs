//! One solver sub-step on the CPU
//!
//! Order: manipulators (void, portal, emit), sort, collider rasterization,
//! P2G, grid update, G2P, detectors, render fields, store.

use std::time::Instant;

use bevy::prelude::*;

use super::instance::CpuInstance;
use super::state::{ParticleState, StepContext};
use super::{colliders, g2p, grid_update, manipulators, p2g, render, sort};
use crate::core::particle_store::AffineBlock;
use crate::manipulators::{ManipulatorIndices, ManipulatorRecord};
use crate::solver::backend::{BackendError, BackendResult, BufferKind, Kernel};

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

pub fn step_physics(instance: &mut CpuInstance) -> BackendResult<()> {
    let params = instance.simulation.ok_or_else(|| BackendError::NotReady {
        kernel: Kernel::StepPhysics,
        reason: "simulation parameters were never uploaded".to_string(),
    })?;
    let buffer_capacity = instance
        .buffers
        .view::<[f32; 4]>(BufferKind::PositionMass)?
        .len()
        .min(instance.buffers.view::<AffineBlock>(instance.next_affine())?.len());
    let ctx = StepContext::new(&params, buffer_capacity)?;
    instance.grid.ensure_size(ctx.node_count);

    let records: Vec<ManipulatorRecord> = instance
        .buffers
        .view::<ManipulatorRecord>(BufferKind::Manipulators)?
        .to_vec();
    if !records.is_empty() && !instance.manipulators_initialized {
        return Err(BackendError::NotReady {
            kernel: Kernel::StepPhysics,
            reason: "manipulators are not initialized".to_string(),
        });
    }
    let indices = instance
        .buffers
        .view::<ManipulatorIndices>(BufferKind::ManipulatorIndices)?
        .first()
        .copied()
        .unwrap_or_default();
    let mut stats = instance
        .buffers
        .view::<i32>(BufferKind::ManipulatorStatistics)?
        .to_vec();

    let start = Instant::now();
    let mut particles = ParticleState::load(&instance.buffers, instance.current_affine(), &ctx)?;

    manipulators::apply_voids(&mut particles, &records, &indices, &ctx, &mut stats);
    manipulators::apply_portals(&mut particles, &records, &indices, &ctx, &mut stats);
    manipulators::emit_particles(
        &mut particles,
        &records,
        &indices,
        &ctx,
        &mut instance.rng,
        &mut stats,
    );
    debug!("manipulators: {:.3}ms", elapsed_ms(start));

    sort::sort_particles(&mut particles, &mut instance.buffers, &ctx)?;

    let start = Instant::now();
    let grid = &mut instance.grid;
    colliders::rasterize(grid, &records, &indices, &ctx);
    instance.buffers.store(BufferKind::GridSdf, &grid.sdf)?;
    debug!("rasterize_colliders: {:.3}ms", elapsed_ms(start));

    let start = Instant::now();
    grid.clear_transfer();
    p2g::transfer_mass_momentum(&particles, grid, &ctx);
    p2g::transfer_forces(&particles, grid, &ctx);
    debug!("p2g: {:.3}ms", elapsed_ms(start));

    let start = Instant::now();
    grid_update::calculate_grid_velocities(grid, &ctx);
    grid_update::apply_force_fields(grid, &records, &indices, &ctx);
    colliders::resolve_collisions(grid, &records, &ctx, &mut stats);
    grid_update::apply_boundary_conditions(grid, &ctx);
    debug!("grid_update: {:.3}ms", elapsed_ms(start));

    let start = Instant::now();
    g2p::grid_to_particle(&mut particles, grid, &ctx);
    let escaped = g2p::remove_escaped_particles(&mut particles, &ctx);
    if escaped > 0 {
        debug!("Removed {} particles that left the container", escaped);
    }
    manipulators::count_detected(&particles, &records, &indices, &ctx, &mut stats);
    debug!("g2p: {:.3}ms", elapsed_ms(start));

    let start = Instant::now();
    let render = instance.render.unwrap_or_default();
    render::write_render_fields(grid, &mut instance.buffers, &ctx, render.blur_radius)?;
    debug!("render_fields: {:.3}ms", elapsed_ms(start));

    let next = instance.next_affine();
    particles.store(&mut instance.buffers, next, &ctx, render.diameter * 0.5)?;
    instance.buffers.store(BufferKind::ManipulatorStatistics, &stats)?;
    instance.affine_index = 1 - instance.affine_index;
    instance.steps += 1;

    if let Some(params) = instance.simulation.as_mut() {
        params.particle_count = particles.len() as i32;
    }
    Ok(())
}
