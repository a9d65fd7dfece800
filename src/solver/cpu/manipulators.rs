//! Particle-level manipulator kernels: emitters, voids, portals, detectors
//!
//! Every kernel reads the sub-step's records and adds its counts to slot 0 of
//! the owning manipulator's statistics.

use bevy::prelude::*;
use rand::Rng;
use rand::rngs::StdRng;

use super::state::{ParticleState, StepContext};
use crate::config::STATISTICS_PER_MANIPULATOR;
use crate::manipulators::{ManipulatorIndices, ManipulatorKind, ManipulatorRecord};

/// Distance above the exit portal's centre, in its local units, where
/// teleported particles reappear. Just outside the unit cube.
const PORTAL_EXIT_OFFSET: f32 = 0.55;

#[inline]
fn inside_unit_cube(to_object: &Mat4, world: Vec3) -> bool {
    to_object.transform_point3(world).abs().cmple(Vec3::splat(0.5)).all()
}

#[inline]
fn add_count(stats: &mut [i32], record: usize, count: i32) {
    if let Some(slot) = stats.get_mut(record * STATISTICS_PER_MANIPULATOR) {
        *slot = slot.saturating_add(count);
    }
}

/// Enabled records of one kind with their record index
pub(super) fn enabled_records<'a>(
    records: &'a [ManipulatorRecord],
    indices: &ManipulatorIndices,
    kind: ManipulatorKind,
) -> Vec<(usize, &'a ManipulatorRecord)> {
    let range = indices.range(kind.ordinal());
    let end = range.end.min(records.len());
    let start = range.start.min(end);
    records[start..end]
        .iter()
        .enumerate()
        .map(|(offset, record)| (start + offset, record))
        .filter(|(_, record)| record.is_enabled())
        .collect()
}

/// Spawn `additional_data.x` particles uniformly inside each emitter's box
pub fn emit_particles(
    particles: &mut ParticleState,
    records: &[ManipulatorRecord],
    indices: &ManipulatorIndices,
    ctx: &StepContext,
    rng: &mut StdRng,
    stats: &mut [i32],
) {
    for (index, record) in enabled_records(records, indices, ManipulatorKind::Emitter) {
        let additional = record.additional_data();
        let room = ctx.capacity.saturating_sub(particles.len());
        let count = (additional.x.max(0.0) as usize).min(room);
        if count == 0 {
            continue;
        }

        let transform = record.transform();
        let velocity = (additional.yzw() / ctx.cell_size).clamp_length_max(ctx.velocity_limit);
        for _ in 0..count {
            let local = Vec3::new(
                rng.random_range(-0.5..0.5),
                rng.random_range(-0.5..0.5),
                rng.random_range(-0.5..0.5),
            );
            let world = transform.transform_point3(local);
            particles.push(ctx.clamp_to_grid(ctx.world_to_grid(world)), velocity);
        }
        add_count(stats, index, count as i32);
    }
}

/// Delete particles inside void boxes
pub fn apply_voids(
    particles: &mut ParticleState,
    records: &[ManipulatorRecord],
    indices: &ManipulatorIndices,
    ctx: &StepContext,
    stats: &mut [i32],
) {
    for (index, record) in enabled_records(records, indices, ManipulatorKind::Void) {
        let to_object = record.to_object_space();
        let removed = particles.retain(|p, _| !inside_unit_cube(&to_object, ctx.grid_to_world(p)));
        add_count(stats, index, removed as i32);
    }
}

/// Move particles inside a portal to just past its linked portal, rotating
/// their velocity with the change of frame
pub fn apply_portals(
    particles: &mut ParticleState,
    records: &[ManipulatorRecord],
    indices: &ManipulatorIndices,
    ctx: &StepContext,
    stats: &mut [i32],
) {
    let portals = enabled_records(records, indices, ManipulatorKind::Portal);

    for &(index, entry) in &portals {
        let link = entry.additional_data().x;
        if link < 0.0 {
            continue;
        }
        if link as usize == index {
            continue;
        }
        let Some(&(_, exit)) = portals.iter().find(|(i, _)| *i == link as usize) else {
            continue;
        };

        let to_entry = entry.to_object_space();
        let exit_transform = exit.transform();
        let rotation = Mat3::from_quat(exit.rotation() * entry.rotation().inverse());

        let mut teleported = 0;
        for i in 0..particles.len() {
            let world = ctx.grid_to_world(particles.positions[i]);
            if !inside_unit_cube(&to_entry, world) {
                continue;
            }
            let local = to_entry.transform_point3(world);
            let target = exit_transform.transform_point3(Vec3::new(local.x, PORTAL_EXIT_OFFSET, local.z));
            particles.positions[i] = ctx.clamp_to_grid(ctx.world_to_grid(target));
            particles.velocities[i] = rotation * particles.velocities[i];
            particles.affine[i] = rotation * particles.affine[i] * rotation.transpose();
            teleported += 1;
        }
        add_count(stats, index, teleported);
    }
}

/// Overwrite each detector's slot 0 with the particles currently inside
pub fn count_detected(
    particles: &ParticleState,
    records: &[ManipulatorRecord],
    indices: &ManipulatorIndices,
    ctx: &StepContext,
    stats: &mut [i32],
) {
    for (index, record) in enabled_records(records, indices, ManipulatorKind::Detector) {
        let to_object = record.to_object_space();
        let inside = particles
            .positions
            .iter()
            .filter(|&&p| inside_unit_cube(&to_object, ctx.grid_to_world(p)))
            .count();
        if let Some(slot) = stats.get_mut(index * STATISTICS_PER_MANIPULATOR) {
            *slot = inside as i32;
        }
    }
}
