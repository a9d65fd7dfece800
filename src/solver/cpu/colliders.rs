//! Collider rasterization and grid-velocity response
//!
//! Analytic colliders are evaluated exactly. Neural colliders are
//! approximated by the box of their embedding bounds.

use bevy::prelude::*;

use super::manipulators::enabled_records;
use super::state::{GridState, StepContext};
use crate::config::STATISTICS_PER_MANIPULATOR;
use crate::manipulators::collider::encode_fixed;
use crate::manipulators::{ManipulatorIndices, ManipulatorKind, ManipulatorRecord, SdfShape};
use crate::math::{Aabb, UNIT_CUBE_CORNERS};

/// Band around collider surfaces, in cells, that gets normals and responds
const SURFACE_BAND_CELLS: f32 = 2.0;

/// Signed world distance from `world` to the collider surface. Negative
/// inside the solid; inverted colliders are solid outside their shape.
pub fn collider_distance(record: &ManipulatorRecord, world: Vec3) -> f32 {
    let additional = record.additional_data();
    let sign = if additional.z < 0.0 { -1.0 } else { 1.0 };
    let scale = record.scale();

    let distance = if record.kind == ManipulatorKind::NeuralCollider as i32 {
        let local = record.to_object_space().transform_point3(world);
        let min = Vec3::from_array(record.bbox_min);
        let max = Vec3::from_array(record.bbox_max);
        let q = (local - (min + max) * 0.5).abs() - (max - min) * 0.5;
        (q.max(Vec3::ZERO).length() + q.max_element().min(0.0)) * scale.min_element()
    } else {
        let local = record.rotation().inverse() * (world - record.position());
        SdfShape::from_ordinal(additional.x as i32).distance(local, scale)
    };
    sign * distance
}

/// World region whose nodes can be affected by a collider
fn influence_bounds(record: &ManipulatorRecord, ctx: &StepContext) -> Option<Aabb> {
    if record.additional_data().z < 0.0 {
        return None;
    }
    let margin = Vec3::splat(SURFACE_BAND_CELLS * ctx.cell_size);
    if record.kind == ManipulatorKind::NeuralCollider as i32 {
        let transform = record.transform();
        let min = Vec3::from_array(record.bbox_min);
        let max = Vec3::from_array(record.bbox_max);
        let mut bounds = Aabb::EMPTY;
        for corner in UNIT_CUBE_CORNERS {
            let local = (min + max) * 0.5 + (max - min) * corner;
            bounds.grow(transform.transform_point3(local));
        }
        return Some(Aabb {
            min: bounds.min - margin,
            max: bounds.max + margin,
        });
    }
    // Capsules and tori reach past the unit cube by up to half the scale
    let min = Vec3::from_array(record.bbox_min);
    let max = Vec3::from_array(record.bbox_max);
    let reach = Vec3::splat(record.scale().max_element() * 0.5) + margin;
    Some(Aabb {
        min: min - reach,
        max: max + reach,
    })
}

fn collider_records<'a>(
    records: &'a [ManipulatorRecord],
    indices: &ManipulatorIndices,
) -> Vec<(usize, &'a ManipulatorRecord)> {
    let mut colliders = enabled_records(records, indices, ManipulatorKind::AnalyticCollider);
    colliders.extend(enabled_records(records, indices, ManipulatorKind::NeuralCollider));
    colliders
}

/// Write the nearest collider distance and id into every node, then outward
/// normals in the surface band
pub fn rasterize(
    grid: &mut GridState,
    records: &[ManipulatorRecord],
    indices: &ManipulatorIndices,
    ctx: &StepContext,
) {
    for (index, record) in collider_records(records, indices) {
        let (lo, hi) = match influence_bounds(record, ctx) {
            Some(bounds) => (
                ctx.world_to_grid(bounds.min).floor().max(Vec3::ZERO).as_uvec3(),
                ctx.world_to_grid(bounds.max).ceil().as_uvec3().min(ctx.dims),
            ),
            None => (UVec3::ZERO, ctx.dims),
        };

        for z in lo.z..hi.z {
            for y in lo.y..hi.y {
                for x in lo.x..hi.x {
                    let coord = UVec3::new(x, y, z);
                    let Some(node) = ctx.node_index(coord.as_ivec3()) else {
                        continue;
                    };
                    let distance = collider_distance(record, ctx.node_world(coord));
                    if distance < grid.sdf[node] {
                        grid.sdf[node] = distance;
                        grid.collider[node] = index as i32;
                    }
                }
            }
        }
    }

    let band = SURFACE_BAND_CELLS * ctx.cell_size;
    let eps = 0.01 * ctx.cell_size;
    for node in 0..ctx.node_count {
        let owner = grid.collider[node];
        if owner < 0 || grid.sdf[node] > band {
            continue;
        }
        let record = &records[owner as usize];
        let p = ctx.node_world(ctx.node_coord(node));
        let gradient = Vec3::new(
            collider_distance(record, p + Vec3::X * eps) - collider_distance(record, p - Vec3::X * eps),
            collider_distance(record, p + Vec3::Y * eps) - collider_distance(record, p - Vec3::Y * eps),
            collider_distance(record, p + Vec3::Z * eps) - collider_distance(record, p - Vec3::Z * eps),
        );
        grid.collider_normal[node] = gradient.normalize_or_zero();
    }
}

/// Remove the velocity component pointing into colliders, relative to the
/// collider's own motion, and apply friction to the tangential part. The
/// momentum change is accumulated as force and torque on the collider.
pub fn resolve_collisions(
    grid: &mut GridState,
    records: &[ManipulatorRecord],
    ctx: &StepContext,
    stats: &mut [i32],
) {
    if ctx.dt <= 0.0 {
        return;
    }
    let band = ctx.cell_size;
    let mut forces = vec![(Vec3::ZERO, Vec3::ZERO); records.len()];

    for node in 0..ctx.node_count {
        let owner = grid.collider[node];
        if owner < 0 || grid.mass[node] <= 0.0 || grid.sdf[node] > band {
            continue;
        }
        let record = &records[owner as usize];
        let normal = grid.collider_normal[node];
        let p = ctx.node_world(ctx.node_coord(node));

        let previous = record
            .previous_transform()
            .transform_point3(record.to_object_space().transform_point3(p));
        let collider_velocity = (p - previous) / ctx.cell_size / ctx.dt;

        let velocity = grid.velocity[node];
        let mut relative = velocity - collider_velocity;
        let normal_speed = relative.dot(normal);
        if normal_speed >= 0.0 {
            continue;
        }
        let friction = record.additional_data().w.clamp(0.0, 1.0);
        relative = (relative - normal_speed * normal) * (1.0 - friction);
        let resolved = collider_velocity + relative;
        grid.velocity[node] = resolved;

        // Force the liquid exerts on the collider, in world units
        let force = grid.mass[node] * (velocity - resolved) / ctx.dt * ctx.cell_size;
        let torque = (p - record.position()).cross(force);
        let entry = &mut forces[owner as usize];
        entry.0 += force;
        entry.1 += torque;
    }

    for (index, (force, torque)) in forces.into_iter().enumerate() {
        if force == Vec3::ZERO && torque == Vec3::ZERO {
            continue;
        }
        let base = index * STATISTICS_PER_MANIPULATOR;
        let Some(slots) = stats.get_mut(base..base + 6) else {
            continue;
        };
        for (slot, value) in slots.iter_mut().zip(force.to_array().into_iter().chain(torque.to_array())) {
            *slot = slot.saturating_add(encode_fixed(value));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manipulators::collider::decode_fixed;
    use crate::manipulators::{Collider, Manipulator, ManipulatorRegistry};
    use crate::solver::params::SimulationParams;

    fn context() -> StepContext {
        let params = SimulationParams {
            grid_size: [16.0, 16.0, 16.0],
            node_count: 16 * 16 * 16,
            container_scale: [4.0, 4.0, 4.0],
            time_step: 0.5,
            max_particle_count: 64,
            ..SimulationParams::default()
        };
        StepContext::new(&params, 64).unwrap()
    }

    fn registry(collider: Collider, scale: Vec3) -> ManipulatorRegistry {
        let mut registry = ManipulatorRegistry::new();
        registry.rebuild(
            Vec::new(),
            vec![Manipulator::collider(0, collider).with_transform(Vec3::ZERO, Quat::IDENTITY, scale)],
        );
        registry.serialize_dynamic(Vec3::ZERO, Vec3::splat(4.0), 0.1);
        registry
    }

    #[test]
    fn sphere_rasterizes_with_outward_normals() {
        let ctx = context();
        let registry = registry(Collider::analytic(SdfShape::Sphere), Vec3::splat(2.0));
        let mut grid = GridState::default();
        grid.ensure_size(ctx.node_count);
        rasterize(&mut grid, registry.records(), registry.indices(), &ctx);

        // node 8 sits at world 0.125, inside the unit-radius sphere
        let centre = ctx.node_index(IVec3::new(8, 8, 8)).unwrap();
        assert!(grid.sdf[centre] < 0.0);
        assert_eq!(grid.collider[centre], 0);

        let surface = ctx.node_index(IVec3::new(11, 8, 8)).unwrap();
        assert!(grid.collider_normal[surface].x > 0.9);

        let far = ctx.node_index(IVec3::new(0, 0, 0)).unwrap();
        assert!(grid.sdf[far] > 2.0);
        assert_eq!(grid.collider_normal[far], Vec3::ZERO);
    }

    #[test]
    fn inverted_box_is_solid_outside() {
        let ctx = context();
        let registry = registry(Collider::analytic(SdfShape::Box).inverted(), Vec3::splat(2.0));
        let mut grid = GridState::default();
        grid.ensure_size(ctx.node_count);
        rasterize(&mut grid, registry.records(), registry.indices(), &ctx);

        let outside = ctx.node_index(IVec3::new(0, 8, 8)).unwrap();
        let inside = ctx.node_index(IVec3::new(8, 8, 8)).unwrap();
        assert!(grid.sdf[outside] < 0.0);
        assert!(grid.sdf[inside] > 0.0);
    }

    #[test]
    fn inward_velocity_is_removed_and_reported_as_force() {
        let ctx = context();
        let registry = registry(Collider::analytic(SdfShape::Sphere), Vec3::splat(2.0));
        let mut grid = GridState::default();
        grid.ensure_size(ctx.node_count);
        rasterize(&mut grid, registry.records(), registry.indices(), &ctx);

        // just outside the +x surface, moving towards the sphere
        let node = ctx.node_index(IVec3::new(12, 8, 8)).unwrap();
        grid.mass[node] = 1.0;
        grid.velocity[node] = Vec3::new(-1.0, 0.5, 0.0);
        let mut stats = vec![0; 8];
        resolve_collisions(&mut grid, registry.records(), &ctx, &mut stats);

        assert!(grid.velocity[node].x.abs() < 0.1);
        assert!(grid.velocity[node].y > 0.4);
        assert!(decode_fixed(&stats[0..3]).x < 0.0);
    }
}
