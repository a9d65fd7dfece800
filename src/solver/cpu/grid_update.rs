//! Grid velocity update: gravity, force fields, colliders, container walls

use bevy::prelude::*;

use super::manipulators::enabled_records;
use super::state::{GridState, StepContext};
use crate::manipulators::{
    ForceFieldShape, ForceFieldType, ManipulatorIndices, ManipulatorKind, ManipulatorRecord,
};

/// Nodes this close to a container face have the normal velocity removed
const WALL_CELLS: u32 = 2;

pub fn calculate_grid_velocities(grid: &mut GridState, ctx: &StepContext) {
    let gravity_velocity = ctx.dt * ctx.gravity;
    for node in 0..ctx.node_count {
        let mass = grid.mass[node];
        if mass > 0.0 {
            grid.velocity[node] = grid.momentum[node] / mass + gravity_velocity;
        }
    }
}

fn force_field_type(value: f32) -> ForceFieldType {
    match value as i32 {
        1 => ForceFieldType::Directional,
        2 => ForceFieldType::Swirl,
        _ => ForceFieldType::Radial,
    }
}

fn force_field_shape(value: f32) -> ForceFieldShape {
    match value as i32 {
        1 => ForceFieldShape::Cube,
        _ => ForceFieldShape::Sphere,
    }
}

/// Acceleration a force field applies at `world`, in grid units
pub fn force_field_acceleration(record: &ManipulatorRecord, world: Vec3, cell_size: f32) -> Vec3 {
    let additional = record.additional_data();
    let strength = additional.y;
    let decay = additional.z;

    let local = record.to_object_space().transform_point3(world);
    let outside = match force_field_shape(additional.w) {
        ForceFieldShape::Sphere => local.length() - 0.5,
        ForceFieldShape::Cube => local.abs().max_element() - 0.5,
    };
    let falloff = if outside <= 0.0 {
        1.0
    } else {
        (-decay * outside * record.scale().max_element()).exp()
    };

    let centre = record.position();
    let axis = record.rotation() * Vec3::Y;
    let direction = match force_field_type(additional.x) {
        ForceFieldType::Radial => (centre - world).normalize_or_zero(),
        ForceFieldType::Directional => axis,
        ForceFieldType::Swirl => axis.cross(world - centre).normalize_or_zero(),
    };
    direction * strength * falloff / cell_size
}

pub fn apply_force_fields(
    grid: &mut GridState,
    records: &[ManipulatorRecord],
    indices: &ManipulatorIndices,
    ctx: &StepContext,
) {
    let fields = enabled_records(records, indices, ManipulatorKind::ForceField);
    if fields.is_empty() {
        return;
    }
    for node in 0..ctx.node_count {
        if grid.mass[node] <= 0.0 {
            continue;
        }
        let world = ctx.node_world(ctx.node_coord(node));
        for (_, record) in &fields {
            grid.velocity[node] += ctx.dt * force_field_acceleration(record, world, ctx.cell_size);
        }
    }
}

/// Slip walls on every container face
pub fn apply_boundary_conditions(grid: &mut GridState, ctx: &StepContext) {
    let limit = ctx.dims.saturating_sub(UVec3::splat(WALL_CELLS + 1));
    for node in 0..ctx.node_count {
        if grid.mass[node] <= 0.0 {
            continue;
        }
        let coord = ctx.node_coord(node);
        let velocity = &mut grid.velocity[node];
        if coord.x < WALL_CELLS || coord.x > limit.x {
            velocity.x = 0.0;
        }
        if coord.y < WALL_CELLS || coord.y > limit.y {
            velocity.y = 0.0;
        }
        if coord.z < WALL_CELLS || coord.z > limit.z {
            velocity.z = 0.0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manipulators::{ForceField, Manipulator, ManipulatorRegistry};
    use crate::solver::params::SimulationParams;

    fn context() -> StepContext {
        let params = SimulationParams {
            grid_size: [8.0, 8.0, 8.0],
            node_count: 512,
            container_scale: [8.0, 8.0, 8.0],
            time_step: 0.5,
            gravity: [0.0, -0.1, 0.0],
            max_particle_count: 64,
            ..SimulationParams::default()
        };
        StepContext::new(&params, 64).unwrap()
    }

    #[test]
    fn gravity_is_added_to_normalized_momentum() {
        let ctx = context();
        let mut grid = GridState::default();
        grid.ensure_size(ctx.node_count);
        let node = ctx.node_index(IVec3::new(4, 4, 4)).unwrap();
        grid.mass[node] = 2.0;
        grid.momentum[node] = Vec3::new(1.0, 0.0, 0.0);
        calculate_grid_velocities(&mut grid, &ctx);
        assert!(grid.velocity[node].abs_diff_eq(Vec3::new(0.5, -0.05, 0.0), 1e-6));
    }

    #[test]
    fn walls_zero_normal_velocity_only() {
        let ctx = context();
        let mut grid = GridState::default();
        grid.ensure_size(ctx.node_count);
        let wall = ctx.node_index(IVec3::new(1, 4, 4)).unwrap();
        let top = ctx.node_index(IVec3::new(4, 6, 4)).unwrap();
        for node in [wall, top] {
            grid.mass[node] = 1.0;
            grid.velocity[node] = Vec3::ONE;
        }
        apply_boundary_conditions(&mut grid, &ctx);
        assert_eq!(grid.velocity[wall], Vec3::new(0.0, 1.0, 1.0));
        assert_eq!(grid.velocity[top], Vec3::new(1.0, 0.0, 1.0));
    }

    #[test]
    fn radial_field_pulls_towards_centre_and_decays() {
        let mut registry = ManipulatorRegistry::new();
        registry.rebuild(
            vec![Manipulator::force_field(
                0,
                ForceField {
                    strength: 1.0,
                    distance_decay: 2.0,
                    ..ForceField::default()
                },
            )],
            Vec::new(),
        );
        let record = registry.serialize_dynamic(Vec3::ZERO, Vec3::splat(8.0), 0.1)[0];

        let near = force_field_acceleration(&record, Vec3::new(0.25, 0.0, 0.0), 1.0);
        let far = force_field_acceleration(&record, Vec3::new(2.0, 0.0, 0.0), 1.0);
        assert!(near.abs_diff_eq(Vec3::new(-1.0, 0.0, 0.0), 1e-6));
        assert!(far.x < 0.0 && far.x > -0.1);
    }
}
