//! Property-based tests for the liquid orchestrator using proptest
//!
//! These tests check invariants across random inputs:
//! - Per-kind record ranges are disjoint and cover the registry
//! - Grid dimensions follow the container and resolution
//! - Sub-step length never exceeds the configured maximum
//! - Clamped emitters stay inside the container
//! - Baked snapshots survive a byte round trip
//! - Particles stay finite and inside the grid while stepping

use bevy::prelude::*;
use liquid3d::config::EMITTER_CLAMP_FRACTION;
use liquid3d::core::GridLayout;
use liquid3d::manipulators::{ManipulatorRegistry, clamp_to_container};
use liquid3d::math::transformed_unit_bounds;
use liquid3d::solver::{CpuBackend, LiquidSimulation, compute_timestep};
use liquid3d::{
    BakedState, Collider, Emitter, ForceField, LiquidConfig, Manipulator, ManipulatorKind,
    SdfShape,
};
use proptest::prelude::*;

const KINDS: [ManipulatorKind; 6] = [
    ManipulatorKind::Emitter,
    ManipulatorKind::Void,
    ManipulatorKind::ForceField,
    ManipulatorKind::AnalyticCollider,
    ManipulatorKind::Detector,
    ManipulatorKind::Portal,
];

fn manipulator_of(kind: ManipulatorKind, id: u32) -> Manipulator {
    match kind {
        ManipulatorKind::Emitter => Manipulator::emitter(id, Emitter::default()),
        ManipulatorKind::Void => Manipulator::void(id),
        ManipulatorKind::ForceField => Manipulator::force_field(id, ForceField::default()),
        ManipulatorKind::AnalyticCollider => {
            Manipulator::collider(id, Collider::analytic(SdfShape::Sphere))
        }
        ManipulatorKind::Portal => Manipulator::portal(id, None),
        _ => Manipulator::detector(id),
    }
}

fn vec3_in(range: std::ops::Range<f32>) -> impl Strategy<Value = Vec3> {
    (range.clone(), range.clone(), range).prop_map(|(x, y, z)| Vec3::new(x, y, z))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: every kind owns one contiguous range, ranges never overlap,
    /// and together they cover every record in order
    #[test]
    fn kind_ranges_are_disjoint_and_cover(kinds in prop::collection::vec(0usize..KINDS.len(), 0..40)) {
        let all: Vec<Manipulator> = kinds
            .iter()
            .enumerate()
            .map(|(id, &k)| manipulator_of(KINDS[k], id as u32))
            .collect();
        let (colliders, others): (Vec<_>, Vec<_>) =
            all.into_iter().partition(|m| m.kind().is_collider());
        let mut registry = ManipulatorRegistry::new();
        registry.rebuild(others, colliders);

        let mut cursor = 0;
        for ordinal in 1..ManipulatorKind::TYPE_NUM {
            let kind = ManipulatorKind::from_ordinal(ordinal as i32).unwrap();
            let range = registry.range(kind);
            prop_assert_eq!(range.start, cursor, "range of {:?} does not start at the previous end", kind);
            for index in range.clone() {
                prop_assert_eq!(registry.manipulators()[index].kind(), kind);
            }
            cursor = range.end;
        }
        prop_assert_eq!(cursor, registry.len());
    }

    /// Property: cells are cubic, sized by the longest axis, and the grid
    /// covers the container
    #[test]
    fn grid_dims_follow_container(size in vec3_in(0.1..20.0), resolution in 16u32..128) {
        let grid = GridLayout::new(size, resolution);
        let expected_cell = size.max_element() / resolution as f32;
        prop_assert!((grid.cell_size - expected_cell).abs() <= expected_cell * 1e-5);
        prop_assert_eq!(grid.dims, (size / grid.cell_size).ceil().as_uvec3().max(UVec3::ONE));

        let covered = grid.dims.as_vec3() * grid.cell_size;
        prop_assert!(covered.cmpge(size * (1.0 - 1e-5)).all(), "grid {:?} does not cover {:?}", covered, size);
        prop_assert_eq!(grid.node_count, (grid.dims.x * grid.dims.y * grid.dims.z) as usize);
    }

    /// Property: the sub-step is the frame's sim time split over the
    /// iterations, capped at the maximum
    #[test]
    fn timestep_is_capped(
        sim_time_per_sec in 0.0f32..100.0,
        dt in 0.0f32..0.5,
        iterations in 0u32..12,
        max in 0.01f32..2.0,
    ) {
        let step = compute_timestep(sim_time_per_sec, dt, iterations, max);
        prop_assert!(step <= max);
        let uncapped = sim_time_per_sec * dt / iterations.max(1) as f32;
        prop_assert!((step - uncapped.min(max)).abs() <= 1e-6);
    }

    /// Property: a clamped emitter that fits the container ends up inside it,
    /// and axes that were already inside do not move
    #[test]
    fn clamped_emitter_stays_inside(
        position in vec3_in(-8.0..8.0),
        scale in vec3_in(0.05..1.5),
        container in vec3_in(4.0..10.0),
    ) {
        let transform = Mat4::from_scale_rotation_translation(scale, Quat::IDENTITY, position);
        let clamped = clamp_to_container(transform, Vec3::ZERO, container);

        let limit = container * EMITTER_CLAMP_FRACTION;
        let before = transformed_unit_bounds(&transform);
        let after = transformed_unit_bounds(&clamped);
        for axis in 0..3 {
            prop_assert!(after.min[axis] >= -limit[axis] - 1e-3);
            prop_assert!(after.max[axis] <= limit[axis] + 1e-3);
            if before.min[axis] >= -limit[axis] && before.max[axis] <= limit[axis] {
                prop_assert!((after.min[axis] - before.min[axis]).abs() <= 1e-4);
            }
        }
    }

    /// Property: a baked snapshot reads back exactly what was written
    #[test]
    fn baked_state_round_trips(
        positions in prop::collection::vec(vec3_in(-5.0..5.0), 0..64),
        seed in any::<i32>(),
    ) {
        let affine_velocity = (0..positions.len() as i32)
            .map(|i| [seed.wrapping_add(i), seed.wrapping_sub(i)])
            .collect();
        let baked = BakedState::new(positions, affine_velocity).unwrap();
        let restored = BakedState::from_bytes(&baked.to_bytes(), 64).unwrap();
        prop_assert_eq!(restored, baked);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]

    /// Property: stepping never produces non-finite particles, never grows a
    /// liquid without emitters, and keeps particles inside the grid
    #[test]
    fn particles_stay_finite_and_inside(
        positions in prop::collection::vec(vec3_in(-0.9..0.9), 1..200),
        gravity in vec3_in(-20.0..20.0),
        steps in 1usize..6,
    ) {
        let mut config = LiquidConfig {
            container_size: Vec3::splat(2.0),
            grid_resolution: 16,
            max_num_particles: 1024,
            ..LiquidConfig::default()
        };
        config.solver.gravity = gravity;
        config.solver.validate();

        let initial = positions.len();
        let baked = BakedState::at_rest(positions);
        let mut sim = LiquidSimulation::new(config, Box::new(CpuBackend::new(3)), 0);
        sim.set_baked_state(baked);
        sim.init().unwrap();

        for _ in 0..steps {
            sim.begin_frame();
            sim.step(1.0 / 60.0).unwrap();
        }

        let state = sim.serialize_current_state().unwrap();
        prop_assert!(state.len() <= initial);

        let grid = sim.grid();
        let origin = sim.config().container_pos - grid.container_size * 0.5;
        let extent = grid.dims.as_vec3() * grid.cell_size;
        for (i, p) in state.positions().iter().enumerate() {
            prop_assert!(p.is_finite(), "Particle {} is not finite: {:?}", i, p);
            prop_assert!(
                p.cmpge(origin - 1e-3).all() && p.cmple(origin + extent + 1e-3).all(),
                "Particle {} left the grid: {:?}", i, p
            );
        }
    }
}
