use bevy::prelude::*;
use indexmap::IndexMap;

pub mod config;
pub mod core;
pub mod error;
pub mod manipulators;
pub mod math;
pub mod solver;

// Public re-exports for clean API
pub use crate::config::{InitialState, LiquidConfig, MaterialParams, RenderPipeline, RenderSettings, SolverParams};
pub use crate::core::BakedState;
pub use crate::error::{LiquidError, LiquidResult};
pub use crate::manipulators::{
    Collider, ColliderShape, Emitter, ForceField, ForceFieldShape, ForceFieldType, Manipulator,
    ManipulatorId, ManipulatorKind, RigidBodyLink, SdfShape,
};
pub use crate::solver::{
    CameraKey, CameraView, ComputeBackend, CpuBackend, InstanceId, LiquidSimulation,
    MemoryFootprint, SimulationState,
};

/// Owns every liquid in the app and hands out instance ids
#[derive(Resource, Default)]
pub struct LiquidWorld {
    liquids: IndexMap<InstanceId, LiquidSimulation>,
    next_instance: InstanceId,
}

impl LiquidWorld {
    /// Register a liquid driven by `backend`. The liquid starts uninitialized.
    pub fn spawn(&mut self, config: LiquidConfig, backend: Box<dyn ComputeBackend>) -> InstanceId {
        let instance = self.next_instance;
        self.next_instance += 1;
        self.liquids
            .insert(instance, LiquidSimulation::new(config, backend, instance));
        instance
    }

    /// Register a liquid on the CPU reference backend
    pub fn spawn_cpu(&mut self, config: LiquidConfig) -> InstanceId {
        let backend = Box::new(CpuBackend::new(config.seed));
        self.spawn(config, backend)
    }

    /// Stop and remove a liquid
    pub fn despawn(&mut self, instance: InstanceId) -> Option<LiquidSimulation> {
        let mut liquid = self.liquids.shift_remove(&instance)?;
        liquid.stop();
        Some(liquid)
    }

    pub fn get(&self, instance: InstanceId) -> Option<&LiquidSimulation> {
        self.liquids.get(&instance)
    }

    pub fn get_mut(&mut self, instance: InstanceId) -> Option<&mut LiquidSimulation> {
        self.liquids.get_mut(&instance)
    }

    pub fn iter(&self) -> impl Iterator<Item = &LiquidSimulation> {
        self.liquids.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut LiquidSimulation> {
        self.liquids.values_mut()
    }

    pub fn len(&self) -> usize {
        self.liquids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.liquids.is_empty()
    }
}

pub struct LiquidPlugin;

impl Plugin for LiquidPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<LiquidWorld>()
            .add_systems(Update, (step_liquids, update_liquid_readback).chain())
            .add_systems(FixedUpdate, step_liquids_fixed);
    }
}

/// Variable-timestep liquids advance by the frame's delta
pub fn step_liquids(time: Res<Time>, mut world: ResMut<LiquidWorld>) {
    let dt = time.delta_secs();
    for liquid in world.iter_mut() {
        liquid.begin_frame();
        if liquid.config().use_fixed_timestep {
            continue;
        }
        if let Err(err) = liquid.step(dt) {
            error!("Liquid {} failed to step: {}", liquid.instance(), err);
        }
    }
}

/// Fixed-timestep liquids advance in `FixedUpdate`
pub fn step_liquids_fixed(time: Res<Time>, mut world: ResMut<LiquidWorld>) {
    let dt = time.delta_secs();
    for liquid in world.iter_mut() {
        if !liquid.config().use_fixed_timestep {
            continue;
        }
        if let Err(err) = liquid.step(dt) {
            error!("Liquid {} failed to step: {}", liquid.instance(), err);
        }
    }
}

pub fn update_liquid_readback(mut world: ResMut<LiquidWorld>) {
    for liquid in world.iter_mut() {
        if let Err(err) = liquid.update_readback() {
            warn!("Liquid {} readback failed: {}", liquid.instance(), err);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_ids_are_never_reused() {
        let mut world = LiquidWorld::default();
        let a = world.spawn_cpu(LiquidConfig::default());
        let b = world.spawn_cpu(LiquidConfig::default());
        assert_ne!(a, b);
        assert!(world.despawn(a).is_some());
        let c = world.spawn_cpu(LiquidConfig::default());
        assert!(c != a && c != b);
        assert_eq!(world.len(), 2);
    }

    #[test]
    fn plugin_steps_initialized_liquids() {
        let mut app = App::new();
        app.add_plugins((MinimalPlugins, LiquidPlugin));
        app.finish();
        app.cleanup();

        let mut world = app.world_mut().resource_mut::<LiquidWorld>();
        let mut config = LiquidConfig::default();
        config.container_size = Vec3::splat(2.0);
        config.grid_resolution = 16;
        config.max_num_particles = 1024;
        let id = world.spawn_cpu(config);
        let liquid = world.get_mut(id).unwrap();
        liquid.add_manipulator(Manipulator::emitter(0, Emitter::default()));
        liquid.init().unwrap();

        for _ in 0..3 {
            app.update();
        }
        let world = app.world().resource::<LiquidWorld>();
        let liquid = world.get(id).unwrap();
        assert_eq!(liquid.host_frame(), 3);
        assert!(liquid.simulation_frame() > 0);
        assert!(liquid.latest_readback().is_some());
    }
}
