//! Headless liquid demo on the CPU backend
//!
//! Usage: `liquid3d [config.json] [frames] [bake-output]`

use std::path::PathBuf;

use anyhow::{Context, Result};
use bevy::log::LogPlugin;
use bevy::prelude::*;
use liquid3d::manipulators::ManipulatorData;
use liquid3d::{
    Collider, Emitter, LiquidConfig, LiquidPlugin, LiquidWorld, Manipulator, SdfShape,
};

const DEFAULT_FRAMES: usize = 120;

fn demo_config(path: Option<&str>) -> Result<LiquidConfig> {
    match path {
        Some(path) => LiquidConfig::load(path).with_context(|| format!("loading {path}")),
        None => Ok(LiquidConfig {
            container_size: Vec3::splat(2.0),
            grid_resolution: 32,
            max_num_particles: 32_768,
            ..LiquidConfig::default()
        }),
    }
}

fn populate(world: &mut LiquidWorld, config: LiquidConfig) -> Result<u32> {
    let id = world.spawn_cpu(config);
    let liquid = world
        .get_mut(id)
        .context("liquid vanished right after spawning")?;

    let emitter = Emitter {
        particles_per_second: 20_000.0,
        initial_velocity: Vec3::new(0.5, 0.0, 0.0),
        ..Emitter::default()
    };
    liquid.add_manipulator(
        Manipulator::emitter(0, emitter).with_transform(
            Vec3::new(-0.5, 0.6, 0.0),
            Quat::IDENTITY,
            Vec3::splat(0.2),
        ),
    );
    liquid.add_manipulator(
        Manipulator::collider(1, Collider::analytic(SdfShape::Sphere).with_friction(0.2))
            .with_transform(Vec3::new(0.0, -0.3, 0.0), Quat::IDENTITY, Vec3::splat(0.6)),
    );
    liquid.add_manipulator(Manipulator::detector(2).with_transform(
        Vec3::new(0.0, -0.8, 0.0),
        Quat::IDENTITY,
        Vec3::new(2.0, 0.4, 2.0),
    ));

    liquid.init().context("initializing the liquid")?;
    Ok(id)
}

fn report(world: &LiquidWorld, id: u32) {
    let Some(liquid) = world.get(id) else {
        return;
    };
    info!(
        "frame {} | t = {:.3}s | {} particles",
        liquid.simulation_frame(),
        liquid.simulation_time(),
        liquid.active_particle_count()
    );
    for manipulator in liquid.manipulators() {
        match &manipulator.data {
            ManipulatorData::Emitter(emitter) => {
                info!("  emitter created {} total", emitter.created_particles_total)
            }
            ManipulatorData::Collider(collider) => {
                info!("  collider force {:?} torque {:?}", collider.force, collider.torque)
            }
            ManipulatorData::Detector(detector) => {
                info!("  detector sees {} particles", detector.particles_inside)
            }
            _ => {}
        }
    }
}

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = demo_config(args.first().map(String::as_str))?;
    let frames = match args.get(1) {
        Some(frames) => frames.parse().context("frame count")?,
        None => DEFAULT_FRAMES,
    };
    let bake_output = args.get(2).map(PathBuf::from);

    let mut app = App::new();
    app.add_plugins((MinimalPlugins, LogPlugin::default(), LiquidPlugin));
    app.finish();
    app.cleanup();

    let id = {
        let mut world = app.world_mut().resource_mut::<LiquidWorld>();
        populate(&mut world, config)?
    };

    for frame in 0..frames {
        app.update();
        if frame % 30 == 0 {
            report(app.world().resource::<LiquidWorld>(), id);
        }
    }
    report(app.world().resource::<LiquidWorld>(), id);

    let world = app.world().resource::<LiquidWorld>();
    if let (Some(path), Some(liquid)) = (bake_output, world.get(id)) {
        let footprint = liquid.footprint();
        info!("backend memory: {} bytes", footprint.total());
        let baked = liquid.serialize_current_state()?;
        std::fs::write(&path, baked.to_bytes())
            .with_context(|| format!("writing {}", path.display()))?;
        info!("baked {} particles to {}", baked.len(), path.display());
    }
    Ok(())
}
