//! Liquid instance configuration
//!
//! Loaded from JSON. Files carry a `schema_version`; older files are migrated
//! forward before they are deserialized.

use std::path::{Path, PathBuf};

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::constants::{
    MAX_ITERATIONS_PER_FRAME, MAX_RECOMMENDED_PARTICLE_COUNT, MIN_CONTAINER_EXTENT,
    MIN_GRID_RESOLUTION, MIN_PARTICLE_COUNT,
};
use super::solver_params::{MaterialParams, SolverParams};
use crate::error::{LiquidError, LiquidResult};

pub const CURRENT_SCHEMA_VERSION: u32 = 2;

/// Render pipeline the liquid is drawn with
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderPipeline {
    #[default]
    Standard,
    Universal,
    HighDefinition,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub pipeline: RenderPipeline,
    /// Name of the light used for liquid shading, required by the HD pipeline
    pub custom_light: Option<String>,
    /// Name of the reflection probe, required by the HD pipeline
    pub reflection_probe: Option<String>,
    /// Render the liquid at a reduced resolution
    pub enable_downscale: bool,
    /// Pixel count shrinks by `downscale_factor^2`
    pub downscale_factor: f32,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            pipeline: RenderPipeline::Standard,
            custom_light: None,
            reflection_probe: None,
            enable_downscale: false,
            downscale_factor: 0.5,
        }
    }
}

impl RenderSettings {
    pub fn downscale(&self, resolution: UVec2) -> UVec2 {
        if !self.enable_downscale {
            return resolution;
        }
        (resolution.as_vec2() * self.downscale_factor).as_uvec2()
    }
}

/// How the particle store is seeded on init
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub enum InitialState {
    #[default]
    Empty,
    Baked {
        path: PathBuf,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiquidConfig {
    pub schema_version: u32,

    pub container_size: Vec3,
    pub container_pos: Vec3,

    /// Cells along the longest container axis
    pub grid_resolution: u32,
    pub max_num_particles: usize,

    pub use_fixed_timestep: bool,
    pub time_step_max: f32,
    /// Simulation time units per real second
    pub sim_time_per_sec: f32,
    pub iterations_per_frame: u32,

    pub max_frames_in_flight: u32,
    pub run_simulation: bool,
    pub visualize_sdf: bool,
    /// Seed for the reference backend's spawn jitter
    pub seed: u64,

    pub initial_state: InitialState,
    pub solver: SolverParams,
    pub material: MaterialParams,
    pub render: RenderSettings,
}

impl Default for LiquidConfig {
    fn default() -> Self {
        Self {
            schema_version: CURRENT_SCHEMA_VERSION,
            container_size: Vec3::splat(10.0),
            container_pos: Vec3::ZERO,
            grid_resolution: 128,
            max_num_particles: 262_144,
            use_fixed_timestep: false,
            time_step_max: 1.0,
            sim_time_per_sec: 40.0,
            iterations_per_frame: 1,
            max_frames_in_flight: 3,
            run_simulation: true,
            visualize_sdf: false,
            seed: 0,
            initial_state: InitialState::Empty,
            solver: SolverParams::default(),
            material: MaterialParams::default(),
            render: RenderSettings::default(),
        }
    }
}

impl LiquidConfig {
    pub fn load(path: impl AsRef<Path>) -> LiquidResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> LiquidResult<Self> {
        let value: Value = serde_json::from_str(text)?;
        let value = migrate(value)?;
        let mut config: LiquidConfig = serde_json::from_value(value)?;
        config.validate();
        Ok(config)
    }

    pub fn to_json(&self) -> LiquidResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Clamp settings into their supported ranges. Out of range values that
    /// still work are only warned about.
    pub fn validate(&mut self) {
        self.container_size = self.container_size.max(Vec3::splat(MIN_CONTAINER_EXTENT));
        self.grid_resolution = self.grid_resolution.max(MIN_GRID_RESOLUTION);
        self.iterations_per_frame = self.iterations_per_frame.clamp(1, MAX_ITERATIONS_PER_FRAME);
        self.max_frames_in_flight = self.max_frames_in_flight.max(1);
        self.time_step_max = self.time_step_max.max(0.0);
        self.sim_time_per_sec = self.sim_time_per_sec.max(0.0);
        self.render.downscale_factor = self.render.downscale_factor.clamp(0.1, 1.0);
        self.solver.validate();

        if self.max_num_particles < MIN_PARTICLE_COUNT {
            warn!(
                "Particle capacity {} is below the supported minimum of {}",
                self.max_num_particles, MIN_PARTICLE_COUNT
            );
        }
        if self.max_num_particles > MAX_RECOMMENDED_PARTICLE_COUNT {
            warn!(
                "Particle capacity {} is above the recommended maximum of {}",
                self.max_num_particles, MAX_RECOMMENDED_PARTICLE_COUNT
            );
        }
    }

    /// Read the baked initial state file, if one is configured
    pub fn load_baked_state(&self) -> LiquidResult<Option<Vec<u8>>> {
        match &self.initial_state {
            InitialState::Empty => Ok(None),
            InitialState::Baked { path } => Ok(Some(std::fs::read(path)?)),
        }
    }
}

/// Bring a config document up to `CURRENT_SCHEMA_VERSION`.
///
/// Documents without a version are treated as version 1.
pub fn migrate(mut value: Value) -> LiquidResult<Value> {
    let version = value
        .get("schema_version")
        .and_then(Value::as_u64)
        .unwrap_or(1) as u32;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(LiquidError::Config(format!(
            "config schema version {} is newer than supported version {}",
            version, CURRENT_SCHEMA_VERSION
        )));
    }

    let root = value
        .as_object_mut()
        .ok_or_else(|| LiquidError::Config("config root must be an object".into()))?;

    if version < 2 {
        if let Some(Value::Object(solver)) = root.get_mut("solver") {
            rename_key(solver, "particles_per_cell", "particle_density");
            rename_key(solver, "velocity_limit", "maximum_velocity");
        }
        if let Some(Value::Object(material)) = root.get_mut("material") {
            if let Some(smoothness) = material.remove("smoothness").and_then(|v| v.as_f64()) {
                material.insert("roughness".into(), Value::from(1.0 - smoothness));
            }
        }
        debug!("Migrated liquid config from schema version {}", version);
    }

    root.insert("schema_version".into(), Value::from(CURRENT_SCHEMA_VERSION));
    Ok(value)
}

fn rename_key(object: &mut serde_json::Map<String, Value>, from: &str, to: &str) {
    if let Some(v) = object.remove(from) {
        object.entry(to.to_string()).or_insert(v);
    }
}
