// Solver layout and calibration constants
use bevy::prelude::*;

// Workgroup sizes the scratch buffers are rounded to
pub const MPM_THREADS: usize = 256;
pub const RADIX_THREADS: usize = 256;
pub const HISTO_WIDTH: usize = 16;

/// i32 counters each manipulator owns in the statistics buffer.
pub const STATISTICS_PER_MANIPULATOR: usize = 8;

/// Magic value leading every baked liquid state.
pub const BAKED_LIQUID_HEADER_VALUE: i32 = 0x071B_9AA1;

// Advisory limits
pub const GRID_NODE_WARNING_THRESHOLD: usize = 6_000_000;
pub const MIN_PARTICLE_COUNT: usize = 1024;
pub const MAX_RECOMMENDED_PARTICLE_COUNT: usize = 10_000_000;
pub const MIN_GRID_RESOLUTION: u32 = 16;
pub const MIN_CONTAINER_EXTENT: f32 = 1e-3;
pub const MAX_ITERATIONS_PER_FRAME: u32 = 10;

/// Emitters are kept inside this fraction of the container extent.
pub const EMITTER_CLAMP_FRACTION: f32 = 0.45;

// Fixed-point force decoding
pub const F2I_MAX_VALUE: f32 = 5000.0;
pub const F2I_SCALE: f32 = i32::MAX as f32 / F2I_MAX_VALUE;
pub const FORCE_STRENGTH_EXPONENT: f32 = 4.0;

// Solver gravity is given in m/s^2 and divided by this before upload
pub const GRAVITY_UPLOAD_SCALE: f32 = 100.0;
pub const GRAVITY_THRESHOLD: f32 = 100.0;
pub const DEFAULT_GRAVITY: Vec3 = Vec3::new(0.0, -9.81, 0.0);

// Divergence decay calibration curve
pub const DIVERGENCE_DECAY_MAX: f32 = 1.8;
pub const DIVERGENCE_DECAY_C0: f32 = 0.177;
pub const DIVERGENCE_DECAY_C1: f32 = 0.85;
pub const DIVERGENCE_DECAY_C2: f32 = 9.0;
