pub mod baked_state;
pub mod grid;
pub mod kernel;
pub mod particle_store;

pub use baked_state::BakedState;
pub use grid::{GridBuffers, GridLayout};
pub use kernel::{GridInterpolation, KERNEL_SIZE, NEIGHBOR_COUNT, inv_d};
pub use particle_store::{AffineBlock, ParticleBuffers, ParticleStore, SolverScratchBuffers};
