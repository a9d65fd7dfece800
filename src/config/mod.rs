//! Configuration and parameters
//!
//! Constants, solver settings and the per-instance liquid config.

pub mod constants;
pub mod liquid_config;
pub mod solver_params;

pub use constants::*;
pub use liquid_config::*;
pub use solver_params::*;
