use serde::{Deserialize, Serialize};

// declared first so `impl_extract_value!` is visible to the modules below
#[macro_use]
mod extract;
pub use extract::ExtractValue;

pub mod comm;
pub mod control;
pub mod drivers;
pub mod errors;
pub mod primary;
pub mod rtde;

pub use errors::*;

pub use drivers::{DriverConfig, UrDriver};

pub type Vector3d = [f64; 3];
pub type Vector6d = [f64; 6];
pub type Vector6Int32 = [i32; 6];
pub type Vector6Uint32 = [u32; 6];

/// Tool payload: mass in kg and center of gravity in m, relative to the
/// tool flange.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct Payload {
    pub mass: f64,
    pub cog: Vector3d,
}

impl Default for Payload {
    fn default() -> Self {
        Self {
            mass: 0.0,
            cog: [0.0; 3],
        }
    }
}
