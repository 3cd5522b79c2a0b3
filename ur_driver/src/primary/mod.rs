//! Status stream: version and calibration validation, program push.

pub mod package;
mod stream;
mod validator;
mod version;

pub use package::{KinematicsInfo, PrimaryPackage, VersionMessage};
pub use stream::*;
pub use validator::*;
pub use version::*;
