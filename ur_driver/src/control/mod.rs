//! Driver-hosted channels the robot program connects back to.

mod callback;
mod modes;
mod receive_timeout;
mod reverse_interface;
mod script_command_interface;
mod script_sender;
mod trajectory_point_interface;

pub use callback::*;
pub use modes::*;
pub use receive_timeout::*;
pub use reverse_interface::*;
pub use script_command_interface::*;
pub use script_sender::*;
pub use trajectory_point_interface::*;
