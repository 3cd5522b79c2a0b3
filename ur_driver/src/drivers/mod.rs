mod driver;
pub use driver::*;

mod driver_config;
pub use driver_config::*;

mod program;
pub use program::*;

mod tool_comm;
pub use tool_comm::*;
