mod driver_error;

pub use driver_error::*;
