//! Cyclic exchange channel: recipe negotiation and fixed-rate streaming.

mod client;
mod data_package;
pub mod package;
mod recipe;
mod writer;

pub use client::*;
pub use data_package::*;
pub use recipe::*;
pub use writer::*;
