//! Socket plumbing shared by the channels.

mod client;
mod frame;
mod tcp_server;

pub use client::*;
pub use frame::*;
pub use tcp_server::*;
