//! Remote access to daemons
//!
//! Requests and replies travel as one JSON line each over TCP. The daemon
//! side is a [`Listener`]; clients reach a daemon through a [`Proxy`].

mod client;
mod protocol;
mod server;
pub mod transport;

pub use client::{Proxy, Remote};
pub use protocol::*;
pub use server::Listener;
