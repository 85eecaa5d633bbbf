//! # exfil-cdp
//!
//! A thin remote debugging protocol client over `tokio-tungstenite`.
//!
//! A [`Connection`] runs two tasks: an I/O loop that correlates command
//! replies by id, and a dispatcher that runs event handlers one at a time
//! in arrival order. [`Endpoint`] finds the WebSocket URLs to connect to.

#![deny(unsafe_code)]

pub mod connection;
pub mod endpoint;
pub mod errors;

pub use connection::{CommandSender, Connection, EventHandler, handler};
pub use endpoint::Endpoint;
pub use errors::{CdpError, Result};
