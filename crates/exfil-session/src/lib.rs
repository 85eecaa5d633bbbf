//! # exfil-session
//!
//! Drives one instrumented browser over the remote debugging protocol.
//!
//! - [`SessionManager`]: root connection, target discovery, rebuild on
//!   detach, the shared event log
//! - [`TargetSession`]: one tab; classifies scripts and records accesses
//!   and requests under its current policy
//! - [`Lifecycle`]: ready / attached / shutdown / stopped handshakes
//! - [`teardown::supervise`]: stops the browser and web server on shutdown
//! - [`instrumentation`]: renders the page-side shim script

#![deny(unsafe_code)]

pub mod errors;
pub mod instrumentation;
pub mod lifecycle;
pub mod manager;
pub mod shared;
pub mod target;
pub mod teardown;

pub use errors::{Result, SessionError, ShutdownCause};
pub use lifecycle::{Latch, Lifecycle, Rendezvous};
pub use manager::SessionManager;
pub use shared::SessionConfig;
pub use target::{TargetPhase, TargetSession};
pub use teardown::{Collaborator, supervise};
