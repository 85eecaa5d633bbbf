//! # exfil-events
//!
//! Typed event records and the append-only [`EventLog`] shared by every
//! target of a session.
//!
//! Events are a closed sum type ([`EventKind`]) behind a common
//! [`EventHeader`]. The log assigns ids on append and persists as one
//! indented JSON array.

#![deny(unsafe_code)]

pub mod errors;
pub mod log;
pub mod types;

pub use errors::EventLogError;
pub use log::{Entry, EventLog};
pub use types::{
    ApiAccess, Event, EventHeader, EventKind, Initiator, NetworkRequest, PageLifecycle,
    RequestIntercepted, RequestWillBeSent, ScriptParsed, timestamp_from_secs,
};
