//! # exfil-core
//!
//! Foundation types shared by every exfil crate:
//!
//! - **Protocol messages**: [`Message`], a forgiving key/value view over
//!   remote-debugging payloads with typed accessors and safe defaults
//! - **Call stacks**: [`StackTrace`] and [`CallFrame`], the recursive
//!   async-aware stack shape reported by the debugger
//! - **Branded IDs**: [`PolicyId`], [`TargetId`] as newtypes for type safety
//! - **Policy kinds**: [`PolicyKind`], the four canned trust policy shapes
//! - **Logging**: `tracing` subscriber setup and log capture for tests

#![deny(unsafe_code)]

pub mod ids;
pub mod logging;
pub mod message;
pub mod policy_kind;
pub mod stack;

pub use ids::{PolicyId, TargetId};
pub use message::Message;
pub use policy_kind::{ParsePolicyKindError, PolicyKind};
pub use stack::{CallFrame, StackTrace};
