//! # exfil-policy
//!
//! The trust policy engine.
//!
//! - [`Policy`]: evaluation-ordered [`TrustGroup`]s with stack-based trust
//!   inheritance for newly created scripts
//! - [`ScriptSet`]: membership tests (universal, page origin, filter lists)
//!   plus the scripts assigned to a group
//! - [`PolicyState`]: immutable snapshots embedded in logged events, with the
//!   [`PolicyState::stack_is_trusted`] predicate
//! - [`PolicyFactory`]: one fresh policy per top-level navigation
//! - [`FilterListMatcher`]: the process-wide ad/tracker list matcher

#![deny(unsafe_code)]

pub mod errors;
pub mod factory;
pub mod filter_list;
pub mod policy;
pub mod script_set;
pub mod state;

pub use errors::PolicyError;
pub use factory::PolicyFactory;
pub use filter_list::FilterListMatcher;
pub use policy::{Policy, TrustGroup};
pub use script_set::{InlineScript, Membership, RemoteScript, ScriptSet, origin_of};
pub use state::{PolicyState, TrustGroupState};
