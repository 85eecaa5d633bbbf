//! # exfil-analysis
//!
//! Reads a finished event log and decides, per policy, whether code the
//! policy distrusts read a sensitive API and then reached the network.

#![deny(unsafe_code)]

pub mod report;
pub mod verdict;

pub use report::{IgnoredPages, analyze_all, analyze_logs};
pub use verdict::{PROBE_PREFIX, PolicyAnalysis, analyze_policy};
