//! Chain Derive Sandbox
//!
//! Memoized derived views over chain storage (elections, council) served
//! from an in-memory chain hydrated from storage exports.

pub mod api;
pub mod chain;
pub mod config;
pub mod derive;
pub mod types;
