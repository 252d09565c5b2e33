//! Turnstile - Request Admission Rate Limiting
//!
//! This crate decides, for every inbound request, whether it should be
//! throttled. Clients are identified by one or more strategies (network
//! address, address plus user agent, or a server-issued signed cookie),
//! each with its own quotas, and counted in fixed windows held in memory.

pub mod config;
pub mod error;
pub mod ratelimit;
