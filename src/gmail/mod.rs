//! Gmail API module
//!
//! Authentication, per-account clients and the REST calls the tools use.

pub mod accounts;
pub mod auth;
pub mod client;
pub mod types;
pub mod utils;
