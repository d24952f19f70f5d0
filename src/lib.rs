//! Gmail MCP Server Library
//!
//! A Model Context Protocol (MCP) server for Gmail with per-call tracing,
//! metrics and audit logging, multi-account support, a read-only safety
//! mode, and a cleanup routine for GitHub notification mail.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod github;
pub mod gmail;
pub mod mcp;
pub mod telemetry;

pub use config::Config;
pub use error::{GmailMcpError, Result};
