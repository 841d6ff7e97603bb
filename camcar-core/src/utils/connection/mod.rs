//! Module Exports
//!
//! This file exports the key modules used in the HTTP control server
//! implementation.
//!
//! # Modules
//! - `server`: Manages the HTTP server, routes, and request dispatch.

/// Module for managing the HTTP server, including routes and the `/controls`
/// extractor.
pub mod server;
