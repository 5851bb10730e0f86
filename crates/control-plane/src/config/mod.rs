//! Configuration module for the ThreatFlow Control Plane.
//!
//! This module provides configuration loading from environment variables
//! using the `envy` crate for type-safe environment variable parsing.

mod app;
mod intelowl;

pub use app::AppConfig;
pub use intelowl::IntelOwlConfig;
