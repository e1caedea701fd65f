//! Emulated nodes and their wireless roles
//!
//! This module provides:
//! - Node scaffolding (one network namespace per node)
//! - The `AccessPoint` and `WifiStation` facades over a `WirelessContext`

pub mod access_point;
pub mod node;
pub mod station;

// Re-exports
pub use access_point::AccessPoint;
pub use node::Node;
pub use station::WifiStation;
