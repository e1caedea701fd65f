//! wavemesh - wireless network emulation testbed
//!
//! Builds BSS and IBSS topologies out of mac80211_hwsim radios placed into
//! Linux network namespaces, multiplexing a fixed pool of radios across the
//! emulated nodes.

pub mod error;
pub mod manifest;
pub mod network;
pub mod testbed;
pub mod topology;
pub mod wireless;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use error::{Error, Result};
pub use testbed::{Testbed, TopologyStatus};
pub use wireless::{JoinTarget, RadioEngine, SystemEngine, WirelessContext};
