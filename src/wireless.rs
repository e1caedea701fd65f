//! Wireless membership subsystem
//!
//! This module provides:
//! - A fixed pool of mac80211_hwsim radios shared by every node
//! - The registry of live BSS and IBSS networks
//! - Membership transitions (create/stop AP, join/leave BSS and IBSS)
//! - The radio engine boundary to the host's networking tools

pub mod conf;
pub mod engine;
pub mod interface;
pub mod iw;
pub mod lifecycle;
pub mod membership;
pub mod pool;
pub mod registry;
pub mod settle;

// Re-exports
pub use conf::{ConfWriter, HostapdConf, StationConfig};
pub use engine::{LinkState, RadioEngine, SystemEngine};
pub use interface::{NodeId, WirelessInterface, WlanId, WlanRole};
pub use lifecycle::{NodeLifecycle, NodeState};
pub use membership::{JoinTarget, WirelessContext};
pub use pool::RadioPool;
pub use registry::{BssEntry, IbssEntry, Membership, NetworkRegistry};
pub use settle::Settle;
