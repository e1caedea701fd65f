//! Wireless interface records
//!
//! A `WirelessInterface` is a hwsim radio once it has been placed into a node's
//! namespace and given a role. Records live in the registry arena and are
//! addressed by `WlanId`, which pairs the radio slot with a generation so that
//! a handle kept across a park/rehydrate cycle is detected as stale.

use ipnet::IpNet;
use serde::Serialize;
use std::fmt;

/// Identifier of an emulated node (also the name of its network namespace)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Handle to a live wireless interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WlanId {
    /// Radio pool slot
    pub slot: usize,
    /// Bumped every time the slot's record is rehydrated for a new owner
    pub generation: u32,
}

impl fmt::Display for WlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wlan{}#{}", self.slot, self.generation)
    }
}

/// Operating mode of a wireless interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WlanRole {
    Managed,
    #[serde(rename = "AP")]
    AccessPoint,
    Ibss,
}

impl WlanRole {
    /// Name understood by `iw dev <if> set type`
    pub fn as_iw_type(&self) -> &'static str {
        match self {
            WlanRole::Managed => "managed",
            WlanRole::AccessPoint => "__ap",
            WlanRole::Ibss => "ibss",
        }
    }
}

impl fmt::Display for WlanRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WlanRole::Managed => "managed",
            WlanRole::AccessPoint => "AP",
            WlanRole::Ibss => "ibss",
        };
        f.pad(s)
    }
}

/// A radio placed into a node with a wireless role
#[derive(Debug, Clone, Serialize)]
pub struct WirelessInterface {
    /// Kernel interface name (e.g. "wlan3")
    pub name: String,
    /// Radio pool slot backing this interface
    pub slot: usize,
    /// Current generation of the slot record
    pub generation: u32,
    /// Owning node; `None` while parked in the default namespace
    pub node: Option<NodeId>,
    /// Hardware address reported by the kernel
    pub mac_address: String,
    pub role: WlanRole,
    pub ssid: String,
    /// Channel frequency in MHz
    pub frequency: Option<u32>,
    pub address: Option<IpNet>,
}

impl WirelessInterface {
    pub fn new(name: String, slot: usize, mac_address: String) -> Self {
        Self {
            name,
            slot,
            generation: 0,
            node: None,
            mac_address,
            role: WlanRole::Managed,
            ssid: String::new(),
            frequency: None,
            address: None,
        }
    }

    pub fn id(&self) -> WlanId {
        WlanId {
            slot: self.slot,
            generation: self.generation,
        }
    }

    /// Namespace the interface currently lives in
    pub fn namespace(&self) -> Option<&str> {
        self.node.as_ref().map(NodeId::as_str)
    }

    /// Hand the record to a new owner, keeping its kernel identity
    pub(crate) fn rehydrate(
        &mut self,
        node: NodeId,
        role: WlanRole,
        ssid: &str,
        frequency: Option<u32>,
    ) {
        self.generation = self.generation.wrapping_add(1);
        self.node = Some(node);
        self.role = role;
        self.ssid = ssid.to_string();
        self.frequency = frequency;
        self.address = None;
    }

    /// Detach from the owning node
    pub(crate) fn park(&mut self) {
        self.node = None;
        self.role = WlanRole::Managed;
        self.ssid.clear();
        self.frequency = None;
        self.address = None;
    }
}
