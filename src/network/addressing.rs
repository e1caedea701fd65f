//! Address plans for wireless networks
//!
//! Provides:
//! - Host address allocation from a subnet, lowest address first
//! - Reservation of explicitly configured addresses
//! - Support for IPv4 and IPv6

use crate::error::{Error, Result};
use ipnet::{IpNet, Ipv4Net, Ipv6Net};
use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

/// Addresses handed out from one subnet
#[derive(Debug, Clone)]
pub struct AddressPlan {
    subnet: IpNet,
    allocated: HashSet<IpAddr>,
}

impl AddressPlan {
    pub fn new(subnet: IpNet) -> Self {
        Self {
            subnet: subnet.trunc(),
            allocated: HashSet::new(),
        }
    }

    pub fn subnet(&self) -> IpNet {
        self.subnet
    }

    /// Allocate the next free host address, with the subnet's prefix
    pub fn allocate(&mut self) -> Result<IpNet> {
        let addr = match self.subnet {
            IpNet::V4(net) => self.allocate_v4(net)?,
            IpNet::V6(net) => self.allocate_v6(net)?,
        };
        self.with_prefix(addr)
    }

    /// Mark an explicitly configured address as taken
    pub fn reserve(&mut self, addr: &IpNet) -> Result<()> {
        let ip = addr.addr();
        if !self.subnet.contains(&ip) {
            return Err(Error::Addressing(format!(
                "Address {} is not in subnet {}",
                addr, self.subnet
            )));
        }

        if !self.allocated.insert(ip) {
            return Err(Error::Addressing(format!(
                "Address {} is already allocated",
                ip
            )));
        }
        Ok(())
    }

    #[cfg(test)]
    pub fn release(&mut self, addr: &IpAddr) {
        self.allocated.remove(addr);
    }

    fn with_prefix(&self, addr: IpAddr) -> Result<IpNet> {
        IpNet::new(addr, self.subnet.prefix_len())
            .map_err(|e| Error::Addressing(format!("{}: {}", addr, e)))
    }

    fn allocate_v4(&mut self, net: Ipv4Net) -> Result<IpAddr> {
        // hosts() skips the network and broadcast addresses
        for addr in net.hosts() {
            let ip = IpAddr::V4(addr);
            if self.allocated.insert(ip) {
                return Ok(ip);
            }
        }

        Err(Error::Addressing(format!(
            "No available addresses in {}",
            net
        )))
    }

    fn allocate_v6(&mut self, net: Ipv6Net) -> Result<IpAddr> {
        // Bounded scan; wireless topologies are small
        for addr in net.hosts().take(65536) {
            let ip = IpAddr::V6(addr);
            if self.allocated.insert(ip) {
                return Ok(ip);
            }
        }

        Err(Error::Addressing(format!(
            "No available addresses in {}",
            net
        )))
    }

    #[cfg(test)]
    pub fn is_available(&self, addr: &IpAddr) -> bool {
        self.subnet.contains(addr) && !self.allocated.contains(addr)
    }

    #[cfg(test)]
    pub fn allocated_count(&self) -> usize {
        self.allocated.len()
    }
}

/// Address plans keyed by network SSID
#[derive(Debug, Default)]
pub struct AddressBook {
    plans: HashMap<String, AddressPlan>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_plan(&mut self, ssid: &str, subnet: IpNet) {
        self.plans.insert(ssid.to_string(), AddressPlan::new(subnet));
    }

    pub fn has_plan(&self, ssid: &str) -> bool {
        self.plans.contains_key(ssid)
    }

    /// Reserve an explicit address in the network's plan, if it has one
    pub fn reserve(&mut self, ssid: &str, addr: &IpNet) -> Result<()> {
        match self.plans.get_mut(ssid) {
            Some(plan) => plan.reserve(addr),
            None => Ok(()),
        }
    }

    /// Allocate the next address of a network
    pub fn allocate(&mut self, ssid: &str) -> Result<IpNet> {
        let plan = self
            .plans
            .get_mut(ssid)
            .ok_or_else(|| Error::Addressing(format!("No subnet configured for '{}'", ssid)))?;
        plan.allocate()
    }
}
