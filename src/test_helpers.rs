//! Scripted radio engine for unit tests
//!
//! Simulates hwsim radios and namespaces in memory, records every call and
//! can be told to fail a given operation.

use crate::error::{Error, Result};
use crate::wireless::{LinkState, RadioEngine, WlanRole};
use ipnet::IpNet;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct FakeEngine {
    /// Namespace of each phy; `None` is the default namespace
    phys: Vec<Option<String>>,
    provisions: usize,
    namespaces: BTreeSet<String>,
    pids: BTreeMap<String, Vec<i32>>,
    terminated: Vec<i32>,
    roles: HashMap<String, WlanRole>,
    addresses: HashMap<String, Vec<IpNet>>,
    /// Remaining negative link probes per interface
    link_plan: HashMap<String, usize>,
    probes: HashMap<String, usize>,
    calls: Vec<String>,
    failing: HashSet<String>,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call to `op` fail
    pub fn fail_on(&mut self, op: &str) {
        self.failing.insert(op.to_string());
    }

    pub fn clear_failures(&mut self) {
        self.failing.clear();
    }

    /// Report the link of `iface` as down for the next `probes` checks
    pub fn link_after(&mut self, iface: &str, probes: usize) {
        self.link_plan.insert(iface.to_string(), probes);
    }

    pub fn link_probes(&self, iface: &str) -> usize {
        self.probes.get(iface).copied().unwrap_or(0)
    }

    pub fn provision_count(&self) -> usize {
        self.provisions
    }

    pub fn radio_count(&self) -> usize {
        self.phys.len()
    }

    /// Namespace a radio currently lives in (`None` for the default one)
    pub fn phy_location(&self, slot: usize) -> Option<&str> {
        self.phys.get(slot).and_then(|ns| ns.as_deref())
    }

    pub fn role_of(&self, iface: &str) -> Option<WlanRole> {
        self.roles.get(iface).copied()
    }

    pub fn addresses_of(&self, iface: &str) -> &[IpNet] {
        self.addresses.get(iface).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_namespace(&self, ns: &str) -> bool {
        self.namespaces.contains(ns)
    }

    pub fn set_pids(&mut self, ns: &str, pids: Vec<i32>) {
        self.pids.insert(ns.to_string(), pids);
    }

    pub fn terminated(&self) -> &[i32] {
        &self.terminated
    }

    /// Every call so far, formatted as `op arg...`
    pub fn calls(&self) -> &[String] {
        &self.calls
    }

    /// Number of recorded calls to `op`
    pub fn calls_to(&self, op: &str) -> usize {
        self.calls
            .iter()
            .filter(|call| call.split_whitespace().next() == Some(op))
            .count()
    }

    fn record(&mut self, op: &str, detail: String) -> Result<()> {
        let call = format!("{} {}", op, detail);
        if self.failing.contains(op) {
            return Err(Error::CommandFailed {
                command: call,
                message: "injected failure".into(),
            });
        }
        self.calls.push(call);
        Ok(())
    }

    fn slot_of(&self, iface: &str) -> Result<usize> {
        iface
            .strip_prefix("wlan")
            .and_then(|n| n.parse::<usize>().ok())
            .filter(|slot| *slot < self.phys.len())
            .ok_or_else(|| Error::CommandFailed {
                command: format!("iw dev {} info", iface),
                message: "No such device".into(),
            })
    }

    fn expect_location(&self, phy: usize, ns: Option<&str>) -> Result<()> {
        match self.phys.get(phy) {
            Some(location) if location.as_deref() == ns => Ok(()),
            _ => Err(Error::CommandFailed {
                command: format!("phy{}", phy),
                message: format!("phy{} is not in namespace {:?}", phy, ns),
            }),
        }
    }
}

impl RadioEngine for FakeEngine {
    fn provision_radios(&mut self, count: usize) -> Result<()> {
        self.record("provision_radios", count.to_string())?;
        self.provisions += 1;
        self.phys = vec![None; count];
        self.roles.clear();
        self.addresses.clear();
        Ok(())
    }

    fn deprovision_radios(&mut self) -> Result<()> {
        self.record("deprovision_radios", String::new())?;
        self.phys.clear();
        self.roles.clear();
        self.addresses.clear();
        Ok(())
    }

    fn phy_index(&mut self, iface: &str, ns: Option<&str>) -> Result<u32> {
        self.record("phy_index", format!("{} {:?}", iface, ns))?;
        let slot = self.slot_of(iface)?;
        self.expect_location(slot, ns)?;
        Ok(slot as u32)
    }

    fn mac_address(&mut self, iface: &str) -> Result<String> {
        self.record("mac_address", iface.to_string())?;
        let slot = self.slot_of(iface)?;
        self.expect_location(slot, None)?;
        Ok(format!("02:00:00:00:{:02x}:00", slot))
    }

    fn move_to_namespace(&mut self, ns: &str, phy: u32) -> Result<()> {
        self.record("move_to_namespace", format!("{} phy{}", ns, phy))?;
        let phy = phy as usize;
        self.expect_location(phy, None)?;
        self.phys[phy] = Some(ns.to_string());
        Ok(())
    }

    fn move_to_default(&mut self, ns: &str, phy: u32) -> Result<()> {
        self.record("move_to_default", format!("{} phy{}", ns, phy))?;
        let phy = phy as usize;
        self.expect_location(phy, Some(ns))?;
        self.phys[phy] = None;
        // Moving between namespaces resets the interface
        let iface = self.interface_name(phy);
        self.roles.remove(&iface);
        self.addresses.remove(&iface);
        Ok(())
    }

    fn set_link_state(&mut self, ns: &str, iface: &str, state: LinkState) -> Result<()> {
        self.record("set_link_state", format!("{} {} {:?}", ns, iface, state))
    }

    fn set_role(&mut self, ns: &str, iface: &str, role: WlanRole) -> Result<()> {
        self.record("set_role", format!("{} {} {}", ns, iface, role))?;
        self.roles.insert(iface.to_string(), role);
        Ok(())
    }

    fn start_ap_daemon(&mut self, iface: &str, ns: &str, conf: &Path) -> Result<()> {
        self.record(
            "start_ap_daemon",
            format!("{} {} {}", iface, ns, conf.display()),
        )?;
        if !conf.exists() {
            return Err(Error::CommandFailed {
                command: format!("hostapd -B {}", conf.display()),
                message: "Could not open configuration file".into(),
            });
        }
        Ok(())
    }

    fn join_bss(&mut self, ap_mac: &str, iface: &str, ns: &str, conf: &Path) -> Result<()> {
        self.record("join_bss", format!("{} {} {}", ap_mac, iface, ns))?;
        if !conf.exists() {
            return Err(Error::CommandFailed {
                command: format!("wpa_supplicant -B -i {} -c {}", iface, conf.display()),
                message: "Failed to read configuration file".into(),
            });
        }
        Ok(())
    }

    fn join_ibss(&mut self, iface: &str, ssid: &str, frequency: u32, ns: &str) -> Result<()> {
        self.record("join_ibss", format!("{} {} {} {}", iface, ssid, frequency, ns))
    }

    fn leave_ibss(&mut self, iface: &str, ns: &str) -> Result<()> {
        self.record("leave_ibss", format!("{} {}", iface, ns))
    }

    fn assign_address(&mut self, ns: &str, iface: &str, addr: &IpNet) -> Result<()> {
        self.record("assign_address", format!("{} {} {}", ns, iface, addr))?;
        self.addresses
            .entry(iface.to_string())
            .or_default()
            .push(*addr);
        Ok(())
    }

    fn link_established(&mut self, iface: &str, ns: &str) -> Result<bool> {
        self.record("link_established", format!("{} {}", iface, ns))?;
        *self.probes.entry(iface.to_string()).or_default() += 1;
        match self.link_plan.get_mut(iface) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Ok(false)
            }
            _ => Ok(true),
        }
    }

    fn create_namespace(&mut self, ns: &str) -> Result<()> {
        self.record("create_namespace", ns.to_string())?;
        self.namespaces.insert(ns.to_string());
        Ok(())
    }

    fn delete_namespace(&mut self, ns: &str) -> Result<()> {
        self.record("delete_namespace", ns.to_string())?;
        self.namespaces.remove(ns);
        self.pids.remove(ns);
        // Radios of a deleted namespace fall back to the default one
        for location in self.phys.iter_mut() {
            if location.as_deref() == Some(ns) {
                *location = None;
            }
        }
        Ok(())
    }

    fn namespace_pids(&mut self, ns: &str) -> Result<Vec<i32>> {
        self.record("namespace_pids", ns.to_string())?;
        Ok(self.pids.get(ns).cloned().unwrap_or_default())
    }

    /// Recorded instead of slept
    fn pause(&mut self, delay: Duration) {
        self.calls.push(format!("pause {}", delay.as_millis()));
    }

    fn terminate_process(&mut self, pid: i32) -> Result<()> {
        self.record("terminate_process", pid.to_string())?;
        self.terminated.push(pid);
        for pids in self.pids.values_mut() {
            pids.retain(|p| *p != pid);
        }
        Ok(())
    }
}
