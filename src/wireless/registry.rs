//! Wireless network registry
//!
//! The authoritative map of live BSS and IBSS networks. Interface records are
//! kept in an arena keyed by radio slot: `active` holds interfaces placed in a
//! node, `parked` holds records of radios sitting in the default namespace so
//! the next allocation of that slot reuses the same logical interface.

use crate::error::{Error, Result};
use crate::wireless::{NodeId, WirelessInterface, WlanId};
use serde::Serialize;
use std::collections::BTreeMap;

/// An infrastructure-mode network
#[derive(Debug, Clone, Serialize)]
pub struct BssEntry {
    pub ssid: String,
    pub ap: WlanId,
    pub stations: Vec<WlanId>,
}

/// An ad-hoc network
#[derive(Debug, Clone, Serialize)]
pub struct IbssEntry {
    pub ssid: String,
    pub frequency: Option<u32>,
    pub stations: Vec<WlanId>,
}

/// What a node currently is in the wireless topology
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Membership {
    AccessPoint { ssid: String, wlan: WlanId },
    BssStation { ssid: String, wlan: WlanId },
    IbssStation { ssid: String, wlan: WlanId },
    Unaffiliated,
}

impl Membership {
    /// Interface backing the membership, if any
    pub fn wlan(&self) -> Option<WlanId> {
        match self {
            Membership::AccessPoint { wlan, .. }
            | Membership::BssStation { wlan, .. }
            | Membership::IbssStation { wlan, .. } => Some(*wlan),
            Membership::Unaffiliated => None,
        }
    }

    pub fn ssid(&self) -> Option<&str> {
        match self {
            Membership::AccessPoint { ssid, .. }
            | Membership::BssStation { ssid, .. }
            | Membership::IbssStation { ssid, .. } => Some(ssid.as_str()),
            Membership::Unaffiliated => None,
        }
    }

    pub fn is_affiliated(&self) -> bool {
        !matches!(self, Membership::Unaffiliated)
    }
}

/// Registry of wireless networks and interface records
#[derive(Debug, Default)]
pub struct NetworkRegistry {
    bss: Vec<BssEntry>,
    ibss: Vec<IbssEntry>,
    active: BTreeMap<usize, WirelessInterface>,
    parked: BTreeMap<usize, WirelessInterface>,
    /// Highest generation issued per slot; survives `clear_all`
    generations: BTreeMap<usize, u32>,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // Interface arena

    /// Register a freshly placed interface
    ///
    /// The record's generation is raised above every handle previously issued
    /// for its slot, so no old `WlanId` can resolve to it.
    pub fn activate(&mut self, mut wlan: WirelessInterface) -> WlanId {
        let issued = self.generations.entry(wlan.slot).or_insert(0);
        if wlan.generation <= *issued {
            wlan.generation = issued.wrapping_add(1);
        }
        *issued = wlan.generation;
        let id = wlan.id();
        self.active.insert(wlan.slot, wlan);
        id
    }

    /// Take the parked record of a slot, if one exists
    pub fn unpark(&mut self, slot: usize) -> Option<WirelessInterface> {
        self.parked.remove(&slot)
    }

    /// Move an active interface into the default-namespace side table
    pub fn park(&mut self, id: WlanId) -> Result<()> {
        self.interface(id)
            .ok_or_else(|| Error::UnknownInterface(id.to_string()))?;
        if let Some(mut wlan) = self.active.remove(&id.slot) {
            wlan.park();
            self.parked.insert(id.slot, wlan);
        }
        Ok(())
    }

    /// Look up a live interface; stale handles resolve to `None`
    pub fn interface(&self, id: WlanId) -> Option<&WirelessInterface> {
        self.active
            .get(&id.slot)
            .filter(|wlan| wlan.generation == id.generation)
    }

    pub fn interface_mut(&mut self, id: WlanId) -> Option<&mut WirelessInterface> {
        self.active
            .get_mut(&id.slot)
            .filter(|wlan| wlan.generation == id.generation)
    }

    pub fn active_interfaces(&self) -> impl Iterator<Item = &WirelessInterface> {
        self.active.values()
    }

    pub fn parked_interfaces(&self) -> impl Iterator<Item = &WirelessInterface> {
        self.parked.values()
    }

    pub fn parked_count(&self) -> usize {
        self.parked.len()
    }

    pub fn is_parked(&self, slot: usize) -> bool {
        self.parked.contains_key(&slot)
    }

    fn node_of(&self, id: WlanId) -> Option<&NodeId> {
        self.interface(id).and_then(|wlan| wlan.node.as_ref())
    }

    // Network entries

    /// Add a BSS with `ap` as its access point
    pub fn create_bss(&mut self, ssid: &str, ap: WlanId) -> Result<()> {
        if self.find_access_point_by_ssid(ssid).is_some() {
            return Err(Error::NetworkAlreadyExists(ssid.to_string()));
        }
        self.bss.push(BssEntry {
            ssid: ssid.to_string(),
            ap,
            stations: Vec::new(),
        });
        Ok(())
    }

    /// Add an empty IBSS
    pub fn create_ibss(&mut self, ssid: &str, frequency: Option<u32>) -> Result<()> {
        if self.ibss_exists(ssid) {
            return Err(Error::NetworkAlreadyExists(ssid.to_string()));
        }
        self.ibss.push(IbssEntry {
            ssid: ssid.to_string(),
            frequency,
            stations: Vec::new(),
        });
        Ok(())
    }

    /// Append a station to the BSS hosted by `ap_node`
    pub fn add_station_to_bss(&mut self, ap_node: &NodeId, wlan: WlanId) -> Result<()> {
        let index = self
            .bss
            .iter()
            .position(|bss| self.node_of(bss.ap) == Some(ap_node))
            .ok_or_else(|| Error::NotAnAccessPoint(ap_node.to_string()))?;
        self.bss[index].stations.push(wlan);
        Ok(())
    }

    /// Append a station to the IBSS named `ssid`
    pub fn add_station_to_ibss(&mut self, ssid: &str, wlan: WlanId) -> Result<()> {
        let ibss = self
            .ibss
            .iter_mut()
            .find(|ibss| ibss.ssid == ssid)
            .ok_or_else(|| Error::NoSuchNetwork(ssid.to_string()))?;
        ibss.stations.push(wlan);
        Ok(())
    }

    /// Remove a station from whichever BSS contains it
    pub fn remove_station_from_bss(&mut self, wlan: WlanId) -> bool {
        for bss in &mut self.bss {
            if let Some(pos) = bss.stations.iter().position(|s| *s == wlan) {
                bss.stations.remove(pos);
                return true;
            }
        }
        false
    }

    /// Remove a station from whichever IBSS contains it
    ///
    /// The IBSS itself is dropped once its last station leaves.
    pub fn remove_station_from_ibss(&mut self, wlan: WlanId) -> bool {
        let Some(index) = self
            .ibss
            .iter()
            .position(|ibss| ibss.stations.contains(&wlan))
        else {
            return false;
        };

        self.ibss[index].stations.retain(|s| *s != wlan);
        if self.ibss[index].stations.is_empty() {
            self.ibss.remove(index);
        }
        true
    }

    /// Remove the BSS whose access point is `ap`
    pub fn remove_bss(&mut self, ap: WlanId) -> bool {
        let before = self.bss.len();
        self.bss.retain(|bss| bss.ap != ap);
        self.bss.len() != before
    }

    pub fn remove_ibss(&mut self, ssid: &str) -> bool {
        let before = self.ibss.len();
        self.ibss.retain(|ibss| ibss.ssid != ssid);
        self.ibss.len() != before
    }

    // Queries

    /// Classify a node as AP, BSS station, IBSS station or unaffiliated
    pub fn lookup_by_role(&self, node: &NodeId) -> Membership {
        for bss in &self.bss {
            if self.node_of(bss.ap) == Some(node) {
                return Membership::AccessPoint {
                    ssid: bss.ssid.clone(),
                    wlan: bss.ap,
                };
            }
        }

        for bss in &self.bss {
            if let Some(wlan) = bss
                .stations
                .iter()
                .find(|s| self.node_of(**s) == Some(node))
            {
                return Membership::BssStation {
                    ssid: bss.ssid.clone(),
                    wlan: *wlan,
                };
            }
        }

        for ibss in &self.ibss {
            if let Some(wlan) = ibss
                .stations
                .iter()
                .find(|s| self.node_of(**s) == Some(node))
            {
                return Membership::IbssStation {
                    ssid: ibss.ssid.clone(),
                    wlan: *wlan,
                };
            }
        }

        Membership::Unaffiliated
    }

    pub fn is_part_of_network(&self, node: &NodeId) -> bool {
        self.lookup_by_role(node).is_affiliated()
    }

    pub fn find_access_point_by_ssid(&self, ssid: &str) -> Option<WlanId> {
        self.bss.iter().find(|bss| bss.ssid == ssid).map(|bss| bss.ap)
    }

    pub fn ibss_exists(&self, ssid: &str) -> bool {
        self.ibss.iter().any(|ibss| ibss.ssid == ssid)
    }

    /// Stations of the BSS whose access point is `ap`, in join order
    pub fn stations_of_ap(&self, ap: WlanId) -> &[WlanId] {
        self.bss
            .iter()
            .find(|bss| bss.ap == ap)
            .map(|bss| bss.stations.as_slice())
            .unwrap_or(&[])
    }

    pub fn ibss_stations(&self, ssid: &str) -> &[WlanId] {
        self.ibss
            .iter()
            .find(|ibss| ibss.ssid == ssid)
            .map(|ibss| ibss.stations.as_slice())
            .unwrap_or(&[])
    }

    pub fn bss_networks(&self) -> &[BssEntry] {
        &self.bss
    }

    pub fn ibss_networks(&self) -> &[IbssEntry] {
        &self.ibss
    }

    /// Forget every network and interface record
    ///
    /// Issued generations are kept so handles from before the clear stay stale.
    pub fn clear_all(&mut self) {
        self.bss.clear();
        self.ibss.clear();
        self.active.clear();
        self.parked.clear();
    }
}
