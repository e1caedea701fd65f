//! Membership transitions
//!
//! `WirelessContext` owns the radio pool, the network registry and the radio
//! engine of one emulated topology. Every transition runs in the same order:
//! consult the registry, acquire a radio, drive the engine, then record the
//! result. A failure after a radio was acquired hands the radio back before
//! the error is returned.

use crate::error::{Error, Result};
use crate::manifest::GlobalConfig;
use crate::wireless::conf::channel_frequency;
use crate::wireless::{
    ConfWriter, HostapdConf, LinkState, Membership, NetworkRegistry, NodeId, NodeLifecycle,
    NodeState, RadioEngine, RadioPool, Settle, StationConfig, WirelessInterface, WlanId, WlanRole,
};
use ipnet::IpNet;
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Which BSS a station should join
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinTarget {
    /// The BSS hosted by this node
    ByNode(NodeId),
    /// The BSS with this SSID
    BySsid(String),
}

impl JoinTarget {
    pub fn node(name: impl Into<String>) -> Self {
        JoinTarget::ByNode(NodeId::new(name))
    }

    pub fn ssid(ssid: impl Into<String>) -> Self {
        JoinTarget::BySsid(ssid.into())
    }
}

/// Access point a join resolved to
struct ResolvedBss {
    ap_node: NodeId,
    ssid: String,
    mac: String,
    frequency: Option<u32>,
}

type Transition = fn(&mut NodeLifecycle) -> std::result::Result<(), state_machines::DynamicError>;

/// Wireless state of one emulated topology
pub struct WirelessContext<E: RadioEngine> {
    engine: E,
    pool: RadioPool,
    registry: NetworkRegistry,
    lifecycles: BTreeMap<NodeId, NodeLifecycle>,
    settle: Settle,
    writer: ConfWriter,
    max_interfaces: usize,
}

impl<E: RadioEngine> WirelessContext<E> {
    /// Create a context whose pool will hold `max_interfaces` radios
    pub fn new(engine: E, max_interfaces: usize, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            pool: RadioPool::new(),
            registry: NetworkRegistry::new(),
            lifecycles: BTreeMap::new(),
            settle: Settle::Immediate,
            writer: ConfWriter::new(work_dir),
            max_interfaces,
        }
    }

    /// Create a context from the `[config]` table
    pub fn from_config(engine: E, config: &GlobalConfig) -> Self {
        Self::new(engine, config.max_wireless_interface_count, &config.work_dir)
            .with_settle(Settle::from_config(&config.settle))
    }

    pub fn with_settle(mut self, settle: Settle) -> Self {
        self.settle = settle;
        self
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn pool(&self) -> &RadioPool {
        &self.pool
    }

    pub fn registry(&self) -> &NetworkRegistry {
        &self.registry
    }

    pub fn interface(&self, id: WlanId) -> Option<&WirelessInterface> {
        self.registry.interface(id)
    }

    pub fn max_interfaces(&self) -> usize {
        self.max_interfaces
    }

    /// Change the pool size
    ///
    /// Takes effect immediately if the pool is already provisioned, which is
    /// only possible while no radio is issued.
    pub fn set_max_interfaces(&mut self, count: usize) -> Result<()> {
        if self.pool.is_provisioned() && count != self.pool.capacity() {
            self.pool.initialize(&mut self.engine, count)?;
            // Fresh radios: parked records describe devices that no longer exist
            self.registry.clear_all();
        }
        self.max_interfaces = count;
        Ok(())
    }

    pub fn lookup_by_role(&self, node: &NodeId) -> Membership {
        self.registry.lookup_by_role(node)
    }

    pub fn node_state(&self, node: &NodeId) -> NodeState {
        self.lifecycles
            .get(node)
            .map(NodeLifecycle::state)
            .unwrap_or(NodeState::Unaffiliated)
    }

    /// Start an access point for `ssid` on `node`
    ///
    /// `overrides` replaces hostapd defaults by field name.
    pub fn create_ap(
        &mut self,
        node: &NodeId,
        ssid: &str,
        overrides: &BTreeMap<String, String>,
    ) -> Result<WlanId> {
        if let Some(existing) = self.registry.find_access_point_by_ssid(ssid) {
            let owner = self.registry.interface(existing).and_then(|w| w.node.as_ref());
            if owner != Some(node) {
                return Err(Error::NetworkAlreadyExists(ssid.to_string()));
            }
        }
        self.auto_leave(node)?;

        let id = self.with_wlan(node, WlanRole::AccessPoint, ssid, None, |ctx, id| {
            let (iface, ns) = ctx.placement(id)?;
            let conf = HostapdConf::new(&iface, ssid, overrides);
            let path = ctx.writer.write_hostapd(&iface, &conf)?;
            ctx.engine.start_ap_daemon(&iface, &ns, &path)?;

            let frequency = conf
                .get("channel")
                .and_then(|c| c.parse::<u32>().ok())
                .and_then(channel_frequency);
            if let Some(wlan) = ctx.registry.interface_mut(id) {
                wlan.frequency = frequency;
            }
            ctx.registry.create_bss(ssid, id)?;
            Ok(id)
        })?;

        self.transition(node, NodeLifecycle::host)?;
        info!(node = %node, ssid, wlan = %id, "access point started");
        Ok(id)
    }

    /// Stop an access point, disconnecting every station of its BSS first
    pub fn stop_ap(&mut self, ap: WlanId) -> Result<()> {
        let node = self
            .registry
            .interface(ap)
            .and_then(|w| w.node.clone())
            .ok_or_else(|| Error::NotAnAccessPoint(ap.to_string()))?;
        let ssid = match self.registry.lookup_by_role(&node) {
            Membership::AccessPoint { ssid, wlan } if wlan == ap => ssid,
            _ => return Err(Error::NotAnAccessPoint(node.to_string())),
        };

        let stations = self.registry.stations_of_ap(ap).to_vec();
        for station in stations {
            self.leave_bss_station(station)?;
        }

        let (iface, ns) = self.placement(ap)?;
        self.revert_to_managed(&ns, &iface)?;
        self.registry.remove_bss(ap);
        self.transition(&node, NodeLifecycle::release)?;
        self.free_wlan(ap)?;

        info!(node = %node, ssid = %ssid, "access point stopped");
        Ok(())
    }

    /// Join a single station to a BSS
    pub fn join_bss(
        &mut self,
        node: &NodeId,
        target: &JoinTarget,
        config: &StationConfig,
    ) -> Result<WlanId> {
        let ids = self.join_bss_many(std::slice::from_ref(node), target, config)?;
        ids.into_iter()
            .next()
            .ok_or_else(|| Error::NotInNetwork(node.to_string()))
    }

    /// Join several stations to one BSS, settling once at the end
    pub fn join_bss_many(
        &mut self,
        nodes: &[NodeId],
        target: &JoinTarget,
        config: &StationConfig,
    ) -> Result<Vec<WlanId>> {
        check_unique(nodes)?;
        let bss = self.resolve_bss(target)?;
        if let Some(node) = nodes.iter().find(|n| **n == bss.ap_node) {
            return Err(Error::SelfAssociation(node.to_string()));
        }
        if nodes.is_empty() {
            return Ok(Vec::new());
        }

        let conf_path = self.writer.write_supplicant(&bss.mac, config)?;

        let mut ids = Vec::with_capacity(nodes.len());
        let mut joined = Vec::with_capacity(nodes.len());
        for node in nodes {
            self.auto_leave(node)?;
            let id = self.with_wlan(node, WlanRole::Managed, &bss.ssid, bss.frequency, |ctx, id| {
                let (iface, ns) = ctx.placement(id)?;
                ctx.engine.join_bss(&bss.mac, &iface, &ns, &conf_path)?;
                ctx.registry.add_station_to_bss(&bss.ap_node, id)?;
                Ok(id)
            })?;
            self.transition(node, NodeLifecycle::associate)?;
            info!(node = %node, ssid = %bss.ssid, wlan = %id, "station joined BSS");

            joined.push(self.placement(id)?);
            ids.push(id);
        }

        self.settle.after_join(&mut self.engine, &joined)?;
        Ok(ids)
    }

    /// Form a new IBSS; the first node creates the cell, the rest join it
    pub fn start_ibss(&mut self, nodes: &[NodeId], ssid: &str, frequency: u32) -> Result<Vec<WlanId>> {
        let Some((first, rest)) = nodes.split_first() else {
            return Ok(Vec::new());
        };
        check_unique(nodes)?;
        if self.registry.ibss_exists(ssid) {
            return Err(Error::NetworkAlreadyExists(ssid.to_string()));
        }

        self.auto_leave(first)?;
        let id = self.with_wlan(first, WlanRole::Ibss, ssid, Some(frequency), |ctx, id| {
            let (iface, ns) = ctx.placement(id)?;
            ctx.engine.join_ibss(&iface, ssid, frequency, &ns)?;
            ctx.registry.create_ibss(ssid, Some(frequency))?;
            ctx.registry.add_station_to_ibss(ssid, id)?;
            Ok(id)
        })?;
        self.transition(first, NodeLifecycle::peer)?;
        info!(node = %first, ssid, frequency, wlan = %id, "ad hoc network formed");

        // Members joining while the cell is still forming end up in a cell of their own
        self.settle.after_formation(&mut self.engine);

        let mut ids = vec![id];
        ids.extend(self.join_ibss_members(rest, ssid, frequency)?);
        Ok(ids)
    }

    /// Join nodes to an existing IBSS
    pub fn join_ibss(&mut self, nodes: &[NodeId], ssid: &str, frequency: u32) -> Result<Vec<WlanId>> {
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        check_unique(nodes)?;
        if !self.registry.ibss_exists(ssid) {
            return Err(Error::NoSuchNetwork(ssid.to_string()));
        }
        self.join_ibss_members(nodes, ssid, frequency)
    }

    fn join_ibss_members(
        &mut self,
        nodes: &[NodeId],
        ssid: &str,
        frequency: u32,
    ) -> Result<Vec<WlanId>> {
        let mut ids = Vec::with_capacity(nodes.len());
        let mut joined = Vec::new();

        for node in nodes {
            if let Membership::IbssStation { ssid: current, wlan } = self.registry.lookup_by_role(node) {
                if current == ssid {
                    debug!(node = %node, ssid, "already a member of this ad hoc network");
                    ids.push(wlan);
                    continue;
                }
            }

            self.auto_leave(node)?;
            let id = self.with_wlan(node, WlanRole::Ibss, ssid, Some(frequency), |ctx, id| {
                let (iface, ns) = ctx.placement(id)?;
                ctx.engine.join_ibss(&iface, ssid, frequency, &ns)?;
                ctx.registry.add_station_to_ibss(ssid, id)?;
                Ok(id)
            })?;
            self.transition(node, NodeLifecycle::peer)?;
            info!(node = %node, ssid, wlan = %id, "station joined ad hoc network");

            joined.push(self.placement(id)?);
            ids.push(id);
        }

        self.settle.after_join(&mut self.engine, &joined)?;
        Ok(ids)
    }

    /// Leave whatever network `node` belongs to
    pub fn leave(&mut self, node: &NodeId) -> Result<()> {
        match self.registry.lookup_by_role(node) {
            Membership::AccessPoint { wlan, .. } => self.stop_ap(wlan),
            Membership::BssStation { wlan, .. } => self.leave_bss_station(wlan),
            Membership::IbssStation { wlan, .. } => self.leave_ibss_station(wlan),
            Membership::Unaffiliated => Err(Error::NotInNetwork(node.to_string())),
        }
    }

    /// Assign an IP address to a live interface
    pub fn set_address(&mut self, id: WlanId, addr: IpNet) -> Result<()> {
        let (iface, ns) = self.placement(id)?;
        self.engine.assign_address(&ns, &iface, &addr)?;
        if let Some(wlan) = self.registry.interface_mut(id) {
            wlan.address = Some(addr);
        }
        info!(node = %ns, iface = %iface, address = %addr, "address assigned");
        Ok(())
    }

    /// Leave every network and unload the radios
    pub fn teardown(&mut self) -> Result<()> {
        while let Some(node) = self.next_affiliated_node() {
            self.leave(&node)?;
        }

        // Interfaces left behind by failed leaves
        let dangling: Vec<WlanId> = self.registry.active_interfaces().map(|w| w.id()).collect();
        for id in dangling {
            if let Err(e) = self.free_wlan(id) {
                warn!(wlan = %id, error = %e, "failed to release radio");
            }
        }

        self.pool.teardown(&mut self.engine)?;
        self.registry.clear_all();
        self.lifecycles.clear();
        info!("wireless context torn down");
        Ok(())
    }

    /// Forget all state without touching the engine
    pub fn reset(&mut self) {
        self.pool = RadioPool::new();
        self.registry.clear_all();
        self.lifecycles.clear();
    }

    fn next_affiliated_node(&self) -> Option<NodeId> {
        self.registry
            .active_interfaces()
            .filter_map(|w| w.node.clone())
            .find(|node| self.registry.is_part_of_network(node))
    }

    fn leave_bss_station(&mut self, id: WlanId) -> Result<()> {
        let node = self.owner(id)?;
        let (iface, ns) = self.placement(id)?;
        self.revert_to_managed(&ns, &iface)?;
        self.registry.remove_station_from_bss(id);
        self.transition(&node, NodeLifecycle::release)?;
        self.free_wlan(id)?;
        info!(node = %node, wlan = %id, "station left BSS");
        Ok(())
    }

    fn leave_ibss_station(&mut self, id: WlanId) -> Result<()> {
        let node = self.owner(id)?;
        let (iface, ns) = self.placement(id)?;
        self.engine.leave_ibss(&iface, &ns)?;
        self.registry.remove_station_from_ibss(id);
        self.transition(&node, NodeLifecycle::release)?;
        self.free_wlan(id)?;
        info!(node = %node, wlan = %id, "station left ad hoc network");
        Ok(())
    }

    /// Leave the current network before taking a new role
    fn auto_leave(&mut self, node: &NodeId) -> Result<()> {
        let membership = self.registry.lookup_by_role(node);
        if membership.is_affiliated() {
            warn!(
                node = %node,
                ssid = membership.ssid().unwrap_or_default(),
                "node already part of a wireless network, leaving it first"
            );
            self.leave(node)?;
        }
        Ok(())
    }

    fn resolve_bss(&self, target: &JoinTarget) -> Result<ResolvedBss> {
        let ap = match target {
            JoinTarget::ByNode(node) => match self.registry.lookup_by_role(node) {
                Membership::AccessPoint { wlan, .. } => wlan,
                _ => return Err(Error::NotAnAccessPoint(node.to_string())),
            },
            JoinTarget::BySsid(ssid) => self
                .registry
                .find_access_point_by_ssid(ssid)
                .ok_or_else(|| Error::NoSuchNetwork(ssid.clone()))?,
        };

        let wlan = self
            .registry
            .interface(ap)
            .ok_or_else(|| Error::UnknownInterface(ap.to_string()))?;
        let ap_node = wlan
            .node
            .clone()
            .ok_or_else(|| Error::UnknownInterface(ap.to_string()))?;

        Ok(ResolvedBss {
            ap_node,
            ssid: wlan.ssid.clone(),
            mac: wlan.mac_address.clone(),
            frequency: wlan.frequency,
        })
    }

    /// Acquire a radio for `node`, run `action`, release the radio if it fails
    fn with_wlan<T>(
        &mut self,
        node: &NodeId,
        role: WlanRole,
        ssid: &str,
        frequency: Option<u32>,
        action: impl FnOnce(&mut Self, WlanId) -> Result<T>,
    ) -> Result<T> {
        let id = self.acquire_wlan(node, role, ssid, frequency)?;
        action(self, id).or_else(|e| {
            warn!(node = %node, wlan = %id, error = %e, "wireless setup failed, releasing radio");
            if let Err(cleanup) = self.free_wlan(id) {
                warn!(wlan = %id, error = %cleanup, "failed to release radio");
            }
            Err(e)
        })
    }

    fn acquire_wlan(
        &mut self,
        node: &NodeId,
        role: WlanRole,
        ssid: &str,
        frequency: Option<u32>,
    ) -> Result<WlanId> {
        self.pool
            .ensure_initialized(&mut self.engine, self.max_interfaces)?;
        let slot = self.pool.acquire()?;

        match self.place(slot, node, role, ssid, frequency) {
            Ok(id) => Ok(id),
            Err(e) => {
                self.pool.release(slot);
                Err(e)
            }
        }
    }

    /// Move the radio of `slot` into the node's namespace and record it
    fn place(
        &mut self,
        slot: usize,
        node: &NodeId,
        role: WlanRole,
        ssid: &str,
        frequency: Option<u32>,
    ) -> Result<WlanId> {
        let iface = self.engine.interface_name(slot);
        let ns = node.as_str();

        let mac = if self.registry.is_parked(slot) {
            None
        } else {
            Some(self.engine.mac_address(&iface)?)
        };
        let phy = self.engine.phy_index(&iface, None)?;
        self.engine.move_to_namespace(ns, phy)?;

        if let Err(e) = self.bring_up(ns, &iface, role) {
            if let Err(undo) = self.engine.move_to_default(ns, phy) {
                warn!(iface = %iface, error = %undo, "failed to return radio to default namespace");
            }
            return Err(e);
        }

        let mut wlan = match self.registry.unpark(slot) {
            Some(wlan) => wlan,
            None => WirelessInterface::new(iface, slot, mac.unwrap_or_default()),
        };
        wlan.rehydrate(node.clone(), role, ssid, frequency);
        let id = self.registry.activate(wlan);
        debug!(node = %node, wlan = %id, phy, "radio placed");
        Ok(id)
    }

    fn bring_up(&mut self, ns: &str, iface: &str, role: WlanRole) -> Result<()> {
        self.engine.set_role(ns, iface, role)?;
        self.engine.set_link_state(ns, iface, LinkState::Up)
    }

    fn revert_to_managed(&mut self, ns: &str, iface: &str) -> Result<()> {
        self.engine.set_link_state(ns, iface, LinkState::Down)?;
        self.engine.set_role(ns, iface, WlanRole::Managed)
    }

    /// Return a radio to the default namespace and the pool
    fn free_wlan(&mut self, id: WlanId) -> Result<()> {
        let (iface, ns) = self.placement(id)?;
        let phy = self.engine.phy_index(&iface, Some(&ns))?;
        self.engine.move_to_default(&ns, phy)?;
        self.pool.release(id.slot);
        self.registry.park(id)?;
        debug!(wlan = %id, phy, "radio released");
        Ok(())
    }

    /// Kernel name and namespace of a live interface
    fn placement(&self, id: WlanId) -> Result<(String, String)> {
        let wlan = self
            .registry
            .interface(id)
            .ok_or_else(|| Error::UnknownInterface(id.to_string()))?;
        let ns = wlan
            .namespace()
            .ok_or_else(|| Error::UnknownInterface(id.to_string()))?;
        Ok((wlan.name.clone(), ns.to_string()))
    }

    fn owner(&self, id: WlanId) -> Result<NodeId> {
        self.registry
            .interface(id)
            .and_then(|w| w.node.clone())
            .ok_or_else(|| Error::UnknownInterface(id.to_string()))
    }

    fn transition(&mut self, node: &NodeId, event: Transition) -> Result<()> {
        let lifecycle = self.lifecycles.entry(node.clone()).or_default();
        event(lifecycle).map_err(|e| Error::InvalidTransition {
            node: node.to_string(),
            message: format!("{:?}", e),
        })
    }
}

fn check_unique(nodes: &[NodeId]) -> Result<()> {
    let mut seen = HashSet::new();
    for node in nodes {
        if !seen.insert(node) {
            return Err(Error::DuplicateNode(node.to_string()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::FakeEngine;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn context(radios: usize) -> (WirelessContext<FakeEngine>, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = WirelessContext::new(FakeEngine::new(), radios, dir.path());
        (ctx, dir)
    }

    fn n(name: &str) -> NodeId {
        NodeId::from(name)
    }

    fn nodes(names: &[&str]) -> Vec<NodeId> {
        names.iter().map(|name| n(name)).collect()
    }

    fn no_overrides() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    fn assert_pool_matches_registry(ctx: &WirelessContext<FakeEngine>) {
        assert_eq!(
            ctx.pool().in_use(),
            ctx.registry().active_interfaces().count()
        );
    }

    #[test]
    fn test_pool_exhaustion_on_join() {
        let (mut ctx, _dir) = context(2);
        ctx.create_ap(&n("ap1"), "bss1", &no_overrides()).unwrap();
        ctx.join_bss(&n("sta1"), &JoinTarget::ssid("bss1"), &StationConfig::default())
            .unwrap();

        let err = ctx
            .join_bss(&n("sta2"), &JoinTarget::ssid("bss1"), &StationConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted { max: 2 }));
        assert_eq!(ctx.lookup_by_role(&n("sta2")), Membership::Unaffiliated);

        let ap = ctx.registry().find_access_point_by_ssid("bss1").unwrap();
        assert_eq!(ctx.registry().stations_of_ap(ap).len(), 1);
        assert_pool_matches_registry(&ctx);
    }

    #[test]
    fn test_ibss_lifecycle() {
        let (mut ctx, _dir) = context(4);
        let ids = ctx
            .start_ibss(&nodes(&["sta1", "sta2", "sta3"]), "ibss1", 2412)
            .unwrap();
        assert_eq!(ids.len(), 3);
        assert_eq!(ctx.registry().ibss_networks().len(), 1);
        assert_eq!(ctx.registry().ibss_stations("ibss1"), ids.as_slice());

        ctx.leave(&n("sta1")).unwrap();
        assert_eq!(ctx.registry().ibss_stations("ibss1").len(), 2);
        assert_eq!(ctx.registry().parked_count(), 1);
        assert!(ctx.registry().is_parked(ids[0].slot));

        ctx.leave(&n("sta2")).unwrap();
        ctx.leave(&n("sta3")).unwrap();
        assert!(!ctx.registry().ibss_exists("ibss1"));
        assert_eq!(ctx.pool().in_use(), 0);
        assert_eq!(ctx.engine().calls_to("leave_ibss"), 3);
    }

    #[test]
    fn test_join_unknown_ssid() {
        let (mut ctx, _dir) = context(2);
        ctx.create_ap(&n("ap1"), "bss1", &no_overrides()).unwrap();

        let err = ctx
            .join_bss(
                &n("sta1"),
                &JoinTarget::ssid("nonexistent-ssid"),
                &StationConfig::default(),
            )
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchNetwork(_)));
        assert_eq!(ctx.registry().bss_networks().len(), 1);
        assert_eq!(ctx.pool().in_use(), 1);
    }

    #[test]
    fn test_auto_leave_ibss_before_bss_join() {
        let (mut ctx, _dir) = context(3);
        ctx.create_ap(&n("ap1"), "bss1", &no_overrides()).unwrap();
        ctx.start_ibss(&nodes(&["sta1"]), "net1", 2412).unwrap();

        ctx.join_bss(&n("sta1"), &JoinTarget::node("ap1"), &StationConfig::default())
            .unwrap();
        assert!(!ctx.registry().ibss_exists("net1"));
        assert!(matches!(
            ctx.lookup_by_role(&n("sta1")),
            Membership::BssStation { ref ssid, .. } if ssid == "bss1"
        ));
        assert_eq!(ctx.node_state(&n("sta1")), NodeState::BssStation);
        assert_pool_matches_registry(&ctx);
    }

    #[test]
    fn test_empty_ibss_request() {
        let (mut ctx, _dir) = context(2);
        assert!(ctx.start_ibss(&[], "ibss1", 2412).unwrap().is_empty());
        assert!(ctx.join_ibss(&[], "ibss1", 2412).unwrap().is_empty());
        assert!(ctx.registry().ibss_networks().is_empty());
        assert!(!ctx.pool().is_provisioned());
    }

    #[test]
    fn test_create_and_stop_ap_round_trip() {
        let (mut ctx, _dir) = context(3);
        ctx.create_ap(&n("ap0"), "other", &no_overrides()).unwrap();
        let free_before = ctx.pool().free();

        let ap = ctx.create_ap(&n("ap1"), "X", &no_overrides()).unwrap();
        assert_eq!(ctx.pool().free(), free_before - 1);
        assert_eq!(ctx.node_state(&n("ap1")), NodeState::AccessPoint);

        ctx.stop_ap(ap).unwrap();
        assert_eq!(ctx.pool().free(), free_before);
        assert_eq!(ctx.registry().find_access_point_by_ssid("X"), None);
        assert_eq!(ctx.node_state(&n("ap1")), NodeState::Unaffiliated);
        assert!(ctx.interface(ap).is_none());
    }

    #[test]
    fn test_slots_unique_and_pool_consistent() {
        let (mut ctx, _dir) = context(6);
        let ap = ctx.create_ap(&n("ap1"), "bss1", &no_overrides()).unwrap();
        let stations = ctx
            .join_bss_many(
                &nodes(&["sta1", "sta2"]),
                &JoinTarget::ssid("bss1"),
                &StationConfig::default(),
            )
            .unwrap();
        let peers = ctx
            .start_ibss(&nodes(&["sta3", "sta4"]), "mesh", 2437)
            .unwrap();

        let mut slots: Vec<usize> = std::iter::once(ap)
            .chain(stations)
            .chain(peers)
            .map(|id| id.slot)
            .collect();
        slots.sort_unstable();
        slots.dedup();
        assert_eq!(slots.len(), 5);
        assert_pool_matches_registry(&ctx);

        ctx.leave(&n("sta2")).unwrap();
        ctx.leave(&n("sta4")).unwrap();
        assert_pool_matches_registry(&ctx);
    }

    #[test]
    fn test_leave_unaffiliated() {
        let (mut ctx, _dir) = context(2);
        assert!(matches!(
            ctx.leave(&n("sta1")),
            Err(Error::NotInNetwork(_))
        ));
        assert_eq!(ctx.lookup_by_role(&n("sta1")), Membership::Unaffiliated);
        assert!(ctx.engine().calls().is_empty());
    }

    #[test]
    fn test_failed_join_releases_radio() {
        let (mut ctx, _dir) = context(2);
        ctx.create_ap(&n("ap1"), "bss1", &no_overrides()).unwrap();
        ctx.engine_mut().fail_on("join_bss");

        let err = ctx
            .join_bss(&n("sta1"), &JoinTarget::ssid("bss1"), &StationConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
        assert_eq!(ctx.pool().in_use(), 1);
        assert_eq!(ctx.lookup_by_role(&n("sta1")), Membership::Unaffiliated);
        assert_eq!(ctx.engine().phy_location(1), None);
        assert_pool_matches_registry(&ctx);

        // The radio is usable again
        ctx.engine_mut().clear_failures();
        let id = ctx
            .join_bss(&n("sta1"), &JoinTarget::ssid("bss1"), &StationConfig::default())
            .unwrap();
        assert_eq!(id.slot, 1);
    }

    #[test]
    fn test_failed_ap_daemon_releases_radio() {
        let (mut ctx, _dir) = context(1);
        ctx.engine_mut().fail_on("start_ap_daemon");

        assert!(ctx.create_ap(&n("ap1"), "bss1", &no_overrides()).is_err());
        assert_eq!(ctx.pool().in_use(), 0);
        assert!(ctx.registry().bss_networks().is_empty());
        assert_eq!(ctx.node_state(&n("ap1")), NodeState::Unaffiliated);
    }

    #[test]
    fn test_failed_placement_releases_slot() {
        let (mut ctx, _dir) = context(1);
        ctx.engine_mut().fail_on("set_role");

        assert!(ctx.start_ibss(&nodes(&["sta1"]), "mesh", 2412).is_err());
        assert_eq!(ctx.pool().in_use(), 0);
        assert_eq!(ctx.engine().phy_location(0), None);
        assert!(!ctx.registry().ibss_exists("mesh"));
    }

    #[test]
    fn test_parked_interface_is_reused() {
        let (mut ctx, _dir) = context(1);
        let first = ctx.create_ap(&n("ap1"), "bss1", &no_overrides()).unwrap();
        let mac = ctx.interface(first).unwrap().mac_address.clone();
        ctx.leave(&n("ap1")).unwrap();

        let second = ctx.start_ibss(&nodes(&["sta1"]), "mesh", 2412).unwrap()[0];
        assert_eq!(second.slot, first.slot);
        assert_ne!(second, first);
        assert!(ctx.interface(first).is_none());

        let wlan = ctx.interface(second).unwrap();
        assert_eq!(wlan.mac_address, mac);
        assert_eq!(wlan.role, WlanRole::Ibss);
        assert_eq!(wlan.namespace(), Some("sta1"));
        assert_eq!(ctx.engine().calls_to("mac_address"), 1);
    }

    #[test]
    fn test_stop_ap_disconnects_stations() {
        let (mut ctx, _dir) = context(3);
        let ap = ctx.create_ap(&n("ap1"), "bss1", &no_overrides()).unwrap();
        ctx.join_bss_many(
            &nodes(&["sta1", "sta2"]),
            &JoinTarget::node("ap1"),
            &StationConfig::default(),
        )
        .unwrap();

        ctx.leave(&n("ap1")).unwrap();
        assert_eq!(ctx.registry().find_access_point_by_ssid("bss1"), None);
        assert_eq!(ctx.lookup_by_role(&n("sta1")), Membership::Unaffiliated);
        assert_eq!(ctx.lookup_by_role(&n("sta2")), Membership::Unaffiliated);
        assert_eq!(ctx.pool().in_use(), 0);
        assert!(ctx.interface(ap).is_none());
    }

    #[test]
    fn test_stop_ap_rejects_non_ap() {
        let (mut ctx, _dir) = context(2);
        ctx.create_ap(&n("ap1"), "bss1", &no_overrides()).unwrap();
        let sta = ctx
            .join_bss(&n("sta1"), &JoinTarget::ssid("bss1"), &StationConfig::default())
            .unwrap();

        assert!(matches!(ctx.stop_ap(sta), Err(Error::NotAnAccessPoint(_))));
        assert!(matches!(
            ctx.join_bss(&n("sta2"), &JoinTarget::node("sta1"), &StationConfig::default()),
            Err(Error::NotAnAccessPoint(_))
        ));
    }

    #[test]
    fn test_bss_ssid_uniqueness() {
        let (mut ctx, _dir) = context(3);
        let first = ctx.create_ap(&n("ap1"), "bss1", &no_overrides()).unwrap();
        assert!(matches!(
            ctx.create_ap(&n("ap2"), "bss1", &no_overrides()),
            Err(Error::NetworkAlreadyExists(_))
        ));

        // The same node restarting its own BSS replaces it
        let second = ctx.create_ap(&n("ap1"), "bss1", &no_overrides()).unwrap();
        assert_ne!(first, second);
        assert_eq!(ctx.registry().bss_networks().len(), 1);
        assert_eq!(ctx.pool().in_use(), 1);
    }

    #[test]
    fn test_self_association_rejected() {
        let (mut ctx, _dir) = context(2);
        ctx.create_ap(&n("ap1"), "bss1", &no_overrides()).unwrap();
        assert!(matches!(
            ctx.join_bss(&n("ap1"), &JoinTarget::ssid("bss1"), &StationConfig::default()),
            Err(Error::SelfAssociation(_))
        ));
        assert_eq!(ctx.node_state(&n("ap1")), NodeState::AccessPoint);
    }

    #[test]
    fn test_duplicate_nodes_rejected() {
        let (mut ctx, _dir) = context(4);
        assert!(matches!(
            ctx.start_ibss(&nodes(&["sta1", "sta1"]), "mesh", 2412),
            Err(Error::DuplicateNode(_))
        ));
        assert!(!ctx.pool().is_provisioned());
    }

    #[test]
    fn test_ibss_existence_checks() {
        let (mut ctx, _dir) = context(4);
        assert!(matches!(
            ctx.join_ibss(&nodes(&["sta1"]), "mesh", 2412),
            Err(Error::NoSuchNetwork(_))
        ));

        ctx.start_ibss(&nodes(&["sta1"]), "mesh", 2412).unwrap();
        assert!(matches!(
            ctx.start_ibss(&nodes(&["sta2"]), "mesh", 2412),
            Err(Error::NetworkAlreadyExists(_))
        ));
    }

    #[test]
    fn test_join_ibss_existing_member_is_noop() {
        let (mut ctx, _dir) = context(3);
        let ids = ctx.start_ibss(&nodes(&["sta1", "sta2"]), "mesh", 2412).unwrap();
        let calls = ctx.engine().calls_to("join_ibss");

        let again = ctx.join_ibss(&nodes(&["sta2", "sta3"]), "mesh", 2412).unwrap();
        assert_eq!(again[0], ids[1]);
        assert_eq!(ctx.engine().calls_to("join_ibss"), calls + 1);
        assert_eq!(ctx.registry().ibss_stations("mesh").len(), 3);
    }

    #[test]
    fn test_ibss_join_commands_follow_formation() {
        let (mut ctx, _dir) = context(3);
        ctx.start_ibss(&nodes(&["sta1", "sta2"]), "mesh", 2462).unwrap();

        let joins: Vec<&String> = ctx
            .engine()
            .calls()
            .iter()
            .filter(|c| c.starts_with("join_ibss"))
            .collect();
        assert_eq!(joins[0], "join_ibss wlan0 mesh 2462 sta1");
        assert_eq!(joins[1], "join_ibss wlan1 mesh 2462 sta2");
        assert_eq!(ctx.engine().role_of("wlan0"), Some(WlanRole::Ibss));
    }

    #[test]
    fn test_formation_wait_precedes_other_joins() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = WirelessContext::new(FakeEngine::new(), 3, dir.path()).with_settle(
            Settle::Fixed {
                join: Duration::from_millis(2000),
                formation: Duration::from_millis(20000),
            },
        );
        ctx.start_ibss(&nodes(&["sta1", "sta2", "sta3"]), "mesh", 2412)
            .unwrap();

        let calls = ctx.engine().calls();
        let position = |call: &str| calls.iter().position(|c| c == call).unwrap();
        let first = position("join_ibss wlan0 mesh 2412 sta1");
        let formation = position("pause 20000");
        let second = position("join_ibss wlan1 mesh 2412 sta2");
        let third = position("join_ibss wlan2 mesh 2412 sta3");
        let joined = position("pause 2000");

        assert!(first < formation);
        assert!(formation < second);
        assert!(second < third);
        assert!(third < joined);
        assert_eq!(ctx.engine().calls_to("pause"), 2);
    }

    #[test]
    fn test_generated_files() {
        let (mut ctx, dir) = context(2);
        let mut overrides = BTreeMap::new();
        overrides.insert("channel".to_string(), "1".to_string());

        let ap = ctx.create_ap(&n("ap1"), "bss1", &overrides).unwrap();
        assert_eq!(ctx.interface(ap).unwrap().frequency, Some(2412));
        let hostapd = fs::read_to_string(dir.path().join("hostapd_wlan0.conf")).unwrap();
        assert!(hostapd.contains("ssid=bss1\n"));
        assert!(hostapd.contains("channel=1\n"));

        let sta = ctx
            .join_bss(
                &n("sta1"),
                &JoinTarget::ssid("bss1"),
                &StationConfig::default().with_psk("secret123"),
            )
            .unwrap();
        assert_eq!(ctx.interface(sta).unwrap().frequency, Some(2412));

        let mac = &ctx.interface(ap).unwrap().mac_address;
        let supplicant =
            fs::read_to_string(dir.path().join(format!("wpa_supplicant_{}.conf", mac))).unwrap();
        assert!(supplicant.contains(&format!("bssid={}", mac)));
        assert!(supplicant.contains("psk=\"secret123\""));
    }

    #[test]
    fn test_set_address() {
        let (mut ctx, _dir) = context(1);
        let id = ctx.start_ibss(&nodes(&["sta1"]), "mesh", 2412).unwrap()[0];
        let addr: IpNet = "10.0.5.1/24".parse().unwrap();

        ctx.set_address(id, addr).unwrap();
        assert_eq!(ctx.interface(id).unwrap().address, Some(addr));
        assert_eq!(ctx.engine().addresses_of("wlan0"), &[addr]);
    }

    #[test]
    fn test_teardown() {
        let (mut ctx, _dir) = context(4);
        ctx.create_ap(&n("ap1"), "bss1", &no_overrides()).unwrap();
        ctx.join_bss(&n("sta1"), &JoinTarget::ssid("bss1"), &StationConfig::default())
            .unwrap();
        ctx.start_ibss(&nodes(&["sta2", "sta3"]), "mesh", 2412).unwrap();

        ctx.teardown().unwrap();
        assert!(ctx.registry().bss_networks().is_empty());
        assert!(ctx.registry().ibss_networks().is_empty());
        assert!(!ctx.pool().is_provisioned());
        assert_eq!(ctx.engine().radio_count(), 0);
        assert_eq!(ctx.node_state(&n("ap1")), NodeState::Unaffiliated);
    }

    #[test]
    fn test_resize_refused_while_in_use() {
        let (mut ctx, _dir) = context(2);
        ctx.start_ibss(&nodes(&["sta1"]), "mesh", 2412).unwrap();

        assert!(matches!(
            ctx.set_max_interfaces(1),
            Err(Error::PoolResize { .. })
        ));
        assert_eq!(ctx.max_interfaces(), 2);

        ctx.leave(&n("sta1")).unwrap();
        ctx.set_max_interfaces(4).unwrap();
        assert_eq!(ctx.pool().capacity(), 4);
        assert_eq!(ctx.registry().parked_count(), 0);
    }

    #[test]
    fn test_reset() {
        let (mut ctx, _dir) = context(2);
        ctx.create_ap(&n("ap1"), "bss1", &no_overrides()).unwrap();
        ctx.reset();

        assert!(ctx.registry().bss_networks().is_empty());
        assert!(!ctx.pool().is_provisioned());
        assert_eq!(ctx.node_state(&n("ap1")), NodeState::Unaffiliated);
    }

    #[test]
    fn test_old_handle_rejected_after_reset() {
        let (mut ctx, _dir) = context(2);
        let old = ctx.create_ap(&n("ap1"), "bss1", &no_overrides()).unwrap();
        ctx.reset();

        let fresh = ctx.create_ap(&n("ap2"), "bss2", &no_overrides()).unwrap();
        assert_eq!(fresh.slot, old.slot);
        assert_ne!(fresh, old);
        assert!(ctx.interface(old).is_none());

        assert!(matches!(ctx.stop_ap(old), Err(Error::NotAnAccessPoint(_))));
        assert!(ctx.registry().find_access_point_by_ssid("bss2").is_some());
    }

    #[test]
    fn test_old_handle_rejected_after_teardown() {
        let (mut ctx, _dir) = context(2);
        let old = ctx.start_ibss(&nodes(&["sta1"]), "mesh", 2412).unwrap()[0];
        ctx.teardown().unwrap();

        let fresh = ctx.start_ibss(&nodes(&["sta9"]), "mesh", 2412).unwrap()[0];
        assert_ne!(fresh, old);
        assert!(ctx.interface(old).is_none());
        assert!(matches!(
            ctx.set_address(old, "10.0.5.1/24".parse().unwrap()),
            Err(Error::UnknownInterface(_))
        ));
    }
}
