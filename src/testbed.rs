//! Testbed for building a wireless topology from configuration
//!
//! Handles:
//! - Creating one namespace per configured node
//! - Starting access points, then joining their stations
//! - Forming ad hoc networks
//! - Addressing interfaces from explicit addresses or subnets
//! - Status reporting and teardown

use crate::error::Result;
use crate::manifest::{StationDef, WavemeshConfig};
use crate::network::AddressBook;
use crate::topology::{AccessPoint, Node, WifiStation};
use crate::wireless::{
    ConfWriter, JoinTarget, NodeId, RadioEngine, StationConfig, WirelessContext,
    WirelessInterface, WlanId,
};
use ipnet::IpNet;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Snapshot of the radio pool
#[derive(Debug, Serialize)]
pub struct PoolStatus {
    pub capacity: usize,
    pub in_use: usize,
    pub free: usize,
}

#[derive(Debug, Serialize)]
pub struct BssStatus {
    pub ssid: String,
    pub access_point: Option<NodeId>,
    pub frequency: Option<u32>,
    pub stations: Vec<NodeId>,
}

#[derive(Debug, Serialize)]
pub struct IbssStatus {
    pub ssid: String,
    pub frequency: Option<u32>,
    pub members: Vec<NodeId>,
}

/// Snapshot of the whole wireless topology
#[derive(Debug, Serialize)]
pub struct TopologyStatus {
    pub pool: PoolStatus,
    pub bss: Vec<BssStatus>,
    pub ibss: Vec<IbssStatus>,
    pub interfaces: Vec<WirelessInterface>,
}

/// A running testbed
pub struct Testbed<E: RadioEngine> {
    /// Loaded configuration
    config: WavemeshConfig,

    /// Wireless state of the topology
    ctx: WirelessContext<E>,

    /// Nodes created by `up`
    nodes: Vec<Node>,

    access_points: Vec<AccessPoint>,

    stations: Vec<WifiStation>,

    /// Subnet plans keyed by network
    addresses: AddressBook,
}

fn bss_key(ssid: &str) -> String {
    format!("bss:{}", ssid)
}

fn ibss_key(ssid: &str) -> String {
    format!("ibss:{}", ssid)
}

impl<E: RadioEngine> Testbed<E> {
    pub fn new(config: WavemeshConfig, engine: E) -> Self {
        let ctx = WirelessContext::from_config(engine, &config.config);
        Self {
            config,
            ctx,
            nodes: Vec::new(),
            access_points: Vec::new(),
            stations: Vec::new(),
            addresses: AddressBook::new(),
        }
    }

    pub fn context(&self) -> &WirelessContext<E> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut WirelessContext<E> {
        &mut self.ctx
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn access_points(&self) -> &[AccessPoint] {
        &self.access_points
    }

    pub fn stations(&self) -> &[WifiStation] {
        &self.stations
    }

    /// Build the whole topology
    pub fn up(&mut self) -> Result<()> {
        // Cloned so the context can be borrowed mutably while walking it
        let config = self.config.clone();

        for name in config.node_names() {
            let node = Node::create(self.ctx.engine_mut(), name)?;
            self.nodes.push(node);
        }

        self.plan_addresses(&config)?;

        for def in &config.access_points {
            let mut ap = AccessPoint::new(NodeId::new(&def.name), &def.ssid);
            ap.set_configs(config.hostapd_overrides(def));
            if let Some(addr) = self.address_for(&bss_key(&def.ssid), def.address)? {
                ap.set_address(&mut self.ctx, addr)?;
            }
            ap.start(&mut self.ctx)?;
            self.access_points.push(ap);
        }

        for def in &config.access_points {
            let passphrase = config.hostapd_overrides(def).remove("wpa_passphrase");
            self.join_stations(&config, &def.ssid, passphrase)?;
        }

        for adhoc in &config.adhoc {
            let members: Vec<NodeId> = adhoc.members.iter().map(NodeId::new).collect();
            let ids = self.ctx.start_ibss(&members, &adhoc.ssid, adhoc.frequency)?;
            for (node, wlan) in members.into_iter().zip(ids) {
                let explicit = station_def(&config, node.as_str()).and_then(|s| s.address);
                self.bind_station(node, wlan, &ibss_key(&adhoc.ssid), explicit)?;
            }
        }

        // Stations without a network only get their namespace
        for def in config.stations.iter().filter(|s| !is_networked(&config, s)) {
            let mut station = WifiStation::new(NodeId::new(&def.name));
            if let Some(addr) = def.address {
                station.set_address(&mut self.ctx, addr)?;
            }
            self.stations.push(station);
        }

        info!(
            nodes = self.nodes.len(),
            radios = self.ctx.pool().in_use(),
            "testbed is up"
        );
        Ok(())
    }

    /// Tear down everything `up` built
    ///
    /// Every step runs even if an earlier one failed; the first error is
    /// returned at the end.
    pub fn down(&mut self) -> Result<()> {
        let mut first_error = None;
        let mut note = |step: &str, result: Result<()>| {
            if let Err(e) = result {
                warn!(step, error = %e, "teardown step failed");
                first_error.get_or_insert(e);
            }
        };

        note("wireless", self.ctx.teardown());
        for node in self.nodes.drain(..) {
            note(node.name(), Node::destroy(self.ctx.engine_mut(), node.name()));
        }
        self.access_points.clear();
        self.stations.clear();
        self.addresses = AddressBook::new();
        note(
            "config files",
            ConfWriter::new(&self.config.config.work_dir)
                .clean()
                .map(|_| ()),
        );

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("testbed is down");
                Ok(())
            }
        }
    }

    /// Snapshot of networks, interfaces and the pool
    pub fn status(&self) -> TopologyStatus {
        let registry = self.ctx.registry();
        let node_of = |id: WlanId| self.ctx.interface(id).and_then(|w| w.node.clone());

        TopologyStatus {
            pool: PoolStatus {
                capacity: self.ctx.pool().capacity(),
                in_use: self.ctx.pool().in_use(),
                free: self.ctx.pool().free(),
            },
            bss: registry
                .bss_networks()
                .iter()
                .map(|bss| BssStatus {
                    ssid: bss.ssid.clone(),
                    access_point: node_of(bss.ap),
                    frequency: self.ctx.interface(bss.ap).and_then(|w| w.frequency),
                    stations: bss.stations.iter().filter_map(|s| node_of(*s)).collect(),
                })
                .collect(),
            ibss: registry
                .ibss_networks()
                .iter()
                .map(|ibss| IbssStatus {
                    ssid: ibss.ssid.clone(),
                    frequency: ibss.frequency,
                    members: ibss.stations.iter().filter_map(|s| node_of(*s)).collect(),
                })
                .collect(),
            interfaces: registry.active_interfaces().cloned().collect(),
        }
    }

    /// Print status as a table or JSON
    pub fn print_status(&self, json: bool) -> Result<()> {
        let status = self.status();
        if json {
            println!("{}", serde_json::to_string_pretty(&status)?);
            return Ok(());
        }

        println!(
            "{:<10} {:<10} {:<8} {:<20} {:<18} {:<16}",
            "NODE", "IFACE", "ROLE", "SSID", "MAC", "ADDRESS"
        );
        println!("{}", "-".repeat(86));
        for wlan in &status.interfaces {
            println!(
                "{:<10} {:<10} {:<8} {:<20} {:<18} {:<16}",
                wlan.namespace().unwrap_or("-"),
                wlan.name,
                wlan.role,
                wlan.ssid,
                wlan.mac_address,
                wlan.address.map(|a| a.to_string()).unwrap_or_default()
            );
        }
        println!(
            "\nRadios: {} of {} in use",
            status.pool.in_use, status.pool.capacity
        );
        Ok(())
    }

    fn join_stations(
        &mut self,
        config: &WavemeshConfig,
        ssid: &str,
        ap_psk: Option<String>,
    ) -> Result<()> {
        // wpa_supplicant files are per access point, so join one credential at a time
        let mut groups: BTreeMap<Option<String>, Vec<&StationDef>> = BTreeMap::new();
        for def in config
            .stations
            .iter()
            .filter(|s| s.bss.as_deref() == Some(ssid))
        {
            let psk = def.psk.clone().or_else(|| ap_psk.clone());
            groups.entry(psk).or_default().push(def);
        }

        let target = JoinTarget::BySsid(ssid.to_string());
        for (psk, defs) in groups {
            let nodes: Vec<NodeId> = defs.iter().map(|d| NodeId::new(&d.name)).collect();
            let credentials = StationConfig {
                psk,
                key_mgmt: None,
            };
            let ids = self.ctx.join_bss_many(&nodes, &target, &credentials)?;
            for ((node, def), wlan) in nodes.into_iter().zip(defs).zip(ids) {
                self.bind_station(node, wlan, &bss_key(ssid), def.address)?;
            }
        }
        Ok(())
    }

    fn bind_station(
        &mut self,
        node: NodeId,
        wlan: WlanId,
        plan: &str,
        explicit: Option<IpNet>,
    ) -> Result<()> {
        let mut station = WifiStation::new(node);
        station.bind(wlan);
        if let Some(addr) = self.address_for(plan, explicit)? {
            station.set_address(&mut self.ctx, addr)?;
        }
        self.stations.push(station);
        Ok(())
    }

    /// Register subnets and reserve explicit addresses before allocating
    fn plan_addresses(&mut self, config: &WavemeshConfig) -> Result<()> {
        for ap in &config.access_points {
            let Some(subnet) = ap.subnet else { continue };
            let key = bss_key(&ap.ssid);
            self.addresses.add_plan(&key, subnet);

            let stations = config
                .stations
                .iter()
                .filter(|s| s.bss.as_deref() == Some(ap.ssid.as_str()))
                .filter_map(|s| s.address);
            for addr in ap.address.into_iter().chain(stations) {
                self.addresses.reserve(&key, &addr)?;
            }
        }

        for adhoc in &config.adhoc {
            let Some(subnet) = adhoc.subnet else { continue };
            let key = ibss_key(&adhoc.ssid);
            self.addresses.add_plan(&key, subnet);

            for member in &adhoc.members {
                if let Some(addr) = station_def(config, member).and_then(|s| s.address) {
                    self.addresses.reserve(&key, &addr)?;
                }
            }
        }
        Ok(())
    }

    fn address_for(&mut self, plan: &str, explicit: Option<IpNet>) -> Result<Option<IpNet>> {
        match explicit {
            Some(addr) => Ok(Some(addr)),
            None if self.addresses.has_plan(plan) => Ok(Some(self.addresses.allocate(plan)?)),
            None => Ok(None),
        }
    }
}

fn station_def<'a>(config: &'a WavemeshConfig, name: &str) -> Option<&'a StationDef> {
    config.stations.iter().find(|s| s.name == name)
}

fn is_networked(config: &WavemeshConfig, station: &StationDef) -> bool {
    station.bss.is_some()
        || config
            .adhoc
            .iter()
            .any(|a| a.members.iter().any(|m| *m == station.name))
}

/// Remove what a previous `up` left behind, without in-process state
///
/// Failures are logged and the sweep continues.
pub fn purge<E: RadioEngine>(config: &WavemeshConfig, engine: &mut E) -> Result<()> {
    for name in config.node_names() {
        if let Err(e) = Node::destroy(engine, name) {
            warn!(node = name, error = %e, "failed to destroy node");
        }
    }

    if let Err(e) = engine.deprovision_radios() {
        warn!(error = %e, "failed to unload radios");
    }

    let removed = ConfWriter::new(&config.config.work_dir).clean()?;
    info!(removed, "testbed purged");
    Ok(())
}

/// Print what `up` would build
pub fn check(config: &WavemeshConfig) {
    println!("Configuration is valid.");
    println!(
        "\nRadios: {} needed, {} available",
        config.radios_needed(),
        config.config.max_wireless_interface_count
    );

    println!("\nAccess points:");
    for ap in &config.access_points {
        let stations: Vec<&str> = config
            .stations
            .iter()
            .filter(|s| s.bss.as_deref() == Some(ap.ssid.as_str()))
            .map(|s| s.name.as_str())
            .collect();
        println!("  {} ({}): {}", ap.name, ap.ssid, stations.join(", "));
    }

    println!("\nAd hoc networks:");
    for adhoc in &config.adhoc {
        println!(
            "  {} @ {} MHz: {}",
            adhoc.ssid,
            adhoc.frequency,
            adhoc.members.join(", ")
        );
    }
}
