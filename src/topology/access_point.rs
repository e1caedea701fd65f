//! Access point facade

use crate::error::{Error, Result};
use crate::wireless::{Membership, NodeId, RadioEngine, WirelessContext, WlanId};
use ipnet::IpNet;
use std::collections::BTreeMap;

/// A node hosting one BSS
#[derive(Debug, Clone)]
pub struct AccessPoint {
    node: NodeId,
    ssid: String,
    configs: BTreeMap<String, String>,
    address: Option<IpNet>,
    wlan: Option<WlanId>,
}

impl AccessPoint {
    pub fn new(node: NodeId, ssid: impl Into<String>) -> Self {
        Self {
            node,
            ssid: ssid.into(),
            configs: BTreeMap::new(),
            address: None,
            wlan: None,
        }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    /// Interface of the running access point
    pub fn wlan(&self) -> Option<WlanId> {
        self.wlan
    }

    pub fn address(&self) -> Option<IpNet> {
        self.address
    }

    /// SSID used by the next `start`
    pub fn set_ssid(&mut self, ssid: impl Into<String>) {
        self.ssid = ssid.into();
    }

    /// Merge hostapd overrides used by the next `start`
    pub fn set_configs(&mut self, configs: BTreeMap<String, String>) {
        self.configs.extend(configs);
    }

    /// Record the address and apply it right away if the AP is running
    pub fn set_address<E: RadioEngine>(
        &mut self,
        ctx: &mut WirelessContext<E>,
        addr: IpNet,
    ) -> Result<()> {
        self.address = Some(addr);
        if let Some(wlan) = self.refresh(ctx) {
            ctx.set_address(wlan, addr)?;
        }
        Ok(())
    }

    pub fn start<E: RadioEngine>(&mut self, ctx: &mut WirelessContext<E>) -> Result<WlanId> {
        let wlan = ctx.create_ap(&self.node, &self.ssid, &self.configs)?;
        self.wlan = Some(wlan);
        if let Some(addr) = self.address {
            ctx.set_address(wlan, addr)?;
        }
        Ok(wlan)
    }

    pub fn stop<E: RadioEngine>(&mut self, ctx: &mut WirelessContext<E>) -> Result<()> {
        let wlan = self
            .refresh(ctx)
            .ok_or_else(|| Error::NotAnAccessPoint(self.node.to_string()))?;
        ctx.stop_ap(wlan)?;
        self.wlan = None;
        Ok(())
    }

    pub fn is_running<E: RadioEngine>(&self, ctx: &WirelessContext<E>) -> bool {
        matches!(
            ctx.lookup_by_role(&self.node),
            Membership::AccessPoint { wlan, .. } if Some(wlan) == self.wlan
        )
    }

    /// Drop the cached interface once the node no longer hosts a BSS
    fn refresh<E: RadioEngine>(&mut self, ctx: &WirelessContext<E>) -> Option<WlanId> {
        self.wlan = match ctx.lookup_by_role(&self.node) {
            Membership::AccessPoint { wlan, .. } if Some(wlan) == self.wlan => Some(wlan),
            _ => None,
        };
        self.wlan
    }
}
