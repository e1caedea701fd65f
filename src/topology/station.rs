//! Wireless station facade

use crate::error::{Error, Result};
use crate::wireless::{
    JoinTarget, Membership, NodeId, RadioEngine, StationConfig, WirelessContext, WlanId,
};
use ipnet::IpNet;

/// A node with one wireless radio acting as a client or ad hoc peer
#[derive(Debug, Clone)]
pub struct WifiStation {
    node: NodeId,
    address: Option<IpNet>,
    wlan: Option<WlanId>,
}

impl WifiStation {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            address: None,
            wlan: None,
        }
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Interface seen by the last operation on this station
    pub fn wlan(&self) -> Option<WlanId> {
        self.wlan
    }

    pub fn address(&self) -> Option<IpNet> {
        self.address
    }

    pub fn membership<E: RadioEngine>(&self, ctx: &WirelessContext<E>) -> Membership {
        ctx.lookup_by_role(&self.node)
    }

    /// Record the address and apply it right away if the station is connected
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

    pub fn join_bss<E: RadioEngine>(
        &mut self,
        ctx: &mut WirelessContext<E>,
        target: &JoinTarget,
        config: &StationConfig,
    ) -> Result<WlanId> {
        let wlan = ctx.join_bss(&self.node, target, config)?;
        self.attach(ctx, wlan)
    }

    /// Form a new ad hoc network with this station as its first member
    pub fn start_adhoc_network<E: RadioEngine>(
        &mut self,
        ctx: &mut WirelessContext<E>,
        ssid: &str,
        frequency: u32,
    ) -> Result<WlanId> {
        let wlan = single(ctx.start_ibss(std::slice::from_ref(&self.node), ssid, frequency)?, ssid)?;
        self.attach(ctx, wlan)
    }

    pub fn join_adhoc_network<E: RadioEngine>(
        &mut self,
        ctx: &mut WirelessContext<E>,
        ssid: &str,
        frequency: u32,
    ) -> Result<WlanId> {
        let wlan = single(ctx.join_ibss(std::slice::from_ref(&self.node), ssid, frequency)?, ssid)?;
        self.attach(ctx, wlan)
    }

    pub fn leave_network<E: RadioEngine>(&mut self, ctx: &mut WirelessContext<E>) -> Result<()> {
        ctx.leave(&self.node)?;
        self.wlan = None;
        Ok(())
    }

    /// Drop the cached interface if the context no longer has it in a network
    ///
    /// Stopping an access point or joining elsewhere removes memberships
    /// behind the facade's back.
    fn refresh<E: RadioEngine>(&mut self, ctx: &WirelessContext<E>) -> Option<WlanId> {
        self.wlan = ctx.lookup_by_role(&self.node).wlan();
        self.wlan
    }

    /// Record an interface joined on this station's behalf
    pub(crate) fn bind(&mut self, wlan: WlanId) {
        self.wlan = Some(wlan);
    }

    fn attach<E: RadioEngine>(&mut self, ctx: &mut WirelessContext<E>, wlan: WlanId) -> Result<WlanId> {
        self.wlan = Some(wlan);
        if let Some(addr) = self.address {
            // Rejoining an ad hoc network keeps the interface and its address
            let assigned = ctx.interface(wlan).and_then(|w| w.address);
            if assigned != Some(addr) {
                ctx.set_address(wlan, addr)?;
            }
        }
        Ok(wlan)
    }
}

fn single(ids: Vec<WlanId>, ssid: &str) -> Result<WlanId> {
    ids.into_iter()
        .next()
        .ok_or_else(|| Error::NoSuchNetwork(ssid.to_string()))
}
