//! Radio engine: the OS boundary of the wireless subsystem
//!
//! Provides:
//! - The `RadioEngine` trait, one method per external action the
//!   membership logic needs
//! - `SystemEngine`, which drives mac80211_hwsim, `iw`, `ip`, hostapd and
//!   wpa_supplicant through `std::process::Command`

use crate::error::{Error, Result};
use crate::wireless::WlanRole;
use crate::wireless::iw;
use ipnet::IpNet;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use std::path::Path;
use std::process::Command;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

/// Administrative state of a network interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Up,
    Down,
}

impl LinkState {
    fn as_str(&self) -> &'static str {
        match self {
            LinkState::Up => "up",
            LinkState::Down => "down",
        }
    }
}

/// External actions consumed by the wireless subsystem
///
/// Namespaced operations take the node's namespace name; `None` means the
/// default (root) namespace.
pub trait RadioEngine {
    /// Kernel name of the interface backing pool slot `slot`
    fn interface_name(&self, slot: usize) -> String {
        format!("wlan{}", slot)
    }

    /// Unload and reload the radio driver with exactly `count` radios
    fn provision_radios(&mut self, count: usize) -> Result<()>;

    /// Unload the radio driver, destroying every radio
    fn deprovision_radios(&mut self) -> Result<()>;

    /// Physical device (wiphy) index of an interface
    fn phy_index(&mut self, iface: &str, ns: Option<&str>) -> Result<u32>;

    /// MAC address of an interface in the default namespace
    fn mac_address(&mut self, iface: &str) -> Result<String>;

    /// Move a physical device from the default namespace into `ns`
    fn move_to_namespace(&mut self, ns: &str, phy: u32) -> Result<()>;

    /// Move a physical device from `ns` back to the default namespace
    fn move_to_default(&mut self, ns: &str, phy: u32) -> Result<()>;

    fn set_link_state(&mut self, ns: &str, iface: &str, state: LinkState) -> Result<()>;

    fn set_role(&mut self, ns: &str, iface: &str, role: WlanRole) -> Result<()>;

    /// Launch the access point daemon on `iface` with the given config file
    fn start_ap_daemon(&mut self, iface: &str, ns: &str, conf: &Path) -> Result<()>;

    /// Associate `iface` with the BSS whose credentials are in `conf`
    fn join_bss(&mut self, ap_mac: &str, iface: &str, ns: &str, conf: &Path) -> Result<()>;

    fn join_ibss(&mut self, iface: &str, ssid: &str, frequency: u32, ns: &str) -> Result<()>;

    fn leave_ibss(&mut self, iface: &str, ns: &str) -> Result<()>;

    fn assign_address(&mut self, ns: &str, iface: &str, addr: &IpNet) -> Result<()>;

    /// Whether `iface` reports an established association or IBSS membership
    fn link_established(&mut self, iface: &str, ns: &str) -> Result<bool>;

    fn create_namespace(&mut self, ns: &str) -> Result<()>;

    fn delete_namespace(&mut self, ns: &str) -> Result<()>;

    /// Process IDs running inside a namespace
    fn namespace_pids(&mut self, ns: &str) -> Result<Vec<i32>>;

    /// Ask a process (hostapd, wpa_supplicant) to exit
    fn terminate_process(&mut self, pid: i32) -> Result<()>;

    /// Block while external state converges
    fn pause(&mut self, delay: Duration) {
        thread::sleep(delay);
    }
}

/// Radio engine backed by the host's networking tools
#[derive(Debug, Default, Clone)]
pub struct SystemEngine;

impl SystemEngine {
    pub fn new() -> Self {
        Self
    }

    /// Run a command, returning stdout on success
    fn run(program: &str, args: &[&str]) -> Result<String> {
        let command = format!("{} {}", program, args.join(" "));
        debug!(command = %command, "exec");

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::CommandFailed {
                command: command.clone(),
                message: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::CommandFailed {
                command,
                message: stderr.trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a command inside a namespace
    fn run_in(ns: &str, program: &str, args: &[&str]) -> Result<String> {
        let mut full = vec!["netns", "exec", ns, program];
        full.extend_from_slice(args);
        Self::run("ip", &full)
    }

    fn iw_info(iface: &str, ns: Option<&str>) -> Result<iw::DevInfo> {
        let output = match ns {
            Some(ns) => Self::run_in(ns, "iw", &["dev", iface, "info"])?,
            None => Self::run("iw", &["dev", iface, "info"])?,
        };
        iw::parse_dev_info(&output)
    }
}

impl RadioEngine for SystemEngine {
    fn provision_radios(&mut self, count: usize) -> Result<()> {
        self.deprovision_radios()?;
        let radios = format!("radios={}", count);
        Self::run("modprobe", &["mac80211_hwsim", &radios])?;
        Ok(())
    }

    fn deprovision_radios(&mut self) -> Result<()> {
        Self::run("modprobe", &["-r", "mac80211_hwsim"])?;
        Ok(())
    }

    fn phy_index(&mut self, iface: &str, ns: Option<&str>) -> Result<u32> {
        Ok(Self::iw_info(iface, ns)?.wiphy)
    }

    fn mac_address(&mut self, iface: &str) -> Result<String> {
        Ok(Self::iw_info(iface, None)?.addr)
    }

    fn move_to_namespace(&mut self, ns: &str, phy: u32) -> Result<()> {
        let phy = format!("phy{}", phy);
        Self::run("iw", &["phy", &phy, "set", "netns", "name", ns])?;
        Ok(())
    }

    fn move_to_default(&mut self, ns: &str, phy: u32) -> Result<()> {
        let phy = format!("phy{}", phy);
        Self::run_in(ns, "iw", &["phy", &phy, "set", "netns", "1"])?;
        Ok(())
    }

    fn set_link_state(&mut self, ns: &str, iface: &str, state: LinkState) -> Result<()> {
        Self::run_in(ns, "ip", &["link", "set", iface, state.as_str()])?;
        Ok(())
    }

    fn set_role(&mut self, ns: &str, iface: &str, role: WlanRole) -> Result<()> {
        Self::run_in(ns, "iw", &["dev", iface, "set", "type", role.as_iw_type()])?;
        Ok(())
    }

    fn start_ap_daemon(&mut self, _iface: &str, ns: &str, conf: &Path) -> Result<()> {
        let conf = conf.to_string_lossy();
        Self::run_in(ns, "hostapd", &["-B", &conf])?;
        Ok(())
    }

    fn join_bss(&mut self, _ap_mac: &str, iface: &str, ns: &str, conf: &Path) -> Result<()> {
        let conf = conf.to_string_lossy();
        Self::run_in(ns, "wpa_supplicant", &["-B", "-i", iface, "-c", &conf])?;
        Ok(())
    }

    fn join_ibss(&mut self, iface: &str, ssid: &str, frequency: u32, ns: &str) -> Result<()> {
        let freq = frequency.to_string();
        Self::run_in(ns, "iw", &["dev", iface, "ibss", "join", ssid, &freq])?;
        Ok(())
    }

    fn leave_ibss(&mut self, iface: &str, ns: &str) -> Result<()> {
        Self::run_in(ns, "iw", &["dev", iface, "ibss", "leave"])?;
        Ok(())
    }

    fn assign_address(&mut self, ns: &str, iface: &str, addr: &IpNet) -> Result<()> {
        let addr = addr.to_string();
        Self::run_in(ns, "ip", &["addr", "add", &addr, "dev", iface])?;
        Ok(())
    }

    fn link_established(&mut self, iface: &str, ns: &str) -> Result<bool> {
        let output = Self::run_in(ns, "iw", &["dev", iface, "link"])?;
        Ok(iw::parse_link(&output).is_established())
    }

    fn create_namespace(&mut self, ns: &str) -> Result<()> {
        Self::run("ip", &["netns", "add", ns])?;
        // Loopback is best-effort
        if let Err(e) = Self::run_in(ns, "ip", &["link", "set", "lo", "up"]) {
            warn!(ns, error = %e, "failed to bring up loopback");
        }
        Ok(())
    }

    fn delete_namespace(&mut self, ns: &str) -> Result<()> {
        match Self::run("ip", &["netns", "del", ns]) {
            Ok(_) => Ok(()),
            // Already gone
            Err(Error::CommandFailed { message, .. }) if message.contains("No such file") => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn namespace_pids(&mut self, ns: &str) -> Result<Vec<i32>> {
        let output = Self::run("ip", &["netns", "pids", ns])?;
        output
            .split_whitespace()
            .map(|pid| {
                pid.parse::<i32>()
                    .map_err(|_| Error::OutputParse(format!("invalid pid '{}'", pid)))
            })
            .collect()
    }

    fn terminate_process(&mut self, pid: i32) -> Result<()> {
        debug!(pid, "sending SIGTERM");
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            // Already exited
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(Errno::EPERM) => Err(Error::PermissionDenied(format!(
                "cannot signal process {}",
                pid
            ))),
            Err(e) => Err(Error::Io(e.into())),
        }
    }
}
