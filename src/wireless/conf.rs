//! hostapd and wpa_supplicant configuration files
//!
//! Provides:
//! - Default hostapd settings with per-AP overrides
//! - The station credential block used for BSS association
//! - Deterministic file naming inside the work directory

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Pre-shared key used when neither side overrides it
pub const DEFAULT_PSK: &str = "123456789a";

/// hostapd settings in file order
fn hostapd_defaults() -> Vec<(&'static str, String)> {
    vec![
        ("interface", "wlan0".into()),
        ("ssid", "simplewifi".into()),
        ("wds_sta", "1".into()),
        ("hw_mode", "g".into()),
        ("channel", "10".into()),
        ("ieee80211d", "1".into()),
        ("country_code", "IN".into()),
        ("ieee80211n", "1".into()),
        ("auth_algs", "1".into()),
        ("wpa", "2".into()),
        ("wpa_key_mgmt", "WPA-PSK".into()),
        ("rsn_pairwise", "CCMP".into()),
        ("wpa_passphrase", DEFAULT_PSK.into()),
    ]
}

/// Rendered hostapd configuration for one access point
#[derive(Debug, Clone)]
pub struct HostapdConf {
    entries: Vec<(&'static str, String)>,
}

impl HostapdConf {
    /// Merge overrides (keyed by hostapd field name) into the defaults
    ///
    /// Only known fields can be overridden. `interface` and `ssid` always
    /// come from the arguments.
    pub fn new(iface: &str, ssid: &str, overrides: &BTreeMap<String, String>) -> Self {
        let mut entries = hostapd_defaults();

        for key in overrides.keys() {
            if !entries.iter().any(|(k, _)| *k == key.as_str()) {
                warn!(key = %key, "ignoring unknown hostapd setting");
            }
        }

        for (key, value) in entries.iter_mut() {
            if let Some(v) = overrides.get(*key) {
                *value = v.clone();
            }
            match *key {
                "interface" => *value = iface.to_string(),
                "ssid" => *value = ssid.to_string(),
                _ => {}
            }
        }

        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Flat `key=value` text
    pub fn render(&self) -> String {
        let mut content = String::new();
        for (key, value) in &self.entries {
            content.push_str(&format!("{}={}\n", key, value));
        }
        content
    }
}

/// Center frequency in MHz of an 802.11 channel number
pub fn channel_frequency(channel: u32) -> Option<u32> {
    match channel {
        1..=13 => Some(2407 + 5 * channel),
        14 => Some(2484),
        32..=177 => Some(5000 + 5 * channel),
        _ => None,
    }
}

/// Credentials a station uses to associate with one access point
#[derive(Debug, Clone, Default)]
pub struct StationConfig {
    /// Pre-shared key; defaults to `DEFAULT_PSK`
    pub psk: Option<String>,
    /// Key management scheme; defaults to WPA-PSK
    pub key_mgmt: Option<String>,
}

impl StationConfig {
    pub fn with_psk(mut self, psk: impl Into<String>) -> Self {
        self.psk = Some(psk.into());
        self
    }

    /// wpa_supplicant network block pinned to `bssid`
    pub fn render(&self, bssid: &str) -> String {
        format!(
            "network={{\n    bssid={}\n    key_mgmt={}\n    psk=\"{}\"\n}}\n",
            bssid,
            self.key_mgmt.as_deref().unwrap_or("WPA-PSK"),
            self.psk.as_deref().unwrap_or(DEFAULT_PSK),
        )
    }
}

/// Writes generated files into a work directory
#[derive(Debug, Clone)]
pub struct ConfWriter {
    dir: PathBuf,
}

impl ConfWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn hostapd_path(&self, iface: &str) -> PathBuf {
        self.dir.join(format!("hostapd_{}.conf", iface))
    }

    pub fn supplicant_path(&self, ap_mac: &str) -> PathBuf {
        self.dir.join(format!("wpa_supplicant_{}.conf", ap_mac))
    }

    pub fn write_hostapd(&self, iface: &str, conf: &HostapdConf) -> Result<PathBuf> {
        let path = self.hostapd_path(iface);
        self.write(&path, &conf.render())?;
        Ok(path)
    }

    pub fn write_supplicant(&self, ap_mac: &str, conf: &StationConfig) -> Result<PathBuf> {
        let path = self.supplicant_path(ap_mac);
        self.write(&path, &conf.render(ap_mac))?;
        Ok(path)
    }

    /// Remove generated files, returning how many were deleted
    pub fn clean(&self) -> Result<usize> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            let generated = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| {
                    (n.starts_with("hostapd_") || n.starts_with("wpa_supplicant_"))
                        && n.ends_with(".conf")
                });
            if generated {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        debug!(dir = %self.dir.display(), removed, "removed generated config files");
        Ok(removed)
    }

    fn write(&self, path: &Path, content: &str) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to create {}: {}", self.dir.display(), e),
            ))
        })?;
        fs::write(path, content)?;
        debug!(path = %path.display(), "wrote config file");
        Ok(())
    }
}
