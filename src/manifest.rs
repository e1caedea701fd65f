//! Configuration file parsing for wavemesh
//!
//! Parses `wavemesh.toml` testbed descriptions using serde

use crate::error::{Error, Result};
use ipnet::IpNet;
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

/// Load configuration from a file
pub fn load(path: &Path) -> Result<WavemeshConfig> {
    let content = fs::read_to_string(path).map_err(|e| Error::ConfigRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let config: WavemeshConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WavemeshConfig {
    /// Global configuration settings
    #[serde(default)]
    pub config: GlobalConfig,

    /// hostapd overrides applied to every access point
    #[serde(default)]
    pub hostapd: BTreeMap<String, toml::Value>,

    /// Access point definitions
    #[serde(default)]
    pub access_points: Vec<AccessPointDef>,

    /// Station definitions
    #[serde(default)]
    pub stations: Vec<StationDef>,

    /// Ad hoc network definitions
    #[serde(default)]
    pub adhoc: Vec<AdhocDef>,
}

impl WavemeshConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.config.max_wireless_interface_count == 0 {
            return Err(Error::ConfigValidation(
                "max_wireless_interface_count must be at least 1".into(),
            ));
        }

        // Node names are namespace names and must be unique
        let mut names = HashSet::new();
        for name in self
            .access_points
            .iter()
            .map(|ap| &ap.name)
            .chain(self.stations.iter().map(|sta| &sta.name))
        {
            if name.is_empty() || !name.chars().all(is_namespace_char) {
                return Err(Error::ConfigValidation(format!(
                    "Invalid node name '{}': use letters, digits, '-' and '_'",
                    name
                )));
            }
            if !names.insert(name) {
                return Err(Error::ConfigValidation(format!(
                    "Duplicate node name: {}",
                    name
                )));
            }
        }

        let mut bss_ssids = HashSet::new();
        for ap in &self.access_points {
            if !bss_ssids.insert(ap.ssid.as_str()) {
                return Err(Error::ConfigValidation(format!(
                    "Duplicate BSS SSID: {}",
                    ap.ssid
                )));
            }
        }

        for sta in &self.stations {
            if let Some(bss) = &sta.bss {
                if !bss_ssids.contains(bss.as_str()) {
                    return Err(Error::ConfigValidation(format!(
                        "Station '{}' joins unknown BSS '{}'",
                        sta.name, bss
                    )));
                }
            }
        }

        let mut ibss_ssids = HashSet::new();
        let mut adhoc_members = HashSet::new();
        for adhoc in &self.adhoc {
            if !ibss_ssids.insert(adhoc.ssid.as_str()) {
                return Err(Error::ConfigValidation(format!(
                    "Duplicate ad hoc SSID: {}",
                    adhoc.ssid
                )));
            }
            let mut listed = HashSet::new();
            for member in &adhoc.members {
                if !listed.insert(member.as_str()) {
                    return Err(Error::ConfigValidation(format!(
                        "Ad hoc network '{}' lists station '{}' more than once",
                        adhoc.ssid, member
                    )));
                }
                let station = self
                    .stations
                    .iter()
                    .find(|sta| &sta.name == member)
                    .ok_or_else(|| {
                        Error::ConfigValidation(format!(
                            "Ad hoc network '{}' lists unknown station '{}'",
                            adhoc.ssid, member
                        ))
                    })?;
                if station.bss.is_some() {
                    return Err(Error::ConfigValidation(format!(
                        "Station '{}' cannot join both a BSS and ad hoc network '{}'",
                        member, adhoc.ssid
                    )));
                }
                if !adhoc_members.insert(member.as_str()) {
                    return Err(Error::ConfigValidation(format!(
                        "Station '{}' is a member of more than one ad hoc network",
                        member
                    )));
                }
            }
        }

        let needed = self.radios_needed();
        if needed > self.config.max_wireless_interface_count {
            return Err(Error::ConfigValidation(format!(
                "Topology needs {} wireless interfaces but max_wireless_interface_count is {}",
                needed, self.config.max_wireless_interface_count
            )));
        }

        Ok(())
    }

    /// Number of radios the whole topology occupies once built
    pub fn radios_needed(&self) -> usize {
        let bss_stations = self.stations.iter().filter(|sta| sta.bss.is_some()).count();
        let adhoc_members: usize = self.adhoc.iter().map(|a| a.members.len()).sum();
        self.access_points.len() + bss_stations + adhoc_members
    }

    /// hostapd overrides for one access point (global, then per-AP)
    pub fn hostapd_overrides(&self, ap: &AccessPointDef) -> BTreeMap<String, String> {
        self.hostapd
            .iter()
            .chain(ap.hostapd.iter())
            .map(|(k, v)| (k.clone(), hostapd_value(v)))
            .collect()
    }

    /// Names of every node in the topology
    pub fn node_names(&self) -> Vec<&str> {
        self.access_points
            .iter()
            .map(|ap| ap.name.as_str())
            .chain(self.stations.iter().map(|sta| sta.name.as_str()))
            .collect()
    }
}

fn is_namespace_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Render a TOML value the way hostapd expects it
fn hostapd_value(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
        other => other.to_string(),
    }
}

/// Global configuration settings
#[derive(Debug, Clone, Deserialize)]
pub struct GlobalConfig {
    /// Size of the radio pool
    #[serde(default = "default_max_wireless_interface_count")]
    pub max_wireless_interface_count: usize,

    /// Directory for generated hostapd / wpa_supplicant files
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Convergence waits after joins
    #[serde(default)]
    pub settle: SettleConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            max_wireless_interface_count: default_max_wireless_interface_count(),
            work_dir: default_work_dir(),
            settle: SettleConfig::default(),
        }
    }
}

fn default_max_wireless_interface_count() -> usize {
    5
}

fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join("wavemesh")
}

/// How settle waits are performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SettleMode {
    /// Sleep fixed delays
    #[default]
    Fixed,
    /// Poll link state with backoff
    Poll,
    /// No waiting (useful with fake engines)
    None,
}

fn default_join_delay_ms() -> u64 {
    2000
}

fn default_formation_delay_ms() -> u64 {
    20000
}

/// Settle configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SettleConfig {
    #[serde(default)]
    pub mode: SettleMode,

    /// Delay after BSS / IBSS joins in milliseconds
    #[serde(default = "default_join_delay_ms")]
    pub join_delay_ms: u64,

    /// Delay after the first member forms an IBSS in milliseconds
    #[serde(default = "default_formation_delay_ms")]
    pub formation_delay_ms: u64,

    /// Backoff used by poll mode
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for SettleConfig {
    fn default() -> Self {
        Self {
            mode: SettleMode::default(),
            join_delay_ms: default_join_delay_ms(),
            formation_delay_ms: default_formation_delay_ms(),
            retry: RetryConfig::default(),
        }
    }
}

// Retry configuration defaults
fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    2000
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_max_attempts() -> u8 {
    8
}

fn default_jitter_factor() -> f64 {
    0.1
}

/// Retry/backoff configuration for link polling
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Base delay in milliseconds before first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds between retries
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Maximum number of attempts
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u8,

    /// Jitter factor (0.0-1.0) to randomize delays
    #[serde(default = "default_jitter_factor")]
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            max_attempts: default_max_attempts(),
            jitter_factor: default_jitter_factor(),
        }
    }
}

/// Access point definition from config file
#[derive(Debug, Clone, Deserialize)]
pub struct AccessPointDef {
    /// Node (namespace) name
    pub name: String,

    /// SSID of the BSS this AP hosts
    pub ssid: String,

    /// Address with prefix (e.g. "10.0.0.1/24")
    pub address: Option<IpNet>,

    /// Subnet used to address the AP and its stations automatically
    pub subnet: Option<IpNet>,

    /// hostapd overrides for this AP
    #[serde(default)]
    pub hostapd: BTreeMap<String, toml::Value>,
}

/// Station definition from config file
#[derive(Debug, Clone, Deserialize)]
pub struct StationDef {
    /// Node (namespace) name
    pub name: String,

    /// Address with prefix (e.g. "10.0.0.2/24")
    pub address: Option<IpNet>,

    /// SSID of the BSS to join
    pub bss: Option<String>,

    /// Pre-shared key override for the BSS
    pub psk: Option<String>,
}

/// Ad hoc network definition from config file
#[derive(Debug, Clone, Deserialize)]
pub struct AdhocDef {
    pub ssid: String,

    /// Channel frequency in MHz
    #[serde(default = "default_frequency")]
    pub frequency: u32,

    /// Member stations; the first one forms the cell
    #[serde(default)]
    pub members: Vec<String>,

    /// Subnet used to address members without an explicit address
    pub subnet: Option<IpNet>,
}

fn default_frequency() -> u32 {
    2412
}
