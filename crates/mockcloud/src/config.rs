//! Simulator configuration
//!
//! A single YAML document configures a [`crate::MockCloud`]. Every field is
//! optional; omitted fields take the defaults below, which reproduce the
//! behaviour of the stock mock provider.
//!
//! ```yaml
//! cache_dir: target/cache
//! terminated_grace: 10m
//! max_vm_count: 100
//! monitor:
//!   interval: 15s
//!   advance_probability: 0.1
//!   crash_probability: 0.0001736
//! capabilities:
//!   vm:
//!     password: { windows: required, unix: optional }
//!   firewall:
//!     create_in_vlan: false
//! ```
//!
//! Durations are human-readable strings ("15s", "10m", "1h 30m").

use mockcloud_core::{CloudError, Direction, IpVersion, Permission, Platform, Protocol, Requirement, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Default object cache root
pub const DEFAULT_CACHE_DIR: &str = "target/cache";

/// Default monitor cadence (seconds)
pub const DEFAULT_MONITOR_INTERVAL_SECS: u64 = 15;

/// Default retention of terminated VMs (seconds)
pub const DEFAULT_TERMINATED_GRACE_SECS: u64 = 600;

/// Default per-account VM quota in a region
pub const DEFAULT_MAX_VM_COUNT: usize = 100;

/// Chance a RUNNING VM crashes on a given tick (1 in 5760)
pub const DEFAULT_CRASH_PROBABILITY: f64 = 1.0 / 5760.0;

/// Chance an eligible transitional VM advances on a given tick
pub const DEFAULT_ADVANCE_PROBABILITY: f64 = 0.1;

/// Top-level simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MockCloudConfig {
    /// Root directory of the file-backed object cache
    pub cache_dir: PathBuf,

    /// Background monitor policy
    pub monitor: MonitorConfig,

    /// How long a terminated VM stays visible to `list`
    #[serde(with = "duration_str")]
    pub terminated_grace: Duration,

    /// Sleep between image-capture phases
    #[serde(with = "duration_str")]
    pub capture_phase_delay: Duration,

    /// Non-terminated VMs one account may own in one region
    pub max_vm_count: usize,

    pub capabilities: Capabilities,
}

impl Default for MockCloudConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            monitor: MonitorConfig::default(),
            terminated_grace: Duration::from_secs(DEFAULT_TERMINATED_GRACE_SECS),
            capture_phase_delay: Duration::from_secs(1),
            max_vm_count: DEFAULT_MAX_VM_COUNT,
            capabilities: Capabilities::default(),
        }
    }
}

impl MockCloudConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading mock cloud config");
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    pub fn with_monitor(mut self, monitor: MonitorConfig) -> Self {
        self.monitor = monitor;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn with_capture_phase_delay(mut self, delay: Duration) -> Self {
        self.capture_phase_delay = delay;
        self
    }

    pub fn with_max_vm_count(mut self, count: usize) -> Self {
        self.max_vm_count = count;
        self
    }

    /// Reject values the simulator cannot run with
    pub fn validate(&self) -> Result<()> {
        self.monitor.validate()?;

        if self.max_vm_count == 0 {
            return Err(CloudError::config("max_vm_count must be at least 1"));
        }

        self.capabilities.validate()
    }
}

/// Background monitor policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MonitorConfig {
    /// Tick cadence of the background task
    #[serde(with = "duration_str")]
    pub interval: Duration,

    /// Per-tick chance an eligible transitional VM advances
    pub advance_probability: f64,

    /// Per-tick chance a RUNNING VM crashes
    pub crash_probability: f64,

    /// Ticks a VM must sit in a transitional state before it may advance
    pub min_ticks: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_MONITOR_INTERVAL_SECS),
            advance_probability: DEFAULT_ADVANCE_PROBABILITY,
            crash_probability: DEFAULT_CRASH_PROBABILITY,
            min_ticks: 1,
        }
    }
}

impl MonitorConfig {
    /// Every eligible VM advances on every tick and nothing crashes
    pub fn deterministic() -> Self {
        Self {
            advance_probability: 1.0,
            crash_probability: 0.0,
            ..Self::default()
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(CloudError::config("monitor.interval must be non-zero"));
        }
        for (name, p) in [
            ("advance_probability", self.advance_probability),
            ("crash_probability", self.crash_probability),
        ] {
            if !(0.0..=1.0).contains(&p) {
                return Err(CloudError::config(format!(
                    "monitor.{} must be within [0, 1], got {}",
                    name, p
                )));
            }
        }
        Ok(())
    }
}

/// What the simulated provider claims to support
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Capabilities {
    pub vm: VmCapabilities,
    pub firewall: FirewallCapabilities,
    pub ip: IpCapabilities,
    pub vlan: VlanCapabilities,
}

impl Capabilities {
    pub fn validate(&self) -> Result<()> {
        if self.firewall.supported_permissions.is_empty() {
            return Err(CloudError::config(
                "capabilities.firewall.supported_permissions must not be empty",
            ));
        }
        if self.firewall.supported_directions.is_empty() {
            return Err(CloudError::config(
                "capabilities.firewall.supported_directions must not be empty",
            ));
        }
        if self.firewall.supported_protocols.is_empty() {
            return Err(CloudError::config(
                "capabilities.firewall.supported_protocols must not be empty",
            ));
        }
        if self.ip.supported_versions.is_empty() {
            return Err(CloudError::config(
                "capabilities.ip.supported_versions must not be empty",
            ));
        }
        Ok(())
    }
}

/// A requirement that differs between Windows and everything else
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlatformRequirement {
    pub windows: Requirement,
    pub unix: Requirement,
}

impl PlatformRequirement {
    pub fn for_platform(&self, platform: Platform) -> Requirement {
        if platform.is_windows() {
            self.windows
        } else {
            self.unix
        }
    }
}

/// Launch credential policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmCapabilities {
    /// Root password policy
    pub password: PlatformRequirement,

    /// Shell key policy
    pub shell_key: PlatformRequirement,
}

impl Default for VmCapabilities {
    fn default() -> Self {
        Self {
            password: PlatformRequirement {
                windows: Requirement::Required,
                unix: Requirement::Optional,
            },
            shell_key: PlatformRequirement {
                windows: Requirement::None,
                unix: Requirement::Optional,
            },
        }
    }
}

/// Firewall creation and rule policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FirewallCapabilities {
    /// Firewalls outside any VLAN
    pub create_global: bool,

    /// Firewalls bound to a VLAN
    pub create_in_vlan: bool,

    pub supported_permissions: Vec<Permission>,
    pub supported_directions: Vec<Direction>,
    pub supported_protocols: Vec<Protocol>,
    pub deletion_supported: bool,
}

impl Default for FirewallCapabilities {
    fn default() -> Self {
        Self {
            create_global: true,
            create_in_vlan: false,
            supported_permissions: vec![Permission::Allow],
            supported_directions: vec![Direction::Ingress, Direction::Egress],
            supported_protocols: vec![Protocol::Tcp, Protocol::Udp, Protocol::Icmp],
            deletion_supported: true,
        }
    }
}

/// IP pool policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IpCapabilities {
    pub supported_versions: Vec<IpVersion>,

    /// Addresses requested inside a VLAN
    pub vlan_addresses: bool,
}

impl Default for IpCapabilities {
    fn default() -> Self {
        Self {
            supported_versions: vec![IpVersion::Ipv4, IpVersion::Ipv6],
            vlan_addresses: false,
        }
    }
}

/// VLAN placement policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VlanCapabilities {
    /// Whether launches name a subnet, a VLAN, or either
    pub subnet_support: Requirement,
}

impl Default for VlanCapabilities {
    fn default() -> Self {
        Self {
            subnet_support: Requirement::Optional,
        }
    }
}

/// `Duration` as a humantime string
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*d).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        let s = String::deserialize(d)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
