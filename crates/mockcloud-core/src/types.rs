//! Core types shared across Mockcloud components

use serde::{Deserialize, Serialize};

/// Default cloud name reported by the simulated provider
pub const DEFAULT_CLOUD_NAME: &str = "Mock Cloud";

/// Partition key for every registry lookup
///
/// All simulated state is scoped by (endpoint, region, account). The cloud
/// name is informational and is only used to build object-cache paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderContext {
    pub cloud_name: String,
    pub endpoint: String,
    pub region_id: String,
    pub account_number: String,
}

impl ProviderContext {
    pub fn new(
        endpoint: impl Into<String>,
        region_id: impl Into<String>,
        account_number: impl Into<String>,
    ) -> Self {
        Self {
            cloud_name: DEFAULT_CLOUD_NAME.to_string(),
            endpoint: endpoint.into(),
            region_id: region_id.into(),
            account_number: account_number.into(),
        }
    }

    pub fn with_cloud_name(mut self, name: impl Into<String>) -> Self {
        self.cloud_name = name.into();
        self
    }

    /// Same endpoint and account, different region
    pub fn in_region(&self, region_id: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            ..self.clone()
        }
    }

    /// Same endpoint and region, different account
    pub fn as_account(&self, account_number: impl Into<String>) -> Self {
        Self {
            account_number: account_number.into(),
            ..self.clone()
        }
    }
}

/// Virtual machine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VmState {
    Pending,
    Running,
    Pausing,
    Paused,
    Suspending,
    Suspended,
    Stopping,
    Stopped,
    Rebooting,
    Terminated,
}

impl VmState {
    pub fn is_terminated(&self) -> bool {
        matches!(self, VmState::Terminated)
    }

    /// States the monitor moves forward on its own
    pub fn is_transitional(&self) -> bool {
        self.natural_advance().is_some()
    }

    /// Where the monitor takes a VM sitting in this state, if anywhere
    pub fn natural_advance(&self) -> Option<VmState> {
        match self {
            VmState::Pending => Some(VmState::Running),
            VmState::Pausing => Some(VmState::Paused),
            VmState::Suspending => Some(VmState::Suspended),
            VmState::Stopping => Some(VmState::Stopped),
            VmState::Rebooting => Some(VmState::Pending),
            _ => None,
        }
    }
}

impl std::fmt::Display for VmState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VmState::Pending => "PENDING",
            VmState::Running => "RUNNING",
            VmState::Pausing => "PAUSING",
            VmState::Paused => "PAUSED",
            VmState::Suspending => "SUSPENDING",
            VmState::Suspended => "SUSPENDED",
            VmState::Stopping => "STOPPING",
            VmState::Stopped => "STOPPED",
            VmState::Rebooting => "REBOOTING",
            VmState::Terminated => "TERMINATED",
        };
        write!(f, "{}", s)
    }
}

/// Operating system platform of an image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Platform {
    Ubuntu,
    Debian,
    CentOs,
    RedHat,
    UnixGeneric,
    FreeBsd,
    Solaris,
    Windows,
    Unknown,
}

impl Platform {
    pub fn is_windows(&self) -> bool {
        matches!(self, Platform::Windows)
    }

    pub fn is_linux(&self) -> bool {
        matches!(
            self,
            Platform::Ubuntu | Platform::Debian | Platform::CentOs | Platform::RedHat
        )
    }

    pub fn is_bsd(&self) -> bool {
        matches!(self, Platform::FreeBsd)
    }

    pub fn is_unix(&self) -> bool {
        self.is_linux() || self.is_bsd() || matches!(self, Platform::Solaris | Platform::UnixGeneric)
    }

    /// Platform-family match used by image search
    ///
    /// `Unknown` accepts anything, a generic unix filter accepts any unix
    /// image, and a concrete platform filter accepts only that platform.
    pub fn matches_filter(&self, filter: Platform) -> bool {
        match filter {
            Platform::Unknown => true,
            Platform::UnixGeneric => self.is_unix(),
            other => *self == other,
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Platform::Ubuntu => "Ubuntu",
            Platform::Debian => "Debian",
            Platform::CentOs => "CentOS",
            Platform::RedHat => "Red Hat",
            Platform::UnixGeneric => "Unix",
            Platform::FreeBsd => "FreeBSD",
            Platform::Solaris => "Solaris",
            Platform::Windows => "Windows",
            Platform::Unknown => "Unknown",
        };
        write!(f, "{}", s)
    }
}

/// How strongly a provider demands a given input
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Requirement {
    None,
    Optional,
    Required,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    I32,
    I64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpVersion {
    Ipv4,
    Ipv6,
}

impl IpVersion {
    /// Version of an address string, told apart by shape alone
    pub fn of(address: &str) -> Self {
        if address.split('.').count() == 4 {
            IpVersion::Ipv4
        } else {
            IpVersion::Ipv6
        }
    }
}

/// Firewall rule direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
}

/// Firewall rule permission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Allow,
    Deny,
}

/// Firewall rule protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
    Icmp,
    Any,
}

macro_rules! upper_display {
    ($ty:ty { $($variant:ident => $s:literal),* $(,)? }) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(Self::$variant => write!(f, $s),)*
                }
            }
        }
    };
}

upper_display!(Direction { Ingress => "INGRESS", Egress => "EGRESS" });
upper_display!(Permission { Allow => "ALLOW", Deny => "DENY" });
upper_display!(Protocol { Tcp => "TCP", Udp => "UDP", Icmp => "ICMP", Any => "ANY" });

/// Source or destination of a firewall rule
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleTarget {
    /// CIDR block such as 0.0.0.0/0
    Cidr(String),
    /// Another firewall's members
    Firewall(String),
    /// A single virtual machine
    VirtualMachine(String),
    /// Every member of the firewall the rule belongs to
    Global,
}

impl RuleTarget {
    pub fn cidr(cidr: impl Into<String>) -> Self {
        RuleTarget::Cidr(cidr.into())
    }
}

impl std::fmt::Display for RuleTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleTarget::Cidr(c) => write!(f, "{}", c),
            RuleTarget::Firewall(id) => write!(f, "fw:{}", id),
            RuleTarget::VirtualMachine(id) => write!(f, "vm:{}", id),
            RuleTarget::Global => write!(f, "global"),
        }
    }
}

/// Inclusive port range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn single(port: u16) -> Self {
        Self::new(port, port)
    }

    pub fn all() -> Self {
        Self::new(0, u16::MAX)
    }
}

impl std::fmt::Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// Geographic region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub id: String,
    pub name: String,
    pub jurisdiction: String,
    pub active: bool,
    pub available: bool,
}

/// Data center within a region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataCenter {
    pub id: String,
    pub name: String,
    pub region_id: String,
    pub active: bool,
    pub available: bool,
}

impl DataCenter {
    /// Eligible as a default launch placement
    pub fn is_usable(&self) -> bool {
        self.active && self.available
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineImageState {
    Pending,
    Active,
    Deleted,
}

/// Machine image, public library or captured
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineImage {
    pub id: String,
    pub name: String,
    pub description: String,
    pub region_id: String,
    /// `None` for public library images
    pub owner: Option<String>,
    pub platform: Platform,
    pub architecture: Architecture,
    pub state: MachineImageState,
    pub created_at: chrono::DateTime<chrono::Utc>,
    /// VM the image was captured from
    pub source_vm_id: Option<String>,
}

/// Virtual network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vlan {
    pub id: String,
    pub name: String,
    pub cidr: String,
    pub region_id: String,
}

/// Subnet inside a VLAN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subnet {
    pub id: String,
    pub vlan_id: String,
    pub name: String,
    pub cidr: String,
}

/// Launchable VM size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachineProduct {
    pub id: String,
    pub name: String,
    pub description: String,
    pub cpu_count: u32,
    pub ram_gb: u32,
    pub root_volume_gb: u32,
    /// USD per hour
    pub hourly_rate: f64,
}

/// Cache entry location: `<cloud>/<region>/<datacenter>/<name>.yaml`
///
/// Absent segments are skipped. Only the last `/`-separated component of
/// the cloud string is used, so endpoints that look like URLs still map
/// to a single directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub cloud: Option<String>,
    pub region: Option<String>,
    pub datacenter: Option<String>,
    pub name: String,
}

impl CacheKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            cloud: None,
            region: None,
            datacenter: None,
            name: name.into(),
        }
    }

    pub fn with_cloud(mut self, cloud: impl Into<String>) -> Self {
        self.cloud = Some(cloud.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_datacenter(mut self, datacenter: impl Into<String>) -> Self {
        self.datacenter = Some(datacenter.into());
        self
    }

    /// Relative path of the entry
    pub fn relative_path(&self) -> String {
        let file = format!("{}.yaml", self.name);
        let mut parts: Vec<&str> = Vec::with_capacity(4);
        if let Some(cloud) = &self.cloud {
            let trimmed = cloud.trim_end_matches('/');
            parts.push(trimmed.rsplit('/').next().unwrap_or(trimmed));
        }
        if let Some(region) = &self.region {
            parts.push(region);
        }
        if let Some(dc) = &self.datacenter {
            parts.push(dc);
        }
        parts.push(&file);
        parts.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vm_state_natural_advance() {
        assert_eq!(VmState::Pending.natural_advance(), Some(VmState::Running));
        assert_eq!(VmState::Stopping.natural_advance(), Some(VmState::Stopped));
        assert_eq!(VmState::Rebooting.natural_advance(), Some(VmState::Pending));
        assert_eq!(VmState::Running.natural_advance(), None);
        assert_eq!(VmState::Terminated.natural_advance(), None);
        assert!(VmState::Suspending.is_transitional());
        assert!(!VmState::Stopped.is_transitional());
    }

    #[test]
    fn test_platform_matching() {
        assert!(Platform::Ubuntu.matches_filter(Platform::UnixGeneric));
        assert!(Platform::FreeBsd.matches_filter(Platform::UnixGeneric));
        assert!(!Platform::Windows.matches_filter(Platform::UnixGeneric));
        assert!(Platform::Windows.matches_filter(Platform::Windows));
        assert!(!Platform::Debian.matches_filter(Platform::Ubuntu));
        assert!(Platform::Solaris.matches_filter(Platform::Unknown));
    }

    #[test]
    fn test_ip_version_by_shape() {
        assert_eq!(IpVersion::of("26.0.0.1"), IpVersion::Ipv4);
        assert_eq!(IpVersion::of("2001:db8:0:0:0:0:0:1"), IpVersion::Ipv6);
    }

    #[test]
    fn test_cache_key_path() {
        let key = CacheKey::new("allocatedIps")
            .with_cloud("https://mock.example.com/api")
            .with_region("usmn");
        assert_eq!(key.relative_path(), "api/usmn/allocatedIps.yaml");

        let key = CacheKey::new("vmAssignments");
        assert_eq!(key.relative_path(), "vmAssignments.yaml");

        let key = CacheKey::new("x").with_cloud("Mock").with_datacenter("usmn-1");
        assert_eq!(key.relative_path(), "Mock/usmn-1/x.yaml");
    }

    #[test]
    fn test_context_rescoping() {
        let ctx = ProviderContext::new("https://mock", "usmn", "acct-1");
        let other = ctx.in_region("usme").as_account("acct-2");
        assert_eq!(other.endpoint, "https://mock");
        assert_eq!(other.region_id, "usme");
        assert_eq!(other.account_number, "acct-2");
        assert_eq!(ctx.cloud_name, DEFAULT_CLOUD_NAME);
    }
}
