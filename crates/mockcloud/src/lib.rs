//! # Mock Cloud
//!
//! In-memory cloud provider for exercising cloud client code without a
//! real backend.
//!
//! ## Architecture
//!
//! ```text
//! ComputeServices ──┐                  ┌── NetworkServices
//!   (ctx-bound)     │                  │     (ctx-bound)
//!                   ▼                  ▼
//!              VmRegistry ───► FirewallRegistry
//!               │   │  ▲               │
//!               │   │  └── tick ◄── MonitorHandle (tokio task)
//!               │   └────────► IpPool ──► ObjectCache (YAML)
//!               ▼
//!            Store: compute | firewalls | addresses | images
//! ```
//!
//! Every operation is scoped by a [`ProviderContext`] (endpoint, region,
//! account). VMs move through a state machine: callers request
//! transitions, and the monitor settles transitional states after a
//! probabilistic delay. The clock and the random source are injectable,
//! so tests drive the monitor with [`MockCloud::tick`] instead of sleeping.
//!
//! ## Example
//!
//! ```no_run
//! use mockcloud::{LaunchOptions, MockCloud, ProviderContext};
//!
//! # fn main() -> mockcloud::Result<()> {
//! let cloud = MockCloud::builder().build()?;
//! let compute = cloud.compute(ProviderContext::new("https://mock", "usmn", "acct-1"));
//! let vm = compute.launch(&LaunchOptions::new("usmn-1", "small", "web-1"))?;
//! cloud.tick();
//! compute.stop(&vm.id)?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

pub mod allocator;
pub mod cache;
pub mod cloud;
pub mod compute;
pub mod config;
pub mod datacenter;
pub mod firewall;
pub mod image;
pub mod ip;
pub mod monitor;
pub mod network;
pub mod sim;
pub mod store;
pub mod vlan;
pub mod vm;

// Shared vocabulary
pub use mockcloud_core::{
    Architecture, CacheBackend, CacheKey, CloudError, DataCenter, DataCenterServices, Direction,
    ErrorKind, IpVersion, MachineImage, MachineImageState, MachineImageSupport, Permission,
    Platform, PortRange, Protocol, ProviderContext, Region, Requirement, Result, RuleTarget,
    Subnet, VirtualMachineProduct, Vlan, VlanSupport, VmState,
};

// Simulator
pub use cloud::{MockCloud, MockCloudBuilder};
pub use config::{Capabilities, MockCloudConfig, MonitorConfig};
pub use monitor::MonitorHandle;
pub use sim::{Clock, FixedRandom, ManualClock, RandomSource, SystemClock, ThreadRandom};

// Compute
pub use compute::ComputeServices;
pub use image::{CapturePhase, CaptureTask, MockImageSupport};
pub use vm::{LaunchOptions, MonitorCounter, TickReport, VirtualMachine, VmRegistry};

// Network
pub use firewall::{Firewall, FirewallRegistry, FirewallRule, RuleRequest};
pub use ip::{IpAddress, IpPool};
pub use network::NetworkServices;
pub use vlan::MockVlanSupport;

// Catalogs and cache
pub use cache::{FileCache, MemoryCache, ObjectCache};
pub use datacenter::MockDataCenterServices;
