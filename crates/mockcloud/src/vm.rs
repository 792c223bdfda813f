//! Virtual machine registry and state machine
//!
//! ## Lifecycle
//!
//! ```text
//!            launch                      start
//!              │                   ┌──────────────── STOPPED
//!              ▼                   ▼                    ▲
//!   ┌──────► PENDING ──(monitor)──► RUNNING ──stop──► STOPPING
//!   │          ▲  ▲                 │ │ │
//!   │          │  └──resume── SUSPENDED ◄─(monitor)─ SUSPENDING ◄─suspend─┘ │ │
//!   │          └─────unpause── PAUSED ◄──(monitor)── PAUSING ◄──pause───────┘ │
//!   └──(monitor)── REBOOTING ◄───────────────reboot──────────────────────────┘
//!
//!   any non-terminal state ──terminate──► TERMINATED
//!   RUNNING ──(monitor, rare crash)──► TERMINATED
//! ```
//!
//! Caller operations only succeed from the listed source state and are
//! otherwise side-effect free. The monitor ([`VmRegistry::tick`]) moves
//! transitional states forward through a per-VM [`MonitorCounter`] gate and
//! occasionally crashes a running VM.
//!
//! ## Retention
//!
//! Terminated records stay visible for the configured grace window (10
//! minutes by default) after their last touch. [`VmRegistry::list`] is the
//! only place expired records are dropped.

use crate::config::{MockCloudConfig, MonitorConfig, VmCapabilities};
use crate::firewall::FirewallRegistry;
use crate::ip::IpPool;
use crate::allocator::AddressAllocator;
use crate::sim::{Clock, RandomSource};
use crate::store::Store;
use chrono::{DateTime, Utc};
use mockcloud_core::{
    Architecture, CloudError, DataCenter, DataCenterServices, MachineImageState,
    MachineImageSupport, Platform, ProviderContext, Requirement, Result, VirtualMachineProduct,
    VlanSupport, VmState,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where a VM's traffic goes: a direct address pair or a VLAN
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkPlacement {
    Direct { private_ip: String, public_ip: String },
    Vlan { vlan_id: String, subnet_id: Option<String> },
}

/// Bootstrap credentials recorded at launch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub root_user: Option<String>,
    pub root_password: Option<String>,
    pub shell_key: Option<String>,
}

/// Internal record; callers only ever see [`VirtualMachine`]
#[derive(Debug, Clone)]
pub(crate) struct VmRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub state: VmState,
    pub created_at: DateTime<Utc>,
    pub last_touched_at: DateTime<Utc>,
    pub last_boot_at: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,
    pub image_id: String,
    pub platform: Platform,
    pub architecture: Architecture,
    pub product_id: String,
    pub owner: String,
    pub region_id: String,
    pub data_center_id: String,
    pub network: NetworkPlacement,
    pub credentials: Credentials,
}

/// Caller-visible view of a VM
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachine {
    pub id: String,
    pub name: String,
    pub description: String,
    pub state: VmState,
    pub owner: String,
    pub region_id: String,
    pub data_center_id: String,
    pub image_id: String,
    pub platform: Platform,
    pub architecture: Architecture,
    pub product_id: String,
    pub private_ip: Option<String>,
    /// Assigned pool address if any, otherwise the launch-time public address
    pub public_ip: Option<String>,
    /// Address assigned from the IP pool
    pub assigned_ip: Option<String>,
    pub vlan_id: Option<String>,
    pub subnet_id: Option<String>,
    pub root_user: Option<String>,
    pub root_password: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_boot_at: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,
}

/// Launch request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LaunchOptions {
    pub image_id: String,
    pub product_id: String,
    pub name: String,
    pub description: String,
    /// Defaults to the region's first active, available data center
    pub data_center_id: Option<String>,
    /// VLAN or subnet id, interpreted per the VLAN support's subnet policy
    pub vlan_id: Option<String>,
    pub firewall_ids: Vec<String>,
    pub bootstrap_user: Option<String>,
    pub bootstrap_password: Option<String>,
    pub shell_key: Option<String>,
}

impl LaunchOptions {
    pub fn new(image_id: impl Into<String>, product_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            image_id: image_id.into(),
            product_id: product_id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn in_data_center(mut self, data_center_id: impl Into<String>) -> Self {
        self.data_center_id = Some(data_center_id.into());
        self
    }

    pub fn in_vlan(mut self, vlan_id: impl Into<String>) -> Self {
        self.vlan_id = Some(vlan_id.into());
        self
    }

    pub fn with_firewalls(mut self, firewall_ids: Vec<String>) -> Self {
        self.firewall_ids = firewall_ids;
        self
    }

    pub fn with_password(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.bootstrap_user = Some(user.into());
        self.bootstrap_password = Some(password.into());
        self
    }

    pub fn with_shell_key(mut self, key: impl Into<String>) -> Self {
        self.shell_key = Some(key.into());
        self
    }
}

/// Per-VM probabilistic gate for monitor-driven advances
///
/// Counts ticks spent in the current state up to `min_ticks`. Once there,
/// each tick the VM advances if a draw lands under the advance
/// probability. Reset by every caller-initiated transition and by every
/// advance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorCounter {
    ticks: u32,
}

impl MonitorCounter {
    pub fn ticks(&self) -> u32 {
        self.ticks
    }

    pub fn reset(&mut self) {
        self.ticks = 0;
    }

    /// Count a tick; true once the VM may advance
    pub fn record_tick(&mut self, min_ticks: u32) -> bool {
        self.ticks = self.ticks.saturating_add(1).min(min_ticks.max(1));
        self.ticks >= min_ticks
    }
}

/// Placement key of the VM table
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct Placement {
    endpoint: String,
    region_id: String,
    data_center_id: String,
}

/// Compute partition of the store
pub(crate) struct ComputeState {
    allocator: AddressAllocator,
    placements: BTreeMap<Placement, Vec<VmRecord>>,
    counters: HashMap<String, MonitorCounter>,
    random: Box<dyn RandomSource>,
}

impl ComputeState {
    pub(crate) fn new(allocator: AddressAllocator, random: Box<dyn RandomSource>) -> Self {
        Self {
            allocator,
            placements: BTreeMap::new(),
            counters: HashMap::new(),
            random,
        }
    }

    fn in_region<'a>(
        &'a self,
        ctx: &'a ProviderContext,
    ) -> impl Iterator<Item = &'a VmRecord> + 'a {
        self.placements
            .iter()
            .filter(move |(p, _)| p.endpoint == ctx.endpoint && p.region_id == ctx.region_id)
            .flat_map(|(_, vms)| vms.iter())
    }

    /// Record in the caller's endpoint and region, whoever owns it
    pub(crate) fn find<'a>(&'a self, ctx: &'a ProviderContext, vm_id: &str) -> Option<&'a VmRecord> {
        self.in_region(ctx).find(|vm| vm.id == vm_id)
    }

    fn find_mut(&mut self, ctx: &ProviderContext, vm_id: &str) -> Option<&mut VmRecord> {
        self.placements
            .iter_mut()
            .filter(|(p, _)| p.endpoint == ctx.endpoint && p.region_id == ctx.region_id)
            .flat_map(|(_, vms)| vms.iter_mut())
            .find(|vm| vm.id == vm_id)
    }

    /// State of a VM anywhere in the store
    pub(crate) fn state_of(&self, vm_id: &str) -> Option<VmState> {
        self.placements
            .values()
            .flat_map(|vms| vms.iter())
            .find(|vm| vm.id == vm_id)
            .map(|vm| vm.state)
    }

    fn live_count(&self, ctx: &ProviderContext) -> usize {
        self.in_region(ctx)
            .filter(|vm| vm.owner == ctx.account_number && !vm.state.is_terminated())
            .count()
    }

    /// Apply a caller-initiated transition
    fn transition(
        &mut self,
        ctx: &ProviderContext,
        vm_id: &str,
        operation: &'static str,
        allowed_from: impl Fn(VmState) -> bool,
        to: VmState,
        now: DateTime<Utc>,
    ) -> Result<VmState> {
        let vm = self
            .find_mut(ctx, vm_id)
            .ok_or_else(|| CloudError::not_found("virtual machine", vm_id))?;
        if vm.owner != ctx.account_number {
            return Err(CloudError::forbidden(format!(
                "Virtual machine {} belongs to another account",
                vm_id
            )));
        }
        let from = vm.state;
        if !allowed_from(from) {
            if from.is_terminated() && to.is_terminated() {
                return Err(CloudError::conflict(format!(
                    "Virtual machine {} is already terminated",
                    vm_id
                )));
            }
            return Err(CloudError::invalid_state(vm_id, from, operation));
        }

        vm.state = to;
        vm.last_touched_at = now;
        if to.is_terminated() {
            vm.terminated_at = Some(now);
            self.counters.remove(vm_id);
        } else {
            self.counters.entry(vm_id.to_string()).or_default().reset();
        }
        Ok(from)
    }
}

/// Result of one monitor pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    /// VMs moved one step along their natural advance
    pub advanced: Vec<String>,
    /// RUNNING VMs that crashed to TERMINATED
    pub crashed: Vec<String>,
}

/// External services the registry resolves launches against
#[derive(Clone)]
pub struct Collaborators {
    pub data_centers: Arc<dyn DataCenterServices>,
    pub images: Arc<dyn MachineImageSupport>,
    pub vlans: Option<Arc<dyn VlanSupport>>,
}

/// Stock product catalog (64-bit only)
pub fn products() -> Vec<VirtualMachineProduct> {
    let product = |id: &str, name: &str, cpus: u32, ram: u32, disk: u32, rate: f64| VirtualMachineProduct {
        id: id.to_string(),
        name: name.to_string(),
        description: format!("{} GB RAM/{} CPU/{} GB Disk", ram, cpus, disk),
        cpu_count: cpus,
        ram_gb: ram,
        root_volume_gb: disk,
        hourly_rate: rate,
    };
    vec![
        product("small", "Small", 1, 1, 20, 0.10),
        product("medium", "Medium", 2, 4, 40, 0.15),
        product("large", "Large", 4, 8, 80, 0.25),
    ]
}

/// VM operations, scoped by the caller's context
#[derive(Clone)]
pub struct VmRegistry {
    store: Arc<Store>,
    firewalls: FirewallRegistry,
    ips: IpPool,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    monitor: MonitorConfig,
    capabilities: VmCapabilities,
    terminated_grace: chrono::Duration,
    max_vm_count: usize,
}

impl VmRegistry {
    pub fn new(
        store: Arc<Store>,
        firewalls: FirewallRegistry,
        ips: IpPool,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
        config: &MockCloudConfig,
    ) -> Self {
        Self {
            store,
            firewalls,
            ips,
            collaborators,
            clock,
            monitor: config.monitor.clone(),
            capabilities: config.capabilities.vm.clone(),
            terminated_grace: to_chrono(config.terminated_grace),
            max_vm_count: config.max_vm_count,
        }
    }

    pub fn monitor_config(&self) -> &MonitorConfig {
        &self.monitor
    }

    pub fn max_vm_count(&self) -> usize {
        self.max_vm_count
    }

    pub fn supported_architectures(&self) -> Vec<Architecture> {
        vec![Architecture::I64]
    }

    pub fn list_products(&self, architecture: Architecture) -> Vec<VirtualMachineProduct> {
        if architecture == Architecture::I64 {
            products()
        } else {
            Vec::new()
        }
    }

    pub fn get_product(&self, product_id: &str) -> Option<VirtualMachineProduct> {
        products().into_iter().find(|p| p.id == product_id)
    }

    pub fn password_requirement(&self, platform: Platform) -> Requirement {
        self.capabilities.password.for_platform(platform)
    }

    pub fn shell_key_requirement(&self, platform: Platform) -> Requirement {
        self.capabilities.shell_key.for_platform(platform)
    }

    fn resolve_data_center(&self, ctx: &ProviderContext, requested: Option<&str>) -> Result<DataCenter> {
        let zones = self.collaborators.data_centers.list_data_centers(&ctx.region_id)?;
        match requested {
            Some(id) => zones
                .into_iter()
                .find(|dc| dc.id == id)
                .ok_or_else(|| CloudError::not_found("data center", id)),
            None => zones.into_iter().find(DataCenter::is_usable).ok_or_else(|| {
                CloudError::not_found("available data center in region", ctx.region_id.clone())
            }),
        }
    }

    fn resolve_credentials(&self, platform: Platform, options: &LaunchOptions) -> Result<Credentials> {
        if self.password_requirement(platform) == Requirement::Required
            && (options.bootstrap_user.is_none() || options.bootstrap_password.is_none())
        {
            return Err(CloudError::precondition(
                "No user or password was provided for bootstrapping your VM",
            ));
        }
        if self.shell_key_requirement(platform) == Requirement::Required && options.shell_key.is_none() {
            return Err(CloudError::precondition(
                "No shell key was provided for bootstrapping your VM",
            ));
        }

        Ok(Credentials {
            root_user: options.bootstrap_user.clone(),
            root_password: options.bootstrap_password.clone(),
            shell_key: options.shell_key.clone(),
        })
    }

    /// `(vlan, subnet)` for a requested network id
    fn resolve_vlan(&self, ctx: &ProviderContext, network_id: &str) -> Result<(String, Option<String>)> {
        let vlans = self
            .collaborators
            .vlans
            .as_ref()
            .ok_or_else(|| CloudError::unsupported("This cloud does not support VLANs"))?;

        match vlans.subnet_support() {
            Requirement::None => match vlans.get_vlan(ctx, network_id)? {
                Some(vlan) => Ok((vlan.id, None)),
                None => Err(CloudError::not_found("VLAN", network_id)),
            },
            Requirement::Required => match vlans.get_subnet(ctx, network_id)? {
                Some(subnet) => Ok((subnet.vlan_id, Some(subnet.id))),
                None => Err(CloudError::not_found("subnet", network_id)),
            },
            Requirement::Optional => {
                if let Some(subnet) = vlans.get_subnet(ctx, network_id)? {
                    return Ok((subnet.vlan_id, Some(subnet.id)));
                }
                match vlans.get_vlan(ctx, network_id)? {
                    Some(vlan) => Ok((vlan.id, None)),
                    None => Err(CloudError::not_found("VLAN or subnet", network_id)),
                }
            }
        }
    }

    /// Launch a VM in the caller's region; it starts PENDING
    pub fn launch(&self, ctx: &ProviderContext, options: &LaunchOptions) -> Result<VirtualMachine> {
        let data_center = self.resolve_data_center(ctx, options.data_center_id.as_deref())?;

        let image = self
            .collaborators
            .images
            .get_image(ctx, &options.image_id)?
            .ok_or_else(|| CloudError::not_found("machine image", options.image_id.clone()))?;
        if image.state != MachineImageState::Active {
            return Err(CloudError::precondition(format!(
                "Machine image {} is not active",
                image.id
            )));
        }

        let credentials = self.resolve_credentials(image.platform, options)?;

        let product = self
            .get_product(&options.product_id)
            .ok_or_else(|| CloudError::not_found("product", options.product_id.clone()))?;

        let vlan = options
            .vlan_id
            .as_deref()
            .map(|id| self.resolve_vlan(ctx, id))
            .transpose()?;

        self.firewalls.validate_ids(ctx, &options.firewall_ids)?;

        let record = {
            let mut compute = self.store.compute();

            let live = compute.live_count(ctx);
            if live >= self.max_vm_count {
                return Err(CloudError::exhausted(format!(
                    "Account {} already has {} virtual machines in {}",
                    ctx.account_number, live, ctx.region_id
                )));
            }

            let network = match vlan {
                Some((vlan_id, subnet_id)) => NetworkPlacement::Vlan { vlan_id, subnet_id },
                None => {
                    let (private_ip, public_ip) = compute.allocator.next_ip_pair()?;
                    NetworkPlacement::Direct {
                        private_ip,
                        public_ip,
                    }
                }
            };
            let id = compute.allocator.next_vm_id(&ctx.region_id);

            if !options.firewall_ids.is_empty() {
                self.firewalls.attach_to_vm(ctx, &id, &options.firewall_ids)?;
            }

            let now = self.clock.now();
            let record = VmRecord {
                id: id.clone(),
                name: options.name.clone(),
                description: options.description.clone(),
                state: VmState::Pending,
                created_at: now,
                last_touched_at: now,
                last_boot_at: None,
                terminated_at: None,
                image_id: image.id.clone(),
                platform: image.platform,
                architecture: image.architecture,
                product_id: product.id.clone(),
                owner: ctx.account_number.clone(),
                region_id: ctx.region_id.clone(),
                data_center_id: data_center.id.clone(),
                network,
                credentials,
            };

            let placement = Placement {
                endpoint: ctx.endpoint.clone(),
                region_id: ctx.region_id.clone(),
                data_center_id: data_center.id.clone(),
            };
            compute
                .placements
                .entry(placement)
                .or_default()
                .push(record.clone());
            compute.counters.insert(id, MonitorCounter::default());
            record
        };

        info!(
            vm_id = %record.id,
            image_id = %record.image_id,
            product_id = %record.product_id,
            data_center = %record.data_center_id,
            owner = %record.owner,
            "Launched virtual machine"
        );
        self.to_view(record)
    }

    fn apply(
        &self,
        ctx: &ProviderContext,
        vm_id: &str,
        operation: &'static str,
        from: VmState,
        to: VmState,
    ) -> Result<()> {
        let now = self.clock.now();
        self.store
            .compute()
            .transition(ctx, vm_id, operation, |s| s == from, to, now)?;
        info!(vm_id, from = %from, to = %to, "Virtual machine {}", operation);
        Ok(())
    }

    /// STOPPED -> PENDING
    pub fn start(&self, ctx: &ProviderContext, vm_id: &str) -> Result<()> {
        self.apply(ctx, vm_id, "start", VmState::Stopped, VmState::Pending)
    }

    /// RUNNING -> STOPPING
    pub fn stop(&self, ctx: &ProviderContext, vm_id: &str) -> Result<()> {
        self.apply(ctx, vm_id, "stop", VmState::Running, VmState::Stopping)
    }

    /// RUNNING -> REBOOTING
    pub fn reboot(&self, ctx: &ProviderContext, vm_id: &str) -> Result<()> {
        self.apply(ctx, vm_id, "reboot", VmState::Running, VmState::Rebooting)
    }

    /// RUNNING -> PAUSING
    pub fn pause(&self, ctx: &ProviderContext, vm_id: &str) -> Result<()> {
        self.apply(ctx, vm_id, "pause", VmState::Running, VmState::Pausing)
    }

    /// PAUSED -> PENDING
    pub fn unpause(&self, ctx: &ProviderContext, vm_id: &str) -> Result<()> {
        self.apply(ctx, vm_id, "unpause", VmState::Paused, VmState::Pending)
    }

    /// RUNNING -> SUSPENDING
    pub fn suspend(&self, ctx: &ProviderContext, vm_id: &str) -> Result<()> {
        self.apply(ctx, vm_id, "suspend", VmState::Running, VmState::Suspending)
    }

    /// SUSPENDED -> PENDING
    pub fn resume(&self, ctx: &ProviderContext, vm_id: &str) -> Result<()> {
        self.apply(ctx, vm_id, "resume", VmState::Suspended, VmState::Pending)
    }

    /// Any non-terminal state -> TERMINATED
    ///
    /// Detaches firewalls and releases any IP pool assignment.
    pub fn terminate(&self, ctx: &ProviderContext, vm_id: &str) -> Result<()> {
        let now = self.clock.now();
        let from = {
            let mut compute = self.store.compute();
            let from = compute.transition(
                ctx,
                vm_id,
                "terminate",
                |s| !s.is_terminated(),
                VmState::Terminated,
                now,
            )?;
            self.firewalls.on_vm_terminated(vm_id);
            from
        };

        if let Err(e) = self.ips.release_vm_assignment(vm_id) {
            warn!(vm_id, error = %e, "Failed to release address of terminated VM");
        }
        info!(vm_id, from = %from, "Virtual machine terminated");
        Ok(())
    }

    fn expired(&self, vm: &VmRecord, now: DateTime<Utc>) -> bool {
        vm.state.is_terminated() && now - vm.last_touched_at > self.terminated_grace
    }

    /// One of the caller's VMs, if visible
    pub fn get(&self, ctx: &ProviderContext, vm_id: &str) -> Result<Option<VirtualMachine>> {
        let now = self.clock.now();
        let record = {
            let compute = self.store.compute();
            compute
                .find(ctx, vm_id)
                .filter(|vm| vm.owner == ctx.account_number && !self.expired(vm, now))
                .cloned()
        };
        record.map(|r| self.to_view(r)).transpose()
    }

    /// The caller's VMs in its region
    ///
    /// Drops terminated records whose grace window has passed.
    pub fn list(&self, ctx: &ProviderContext) -> Result<Vec<VirtualMachine>> {
        let now = self.clock.now();
        let records: Vec<VmRecord> = {
            let mut compute = self.store.compute();
            let mut visible = Vec::new();
            let mut dropped = 0usize;
            for (placement, vms) in compute.placements.iter_mut() {
                if placement.endpoint != ctx.endpoint || placement.region_id != ctx.region_id {
                    continue;
                }
                let before = vms.len();
                vms.retain(|vm| !self.expired(vm, now));
                dropped += before - vms.len();
                visible.extend(
                    vms.iter()
                        .filter(|vm| vm.owner == ctx.account_number)
                        .cloned(),
                );
            }
            if dropped > 0 {
                debug!(dropped, region = %ctx.region_id, "Collected expired virtual machines");
            }
            visible
        };

        records.into_iter().map(|r| self.to_view(r)).collect()
    }

    /// Firewalls a VM was launched with; empty once terminated
    pub fn list_firewalls(&self, ctx: &ProviderContext, vm_id: &str) -> Result<Vec<String>> {
        let vm = self
            .get(ctx, vm_id)?
            .ok_or_else(|| CloudError::not_found("virtual machine", vm_id))?;
        if vm.state.is_terminated() {
            return Ok(Vec::new());
        }
        Ok(self.firewalls.list_for_vm(vm_id))
    }

    /// Current monitor counter of a VM
    pub fn monitor_counter(&self, vm_id: &str) -> Option<MonitorCounter> {
        self.store.compute().counters.get(vm_id).copied()
    }

    /// One monitor pass over every VM in the store
    pub fn tick(&self) -> TickReport {
        let now = self.clock.now();
        let mut report = TickReport::default();

        {
            let mut guard = self.store.compute();
            let ComputeState {
                placements,
                counters,
                random,
                ..
            } = &mut *guard;

            for vm in placements.values_mut().flat_map(|vms| vms.iter_mut()) {
                if vm.state == VmState::Running {
                    if random.draw() < self.monitor.crash_probability {
                        vm.state = VmState::Terminated;
                        vm.last_touched_at = now;
                        vm.terminated_at = Some(now);
                        counters.remove(&vm.id);
                        warn!(vm_id = %vm.id, "Virtual machine crashed");
                        report.crashed.push(vm.id.clone());
                    }
                    continue;
                }

                let Some(next) = vm.state.natural_advance() else {
                    continue;
                };
                let counter = counters.entry(vm.id.clone()).or_default();
                if counter.record_tick(self.monitor.min_ticks)
                    && random.draw() < self.monitor.advance_probability
                {
                    debug!(vm_id = %vm.id, from = %vm.state, to = %next, "Monitor advanced virtual machine");
                    vm.state = next;
                    if next == VmState::Running {
                        vm.last_boot_at = Some(now);
                    }
                    counter.reset();
                    report.advanced.push(vm.id.clone());
                }
            }

            for vm_id in &report.crashed {
                self.firewalls.on_vm_terminated(vm_id);
            }
        }

        for vm_id in &report.crashed {
            if let Err(e) = self.ips.release_vm_assignment(vm_id) {
                warn!(vm_id = %vm_id, error = %e, "Failed to release address of crashed VM");
            }
        }
        report
    }

    fn to_view(&self, record: VmRecord) -> Result<VirtualMachine> {
        let assigned_ip = self.ips.get_ip_for_vm(&record.id)?;
        let (private_ip, direct_public, vlan_id, subnet_id) = match record.network {
            NetworkPlacement::Direct {
                private_ip,
                public_ip,
            } => (Some(private_ip), Some(public_ip), None, None),
            NetworkPlacement::Vlan { vlan_id, subnet_id } => (None, None, Some(vlan_id), subnet_id),
        };

        Ok(VirtualMachine {
            public_ip: assigned_ip.clone().or(direct_public),
            assigned_ip,
            private_ip,
            vlan_id,
            subnet_id,
            id: record.id,
            name: record.name,
            description: record.description,
            state: record.state,
            owner: record.owner,
            region_id: record.region_id,
            data_center_id: record.data_center_id,
            image_id: record.image_id,
            platform: record.platform,
            architecture: record.architecture,
            product_id: record.product_id,
            root_user: record.credentials.root_user,
            root_password: record.credentials.root_password,
            created_at: record.created_at,
            last_boot_at: record.last_boot_at,
            terminated_at: record.terminated_at,
        })
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

impl std::fmt::Debug for VmRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmRegistry")
            .field("monitor", &self.monitor)
            .field("max_vm_count", &self.max_vm_count)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::MockCloud;
    use crate::config::{Capabilities, MonitorConfig};
    use crate::firewall::RuleRequest;
    use crate::sim::{FixedRandom, ManualClock};
    use mockcloud_core::{ErrorKind, IpVersion, PortRange, Protocol, RuleTarget};
    use std::collections::HashSet;

    fn ctx() -> ProviderContext {
        ProviderContext::new("https://mock", "usmn", "acct-1")
    }

    fn cloud_with(monitor: MonitorConfig, random: FixedRandom, clock: ManualClock) -> MockCloud {
        MockCloud::builder()
            .with_config(MockCloudConfig::default().with_monitor(monitor))
            .with_random(random)
            .with_clock(clock)
            .build()
            .unwrap()
    }

    fn cloud() -> MockCloud {
        cloud_with(
            MonitorConfig::deterministic(),
            FixedRandom::always(0.0),
            ManualClock::starting_now(),
        )
    }

    fn coin_flip() -> MonitorConfig {
        MonitorConfig {
            advance_probability: 0.5,
            ..MonitorConfig::deterministic()
        }
    }

    fn ubuntu_small() -> LaunchOptions {
        LaunchOptions::new("usmn-1", "small", "web-1")
    }

    #[test]
    fn test_launch_starts_pending_with_address_pair() {
        let cloud = cloud();
        let vms = cloud.vms();
        let vm = vms.launch(&ctx(), &ubuntu_small()).unwrap();

        assert_eq!(vm.id, "usmn-1");
        assert_eq!(vm.state, VmState::Pending);
        assert_eq!(vm.owner, "acct-1");
        assert_eq!(vm.data_center_id, "usmn-1");
        assert_eq!(vm.private_ip.as_deref(), Some("10.0.0.1"));
        assert_eq!(vm.public_ip.as_deref(), Some("25.0.0.1"));
        assert!(vm.vlan_id.is_none());

        let fetched = vms.get(&ctx(), &vm.id).unwrap().unwrap();
        assert_eq!(fetched.state, VmState::Pending);
        assert!(vms.get(&ctx().as_account("acct-2"), &vm.id).unwrap().is_none());
        assert!(vms.get(&ctx().in_region("usme"), &vm.id).unwrap().is_none());
    }

    #[test]
    fn test_launch_validation() {
        let cloud = cloud();
        let vms = cloud.vms();

        let err = vms
            .launch(&ctx(), &LaunchOptions::new("usmn-9", "small", "x"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = vms
            .launch(&ctx(), &LaunchOptions::new("usmn-1", "huge", "x"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = vms
            .launch(&ctx(), &ubuntu_small().in_data_center("usme-1"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = vms
            .launch(&ctx().in_region("nzakl"), &LaunchOptions::new("nzakl-1", "small", "x"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = vms
            .launch(&ctx(), &ubuntu_small().with_firewalls(vec!["nope".into()]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_windows_requires_password() {
        let cloud = cloud();
        let vms = cloud.vms();
        let windows = LaunchOptions::new("usmn-2", "medium", "win");

        let err = vms.launch(&ctx(), &windows).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

        let vm = vms
            .launch(&ctx(), &windows.with_password("Administrator", "s3cret"))
            .unwrap();
        assert_eq!(vm.root_user.as_deref(), Some("Administrator"));
        assert_eq!(vm.platform, Platform::Windows);

        assert_eq!(vms.password_requirement(Platform::Windows), Requirement::Required);
        assert_eq!(vms.shell_key_requirement(Platform::Ubuntu), Requirement::Optional);
    }

    #[test]
    fn test_stop_only_from_running() {
        let cloud = cloud();
        let vms = cloud.vms();
        let vm = vms.launch(&ctx(), &ubuntu_small()).unwrap();

        let err = vms.stop(&ctx(), &vm.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert_eq!(vms.get(&ctx(), &vm.id).unwrap().unwrap().state, VmState::Pending);

        vms.tick();
        vms.stop(&ctx(), &vm.id).unwrap();
        assert_eq!(vms.get(&ctx(), &vm.id).unwrap().unwrap().state, VmState::Stopping);
    }

    #[test]
    fn test_state_table() {
        let cloud = cloud();
        let vms = cloud.vms();
        let vm = vms.launch(&ctx(), &ubuntu_small()).unwrap();
        let state = || vms.get(&ctx(), &vm.id).unwrap().unwrap().state;

        vms.tick();
        assert_eq!(state(), VmState::Running);

        vms.pause(&ctx(), &vm.id).unwrap();
        assert_eq!(state(), VmState::Pausing);
        assert_eq!(vms.resume(&ctx(), &vm.id).unwrap_err().kind(), ErrorKind::InvalidState);
        vms.tick();
        assert_eq!(state(), VmState::Paused);
        vms.unpause(&ctx(), &vm.id).unwrap();
        assert_eq!(state(), VmState::Pending);
        vms.tick();

        vms.suspend(&ctx(), &vm.id).unwrap();
        vms.tick();
        assert_eq!(state(), VmState::Suspended);
        assert_eq!(vms.start(&ctx(), &vm.id).unwrap_err().kind(), ErrorKind::InvalidState);
        vms.resume(&ctx(), &vm.id).unwrap();
        assert_eq!(state(), VmState::Pending);
        vms.tick();

        vms.reboot(&ctx(), &vm.id).unwrap();
        assert_eq!(state(), VmState::Rebooting);
        vms.tick();
        assert_eq!(state(), VmState::Pending);
        vms.tick();
        assert_eq!(state(), VmState::Running);
    }

    #[test]
    fn test_stopping_never_skips_to_running() {
        let cloud = cloud_with(
            coin_flip(),
            FixedRandom::sequence(vec![0.9, 0.9, 0.05]),
            ManualClock::starting_now(),
        );
        let vms = cloud.vms();
        let vm = vms.launch(&ctx(), &ubuntu_small()).unwrap();

        let mut seen = Vec::new();
        for _ in 0..50 {
            vms.tick();
            seen.push(vms.get(&ctx(), &vm.id).unwrap().unwrap().state);
            if seen.last() == Some(&VmState::Running) {
                break;
            }
        }
        vms.stop(&ctx(), &vm.id).unwrap();

        let mut previous = VmState::Stopping;
        for _ in 0..50 {
            vms.tick();
            let now = vms.get(&ctx(), &vm.id).unwrap().unwrap().state;
            assert!(
                now == previous || (previous == VmState::Stopping && now == VmState::Stopped),
                "unexpected {} -> {}",
                previous,
                now
            );
            previous = now;
        }
        assert_eq!(previous, VmState::Stopped);
    }

    #[test]
    fn test_gate_closed_keeps_state() {
        let cloud = cloud_with(coin_flip(), FixedRandom::always(0.99), ManualClock::starting_now());
        let vms = cloud.vms();
        let vm = vms.launch(&ctx(), &ubuntu_small()).unwrap();

        for _ in 0..10 {
            assert!(vms.tick().advanced.is_empty());
        }
        assert_eq!(vms.get(&ctx(), &vm.id).unwrap().unwrap().state, VmState::Pending);
        assert_eq!(vms.monitor_counter(&vm.id).unwrap().ticks(), 1);
    }

    #[test]
    fn test_counter_reset_on_caller_transition() {
        let cloud = MockCloud::builder()
            .with_config(MockCloudConfig::default().with_monitor(MonitorConfig {
                min_ticks: 3,
                ..MonitorConfig::deterministic()
            }))
            .with_random(FixedRandom::always(0.0))
            .build()
            .unwrap();
        let vms = cloud.vms();
        let vm = vms.launch(&ctx(), &ubuntu_small()).unwrap();

        vms.tick();
        vms.tick();
        assert_eq!(vms.get(&ctx(), &vm.id).unwrap().unwrap().state, VmState::Pending);
        vms.tick();
        assert_eq!(vms.get(&ctx(), &vm.id).unwrap().unwrap().state, VmState::Running);
        assert_eq!(vms.monitor_counter(&vm.id).unwrap().ticks(), 0);

        vms.stop(&ctx(), &vm.id).unwrap();
        vms.tick();
        vms.tick();
        assert_eq!(vms.get(&ctx(), &vm.id).unwrap().unwrap().state, VmState::Stopping);
        vms.tick();
        assert_eq!(vms.get(&ctx(), &vm.id).unwrap().unwrap().state, VmState::Stopped);
    }

    #[test]
    fn test_terminate_twice_conflicts_and_grace_window() {
        let clock = ManualClock::starting_now();
        let cloud = cloud_with(MonitorConfig::deterministic(), FixedRandom::always(0.0), clock.clone());
        let vms = cloud.vms();
        let vm = vms.launch(&ctx(), &ubuntu_small()).unwrap();

        vms.terminate(&ctx(), &vm.id).unwrap();
        let err = vms.terminate(&ctx(), &vm.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(vms.monitor_counter(&vm.id).is_none());

        clock.advance(Duration::from_secs(9 * 60));
        let listed = vms.list(&ctx()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].state, VmState::Terminated);
        assert!(listed[0].terminated_at.is_some());

        clock.advance(Duration::from_secs(2 * 60));
        assert!(vms.list(&ctx()).unwrap().is_empty());
        assert_eq!(
            vms.terminate(&ctx(), &vm.id).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[test]
    fn test_other_account_cannot_mutate() {
        let cloud = cloud();
        let vms = cloud.vms();
        let vm = vms.launch(&ctx(), &ubuntu_small()).unwrap();
        let intruder = ctx().as_account("acct-2");

        assert_eq!(vms.terminate(&intruder, &vm.id).unwrap_err().kind(), ErrorKind::Forbidden);
        assert!(vms.list(&intruder).unwrap().is_empty());
        assert_eq!(vms.stop(&ctx(), "usmn-404").unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_crash_detaches_firewalls_and_releases_ip() {
        let cloud = MockCloud::builder()
            .with_config(MockCloudConfig::default().with_monitor(MonitorConfig {
                crash_probability: 1.0,
                ..MonitorConfig::deterministic()
            }))
            .with_random(FixedRandom::always(0.0))
            .build()
            .unwrap();
        let vms = cloud.vms();
        let fw = cloud.firewalls().create(&ctx(), "web", "", None).unwrap();
        let vm = vms
            .launch(&ctx(), &ubuntu_small().with_firewalls(vec![fw.clone()]))
            .unwrap();
        let ip = cloud.ips().request(&ctx(), IpVersion::Ipv4).unwrap();
        cloud.ips().assign(&ctx(), &ip, &vm.id).unwrap();

        let first = vms.tick();
        assert_eq!(first.advanced, vec![vm.id.clone()]);
        let second = vms.tick();
        assert_eq!(second.crashed, vec![vm.id.clone()]);

        assert_eq!(vms.get(&ctx(), &vm.id).unwrap().unwrap().state, VmState::Terminated);
        assert!(vms.list_firewalls(&ctx(), &vm.id).unwrap().is_empty());
        assert!(cloud.firewalls().list_for_vm(&vm.id).is_empty());
        assert!(cloud.ips().get_ip_for_vm(&vm.id).unwrap().is_none());
        cloud.firewalls().delete(&ctx(), &fw).unwrap();
    }

    #[test]
    fn test_firewall_in_use_until_terminated() {
        let cloud = cloud();
        let vms = cloud.vms();
        let fws = cloud.firewalls();
        let fw = fws.create(&ctx(), "web", "", None).unwrap();
        fws.authorize(
            &ctx(),
            &fw,
            RuleRequest::ingress(RuleTarget::cidr("0.0.0.0/0"), Protocol::Tcp, PortRange::single(80)),
        )
        .unwrap();
        let vm = vms
            .launch(&ctx(), &ubuntu_small().with_firewalls(vec![fw.clone()]))
            .unwrap();
        assert_eq!(vms.list_firewalls(&ctx(), &vm.id).unwrap(), vec![fw.clone()]);

        assert_eq!(fws.delete(&ctx(), &fw).unwrap_err().kind(), ErrorKind::Conflict);
        vms.terminate(&ctx(), &vm.id).unwrap();
        fws.delete(&ctx(), &fw).unwrap();
    }

    #[test]
    fn test_assigned_ip_replaces_public_and_is_released_on_terminate() {
        let cloud = cloud();
        let vms = cloud.vms();
        let ips = cloud.ips();
        let vm = vms.launch(&ctx(), &ubuntu_small()).unwrap();
        let ip = ips.request(&ctx(), IpVersion::Ipv4).unwrap();

        ips.assign(&ctx(), &ip, &vm.id).unwrap();
        let view = vms.get(&ctx(), &vm.id).unwrap().unwrap();
        assert_eq!(view.assigned_ip.as_deref(), Some(ip.as_str()));
        assert_eq!(view.public_ip.as_deref(), Some(ip.as_str()));
        assert_eq!(view.private_ip.as_deref(), Some("10.0.0.1"));

        let second = ips.request(&ctx(), IpVersion::Ipv4).unwrap();
        ips.assign(&ctx(), &second, &vm.id).unwrap();
        assert_eq!(ips.get_ip_for_vm(&vm.id).unwrap(), Some(second.clone()));
        assert_eq!(
            ips.assign(&ctx(), &second, &vm.id).unwrap_err().kind(),
            ErrorKind::Conflict
        );

        vms.terminate(&ctx(), &vm.id).unwrap();
        assert!(ips.get_ip_for_vm(&vm.id).unwrap().is_none());
        assert_eq!(
            ips.release_from_server(&ctx(), &second).unwrap_err().kind(),
            ErrorKind::Conflict
        );
        ips.release_from_pool(&ctx(), &second).unwrap();
    }

    #[test]
    fn test_assign_checks_ownership() {
        let cloud = cloud();
        let vm = cloud.vms().launch(&ctx(), &ubuntu_small()).unwrap();
        let other = ctx().as_account("acct-2");
        let foreign = cloud.ips().request(&other, IpVersion::Ipv4).unwrap();

        let err = cloud.ips().assign(&ctx(), &foreign, &vm.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        let err = cloud.ips().assign(&other, &foreign, &vm.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_release_from_server_restores_direct_address() {
        let cloud = cloud();
        let vms = cloud.vms();
        let ips = cloud.ips();
        let vm = vms.launch(&ctx(), &ubuntu_small()).unwrap();
        let ip = ips.request(&ctx(), IpVersion::Ipv4).unwrap();
        ips.assign(&ctx(), &ip, &vm.id).unwrap();

        ips.release_from_server(&ctx(), &ip).unwrap();
        assert!(ips.get_ip_for_vm(&vm.id).unwrap().is_none());
        let view = vms.get(&ctx(), &vm.id).unwrap().unwrap();
        assert!(view.assigned_ip.is_none());
        assert_eq!(view.public_ip.as_deref(), Some("25.0.0.1"));

        ips.assign(&ctx(), &ip, &vm.id).unwrap();
        ips.release_from_server(&ctx(), &ip).unwrap();
        ips.release_from_pool(&ctx(), &ip).unwrap();
    }

    #[test]
    fn test_assign_to_terminated_vm_rejected() {
        let cloud = cloud();
        let vms = cloud.vms();
        let ips = cloud.ips();
        let vm = vms.launch(&ctx(), &ubuntu_small()).unwrap();
        vms.terminate(&ctx(), &vm.id).unwrap();
        let ip = ips.request(&ctx(), IpVersion::Ipv4).unwrap();

        let err = ips.assign(&ctx(), &ip, &vm.id).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        assert!(ips.get_ip_for_vm(&vm.id).unwrap().is_none());
        ips.release_from_pool(&ctx(), &ip).unwrap();
    }

    #[test]
    fn test_quota() {
        let cloud = MockCloud::builder()
            .with_config(MockCloudConfig::default().with_max_vm_count(2))
            .build()
            .unwrap();
        let vms = cloud.vms();
        let first = vms.launch(&ctx(), &ubuntu_small()).unwrap();
        vms.launch(&ctx(), &ubuntu_small()).unwrap();

        let err = vms.launch(&ctx(), &ubuntu_small()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        vms.launch(&ctx().as_account("acct-2"), &ubuntu_small()).unwrap();

        vms.terminate(&ctx(), &first.id).unwrap();
        vms.launch(&ctx(), &ubuntu_small()).unwrap();
    }

    #[test]
    fn test_vlan_placement_policies() {
        let cloud = cloud();
        let vlans = cloud.vlans().unwrap();
        vlans.add_vlan(&ctx(), "vlan-1", "prod", "10.1.0.0/16");
        vlans.add_subnet(&ctx(), "sub-1", "vlan-1", "a", "10.1.1.0/24").unwrap();
        let vms = cloud.vms();

        let in_vlan = vms.launch(&ctx(), &ubuntu_small().in_vlan("vlan-1")).unwrap();
        assert_eq!(in_vlan.vlan_id.as_deref(), Some("vlan-1"));
        assert!(in_vlan.subnet_id.is_none());
        assert!(in_vlan.private_ip.is_none());
        assert!(in_vlan.public_ip.is_none());

        let in_subnet = vms.launch(&ctx(), &ubuntu_small().in_vlan("sub-1")).unwrap();
        assert_eq!(in_subnet.vlan_id.as_deref(), Some("vlan-1"));
        assert_eq!(in_subnet.subnet_id.as_deref(), Some("sub-1"));

        let err = vms.launch(&ctx(), &ubuntu_small().in_vlan("vlan-9")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let direct = vms.launch(&ctx(), &ubuntu_small()).unwrap();
        assert_eq!(direct.private_ip.as_deref(), Some("10.0.0.1"));
    }

    fn cloud_with_capabilities(capabilities: Capabilities) -> MockCloud {
        MockCloud::builder()
            .with_config(
                MockCloudConfig::default()
                    .with_monitor(MonitorConfig::deterministic())
                    .with_capabilities(capabilities),
            )
            .with_random(FixedRandom::always(0.0))
            .build()
            .unwrap()
    }

    fn with_subnet_support(subnet_support: Requirement) -> MockCloud {
        let mut capabilities = Capabilities::default();
        capabilities.vlan.subnet_support = subnet_support;
        let cloud = cloud_with_capabilities(capabilities);
        let vlans = cloud.vlans().unwrap();
        vlans.add_vlan(&ctx(), "vlan-1", "prod", "10.1.0.0/16");
        vlans.add_subnet(&ctx(), "sub-1", "vlan-1", "a", "10.1.1.0/24").unwrap();
        cloud
    }

    #[test]
    fn test_vlan_only_placement() {
        let cloud = with_subnet_support(Requirement::None);
        let vms = cloud.vms();

        let vm = vms.launch(&ctx(), &ubuntu_small().in_vlan("vlan-1")).unwrap();
        assert_eq!(vm.vlan_id.as_deref(), Some("vlan-1"));
        assert!(vm.subnet_id.is_none());

        let err = vms.launch(&ctx(), &ubuntu_small().in_vlan("sub-1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_subnet_required_placement() {
        let cloud = with_subnet_support(Requirement::Required);
        let vms = cloud.vms();

        let vm = vms.launch(&ctx(), &ubuntu_small().in_vlan("sub-1")).unwrap();
        assert_eq!(vm.vlan_id.as_deref(), Some("vlan-1"));
        assert_eq!(vm.subnet_id.as_deref(), Some("sub-1"));

        let err = vms.launch(&ctx(), &ubuntu_small().in_vlan("vlan-1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_vlan_launch_without_vlan_support() {
        let cloud = MockCloud::builder().without_vlans().build().unwrap();
        assert!(cloud.vlans().is_none());
        let vms = cloud.vms();

        let err = vms.launch(&ctx(), &ubuntu_small().in_vlan("vlan-1")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);
        vms.launch(&ctx(), &ubuntu_small()).unwrap();
    }

    #[test]
    fn test_required_shell_key() {
        let mut capabilities = Capabilities::default();
        capabilities.vm.shell_key.unix = Requirement::Required;
        let cloud = cloud_with_capabilities(capabilities);
        let vms = cloud.vms();
        assert_eq!(vms.shell_key_requirement(Platform::Ubuntu), Requirement::Required);

        let err = vms.launch(&ctx(), &ubuntu_small()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);

        vms.launch(&ctx(), &ubuntu_small().with_shell_key("ssh-ed25519 AAAA")).unwrap();
    }

    #[test]
    fn test_counter_saturates_at_large_minimum() {
        let mut counter = MonitorCounter { ticks: u32::MAX };
        assert!(counter.record_tick(u32::MAX));
        assert_eq!(counter.ticks(), u32::MAX);

        counter.reset();
        assert!(!counter.record_tick(u32::MAX));
        assert_eq!(counter.ticks(), 1);
    }

    #[test]
    fn test_products() {
        let cloud = cloud();
        let vms = cloud.vms();
        let products = vms.list_products(Architecture::I64);
        assert_eq!(products.len(), 3);
        assert_eq!(products[0].description, "1 GB RAM/1 CPU/20 GB Disk");
        assert!(vms.list_products(Architecture::I32).is_empty());

        let large = vms.get_product("large").unwrap();
        assert_eq!(large.cpu_count, 4);
        assert_eq!(large.hourly_rate, 0.25);
        assert_eq!(vms.supported_architectures(), vec![Architecture::I64]);
        assert_eq!(vms.max_vm_count(), 100);
    }

    #[test]
    fn test_concurrent_launch_ids_unique() {
        let cloud = cloud();
        let handles: Vec<_> = (0..8)
            .map(|n| {
                let vms = cloud.vms();
                std::thread::spawn(move || {
                    let ctx = ctx().as_account(format!("acct-{}", n));
                    (0..20)
                        .map(|_| vms.launch(&ctx, &ubuntu_small()).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let launched: Vec<VirtualMachine> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        let ids: HashSet<&str> = launched.iter().map(|vm| vm.id.as_str()).collect();
        let ips: HashSet<&str> = launched
            .iter()
            .filter_map(|vm| vm.private_ip.as_deref())
            .collect();
        assert_eq!(ids.len(), 160);
        assert_eq!(ips.len(), 160);
    }
}
