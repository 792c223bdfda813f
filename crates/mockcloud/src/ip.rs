//! IP pool manager
//!
//! Addresses are allocated to an account, then optionally assigned to one
//! VM or one load balancer. The tables live in the object cache:
//!
//! ```text
//! <cloud>/<region>/allocatedIps.yaml   every address ever handed out in the region
//! <cloud>/<region>/allocations.yaml    endpoint -> region -> account -> addresses
//! vmAssignments.yaml                   address -> VM id
//! lbAssignments.yaml                   address -> load balancer id
//! ```
//!
//! IPv4 addresses come from a quad counter starting at 26.0.0.1 that skips
//! the first octets used by the VM address pairs and loopback. IPv6
//! addresses are `2001:` plus seven random groups.
//!
//! Every read-modify-write of the tables happens under the store's
//! `addresses` lock.

use crate::cache::ObjectCache;
use crate::config::IpCapabilities;
use crate::store::Store;
use mockcloud_core::{CacheKey, CloudError, IpVersion, ProviderContext, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

const ALLOCATED_IPS: &str = "allocatedIps";
const ALLOCATIONS: &str = "allocations";
const VM_ASSIGNMENTS: &str = "vmAssignments";
const LB_ASSIGNMENTS: &str = "lbAssignments";

/// First octets never issued by the pool
const RESERVED_FIRST_OCTETS: [u8; 7] = [10, 25, 127, 172, 187, 192, 207];

/// endpoint -> region -> account -> addresses
type Allocations = BTreeMap<String, BTreeMap<String, BTreeMap<String, BTreeSet<String>>>>;

/// address -> VM or load balancer id
type Assignments = BTreeMap<String, String>;

/// IP pool partition of the store
#[derive(Debug)]
pub(crate) struct AddressState {
    quads: [u8; 4],
}

impl Default for AddressState {
    fn default() -> Self {
        Self {
            quads: [26, 0, 0, 0],
        }
    }
}

impl AddressState {
    fn next_ipv4(&mut self) -> Result<String> {
        let [mut a, mut b, mut c, mut d] = self.quads;
        d += 1;
        if d > 253 {
            d = 1;
            c += 1;
            if c > 253 {
                c = 0;
                b += 1;
                if b > 253 {
                    b = 0;
                    a += 1;
                    if RESERVED_FIRST_OCTETS.contains(&a) {
                        a += 1;
                    }
                    if a > 253 {
                        return Err(CloudError::exhausted("IPv4 address space exhausted"));
                    }
                }
            }
        }
        self.quads = [a, b, c, d];
        Ok(format!("{}.{}.{}.{}", a, b, c, d))
    }
}

fn next_ipv6() -> String {
    let mut rng = rand::thread_rng();
    let mut address = String::from("2001");
    for _ in 0..7 {
        address.push_str(&format!(":{:x}", rng.gen_range(0..65534u32)));
    }
    address
}

/// An allocated address and what it is assigned to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpAddress {
    pub address: String,
    pub version: IpVersion,
    pub region_id: String,
    pub server_id: Option<String>,
    pub load_balancer_id: Option<String>,
}

impl IpAddress {
    pub fn is_assigned(&self) -> bool {
        self.server_id.is_some() || self.load_balancer_id.is_some()
    }
}

/// IP address operations, scoped by the caller's context
#[derive(Clone)]
pub struct IpPool {
    store: Arc<Store>,
    cache: ObjectCache,
    capabilities: IpCapabilities,
}

impl IpPool {
    pub fn new(store: Arc<Store>, cache: ObjectCache, capabilities: IpCapabilities) -> Self {
        Self {
            store,
            cache,
            capabilities,
        }
    }

    pub fn capabilities(&self) -> &IpCapabilities {
        &self.capabilities
    }

    fn region_key(ctx: &ProviderContext, name: &str) -> CacheKey {
        CacheKey::new(name)
            .with_cloud(ctx.cloud_name.clone())
            .with_region(ctx.region_id.clone())
    }

    fn read<T: Default + serde::de::DeserializeOwned>(&self, key: &CacheKey) -> Result<T> {
        Ok(self.cache.read_object(key)?.unwrap_or_default())
    }

    fn account_set<'a>(
        allocations: &'a mut Allocations,
        ctx: &ProviderContext,
    ) -> &'a mut BTreeSet<String> {
        allocations
            .entry(ctx.endpoint.clone())
            .or_default()
            .entry(ctx.region_id.clone())
            .or_default()
            .entry(ctx.account_number.clone())
            .or_default()
    }

    fn owned_by_caller(&self, ctx: &ProviderContext, ip: &str) -> Result<bool> {
        let allocations: Allocations = self.read(&Self::region_key(ctx, ALLOCATIONS))?;
        Ok(allocations
            .get(&ctx.endpoint)
            .and_then(|regions| regions.get(&ctx.region_id))
            .and_then(|accounts| accounts.get(&ctx.account_number))
            .is_some_and(|ips| ips.contains(ip)))
    }

    /// Allocate a fresh address to the caller's account
    pub fn request(&self, ctx: &ProviderContext, version: IpVersion) -> Result<String> {
        if !self.capabilities.supported_versions.contains(&version) {
            return Err(CloudError::unsupported(format!(
                "IP version {:?} is not supported",
                version
            )));
        }
        self.allocate(ctx, version)
    }

    fn allocate(&self, ctx: &ProviderContext, version: IpVersion) -> Result<String> {
        let mut state = self.store.addresses();

        let allocated_key = Self::region_key(ctx, ALLOCATED_IPS);
        let mut allocated: BTreeSet<String> = self.read(&allocated_key)?;
        let ip = loop {
            let candidate = match version {
                IpVersion::Ipv4 => state.next_ipv4()?,
                IpVersion::Ipv6 => next_ipv6(),
            };
            if !allocated.contains(&candidate) {
                break candidate;
            }
        };
        allocated.insert(ip.clone());

        let allocations_key = Self::region_key(ctx, ALLOCATIONS);
        let mut allocations: Allocations = self.read(&allocations_key)?;
        Self::account_set(&mut allocations, ctx).insert(ip.clone());

        self.cache.write_object(&allocations_key, &allocations)?;
        self.cache.write_object(&allocated_key, &allocated)?;

        info!(ip = %ip, account = %ctx.account_number, region = %ctx.region_id, "Allocated IP address");
        Ok(ip)
    }

    /// Assign one of the caller's addresses to a VM
    ///
    /// A VM holds at most one address; any previous assignment of the VM
    /// is released.
    pub fn assign(&self, ctx: &ProviderContext, ip: &str, vm_id: &str) -> Result<()> {
        // Held across the VM check so a concurrent terminate cannot slip
        // between the check and the write
        let _state = self.store.addresses();
        {
            let compute = self.store.compute();
            match compute.find(ctx, vm_id) {
                Some(vm) if vm.owner != ctx.account_number => {
                    return Err(CloudError::not_found("virtual machine", vm_id));
                }
                Some(vm) if vm.state.is_terminated() => {
                    return Err(CloudError::invalid_state(vm_id, vm.state, "be assigned an address"));
                }
                Some(_) => {}
                None => return Err(CloudError::not_found("virtual machine", vm_id)),
            }
        }

        if !self.owned_by_caller(ctx, ip)? {
            return Err(CloudError::forbidden(format!(
                "IP address {} is not allocated to you",
                ip
            )));
        }

        let vm_key = CacheKey::new(VM_ASSIGNMENTS);
        let mut vm_assignments: Assignments = self.read(&vm_key)?;
        let lb_assignments: Assignments = self.read(&CacheKey::new(LB_ASSIGNMENTS))?;
        if vm_assignments.contains_key(ip) || lb_assignments.contains_key(ip) {
            return Err(CloudError::conflict(format!(
                "IP address {} is already assigned",
                ip
            )));
        }

        vm_assignments.retain(|_, target| target != vm_id);
        vm_assignments.insert(ip.to_string(), vm_id.to_string());
        self.cache.write_object(&vm_key, &vm_assignments)?;

        info!(ip, vm_id, "Assigned IP address to VM");
        Ok(())
    }

    /// Assign one of the caller's addresses to a load balancer
    pub fn assign_to_load_balancer(
        &self,
        ctx: &ProviderContext,
        ip: &str,
        load_balancer_id: &str,
    ) -> Result<()> {
        let _state = self.store.addresses();
        if !self.owned_by_caller(ctx, ip)? {
            return Err(CloudError::forbidden(format!(
                "IP address {} is not allocated to you",
                ip
            )));
        }

        let lb_key = CacheKey::new(LB_ASSIGNMENTS);
        let mut lb_assignments: Assignments = self.read(&lb_key)?;
        let vm_assignments: Assignments = self.read(&CacheKey::new(VM_ASSIGNMENTS))?;
        if vm_assignments.contains_key(ip) || lb_assignments.contains_key(ip) {
            return Err(CloudError::conflict(format!(
                "IP address {} is already assigned",
                ip
            )));
        }

        lb_assignments.retain(|_, target| target != load_balancer_id);
        lb_assignments.insert(ip.to_string(), load_balancer_id.to_string());
        self.cache.write_object(&lb_key, &lb_assignments)?;

        info!(ip, load_balancer_id, "Assigned IP address to load balancer");
        Ok(())
    }

    /// Unassign one of the caller's addresses from its load balancer
    pub fn release_from_load_balancer(&self, ctx: &ProviderContext, ip: &str) -> Result<()> {
        self.unassign(ctx, ip, LB_ASSIGNMENTS)
    }

    /// Unassign one of the caller's addresses from its VM
    pub fn release_from_server(&self, ctx: &ProviderContext, ip: &str) -> Result<()> {
        self.unassign(ctx, ip, VM_ASSIGNMENTS)
    }

    fn unassign(&self, ctx: &ProviderContext, ip: &str, table: &str) -> Result<()> {
        let _state = self.store.addresses();
        let key = CacheKey::new(table);
        let mut assignments: Assignments = self.read(&key)?;
        if !assignments.contains_key(ip) {
            return Err(CloudError::conflict(format!(
                "IP address {} is not currently assigned",
                ip
            )));
        }
        if !self.owned_by_caller(ctx, ip)? {
            return Err(CloudError::forbidden(format!(
                "IP address {} is not allocated to you",
                ip
            )));
        }

        assignments.remove(ip);
        self.cache.write_object(&key, &assignments)?;
        info!(ip, "Released IP address assignment");
        Ok(())
    }

    /// Return an unassigned address to the region
    pub fn release_from_pool(&self, ctx: &ProviderContext, ip: &str) -> Result<()> {
        let _state = self.store.addresses();
        let vm_assignments: Assignments = self.read(&CacheKey::new(VM_ASSIGNMENTS))?;
        let lb_assignments: Assignments = self.read(&CacheKey::new(LB_ASSIGNMENTS))?;
        if vm_assignments.contains_key(ip) || lb_assignments.contains_key(ip) {
            return Err(CloudError::conflict(format!(
                "IP address {} is currently assigned to a resource",
                ip
            )));
        }

        let allocations_key = Self::region_key(ctx, ALLOCATIONS);
        let mut allocations: Allocations = self.read(&allocations_key)?;
        let removed = Self::account_set(&mut allocations, ctx).remove(ip);
        if !removed {
            debug!(ip, account = %ctx.account_number, "Release of address not held by caller ignored");
            return Ok(());
        }
        self.cache.write_object(&allocations_key, &allocations)?;

        let allocated_key = Self::region_key(ctx, ALLOCATED_IPS);
        let mut allocated: BTreeSet<String> = self.read(&allocated_key)?;
        allocated.remove(ip);
        self.cache.write_object(&allocated_key, &allocated)?;

        info!(ip, "Released IP address to pool");
        Ok(())
    }

    /// Drop whatever address a VM holds; used when the VM terminates
    pub fn release_vm_assignment(&self, vm_id: &str) -> Result<Option<String>> {
        let _state = self.store.addresses();
        let key = CacheKey::new(VM_ASSIGNMENTS);
        let mut assignments: Assignments = self.read(&key)?;
        let held: Option<String> = assignments
            .iter()
            .find(|(_, target)| *target == vm_id)
            .map(|(ip, _)| ip.clone());

        if let Some(ip) = &held {
            assignments.remove(ip);
            self.cache.write_object(&key, &assignments)?;
            debug!(ip = %ip, vm_id, "Released address of terminated VM");
        }
        Ok(held)
    }

    pub fn get_ip_for_vm(&self, vm_id: &str) -> Result<Option<String>> {
        let _state = self.store.addresses();
        let assignments: Assignments = self.read(&CacheKey::new(VM_ASSIGNMENTS))?;
        Ok(assignments
            .into_iter()
            .find(|(_, target)| target == vm_id)
            .map(|(ip, _)| ip))
    }

    pub fn get_ip_for_load_balancer(&self, load_balancer_id: &str) -> Result<Option<String>> {
        let _state = self.store.addresses();
        let assignments: Assignments = self.read(&CacheKey::new(LB_ASSIGNMENTS))?;
        Ok(assignments
            .into_iter()
            .find(|(_, target)| target == load_balancer_id)
            .map(|(ip, _)| ip))
    }

    /// One of the caller's addresses
    pub fn get_ip_address(&self, ctx: &ProviderContext, ip: &str) -> Result<Option<IpAddress>> {
        Ok(self
            .list_pool(ctx, IpVersion::of(ip), false)?
            .into_iter()
            .find(|addr| addr.address == ip))
    }

    /// The caller's addresses of one version
    pub fn list_pool(
        &self,
        ctx: &ProviderContext,
        version: IpVersion,
        unassigned_only: bool,
    ) -> Result<Vec<IpAddress>> {
        let _state = self.store.addresses();
        let allocations: Allocations = self.read(&Self::region_key(ctx, ALLOCATIONS))?;
        let vm_assignments: Assignments = self.read(&CacheKey::new(VM_ASSIGNMENTS))?;
        let lb_assignments: Assignments = self.read(&CacheKey::new(LB_ASSIGNMENTS))?;

        let owned = allocations
            .get(&ctx.endpoint)
            .and_then(|regions| regions.get(&ctx.region_id))
            .and_then(|accounts| accounts.get(&ctx.account_number));

        Ok(owned
            .into_iter()
            .flatten()
            .filter(|ip| IpVersion::of(ip) == version)
            .map(|ip| IpAddress {
                address: ip.clone(),
                version,
                region_id: ctx.region_id.clone(),
                server_id: vm_assignments.get(ip).cloned(),
                load_balancer_id: lb_assignments.get(ip).cloned(),
            })
            .filter(|addr| !(unassigned_only && addr.is_assigned()))
            .collect())
    }

    /// `(address, available)` for each of the caller's addresses
    pub fn list_pool_status(
        &self,
        ctx: &ProviderContext,
        version: IpVersion,
    ) -> Result<Vec<(String, bool)>> {
        Ok(self
            .list_pool(ctx, version, false)?
            .into_iter()
            .map(|addr| {
                let available = !addr.is_assigned();
                (addr.address, available)
            })
            .collect())
    }

    pub fn request_for_vlan(&self, _ctx: &ProviderContext, _version: IpVersion) -> Result<String> {
        Err(CloudError::unsupported("VLAN IP addresses are not supported"))
    }

    pub fn forward(
        &self,
        _ctx: &ProviderContext,
        _ip: &str,
        _public_port: u16,
        _private_port: u16,
        _vm_id: &str,
    ) -> Result<String> {
        Err(CloudError::unsupported("IP forwarding is not supported"))
    }

    pub fn stop_forward(&self, _ctx: &ProviderContext, _rule_id: &str) -> Result<()> {
        Err(CloudError::unsupported("IP forwarding is not supported"))
    }

    pub fn assign_to_network_interface(
        &self,
        _ctx: &ProviderContext,
        _ip: &str,
        _nic_id: &str,
    ) -> Result<()> {
        Err(CloudError::unsupported("Network interfaces are not supported"))
    }
}

impl std::fmt::Debug for IpPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpPool")
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}
