//! In-memory VLAN and subnet table
//!
//! The stock provider has no VLAN service of its own; this table lets tests
//! (and the `simulate` command) register networks for launch placement.

use crate::store::Scope;
use mockcloud_core::{CloudError, ProviderContext, Requirement, Result, Subnet, Vlan, VlanSupport};
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::info;

#[derive(Debug, Default)]
struct VlanTable {
    vlans: HashMap<Scope, HashMap<String, Vlan>>,
    subnets: HashMap<Scope, HashMap<String, Subnet>>,
}

/// VLAN support backed by a mutable table
#[derive(Debug)]
pub struct MockVlanSupport {
    subnet_support: Requirement,
    table: Mutex<VlanTable>,
}

impl MockVlanSupport {
    pub fn new(subnet_support: Requirement) -> Self {
        Self {
            subnet_support,
            table: Mutex::new(VlanTable::default()),
        }
    }

    fn table(&self) -> std::sync::MutexGuard<'_, VlanTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a VLAN in the caller's scope
    pub fn add_vlan(&self, ctx: &ProviderContext, id: &str, name: &str, cidr: &str) -> Vlan {
        let vlan = Vlan {
            id: id.to_string(),
            name: name.to_string(),
            cidr: cidr.to_string(),
            region_id: ctx.region_id.clone(),
        };
        self.table()
            .vlans
            .entry(Scope::from(ctx))
            .or_default()
            .insert(id.to_string(), vlan.clone());
        info!(vlan_id = id, cidr, "Registered VLAN");
        vlan
    }

    /// Register a subnet of an existing VLAN
    pub fn add_subnet(
        &self,
        ctx: &ProviderContext,
        id: &str,
        vlan_id: &str,
        name: &str,
        cidr: &str,
    ) -> Result<Subnet> {
        let scope = Scope::from(ctx);
        let mut table = self.table();
        let vlan_known = table
            .vlans
            .get(&scope)
            .is_some_and(|vlans| vlans.contains_key(vlan_id));
        if !vlan_known {
            return Err(CloudError::not_found("VLAN", vlan_id));
        }

        let subnet = Subnet {
            id: id.to_string(),
            vlan_id: vlan_id.to_string(),
            name: name.to_string(),
            cidr: cidr.to_string(),
        };
        table
            .subnets
            .entry(scope)
            .or_default()
            .insert(id.to_string(), subnet.clone());
        info!(subnet_id = id, vlan_id, cidr, "Registered subnet");
        Ok(subnet)
    }
}

impl VlanSupport for MockVlanSupport {
    fn subnet_support(&self) -> Requirement {
        self.subnet_support
    }

    fn get_vlan(&self, ctx: &ProviderContext, vlan_id: &str) -> Result<Option<Vlan>> {
        Ok(self
            .table()
            .vlans
            .get(&Scope::from(ctx))
            .and_then(|vlans| vlans.get(vlan_id))
            .cloned())
    }

    fn get_subnet(&self, ctx: &ProviderContext, subnet_id: &str) -> Result<Option<Subnet>> {
        Ok(self
            .table()
            .subnets
            .get(&Scope::from(ctx))
            .and_then(|subnets| subnets.get(subnet_id))
            .cloned())
    }
}
