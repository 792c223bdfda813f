//! Firewall registry
//!
//! Firewalls are partitioned by (endpoint, region, account). Rules hang off
//! their firewall in authorization order, and a side table records which
//! firewalls each VM was launched with.
//!
//! ## Rule identity
//!
//! A rule's id is derived from its fields, so authorizing the same rule
//! twice is detectable and a rule can be revoked by re-describing it:
//!
//! ```text
//! <firewall>_:_<permission>_:_<direction>_:_<protocol>_:_<source>_:_<destination>_:_<start>:<end>
//! ```
//!
//! Precedence is carried on the rule but is not part of its identity.

use crate::config::FirewallCapabilities;
use crate::sim::Clock;
use crate::store::{Scope, Store};
use chrono::{DateTime, Utc};
use mockcloud_core::{
    CloudError, Direction, Permission, PortRange, Protocol, ProviderContext, Result, RuleTarget,
    VlanSupport,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

/// Separator between rule id fields
const RULE_ID_SEPARATOR: &str = "_:_";

/// A simulated firewall
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Firewall {
    pub id: String,
    pub name: String,
    pub description: String,
    pub region_id: String,
    pub owner: String,
    /// Set for VLAN-scoped firewalls
    pub vlan_id: Option<String>,
    pub active: bool,
    pub available: bool,
    pub created_at: DateTime<Utc>,
}

/// An authorized rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirewallRule {
    pub id: String,
    pub firewall_id: String,
    pub direction: Direction,
    pub permission: Permission,
    pub protocol: Protocol,
    pub source: RuleTarget,
    pub destination: RuleTarget,
    pub ports: PortRange,
    pub precedence: i32,
}

/// Description of a rule to authorize or revoke
#[derive(Debug, Clone, PartialEq)]
pub struct RuleRequest {
    pub direction: Direction,
    pub permission: Permission,
    pub protocol: Protocol,
    pub source: RuleTarget,
    pub destination: RuleTarget,
    pub ports: PortRange,
    pub precedence: i32,
}

impl RuleRequest {
    /// Allow traffic from `source` into the firewall's members
    pub fn ingress(source: RuleTarget, protocol: Protocol, ports: PortRange) -> Self {
        Self {
            direction: Direction::Ingress,
            permission: Permission::Allow,
            protocol,
            source,
            destination: RuleTarget::Global,
            ports,
            precedence: 0,
        }
    }

    /// Allow traffic from the firewall's members out to `destination`
    pub fn egress(destination: RuleTarget, protocol: Protocol, ports: PortRange) -> Self {
        Self {
            direction: Direction::Egress,
            permission: Permission::Allow,
            protocol,
            source: RuleTarget::Global,
            destination,
            ports,
            precedence: 0,
        }
    }

    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permission = permission;
        self
    }

    pub fn with_precedence(mut self, precedence: i32) -> Self {
        self.precedence = precedence;
        self
    }

    /// Canonical id of this rule on `firewall_id`
    pub fn rule_id(&self, firewall_id: &str) -> String {
        [
            firewall_id.to_string(),
            self.permission.to_string(),
            self.direction.to_string(),
            self.protocol.to_string(),
            self.source.to_string(),
            self.destination.to_string(),
            self.ports.to_string(),
        ]
        .join(RULE_ID_SEPARATOR)
    }
}

/// Firewall partition of the store
#[derive(Debug, Default)]
pub(crate) struct FirewallState {
    firewalls: HashMap<Scope, BTreeMap<String, Firewall>>,
    rules: HashMap<String, Vec<FirewallRule>>,
    vm_firewalls: HashMap<String, Vec<String>>,
}

impl FirewallState {
    fn scoped(&self, scope: &Scope) -> Option<&BTreeMap<String, Firewall>> {
        self.firewalls.get(scope)
    }

    fn contains(&self, scope: &Scope, firewall_id: &str) -> bool {
        self.scoped(scope)
            .is_some_and(|fws| fws.contains_key(firewall_id))
    }

    /// VMs currently associated with a firewall
    fn vms_using(&self, firewall_id: &str) -> Vec<String> {
        self.vm_firewalls
            .iter()
            .filter(|(_, ids)| ids.iter().any(|id| id == firewall_id))
            .map(|(vm_id, _)| vm_id.clone())
            .collect()
    }
}

/// Firewall operations, scoped by the caller's context
#[derive(Clone)]
pub struct FirewallRegistry {
    store: Arc<Store>,
    capabilities: FirewallCapabilities,
    vlans: Option<Arc<dyn VlanSupport>>,
    clock: Arc<dyn Clock>,
}

impl FirewallRegistry {
    pub fn new(
        store: Arc<Store>,
        capabilities: FirewallCapabilities,
        vlans: Option<Arc<dyn VlanSupport>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            capabilities,
            vlans,
            clock,
        }
    }

    pub fn capabilities(&self) -> &FirewallCapabilities {
        &self.capabilities
    }

    /// Create a firewall, global or VLAN-scoped
    pub fn create(
        &self,
        ctx: &ProviderContext,
        name: &str,
        description: &str,
        vlan_id: Option<&str>,
    ) -> Result<String> {
        match vlan_id {
            None if !self.capabilities.create_global => {
                return Err(CloudError::unsupported(
                    "Global firewall creation is not supported",
                ));
            }
            Some(_) if !self.capabilities.create_in_vlan => {
                return Err(CloudError::unsupported(
                    "VLAN firewall creation is not supported",
                ));
            }
            Some(vlan_id) => {
                let vlans = self
                    .vlans
                    .as_ref()
                    .ok_or_else(|| CloudError::unsupported("This cloud does not support VLANs"))?;
                if vlans.get_vlan(ctx, vlan_id)?.is_none() {
                    return Err(CloudError::not_found("VLAN", vlan_id));
                }
            }
            None => {}
        }

        let firewall = Firewall {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            description: description.to_string(),
            region_id: ctx.region_id.clone(),
            owner: ctx.account_number.clone(),
            vlan_id: vlan_id.map(str::to_string),
            active: true,
            available: true,
            created_at: self.clock.now(),
        };
        let id = firewall.id.clone();

        let mut state = self.store.firewalls();
        state
            .firewalls
            .entry(Scope::from(ctx))
            .or_default()
            .insert(id.clone(), firewall);

        info!(firewall_id = %id, fw_name = name, region = %ctx.region_id, "Created firewall");
        Ok(id)
    }

    pub fn create_in_vlan(
        &self,
        ctx: &ProviderContext,
        name: &str,
        description: &str,
        vlan_id: &str,
    ) -> Result<String> {
        self.create(ctx, name, description, Some(vlan_id))
    }

    pub fn get(&self, ctx: &ProviderContext, firewall_id: &str) -> Result<Option<Firewall>> {
        let state = self.store.firewalls();
        Ok(state
            .scoped(&Scope::from(ctx))
            .and_then(|fws| fws.get(firewall_id))
            .cloned())
    }

    pub fn list(&self, ctx: &ProviderContext) -> Result<Vec<Firewall>> {
        let state = self.store.firewalls();
        Ok(state
            .scoped(&Scope::from(ctx))
            .map(|fws| fws.values().cloned().collect())
            .unwrap_or_default())
    }

    /// Rules of a firewall, in authorization order
    pub fn get_rules(&self, ctx: &ProviderContext, firewall_id: &str) -> Result<Vec<FirewallRule>> {
        let state = self.store.firewalls();
        if !state.contains(&Scope::from(ctx), firewall_id) {
            return Err(CloudError::not_found("firewall", firewall_id));
        }
        Ok(state.rules.get(firewall_id).cloned().unwrap_or_default())
    }

    /// Add a rule; returns its id
    pub fn authorize(
        &self,
        ctx: &ProviderContext,
        firewall_id: &str,
        request: RuleRequest,
    ) -> Result<String> {
        if !self.capabilities.supported_permissions.contains(&request.permission) {
            return Err(CloudError::unsupported(format!(
                "{} rules are not supported",
                request.permission
            )));
        }
        if !self.capabilities.supported_directions.contains(&request.direction) {
            return Err(CloudError::unsupported(format!(
                "{} rules are not supported",
                request.direction
            )));
        }
        if !self.capabilities.supported_protocols.contains(&request.protocol) {
            return Err(CloudError::unsupported(format!(
                "Protocol {} is not supported",
                request.protocol
            )));
        }

        let rule_id = request.rule_id(firewall_id);
        let mut state = self.store.firewalls();
        if !state.contains(&Scope::from(ctx), firewall_id) {
            return Err(CloudError::not_found("firewall", firewall_id));
        }

        let rules = state.rules.entry(firewall_id.to_string()).or_default();
        if rules.iter().any(|r| r.id == rule_id) {
            return Err(CloudError::conflict(format!(
                "Duplicate rule on firewall {}",
                firewall_id
            )));
        }
        rules.push(FirewallRule {
            id: rule_id.clone(),
            firewall_id: firewall_id.to_string(),
            direction: request.direction,
            permission: request.permission,
            protocol: request.protocol,
            source: request.source,
            destination: request.destination,
            ports: request.ports,
            precedence: request.precedence,
        });

        info!(firewall_id, rule_id = %rule_id, "Authorized firewall rule");
        Ok(rule_id)
    }

    /// Remove a rule by id; absent rules are ignored
    pub fn revoke(&self, ctx: &ProviderContext, rule_id: &str) -> Result<()> {
        let Some(firewall_id) = rule_id.split(RULE_ID_SEPARATOR).next() else {
            return Ok(());
        };

        let mut state = self.store.firewalls();
        if !state.contains(&Scope::from(ctx), firewall_id) {
            debug!(rule_id, "Revoke of rule outside caller scope ignored");
            return Ok(());
        }
        if let Some(rules) = state.rules.get_mut(firewall_id) {
            let before = rules.len();
            rules.retain(|r| r.id != rule_id);
            if rules.len() != before {
                info!(firewall_id, rule_id, "Revoked firewall rule");
            }
        }
        Ok(())
    }

    /// Remove the rule `request` describes
    pub fn revoke_matching(
        &self,
        ctx: &ProviderContext,
        firewall_id: &str,
        request: &RuleRequest,
    ) -> Result<()> {
        self.revoke(ctx, &request.rule_id(firewall_id))
    }

    /// Delete a firewall that no live VM uses
    pub fn delete(&self, ctx: &ProviderContext, firewall_id: &str) -> Result<()> {
        if !self.capabilities.deletion_supported {
            return Err(CloudError::unsupported("Firewall deletion is not supported"));
        }

        let compute = self.store.compute();
        let mut state = self.store.firewalls();
        let scope = Scope::from(ctx);
        if !state.contains(&scope, firewall_id) {
            return Err(CloudError::not_found("firewall", firewall_id));
        }

        let users = state.vms_using(firewall_id);
        if let Some(vm_id) = users
            .iter()
            .find(|vm_id| compute.state_of(vm_id).is_some_and(|s| !s.is_terminated()))
        {
            return Err(CloudError::conflict(format!(
                "Firewall {} is in use by virtual machine {}",
                firewall_id, vm_id
            )));
        }
        drop(compute);

        if let Some(fws) = state.firewalls.get_mut(&scope) {
            fws.remove(firewall_id);
        }
        state.rules.remove(firewall_id);
        for ids in state.vm_firewalls.values_mut() {
            ids.retain(|id| id != firewall_id);
        }

        info!(firewall_id, "Deleted firewall");
        Ok(())
    }

    /// Fail unless every id names a firewall in the caller's scope
    pub fn validate_ids(&self, ctx: &ProviderContext, firewall_ids: &[String]) -> Result<()> {
        let state = self.store.firewalls();
        check_ids(&state, &Scope::from(ctx), firewall_ids)
    }

    /// Replace a VM's firewall association
    pub fn attach_to_vm(
        &self,
        ctx: &ProviderContext,
        vm_id: &str,
        firewall_ids: &[String],
    ) -> Result<()> {
        let mut state = self.store.firewalls();
        check_ids(&state, &Scope::from(ctx), firewall_ids)?;
        state
            .vm_firewalls
            .insert(vm_id.to_string(), firewall_ids.to_vec());
        debug!(vm_id, count = firewall_ids.len(), "Attached firewalls to VM");
        Ok(())
    }

    /// Firewalls associated with a VM
    pub fn list_for_vm(&self, vm_id: &str) -> Vec<String> {
        self.store
            .firewalls()
            .vm_firewalls
            .get(vm_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Drop a terminated VM's association
    pub fn on_vm_terminated(&self, vm_id: &str) {
        if self.store.firewalls().vm_firewalls.remove(vm_id).is_some() {
            debug!(vm_id, "Detached firewalls from terminated VM");
        }
    }
}

fn check_ids(state: &FirewallState, scope: &Scope, firewall_ids: &[String]) -> Result<()> {
    match firewall_ids.iter().find(|id| !state.contains(scope, id)) {
        Some(missing) => Err(CloudError::not_found("firewall", missing.clone())),
        None => Ok(()),
    }
}

impl std::fmt::Debug for FirewallRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FirewallRegistry")
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AddressAllocator;
    use crate::sim::{FixedRandom, SystemClock};
    use crate::vlan::MockVlanSupport;
    use mockcloud_core::{ErrorKind, Requirement};

    fn ctx() -> ProviderContext {
        ProviderContext::new("https://mock", "usmn", "acct-1")
    }

    fn registry_with(capabilities: FirewallCapabilities) -> FirewallRegistry {
        let store = Arc::new(Store::new(
            AddressAllocator::new(),
            Box::new(FixedRandom::always(0.5)),
        ));
        let vlans = Arc::new(MockVlanSupport::new(Requirement::Optional));
        vlans.add_vlan(&ctx(), "vlan-1", "test", "10.1.0.0/16");
        FirewallRegistry::new(store, capabilities, Some(vlans), Arc::new(SystemClock))
    }

    fn registry() -> FirewallRegistry {
        registry_with(FirewallCapabilities::default())
    }

    fn ssh() -> RuleRequest {
        RuleRequest::ingress(RuleTarget::cidr("0.0.0.0/0"), Protocol::Tcp, PortRange::single(22))
    }

    #[test]
    fn test_create_and_list_scoped() {
        let fws = registry();
        let id = fws.create(&ctx(), "web", "web tier", None).unwrap();

        let listed = fws.list(&ctx()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, id);
        assert_eq!(listed[0].owner, "acct-1");

        assert!(fws.list(&ctx().as_account("acct-2")).unwrap().is_empty());
        assert!(fws.get(&ctx().in_region("usme"), &id).unwrap().is_none());
    }

    #[test]
    fn test_vlan_creation_gated_by_capability() {
        let fws = registry();
        let err = fws.create_in_vlan(&ctx(), "db", "", "vlan-1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);

        let fws = registry_with(FirewallCapabilities {
            create_in_vlan: true,
            ..FirewallCapabilities::default()
        });
        let id = fws.create_in_vlan(&ctx(), "db", "", "vlan-1").unwrap();
        assert_eq!(
            fws.get(&ctx(), &id).unwrap().unwrap().vlan_id.as_deref(),
            Some("vlan-1")
        );

        let err = fws.create_in_vlan(&ctx(), "db", "", "vlan-9").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_duplicate_rule_conflicts() {
        let fws = registry();
        let id = fws.create(&ctx(), "web", "", None).unwrap();

        let rule_id = fws.authorize(&ctx(), &id, ssh()).unwrap();
        assert_eq!(
            rule_id,
            format!("{}_:_ALLOW_:_INGRESS_:_TCP_:_0.0.0.0/0_:_global_:_22:22", id)
        );

        let err = fws.authorize(&ctx(), &id, ssh().with_precedence(5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let https = RuleRequest::ingress(
            RuleTarget::cidr("0.0.0.0/0"),
            Protocol::Tcp,
            PortRange::single(443),
        );
        fws.authorize(&ctx(), &id, https).unwrap();
        assert_eq!(fws.get_rules(&ctx(), &id).unwrap().len(), 2);
    }

    #[test]
    fn test_unsupported_rule_kinds() {
        let fws = registry();
        let id = fws.create(&ctx(), "web", "", None).unwrap();

        let err = fws
            .authorize(&ctx(), &id, ssh().with_permission(Permission::Deny))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unsupported);

        let any = RuleRequest::ingress(RuleTarget::Global, Protocol::Any, PortRange::all());
        assert_eq!(
            fws.authorize(&ctx(), &id, any).unwrap_err().kind(),
            ErrorKind::Unsupported
        );
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let fws = registry();
        let id = fws.create(&ctx(), "web", "", None).unwrap();
        let rule_id = fws.authorize(&ctx(), &id, ssh()).unwrap();

        fws.revoke(&ctx(), &rule_id).unwrap();
        fws.revoke(&ctx(), &rule_id).unwrap();
        assert!(fws.get_rules(&ctx(), &id).unwrap().is_empty());

        fws.authorize(&ctx(), &id, ssh()).unwrap();
        fws.revoke_matching(&ctx(), &id, &ssh()).unwrap();
        assert!(fws.get_rules(&ctx(), &id).unwrap().is_empty());
    }

    #[test]
    fn test_attach_replaces_association() {
        let fws = registry();
        let a = fws.create(&ctx(), "a", "", None).unwrap();
        let b = fws.create(&ctx(), "b", "", None).unwrap();

        fws.attach_to_vm(&ctx(), "usmn-1", &[a.clone()]).unwrap();
        fws.attach_to_vm(&ctx(), "usmn-1", &[b.clone()]).unwrap();
        assert_eq!(fws.list_for_vm("usmn-1"), vec![b.clone()]);

        let err = fws
            .attach_to_vm(&ctx(), "usmn-1", &[a.clone(), "missing".to_string()])
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(fws.list_for_vm("usmn-1"), vec![b]);

        fws.on_vm_terminated("usmn-1");
        assert!(fws.list_for_vm("usmn-1").is_empty());
    }

    #[test]
    fn test_delete_unused_firewall() {
        let fws = registry();
        let id = fws.create(&ctx(), "web", "", None).unwrap();
        fws.authorize(&ctx(), &id, ssh()).unwrap();

        fws.delete(&ctx(), &id).unwrap();
        assert!(fws.get(&ctx(), &id).unwrap().is_none());
        assert_eq!(
            fws.delete(&ctx(), &id).unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }
}
