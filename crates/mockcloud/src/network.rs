//! Context-bound network facade: firewalls, IP pool and optional VLANs

use crate::firewall::{Firewall, FirewallRegistry, FirewallRule, RuleRequest};
use crate::ip::{IpAddress, IpPool};
use mockcloud_core::{
    CloudError, IpVersion, ProviderContext, Requirement, Result, Subnet, Vlan, VlanSupport,
};
use std::sync::Arc;

/// Network operations for one caller
#[derive(Clone)]
pub struct NetworkServices {
    ctx: ProviderContext,
    firewalls: FirewallRegistry,
    ips: IpPool,
    vlans: Option<Arc<dyn VlanSupport>>,
}

impl NetworkServices {
    pub fn new(
        ctx: ProviderContext,
        firewalls: FirewallRegistry,
        ips: IpPool,
        vlans: Option<Arc<dyn VlanSupport>>,
    ) -> Self {
        Self {
            ctx,
            firewalls,
            ips,
            vlans,
        }
    }

    pub fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    pub fn has_vlan_support(&self) -> bool {
        self.vlans.is_some()
    }

    fn vlans(&self) -> Result<&Arc<dyn VlanSupport>> {
        self.vlans
            .as_ref()
            .ok_or_else(|| CloudError::unsupported("This cloud does not support VLANs"))
    }

    // Firewalls

    pub fn create_firewall(&self, name: &str, description: &str) -> Result<String> {
        self.firewalls.create(&self.ctx, name, description, None)
    }

    pub fn create_firewall_in_vlan(&self, name: &str, description: &str, vlan_id: &str) -> Result<String> {
        self.firewalls.create_in_vlan(&self.ctx, name, description, vlan_id)
    }

    pub fn get_firewall(&self, firewall_id: &str) -> Result<Option<Firewall>> {
        self.firewalls.get(&self.ctx, firewall_id)
    }

    pub fn list_firewalls(&self) -> Result<Vec<Firewall>> {
        self.firewalls.list(&self.ctx)
    }

    pub fn get_rules(&self, firewall_id: &str) -> Result<Vec<FirewallRule>> {
        self.firewalls.get_rules(&self.ctx, firewall_id)
    }

    pub fn authorize(&self, firewall_id: &str, request: RuleRequest) -> Result<String> {
        self.firewalls.authorize(&self.ctx, firewall_id, request)
    }

    pub fn revoke(&self, rule_id: &str) -> Result<()> {
        self.firewalls.revoke(&self.ctx, rule_id)
    }

    pub fn revoke_matching(&self, firewall_id: &str, request: &RuleRequest) -> Result<()> {
        self.firewalls.revoke_matching(&self.ctx, firewall_id, request)
    }

    pub fn delete_firewall(&self, firewall_id: &str) -> Result<()> {
        self.firewalls.delete(&self.ctx, firewall_id)
    }

    // IP pool

    pub fn request_ip(&self, version: IpVersion) -> Result<String> {
        self.ips.request(&self.ctx, version)
    }

    pub fn request_ip_for_vlan(&self, version: IpVersion) -> Result<String> {
        self.ips.request_for_vlan(&self.ctx, version)
    }

    pub fn assign_ip(&self, ip: &str, vm_id: &str) -> Result<()> {
        self.ips.assign(&self.ctx, ip, vm_id)
    }

    pub fn assign_ip_to_load_balancer(&self, ip: &str, load_balancer_id: &str) -> Result<()> {
        self.ips.assign_to_load_balancer(&self.ctx, ip, load_balancer_id)
    }

    pub fn release_from_server(&self, ip: &str) -> Result<()> {
        self.ips.release_from_server(&self.ctx, ip)
    }

    pub fn release_from_load_balancer(&self, ip: &str) -> Result<()> {
        self.ips.release_from_load_balancer(&self.ctx, ip)
    }

    pub fn release_from_pool(&self, ip: &str) -> Result<()> {
        self.ips.release_from_pool(&self.ctx, ip)
    }

    pub fn get_ip_address(&self, ip: &str) -> Result<Option<IpAddress>> {
        self.ips.get_ip_address(&self.ctx, ip)
    }

    pub fn list_ip_pool(&self, version: IpVersion, unassigned_only: bool) -> Result<Vec<IpAddress>> {
        self.ips.list_pool(&self.ctx, version, unassigned_only)
    }

    pub fn list_ip_pool_status(&self, version: IpVersion) -> Result<Vec<(String, bool)>> {
        self.ips.list_pool_status(&self.ctx, version)
    }

    pub fn forward(&self, ip: &str, public_port: u16, private_port: u16, vm_id: &str) -> Result<String> {
        self.ips.forward(&self.ctx, ip, public_port, private_port, vm_id)
    }

    pub fn stop_forward(&self, rule_id: &str) -> Result<()> {
        self.ips.stop_forward(&self.ctx, rule_id)
    }

    // VLANs

    pub fn subnet_support(&self) -> Result<Requirement> {
        Ok(self.vlans()?.subnet_support())
    }

    pub fn get_vlan(&self, vlan_id: &str) -> Result<Option<Vlan>> {
        self.vlans()?.get_vlan(&self.ctx, vlan_id)
    }

    pub fn get_subnet(&self, subnet_id: &str) -> Result<Option<Subnet>> {
        self.vlans()?.get_subnet(&self.ctx, subnet_id)
    }
}

impl std::fmt::Debug for NetworkServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkServices")
            .field("ctx", &self.ctx)
            .field("vlans", &self.vlans.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use crate::cloud::MockCloud;
    use crate::firewall::RuleRequest;
    use mockcloud_core::{
        ErrorKind, IpVersion, PortRange, Protocol, ProviderContext, Requirement, RuleTarget,
    };

    fn ctx() -> ProviderContext {
        ProviderContext::new("https://mock", "usmn", "acct-1")
    }

    #[test]
    fn test_firewall_round_through_facade() {
        let cloud = MockCloud::builder().build().unwrap();
        let network = cloud.network(ctx());

        let fw = network.create_firewall("web", "web tier").unwrap();
        let ssh = RuleRequest::ingress(RuleTarget::cidr("10.0.0.0/8"), Protocol::Tcp, PortRange::single(22));
        let rule_id = network.authorize(&fw, ssh.clone()).unwrap();
        assert_eq!(network.get_rules(&fw).unwrap().len(), 1);

        network.revoke_matching(&fw, &ssh).unwrap();
        assert!(network.get_rules(&fw).unwrap().is_empty());
        network.revoke(&rule_id).unwrap();

        assert_eq!(
            network.create_firewall_in_vlan("db", "", "vlan-1").unwrap_err().kind(),
            ErrorKind::Unsupported
        );
        network.delete_firewall(&fw).unwrap();
        assert!(network.list_firewalls().unwrap().is_empty());
    }

    #[test]
    fn test_ip_pool_through_facade() {
        let cloud = MockCloud::builder().build().unwrap();
        let network = cloud.network(ctx());

        let ip = network.request_ip(IpVersion::Ipv4).unwrap();
        assert_eq!(ip, "26.0.0.1");
        network.assign_ip_to_load_balancer(&ip, "lb-1").unwrap();
        assert_eq!(network.list_ip_pool_status(IpVersion::Ipv4).unwrap(), vec![(ip.clone(), false)]);
        assert!(network.list_ip_pool(IpVersion::Ipv4, true).unwrap().is_empty());

        network.release_from_load_balancer(&ip).unwrap();
        network.release_from_pool(&ip).unwrap();
        assert!(network.get_ip_address(&ip).unwrap().is_none());

        assert_eq!(
            network.request_ip_for_vlan(IpVersion::Ipv4).unwrap_err().kind(),
            ErrorKind::Unsupported
        );
    }

    #[test]
    fn test_vlan_support_is_optional() {
        let with = MockCloud::builder().build().unwrap();
        assert_eq!(with.network(ctx()).subnet_support().unwrap(), Requirement::Optional);

        let without = MockCloud::builder().without_vlans().build().unwrap();
        let network = without.network(ctx());
        assert!(!network.has_vlan_support());
        assert_eq!(network.get_vlan("vlan-1").unwrap_err().kind(), ErrorKind::Unsupported);
    }
}
