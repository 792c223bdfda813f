//! Collaborator traits consumed by the simulator
//!
//! The VM registry depends on these seams rather than on the concrete
//! catalogs, so tests can substitute their own data centers, images or
//! VLANs.

use crate::error::Result;
use crate::types::*;

/// Region and data center catalog
pub trait DataCenterServices: Send + Sync {
    fn list_regions(&self) -> Result<Vec<Region>>;

    fn list_data_centers(&self, region_id: &str) -> Result<Vec<DataCenter>>;

    fn get_region(&self, region_id: &str) -> Result<Option<Region>> {
        Ok(self.list_regions()?.into_iter().find(|r| r.id == region_id))
    }

    fn get_data_center(&self, data_center_id: &str) -> Result<Option<DataCenter>> {
        for region in self.list_regions()? {
            if let Some(dc) = self
                .list_data_centers(&region.id)?
                .into_iter()
                .find(|dc| dc.id == data_center_id)
            {
                return Ok(Some(dc));
            }
        }
        Ok(None)
    }
}

/// Image lookups used by launch
pub trait MachineImageSupport: Send + Sync {
    fn get_image(&self, ctx: &ProviderContext, image_id: &str) -> Result<Option<MachineImage>>;
}

/// VLAN and subnet lookups used by launch placement
pub trait VlanSupport: Send + Sync {
    /// Whether launches name a subnet, a VLAN, or either
    fn subnet_support(&self) -> Requirement;

    fn get_vlan(&self, ctx: &ProviderContext, vlan_id: &str) -> Result<Option<Vlan>>;

    fn get_subnet(&self, ctx: &ProviderContext, subnet_id: &str) -> Result<Option<Subnet>>;
}

/// Untyped object cache storage
pub trait CacheBackend: Send + Sync {
    fn read_value(&self, key: &CacheKey) -> Result<Option<serde_yaml::Value>>;

    fn write_value(&self, key: &CacheKey, value: &serde_yaml::Value) -> Result<()>;
}
