//! Static region and data center catalog
//!
//! ```text
//! usmn   US/MN    US   active   available
//! usme   US/ME    US   active   available
//! gbsct  GB/SCT   EU   active   unavailable
//! nzakl  NZ/AKL   NZ   inactive unavailable
//! ```
//!
//! Each region has three zones: `<region>-1` mirrors the region's flags,
//! `<region>-2` shares its active flag but is unavailable, and `<region>-3`
//! is inactive and unavailable.

use mockcloud_core::{DataCenter, DataCenterServices, Region, Result};

/// Catalog served by the mock provider
#[derive(Debug, Clone)]
pub struct MockDataCenterServices {
    regions: Vec<Region>,
}

impl MockDataCenterServices {
    pub fn new() -> Self {
        let region = |id: &str, name: &str, jurisdiction: &str, active: bool, available: bool| Region {
            id: id.to_string(),
            name: name.to_string(),
            jurisdiction: jurisdiction.to_string(),
            active,
            available,
        };
        Self {
            regions: vec![
                region("usmn", "US/MN", "US", true, true),
                region("usme", "US/ME", "US", true, true),
                region("gbsct", "GB/SCT", "EU", true, false),
                region("nzakl", "NZ/AKL", "NZ", false, false),
            ],
        }
    }

    fn zones(region: &Region) -> Vec<DataCenter> {
        let zone = |n: u32, active: bool, available: bool| DataCenter {
            id: format!("{}-{}", region.id, n),
            name: format!("{} (Zone {})", region.name, n),
            region_id: region.id.clone(),
            active,
            available,
        };
        vec![
            zone(1, region.active, region.available),
            zone(2, region.active, false),
            zone(3, false, false),
        ]
    }
}

impl Default for MockDataCenterServices {
    fn default() -> Self {
        Self::new()
    }
}

impl DataCenterServices for MockDataCenterServices {
    fn list_regions(&self) -> Result<Vec<Region>> {
        Ok(self.regions.clone())
    }

    fn list_data_centers(&self, region_id: &str) -> Result<Vec<DataCenter>> {
        Ok(self
            .regions
            .iter()
            .find(|r| r.id == region_id)
            .map(Self::zones)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions() {
        let dcs = MockDataCenterServices::new();
        let regions = dcs.list_regions().unwrap();
        assert_eq!(regions.len(), 4);

        let gbsct = dcs.get_region("gbsct").unwrap().unwrap();
        assert!(gbsct.active);
        assert!(!gbsct.available);
        assert!(dcs.get_region("mars").unwrap().is_none());
    }

    #[test]
    fn test_zone_flags() {
        let dcs = MockDataCenterServices::new();
        let zones = dcs.list_data_centers("usmn").unwrap();
        let usable: Vec<_> = zones.iter().filter(|dc| dc.is_usable()).collect();
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].id, "usmn-1");
        assert_eq!(zones[1].name, "US/MN (Zone 2)");

        assert!(dcs
            .list_data_centers("nzakl")
            .unwrap()
            .iter()
            .all(|dc| !dc.active));
        assert!(dcs.list_data_centers("nowhere").unwrap().is_empty());
    }

    #[test]
    fn test_get_data_center_across_regions() {
        let dcs = MockDataCenterServices::new();
        let dc = dcs.get_data_center("usme-2").unwrap().unwrap();
        assert_eq!(dc.region_id, "usme");
        assert!(dc.active);
        assert!(!dc.available);
        assert!(dcs.get_data_center("usme-4").unwrap().is_none());
    }
}
