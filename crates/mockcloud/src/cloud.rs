//! The simulator instance
//!
//! [`MockCloud`] owns one [`Store`] and every registry built on it. Two
//! instances never share state, so tests can run simulators side by side.
//!
//! ```text
//! MockCloud
//!   ├── Store (compute | firewalls | addresses | images)
//!   ├── VmRegistry ──► FirewallRegistry, IpPool, Collaborators
//!   ├── FirewallRegistry
//!   ├── IpPool ──► ObjectCache ──► FileCache | MemoryCache
//!   ├── MockImageSupport
//!   ├── MockDataCenterServices
//!   ├── MockVlanSupport (optional)
//!   └── MonitorHandle (while started)
//! ```

use crate::allocator::AddressAllocator;
use crate::cache::{FileCache, MemoryCache, ObjectCache};
use crate::compute::ComputeServices;
use crate::config::MockCloudConfig;
use crate::datacenter::MockDataCenterServices;
use crate::firewall::FirewallRegistry;
use crate::image::MockImageSupport;
use crate::ip::IpPool;
use crate::monitor::MonitorHandle;
use crate::network::NetworkServices;
use crate::sim::{Clock, RandomSource, SystemClock, ThreadRandom};
use crate::store::Store;
use crate::vlan::MockVlanSupport;
use crate::vm::{Collaborators, TickReport, VmRegistry};
use mockcloud_core::{
    CacheBackend, CloudError, DataCenterServices, ProviderContext, Result, VlanSupport,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Builder for [`MockCloud`]
///
/// Defaults: wall clock, thread RNG, fresh allocator, in-memory object
/// cache, the stock data center catalog and an empty VLAN table.
pub struct MockCloudBuilder {
    config: MockCloudConfig,
    clock: Option<Arc<dyn Clock>>,
    random: Option<Box<dyn RandomSource>>,
    allocator: AddressAllocator,
    cache: Option<Arc<dyn CacheBackend>>,
    file_cache: bool,
    data_centers: Option<Arc<dyn DataCenterServices>>,
    vlans: bool,
}

impl MockCloudBuilder {
    fn new() -> Self {
        Self {
            config: MockCloudConfig::default(),
            clock: None,
            random: None,
            allocator: AddressAllocator::new(),
            cache: None,
            file_cache: false,
            data_centers: None,
            vlans: true,
        }
    }

    pub fn with_config(mut self, config: MockCloudConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn with_random(mut self, random: impl RandomSource + 'static) -> Self {
        self.random = Some(Box::new(random));
        self
    }

    pub fn with_allocator(mut self, allocator: AddressAllocator) -> Self {
        self.allocator = allocator;
        self
    }

    pub fn with_cache_backend(mut self, backend: Arc<dyn CacheBackend>) -> Self {
        self.cache = Some(backend);
        self
    }

    /// Persist the IP pool tables under `config.cache_dir/<timestamp>/`
    pub fn with_file_cache(mut self) -> Self {
        self.file_cache = true;
        self
    }

    pub fn with_data_centers(mut self, data_centers: Arc<dyn DataCenterServices>) -> Self {
        self.data_centers = Some(data_centers);
        self
    }

    /// Build a cloud with no VLAN support
    pub fn without_vlans(mut self) -> Self {
        self.vlans = false;
        self
    }

    pub fn build(self) -> Result<MockCloud> {
        self.config.validate()?;
        let config = self.config;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let random = self
            .random
            .unwrap_or_else(|| Box::new(ThreadRandom::new()));
        let store = Arc::new(Store::new(self.allocator, random));

        let backend: Arc<dyn CacheBackend> = match self.cache {
            Some(backend) => backend,
            None if self.file_cache => {
                let cache = FileCache::new(&config.cache_dir);
                debug!(root = %cache.root().display(), "Using file-backed object cache");
                Arc::new(cache)
            }
            None => Arc::new(MemoryCache::new()),
        };

        let data_centers = self
            .data_centers
            .unwrap_or_else(|| Arc::new(MockDataCenterServices::new()));
        let vlan_table = self
            .vlans
            .then(|| Arc::new(MockVlanSupport::new(config.capabilities.vlan.subnet_support)));
        let vlans = vlan_table
            .clone()
            .map(|table| table as Arc<dyn VlanSupport>);

        let firewalls = FirewallRegistry::new(
            store.clone(),
            config.capabilities.firewall.clone(),
            vlans.clone(),
            clock.clone(),
        );
        let ips = IpPool::new(
            store.clone(),
            ObjectCache::new(backend),
            config.capabilities.ip.clone(),
        );
        let images = MockImageSupport::new(store.clone(), clock.clone(), config.capture_phase_delay);
        let vms = VmRegistry::new(
            store.clone(),
            firewalls.clone(),
            ips.clone(),
            Collaborators {
                data_centers: data_centers.clone(),
                images: Arc::new(images.clone()),
                vlans: vlans.clone(),
            },
            clock,
            &config,
        );

        info!(
            max_vm_count = config.max_vm_count,
            monitor_interval = ?config.monitor.interval,
            vlans = vlan_table.is_some(),
            "Mock cloud ready"
        );

        Ok(MockCloud {
            config,
            store,
            vms,
            firewalls,
            ips,
            images,
            data_centers,
            vlans,
            vlan_table,
            monitor: None,
        })
    }
}

/// An isolated in-memory cloud
pub struct MockCloud {
    config: MockCloudConfig,
    store: Arc<Store>,
    vms: VmRegistry,
    firewalls: FirewallRegistry,
    ips: IpPool,
    images: MockImageSupport,
    data_centers: Arc<dyn DataCenterServices>,
    vlans: Option<Arc<dyn VlanSupport>>,
    vlan_table: Option<Arc<MockVlanSupport>>,
    monitor: Option<MonitorHandle>,
}

impl MockCloud {
    pub fn builder() -> MockCloudBuilder {
        MockCloudBuilder::new()
    }

    /// Validate `config` and build a cloud with a file-backed object cache
    pub fn new(config: MockCloudConfig) -> Result<Self> {
        Self::builder().with_config(config).with_file_cache().build()
    }

    pub fn config(&self) -> &MockCloudConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Compute facade bound to `ctx`
    pub fn compute(&self, ctx: ProviderContext) -> ComputeServices {
        ComputeServices::new(ctx, self.vms.clone(), self.images.clone())
    }

    /// Network facade bound to `ctx`
    pub fn network(&self, ctx: ProviderContext) -> NetworkServices {
        NetworkServices::new(ctx, self.firewalls.clone(), self.ips.clone(), self.vlans.clone())
    }

    pub fn vms(&self) -> VmRegistry {
        self.vms.clone()
    }

    pub fn firewalls(&self) -> FirewallRegistry {
        self.firewalls.clone()
    }

    pub fn ips(&self) -> IpPool {
        self.ips.clone()
    }

    pub fn images(&self) -> MockImageSupport {
        self.images.clone()
    }

    pub fn data_centers(&self) -> &Arc<dyn DataCenterServices> {
        &self.data_centers
    }

    /// The VLAN table, unless built with [`MockCloudBuilder::without_vlans`]
    pub fn vlans(&self) -> Option<&Arc<MockVlanSupport>> {
        self.vlan_table.as_ref()
    }

    /// Run one monitor pass now
    pub fn tick(&self) -> TickReport {
        self.vms.tick()
    }

    /// Start the background monitor; no-op if it is already running
    pub fn start_monitor(&mut self) -> Result<()> {
        if self.monitor_running() {
            debug!("VM monitor already running");
            return Ok(());
        }
        tokio::runtime::Handle::try_current()
            .map_err(|_| CloudError::internal("The VM monitor requires a tokio runtime"))?;
        self.monitor = Some(MonitorHandle::spawn(
            self.vms.clone(),
            self.config.monitor.interval,
        ));
        Ok(())
    }

    pub fn monitor_running(&self) -> bool {
        self.monitor.as_ref().is_some_and(MonitorHandle::is_running)
    }

    pub fn monitor_token(&self) -> Option<CancellationToken> {
        self.monitor.as_ref().map(MonitorHandle::shutdown_token)
    }

    /// Stop the monitor and wait for it; returns the passes it ran
    pub async fn stop_monitor(&mut self) -> u64 {
        match self.monitor.take() {
            Some(monitor) => monitor.stop().await,
            None => 0,
        }
    }
}

impl Drop for MockCloud {
    fn drop(&mut self) {
        if let Some(monitor) = &self.monitor {
            monitor.shutdown_token().cancel();
        }
    }
}

impl std::fmt::Debug for MockCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCloud")
            .field("config", &self.config)
            .field("monitor_running", &self.monitor_running())
            .finish_non_exhaustive()
    }
}
