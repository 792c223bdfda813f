//! Context-bound compute facade
//!
//! Binds one [`ProviderContext`] to the VM registry and the image catalog so
//! callers do not thread the context through every call.

use crate::image::{CaptureTask, MockImageSupport};
use crate::vm::{LaunchOptions, VirtualMachine, VmRegistry};
use mockcloud_core::{
    Architecture, MachineImage, Platform, ProviderContext, Requirement, Result,
    VirtualMachineProduct,
};

/// VM and image operations for one caller
#[derive(Debug, Clone)]
pub struct ComputeServices {
    ctx: ProviderContext,
    vms: VmRegistry,
    images: MockImageSupport,
}

impl ComputeServices {
    pub fn new(ctx: ProviderContext, vms: VmRegistry, images: MockImageSupport) -> Self {
        Self { ctx, vms, images }
    }

    pub fn context(&self) -> &ProviderContext {
        &self.ctx
    }

    pub fn launch(&self, options: &LaunchOptions) -> Result<VirtualMachine> {
        self.vms.launch(&self.ctx, options)
    }

    pub fn start(&self, vm_id: &str) -> Result<()> {
        self.vms.start(&self.ctx, vm_id)
    }

    pub fn stop(&self, vm_id: &str) -> Result<()> {
        self.vms.stop(&self.ctx, vm_id)
    }

    pub fn reboot(&self, vm_id: &str) -> Result<()> {
        self.vms.reboot(&self.ctx, vm_id)
    }

    pub fn pause(&self, vm_id: &str) -> Result<()> {
        self.vms.pause(&self.ctx, vm_id)
    }

    pub fn unpause(&self, vm_id: &str) -> Result<()> {
        self.vms.unpause(&self.ctx, vm_id)
    }

    pub fn suspend(&self, vm_id: &str) -> Result<()> {
        self.vms.suspend(&self.ctx, vm_id)
    }

    pub fn resume(&self, vm_id: &str) -> Result<()> {
        self.vms.resume(&self.ctx, vm_id)
    }

    pub fn terminate(&self, vm_id: &str) -> Result<()> {
        self.vms.terminate(&self.ctx, vm_id)
    }

    pub fn get_virtual_machine(&self, vm_id: &str) -> Result<Option<VirtualMachine>> {
        self.vms.get(&self.ctx, vm_id)
    }

    pub fn list_virtual_machines(&self) -> Result<Vec<VirtualMachine>> {
        self.vms.list(&self.ctx)
    }

    pub fn list_firewalls(&self, vm_id: &str) -> Result<Vec<String>> {
        self.vms.list_firewalls(&self.ctx, vm_id)
    }

    pub fn list_products(&self, architecture: Architecture) -> Vec<VirtualMachineProduct> {
        self.vms.list_products(architecture)
    }

    pub fn get_product(&self, product_id: &str) -> Option<VirtualMachineProduct> {
        self.vms.get_product(product_id)
    }

    pub fn supported_architectures(&self) -> Vec<Architecture> {
        self.vms.supported_architectures()
    }

    pub fn max_vm_count(&self) -> usize {
        self.vms.max_vm_count()
    }

    pub fn password_requirement(&self, platform: Platform) -> Requirement {
        self.vms.password_requirement(platform)
    }

    pub fn shell_key_requirement(&self, platform: Platform) -> Requirement {
        self.vms.shell_key_requirement(platform)
    }

    pub fn get_image(&self, image_id: &str) -> Result<Option<MachineImage>> {
        self.images.get_machine_image(&self.ctx, image_id)
    }

    pub fn list_images(&self, owner: Option<&str>) -> Result<Vec<MachineImage>> {
        self.images.list_images_owned_by(&self.ctx, owner)
    }

    pub fn search_images(
        &self,
        keyword: Option<&str>,
        platform: Option<Platform>,
        architecture: Option<Architecture>,
    ) -> Result<Vec<MachineImage>> {
        self.images.search_images(&self.ctx, keyword, platform, architecture)
    }

    /// Needs a tokio runtime; see [`MockImageSupport::capture_image`]
    pub fn capture_image(&self, vm_id: &str, name: &str, description: &str) -> Result<CaptureTask> {
        self.images.capture_image(&self.ctx, vm_id, name, description)
    }
}
