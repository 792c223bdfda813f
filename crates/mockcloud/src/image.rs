//! Machine images
//!
//! Every (endpoint, region) has the same two-image public library:
//!
//! ```text
//! <region>-1   Ubuntu 10.04 x64    UBUNTU    i64   ACTIVE
//! <region>-2   Windows 2008 x64    WINDOWS   i64   ACTIVE
//! ```
//!
//! Accounts can add private images by capturing one of their VMs. A capture
//! registers a PENDING image straight away and finishes in a background
//! task that walks through the capture phases, sleeping between them, then
//! marks the image ACTIVE.

use crate::sim::Clock;
use crate::store::Store;
use chrono::{DateTime, Utc};
use mockcloud_core::{
    Architecture, CloudError, MachineImage, MachineImageState, MachineImageSupport, Platform,
    ProviderContext, Result,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Captured-image partition of the store, keyed by (endpoint, region)
#[derive(Debug, Default)]
pub(crate) struct ImageState {
    captured: HashMap<(String, String), Vec<MachineImage>>,
}

impl ImageState {
    fn region_images(&self, ctx: &ProviderContext) -> &[MachineImage] {
        self.captured
            .get(&(ctx.endpoint.clone(), ctx.region_id.clone()))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Stage of an image capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CapturePhase {
    Snapshotting,
    Registering,
    Complete,
    Failed,
}

/// Handle on a running capture
#[derive(Debug)]
pub struct CaptureTask {
    image_id: String,
    progress: watch::Receiver<CapturePhase>,
    handle: JoinHandle<Result<String>>,
}

impl CaptureTask {
    /// Id of the image being captured (already listed, PENDING)
    pub fn image_id(&self) -> &str {
        &self.image_id
    }

    pub fn progress(&self) -> CapturePhase {
        *self.progress.borrow()
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.progress(), CapturePhase::Complete | CapturePhase::Failed)
    }

    /// Wait for the capture; yields the image id or the worker's error
    pub async fn wait(self) -> Result<String> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) => Err(CloudError::internal(format!("Image capture task failed: {}", e))),
        }
    }
}

/// Image catalog and capture
#[derive(Clone)]
pub struct MockImageSupport {
    store: Arc<Store>,
    clock: Arc<dyn Clock>,
    phase_delay: Duration,
}

impl MockImageSupport {
    pub fn new(store: Arc<Store>, clock: Arc<dyn Clock>, phase_delay: Duration) -> Self {
        Self {
            store,
            clock,
            phase_delay,
        }
    }

    /// Public library for the caller's region
    pub fn public_images(ctx: &ProviderContext) -> Vec<MachineImage> {
        let image = |suffix: u32, name: &str, description: &str, platform: Platform| MachineImage {
            id: format!("{}-{}", ctx.region_id, suffix),
            name: name.to_string(),
            description: description.to_string(),
            region_id: ctx.region_id.clone(),
            owner: None,
            platform,
            architecture: Architecture::I64,
            state: MachineImageState::Active,
            created_at: DateTime::<Utc>::default(),
            source_vm_id: None,
        };
        vec![
            image(1, "Ubuntu 10.04 x64", "An Ubuntu VM", Platform::Ubuntu),
            image(2, "Windows 2008 x64", "Windows VM", Platform::Windows),
        ]
    }

    /// Look up a public image or one of the caller's captured images
    pub fn get_machine_image(
        &self,
        ctx: &ProviderContext,
        image_id: &str,
    ) -> Result<Option<MachineImage>> {
        if let Some(img) = Self::public_images(ctx).into_iter().find(|i| i.id == image_id) {
            return Ok(Some(img));
        }
        let state = self.store.images();
        Ok(state
            .region_images(ctx)
            .iter()
            .find(|i| i.id == image_id && i.owner.as_deref() == Some(ctx.account_number.as_str()))
            .cloned())
    }

    /// Public library (`None`) or the images an account has captured
    pub fn list_images_owned_by(
        &self,
        ctx: &ProviderContext,
        account: Option<&str>,
    ) -> Result<Vec<MachineImage>> {
        match account {
            None => Ok(Self::public_images(ctx)),
            Some(account) => {
                let state = self.store.images();
                Ok(state
                    .region_images(ctx)
                    .iter()
                    .filter(|i| i.owner.as_deref() == Some(account))
                    .cloned()
                    .collect())
            }
        }
    }

    /// Filter the public library
    ///
    /// `keyword` matches (case-insensitively) the name or description;
    /// `platform` matches by family.
    pub fn search_images(
        &self,
        ctx: &ProviderContext,
        keyword: Option<&str>,
        platform: Option<Platform>,
        architecture: Option<Architecture>,
    ) -> Result<Vec<MachineImage>> {
        let keyword = keyword.map(str::to_lowercase);
        Ok(Self::public_images(ctx)
            .into_iter()
            .filter(|img| {
                keyword.as_ref().is_none_or(|k| {
                    img.name.to_lowercase().contains(k.as_str())
                        || img.description.to_lowercase().contains(k.as_str())
                })
            })
            .filter(|img| platform.is_none_or(|p| img.platform.matches_filter(p)))
            .filter(|img| architecture.is_none_or(|a| img.architecture == a))
            .collect())
    }

    /// Capture a VM into a new private image
    ///
    /// Must be called inside a tokio runtime; the capture completes in a
    /// spawned task.
    pub fn capture_image(
        &self,
        ctx: &ProviderContext,
        vm_id: &str,
        name: &str,
        description: &str,
    ) -> Result<CaptureTask> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| CloudError::internal("Image capture requires a tokio runtime"))?;

        let (platform, architecture) = {
            let compute = self.store.compute();
            let vm = compute
                .find(ctx, vm_id)
                .filter(|vm| vm.owner == ctx.account_number)
                .ok_or_else(|| CloudError::not_found("virtual machine", vm_id))?;
            if vm.state.is_terminated() {
                return Err(CloudError::invalid_state(vm_id, vm.state, "be imaged"));
            }
            (vm.platform, vm.architecture)
        };

        let image = MachineImage {
            id: format!("img-{}", uuid::Uuid::new_v4()),
            name: name.to_string(),
            description: description.to_string(),
            region_id: ctx.region_id.clone(),
            owner: Some(ctx.account_number.clone()),
            platform,
            architecture,
            state: MachineImageState::Pending,
            created_at: self.clock.now(),
            source_vm_id: Some(vm_id.to_string()),
        };
        let image_id = image.id.clone();
        let key = (ctx.endpoint.clone(), ctx.region_id.clone());
        self.store
            .images()
            .captured
            .entry(key.clone())
            .or_default()
            .push(image);
        info!(image_id = %image_id, vm_id, "Started image capture");

        let (tx, rx) = watch::channel(CapturePhase::Snapshotting);
        let store = self.store.clone();
        let delay = self.phase_delay;
        let task_image_id = image_id.clone();

        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            tx.send_replace(CapturePhase::Registering);
            tokio::time::sleep(delay).await;

            let result = activate(&store, &key, &task_image_id);
            match &result {
                Ok(()) => {
                    tx.send_replace(CapturePhase::Complete);
                    info!(image_id = %task_image_id, "Image capture complete");
                }
                Err(e) => {
                    tx.send_replace(CapturePhase::Failed);
                    warn!(image_id = %task_image_id, error = %e, "Image capture failed");
                }
            }
            result.map(|()| task_image_id)
        });

        Ok(CaptureTask {
            image_id,
            progress: rx,
            handle,
        })
    }

    pub fn capture_to_storage(&self, _ctx: &ProviderContext, _vm_id: &str, _location: &str) -> Result<CaptureTask> {
        Err(CloudError::unsupported(
            "No ability to image a virtual machine to a storage location",
        ))
    }

    pub fn download(&self, _ctx: &ProviderContext, _image_id: &str) -> Result<Vec<u8>> {
        Err(CloudError::unsupported("Images cannot be downloaded from this cloud"))
    }

    pub fn install_from_upload(&self, _ctx: &ProviderContext, _bytes: &[u8]) -> Result<String> {
        Err(CloudError::unsupported("No ability to install an image from an upload"))
    }

    pub fn register(&self, _ctx: &ProviderContext, _location: &str) -> Result<String> {
        Err(CloudError::unsupported("No ability to register images from storage"))
    }

    pub fn share(&self, _ctx: &ProviderContext, _image_id: &str, _account: &str) -> Result<()> {
        Err(CloudError::unsupported("Images cannot be shared with other accounts"))
    }

    pub fn transfer(&self, _ctx: &ProviderContext, _image_id: &str) -> Result<String> {
        Err(CloudError::unsupported("Images cannot be transferred"))
    }

    pub fn remove(&self, _ctx: &ProviderContext, _image_id: &str) -> Result<()> {
        Err(CloudError::unsupported("Image removal is not supported"))
    }
}

fn activate(store: &Store, key: &(String, String), image_id: &str) -> Result<()> {
    let mut state = store.images();
    let image = state
        .captured
        .get_mut(key)
        .and_then(|images| images.iter_mut().find(|i| i.id == image_id))
        .ok_or_else(|| CloudError::not_found("machine image", image_id))?;
    image.state = MachineImageState::Active;
    Ok(())
}

impl MachineImageSupport for MockImageSupport {
    fn get_image(&self, ctx: &ProviderContext, image_id: &str) -> Result<Option<MachineImage>> {
        self.get_machine_image(ctx, image_id)
    }
}

impl std::fmt::Debug for MockImageSupport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockImageSupport")
            .field("phase_delay", &self.phase_delay)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AddressAllocator;
    use crate::sim::{FixedRandom, SystemClock};
    use mockcloud_core::ErrorKind;

    fn ctx() -> ProviderContext {
        ProviderContext::new("https://mock", "usmn", "acct-1")
    }

    fn images() -> MockImageSupport {
        let store = Arc::new(Store::new(
            AddressAllocator::new(),
            Box::new(FixedRandom::always(0.5)),
        ));
        MockImageSupport::new(store, Arc::new(SystemClock), Duration::from_millis(1))
    }

    #[test]
    fn test_public_library_per_region() {
        let images = images();
        let ubuntu = images.get_image(&ctx(), "usmn-1").unwrap().unwrap();
        assert_eq!(ubuntu.platform, Platform::Ubuntu);
        assert_eq!(ubuntu.state, MachineImageState::Active);

        let windows = images.get_image(&ctx().in_region("usme"), "usme-2").unwrap().unwrap();
        assert_eq!(windows.platform, Platform::Windows);

        assert!(images.get_image(&ctx(), "usme-1").unwrap().is_none());
        assert_eq!(images.list_images_owned_by(&ctx(), None).unwrap().len(), 2);
        assert!(images.list_images_owned_by(&ctx(), Some("acct-1")).unwrap().is_empty());
    }

    #[test]
    fn test_search_by_family_and_keyword() {
        let images = images();
        let unix = images
            .search_images(&ctx(), None, Some(Platform::UnixGeneric), None)
            .unwrap();
        assert_eq!(unix.len(), 1);
        assert_eq!(unix[0].id, "usmn-1");

        let windows = images.search_images(&ctx(), Some("windows"), None, None).unwrap();
        assert_eq!(windows.len(), 1);

        assert_eq!(
            images
                .search_images(&ctx(), None, Some(Platform::Unknown), Some(Architecture::I64))
                .unwrap()
                .len(),
            2
        );
        assert!(images
            .search_images(&ctx(), None, None, Some(Architecture::I32))
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_capture_unknown_vm() {
        let images = images();
        let err = images.capture_image(&ctx(), "usmn-99", "snap", "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_capture_needs_runtime() {
        let images = images();
        let err = images.capture_image(&ctx(), "usmn-1", "snap", "").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_unsupported_operations() {
        let images = images();
        assert_eq!(images.download(&ctx(), "usmn-1").unwrap_err().kind(), ErrorKind::Unsupported);
        assert_eq!(images.share(&ctx(), "usmn-1", "acct-2").unwrap_err().kind(), ErrorKind::Unsupported);
        assert_eq!(images.transfer(&ctx(), "usmn-1").unwrap_err().kind(), ErrorKind::Unsupported);
        assert_eq!(images.register(&ctx(), "s3://x").unwrap_err().kind(), ErrorKind::Unsupported);
        assert_eq!(images.install_from_upload(&ctx(), b"img").unwrap_err().kind(), ErrorKind::Unsupported);
        assert_eq!(images.remove(&ctx(), "usmn-1").unwrap_err().kind(), ErrorKind::Unsupported);
        assert!(images.capture_to_storage(&ctx(), "usmn-1", "/tmp").is_err());
    }
}
