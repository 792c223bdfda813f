//! Shared simulator state
//!
//! One [`Store`] per [`crate::MockCloud`]. Every registry handle holds an
//! `Arc<Store>` and locks the partition it needs:
//!
//! ```text
//! compute    VM records, monitor counters, id/address allocator, RNG
//! firewalls  firewalls, rules, VM <-> firewall associations
//! addresses  IP pool quad counter (tables live in the object cache)
//! images     captured images
//! ```
//!
//! Lock order: `addresses` before `compute` before `firewalls`. `addresses`
//! is never taken while `compute` is held.

use crate::allocator::AddressAllocator;
use crate::firewall::FirewallState;
use crate::image::ImageState;
use crate::ip::AddressState;
use crate::sim::RandomSource;
use crate::vm::ComputeState;
use mockcloud_core::ProviderContext;
use std::sync::{Mutex, MutexGuard};

/// Registry partition: (endpoint, region, account)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope {
    pub endpoint: String,
    pub region_id: String,
    pub account: String,
}

impl From<&ProviderContext> for Scope {
    fn from(ctx: &ProviderContext) -> Self {
        Self {
            endpoint: ctx.endpoint.clone(),
            region_id: ctx.region_id.clone(),
            account: ctx.account_number.clone(),
        }
    }
}

/// Owner of all mutable simulator state
pub struct Store {
    compute: Mutex<ComputeState>,
    firewalls: Mutex<FirewallState>,
    addresses: Mutex<AddressState>,
    images: Mutex<ImageState>,
}

impl Store {
    pub fn new(allocator: AddressAllocator, random: Box<dyn RandomSource>) -> Self {
        Self {
            compute: Mutex::new(ComputeState::new(allocator, random)),
            firewalls: Mutex::new(FirewallState::default()),
            addresses: Mutex::new(AddressState::default()),
            images: Mutex::new(ImageState::default()),
        }
    }

    pub(crate) fn compute(&self) -> MutexGuard<'_, ComputeState> {
        lock(&self.compute)
    }

    pub(crate) fn firewalls(&self) -> MutexGuard<'_, FirewallState> {
        lock(&self.firewalls)
    }

    pub(crate) fn addresses(&self) -> MutexGuard<'_, AddressState> {
        lock(&self.addresses)
    }

    pub(crate) fn images(&self) -> MutexGuard<'_, ImageState> {
        lock(&self.images)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store").finish_non_exhaustive()
    }
}

// Poisoned guards are recovered.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
