//! Mockcloud Core - Shared types and traits
//!
//! This crate defines the vocabulary used by:
//! - mockcloud (the in-memory provider simulator)
//! - test clients exercising the simulator
//!
//! Key types:
//! - ProviderContext (the cloud/region/account partition key)
//! - VM, image, firewall and address enums
//! - Collaborator traits (data centers, images, VLANs, object cache)
//! - Error types

pub mod types;
pub mod traits;
pub mod error;

pub use types::*;
pub use traits::*;
pub use error::*;
