//! # mpkbox-domain
//!
//! Memory-protection-domain isolation between a host and sandboxed modules
//! sharing one address space.
//!
//! Every page carries a protection key and a per-thread register selects the
//! accessible keys. This crate owns that register and the one operation that
//! is allowed to open it up completely: [`scoped_cross_domain_copy`], which
//! widens to [`DomainId::ALL_MEMORY`], performs a single bounded bulk copy and
//! restores the caller's register image bit-for-bit.
//!
//! ## Layers
//!
//! - `raw`: register instructions and the bulk copy (the only unsafe core)
//! - [`register`]: `get_current_domain` / `set_domain` over a soft or PKRU backend
//! - [`DomainScope`]: enter a restricted domain for a lexical scope
//! - [`RegionRegistry`] / [`BoundedRegion`]: validated ranges
//! - [`CopyRequest`] / [`scoped_cross_domain_copy`]: the copy primitive
//! - [`keys`]: kernel protection keys (`pku` feature)
//! - [`profile`]: window counters

pub mod copy;
pub mod error;
pub mod id;
pub mod keys;
pub mod profile;
mod raw;
pub mod region;
pub mod register;
mod window;

pub use copy::{
    scoped_cross_domain_copy, scoped_cross_domain_copy_unchecked, scoped_cross_domain_strnlen,
    CopyRequest,
};
pub use error::{DomainError, Result};
pub use id::{DomainId, MAX_DOMAINS};
pub use keys::ProtectionKey;
pub use region::{
    Access, BoundedRegion, BoundedRegionMut, MemoryRegion, RegionRegistry, RegionRegistryBuilder,
};
pub use register::{
    backend, change_domain, get_current_domain, install_backend, pkru_support, set_domain,
    Backend, BackendPreference,
};
pub use window::DomainScope;
