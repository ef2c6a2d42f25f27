use thiserror::Error;

use crate::id::DomainId;

/// Errors raised before a domain window is ever opened.
///
/// Nothing in here can come out of the copy itself: once a window is open
/// there is no recoverable failure, only a hardware fault.
#[derive(Error, Debug)]
pub enum DomainError {
    #[error("invalid protection domain {raw} (valid range 0..{max})")]
    InvalidDomain { raw: u32, max: u32 },

    #[error("the all-memory domain can only be held inside a copy window")]
    WideningNotPermitted,

    #[error("domain {domain} is reserved for the host and cannot hold a module")]
    HostDomainReserved { domain: DomainId },

    #[error("region at {base:#x} has zero length")]
    EmptyRegion { base: usize },

    #[error("region at {base:#x} with length {len} wraps the address space")]
    RegionOverflow { base: usize, len: usize },

    #[error("region {base:#x}+{len} overlaps registered region {other_base:#x}+{other_len}")]
    RegionOverlap {
        base: usize,
        len: usize,
        other_base: usize,
        other_len: usize,
    },

    #[error("range {addr:#x}+{len} is not inside any registered region")]
    OutOfBounds { addr: usize, len: usize },

    #[error("range {addr:#x}+{len} lies in a read-only region of domain {domain}")]
    NotWritable {
        addr: usize,
        len: usize,
        domain: DomainId,
    },

    #[error("copy of {len} bytes exceeds region of {available} bytes")]
    LengthExceedsRegion { len: usize, available: usize },

    #[error("memory protection keys are not supported: {0}")]
    Unsupported(&'static str),

    #[error("domain backend already installed as {0:?}")]
    BackendAlreadyInstalled(crate::register::Backend),

    #[error("pkey_alloc failed: {0}")]
    KeyAllocation(std::io::Error),

    #[error("pkey_mprotect failed: {0}")]
    Protect(std::io::Error),
}

pub type Result<T> = std::result::Result<T, DomainError>;
