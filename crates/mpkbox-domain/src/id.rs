//! Protection domain identifiers and their register encoding.
//!
//! A domain is one hardware protection key made accessible next to key 0,
//! which holds the runtime's shared memory (stacks, allocator metadata).
//! The register image uses the PKRU layout: for key `k`, bit `2k` is
//! access-disable and bit `2k + 1` is write-disable.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

/// Number of protection keys, and therefore of domains.
pub const MAX_DOMAINS: u32 = 16;

/// Every key access- and write-disabled.
const DENY_ALL: u32 = u32::MAX;

/// Key 0 bits.
const SHARED_KEY_BITS: u32 = 0b11;

/// Identifier of a protection domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct DomainId(u32);

impl DomainId {
    /// Every tagged page accessible. Only ever held inside a copy window.
    pub const ALL_MEMORY: Self = Self(0);

    /// Domain a fresh execution context starts in.
    pub const HOST: Self = Self(1);

    pub fn new(raw: u32) -> Result<Self> {
        if raw < MAX_DOMAINS {
            Ok(Self(raw))
        } else {
            Err(DomainError::InvalidDomain {
                raw,
                max: MAX_DOMAINS,
            })
        }
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub const fn is_all_memory(self) -> bool {
        self.0 == 0
    }

    /// Whether a sandboxed module may run in this domain: neither the
    /// all-memory domain nor the host's own.
    #[inline]
    pub const fn is_module_domain(self) -> bool {
        self.0 != Self::ALL_MEMORY.0 && self.0 != Self::HOST.0
    }

    /// Register image that makes exactly this domain (plus key 0) accessible.
    #[inline]
    pub const fn register_value(self) -> u32 {
        if self.0 == 0 {
            return 0;
        }
        let own = 0b11u32 << (self.0 * 2);
        DENY_ALL & !SHARED_KEY_BITS & !own
    }

    /// Inverse of [`register_value`](Self::register_value). Returns `None` for
    /// images this crate never writes.
    pub const fn from_register_value(value: u32) -> Option<Self> {
        if value == 0 {
            return Some(Self::ALL_MEMORY);
        }
        let mut raw = 1;
        while raw < MAX_DOMAINS {
            if Self(raw).register_value() == value {
                return Some(Self(raw));
            }
            raw += 1;
        }
        None
    }
}

impl Default for DomainId {
    fn default() -> Self {
        Self::HOST
    }
}

impl fmt::Display for DomainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all_memory() {
            write!(f, "all-memory")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl TryFrom<u32> for DomainId {
    type Error = DomainError;

    fn try_from(raw: u32) -> Result<Self> {
        Self::new(raw)
    }
}

impl From<DomainId> for u32 {
    fn from(id: DomainId) -> u32 {
        id.0
    }
}
