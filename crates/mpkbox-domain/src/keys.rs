//! Kernel-allocated protection keys.
//!
//! Linux exposes protection keys through three system calls: `pkey_alloc`,
//! `pkey_free` and `pkey_mprotect`. A [`ProtectionKey`] owns one key and maps
//! it one-to-one onto the [`DomainId`] with the same index, so tagging a
//! module's heap with key `k` puts it in domain `k`.
//!
//! Key 1 backs [`DomainId::HOST`], which every domain image keeps open. The
//! first time the kernel hands it out it is kept allocated for the life of
//! the process and never given to a module.
//!
//! On builds without the `pku` feature, or off x86_64 Linux, allocation
//! always fails with [`DomainError::Unsupported`].

use std::io;

use crate::error::{DomainError, Result};
use crate::id::{DomainId, MAX_DOMAINS};
use crate::register::pkru_support;

#[cfg(all(
    target_arch = "x86_64",
    target_os = "linux",
    feature = "pku",
    not(miri)
))]
mod sys {
    use std::io;

    use libc::{c_int, c_ulong, c_void};

    pub(super) fn pkey_alloc() -> io::Result<u32> {
        // flags = 0, access rights = 0: the key starts fully accessible and
        // the register decides.
        let ret = unsafe { libc::syscall(libc::SYS_pkey_alloc, 0 as c_ulong, 0 as c_ulong) };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(ret as u32)
        }
    }

    pub(super) fn pkey_free(key: u32) -> io::Result<()> {
        let ret = unsafe { libc::syscall(libc::SYS_pkey_free, key as c_int) };
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    pub(super) unsafe fn pkey_mprotect(
        addr: *mut u8,
        len: usize,
        prot: c_int,
        key: u32,
    ) -> io::Result<()> {
        let ret = libc::syscall(
            libc::SYS_pkey_mprotect,
            addr as *mut c_void,
            len,
            prot,
            key as c_int,
        );
        if ret < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// Draw keys from `alloc` until one maps to a module domain.
///
/// The host's key is kept (never passed to `free`), so the kernel cannot
/// hand it out again. Any other unusable key is released.
#[cfg_attr(
    not(all(
        target_arch = "x86_64",
        target_os = "linux",
        feature = "pku",
        not(miri)
    )),
    allow(dead_code)
)]
fn alloc_module_key<A, F>(mut alloc: A, mut free: F) -> Result<(u32, DomainId)>
where
    A: FnMut() -> io::Result<u32>,
    F: FnMut(u32),
{
    for _ in 0..MAX_DOMAINS {
        let key = alloc().map_err(DomainError::KeyAllocation)?;
        match DomainId::new(key) {
            Ok(domain) if domain.is_module_domain() => return Ok((key, domain)),
            Ok(domain) if domain == DomainId::HOST => {
                tracing::debug!(key, "Reserved protection key for the host domain");
            }
            Ok(_) => {
                free(key);
                tracing::warn!(key, "Kernel returned the default key");
                return Err(DomainError::WideningNotPermitted);
            }
            Err(e) => {
                free(key);
                return Err(e);
            }
        }
    }
    Err(DomainError::KeyAllocation(io::Error::other(
        "no protection key left for a module domain",
    )))
}

/// An allocated protection key, freed on drop.
#[derive(Debug)]
pub struct ProtectionKey {
    key: u32,
    domain: DomainId,
}

impl ProtectionKey {
    /// Allocate a fresh key from the kernel.
    pub fn alloc() -> Result<Self> {
        pkru_support().map_err(DomainError::Unsupported)?;

        #[cfg(all(
            target_arch = "x86_64",
            target_os = "linux",
            feature = "pku",
            not(miri)
        ))]
        {
            let (key, domain) = alloc_module_key(sys::pkey_alloc, |key| {
                let _ = sys::pkey_free(key);
            })?;
            tracing::debug!(key, "Allocated protection key");
            Ok(Self { key, domain })
        }

        #[cfg(not(all(
            target_arch = "x86_64",
            target_os = "linux",
            feature = "pku",
            not(miri)
        )))]
        {
            Err(DomainError::Unsupported("protection keys not compiled in"))
        }
    }

    pub fn key(&self) -> u32 {
        self.key
    }

    /// Domain in which memory tagged with this key is accessible.
    pub fn domain(&self) -> DomainId {
        self.domain
    }

    /// Tag `addr..addr+len` with this key and protection `prot`
    /// (`libc::PROT_*`).
    ///
    /// # Safety
    ///
    /// The range must be a page-aligned mapping owned by the caller, and no
    /// code running outside this key's domain may still need to access it
    /// other than through the copy primitive.
    pub unsafe fn protect(&self, addr: *mut u8, len: usize, prot: libc::c_int) -> Result<()> {
        #[cfg(all(
            target_arch = "x86_64",
            target_os = "linux",
            feature = "pku",
            not(miri)
        ))]
        {
            sys::pkey_mprotect(addr, len, prot, self.key).map_err(DomainError::Protect)?;
            tracing::debug!(key = self.key, addr = addr as usize, len, "Tagged region with protection key");
            Ok(())
        }

        #[cfg(not(all(
            target_arch = "x86_64",
            target_os = "linux",
            feature = "pku",
            not(miri)
        )))]
        {
            let _ = (addr, len, prot);
            Err(DomainError::Unsupported("protection keys not compiled in"))
        }
    }
}

impl Drop for ProtectionKey {
    fn drop(&mut self) {
        #[cfg(all(
            target_arch = "x86_64",
            target_os = "linux",
            feature = "pku",
            not(miri)
        ))]
        {
            if let Err(e) = sys::pkey_free(self.key) {
                tracing::warn!(key = self.key, error = %e, "pkey_free failed");
            }
        }
    }
}
