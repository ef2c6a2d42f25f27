//! Module heaps: anonymous page-aligned mappings a module owns for the
//! lifetime of its context.

use std::io;

use memmap2::MmapMut;
use mpkbox_domain::ProtectionKey;
use tracing::debug;

use crate::error::Result;

pub const DEFAULT_HEAP_SIZE: usize = 1 << 20;

/// System page size, falling back to 4 KiB if sysconf fails.
pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

pub struct SandboxHeap {
    map: MmapMut,
}

impl SandboxHeap {
    /// Map a zeroed heap of at least `size` bytes, rounded up to whole pages.
    /// A zero size still maps one page; a size that cannot be rounded up
    /// without overflowing is an [`io::ErrorKind::InvalidInput`] error.
    pub fn new(size: usize) -> Result<Self> {
        let page = page_size();
        let len = size
            .max(1)
            .div_ceil(page)
            .checked_mul(page)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("heap of {size} bytes overflows when rounded to {page}-byte pages"),
                )
            })?;
        let map = MmapMut::map_anon(len)?;
        debug!(requested = size, len, "Mapped sandbox heap");
        Ok(Self { map })
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.map.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.map
    }

    /// Tag the whole heap with `key`. From then on only the key's domain (and
    /// the all-memory copy window) can touch it.
    pub fn protect(&mut self, key: &ProtectionKey) -> Result<()> {
        // SAFETY: the mapping is owned, page-aligned and a whole number of
        // pages; the host only reaches it through the copy primitive.
        unsafe {
            key.protect(
                self.map.as_mut_ptr(),
                self.map.len(),
                libc::PROT_READ | libc::PROT_WRITE,
            )?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for SandboxHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxHeap")
            .field("base", &self.as_ptr())
            .field("len", &self.len())
            .finish()
    }
}
