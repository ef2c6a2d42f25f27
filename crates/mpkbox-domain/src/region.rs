//! Registered memory regions and the bounded-region proofs derived from them.
//!
//! A [`BoundedRegion`] is the only way to describe foreign memory to the
//! copy primitive. Holding one proves the range lies inside a single
//! registered region, so a copy can never be asked to touch memory nobody
//! registered.

use std::marker::PhantomData;

use crate::error::{DomainError, Result};
use crate::id::DomainId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

/// One owned, registered range of memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRegion {
    base: usize,
    len: usize,
    domain: DomainId,
    access: Access,
}

impl MemoryRegion {
    pub fn base(&self) -> usize {
        self.base
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte. Cannot overflow: checked at registration.
    pub fn end(&self) -> usize {
        self.base + self.len
    }

    pub fn domain(&self) -> DomainId {
        self.domain
    }

    pub fn access(&self) -> Access {
        self.access
    }

    /// Whether `addr..addr+len` lies inside this region. A zero-length range
    /// may sit exactly at the end.
    pub fn contains(&self, addr: usize, len: usize) -> bool {
        match addr.checked_add(len) {
            Some(end) => addr >= self.base && end <= self.end(),
            None => false,
        }
    }

    fn overlaps(&self, other: &MemoryRegion) -> bool {
        self.base < other.end() && other.base < self.end()
    }
}

/// Builder for a [`RegionRegistry`]. Registration happens once, at context
/// setup; the built registry is immutable.
#[derive(Debug, Default)]
pub struct RegionRegistryBuilder {
    regions: Vec<MemoryRegion>,
}

impl RegionRegistryBuilder {
    /// Register `base..base+len` as belonging to `domain`.
    ///
    /// # Safety
    ///
    /// The range must stay mapped, and readable (writable for
    /// [`Access::ReadWrite`]) under the all-memory domain, for as long as the
    /// built registry or any region bounded by it is alive.
    pub unsafe fn register(
        mut self,
        base: *const u8,
        len: usize,
        domain: DomainId,
        access: Access,
    ) -> Result<Self> {
        let base = base as usize;
        if len == 0 {
            return Err(DomainError::EmptyRegion { base });
        }
        if base.checked_add(len).is_none() {
            return Err(DomainError::RegionOverflow { base, len });
        }

        let region = MemoryRegion {
            base,
            len,
            domain,
            access,
        };
        if let Some(other) = self.regions.iter().find(|r| r.overlaps(&region)) {
            return Err(DomainError::RegionOverlap {
                base,
                len,
                other_base: other.base,
                other_len: other.len,
            });
        }

        let at = self.regions.partition_point(|r| r.base < base);
        self.regions.insert(at, region);
        Ok(self)
    }

    pub fn build(self) -> RegionRegistry {
        RegionRegistry {
            regions: self.regions,
        }
    }
}

/// Immutable set of non-overlapping registered regions, sorted by base.
#[derive(Debug, Default)]
pub struct RegionRegistry {
    regions: Vec<MemoryRegion>,
}

impl RegionRegistry {
    pub fn builder() -> RegionRegistryBuilder {
        RegionRegistryBuilder::default()
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    /// Region containing `addr..addr+len`, if any.
    pub fn find(&self, addr: usize, len: usize) -> Option<&MemoryRegion> {
        let idx = self.regions.partition_point(|r| r.base <= addr);
        let region = self.regions.get(idx.checked_sub(1)?)?;
        region.contains(addr, len).then_some(region)
    }

    /// Prove that `ptr..ptr+len` is readable registered memory.
    pub fn bound(&self, ptr: *const u8, len: usize) -> Result<BoundedRegion<'_>> {
        let addr = ptr as usize;
        let region = self
            .find(addr, len)
            .ok_or(DomainError::OutOfBounds { addr, len })?;
        Ok(BoundedRegion {
            ptr,
            len,
            domain: Some(region.domain),
            _borrow: PhantomData,
        })
    }

    /// Like [`bound`](Self::bound), extending from `ptr` to the end of its
    /// region. Used when the length is not known up front (C strings).
    pub fn bound_to_end(&self, ptr: *const u8) -> Result<BoundedRegion<'_>> {
        let addr = ptr as usize;
        let region = self
            .find(addr, 0)
            .ok_or(DomainError::OutOfBounds { addr, len: 0 })?;
        self.bound(ptr, region.end() - addr)
    }

    /// Prove that `ptr..ptr+len` is writable registered memory.
    pub fn bound_mut(&self, ptr: *mut u8, len: usize) -> Result<BoundedRegionMut<'_>> {
        let addr = ptr as usize;
        let region = self
            .find(addr, len)
            .ok_or(DomainError::OutOfBounds { addr, len })?;
        if region.access != Access::ReadWrite {
            return Err(DomainError::NotWritable {
                addr,
                len,
                domain: region.domain,
            });
        }
        Ok(BoundedRegionMut {
            ptr,
            len,
            domain: Some(region.domain),
            _borrow: PhantomData,
        })
    }
}

/// A validated readable range. `domain` is `None` for host-owned Rust
/// memory, which a shared slice already proves valid.
#[derive(Debug, Clone, Copy)]
pub struct BoundedRegion<'a> {
    ptr: *const u8,
    len: usize,
    domain: Option<DomainId>,
    _borrow: PhantomData<&'a [u8]>,
}

impl<'a> BoundedRegion<'a> {
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn domain(&self) -> Option<DomainId> {
        self.domain
    }

    /// The first `len` bytes of this region.
    pub fn truncate(self, len: usize) -> Result<Self> {
        if len > self.len {
            return Err(DomainError::LengthExceedsRegion {
                len,
                available: self.len,
            });
        }
        Ok(Self { len, ..self })
    }
}

impl<'a> From<&'a [u8]> for BoundedRegion<'a> {
    fn from(slice: &'a [u8]) -> Self {
        Self {
            ptr: slice.as_ptr(),
            len: slice.len(),
            domain: None,
            _borrow: PhantomData,
        }
    }
}

/// A validated writable range.
#[derive(Debug)]
pub struct BoundedRegionMut<'a> {
    ptr: *mut u8,
    len: usize,
    domain: Option<DomainId>,
    _borrow: PhantomData<&'a mut [u8]>,
}

impl<'a> BoundedRegionMut<'a> {
    pub fn as_mut_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn domain(&self) -> Option<DomainId> {
        self.domain
    }
}

impl<'a> From<&'a mut [u8]> for BoundedRegionMut<'a> {
    fn from(slice: &'a mut [u8]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            domain: None,
            _borrow: PhantomData,
        }
    }
}
