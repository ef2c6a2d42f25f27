//! The domain-scoped cross-boundary copy.
//!
//! One call opens exactly one all-memory window, performs exactly one bulk
//! copy and closes the window again, restoring the caller's register image
//! bit-for-bit. Nothing inside the window allocates, logs or branches on the
//! copied data.
//!
//! There is no recovery from a fault inside the window. That is why the safe
//! entry point only accepts a [`CopyRequest`], whose construction is where
//! every bounds check happens.

use crate::error::{DomainError, Result};
use crate::raw;
use crate::region::{BoundedRegion, BoundedRegionMut};
use crate::window::DomainWindow;

/// A fully validated copy: `len` bytes fit in both the source and the
/// destination.
#[derive(Debug)]
pub struct CopyRequest<'d, 's> {
    dest: BoundedRegionMut<'d>,
    src: BoundedRegion<'s>,
    len: usize,
}

impl<'d, 's> CopyRequest<'d, 's> {
    pub fn new(dest: BoundedRegionMut<'d>, src: BoundedRegion<'s>, len: usize) -> Result<Self> {
        if len > dest.len() {
            return Err(DomainError::LengthExceedsRegion {
                len,
                available: dest.len(),
            });
        }
        if len > src.len() {
            return Err(DomainError::LengthExceedsRegion {
                len,
                available: src.len(),
            });
        }
        Ok(Self { dest, src, len })
    }

    /// Copy the whole source; the destination must be at least as long.
    pub fn whole(dest: BoundedRegionMut<'d>, src: BoundedRegion<'s>) -> Result<Self> {
        let len = src.len();
        Self::new(dest, src, len)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Copy `request.len()` bytes across the isolation boundary.
///
/// Forward byte order: when the ranges overlap with `dest < src` the result
/// equals the original source; with `dest > src` trailing source bytes are
/// overwritten before they are read. Overlap is not detected.
pub fn scoped_cross_domain_copy(request: CopyRequest<'_, '_>) {
    let CopyRequest { dest, src, len } = request;
    // SAFETY: both ranges were validated against registered regions or
    // borrowed Rust slices when the request was built.
    unsafe { scoped_cross_domain_copy_unchecked(dest.as_mut_ptr(), src.as_ptr(), len) }
}

/// Raw form of [`scoped_cross_domain_copy`].
///
/// # Safety
///
/// `src..src+len` must be mapped and readable, and `dest..dest+len` mapped
/// and writable, once every protection key is enabled. A fault here
/// terminates the process with the window still open.
#[inline]
pub unsafe fn scoped_cross_domain_copy_unchecked(dest: *mut u8, src: *const u8, len: usize) {
    let window = DomainWindow::open();
    raw::bulk_copy_forward(dest, src, len);
    let nested = window.is_nested();
    drop(window);

    crate::profile_count!(windows_opened);
    crate::profile_count!(copies);
    crate::profile_add!(bytes_copied, len);
    if nested {
        crate::profile_count!(nested_windows);
    }
    if len == 0 {
        crate::profile_count!(zero_length_copies);
    }
}

/// Length of the NUL-terminated string at the start of `src`, looking no
/// further than the region ends. `None` when there is no terminator.
pub fn scoped_cross_domain_strnlen(src: &BoundedRegion<'_>) -> Option<usize> {
    let window = DomainWindow::open();
    // SAFETY: `src` is a validated readable range.
    let found = unsafe { raw::scan_nul(src.as_ptr(), src.len()) };
    let nested = window.is_nested();
    drop(window);

    crate::profile_count!(windows_opened);
    crate::profile_count!(scans);
    if nested {
        crate::profile_count!(nested_windows);
    }
    found
}
