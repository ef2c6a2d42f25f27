// =============================================================================
// Raw core: the only code in the crate that touches the domain register or
// copies memory across a protection boundary.
// =============================================================================
//
// Everything here is `unsafe` and `pub(crate)`. Callers outside this crate go
// through `DomainWindow` / `DomainScope` (window.rs) and `CopyRequest`
// (copy.rs), which establish the preconditions these functions assume.
//
// Register access (x86_64 Linux, feature `pku`):
//   rdpkru: ECX = 0, result in EAX, EDX clobbered
//   wrpkru: EAX = value, ECX = EDX = 0
//
// Bulk copy:
//   x86_64: a single `rep movsb` (DF is clear per the SysV ABI). The
//   instruction is restartable: an interrupt leaves RSI/RDI/RCX describing
//   the remaining work and execution resumes where it stopped.
//   elsewhere: a volatile forward byte loop, which keeps the same
//   low-to-high overlap behaviour.
// =============================================================================

#[cfg(all(
    target_arch = "x86_64",
    target_os = "linux",
    feature = "pku",
    not(miri)
))]
mod pkru {
    use std::arch::asm;

    #[inline(always)]
    pub(crate) unsafe fn read() -> u32 {
        let value: u32;
        asm!(
            "rdpkru",
            in("ecx") 0u32,
            out("eax") value,
            out("edx") _,
            options(nomem, nostack, preserves_flags),
        );
        value
    }

    /// No `nomem`: the write must act as a compiler barrier so that loads and
    /// stores are never moved across a domain change.
    #[inline(always)]
    pub(crate) unsafe fn write(value: u32) {
        asm!(
            "wrpkru",
            in("eax") value,
            in("ecx") 0u32,
            in("edx") 0u32,
            options(nostack, preserves_flags),
        );
    }

    /// CPUID.(EAX=07H, ECX=0H):ECX.OSPKE[bit 4]: the OS has enabled PKRU.
    #[allow(unused_unsafe)]
    pub(crate) fn os_enabled() -> bool {
        use std::arch::x86_64::{__cpuid_count, __get_cpuid_max};

        unsafe {
            let (max_leaf, _) = __get_cpuid_max(0);
            if max_leaf < 7 {
                return false;
            }
            __cpuid_count(7, 0).ecx & (1 << 4) != 0
        }
    }
}

#[cfg(all(
    target_arch = "x86_64",
    target_os = "linux",
    feature = "pku",
    not(miri)
))]
pub(crate) use pkru::{os_enabled as pkru_os_enabled, read as read_pkru, write as write_pkru};

/// Whether the PKRU backend was compiled in at all.
pub(crate) const PKRU_COMPILED: bool = cfg!(all(
    target_arch = "x86_64",
    target_os = "linux",
    feature = "pku",
    not(miri)
));

/// Copy `len` bytes from `src` to `dest`, lowest address first.
///
/// # Safety
///
/// `src..src+len` must be readable and `dest..dest+len` writable under the
/// domain active at the time of the call. Overlap is allowed and follows
/// forward byte order.
#[cfg(all(target_arch = "x86_64", not(miri)))]
#[inline(always)]
pub(crate) unsafe fn bulk_copy_forward(dest: *mut u8, src: *const u8, len: usize) {
    std::arch::asm!(
        "rep movsb",
        inout("rcx") len => _,
        inout("rdi") dest => _,
        inout("rsi") src => _,
        options(nostack, preserves_flags),
    );
}

/// Copy `len` bytes from `src` to `dest`, lowest address first.
///
/// # Safety
///
/// See the x86_64 variant.
#[cfg(not(all(target_arch = "x86_64", not(miri))))]
#[inline(always)]
pub(crate) unsafe fn bulk_copy_forward(dest: *mut u8, src: *const u8, len: usize) {
    for i in 0..len {
        std::ptr::write_volatile(dest.add(i), std::ptr::read_volatile(src.add(i)));
    }
}

/// Offset of the first NUL in `ptr..ptr+len`.
///
/// # Safety
///
/// `ptr..ptr+len` must be readable under the active domain.
#[inline(always)]
pub(crate) unsafe fn scan_nul(ptr: *const u8, len: usize) -> Option<usize> {
    if len == 0 {
        return None;
    }
    let hit = libc::memchr(ptr as *const libc::c_void, 0, len) as *const u8;
    if hit.is_null() {
        None
    } else {
        Some(hit.offset_from(ptr) as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_copy_disjoint() {
        let src = *b"protection";
        let mut dest = [0u8; 10];
        unsafe { bulk_copy_forward(dest.as_mut_ptr(), src.as_ptr(), src.len()) };
        assert_eq!(&dest, b"protection");
    }

    #[test]
    fn test_bulk_copy_zero_length_touches_nothing() {
        let src = [7u8; 4];
        let mut dest = [1u8; 4];
        unsafe { bulk_copy_forward(dest.as_mut_ptr(), src.as_ptr(), 0) };
        assert_eq!(dest, [1u8; 4]);
    }

    #[test]
    fn test_scan_nul() {
        let text = b"abc\0def";
        assert_eq!(unsafe { scan_nul(text.as_ptr(), text.len()) }, Some(3));
        assert_eq!(unsafe { scan_nul(text.as_ptr(), 3) }, None);
        assert_eq!(unsafe { scan_nul(text.as_ptr(), 0) }, None);
    }
}
