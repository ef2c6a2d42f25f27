//! Scoped domain guards.
//!
//! Both guards snapshot the raw register image on construction and write it
//! back on drop, so restoration is bit-for-bit and happens on every exit
//! path. Both are `!Send`: the register they restore belongs to the thread
//! that created them.

use std::marker::PhantomData;

use crate::error::{DomainError, Result};
use crate::id::DomainId;
use crate::register::{read_register, write_register};

/// The all-memory window around one bounded operation.
///
/// Only the copy primitive opens one; it is deliberately not public.
#[must_use = "the window closes as soon as the guard is dropped"]
pub(crate) struct DomainWindow {
    saved: u32,
    _thread_bound: PhantomData<*const ()>,
}

impl DomainWindow {
    #[inline(always)]
    pub(crate) fn open() -> Self {
        let saved = read_register();
        // SAFETY: the all-memory image disables nothing.
        unsafe { write_register(DomainId::ALL_MEMORY.register_value()) };
        Self {
            saved,
            _thread_bound: PhantomData,
        }
    }

    /// Opened while the thread was already in the all-memory domain.
    #[inline]
    pub(crate) fn is_nested(&self) -> bool {
        self.saved == DomainId::ALL_MEMORY.register_value()
    }
}

impl Drop for DomainWindow {
    #[inline(always)]
    fn drop(&mut self) {
        // SAFETY: `saved` is the image the thread ran under before the window.
        unsafe { write_register(self.saved) };
    }
}

/// Run the calling thread in a restricted domain until the guard drops.
///
/// This is how a host enters a module's domain before invoking it:
///
/// ```
/// use mpkbox_domain::{get_current_domain, DomainId, DomainScope};
///
/// let module = DomainId::new(3).unwrap();
/// {
///     let _scope = DomainScope::enter(module).unwrap();
///     assert_eq!(get_current_domain(), module);
/// }
/// assert_eq!(get_current_domain(), DomainId::HOST);
/// ```
#[must_use = "the previous domain is restored as soon as the guard is dropped"]
pub struct DomainScope {
    saved: u32,
    domain: DomainId,
    _thread_bound: PhantomData<*const ()>,
}

impl DomainScope {
    /// Enter `domain`. The all-memory domain is refused: it may only be held
    /// inside a copy window.
    pub fn enter(domain: DomainId) -> Result<Self> {
        if domain.is_all_memory() {
            return Err(DomainError::WideningNotPermitted);
        }
        let saved = read_register();
        // SAFETY: every DomainId image keeps key 0 open.
        unsafe { write_register(domain.register_value()) };
        crate::profile_count!(domain_switches);
        Ok(Self {
            saved,
            domain,
            _thread_bound: PhantomData,
        })
    }

    pub fn domain(&self) -> DomainId {
        self.domain
    }
}

impl Drop for DomainScope {
    fn drop(&mut self) {
        // SAFETY: `saved` is the image the thread ran under before `enter`.
        unsafe { write_register(self.saved) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::register::get_current_domain;

    #[test]
    fn test_window_widens_and_restores() {
        std::thread::spawn(|| {
            let _scope = DomainScope::enter(DomainId::new(4).unwrap()).unwrap();
            {
                let window = DomainWindow::open();
                assert!(!window.is_nested());
                assert_eq!(get_current_domain(), DomainId::ALL_MEMORY);
            }
            assert_eq!(get_current_domain().raw(), 4);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_nested_window_restores_outer() {
        std::thread::spawn(|| {
            let outer = DomainWindow::open();
            {
                let inner = DomainWindow::open();
                assert!(inner.is_nested());
            }
            assert_eq!(get_current_domain(), DomainId::ALL_MEMORY);
            drop(outer);
            assert_eq!(get_current_domain(), DomainId::HOST);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_scope_refuses_all_memory() {
        let err = DomainScope::enter(DomainId::ALL_MEMORY).err().unwrap();
        assert!(matches!(err, DomainError::WideningNotPermitted));
    }

    #[test]
    fn test_scope_restores_on_early_return() {
        fn run_and_bail(domain: DomainId) -> Result<()> {
            let _scope = DomainScope::enter(domain)?;
            Err(DomainError::Unsupported("bail"))
        }

        std::thread::spawn(|| {
            assert!(run_and_bail(DomainId::new(6).unwrap()).is_err());
            assert_eq!(get_current_domain(), DomainId::HOST);
        })
        .join()
        .unwrap();
    }

    #[test]
    fn test_nested_scopes_unwind_in_order() {
        std::thread::spawn(|| {
            let a = DomainScope::enter(DomainId::new(2).unwrap()).unwrap();
            let b = DomainScope::enter(DomainId::new(7).unwrap()).unwrap();
            assert_eq!(get_current_domain(), b.domain());
            drop(b);
            assert_eq!(get_current_domain(), a.domain());
            drop(a);
            assert_eq!(get_current_domain(), DomainId::HOST);
        })
        .join()
        .unwrap();
    }
}
