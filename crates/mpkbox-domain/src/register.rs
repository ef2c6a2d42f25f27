//! Domain register accessor.
//!
//! The register is per-thread state. Two backends implement it:
//!
//! - `Soft`: an emulated PKRU image in a thread local. Always available; it
//!   enforces nothing in hardware but follows exactly the same save, widen
//!   and restore protocol, which is what the rest of the crate relies on.
//! - `Pkru`: the x86_64 PKRU register (feature `pku`, Linux only).
//!
//! The backend is chosen once per process with [`install_backend`]. Until
//! then every thread uses `Soft`.

use std::cell::Cell;
use std::sync::atomic::{compiler_fence, Ordering};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{DomainError, Result};
use crate::id::DomainId;
use crate::raw;

/// Register implementation in use by the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Soft,
    Pkru,
}

/// What the process asked for at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Hardware when available, otherwise `Soft`.
    #[default]
    Auto,
    Soft,
    /// Hardware or fail startup.
    Pkru,
}

impl Backend {
    /// Resolve a preference against what this build and this CPU support.
    pub fn detect(preference: BackendPreference) -> Result<Self> {
        match preference {
            BackendPreference::Soft => Ok(Backend::Soft),
            BackendPreference::Pkru => match pkru_support() {
                Ok(()) => Ok(Backend::Pkru),
                Err(reason) => Err(DomainError::Unsupported(reason)),
            },
            BackendPreference::Auto => match pkru_support() {
                Ok(()) => Ok(Backend::Pkru),
                Err(reason) => {
                    warn!(reason, "Protection keys unavailable, using soft domain register");
                    Ok(Backend::Soft)
                }
            },
        }
    }

    pub fn is_hardware(self) -> bool {
        matches!(self, Backend::Pkru)
    }
}

/// `Ok` when the PKRU backend can be used, otherwise the reason it cannot.
pub fn pkru_support() -> std::result::Result<(), &'static str> {
    if !raw::PKRU_COMPILED {
        return Err("built without the `pku` feature or not an x86_64 Linux target");
    }
    #[cfg(all(
        target_arch = "x86_64",
        target_os = "linux",
        feature = "pku",
        not(miri)
    ))]
    {
        if !raw::pkru_os_enabled() {
            return Err("CPU or kernel does not enable PKRU (OSPKE clear)");
        }
    }
    Ok(())
}

static BACKEND: OnceLock<Backend> = OnceLock::new();

thread_local! {
    /// Emulated register image for the `Soft` backend.
    static SOFT_REGISTER: Cell<u32> = const { Cell::new(DomainId::HOST.register_value()) };
}

/// Select the register backend for the whole process.
///
/// Installing the same backend twice is a no-op. Installing `Pkru` moves the
/// calling thread into [`DomainId::HOST`], since the kernel's initial PKRU
/// image is not one this crate produces. `Pkru` is refused, and nothing is
/// installed, when [`pkru_support`] reports it unusable.
pub fn install_backend(backend: Backend) -> Result<()> {
    if backend == Backend::Pkru {
        pkru_support().map_err(DomainError::Unsupported)?;
    }
    let installed = *BACKEND.get_or_init(|| backend);
    if installed != backend {
        return Err(DomainError::BackendAlreadyInstalled(installed));
    }
    if backend == Backend::Pkru {
        // SAFETY: HOST keeps key 0 open, so the thread's stack and the
        // runtime's memory remain accessible.
        unsafe { write_register(DomainId::HOST.register_value()) };
    }
    info!(?backend, "Domain register backend installed");
    Ok(())
}

/// Backend in use; `Soft` until one is installed.
#[inline]
pub fn backend() -> Backend {
    BACKEND.get().copied().unwrap_or(Backend::Soft)
}

/// Raw register image of the calling thread.
#[inline(always)]
pub(crate) fn read_register() -> u32 {
    match backend() {
        Backend::Soft => SOFT_REGISTER.with(Cell::get),
        #[cfg(all(
            target_arch = "x86_64",
            target_os = "linux",
            feature = "pku",
            not(miri)
        ))]
        // SAFETY: the backend is only installed after OSPKE was checked.
        Backend::Pkru => unsafe { raw::read_pkru() },
        #[cfg(not(all(
            target_arch = "x86_64",
            target_os = "linux",
            feature = "pku",
            not(miri)
        )))]
        Backend::Pkru => unreachable!("PKRU backend is never installed in this build"),
    }
}

/// Install a raw register image for the calling thread.
///
/// # Safety
///
/// The image must keep every page the thread will touch before the next
/// write accessible. Images produced by [`DomainId::register_value`] keep
/// key 0 open and satisfy this for runtime-owned memory.
#[inline(always)]
pub(crate) unsafe fn write_register(value: u32) {
    match backend() {
        Backend::Soft => {
            compiler_fence(Ordering::SeqCst);
            SOFT_REGISTER.with(|r| r.set(value));
            compiler_fence(Ordering::SeqCst);
        }
        #[cfg(all(
            target_arch = "x86_64",
            target_os = "linux",
            feature = "pku",
            not(miri)
        ))]
        Backend::Pkru => raw::write_pkru(value),
        #[cfg(not(all(
            target_arch = "x86_64",
            target_os = "linux",
            feature = "pku",
            not(miri)
        )))]
        Backend::Pkru => unreachable!("PKRU backend is never installed in this build"),
    }
}

/// Domain active in the calling thread.
pub fn get_current_domain() -> DomainId {
    let value = read_register();
    match DomainId::from_register_value(value) {
        Some(domain) => domain,
        None => fatal_configuration_error(format_args!(
            "domain register holds foreign image {value:#010x}"
        )),
    }
}

/// Install `domain` in the calling thread and return the domain it replaced.
///
/// The change is a single register write. Installing [`DomainId::ALL_MEMORY`]
/// here is legal but leaves the thread unrestricted until the next call;
/// prefer [`DomainScope`](crate::DomainScope) and the copy primitive.
pub fn set_domain(domain: DomainId) -> DomainId {
    let previous = get_current_domain();
    // SAFETY: every DomainId image keeps key 0 open.
    unsafe { write_register(domain.register_value()) };
    crate::profile_count!(domain_switches);
    previous
}

/// Raw control surface: change the domain by numeric id, returning the
/// previous id.
///
/// An identifier outside the domain range is a configuration error the
/// calling context cannot recover from, so the process is aborted.
pub fn change_domain(domain_id: u32) -> u32 {
    match DomainId::new(domain_id) {
        Ok(domain) => set_domain(domain).raw(),
        Err(e) => fatal_configuration_error(format_args!("{e}")),
    }
}

/// Abort after a configuration error: the isolation state is unknown and
/// unwinding would run destructors under it.
#[cold]
pub fn fatal_configuration_error(detail: std::fmt::Arguments<'_>) -> ! {
    error!(%detail, "Fatal protection domain configuration error, aborting");
    std::process::abort()
}
