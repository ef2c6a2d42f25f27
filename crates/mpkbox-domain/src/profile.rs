//! Copy-window profiling counters.
//!
//! Zero-overhead when profiling is off. Whether it is on is a configuration
//! decision (`profile.enabled`, which `MPKBOX_PROFILE` overrides); this module
//! only acts on the result.
//! When enabled, the copy primitive bumps global AtomicU64 counters after
//! each window has closed, never inside it. On process exit (atexit) a JSON
//! snapshot is written to `/tmp/mpkbox-profile-<pid>.json`.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use serde::Serialize;

/// Master enable flag, checked by the profile_count! macro.
pub static PROFILE_ENABLED: AtomicBool = AtomicBool::new(false);

/// Global counters, always present in .bss.
pub static PROFILE: DomainProfile = DomainProfile::new();

#[repr(C)]
pub struct DomainProfile {
    // ── Windows ──
    pub windows_opened: AtomicU64,
    pub nested_windows: AtomicU64, // opened while already all-memory
    pub zero_length_copies: AtomicU64,

    // ── Traffic ──
    pub copies: AtomicU64,
    pub bytes_copied: AtomicU64,
    pub scans: AtomicU64, // NUL scans for string host-calls

    // ── Register ──
    pub domain_switches: AtomicU64, // set_domain and DomainScope::enter

    pub start_time_ns: AtomicU64,
}

impl DomainProfile {
    pub const fn new() -> Self {
        Self {
            windows_opened: AtomicU64::new(0),
            nested_windows: AtomicU64::new(0),
            zero_length_copies: AtomicU64::new(0),
            copies: AtomicU64::new(0),
            bytes_copied: AtomicU64::new(0),
            scans: AtomicU64::new(0),
            domain_switches: AtomicU64::new(0),
            start_time_ns: AtomicU64::new(0),
        }
    }

    /// Relaxed snapshot of every counter.
    pub fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            pid: std::process::id(),
            windows_opened: self.windows_opened.load(Ordering::Relaxed),
            nested_windows: self.nested_windows.load(Ordering::Relaxed),
            zero_length_copies: self.zero_length_copies.load(Ordering::Relaxed),
            copies: self.copies.load(Ordering::Relaxed),
            bytes_copied: self.bytes_copied.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            domain_switches: self.domain_switches.load(Ordering::Relaxed),
            duration_ms: now_ns()
                .saturating_sub(self.start_time_ns.load(Ordering::Relaxed))
                / 1_000_000,
        }
    }
}

impl Default for DomainProfile {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ProfileSnapshot {
    pub pid: u32,
    pub windows_opened: u64,
    pub nested_windows: u64,
    pub zero_length_copies: u64,
    pub copies: u64,
    pub bytes_copied: u64,
    pub scans: u64,
    pub domain_switches: u64,
    pub duration_ms: u64,
}

/// Increment a profile counter if profiling is enabled.
#[macro_export]
macro_rules! profile_count {
    ($field:ident) => {
        $crate::profile_add!($field, 1)
    };
}

/// Add to a profile counter if profiling is enabled.
#[macro_export]
macro_rules! profile_add {
    ($field:ident, $n:expr) => {
        if $crate::profile::PROFILE_ENABLED.load(std::sync::atomic::Ordering::Relaxed) {
            $crate::profile::PROFILE
                .$field
                .fetch_add($n as u64, std::sync::atomic::Ordering::Relaxed);
        }
    };
}

fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}

/// Turn profiling on if `enabled`; the environment is not consulted.
///
/// Returns whether profiling ended up on. The exit dump is registered once.
pub fn init_profile(enabled: bool) -> bool {
    if !enabled {
        return PROFILE_ENABLED.load(Ordering::Acquire);
    }

    if PROFILE_ENABLED.swap(true, Ordering::AcqRel) {
        return true;
    }
    PROFILE.start_time_ns.store(now_ns(), Ordering::Relaxed);

    unsafe {
        libc::atexit(profile_atexit_handler);
    }
    true
}

extern "C" fn profile_atexit_handler() {
    if !PROFILE_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    dump_profile_json();
}

/// Path of the exit dump for this process.
pub fn profile_path() -> std::path::PathBuf {
    std::path::PathBuf::from(format!("/tmp/mpkbox-profile-{}.json", std::process::id()))
}

fn dump_profile_json() {
    let snapshot = PROFILE.snapshot();
    let path = profile_path();

    let Ok(json) = serde_json::to_string_pretty(&snapshot) else {
        return;
    };
    let _ = std::fs::write(&path, json);

    let summary = format!(
        "\n[mpkbox-profile] PID {} | {:.1}s | {} windows ({} nested, {} empty) | {} bytes | wrote {}\n",
        snapshot.pid,
        snapshot.duration_ms as f64 / 1000.0,
        snapshot.windows_opened,
        snapshot.nested_windows,
        snapshot.zero_length_copies,
        snapshot.bytes_copied,
        path.display(),
    );
    unsafe {
        libc::write(2, summary.as_ptr() as *const libc::c_void, summary.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_serializes() {
        let profile = DomainProfile::new();
        profile.copies.store(3, Ordering::Relaxed);
        profile.bytes_copied.store(42, Ordering::Relaxed);
        let json = serde_json::to_value(profile.snapshot()).unwrap();
        assert_eq!(json["copies"], 3);
        assert_eq!(json["bytes_copied"], 42);
        assert_eq!(json["pid"], std::process::id());
    }

    #[test]
    fn test_disabled_config_wins_over_environment() {
        std::env::set_var("MPKBOX_PROFILE", "1");
        assert!(!init_profile(false));
        assert!(!PROFILE_ENABLED.load(Ordering::Relaxed));
        std::env::remove_var("MPKBOX_PROFILE");
    }
}
