//! Host-calls a module uses to hand its result to the host.
//!
//! Both calls are one-way: the module gets no status back. Every pointer is
//! validated against the active context's registered regions before the
//! copy primitive reads a single byte, and the outcome (result or error) is
//! recorded in the thread's result slot for [`SandboxContext::run`] to
//! return.
//!
//! [`SandboxContext::run`]: crate::SandboxContext::run

use libc::c_char;
use mpkbox_domain::{
    scoped_cross_domain_copy, scoped_cross_domain_strnlen, BoundedRegion, CopyRequest,
    RegionRegistry,
};
use tracing::warn;

use crate::context::with_active;
use crate::error::{HostCallError, Result};
use crate::result::{self, ModuleResult};

/// Copy the bounded source into a fresh host buffer.
fn pull(src: BoundedRegion<'_>) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; src.len()];
    scoped_cross_domain_copy(CopyRequest::whole((&mut buf[..]).into(), src)?);
    Ok(buf)
}

fn read_string(registry: &RegionRegistry, text: *const u8) -> Result<String> {
    let region = registry.bound_to_end(text)?;
    let len = scoped_cross_domain_strnlen(&region).ok_or(HostCallError::Unterminated {
        addr: text as usize,
    })?;
    let bytes = pull(region.truncate(len)?)?;
    Ok(String::from_utf8(bytes)?)
}

fn read_bytes(registry: &RegionRegistry, bytes: *const u8, length: u32) -> Result<Vec<u8>> {
    let region = registry.bound(bytes, length as usize)?;
    pull(region)
}

/// Validate, copy and record one delivery.
fn deliver(call: &'static str, read: impl FnOnce(&RegionRegistry) -> Result<ModuleResult>) {
    let outcome = match with_active(|registry| {
        if result::is_delivered() {
            return Err(HostCallError::AlreadyDelivered);
        }
        Ok(read(registry))
    }) {
        None => Err(HostCallError::NoActiveContext),
        Some(outcome) => outcome,
    };

    let recorded = outcome.and_then(|read_outcome| {
        if let Err(e) = &read_outcome {
            warn!(call, error = %e, "Rejected module result");
        }
        result::record(read_outcome)
    });
    if let Err(e) = recorded {
        warn!(call, error = %e, "Host-call ignored");
    }
}

/// Deliver a NUL-terminated UTF-8 string from module memory.
pub fn deliver_string_result(text: *const u8) {
    deliver("server_module_string_result", |registry| {
        read_string(registry, text).map(ModuleResult::String)
    });
}

/// Deliver `length` bytes from module memory.
pub fn deliver_bytearray_result(bytes: *const u8, length: u32) {
    deliver("server_module_bytearr_result", |registry| {
        read_bytes(registry, bytes, length).map(ModuleResult::ByteArray)
    });
}

// ============================================================================
// C ABI
// ============================================================================

/// `void server_module_string_result(const char* string_resp);`
#[no_mangle]
pub extern "C" fn server_module_string_result(text_pointer: *const c_char) {
    deliver_string_result(text_pointer as *const u8);
}

/// `void server_module_bytearr_result(unsigned char* byte_arr, uint32_t bytes);`
#[no_mangle]
pub extern "C" fn server_module_bytearr_result(byte_pointer: *const u8, byte_count: u32) {
    deliver_bytearray_result(byte_pointer, byte_count);
}
