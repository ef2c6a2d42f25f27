//! Sandbox contexts and the per-thread active context.
//!
//! A [`SandboxContext`] owns one module's heap, the registry of memory the
//! module may hand to a host-call, and the domain it runs in. While
//! [`SandboxContext::run`] is on the stack its registry is the thread's
//! active context; host-calls validate every pointer against it.

use std::cell::RefCell;
use std::rc::Rc;

use mpkbox_domain::{
    backend, Access, DomainError, DomainId, DomainScope, ProtectionKey, RegionRegistry,
};
use tracing::{debug, info};

use crate::error::Result;
use crate::heap::{SandboxHeap, DEFAULT_HEAP_SIZE};
use crate::result::{self, ModuleResult};

/// Domain modules run in unless configured otherwise.
pub const DEFAULT_MODULE_DOMAIN: u32 = 3;

// ============================================================================
// Active context
// ============================================================================

thread_local! {
    static ACTIVE: RefCell<Option<Rc<RegionRegistry>>> = const { RefCell::new(None) };
}

/// Run `f` against the active context's registry, if there is one.
pub(crate) fn with_active<R>(f: impl FnOnce(&RegionRegistry) -> R) -> Option<R> {
    let registry = ACTIVE.with(|active| active.borrow().clone())?;
    Some(f(&registry))
}

/// Installs a registry as the active context and an empty result slot for
/// the turn. Both are put back as they were on drop, so contexts nest.
struct ActiveGuard {
    previous: Option<Rc<RegionRegistry>>,
    previous_result: Option<Result<ModuleResult>>,
}

impl ActiveGuard {
    fn install(registry: Rc<RegionRegistry>) -> Self {
        let previous = ACTIVE.with(|active| active.borrow_mut().replace(registry));
        let previous_result = result::take();
        Self {
            previous,
            previous_result,
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        ACTIVE.with(|active| *active.borrow_mut() = previous);
        result::restore(self.previous_result.take());
    }
}

// ============================================================================
// Module environment
// ============================================================================

/// What a module sees while it runs: its own heap and its arguments.
pub struct ModuleEnv<'a> {
    heap: &'a mut [u8],
    args: &'a [String],
    domain: DomainId,
}

impl<'a> ModuleEnv<'a> {
    pub fn heap(&mut self) -> &mut [u8] {
        self.heap
    }

    /// Argument vector; element 0 is the program name.
    pub fn args(&self) -> &[String] {
        self.args
    }

    pub fn domain(&self) -> DomainId {
        self.domain
    }

    /// Address of `offset` inside the heap, or `None` past its end.
    pub fn heap_ptr(&self, offset: usize) -> Option<*const u8> {
        (offset <= self.heap.len()).then(|| self.heap.as_ptr().wrapping_add(offset))
    }

    /// Write `bytes` at `offset` and return where they landed.
    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> Option<*const u8> {
        let end = offset.checked_add(bytes.len())?;
        self.heap.get_mut(offset..end)?.copy_from_slice(bytes);
        self.heap_ptr(offset)
    }

    /// Write `text` plus a NUL terminator at `offset`, C-string style.
    pub fn write_cstr(&mut self, offset: usize, text: &str) -> Option<*const libc::c_char> {
        let end = offset.checked_add(text.len())?;
        *self.heap.get_mut(end)? = 0;
        self.write_bytes(offset, text.as_bytes())
            .map(|ptr| ptr as *const libc::c_char)
    }
}

// ============================================================================
// Sandbox context
// ============================================================================

/// One module's isolation context.
#[derive(Debug)]
pub struct SandboxContext {
    domain: DomainId,
    heap: SandboxHeap,
    registry: Rc<RegionRegistry>,
    // Freed after the heap mapping is gone; field order matters.
    key: Option<ProtectionKey>,
}

impl SandboxContext {
    pub fn builder() -> SandboxContextBuilder {
        SandboxContextBuilder::default()
    }

    pub fn domain(&self) -> DomainId {
        self.domain
    }

    pub fn heap(&self) -> &SandboxHeap {
        &self.heap
    }

    pub fn registry(&self) -> &RegionRegistry {
        &self.registry
    }

    /// Whether the heap is tagged with a hardware protection key.
    pub fn is_hardware_protected(&self) -> bool {
        self.key.is_some()
    }

    /// Run one module turn.
    ///
    /// Clears the result slot, makes this context the thread's active
    /// context, enters the module's domain, calls `module`, then restores
    /// the caller's domain and returns what the module delivered. A module
    /// that delivers nothing yields [`ModuleResult::None`]; a delivery that
    /// failed validation yields its error.
    pub fn run<F>(&mut self, args: &[String], module: F) -> Result<ModuleResult>
    where
        F: FnOnce(&mut ModuleEnv<'_>),
    {
        let _active = ActiveGuard::install(Rc::clone(&self.registry));
        debug!(domain = %self.domain, argc = args.len(), "Entering module");

        {
            let _scope = DomainScope::enter(self.domain)?;
            let mut env = ModuleEnv {
                heap: self.heap.as_mut_slice(),
                args,
                domain: self.domain,
            };
            module(&mut env);
        }

        let outcome = result::take().unwrap_or(Ok(ModuleResult::None));
        debug!(
            domain = %self.domain,
            result = outcome.as_ref().map(ModuleResult::kind).unwrap_or("failed"),
            "Module returned"
        );
        outcome
    }
}

/// Builder for [`SandboxContext`].
#[derive(Debug)]
pub struct SandboxContextBuilder {
    domain: u32,
    heap_size: usize,
    protection_key: bool,
    extra: Vec<(usize, usize, Access)>,
}

impl Default for SandboxContextBuilder {
    fn default() -> Self {
        Self {
            domain: DEFAULT_MODULE_DOMAIN,
            heap_size: DEFAULT_HEAP_SIZE,
            protection_key: false,
            extra: Vec::new(),
        }
    }
}

impl SandboxContextBuilder {
    /// Domain id the module runs in, `2..16`. Ignored when a protection key
    /// is allocated: the key decides the domain.
    pub fn domain(mut self, domain: u32) -> Self {
        self.domain = domain;
        self
    }

    pub fn heap_size(mut self, size: usize) -> Self {
        self.heap_size = size;
        self
    }

    /// Allocate a protection key for the heap. Needs the PKRU backend.
    pub fn protection_key(mut self, enabled: bool) -> Self {
        self.protection_key = enabled;
        self
    }

    /// Register extra module-owned memory (statics, a stack) that host-calls
    /// may read from.
    ///
    /// # Safety
    ///
    /// The range must stay mapped for the lifetime of the built context.
    pub unsafe fn region(mut self, base: *const u8, len: usize, access: Access) -> Self {
        self.extra.push((base as usize, len, access));
        self
    }

    pub fn build(self) -> Result<SandboxContext> {
        let mut heap = SandboxHeap::new(self.heap_size)?;

        let key = if self.protection_key {
            if !backend().is_hardware() {
                return Err(DomainError::Unsupported(
                    "protection keys need the pkru backend installed",
                )
                .into());
            }
            let key = ProtectionKey::alloc()?;
            heap.protect(&key)?;
            Some(key)
        } else {
            None
        };

        let domain = match &key {
            Some(key) => key.domain(),
            None => DomainId::new(self.domain)?,
        };
        if domain.is_all_memory() {
            return Err(DomainError::WideningNotPermitted.into());
        }
        if domain == DomainId::HOST {
            return Err(DomainError::HostDomainReserved { domain }.into());
        }

        // SAFETY: the heap lives as long as the registry (both owned by the
        // context); extra regions are guaranteed by `region`'s contract.
        let mut builder = RegionRegistry::builder();
        builder = unsafe {
            builder.register(heap.as_ptr(), heap.len(), domain, Access::ReadWrite)?
        };
        for (base, len, access) in self.extra {
            builder = unsafe { builder.register(base as *const u8, len, domain, access)? };
        }

        info!(
            %domain,
            heap_size = heap.len(),
            hardware = key.is_some(),
            "Sandbox context ready"
        );
        Ok(SandboxContext {
            domain,
            heap,
            registry: Rc::new(builder.build()),
            key,
        })
    }
}
