//! Per-thread result slot.
//!
//! A module delivers at most one result per turn. The slot is a thread local
//! because the module runs synchronously on the thread that invoked it.

use std::cell::RefCell;

use crate::error::{HostCallError, Result};

/// Host-owned copy of whatever the module handed back.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ModuleResult {
    #[default]
    None,
    String(String),
    ByteArray(Vec<u8>),
}

impl ModuleResult {
    pub fn kind(&self) -> &'static str {
        match self {
            ModuleResult::None => "no",
            ModuleResult::String(_) => "string",
            ModuleResult::ByteArray(_) => "byte array",
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, ModuleResult::None)
    }

    pub fn into_string(self) -> Result<String> {
        match self {
            ModuleResult::String(s) => Ok(s),
            other => Err(HostCallError::UnexpectedResult {
                expected: "string",
                found: other.kind(),
            }),
        }
    }

    pub fn into_bytes(self) -> Result<Vec<u8>> {
        match self {
            ModuleResult::ByteArray(b) => Ok(b),
            other => Err(HostCallError::UnexpectedResult {
                expected: "byte array",
                found: other.kind(),
            }),
        }
    }
}

thread_local! {
    /// Outcome of the current turn: `None` until the module delivers.
    static CURRENT_RESULT: RefCell<Option<Result<ModuleResult>>> = const { RefCell::new(None) };
}

/// Record the outcome of the first delivery of this turn.
pub(crate) fn record(outcome: Result<ModuleResult>) -> Result<()> {
    CURRENT_RESULT.with(|slot| {
        let mut slot = slot.borrow_mut();
        if slot.is_some() {
            return Err(HostCallError::AlreadyDelivered);
        }
        *slot = Some(outcome);
        Ok(())
    })
}

pub(crate) fn is_delivered() -> bool {
    CURRENT_RESULT.with(|slot| slot.borrow().is_some())
}

/// Empty the slot, returning what was there.
pub(crate) fn take() -> Option<Result<ModuleResult>> {
    CURRENT_RESULT.with(|slot| slot.borrow_mut().take())
}

/// Put back a slot saved by [`take`], discarding the current content.
pub(crate) fn restore(saved: Option<Result<ModuleResult>>) {
    CURRENT_RESULT.with(|slot| *slot.borrow_mut() = saved);
}
