use mpkbox_domain::DomainError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HostCallError {
    #[error("host-call made outside of a sandbox context")]
    NoActiveContext,

    #[error(transparent)]
    Region(#[from] DomainError),

    #[error("string at {addr:#x} is not NUL-terminated before its region ends")]
    Unterminated { addr: usize },

    #[error("string result is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("module already delivered a result this turn")]
    AlreadyDelivered,

    #[error("expected a {expected} result, module delivered {found}")]
    UnexpectedResult {
        expected: &'static str,
        found: &'static str,
    },

    #[error("failed to map sandbox heap: {0}")]
    Heap(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HostCallError>;
