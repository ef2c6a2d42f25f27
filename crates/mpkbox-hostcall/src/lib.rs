//! # mpkbox-hostcall
//!
//! The boundary a sandboxed module crosses to hand a result to its host.
//!
//! ```
//! use mpkbox_hostcall::{server_module_string_result, ModuleResult, SandboxContext};
//!
//! let mut ctx = SandboxContext::builder().domain(3).build().unwrap();
//! let args = vec!["echo".to_string(), "hi".to_string()];
//! let result = ctx
//!     .run(&args, |env| {
//!         let text = env.args()[1].clone();
//!         let ptr = env.write_cstr(0, &text).unwrap();
//!         server_module_string_result(ptr);
//!     })
//!     .unwrap();
//! assert_eq!(result, ModuleResult::String("hi".into()));
//! ```

pub mod abi;
pub mod context;
pub mod error;
pub mod heap;
pub mod result;

pub use abi::{
    deliver_bytearray_result, deliver_string_result, server_module_bytearr_result,
    server_module_string_result,
};
pub use context::{ModuleEnv, SandboxContext, SandboxContextBuilder, DEFAULT_MODULE_DOMAIN};
pub use error::{HostCallError, Result};
pub use heap::{page_size, SandboxHeap, DEFAULT_HEAP_SIZE};
pub use result::ModuleResult;
