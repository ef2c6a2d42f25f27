//! Built-in demo modules.
//!
//! They behave like small compiled modules: they only touch their own heap
//! and hand results back through the C host-call ABI.

use mpkbox_hostcall::{server_module_string_result, ModuleEnv};
use tracing::warn;

pub type Module = fn(&mut ModuleEnv<'_>);

pub const MODULES: &[(&str, Module)] = &[("echo", echo), ("fib", fib)];

pub fn lookup(name: &str) -> Option<Module> {
    MODULES
        .iter()
        .find(|(module, _)| *module == name)
        .map(|(_, module)| *module)
}

pub fn names() -> Vec<&'static str> {
    MODULES.iter().map(|(name, _)| *name).collect()
}

/// Delivers its single argument unchanged.
fn echo(env: &mut ModuleEnv<'_>) {
    if env.args().len() != 2 {
        warn!(argc = env.args().len(), "echo: exactly two arguments expected");
        return;
    }
    let text = env.args()[1].clone();
    match env.write_cstr(0, &text) {
        Some(ptr) => server_module_string_result(ptr),
        None => warn!(len = text.len(), "echo: argument does not fit in heap"),
    }
}

/// Delivers the n-th Fibonacci number (`fib(1) = fib(2) = 1`) as decimal
/// text followed by a newline. Arithmetic wraps at 32 bits.
fn fib(env: &mut ModuleEnv<'_>) {
    if env.args().len() != 2 {
        warn!(argc = env.args().len(), "fib: exactly two arguments expected");
        return;
    }
    let n: u32 = match env.args()[1].trim().parse() {
        Ok(n) => n,
        Err(e) => {
            warn!(arg = %env.args()[1], error = %e, "fib: not a number");
            return;
        }
    };

    let output = format!("{}\n", fib_u32(n));
    if let Some(ptr) = env.write_cstr(0, &output) {
        server_module_string_result(ptr);
    }
}

fn fib_u32(n: u32) -> u32 {
    let (mut a, mut b) = (1u32, 1u32);
    for _ in 2..n {
        let next = a.wrapping_add(b);
        a = b;
        b = next;
    }
    b
}
