//! `mpkbox selftest`: exercise the copy primitive and the host-call boundary
//! against the installed backend.

use anyhow::{bail, ensure, Context, Result};
use mpkbox_domain::{
    get_current_domain, scoped_cross_domain_copy, Access, CopyRequest, DomainId, DomainScope,
    RegionRegistry, MAX_DOMAINS,
};
use mpkbox_hostcall::{
    server_module_bytearr_result, server_module_string_result, HostCallError, ModuleResult,
    SandboxContext,
};
use tracing::info;

type Check = fn() -> Result<()>;

const CHECKS: &[(&str, Check)] = &[
    ("restores every start domain", restoration),
    ("copies HELLO from domain 3", hello),
    ("forward overlap", forward_overlap),
    ("zero-length copy", zero_length),
    ("string host-call", string_hostcall),
    ("byte-array host-call", bytearray_hostcall),
    ("rejects foreign pointer", foreign_pointer),
    ("threads keep their own domain", threads),
];

pub fn cmd_selftest() -> Result<()> {
    let mut failed = 0usize;
    for (name, check) in CHECKS {
        match check() {
            Ok(()) => println!("  ✓ {name}"),
            Err(e) => {
                failed += 1;
                println!("  ✗ {name}: {e:#}");
            }
        }
    }
    info!(checks = CHECKS.len(), failed, "Self-test finished");
    if failed > 0 {
        bail!("{failed} of {} checks failed", CHECKS.len());
    }
    println!("\n✓ All {} checks passed", CHECKS.len());
    Ok(())
}

fn copy_whole(dest: &mut [u8], src: &[u8]) -> Result<()> {
    scoped_cross_domain_copy(CopyRequest::whole(dest.into(), src.into())?);
    Ok(())
}

fn restoration() -> Result<()> {
    for raw in 1..MAX_DOMAINS {
        let domain = DomainId::new(raw)?;
        let _scope = DomainScope::enter(domain)?;
        let mut dest = [0u8; 32];
        copy_whole(&mut dest, &[7u8; 32])?;
        ensure!(
            get_current_domain() == domain,
            "domain {domain} became {}",
            get_current_domain()
        );
    }
    Ok(())
}

fn hello() -> Result<()> {
    let _scope = DomainScope::enter(DomainId::new(3)?)?;
    let mut dest = [0u8; 5];
    copy_whole(&mut dest, b"HELLO")?;
    ensure!(&dest == b"HELLO", "destination holds {dest:?}");
    ensure!(get_current_domain().raw() == 3, "domain not restored");
    Ok(())
}

fn forward_overlap() -> Result<()> {
    let mut buf = *b"..ABCDEFGH";
    let base = buf.as_mut_ptr();
    // SAFETY: `buf` outlives the registry.
    let registry = unsafe {
        RegionRegistry::builder()
            .register(base, buf.len(), DomainId::new(3)?, Access::ReadWrite)?
            .build()
    };
    let dest = registry.bound_mut(base, 8)?;
    let src = registry.bound(base.wrapping_add(2), 8)?;
    scoped_cross_domain_copy(CopyRequest::new(dest, src, 8)?);
    drop(registry);
    ensure!(&buf == b"ABCDEFGHGH", "got {:?}", String::from_utf8_lossy(&buf));
    Ok(())
}

fn zero_length() -> Result<()> {
    let before = get_current_domain();
    let mut dest = *b"keep";
    let src: &[u8] = b"xxxx";
    scoped_cross_domain_copy(CopyRequest::new((&mut dest[..]).into(), src.into(), 0)?);
    ensure!(&dest == b"keep", "zero-length copy wrote memory");
    ensure!(get_current_domain() == before, "domain not restored");
    Ok(())
}

fn string_hostcall() -> Result<()> {
    let mut ctx = SandboxContext::builder().heap_size(4096).build()?;
    let result = ctx.run(&["selftest".to_string()], |env| {
        if let Some(ptr) = env.write_cstr(16, "round trip") {
            server_module_string_result(ptr);
        }
    })?;
    ensure!(
        result == ModuleResult::String("round trip".into()),
        "got {result:?}"
    );
    Ok(())
}

fn bytearray_hostcall() -> Result<()> {
    let mut ctx = SandboxContext::builder().heap_size(4096).build()?;
    let payload = [0u8, 1, 2, 0xFF, 0];
    let result = ctx.run(&["selftest".to_string()], |env| {
        if let Some(ptr) = env.write_bytes(0, &payload) {
            server_module_bytearr_result(ptr, payload.len() as u32);
        }
    })?;
    ensure!(result.into_bytes()? == payload, "payload mismatch");
    Ok(())
}

fn foreign_pointer() -> Result<()> {
    let secret = *b"host secret\0";
    let mut ctx = SandboxContext::builder().heap_size(4096).build()?;
    let outcome = ctx.run(&["selftest".to_string()], |_| {
        server_module_string_result(secret.as_ptr() as *const std::ffi::c_char);
    });
    match outcome {
        Err(HostCallError::Region(_)) => Ok(()),
        other => bail!("foreign pointer accepted: {other:?}"),
    }
}

fn threads() -> Result<()> {
    let handles: Vec<_> = (2..6u32)
        .map(|raw| {
            std::thread::spawn(move || -> Result<()> {
                let domain = DomainId::new(raw)?;
                let _scope = DomainScope::enter(domain)?;
                let mut dest = [0u8; 64];
                for _ in 0..1000 {
                    copy_whole(&mut dest, &[raw as u8; 64])?;
                    ensure!(get_current_domain() == domain, "thread in {domain} drifted");
                }
                Ok(())
            })
        })
        .collect();
    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("worker thread panicked"))?
            .context("worker thread")?;
    }
    Ok(())
}
