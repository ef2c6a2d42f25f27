//! Host-call boundary behaviour, driven through the C ABI entry points the
//! way a compiled module would call them.

use mpkbox_domain::{get_current_domain, Access, DomainError, DomainId};
use mpkbox_hostcall::{
    server_module_bytearr_result, server_module_string_result, HostCallError, ModuleResult,
    SandboxContext,
};

fn argv(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn on_fresh_thread<F: FnOnce() + Send + 'static>(f: F) {
    std::thread::spawn(f).join().unwrap();
}

#[test]
fn test_string_result_round_trip() {
    on_fresh_thread(|| {
        let mut ctx = SandboxContext::builder().build().unwrap();
        let result = ctx
            .run(&argv(&["echo", "hello world"]), |env| {
                let text = env.args()[1].clone();
                let ptr = env.write_cstr(128, &text).unwrap();
                server_module_string_result(ptr);
            })
            .unwrap();
        assert_eq!(result, ModuleResult::String("hello world".into()));
        assert_eq!(get_current_domain(), DomainId::HOST);
    });
}

#[test]
fn test_bytearray_result_round_trip() {
    on_fresh_thread(|| {
        let mut ctx = SandboxContext::builder().domain(7).build().unwrap();
        let payload: Vec<u8> = (0..=255u8).collect();
        let result = ctx
            .run(&argv(&["bytes"]), |env| {
                let ptr = env.write_bytes(0, &payload).unwrap();
                server_module_bytearr_result(ptr, payload.len() as u32);
            })
            .unwrap();
        assert_eq!(result.into_bytes().unwrap(), (0..=255u8).collect::<Vec<_>>());
    });
}

#[test]
fn test_empty_bytearray_is_a_result() {
    on_fresh_thread(|| {
        let mut ctx = SandboxContext::builder().build().unwrap();
        let result = ctx
            .run(&argv(&["empty"]), |env| {
                let ptr = env.heap_ptr(0).unwrap();
                server_module_bytearr_result(ptr, 0);
            })
            .unwrap();
        assert_eq!(result, ModuleResult::ByteArray(Vec::new()));
    });
}

#[test]
fn test_no_delivery_is_none() {
    on_fresh_thread(|| {
        let mut ctx = SandboxContext::builder().build().unwrap();
        let result = ctx.run(&argv(&["silent"]), |_| {}).unwrap();
        assert!(result.is_none());
        assert!(result.into_string().is_err());
    });
}

#[test]
fn test_foreign_pointer_rejected() {
    on_fresh_thread(|| {
        let mut ctx = SandboxContext::builder().build().unwrap();
        // Host stack memory: not registered with the context.
        let host_secret = *b"secret\0";
        let err = ctx
            .run(&argv(&["snoop"]), |_| {
                server_module_string_result(host_secret.as_ptr() as *const libc::c_char);
            })
            .unwrap_err();
        assert!(matches!(
            err,
            HostCallError::Region(DomainError::OutOfBounds { .. })
        ));
    });
}

#[test]
fn test_byte_range_past_heap_end_rejected() {
    on_fresh_thread(|| {
        let mut ctx = SandboxContext::builder().heap_size(64).build().unwrap();
        let heap_len = ctx.heap().len();
        let err = ctx
            .run(&argv(&["overrun"]), |env| {
                let ptr = env.heap_ptr(heap_len - 8).unwrap();
                server_module_bytearr_result(ptr, 16);
            })
            .unwrap_err();
        assert!(matches!(
            err,
            HostCallError::Region(DomainError::OutOfBounds { len: 16, .. })
        ));
    });
}

#[test]
fn test_null_pointer_rejected() {
    on_fresh_thread(|| {
        let mut ctx = SandboxContext::builder().build().unwrap();
        let err = ctx
            .run(&argv(&["null"]), |_| {
                server_module_string_result(std::ptr::null());
            })
            .unwrap_err();
        assert!(matches!(err, HostCallError::Region(_)));
    });
}

#[test]
fn test_unterminated_string_rejected() {
    on_fresh_thread(|| {
        let mut ctx = SandboxContext::builder().heap_size(1).build().unwrap();
        let err = ctx
            .run(&argv(&["unterminated"]), |env| {
                let len = env.heap().len();
                env.heap().fill(b'A');
                let ptr = env.heap_ptr(len - 4).unwrap();
                server_module_string_result(ptr as *const libc::c_char);
            })
            .unwrap_err();
        assert!(matches!(err, HostCallError::Unterminated { .. }));
    });
}

#[test]
fn test_invalid_utf8_rejected() {
    on_fresh_thread(|| {
        let mut ctx = SandboxContext::builder().build().unwrap();
        let err = ctx
            .run(&argv(&["latin1"]), |env| {
                let ptr = env.write_bytes(0, b"caf\xe9\0").unwrap();
                server_module_string_result(ptr as *const libc::c_char);
            })
            .unwrap_err();
        assert!(matches!(err, HostCallError::InvalidUtf8(_)));
    });
}

#[test]
fn test_second_delivery_keeps_first() {
    on_fresh_thread(|| {
        let mut ctx = SandboxContext::builder().build().unwrap();
        let result = ctx
            .run(&argv(&["twice"]), |env| {
                let first = env.write_cstr(0, "first").unwrap();
                server_module_string_result(first);
                let second = env.write_bytes(64, b"second").unwrap();
                server_module_bytearr_result(second, 6);
            })
            .unwrap();
        assert_eq!(result, ModuleResult::String("first".into()));
    });
}

#[test]
fn test_failed_delivery_is_not_overwritten() {
    on_fresh_thread(|| {
        let mut ctx = SandboxContext::builder().build().unwrap();
        let err = ctx
            .run(&argv(&["retry"]), |env| {
                server_module_string_result(std::ptr::null());
                let ok = env.write_cstr(0, "late").unwrap();
                server_module_string_result(ok);
            })
            .unwrap_err();
        assert!(matches!(err, HostCallError::Region(_)));
    });
}

#[test]
fn test_delivery_outside_context_is_ignored() {
    on_fresh_thread(|| {
        let text = b"orphan\0";
        server_module_string_result(text.as_ptr() as *const libc::c_char);

        // The orphan delivery must not leak into the next turn.
        let mut ctx = SandboxContext::builder().build().unwrap();
        let result = ctx.run(&argv(&["next"]), |_| {}).unwrap();
        assert!(result.is_none());
    });
}

#[test]
fn test_each_turn_starts_empty() {
    on_fresh_thread(|| {
        let mut ctx = SandboxContext::builder().build().unwrap();
        let first = ctx
            .run(&argv(&["a"]), |env| {
                server_module_string_result(env.write_cstr(0, "one").unwrap());
            })
            .unwrap();
        assert_eq!(first, ModuleResult::String("one".into()));

        let second = ctx.run(&argv(&["b"]), |_| {}).unwrap();
        assert!(second.is_none());
    });
}

#[test]
fn test_extra_read_only_region() {
    on_fresh_thread(|| {
        static BANNER: &[u8] = b"static banner\0";
        let mut ctx = unsafe {
            SandboxContext::builder()
                .region(BANNER.as_ptr(), BANNER.len(), Access::ReadOnly)
                .build()
                .unwrap()
        };
        let result = ctx
            .run(&argv(&["banner"]), |_| {
                server_module_string_result(BANNER.as_ptr() as *const libc::c_char);
            })
            .unwrap();
        assert_eq!(result.into_string().unwrap(), "static banner");
    });
}

#[test]
fn test_nested_context_restores_outer() {
    on_fresh_thread(|| {
        let mut outer = SandboxContext::builder().domain(4).build().unwrap();
        let mut inner = SandboxContext::builder().domain(9).build().unwrap();

        let result = outer
            .run(&argv(&["outer"]), |env| {
                let inner_result = inner
                    .run(&argv(&["inner"]), |inner_env| {
                        assert_eq!(get_current_domain().raw(), 9);
                        server_module_string_result(inner_env.write_cstr(0, "inner").unwrap());
                    })
                    .unwrap();
                assert_eq!(inner_result, ModuleResult::String("inner".into()));
                assert_eq!(get_current_domain().raw(), 4);

                server_module_string_result(env.write_cstr(0, "outer").unwrap());
            })
            .unwrap();

        assert_eq!(result, ModuleResult::String("outer".into()));
        assert_eq!(get_current_domain(), DomainId::HOST);
    });
}

#[test]
fn test_contexts_on_threads_are_independent() {
    let handles: Vec<_> = (2..10u32)
        .map(|domain| {
            std::thread::spawn(move || {
                let mut ctx = SandboxContext::builder().domain(domain).build().unwrap();
                for turn in 0..50 {
                    let expected = format!("domain {domain} turn {turn}");
                    let result = ctx
                        .run(&argv(&["worker"]), |env| {
                            server_module_string_result(env.write_cstr(0, &expected).unwrap());
                        })
                        .unwrap();
                    assert_eq!(result.into_string().unwrap(), expected);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}
