//! Threads have independent domain registers: a window opened on one thread
//! never changes what another thread observes.

use std::sync::{Arc, Barrier};

use mpkbox_domain::{
    get_current_domain, scoped_cross_domain_copy, CopyRequest, DomainId, DomainScope,
};

const THREADS: u32 = 8;
const ROUNDS: usize = 2_000;

#[test]
fn test_windows_do_not_leak_across_threads() {
    let barrier = Arc::new(Barrier::new(THREADS as usize));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            std::thread::spawn(move || {
                // Domains 2..=9, one per thread.
                let mine = DomainId::new(2 + i).unwrap();
                let _scope = DomainScope::enter(mine).unwrap();
                barrier.wait();

                let src = vec![i as u8; 256];
                let mut dest = vec![0u8; 256];
                for round in 0..ROUNDS {
                    // Observations between copies must always be our own
                    // domain, never all-memory from a neighbour's window.
                    assert_eq!(get_current_domain(), mine, "thread {i} round {round}");
                    scoped_cross_domain_copy(
                        CopyRequest::whole((&mut dest[..]).into(), (&src[..]).into()).unwrap(),
                    );
                    assert_eq!(get_current_domain(), mine, "thread {i} round {round}");
                }
                assert!(dest.iter().all(|&b| b == i as u8));
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn test_idle_thread_stays_in_its_domain() {
    let barrier = Arc::new(Barrier::new(2));
    let observer = {
        let barrier = Arc::clone(&barrier);
        std::thread::spawn(move || {
            let domain = DomainId::new(11).unwrap();
            let _scope = DomainScope::enter(domain).unwrap();
            barrier.wait();
            let mut seen = Vec::with_capacity(ROUNDS);
            for _ in 0..ROUNDS {
                seen.push(get_current_domain());
                std::thread::yield_now();
            }
            seen.into_iter().all(|d| d == domain)
        })
    };

    let copier = {
        let barrier = Arc::clone(&barrier);
        std::thread::spawn(move || {
            barrier.wait();
            let src = [0x5Au8; 4096];
            let mut dest = [0u8; 4096];
            for _ in 0..ROUNDS {
                scoped_cross_domain_copy(
                    CopyRequest::whole((&mut dest[..]).into(), (&src[..]).into()).unwrap(),
                );
            }
            get_current_domain()
        })
    };

    assert!(observer.join().unwrap());
    assert_eq!(copier.join().unwrap(), DomainId::HOST);
}
