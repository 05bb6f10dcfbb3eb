extern crate crossbeam;
extern crate fairpool;
extern crate num_cpus;

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Barrier;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;
use std::time::Instant;

use fairpool::InterruptFlag;
use fairpool::ResourcePool;

fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(1));
    }
}

/// Five consumers over three resources: the bound holds, two callers get
/// queued, and every resource comes back as often as it went out.
#[test]
fn five_gazers_three_stones() {
    let pool = ResourcePool::new(vec![0usize, 1, 2]);
    let active = AtomicUsize::new(0);
    let peak = AtomicUsize::new(0);
    let acquired = [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)];
    let released = [AtomicUsize::new(0), AtomicUsize::new(0), AtomicUsize::new(0)];
    let lineup = Barrier::new(5);

    crossbeam::thread::scope(|scope| {
        for _ in 0..5 {
            scope.spawn(|_| {
                lineup.wait();
                let stone = pool.acquire();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                acquired[*stone].fetch_add(1, Ordering::SeqCst);
                thread::sleep(Duration::from_millis(100));
                active.fetch_sub(1, Ordering::SeqCst);
                released[*stone].fetch_add(1, Ordering::SeqCst);
                pool.release(stone).unwrap();
            });
        }
    })
    .unwrap();

    assert_eq!(3, peak.load(Ordering::SeqCst), "pool never saturated");
    assert_eq!(3, pool.available_permits());
    let mut total = 0;
    for stone in 0..3 {
        let got = acquired[stone].load(Ordering::SeqCst);
        assert_eq!(got, released[stone].load(Ordering::SeqCst));
        total += got;
    }
    assert_eq!(5, total);
}

/// Callers blocked at the gate are admitted in the order they arrived.
#[test]
fn queued_consumers_are_served_in_arrival_order() {
    let pool = ResourcePool::new(vec!["near", "far"]);
    let one = pool.acquire();
    let two = pool.acquire();
    let order = Mutex::new(Vec::new());

    crossbeam::thread::scope(|scope| {
        for i in 0..4usize {
            let pool = &pool;
            let order = &order;
            scope.spawn(move |_| {
                let stone = pool.acquire();
                order.lock().unwrap().push(i);
                pool.release(stone).unwrap();
            });
            // stage arrivals one at a time so the order is well defined
            eventually("consumer to reach the gate", || pool.waiting() == i + 1);
        }

        // one permit circulates through the whole queue, so admissions
        // (and the pushes behind them) are strictly serial
        pool.release(one).unwrap();
    })
    .unwrap();
    pool.release(two).unwrap();

    assert_eq!(vec![0, 1, 2, 3], *order.lock().unwrap());
    assert_eq!(2, pool.available_permits());
}

/// An interrupted waiter leaves the pool exactly as it found it.
#[test]
fn interrupting_a_blocked_acquire_changes_nothing() {
    let pool = ResourcePool::new(vec![0u8]);
    let held = pool.acquire();
    let flag = InterruptFlag::new();

    crossbeam::thread::scope(|scope| {
        let waiter = scope.spawn(|_| pool.acquire_interruptibly(&flag).is_err());
        eventually("waiter to block", || pool.waiting() == 1);
        flag.raise();
        assert!(waiter.join().unwrap());
    })
    .unwrap();

    assert_eq!(0, pool.available_permits());
    assert_eq!(0, pool.waiting());
    pool.release(held).unwrap();
    assert_eq!(1, pool.available_permits());
}

/// Repeatedly raising a flag at an uninterruptible acquire neither wakes
/// it early nor loses the signal: the acquisition completes once a permit
/// frees up, and the flag is still raised afterwards.
#[test]
fn uninterruptible_acquire_outlasts_repeated_signals() {
    let pool = ResourcePool::new(vec![0u8]);
    let held = pool.acquire();
    let flag = InterruptFlag::new();

    crossbeam::thread::scope(|scope| {
        let waiter = scope.spawn(|_| {
            let stone = pool.acquire();
            let pending = flag.is_raised();
            pool.release(stone).unwrap();
            pending
        });

        eventually("waiter to block", || pool.waiting() == 1);
        for _ in 0..3 {
            flag.raise();
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(1, pool.waiting(), "waiter must still be in line");

        pool.release(held).unwrap();
        assert!(waiter.join().unwrap(), "pending signal was lost");
    })
    .unwrap();

    assert_eq!(1, pool.available_permits());
}

/// Many threads hammering a small pool: the bound, per-resource
/// exclusivity, and conservation all hold throughout.
#[test]
fn stress_bound_exclusivity_conservation() {
    const RESOURCES: usize = 4;
    const ITERATIONS: usize = 200;

    let pool = ResourcePool::new((0..RESOURCES).collect::<Vec<usize>>());
    let holders: Vec<AtomicUsize> = (0..RESOURCES).map(|_| AtomicUsize::new(0)).collect();
    let active = AtomicUsize::new(0);
    let threads = num_cpus::get().max(8);

    crossbeam::thread::scope(|scope| {
        for _ in 0..threads {
            scope.spawn(|_| {
                for _ in 0..ITERATIONS {
                    pool.with(|stone| {
                        assert_eq!(
                            0,
                            holders[*stone].fetch_add(1, Ordering::SeqCst),
                            "resource {} double-assigned",
                            stone
                        );
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        assert!(now <= RESOURCES, "bound exceeded");
                        thread::yield_now();
                        active.fetch_sub(1, Ordering::SeqCst);
                        assert_eq!(1, holders[*stone].fetch_sub(1, Ordering::SeqCst));
                    });
                }
            });
        }
    })
    .unwrap();

    assert_eq!(RESOURCES, pool.available_permits());
    assert_eq!(0, pool.waiting());
    for count in &holders {
        assert_eq!(0, count.load(Ordering::SeqCst));
    }
}
