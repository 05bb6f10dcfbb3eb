#[macro_use]
extern crate failure;
extern crate crossbeam;
extern crate fairpool;
#[macro_use]
extern crate log;
extern crate num_cpus;
extern crate pretty_env_logger;
extern crate rand;

use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use failure::Error;
use fairpool::InterruptFlag;
use fairpool::ResourcePool;
use fairpool::WaitObserver;
use rand::Rng;

const GAZING_ITERATIONS: usize = 4;

/// A seeing-stone. Gazing into one takes a while, which is exactly why
/// there are never enough to go around.
struct Stone {
    name: &'static str,
}

impl Stone {
    fn gaze(&self) {
        let ms = rand::thread_rng().gen_range(20..120);
        thread::sleep(Duration::from_millis(ms));
    }
}

struct LogObserver {
    worker: usize,
}

impl WaitObserver for LogObserver {
    fn on_blocked(&self) {
        info!("worker {}: waiting for a stone", self.worker);
    }

    fn on_acquired(&self) {
        info!("worker {}: gazing", self.worker);
    }

    fn on_cancelled(&self) {
        info!("worker {}: told to stop", self.worker);
    }
}

/// One worker's life: repeatedly borrow a stone, gaze, give it back.
///
/// `active` is shared across all workers and double-checks the bound the
/// pool is supposed to enforce. Returns how many gazes completed before
/// cancellation, if any.
fn gaze_loop(
    pool: &ResourcePool<Stone>,
    interrupt: &InterruptFlag,
    observer: &dyn WaitObserver,
    active: &AtomicUsize,
) -> usize {
    let capacity = pool.capacity();
    for done in 0..GAZING_ITERATIONS {
        if interrupt.is_raised() {
            observer.on_cancelled();
            return done;
        }

        observer.on_blocked();
        let stone = match pool.acquire_interruptibly(interrupt) {
            Ok(stone) => stone,
            Err(_) => {
                observer.on_cancelled();
                return done;
            }
        };
        observer.on_acquired();

        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        assert!(now <= capacity, "more gazers than stones");
        debug!("gazing into {}", stone.name);
        stone.gaze();
        active.fetch_sub(1, Ordering::SeqCst);

        if let Err(e) = pool.release(stone) {
            error!("putting {} back: {}", stone.name, e);
        }
    }
    GAZING_ITERATIONS
}

fn main() -> Result<(), Error> {
    pretty_env_logger::formatted_builder()?
        .filter_level(log::LevelFilter::Info)
        .init();

    let pool = ResourcePool::new(vec![
        Stone { name: "orthanc" },
        Stone { name: "minas tirith" },
        Stone { name: "barad-dur" },
    ]);
    let active = AtomicUsize::new(0);

    let workers = (num_cpus::get() + 2).max(5);
    let interrupts: Vec<InterruptFlag> = (0..workers).map(|_| InterruptFlag::new()).collect();
    info!("{} workers sharing {} stones", workers, pool.capacity());

    crossbeam::thread::scope(|scope| {
        for (worker, interrupt) in interrupts.iter().enumerate() {
            let pool = &pool;
            let active = &active;
            scope.spawn(move |_| {
                let observer = LogObserver { worker };
                let done = gaze_loop(pool, interrupt, &observer, active);
                info!(
                    "worker {} finished {} of {} gazing iterations",
                    worker, done, GAZING_ITERATIONS
                );
            });
        }

        // let the simulation run a moment, then call one worker off
        thread::sleep(Duration::from_millis(150));
        interrupts[0].raise();
    })
    .map_err(|_| format_err!("a worker panicked"))?;

    info!("all stones returned: {} free", pool.available_permits());
    Ok(())
}
