//! Frontier-expanding worker pool.
//!
//! The queue grows while the pool runs: every processed item may emit
//! successor items. Each worker thread builds its own state (typically an
//! exclusive database session) once, up front, via `make_worker`.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::thread;

use parking_lot::{Condvar, Mutex};

struct State<I, E> {
    queue: VecDeque<I>,
    /// Workers currently inside a `process` call. The pool terminates only
    /// once the queue is empty *and* this is zero; a busy worker may still
    /// emit items.
    active: usize,
    failed: bool,
    error: Option<E>,
}

struct Shared<I, E> {
    state: Mutex<State<I, E>>,
    wakeup: Condvar,
}

/// Run `seeds` and everything they transitively emit, with up to
/// `parallelism` workers.
///
/// `make_worker` is called once per worker thread, on that thread; the
/// closure it returns processes one item and yields the item's successors.
/// The first error aborts the pool: pending items are discarded, workers
/// exit at their next pull, and that error is returned.
pub fn run<I, E, F, W>(
    parallelism: NonZeroUsize,
    seeds: impl IntoIterator<Item = I>,
    make_worker: F,
) -> Result<(), E>
where
    I: Send,
    E: Send,
    F: Fn() -> Result<W, E> + Sync,
    W: FnMut(I) -> Result<Vec<I>, E>,
{
    let shared = Shared {
        state: Mutex::new(State {
            queue: seeds.into_iter().collect(),
            active: 0,
            failed: false,
            error: None,
        }),
        wakeup: Condvar::new(),
    };

    thread::scope(|scope| {
        for _ in 0..parallelism.get() {
            scope.spawn(|| worker_loop(&shared, &make_worker));
        }
    });

    match shared.state.into_inner().error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn worker_loop<I, E, F, W>(shared: &Shared<I, E>, make_worker: &F)
where
    F: Fn() -> Result<W, E>,
    W: FnMut(I) -> Result<Vec<I>, E>,
{
    let mut process = match make_worker() {
        Ok(process) => process,
        Err(error) => {
            fail(shared, error);
            return;
        }
    };

    loop {
        let item = {
            let mut state = shared.state.lock();
            loop {
                if state.failed {
                    return;
                }
                if let Some(item) = state.queue.pop_front() {
                    state.active += 1;
                    break item;
                }
                if state.active == 0 {
                    // Queue drained and nobody can refill it.
                    shared.wakeup.notify_all();
                    return;
                }
                shared.wakeup.wait(&mut state);
            }
        };

        match process(item) {
            Ok(successors) => {
                let mut state = shared.state.lock();
                state.active -= 1;
                state.queue.extend(successors);
                drop(state);
                shared.wakeup.notify_all();
            }
            Err(error) => {
                {
                    let mut state = shared.state.lock();
                    state.active -= 1;
                }
                fail(shared, error);
                return;
            }
        }
    }
}

fn fail<I, E>(shared: &Shared<I, E>, error: E) {
    let mut state = shared.state.lock();
    state.failed = true;
    if state.error.is_none() {
        state.error = Some(error);
    }
    drop(state);
    shared.wakeup.notify_all();
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    use super::*;

    fn n(parallelism: usize) -> NonZeroUsize {
        NonZeroUsize::new(parallelism).unwrap()
    }

    /// Items count down; item `k` emits `k` items of value `k - 1`. Seeding
    /// `[depth]` therefore processes `depth!`-ish items, all reachable only
    /// through expansion.
    fn countdown(item: usize) -> Vec<usize> {
        (0..item).map(|_| item - 1).collect()
    }

    #[test]
    fn processes_transitive_frontier() {
        for parallelism in [1, 4] {
            let processed = AtomicUsize::new(0);
            run::<_, (), _, _>(n(parallelism), [4usize], || {
                Ok(|item: usize| {
                    processed.fetch_add(1, Ordering::Relaxed);
                    Ok(countdown(item))
                })
            })
            .unwrap();
            // 1 four, 4 threes, 12 twos, 24 ones, 24 zeros.
            assert_eq!(processed.load(Ordering::Relaxed), 65);
        }
    }

    #[test]
    fn collects_every_emitted_item_exactly_once() {
        let seen = Mutex::new(Vec::new());
        run::<_, (), _, _>(n(4), 0..10usize, || {
            Ok(|item: usize| {
                seen.lock().push(item);
                // Expand each seed once into a marker past the seed range.
                Ok(if item < 10 { vec![item + 100] } else { vec![] })
            })
        })
        .unwrap();

        let mut seen = seen.into_inner();
        seen.sort_unstable();
        let expected: Vec<usize> = (0..10).chain(100..110).collect();
        assert_eq!(seen, expected);
    }

    #[test]
    fn first_error_aborts_and_is_returned() {
        let processed = AtomicUsize::new(0);
        let result = run(n(2), 0..1000usize, || {
            Ok(|item: usize| {
                processed.fetch_add(1, Ordering::Relaxed);
                if item == 3 {
                    Err(format!("boom at {item}"))
                } else {
                    Ok(vec![])
                }
            })
        });
        assert_eq!(result.unwrap_err(), "boom at 3");
        // The queue is discarded once a worker fails.
        assert!(processed.load(Ordering::Relaxed) < 1000);
    }

    #[test]
    fn worker_construction_failure_surfaces() {
        let result = run::<usize, _, _, _>(n(3), [1usize], || {
            Err::<fn(usize) -> Result<Vec<usize>, String>, _>("no session".to_string())
        });
        assert_eq!(result.unwrap_err(), "no session");
    }

    #[test]
    fn empty_seed_terminates() {
        run::<usize, (), _, _>(n(4), [], || Ok(|_item: usize| Ok(vec![]))).unwrap();
    }
}
