//! DAG-scheduled worker pool.
//!
//! Items run under a precomputed dependency relation: an item is ready once
//! all of its dependencies completed. A failed item abandons its transitive
//! dependents; independent items keep running and every failure is
//! reported.

use std::collections::VecDeque;
use std::num::NonZeroUsize;
use std::thread;

use parking_lot::{Condvar, Mutex};
use petgraph::algo::toposort;
use petgraph::graph::DiGraph;

/// Why a [`run`] did not complete every item.
#[derive(Debug)]
pub enum RunError<E> {
    /// The dependency relation contains a cycle; nothing was executed.
    Cycle,
    /// One or more items failed; their transitive dependents were abandoned.
    Failed(Vec<E>),
}

struct State<E> {
    ready: VecDeque<usize>,
    /// Unmet dependency count per item.
    waiting: Vec<usize>,
    abandoned: Vec<bool>,
    /// Items neither completed nor abandoned yet.
    outstanding: usize,
    active: usize,
    errors: Vec<E>,
}

struct Shared<E> {
    state: Mutex<State<E>>,
    wakeup: Condvar,
}

/// Execute every item of `items`, at most `parallelism` at a time, such
/// that item `i` starts only after all of `deps[i]` completed.
///
/// `make_worker` is called once per worker thread (typically to open an
/// exclusive database session); the returned closure executes one item.
pub fn run<T, E, F, W>(
    parallelism: NonZeroUsize,
    items: &[T],
    deps: &[Vec<usize>],
    make_worker: F,
) -> Result<(), RunError<E>>
where
    T: Sync,
    E: Send,
    F: Fn() -> Result<W, E> + Sync,
    W: FnMut(&T) -> Result<(), E>,
{
    assert_eq!(items.len(), deps.len());

    // Normalized edges; duplicate constraints between the same pair of
    // tables collapse to one dependency.
    let deps: Vec<Vec<usize>> = deps
        .iter()
        .map(|d| {
            let mut d = d.clone();
            d.sort_unstable();
            d.dedup();
            d
        })
        .collect();

    check_acyclic(items.len(), &deps)?;

    let mut dependents = vec![Vec::new(); items.len()];
    let mut waiting = vec![0; items.len()];
    for (item, item_deps) in deps.iter().enumerate() {
        waiting[item] = item_deps.len();
        for &dep in item_deps {
            dependents[dep].push(item);
        }
    }
    let ready = waiting
        .iter()
        .enumerate()
        .filter(|(_, &w)| w == 0)
        .map(|(i, _)| i)
        .collect();

    let shared = Shared {
        state: Mutex::new(State {
            ready,
            waiting,
            abandoned: vec![false; items.len()],
            outstanding: items.len(),
            active: 0,
            errors: Vec::new(),
        }),
        wakeup: Condvar::new(),
    };

    thread::scope(|scope| {
        for _ in 0..parallelism.get() {
            scope.spawn(|| worker_loop(&shared, items, &dependents, &make_worker));
        }
    });

    let errors = shared.state.into_inner().errors;
    if errors.is_empty() {
        Ok(())
    } else {
        Err(RunError::Failed(errors))
    }
}

fn check_acyclic<E>(len: usize, deps: &[Vec<usize>]) -> Result<(), RunError<E>> {
    let mut graph = DiGraph::<(), ()>::with_capacity(len, deps.iter().map(Vec::len).sum());
    let nodes: Vec<_> = (0..len).map(|_| graph.add_node(())).collect();
    for (item, item_deps) in deps.iter().enumerate() {
        for &dep in item_deps {
            graph.add_edge(nodes[dep], nodes[item], ());
        }
    }
    toposort(&graph, None).map(|_| ()).map_err(|_| RunError::Cycle)
}

fn worker_loop<T, E, F, W>(shared: &Shared<E>, items: &[T], dependents: &[Vec<usize>], make_worker: &F)
where
    F: Fn() -> Result<W, E>,
    W: FnMut(&T) -> Result<(), E>,
{
    let mut execute = match make_worker() {
        Ok(execute) => execute,
        Err(error) => {
            shared.state.lock().errors.push(error);
            shared.wakeup.notify_all();
            return;
        }
    };

    loop {
        let item = {
            let mut state = shared.state.lock();
            loop {
                if state.outstanding == 0 {
                    shared.wakeup.notify_all();
                    return;
                }
                if let Some(item) = state.ready.pop_front() {
                    state.active += 1;
                    break item;
                }
                if state.active == 0 {
                    // Remaining items can no longer become ready (worker
                    // construction failed or dependents were abandoned).
                    shared.wakeup.notify_all();
                    return;
                }
                shared.wakeup.wait(&mut state);
            }
        };

        let outcome = execute(&items[item]);

        let mut state = shared.state.lock();
        state.active -= 1;
        state.outstanding -= 1;
        match outcome {
            Ok(()) => {
                for &dependent in &dependents[item] {
                    state.waiting[dependent] -= 1;
                    if state.waiting[dependent] == 0 && !state.abandoned[dependent] {
                        state.ready.push_back(dependent);
                    }
                }
            }
            Err(error) => {
                state.errors.push(error);
                abandon_dependents(&mut state, dependents, item);
            }
        }
        drop(state);
        shared.wakeup.notify_all();
    }
}

/// Mark everything downstream of `failed` as abandoned so it never becomes
/// ready.
fn abandon_dependents<E>(state: &mut State<E>, dependents: &[Vec<usize>], failed: usize) {
    let mut frontier = vec![failed];
    while let Some(item) = frontier.pop() {
        for &dependent in &dependents[item] {
            if !state.abandoned[dependent] {
                state.abandoned[dependent] = true;
                state.outstanding -= 1;
                frontier.push(dependent);
            }
        }
    }
}
