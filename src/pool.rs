//! Bounded-concurrency fan-out/fan-in over a queue of work items.
//!
//! A fixed pool of worker threads pulls items from a shared queue and maps
//! each through a caller-supplied function. Outputs from all workers are
//! merged onto a single channel in completion order. The first error
//! observed cancels the remaining work cooperatively and becomes the sole
//! reported error.

use crossbeam_channel::{Receiver, unbounded};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Cooperative cancellation signal shared between workers.
///
/// Checked between work items and between traversal entries; a worker
/// already inside a single item's work is allowed to finish that item.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// The merged output of a concurrent map.
///
/// Consumers must fully drain the items before inspecting the terminal
/// error: the error, if any, is only known once all workers have exited.
pub struct MapOutput<O, E> {
    receiver: Receiver<O>,
    first_error: Arc<Mutex<Option<E>>>,
    workers: Vec<JoinHandle<()>>,
}

impl<O, E> MapOutput<O, E> {
    /// Iterates merged output items as workers produce them, interleaved in
    /// completion order (no ordering guarantee across workers). The iterator
    /// ends once every worker has exited.
    pub fn iter(&self) -> impl Iterator<Item = O> + '_ {
        self.receiver.iter()
    }

    /// Waits for all workers to exit and returns the first error observed,
    /// if any. Call after draining `iter()`.
    pub fn finish(self) -> Result<(), E> {
        for handle in self.workers {
            if handle.join().is_err() {
                panic!("pool worker panicked");
            }
        }

        let mut slot = self.first_error.lock().expect("error slot lock poisoned");

        match slot.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Collects all output items, then returns them or the first error.
    /// Items produced before the error are discarded on failure.
    pub fn drain(self) -> Result<Vec<O>, E> {
        let items: Vec<O> = self.receiver.iter().collect();
        self.finish()?;
        Ok(items)
    }
}

/// The number of workers used when the caller does not pick one.
pub fn default_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1)
}

/// Maps `items` through `map_fn` on a pool of `concurrency` worker threads.
///
/// Each invocation of `map_fn` produces the complete output of one item or
/// an error. On the first error the pool cancels the remaining work via the
/// shared token, drops the erroring item's output, and reports that error
/// from [`MapOutput::finish`]. Errors observed after the first are
/// discarded, as are the unprocessed items of cancelled workers.
pub fn map_concurrently<I, O, E, F>(
    items: Vec<I>,
    concurrency: usize,
    map_fn: F,
) -> MapOutput<O, E>
where
    I: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
    F: Fn(I, &CancelToken) -> Result<Vec<O>, E> + Send + Sync + 'static,
{
    let (input_tx, input_rx) = unbounded();

    for item in items {
        // The channel is unbounded and the receiver outlives this loop.
        let _ = input_tx.send(item);
    }

    drop(input_tx);

    let (output_tx, output_rx) = unbounded();
    let cancel = CancelToken::new();
    let first_error: Arc<Mutex<Option<E>>> = Arc::new(Mutex::new(None));
    let map_fn = Arc::new(map_fn);

    let workers = (0..concurrency.max(1))
        .map(|_| {
            let input_rx = input_rx.clone();
            let output_tx = output_tx.clone();
            let cancel = cancel.clone();
            let first_error = Arc::clone(&first_error);
            let map_fn = Arc::clone(&map_fn);

            std::thread::spawn(move || {
                while !cancel.is_cancelled() {
                    let Ok(item) = input_rx.recv() else {
                        // Queue closed and empty.
                        return;
                    };

                    match map_fn(item, &cancel) {
                        Ok(outputs) => {
                            for output in outputs {
                                if output_tx.send(output).is_err() {
                                    // Consumer went away.
                                    return;
                                }
                            }
                        }
                        Err(err) => {
                            let mut slot =
                                first_error.lock().expect("error slot lock poisoned");

                            if slot.is_none() {
                                *slot = Some(err);
                            }

                            drop(slot);
                            cancel.cancel();
                            return;
                        }
                    }
                }
            })
        })
        .collect();

    MapOutput {
        receiver: output_rx,
        first_error,
        workers,
    }
}
