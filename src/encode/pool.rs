//! Lock-free thread pool for parallel delta encoding
//!
//! Runs the candidate encodes of one insert across worker threads. The
//! design keeps the hot path free of locks:
//!
//! - task dispatch is an atomic fetch-add on a shared task counter; the
//!   leader (the inserting backend) participates as one of the workers
//! - the condition variable is used only for the idle→work transition,
//!   with exactly one broadcast per batch; workers compare a local batch
//!   sequence against a shared atomic to discover new work
//! - result slots are cache-line padded so concurrent writers never share
//!   a line, and the leader issues an acquire fence once the completion
//!   counter reaches the task count before reading them
//!
//! Workers call nothing but the codec: pure computation over byte
//! buffers, no engine state, no allocator tricks, nothing that could
//! observe a cancelled backend.

use crate::codec;
use bytes::Bytes;
use crossbeam::utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::cell::UnsafeCell;
use std::sync::atomic::{fence, AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// One candidate encode: a tag and the base content at that distance.
#[derive(Debug, Clone)]
pub struct EncodeTask {
    /// Delta tag (distance back) for this candidate
    pub tag: u16,
    /// Base content
    pub base: Bytes,
}

/// Outcome of one candidate encode.
#[derive(Debug, Clone)]
pub struct EncodeOutcome {
    /// Tag used for this candidate
    pub tag: u16,
    /// Encoded blob, `None` when the encoder refused the candidate
    pub blob: Option<Vec<u8>>,
}

struct ResultSlot(UnsafeCell<Option<EncodeOutcome>>);

// Each slot is written by exactly one thread (the fetch-add winner for its
// index) and read by the leader only after the completion counter equals
// the task count plus an acquire fence.
unsafe impl Sync for ResultSlot {}

struct Batch {
    new_data: Bytes,
    entropy: bool,
    tasks: Vec<EncodeTask>,
    next_task: AtomicUsize,
    completed: AtomicUsize,
    results: Vec<CachePadded<ResultSlot>>,
}

impl Batch {
    fn new(new_data: Bytes, entropy: bool, tasks: Vec<EncodeTask>) -> Self {
        let results = (0..tasks.len())
            .map(|_| CachePadded::new(ResultSlot(UnsafeCell::new(None))))
            .collect();
        Self {
            new_data,
            entropy,
            tasks,
            next_task: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            results,
        }
    }

    /// Grab-and-run loop shared by workers and the leader.
    fn run_tasks(&self) {
        loop {
            let idx = self.next_task.fetch_add(1, Ordering::Relaxed);
            if idx >= self.tasks.len() {
                return;
            }
            let task = &self.tasks[idx];
            let blob = codec::encode(task.tag, &task.base, &self.new_data, self.entropy).ok();
            // Sole writer for this index; published by the release below.
            unsafe {
                *self.results[idx].0.get() = Some(EncodeOutcome { tag: task.tag, blob });
            }
            self.completed.fetch_add(1, Ordering::Release);
        }
    }
}

struct Shared {
    current: Mutex<Option<Arc<Batch>>>,
    batch_ready: Condvar,
    batch_seq: AtomicU64,
    shutdown: AtomicBool,
}

/// Persistent encode pool. One per engine; created on first use when the
/// configured thread count is positive.
pub struct EncodePool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    num_threads: usize,
}

impl EncodePool {
    /// Spawn `num_threads` workers (clamped to the supported maximum).
    /// With zero threads the pool only ever encodes sequentially.
    pub fn new(num_threads: usize) -> Self {
        let num_threads = num_threads.min(crate::constants::MAX_ENCODE_THREADS);
        let shared = Arc::new(Shared {
            current: Mutex::new(None),
            batch_ready: Condvar::new(),
            batch_seq: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        });
        let mut workers = Vec::with_capacity(num_threads);
        for i in 0..num_threads {
            let shared = Arc::clone(&shared);
            match std::thread::Builder::new()
                .name(format!("ps-encode-{i}"))
                .spawn(move || worker_loop(shared))
            {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    // Run with however many workers came up.
                    tracing::warn!(error = %e, spawned = workers.len(), "encode worker spawn failed");
                    break;
                }
            }
        }
        let num_threads = workers.len();
        if num_threads > 0 {
            tracing::debug!(num_threads, "encode pool initialized");
        }
        Self {
            shared,
            workers,
            num_threads,
        }
    }

    /// Encode all candidates, returning one outcome per task in order.
    ///
    /// Falls back to inline sequential encoding when the pool has no
    /// workers or the batch has a single task.
    pub fn execute(&self, new_data: Bytes, entropy: bool, tasks: Vec<EncodeTask>) -> Vec<EncodeOutcome> {
        if tasks.is_empty() {
            return Vec::new();
        }
        if self.num_threads == 0 || tasks.len() == 1 {
            return tasks
                .into_iter()
                .map(|task| {
                    let blob = codec::encode(task.tag, &task.base, &new_data, entropy).ok();
                    EncodeOutcome { tag: task.tag, blob }
                })
                .collect();
        }

        let num_tasks = tasks.len();
        let batch = Arc::new(Batch::new(new_data, entropy, tasks));

        {
            let mut current = self.shared.current.lock();
            *current = Some(Arc::clone(&batch));
            self.shared.batch_seq.fetch_add(1, Ordering::Release);
            self.shared.batch_ready.notify_all();
        }

        // Leader participates through the same atomic counter.
        batch.run_tasks();

        // Spin until the workers drain the remainder; bounded by the
        // longest single candidate encode.
        while batch.completed.load(Ordering::Acquire) < num_tasks {
            std::hint::spin_loop();
            std::thread::yield_now();
        }
        // Make worker writes to the result slots visible before reading.
        fence(Ordering::Acquire);

        self.shared.current.lock().take();

        batch
            .results
            .iter()
            .map(|slot| unsafe { (*slot.0.get()).clone() }.expect("completed batch has all results"))
            .collect()
    }

    /// Number of worker threads.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }
}

impl Drop for EncodePool {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::Release);
        {
            let _guard = self.shared.current.lock();
            self.shared.batch_ready.notify_all();
        }
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    let mut my_batch_seq = 0u64;
    loop {
        let batch = {
            let mut current = shared.current.lock();
            loop {
                if shared.shutdown.load(Ordering::Acquire) {
                    return;
                }
                let seq = shared.batch_seq.load(Ordering::Acquire);
                if seq != my_batch_seq {
                    my_batch_seq = seq;
                    break;
                }
                shared.batch_ready.wait(&mut current);
            }
            current.clone()
        };
        if let Some(batch) = batch {
            batch.run_tasks();
        }
    }
}
