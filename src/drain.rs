//! Threshold-triggered transfer of the sample buffer into consumer queues.
//!
//! The timer only decides that a drain is due and hands it to a worker
//! context; the worker empties the buffer under the fast lock in one step
//! and does the decoding and queueing with no fast lock held.

use crate::config::{Variant, VALUE_SIZE};
use crate::error::{Error, Result};
use crate::queue::ConsumerQueue;
use crate::ring::ByteRing;
use crate::sync::{lock, FastLock};
use crate::workqueue::WorkQueue;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

/// Whether `occupied` bytes out of `capacity` are strictly past
/// `threshold` percent.
pub fn should_drain(occupied: usize, capacity: usize, threshold: u32) -> bool {
    occupied * 100 > threshold as usize * capacity
}

/// Makes room for a batch of values, failing instead of aborting.
type Allocate = fn(usize) -> Result<Vec<u32>>;

fn reserve(count: usize) -> Result<Vec<u32>> {
    let mut values = Vec::new();
    values
        .try_reserve_exact(count)
        .map_err(|_| Error::ResourceExhausted { requested: count })?;
    Ok(values)
}

/// Decodes the little-endian values of a drained buffer. A trailing partial
/// value is ignored.
pub fn decode_batch(bytes: &[u8]) -> Result<Vec<u32>> {
    decode_with(bytes, reserve)
}

fn decode_with(bytes: &[u8], allocate: Allocate) -> Result<Vec<u32>> {
    let mut values = allocate(bytes.len() / VALUE_SIZE)?;
    values.extend(
        bytes
            .chunks_exact(VALUE_SIZE)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
    );
    Ok(values)
}

/// Splits a batch into one sub-batch per consumer queue, keeping the
/// generation order inside each.
pub fn partition(variant: Variant, batch: Vec<u32>) -> Result<Vec<Vec<u32>>> {
    partition_with(variant, batch, reserve)
}

fn partition_with(variant: Variant, batch: Vec<u32>, allocate: Allocate) -> Result<Vec<Vec<u32>>> {
    match variant {
        Variant::Single => Ok(vec![batch]),
        Variant::Parity => {
            let evens = batch.iter().filter(|v| *v % 2 == 0).count();
            let mut even = allocate(evens)?;
            let mut odd = allocate(batch.len() - evens)?;
            for value in batch {
                if value % 2 == 0 {
                    even.push(value);
                } else {
                    odd.push(value);
                }
            }
            Ok(vec![even, odd])
        }
    }
}

struct DrainShared {
    buffer: Arc<FastLock<ByteRing>>,
    queues: Vec<Arc<ConsumerQueue>>,
    variant: Variant,
    allocate: Allocate,
    pending: AtomicBool,
    idle: Mutex<()>,
    finished: Condvar,
    completed: AtomicUsize,
    dropped: AtomicUsize,
}

impl DrainShared {
    fn run(&self) {
        let bytes = self.buffer.lock().take_all();
        match self.distribute(&bytes) {
            Ok(moved) => tracing::info!("drained {moved} values"),
            Err(err) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("dropping drained batch: {err}");
            }
        }
        self.completed.fetch_add(1, Ordering::Relaxed);
        self.finish();
    }

    // Nothing reaches a queue unless every sub-batch was built.
    fn distribute(&self, bytes: &[u8]) -> Result<usize> {
        let batch = decode_with(bytes, self.allocate)?;
        let parts = partition_with(self.variant, batch, self.allocate)?;
        Ok(self
            .queues
            .iter()
            .zip(parts)
            .map(|(queue, part)| queue.append(part))
            .sum())
    }

    fn finish(&self) {
        let _idle = lock(&self.idle);
        self.pending.store(false, Ordering::SeqCst);
        self.finished.notify_all();
    }
}

pub struct DrainCoordinator {
    shared: Arc<DrainShared>,
    workers: WorkQueue,
}

impl DrainCoordinator {
    /// `queues` must hold one queue per sub-batch of `variant`.
    pub fn new(
        buffer: Arc<FastLock<ByteRing>>,
        queues: Vec<Arc<ConsumerQueue>>,
        variant: Variant,
        workers: usize,
    ) -> Result<Self> {
        Self::with_allocator(buffer, queues, variant, workers, reserve)
    }

    fn with_allocator(
        buffer: Arc<FastLock<ByteRing>>,
        queues: Vec<Arc<ConsumerQueue>>,
        variant: Variant,
        workers: usize,
        allocate: Allocate,
    ) -> Result<Self> {
        if queues.len() != variant.queue_count() {
            return Err(Error::invalid(format!(
                "{variant:?} drains into {} queues, got {}",
                variant.queue_count(),
                queues.len()
            )));
        }
        Ok(Self {
            shared: Arc::new(DrainShared {
                buffer,
                queues,
                variant,
                allocate,
                pending: AtomicBool::new(false),
                idle: Mutex::new(()),
                finished: Condvar::new(),
                completed: AtomicUsize::new(0),
                dropped: AtomicUsize::new(0),
            }),
            workers: WorkQueue::new("drain", workers)?,
        })
    }

    /// Queues a drain if the buffer is past the threshold and none is in
    /// flight. Never blocks. Returns whether a drain was queued.
    pub fn maybe_schedule(
        &self,
        occupied: usize,
        capacity: usize,
        threshold: u32,
        from_context: usize,
    ) -> bool {
        if !should_drain(occupied, capacity, threshold) {
            return false;
        }
        if self
            .shared
            .pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return false;
        }

        let target = self.workers.neighbour(from_context);
        let shared = Arc::clone(&self.shared);
        if self.workers.queue_on(target, move || shared.run()) {
            tracing::debug!("drain queued on context {target} at {occupied}/{capacity} bytes");
            true
        } else {
            tracing::warn!("drain worker {target} is gone");
            self.shared.finish();
            false
        }
    }

    /// Blocks until no drain is queued or running.
    pub fn flush(&self) {
        let mut idle = lock(&self.shared.idle);
        while self.shared.pending.load(Ordering::SeqCst) {
            idle = self
                .shared
                .finished
                .wait(idle)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn is_pending(&self) -> bool {
        self.shared.pending.load(Ordering::SeqCst)
    }

    pub fn drains_completed(&self) -> usize {
        self.shared.completed.load(Ordering::Relaxed)
    }

    /// Drains whose batch was discarded for lack of memory.
    pub fn batches_dropped(&self) -> usize {
        self.shared.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(values: &[u32], capacity: usize) -> Arc<FastLock<ByteRing>> {
        let mut ring = ByteRing::new(capacity);
        for value in values {
            ring.push(&value.to_le_bytes());
        }
        Arc::new(FastLock::new(ring))
    }

    #[test]
    fn test_threshold_is_strict() {
        assert!(should_drain(97, 128, 75));
        assert!(!should_drain(96, 128, 75));
        assert!(!should_drain(0, 128, 0));
        assert!(should_drain(1, 128, 0));
        assert!(!should_drain(128, 128, 100));
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&7u32.to_le_bytes());
        bytes.extend_from_slice(&300u32.to_le_bytes());
        bytes.push(0xff);
        assert_eq!(decode_batch(&bytes).unwrap(), vec![7, 300]);
        assert!(decode_batch(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_reserve_failure_is_resource_exhausted() {
        assert!(matches!(
            reserve(usize::MAX),
            Err(Error::ResourceExhausted { requested: usize::MAX })
        ));
    }

    #[test]
    fn test_partition_by_parity_keeps_order() {
        let parts = partition(Variant::Parity, vec![5, 2, 8, 3, 4, 1]).unwrap();
        assert_eq!(parts, vec![vec![2, 8, 4], vec![5, 3, 1]]);
        let whole = partition(Variant::Single, vec![5, 2]).unwrap();
        assert_eq!(whole, vec![vec![5, 2]]);
    }

    #[test]
    fn test_drain_moves_whole_buffer() {
        let buffer = filled(&[1, 2, 3, 4], 16);
        let queue = Arc::new(ConsumerQueue::new());
        let drain =
            DrainCoordinator::new(Arc::clone(&buffer), vec![Arc::clone(&queue)], Variant::Single, 2)
                .unwrap();

        assert!(drain.maybe_schedule(16, 16, 75, 0));
        drain.flush();

        assert!(buffer.lock().is_empty());
        assert!(!drain.is_pending());
        assert_eq!(drain.drains_completed(), 1);
        assert_eq!(drain.batches_dropped(), 0);
        let values: Vec<u32> = std::iter::from_fn(|| queue.try_pop()).collect();
        assert_eq!(values, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_parity_drain_routes_values() {
        let buffer = filled(&[10, 11, 12, 13, 15], 32);
        let even = Arc::new(ConsumerQueue::new());
        let odd = Arc::new(ConsumerQueue::new());
        let drain = DrainCoordinator::new(
            buffer,
            vec![Arc::clone(&even), Arc::clone(&odd)],
            Variant::Parity,
            2,
        )
        .unwrap();

        assert!(drain.maybe_schedule(20, 32, 50, 1));
        drain.flush();
        assert_eq!(even.len(), 2);
        assert_eq!(odd.len(), 3);
        assert_eq!(even.try_pop(), Some(10));
        assert_eq!(odd.try_pop(), Some(11));
    }

    #[test]
    fn test_below_threshold_schedules_nothing() {
        let buffer = filled(&[1], 128);
        let queue = Arc::new(ConsumerQueue::new());
        let drain = DrainCoordinator::new(buffer, vec![queue], Variant::Single, 2).unwrap();
        assert!(!drain.maybe_schedule(4, 128, 75, 0));
        assert!(!drain.is_pending());
        drain.flush();
        assert_eq!(drain.drains_completed(), 0);
    }

    #[test]
    fn test_one_drain_in_flight() {
        let buffer = filled(&[1, 2], 8);
        let queue = Arc::new(ConsumerQueue::new());
        let drain =
            DrainCoordinator::new(Arc::clone(&buffer), vec![queue], Variant::Single, 2).unwrap();

        // Hold the fast lock so the first drain cannot finish yet.
        let guard = buffer.lock();
        assert!(drain.maybe_schedule(8, 8, 50, 0));
        assert!(!drain.maybe_schedule(8, 8, 50, 0));
        assert!(drain.is_pending());
        drop(guard);

        drain.flush();
        assert_eq!(drain.drains_completed(), 1);
        assert!(drain.maybe_schedule(8, 8, 50, 0));
        drain.flush();
        assert_eq!(drain.drains_completed(), 2);
    }

    fn refuse(count: usize) -> Result<Vec<u32>> {
        Err(Error::ResourceExhausted { requested: count })
    }

    // Enough room to decode a five-value batch, too little for either
    // parity half of it.
    fn batches_over_two(count: usize) -> Result<Vec<u32>> {
        if count > 2 {
            reserve(count)
        } else {
            refuse(count)
        }
    }

    #[test]
    fn test_failed_allocation_drops_batch() {
        let buffer = filled(&[1, 2, 3], 16);
        let queue = Arc::new(ConsumerQueue::new());
        let drain = DrainCoordinator::with_allocator(
            Arc::clone(&buffer),
            vec![Arc::clone(&queue)],
            Variant::Single,
            2,
            refuse,
        )
        .unwrap();

        assert!(drain.maybe_schedule(12, 16, 50, 0));
        drain.flush();
        assert!(buffer.lock().is_empty());
        assert!(queue.is_empty());
        assert_eq!(drain.drains_completed(), 1);
        assert_eq!(drain.batches_dropped(), 1);
    }

    #[test]
    fn test_failed_partition_links_nothing() {
        let buffer = filled(&[2, 4, 5, 7, 9], 32);
        let even = Arc::new(ConsumerQueue::new());
        let odd = Arc::new(ConsumerQueue::new());
        let drain = DrainCoordinator::with_allocator(
            Arc::clone(&buffer),
            vec![Arc::clone(&even), Arc::clone(&odd)],
            Variant::Parity,
            2,
            batches_over_two,
        )
        .unwrap();

        assert!(drain.maybe_schedule(20, 32, 50, 0));
        drain.flush();
        assert!(buffer.lock().is_empty());
        assert!(even.is_empty());
        assert!(odd.is_empty());
        assert_eq!(drain.batches_dropped(), 1);

        // The next batch goes through once allocation succeeds again.
        buffer.lock().push(&6u32.to_le_bytes());
        let healthy = DrainCoordinator::new(
            Arc::clone(&buffer),
            vec![Arc::clone(&even), Arc::clone(&odd)],
            Variant::Parity,
            2,
        )
        .unwrap();
        assert!(healthy.maybe_schedule(4, 32, 0, 0));
        healthy.flush();
        assert_eq!(even.try_pop(), Some(6));
        assert_eq!(healthy.batches_dropped(), 0);
    }

    #[test]
    fn test_queue_count_must_match_variant() {
        let buffer = filled(&[], 8);
        let result = DrainCoordinator::new(
            buffer,
            vec![Arc::new(ConsumerQueue::new())],
            Variant::Parity,
            2,
        );
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }
}
