//! The work done on each timer expiry: store one value, then maybe hand a
//! drain to a worker.

use crate::config::{ConfigField, SharedConfig, VALUE_SIZE};
use crate::drain::DrainCoordinator;
use crate::ring::ByteRing;
use crate::sync::FastLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Where generated values come from. `next_value` returns a value below
/// `bound`, which is always positive.
pub trait ValueSource: Send {
    fn next_value(&mut self, bound: u32) -> u32;
}

impl<F> ValueSource for F
where
    F: FnMut(u32) -> u32 + Send,
{
    fn next_value(&mut self, bound: u32) -> u32 {
        self(bound)
    }
}

/// Uniformly random values.
pub struct RandomSource {
    rng: StdRng,
}

impl RandomSource {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueSource for RandomSource {
    fn next_value(&mut self, bound: u32) -> u32 {
        self.rng.gen_range(0..bound.max(1))
    }
}

/// Outcome of one expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fire {
    pub value: u32,
    pub stored: bool,
    pub occupied: usize,
    pub drain_scheduled: bool,
}

pub struct PeriodicProducer {
    buffer: Arc<FastLock<ByteRing>>,
    config: Arc<SharedConfig>,
    drain: Arc<DrainCoordinator>,
    source: Box<dyn ValueSource>,
    context: usize,
}

impl PeriodicProducer {
    /// `context` is the worker context the timer counts as running on.
    pub fn new(
        buffer: Arc<FastLock<ByteRing>>,
        config: Arc<SharedConfig>,
        drain: Arc<DrainCoordinator>,
        source: Box<dyn ValueSource>,
        context: usize,
    ) -> Self {
        Self {
            buffer,
            config,
            drain,
            source,
            context,
        }
    }

    /// Runs one expiry. Takes only the fast lock and never waits.
    pub fn fire(&mut self) -> Fire {
        let bound = self.config.get(ConfigField::ValueBound);
        let (value, stored, occupied, capacity, percent) = {
            let mut ring = self.buffer.lock();
            let value = self.source.next_value(bound);
            let stored =
                ring.avail() >= VALUE_SIZE && ring.push(&value.to_le_bytes()) == VALUE_SIZE;
            (value, stored, ring.len(), ring.capacity(), ring.percent_full())
        };

        if stored {
            tracing::debug!(
                "timer: stored {value}, buffer at {percent}% ({occupied}/{capacity} bytes)"
            );
        } else {
            tracing::warn!("timer: sample buffer full, dropped {value}");
        }

        let threshold = self.config.get(ConfigField::ThresholdPercent);
        let drain_scheduled = self
            .drain
            .maybe_schedule(occupied, capacity, threshold, self.context);
        Fire {
            value,
            stored,
            occupied,
            drain_scheduled,
        }
    }
}
