//! Timer-driven device: a periodic producer feeding one or two consumer
//! queues through threshold-triggered drains.
//!
//! The first session to open arms the timer. In the parity variant a
//! session also waits at open until its partner has opened. The last
//! session to close stops the timer, waits out any running drain and
//! empties every buffer, so the next open starts from scratch.

use crate::config::{ConfigField, ModuleConfig, SharedConfig, Variant};
use crate::drain::DrainCoordinator;
use crate::error::{Error, Result};
use crate::producer::{PeriodicProducer, RandomSource, ValueSource};
use crate::queue::ConsumerQueue;
use crate::ring::ByteRing;
use crate::sync::{CondQueue, FastLock, Interrupt, Monitor};
use crate::timer::PeriodicTimer;
use std::sync::Arc;
use std::time::Duration;

/// Longest rendering of one value: ten digits and a newline.
pub const MAX_RENDERED_LEN: usize = 11;

/// Builds the value source for each new timer run.
pub type SourceFactory = Box<dyn Fn() -> Box<dyn ValueSource> + Send + Sync>;

struct Sessions {
    active: usize,
    /// Times the session count has reached the variant's full set. Only
    /// ever grows, so a waiter that saw it move cannot miss its partner.
    pairings: u64,
    taken: Vec<bool>,
    arrivals: CondQueue,
    timer: Option<PeriodicTimer>,
}

struct ModuleShared {
    variant: Variant,
    config: Arc<SharedConfig>,
    buffer: Arc<FastLock<ByteRing>>,
    queues: Vec<Arc<ConsumerQueue>>,
    drain: Arc<DrainCoordinator>,
    sessions: Monitor<Sessions>,
    source: SourceFactory,
    timer_context: usize,
}

impl ModuleShared {
    fn arm(&self) -> Result<PeriodicTimer> {
        let mut producer = PeriodicProducer::new(
            Arc::clone(&self.buffer),
            Arc::clone(&self.config),
            Arc::clone(&self.drain),
            (self.source)(),
            self.timer_context,
        );
        let config = Arc::clone(&self.config);
        let timer = PeriodicTimer::start(
            "modtimer",
            move || Duration::from_millis(u64::from(config.get(ConfigField::PeriodMs))),
            move || {
                producer.fire();
            },
        )?;
        tracing::info!("timer armed");
        Ok(timer)
    }

    fn release(&self, slot: usize) {
        let mut sessions = self.sessions.lock();
        sessions.taken[slot] = false;
        sessions.active = sessions.active.saturating_sub(1);
        if sessions.active > 0 {
            return;
        }

        // Teardown stays under the session lock so an open cannot re-arm
        // halfway through it.
        if let Some(timer) = sessions.timer.take() {
            timer.stop();
        }
        self.drain.flush();
        self.buffer.lock().reset();
        let discarded: usize = self.queues.iter().map(|queue| queue.clear()).sum();
        tracing::info!("last session closed, discarded {discarded} queued values");
    }
}

pub struct TimerModule {
    shared: Arc<ModuleShared>,
}

impl TimerModule {
    pub fn new(config: &ModuleConfig) -> Result<Self> {
        Self::with_source(
            config,
            Box::new(|| -> Box<dyn ValueSource> { Box::new(RandomSource::new()) }),
        )
    }

    pub fn with_source(config: &ModuleConfig, source: SourceFactory) -> Result<Self> {
        config.validate()?;
        let variant = config.variant;
        let buffer = Arc::new(FastLock::new(ByteRing::new(config.limits.sample_capacity)));
        let queues: Vec<Arc<ConsumerQueue>> = (0..variant.queue_count())
            .map(|_| Arc::new(ConsumerQueue::new()))
            .collect();
        let drain = DrainCoordinator::new(
            Arc::clone(&buffer),
            queues.clone(),
            variant,
            config.limits.workers,
        )?;

        Ok(Self {
            shared: Arc::new(ModuleShared {
                variant,
                config: Arc::new(SharedConfig::new(config.timer)?),
                buffer,
                queues,
                drain: Arc::new(drain),
                sessions: Monitor::new(Sessions {
                    active: 0,
                    pairings: 0,
                    taken: vec![false; variant.queue_count()],
                    arrivals: CondQueue::new(),
                    timer: None,
                }),
                source,
                timer_context: 0,
            }),
        })
    }

    /// Opens a session bound to the first free queue.
    ///
    /// Fails with [`Error::WouldBlockAgain`] once every queue has a session.
    /// In the parity variant, blocks until both sessions are open.
    pub fn open(&self, interrupt: &Interrupt) -> Result<TimerSession> {
        let shared = &self.shared;
        let expected = shared.variant.queue_count();

        let mut sessions = shared.sessions.lock();
        let slot = sessions
            .taken
            .iter()
            .position(|taken| !taken)
            .ok_or(Error::WouldBlockAgain)?;
        if sessions.active == 0 {
            sessions.timer = Some(shared.arm()?);
        }
        sessions.taken[slot] = true;
        sessions.active += 1;
        if sessions.active == expected {
            sessions.pairings += 1;
        }
        let arrived_at = sessions.pairings;
        sessions.arrivals.broadcast();
        tracing::debug!("session opened on queue {slot}");

        // The partner may open and close again before this waiter runs, so
        // the wait ends on the pairing count moving, not on `active`.
        while sessions.active < expected && sessions.pairings == arrived_at {
            sessions = match shared.sessions.wait(sessions, |s| &mut s.arrivals, interrupt) {
                Ok(sessions) => sessions,
                Err(err) => {
                    shared.release(slot);
                    return Err(err);
                }
            };
        }
        drop(sessions);

        Ok(TimerSession {
            shared: Arc::clone(shared),
            slot,
            interrupt: interrupt.clone(),
        })
    }

    /// The live configuration endpoint.
    pub fn config(&self) -> &SharedConfig {
        &self.shared.config
    }

    pub fn variant(&self) -> Variant {
        self.shared.variant
    }

    pub fn active_sessions(&self) -> usize {
        self.shared.sessions.lock().active
    }

    pub fn is_armed(&self) -> bool {
        self.shared.sessions.lock().timer.is_some()
    }

    /// Bytes waiting in the sample buffer.
    pub fn buffered(&self) -> usize {
        self.shared.buffer.lock().len()
    }

    /// Values waiting in queue `slot`.
    pub fn queued(&self, slot: usize) -> usize {
        self.shared.queues.get(slot).map_or(0, |queue| queue.len())
    }

    pub fn drains_completed(&self) -> usize {
        self.shared.drain.drains_completed()
    }
}

/// A reader bound to one consumer queue. Closes itself when dropped.
pub struct TimerSession {
    shared: Arc<ModuleShared>,
    slot: usize,
    interrupt: Interrupt,
}

impl TimerSession {
    /// Index of the queue this session reads: 0 for the even queue of the
    /// parity variant, 1 for the odd one.
    pub fn queue(&self) -> usize {
        self.slot
    }

    pub fn interrupter(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Waits for the next value on this session's queue.
    pub fn read_value(&self) -> Result<u32> {
        self.shared.queues[self.slot].pop(&self.interrupt)
    }

    /// Reads one value as decimal text followed by a newline.
    pub fn read(&self, max_len: usize) -> Result<Vec<u8>> {
        if max_len < MAX_RENDERED_LEN {
            return Err(Error::invalid(format!(
                "read buffer of {max_len} bytes is below {MAX_RENDERED_LEN}"
            )));
        }
        let value = self.read_value()?;
        Ok(format!("{value}\n").into_bytes())
    }

    pub fn close(self) {}
}

impl Drop for TimerSession {
    fn drop(&mut self) {
        self.shared.release(self.slot);
    }
}
