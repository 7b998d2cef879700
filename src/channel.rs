//! Blocking byte channel between producer and consumer sessions.
//!
//! Writers wait for room, readers wait for data, and both share the gate's
//! per-role wait queues. All state sits behind one lock.

use crate::config::Limits;
use crate::error::{Error, Result};
use crate::gate::{Gated, Role, RoleGate};
use crate::ring::ByteRing;
use crate::sync::{CondQueue, Interrupt, Monitor};
use std::sync::Arc;

struct ChannelState {
    gate: RoleGate,
    ring: ByteRing,
    writers: CondQueue,
    readers: CondQueue,
}

impl Gated for ChannelState {
    fn gate(&mut self) -> &mut RoleGate {
        &mut self.gate
    }

    fn waiters(&mut self, role: Role) -> &mut CondQueue {
        match role {
            Role::Producer => &mut self.writers,
            Role::Consumer => &mut self.readers,
        }
    }

    fn on_idle(&mut self) {
        if !self.ring.is_empty() {
            tracing::debug!("discarding {} unread bytes", self.ring.len());
        }
        self.ring.reset();
    }
}

pub struct BoundedChannel {
    monitor: Monitor<ChannelState>,
    max_transfer: usize,
}

impl BoundedChannel {
    pub fn new(limits: &Limits) -> Result<Arc<Self>> {
        limits.validate()?;
        Ok(Arc::new(Self {
            monitor: Monitor::new(ChannelState {
                gate: RoleGate::new(limits.max_producers, limits.max_consumers),
                ring: ByteRing::new(limits.channel_capacity),
                writers: CondQueue::new(),
                readers: CondQueue::new(),
            }),
            max_transfer: limits.max_transfer,
        }))
    }

    /// Opens a session of `role`, blocking until the other role is present.
    ///
    /// `interrupt` aborts the wait and stays attached to the session for its
    /// later reads and writes.
    pub fn open(self: &Arc<Self>, role: Role, interrupt: &Interrupt) -> Result<ChannelSession> {
        RoleGate::enter(&self.monitor, role, interrupt)?;
        Ok(ChannelSession {
            channel: Arc::clone(self),
            role,
            interrupt: interrupt.clone(),
        })
    }

    /// Bytes currently buffered.
    pub fn len(&self) -> usize {
        self.monitor.lock().ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.monitor.lock().ring.capacity()
    }

    pub fn active(&self, role: Role) -> usize {
        self.monitor.lock().gate.active(role)
    }

    fn check_transfer(&self, len: usize) -> Result<()> {
        if len > self.max_transfer {
            return Err(Error::invalid(format!(
                "transfer of {len} bytes exceeds the {} byte limit",
                self.max_transfer
            )));
        }
        Ok(())
    }

    /// Copies all of `data` in once there is room for it.
    ///
    /// Fails with [`Error::BrokenPipe`] as soon as no consumer is left.
    pub fn put(&self, data: &[u8], interrupt: &Interrupt) -> Result<usize> {
        self.check_transfer(data.len())?;

        let mut state = self.monitor.lock();
        while state.ring.avail() < data.len() && state.gate.active(Role::Consumer) > 0 {
            state = self.monitor.wait(state, |s| &mut s.writers, interrupt)?;
        }
        if state.gate.active(Role::Consumer) == 0 {
            return Err(Error::BrokenPipe);
        }
        let written = state.ring.push(data);
        state.readers.signal();
        Ok(written)
    }

    /// Removes `max_len` bytes once that many are buffered.
    ///
    /// With no producer left, returns whatever remains, and an empty vector
    /// once the ring is drained (end of stream).
    pub fn get(&self, max_len: usize, interrupt: &Interrupt) -> Result<Vec<u8>> {
        self.check_transfer(max_len)?;

        let mut state = self.monitor.lock();
        while state.ring.len() < max_len && state.gate.active(Role::Producer) > 0 {
            state = self.monitor.wait(state, |s| &mut s.readers, interrupt)?;
        }
        if state.ring.is_empty() {
            return Ok(Vec::new());
        }
        let data = state.ring.pop(max_len);
        state.writers.signal();
        Ok(data)
    }
}

/// One open end of a [`BoundedChannel`]. Closes itself when dropped.
pub struct ChannelSession {
    channel: Arc<BoundedChannel>,
    role: Role,
    interrupt: Interrupt,
}

impl ChannelSession {
    pub fn role(&self) -> Role {
        self.role
    }

    /// Handle that aborts this session's blocking calls from elsewhere.
    pub fn interrupter(&self) -> Interrupt {
        self.interrupt.clone()
    }

    pub fn write(&self, data: &[u8]) -> Result<usize> {
        if self.role != Role::Producer {
            return Err(Error::invalid("session was not opened for writing"));
        }
        self.channel.put(data, &self.interrupt)
    }

    pub fn read(&self, max_len: usize) -> Result<Vec<u8>> {
        if self.role != Role::Consumer {
            return Err(Error::invalid("session was not opened for reading"));
        }
        self.channel.get(max_len, &self.interrupt)
    }

    pub fn close(self) {}
}

impl Drop for ChannelSession {
    fn drop(&mut self) {
        RoleGate::leave(&self.channel.monitor, self.role);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;
    use std::time::Duration;

    fn small_channel() -> Arc<BoundedChannel> {
        BoundedChannel::new(&Limits {
            channel_capacity: 8,
            max_transfer: 8,
            ..Limits::default()
        })
        .unwrap()
    }

    /// Opens a producer and a consumer, returning them in that order.
    fn pair(channel: &Arc<BoundedChannel>) -> (ChannelSession, ChannelSession) {
        let consumer = {
            let channel = Arc::clone(channel);
            thread::spawn(move || channel.open(Role::Consumer, &Interrupt::new()))
        };
        let producer = channel.open(Role::Producer, &Interrupt::new()).unwrap();
        (producer, consumer.join().unwrap().unwrap())
    }

    fn settle() {
        thread::sleep(Duration::from_millis(50));
    }

    #[test]
    fn test_write_then_read() {
        let channel = small_channel();
        let (producer, consumer) = pair(&channel);
        assert_eq!(producer.write(b"hello").unwrap(), 5);
        assert_eq!(consumer.read(5).unwrap(), b"hello");
        assert!(channel.is_empty());
    }

    #[test]
    fn test_oversized_transfer_rejected() {
        let channel = small_channel();
        let (producer, consumer) = pair(&channel);
        assert!(matches!(producer.write(&[0; 9]), Err(Error::InvalidArgument(_))));
        assert!(matches!(consumer.read(9), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_wrong_direction_rejected() {
        let channel = small_channel();
        let (producer, consumer) = pair(&channel);
        assert!(producer.read(1).is_err());
        assert!(consumer.write(b"x").is_err());
    }

    #[test]
    fn test_reader_blocks_until_enough_data() {
        let channel = small_channel();
        let (producer, consumer) = pair(&channel);
        let reader = thread::spawn(move || consumer.read(4));
        producer.write(b"ab").unwrap();
        settle();
        assert!(!reader.is_finished());
        producer.write(b"cd").unwrap();
        assert_eq!(reader.join().unwrap().unwrap(), b"abcd");
    }

    #[test]
    fn test_writer_blocks_until_room() {
        let channel = small_channel();
        let (producer, consumer) = pair(&channel);
        producer.write(b"12345678").unwrap();
        let writer = thread::spawn(move || producer.write(b"9"));
        settle();
        assert!(!writer.is_finished());
        assert_eq!(consumer.read(1).unwrap(), b"1");
        assert_eq!(writer.join().unwrap().unwrap(), 1);
        assert_eq!(channel.len(), 8);
    }

    #[test]
    fn test_end_of_stream_after_producer_closes() {
        let channel = small_channel();
        let (producer, consumer) = pair(&channel);
        producer.write(b"abc").unwrap();
        producer.close();
        // Less than requested is handed over, then end of stream for good.
        assert_eq!(consumer.read(5).unwrap(), b"abc");
        assert!(consumer.read(5).unwrap().is_empty());
        assert!(consumer.read(1).unwrap().is_empty());
    }

    #[test]
    fn test_blocked_reader_sees_end_of_stream() {
        let channel = small_channel();
        let (producer, consumer) = pair(&channel);
        let reader = thread::spawn(move || consumer.read(4));
        settle();
        drop(producer);
        assert!(reader.join().unwrap().unwrap().is_empty());
    }

    #[test]
    fn test_broken_pipe_when_consumer_gone() {
        let channel = small_channel();
        let (producer, consumer) = pair(&channel);
        producer.write(b"12345678").unwrap();
        let writer = thread::spawn(move || {
            let blocked = producer.write(b"x");
            let later = producer.write(b"y");
            (blocked, later)
        });
        settle();
        drop(consumer);
        let (blocked, later) = writer.join().unwrap();
        assert!(matches!(blocked, Err(Error::BrokenPipe)));
        assert!(matches!(later, Err(Error::BrokenPipe)));
    }

    #[test]
    fn test_ring_reset_after_full_turnover() {
        let channel = small_channel();
        let (producer, consumer) = pair(&channel);
        producer.write(b"stale").unwrap();
        drop(producer);
        assert_eq!(channel.len(), 5);
        drop(consumer);
        assert!(channel.is_empty());
        assert_eq!(channel.active(Role::Producer), 0);
        assert_eq!(channel.active(Role::Consumer), 0);
    }

    #[test]
    fn test_interrupted_read_releases_lock() {
        let channel = small_channel();
        let (producer, consumer) = pair(&channel);
        let interrupter = consumer.interrupter();
        let reader = thread::spawn(move || {
            let first = consumer.read(4);
            (first, consumer)
        });
        settle();
        interrupter.raise();
        let (first, consumer) = reader.join().unwrap();
        assert!(matches!(first, Err(Error::Cancelled)));

        // The channel is still usable by both sides.
        producer.write(b"wxyz").unwrap();
        assert_eq!(consumer.read(4).unwrap(), b"wxyz");
    }

    #[test]
    fn test_second_writer_blocks_on_space_after_rendezvous() {
        let channel = small_channel();
        let writers: Vec<_> = (0..2)
            .map(|_| {
                let channel = Arc::clone(&channel);
                thread::spawn(move || {
                    let session = channel.open(Role::Producer, &Interrupt::new())?;
                    session.write(b"abcdef")
                })
            })
            .collect();
        settle();
        assert!(writers.iter().all(|w| !w.is_finished()));

        let consumer = channel.open(Role::Consumer, &Interrupt::new()).unwrap();
        settle();
        // Both passed the gate, but only one 6-byte write fits in 8 bytes.
        assert_eq!(writers.iter().filter(|w| w.is_finished()).count(), 1);
        assert_eq!(consumer.read(6).unwrap(), b"abcdef");
        for writer in writers {
            assert_eq!(writer.join().unwrap().unwrap(), 6);
        }
        assert_eq!(consumer.read(6).unwrap(), b"abcdef");
    }

    #[test]
    fn test_many_producers_many_consumers_keep_bounds() {
        let channel = BoundedChannel::new(&Limits {
            channel_capacity: 16,
            max_transfer: 4,
            ..Limits::default()
        })
        .unwrap();
        const ROUNDS: usize = 200;
        // Nobody transfers until every session is open, so an early
        // producer cannot end the stream for the others.
        let all_open = Arc::new(Barrier::new(5));

        let producers: Vec<_> = (0..3u8)
            .map(|id| {
                let channel = Arc::clone(&channel);
                let all_open = Arc::clone(&all_open);
                thread::spawn(move || {
                    let session = channel.open(Role::Producer, &Interrupt::new()).unwrap();
                    all_open.wait();
                    for _ in 0..ROUNDS {
                        session.write(&[id; 2]).unwrap();
                        assert!(channel.len() <= channel.capacity());
                    }
                })
            })
            .collect();
        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let channel = Arc::clone(&channel);
                let all_open = Arc::clone(&all_open);
                thread::spawn(move || {
                    let session = channel.open(Role::Consumer, &Interrupt::new()).unwrap();
                    all_open.wait();
                    let mut total = 0;
                    loop {
                        let chunk = session.read(2).unwrap();
                        if chunk.is_empty() {
                            return total;
                        }
                        total += chunk.len();
                    }
                })
            })
            .collect();

        for producer in producers {
            producer.join().unwrap();
        }
        let received: usize = consumers.into_iter().map(|c| c.join().unwrap()).sum();
        assert_eq!(received, 3 * ROUNDS * 2);
    }
}
