//! Admission gate that holds a session back until its counterpart role is
//! present.

use crate::error::{Error, Result};
use crate::sync::{CondQueue, Interrupt, Monitor};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Producer,
    Consumer,
}

impl Role {
    pub fn counterpart(self) -> Role {
        match self {
            Role::Producer => Role::Consumer,
            Role::Consumer => Role::Producer,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Producer => f.write_str("producer"),
            Role::Consumer => f.write_str("consumer"),
        }
    }
}

/// Monitor state that embeds a [`RoleGate`].
///
/// Each role has one wait queue, shared by everything a session of that
/// role may block on (the gate itself and, for a channel, buffer space or
/// data), so a role arriving or leaving can wake all of them at once.
pub trait Gated {
    fn gate(&mut self) -> &mut RoleGate;

    fn waiters(&mut self, role: Role) -> &mut CondQueue;

    /// Called under the lock once both roles have gone.
    fn on_idle(&mut self) {}
}

#[derive(Debug, Clone, Default)]
pub struct RoleGate {
    producers: usize,
    consumers: usize,
    max_producers: Option<usize>,
    max_consumers: Option<usize>,
}

impl RoleGate {
    pub fn new(max_producers: Option<usize>, max_consumers: Option<usize>) -> Self {
        Self {
            max_producers,
            max_consumers,
            ..Self::default()
        }
    }

    pub fn active(&self, role: Role) -> usize {
        match role {
            Role::Producer => self.producers,
            Role::Consumer => self.consumers,
        }
    }

    pub fn has_counterpart(&self, role: Role) -> bool {
        self.active(role.counterpart()) > 0
    }

    pub fn is_idle(&self) -> bool {
        self.producers == 0 && self.consumers == 0
    }

    fn count_mut(&mut self, role: Role) -> &mut usize {
        match role {
            Role::Producer => &mut self.producers,
            Role::Consumer => &mut self.consumers,
        }
    }

    fn admit(&mut self, role: Role) -> Result<()> {
        let limit = match role {
            Role::Producer => self.max_producers,
            Role::Consumer => self.max_consumers,
        };
        if limit.is_some_and(|max| self.active(role) >= max) {
            return Err(Error::WouldBlockAgain);
        }
        *self.count_mut(role) += 1;
        Ok(())
    }

    fn depart(&mut self, role: Role) {
        let count = self.count_mut(role);
        *count = count.saturating_sub(1);
    }

    /// Registers a session of `role` and blocks until the other role has at
    /// least one active session.
    ///
    /// Arrival wakes every waiter of the other role first, since some of
    /// them may have been blocked only because this role was missing.
    pub fn enter<S: Gated>(monitor: &Monitor<S>, role: Role, interrupt: &Interrupt) -> Result<()> {
        let mut state = monitor.lock();
        state.gate().admit(role)?;
        let woken = state.waiters(role.counterpart()).broadcast();
        tracing::debug!("{role} arrived, woke {woken} waiting {}", role.counterpart());

        while !state.gate().has_counterpart(role) {
            state = match monitor.wait(state, |s| s.waiters(role), interrupt) {
                Ok(state) => state,
                Err(err) => {
                    Self::leave(monitor, role);
                    return Err(err);
                }
            };
        }
        Ok(())
    }

    /// Unregisters a session of `role`, waking every waiter of the other
    /// role so they can notice it may be gone.
    pub fn leave<S: Gated>(monitor: &Monitor<S>, role: Role) {
        let mut state = monitor.lock();
        state.gate().depart(role);
        state.waiters(role.counterpart()).broadcast();
        if state.gate().is_idle() {
            state.on_idle();
        }
        tracing::debug!("{role} left");
    }
}
