//! Outgoing command queue

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use crate::signal::lock;

#[derive(Debug, Default)]
struct QueueState {
    commands: VecDeque<String>,
    /// The transmitter holds a command it has not finished writing
    in_flight: bool,
}

/// FIFO of commands awaiting transmission
///
/// Commands survive reconnects; only the transmitter pops.
#[derive(Debug, Default)]
pub(crate) struct CommandQueue {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl CommandQueue {
    pub fn push(&self, command: String) {
        lock(&self.state).commands.push_back(command);
        self.available.notify_one();
    }

    /// Take the next command, waiting up to `timeout` for one
    ///
    /// Calling this marks the previous command as finished. May return early
    /// with `None` when woken by [`CommandQueue::wake`].
    pub fn pop_timeout(&self, timeout: Duration) -> Option<String> {
        let mut state = lock(&self.state);
        state.in_flight = false;
        if state.commands.is_empty() {
            state = self
                .available
                .wait_timeout(state, timeout)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        let next = state.commands.pop_front();
        state.in_flight = next.is_some();
        next
    }

    /// Drop the claim on the command being written
    pub fn abandon(&self) {
        lock(&self.state).in_flight = false;
    }

    /// Put back a command that was taken but not completely written
    ///
    /// It goes to the front, ahead of anything queued since.
    pub fn requeue(&self, command: String) {
        let mut state = lock(&self.state);
        state.in_flight = false;
        state.commands.push_front(command);
        drop(state);
        self.available.notify_one();
    }

    /// Wake a waiting transmitter
    pub fn wake(&self) {
        self.available.notify_all();
    }

    pub fn len(&self) -> usize {
        lock(&self.state).commands.len()
    }

    /// Nothing queued and nothing being written
    pub fn is_drained(&self) -> bool {
        let state = lock(&self.state);
        state.commands.is_empty() && !state.in_flight
    }
}
