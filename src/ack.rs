//! ACK Slot: the command/acknowledge rendezvous between a caller thread and the receiver
//! thread.
//!
//! A `Condvar` paired with the slot's own mutex lets a command call block until the receiver
//! thread observes the matching `COMMAND_ACK`, rather than polling on a timer.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckState {
    Idle,
    Accepted,
    Denied,
    Failed,
}

pub struct AckSlot {
    state: Mutex<AckState>,
    signal: Condvar,
}

pub enum AckOutcome {
    Accepted,
    Rejected,
    TimedOut,
}

impl AckSlot {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(AckState::Idle),
            signal: Condvar::new(),
        }
    }

    /// Consumer-side reset before issuing a new command, closing the window where a stale ACK
    /// from a prior command could be mistaken for this one's.
    pub fn reset(&self) {
        *self.state.lock().expect("ack mutex poisoned") = AckState::Idle;
    }

    /// Producer side: the receiver loop calls this from `COMMAND_ACK` dispatch. Only a
    /// transition out of `Idle` is meaningful; once terminal, the slot holds that value until
    /// the consumer resets it.
    pub fn set(&self, state: AckState) {
        let mut guard = self.state.lock().expect("ack mutex poisoned");
        *guard = state;
        self.signal.notify_all();
    }

    /// Blocks up to `timeout` for a terminal state, resetting to `Idle` before returning
    /// (consume-on-observe). The bound itself comes from the caller (`Config::ack_timeout`),
    /// not from this method.
    pub fn wait(&self, timeout: Duration) -> AckOutcome {
        let guard = self.state.lock().expect("ack mutex poisoned");
        let (mut guard, _timed_out) = self
            .signal
            .wait_timeout_while(guard, timeout, |state| *state == AckState::Idle)
            .expect("ack mutex poisoned");
        let outcome = match *guard {
            AckState::Idle => AckOutcome::TimedOut,
            AckState::Accepted => AckOutcome::Accepted,
            AckState::Denied | AckState::Failed => AckOutcome::Rejected,
        };
        *guard = AckState::Idle;
        outcome
    }
}

impl Default for AckSlot {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn accepted_before_timeout_returns_accepted() {
        let slot = Arc::new(AckSlot::new());
        let producer = Arc::clone(&slot);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.set(AckState::Accepted);
        });
        assert!(matches!(
            slot.wait(Duration::from_millis(500)),
            AckOutcome::Accepted
        ));
    }

    #[test]
    fn denied_maps_to_rejected() {
        let slot = Arc::new(AckSlot::new());
        let producer = Arc::clone(&slot);
        thread::spawn(move || producer.set(AckState::Denied));
        assert!(matches!(
            slot.wait(Duration::from_millis(500)),
            AckOutcome::Rejected
        ));
    }

    #[test]
    fn no_signal_times_out() {
        let slot = AckSlot::new();
        assert!(matches!(
            slot.wait(Duration::from_millis(50)),
            AckOutcome::TimedOut
        ));
    }

    #[test]
    fn reset_clears_a_stale_terminal_value() {
        let slot = AckSlot::new();
        slot.set(AckState::Accepted);
        slot.reset();
        assert!(matches!(
            slot.wait(Duration::from_millis(30)),
            AckOutcome::TimedOut
        ));
    }
}
