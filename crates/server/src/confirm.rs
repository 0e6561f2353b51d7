//! Confirmation rendezvous
//!
//! When the executor pauses for a human decision, the streaming cycle parks
//! here: a fresh action id maps to a one-shot sender and the cycle awaits
//! the paired receiver. Resolution is exactly-once: the first `resolve`
//! for an id wins and every later attempt is a reported no-op.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;
use tracing::debug;

use patchbay_protocol::new_id;

#[derive(Debug)]
struct PendingAction {
    thread_id: String,
    prompt: String,
    tx: oneshot::Sender<bool>,
}

pub struct ConfirmationRendezvous {
    pending: Mutex<HashMap<String, PendingAction>>,
}

impl ConfirmationRendezvous {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Park a confirmation. Returns the fresh action id to put on the wire
    /// and the receiver the cycle suspends on. A receiver whose sender is
    /// dropped resolves as declined.
    pub fn request(&self, thread_id: &str, prompt: &str) -> (String, oneshot::Receiver<bool>) {
        let action_id = new_id();
        let (tx, rx) = oneshot::channel();

        let mut pending = self.pending.lock().expect("pending lock poisoned");
        pending.insert(
            action_id.clone(),
            PendingAction {
                thread_id: thread_id.to_string(),
                prompt: prompt.to_string(),
                tx,
            },
        );

        (action_id, rx)
    }

    /// Deliver a decision. Returns false when the id is unknown, already
    /// resolved, or the waiter has gone away.
    pub fn resolve(&self, action_id: &str, confirmed: bool) -> bool {
        let entry = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            pending.remove(action_id)
        };

        match entry {
            Some(action) => action.tx.send(confirmed).is_ok(),
            None => false,
        }
    }

    /// Force-resolve every pending confirmation of one thread, declined or
    /// confirmed wholesale. `thread.close` uses this with `confirmed = false`
    /// so suspended cycles always resume.
    pub fn resolve_thread(&self, thread_id: &str, confirmed: bool) -> usize {
        let drained: Vec<(String, PendingAction)> = {
            let mut pending = self.pending.lock().expect("pending lock poisoned");
            let ids: Vec<String> = pending
                .iter()
                .filter(|(_, action)| action.thread_id == thread_id)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|action| (id, action)))
                .collect()
        };

        let mut resolved = 0;
        for (action_id, action) in drained {
            debug!(
                component = "confirm",
                event = "confirm.force_resolved",
                action_id = %action_id,
                thread_id = %action.thread_id,
                prompt = %action.prompt,
                confirmed,
                "Force-resolving pending confirmation"
            );
            if action.tx.send(confirmed).is_ok() {
                resolved += 1;
            }
        }
        resolved
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("pending lock poisoned").len()
    }
}

impl Default for ConfirmationRendezvous {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::oneshot::error::TryRecvError;

    use super::ConfirmationRendezvous;

    #[tokio::test]
    async fn first_resolve_wins_and_later_ones_are_noops() {
        let rendezvous = ConfirmationRendezvous::new();
        let (action_id, rx) = rendezvous.request("thread-1", "Deploy?");

        assert!(rendezvous.resolve(&action_id, true));
        assert_eq!(rx.await, Ok(true));

        assert!(!rendezvous.resolve(&action_id, false));
        assert_eq!(rendezvous.pending_count(), 0);
    }

    #[test]
    fn unknown_action_is_a_reported_noop() {
        let rendezvous = ConfirmationRendezvous::new();
        assert!(!rendezvous.resolve("no-such-action", true));
    }

    #[test]
    fn resolving_a_gone_waiter_reports_failure() {
        let rendezvous = ConfirmationRendezvous::new();
        let (action_id, rx) = rendezvous.request("thread-1", "Deploy?");
        drop(rx);
        assert!(!rendezvous.resolve(&action_id, true));
    }

    #[tokio::test]
    async fn closing_a_thread_declines_only_its_confirmations() {
        let rendezvous = ConfirmationRendezvous::new();
        let (_, rx_a) = rendezvous.request("thread-a", "First?");
        let (_, rx_b) = rendezvous.request("thread-a", "Second?");
        let (_, mut rx_other) = rendezvous.request("thread-b", "Unrelated?");

        assert_eq!(rendezvous.resolve_thread("thread-a", false), 2);
        assert_eq!(rx_a.await, Ok(false));
        assert_eq!(rx_b.await, Ok(false));
        assert_eq!(rx_other.try_recv(), Err(TryRecvError::Empty));
        assert_eq!(rendezvous.pending_count(), 1);
    }
}
