//! Thread registry
//!
//! A thread is one conversation against the executor: metadata, a transcript,
//! and a busy flag that serializes streaming cycles per thread. Threads are
//! keyed by UUID and live until closed; they deliberately survive the
//! connection that created them.

use dashmap::DashMap;

use patchbay_protocol::{new_id, MessageRole};

use crate::error::RequestError;

fn now_rfc3339() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

#[derive(Debug, Clone)]
pub struct StoredMessage {
    pub role: MessageRole,
    pub content: String,
    pub timestamp: String,
}

#[derive(Debug)]
struct Thread {
    project_hint: Option<String>,
    llm_override: Option<String>,
    created_at: String,
    updated_at: String,
    #[allow(dead_code)]
    connection_id: u64,
    messages: Vec<StoredMessage>,
    busy: bool,
}

/// What `thread.created` needs to echo back
#[derive(Debug, Clone)]
pub struct ThreadSnapshot {
    pub id: String,
    pub project_hint: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// What a streaming cycle needs from its thread
#[derive(Debug, Clone)]
pub struct CycleContext {
    pub project_hint: Option<String>,
    pub llm_override: Option<String>,
}

pub struct ThreadRegistry {
    threads: DashMap<String, Thread>,
}

impl ThreadRegistry {
    pub fn new() -> Self {
        Self {
            threads: DashMap::new(),
        }
    }

    pub fn create(&self, connection_id: u64, project_hint: Option<String>) -> ThreadSnapshot {
        let id = new_id();
        let now = now_rfc3339();
        self.threads.insert(
            id.clone(),
            Thread {
                project_hint: project_hint.clone(),
                llm_override: None,
                created_at: now.clone(),
                updated_at: now.clone(),
                connection_id,
                messages: Vec::new(),
                busy: false,
            },
        );

        ThreadSnapshot {
            id,
            project_hint,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn contains(&self, thread_id: &str) -> bool {
        self.threads.contains_key(thread_id)
    }

    /// Claim the thread for a streaming cycle. Atomic under the map's entry
    /// lock: checks existence, rejects a thread that is already mid-cycle,
    /// applies the per-message llm override, and flips the busy flag.
    pub fn begin_cycle(
        &self,
        thread_id: &str,
        llm: Option<String>,
    ) -> Result<CycleContext, RequestError> {
        let mut thread = self
            .threads
            .get_mut(thread_id)
            .ok_or(RequestError::ThreadNotFound)?;

        if thread.busy {
            return Err(RequestError::ThreadBusy);
        }

        if llm.is_some() {
            thread.llm_override = llm;
        }
        thread.busy = true;

        Ok(CycleContext {
            project_hint: thread.project_hint.clone(),
            llm_override: thread.llm_override.clone(),
        })
    }

    /// Release the busy flag at the end of a cycle. A no-op when the thread
    /// was closed mid-cycle.
    pub fn finish_cycle(&self, thread_id: &str) {
        if let Some(mut thread) = self.threads.get_mut(thread_id) {
            thread.busy = false;
        }
    }

    /// Append to the transcript and bump `updated_at`. Returns false when the
    /// thread no longer exists.
    pub fn append_message(&self, thread_id: &str, role: MessageRole, content: String) -> bool {
        match self.threads.get_mut(thread_id) {
            Some(mut thread) => {
                let now = now_rfc3339();
                thread.messages.push(StoredMessage {
                    role,
                    content,
                    timestamp: now.clone(),
                });
                thread.updated_at = now;
                true
            }
            None => false,
        }
    }

    /// Remove the thread. Returns whether it existed.
    pub fn close(&self, thread_id: &str) -> bool {
        self.threads.remove(thread_id).is_some()
    }

    pub fn is_busy(&self, thread_id: &str) -> bool {
        self.threads
            .get(thread_id)
            .map(|thread| thread.busy)
            .unwrap_or(false)
    }

    pub fn message_count(&self, thread_id: &str) -> usize {
        self.threads
            .get(thread_id)
            .map(|thread| thread.messages.len())
            .unwrap_or(0)
    }

    pub fn last_message(&self, thread_id: &str) -> Option<StoredMessage> {
        self.threads
            .get(thread_id)
            .and_then(|thread| thread.messages.last().cloned())
    }
}

impl Default for ThreadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use patchbay_protocol::MessageRole;

    use super::ThreadRegistry;
    use crate::error::RequestError;

    #[test]
    fn creation_stamps_equal_timestamps() {
        let registry = ThreadRegistry::new();
        let snapshot = registry.create(1, Some("demo".to_string()));
        assert_eq!(snapshot.created_at, snapshot.updated_at);
        assert!(registry.contains(&snapshot.id));
    }

    #[test]
    fn begin_cycle_rejects_unknown_thread() {
        let registry = ThreadRegistry::new();
        let err = registry.begin_cycle("missing", None).unwrap_err();
        assert_eq!(err, RequestError::ThreadNotFound);
    }

    #[test]
    fn busy_thread_bounces_second_cycle() {
        let registry = ThreadRegistry::new();
        let snapshot = registry.create(1, None);

        registry.begin_cycle(&snapshot.id, None).expect("first cycle");
        let err = registry.begin_cycle(&snapshot.id, None).unwrap_err();
        assert_eq!(err, RequestError::ThreadBusy);

        registry.finish_cycle(&snapshot.id);
        registry
            .begin_cycle(&snapshot.id, None)
            .expect("cycle after release");
    }

    #[test]
    fn llm_override_persists_across_cycles() {
        let registry = ThreadRegistry::new();
        let snapshot = registry.create(1, None);

        let ctx = registry
            .begin_cycle(&snapshot.id, Some("claude".to_string()))
            .expect("first cycle");
        assert_eq!(ctx.llm_override.as_deref(), Some("claude"));
        registry.finish_cycle(&snapshot.id);

        let ctx = registry.begin_cycle(&snapshot.id, None).expect("second cycle");
        assert_eq!(ctx.llm_override.as_deref(), Some("claude"));
    }

    #[test]
    fn transcript_appends_in_order() {
        let registry = ThreadRegistry::new();
        let snapshot = registry.create(1, None);

        assert!(registry.append_message(&snapshot.id, MessageRole::User, "run tests".into()));
        assert!(registry.append_message(&snapshot.id, MessageRole::Assistant, "all green".into()));
        assert_eq!(registry.message_count(&snapshot.id), 2);

        let last = registry.last_message(&snapshot.id).expect("last message");
        assert_eq!(last.role, MessageRole::Assistant);
        assert_eq!(last.content, "all green");
    }

    #[test]
    fn append_to_closed_thread_is_reported() {
        let registry = ThreadRegistry::new();
        let snapshot = registry.create(1, None);
        assert!(registry.close(&snapshot.id));
        assert!(!registry.append_message(&snapshot.id, MessageRole::User, "hello".into()));
        assert!(!registry.close(&snapshot.id));
    }
}
