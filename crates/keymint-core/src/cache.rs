//! The deduplicating request cache.
//!
//! One [`CredentialSlot`] per subject name; the slot resolves exactly once
//! and every waiter observes the same terminal value. The insert-or-fetch
//! step and the task enqueue happen under one lock, which is what makes
//! "at most one generation task per name" hold under any interleaving.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;

use keymint_pki::IssuedCredential;

use crate::errors::{IssueFailure, ServiceError};

pub type IssueOutcome = Result<Arc<IssuedCredential>, IssueFailure>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
        }
    }
}

/// Single-assignment result slot. Exactly one worker resolves it; any
/// number of waiters observe the resolution. A waiter that gives up only
/// drops its own receiver; the slot and the other waiters are untouched.
#[derive(Debug)]
pub struct CredentialSlot {
    subject: String,
    outcome: watch::Sender<Option<IssueOutcome>>,
}

impl CredentialSlot {
    fn new(subject: &str) -> Arc<Self> {
        let (outcome, _) = watch::channel(None);
        Arc::new(Self {
            subject: subject.to_string(),
            outcome,
        })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn is_pending(&self) -> bool {
        self.outcome.borrow().is_none()
    }

    fn is_failed(&self) -> bool {
        matches!(&*self.outcome.borrow(), Some(Err(_)))
    }

    /// First write wins; a second resolution attempt is a no-op.
    fn resolve(&self, outcome: IssueOutcome) -> bool {
        let mut pending = Some(outcome);
        self.outcome.send_if_modified(|current| {
            if current.is_none() {
                *current = pending.take();
                true
            } else {
                false
            }
        })
    }

    /// Wait for the terminal value.
    pub async fn wait(&self) -> IssueOutcome {
        let mut rx = self.outcome.subscribe();
        let result = match rx.wait_for(|outcome| outcome.is_some()).await {
            Ok(outcome) => outcome
                .clone()
                .unwrap_or_else(|| Err(IssueFailure::worker_lost("slot observed empty after wake"))),
            // The sender lives inside this slot, so this only happens if
            // the slot itself is torn down mid-wait.
            Err(_) => Err(IssueFailure::worker_lost("slot dropped before resolution")),
        };
        result
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, Arc<CredentialSlot>>,
    resolved_order: VecDeque<(String, Arc<CredentialSlot>)>,
}

/// Maps subject names to slots with atomic insert-or-fetch.
#[derive(Debug)]
pub struct IssueCache {
    state: Mutex<CacheState>,
    /// Bound on resolved entries; `0` means memoize forever.
    capacity: usize,
}

impl IssueCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            capacity,
        }
    }

    /// Return the existing live slot for `subject`, or install a fresh
    /// pending one. On a miss, `enqueue` runs while the map lock is held;
    /// if it fails the entry is not installed.
    pub fn get_or_create<E>(
        &self,
        subject: &str,
        enqueue: E,
    ) -> Result<(Arc<CredentialSlot>, CacheStatus), ServiceError>
    where
        E: FnOnce(Arc<CredentialSlot>) -> Result<(), ServiceError>,
    {
        let mut state = self.state.lock().expect("issue cache lock poisoned");
        if let Some(existing) = state.entries.get(subject) {
            if !existing.is_failed() {
                return Ok((Arc::clone(existing), CacheStatus::Hit));
            }
        }

        let slot = CredentialSlot::new(subject);
        enqueue(Arc::clone(&slot))?;
        state.entries.insert(subject.to_string(), Arc::clone(&slot));
        Ok((slot, CacheStatus::Miss))
    }

    /// Resolve `slot` with a freshly issued credential and keep the entry
    /// for future hits, evicting the oldest resolved entries past the
    /// configured capacity.
    pub fn resolve_success(&self, slot: &Arc<CredentialSlot>, credential: Arc<IssuedCredential>) {
        let mut state = self.state.lock().expect("issue cache lock poisoned");
        slot.resolve(Ok(credential));

        let still_current = state
            .entries
            .get(slot.subject())
            .is_some_and(|current| Arc::ptr_eq(current, slot));
        if !still_current {
            return;
        }
        state
            .resolved_order
            .push_back((slot.subject().to_string(), Arc::clone(slot)));
        if self.capacity == 0 {
            return;
        }
        while state.resolved_order.len() > self.capacity {
            let Some((name, evicted)) = state.resolved_order.pop_front() else {
                break;
            };
            if state
                .entries
                .get(&name)
                .is_some_and(|current| Arc::ptr_eq(current, &evicted))
            {
                state.entries.remove(&name);
            }
        }
    }

    /// Resolve `slot` as failed and purge its entry so the next request
    /// for the subject gets a fresh attempt. The purge is pointer-compared
    /// so a newer entry for the same subject is never clobbered, and only
    /// happens when the slot really is in the failed state; a slot that
    /// already resolved successfully stays memoized.
    pub fn resolve_failure(&self, slot: &Arc<CredentialSlot>, failure: IssueFailure) {
        let mut state = self.state.lock().expect("issue cache lock poisoned");
        slot.resolve(Err(failure));
        if slot.is_failed()
            && state
                .entries
                .get(slot.subject())
                .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            state.entries.remove(slot.subject());
        }
    }

    /// Fail every still-pending slot, purging its entry. Returns how many
    /// slots were failed. Used at shutdown so no waiter hangs forever.
    pub fn fail_all_pending(&self, failure: &IssueFailure) -> usize {
        let mut state = self.state.lock().expect("issue cache lock poisoned");
        let pending: Vec<(String, Arc<CredentialSlot>)> = state
            .entries
            .iter()
            .filter(|(_, slot)| slot.is_pending())
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();
        for (name, slot) in &pending {
            state.entries.remove(name);
            slot.resolve(Err(failure.clone()));
        }
        pending.len()
    }

    pub fn contains(&self, subject: &str) -> bool {
        self.state
            .lock()
            .expect("issue cache lock poisoned")
            .entries
            .contains_key(subject)
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("issue cache lock poisoned")
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
