use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::common::Contact;

#[derive(Debug, Clone)]
/// A sent request waiting for its response.
pub struct PendingCall<C> {
    pub to: Contact,
    pub issued_at: Instant,
    /// Whatever the caller needs to route the completion.
    pub context: C,
}

#[derive(Debug)]
/// Pending calls by correlation id.
///
/// Removal is the only way a call completes, so each call completes at most once.
pub struct PendingCalls<C> {
    calls: HashMap<String, PendingCall<C>>,
}

impl<C> PendingCalls<C> {
    pub fn new() -> Self {
        Self {
            calls: HashMap::new(),
        }
    }

    pub fn insert(&mut self, id: String, call: PendingCall<C>) {
        self.calls.insert(id, call);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.calls.contains_key(id)
    }

    pub fn remove(&mut self, id: &str) -> Option<PendingCall<C>> {
        self.calls.remove(id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Remove and return every call older than `timeout` as of `now`.
    pub fn expire_at(&mut self, now: Instant, timeout: Duration) -> Vec<(String, PendingCall<C>)> {
        let expired: Vec<String> = self
            .calls
            .iter()
            .filter(|(_, call)| now.saturating_duration_since(call.issued_at) > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.calls.remove(&id).map(|call| (id, call)))
            .collect()
    }
}

impl<C> Default for PendingCalls<C> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn expire_only_stale_calls() {
        let mut calls = PendingCalls::new();
        let now = Instant::now();
        let timeout = Duration::from_secs(5);
        let to = Contact::nickname("beep").unwrap();

        calls.insert(
            "old".to_string(),
            PendingCall {
                to: to.clone(),
                issued_at: now,
                context: 1,
            },
        );
        calls.insert(
            "new".to_string(),
            PendingCall {
                to,
                issued_at: now + Duration::from_secs(3),
                context: 2,
            },
        );

        assert!(calls.expire_at(now + timeout, timeout).is_empty());

        let expired = calls.expire_at(now + Duration::from_secs(6), timeout);

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "old");
        assert_eq!(expired[0].1.context, 1);
        assert!(calls.contains("new"));

        // Already expired calls can not complete again.
        assert!(calls.remove("old").is_none());
    }
}
