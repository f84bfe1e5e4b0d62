//! Queue item data model.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A message waiting in (or resolved by) the queue.
///
/// Only the dispatcher changes `attempts`, `last_attempt_time` and `sent_time`,
/// and always through the store so the write is conditional.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueItem {
    pub id: Uuid,
    /// Diagnostic copy of the message subject
    pub subject: String,
    /// Codec-produced payload
    #[serde(skip)]
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    /// Earliest time the item may be dispatched
    pub time_to_send: DateTime<Utc>,
    pub attempts: u32,
    pub last_attempt_time: Option<DateTime<Utc>>,
    pub sent_time: Option<DateTime<Utc>>,
    /// Set while a round holds the current attempt, cleared with its outcome
    pub claimed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn is_sent(&self) -> bool {
        self.sent_time.is_some()
    }

    /// Unsent, attempts left and due.
    pub fn is_dispatchable(&self, max_attempts: u32, now: DateTime<Utc>) -> bool {
        self.sent_time.is_none() && self.attempts < max_attempts && self.time_to_send <= now
    }

    /// Claimed by a round that has not recorded an outcome yet, and the
    /// claim is younger than `lease`.
    pub fn is_claim_active(&self, now: DateTime<Utc>, lease: Duration) -> bool {
        match (self.claimed_at, now.checked_sub_signed(lease)) {
            (Some(claimed_at), Some(cutoff)) => claimed_at > cutoff,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }

    /// Sent, or out of attempts.
    pub fn is_resolved(&self, max_attempts: u32) -> bool {
        self.sent_time.is_some() || self.attempts >= max_attempts
    }
}

/// An item about to be written by the enqueue path.
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub id: Uuid,
    pub subject: String,
    pub payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub time_to_send: DateTime<Utc>,
}

impl NewQueueItem {
    /// A new item due immediately.
    pub fn new(subject: impl Into<String>, payload: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            subject: subject.into(),
            payload,
            created_at: now,
            time_to_send: now,
        }
    }

    pub fn send_at(mut self, time_to_send: DateTime<Utc>) -> Self {
        self.time_to_send = time_to_send;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn into_item(self) -> QueueItem {
        QueueItem {
            id: self.id,
            subject: self.subject,
            payload: self.payload,
            created_at: self.created_at,
            time_to_send: self.time_to_send,
            attempts: 0,
            last_attempt_time: None,
            sent_time: None,
            claimed_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_item_is_pending() {
        let item = NewQueueItem::new("Hello", b"payload".to_vec()).into_item();
        assert_eq!(item.attempts, 0);
        assert!(item.last_attempt_time.is_none());
        assert!(!item.is_sent());
        assert!(item.is_dispatchable(3, Utc::now() + Duration::seconds(1)));
    }

    #[test]
    fn test_future_item_not_dispatchable() {
        let now = Utc::now();
        let item = NewQueueItem::new("Later", Vec::new())
            .send_at(now + Duration::hours(1))
            .into_item();
        assert!(!item.is_dispatchable(3, now));
    }

    #[test]
    fn test_exhausted_item_is_resolved() {
        let mut item = NewQueueItem::new("Failing", Vec::new()).into_item();
        item.attempts = 3;
        assert!(!item.is_dispatchable(3, Utc::now()));
        assert!(item.is_resolved(3));
        assert!(!item.is_resolved(4));
    }

    #[test]
    fn test_claim_lease_expires() {
        let now = Utc::now();
        let mut item = NewQueueItem::new("Claimed", Vec::new()).into_item();
        assert!(!item.is_claim_active(now, Duration::minutes(10)));

        item.claimed_at = Some(now - Duration::minutes(5));
        assert!(item.is_claim_active(now, Duration::minutes(10)));
        assert!(!item.is_claim_active(now, Duration::minutes(5)));
    }

    #[test]
    fn test_sent_item_is_resolved() {
        let mut item = NewQueueItem::new("Sent", Vec::new()).into_item();
        item.sent_time = Some(Utc::now());
        assert!(item.is_resolved(3));
        assert!(!item.is_dispatchable(3, Utc::now()));
    }
}
