//! The externally visible pending-offer channel.
//!
//! Workers pop candidates concurrently; the coordinator publishes at the back,
//! promotes paused candidates to the front, and purges the whole backlog when
//! a fresher model is adopted.

use hs_types::Candidate;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct OfferInner {
    queue: Mutex<VecDeque<Candidate>>,
    notify: Notify,
    closed: AtomicBool,
}

/// Multi-consumer FIFO of candidates offered to workers.
#[derive(Debug, Clone, Default)]
pub struct OfferChannel {
    inner: Arc<OfferInner>,
}

impl OfferChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_back(&self, candidate: Candidate) {
        self.inner.queue.lock().push_back(candidate);
        self.inner.notify.notify_one();
    }

    /// Offer ahead of everything else, replacing any copy of the same point
    /// that is still queued.
    pub fn promote(&self, candidate: Candidate) {
        let mut queue = self.inner.queue.lock();
        queue.retain(|queued| !queued.same_point(&candidate));
        queue.push_front(candidate);
        drop(queue);
        self.inner.notify.notify_one();
    }

    pub fn try_pop(&self) -> Option<Candidate> {
        self.inner.queue.lock().pop_front()
    }

    /// Wait for the next candidate. Returns `None` once the channel is closed
    /// and empty.
    pub async fn pop(&self) -> Option<Candidate> {
        loop {
            // Register before checking so a push between the check and the
            // await is not missed.
            let notified = self.inner.notify.notified();
            if let Some(candidate) = self.try_pop() {
                return Some(candidate);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.queue.lock().is_empty()
    }

    /// Discard the whole backlog, returning how many candidates were dropped.
    pub fn purge(&self) -> usize {
        let mut queue = self.inner.queue.lock();
        let dropped = queue.len();
        queue.clear();
        dropped
    }

    pub fn snapshot(&self) -> Vec<Candidate> {
        self.inner.queue.lock().iter().cloned().collect()
    }

    /// Wake every waiting consumer; subsequent pops on an empty channel return
    /// `None`.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn fifo_with_front_priority() {
        let offers = OfferChannel::new();
        offers.push_back(Candidate::new(vec![1.0]));
        offers.push_back(Candidate::new(vec![2.0]));
        offers.promote(Candidate::new(vec![0.0]));
        assert_eq!(offers.len(), 3);

        let order: Vec<f64> = std::iter::from_fn(|| offers.try_pop())
            .map(|c| c.params[0])
            .collect();
        assert_eq!(order, vec![0.0, 1.0, 2.0]);
        assert!(offers.is_empty());
    }

    #[test]
    fn purge_reports_dropped_count() {
        let offers = OfferChannel::new();
        offers.push_back(Candidate::new(vec![1.0]));
        offers.push_back(Candidate::new(vec![2.0]));
        assert_eq!(offers.purge(), 2);
        assert_eq!(offers.len(), 0);
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let offers = OfferChannel::new();
        let consumer = {
            let offers = offers.clone();
            tokio::spawn(async move { offers.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        offers.push_back(Candidate::new(vec![4.0]));

        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped.map(|c| c.params), Some(vec![4.0]));
    }

    #[tokio::test]
    async fn close_releases_waiters() {
        let offers = OfferChannel::new();
        let consumer = {
            let offers = offers.clone();
            tokio::spawn(async move { offers.pop().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        offers.close();

        let popped = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(popped.is_none());
    }

    #[test]
    fn promote_never_duplicates() {
        let offers = OfferChannel::new();
        offers.push_back(Candidate::new(vec![1.0]));
        offers.push_back(Candidate::new(vec![2.0]));
        offers.promote(Candidate::new(vec![2.0]));
        offers.promote(Candidate::new(vec![3.0]));

        let order: Vec<f64> = std::iter::from_fn(|| offers.try_pop())
            .map(|c| c.params[0])
            .collect();
        assert_eq!(order, vec![3.0, 2.0, 1.0]);
    }
}
