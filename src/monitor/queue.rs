use std::collections::VecDeque;

/// Single-flight render queue: at most one URL is loading, the rest wait in
/// FIFO order without duplicates. Holds URLs only, never watches.
#[derive(Debug, Default)]
pub struct RenderQueue {
    in_flight: Option<String>,
    pending: VecDeque<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// The renderer was idle; the URL is now in flight and must be dispatched.
    Dispatch,
    /// Appended to the pending list.
    Pending,
    /// Already in flight or pending; nothing changed.
    Duplicate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removed {
    NotQueued,
    Pending,
    /// Still in flight; its completion must be discarded by the caller.
    InFlight,
}

impl RenderQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, url: &str) -> Enqueued {
        if self.contains(url) {
            return Enqueued::Duplicate;
        }
        if self.in_flight.is_none() {
            self.in_flight = Some(url.to_string());
            Enqueued::Dispatch
        } else {
            self.pending.push_back(url.to_string());
            Enqueued::Pending
        }
    }

    pub fn in_flight(&self) -> Option<&str> {
        self.in_flight.as_deref()
    }

    pub fn pending(&self) -> impl Iterator<Item = &str> {
        self.pending.iter().map(String::as_str)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.in_flight.as_deref() == Some(url) || self.pending.iter().any(|p| p == url)
    }

    pub fn is_idle(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_empty()
    }

    /// Frees the slot if `url` is the one in flight. A mismatch means the
    /// completion is stale and leaves the queue untouched.
    pub fn release(&mut self, url: &str) -> bool {
        if self.in_flight.as_deref() == Some(url) {
            self.in_flight = None;
            true
        } else {
            false
        }
    }

    /// Moves the next pending URL into the free slot and returns it.
    pub fn advance(&mut self) -> Option<String> {
        if self.in_flight.is_some() {
            return None;
        }
        let next = self.pending.pop_front()?;
        self.in_flight = Some(next.clone());
        Some(next)
    }

    pub fn remove(&mut self, url: &str) -> Removed {
        if let Some(index) = self.pending.iter().position(|p| p == url) {
            self.pending.remove(index);
            return Removed::Pending;
        }
        if self.in_flight.as_deref() == Some(url) {
            Removed::InFlight
        } else {
            Removed::NotQueued
        }
    }

    /// Empties both the slot and the pending list, returning what was dropped.
    pub fn clear(&mut self) -> Vec<String> {
        let mut dropped: Vec<String> = self.in_flight.take().into_iter().collect();
        dropped.extend(self.pending.drain(..));
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_url_waits_for_first_completion() {
        let mut queue = RenderQueue::new();

        assert_eq!(queue.enqueue("http://a"), Enqueued::Dispatch);
        assert_eq!(queue.enqueue("http://b"), Enqueued::Pending);
        assert_eq!(queue.in_flight(), Some("http://a"));
        assert_eq!(queue.advance(), None);

        assert!(queue.release("http://a"));
        assert_eq!(queue.advance().as_deref(), Some("http://b"));
        assert_eq!(queue.in_flight(), Some("http://b"));
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn duplicates_are_ignored() {
        let mut queue = RenderQueue::new();
        queue.enqueue("http://a");
        queue.enqueue("http://b");

        assert_eq!(queue.enqueue("http://a"), Enqueued::Duplicate);
        assert_eq!(queue.enqueue("http://b"), Enqueued::Duplicate);
        assert_eq!(queue.pending().collect::<Vec<_>>(), ["http://b"]);
    }

    #[test]
    fn pending_is_fifo() {
        let mut queue = RenderQueue::new();
        for url in ["http://a", "http://b", "http://c", "http://d"] {
            queue.enqueue(url);
        }

        let mut order = Vec::new();
        while let Some(current) = queue.in_flight().map(str::to_string) {
            order.push(current.clone());
            queue.release(&current);
            queue.advance();
        }
        assert_eq!(order, ["http://a", "http://b", "http://c", "http://d"]);
        assert!(queue.is_idle());
    }

    #[test]
    fn stale_release_is_ignored() {
        let mut queue = RenderQueue::new();
        queue.enqueue("http://a");

        assert!(!queue.release("http://other"));
        assert_eq!(queue.in_flight(), Some("http://a"));
    }

    #[test]
    fn remove_reports_where_the_url_was() {
        let mut queue = RenderQueue::new();
        queue.enqueue("http://a");
        queue.enqueue("http://b");

        assert_eq!(queue.remove("http://b"), Removed::Pending);
        assert_eq!(queue.remove("http://a"), Removed::InFlight);
        assert_eq!(queue.remove("http://zzz"), Removed::NotQueued);
        assert_eq!(queue.in_flight(), Some("http://a"));
        assert_eq!(queue.pending_len(), 0);
    }

    #[test]
    fn clear_drops_everything() {
        let mut queue = RenderQueue::new();
        queue.enqueue("http://a");
        queue.enqueue("http://b");

        assert_eq!(queue.clear(), ["http://a", "http://b"]);
        assert!(queue.is_idle());
        assert_eq!(queue.enqueue("http://b"), Enqueued::Dispatch);
    }
}
