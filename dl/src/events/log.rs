//! Event Log - append-only history with fan-out to subscribers
//!
//! Every appended entry is kept forever (for the process lifetime) and pushed
//! to each live subscriber through its own bounded channel. A subscriber that
//! lets its buffer fill up is evicted instead of slowing the producer down.

use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use futures::Stream;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use super::EventError;
use super::types::{Event, LogEntry};

/// Default per-subscriber buffer (entries)
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 1_000;

pub type SubscriberId = u64;

/// Errors delivered to a cursor in place of an entry
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StreamError {
    #[error("slow consumer: buffer of {capacity} entries overflowed before sequence {position}")]
    SlowConsumer { position: u64, capacity: usize },
}

struct Subscriber {
    tx: mpsc::Sender<Arc<LogEntry>>,
    evicted: Arc<AtomicBool>,
}

/// Append-only, strictly ordered event log with its subscriber registry
pub struct EventLog {
    entries: Vec<Arc<LogEntry>>,
    subscribers: BTreeMap<SubscriberId, Subscriber>,
    next_subscriber_id: SubscriberId,
    buffer: usize,
    last_timestamp: Option<DateTime<Utc>>,
    release_tx: mpsc::UnboundedSender<SubscriberId>,
    release_rx: mpsc::UnboundedReceiver<SubscriberId>,
}

impl EventLog {
    /// Create an empty log whose subscribers buffer up to `buffer` entries
    pub fn new(buffer: usize) -> Self {
        debug!(buffer, "EventLog::new: creating event log");
        let (release_tx, release_rx) = mpsc::unbounded_channel();
        Self {
            entries: Vec::new(),
            subscribers: BTreeMap::new(),
            next_subscriber_id: 0,
            buffer: buffer.max(1),
            last_timestamp: None,
            release_tx,
            release_rx,
        }
    }

    /// Number of entries appended so far; also the next sequence number
    pub fn tail(&self) -> u64 {
        self.entries.len() as u64
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Arc<LogEntry>] {
        &self.entries
    }

    /// Live subscribers; slots of cursors closed since the last append are freed first
    pub fn subscriber_count(&mut self) -> usize {
        self.reap();
        self.subscribers.len()
    }

    /// Append an event and fan it out; returns its sequence number
    ///
    /// The entry is stored before any subscriber sees it. Subscribers whose
    /// buffer is full are evicted; closed ones are dropped.
    pub fn append(&mut self, event: Event) -> u64 {
        self.reap();

        let sequence = self.tail();
        // Clamp so entries never go back in time when the wall clock does
        let now = Utc::now();
        let timestamp = match self.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };
        self.last_timestamp = Some(timestamp);

        let entry = Arc::new(LogEntry::new(sequence, timestamp, event));
        self.entries.push(Arc::clone(&entry));
        debug!(sequence, event_type = entry.event.event_type(), "EventLog::append");

        let capacity = self.buffer;
        self.subscribers.retain(|id, sub| match sub.tx.try_send(Arc::clone(&entry)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(subscriber = id, sequence, capacity, "EventLog: evicting slow consumer");
                sub.evicted.store(true, Ordering::Release);
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(subscriber = id, "EventLog: dropping closed subscriber");
                false
            }
        });

        sequence
    }

    /// Open a cursor that yields every entry from `from` onwards
    ///
    /// Entries already in the log are handed over as a backlog that does not
    /// count against the buffer; later entries arrive through the live
    /// channel. Both are captured in one step, so nothing is missed or
    /// repeated.
    pub fn subscribe(&mut self, from: u64) -> Result<Cursor, EventError> {
        self.reap();

        let tail = self.tail();
        if from > tail {
            return Err(EventError::CursorOutOfRange { from, tail });
        }

        let id = self.next_subscriber_id;
        self.next_subscriber_id += 1;

        let (tx, rx) = mpsc::channel(self.buffer);
        let evicted = Arc::new(AtomicBool::new(false));
        self.subscribers.insert(
            id,
            Subscriber {
                tx,
                evicted: Arc::clone(&evicted),
            },
        );

        let backlog: VecDeque<Arc<LogEntry>> = self.entries[from as usize..].iter().cloned().collect();
        debug!(subscriber = id, from, backlog = backlog.len(), "EventLog::subscribe");

        Ok(Cursor {
            id,
            position: from,
            capacity: self.buffer,
            backlog,
            rx,
            evicted,
            finished: false,
            release: Some(self.release_tx.clone()),
        })
    }

    /// Remove a subscriber; returns false if it was already gone
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        debug!(subscriber = id, removed, "EventLog::unsubscribe");
        removed
    }

    /// Drop registry slots of cursors that were closed by their owner
    fn reap(&mut self) {
        while let Ok(id) = self.release_rx.try_recv() {
            self.unsubscribe(id);
        }
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

/// A subscriber's read position into the log
///
/// Yields entries in strict sequence order. Dropping or closing the cursor
/// unsubscribes it and frees its buffer.
pub struct Cursor {
    id: SubscriberId,
    position: u64,
    capacity: usize,
    backlog: VecDeque<Arc<LogEntry>>,
    rx: mpsc::Receiver<Arc<LogEntry>>,
    evicted: Arc<AtomicBool>,
    finished: bool,
    release: Option<mpsc::UnboundedSender<SubscriberId>>,
}

impl Cursor {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Sequence number of the next entry this cursor will yield
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Wait for the next entry
    ///
    /// Returns `None` once the log is shut down, or after a slow-consumer
    /// error has been reported. Cancel safe.
    pub async fn next(&mut self) -> Option<Result<Arc<LogEntry>, StreamError>> {
        if self.finished {
            return None;
        }

        if let Some(entry) = self.backlog.pop_front() {
            self.position = entry.sequence + 1;
            return Some(Ok(entry));
        }

        match self.rx.recv().await {
            Some(entry) => {
                debug_assert_eq!(entry.sequence, self.position, "cursor skipped an entry");
                self.position = entry.sequence + 1;
                Some(Ok(entry))
            }
            None => {
                self.finished = true;
                self.release();
                if self.evicted.load(Ordering::Acquire) {
                    Some(Err(StreamError::SlowConsumer {
                        position: self.position,
                        capacity: self.capacity,
                    }))
                } else {
                    None
                }
            }
        }
    }

    /// Turn the cursor into a `Stream` of entries
    pub fn into_stream(self) -> impl Stream<Item = Result<Arc<LogEntry>, StreamError>> + Send {
        futures::stream::unfold(self, |mut cursor| async move {
            cursor.next().await.map(|item| (item, cursor))
        })
    }

    /// Unsubscribe explicitly; same as dropping the cursor
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        self.rx.close();
        if let Some(release) = self.release.take() {
            let _ = release.send(self.id);
        }
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("id", &self.id)
            .field("position", &self.position)
            .field("backlog", &self.backlog.len())
            .field("finished", &self.finished)
            .finish()
    }
}

impl Drop for Cursor {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::{COMPLETE, IN_PROGRESS};
    use futures::StreamExt;

    fn build(n: usize) -> Event {
        Event::build(&format!("artifact-{n}"), IN_PROGRESS)
    }

    async fn collect(cursor: &mut Cursor, count: usize) -> Vec<u64> {
        let mut seen = Vec::new();
        for _ in 0..count {
            let entry = cursor.next().await.unwrap().unwrap();
            seen.push(entry.sequence);
        }
        seen
    }

    #[test]
    fn test_append_assigns_sequences() {
        let mut log = EventLog::new(10);
        assert_eq!(log.append(build(0)), 0);
        assert_eq!(log.append(build(1)), 1);
        assert_eq!(log.tail(), 2);
        assert_eq!(log.entries()[1].entry, "Build started for artifact artifact-1");
    }

    #[test]
    fn test_timestamps_are_monotonic() {
        let mut log = EventLog::new(10);
        for n in 0..50 {
            log.append(build(n));
        }
        let entries = log.entries();
        assert!(entries.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[tokio::test]
    async fn test_replay_then_live() {
        let mut log = EventLog::new(10);
        for n in 0..3 {
            log.append(build(n));
        }

        let mut cursor = log.subscribe(0).unwrap();
        log.append(build(3));
        log.append(build(4));

        assert_eq!(collect(&mut cursor, 5).await, vec![0, 1, 2, 3, 4]);
        assert_eq!(cursor.position(), 5);
    }

    #[tokio::test]
    async fn test_backlog_does_not_count_against_buffer() {
        let mut log = EventLog::new(2);
        for n in 0..20 {
            log.append(build(n));
        }

        let mut cursor = log.subscribe(0).unwrap();
        let seen = collect(&mut cursor, 20).await;
        assert_eq!(seen, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_tail_only_skips_history() {
        let mut log = EventLog::new(10);
        log.append(build(0));
        log.append(build(1));

        let mut cursor = log.subscribe(log.tail()).unwrap();
        log.append(Event::build("late", COMPLETE));

        let entry = cursor.next().await.unwrap().unwrap();
        assert_eq!(entry.sequence, 2);
        assert_eq!(entry.entry, "Build completed for artifact late");
    }

    #[test]
    fn test_subscribe_past_tail_is_rejected() {
        let mut log = EventLog::new(10);
        log.append(build(0));
        assert!(matches!(
            log.subscribe(5),
            Err(EventError::CursorOutOfRange { from: 5, tail: 1 })
        ));
    }

    #[tokio::test]
    async fn test_slow_consumer_is_evicted() {
        let mut log = EventLog::new(2);
        let mut slow = log.subscribe(0).unwrap();
        let mut fast = log.subscribe(0).unwrap();

        for n in 0..5 {
            log.append(build(n));
            // the fast subscriber drains as it goes
            let entry = fast.next().await.unwrap().unwrap();
            assert_eq!(entry.sequence, n as u64);
        }

        assert_eq!(log.subscriber_count(), 1);

        // the slow one still gets what was buffered, then the error
        assert_eq!(collect(&mut slow, 2).await, vec![0, 1]);
        assert_eq!(
            slow.next().await,
            Some(Err(StreamError::SlowConsumer { position: 2, capacity: 2 }))
        );
        assert!(slow.next().await.is_none());
    }

    #[tokio::test]
    async fn test_drop_releases_slot() {
        let mut log = EventLog::new(4);
        let cursor = log.subscribe(0).unwrap();
        let other = log.subscribe(0).unwrap();
        assert_eq!(log.subscriber_count(), 2);

        drop(cursor);
        other.close();
        log.append(build(0));
        assert_eq!(log.subscriber_count(), 0);
    }

    #[test]
    fn test_count_reflects_release_without_append() {
        let mut log = EventLog::new(4);
        let cursor = log.subscribe(0).unwrap();
        let _other = log.subscribe(0).unwrap();
        assert_eq!(log.subscriber_count(), 2);

        drop(cursor);
        assert_eq!(log.subscriber_count(), 1);
        assert_eq!(log.tail(), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let mut log = EventLog::new(4);
        let cursor = log.subscribe(0).unwrap();
        let id = cursor.id();
        assert!(log.unsubscribe(id));
        assert!(!log.unsubscribe(id));
        drop(cursor);
        log.append(build(0));
        assert!(!log.unsubscribe(id));
    }

    #[tokio::test]
    async fn test_log_drop_ends_cursor() {
        let mut log = EventLog::new(4);
        let mut cursor = log.subscribe(0).unwrap();
        log.append(build(0));
        drop(log);

        assert_eq!(cursor.next().await.unwrap().unwrap().sequence, 0);
        assert!(cursor.next().await.is_none());
    }

    #[tokio::test]
    async fn test_into_stream() {
        let mut log = EventLog::new(4);
        log.append(build(0));
        log.append(build(1));
        let cursor = log.subscribe(0).unwrap();
        drop(log);

        let sequences: Vec<u64> = cursor
            .into_stream()
            .map(|item| item.unwrap().sequence)
            .collect()
            .await;
        assert_eq!(sequences, vec![0, 1]);
    }
}
