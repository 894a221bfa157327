/// Store-and-forward telemetry
///
/// Records that could not be published are kept in order and sent later as one
/// blob. The blob is cleared only when that single publish succeeds; a failed
/// flush leaves every record where it was.
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishError {
    /// No broker session at the moment
    NotConnected,
    /// The client refused or failed to queue the message
    Rejected(String),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::NotConnected => f.write_str("not connected to broker"),
            PublishError::Rejected(msg) => write!(f, "publish rejected: {}", msg),
        }
    }
}

impl std::error::Error for PublishError {}

struct Pending {
    records: VecDeque<(u64, String)>,
    next_seq: u64,
    dropped: u64,
}

/// Bounded, ordered buffer of unsent records, shared between the publish path and
/// the session-established path
pub struct TelemetryBuffer {
    pending: Mutex<Pending>,
    max_records: usize,
}

impl TelemetryBuffer {
    pub fn new(max_records: usize) -> Self {
        Self {
            pending: Mutex::new(Pending {
                records: VecDeque::new(),
                next_seq: 0,
                dropped: 0,
            }),
            max_records: max_records.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Pending> {
        // A panic while holding the lock cannot leave the queue half-edited
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue a record. When full, the oldest record is dropped.
    pub fn append(&self, record: &str) {
        let mut pending = self.lock();
        if pending.records.len() >= self.max_records {
            pending.records.pop_front();
            pending.dropped += 1;
            log::warn!(
                "Telemetry buffer full ({} records), dropped oldest ({} dropped so far)",
                self.max_records,
                pending.dropped
            );
        }
        let seq = pending.next_seq;
        pending.next_seq += 1;
        pending.records.push_back((seq, record.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.lock().records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.lock().dropped
    }

    /// Every buffered record followed by a newline, oldest first
    pub fn snapshot(&self) -> String {
        Self::render(&self.lock().records)
    }

    fn render(records: &VecDeque<(u64, String)>) -> String {
        let mut blob = String::with_capacity(records.iter().map(|(_, r)| r.len() + 1).sum());
        for (_, record) in records {
            blob.push_str(record);
            blob.push('\n');
        }
        blob
    }

    /// Publish everything buffered as one blob.
    ///
    /// Empty buffer: `publish` is not called. On success exactly the records that
    /// were in the blob are removed; anything appended while the publish was in
    /// flight stays queued. On failure nothing is removed.
    pub fn flush<F>(&self, publish: F) -> Result<(), PublishError>
    where
        F: FnOnce(&str) -> Result<(), PublishError>,
    {
        let (blob, last_seq, count) = {
            let pending = self.lock();
            match pending.records.back() {
                Some((last, _)) => (Self::render(&pending.records), *last, pending.records.len()),
                None => return Ok(()),
            }
        };

        log::info!("Publishing {} buffered records ({} bytes)", count, blob.len());
        publish(&blob)?;

        let mut pending = self.lock();
        while matches!(pending.records.front(), Some((seq, _)) if *seq <= last_seq) {
            pending.records.pop_front();
        }
        log::info!("Buffered data published and cleared");
        Ok(())
    }
}

/// Produces the `Counter: N` records
#[derive(Debug, Default)]
pub struct CounterTelemetry {
    counter: u64,
}

impl CounterTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next record; the counter advances whether or not the record is delivered
    pub fn next_record(&mut self) -> String {
        let record = format!("Counter: {}", self.counter);
        self.counter += 1;
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::cell::RefCell;

    #[test]
    fn test_flush_empty_is_noop() {
        let buffer = TelemetryBuffer::new(8);
        let mut called = false;
        buffer
            .flush(|_| {
                called = true;
                Ok(())
            })
            .unwrap();
        assert!(!called);
    }

    #[test]
    fn test_flush_publishes_single_blob_and_clears() {
        let buffer = TelemetryBuffer::new(8);
        buffer.append("Counter: 1");
        buffer.append("Counter: 2");
        buffer.append("Counter: 3");

        let published = RefCell::new(Vec::new());
        buffer
            .flush(|blob| {
                published.borrow_mut().push(blob.to_string());
                Ok(())
            })
            .unwrap();

        assert_eq!(published.into_inner(), vec!["Counter: 1\nCounter: 2\nCounter: 3\n".to_string()]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_failed_flush_keeps_everything() {
        let buffer = TelemetryBuffer::new(8);
        buffer.append("a");
        buffer.append("b");

        let result = buffer.flush(|_| Err(PublishError::NotConnected));
        assert_eq!(result, Err(PublishError::NotConnected));
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.snapshot(), "a\nb\n");
    }

    #[test]
    fn test_append_during_flush_survives() {
        let buffer = TelemetryBuffer::new(8);
        buffer.append("first");
        buffer
            .flush(|blob| {
                assert_eq!(blob, "first\n");
                buffer.append("late");
                Ok(())
            })
            .unwrap();
        assert_eq!(buffer.snapshot(), "late\n");
    }

    #[test]
    fn test_bound_drops_oldest() {
        let buffer = TelemetryBuffer::new(3);
        for i in 0..5 {
            buffer.append(&format!("Counter: {}", i));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped_count(), 2);
        assert_eq!(buffer.snapshot(), "Counter: 2\nCounter: 3\nCounter: 4\n");
    }

    #[test]
    fn test_counter_records() {
        let mut counter = CounterTelemetry::new();
        assert_eq!(counter.next_record(), "Counter: 0");
        assert_eq!(counter.next_record(), "Counter: 1");
    }

    proptest! {
        #[test]
        fn prop_failed_flush_preserves_order(records in proptest::collection::vec("[a-zA-Z0-9 :]{0,16}", 1..40)) {
            let buffer = TelemetryBuffer::new(64);
            for r in &records {
                buffer.append(r);
            }
            let expected: String = records.iter().map(|r| format!("{}\n", r)).collect();

            let rejected = buffer.flush(|_| Err(PublishError::Rejected("qos".into())));
            prop_assert!(rejected.is_err());
            prop_assert_eq!(buffer.snapshot(), expected.clone());

            let mut seen = String::new();
            let flushed = buffer.flush(|blob| {
                seen = blob.to_string();
                Ok(())
            });
            prop_assert!(flushed.is_ok());
            prop_assert_eq!(seen, expected);
            prop_assert!(buffer.is_empty());
        }
    }
}
