//! Pluggable event buffer: a synchronous commit path straight into the
//! metrics store, or an asynchronous durable-stream append that a separate
//! batch applier later folds (C4).

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::Error;
use crate::event::Event;
use crate::metrics_store::MetricsStore;

/// Receives one event per invocation/conversion. `SyncEventBuffer` folds it
/// into the metrics store inline, on the request path; `StreamEventBuffer`
/// appends it to a durable stream for a later batch fold and returns as soon
/// as the append is acknowledged.
#[async_trait]
pub trait EventBuffer: Send + Sync {
    async fn emit(&self, event: Event) -> Result<(), Error>;
}

pub struct SyncEventBuffer {
    metrics_store: Arc<dyn MetricsStore>,
}

impl SyncEventBuffer {
    pub fn new(metrics_store: Arc<dyn MetricsStore>) -> Self {
        Self { metrics_store }
    }
}

#[async_trait]
impl EventBuffer for SyncEventBuffer {
    async fn emit(&self, event: Event) -> Result<(), Error> {
        self.metrics_store.fold(std::slice::from_ref(&event)).await
    }
}

/// A durable, append-only stream standing in for the external delivery
/// stream named in §6 (e.g. a managed firehose). `put` is fire-and-forget
/// from the caller's perspective: success means "accepted for eventual
/// delivery", not "folded".
#[async_trait]
pub trait DurableStream: Send + Sync {
    async fn put(&self, event: Event) -> Result<(), Error>;

    /// Drains every event currently buffered, for the batch applier (C5) to
    /// apply. Implementations that back onto a real stream would instead
    /// read committed records by offset; this in-memory stand-in just
    /// drains its queue.
    async fn drain(&self) -> Vec<Event>;
}

/// A bounded in-memory stand-in for the durable stream. Once the queue is
/// full, further `put` calls drop the event and log a warning rather than
/// block the request path or grow without limit.
pub struct InMemoryDurableStream {
    queue: Mutex<Vec<Event>>,
    capacity: usize,
}

impl InMemoryDurableStream {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Mutex::new(Vec::new()),
            capacity,
        }
    }
}

impl Default for InMemoryDurableStream {
    fn default() -> Self {
        Self::new(10_000)
    }
}

#[async_trait]
impl DurableStream for InMemoryDurableStream {
    async fn put(&self, event: Event) -> Result<(), Error> {
        let mut queue = self.queue.lock().await;
        if queue.len() >= self.capacity {
            tracing::warn!(
                endpoint_name = %event.endpoint_name,
                capacity = self.capacity,
                "durable stream at capacity, dropping event"
            );
            return Ok(());
        }
        queue.push(event);
        Ok(())
    }

    async fn drain(&self) -> Vec<Event> {
        let mut queue = self.queue.lock().await;
        std::mem::take(&mut *queue)
    }
}

pub struct StreamEventBuffer {
    stream: Arc<dyn DurableStream>,
}

impl StreamEventBuffer {
    pub fn new(stream: Arc<dyn DurableStream>) -> Self {
        Self { stream }
    }
}

#[async_trait]
impl EventBuffer for StreamEventBuffer {
    async fn emit(&self, event: Event) -> Result<(), Error> {
        self.stream.put(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics_store::InMemoryMetricsStore;
    use std::time::SystemTime;
    use uuid::Uuid;

    #[tokio::test]
    async fn sync_buffer_folds_inline() {
        let metrics_store = Arc::new(InMemoryMetricsStore::new());
        metrics_store
            .register(
                "e1",
                &[("ev1".to_string(), 1.0)],
                crate::bandit::Strategy::EpsilonGreedy,
                0.1,
                0,
                SystemTime::now(),
            )
            .await
            .unwrap();
        let buffer = SyncEventBuffer::new(metrics_store.clone());
        buffer
            .emit(Event::invocation(1, "e1", "ev1", "u1", Uuid::nil()))
            .await
            .unwrap();
        let snapshot = metrics_store.read("e1").await.unwrap();
        assert_eq!(snapshot.variants[0].invocation_count, 1);
    }

    #[tokio::test]
    async fn stream_buffer_is_drainable_and_not_yet_folded() {
        let stream: Arc<dyn DurableStream> = Arc::new(InMemoryDurableStream::default());
        let buffer = StreamEventBuffer::new(stream.clone());
        buffer
            .emit(Event::invocation(1, "e1", "ev1", "u1", Uuid::nil()))
            .await
            .unwrap();
        let drained = stream.drain().await;
        assert_eq!(drained.len(), 1);
        assert!(stream.drain().await.is_empty());
    }

    #[tokio::test]
    async fn stream_drops_events_past_capacity() {
        let stream = InMemoryDurableStream::new(1);
        stream
            .put(Event::invocation(1, "e1", "ev1", "u1", Uuid::nil()))
            .await
            .unwrap();
        stream
            .put(Event::invocation(1, "e1", "ev2", "u2", Uuid::nil()))
            .await
            .unwrap();
        assert_eq!(stream.drain().await.len(), 1);
    }
}
