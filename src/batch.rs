//! Folds a batch of buffered events into the metrics store and emits
//! time-series counters for the result (C5).

use std::io::Read;
use std::sync::Arc;

use flate2::read::GzDecoder;
use metrics::counter;

use crate::error::Error;
use crate::event::{Event, EventKind};
use crate::event_buffer::DurableStream;
use crate::metrics_store::MetricsStore;

pub struct BatchApplier {
    metrics_store: Arc<dyn MetricsStore>,
}

impl BatchApplier {
    pub fn new(metrics_store: Arc<dyn MetricsStore>) -> Self {
        Self { metrics_store }
    }

    /// Drains every event currently buffered in `stream` and folds them in
    /// one pass — the direct-drain counterpart to [`Self::apply_gzip_artifact`]
    /// for a durable stream that lives in this same process.
    pub async fn apply_stream(&self, stream: &dyn DurableStream) -> Result<usize, Error> {
        let events = stream.drain().await;
        self.apply_events(&events).await?;
        Ok(events.len())
    }

    /// Decompresses a gzip-framed, newline-delimited JSON artifact (the shape
    /// a durable stream typically hands back for batch delivery), parses each
    /// line as an [`Event`], and folds the successfully-parsed events into the
    /// metrics store in one call. Lines that fail to parse are skipped and
    /// logged rather than failing the whole batch.
    pub async fn apply_gzip_artifact(&self, artifact: &[u8]) -> Result<usize, Error> {
        let mut decoder = GzDecoder::new(artifact);
        let mut text = String::new();
        decoder
            .read_to_string(&mut text)
            .map_err(|e| Error::StreamTransient {
                message: format!("failed to decompress batch artifact: {e}"),
            })?;
        self.apply_lines(&text).await
    }

    /// Parses and folds newline-delimited JSON events that are already
    /// decompressed. Returns the count of events actually folded.
    pub async fn apply_lines(&self, text: &str) -> Result<usize, Error> {
        let mut events = Vec::new();
        for line in text.lines() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Event>(line) {
                Ok(event) => events.push(event),
                Err(error) => {
                    tracing::warn!(%error, line, "skipping unparseable event line");
                }
            }
        }
        self.apply_events(&events).await?;
        Ok(events.len())
    }

    async fn apply_events(&self, events: &[Event]) -> Result<(), Error> {
        self.metrics_store.fold(events).await?;
        for event in events {
            let endpoint_name = event.endpoint_name.clone();
            let endpoint_variant = event.endpoint_variant.clone();
            match &event.kind {
                EventKind::Invocation => {
                    counter!(
                        "ab_gateway_invocations_total",
                        "endpoint_name" => endpoint_name,
                        "endpoint_variant" => endpoint_variant
                    )
                    .increment(1);
                }
                EventKind::Conversion { reward } => {
                    counter!(
                        "ab_gateway_conversions_total",
                        "endpoint_name" => endpoint_name.clone(),
                        "endpoint_variant" => endpoint_variant.clone()
                    )
                    .increment(1);
                    counter!(
                        "ab_gateway_reward_total",
                        "endpoint_name" => endpoint_name,
                        "endpoint_variant" => endpoint_variant
                    )
                    .increment(reward.max(0.) as u64);
                }
            }
        }
        Ok(())
    }
}
