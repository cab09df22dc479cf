use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde_json::json;

#[derive(Debug, PartialEq)]
pub enum Error {
    AppState {
        message: String,
    },
    BackendTransient {
        message: String,
    },
    DegenerateWeights,
    EmptyVariantSet,
    EndpointUnknown {
        endpoint_name: String,
    },
    FilterRejected {
        reason: String,
    },
    InvalidEpsilon {
        epsilon: f64,
    },
    InvalidRequest {
        message: String,
    },
    JsonRequest {
        message: String,
    },
    StoreTransient {
        message: String,
    },
    StreamTransient {
        message: String,
    },
    UnsupportedEventType {
        event_type: String,
    },
    UnsupportedLifecycleStatus {
        status: String,
    },
    UnsupportedStrategy {
        strategy: String,
    },
}

impl Error {
    /// The `tracing` level at which this error should be logged.
    fn level(&self) -> tracing::Level {
        match self {
            Error::AppState { .. } => tracing::Level::ERROR,
            Error::BackendTransient { .. } => tracing::Level::WARN,
            Error::DegenerateWeights => tracing::Level::WARN,
            Error::EmptyVariantSet => tracing::Level::WARN,
            Error::EndpointUnknown { .. } => tracing::Level::INFO,
            Error::FilterRejected { .. } => tracing::Level::DEBUG,
            Error::InvalidEpsilon { .. } => tracing::Level::WARN,
            Error::InvalidRequest { .. } => tracing::Level::WARN,
            Error::JsonRequest { .. } => tracing::Level::WARN,
            Error::StoreTransient { .. } => tracing::Level::ERROR,
            Error::StreamTransient { .. } => tracing::Level::WARN,
            Error::UnsupportedEventType { .. } => tracing::Level::WARN,
            Error::UnsupportedLifecycleStatus { .. } => tracing::Level::WARN,
            Error::UnsupportedStrategy { .. } => tracing::Level::WARN,
        }
    }

    /// Defines the HTTP status code for responses involving this error
    fn status_code(&self) -> StatusCode {
        match self {
            Error::AppState { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::BackendTransient { .. } => StatusCode::BAD_GATEWAY,
            Error::DegenerateWeights => StatusCode::BAD_REQUEST,
            Error::EmptyVariantSet => StatusCode::BAD_REQUEST,
            Error::EndpointUnknown { .. } => StatusCode::NOT_FOUND,
            Error::FilterRejected { .. } => StatusCode::NOT_MODIFIED,
            Error::InvalidEpsilon { .. } => StatusCode::BAD_REQUEST,
            Error::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            Error::JsonRequest { .. } => StatusCode::BAD_REQUEST,
            Error::StoreTransient { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::StreamTransient { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::UnsupportedEventType { .. } => StatusCode::BAD_REQUEST,
            Error::UnsupportedLifecycleStatus { .. } => StatusCode::BAD_REQUEST,
            Error::UnsupportedStrategy { .. } => StatusCode::BAD_REQUEST,
        }
    }

    /// Log the error using the `tracing` library
    pub fn log(&self) {
        match self.level() {
            tracing::Level::ERROR => tracing::error!("{self}"),
            tracing::Level::WARN => tracing::warn!("{self}"),
            tracing::Level::INFO => tracing::info!("{self}"),
            tracing::Level::DEBUG => tracing::debug!("{self}"),
            tracing::Level::TRACE => tracing::trace!("{self}"),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::AppState { message } => write!(f, "Error initializing AppState: {message}"),
            Error::BackendTransient { message } => {
                write!(f, "Inference backend error: {message}")
            }
            Error::DegenerateWeights => {
                write!(f, "All variant weights are zero")
            }
            Error::EmptyVariantSet => write!(f, "Endpoint has no variants"),
            Error::EndpointUnknown { endpoint_name } => {
                write!(f, "Unknown endpoint: {endpoint_name}")
            }
            Error::FilterRejected { reason } => write!(f, "Notification filtered: {reason}"),
            Error::InvalidEpsilon { epsilon } => {
                write!(f, "Epsilon must be in [0, 1], got {epsilon}")
            }
            Error::InvalidRequest { message } => write!(f, "{message}"),
            Error::JsonRequest { message } => write!(f, "{message}"),
            Error::StoreTransient { message } => write!(f, "Store error: {message}"),
            Error::StreamTransient { message } => write!(f, "Delivery stream error: {message}"),
            Error::UnsupportedEventType { event_type } => {
                write!(f, "Unsupported event type: {event_type}")
            }
            Error::UnsupportedLifecycleStatus { status } => {
                write!(f, "Unsupported endpoint status: {status}")
            }
            Error::UnsupportedStrategy { strategy } => {
                write!(f, "Unsupported strategy: {strategy}")
            }
        }
    }
}

impl std::error::Error for Error {}

impl IntoResponse for Error {
    /// Log the error and convert it into an Axum response
    fn into_response(self) -> Response {
        self.log();
        let body = json!({"error": self.to_string()});
        (self.status_code(), Json(body)).into_response()
    }
}

pub trait ResultExt<T> {
    fn ok_or_log(self) -> Option<T>;
}

impl<T> ResultExt<T> for Result<T, Error> {
    fn ok_or_log(self) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                error.log();
                None
            }
        }
    }
}

/// Bounded single-retry wrapper for store calls: a `StoreTransient` failure is
/// retried exactly once before being surfaced, matching the per-site retry
/// policy assignment/metrics store call sites need. Any other error kind
/// (e.g. `EndpointUnknown`) is returned immediately without retrying, since
/// retrying it would never change the outcome.
pub async fn retry_once<F, Fut, T>(mut call: F) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    match call().await {
        Err(Error::StoreTransient { message }) => {
            tracing::debug!(message, "retrying store call after a transient failure");
            call().await
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retry_once_recovers_from_a_single_transient_failure() {
        let attempts = AtomicU32::new(0);
        let result = retry_once(|| async {
            if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(Error::StoreTransient {
                    message: "unreachable".to_string(),
                })
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_once_surfaces_a_second_consecutive_transient_failure() {
        let attempts = AtomicU32::new(0);
        let result = retry_once(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), Error>(Error::StoreTransient {
                message: "still down".to_string(),
            })
        })
        .await;
        assert!(matches!(result, Err(Error::StoreTransient { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retry_once_does_not_retry_non_transient_errors() {
        let attempts = AtomicU32::new(0);
        let result = retry_once(|| async {
            attempts.fetch_add(1, Ordering::SeqCst);
            Err::<(), Error>(Error::EndpointUnknown {
                endpoint_name: "e1".to_string(),
            })
        })
        .await;
        assert!(matches!(result, Err(Error::EndpointUnknown { .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn status_codes_match_error_disposition() {
        assert_eq!(
            Error::EndpointUnknown {
                endpoint_name: "e1".into()
            }
            .status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(Error::EmptyVariantSet.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::FilterRejected {
                reason: "disabled".into()
            }
            .status_code(),
            StatusCode::NOT_MODIFIED
        );
    }
}
