//! Metrics HTTP server

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::timeout::TimeoutLayer;

use crate::cache::StatusCache;
use crate::error::ServeError;
use crate::metrics::Metrics;
use crate::scheduler::Shutdown;
use crate::status::StatusField;

/// Shared handles the scrape handler reads through
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<StatusCache>,
    pub metrics: Arc<Metrics>,
}

/// The `/metrics` exposition server
pub struct MetricsServer {
    listener: TcpListener,
    router: Router,
}

impl MetricsServer {
    /// Bind the listener and build the router
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the specified address fails.
    pub async fn bind(address: &str, state: AppState) -> Result<Self, ServeError> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServeError::Bind {
                address: address.to_string(),
                source,
            })?;

        tracing::info!(address = %address, "metrics server bound successfully");

        let router = Router::new()
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            // A cold scrape performs a full IMAP reconciliation; allow for it
            .layer(TimeoutLayer::new(Duration::from_secs(30)));

        Ok(Self { listener, router })
    }

    /// The address actually bound, which differs from the requested one when
    /// binding port 0
    ///
    /// # Errors
    ///
    /// Returns an error if the listener's address cannot be queried.
    pub fn local_addr(&self) -> Result<std::net::SocketAddr, ServeError> {
        self.listener
            .local_addr()
            .map_err(|err| ServeError::Server(err.to_string()))
    }

    /// Run the server until the shutdown signal arrives
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(self, mut shutdown: broadcast::Receiver<Shutdown>) -> Result<(), ServeError> {
        tracing::info!("metrics server starting");

        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("metrics server received shutdown signal");
            })
            .await
            .map_err(|err| ServeError::Server(err.to_string()))?;

        tracing::info!("metrics server stopped");
        Ok(())
    }
}

/// Scrape handler
///
/// Pulls the current (possibly cached) status for both gauge fields,
/// refreshes the gauges, and returns the encoded registry.
async fn metrics_handler(State(state): State<AppState>) -> Response {
    let delay = state.cache.get(StatusField::Delay).await;
    let timestamp = state.cache.get(StatusField::Timestamp).await;
    state.metrics.message_delay.set(delay);
    state.metrics.message_timestamp.set(timestamp);

    match state.metrics.encode() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::cache::StatusSource;
    use crate::error::InboxError;
    use crate::status::Status;

    struct FixedSource(Status);

    #[async_trait]
    impl StatusSource for FixedSource {
        async fn probe(&self) -> Result<Status, InboxError> {
            Ok(self.0)
        }
    }

    fn state(source: Arc<dyn StatusSource>) -> AppState {
        let metrics = Arc::new(Metrics::new().expect("metrics should construct"));
        let cache = Arc::new(StatusCache::new(source, metrics.imap_errors()));
        AppState { cache, metrics }
    }

    async fn body_of(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body should be readable");
        String::from_utf8(bytes.to_vec()).expect("exposition should be UTF-8")
    }

    #[tokio::test]
    async fn test_scrape_refreshes_gauges_from_the_cache() {
        let state = state(Arc::new(FixedSource(Status::new(1_700_000_000, 42))));

        let response = metrics_handler(State(state)).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_of(response).await;
        assert!(
            body.contains("mailalive_message_delay 42"),
            "delay gauge should reflect the probed status: {body}"
        );
        assert!(
            body.contains("mailalive_message_timestamp 1700000000"),
            "timestamp gauge should reflect the probed status: {body}"
        );
    }

    #[tokio::test]
    async fn test_scrape_sets_the_prometheus_content_type() {
        let state = state(Arc::new(FixedSource(Status::new(1_700_000_000, 42))));

        let response = metrics_handler(State(state)).await;
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .expect("content type should be present");
        assert_eq!(content_type, "text/plain; version=0.0.4");
    }
}
