//! Server-side bridge
//!
//! Accepts device WebSocket connections, assembles each streamed utterance,
//! runs the speech pipeline against the configured backend, and streams the
//! synthesized reply back with paced delivery.

pub mod delivery;
pub mod session;
pub mod ws;

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::{AudioConfig, DeliveryConfig};
use crate::media::SpeechBackend;
use crate::Result;

pub use delivery::{
    Clock, DeliveryPlan, ManualClock, PacedDeliveryScheduler, ReplyTransport, TokioClock,
};
pub use session::StreamAssembler;
pub use ws::{ChannelTransport, ControlFrame, Outbound};

/// Shared state for connection handlers
pub struct ApiState {
    pub backend: Arc<dyn SpeechBackend>,
    pub audio: AudioConfig,
    pub delivery: DeliveryConfig,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Liveness probe
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Bridge server
pub struct ApiServer {
    state: Arc<ApiState>,
    port: u16,
}

impl ApiServer {
    #[must_use]
    pub fn new(
        backend: Arc<dyn SpeechBackend>,
        audio: AudioConfig,
        delivery: DeliveryConfig,
        port: u16,
    ) -> Self {
        Self {
            state: Arc::new(ApiState {
                backend,
                audio,
                delivery,
            }),
            port,
        }
    }

    /// Build the router with all routes
    fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            .nest("/ws", ws::router(self.state.clone()))
            .route("/health", get(health))
            .layer(cors)
            .layer(TraceLayer::new_for_http())
    }

    /// Run the server
    ///
    /// # Errors
    ///
    /// Returns error if the server fails to bind or run
    pub async fn run(self) -> Result<()> {
        let addr = format!("0.0.0.0:{}", self.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind server: {e}")))?;

        tracing::info!(port = self.port, "bridge server listening");

        axum::serve(listener, self.router())
            .await
            .map_err(|e| crate::Error::Config(format!("server error: {e}")))?;

        Ok(())
    }

    /// Run the server in a background task
    #[must_use]
    pub fn spawn(self) -> tokio::task::JoinHandle<Result<()>> {
        tokio::spawn(async move { self.run().await })
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    use super::*;

    struct NoopBackend;

    #[async_trait::async_trait]
    impl SpeechBackend for NoopBackend {
        async fn transcribe(&self, _wav: &[u8]) -> Result<String> {
            Ok(String::new())
        }

        async fn reply(&self, _transcript: &str) -> Result<String> {
            Ok(String::new())
        }

        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
    }

    fn test_server() -> ApiServer {
        ApiServer::new(
            Arc::new(NoopBackend),
            AudioConfig::default(),
            DeliveryConfig::default(),
            0,
        )
    }

    #[tokio::test]
    async fn health_endpoint_responds_ok() {
        let router = test_server().router();
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn stream_route_rejects_plain_get() {
        // Without an Upgrade header the ws route must not succeed
        let router = test_server().router();
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/ws/stream/device-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_ne!(response.status(), StatusCode::OK);
    }
}
