//! Liveness endpoint.
//!
//! Answers from process state alone; it must keep reporting healthy while
//! the broker is unreachable, so nothing here touches the pool or the
//! database. Job-level problems surface through the queue metrics and the
//! dead-letter sink, not here.

use axum::{Json, Router, routing::get};
use serde_json::{Value, json};

pub fn router() -> Router {
    Router::new()
        .route("/", get(healthy))
        .route("/health", get(healthy))
        .route("/healthz", get(healthy))
}

async fn healthy() -> Json<Value> {
    Json(json!({"status": "healthy", "service": "worker"}))
}

/// Bind the liveness port. Separate from serving so a bind failure
/// surfaces at startup instead of vanishing inside a spawned task.
pub async fn bind(port: u16) -> anyhow::Result<tokio::net::TcpListener> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "liveness endpoint listening");
    Ok(listener)
}

/// Serve until the process exits.
pub async fn serve(listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    axum::serve(listener, router()).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt as _;

    #[tokio::test]
    async fn health_answers_on_every_alias() {
        for path in ["/", "/health", "/healthz"] {
            let response = router()
                .oneshot(Request::get(path).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);

            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .unwrap();
            let body: Value = serde_json::from_slice(&bytes).unwrap();
            assert_eq!(body, json!({"status": "healthy", "service": "worker"}));
        }
    }

    #[tokio::test]
    async fn occupied_port_fails_at_bind() {
        let taken = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        assert!(bind(port).await.is_err());
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let response = router()
            .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
