//! HTTP route definitions

use crate::{handlers, middleware, AppState};
use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

/// Create the main router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/v1/allocate", post(handlers::allocate))
        .route("/api/v1/release", post(handlers::release))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(axum_middleware::from_fn(middleware::request_id_middleware))
                .layer(axum_middleware::from_fn(middleware::logging_middleware)),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IpamConfig;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use ipam_core::{AllocatedBlock, Child, IpFamily};
    use tower::ServiceExt;

    async fn app() -> (Router, Arc<AppState>) {
        let config = IpamConfig {
            use_memory_store: true,
            trench_name: "trench-a".to_string(),
            request_timeout_secs: 1,
            conduit_poll_interval_ms: 5,
            ..IpamConfig::default()
        };
        let state = Arc::new(AppState::new(config).await.unwrap());
        for family in IpFamily::all() {
            state
                .service
                .trench(family)
                .unwrap()
                .add_conduit("conduit-a")
                .await
                .unwrap();
        }
        (create_router(state.clone()), state)
    }

    fn post_json(uri: &str, body: String) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn child(name: &str, family: IpFamily) -> String {
        serde_json::to_string(&Child::new(name, family, "trench-a", "conduit-a", "worker-1")).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app().await;
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key(middleware::REQUEST_ID_HEADER));
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_allocate_and_release() {
        let (app, _) = app().await;

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/allocate", child("bridge", IpFamily::Ipv4)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let block: AllocatedBlock = serde_json::from_slice(&body).unwrap();
        assert_eq!(block.address, "169.255.0.1");
        assert_eq!(block.prefix_length, 32);

        let response = app
            .oneshot(post_json("/api/v1/release", child("bridge", IpFamily::Ipv4)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_request_id_is_echoed() {
        let (app, _) = app().await;
        let response = app
            .oneshot(
                Request::get("/health")
                    .header(middleware::REQUEST_ID_HEADER, "req-42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(middleware::REQUEST_ID_HEADER).unwrap(),
            "req-42"
        );
    }

    #[tokio::test]
    async fn test_bad_requests() {
        let (app, _) = app().await;

        let response = app
            .clone()
            .oneshot(post_json("/api/v1/allocate", "{not json".to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["code"], "MalformedBody");

        let no_conduit = r#"{"name":"a","subnet":{"ipFamily":"ipv4","node":"worker-1"}}"#;
        let response = app
            .oneshot(post_json("/api/v1/allocate", no_conduit.to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(body["code"], "InvalidRequest");
    }

    #[tokio::test]
    async fn test_unknown_conduit_times_out() {
        let (app, _) = app().await;
        let body = serde_json::to_string(&Child::new(
            "a",
            IpFamily::Ipv6,
            "trench-a",
            "conduit-missing",
            "worker-1",
        ))
        .unwrap();
        let response = app.oneshot(post_json("/api/v1/allocate", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    }
}
