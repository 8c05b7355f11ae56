//! HTTP surface setup.
//!
//! # Responsibilities
//! - Create the axum Router with all handlers
//! - Wire up middleware (request ID, tracing, timeout, body limit, timing)
//! - Guard the admin API with the server secret
//! - Mount everything under the configured base path

use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ResolvedConfig;
use crate::db::Database;
use crate::events::EventBus;
use crate::http::auth::admin_auth_middleware;
use crate::http::handlers::*;
use crate::http::middleware::record_request_time;
use crate::observability::prometheus_handle;
use crate::services::Services;
use crate::stores::{EventStore, Stores};

/// Largest accepted request body.
pub const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: ResolvedConfig,
    pub services: Services,
    pub events: Arc<EventStore>,
    pub db: Arc<Database>,
    pub bus: EventBus,
    pub prometheus: Option<PrometheusHandle>,
    pub version: &'static str,
}

impl AppState {
    pub fn new(config: &ResolvedConfig, stores: &Stores, services: &Services, bus: &EventBus) -> Self {
        let prometheus = if config.observability.metrics_enabled {
            prometheus_handle()
        } else {
            None
        };
        Self {
            config: config.clone(),
            services: services.clone(),
            events: Arc::clone(&stores.events),
            db: Arc::clone(&stores.db),
            bus: bus.clone(),
            prometheus,
            version: crate::VERSION,
        }
    }
}

/// Build the request-handling application for one instance.
pub fn build_app(config: &ResolvedConfig, stores: &Stores, services: &Services, bus: &EventBus) -> Router {
    let state = AppState::new(config, stores, services, bus);
    build_router(state)
}

#[allow(deprecated)]
fn build_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/features", get(list_features).post(create_feature))
        .route(
            "/features/{name}",
            get(get_feature).put(update_feature).delete(archive_feature),
        )
        .route("/features/{name}/toggle", post(toggle_feature))
        .route("/state/export", get(export_state))
        .route("/state/import", post(import_state))
        .route("/events", get(list_events))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware));

    let client = Router::new()
        .route("/features", get(get_client_features))
        .route("/register", post(register_client))
        .route("/metrics", post(register_metrics));

    let routes = Router::new()
        .route("/health", get(get_health))
        .route("/internal-backstage/prometheus", get(get_prometheus))
        .nest("/api/client", client)
        .nest("/api/admin", admin)
        .route_layer(middleware::from_fn_with_state(state.bus.clone(), record_request_time));

    let base_path = state.config.server.base_path.clone();
    let request_timeout = Duration::from_secs(state.config.listener.request_timeout_secs);
    let routes = routes.with_state(state);

    let app = if base_path.is_empty() {
        routes
    } else {
        Router::new().nest(&base_path, routes)
    };

    app.layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use crate::stores::test_support::migrated_db;
    use crate::stores::Teardown;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    struct Fixture {
        app: Router,
        stores: Stores,
        bus: EventBus,
    }

    async fn fixture(base_path: &str) -> Fixture {
        fixture_with_secret(base_path, Some("s3cret")).await
    }

    async fn fixture_with_secret(base_path: &str, secret: Option<&str>) -> Fixture {
        let mut config = ServerConfig::default();
        config.server.base_path = base_path.into();
        config.observability.metrics_enabled = false;
        let resolved = ResolvedConfig::new(Arc::new(config), secret.map(str::to_owned));

        let bus = EventBus::new();
        let stores = Stores::new(migrated_db().await, &bus, &Default::default());
        let services = Services::new(&stores, &resolved);
        let app = build_app(&resolved, &stores, &services, &bus);
        Fixture { app, stores, bus }
    }

    impl Fixture {
        async fn teardown(self) {
            for resource in &self.stores.resources {
                resource.destroy().await.unwrap();
            }
        }
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn admin_routes_need_the_secret() {
        let f = fixture("").await;

        let denied = f.app.clone().oneshot(get("/api/admin/features")).await.unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

        let allowed = f
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/admin/features")
                    .header("authorization", "Bearer s3cret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(allowed.status(), StatusCode::OK);
        assert!(allowed.headers().contains_key("x-request-id"));

        f.teardown().await;
    }

    #[tokio::test]
    async fn admin_routes_are_closed_without_a_secret() {
        let f = fixture_with_secret("", None).await;

        for header in ["Bearer ", "Bearer anything"] {
            let response = f
                .app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri("/api/admin/features")
                        .header("authorization", header)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        let client = f.app.clone().oneshot(get("/api/client/features")).await.unwrap();
        assert_eq!(client.status(), StatusCode::OK);

        f.teardown().await;
    }

    #[tokio::test]
    async fn routes_mount_under_base_path() {
        let f = fixture("/flags").await;

        let health = f.app.clone().oneshot(get("/flags/health")).await.unwrap();
        assert_eq!(health.status(), StatusCode::OK);

        let outside = f.app.clone().oneshot(get("/health")).await.unwrap();
        assert_eq!(outside.status(), StatusCode::NOT_FOUND);

        f.teardown().await;
    }

    #[tokio::test]
    async fn requests_publish_timings() {
        let f = fixture("").await;
        let mut rx = f.bus.subscribe();

        f.app.clone().oneshot(get("/health")).await.unwrap();

        let timing = loop {
            match rx.recv().await.unwrap() {
                crate::events::AppEvent::RequestTime { path, status, .. } => break (path, status),
                _ => continue,
            }
        };
        assert_eq!(timing, ("/health".to_string(), 200));

        f.teardown().await;
    }

    #[tokio::test]
    async fn disabled_metrics_hide_the_scrape_endpoint() {
        let f = fixture("").await;
        let response = f
            .app
            .clone()
            .oneshot(get("/internal-backstage/prometheus"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        f.teardown().await;
    }
}
