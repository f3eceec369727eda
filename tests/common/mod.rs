use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

use storefront_api::{
    auth::{AuthVerifier, Role},
    config::{AppConfig, GatewayConfig},
    db::{self, DbConfig},
    entities::{product, user},
    events::{self, EventSender},
    services::payments::SignatureVerifier,
    AppState,
};

/// Test harness backed by an in-memory SQLite database with a
/// single-connection pool so all queries see the same database.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    verifier: Arc<AuthVerifier>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_gateway(GatewayConfig::default()).await
    }

    /// Builds the app against a specific gateway config (e.g. a wiremock
    /// server's URL).
    pub async fn with_gateway(gateway: GatewayConfig) -> Self {
        let cfg = AppConfig {
            database_url: "sqlite::memory:".to_string(),
            jwt_secret: "test_secret_key_for_testing_purposes_only_32chars".to_string(),
            jwt_issuer: "storefront-api".to_string(),
            jwt_audience: "storefront-clients".to_string(),
            jwt_expiration: 3600,
            host: "127.0.0.1".to_string(),
            port: 18_080,
            environment: "test".to_string(),
            log_level: "info".to_string(),
            log_json: false,
            auto_migrate: false,
            event_channel_capacity: 64,
            gateway,
        };

        let pool = db::establish_connection_with_config(&DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(600),
            acquire_timeout: Duration::from_secs(5),
        })
        .await
        .expect("failed to create test database");

        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(64);
        let event_sender = Arc::new(EventSender::new(event_tx));
        let event_task = tokio::spawn(events::process_events(event_rx));

        let verifier = Arc::new(AuthVerifier::from_config(&cfg));
        let state = AppState::new(db_arc, cfg, Some(event_sender)).expect("failed to build state");

        let verifier_for_layer = verifier.clone();
        let router = Router::new()
            .nest("/api/v1", storefront_api::api_v1_routes())
            .layer(axum::middleware::from_fn(
                move |mut req: Request<Body>, next: axum::middleware::Next| {
                    let verifier = verifier_for_layer.clone();
                    async move {
                        req.extensions_mut().insert(verifier);
                        next.run(req).await
                    }
                },
            ))
            .with_state(state.clone());

        Self {
            router,
            state,
            verifier,
            _event_task: event_task,
        }
    }

    pub fn token_for(&self, user_id: Uuid, role: Role) -> String {
        self.verifier
            .issue_token(
                user_id,
                Some("Test User".to_string()),
                Some("test@example.com".to_string()),
                role,
            )
            .expect("token issuance should succeed in tests")
    }

    /// Computes the gateway signature the way the gateway itself would.
    pub fn signature_for(&self, gateway_order_id: &str, gateway_payment_id: &str) -> String {
        SignatureVerifier::new(&self.state.config.gateway)
            .expected_signature(gateway_order_id, gateway_payment_id)
    }

    pub async fn seed_user(&self, name: &str, email: &str) -> Uuid {
        let id = Uuid::new_v4();
        user::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            email: Set(email.to_string()),
            role: Set("user".to_string()),
            order_history: Set(serde_json::json!([])),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed user");
        id
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, stock: i32) -> Uuid {
        let id = Uuid::new_v4();
        product::ActiveModel {
            id: Set(id),
            name: Set(name.to_string()),
            image: Set(format!("/images/{name}.jpg")),
            price: Set(price),
            stock_quantity: Set(stock),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed product");
        id
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        let request = match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("failed to build request");

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("request should not fail at the transport level");

        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("failed to read response body")
            .to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}
