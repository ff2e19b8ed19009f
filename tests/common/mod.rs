use std::sync::Arc;

use axum::{
    body::Body,
    http::{Method, Request},
    Router,
};
use sea_orm::{ActiveModelTrait, EntityTrait, Set};
use serde_json::Value;
use terroir_api::{
    api_v1_routes,
    config::AppConfig,
    db,
    entities::product::{self, ProductStatus},
    events,
    handlers::AppServices,
    AppState,
};
use tower::ServiceExt;
use uuid::Uuid;

pub const DEFAULT_USER: i64 = 1;

/// Test harness over a fresh file-backed SQLite database with the full
/// router wired up.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    db_file: String,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    /// Construct a new test application with fresh database state.
    pub async fn new() -> Self {
        let db_file = format!("terroir_test_{}.db", Uuid::new_v4().simple());
        let _ = std::fs::remove_file(&db_file);

        let mut cfg = AppConfig::new(
            format!("sqlite://{db_file}?mode=rwc"),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.stripe_webhook_secret = Some("whsec_test".to_string());

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_sender, event_receiver) = events::channel(256);
        let event_sender = Some(Arc::new(event_sender));
        let event_task = tokio::spawn(events::process_events(event_receiver));

        let config = Arc::new(cfg);
        let services = AppServices::new(db_arc.clone(), &config, event_sender.clone())
            .expect("failed to build services for tests");
        let state = AppState {
            db: db_arc,
            config,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            db_file,
            _event_task: event_task,
        }
    }

    /// Send a JSON request as the given user, with extra headers.
    pub async fn request_as(
        &self,
        user_id: i64,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user-id", user_id.to_string());
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }

        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };

        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Send an unauthenticated request (no user header).
    #[allow(dead_code)]
    pub async fn request_anonymous(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let body = if let Some(json) = body {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).expect("failed to serialize json request body"))
        } else {
            Body::empty()
        };
        let request = builder.body(body).expect("failed to build request");
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// Seed a published product with the given pricing and stock.
    pub async fn seed_product(
        &self,
        title: &str,
        price_cents: i64,
        promo_price_cents: Option<i64>,
        stock: i32,
    ) -> product::Model {
        let active = product::ActiveModel {
            producer_id: Set(100),
            title: Set(title.to_string()),
            description: Set(Some(format!("{title} seeded for integration tests"))),
            category: Set(Some("grocery".to_string())),
            region: Set(Some("Provence".to_string())),
            origin: Set(Some("Ferme des Collines".to_string())),
            impact_co2_g: Set(Some(120)),
            price_cents: Set(price_cents),
            promo_price_cents: Set(promo_price_cents),
            stock: Set(stock),
            status: Set(ProductStatus::Published),
            is_published: Set(true),
            ..Default::default()
        };
        active
            .insert(&*self.state.db)
            .await
            .expect("seed product for tests")
    }

    /// Seed a product that is not purchasable (draft, unpublished).
    pub async fn seed_unpublished_product(&self, title: &str) -> product::Model {
        let active = product::ActiveModel {
            producer_id: Set(100),
            title: Set(title.to_string()),
            price_cents: Set(1_000),
            stock: Set(10),
            status: Set(ProductStatus::Draft),
            is_published: Set(false),
            ..Default::default()
        };
        active
            .insert(&*self.state.db)
            .await
            .expect("seed unpublished product for tests")
    }

    /// Current stock for a product, read back from the database.
    pub async fn product_stock(&self, product_id: i64) -> i32 {
        product::Entity::find_by_id(product_id)
            .one(&*self.state.db)
            .await
            .expect("read product")
            .expect("product exists")
            .stock
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
        let _ = std::fs::remove_file(&self.db_file);
    }
}

/// Deserialize a response body into JSON.
pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read response body");
    serde_json::from_slice(&bytes).expect("response body is json")
}
