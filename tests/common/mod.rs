//! Shared harness for integration tests.
//!
//! Each test gets its own file-backed SQLite database inside a temp
//! directory, migrated with the embedded migrator. The pool is capped at a
//! single connection so concurrent requests serialize at the pool and the
//! transactional behavior stays deterministic.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use sea_orm::{ActiveModelTrait, Set};
use serde_json::Value;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::util::ServiceExt;
use uuid::Uuid;

use stockledger_api::config::AppConfig;
use stockledger_api::db::{self, DbConfig, DbPool};
use stockledger_api::entities::{location, product, stock_transfer};
use stockledger_api::events::{process_events, EventSender};
use stockledger_api::services::movements::next_movement_id;
use stockledger_api::{app_router, AppState};

pub const TENANT_HEADER: &str = "x-tenant-id";
pub const USER_HEADER: &str = "x-user-id";

pub struct TestApp {
    pub router: Router,
    pub db: Arc<DbPool>,
    pub state: Arc<AppState>,
    _tmp: TempDir,
}

impl TestApp {
    pub async fn spawn() -> Self {
        let tmp = TempDir::new().expect("create temp dir");
        let db_path = tmp.path().join(format!("ledger-{}.db", Uuid::new_v4()));
        let url = format!("sqlite://{}?mode=rwc", db_path.display());

        let db_config = DbConfig {
            url: url.clone(),
            max_connections: 1,
            min_connections: 1,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            acquire_timeout: Duration::from_secs(30),
        };
        let pool = db::establish_connection_with_config(&db_config)
            .await
            .expect("connect to sqlite");
        db::run_migrations(&pool).await.expect("run migrations");

        let (event_tx, event_rx) = mpsc::channel(64);
        tokio::spawn(process_events(event_rx));

        let config = AppConfig::new(url, "127.0.0.1".into(), 0, "test".into());
        let db = Arc::new(pool);
        let state = Arc::new(AppState::new(
            db.clone(),
            config,
            EventSender::new(event_tx),
        ));
        let router = app_router(state.clone());

        Self {
            router,
            db,
            state,
            _tmp: tmp,
        }
    }

    pub async fn seed_product(
        &self,
        tenant_id: Uuid,
        name: &str,
        sku: &str,
        reorder_level: Option<i32>,
    ) -> product::Model {
        let now = Utc::now();
        product::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            name: Set(name.to_string()),
            sku: Set(sku.to_string()),
            reorder_level: Set(reorder_level),
            quantity: Set(0),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed product")
    }

    pub async fn seed_location(&self, tenant_id: Uuid, name: &str) -> location::Model {
        location::ActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            name: Set(name.to_string()),
            code: Set(None),
            created_at: Set(Utc::now()),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed location")
    }

    /// Inserts a raw movement-log row, bypassing the processor. Used to seed
    /// transfer-shaped history and rows with controlled timestamps.
    #[allow(clippy::too_many_arguments)]
    pub async fn seed_transfer(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        quantity: i32,
        from_location_id: Option<Uuid>,
        to_location_id: Option<Uuid>,
        created_at: DateTime<Utc>,
    ) -> stock_transfer::Model {
        stock_transfer::ActiveModel {
            id: Set(next_movement_id()),
            tenant_id: Set(tenant_id),
            product_id: Set(product_id),
            quantity: Set(quantity),
            from_location_id: Set(from_location_id),
            to_location_id: Set(to_location_id),
            transfer_number: Set(None),
            notes: Set(None),
            status: Set("COMPLETED".to_string()),
            created_by: Set(None),
            created_at: Set(created_at),
        }
        .insert(self.db.as_ref())
        .await
        .expect("seed transfer")
    }

    pub async fn get(&self, tenant_id: Uuid, uri: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .uri(uri)
            .header(TENANT_HEADER, tenant_id.to_string())
            .body(Body::empty())
            .expect("build request");
        self.send(request).await
    }

    pub async fn post(&self, tenant_id: Uuid, uri: &str, body: Value) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header(TENANT_HEADER, tenant_id.to_string())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("build request");
        self.send(request).await
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("route request");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }
}
