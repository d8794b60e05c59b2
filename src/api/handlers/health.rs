use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use std::sync::Arc;
use tracing::{debug, error, info_span, Instrument};
use utoipa::ToSchema;

use crate::kv::EphemeralStore;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    name: String,
    version: String,
    database: String,
    ephemeral_store: String,
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Database and ephemeral store are healthy", body = [Health]),
        (status = 503, description = "Database or ephemeral store is unhealthy", body = [Health])
    ),
    tag = "health"
)]
// axum handler for health
pub async fn health(
    method: Method,
    pool: Extension<PgPool>,
    store: Extension<Arc<dyn EphemeralStore>>,
) -> impl IntoResponse {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    let database = match pool.0.acquire().instrument(acquire_span).await {
        Ok(mut conn) => {
            let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
            match conn.ping().instrument(ping_span).await {
                Ok(()) => Ok(()),
                Err(error) => {
                    error!("Failed to ping database: {}", error);
                    Err(())
                }
            }
        }
        Err(error) => {
            error!("Failed to acquire database connection: {}", error);
            Err(())
        }
    };

    let ephemeral = match store.0.ping().await {
        Ok(()) => Ok(()),
        Err(error) => {
            error!("Failed to ping ephemeral store: {}", error);
            Err(())
        }
    };

    let health = Health {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: if database.is_ok() { "ok" } else { "error" }.to_string(),
        ephemeral_store: if ephemeral.is_ok() { "ok" } else { "error" }.to_string(),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let headers = format!("{}:{}", health.name, health.version)
        .parse::<HeaderValue>()
        .map(|x_app_header_value| {
            debug!("X-App header: {:?}", x_app_header_value);
            let mut headers = HeaderMap::new();
            headers.insert("X-App", x_app_header_value);
            headers
        })
        .unwrap_or_default();

    if database.is_ok() && ephemeral.is_ok() {
        (StatusCode::OK, headers, body)
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, headers, body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryStore;

    #[tokio::test]
    async fn health_reports_unreachable_database() {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(std::time::Duration::from_millis(50))
            .connect_lazy("postgres://postgres@localhost:1/postgres")
            .expect("lazy pool");
        let store: Arc<dyn EphemeralStore> = Arc::new(MemoryStore::new());
        let response = health(Method::GET, Extension(pool), Extension(store))
            .await
            .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
