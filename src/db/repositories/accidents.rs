use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::models::{Accident, NewAccident, Severity, Status, UpdateAccident};
use crate::error::Error;

/// Default page size for listings
pub const DEFAULT_LIST_LIMIT: i64 = 100;
/// Hard cap on listings; caller-supplied limits are clamped, not trusted
pub const MAX_LIST_LIMIT: i64 = 500;

const ACCIDENT_COLUMNS: &str =
    "id, image_base64, timestamp, lat, lng, severity, verified, ml_confidence, device_id, address, status";

/// Listing filter; all fields optional
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    pub severity: Option<Severity>,
    pub status: Option<Status>,
    pub limit: Option<i64>,
}

/// Predicates for the independent stats counters
#[derive(Debug, Clone, Copy)]
pub enum CountPredicate {
    All,
    Severity(Severity),
    Status(Status),
    /// Records created since local midnight, measured on the store's clock
    Today,
}

/// Durable accident store. Every operation is durable on return.
#[async_trait]
pub trait AccidentStore: Send + Sync {
    /// Insert a validated record; id and timestamp are assigned here
    async fn insert(&self, new: NewAccident) -> Result<Accident>;

    /// Point lookup by id
    async fn get(&self, id: Uuid) -> Result<Option<Accident>>;

    /// Filtered listing, newest timestamp first
    async fn list(&self, filter: &ListFilter) -> Result<Vec<Accident>>;

    /// Partial merge update, last write wins; `None` for an unknown id
    async fn update(&self, id: Uuid, changes: &UpdateAccident) -> Result<Option<Accident>>;

    /// Count records matching a predicate
    async fn count(&self, predicate: CountPredicate) -> Result<i64>;
}

/// Accidents repository backed by PostgreSQL
#[derive(Clone)]
pub struct AccidentsRepository {
    pool: Arc<PgPool>,
}

impl AccidentsRepository {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccidentStore for AccidentsRepository {
    async fn insert(&self, new: NewAccident) -> Result<Accident> {
        let sql = format!(
            r#"
            INSERT INTO accidents (id, image_base64, lat, lng, severity, device_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            ACCIDENT_COLUMNS
        );

        let result = sqlx::query_as::<_, Accident>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.image_base64)
            .bind(new.location.lat)
            .bind(new.location.lng)
            .bind(new.severity)
            .bind(&new.device_id)
            .fetch_one(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to insert accident: {}", e)))?;

        Ok(result)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Accident>> {
        let sql = format!("SELECT {} FROM accidents WHERE id = $1", ACCIDENT_COLUMNS);

        let result = sqlx::query_as::<_, Accident>(&sql)
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to get accident by ID: {}", e)))?;

        Ok(result)
    }

    async fn list(&self, filter: &ListFilter) -> Result<Vec<Accident>> {
        let limit = filter
            .limit
            .unwrap_or(DEFAULT_LIST_LIMIT)
            .clamp(1, MAX_LIST_LIMIT);

        let mut sql = format!("SELECT {} FROM accidents WHERE 1=1", ACCIDENT_COLUMNS);
        let mut param_index = 1;

        if filter.severity.is_some() {
            sql.push_str(&format!(" AND severity = ${}", param_index));
            param_index += 1;
        }

        if filter.status.is_some() {
            sql.push_str(&format!(" AND status = ${}", param_index));
        }

        sql.push_str(" ORDER BY timestamp DESC");
        sql.push_str(&format!(" LIMIT {}", limit));

        let mut db_query = sqlx::query_as::<_, Accident>(&sql);

        if let Some(severity) = filter.severity {
            db_query = db_query.bind(severity);
        }

        if let Some(status) = filter.status {
            db_query = db_query.bind(status);
        }

        let result = db_query
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to list accidents: {}", e)))?;

        Ok(result)
    }

    async fn update(&self, id: Uuid, changes: &UpdateAccident) -> Result<Option<Accident>> {
        let sql = format!(
            r#"
            UPDATE accidents SET
                status = COALESCE($2, status),
                severity = COALESCE($3, severity),
                address = COALESCE($4, address),
                verified = COALESCE($5, verified),
                ml_confidence = COALESCE($6, ml_confidence)
            WHERE id = $1
            RETURNING {}
            "#,
            ACCIDENT_COLUMNS
        );

        let result = sqlx::query_as::<_, Accident>(&sql)
            .bind(id)
            .bind(changes.status)
            .bind(changes.severity)
            .bind(&changes.address)
            .bind(changes.verified)
            .bind(changes.ml_confidence)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| Error::Database(format!("Failed to update accident: {}", e)))?;

        Ok(result)
    }

    async fn count(&self, predicate: CountPredicate) -> Result<i64> {
        let count = match predicate {
            CountPredicate::All => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM accidents")
                    .fetch_one(&*self.pool)
                    .await
            }
            CountPredicate::Severity(severity) => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM accidents WHERE severity = $1")
                    .bind(severity)
                    .fetch_one(&*self.pool)
                    .await
            }
            CountPredicate::Status(status) => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM accidents WHERE status = $1")
                    .bind(status)
                    .fetch_one(&*self.pool)
                    .await
            }
            CountPredicate::Today => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM accidents WHERE timestamp >= CURRENT_DATE",
                )
                .fetch_one(&*self.pool)
                .await
            }
        }
        .map_err(|e| Error::Database(format!("Failed to count accidents: {}", e)))?;

        Ok(count)
    }
}
