//! Postgres-backed offer repository.

use std::future::Future;

use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tokio::runtime::Handle;
use tracing::instrument;
use uuid::Uuid;

use projectdesk_core::{AggregateId, Money};
use projectdesk_offers::{OfferId, OfferRecord, OfferStatus, ProjectId};

use super::{OfferRepository, OfferStoreError};

#[derive(Debug, Clone)]
pub struct PostgresOfferRepository {
    pool: PgPool,
    runtime: Handle,
}

impl PostgresOfferRepository {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    #[instrument(skip(self, offer), fields(offer_id = %offer.id_typed()), err)]
    pub async fn insert_offer(&self, offer: &OfferRecord) -> Result<(), OfferStoreError> {
        sqlx::query(
            r#"
            INSERT INTO offers (
                id, project_id, name, amount_minor, artifact_path,
                status, failure_reason, created_at, updated_at, completed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(offer.id_typed().0.as_uuid())
        .bind(offer.project_id().0.as_uuid())
        .bind(offer.name())
        .bind(offer.amount().minor_units())
        .bind(offer.artifact_path())
        .bind(offer.status().as_str())
        .bind(offer.status().failure_reason())
        .bind(offer.created_at())
        .bind(offer.updated_at())
        .bind(offer.completed_at())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                OfferStoreError::AlreadyExists(offer.id_typed())
            } else {
                map_sqlx_error("insert_offer", e)
            }
        })?;
        Ok(())
    }

    pub async fn fetch_offer(&self, id: OfferId) -> Result<Option<OfferRecord>, OfferStoreError> {
        let row: Option<OfferRow> = sqlx::query_as(&format!("{SELECT_OFFER} WHERE id = $1"))
            .bind(id.0.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("fetch_offer", e))?;
        row.map(OfferRow::into_record).transpose()
    }

    pub async fn fetch_for_project(
        &self,
        project_id: ProjectId,
    ) -> Result<Vec<OfferRecord>, OfferStoreError> {
        let rows: Vec<OfferRow> = sqlx::query_as(&format!(
            "{SELECT_OFFER} WHERE project_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(project_id.0.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_for_project", e))?;
        rows.into_iter().map(OfferRow::into_record).collect()
    }

    #[instrument(
        skip(self, offer),
        fields(offer_id = %offer.id_typed(), status = offer.status().as_str()),
        err
    )]
    pub async fn compare_and_update(&self, offer: &OfferRecord) -> Result<bool, OfferStoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE offers
            SET amount_minor = $2, artifact_path = $3, status = $4, failure_reason = $5,
                updated_at = $6, completed_at = $7
            WHERE id = $1 AND artifact_path = ''
            "#,
        )
        .bind(offer.id_typed().0.as_uuid())
        .bind(offer.amount().minor_units())
        .bind(offer.artifact_path())
        .bind(offer.status().as_str())
        .bind(offer.status().failure_reason())
        .bind(offer.updated_at())
        .bind(offer.completed_at())
        .execute(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("compare_and_update", e))?;

        if updated.rows_affected() > 0 {
            return Ok(true);
        }

        let exists: Option<i32> = sqlx::query_scalar("SELECT 1 FROM offers WHERE id = $1")
            .bind(offer.id_typed().0.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("compare_and_update", e))?;
        match exists {
            Some(_) => Ok(false),
            None => Err(OfferStoreError::NotFound(offer.id_typed())),
        }
    }
}

const SELECT_OFFER: &str = r#"
    SELECT id, project_id, name, amount_minor, artifact_path,
           status, failure_reason, created_at, updated_at, completed_at
    FROM offers
"#;

#[derive(Debug)]
struct OfferRow {
    id: Uuid,
    project_id: Uuid,
    name: String,
    amount_minor: i64,
    artifact_path: String,
    status: String,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for OfferRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(OfferRow {
            id: row.try_get("id")?,
            project_id: row.try_get("project_id")?,
            name: row.try_get("name")?,
            amount_minor: row.try_get("amount_minor")?,
            artifact_path: row.try_get("artifact_path")?,
            status: row.try_get("status")?,
            failure_reason: row.try_get("failure_reason")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

impl OfferRow {
    fn into_record(self) -> Result<OfferRecord, OfferStoreError> {
        let status = OfferStatus::from_parts(&self.status, self.failure_reason)
            .map_err(|e| OfferStoreError::Storage(format!("offer {}: {e}", self.id)))?;
        Ok(OfferRecord::rehydrate(
            OfferId::new(AggregateId::from_uuid(self.id)),
            ProjectId::new(AggregateId::from_uuid(self.project_id)),
            self.name,
            Money::from_minor(self.amount_minor),
            self.artifact_path,
            status,
            self.created_at,
            self.updated_at,
            self.completed_at,
        ))
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> OfferStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            OfferStoreError::Storage(format!("database error in {operation}: {}", db_err.message()))
        }
        sqlx::Error::PoolClosed => {
            OfferStoreError::Storage(format!("connection pool closed in {operation}"))
        }
        other => OfferStoreError::Storage(format!("sqlx error in {operation}: {other}")),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|c| c.as_ref() == "23505"),
        _ => false,
    }
}

impl OfferRepository for PostgresOfferRepository {
    fn insert(&self, offer: &OfferRecord) -> Result<(), OfferStoreError> {
        self.block_on(self.insert_offer(offer))
    }

    fn get(&self, id: OfferId) -> Result<Option<OfferRecord>, OfferStoreError> {
        self.block_on(self.fetch_offer(id))
    }

    fn list_for_project(&self, project_id: ProjectId) -> Result<Vec<OfferRecord>, OfferStoreError> {
        self.block_on(self.fetch_for_project(project_id))
    }

    fn update_if_incomplete(&self, offer: &OfferRecord) -> Result<bool, OfferStoreError> {
        self.block_on(self.compare_and_update(offer))
    }
}
