//! Postgres-backed project directory.

use std::future::Future;

use sqlx::PgPool;
use tokio::runtime::Handle;
use tracing::instrument;
use uuid::Uuid;

use projectdesk_core::{Money, UserId};
use projectdesk_offers::{CompanyProfile, ExpenseLine, Project, ProjectId, ProjectSnapshot};

use super::{ProjectDirectory, ProjectLookupError};

#[derive(Debug, Clone)]
pub struct PostgresProjectDirectory {
    pool: PgPool,
    runtime: Handle,
}

type CompanyRow = (String, String, String, String, String);
type LineRow = (String, String, i64, i32);

impl PostgresProjectDirectory {
    pub fn new(pool: PgPool, runtime: Handle) -> Self {
        Self { pool, runtime }
    }

    fn block_on<F: Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }

    #[instrument(skip(self), fields(project_id = %project_id), err)]
    pub async fn load_snapshot(
        &self,
        project_id: ProjectId,
    ) -> Result<ProjectSnapshot, ProjectLookupError> {
        let project: Option<(Uuid, String)> =
            sqlx::query_as("SELECT owner_id, name FROM projects WHERE id = $1")
                .bind(project_id.0.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(unavailable)?;
        let (owner_id, name) = project.ok_or(ProjectLookupError::NotFound(project_id))?;

        let rows: Vec<LineRow> = sqlx::query_as(
            r#"
            SELECT name, category, unit_price_minor, quantity
            FROM expense_lines
            WHERE project_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(project_id.0.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;

        let lines = rows
            .into_iter()
            .map(|(name, category, price, quantity)| {
                let quantity = u32::try_from(quantity)
                    .map_err(|_| ProjectLookupError::Invalid(format!("negative quantity on {name}")))?;
                ExpenseLine::new(name, category, Money::from_minor(price), quantity)
                    .map_err(|e| ProjectLookupError::Invalid(e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let company: Option<CompanyRow> = sqlx::query_as(
            r#"
            SELECT name, email, address, vat_number, website
            FROM company_profiles
            WHERE owner_id = $1
            "#,
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unavailable)?;

        Ok(ProjectSnapshot {
            project: Project {
                id: project_id,
                owner: UserId::from_uuid(owner_id),
                name,
            },
            lines,
            company: company.map(|(name, email, address, vat_number, website)| CompanyProfile {
                name,
                email,
                address,
                vat_number,
                website,
            }),
        })
    }

    /// Insert or replace a project together with its expense lines.
    pub async fn save_snapshot(&self, snapshot: &ProjectSnapshot) -> Result<(), sqlx::Error> {
        let project_id: Uuid = *snapshot.project.id.0.as_uuid();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO projects (id, owner_id, name) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET owner_id = EXCLUDED.owner_id, name = EXCLUDED.name
            "#,
        )
        .bind(project_id)
        .bind(snapshot.project.owner.as_uuid())
        .bind(&snapshot.project.name)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM expense_lines WHERE project_id = $1")
            .bind(project_id)
            .execute(&mut *tx)
            .await?;

        for line in &snapshot.lines {
            sqlx::query(
                r#"
                INSERT INTO expense_lines (project_id, name, category, unit_price_minor, quantity)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(project_id)
            .bind(&line.name)
            .bind(&line.category)
            .bind(line.unit_price.minor_units())
            .bind(i32::try_from(line.quantity).unwrap_or(i32::MAX))
            .execute(&mut *tx)
            .await?;
        }

        if let Some(company) = &snapshot.company {
            sqlx::query(
                r#"
                INSERT INTO company_profiles (owner_id, name, email, address, vat_number, website)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (owner_id) DO UPDATE
                SET name = EXCLUDED.name, email = EXCLUDED.email, address = EXCLUDED.address,
                    vat_number = EXCLUDED.vat_number, website = EXCLUDED.website
                "#,
            )
            .bind(snapshot.project.owner.as_uuid())
            .bind(&company.name)
            .bind(&company.email)
            .bind(&company.address)
            .bind(&company.vat_number)
            .bind(&company.website)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await
    }
}

fn unavailable(err: sqlx::Error) -> ProjectLookupError {
    ProjectLookupError::Unavailable(err.to_string())
}

impl ProjectDirectory for PostgresProjectDirectory {
    fn snapshot(&self, project_id: ProjectId) -> Result<ProjectSnapshot, ProjectLookupError> {
        self.block_on(self.load_snapshot(project_id))
    }
}

