//! PostgreSQL CDR storage.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{CdrRecord, CdrSave, CostedReport};
use crate::services::cdr_store::{CdrError, CdrRepository};
use crate::services::metrics::DB_QUERY_DURATION;

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct CdrRow {
    cdr_id: Uuid,
    organization_id: String,
    period_from: NaiveDate,
    period_to: NaiveDate,
    net_cost: Decimal,
    report: Json<CostedReport>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl From<CdrRow> for CdrRecord {
    fn from(row: CdrRow) -> Self {
        CdrRecord {
            cdr_id: row.cdr_id,
            organization_id: row.organization_id,
            period_from: row.period_from,
            period_to: row.period_to,
            net_cost: row.net_cost.to_f64().unwrap_or_default(),
            report: row.report.0,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        }
    }
}

fn to_decimal(value: f64) -> Result<Decimal, CdrError> {
    Decimal::from_f64(value)
        .ok_or_else(|| CdrError::Storage(format!("net cost {} is not representable", value)))
}

fn storage(context: &str, e: sqlx::Error) -> CdrError {
    CdrError::Storage(format!("{}: {}", context, e))
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "rating-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Share an existing pool; the caller owns migrations.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl CdrRepository for Database {
    #[instrument(
        skip(self, report),
        fields(organization_id = %report.organization_id, regenerate = regenerate)
    )]
    async fn save(&self, report: &CostedReport, regenerate: bool) -> Result<CdrSave, CdrError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["save_cdr"])
            .start_timer();
        let net_cost = to_decimal(report.net_cost)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| storage("Failed to begin transaction", e))?;

        let previous = sqlx::query_as::<_, (Uuid, Decimal)>(
            r#"
            SELECT cdr_id, net_cost
            FROM cdrs
            WHERE organization_id = $1 AND period_from = $2 AND period_to = $3
            FOR UPDATE
            "#,
        )
        .bind(&report.organization_id)
        .bind(report.period_from)
        .bind(report.period_to)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| storage("Failed to look up CDR", e))?;

        let duplicate = || CdrError::Duplicate {
            organization_id: report.organization_id.clone(),
            from: report.period_from,
            to: report.period_to,
        };

        let outcome = match previous {
            Some(_) if !regenerate => return Err(duplicate()),
            Some((cdr_id, previous_net_cost)) => {
                let row = sqlx::query_as::<_, CdrRow>(
                    r#"
                    UPDATE cdrs
                    SET net_cost = $2, report = $3, updated_utc = NOW()
                    WHERE cdr_id = $1
                    RETURNING cdr_id, organization_id, period_from, period_to, net_cost, report, created_utc, updated_utc
                    "#,
                )
                .bind(cdr_id)
                .bind(net_cost)
                .bind(Json(report))
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| storage("Failed to replace CDR", e))?;

                CdrSave::Replaced {
                    record: row.into(),
                    previous_net_cost: previous_net_cost.to_f64().unwrap_or_default(),
                }
            }
            None => {
                let row = sqlx::query_as::<_, CdrRow>(
                    r#"
                    INSERT INTO cdrs (cdr_id, organization_id, period_from, period_to, net_cost, report)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    RETURNING cdr_id, organization_id, period_from, period_to, net_cost, report, created_utc, updated_utc
                    "#,
                )
                .bind(Uuid::new_v4())
                .bind(&report.organization_id)
                .bind(report.period_from)
                .bind(report.period_to)
                .bind(net_cost)
                .bind(Json(report))
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| match e {
                    sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => duplicate(),
                    _ => storage("Failed to insert CDR", e),
                })?;

                CdrSave::Created(row.into())
            }
        };

        tx.commit()
            .await
            .map_err(|e| storage("Failed to commit CDR", e))?;
        timer.observe_duration();

        info!(
            cdr_id = %outcome.record().cdr_id,
            net_cost = report.net_cost,
            replaced = matches!(outcome, CdrSave::Replaced { .. }),
            "CDR stored"
        );
        Ok(outcome)
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        organization_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<CdrRecord>, CdrError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_cdrs"])
            .start_timer();

        let rows = sqlx::query_as::<_, CdrRow>(
            r#"
            SELECT cdr_id, organization_id, period_from, period_to, net_cost, report, created_utc, updated_utc
            FROM cdrs
            WHERE organization_id = $1
              AND ($2::date IS NULL OR period_from >= $2)
              AND ($3::date IS NULL OR period_to <= $3)
            ORDER BY period_from, period_to
            "#,
        )
        .bind(organization_id)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("Failed to list CDRs", e))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(CdrRecord::from).collect())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), CdrError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| storage("Health check failed", e))?;

        timer.observe_duration();
        Ok(())
    }
}
