//! PostgreSQL billing store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rating_service::models::CostedUsage;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use service_core::error::AppError;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::FromRow;
use std::time::Duration;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{BillRun, BillRunStatus, Invoice, InvoiceStatus, OrganizationType};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::store::{BillingStore, InvoiceClaim, StoreError};

const BILL_RUN_COLUMNS: &str = "id, creation_date, execution_type, status, invoices_count, \
    invoices_processed_count, invoices_error_count, invoices_error_list, organizations_involved, \
    rejected_organizations, amount_invoiced, created_utc, updated_utc";

const INVOICE_COLUMNS: &str = "id, bill_run_id, organization_id, organization_type, status, \
    period_start_date, period_end_date, items, amount_invoiced, error_message, created_utc, updated_utc";

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

#[derive(Debug, FromRow)]
struct BillRunRow {
    id: Uuid,
    creation_date: NaiveDate,
    execution_type: String,
    status: String,
    invoices_count: i64,
    invoices_processed_count: i64,
    invoices_error_count: i64,
    invoices_error_list: Vec<String>,
    organizations_involved: Vec<String>,
    rejected_organizations: Vec<String>,
    amount_invoiced: Decimal,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl From<BillRunRow> for BillRun {
    fn from(row: BillRunRow) -> Self {
        BillRun {
            id: row.id,
            creation_date: row.creation_date,
            execution_type: row.execution_type,
            status: BillRunStatus::from_string(&row.status),
            invoices_count: row.invoices_count,
            invoices_processed_count: row.invoices_processed_count,
            invoices_error_count: row.invoices_error_count,
            invoices_error_list: row.invoices_error_list.into_iter().collect(),
            organizations_involved: row.organizations_involved.into_iter().collect(),
            rejected_organizations: row.rejected_organizations.into_iter().collect(),
            amount_invoiced: row.amount_invoiced.to_f64().unwrap_or_default(),
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        }
    }
}

#[derive(Debug, FromRow)]
struct InvoiceRow {
    id: Uuid,
    bill_run_id: Uuid,
    organization_id: String,
    organization_type: String,
    status: String,
    period_start_date: NaiveDate,
    period_end_date: NaiveDate,
    items: Json<Vec<CostedUsage>>,
    amount_invoiced: Decimal,
    error_message: Option<String>,
    created_utc: DateTime<Utc>,
    updated_utc: DateTime<Utc>,
}

impl From<InvoiceRow> for Invoice {
    fn from(row: InvoiceRow) -> Self {
        Invoice {
            id: row.id,
            bill_run_id: row.bill_run_id,
            organization_id: row.organization_id,
            organization_type: OrganizationType::from_string(&row.organization_type),
            status: InvoiceStatus::from_string(&row.status),
            period_start_date: row.period_start_date,
            period_end_date: row.period_end_date,
            items: row.items.0,
            amount_invoiced: row.amount_invoiced.to_f64().unwrap_or_default(),
            error_message: row.error_message,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        }
    }
}

fn money(value: f64) -> Result<Decimal, StoreError> {
    Decimal::from_f64(value)
        .ok_or_else(|| StoreError::Storage(format!("amount {} is not representable", value)))
}

fn storage(context: &str, e: sqlx::Error) -> StoreError {
    StoreError::Storage(format!("{}: {}", context, e))
}

fn set_to_vec(set: &std::collections::BTreeSet<String>) -> Vec<String> {
    set.iter().cloned().collect()
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "invoicing-service"))]
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

    /// Get a reference to the connection pool.
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
impl BillingStore for Database {
    #[instrument(skip(self, run), fields(bill_run_id = %run.id, execution_type = %run.execution_type))]
    async fn create_bill_run(&self, run: &BillRun) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_bill_run"])
            .start_timer();

        sqlx::query(&format!(
            "INSERT INTO bill_runs ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
            BILL_RUN_COLUMNS
        ))
        .bind(run.id)
        .bind(run.creation_date)
        .bind(&run.execution_type)
        .bind(run.status.as_str())
        .bind(run.invoices_count)
        .bind(run.invoices_processed_count)
        .bind(run.invoices_error_count)
        .bind(set_to_vec(&run.invoices_error_list))
        .bind(set_to_vec(&run.organizations_involved))
        .bind(set_to_vec(&run.rejected_organizations))
        .bind(money(run.amount_invoiced)?)
        .bind(run.created_utc)
        .bind(run.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::Duplicate(format!(
                    "bill run '{}' on {}",
                    run.execution_type, run.creation_date
                ))
            }
            _ => storage("Failed to create bill run", e),
        })?;

        timer.observe_duration();
        info!("Bill run created");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_bill_run(&self, id: Uuid) -> Result<Option<BillRun>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_bill_run"])
            .start_timer();

        let row = sqlx::query_as::<_, BillRunRow>(&format!(
            "SELECT {} FROM bill_runs WHERE id = $1",
            BILL_RUN_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("Failed to get bill run", e))?;

        timer.observe_duration();
        Ok(row.map(BillRun::from))
    }

    #[instrument(skip(self))]
    async fn find_bill_run(
        &self,
        creation_date: NaiveDate,
        execution_type: &str,
    ) -> Result<Option<BillRun>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["find_bill_run"])
            .start_timer();

        let row = sqlx::query_as::<_, BillRunRow>(&format!(
            "SELECT {} FROM bill_runs WHERE creation_date = $1 AND execution_type = $2",
            BILL_RUN_COLUMNS
        ))
        .bind(creation_date)
        .bind(execution_type)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("Failed to find bill run", e))?;

        timer.observe_duration();
        Ok(row.map(BillRun::from))
    }

    #[instrument(skip(self, run), fields(bill_run_id = %run.id, status = run.status.as_str()))]
    async fn update_bill_run(&self, run: &BillRun) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_bill_run"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE bill_runs
            SET status = $2, invoices_count = $3, invoices_processed_count = $4,
                invoices_error_count = $5, invoices_error_list = $6,
                organizations_involved = $7, rejected_organizations = $8,
                amount_invoiced = $9, updated_utc = NOW()
            WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(run.status.as_str())
        .bind(run.invoices_count)
        .bind(run.invoices_processed_count)
        .bind(run.invoices_error_count)
        .bind(set_to_vec(&run.invoices_error_list))
        .bind(set_to_vec(&run.organizations_involved))
        .bind(set_to_vec(&run.rejected_organizations))
        .bind(money(run.amount_invoiced)?)
        .execute(&self.pool)
        .await
        .map_err(|e| storage("Failed to update bill run", e))?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("bill run {}", run.id)));
        }
        Ok(())
    }

    #[instrument(
        skip(self, invoice),
        fields(invoice_id = %invoice.id, organization_id = %invoice.organization_id)
    )]
    async fn create_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_invoice"])
            .start_timer();

        sqlx::query(&format!(
            "INSERT INTO invoices ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            INVOICE_COLUMNS
        ))
        .bind(invoice.id)
        .bind(invoice.bill_run_id)
        .bind(&invoice.organization_id)
        .bind(invoice.organization_type.as_str())
        .bind(invoice.status.as_str())
        .bind(invoice.period_start_date)
        .bind(invoice.period_end_date)
        .bind(Json(&invoice.items))
        .bind(money(invoice.amount_invoiced)?)
        .bind(&invoice.error_message)
        .bind(invoice.created_utc)
        .bind(invoice.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db_err) if db_err.is_unique_violation() => {
                StoreError::Duplicate(format!(
                    "invoice for '{}' {}",
                    invoice.organization_id,
                    invoice.period()
                ))
            }
            _ => storage("Failed to create invoice", e),
        })?;

        timer.observe_duration();
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        let row = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {} FROM invoices WHERE id = $1",
            INVOICE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("Failed to get invoice", e))?;

        timer.observe_duration();
        Ok(row.map(Invoice::from))
    }

    #[instrument(skip(self, invoice), fields(invoice_id = %invoice.id, status = invoice.status.as_str()))]
    async fn update_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["update_invoice"])
            .start_timer();

        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET status = $2, items = $3, amount_invoiced = $4, error_message = $5,
                updated_utc = NOW()
            WHERE id = $1
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.status.as_str())
        .bind(Json(&invoice.items))
        .bind(money(invoice.amount_invoiced)?)
        .bind(&invoice.error_message)
        .execute(&self.pool)
        .await
        .map_err(|e| storage("Failed to update invoice", e))?;

        timer.observe_duration();

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("invoice {}", invoice.id)));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn claim_invoice(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<InvoiceClaim>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["claim_invoice"])
            .start_timer();

        let claimed = sqlx::query_as::<_, InvoiceRow>(&format!(
            r#"
            UPDATE invoices
            SET status = 'PROCESSING', error_message = NULL, updated_utc = NOW()
            WHERE id = $1
              AND (status IN ('NOT_PROCESSED', 'ERROR')
                   OR (status = 'PROCESSING' AND updated_utc < $2))
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(id)
        .bind(stale_before)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| storage("Failed to claim invoice", e))?;

        timer.observe_duration();

        if let Some(row) = claimed {
            return Ok(Some(InvoiceClaim::Claimed(row.into())));
        }
        Ok(self.get_invoice(id).await?.map(|invoice| {
            if invoice.status == InvoiceStatus::Finished {
                InvoiceClaim::Finished(invoice)
            } else {
                InvoiceClaim::Busy
            }
        }))
    }

    #[instrument(skip(self))]
    async fn list_invoices_for_bill_run(&self, bill_run_id: Uuid) -> Result<Vec<Invoice>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices_for_bill_run"])
            .start_timer();

        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            "SELECT {} FROM invoices WHERE bill_run_id = $1 ORDER BY organization_id",
            INVOICE_COLUMNS
        ))
        .bind(bill_run_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("Failed to list invoices", e))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(Invoice::from).collect())
    }

    #[instrument(skip(self))]
    async fn list_rerunnable_invoices(
        &self,
        since: DateTime<Utc>,
        bill_run_id: Option<Uuid>,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Invoice>, StoreError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_rerunnable_invoices"])
            .start_timer();

        let rows = sqlx::query_as::<_, InvoiceRow>(&format!(
            r#"
            SELECT {} FROM invoices
            WHERE (status = 'ERROR'
                   OR (status IN ('NOT_PROCESSED', 'PROCESSING') AND updated_utc < $3))
              AND (($2::uuid IS NOT NULL AND bill_run_id = $2)
                   OR ($2::uuid IS NULL AND created_utc >= $1))
            ORDER BY created_utc
            "#,
            INVOICE_COLUMNS
        ))
        .bind(since)
        .bind(bill_run_id)
        .bind(stale_before)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| storage("Failed to list rerunnable invoices", e))?;

        timer.observe_duration();
        Ok(rows.into_iter().map(Invoice::from).collect())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| storage("Health check failed", e))?;
        Ok(())
    }
}
