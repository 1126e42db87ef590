//! Invoice generation: targeted runs, the periodic sweep and re-runs.

use chrono::{DateTime, Months, NaiveDate, Utc};
use rating_service::services::CatalogCache;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::models::{
    BillRun, Invoice, OrganizationType, Period, PeriodKind, ResultStatus, WorkerResult,
    PERIODIC_EXECUTION,
};
use crate::services::error::InvoicingError;
use crate::services::metrics::{record_bill_run, record_rejected_job, record_rerun};
use crate::services::periods::periods;
use crate::services::store::{stale_before, BillingStore, StoreError};
use crate::workers::{InvoiceJob, PoolHandle, WorkerPool};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GenerationStatus {
    Queued,
    /// A run for the same request already exists; its id is returned.
    AlreadyInProgress,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationOutcome {
    pub bill_run_id: Uuid,
    pub status: GenerationStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RerunStatus {
    /// Nothing to re-run: unknown bill run or no failed or stalled invoices.
    Missing,
    Fail,
    Ok,
}

impl RerunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RerunStatus::Missing => "missing",
            RerunStatus::Fail => "fail",
            RerunStatus::Ok => "ok",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RerunOutcome {
    pub status: RerunStatus,
    pub resubmitted: usize,
}

/// One organization to invoice. `period` is `None` when the organization's
/// invoice period could not be resolved.
#[derive(Debug, Clone)]
struct Target {
    organization_type: OrganizationType,
    organization_id: String,
    period: Option<Period>,
}

pub struct InvoiceGenerator {
    store: Arc<dyn BillingStore>,
    catalog: Arc<CatalogCache>,
    pool: WorkerPool,
    /// How long a NOT_PROCESSED or PROCESSING invoice may sit untouched before
    /// a re-run treats its job as lost.
    stale_after: Duration,
}

impl InvoiceGenerator {
    pub fn new(
        store: Arc<dyn BillingStore>,
        catalog: Arc<CatalogCache>,
        pool: WorkerPool,
        stale_after: Duration,
    ) -> Self {
        Self {
            store,
            catalog,
            pool,
            stale_after,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Invoice one organization for `period`. Returns once the invoice is
    /// recorded; pricing happens in the background.
    #[instrument(skip(self, token, period), fields(period = %period))]
    pub async fn generate_for(
        &self,
        organization_type: OrganizationType,
        organization_id: &str,
        token: &str,
        period: Period,
    ) -> Result<GenerationOutcome, InvoicingError> {
        if !period.is_valid() {
            return Err(InvoicingError::InvalidPeriod(period));
        }

        match organization_type {
            OrganizationType::Customer => {
                self.catalog.customer(organization_id, token).await?;
            }
            OrganizationType::Reseller => {
                self.catalog.reseller(organization_id, token).await?;
            }
        }

        let run = BillRun::new(
            BillRun::targeted_execution(
                organization_type.as_str(),
                organization_id,
                period.from,
                period.to,
            ),
            1,
            Utc::now(),
        );
        if let Some(existing) = self.create_run(&run, "targeted").await? {
            return Ok(existing);
        }

        let mut handle = self.pool.start(1);
        let target = Target {
            organization_type,
            organization_id: organization_id.to_string(),
            period: Some(period),
        };
        if let Some(job) = prepare(self.store.as_ref(), &mut handle, run.id, target, token).await {
            tokio::spawn(submit_all(handle, vec![job]));
        }

        info!(bill_run_id = %run.id, "Invoice generation queued");
        Ok(GenerationOutcome {
            bill_run_id: run.id,
            status: GenerationStatus::Queued,
        })
    }

    /// Sweep every billable reseller and every billable customer without a
    /// reseller, each over its own invoice period at `reference`.
    #[instrument(skip(self, token))]
    pub async fn generate_periodic(
        &self,
        reference: NaiveDate,
        token: &str,
    ) -> Result<GenerationOutcome, InvoicingError> {
        let windows = periods(reference);
        let window = |organization_id: &str, invoice_period: &str| {
            match invoice_period.parse::<PeriodKind>() {
                Ok(kind) => windows.get(&kind).copied(),
                Err(e) => {
                    warn!(organization_id = %organization_id, error = %e, "Unusable invoice period");
                    None
                }
            }
        };

        let mut targets = Vec::new();
        for reseller in self.catalog.resellers(token).await? {
            if reseller.billable {
                targets.push(Target {
                    organization_type: OrganizationType::Reseller,
                    period: window(&reseller.id, &reseller.invoice_period),
                    organization_id: reseller.id,
                });
            }
        }
        for customer in self.catalog.customers(token).await? {
            if customer.billable && customer.reseller_id.is_none() {
                targets.push(Target {
                    organization_type: OrganizationType::Customer,
                    period: window(&customer.id, &customer.invoice_period),
                    organization_id: customer.id,
                });
            }
        }

        let mut run = BillRun::new(PERIODIC_EXECUTION, targets.len(), Utc::now());
        run.creation_date = reference;
        if let Some(existing) = self.create_run(&run, "periodic").await? {
            return Ok(existing);
        }

        info!(
            bill_run_id = %run.id,
            organizations = targets.len(),
            "Periodic invoicing queued"
        );

        if !targets.is_empty() {
            let store = self.store.clone();
            let handle = self.pool.start(targets.len());
            let token = token.to_string();
            let bill_run_id = run.id;
            tokio::spawn(async move {
                let mut handle = handle;
                for target in targets {
                    let Some(job) =
                        prepare(store.as_ref(), &mut handle, bill_run_id, target, &token).await
                    else {
                        continue;
                    };
                    if let Err(e) = handle.submit(job).await {
                        error!(bill_run_id = %bill_run_id, error = %e, "Stopping periodic dispatch");
                        break;
                    }
                }
            });
        }

        Ok(GenerationOutcome {
            bill_run_id: run.id,
            status: GenerationStatus::Queued,
        })
    }

    /// Resubmit failed or stalled invoices, either those of one bill run or
    /// those created within the last `months` months.
    #[instrument(skip(self, token))]
    pub async fn rerun(&self, bill_run_id: Option<Uuid>, months: u32, token: &str) -> RerunOutcome {
        let outcome = match self.collect_rerunnable(bill_run_id, months).await {
            Ok(invoices) if invoices.is_empty() => RerunOutcome {
                status: RerunStatus::Missing,
                resubmitted: 0,
            },
            Ok(invoices) => {
                let resubmitted = invoices.len();
                let handle = self.pool.start(resubmitted);
                tokio::spawn(resubmit(self.catalog.clone(), handle, invoices, token.to_string()));
                RerunOutcome {
                    status: RerunStatus::Ok,
                    resubmitted,
                }
            }
            Err(e) => {
                error!(error = %e, "Re-run failed");
                RerunOutcome {
                    status: RerunStatus::Fail,
                    resubmitted: 0,
                }
            }
        };

        record_rerun(outcome.status.as_str());
        info!(
            status = outcome.status.as_str(),
            resubmitted = outcome.resubmitted,
            "Re-run requested"
        );
        outcome
    }

    async fn collect_rerunnable(
        &self,
        bill_run_id: Option<Uuid>,
        months: u32,
    ) -> Result<Vec<Invoice>, InvoicingError> {
        if let Some(id) = bill_run_id {
            if self.store.get_bill_run(id).await?.is_none() {
                return Ok(Vec::new());
            }
        }
        let since = Utc::now()
            .checked_sub_months(Months::new(months))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let stale_before = stale_before(self.stale_after);
        Ok(self
            .store
            .list_rerunnable_invoices(since, bill_run_id, stale_before)
            .await?)
    }

    /// Insert `run`. When an identical run already exists its id is returned
    /// instead.
    async fn create_run(
        &self,
        run: &BillRun,
        trigger: &str,
    ) -> Result<Option<GenerationOutcome>, InvoicingError> {
        match self.store.create_bill_run(run).await {
            Ok(()) => {
                record_bill_run(trigger, "queued");
                Ok(None)
            }
            Err(StoreError::Duplicate(what)) => {
                let existing = self
                    .store
                    .find_bill_run(run.creation_date, &run.execution_type)
                    .await?
                    .ok_or(StoreError::Duplicate(what))?;
                record_bill_run(trigger, "already_in_progress");
                info!(bill_run_id = %existing.id, "Bill run already in progress");
                Ok(Some(GenerationOutcome {
                    bill_run_id: existing.id,
                    status: GenerationStatus::AlreadyInProgress,
                }))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Record the invoice for `target` and build its job. Targets that cannot be
/// invoiced settle their reservation right away.
async fn prepare(
    store: &dyn BillingStore,
    handle: &mut PoolHandle,
    bill_run_id: Uuid,
    target: Target,
    token: &str,
) -> Option<InvoiceJob> {
    let Some(period) = target.period else {
        settle(handle, WorkerResult::rejected(bill_run_id, target.organization_id));
        return None;
    };

    let invoice = Invoice::new(
        bill_run_id,
        target.organization_id.clone(),
        target.organization_type,
        period,
    );
    match store.create_invoice(&invoice).await {
        Ok(()) => Some(InvoiceJob {
            bill_run_id,
            invoice_id: invoice.id,
            organization_id: target.organization_id,
            organization_type: target.organization_type,
            period,
            auth_token: token.to_string(),
            regenerate: false,
        }),
        Err(StoreError::Duplicate(what)) => {
            warn!(organization_id = %target.organization_id, "{} already exists, skipping", what);
            settle(handle, WorkerResult::rejected(bill_run_id, target.organization_id));
            None
        }
        Err(e) => {
            // No invoice row exists, so a re-run could never pick this up.
            error!(organization_id = %target.organization_id, error = %e, "Failed to record invoice");
            settle(handle, WorkerResult::rejected(bill_run_id, target.organization_id));
            None
        }
    }
}

fn settle(handle: &mut PoolHandle, result: WorkerResult) {
    if result.status == ResultStatus::Rejected {
        record_rejected_job();
    }
    if let Err(e) = handle.reject(result) {
        error!(error = %e, "Failed to settle job reservation");
    }
}

async fn submit_all(mut handle: PoolHandle, jobs: Vec<InvoiceJob>) {
    for job in jobs {
        let bill_run_id = job.bill_run_id;
        if let Err(e) = handle.submit(job).await {
            error!(bill_run_id = %bill_run_id, error = %e, "Failed to submit invoice job");
            return;
        }
    }
}

/// Re-derive each organization's type and resubmit its invoice with CDR
/// regeneration.
async fn resubmit(
    catalog: Arc<CatalogCache>,
    mut handle: PoolHandle,
    invoices: Vec<Invoice>,
    token: String,
) {
    for invoice in invoices {
        let organization_type =
            match organization_type_of(&catalog, &invoice.organization_id, &token).await {
                Ok(Some(kind)) => kind,
                Ok(None) => {
                    warn!(organization_id = %invoice.organization_id, "Organization no longer exists");
                    settle(
                        &mut handle,
                        WorkerResult::rejected(invoice.bill_run_id, invoice.organization_id),
                    );
                    continue;
                }
                Err(e) => {
                    error!(organization_id = %invoice.organization_id, error = %e, "Organization lookup failed");
                    settle(
                        &mut handle,
                        WorkerResult::error(invoice.bill_run_id, invoice.organization_id),
                    );
                    continue;
                }
            };

        let job = InvoiceJob {
            bill_run_id: invoice.bill_run_id,
            invoice_id: invoice.id,
            period: invoice.period(),
            organization_id: invoice.organization_id,
            organization_type,
            auth_token: token.clone(),
            regenerate: true,
        };
        if let Err(e) = handle.submit(job).await {
            error!(error = %e, "Stopping re-run dispatch");
            return;
        }
    }
}

async fn organization_type_of(
    catalog: &CatalogCache,
    organization_id: &str,
    token: &str,
) -> Result<Option<OrganizationType>, InvoicingError> {
    match catalog.customer(organization_id, token).await {
        Ok(_) => return Ok(Some(OrganizationType::Customer)),
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }
    match catalog.reseller(organization_id, token).await {
        Ok(_) => Ok(Some(OrganizationType::Reseller)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BillRunStatus;
    use crate::services::memory::MemoryStore;
    use crate::services::store::InvoiceClaim;
    use crate::workers::{BillRunAggregator, JobProcessor, PoolConfig};
    use async_trait::async_trait;
    use rating_service::models::Customer;
    use rating_service::rounding::Rounder;
    use rating_service::services::StaticCatalog;

    /// Memory store whose invoice inserts fail like a dropped connection.
    struct UnwritableInvoices {
        inner: MemoryStore,
    }

    #[async_trait]
    impl BillingStore for UnwritableInvoices {
        async fn create_bill_run(&self, run: &BillRun) -> Result<(), StoreError> {
            self.inner.create_bill_run(run).await
        }

        async fn get_bill_run(&self, id: Uuid) -> Result<Option<BillRun>, StoreError> {
            self.inner.get_bill_run(id).await
        }

        async fn find_bill_run(
            &self,
            creation_date: NaiveDate,
            execution_type: &str,
        ) -> Result<Option<BillRun>, StoreError> {
            self.inner.find_bill_run(creation_date, execution_type).await
        }

        async fn update_bill_run(&self, run: &BillRun) -> Result<(), StoreError> {
            self.inner.update_bill_run(run).await
        }

        async fn create_invoice(&self, _invoice: &Invoice) -> Result<(), StoreError> {
            Err(StoreError::Storage("connection reset".to_string()))
        }

        async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, StoreError> {
            self.inner.get_invoice(id).await
        }

        async fn update_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
            self.inner.update_invoice(invoice).await
        }

        async fn claim_invoice(
            &self,
            id: Uuid,
            stale_before: DateTime<Utc>,
        ) -> Result<Option<InvoiceClaim>, StoreError> {
            self.inner.claim_invoice(id, stale_before).await
        }

        async fn list_invoices_for_bill_run(
            &self,
            bill_run_id: Uuid,
        ) -> Result<Vec<Invoice>, StoreError> {
            self.inner.list_invoices_for_bill_run(bill_run_id).await
        }

        async fn list_rerunnable_invoices(
            &self,
            since: DateTime<Utc>,
            bill_run_id: Option<Uuid>,
            stale_before: DateTime<Utc>,
        ) -> Result<Vec<Invoice>, StoreError> {
            self.inner
                .list_rerunnable_invoices(since, bill_run_id, stale_before)
                .await
        }

        async fn health_check(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    struct Echo;

    #[async_trait]
    impl JobProcessor for Echo {
        async fn process(&self, job: InvoiceJob) -> WorkerResult {
            WorkerResult::finished(job.bill_run_id, job.organization_id, 1.0)
        }
    }

    fn generator(store: Arc<dyn BillingStore>) -> InvoiceGenerator {
        let catalog = StaticCatalog {
            customers: vec![Customer {
                id: "acme".to_string(),
                name: "Acme".to_string(),
                plan_id: None,
                reseller_id: None,
                invoice_period: "monthly".to_string(),
                billable: true,
            }],
            ..Default::default()
        };
        let cache = Arc::new(CatalogCache::new(Arc::new(catalog), Duration::from_secs(60)));
        let pool = WorkerPool::new(
            PoolConfig {
                worker_count: 1,
                max_queue_size: 4,
            },
            Arc::new(Echo),
            Arc::new(BillRunAggregator::new(store.clone(), Rounder::default())),
        );
        InvoiceGenerator::new(store, cache, pool, Duration::from_secs(60))
    }

    fn may() -> Period {
        Period::new("2024-05-01".parse().unwrap(), "2024-06-01".parse().unwrap())
    }

    #[tokio::test]
    async fn test_unrecordable_invoice_counts_as_pre_processing_failure() {
        let store: Arc<dyn BillingStore> = Arc::new(UnwritableInvoices {
            inner: MemoryStore::new(),
        });
        let generator = generator(store.clone());

        let outcome = generator
            .generate_for(OrganizationType::Customer, "acme", "token", may())
            .await
            .unwrap();
        assert_eq!(outcome.status, GenerationStatus::Queued);
        generator.pool().drain().await;

        let run = store.get_bill_run(outcome.bill_run_id).await.unwrap().unwrap();
        assert_eq!(run.status, BillRunStatus::Finished);
        assert!(run.invoices_error_list.is_empty());
        assert!(run.rejected_organizations.contains("acme"));
    }

    #[tokio::test]
    async fn test_rerun_skips_invoices_of_live_jobs() {
        let store = Arc::new(MemoryStore::new());
        let generator = generator(store.clone());
        let run = BillRun::new(PERIODIC_EXECUTION, 2, Utc::now());
        store.create_bill_run(&run).await.unwrap();

        let queued = Invoice::new(run.id, "acme", OrganizationType::Customer, may());
        let mut failed = Invoice::new(run.id, "beta", OrganizationType::Customer, may());
        failed.mark_error("catalog down");
        store.create_invoice(&queued).await.unwrap();
        store.create_invoice(&failed).await.unwrap();

        let outcome = generator.rerun(Some(run.id), 1, "token").await;
        assert_eq!(outcome.status, RerunStatus::Ok);
        assert_eq!(outcome.resubmitted, 1);
        generator.pool().drain().await;
    }
}
