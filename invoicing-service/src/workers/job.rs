//! One invoicing job: price every product of an organization for a period.

use async_trait::async_trait;
use chrono::Utc;
use rating_service::models::{CostedReport, CostedUsage, Product};
use rating_service::services::{CdrError, RatingContext, RatingPipeline};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::models::{InvoiceStatus, OrganizationType, Period, WorkerResult};
use crate::services::error::InvoicingError;
use crate::services::metrics::record_invoice_job;
use crate::services::store::{stale_before, BillingStore, InvoiceClaim};
use crate::workers::pool::JobProcessor;

#[derive(Debug, Clone)]
pub struct InvoiceJob {
    pub bill_run_id: Uuid,
    pub invoice_id: Uuid,
    pub organization_id: String,
    pub organization_type: OrganizationType,
    pub period: Period,
    pub auth_token: String,
    /// Replace an earlier CDR for the same organization and period.
    pub regenerate: bool,
}

/// How a job ended when it did not fail.
enum JobOutcome {
    Priced(f64),
    /// An earlier job already priced the invoice; its amount is reported again.
    AlreadyFinished(f64),
    /// Another job holds the invoice.
    Busy,
}

/// A product together with the plan it is priced under.
struct PricedProduct {
    product: Product,
    plan_id: Option<String>,
}

pub struct InvoiceProcessor {
    store: Arc<dyn BillingStore>,
    pipeline: RatingPipeline,
    job_timeout: Duration,
}

impl InvoiceProcessor {
    pub fn new(store: Arc<dyn BillingStore>, pipeline: RatingPipeline, job_timeout: Duration) -> Self {
        Self {
            store,
            pipeline,
            job_timeout,
        }
    }

    /// Products billed to the job's organization. Customers pay for their own
    /// products; resellers pay for the products of every attached customer.
    async fn products(&self, job: &InvoiceJob) -> Result<Vec<PricedProduct>, InvoicingError> {
        let catalog = self.pipeline.engine().catalog();
        let token = job.auth_token.as_str();

        match job.organization_type {
            OrganizationType::Customer => {
                let customer = catalog.customer(&job.organization_id, token).await?;
                Ok(catalog
                    .products_of(&customer.id, token)
                    .await?
                    .into_iter()
                    .map(|product| PricedProduct {
                        plan_id: product.plan_id.clone().or_else(|| customer.plan_id.clone()),
                        product,
                    })
                    .collect())
            }
            OrganizationType::Reseller => {
                let reseller = catalog.reseller(&job.organization_id, token).await?;
                let mut priced = Vec::new();
                for customer in catalog
                    .customers(token)
                    .await?
                    .into_iter()
                    .filter(|c| c.reseller_id.as_deref() == Some(reseller.id.as_str()))
                {
                    let plan_id = customer.plan_id.clone().or_else(|| reseller.plan_id.clone());
                    for product in catalog.products_of(&customer.id, token).await? {
                        priced.push(PricedProduct {
                            product,
                            plan_id: plan_id.clone(),
                        });
                    }
                }
                Ok(priced)
            }
        }
    }

    /// Rate every product and fold contributions of the same resource into
    /// one line.
    async fn price(&self, job: &InvoiceJob) -> Result<CostedReport, InvoicingError> {
        let engine = self.pipeline.engine();
        let rounder = engine.rounder();
        let mut items: Vec<CostedUsage> = Vec::new();

        for priced in self.products(job).await? {
            let usage = engine
                .catalog()
                .usage_report(
                    &priced.product.id,
                    job.period.from,
                    job.period.to,
                    &job.auth_token,
                )
                .await?;
            if usage.entries.is_empty() {
                continue;
            }

            let ctx = RatingContext::new(priced.plan_id, job.auth_token.clone());
            let costed = engine.rate(&usage, &ctx).await?;
            for line in costed.usage {
                match items
                    .iter_mut()
                    .find(|item| item.resource_key() == line.resource_key())
                {
                    Some(existing) => existing.absorb(&line, rounder),
                    None => items.push(line),
                }
            }
        }

        let net_cost = rounder.round(items.iter().map(|i| i.cost.net_total).sum());
        Ok(CostedReport {
            organization_id: job.organization_id.clone(),
            period_from: job.period.from,
            period_to: job.period.to,
            net_cost,
            usage: items,
        })
    }

    async fn run(&self, job: &InvoiceJob) -> Result<JobOutcome, InvoicingError> {
        let claim = self
            .store
            .claim_invoice(job.invoice_id, stale_before(self.job_timeout))
            .await?
            .ok_or(InvoicingError::InvoiceNotFound(job.invoice_id))?;
        let mut invoice = match claim {
            InvoiceClaim::Claimed(invoice) => invoice,
            InvoiceClaim::Finished(invoice) => {
                return Ok(JobOutcome::AlreadyFinished(invoice.amount_invoiced))
            }
            InvoiceClaim::Busy => return Ok(JobOutcome::Busy),
        };

        let report = self.price(job).await?;

        match self.pipeline.record(&report, job.regenerate).await {
            Ok(_) => {}
            Err(e @ CdrError::Duplicate { .. }) => {
                warn!(error = %e, "CDR already stored for this period, keeping it");
            }
            Err(e) => return Err(e.into()),
        }

        invoice.mark_finished(report.usage, report.net_cost);
        self.store.update_invoice(&invoice).await?;
        Ok(JobOutcome::Priced(report.net_cost))
    }

    async fn mark_failed(&self, job: &InvoiceJob, message: String) {
        match self.store.get_invoice(job.invoice_id).await {
            Ok(Some(invoice)) if invoice.status == InvoiceStatus::Finished => {}
            Ok(Some(mut invoice)) => {
                invoice.mark_error(message);
                if let Err(e) = self.store.update_invoice(&invoice).await {
                    error!(error = %e, "Failed to persist invoice error state");
                }
            }
            Ok(None) => {}
            Err(e) => error!(error = %e, "Failed to load invoice for error state"),
        }
    }
}

#[async_trait]
impl JobProcessor for InvoiceProcessor {
    #[instrument(
        skip(self, job),
        fields(
            bill_run_id = %job.bill_run_id,
            invoice_id = %job.invoice_id,
            organization_id = %job.organization_id,
            organization_type = %job.organization_type
        )
    )]
    async fn process(&self, job: InvoiceJob) -> WorkerResult {
        let start = Instant::now();

        let outcome = match tokio::time::timeout(self.job_timeout, self.run(&job)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(InvoicingError::Timeout(self.job_timeout)),
        };

        match outcome {
            Ok(JobOutcome::Priced(amount)) => {
                record_invoice_job("finished", start.elapsed().as_secs_f64());
                info!(
                    amount = amount,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Invoice finished"
                );
                WorkerResult::finished(job.bill_run_id, job.organization_id, amount)
            }
            Ok(JobOutcome::AlreadyFinished(amount)) => {
                record_invoice_job("skipped", start.elapsed().as_secs_f64());
                info!(amount = amount, "Invoice already finished, not pricing again");
                WorkerResult::finished(job.bill_run_id, job.organization_id, amount)
            }
            Ok(JobOutcome::Busy) => {
                record_invoice_job("skipped", start.elapsed().as_secs_f64());
                warn!("Invoice is held by another job, skipping");
                WorkerResult::rejected(job.bill_run_id, job.organization_id)
            }
            Err(e) => {
                record_invoice_job("error", start.elapsed().as_secs_f64());
                error!(error = %e, "Invoice failed");
                self.mark_failed(&job, format!("{} (at {})", e, Utc::now().to_rfc3339()))
                    .await;
                WorkerResult::error(job.bill_run_id, job.organization_id)
            }
        }
    }
}
