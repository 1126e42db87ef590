//! In-memory billing store for local runs and tests.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{BillRun, Invoice, InvoiceStatus};
use crate::services::store::{BillingStore, InvoiceClaim, StoreError};

#[derive(Default)]
pub struct MemoryStore {
    bill_runs: RwLock<HashMap<Uuid, BillRun>>,
    invoices: RwLock<HashMap<Uuid, Invoice>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BillingStore for MemoryStore {
    async fn create_bill_run(&self, run: &BillRun) -> Result<(), StoreError> {
        let mut runs = self.bill_runs.write().await;
        let clash = runs.values().any(|r| {
            r.creation_date == run.creation_date && r.execution_type == run.execution_type
        });
        if clash || runs.contains_key(&run.id) {
            return Err(StoreError::Duplicate(format!(
                "bill run '{}' on {}",
                run.execution_type, run.creation_date
            )));
        }
        runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_bill_run(&self, id: Uuid) -> Result<Option<BillRun>, StoreError> {
        Ok(self.bill_runs.read().await.get(&id).cloned())
    }

    async fn find_bill_run(
        &self,
        creation_date: NaiveDate,
        execution_type: &str,
    ) -> Result<Option<BillRun>, StoreError> {
        Ok(self
            .bill_runs
            .read()
            .await
            .values()
            .find(|r| r.creation_date == creation_date && r.execution_type == execution_type)
            .cloned())
    }

    async fn update_bill_run(&self, run: &BillRun) -> Result<(), StoreError> {
        let mut runs = self.bill_runs.write().await;
        let stored = runs
            .get_mut(&run.id)
            .ok_or_else(|| StoreError::NotFound(format!("bill run {}", run.id)))?;
        *stored = run.clone();
        stored.updated_utc = Utc::now();
        Ok(())
    }

    async fn create_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let mut invoices = self.invoices.write().await;
        let clash = invoices.values().any(|i| {
            i.organization_id == invoice.organization_id
                && i.period_start_date == invoice.period_start_date
                && i.period_end_date == invoice.period_end_date
        });
        if clash || invoices.contains_key(&invoice.id) {
            return Err(StoreError::Duplicate(format!(
                "invoice for '{}' {}",
                invoice.organization_id,
                invoice.period()
            )));
        }
        invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn get_invoice(&self, id: Uuid) -> Result<Option<Invoice>, StoreError> {
        Ok(self.invoices.read().await.get(&id).cloned())
    }

    async fn update_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let mut invoices = self.invoices.write().await;
        let stored = invoices
            .get_mut(&invoice.id)
            .ok_or_else(|| StoreError::NotFound(format!("invoice {}", invoice.id)))?;
        *stored = invoice.clone();
        Ok(())
    }

    async fn claim_invoice(
        &self,
        id: Uuid,
        stale_before: DateTime<Utc>,
    ) -> Result<Option<InvoiceClaim>, StoreError> {
        let mut invoices = self.invoices.write().await;
        let Some(invoice) = invoices.get_mut(&id) else {
            return Ok(None);
        };
        let claim = if invoice.status == InvoiceStatus::Finished {
            InvoiceClaim::Finished(invoice.clone())
        } else if invoice.is_claimable(stale_before) {
            invoice.mark_processing();
            InvoiceClaim::Claimed(invoice.clone())
        } else {
            InvoiceClaim::Busy
        };
        Ok(Some(claim))
    }

    async fn list_invoices_for_bill_run(&self, bill_run_id: Uuid) -> Result<Vec<Invoice>, StoreError> {
        let mut invoices: Vec<Invoice> = self
            .invoices
            .read()
            .await
            .values()
            .filter(|i| i.bill_run_id == bill_run_id)
            .cloned()
            .collect();
        invoices.sort_by(|a, b| a.organization_id.cmp(&b.organization_id));
        Ok(invoices)
    }

    async fn list_rerunnable_invoices(
        &self,
        since: DateTime<Utc>,
        bill_run_id: Option<Uuid>,
        stale_before: DateTime<Utc>,
    ) -> Result<Vec<Invoice>, StoreError> {
        let mut invoices: Vec<Invoice> = self
            .invoices
            .read()
            .await
            .values()
            .filter(|i| i.is_rerunnable(stale_before))
            .filter(|i| match bill_run_id {
                Some(id) => i.bill_run_id == id,
                None => i.created_utc >= since,
            })
            .cloned()
            .collect();
        invoices.sort_by_key(|i| i.created_utc);
        Ok(invoices)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
