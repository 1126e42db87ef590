//! Bill run: run-level bookkeeping for one invoicing request.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;

use crate::models::{ResultStatus, WorkerResult};

/// Execution type of the periodic all-organizations sweep.
pub const PERIODIC_EXECUTION: &str = "periodic";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BillRunStatus {
    Queued,
    Processing,
    Finished,
    Error,
}

impl BillRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillRunStatus::Queued => "QUEUED",
            BillRunStatus::Processing => "PROCESSING",
            BillRunStatus::Finished => "FINISHED",
            BillRunStatus::Error => "ERROR",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "PROCESSING" => BillRunStatus::Processing,
            "FINISHED" => BillRunStatus::Finished,
            "ERROR" => BillRunStatus::Error,
            _ => BillRunStatus::Queued,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BillRunStatus::Finished | BillRunStatus::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillRun {
    pub id: Uuid,
    pub creation_date: NaiveDate,
    /// `periodic`, or `<type>:<organization>:<from>:<to>` for targeted runs.
    pub execution_type: String,
    pub status: BillRunStatus,
    pub invoices_count: i64,
    pub invoices_processed_count: i64,
    pub invoices_error_count: i64,
    pub invoices_error_list: BTreeSet<String>,
    pub organizations_involved: BTreeSet<String>,
    /// Organizations whose job never reached a worker.
    pub rejected_organizations: BTreeSet<String>,
    pub amount_invoiced: f64,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl BillRun {
    pub fn new(execution_type: impl Into<String>, invoices_count: usize, now: DateTime<Utc>) -> Self {
        let mut run = Self {
            id: Uuid::new_v4(),
            creation_date: now.date_naive(),
            execution_type: execution_type.into(),
            status: BillRunStatus::Queued,
            invoices_count: invoices_count as i64,
            invoices_processed_count: 0,
            invoices_error_count: 0,
            invoices_error_list: BTreeSet::new(),
            organizations_involved: BTreeSet::new(),
            rejected_organizations: BTreeSet::new(),
            amount_invoiced: 0.0,
            created_utc: now,
            updated_utc: now,
        };
        run.refresh_status();
        run
    }

    pub fn targeted_execution(
        organization_type: &str,
        organization_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> String {
        format!("{}:{}:{}:{}", organization_type, organization_id, from, to)
    }

    pub fn pre_processing_failures(&self) -> i64 {
        self.rejected_organizations.len() as i64
    }

    /// Fold one job outcome into the run.
    ///
    /// A success outranks an error, which outranks a rejection, so the final
    /// state does not depend on the order results arrive in. A success heals
    /// an earlier error for the same organization.
    pub fn apply(&mut self, result: &WorkerResult) {
        let org = &result.organization_id;
        match result.status {
            ResultStatus::Finished => {
                self.invoices_error_list.remove(org);
                self.rejected_organizations.remove(org);
                if self.organizations_involved.insert(org.clone()) {
                    self.amount_invoiced += result.amount;
                }
            }
            ResultStatus::Error => {
                if !self.organizations_involved.contains(org) {
                    self.rejected_organizations.remove(org);
                    self.invoices_error_list.insert(org.clone());
                }
            }
            ResultStatus::Rejected => {
                if !self.organizations_involved.contains(org)
                    && !self.invoices_error_list.contains(org)
                {
                    self.rejected_organizations.insert(org.clone());
                }
            }
        }
        self.refresh_status();
    }

    /// Recompute counters and status from the organization sets.
    pub fn refresh_status(&mut self) {
        self.invoices_processed_count = self.organizations_involved.len() as i64;
        self.invoices_error_count = self.invoices_error_list.len() as i64;

        let processed = self.invoices_processed_count;
        let errors = self.invoices_error_count;
        let pre = self.pre_processing_failures();

        self.status = if errors == 0 && self.invoices_count - pre <= processed {
            BillRunStatus::Finished
        } else if processed + errors + pre >= self.invoices_count && errors > 0 {
            BillRunStatus::Error
        } else if processed + errors + pre == 0 {
            BillRunStatus::Queued
        } else {
            BillRunStatus::Processing
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(count: usize) -> BillRun {
        BillRun::new(PERIODIC_EXECUTION, count, Utc::now())
    }

    fn ok(org: &str, amount: f64) -> WorkerResult {
        WorkerResult::finished(Uuid::nil(), org, amount)
    }

    fn err(org: &str) -> WorkerResult {
        WorkerResult::error(Uuid::nil(), org)
    }

    fn rejected(org: &str) -> WorkerResult {
        WorkerResult::rejected(Uuid::nil(), org)
    }

    fn permutations<T: Clone>(items: &[T]) -> Vec<Vec<T>> {
        if items.len() <= 1 {
            return vec![items.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..items.len() {
            let mut rest = items.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn test_new_run_is_queued() {
        let run = run(3);
        assert_eq!(run.status, BillRunStatus::Queued);
        assert_eq!(run.invoices_processed_count, 0);
    }

    #[test]
    fn test_empty_run_is_finished_immediately() {
        assert_eq!(run(0).status, BillRunStatus::Finished);
    }

    #[test]
    fn test_pre_processing_failures_count_toward_completion() {
        let mut run = run(10);
        run.apply(&rejected("r-1"));
        run.apply(&rejected("r-2"));
        for i in 0..7 {
            run.apply(&ok(&format!("org-{}", i), 1.0));
            assert_ne!(run.status, BillRunStatus::Finished);
        }
        run.apply(&ok("org-7", 1.0));

        assert_eq!(run.status, BillRunStatus::Finished);
        assert_eq!(run.invoices_processed_count, 8);
        assert_eq!(run.amount_invoiced, 8.0);
    }

    #[test]
    fn test_any_error_prevents_finished() {
        let mut run = run(10);
        run.apply(&rejected("r-1"));
        run.apply(&rejected("r-2"));
        for i in 0..7 {
            run.apply(&ok(&format!("org-{}", i), 1.0));
        }
        assert_eq!(run.status, BillRunStatus::Processing);

        run.apply(&err("org-7"));

        assert_eq!(run.status, BillRunStatus::Error);
        assert_eq!(run.invoices_error_count, 1);
        assert!(run.invoices_processed_count <= run.invoices_count);
    }

    #[test]
    fn test_error_before_all_results_is_still_processing() {
        let mut run = run(3);
        run.apply(&err("org-1"));
        assert_eq!(run.status, BillRunStatus::Processing);
    }

    #[test]
    fn test_duplicate_success_is_counted_once() {
        let mut run = run(2);
        run.apply(&ok("org-1", 5.0));
        run.apply(&ok("org-1", 5.0));

        assert_eq!(run.invoices_processed_count, 1);
        assert_eq!(run.amount_invoiced, 5.0);
        assert_eq!(run.status, BillRunStatus::Processing);
    }

    #[test]
    fn test_rerun_success_heals_error() {
        let mut run = run(2);
        run.apply(&ok("org-1", 1.0));
        run.apply(&err("org-2"));
        assert_eq!(run.status, BillRunStatus::Error);

        run.apply(&ok("org-2", 2.5));

        assert_eq!(run.status, BillRunStatus::Finished);
        assert!(run.invoices_error_list.is_empty());
        assert_eq!(run.amount_invoiced, 3.5);
    }

    #[test]
    fn test_aggregation_is_commutative() {
        let results = vec![
            ok("org-1", 1.5),
            ok("org-2", 2.25),
            err("org-3"),
            rejected("org-4"),
            ok("org-5", 0.5),
        ];

        let mut reference = run(5);
        for result in &results {
            reference.apply(result);
        }

        for order in permutations(&results) {
            let mut candidate = run(5);
            candidate.id = reference.id;
            candidate.created_utc = reference.created_utc;
            candidate.updated_utc = reference.updated_utc;
            candidate.creation_date = reference.creation_date;
            for result in &order {
                candidate.apply(result);
            }
            assert_eq!(candidate, reference);
        }
        assert_eq!(reference.status, BillRunStatus::Error);
    }

    #[test]
    fn test_healing_is_order_independent() {
        let results = vec![err("org-1"), ok("org-1", 4.0), rejected("org-1"), ok("org-2", 1.0)];

        for order in permutations(&results) {
            let mut run = run(2);
            for result in &order {
                run.apply(result);
            }
            assert_eq!(run.status, BillRunStatus::Finished);
            assert_eq!(run.amount_invoiced, 5.0);
            assert!(run.rejected_organizations.is_empty());
        }
    }

    #[test]
    fn test_status_names() {
        for status in [
            BillRunStatus::Queued,
            BillRunStatus::Processing,
            BillRunStatus::Finished,
            BillRunStatus::Error,
        ] {
            assert_eq!(BillRunStatus::from_string(status.as_str()), status);
        }
    }
}
