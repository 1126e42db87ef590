//! Billing windows anchored to a reference date.
//!
//! Every window is the most recently *closed* period at the reference date,
//! with an exclusive end.

use chrono::{Datelike, Days, Months, NaiveDate};
use std::collections::BTreeMap;

use crate::models::{Period, PeriodKind};

/// The closed window of `kind` preceding `reference`.
pub fn period_for(kind: PeriodKind, reference: NaiveDate) -> Option<Period> {
    match kind {
        PeriodKind::Daily => {
            let from = reference.checked_sub_days(Days::new(1))?;
            Some(Period::new(from, reference))
        }
        PeriodKind::Weekly => week_window(reference, 1),
        PeriodKind::BiWeekly => week_window(reference, 2),
        PeriodKind::Monthly
        | PeriodKind::BiMonthly
        | PeriodKind::Quarterly
        | PeriodKind::SemiAnnually => month_window(reference, kind.months()?),
        PeriodKind::Annually => {
            let to = NaiveDate::from_ymd_opt(reference.year(), 1, 1)?;
            let from = NaiveDate::from_ymd_opt(reference.year() - 1, 1, 1)?;
            Some(Period::new(from, to))
        }
    }
}

/// Windows of every kind for `reference`.
pub fn periods(reference: NaiveDate) -> BTreeMap<PeriodKind, Period> {
    PeriodKind::ALL
        .into_iter()
        .filter_map(|kind| period_for(kind, reference).map(|period| (kind, period)))
        .collect()
}

fn week_window(reference: NaiveDate, weeks: u64) -> Option<Period> {
    let since_monday = u64::from(reference.weekday().num_days_from_monday());
    let monday = reference.checked_sub_days(Days::new(since_monday))?;
    let from = monday.checked_sub_days(Days::new(7 * weeks))?;
    Some(Period::new(from, monday))
}

fn month_window(reference: NaiveDate, months: u32) -> Option<Period> {
    let month = reference.month();
    let chunk_start = month - (month - 1) % months;
    let to = NaiveDate::from_ymd_opt(reference.year(), chunk_start, 1)?;
    let from = to.checked_sub_months(Months::new(months))?;
    Some(Period::new(from, to))
}
