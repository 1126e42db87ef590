//! Billing period kinds and windows.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PeriodKind {
    Daily,
    Weekly,
    BiWeekly,
    Monthly,
    BiMonthly,
    Quarterly,
    SemiAnnually,
    Annually,
}

impl PeriodKind {
    pub const ALL: [PeriodKind; 8] = [
        PeriodKind::Daily,
        PeriodKind::Weekly,
        PeriodKind::BiWeekly,
        PeriodKind::Monthly,
        PeriodKind::BiMonthly,
        PeriodKind::Quarterly,
        PeriodKind::SemiAnnually,
        PeriodKind::Annually,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::Daily => "daily",
            PeriodKind::Weekly => "weekly",
            PeriodKind::BiWeekly => "bi-weekly",
            PeriodKind::Monthly => "monthly",
            PeriodKind::BiMonthly => "bi-monthly",
            PeriodKind::Quarterly => "quarterly",
            PeriodKind::SemiAnnually => "semi-annually",
            PeriodKind::Annually => "annually",
        }
    }

    /// Length in months of the monthly-family kinds.
    pub fn months(&self) -> Option<u32> {
        match self {
            PeriodKind::Monthly => Some(1),
            PeriodKind::BiMonthly => Some(2),
            PeriodKind::Quarterly => Some(3),
            PeriodKind::SemiAnnually => Some(6),
            _ => None,
        }
    }
}

impl fmt::Display for PeriodKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PeriodKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        PeriodKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("Invalid invoice period: {}", s))
    }
}

/// Half-open date window `[from, to)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Period {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl Period {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    pub fn is_valid(&self) -> bool {
        self.from < self.to
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.from, self.to)
    }
}
