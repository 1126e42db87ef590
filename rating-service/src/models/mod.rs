//! Domain models for rating-service.

mod catalog;
mod cdr;
mod cost;
mod usage;

pub use catalog::{
    Customer, Cycle, Plan, Product, Reseller, Sku, SkuBundle, SkuPrice, DEFAULT_PLAN_ID,
    LICENSE_SKU, VCPU_SKU,
};
pub use cdr::{CdrRecord, CdrSave};
pub use cost::{Cost, CostLine, CostedReport, CostedUsage};
pub use usage::{ResourceMetadata, UsageEntry, UsageReport};
