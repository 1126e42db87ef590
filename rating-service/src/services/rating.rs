//! Rating engine: prices a usage report against the catalog.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

use crate::models::{
    Cost, CostLine, CostedReport, CostedUsage, Plan, ResourceMetadata, SkuBundle, UsageEntry,
    UsageReport, DEFAULT_PLAN_ID, LICENSE_SKU, VCPU_SKU,
};
use crate::rounding::Rounder;
use crate::services::catalog_cache::CatalogCache;
use crate::services::catalog_source::CatalogError;
use crate::services::metrics::{record_plan_fallback, record_rating};

#[derive(Debug, thiserror::Error)]
pub enum RatingError {
    #[error("catalog lookup failed: {0}")]
    CatalogLookup(#[from] CatalogError),

    #[error("resource '{resource_id}' of type '{resource_type}' is bundled but has no flavorId")]
    MissingFlavor {
        resource_id: String,
        resource_type: String,
    },

    #[error("no usable plan (requested '{requested}'): {reason}")]
    PlanUnavailable { requested: String, reason: String },
}

/// Per-call inputs that are not part of the usage report.
#[derive(Debug, Clone)]
pub struct RatingContext {
    /// Plan assigned to the organization, if any.
    pub plan_id: Option<String>,
    pub auth_token: String,
    /// Instant used to check plan offer windows.
    pub now: DateTime<Utc>,
}

impl RatingContext {
    pub fn new(plan_id: Option<String>, auth_token: impl Into<String>) -> Self {
        Self {
            plan_id,
            auth_token: auth_token.into(),
            now: Utc::now(),
        }
    }

    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }
}

/// Bundle quantities effective for one resource.
///
/// Windows images need one license per vCPU; flavors that do not list a
/// license get one synthesized from their vCPU count. The shared catalog
/// bundle is never modified.
pub fn effective_bundle_prices(
    bundle: &SkuBundle,
    metadata: &ResourceMetadata,
) -> BTreeMap<String, f64> {
    let mut prices = bundle.sku_prices.clone();
    if metadata.is_windows_image() && !prices.contains_key(LICENSE_SKU) {
        if let Some(vcpu) = prices.get(VCPU_SKU).copied() {
            prices.insert(LICENSE_SKU.to_string(), vcpu);
        }
    }
    prices
}

/// Plans to try, in order. The default plan terminates the list.
fn plan_candidates(primary: &str) -> Vec<&str> {
    if primary == DEFAULT_PLAN_ID {
        vec![DEFAULT_PLAN_ID]
    } else {
        vec![primary, DEFAULT_PLAN_ID]
    }
}

pub struct RatingEngine {
    catalog: Arc<CatalogCache>,
    rounder: Rounder,
}

impl RatingEngine {
    pub fn new(catalog: Arc<CatalogCache>, rounder: Rounder) -> Self {
        Self { catalog, rounder }
    }

    pub fn rounder(&self) -> &Rounder {
        &self.rounder
    }

    pub fn catalog(&self) -> &Arc<CatalogCache> {
        &self.catalog
    }

    /// Price every entry of `report`. Entries with nothing billable are
    /// dropped; any catalog failure aborts the whole report.
    #[instrument(
        skip(self, report, ctx),
        fields(organization_id = %report.organization_id, entries = report.entries.len())
    )]
    pub async fn rate(
        &self,
        report: &UsageReport,
        ctx: &RatingContext,
    ) -> Result<CostedReport, RatingError> {
        let start = Instant::now();

        let mut usage = Vec::with_capacity(report.entries.len());
        for entry in &report.entries {
            match self.rate_entry(entry, ctx).await {
                Ok(Some(costed)) => usage.push(costed),
                Ok(None) => debug!(
                    resource_id = %entry.resource_id,
                    resource_type = %entry.resource_type,
                    "Nothing billable for resource"
                ),
                Err(e) => {
                    record_rating("error", start.elapsed().as_secs_f64());
                    warn!(
                        resource_id = %entry.resource_id,
                        resource_type = %entry.resource_type,
                        error = %e,
                        "Rating failed"
                    );
                    return Err(e);
                }
            }
        }

        let net_cost = self
            .rounder
            .round(usage.iter().map(|u| u.cost.net_total).sum());

        record_rating("success", start.elapsed().as_secs_f64());
        debug!(net_cost = net_cost, rated = usage.len(), "Usage report rated");

        Ok(CostedReport {
            organization_id: report.organization_id.clone(),
            period_from: report.period_from,
            period_to: report.period_to,
            net_cost,
            usage,
        })
    }

    async fn rate_entry(
        &self,
        entry: &UsageEntry,
        ctx: &RatingContext,
    ) -> Result<Option<CostedUsage>, RatingError> {
        let token = ctx.auth_token.as_str();
        let cycles = self.catalog.cycles_for(&entry.resource_type, token).await?;

        // Resources not priced under their own name are bundles (VM flavors).
        let bundled = !cycles
            .iter()
            .any(|c| c.sku_list.contains_key(&entry.resource_type));

        let bundle = if bundled {
            let flavor_id =
                entry
                    .metadata
                    .flavor_id
                    .as_deref()
                    .ok_or_else(|| RatingError::MissingFlavor {
                        resource_id: entry.resource_id.clone(),
                        resource_type: entry.resource_type.clone(),
                    })?;
            let bundle = self.catalog.bundle(flavor_id, token).await?;
            Some(effective_bundle_prices(&bundle, &entry.metadata))
        } else {
            None
        };

        let plan = self
            .resolve_plan(ctx.plan_id.as_deref(), entry.metadata.plan_override, ctx)
            .await?;

        let mut lines = Vec::new();
        for cycle in &cycles {
            let Some(&usage) = entry.usage_breakup.get(&cycle.state) else {
                continue;
            };

            for (sku_name, &multiplier) in &cycle.sku_list {
                let quantity = if sku_name == &entry.resource_type {
                    entry.metadata.size.map(|size| size as f64).unwrap_or(1.0)
                } else {
                    match bundle.as_ref().and_then(|b| b.get(sku_name)) {
                        Some(&quantity) => quantity,
                        None => continue,
                    }
                };

                let sku = self.catalog.sku_by_name(sku_name, token).await?;

                let Some(price) = plan.price_for(&sku.id) else {
                    debug!(
                        plan_id = %plan.id,
                        sku = %sku_name,
                        "SKU has no price in plan, not charged"
                    );
                    continue;
                };

                let amount = usage * multiplier * quantity;
                let sku_cost = amount * price.unit_price;
                let sku_discount = sku_cost * price.discount;

                lines.push(CostLine {
                    sku: sku_name.clone(),
                    sku_state: cycle.state.clone(),
                    sku_cost,
                    sku_discount,
                    sku_net: sku_cost - sku_discount,
                });
            }
        }

        if lines.is_empty() {
            return Ok(None);
        }

        let total_from_sku: f64 = lines.iter().map(|l| l.sku_net).sum();
        let applied_discount = total_from_sku * plan.discount;
        let mut cost = Cost {
            cost_breakup: lines,
            total_from_sku,
            applied_discount,
            net_total: total_from_sku - applied_discount,
        };
        cost.round(&self.rounder);

        Ok(Some(CostedUsage::from_entry(entry, &plan.id, cost)))
    }

    /// Resolve the plan for one entry: the override flag forces the default
    /// plan, otherwise the requested plan is tried first. A plan that cannot be
    /// fetched or is not offered today falls back to the default plan, which
    /// must resolve.
    async fn resolve_plan(
        &self,
        requested: Option<&str>,
        plan_override: bool,
        ctx: &RatingContext,
    ) -> Result<Plan, RatingError> {
        let primary = match requested {
            Some(id) if !plan_override && !id.is_empty() => id,
            _ => DEFAULT_PLAN_ID,
        };
        let today = ctx.now.date_naive();

        let mut last_failure = String::new();
        for candidate in plan_candidates(primary) {
            match self.catalog.plan(candidate, &ctx.auth_token).await {
                Ok(plan) if plan.is_offered_on(today) => return Ok(plan),
                Ok(plan) => {
                    debug!(plan_id = %plan.id, today = %today, "Plan not offered, falling back");
                    record_plan_fallback("not_offered");
                    last_failure = format!("plan '{}' is not offered on {}", plan.id, today);
                }
                Err(e) => {
                    warn!(plan_id = %candidate, error = %e, "Plan lookup failed");
                    record_plan_fallback("lookup_failed");
                    last_failure = e.to_string();
                }
            }
        }

        Err(RatingError::PlanUnavailable {
            requested: primary.to_string(),
            reason: last_failure,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cycle, Sku, SkuPrice};
    use crate::services::catalog_source::{CatalogKind, StaticCatalog};
    use chrono::{NaiveDate, TimeZone};
    use std::time::Duration;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    fn sku(id: &str, name: &str) -> Sku {
        Sku {
            id: id.to_string(),
            name: name.to_string(),
            unit: None,
        }
    }

    fn price(sku_id: &str, unit_price: f64, discount: f64) -> SkuPrice {
        SkuPrice {
            sku_id: sku_id.to_string(),
            unit_price,
            discount,
        }
    }

    fn plan(id: &str, end: &str, discount: f64, prices: Vec<SkuPrice>) -> Plan {
        Plan {
            id: id.to_string(),
            name: id.to_string(),
            discount,
            offered_start_date: date("2020-01-01"),
            offered_end_date: date(end),
            sku_prices: prices,
        }
    }

    fn cycle(resource_type: &str, state: &str, skus: &[(&str, f64)]) -> Cycle {
        Cycle {
            id: format!("{}-{}", resource_type, state),
            resource_type: resource_type.to_string(),
            state: state.to_string(),
            sku_list: skus.iter().map(|(n, m)| (n.to_string(), *m)).collect(),
        }
    }

    fn bundle(id: &str, prices: &[(&str, f64)]) -> SkuBundle {
        SkuBundle {
            id: id.to_string(),
            name: id.to_string(),
            sku_prices: prices.iter().map(|(n, q)| (n.to_string(), *q)).collect(),
        }
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog {
            plans: vec![
                plan(
                    DEFAULT_PLAN_ID,
                    "2020-01-02",
                    0.0,
                    vec![
                        price("s-vcpu", 1.0, 0.0),
                        price("s-ram", 0.5, 0.0),
                        price("s-license", 2.0, 0.0),
                        price("s-volume", 0.1, 0.0),
                    ],
                ),
                plan(
                    "gold",
                    "2030-01-01",
                    0.1,
                    vec![price("s-vcpu", 2.0, 0.5), price("s-volume", 0.2, 0.0)],
                ),
                plan("expired", "2023-01-01", 0.0, vec![price("s-vcpu", 99.0, 0.0)]),
            ],
            skus: vec![
                sku("s-vcpu", "vcpu"),
                sku("s-ram", "ram"),
                sku("s-license", "license"),
                sku("s-volume", "volume"),
            ],
            cycles: vec![
                cycle("vm", "active", &[("vcpu", 3600.0), ("ram", 3600.0), ("license", 3600.0)]),
                cycle("vm", "inactive", &[("ram", 3600.0)]),
                cycle("volume", "active", &[("volume", 1.0)]),
            ],
            bundles: vec![
                bundle("f1", &[("vcpu", 4.0), ("ram", 16.0)]),
                bundle("f2", &[("vcpu", 2.0), ("license", 1.0)]),
            ],
            ..Default::default()
        }
    }

    fn engine(snapshot: StaticCatalog) -> RatingEngine {
        let cache = Arc::new(CatalogCache::new(
            Arc::new(snapshot),
            Duration::from_secs(60),
        ));
        RatingEngine::new(cache, Rounder::new(1e7))
    }

    fn vm_entry(flavor: &str, image: Option<&str>, usage: &[(&str, f64)]) -> UsageEntry {
        UsageEntry {
            resource_id: "vm-1".to_string(),
            resource_name: "web".to_string(),
            resource_type: "vm".to_string(),
            metadata: ResourceMetadata {
                flavor_id: Some(flavor.to_string()),
                image_name: image.map(str::to_string),
                ..Default::default()
            },
            usage_breakup: usage.iter().map(|(s, v)| (s.to_string(), *v)).collect(),
            unit: "h".to_string(),
        }
    }

    fn report(entries: Vec<UsageEntry>) -> UsageReport {
        UsageReport {
            organization_id: "org-1".to_string(),
            period_from: date("2024-05-01"),
            period_to: date("2024-06-01"),
            entries,
        }
    }

    fn line<'a>(costed: &'a CostedUsage, sku: &str, state: &str) -> Option<&'a CostLine> {
        costed
            .cost
            .cost_breakup
            .iter()
            .find(|l| l.sku == sku && l.sku_state == state)
    }

    #[tokio::test]
    async fn test_bundle_quantities_scale_sub_skus() {
        let engine = engine(catalog());
        let ctx = RatingContext::new(None, "").at(at(2024, 6, 1));

        let costed = engine
            .rate(&report(vec![vm_entry("f1", None, &[("active", 2.0)])]), &ctx)
            .await
            .unwrap();

        let entry = &costed.usage[0];
        assert_eq!(entry.plan_id, DEFAULT_PLAN_ID);
        // 2 hours x 3600 x 4 vCPU at 1.0 per unit
        assert_eq!(line(entry, "vcpu", "active").unwrap().sku_cost, 2.0 * 3600.0 * 4.0);
        assert_eq!(line(entry, "ram", "active").unwrap().sku_cost, 2.0 * 3600.0 * 16.0 * 0.5);
        // f1 has no license and the image is not Windows.
        assert!(line(entry, "license", "active").is_none());
        assert_eq!(costed.net_cost, 28800.0 + 57600.0);
    }

    #[tokio::test]
    async fn test_only_states_present_in_usage_are_charged() {
        let engine = engine(catalog());
        let ctx = RatingContext::new(None, "").at(at(2024, 6, 1));

        let costed = engine
            .rate(&report(vec![vm_entry("f1", None, &[("inactive", 1.0)])]), &ctx)
            .await
            .unwrap();

        let entry = &costed.usage[0];
        assert_eq!(entry.cost.cost_breakup.len(), 1);
        assert_eq!(line(entry, "ram", "inactive").unwrap().sku_cost, 3600.0 * 16.0 * 0.5);
    }

    #[tokio::test]
    async fn test_windows_images_get_a_license_per_vcpu() {
        let engine = engine(catalog());
        let ctx = RatingContext::new(None, "").at(at(2024, 6, 1));

        let costed = engine
            .rate(
                &report(vec![vm_entry("f1", Some("Windows2019"), &[("active", 1.0)])]),
                &ctx,
            )
            .await
            .unwrap();

        let license = line(&costed.usage[0], "license", "active").unwrap();
        assert_eq!(license.sku_cost, 3600.0 * 4.0 * 2.0);
    }

    #[test]
    fn test_license_override_leaves_existing_license_and_shared_bundle_alone() {
        let windows = ResourceMetadata {
            image_name: Some("windows-server".to_string()),
            ..Default::default()
        };

        let with_license = bundle("f2", &[("vcpu", 2.0), ("license", 1.0)]);
        assert_eq!(effective_bundle_prices(&with_license, &windows)["license"], 1.0);

        let shared = bundle("f1", &[("vcpu", 4.0)]);
        let effective = effective_bundle_prices(&shared, &windows);
        assert_eq!(effective["license"], 4.0);
        assert!(!shared.sku_prices.contains_key("license"));
    }

    #[tokio::test]
    async fn test_expired_plan_falls_back_to_default() {
        let engine = engine(catalog());
        let ctx = RatingContext::new(Some("expired".to_string()), "").at(at(2024, 6, 1));

        let costed = engine
            .rate(&report(vec![vm_entry("f1", None, &[("active", 1.0)])]), &ctx)
            .await
            .unwrap();

        assert_eq!(costed.usage[0].plan_id, DEFAULT_PLAN_ID);
    }

    #[tokio::test]
    async fn test_unknown_plan_falls_back_to_default() {
        let engine = engine(catalog());
        let ctx = RatingContext::new(Some("platinum".to_string()), "").at(at(2024, 6, 1));

        let costed = engine
            .rate(&report(vec![vm_entry("f1", None, &[("active", 1.0)])]), &ctx)
            .await
            .unwrap();

        assert_eq!(costed.usage[0].plan_id, DEFAULT_PLAN_ID);
    }

    #[tokio::test]
    async fn test_valid_plan_applies_sku_and_plan_discounts() {
        let engine = engine(catalog());
        let ctx = RatingContext::new(Some("gold".to_string()), "").at(at(2024, 6, 1));

        let costed = engine
            .rate(&report(vec![vm_entry("f1", None, &[("active", 1.0)])]), &ctx)
            .await
            .unwrap();

        let entry = &costed.usage[0];
        assert_eq!(entry.plan_id, "gold");
        // gold only prices vCPU: 3600 x 4 x 2.0 = 28800, 50% SKU discount.
        let vcpu = line(entry, "vcpu", "active").unwrap();
        assert_eq!(vcpu.sku_cost, 28800.0);
        assert_eq!(vcpu.sku_discount, 14400.0);
        assert_eq!(vcpu.sku_net, 14400.0);
        assert_eq!(entry.cost.cost_breakup.len(), 1);
        assert_eq!(entry.cost.total_from_sku, 14400.0);
        assert_eq!(entry.cost.applied_discount, 1440.0);
        assert_eq!(entry.cost.net_total, 12960.0);
    }

    #[tokio::test]
    async fn test_plan_override_forces_default() {
        let engine = engine(catalog());
        let ctx = RatingContext::new(Some("gold".to_string()), "").at(at(2024, 6, 1));
        let mut entry = vm_entry("f1", None, &[("active", 1.0)]);
        entry.metadata.plan_override = true;

        let costed = engine.rate(&report(vec![entry]), &ctx).await.unwrap();

        assert_eq!(costed.usage[0].plan_id, DEFAULT_PLAN_ID);
    }

    #[tokio::test]
    async fn test_missing_default_plan_is_fatal() {
        let mut snapshot = catalog();
        snapshot.plans.retain(|p| p.id != DEFAULT_PLAN_ID);
        let engine = engine(snapshot);
        let ctx = RatingContext::new(Some("expired".to_string()), "").at(at(2024, 6, 1));

        let result = engine
            .rate(&report(vec![vm_entry("f1", None, &[("active", 1.0)])]), &ctx)
            .await;

        match result {
            Err(RatingError::PlanUnavailable { requested, .. }) => assert_eq!(requested, "expired"),
            other => panic!("expected PlanUnavailable, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_self_priced_resources_scale_by_size() {
        let engine = engine(catalog());
        let ctx = RatingContext::new(None, "").at(at(2024, 6, 1));
        let entry = UsageEntry {
            resource_id: "vol-1".to_string(),
            resource_name: "data".to_string(),
            resource_type: "volume".to_string(),
            metadata: ResourceMetadata {
                size: Some(50),
                ..Default::default()
            },
            usage_breakup: [("active".to_string(), 10.0)].into_iter().collect(),
            unit: "h".to_string(),
        };

        let costed = engine.rate(&report(vec![entry]), &ctx).await.unwrap();

        // 10 x 1 x 50 GB at 0.1
        assert_eq!(costed.usage[0].cost.net_total, 50.0);
    }

    #[tokio::test]
    async fn test_entries_without_billable_lines_are_skipped() {
        let engine = engine(catalog());
        let ctx = RatingContext::new(None, "").at(at(2024, 6, 1));

        let costed = engine
            .rate(
                &report(vec![
                    vm_entry("f1", None, &[("shelved", 5.0)]),
                    vm_entry("f1", None, &[("active", 1.0)]),
                ]),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(costed.usage.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_resource_type_fails_the_report() {
        let engine = engine(catalog());
        let ctx = RatingContext::new(None, "").at(at(2024, 6, 1));
        let mut entry = vm_entry("f1", None, &[("active", 1.0)]);
        entry.resource_type = "bucket".to_string();

        let result = engine.rate(&report(vec![entry]), &ctx).await;

        assert!(matches!(
            result,
            Err(RatingError::CatalogLookup(CatalogError::NotFound {
                kind: CatalogKind::Cycle,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn test_bundled_resource_without_flavor_fails() {
        let engine = engine(catalog());
        let ctx = RatingContext::new(None, "").at(at(2024, 6, 1));
        let mut entry = vm_entry("f1", None, &[("active", 1.0)]);
        entry.metadata.flavor_id = None;

        let result = engine.rate(&report(vec![entry]), &ctx).await;

        assert!(matches!(result, Err(RatingError::MissingFlavor { .. })));
    }

    #[tokio::test]
    async fn test_unknown_flavor_fails() {
        let engine = engine(catalog());
        let ctx = RatingContext::new(None, "").at(at(2024, 6, 1));

        let result = engine
            .rate(&report(vec![vm_entry("f9", None, &[("active", 1.0)])]), &ctx)
            .await;

        assert!(matches!(
            result,
            Err(RatingError::CatalogLookup(CatalogError::NotFound {
                kind: CatalogKind::Bundle,
                ..
            }))
        ));
    }

    #[tokio::test]
    async fn test_rating_is_deterministic() {
        let engine = engine(catalog());
        let ctx = RatingContext::new(Some("gold".to_string()), "").at(at(2024, 6, 1));
        let input = report(vec![
            vm_entry("f1", Some("Windows"), &[("active", 1.7), ("inactive", 0.3)]),
            vm_entry("f2", None, &[("active", 0.25)]),
        ]);

        let first = engine.rate(&input, &ctx).await.unwrap();
        let second = engine.rate(&input, &ctx).await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_floating_noise_is_rounded_away() {
        let mut snapshot = catalog();
        snapshot.plans[0].sku_prices = vec![price("s-volume", 0.000000003, 0.0)];
        let engine = engine(snapshot);
        let ctx = RatingContext::new(None, "").at(at(2024, 6, 1));
        let entry = UsageEntry {
            resource_id: "vol-1".to_string(),
            resource_name: "data".to_string(),
            resource_type: "volume".to_string(),
            metadata: ResourceMetadata::default(),
            usage_breakup: [("active".to_string(), 10.0)].into_iter().collect(),
            unit: "h".to_string(),
        };

        let costed = engine.rate(&report(vec![entry]), &ctx).await.unwrap();

        assert_eq!(costed.usage[0].cost.net_total, 0.0);
        assert_eq!(costed.net_cost, 0.0);
    }
}
