//! The plan catalog.
//!
//! Plans are defined in code and initialised once per process. Lookups are
//! lock-free after the first access.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::subscription::{BillingCycle, Price};
use crate::usage::{API_CALLS, BACKGROUND_TASKS, MESSAGES, WELL_KNOWN_RESOURCE_TYPES};

/// Limit sentinel meaning "no finite quota".
pub const UNLIMITED: i64 = -1;

/// Identifier of the plan users fall back to without a subscription.
pub const FREE_PLAN_ID: &str = "free";

/// Prices per billing cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanPricing {
    /// Price per month.
    pub monthly: Price,
    /// Price per year.
    pub yearly: Price,
}

impl PlanPricing {
    /// Price for the given cycle.
    #[must_use]
    pub fn price_for(&self, cycle: BillingCycle) -> Price {
        match cycle {
            BillingCycle::Monthly => self.monthly.clone(),
            BillingCycle::Yearly => self.yearly.clone(),
        }
    }
}

/// An immutable plan definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanDefinition {
    /// Plan identifier (e.g. `"basic"`).
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Resource type -> limit (`-1` = unlimited).
    pub limits: BTreeMap<String, i64>,
    /// Feature flags included in the plan.
    pub features: Vec<String>,
    /// Prices per billing cycle.
    pub pricing: PlanPricing,
}

impl PlanDefinition {
    fn build(
        id: &str,
        name: &str,
        limits: [i64; 3],
        features: &[&str],
        monthly_cents: i64,
        yearly_cents: i64,
    ) -> Self {
        let [messages, api_calls, background_tasks] = limits;
        Self {
            id: id.to_string(),
            name: name.to_string(),
            limits: BTreeMap::from([
                (MESSAGES.to_string(), messages),
                (API_CALLS.to_string(), api_calls),
                (BACKGROUND_TASKS.to_string(), background_tasks),
            ]),
            features: features.iter().map(|f| (*f).to_string()).collect(),
            pricing: PlanPricing {
                monthly: Price::usd(monthly_cents),
                yearly: Price::usd(yearly_cents),
            },
        }
    }

    /// Limit for `resource_type`; a missing key means no access (`0`).
    #[must_use]
    pub fn limit_for(&self, resource_type: &str) -> i64 {
        self.limits.get(resource_type).copied().unwrap_or(0)
    }
}

fn catalog() -> &'static [PlanDefinition] {
    static CATALOG: OnceLock<Vec<PlanDefinition>> = OnceLock::new();
    CATALOG.get_or_init(|| {
        vec![
            PlanDefinition::build(
                FREE_PLAN_ID,
                "Free",
                [100, 1_000, 10],
                &["basic_chat", "community_support"],
                0,
                0,
            ),
            PlanDefinition::build(
                "basic",
                "Basic",
                [1_000, 10_000, 100],
                &["basic_chat", "email_support", "conversation_history"],
                999,
                9_990,
            ),
            PlanDefinition::build(
                "premium",
                "Premium",
                [10_000, 100_000, 1_000],
                &[
                    "basic_chat",
                    "priority_support",
                    "conversation_history",
                    "background_tasks",
                    "api_access",
                ],
                2_999,
                29_990,
            ),
            PlanDefinition::build(
                "enterprise",
                "Enterprise",
                [UNLIMITED, UNLIMITED, UNLIMITED],
                &[
                    "basic_chat",
                    "dedicated_support",
                    "conversation_history",
                    "background_tasks",
                    "api_access",
                    "sso",
                    "audit_logs",
                ],
                9_999,
                99_990,
            ),
        ]
    })
}

/// All plans, in display order.
#[must_use]
pub fn list_plans() -> &'static [PlanDefinition] {
    catalog()
}

/// Look up a plan by identifier.
#[must_use]
pub fn get_plan(plan_id: &str) -> Option<&'static PlanDefinition> {
    catalog().iter().find(|plan| plan.id == plan_id)
}

/// Whether `plan_id` names a plan in the catalog.
#[must_use]
pub fn is_valid_plan(plan_id: &str) -> bool {
    get_plan(plan_id).is_some()
}

/// The free plan, used when a user has no current subscription.
#[must_use]
pub fn free_plan() -> &'static PlanDefinition {
    // The catalog always opens with the free plan.
    &catalog()[0]
}

/// Every resource type that may carry a quota: the well-known types plus
/// any type limited by some plan.
#[must_use]
pub fn known_resource_types() -> &'static BTreeSet<String> {
    static TYPES: OnceLock<BTreeSet<String>> = OnceLock::new();
    TYPES.get_or_init(|| {
        WELL_KNOWN_RESOURCE_TYPES
            .iter()
            .map(|t| (*t).to_string())
            .chain(catalog().iter().flat_map(|p| p.limits.keys().cloned()))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lists_four_plans_in_order() {
        let ids: Vec<_> = list_plans().iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["free", "basic", "premium", "enterprise"]);
    }

    #[test]
    fn lookup_and_validation() {
        assert_eq!(get_plan("basic").unwrap().limit_for(MESSAGES), 1000);
        assert_eq!(free_plan().id, FREE_PLAN_ID);
        assert_eq!(free_plan().limit_for(MESSAGES), 100);
        assert!(is_valid_plan("enterprise"));
        assert!(!is_valid_plan("gold"));
        assert!(get_plan("Basic").is_none());
    }

    #[test]
    fn enterprise_is_unlimited() {
        let plan = get_plan("enterprise").unwrap();
        assert!(plan.limits.values().all(|&limit| limit == UNLIMITED));
    }

    #[test]
    fn yearly_prices_are_cheaper_than_twelve_months() {
        for plan in list_plans().iter().filter(|p| p.id != FREE_PLAN_ID) {
            assert!(plan.pricing.yearly.amount_cents < plan.pricing.monthly.amount_cents * 12);
        }
    }

    #[test]
    fn known_resource_types_cover_well_known() {
        let types = known_resource_types();
        for t in WELL_KNOWN_RESOURCE_TYPES {
            assert!(types.contains(*t));
        }
    }
}
