// self-improve-rs/src/adaptation.rs
// Turns aggregated outcomes into a proposed routing rule update.
//
// The optimizer only proposes: it returns a `RoutingRulesUpdate` that the
// orchestrator validates and installs for records created afterwards.

use serde::{Deserialize, Serialize};
use shared_types::{RoutingRules, RoutingRulesUpdate, SelfImproveSettings};

use crate::outcome::PerformanceData;

const FLOOR_STEP: f64 = 0.05;
const FLOOR_CEILING: f64 = 0.9;
/// Share of the handoff budget at which average handoffs count as "near the limit"
const HANDOFF_PRESSURE: f64 = 0.75;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizationPolicy {
    /// Categories with fewer runs are left alone
    pub min_samples: u64,
    pub success_floor: f64,
}

impl Default for OptimizationPolicy {
    fn default() -> Self {
        Self {
            min_samples: 5,
            success_floor: 0.7,
        }
    }
}

impl From<&SelfImproveSettings> for OptimizationPolicy {
    fn from(settings: &SelfImproveSettings) -> Self {
        Self {
            min_samples: settings.min_samples,
            success_floor: settings.success_floor,
        }
    }
}

/// A proposed update plus a note per change
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleAdjustment {
    pub update: RoutingRulesUpdate,
    pub notes: Vec<String>,
}

impl RuleAdjustment {
    pub fn is_empty(&self) -> bool {
        self.update.is_empty()
    }
}

/// Proposes rule changes from historical performance.
///
/// * A category with enough samples, a success rate below the floor and a
///   route to the analysis stage is re-routed straight to the expert stage.
/// * When runs average close to the handoff limit and end in escalation
///   more often than in resolution, the self-reported handoff floor is
///   raised one step so stages bounce requests around less.
pub fn optimize_routing_rules(
    rules: &RoutingRules,
    data: &PerformanceData,
    policy: &OptimizationPolicy,
) -> RuleAdjustment {
    let mut adjustment = RuleAdjustment::default();

    for (category, performance) in &data.categories {
        if performance.runs < policy.min_samples || performance.success_rate >= policy.success_floor {
            continue;
        }
        if rules.category_route(category) == Some(&rules.analysis_stage) {
            adjustment
                .update
                .category_routes
                .insert(category.clone(), Some(rules.expert_stage.clone()));
            adjustment.notes.push(format!(
                "category '{}' routed to {} instead of {} (success rate {:.2} over {} runs) (optimized for success rate)",
                category, rules.expert_stage, rules.analysis_stage, performance.success_rate, performance.runs
            ));
        }
    }

    if data.total_runs() >= policy.min_samples {
        let (success_rate, escalation_rate, avg_handoffs) = data.overall();
        let budget = rules.max_handoffs.saturating_sub(1) as f64;
        if avg_handoffs >= budget * HANDOFF_PRESSURE
            && escalation_rate > success_rate
            && rules.handoff_confidence_floor < FLOOR_CEILING
        {
            let raised = round2((rules.handoff_confidence_floor + FLOOR_STEP).min(FLOOR_CEILING));
            adjustment.update.handoff_confidence_floor = Some(raised);
            adjustment.notes.push(format!(
                "handoff_confidence_floor raised from {:.2} to {:.2} (avg handoffs {:.1}, escalation rate {:.2})",
                rules.handoff_confidence_floor, raised, avg_handoffs, escalation_rate
            ));
        }
    }

    adjustment
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
