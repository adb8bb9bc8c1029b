// data-router-rs/src/engine.rs
// Ordered, first-match routing rules. `decide` reads nothing but its inputs
// and the rule snapshot it was built with, so identical inputs always give
// identical decisions.

use std::collections::BTreeSet;
use std::sync::Arc;

use shared_types::{
    reasons, DecisionKind, HandoffEntry, RequestRecord, RoutingDecision, RoutingRules, StageId, StageSignal,
};

#[derive(Debug, Clone)]
pub struct RoutingEngine {
    rules: Arc<RoutingRules>,
    known_stages: Arc<BTreeSet<StageId>>,
}

impl RoutingEngine {
    pub fn new(rules: Arc<RoutingRules>, known_stages: Arc<BTreeSet<StageId>>) -> Self {
        Self { rules, known_stages }
    }

    pub fn rules(&self) -> &RoutingRules {
        &self.rules
    }

    /// Rules, first match wins:
    ///
    /// 1. trail would reach `max_handoffs` → Escalate (the last slot is kept
    ///    for the escalation entry itself)
    /// 2. `requires_human` → Escalate
    /// 3. severity has a route → HandoffTo it, or ContinueCurrent when already there
    /// 4. confidence below `confidence_floor` → HandoffTo analysis stage
    /// 5. category has a route → HandoffTo it
    /// 6. stage proposed a registered stage with enough confidence → HandoffTo it
    /// 7. terminal stage with a non-empty artifact → End
    /// 8. ContinueCurrent
    ///
    /// Rules 3 to 6 only apply while no artifact exists. Rules 4 and 5 do not
    /// repeat a handoff the trail already shows.
    pub fn decide(&self, record: &RequestRecord, signal: &StageSignal, trail: &[HandoffEntry]) -> RoutingDecision {
        let rules = &*self.rules;
        let current = record.current_stage();

        if trail.len() + 1 >= rules.max_handoffs {
            return RoutingDecision::Escalate(reasons::HANDOFF_LIMIT.to_string());
        }

        if signal.requires_human {
            return RoutingDecision::Escalate(reasons::HUMAN_REQUIRED.to_string());
        }

        let resolved = record.artifact().is_some_and(|artifact| !artifact.is_empty());

        if !resolved {
            if let Some(classification) = record.classification() {
                if let Some(target) = rules.severity_route(classification.severity()) {
                    if target == current {
                        return RoutingDecision::ContinueCurrent;
                    }
                    return RoutingDecision::HandoffTo(target.clone(), reasons::severity(classification.severity()));
                }

                if classification.confidence() < rules.confidence_floor
                    && current != &rules.analysis_stage
                    && !already_routed(trail, &rules.analysis_stage, reasons::LOW_CONFIDENCE)
                {
                    return RoutingDecision::HandoffTo(
                        rules.analysis_stage.clone(),
                        reasons::LOW_CONFIDENCE.to_string(),
                    );
                }

                if let Some(target) = rules.category_route(classification.category()) {
                    if target != current && !already_routed(trail, target, reasons::CATEGORY_RULE) {
                        return RoutingDecision::HandoffTo(target.clone(), reasons::CATEGORY_RULE.to_string());
                    }
                }
            }

            if let Some(proposed) = &signal.proposed_next_stage {
                if proposed != current && signal.confidence >= rules.handoff_confidence_floor {
                    if self.known_stages.contains(proposed) {
                        return RoutingDecision::HandoffTo(proposed.clone(), reasons::SELF_REPORTED.to_string());
                    }
                    log::warn!("Ignoring handoff proposal to unregistered stage {}", proposed);
                }
            }
        }

        if current == &rules.terminal_stage && resolved {
            return RoutingDecision::End(reasons::ARTIFACT_PRODUCED.to_string());
        }

        RoutingDecision::ContinueCurrent
    }

    /// Human-readable account of a decision
    pub fn explain(&self, decision: &RoutingDecision, signal: &StageSignal) -> String {
        let mut text = format!("{} (stage confidence {:.2})", decision, signal.confidence);
        if !signal.rationale.is_empty() {
            text.push_str(&format!("; stage said: {}", signal.rationale));
        }
        text
    }
}

fn already_routed(trail: &[HandoffEntry], target: &StageId, reason: &str) -> bool {
    trail
        .iter()
        .any(|entry| entry.decision_kind == DecisionKind::Handoff && &entry.to_stage == target && entry.reason == reason)
}
