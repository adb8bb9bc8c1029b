// data-router-rs/src/table.rs
// Shared routing rule table. Readers take an Arc snapshot; updates swap in a
// new validated rule set and never touch snapshots already handed out.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use metrics::increment_counter;
use shared_types::{ConfigurationError, RoutingRules, RoutingRulesUpdate, StageId};

use crate::engine::RoutingEngine;

#[derive(Debug, Clone)]
pub struct RoutingTable {
    current: Arc<RwLock<Arc<RoutingRules>>>,
    known_stages: Arc<BTreeSet<StageId>>,
    version: Arc<AtomicU64>,
}

impl RoutingTable {
    /// Validates `rules` against the registered stage ids
    pub fn new(rules: RoutingRules, known_stages: BTreeSet<StageId>) -> Result<Self, ConfigurationError> {
        validate_against(&rules, &known_stages)?;
        Ok(Self {
            current: Arc::new(RwLock::new(Arc::new(rules))),
            known_stages: Arc::new(known_stages),
            version: Arc::new(AtomicU64::new(1)),
        })
    }

    pub fn snapshot(&self) -> Arc<RoutingRules> {
        let guard = self.current.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(&guard)
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn known_stages(&self) -> &BTreeSet<StageId> {
        &self.known_stages
    }

    /// Engine bound to an explicit snapshot, e.g. the one stored on a record
    pub fn engine_for(&self, rules: Arc<RoutingRules>) -> RoutingEngine {
        RoutingEngine::new(rules, Arc::clone(&self.known_stages))
    }

    /// Applies `update` to the current rules without installing the result
    pub fn preview(&self, update: &RoutingRulesUpdate) -> Result<RoutingRules, ConfigurationError> {
        let next = update.apply_to(&self.snapshot());
        validate_against(&next, &self.known_stages)?;
        Ok(next)
    }

    /// Installs `update` for records created from now on
    pub fn configure(&self, update: &RoutingRulesUpdate) -> Result<Arc<RoutingRules>, ConfigurationError> {
        let mut guard = self.current.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = update.apply_to(&guard);
        validate_against(&next, &self.known_stages)?;

        let next = Arc::new(next);
        *guard = Arc::clone(&next);
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        drop(guard);

        increment_counter!("routing_rule_updates_total");
        log::info!(
            "Routing rules updated to version {} (max_handoffs={}, confidence_floor={}, handoff_confidence_floor={})",
            version,
            next.max_handoffs,
            next.confidence_floor,
            next.handoff_confidence_floor
        );
        Ok(next)
    }
}

/// Shape checks plus: every stage the rules mention must be registered
pub fn validate_against(rules: &RoutingRules, known_stages: &BTreeSet<StageId>) -> Result<(), ConfigurationError> {
    rules.validate()?;
    for (context, stage) in rules.referenced_stages() {
        if !known_stages.contains(stage) {
            return Err(ConfigurationError::UnknownStage {
                context,
                stage: stage.clone(),
            });
        }
    }
    Ok(())
}
