// data-router-rs/src/tests/table_tests.rs

use std::collections::BTreeSet;

use shared_types::{ConfigurationError, RoutingRules, RoutingRulesUpdate, StageId};

use crate::RoutingTable;

fn known() -> BTreeSet<StageId> {
    ["receptionist", "problem_analyst", "solution_expert"]
        .into_iter()
        .map(StageId::from)
        .collect()
}

#[test]
fn rejects_rules_naming_unregistered_stages() {
    let mut rules = RoutingRules::default();
    rules.category_routes.insert("shipping".into(), StageId::from("logistics_desk"));
    match RoutingTable::new(rules, known()) {
        Err(ConfigurationError::UnknownStage { stage, context }) => {
            assert_eq!(stage, StageId::from("logistics_desk"));
            assert!(context.contains("shipping"));
        }
        other => panic!("unexpected: {:?}", other.map(|_| ())),
    }
}

#[test]
fn configure_leaves_existing_snapshots_untouched() {
    let table = RoutingTable::new(RoutingRules::default(), known()).unwrap();
    let before = table.snapshot();

    let update = RoutingRulesUpdate {
        confidence_floor: Some(0.65),
        ..Default::default()
    };
    let after = table.configure(&update).unwrap();

    assert_eq!(before.confidence_floor, 0.5);
    assert_eq!(after.confidence_floor, 0.65);
    assert_eq!(table.snapshot().confidence_floor, 0.65);
    assert_eq!(table.version(), 2);
}

#[test]
fn invalid_update_is_rejected_and_not_installed() {
    let table = RoutingTable::new(RoutingRules::default(), known()).unwrap();
    let mut update = RoutingRulesUpdate::default();
    update.severity_routes.insert("high".into(), Some(StageId::from("nowhere")));

    assert!(table.configure(&update).is_err());
    assert!(table.snapshot().severity_routes.get("high").is_none());
    assert_eq!(table.version(), 1);
}

#[test]
fn preview_does_not_install() {
    let table = RoutingTable::new(RoutingRules::default(), known()).unwrap();
    let update = RoutingRulesUpdate {
        max_handoffs: Some(4),
        ..Default::default()
    };
    assert_eq!(table.preview(&update).unwrap().max_handoffs, 4);
    assert_eq!(table.snapshot().max_handoffs, 8);
}
