// data-router-rs/src/lib.rs
// Routing for the stage orchestration engine: a pure decision function over
// (record, stage signal, handoff trail) plus the shared, runtime-updatable
// rule table it reads from.

mod engine;
mod table;

pub use engine::RoutingEngine;
pub use table::{validate_against, RoutingTable};
