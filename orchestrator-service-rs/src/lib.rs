// orchestrator-service-rs/src/lib.rs
// Orchestration controller and caller API for the stage engine, plus the
// customer-support stages the service ships with.
//
// - `Controller`: runs one record to a terminal decision
// - `Orchestrator`: submit / resume / routing rule administration
// - `stages`: receptionist, problem analyst and solution expert

mod checkpoint;
pub mod controller;
pub mod error;
pub mod service;
pub mod stages;

pub use controller::Controller;
pub use error::OrchestratorError;
pub use service::{Orchestrator, SubmitOptions};
