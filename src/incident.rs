//! Incident model and the seeded generator that feeds the dispatcher.

pub mod generator;
pub mod model;

pub use generator::{generate, IncidentGenerator};
pub use model::{Incident, Scenario, Severity};
