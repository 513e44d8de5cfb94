//! Seeded incident generation.
//!
//! A fixed seed always yields the same `(id, scenario, severity)` sequence so
//! dispatcher runs can be replayed. Batches are stable-sorted by descending
//! severity rank; incidents produced one at a time for continuous arrival keep
//! their generation order.

use super::model::{Incident, Scenario, Severity};
use anyhow::{bail, Result};
use rand::distributions::WeightedIndex;
use rand::prelude::*;
use rand::rngs::StdRng;
use std::cmp::Reverse;

pub struct IncidentGenerator {
    rng: StdRng,
    scenarios: Vec<Scenario>,
    severity_weights: WeightedIndex<u32>,
    next_index: usize,
}

impl IncidentGenerator {
    /// Generator over every known scenario.
    pub fn new(seed: u64) -> Self {
        Self::build(seed, Scenario::ALL.to_vec())
    }

    pub fn with_scenarios(seed: u64, scenarios: Vec<Scenario>) -> Result<Self> {
        if scenarios.is_empty() {
            bail!("scenario set cannot be empty");
        }
        Ok(Self::build(seed, scenarios))
    }

    fn build(seed: u64, scenarios: Vec<Scenario>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            scenarios,
            severity_weights: WeightedIndex::new(Severity::ALL.iter().map(Severity::weight))
                .expect("severity weights are non-zero constants"),
            next_index: 1,
        }
    }

    /// Draws the next incident in arrival order.
    pub fn next_incident(&mut self) -> Incident {
        let scenario = self.scenarios[self.rng.gen_range(0..self.scenarios.len())];
        let severity = Severity::ALL[self.severity_weights.sample(&mut self.rng)];
        let id = format!("inc-{:04}", self.next_index);
        self.next_index += 1;
        Incident::new(id, scenario, severity)
    }

    /// Draws `count` incidents, most severe first.
    pub fn batch(&mut self, count: usize) -> Vec<Incident> {
        let mut incidents: Vec<Incident> = (0..count).map(|_| self.next_incident()).collect();
        incidents.sort_by_key(|incident| Reverse(incident.severity.rank()));
        incidents
    }
}

/// Convenience wrapper producing a severity-sorted batch from a fresh seeded generator.
pub fn generate(count: usize, seed: u64) -> Vec<Incident> {
    IncidentGenerator::new(seed).batch(count)
}
