//! Merges a normalized batch into the current fleet
//!
//! Pure function of (fleet, batch, now). The fleet grows to cover the
//! largest in-bounds id, each record replaces its slot (last one wins for
//! duplicate ids), and counts are recomputed by full scan afterwards.

use crate::domain::fleet::{FleetState, StatusCounts};
use crate::domain::types::{VehicleRecord, VehicleStatus, NOT_AVAILABLE};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use tracing::warn;

/// What happens to vehicles missing from a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsentPolicy {
    /// Keep their previous values
    #[default]
    RetainPrevious,
    /// Put them back to the placeholder (Yard, N/A, N/A)
    ResetToYard,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub fleet: FleetState,
    pub counts: StatusCounts,
    /// Placeholder slots added to cover new ids
    pub extended: usize,
    pub updated: usize,
    /// Records ignored because their id exceeds the cap
    pub ignored: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct Reconciler {
    policy: AbsentPolicy,
    max_vehicles: u32,
}

impl Default for Reconciler {
    fn default() -> Self {
        Self { policy: AbsentPolicy::default(), max_vehicles: 10_000 }
    }
}

impl Reconciler {
    pub fn new(policy: AbsentPolicy, max_vehicles: u32) -> Self {
        Self { policy, max_vehicles }
    }

    pub fn reconcile(
        &self,
        current: &FleetState,
        batch: &[VehicleRecord],
        now: DateTime<Utc>,
    ) -> Reconciled {
        let mut fleet = current.clone();
        let (in_bounds, out_of_bounds): (Vec<&VehicleRecord>, Vec<&VehicleRecord>) =
            batch.iter().partition(|r| (1..=self.max_vehicles).contains(&r.id.0));

        if !out_of_bounds.is_empty() {
            warn!(
                ignored = %out_of_bounds.len(),
                max_vehicles = %self.max_vehicles,
                "vehicle_ids_out_of_range"
            );
        }

        let extended = match in_bounds.iter().map(|r| r.id).max() {
            Some(max_id) => fleet.extend_to(max_id, now),
            None => 0,
        };

        let mut seen = HashSet::with_capacity(in_bounds.len());
        for record in &in_bounds {
            if let Some(slot) = fleet.get_mut(record.id) {
                *slot = (*record).clone();
                seen.insert(record.id);
            }
        }

        if self.policy == AbsentPolicy::ResetToYard {
            for vehicle in fleet.iter_mut() {
                if !seen.contains(&vehicle.id) && !vehicle.is_default() {
                    vehicle.status = VehicleStatus::Yard;
                    vehicle.location = NOT_AVAILABLE.to_string();
                    vehicle.driver = NOT_AVAILABLE.to_string();
                    vehicle.last_updated = now;
                }
            }
        }

        let counts = fleet.counts();
        Reconciled { fleet, counts, extended, updated: seen.len(), ignored: out_of_bounds.len() }
    }
}
