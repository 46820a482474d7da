//! Canonical fleet state and derived status counts
//!
//! `FleetState` stores vehicles densely: vehicle `id` lives at slot `id - 1`,
//! so ids are unique and `1..=len` by construction. The fleet only ever grows.
//! `StatusCounts` is never stored alongside the fleet; it is recomputed by a
//! full scan whenever someone asks for it.

use crate::domain::types::{VehicleId, VehicleRecord, VehicleStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Ordered fleet of vehicles indexed by id
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetState {
    vehicles: Vec<VehicleRecord>,
}

impl FleetState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fleet of `count` placeholder vehicles (ids 1..=count)
    pub fn seeded(count: u32, now: DateTime<Utc>) -> Self {
        let vehicles = (1..=count).map(|id| VehicleRecord::placeholder(VehicleId(id), now)).collect();
        Self { vehicles }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.vehicles.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.vehicles.is_empty()
    }

    pub fn get(&self, id: VehicleId) -> Option<&VehicleRecord> {
        self.vehicles.get(id.index()?)
    }

    pub(crate) fn get_mut(&mut self, id: VehicleId) -> Option<&mut VehicleRecord> {
        self.vehicles.get_mut(id.index()?)
    }

    pub fn vehicles(&self) -> &[VehicleRecord] {
        &self.vehicles
    }

    pub fn iter(&self) -> impl Iterator<Item = &VehicleRecord> {
        self.vehicles.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut VehicleRecord> {
        self.vehicles.iter_mut()
    }

    /// Grow with placeholders so that `id` is in bounds. Never shrinks.
    /// Returns the number of slots added.
    pub(crate) fn extend_to(&mut self, id: VehicleId, now: DateTime<Utc>) -> usize {
        let target = id.0 as usize;
        let current = self.vehicles.len();
        if target <= current {
            return 0;
        }
        self.vehicles.extend(
            (current + 1..=target).map(|slot| VehicleRecord::placeholder(VehicleId(slot as u32), now)),
        );
        target - current
    }

    /// Manual status override for one vehicle. Returns false for unknown ids.
    pub fn set_status(&mut self, id: VehicleId, status: VehicleStatus, now: DateTime<Utc>) -> bool {
        match self.get_mut(id) {
            Some(vehicle) => {
                vehicle.status = status;
                vehicle.last_updated = now;
                true
            }
            None => false,
        }
    }

    /// Set every vehicle to Yard ("clear all")
    pub fn reset_all_to_yard(&mut self, now: DateTime<Utc>) {
        for vehicle in self.vehicles.iter_mut() {
            vehicle.status = VehicleStatus::Yard;
            vehicle.last_updated = now;
        }
    }

    /// Derive counts by full scan
    pub fn counts(&self) -> StatusCounts {
        StatusCounts::from_vehicles(&self.vehicles)
    }

    /// Vehicles matching a dashboard filter/search
    pub fn query(&self, query: &FleetQuery) -> Vec<VehicleRecord> {
        self.vehicles.iter().filter(|v| query.matches(v)).cloned().collect()
    }
}

/// Number of vehicles in each status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub vor: usize,
    pub on_route: usize,
    pub yard: usize,
    pub running_defect: usize,
}

impl StatusCounts {
    pub fn from_vehicles(vehicles: &[VehicleRecord]) -> Self {
        let mut counts = Self::default();
        for vehicle in vehicles {
            *counts.slot_mut(vehicle.status) += 1;
        }
        counts
    }

    pub fn get(&self, status: VehicleStatus) -> usize {
        match status {
            VehicleStatus::Vor => self.vor,
            VehicleStatus::OnRoute => self.on_route,
            VehicleStatus::Yard => self.yard,
            VehicleStatus::RunningDefect => self.running_defect,
        }
    }

    fn slot_mut(&mut self, status: VehicleStatus) -> &mut usize {
        match status {
            VehicleStatus::Vor => &mut self.vor,
            VehicleStatus::OnRoute => &mut self.on_route,
            VehicleStatus::Yard => &mut self.yard,
            VehicleStatus::RunningDefect => &mut self.running_defect,
        }
    }

    pub fn total(&self) -> usize {
        self.vor + self.on_route + self.yard + self.running_defect
    }
}

/// Dashboard filter: optional status plus a search over the id text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetQuery {
    pub status: Option<VehicleStatus>,
    pub search: String,
}

impl FleetQuery {
    pub fn matches(&self, vehicle: &VehicleRecord) -> bool {
        let status_ok = self.status.map_or(true, |s| s == vehicle.status);
        let needle = self.search.trim().to_lowercase();
        let search_ok = needle.is_empty() || vehicle.id.to_string().contains(&needle);
        status_ok && search_ok
    }
}
