//! Shared types for the fleet sync engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel used for location/driver when a source has no value
pub const NOT_AVAILABLE: &str = "N/A";

/// A raw row as delivered by a source adapter: provider-chosen column
/// names mapped to primitive values.
pub type RawRow = serde_json::Map<String, serde_json::Value>;

/// Newtype wrapper for vehicle IDs (HGV numbers), always >= 1
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct VehicleId(pub u32);

impl VehicleId {
    /// Build an id from a signed value, rejecting zero and negatives
    pub fn new(raw: i64) -> Option<Self> {
        u32::try_from(raw).ok().filter(|&v| v > 0).map(VehicleId)
    }

    /// Zero-based slot in the fleet vector; None for the invalid id 0
    #[inline]
    pub fn index(self) -> Option<usize> {
        (self.0 as usize).checked_sub(1)
    }
}

impl std::fmt::Display for VehicleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operational status of a vehicle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleStatus {
    /// Vehicle Off Road
    #[serde(rename = "VOR")]
    Vor,
    OnRoute,
    Yard,
    RunningDefect,
}

impl VehicleStatus {
    pub const ALL: [VehicleStatus; 4] =
        [VehicleStatus::Vor, VehicleStatus::OnRoute, VehicleStatus::Yard, VehicleStatus::RunningDefect];

    /// Display label used by spreadsheets and the dashboard
    pub fn label(&self) -> &'static str {
        match self {
            VehicleStatus::Vor => "VOR",
            VehicleStatus::OnRoute => "On Route",
            VehicleStatus::Yard => "Yard",
            VehicleStatus::RunningDefect => "Running Defect",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            VehicleStatus::Vor => "vor",
            VehicleStatus::OnRoute => "on_route",
            VehicleStatus::Yard => "yard",
            VehicleStatus::RunningDefect => "running_defect",
        }
    }

    /// Parse a label ("On Route") or identifier ("OnRoute", "on_route"),
    /// ignoring ASCII case and surrounding whitespace. None for anything else.
    pub fn from_label(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        Self::ALL.into_iter().find(|status| {
            trimmed.eq_ignore_ascii_case(status.label())
                || trimmed.eq_ignore_ascii_case(&status.label().replace(' ', ""))
                || trimmed.eq_ignore_ascii_case(status.as_str())
        })
    }

    /// Parse with the normalization rule: unrecognized input becomes Yard
    pub fn coerce(raw: &str) -> Self {
        Self::from_label(raw).unwrap_or(VehicleStatus::Yard)
    }

    /// Next status in display order, wrapping around
    pub fn next(&self) -> Self {
        match self {
            VehicleStatus::Vor => VehicleStatus::OnRoute,
            VehicleStatus::OnRoute => VehicleStatus::Yard,
            VehicleStatus::Yard => VehicleStatus::RunningDefect,
            VehicleStatus::RunningDefect => VehicleStatus::Vor,
        }
    }
}

impl std::fmt::Display for VehicleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Canonical vehicle record, independent of source schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleRecord {
    pub id: VehicleId,
    pub status: VehicleStatus,
    pub location: String,
    pub driver: String,
    pub last_updated: DateTime<Utc>,
}

impl VehicleRecord {
    /// Placeholder vehicle: Yard with "N/A" location and driver
    pub fn placeholder(id: VehicleId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: VehicleStatus::Yard,
            location: NOT_AVAILABLE.to_string(),
            driver: NOT_AVAILABLE.to_string(),
            last_updated: now,
        }
    }

    /// True if status/location/driver match a placeholder
    pub fn is_default(&self) -> bool {
        self.status == VehicleStatus::Yard
            && self.location == NOT_AVAILABLE
            && self.driver == NOT_AVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vehicle_id_rejects_non_positive() {
        assert_eq!(VehicleId::new(0), None);
        assert_eq!(VehicleId::new(-4), None);
        assert_eq!(VehicleId::new(7), Some(VehicleId(7)));
        assert_eq!(VehicleId::new(i64::from(u32::MAX) + 1), None);
    }

    #[test]
    fn test_vehicle_id_index() {
        assert_eq!(VehicleId(1).index(), Some(0));
        assert_eq!(VehicleId(57).index(), Some(56));
        assert_eq!(VehicleId(0).index(), None);
    }

    #[test]
    fn test_status_from_label() {
        assert_eq!(VehicleStatus::from_label("VOR"), Some(VehicleStatus::Vor));
        assert_eq!(VehicleStatus::from_label(" on route "), Some(VehicleStatus::OnRoute));
        assert_eq!(VehicleStatus::from_label("OnRoute"), Some(VehicleStatus::OnRoute));
        assert_eq!(VehicleStatus::from_label("Running Defect"), Some(VehicleStatus::RunningDefect));
        assert_eq!(VehicleStatus::from_label("runningdefect"), Some(VehicleStatus::RunningDefect));
        assert_eq!(VehicleStatus::from_label("RUNNING_DEFECT"), Some(VehicleStatus::RunningDefect));
        assert_eq!(VehicleStatus::from_label("Workshop"), None);
    }

    #[test]
    fn test_status_coerce_unknown_to_yard() {
        assert_eq!(VehicleStatus::coerce("Scrapped"), VehicleStatus::Yard);
        assert_eq!(VehicleStatus::coerce(""), VehicleStatus::Yard);
        assert_eq!(VehicleStatus::coerce("vor"), VehicleStatus::Vor);
    }

    #[test]
    fn test_status_next_cycles_all() {
        let mut status = VehicleStatus::Vor;
        for _ in 0..4 {
            status = status.next();
        }
        assert_eq!(status, VehicleStatus::Vor);
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&VehicleStatus::Vor).unwrap();
        assert_eq!(json, "\"VOR\"");
        let json = serde_json::to_string(&VehicleStatus::RunningDefect).unwrap();
        assert_eq!(json, "\"RunningDefect\"");
    }
}
