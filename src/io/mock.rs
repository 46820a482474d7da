//! Mock data generator for demos and tests
//!
//! Produces one row per vehicle with weighted random statuses after an
//! artificial delay. A fixed seed makes the output reproducible.

use crate::domain::error::SyncError;
use crate::domain::source::SourceType;
use crate::domain::types::{RawRow, VehicleStatus};
use crate::io::adapter::SourceAdapter;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::Value;
use std::time::Duration;

/// Percent weights, in `VehicleStatus::ALL` order
const STATUS_WEIGHTS: [(VehicleStatus, u32); 4] = [
    (VehicleStatus::Vor, 15),
    (VehicleStatus::OnRoute, 40),
    (VehicleStatus::Yard, 25),
    (VehicleStatus::RunningDefect, 20),
];

const LOCATIONS: [&str; 8] = [
    "Doncaster DC",
    "M1 J32",
    "A1(M) Wetherby",
    "Leeds Depot",
    "M62 J27",
    "Hull Docks",
    "Sheffield Depot",
    "M18 J5",
];

const DRIVERS: [&str; 8] = [
    "J. Smith",
    "A. Patel",
    "M. Kowalski",
    "S. Okafor",
    "R. Jones",
    "L. Chen",
    "D. Murphy",
    "K. Ahmed",
];

pub struct MockGenerator {
    rows: u32,
    delay: Duration,
    rng: Mutex<StdRng>,
}

impl MockGenerator {
    pub fn new(rows: u32, delay: Duration, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rows, delay, rng: Mutex::new(rng) }
    }

    /// Generate a full batch without waiting
    pub fn generate(&self) -> Vec<RawRow> {
        let mut rng = self.rng.lock();
        (1..=self.rows).map(|id| mock_row(&mut *rng, id)).collect()
    }
}

fn pick_status<R: Rng>(rng: &mut R) -> VehicleStatus {
    let total: u32 = STATUS_WEIGHTS.iter().map(|(_, w)| w).sum();
    let mut roll = rng.gen_range(0..total);
    for (status, weight) in STATUS_WEIGHTS {
        if roll < weight {
            return status;
        }
        roll -= weight;
    }
    VehicleStatus::Yard
}

fn mock_row<R: Rng>(rng: &mut R, id: u32) -> RawRow {
    let status = pick_status(rng);
    let location = match status {
        VehicleStatus::Yard | VehicleStatus::Vor => "Main Yard",
        _ => LOCATIONS.choose(rng).copied().unwrap_or("Main Yard"),
    };

    let mut row = RawRow::new();
    row.insert("HGV_Number".to_string(), Value::from(id));
    row.insert("Status".to_string(), Value::String(status.label().to_string()));
    row.insert("Location".to_string(), Value::String(location.to_string()));
    if matches!(status, VehicleStatus::OnRoute | VehicleStatus::RunningDefect) {
        if let Some(driver) = DRIVERS.choose(rng) {
            row.insert("Driver".to_string(), Value::String(driver.to_string()));
        }
    }
    row
}

#[async_trait]
impl SourceAdapter for MockGenerator {
    fn source_type(&self) -> SourceType {
        SourceType::MockData
    }

    async fn fetch_rows(&self) -> Result<Vec<RawRow>, SyncError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.generate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::normalizer::Normalizer;
    use chrono::Utc;

    #[test]
    fn test_rows_cover_every_id() {
        let generator = MockGenerator::new(57, Duration::ZERO, Some(1));
        let rows = generator.generate();
        assert_eq!(rows.len(), 57);
        for (i, row) in rows.iter().enumerate() {
            assert_eq!(row["HGV_Number"], Value::from(i as u32 + 1));
        }
    }

    #[test]
    fn test_seed_is_reproducible() {
        let a = MockGenerator::new(30, Duration::ZERO, Some(42)).generate();
        let b = MockGenerator::new(30, Duration::ZERO, Some(42)).generate();
        assert_eq!(a, b);
    }

    #[test]
    fn test_weights_roughly_hold() {
        let generator = MockGenerator::new(10_000, Duration::ZERO, Some(9));
        let normalized = Normalizer::default().normalize(&generator.generate(), Utc::now());
        assert_eq!(normalized.dropped, 0);

        let on_route = normalized
            .records
            .iter()
            .filter(|r| r.status == VehicleStatus::OnRoute)
            .count();
        // 40% expected
        assert!((3_500..4_500).contains(&on_route), "on_route = {on_route}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_waits_for_delay() {
        let generator = MockGenerator::new(3, Duration::from_millis(800), Some(3));
        let started = tokio::time::Instant::now();
        let rows = generator.fetch_rows().await.unwrap();
        assert_eq!(rows.len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(800));
    }
}
