//! Fleet engine - owns the fleet, the connection lifecycle and the schedule
//!
//! `FleetEngine` is the facade UIs talk to. The shared `FleetCore` holds the
//! fleet and connection state; each scheduled `SyncCycle` fetches through the
//! adapter and publishes through its `CycleTicket`, so results of a cycle that
//! outlives a disconnect are dropped.

use crate::domain::error::SyncError;
use crate::domain::fleet::{FleetQuery, FleetState, StatusCounts};
use crate::domain::source::{validate_interval, SourceConfig};
use crate::domain::types::{RawRow, VehicleId, VehicleRecord, VehicleStatus};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::adapter::{build_adapter, http_client, AdapterContext, SourceAdapter};
use crate::services::connection::{ConnectionMachine, ConnectionState};
use crate::services::normalizer::{FieldAliases, Normalizer};
use crate::services::reconciler::{AbsentPolicy, Reconciler};
use crate::services::scheduler::{CycleRunner, CycleTicket, PollScheduler};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What disconnect does with the fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisconnectPolicy {
    /// Back to the seeded placeholder fleet
    #[default]
    Clear,
    /// Keep the last synced snapshot on screen
    Retain,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub seed_vehicles: u32,
    pub max_vehicles: u32,
    pub absent_policy: AbsentPolicy,
    pub disconnect_policy: DisconnectPolicy,
    pub mock_rows: u32,
    pub mock_delay_ms: u64,
    pub mock_seed: Option<u64>,
    pub http_timeout_ms: u64,
    pub aliases: FieldAliases,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl EngineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            seed_vehicles: config.seed_vehicles(),
            max_vehicles: config.max_vehicles(),
            absent_policy: config.absent_policy(),
            disconnect_policy: config.disconnect_policy(),
            mock_rows: config.mock_rows(),
            mock_delay_ms: config.mock_delay_ms(),
            mock_seed: config.mock_seed(),
            http_timeout_ms: config.http_timeout_ms(),
            aliases: config.aliases().clone(),
        }
    }
}

/// Read model handed to dashboards
#[derive(Debug, Clone, Serialize)]
pub struct FleetSnapshot {
    pub vehicles: Vec<VehicleRecord>,
    pub counts: StatusCounts,
    pub connection: ConnectionState,
    pub countdown_secs: u64,
    pub interval_ms: u64,
    pub last_success: Option<DateTime<Utc>>,
}

struct FleetCore {
    fleet: RwLock<FleetState>,
    last_success: RwLock<Option<DateTime<Utc>>>,
    connection: ConnectionMachine,
    normalizer: Normalizer,
    reconciler: Reconciler,
    metrics: Arc<Metrics>,
}

impl FleetCore {
    /// Normalize and merge one batch. Callers hold the commit gate.
    fn apply(&self, rows: &[RawRow]) {
        let now = Utc::now();
        let normalized = self.normalizer.normalize(rows, now);

        let mut fleet = self.fleet.write();
        let result = self.reconciler.reconcile(&fleet, &normalized.records, now);
        *fleet = result.fleet;
        let size = fleet.len();
        drop(fleet);

        *self.last_success.write() = Some(now);
        self.metrics.record_cycle_applied(rows.len(), normalized.dropped);
        self.metrics.set_fleet(size, &result.counts);

        info!(
            rows = %rows.len(),
            dropped = %normalized.dropped,
            vehicles = %size,
            extended = %result.extended,
            ignored = %result.ignored,
            vor = %result.counts.vor,
            on_route = %result.counts.on_route,
            yard = %result.counts.yard,
            running_defect = %result.counts.running_defect,
            "fleet_reconciled"
        );
    }

    fn publish_fleet_gauges(&self) {
        let fleet = self.fleet.read();
        self.metrics.set_fleet(fleet.len(), &fleet.counts());
    }
}

#[cold]
fn log_fetch_failed(error: &SyncError, initial: bool) {
    warn!(kind = %error.kind(), error = %error, initial = %initial, "fetch_failed");
}

/// One scheduled poll: Connected -> Updating -> Connected | Error
struct SyncCycle {
    core: Arc<FleetCore>,
    adapter: Arc<dyn SourceAdapter>,
}

#[async_trait]
impl CycleRunner for SyncCycle {
    async fn run_cycle(&self, ticket: CycleTicket) {
        if ticket.commit(|| self.core.connection.begin_update()) != Some(true) {
            debug!(seq = %ticket.seq(), "cycle_not_started");
            return;
        }

        let started = Instant::now();
        let result = self.adapter.fetch_rows().await;
        self.core.metrics.record_fetch_latency(started.elapsed().as_millis() as u64);

        match result {
            Ok(rows) => {
                let committed = ticket.commit(|| {
                    self.core.apply(&rows);
                    self.core.connection.connected();
                });
                if committed.is_none() {
                    self.core.metrics.record_cycle_discarded();
                }
            }
            Err(e) => {
                log_fetch_failed(&e, false);
                match ticket.commit(|| self.core.connection.fail(e.to_string())) {
                    Some(_) => {
                        self.core.metrics.record_cycle_failed();
                        ticket.halt();
                    }
                    None => self.core.metrics.record_cycle_discarded(),
                }
            }
        }
    }
}

pub struct FleetEngine {
    core: Arc<FleetCore>,
    scheduler: PollScheduler,
    settings: EngineSettings,
    adapters: AdapterContext,
    file: Mutex<Option<Bytes>>,
    session: Mutex<Option<SourceConfig>>,
}

impl FleetEngine {
    pub fn new(settings: EngineSettings, metrics: Arc<Metrics>) -> Result<Self, SyncError> {
        let mut adapters = AdapterContext::new(http_client(settings.http_timeout_ms)?);
        adapters.mock_rows = settings.mock_rows;
        adapters.mock_delay = Duration::from_millis(settings.mock_delay_ms);
        adapters.mock_seed = settings.mock_seed;

        let core = Arc::new(FleetCore {
            fleet: RwLock::new(FleetState::seeded(settings.seed_vehicles, Utc::now())),
            last_success: RwLock::new(None),
            connection: ConnectionMachine::new(Arc::clone(&metrics)),
            normalizer: Normalizer::new(settings.aliases.clone()),
            reconciler: Reconciler::new(settings.absent_policy, settings.max_vehicles),
            metrics: Arc::clone(&metrics),
        });
        core.publish_fleet_gauges();

        Ok(Self {
            core,
            scheduler: PollScheduler::new(metrics),
            settings,
            adapters,
            file: Mutex::new(None),
            session: Mutex::new(None),
        })
    }

    /// Hold workbook bytes for a fileUpload connection
    pub fn attach_file(&self, bytes: impl Into<Bytes>) {
        let bytes = bytes.into();
        info!(bytes = %bytes.len(), "file_attached");
        *self.file.lock() = Some(bytes);
    }

    pub fn has_file(&self) -> bool {
        self.file.lock().is_some()
    }

    /// Connect using the adapter selected by `config.source_type`
    pub async fn connect(&self, config: SourceConfig) -> Result<(), SyncError> {
        self.ensure_idle()?;
        config.validate()?;
        let file = self.file.lock().clone();
        let adapter = build_adapter(&config, file, &self.adapters)?;
        self.connect_with(config, adapter).await
    }

    /// Connect through a caller-supplied adapter
    pub async fn connect_with(
        &self,
        config: SourceConfig,
        adapter: Arc<dyn SourceAdapter>,
    ) -> Result<(), SyncError> {
        self.ensure_idle()?;
        let period = config.validate()?;
        if !self.core.connection.begin_connect() {
            return Err(already_active());
        }

        info!(
            source = %config.source_type.as_str(),
            interval_ms = %config.interval_ms,
            "connecting"
        );
        *self.session.lock() = Some(config);

        let ticket = self.scheduler.ticket();
        let started = Instant::now();
        let result = adapter.fetch_rows().await;
        self.core.metrics.record_fetch_latency(started.elapsed().as_millis() as u64);

        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                log_fetch_failed(&e, true);
                self.core.metrics.record_cycle_failed();
                ticket.commit(|| self.core.connection.fail(e.to_string()));
                return Err(e);
            }
        };

        let connected = ticket.commit(|| {
            self.core.apply(&rows);
            self.core.connection.connected()
        });
        if connected != Some(true) {
            self.core.metrics.record_cycle_discarded();
            return Err(SyncError::SourceUnavailable(
                "disconnected before the first sync completed".to_string(),
            ));
        }

        let runner = Arc::new(SyncCycle { core: Arc::clone(&self.core), adapter });
        if self.scheduler.resume(&ticket, runner, period) {
            info!(interval_ms = %period.as_millis(), "connected");
        }
        Ok(())
    }

    /// Stop polling and return to Idle. Safe to call in any state.
    pub fn disconnect(&self) {
        self.scheduler.stop();
        self.core.connection.reset();
        self.file.lock().take();
        self.session.lock().take();

        if self.settings.disconnect_policy == DisconnectPolicy::Clear {
            *self.core.fleet.write() =
                FleetState::seeded(self.settings.seed_vehicles, Utc::now());
            *self.core.last_success.write() = None;
            self.core.publish_fleet_gauges();
        }
        info!(policy = ?self.settings.disconnect_policy, "disconnected");
    }

    /// Change the poll interval. Takes effect immediately when connected.
    pub fn set_interval(&self, interval_ms: u64) -> Result<(), SyncError> {
        let period = validate_interval(interval_ms)?;
        if let Some(session) = self.session.lock().as_mut() {
            session.interval_ms = interval_ms;
        }
        self.scheduler.set_interval(period);
        Ok(())
    }

    /// Manual status override. False for unknown ids.
    pub fn change_status(&self, id: VehicleId, status: VehicleStatus) -> bool {
        let changed = self.core.fleet.write().set_status(id, status, Utc::now());
        if changed {
            info!(vehicle = %id, status = %status, "status_changed");
            self.core.publish_fleet_gauges();
        }
        changed
    }

    /// Set every vehicle to Yard
    pub fn clear_all(&self) {
        self.core.fleet.write().reset_all_to_yard(Utc::now());
        self.core.publish_fleet_gauges();
        info!("fleet_cleared");
    }

    pub fn state(&self) -> ConnectionState {
        self.core.connection.state()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.core.connection.subscribe()
    }

    pub fn session(&self) -> Option<SourceConfig> {
        self.session.lock().clone()
    }

    pub fn is_polling(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn counts(&self) -> StatusCounts {
        self.core.fleet.read().counts()
    }

    pub fn snapshot(&self) -> FleetSnapshot {
        let (vehicles, counts) = {
            let fleet = self.core.fleet.read();
            (fleet.vehicles().to_vec(), fleet.counts())
        };
        FleetSnapshot {
            vehicles,
            counts,
            connection: self.core.connection.state(),
            countdown_secs: self.scheduler.countdown_secs(),
            interval_ms: self.scheduler.interval().as_millis() as u64,
            last_success: *self.core.last_success.read(),
        }
    }

    pub fn query(&self, query: &FleetQuery) -> Vec<VehicleRecord> {
        self.core.fleet.read().query(query)
    }

    fn ensure_idle(&self) -> Result<(), SyncError> {
        if self.core.connection.state() == ConnectionState::Idle {
            Ok(())
        } else {
            Err(already_active())
        }
    }
}

fn already_active() -> SyncError {
    SyncError::Configuration("a connection is already active; disconnect first".to_string())
}
