//! Core application runner for `beacon-listener`.
//!
//! This module is intentionally decoupled from CLI parsing and process exit codes
//! so it can be tested deterministically.

use crate::advertisement::{self, REFERENCE_UNKNOWN};
use crate::beacon::{BeaconIdentity, Sighting};
use crate::cycle::{DEFAULT_CYCLE_PERIOD, DEFAULT_SESSION_LIMIT, parse_duration, parse_period};
use crate::mac_address::MacAddress;
use crate::notify::Notifier;
use crate::output::influxdb::InfluxDbFormatter;
use crate::output::{AlertRow, OutputFormatter, PresenceRow};
use crate::scanner::{Backend, ScanError};
use crate::store::{AssociationStore, NotifyPolicy, StoreError, Upsert};
use crate::tracker::PresenceTracker;
use std::future::Future;
use std::io;
use std::io::Write;
use std::pin::Pin;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

/// Configuration for a scan session.
#[derive(clap::Args, Debug, Clone)]
pub struct ScanOptions {
    /// Time between cycle boundaries.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    #[arg(long, default_value = "2500ms", value_parser = parse_period)]
    pub period: Duration,

    /// Stop scanning after this long
    #[arg(long, default_value = "1h", value_parser = parse_duration)]
    pub session_limit: Duration,

    /// Publish beacons nearest first
    #[arg(long)]
    pub sort: bool,

    /// Bluetooth scanner backend to use
    #[arg(long, default_value_t, value_enum)]
    pub backend: Backend,

    /// The name of the measurement in InfluxDB line protocol.
    #[arg(long, default_value = "beacon_presence")]
    pub measurement: String,

    /// Print dropped advertisements to the error stream
    #[arg(skip)]
    pub verbose: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            period: DEFAULT_CYCLE_PERIOD,
            session_limit: DEFAULT_SESSION_LIMIT,
            sort: false,
            backend: Backend::default(),
            measurement: "beacon_presence".to_string(),
            verbose: false,
        }
    }
}

/// A new or refreshed association, as given on the command line.
#[derive(clap::Args, Debug, Clone)]
pub struct AssociateOptions {
    /// Hardware address of the beacon, e.g. AA:BB:CC:DD:EE:FF
    #[arg(long, value_parser = parse_address)]
    pub address: String,

    /// Proximity UUID broadcast by the beacon
    #[arg(long, value_parser = parse_uuid)]
    pub uuid: String,

    #[arg(long, default_value_t = 0)]
    pub major: u16,

    #[arg(long, default_value_t = 0)]
    pub minor: u16,

    /// Human-readable label
    #[arg(long)]
    pub label: String,

    /// Free-text value, usually a URL
    #[arg(long, default_value = "")]
    pub value: String,

    /// When to raise a proximity alert
    #[arg(long, default_value_t, value_enum)]
    pub notify: NotifyPolicy,
}

/// Canonicalize a hardware address to `AA:BB:CC:DD:EE:FF`.
pub fn parse_address(src: &str) -> Result<String, String> {
    src.parse::<MacAddress>()
        .map(|mac| mac.to_string())
        .map_err(|e| e.to_string())
}

/// Canonicalize a UUID to the upper-case hyphenated form the decoder emits.
pub fn parse_uuid(src: &str) -> Result<String, String> {
    let uuid = Uuid::parse_str(src.trim()).map_err(|e| e.to_string())?;
    Ok(uuid
        .hyphenated()
        .encode_upper(&mut Uuid::encode_buffer())
        .to_string())
}

/// Errors returned by the core run loop and the store commands.
#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Scanner abstraction to enable deterministic unit tests without Bluetooth hardware.
pub trait Scanner: Send + Sync {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Sighting>, ScanError>> + Send + '_>>;
}

/// Real scanner implementation that delegates to the compiled-in backends.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealScanner;

impl Scanner for RealScanner {
    fn start_scan(
        &self,
        backend: Backend,
    ) -> Pin<Box<dyn Future<Output = Result<mpsc::Receiver<Sighting>, ScanError>> + Send + '_>>
    {
        Box::pin(async move { crate::scanner::start_scan(backend).await })
    }
}

/// Owner of all per-session state. Only the run loop touches it, so
/// sightings and cycle boundaries are applied strictly in arrival order.
struct ScanSession<'a> {
    tracker: PresenceTracker,
    notifier: Notifier,
    store: &'a AssociationStore,
    formatter: &'a dyn OutputFormatter,
    sort: bool,
    verbose: bool,
}

impl ScanSession<'_> {
    fn observe(&mut self, sighting: Sighting, err: &mut dyn Write) -> io::Result<()> {
        let address = sighting.address.to_string();
        match advertisement::decode(&address, &sighting.advertisement) {
            Ok(identity) => {
                self.tracker.add_device(identity, sighting.rssi, sighting.name);
            }
            Err(e) => {
                debug!(%address, error = %e, "dropping advertisement");
                if self.verbose {
                    writeln!(err, "{address}: {e}")?;
                }
            }
        }
        Ok(())
    }

    fn close_cycle(&mut self, out: &mut dyn Write) -> io::Result<()> {
        if self.sort {
            self.tracker.sort_by_distance();
        }
        self.publish(out)?;
        for gone in self.tracker.evict() {
            self.notifier.forget(gone.address());
        }
        self.tracker.begin_cycle();
        debug!(observations = self.tracker.count(), "cycle closed");
        Ok(())
    }

    fn publish(&mut self, out: &mut dyn Write) -> io::Result<()> {
        let timestamp = SystemTime::now();
        for observation in self.tracker.iter() {
            let association = self.store.lookup(observation.identity());
            let row = PresenceRow {
                observation,
                association,
                timestamp,
            };
            writeln!(out, "{}", self.formatter.format_presence(&row))?;

            let Some(record) = association else {
                continue;
            };
            let distance = observation.distance();
            if let Some(alert) =
                self.notifier
                    .evaluate(observation.address(), record.notify, distance)
            {
                let row = AlertRow {
                    alert: &alert,
                    association: record,
                    distance,
                    timestamp,
                };
                writeln!(out, "{}", self.formatter.format_alert(&row))?;
            }
        }
        Ok(())
    }
}

/// Run one scan session, writing presence lines to `out` and, when
/// `options.verbose` is set, dropped advertisements to `err`.
///
/// Every `options.period` the tracker contents are published, aged and a
/// new cycle is opened. The session ends when the scanner closes its
/// channel or `options.session_limit` elapses, whichever comes first; the
/// tracker is published one last time and returned.
///
/// `store` is the association list as loaded before the session started.
/// Associations committed during the session by another process are picked
/// up by the next session, not this one.
pub async fn run_with_io(
    options: ScanOptions,
    scanner: &dyn Scanner,
    store: &AssociationStore,
    out: &mut dyn Write,
    err: &mut dyn Write,
) -> Result<PresenceTracker, RunError> {
    let formatter = InfluxDbFormatter::new(options.measurement.clone());
    let mut session = ScanSession {
        tracker: PresenceTracker::new(),
        notifier: Notifier::new(),
        store,
        formatter: &formatter,
        sort: options.sort,
        verbose: options.verbose,
    };

    let mut sightings = scanner.start_scan(options.backend).await?;
    info!(backend = %options.backend, period = ?options.period, "scan started");

    let mut ticks = tokio::time::interval_at(Instant::now() + options.period, options.period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let deadline = tokio::time::sleep(options.session_limit);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            biased;
            _ = &mut deadline => {
                info!(limit = ?options.session_limit, "session limit reached, stopping scan");
                break;
            }
            _ = ticks.tick() => session.close_cycle(out)?,
            sighting = sightings.recv() => match sighting {
                Some(sighting) => session.observe(sighting, err)?,
                None => {
                    debug!("scanner closed");
                    break;
                }
            },
        }
    }

    if session.sort {
        session.tracker.sort_by_distance();
    }
    session.publish(out)?;
    Ok(session.tracker)
}

/// Upsert an association and persist the store.
pub fn associate(
    store: &mut AssociationStore,
    options: AssociateOptions,
) -> Result<Upsert, RunError> {
    let identity = BeaconIdentity {
        address: options.address,
        uuid: options.uuid,
        major: options.major,
        minor: options.minor,
        reference_level: REFERENCE_UNKNOWN,
    };
    let outcome = store.upsert(&identity, options.label, options.value, options.notify);
    store.commit()?;
    Ok(outcome)
}

/// Remove every association for `address` and persist the store.
pub fn remove(store: &mut AssociationStore, address: &str) -> Result<usize, RunError> {
    let removed = store.remove(address);
    if removed > 0 {
        store.commit()?;
    }
    Ok(removed)
}

/// Write every association as one JSON object per line.
pub fn list(store: &AssociationStore, out: &mut dyn Write) -> Result<(), RunError> {
    for record in store.records() {
        let line = serde_json::to_string(record).map_err(StoreError::Serialize)?;
        writeln!(out, "{line}")?;
    }
    Ok(())
}
