//! `beacon-listener` library.
//!
//! Decodes BLE beacon advertisements, estimates proximity, tracks which
//! beacons are present across scan cycles and binds them to persistent
//! user associations.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing and process exit codes.
//! The run loop lives in [`crate::app`] where it can be tested
//! deterministically with an injected scanner and injected output streams.

pub mod advertisement;
pub mod app;
pub mod beacon;
pub mod cycle;
pub mod distance;
pub mod error;
pub mod mac_address;
pub mod notify;
pub mod output;
pub mod resolver;
pub mod scanner;
pub mod store;
pub mod tracker;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use advertisement::{DecodeError, decode};
pub use beacon::{BeaconIdentity, Sighting};
pub use error::IndexOutOfRange;
pub use mac_address::MacAddress;
pub use notify::{Alert, AlertKind, Notifier};
pub use output::OutputFormatter;
pub use output::influxdb::InfluxDbFormatter;
pub use resolver::resolve;
pub use scanner::{Backend, ScanError};
pub use store::{AssociationRecord, AssociationStore, NotifyPolicy, StoreError};
pub use tracker::{AddOutcome, Observation, PresenceTracker};
