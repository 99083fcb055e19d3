//! Presence publishing.
//!
//! At every cycle boundary the app turns the tracker contents into one
//! [`PresenceRow`] per observation and writes each through an
//! [`OutputFormatter`]. Fired proximity alerts become [`AlertRow`]s.

pub mod influxdb;

use crate::notify::Alert;
use crate::store::AssociationRecord;
use crate::tracker::Observation;
use std::time::SystemTime;

/// One observation as published at a cycle boundary.
#[derive(Debug, Clone, Copy)]
pub struct PresenceRow<'a> {
    pub observation: &'a Observation,
    /// The association the observation resolved to, if any
    pub association: Option<&'a AssociationRecord>,
    pub timestamp: SystemTime,
}

/// A fired alert together with the association that caused it.
#[derive(Debug, Clone, Copy)]
pub struct AlertRow<'a> {
    pub alert: &'a Alert,
    pub association: &'a AssociationRecord,
    /// Estimated distance in meters, `f64::INFINITY` when unknown
    pub distance: f64,
    pub timestamp: SystemTime,
}

/// Turns published rows into output lines.
pub trait OutputFormatter: Send + Sync {
    fn format_presence(&self, row: &PresenceRow<'_>) -> String;

    fn format_alert(&self, row: &AlertRow<'_>) -> String;
}
