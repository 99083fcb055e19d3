//! Per-beacon proximity alerts.
//!
//! Each address raises at most one alert while it stays in the presence
//! list. Later firings for the same address refresh that alert under the
//! same id instead of raising a new one.

use crate::store::NotifyPolicy;
use std::collections::HashMap;

/// Whether an alert is new or refreshes one raised earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    Raised,
    Updated,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::Raised => "raised",
            AlertKind::Updated => "updated",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub id: u32,
    pub address: String,
    pub kind: AlertKind,
}

/// Alert gate keyed by hardware address.
#[derive(Debug, Default)]
pub struct Notifier {
    next_id: u32,
    active: HashMap<String, u32>,
}

impl Notifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `policy` to a beacon at `distance` meters.
    ///
    /// Returns `None` if the policy does not fire. Otherwise the first
    /// firing for `address` allocates a fresh id and is
    /// [`AlertKind::Raised`]; later firings reuse that id and are
    /// [`AlertKind::Updated`].
    pub fn evaluate(&mut self, address: &str, policy: NotifyPolicy, distance: f64) -> Option<Alert> {
        if !policy.should_notify(distance) {
            return None;
        }

        let (id, kind) = match self.active.get(address) {
            Some(id) => (*id, AlertKind::Updated),
            None => {
                self.next_id = self.next_id.wrapping_add(1);
                self.active.insert(address.to_string(), self.next_id);
                (self.next_id, AlertKind::Raised)
            }
        };

        Some(Alert {
            id,
            address: address.to_string(),
            kind,
        })
    }

    /// Drop the alert state for `address`; its next firing raises again.
    pub fn forget(&mut self, address: &str) {
        self.active.remove(address);
    }

    pub fn active(&self) -> usize {
        self.active.len()
    }
}
