//! De-bounced presence tracking across scan cycles.
//!
//! A scan session is a sequence of cycles. Within a cycle the scanner
//! delivers sightings through [`PresenceTracker::add_device`]; at the cycle
//! boundary the driver calls [`PresenceTracker::evict`] followed by
//! [`PresenceTracker::begin_cycle`]. Each observation carries a countdown
//! that is reset on every fresh sighting and decremented by every eviction
//! pass that finds it stale, so a beacon has to miss several consecutive
//! cycles before it drops out of the list.

use crate::beacon::BeaconIdentity;
use crate::distance;
use crate::error::IndexOutOfRange;
use tracing::debug;

/// Countdown assigned to an observation when it is created or re-sighted.
pub const INITIAL_THRESHOLD: i32 = 3;

/// One live beacon in the presence list.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    identity: BeaconIdentity,
    name: Option<String>,
    signal_strength: i16,
    threshold: i32,
    refreshed_this_cycle: bool,
}

impl Observation {
    fn new(identity: BeaconIdentity, rssi: i16, name: Option<String>) -> Self {
        Self {
            identity,
            name,
            signal_strength: rssi,
            threshold: INITIAL_THRESHOLD,
            refreshed_this_cycle: true,
        }
    }

    pub fn identity(&self) -> &BeaconIdentity {
        &self.identity
    }

    pub fn address(&self) -> &str {
        &self.identity.address
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Last-seen RSSI in dBm.
    pub fn signal_strength(&self) -> i16 {
        self.signal_strength
    }

    pub fn threshold(&self) -> i32 {
        self.threshold
    }

    pub fn refreshed_this_cycle(&self) -> bool {
        self.refreshed_this_cycle
    }

    /// Estimated distance in meters, `f64::INFINITY` when unknown.
    pub fn distance(&self) -> f64 {
        distance::estimate(self.signal_strength, self.identity.reference_level)
    }
}

/// What [`PresenceTracker::add_device`] did with a sighting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// First sighting of this address; a new observation was appended.
    Inserted,
    /// Known address, first sighting this cycle; signal and countdown refreshed.
    Refreshed,
    /// Known address already refreshed this cycle; nothing changed.
    Suppressed,
}

/// Ordered collection of live observations, keyed by hardware address.
///
/// Not synchronized: the owner must serialize `add_device`, `begin_cycle`
/// and `evict` (the app loop owns its tracker exclusively).
#[derive(Debug, Default, Clone)]
pub struct PresenceTracker {
    observations: Vec<Observation>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a sighting into the list.
    pub fn add_device(
        &mut self,
        identity: BeaconIdentity,
        rssi: i16,
        name: Option<String>,
    ) -> AddOutcome {
        match self.position(&identity.address) {
            None => {
                debug!(address = %identity.address, rssi, "new beacon");
                self.observations
                    .push(Observation::new(identity, rssi, name));
                AddOutcome::Inserted
            }
            Some(i) => {
                let observation = &mut self.observations[i];
                if observation.refreshed_this_cycle {
                    return AddOutcome::Suppressed;
                }
                observation.signal_strength = rssi;
                observation.threshold = INITIAL_THRESHOLD;
                observation.refreshed_this_cycle = true;
                if observation.name.is_none() {
                    observation.name = name;
                }
                AddOutcome::Refreshed
            }
        }
    }

    /// Open a new cycle: every survivor may be refreshed once again.
    pub fn begin_cycle(&mut self) {
        for observation in &mut self.observations {
            observation.refreshed_this_cycle = false;
        }
    }

    /// Age the list by one cycle.
    ///
    /// Observations whose countdown has already reached zero are removed and
    /// returned; every other observation has its countdown decremented.
    pub fn evict(&mut self) -> Vec<Observation> {
        let mut evicted = Vec::new();
        let mut kept = Vec::with_capacity(self.observations.len());
        for mut observation in self.observations.drain(..) {
            if observation.threshold <= 0 {
                debug!(address = %observation.identity.address, "beacon gone");
                evicted.push(observation);
            } else {
                observation.threshold -= 1;
                kept.push(observation);
            }
        }
        self.observations = kept;
        evicted
    }

    /// Stable sort by estimated distance, nearest first, unknown last.
    pub fn sort_by_distance(&mut self) {
        self.observations
            .sort_by(|a, b| a.distance().total_cmp(&b.distance()));
    }

    pub fn contains(&self, address: &str) -> bool {
        self.position(address).is_some()
    }

    pub fn get(&self, address: &str) -> Option<&Observation> {
        self.observations.iter().find(|o| o.address() == address)
    }

    pub fn count(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn item(&self, index: usize) -> Result<&Observation, IndexOutOfRange> {
        self.observations.get(index).ok_or(IndexOutOfRange {
            index,
            len: self.observations.len(),
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.observations.iter()
    }

    fn position(&self, address: &str) -> Option<usize> {
        self.observations.iter().position(|o| o.address() == address)
    }
}
