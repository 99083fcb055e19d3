//! Matching an observed beacon to its persisted association.
//!
//! Two keys can identify the same physical beacon and either one may drift:
//! the hardware address (rotated by BLE privacy, kept across re-provisioning)
//! and the broadcast (uuid, major, minor) triple. Resolution therefore runs
//! on every lookup and is never cached.

use crate::beacon::BeaconIdentity;
use crate::store::{AssociationRecord, AssociationStore};

/// Find the record for `identity` in `store`, returning its index.
pub fn resolve(identity: &BeaconIdentity, store: &AssociationStore) -> Option<usize> {
    resolve_in(identity, store.records())
}

/// Two-tier lookup over a record slice.
///
/// 1. The first record whose address equals the observation's address wins
///    outright, whatever its broadcast triple says.
/// 2. Otherwise the *last* record whose (uuid, major, minor) triple matches
///    is returned. Later matches overwrite earlier ones; this mirrors the
///    behavior existing association files were written against.
pub fn resolve_in(identity: &BeaconIdentity, records: &[AssociationRecord]) -> Option<usize> {
    let mut fallback = None;
    for (i, record) in records.iter().enumerate() {
        if record.address == identity.address {
            return Some(i);
        }
        if identity.same_broadcast(&record.uuid, record.major, record.minor) {
            fallback = Some(i);
        }
    }
    fallback
}
