//! Durable association store.
//!
//! Associations are user-authored metadata bound to a beacon: a label, a
//! free-text value (usually a URL) and a notification policy. The whole set
//! lives in memory after [`AssociationStore::load`] and is written back to a
//! single JSON document only by an explicit [`AssociationStore::commit`].
//!
//! # Document format
//!
//! ```json
//! {
//!   "version": 1,
//!   "associations": [
//!     {"address": "AA:BB:CC:DD:EE:FF", "uuid": "E2C56DB5-...", "major": 1,
//!      "minor": 2, "name": "Office", "value": "https://example.org", "notify": 1}
//!   ]
//! }
//! ```
//!
//! Older files are still read: a bare array of records, records keyed by
//! `id` instead of `address`, and `major`/`minor`/`notify` stored as decimal
//! strings. They are rewritten in the versioned shape on the next commit.

use crate::beacon::BeaconIdentity;
use crate::error::IndexOutOfRange;
use crate::resolver;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Version written into every committed document.
pub const SCHEMA_VERSION: u32 = 1;

/// Upper bound (exclusive) in meters for [`NotifyPolicy::WithinNear`].
pub const NEAR_RANGE_METERS: f64 = 1.0;

/// Upper bound (exclusive) in meters for [`NotifyPolicy::WithinFar`].
pub const FAR_RANGE_METERS: f64 = 15.0;

/// When a beacon with this association should raise a proximity alert.
///
/// Persisted as its integer discriminant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(into = "u8", try_from = "u8")]
pub enum NotifyPolicy {
    #[default]
    Never = 0,
    /// Closer than [`NEAR_RANGE_METERS`]
    #[value(name = "near")]
    WithinNear = 1,
    /// Closer than [`FAR_RANGE_METERS`]
    #[value(name = "far")]
    WithinFar = 2,
    Always = 3,
}

impl NotifyPolicy {
    /// Whether a beacon estimated at `distance` meters should alert.
    ///
    /// An unknown (infinite) distance only satisfies [`NotifyPolicy::Always`].
    pub fn should_notify(self, distance: f64) -> bool {
        match self {
            NotifyPolicy::Never => false,
            NotifyPolicy::WithinNear => distance < NEAR_RANGE_METERS,
            NotifyPolicy::WithinFar => distance < FAR_RANGE_METERS,
            NotifyPolicy::Always => true,
        }
    }
}

impl From<NotifyPolicy> for u8 {
    fn from(policy: NotifyPolicy) -> Self {
        policy as u8
    }
}

impl TryFrom<u8> for NotifyPolicy {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(NotifyPolicy::Never),
            1 => Ok(NotifyPolicy::WithinNear),
            2 => Ok(NotifyPolicy::WithinFar),
            3 => Ok(NotifyPolicy::Always),
            other => Err(format!("unknown notify policy {other}")),
        }
    }
}

impl fmt::Display for NotifyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            NotifyPolicy::Never => "never",
            NotifyPolicy::WithinNear => "near",
            NotifyPolicy::WithinFar => "far",
            NotifyPolicy::Always => "always",
        };
        f.write_str(text)
    }
}

/// One persisted association.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssociationRecord {
    /// Last-known hardware address of the beacon
    #[serde(alias = "id")]
    pub address: String,
    #[serde(default)]
    pub uuid: String,
    #[serde(default, deserialize_with = "lenient_u16")]
    pub major: u16,
    #[serde(default, deserialize_with = "lenient_u16")]
    pub minor: u16,
    #[serde(rename = "name", default)]
    pub label: String,
    #[serde(default)]
    pub value: String,
    #[serde(default, deserialize_with = "lenient_notify")]
    pub notify: NotifyPolicy,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Lenient {
    Number(u64),
    Text(String),
}

impl Lenient {
    fn into_u64<E: de::Error>(self) -> Result<u64, E> {
        match self {
            Lenient::Number(n) => Ok(n),
            Lenient::Text(s) => s.trim().parse().map_err(E::custom),
        }
    }
}

fn lenient_u16<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    let n = Lenient::deserialize(deserializer)?.into_u64()?;
    u16::try_from(n).map_err(de::Error::custom)
}

fn lenient_notify<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NotifyPolicy, D::Error> {
    let n = Lenient::deserialize(deserializer)?.into_u64()?;
    u8::try_from(n)
        .map_err(de::Error::custom)
        .and_then(|n| NotifyPolicy::try_from(n).map_err(de::Error::custom))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredDocument {
    Versioned {
        version: u32,
        associations: Vec<AssociationRecord>,
    },
    Legacy(Vec<AssociationRecord>),
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    version: u32,
    associations: &'a [AssociationRecord],
}

/// Errors raised while reading or writing the association document.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("{} has schema version {version}, newest supported is {}", .path.display(), SCHEMA_VERSION)]
    UnsupportedVersion { path: PathBuf, version: u32 },
    #[error("failed to serialize associations: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("failed to write {}: {source}", .path.display())]
    Commit { path: PathBuf, source: io::Error },
}

/// Result of [`AssociationStore::upsert`], carrying the affected index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Inserted(usize),
    Updated(usize),
}

impl Upsert {
    pub fn index(self) -> usize {
        match self {
            Upsert::Inserted(i) | Upsert::Updated(i) => i,
        }
    }
}

/// In-memory association list backed by one JSON file.
///
/// [`commit`](Self::commit) takes `&self`, so no mutation can interleave
/// with serialization. Callers sharing a store across threads wrap it in an
/// `RwLock` and commit under a read guard, which lets lookups proceed
/// while the file is written.
///
/// The file is read once by [`load`](Self::load). Commits made through
/// another store instance, such as a separate `associate` process, are not
/// seen until the file is loaded again.
#[derive(Debug, Clone)]
pub struct AssociationStore {
    path: PathBuf,
    records: Vec<AssociationRecord>,
}

impl AssociationStore {
    /// Open the store at `path`, never failing.
    ///
    /// A missing file yields an empty store. An unreadable or unparsable file
    /// is logged and also yields an empty store; the next commit replaces it.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match read_records(&path) {
            Ok(records) => records,
            Err(error) => {
                warn!(path = %path.display(), %error, "association store unusable, starting empty");
                Vec::new()
            }
        };
        Self { path, records }
    }

    /// Open the store at `path`, reporting unreadable documents.
    pub fn try_load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let records = read_records(&path)?;
        Ok(Self { path, records })
    }

    /// Insert or refresh the association for `identity`.
    ///
    /// The target record is chosen by [`resolver::resolve`]. A matched
    /// record keeps its address; its broadcast triple, label, value and
    /// policy are replaced. Nothing is persisted until [`commit`](Self::commit).
    pub fn upsert(
        &mut self,
        identity: &BeaconIdentity,
        label: impl Into<String>,
        value: impl Into<String>,
        notify: NotifyPolicy,
    ) -> Upsert {
        let label = label.into();
        let value = value.into();
        match resolver::resolve(identity, self) {
            Some(i) => {
                let record = &mut self.records[i];
                record.uuid = identity.uuid.clone();
                record.major = identity.major;
                record.minor = identity.minor;
                record.label = label;
                record.value = value;
                record.notify = notify;
                Upsert::Updated(i)
            }
            None => {
                self.records.push(AssociationRecord {
                    address: identity.address.clone(),
                    uuid: identity.uuid.clone(),
                    major: identity.major,
                    minor: identity.minor,
                    label,
                    value,
                    notify,
                });
                Upsert::Inserted(self.records.len() - 1)
            }
        }
    }

    /// Delete every record claiming `address`, returning how many went.
    pub fn remove(&mut self, address: &str) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.address != address);
        before - self.records.len()
    }

    pub fn get(&self, index: usize) -> Result<&AssociationRecord, IndexOutOfRange> {
        self.records.get(index).ok_or(IndexOutOfRange {
            index,
            len: self.records.len(),
        })
    }

    /// The record [`resolver::resolve`] picks for `identity`.
    pub fn lookup(&self, identity: &BeaconIdentity) -> Option<&AssociationRecord> {
        resolver::resolve(identity, self).map(|i| &self.records[i])
    }

    pub fn count(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[AssociationRecord] {
        &self.records
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the backing file with the current records.
    ///
    /// The document is written to a sibling temporary file, flushed to disk
    /// and renamed over the target, so an interrupted commit leaves the
    /// previous document intact. On error the in-memory records are
    /// untouched and the commit can be retried.
    pub fn commit(&self) -> Result<(), StoreError> {
        let document = DocumentRef {
            version: SCHEMA_VERSION,
            associations: &self.records,
        };
        let bytes = serde_json::to_vec_pretty(&document).map_err(StoreError::Serialize)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|source| StoreError::Commit {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let staging = staging_path(&self.path);
        write_synced(&staging, &bytes).map_err(|source| StoreError::Commit {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &self.path).map_err(|source| StoreError::Commit {
            path: self.path.clone(),
            source,
        })?;

        info!(path = %self.path.display(), records = self.records.len(), "associations committed");
        Ok(())
    }
}

fn read_records(path: &Path) -> Result<Vec<AssociationRecord>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(StoreError::Read {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let document: StoredDocument =
        serde_json::from_slice(&bytes).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    match document {
        StoredDocument::Versioned {
            version,
            associations,
        } if version <= SCHEMA_VERSION => Ok(associations),
        StoredDocument::Versioned { version, .. } => Err(StoreError::UnsupportedVersion {
            path: path.to_path_buf(),
            version,
        }),
        StoredDocument::Legacy(associations) => Ok(associations),
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("associations"));
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
