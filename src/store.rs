use std::path::Path;

use anyhow::Context;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::entry::DatabaseEntry;
use crate::error::{DatabaseError, FormatError};
use crate::otp::OtpInfo;

pub const DATABASE_VERSION: u64 = 1;

/// Ordered set of entries with unique identities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Database {
    entries: Vec<DatabaseEntry>,
}

/// What [`Database::merge`] did with the incoming entries.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub added: usize,
    pub duplicates: usize,
    pub reassigned: usize,
}

impl Database {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[DatabaseEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, uuid: Uuid) -> Option<&DatabaseEntry> {
        self.entries.iter().find(|e| e.uuid() == uuid)
    }

    pub fn get_mut(&mut self, uuid: Uuid) -> Option<&mut DatabaseEntry> {
        self.entries.iter_mut().find(|e| e.uuid() == uuid)
    }

    pub fn add(&mut self, entry: DatabaseEntry) -> Result<(), DatabaseError> {
        if self.get(entry.uuid()).is_some() {
            return Err(DatabaseError::DuplicateUuid(entry.uuid()));
        }
        self.entries.push(entry);
        Ok(())
    }

    pub fn remove(&mut self, uuid: Uuid) -> Option<DatabaseEntry> {
        let pos = self.entries.iter().position(|e| e.uuid() == uuid)?;
        Some(self.entries.remove(pos))
    }

    /// Adds entries coming from another vault or an import.
    ///
    /// Entries already present (same uuid and content, or same content under
    /// another uuid after a repeated import) are skipped. An entry whose uuid
    /// is taken by a different credential gets a fresh uuid.
    pub fn merge(&mut self, incoming: impl IntoIterator<Item = DatabaseEntry>) -> MergeSummary {
        let mut summary = MergeSummary::default();

        for mut entry in incoming {
            if self.entries.iter().any(|e| same_credential(e, &entry)) {
                log::debug!("skipping duplicate entry {}", entry.uuid());
                summary.duplicates += 1;
                continue;
            }
            if self.get(entry.uuid()).is_some() {
                entry.reset_uuid();
                log::debug!("uuid collision, entry reassigned to {}", entry.uuid());
                summary.reassigned += 1;
            }
            self.entries.push(entry);
            summary.added += 1;
        }

        summary
    }

    pub fn to_json(&self) -> Value {
        let entries: Vec<Value> = self.entries.iter().map(DatabaseEntry::to_json).collect();
        json!({
            "version": DATABASE_VERSION,
            "entries": entries,
        })
    }

    pub fn from_json(value: &Value) -> Result<Self, DatabaseError> {
        let version = value
            .get("version")
            .ok_or(FormatError::MissingField("version"))?
            .as_u64()
            .ok_or(FormatError::InvalidField("version"))?;
        if version != DATABASE_VERSION {
            return Err(DatabaseError::Version(version));
        }

        let array = value
            .get("entries")
            .ok_or(FormatError::MissingField("entries"))?
            .as_array()
            .ok_or(FormatError::InvalidField("entries"))?;

        let mut db = Database::new();
        for (index, item) in array.iter().enumerate() {
            let entry = DatabaseEntry::from_json(item)
                .map_err(|source| DatabaseError::Entry { index, source })?;
            db.add(entry)?;
        }
        Ok(db)
    }
}

fn same_credential(a: &DatabaseEntry, b: &DatabaseEntry) -> bool {
    a.name == b.name && a.issuer == b.issuer && without_counter(&a.info) == without_counter(&b.info)
}

// a counter that moved on is still the same credential
fn without_counter(info: &OtpInfo) -> OtpInfo {
    let mut info = info.clone();
    if let OtpInfo::Hotp { counter, .. } = &mut info {
        *counter = 0;
    }
    info
}

/// Load a database file written by [`save_database`].
pub fn load_database(path: &Path) -> anyhow::Result<Database> {
    let data = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read database file {}", path.display()))?;
    let value: Value = serde_json::from_str(&data)
        .with_context(|| format!("database file {} is not valid JSON", path.display()))?;
    let db = Database::from_json(&value)
        .with_context(|| format!("cannot load database {}", path.display()))?;
    log::info!("loaded {} entries from {}", db.len(), path.display());
    Ok(db)
}

/// Like [`load_database`], but a missing file is an empty database.
pub fn load_or_create(path: &Path) -> anyhow::Result<Database> {
    if path.exists() {
        load_database(path)
    } else {
        log::info!("no database at {}, starting empty", path.display());
        Ok(Database::new())
    }
}

pub fn save_database(path: &Path, db: &Database) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let s = serde_json::to_string_pretty(&db.to_json())?;
    std::fs::write(path, s)
        .with_context(|| format!("cannot write database file {}", path.display()))?;
    log::info!("saved {} entries to {}", db.len(), path.display());
    Ok(())
}
