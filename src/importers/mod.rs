//! Importers for the export formats of other authenticator apps.
//!
//! Every importer goes through the same two steps: [`DatabaseImporter::parse`]
//! reads the stream into the format's own structure, then
//! [`DatabaseImporter::convert`] turns that structure into entries. Encrypted
//! exports need [`Credentials`] before `convert`; asking the user for them is
//! up to the caller.

use std::fmt;
use std::io::Read;
use std::marker::PhantomData;

use serde_json::{Map, Value};
use zeroize::Zeroizing;

use crate::entry::DatabaseEntry;
use crate::error::{EntryError, FormatError, ImporterError, ImporterResult};

pub mod aegis;
pub mod andotp;
pub mod freeotp;

/// Decryption material for encrypted exports.
pub enum Credentials {
    Password(Zeroizing<String>),
}

impl Credentials {
    pub fn password(password: impl Into<String>) -> Self {
        Credentials::Password(Zeroizing::new(password.into()))
    }

    fn password_bytes(&self) -> &[u8] {
        match self {
            Credentials::Password(p) => p.as_bytes(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Password(_) => f.write_str("Credentials::Password(..)"),
        }
    }
}

/// A source record that could not be turned into an entry.
#[derive(Debug)]
pub struct RecordFailure {
    pub index: usize,
    pub label: String,
    pub error: EntryError,
}

/// Entries in source order, plus the records that were skipped.
#[derive(Debug, Default)]
pub struct ImportResult {
    pub entries: Vec<DatabaseEntry>,
    pub failures: Vec<RecordFailure>,
}

impl ImportResult {
    fn record(
        &mut self,
        backend: &str,
        index: usize,
        label: String,
        result: Result<DatabaseEntry, EntryError>,
    ) {
        match result {
            Ok(entry) => self.entries.push(entry),
            Err(error) => {
                log::warn!("{backend}: skipping record {index} ({label}): {error}");
                self.failures.push(RecordFailure {
                    index,
                    label,
                    error,
                });
            }
        }
    }
}

pub trait DatabaseImporter {
    fn name(&self) -> &'static str;

    /// Reads and parses the whole stream. On failure nothing is kept and the
    /// importer stays unparsed.
    ///
    /// # Panics
    /// If called more than once successfully.
    fn parse(&mut self) -> ImporterResult<()>;

    /// Whether [`Credentials`] are required by `convert`.
    ///
    /// # Panics
    /// If called before a successful `parse`.
    fn is_encrypted(&self) -> bool;

    fn set_credentials(&mut self, credentials: Credentials);

    /// # Panics
    /// If called before a successful `parse`, or more than once.
    fn convert(&mut self) -> ImporterResult<ImportResult>;
}

/// One export format: its parsed form and how to turn it into entries.
pub trait Backend: 'static {
    const NAME: &'static str;

    type Parsed: 'static;

    fn parse(data: &[u8]) -> ImporterResult<Self::Parsed>;

    fn is_encrypted(parsed: &Self::Parsed) -> bool;

    fn convert(
        parsed: Self::Parsed,
        credentials: Option<&Credentials>,
    ) -> ImporterResult<ImportResult>;
}

enum Phase<T> {
    Created,
    Parsed(T),
    Converted,
}

impl<T> Phase<T> {
    fn label(&self) -> &'static str {
        match self {
            Phase::Created => "created",
            Phase::Parsed(_) => "parsed",
            Phase::Converted => "converted",
        }
    }
}

/// Drives a [`Backend`] through `created -> parsed -> converted`.
pub struct Importer<B: Backend> {
    stream: Box<dyn Read>,
    phase: Phase<B::Parsed>,
    credentials: Option<Credentials>,
    backend: PhantomData<B>,
}

impl<B: Backend> Importer<B> {
    pub fn new(stream: Box<dyn Read>) -> Self {
        Importer {
            stream,
            phase: Phase::Created,
            credentials: None,
            backend: PhantomData,
        }
    }

    fn phase_violation(&self, call: &str) -> ! {
        panic!(
            "{}: phase violation: {call} called while {}",
            B::NAME,
            self.phase.label()
        );
    }
}

impl<B: Backend> DatabaseImporter for Importer<B> {
    fn name(&self) -> &'static str {
        B::NAME
    }

    fn parse(&mut self) -> ImporterResult<()> {
        if !matches!(self.phase, Phase::Created) {
            self.phase_violation("parse()");
        }

        let mut data = Vec::new();
        self.stream
            .read_to_end(&mut data)
            .map_err(|source| ImporterError::Io {
                backend: B::NAME,
                source,
            })?;

        let parsed = B::parse(&data)?;
        log::debug!("{}: parsed {} bytes", B::NAME, data.len());
        self.phase = Phase::Parsed(parsed);
        Ok(())
    }

    fn is_encrypted(&self) -> bool {
        match &self.phase {
            Phase::Parsed(parsed) => B::is_encrypted(parsed),
            _ => self.phase_violation("is_encrypted()"),
        }
    }

    fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    fn convert(&mut self) -> ImporterResult<ImportResult> {
        let parsed = match std::mem::replace(&mut self.phase, Phase::Converted) {
            Phase::Parsed(parsed) => parsed,
            other => {
                self.phase = other;
                self.phase_violation("convert()");
            }
        };

        let result = B::convert(parsed, self.credentials.as_ref())?;
        log::debug!(
            "{}: converted {} entries, {} failures",
            B::NAME,
            result.entries.len(),
            result.failures.len()
        );
        Ok(result)
    }
}

/// A registered format.
pub struct ImporterKind {
    pub name: &'static str,
    constructor: fn(Box<dyn Read>) -> Box<dyn DatabaseImporter>,
}

impl ImporterKind {
    /// Wraps the stream; nothing is read until `parse`.
    pub fn create(&self, stream: impl Read + 'static) -> Box<dyn DatabaseImporter> {
        (self.constructor)(Box::new(stream))
    }
}

impl fmt::Debug for ImporterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImporterKind").field("name", &self.name).finish()
    }
}

fn construct<B: Backend>(stream: Box<dyn Read>) -> Box<dyn DatabaseImporter> {
    Box::new(Importer::<B>::new(stream))
}

// keep this list sorted alphabetically
static IMPORTERS: [ImporterKind; 3] = [
    ImporterKind {
        name: aegis::Aegis::NAME,
        constructor: construct::<aegis::Aegis>,
    },
    ImporterKind {
        name: andotp::AndOtp::NAME,
        constructor: construct::<andotp::AndOtp>,
    },
    ImporterKind {
        name: freeotp::FreeOtp::NAME,
        constructor: construct::<freeotp::FreeOtp>,
    },
];

/// All supported formats in display order.
pub fn registry() -> &'static [ImporterKind] {
    &IMPORTERS
}

/// Case-insensitive lookup by format name.
pub fn find(name: &str) -> Option<&'static ImporterKind> {
    IMPORTERS.iter().find(|k| k.name.eq_ignore_ascii_case(name))
}

fn record_label(issuer: &str, name: &str) -> String {
    match (issuer.is_empty(), name.is_empty()) {
        (false, false) => format!("{issuer} / {name}"),
        (false, true) => issuer.to_string(),
        _ => name.to_string(),
    }
}

// Field helpers shared by the json based backends.

fn as_record(value: &Value) -> Result<&Map<String, Value>, FormatError> {
    value.as_object().ok_or(FormatError::InvalidField("entry"))
}

fn opt_str<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<Option<&'a str>, FormatError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(FormatError::InvalidField(field)),
    }
}

fn req_str<'a>(obj: &'a Map<String, Value>, field: &'static str) -> Result<&'a str, FormatError> {
    opt_str(obj, field)?.ok_or(FormatError::MissingField(field))
}

fn opt_int(obj: &Map<String, Value>, field: &'static str) -> Result<Option<i64>, FormatError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or(FormatError::InvalidField(field)),
    }
}
