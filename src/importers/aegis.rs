//! Aegis vault exports.
//!
//! ```json
//! { "version": 1,
//!   "header": { "slots": [..] | null, "params": { "nonce": "..", "tag": ".." } | null },
//!   "db": { "version": 1, "entries": [..] } | "<base64 ciphertext>" }
//! ```
//!
//! Entries use the same json form as our own database, except that the
//! secret is base32 and unknown fields are ignored. An encrypted `db` is
//! sealed with a random master key, which every password slot wraps with a
//! key derived by scrypt.

use serde::Deserialize;
use serde_json::Value;

use super::{Backend, Credentials, ImportResult, record_label};
use crate::codec;
use crate::crypto::{self, KEY_LEN, NONCE_LEN, TAG_LEN};
use crate::entry::DatabaseEntry;
use crate::error::{EntryError, ImporterError, ImporterResult, OtpInfoError};

const VERSION: u64 = 1;
// newer db versions only add fields we ignore (notes, favorites, group uuids)
const MAX_DB_VERSION: u64 = 3;
const SLOT_PASSWORD: u8 = 1;

// Aegis itself uses n = 2^15, r = 8, p = 1
const MAX_SCRYPT_N: u64 = 1 << 20;
const MAX_SCRYPT_RP: u64 = 16;

pub struct Aegis;

#[derive(Deserialize)]
struct VaultFile {
    version: u64,
    header: Header,
    db: Value,
}

#[derive(Deserialize)]
struct Header {
    slots: Option<Vec<Value>>,
    params: Option<KeyParams>,
}

#[derive(Deserialize)]
struct KeyParams {
    nonce: String,
    tag: String,
}

#[derive(Deserialize)]
struct RawSlot {
    #[serde(rename = "type")]
    slot_type: u8,
}

#[derive(Deserialize)]
struct RawPasswordSlot {
    key: String,
    key_params: KeyParams,
    n: u64,
    r: u32,
    p: u32,
    salt: String,
}

/// A password slot with its hex fields decoded.
pub struct PasswordSlot {
    key: Vec<u8>,
    nonce: Vec<u8>,
    tag: Vec<u8>,
    n: u64,
    r: u32,
    p: u32,
    salt: Vec<u8>,
}

/// Parsed form of an Aegis export.
pub enum AegisDb {
    Plain(Vec<Value>),
    Encrypted {
        slots: Vec<PasswordSlot>,
        nonce: Vec<u8>,
        tag: Vec<u8>,
        ciphertext: Vec<u8>,
    },
}

fn schema(reason: impl Into<String>) -> ImporterError {
    ImporterError::schema(Aegis::NAME, reason)
}

fn corrupt(reason: impl Into<String>) -> ImporterError {
    ImporterError::corrupt(Aegis::NAME, reason)
}

fn decode_hex(field: &str, text: &str) -> ImporterResult<Vec<u8>> {
    hex::decode(text).map_err(|e| schema(format!("{field} is not hex: {e}")))
}

fn decode_params(field: &str, params: &KeyParams) -> ImporterResult<(Vec<u8>, Vec<u8>)> {
    let nonce = decode_hex(field, &params.nonce)?;
    let tag = decode_hex(field, &params.tag)?;
    if nonce.len() != NONCE_LEN || tag.len() != TAG_LEN {
        return Err(schema(format!("{field} has a bad nonce or tag length")));
    }
    Ok((nonce, tag))
}

fn password_slots(slots: Vec<Value>) -> ImporterResult<Vec<PasswordSlot>> {
    let mut out = Vec::new();
    for (i, slot) in slots.into_iter().enumerate() {
        let raw: RawSlot = serde_json::from_value(slot.clone())
            .map_err(|e| schema(format!("slot {i}: {e}")))?;
        // other slot types (raw keys, biometrics) cannot be opened with a password
        if raw.slot_type != SLOT_PASSWORD {
            continue;
        }

        let raw: RawPasswordSlot = serde_json::from_value(slot)
            .map_err(|e| schema(format!("slot {i}: {e}")))?;
        if raw.n < 2 || !raw.n.is_power_of_two() {
            return Err(schema(format!("slot {i}: scrypt n = {} is not a power of two", raw.n)));
        }
        // scrypt needs 128 * r * n bytes, refuse what would exhaust memory
        let rp = u64::from(raw.r) * u64::from(raw.p);
        if raw.n > MAX_SCRYPT_N || rp == 0 || rp > MAX_SCRYPT_RP {
            return Err(schema(format!(
                "slot {i}: scrypt parameters n = {}, r = {}, p = {} are out of range",
                raw.n, raw.r, raw.p
            )));
        }
        let (nonce, tag) = decode_params("slot key_params", &raw.key_params)?;
        out.push(PasswordSlot {
            key: decode_hex("slot key", &raw.key)?,
            nonce,
            tag,
            n: raw.n,
            r: raw.r,
            p: raw.p,
            salt: decode_hex("slot salt", &raw.salt)?,
        });
    }
    Ok(out)
}

fn db_entries(db: Value) -> Result<Vec<Value>, String> {
    let Value::Object(mut db) = db else {
        return Err("db is not an object".to_string());
    };
    match db.get("version").and_then(Value::as_u64) {
        Some(v) if (1..=MAX_DB_VERSION).contains(&v) => {}
        other => return Err(format!("unsupported db version {other:?}")),
    }
    match db.remove("entries") {
        Some(Value::Array(entries)) => Ok(entries),
        _ => Err("db has no entries array".to_string()),
    }
}

impl PasswordSlot {
    fn open(&self, password: &[u8]) -> ImporterResult<Option<crypto::Key>> {
        let derived = crypto::scrypt_key(password, &self.salt, self.n, self.r, self.p)
            .map_err(|e| schema(e.to_string()))?;

        let mut sealed = self.key.clone();
        sealed.extend_from_slice(&self.tag);
        let Ok(master) = crypto::aes_gcm_open(derived.as_slice(), &self.nonce, &sealed) else {
            return Ok(None);
        };
        if master.len() != KEY_LEN {
            return Err(corrupt("master key has the wrong length"));
        }

        let mut key = crypto::Key::default();
        key.copy_from_slice(&master);
        Ok(Some(key))
    }
}

/// Aegis entries match our json except for the secret, which is base32.
fn aegis_entry(value: &Value) -> Result<DatabaseEntry, EntryError> {
    let mut value = value.clone();
    if let Some(Value::String(secret)) = value.get_mut("info").and_then(|info| info.get_mut("secret")) {
        let bytes = codec::decode_base32(secret).map_err(OtpInfoError::Secret)?;
        *secret = codec::encode(&bytes);
    }
    DatabaseEntry::from_json(&value)
}

fn convert_entries(entries: Vec<Value>) -> ImportResult {
    let mut result = ImportResult::default();
    for (index, value) in entries.iter().enumerate() {
        let label = record_label(
            value.get("issuer").and_then(Value::as_str).unwrap_or(""),
            value.get("name").and_then(Value::as_str).unwrap_or(""),
        );
        result.record(Aegis::NAME, index, label, aegis_entry(value));
    }
    result
}

impl Backend for Aegis {
    const NAME: &'static str = "Aegis";

    type Parsed = AegisDb;

    fn parse(data: &[u8]) -> ImporterResult<AegisDb> {
        let file: VaultFile =
            serde_json::from_slice(data).map_err(|e| schema(format!("not an Aegis export: {e}")))?;
        if file.version != VERSION {
            return Err(schema(format!("unsupported version {}", file.version)));
        }

        match file.db {
            Value::String(text) => {
                let params = file
                    .header
                    .params
                    .ok_or_else(|| schema("encrypted db without header params"))?;
                let (nonce, tag) = decode_params("header params", &params)?;
                let slots = password_slots(file.header.slots.unwrap_or_default())?;
                if slots.is_empty() {
                    return Err(schema("no password slot to unlock the vault with"));
                }
                let ciphertext =
                    codec::decode(&text).map_err(|e| schema(format!("db is not base64: {e}")))?;
                Ok(AegisDb::Encrypted {
                    slots,
                    nonce,
                    tag,
                    ciphertext,
                })
            }
            db => db_entries(db).map(AegisDb::Plain).map_err(schema),
        }
    }

    fn is_encrypted(parsed: &AegisDb) -> bool {
        matches!(parsed, AegisDb::Encrypted { .. })
    }

    fn convert(parsed: AegisDb, credentials: Option<&Credentials>) -> ImporterResult<ImportResult> {
        let (slots, nonce, tag, mut ciphertext) = match parsed {
            AegisDb::Plain(entries) => return Ok(convert_entries(entries)),
            AegisDb::Encrypted {
                slots,
                nonce,
                tag,
                ciphertext,
            } => (slots, nonce, tag, ciphertext),
        };

        let credentials = credentials.ok_or(ImporterError::MissingCredentials {
            backend: Aegis::NAME,
        })?;

        let mut master = None;
        for slot in &slots {
            if let Some(key) = slot.open(credentials.password_bytes())? {
                master = Some(key);
                break;
            }
        }
        let master = master.ok_or(ImporterError::Decryption {
            backend: Aegis::NAME,
        })?;

        ciphertext.extend_from_slice(&tag);
        let plain = crypto::aes_gcm_open(master.as_slice(), &nonce, &ciphertext)
            .map_err(|_| corrupt("db does not match its authentication tag"))?;
        let db: Value =
            serde_json::from_slice(&plain).map_err(|e| corrupt(format!("db is not json: {e}")))?;
        let entries = db_entries(db).map_err(corrupt)?;

        Ok(convert_entries(entries))
    }
}
