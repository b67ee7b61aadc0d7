//! andOTP backups.
//!
//! A plain backup is a json array of accounts. An encrypted backup
//! (`otp_accounts.json.aes`) is `nonce(12) || ciphertext || tag(16)` sealed
//! with AES-256-GCM under `SHA-256(password)`, and has no header at all, so
//! anything that does not start with `[` or is not utf-8 is taken for one.

use std::str;

use serde_json::{Map, Value};

use super::{Backend, Credentials, ImportResult, opt_int, opt_str, record_label, req_str};
use crate::codec;
use crate::crypto::{self, NONCE_LEN, TAG_LEN};
use crate::entry::DatabaseEntry;
use crate::error::{EntryError, FormatError, ImporterError, ImporterResult, OtpInfoError};
use crate::otp::{Algorithm, DEFAULT_DIGITS, DEFAULT_PERIOD, OtpInfo};

pub struct AndOtp;

/// Parsed form of an andOTP backup.
pub enum AndOtpData {
    Plain(Vec<Value>),
    Encrypted(Vec<u8>),
}

fn parse_accounts(data: &[u8]) -> Result<Vec<Value>, serde_json::Error> {
    serde_json::from_slice(data)
}

/// "Issuer - name" labels come from andOTP versions that had no issuer field.
fn split_label<'a>(issuer: &'a str, label: &'a str) -> (&'a str, &'a str) {
    if issuer.is_empty() {
        if let Some((issuer, name)) = label.split_once(" - ") {
            return (issuer, name);
        }
    }
    (issuer, label)
}

fn convert_account(value: &Value) -> Result<DatabaseEntry, EntryError> {
    let obj = super::as_record(value)?;

    let kind = req_str(obj, "type")?.to_uppercase();

    let secret = req_str(obj, "secret")?;
    if secret.is_empty() {
        return Err(OtpInfoError::EmptySecret.into());
    }
    let secret = codec::decode_base32(secret).map_err(OtpInfoError::Secret)?;

    let algorithm = match opt_str(obj, "algorithm")? {
        Some(name) => Algorithm::from_name(name)
            .ok_or_else(|| OtpInfoError::UnknownAlgorithm(name.to_string()))?,
        None => Algorithm::Sha1,
    };

    let digits = match opt_int(obj, "digits")? {
        Some(n) => u32::try_from(n).map_err(|_| OtpInfoError::InvalidDigits(n))?,
        None => DEFAULT_DIGITS,
    };

    let info = match kind.as_str() {
        "TOTP" => OtpInfo::totp(secret, algorithm, digits, period(obj)?)?,
        "HOTP" => {
            let counter = opt_int(obj, "counter")?.ok_or(OtpInfoError::MissingField("counter"))?;
            let counter = u64::try_from(counter).map_err(|_| OtpInfoError::InvalidCounter(counter))?;
            OtpInfo::hotp(secret, algorithm, digits, counter)?
        }
        // steam codes are always five characters, whatever the record says
        "STEAM" => OtpInfo::steam(secret)?,
        _ => return Err(OtpInfoError::UnknownType(kind).into()),
    };

    let issuer = opt_str(obj, "issuer")?.unwrap_or("");
    let label = opt_str(obj, "label")?.unwrap_or("");
    let (issuer, name) = split_label(issuer, label);

    let mut entry = DatabaseEntry::with_name(info, name, issuer);
    entry.group = match obj.get("tags") {
        None | Some(Value::Null) => None,
        Some(Value::Array(tags)) => tags.iter().find_map(Value::as_str).map(str::to_string),
        Some(_) => return Err(FormatError::InvalidField("tags").into()),
    };
    Ok(entry)
}

fn period(obj: &Map<String, Value>) -> Result<u32, EntryError> {
    match opt_int(obj, "period")? {
        Some(n) => Ok(u32::try_from(n).map_err(|_| OtpInfoError::InvalidPeriod(n))?),
        None => Ok(DEFAULT_PERIOD),
    }
}

fn convert_accounts(accounts: Vec<Value>) -> ImportResult {
    let mut result = ImportResult::default();
    for (index, value) in accounts.iter().enumerate() {
        let label = record_label(
            value.get("issuer").and_then(Value::as_str).unwrap_or(""),
            value.get("label").and_then(Value::as_str).unwrap_or(""),
        );
        result.record(AndOtp::NAME, index, label, convert_account(value));
    }
    result
}

impl Backend for AndOtp {
    const NAME: &'static str = "andOTP";

    type Parsed = AndOtpData;

    fn parse(data: &[u8]) -> ImporterResult<AndOtpData> {
        let min_encrypted = NONCE_LEN + TAG_LEN;
        match data.iter().find(|b| !b.is_ascii_whitespace()) {
            None => Err(ImporterError::schema(Self::NAME, "file is empty")),
            Some(b'[') => match parse_accounts(data) {
                Ok(accounts) => Ok(AndOtpData::Plain(accounts)),
                // json is always utf-8, but a random nonce may still start with '['
                Err(_) if data.len() >= min_encrypted && str::from_utf8(data).is_err() => {
                    Ok(AndOtpData::Encrypted(data.to_vec()))
                }
                Err(e) => Err(ImporterError::schema(Self::NAME, format!("not an andOTP backup: {e}"))),
            },
            Some(_) if data.len() < min_encrypted => Err(ImporterError::schema(
                Self::NAME,
                "too short to be an encrypted andOTP backup",
            )),
            Some(_) => Ok(AndOtpData::Encrypted(data.to_vec())),
        }
    }

    fn is_encrypted(parsed: &AndOtpData) -> bool {
        matches!(parsed, AndOtpData::Encrypted(_))
    }

    fn convert(parsed: AndOtpData, credentials: Option<&Credentials>) -> ImporterResult<ImportResult> {
        let blob = match parsed {
            AndOtpData::Plain(accounts) => return Ok(convert_accounts(accounts)),
            AndOtpData::Encrypted(blob) => blob,
        };

        let credentials = credentials.ok_or(ImporterError::MissingCredentials {
            backend: Self::NAME,
        })?;
        let key = crypto::sha256_key(credentials.password_bytes());

        let (nonce, sealed) = blob.split_at(NONCE_LEN);
        let plain = crypto::aes_gcm_open(key.as_slice(), nonce, sealed)
            .map_err(|_| ImporterError::Decryption { backend: Self::NAME })?;
        let accounts = parse_accounts(&plain)
            .map_err(|e| ImporterError::corrupt(Self::NAME, format!("decrypted data is not an account list: {e}")))?;

        Ok(convert_accounts(accounts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importers::{DatabaseImporter, find};
    use std::io::Cursor;

    const BACKUP: &str = r#"[
        {"secret":"JBSWY3DPEHPK3PXP","issuer":"GitHub","label":"alice","digits":6,"type":"TOTP","algorithm":"SHA1","thumbnail":"Default","last_used":0,"period":30,"tags":["work","dev"]},
        {"secret":"GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ","issuer":"","label":"Bank - bob","digits":8,"type":"HOTP","algorithm":"SHA256","counter":5,"tags":[]},
        {"secret":"JBSWY3DPEHPK3PXP","label":"Steam - gabe","type":"STEAM","tags":[]}
    ]"#;

    fn importer(data: Vec<u8>) -> Box<dyn DatabaseImporter> {
        find("andOTP").unwrap().create(Cursor::new(data))
    }

    fn encrypt(password: &str, plain: &[u8]) -> Vec<u8> {
        encrypt_with_nonce(password, [5u8; NONCE_LEN], plain)
    }

    fn encrypt_with_nonce(password: &str, nonce: [u8; NONCE_LEN], plain: &[u8]) -> Vec<u8> {
        let key = crypto::sha256_key(password.as_bytes());
        let mut out = nonce.to_vec();
        out.extend(crypto::aes_gcm_seal(key.as_slice(), &nonce, plain).unwrap());
        out
    }

    fn convert_plain(data: &str) -> ImportResult {
        let mut imp = importer(data.as_bytes().to_vec());
        imp.parse().unwrap();
        imp.convert().unwrap()
    }

    #[test]
    fn maps_all_account_types() {
        let result = convert_plain(BACKUP);
        assert!(result.failures.is_empty());
        let [github, bank, steam] = &result.entries[..] else {
            panic!("expected three entries, got {}", result.entries.len());
        };

        assert_eq!(github.issuer, "GitHub");
        assert_eq!(github.name, "alice");
        assert_eq!(github.group.as_deref(), Some("work"));
        assert_eq!(github.info.period(), Some(30));
        assert_eq!(github.info.secret(), b"Hello!\xde\xad\xbe\xef");

        assert_eq!(bank.issuer, "Bank");
        assert_eq!(bank.name, "bob");
        assert_eq!(bank.group, None);
        assert_eq!(bank.info.algorithm(), Algorithm::Sha256);
        assert_eq!(bank.info.counter(), Some(5));
        assert_eq!(bank.info.digits(), 8);
        assert_eq!(bank.info.secret(), b"12345678901234567890");

        assert_eq!(steam.info.type_tag(), "steam");
        assert_eq!(steam.info.digits(), 5);
        assert_eq!(steam.issuer, "Steam");
    }

    #[test]
    fn missing_algorithm_digits_and_period_use_defaults() {
        let result = convert_plain(r#"[{"secret":"JBSWY3DPEHPK3PXP","label":"x","type":"totp"}]"#);
        let entry = &result.entries[0];
        assert_eq!(entry.info.algorithm(), Algorithm::Sha1);
        assert_eq!(entry.info.digits(), 6);
        assert_eq!(entry.info.period(), Some(30));
    }

    #[test]
    fn issuer_field_wins_over_label_split() {
        let result = convert_plain(
            r#"[{"secret":"JBSWY3DPEHPK3PXP","issuer":"Real","label":"Fake - name","type":"TOTP"}]"#,
        );
        assert_eq!(result.entries[0].issuer, "Real");
        assert_eq!(result.entries[0].name, "Fake - name");
    }

    #[test]
    fn unmappable_records_are_reported() {
        let result = convert_plain(
            r#"[
                {"secret":"JBSWY3DPEHPK3PXP","label":"ok","type":"TOTP"},
                {"secret":"JBSWY3DPEHPK3PXP","label":"motp","type":"MOTP"},
                {"secret":"!!!","label":"bad secret","type":"TOTP"},
                {"secret":"JBSWY3DPEHPK3PXP","label":"no counter","type":"HOTP"},
                {"label":"no secret","type":"TOTP"}
            ]"#,
        );
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].name, "ok");

        let failures: Vec<_> = result.failures.iter().map(|f| (f.index, f.label.as_str())).collect();
        assert_eq!(
            failures,
            [(1, "motp"), (2, "bad secret"), (3, "no counter"), (4, "no secret")]
        );
        assert!(matches!(
            result.failures[0].error,
            EntryError::OtpInfo(OtpInfoError::UnknownType(_))
        ));
        assert!(matches!(
            result.failures[1].error,
            EntryError::OtpInfo(OtpInfoError::Secret(_))
        ));
        assert!(matches!(
            result.failures[2].error,
            EntryError::OtpInfo(OtpInfoError::MissingField("counter"))
        ));
        assert!(matches!(
            result.failures[3].error,
            EntryError::Format(FormatError::MissingField("secret"))
        ));
    }

    #[test]
    fn encrypted_backup_roundtrip() {
        let data = encrypt("hunter2", BACKUP.as_bytes());

        let mut imp = importer(data.clone());
        imp.parse().unwrap();
        assert!(imp.is_encrypted());
        assert!(matches!(
            imp.convert(),
            Err(ImporterError::MissingCredentials { backend: "andOTP" })
        ));

        let mut imp = importer(data.clone());
        imp.parse().unwrap();
        imp.set_credentials(Credentials::password("wrong"));
        assert!(matches!(
            imp.convert(),
            Err(ImporterError::Decryption { backend: "andOTP" })
        ));

        let mut imp = importer(data);
        imp.parse().unwrap();
        imp.set_credentials(Credentials::password("hunter2"));
        let result = imp.convert().unwrap();
        assert_eq!(result.entries.len(), 3);
        assert_eq!(result.entries[0].issuer, "GitHub");
    }

    #[test]
    fn encrypted_backup_whose_nonce_starts_with_a_bracket() {
        for nonce in [[b'['; NONCE_LEN], *b" \n[abcdefghi"] {
            let mut imp = importer(encrypt_with_nonce("hunter2", nonce, BACKUP.as_bytes()));
            imp.parse().unwrap();
            assert!(imp.is_encrypted());
            imp.set_credentials(Credentials::password("hunter2"));
            assert_eq!(imp.convert().unwrap().entries.len(), 3);
        }
    }

    #[test]
    fn encrypted_garbage_is_corrupt() {
        let mut imp = importer(encrypt("pw", b"{\"not\":\"a list\"}"));
        imp.parse().unwrap();
        imp.set_credentials(Credentials::password("pw"));
        assert!(matches!(imp.convert(), Err(ImporterError::Corrupt { .. })));
    }

    #[test]
    fn truncated_or_empty_input_fails_parse() {
        let truncated = &BACKUP.as_bytes()[..BACKUP.len() / 2];
        let inputs: [&[u8]; 3] = [truncated, b"   ", b"xyz"];
        for data in inputs {
            let mut imp = importer(data.to_vec());
            assert!(matches!(imp.parse(), Err(ImporterError::Schema { .. })));
        }
    }
}
