//! FreeOTP `tokens.xml` backups.
//!
//! The file is an Android shared preferences map. Every token is a
//! `<string>` whose name is the token key and whose text is the token as
//! json; the `tokenOrder` string only lists those keys.

use std::str;

use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use serde_json::{Map, Value};

use super::{Backend, Credentials, ImportResult, as_record, opt_int, opt_str, record_label, req_str};
use crate::entry::DatabaseEntry;
use crate::error::{EntryError, FormatError, ImporterError, ImporterResult, OtpInfoError};
use crate::otp::{Algorithm, DEFAULT_DIGITS, DEFAULT_PERIOD, OtpInfo};

const TOKEN_ORDER: &str = "tokenOrder";

const ISSUER_FIELDS: [&str; 2] = ["issuerExt", "issuerInt"];

pub struct FreeOtp;

/// A `<string>` preference: token key and raw json.
pub struct RawToken {
    key: String,
    json: String,
}

fn schema(reason: impl Into<String>) -> ImporterError {
    ImporterError::schema(FreeOtp::NAME, reason)
}

fn string_key(e: &BytesStart) -> ImporterResult<String> {
    let attr = e
        .try_get_attribute("name")
        .map_err(|e| schema(format!("bad attribute: {e}")))?
        .ok_or_else(|| schema("<string> without a name"))?;
    let value = attr
        .unescape_value()
        .map_err(|e| schema(format!("bad attribute value: {e}")))?;
    Ok(value.into_owned())
}

fn parse_map(xml: &str) -> ImporterResult<Vec<RawToken>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<String> = Vec::new();
    let mut seen_map = false;
    let mut current: Option<RawToken> = None;
    let mut tokens = Vec::new();

    loop {
        let event = reader.read_event().map_err(|e| {
            schema(format!("xml error at position {}: {e}", reader.buffer_position()))
        })?;

        match event {
            Event::Start(ref e) => {
                let name = str::from_utf8(e.name().as_ref())
                    .map_err(|_| schema("invalid utf-8 in tag name"))?
                    .to_string();
                match (stack.len(), name.as_str()) {
                    (0, "map") => seen_map = true,
                    (0, other) => return Err(schema(format!("unexpected root element <{other}>"))),
                    (1, "string") => {
                        current = Some(RawToken {
                            key: string_key(e)?,
                            json: String::new(),
                        })
                    }
                    _ => {}
                }
                stack.push(name);
            }
            Event::Empty(ref e) => match (stack.len(), e.name().as_ref()) {
                (0, b"map") => seen_map = true,
                (0, _) => return Err(schema("unexpected root element")),
                (1, b"string") => tokens.push(RawToken {
                    key: string_key(e)?,
                    json: String::new(),
                }),
                _ => {}
            },
            Event::Text(ref e) => {
                if let Some(token) = current.as_mut() {
                    let text = e
                        .unescape()
                        .map_err(|e| schema(format!("bad text in <string>: {e}")))?;
                    token.json.push_str(&text);
                }
            }
            Event::CData(ref e) => {
                if let Some(token) = current.as_mut() {
                    let text = str::from_utf8(e).map_err(|_| schema("invalid utf-8 in <string>"))?;
                    token.json.push_str(text);
                }
            }
            Event::End(_) => {
                stack.pop();
                if stack.len() == 1 {
                    tokens.extend(current.take());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(schema(format!("unexpected end of file inside <{}>", stack.join("><"))));
    }
    if !seen_map {
        return Err(schema("no <map> element"));
    }

    tokens.retain(|t| t.key != TOKEN_ORDER);
    Ok(tokens)
}

/// FreeOTP stores the secret as java bytes, i.e. signed.
fn secret_bytes(obj: &Map<String, Value>) -> Result<Vec<u8>, EntryError> {
    let array = match obj.get("secret") {
        None | Some(Value::Null) => return Err(OtpInfoError::MissingField("secret").into()),
        Some(Value::Array(array)) => array,
        Some(_) => return Err(OtpInfoError::InvalidField("secret").into()),
    };

    array
        .iter()
        .map(|v| {
            v.as_i64()
                .and_then(|n| i8::try_from(n).ok())
                .map(|b| b as u8)
                .ok_or(EntryError::from(OtpInfoError::InvalidField("secret")))
        })
        .collect()
}

fn convert_token(json: &str) -> Result<DatabaseEntry, EntryError> {
    let value: Value = serde_json::from_str(json).map_err(FormatError::from)?;
    let obj = as_record(&value)?;

    let kind = req_str(obj, "type")?.to_uppercase();
    let secret = secret_bytes(obj)?;

    let algorithm = match opt_str(obj, "algo")? {
        Some(name) => Algorithm::from_name(name)
            .ok_or_else(|| OtpInfoError::UnknownAlgorithm(name.to_string()))?,
        None => Algorithm::Sha1,
    };
    let digits = match opt_int(obj, "digits")? {
        Some(n) => u32::try_from(n).map_err(|_| OtpInfoError::InvalidDigits(n))?,
        None => DEFAULT_DIGITS,
    };

    let info = match kind.as_str() {
        "TOTP" => {
            let period = match opt_int(obj, "period")? {
                Some(n) => u32::try_from(n).map_err(|_| OtpInfoError::InvalidPeriod(n))?,
                None => DEFAULT_PERIOD,
            };
            OtpInfo::totp(secret, algorithm, digits, period)?
        }
        "HOTP" => {
            let counter = opt_int(obj, "counter")?.unwrap_or(0);
            let counter = u64::try_from(counter).map_err(|_| OtpInfoError::InvalidCounter(counter))?;
            OtpInfo::hotp(secret, algorithm, digits, counter)?
        }
        _ => return Err(OtpInfoError::UnknownType(kind).into()),
    };

    let name = opt_str(obj, "label")?.unwrap_or("");
    let mut issuer = "";
    for field in ISSUER_FIELDS {
        if let Some(found) = opt_str(obj, field)? {
            issuer = found;
            break;
        }
    }
    Ok(DatabaseEntry::with_name(info, name, issuer))
}

fn failure_label(token: &RawToken) -> String {
    let value: Value = serde_json::from_str(&token.json).unwrap_or(Value::Null);
    let issuer = ISSUER_FIELDS
        .iter()
        .find_map(|field| value.get(*field).and_then(Value::as_str))
        .unwrap_or("");
    let name = value.get("label").and_then(Value::as_str).unwrap_or("");
    let label = record_label(issuer, name);
    if label.is_empty() { token.key.clone() } else { label }
}

impl Backend for FreeOtp {
    const NAME: &'static str = "FreeOTP";

    type Parsed = Vec<RawToken>;

    fn parse(data: &[u8]) -> ImporterResult<Vec<RawToken>> {
        let xml = str::from_utf8(data).map_err(|_| schema("file is not utf-8 text"))?;
        parse_map(xml)
    }

    fn is_encrypted(_: &Vec<RawToken>) -> bool {
        false
    }

    fn convert(tokens: Vec<RawToken>, _: Option<&Credentials>) -> ImporterResult<ImportResult> {
        let mut result = ImportResult::default();
        for (index, token) in tokens.iter().enumerate() {
            result.record(Self::NAME, index, failure_label(token), convert_token(&token.json));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::importers::{DatabaseImporter, find};
    use std::io::Cursor;

    const TOKENS: &str = r#"<?xml version='1.0' encoding='utf-8' standalone='yes' ?>
<map>
    <string name="GitHub:alice">{"algo":"SHA1","counter":0,"digits":6,"issuerExt":"GitHub","label":"alice","period":30,"secret":[72,101,108,108,111,33,-34,-83,-66,-17],"type":"TOTP"}</string>
    <string name="tokenOrder">["GitHub:alice","Bank:bob"]</string>
    <string name="Bank:bob">{"algo":"SHA256","counter":7,"digits":8,"issuerExt":"Bank","label":"bob","secret":[49,50,51],"type":"HOTP"}</string>
</map>
"#;

    fn importer(data: &str) -> Box<dyn DatabaseImporter> {
        find("FreeOTP")
            .unwrap()
            .create(Cursor::new(data.as_bytes().to_vec()))
    }

    fn convert(data: &str) -> ImportResult {
        let mut imp = importer(data);
        imp.parse().unwrap();
        assert!(!imp.is_encrypted());
        imp.convert().unwrap()
    }

    #[test]
    fn maps_tokens_and_skips_token_order() {
        let result = convert(TOKENS);
        assert!(result.failures.is_empty());
        assert_eq!(result.entries.len(), 2);

        let github = &result.entries[0];
        assert_eq!(github.issuer, "GitHub");
        assert_eq!(github.name, "alice");
        assert_eq!(github.info.secret(), b"Hello!\xde\xad\xbe\xef");
        assert_eq!(github.info.period(), Some(30));

        let bank = &result.entries[1];
        assert_eq!(bank.info.type_tag(), "hotp");
        assert_eq!(bank.info.counter(), Some(7));
        assert_eq!(bank.info.algorithm(), Algorithm::Sha256);
        assert_eq!(bank.info.digits(), 8);
    }

    #[test]
    fn absent_fields_default() {
        let xml = r#"<map><string name="k">{"label":"x","secret":[1,2,3],"type":"TOTP"}</string></map>"#;
        let entry = &convert(xml).entries[0];
        assert_eq!(entry.info.algorithm(), Algorithm::Sha1);
        assert_eq!(entry.info.digits(), 6);
        assert_eq!(entry.info.period(), Some(30));
        assert_eq!(entry.issuer, "");
    }

    #[test]
    fn escaped_json_is_unescaped() {
        let xml = r#"<map><string name="k">{&quot;label&quot;:&quot;a&amp;b&quot;,&quot;secret&quot;:[1],&quot;type&quot;:&quot;TOTP&quot;}</string></map>"#;
        assert_eq!(convert(xml).entries[0].name, "a&b");
    }

    #[test]
    fn bad_tokens_are_reported_per_record() {
        let xml = r#"<map>
            <string name="ok">{"label":"ok","secret":[1],"type":"TOTP"}</string>
            <string name="broken">{"label":</string>
            <string name="range">{"label":"range","secret":[300],"type":"TOTP"}</string>
            <string name="kind">{"label":"kind","secret":[1],"type":"MOTP"}</string>
        </map>"#;
        let result = convert(xml);
        assert_eq!(result.entries.len(), 1);

        let labels: Vec<_> = result.failures.iter().map(|f| (f.index, f.label.as_str())).collect();
        assert_eq!(labels, [(1, "broken"), (2, "range"), (3, "kind")]);
        assert!(matches!(
            result.failures[0].error,
            EntryError::Format(FormatError::Json(_))
        ));
        assert!(matches!(
            result.failures[1].error,
            EntryError::OtpInfo(OtpInfoError::InvalidField("secret"))
        ));
        assert!(matches!(
            result.failures[2].error,
            EntryError::OtpInfo(OtpInfoError::UnknownType(_))
        ));
    }

    #[test]
    fn internal_issuer_is_used_for_entries_and_failures() {
        let xml = r#"<map>
            <string name="a">{"issuerInt":"Corp","label":"ok","secret":[1],"type":"TOTP"}</string>
            <string name="b">{"issuerInt":"Corp","label":"bad","secret":[1],"type":"MOTP"}</string>
            <string name="c">{"issuerExt":"Ext","issuerInt":"Corp","label":"both","secret":[2],"type":"TOTP"}</string>
        </map>"#;
        let result = convert(xml);
        assert_eq!(result.entries[0].issuer, "Corp");
        assert_eq!(result.entries[1].issuer, "Ext");
        assert_eq!(result.failures[0].label, "Corp / bad");
    }

    #[test]
    fn malformed_xml_fails_parse() {
        let truncated = &TOKENS[..TOKENS.len() / 2];
        for data in [truncated, "", "<prefs></prefs>", "<map><string>{}</string></map>"] {
            let mut imp = importer(data);
            assert!(
                matches!(imp.parse(), Err(ImporterError::Schema { .. })),
                "accepted {data:?}"
            );
        }
    }

    #[test]
    fn empty_map_has_no_entries() {
        let result = convert("<map />");
        assert!(result.entries.is_empty());
        assert!(result.failures.is_empty());
    }
}
