use std::io::Cursor;

use otpvault::importers::{self, Credentials, ImportResult};
use otpvault::store::{self, Database};
use otpvault::{Algorithm, DatabaseEntry, OtpInfo};
use serde_json::json;

const ANDOTP: &str = r#"[
    {"secret":"JBSWY3DPEHPK3PXP","issuer":"GitHub","label":"alice","digits":6,"type":"TOTP","algorithm":"SHA1","period":30,"tags":["work"]},
    {"secret":"GEZDGNBVGY3TQOJQGEZDGNBVGY3TQOJQ","issuer":"","label":"Bank - bob","digits":6,"type":"HOTP","algorithm":"SHA1","counter":0,"tags":[]},
    {"secret":"JBSWY3DPEHPK3PXP","label":"broken","type":"YUBICO"}
]"#;

fn import(format: &str, data: Vec<u8>, password: Option<&str>) -> ImportResult {
    let kind = importers::find(format).expect("registered format");
    let mut importer = kind.create(Cursor::new(data));
    importer.parse().expect("parse");
    if importer.is_encrypted() {
        let password = password.expect("password for encrypted export");
        importer.set_credentials(Credentials::password(password));
    }
    importer.convert().expect("convert")
}

#[test]
fn registry_lists_every_format() {
    let names: Vec<_> = importers::registry().iter().map(|k| k.name).collect();
    assert_eq!(names, ["Aegis", "andOTP", "FreeOTP"]);
}

#[test]
fn andotp_import_merges_and_reimport_is_deduplicated() {
    let result = import("andotp", ANDOTP.as_bytes().to_vec(), None);
    assert_eq!(result.entries.len(), 2);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].index, 2);

    let mut db = Database::new();
    let first = db.merge(result.entries);
    assert_eq!(first.added, 2);

    // every import hands out fresh uuids, the content decides
    let again = import("andOTP", ANDOTP.as_bytes().to_vec(), None);
    let second = db.merge(again.entries);
    assert_eq!(second.added, 0);
    assert_eq!(second.duplicates, 2);
    assert_eq!(db.len(), 2);
}

#[test]
fn imported_hotp_generates_rfc4226_codes() {
    let result = import("andOTP", ANDOTP.as_bytes().to_vec(), None);
    let mut bank = result
        .entries
        .into_iter()
        .find(|e| e.issuer == "Bank")
        .unwrap();
    assert_eq!(bank.name, "bob");

    assert_eq!(bank.info.generate(0), "755224");
    assert!(bank.info.advance());
    assert_eq!(bank.info.generate(0), "287082");
}

#[test]
fn aegis_export_keeps_identity_and_reads_base32_secrets() {
    let info = OtpInfo::totp(b"Hello!\xde\xad\xbe\xef".to_vec(), Algorithm::Sha1, 6, 30).unwrap();
    let mut entry = DatabaseEntry::with_name(info, "alice", "GitHub");
    entry.group = Some("work".into());

    let mut exported = entry.to_json();
    exported["info"]["secret"] = json!("JBSWY3DPEHPK3PXP");
    let export = json!({
        "version": 1,
        "header": { "slots": null, "params": null },
        "db": { "version": 2, "entries": [exported] },
    });
    let result = import("Aegis", serde_json::to_vec(&export).unwrap(), None);
    assert!(result.failures.is_empty());
    assert_eq!(result.entries, [entry]);
}

#[test]
fn freeotp_and_andotp_agree_on_the_same_account() {
    let xml = r#"<map><string name="GitHub:alice">{"algo":"SHA1","digits":6,"issuerExt":"GitHub","label":"alice","period":30,"secret":[72,101,108,108,111,33,-34,-83,-66,-17],"type":"TOTP"}</string></map>"#;
    let freeotp = import("FreeOTP", xml.as_bytes().to_vec(), None);
    let andotp = import("andOTP", ANDOTP.as_bytes().to_vec(), None);

    let mut db = Database::new();
    db.merge(andotp.entries);
    let summary = db.merge(freeotp.entries);
    assert_eq!(summary.duplicates, 1);
}

#[test]
fn database_file_roundtrip_after_import() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("database.json");

    let mut db = store::load_or_create(&path).unwrap();
    db.merge(import("andOTP", ANDOTP.as_bytes().to_vec(), None).entries);
    store::save_database(&path, &db).unwrap();

    let loaded = store::load_database(&path).unwrap();
    assert_eq!(loaded, db);
    assert_eq!(loaded.entries()[0].group.as_deref(), Some("work"));
}

#[test]
fn entries_survive_otpauth_uris() {
    let result = import("andOTP", ANDOTP.as_bytes().to_vec(), None);
    for entry in &result.entries {
        let uri = entry.to_uri().unwrap();
        let back = DatabaseEntry::from_uri(&uri).unwrap();
        assert_eq!(back.info, entry.info);
        assert_eq!(back.name, entry.name);
        assert_eq!(back.issuer, entry.issuer);
    }
}
