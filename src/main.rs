use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand};
use uuid::Uuid;

use otpvault::config::Config;
use otpvault::entry::DatabaseEntry;
use otpvault::importers::{self, ImportResult};
use otpvault::prompt::{prompt_credentials, prompt_string};
use otpvault::store::{Database, load_or_create, save_database};

#[derive(Parser, Debug)]
#[command(name = "otpvault", version, about = "OTP vault with importers for other authenticator apps")]
struct Cli {
    /// Database file (defaults to the one in the config file)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List the supported import formats
    Formats,

    /// Import a backup made by another app
    ///
    /// Examples:
    ///   otpvault import andOTP otp_accounts.json
    ///   otpvault import aegis aegis-export.json
    Import {
        /// Format name, see `otpvault formats`
        format: String,
        /// Backup file
        file: PathBuf,
    },

    /// List entries
    List,

    /// Show the current code of an entry
    ///
    /// QUERY matches issuer, name, or the start of the uuid.
    Code { query: String },

    /// Print the otpauth:// URI of an entry
    Uri { query: String },

    /// Add an entry from an otpauth:// URI (asks for it when omitted)
    AddUri { uri: Option<String> },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let db_path = match cli.db {
        Some(path) => path,
        None => Config::load()?.database,
    };

    match cli.command {
        Commands::Formats => cmd_formats(),
        Commands::Import { format, file } => cmd_import(&db_path, &format, &file)?,
        Commands::List => cmd_list(&db_path)?,
        Commands::Code { query } => cmd_code(&db_path, &query)?,
        Commands::Uri { query } => cmd_uri(&db_path, &query)?,
        Commands::AddUri { uri } => cmd_add_uri(&db_path, uri)?,
    }

    Ok(())
}

fn cmd_formats() {
    for kind in importers::registry() {
        println!("{}", kind.name);
    }
}

fn cmd_import(db_path: &Path, format: &str, file: &Path) -> anyhow::Result<()> {
    let kind = importers::find(format).ok_or_else(|| {
        let names: Vec<_> = importers::registry().iter().map(|k| k.name).collect();
        anyhow!("unknown format '{format}', expected one of: {}", names.join(", "))
    })?;

    let reader = File::open(file).with_context(|| format!("cannot open {}", file.display()))?;
    let mut importer = kind.create(BufReader::new(reader));

    importer.parse()?;
    if importer.is_encrypted() {
        importer.set_credentials(prompt_credentials(kind.name)?);
    }
    let ImportResult { entries, failures } = importer.convert()?;

    for failure in &failures {
        eprintln!(
            "skipped record {} ({}): {}",
            failure.index, failure.label, failure.error
        );
    }

    let mut db = load_or_create(db_path)?;
    let summary = db.merge(entries);
    save_database(db_path, &db)?;

    println!(
        "Imported {} entries from {} ({} already present, {} skipped)",
        summary.added,
        kind.name,
        summary.duplicates,
        failures.len()
    );
    Ok(())
}

fn cmd_list(db_path: &Path) -> anyhow::Result<()> {
    let db = load_or_create(db_path)?;
    for e in db.entries() {
        println!(
            "{}  {:<20} {:<24} {:<6} {}",
            short_uuid(e.uuid()),
            e.issuer,
            e.name,
            e.info.type_tag(),
            e.group.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn cmd_code(db_path: &Path, query: &str) -> anyhow::Result<()> {
    let mut db = load_or_create(db_path)?;
    let uuid = find_entry(&db, query)?.uuid();
    let entry = db
        .get_mut(uuid)
        .ok_or_else(|| anyhow!("entry {uuid} disappeared"))?;

    let code = entry.info.generate_current()?;

    // every HOTP code shown is used up
    if entry.info.advance() {
        save_database(db_path, &db)?;
        println!("{}", split_code(&code));
        return Ok(());
    }

    let now_ms = SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis() as u64;
    match entry.info.millis_till_next_rotation(now_ms) {
        Some(ms) => println!("{}  ({}s left)", split_code(&code), ms.div_ceil(1000)),
        None => println!("{}", split_code(&code)),
    }
    Ok(())
}

fn cmd_uri(db_path: &Path, query: &str) -> anyhow::Result<()> {
    let db = load_or_create(db_path)?;
    let entry = find_entry(&db, query)?;
    println!("{}", entry.to_uri()?);
    Ok(())
}

fn cmd_add_uri(db_path: &Path, uri: Option<String>) -> anyhow::Result<()> {
    let uri = match uri {
        Some(uri) => uri,
        None => prompt_string("otpauth:// URI: ")?,
    };
    let entry = DatabaseEntry::from_uri(uri.trim()).context("cannot add entry")?;

    let mut db = load_or_create(db_path)?;
    let summary = db.merge([entry]);
    if summary.added == 0 {
        println!("Entry already present");
        return Ok(());
    }
    save_database(db_path, &db)?;
    println!("Added entry");
    Ok(())
}

fn find_entry<'a>(db: &'a Database, query: &str) -> anyhow::Result<&'a DatabaseEntry> {
    let q = query.to_lowercase();
    let matches: Vec<_> = db
        .entries()
        .iter()
        .filter(|e| {
            e.issuer.to_lowercase().contains(&q)
                || e.name.to_lowercase().contains(&q)
                || e.uuid().to_string().starts_with(&q)
        })
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("no entry matches '{query}'")),
        [entry] => Ok(*entry),
        many => {
            let names: Vec<_> = many
                .iter()
                .map(|e| format!("{} {} / {}", short_uuid(e.uuid()), e.issuer, e.name))
                .collect();
            Err(anyhow!(
                "'{query}' matches {} entries:\n  {}",
                many.len(),
                names.join("\n  ")
            ))
        }
    }
}

fn short_uuid(uuid: Uuid) -> String {
    uuid.to_string()[..8].to_string()
}

/// "123456" -> "123 456"
fn split_code(code: &str) -> String {
    let mid = code.len() / 2;
    match (code.get(..mid), code.get(mid..)) {
        (Some(a), Some(b)) if code.len() >= 6 => format!("{a} {b}"),
        _ => code.to_string(),
    }
}
