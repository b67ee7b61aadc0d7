//! One-time-password vault: the entry model, otp code generation and
//! importers for the backups of other authenticator apps.

pub mod codec;
pub mod config;
pub mod crypto;
pub mod entry;
pub mod error;
pub mod importers;
pub mod otp;
pub mod otpauth;
pub mod prompt;
pub mod store;

pub use entry::DatabaseEntry;
pub use otp::{Algorithm, OtpInfo};
pub use store::Database;
