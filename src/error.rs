use thiserror::Error;

/// Malformed base64/base32 text.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("invalid base32")]
    Base32,
}

/// Invalid or unrecognized OTP parameters.
#[derive(Debug, Error)]
pub enum OtpInfoError {
    #[error("unknown otp type '{0}'")]
    UnknownType(String),
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("field '{0}' has the wrong type")]
    InvalidField(&'static str),
    #[error("secret is empty")]
    EmptySecret,
    #[error("secret is not valid encoded text: {0}")]
    Secret(#[source] CodecError),
    #[error("invalid digit count {0}")]
    InvalidDigits(i64),
    #[error("unknown algorithm '{0}'")]
    UnknownAlgorithm(String),
    #[error("invalid period {0}")]
    InvalidPeriod(i64),
    #[error("invalid counter {0}")]
    InvalidCounter(i64),
    #[error("invalid otpauth uri: {0}")]
    Uri(String),
}

/// Entry-level shape problems: malformed uuid, missing or mistyped fields.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("invalid uuid: {0}")]
    InvalidUuid(#[from] uuid::Error),
    #[error("missing field '{0}'")]
    MissingField(&'static str),
    #[error("field '{0}' has the wrong type")]
    InvalidField(&'static str),
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
}

/// Anything that can go wrong while decoding a single entry.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error(transparent)]
    OtpInfo(#[from] OtpInfoError),
    #[error("icon: {0}")]
    Codec(#[from] CodecError),
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("unsupported database version {0}")]
    Version(u64),
    #[error("duplicate entry {0}")]
    DuplicateUuid(uuid::Uuid),
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("entry {index}: {source}")]
    Entry {
        index: usize,
        #[source]
        source: EntryError,
    },
}

#[derive(Debug, Error)]
pub enum ImporterError {
    #[error("{backend}: failed to read input: {source}")]
    Io {
        backend: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[error("{backend}: unexpected file format: {reason}")]
    Schema {
        backend: &'static str,
        reason: String,
    },
    #[error("{backend}: the file is encrypted and no password was supplied")]
    MissingCredentials { backend: &'static str },
    #[error("{backend}: unable to decrypt, wrong password?")]
    Decryption { backend: &'static str },
    #[error("{backend}: decrypted data is corrupt: {reason}")]
    Corrupt {
        backend: &'static str,
        reason: String,
    },
}

impl ImporterError {
    pub fn schema(backend: &'static str, reason: impl Into<String>) -> Self {
        ImporterError::Schema {
            backend,
            reason: reason.into(),
        }
    }

    pub fn corrupt(backend: &'static str, reason: impl Into<String>) -> Self {
        ImporterError::Corrupt {
            backend,
            reason: reason.into(),
        }
    }
}

pub type EntryResult<T> = Result<T, EntryError>;
pub type ImporterResult<T> = Result<T, ImporterError>;
