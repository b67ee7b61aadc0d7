use std::fmt;
use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};

use serde_json::{Map, Value, json};
use totp_rs::TOTP;

use crate::codec;
use crate::error::OtpInfoError;

pub const DEFAULT_DIGITS: u32 = 6;
pub const DEFAULT_PERIOD: u32 = 30;
pub const STEAM_DIGITS: u32 = 5;

/// Codes are truncated with `10^digits`, which must fit in a u32.
pub const MAX_DIGITS: u32 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Algorithm {
    #[default]
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Sha1 => "SHA1",
            Algorithm::Sha256 => "SHA256",
            Algorithm::Sha512 => "SHA512",
        }
    }

    /// Case-insensitive; `SHA-256` style names are accepted too.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_uppercase().replace('-', "").as_str() {
            "SHA1" => Some(Algorithm::Sha1),
            "SHA256" => Some(Algorithm::Sha256),
            "SHA512" => Some(Algorithm::Sha512),
            _ => None,
        }
    }

    fn to_totp(self) -> totp_rs::Algorithm {
        match self {
            Algorithm::Sha1 => totp_rs::Algorithm::SHA1,
            Algorithm::Sha256 => totp_rs::Algorithm::SHA256,
            Algorithm::Sha512 => totp_rs::Algorithm::SHA512,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parameters needed to compute one-time codes for a credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OtpInfo {
    Totp {
        secret: Vec<u8>,
        algorithm: Algorithm,
        digits: u32,
        period: u32,
    },
    Hotp {
        secret: Vec<u8>,
        algorithm: Algorithm,
        digits: u32,
        counter: u64,
    },
    Steam {
        secret: Vec<u8>,
        algorithm: Algorithm,
        digits: u32,
        period: u32,
    },
}

type VariantParser = fn(Common, &Map<String, Value>) -> Result<OtpInfo, OtpInfoError>;

/// Type tag -> parser. Tags not listed here are rejected.
const VARIANTS: &[(&str, VariantParser)] = &[
    ("totp", parse_totp),
    ("hotp", parse_hotp),
    ("steam", parse_steam),
];

struct Common {
    secret: Vec<u8>,
    algorithm: Algorithm,
    digits: u32,
}

impl OtpInfo {
    pub fn totp(
        secret: Vec<u8>,
        algorithm: Algorithm,
        digits: u32,
        period: u32,
    ) -> Result<Self, OtpInfoError> {
        check_common(&secret, digits)?;
        check_period(period)?;
        Ok(OtpInfo::Totp {
            secret,
            algorithm,
            digits,
            period,
        })
    }

    pub fn hotp(
        secret: Vec<u8>,
        algorithm: Algorithm,
        digits: u32,
        counter: u64,
    ) -> Result<Self, OtpInfoError> {
        check_common(&secret, digits)?;
        Ok(OtpInfo::Hotp {
            secret,
            algorithm,
            digits,
            counter,
        })
    }

    pub fn steam(secret: Vec<u8>) -> Result<Self, OtpInfoError> {
        check_common(&secret, STEAM_DIGITS)?;
        Ok(OtpInfo::Steam {
            secret,
            algorithm: Algorithm::Sha1,
            digits: STEAM_DIGITS,
            period: DEFAULT_PERIOD,
        })
    }

    pub fn type_tag(&self) -> &'static str {
        match self {
            OtpInfo::Totp { .. } => "totp",
            OtpInfo::Hotp { .. } => "hotp",
            OtpInfo::Steam { .. } => "steam",
        }
    }

    pub fn secret(&self) -> &[u8] {
        match self {
            OtpInfo::Totp { secret, .. }
            | OtpInfo::Hotp { secret, .. }
            | OtpInfo::Steam { secret, .. } => secret,
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        match self {
            OtpInfo::Totp { algorithm, .. }
            | OtpInfo::Hotp { algorithm, .. }
            | OtpInfo::Steam { algorithm, .. } => *algorithm,
        }
    }

    pub fn digits(&self) -> u32 {
        match self {
            OtpInfo::Totp { digits, .. }
            | OtpInfo::Hotp { digits, .. }
            | OtpInfo::Steam { digits, .. } => *digits,
        }
    }

    /// `None` for counter-based parameters.
    pub fn period(&self) -> Option<u32> {
        match self {
            OtpInfo::Totp { period, .. } | OtpInfo::Steam { period, .. } => Some(*period),
            OtpInfo::Hotp { .. } => None,
        }
    }

    pub fn counter(&self) -> Option<u64> {
        match self {
            OtpInfo::Hotp { counter, .. } => Some(*counter),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        let mut obj = json!({
            "algo": self.algorithm().name(),
            "secret": codec::encode(self.secret()),
            "digits": self.digits(),
        });
        match self {
            OtpInfo::Totp { period, .. } | OtpInfo::Steam { period, .. } => {
                obj["period"] = json!(period);
            }
            OtpInfo::Hotp { counter, .. } => {
                obj["counter"] = json!(counter);
            }
        }
        obj
    }

    pub fn from_json(type_tag: &str, value: &Value) -> Result<Self, OtpInfoError> {
        let (_, parser) = VARIANTS
            .iter()
            .find(|(tag, _)| *tag == type_tag)
            .ok_or_else(|| OtpInfoError::UnknownType(type_tag.to_string()))?;

        let obj = value.as_object().ok_or(OtpInfoError::InvalidField("info"))?;

        let secret = match obj.get("secret") {
            None | Some(Value::Null) => return Err(OtpInfoError::MissingField("secret")),
            Some(Value::String(s)) if s.is_empty() => return Err(OtpInfoError::EmptySecret),
            Some(Value::String(s)) => codec::decode(s).map_err(OtpInfoError::Secret)?,
            Some(_) => return Err(OtpInfoError::InvalidField("secret")),
        };

        let algorithm = match obj.get("algo") {
            None | Some(Value::Null) => return Err(OtpInfoError::MissingField("algo")),
            Some(Value::String(s)) => {
                Algorithm::from_name(s).ok_or_else(|| OtpInfoError::UnknownAlgorithm(s.clone()))?
            }
            Some(_) => return Err(OtpInfoError::InvalidField("algo")),
        };

        let digits = int_field(obj, "digits")?;
        let digits = u32::try_from(digits).map_err(|_| OtpInfoError::InvalidDigits(digits))?;
        check_common(&secret, digits)?;

        parser(
            Common {
                secret,
                algorithm,
                digits,
            },
            obj,
        )
    }

    /// Current code for time-based parameters, or the code for the current
    /// counter value of HOTP parameters. Never mutates.
    pub fn generate(&self, unix_time: u64) -> String {
        match self {
            OtpInfo::Totp {
                secret,
                algorithm,
                digits,
                period,
            } => TOTP::new_unchecked(
                algorithm.to_totp(),
                *digits as usize,
                1,
                u64::from(*period),
                secret.clone(),
            )
            .generate(unix_time),
            // HOTP is TOTP with a one-second step evaluated at t = counter.
            OtpInfo::Hotp {
                secret,
                algorithm,
                digits,
                counter,
            } => TOTP::new_unchecked(algorithm.to_totp(), *digits as usize, 0, 1, secret.clone())
                .generate(*counter),
            OtpInfo::Steam {
                secret,
                digits,
                period,
                ..
            } => TOTP::new_unchecked(
                totp_rs::Algorithm::Steam,
                *digits as usize,
                1,
                u64::from(*period),
                secret.clone(),
            )
            .generate(unix_time),
        }
    }

    pub fn generate_current(&self) -> Result<String, SystemTimeError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        Ok(self.generate(now))
    }

    /// Moves an HOTP counter forward. Returns `false` for time-based
    /// parameters, which have nothing to advance. The caller must persist
    /// the entry afterwards.
    pub fn advance(&mut self) -> bool {
        match self {
            OtpInfo::Hotp { counter, .. } => {
                *counter = counter.saturating_add(1);
                true
            }
            _ => false,
        }
    }

    pub fn millis_till_next_rotation(&self, unix_millis: u64) -> Option<u64> {
        let period_ms = u64::from(self.period()?) * 1000;
        Some(period_ms - unix_millis % period_ms)
    }
}

fn parse_totp(c: Common, obj: &Map<String, Value>) -> Result<OtpInfo, OtpInfoError> {
    let period = period_field(obj)?;
    Ok(OtpInfo::Totp {
        secret: c.secret,
        algorithm: c.algorithm,
        digits: c.digits,
        period,
    })
}

// steam codes are always HMAC-SHA1, anything else would be silently ignored
fn parse_steam(c: Common, obj: &Map<String, Value>) -> Result<OtpInfo, OtpInfoError> {
    if c.algorithm != Algorithm::Sha1 {
        return Err(OtpInfoError::InvalidField("algo"));
    }
    let period = period_field(obj)?;
    Ok(OtpInfo::Steam {
        secret: c.secret,
        algorithm: c.algorithm,
        digits: c.digits,
        period,
    })
}

fn parse_hotp(c: Common, obj: &Map<String, Value>) -> Result<OtpInfo, OtpInfoError> {
    let counter = match obj.get("counter") {
        None | Some(Value::Null) => return Err(OtpInfoError::MissingField("counter")),
        Some(v) => match (v.as_u64(), v.as_i64()) {
            (Some(n), _) => n,
            (None, Some(n)) => return Err(OtpInfoError::InvalidCounter(n)),
            _ => return Err(OtpInfoError::InvalidField("counter")),
        },
    };
    Ok(OtpInfo::Hotp {
        secret: c.secret,
        algorithm: c.algorithm,
        digits: c.digits,
        counter,
    })
}

fn period_field(obj: &Map<String, Value>) -> Result<u32, OtpInfoError> {
    let period = int_field(obj, "period")?;
    let period = u32::try_from(period).map_err(|_| OtpInfoError::InvalidPeriod(period))?;
    check_period(period)?;
    Ok(period)
}

fn int_field(obj: &Map<String, Value>, name: &'static str) -> Result<i64, OtpInfoError> {
    match obj.get(name) {
        None | Some(Value::Null) => Err(OtpInfoError::MissingField(name)),
        Some(v) => v.as_i64().ok_or(OtpInfoError::InvalidField(name)),
    }
}

fn check_common(secret: &[u8], digits: u32) -> Result<(), OtpInfoError> {
    if secret.is_empty() {
        return Err(OtpInfoError::EmptySecret);
    }
    if digits == 0 || digits > MAX_DIGITS {
        return Err(OtpInfoError::InvalidDigits(i64::from(digits)));
    }
    Ok(())
}

fn check_period(period: u32) -> Result<(), OtpInfoError> {
    if period == 0 {
        return Err(OtpInfoError::InvalidPeriod(0));
    }
    Ok(())
}
