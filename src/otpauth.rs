//! `otpauth://` key URIs, the format QR codes and most authenticator apps
//! use to hand over a single credential:
//!
//! `otpauth://totp/ISSUER:NAME?secret=BASE32&issuer=ISSUER&algorithm=SHA1&digits=6&period=30`

use percent_encoding::percent_decode_str;
use url::Url;

use crate::codec;
use crate::error::OtpInfoError;
use crate::otp::{Algorithm, DEFAULT_DIGITS, DEFAULT_PERIOD, OtpInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUri {
    pub info: OtpInfo,
    pub name: String,
    pub issuer: String,
}

impl KeyUri {
    pub fn parse(input: &str) -> Result<Self, OtpInfoError> {
        let url = Url::parse(input.trim()).map_err(|e| OtpInfoError::Uri(e.to_string()))?;

        if url.scheme() != "otpauth" {
            return Err(OtpInfoError::Uri(format!(
                "unsupported scheme '{}'",
                url.scheme()
            )));
        }

        let kind = url.host_str().unwrap_or("").to_lowercase();

        let label = percent_decode(url.path().trim_start_matches('/'))?;
        let (label_issuer, name) = match label.split_once(':') {
            Some((issuer, name)) => (issuer.trim().to_string(), name.trim().to_string()),
            None => (String::new(), label.trim().to_string()),
        };

        let mut secret: Option<String> = None;
        let mut issuer: Option<String> = None;
        let mut algo: Option<String> = None;
        let mut digits: Option<String> = None;
        let mut period: Option<String> = None;
        let mut counter: Option<String> = None;

        for (k, v) in url.query_pairs() {
            match k.as_ref() {
                "secret" => secret = Some(v.to_string()),
                "issuer" => issuer = Some(v.to_string()),
                "algorithm" => algo = Some(v.to_string()),
                "digits" => digits = Some(v.to_string()),
                "period" => period = Some(v.to_string()),
                "counter" => counter = Some(v.to_string()),
                _ => {}
            }
        }

        let secret = secret.ok_or(OtpInfoError::MissingField("secret"))?;
        if secret.is_empty() {
            return Err(OtpInfoError::EmptySecret);
        }
        let secret = codec::decode_base32(&secret).map_err(OtpInfoError::Secret)?;

        let algorithm = match algo {
            Some(a) => Algorithm::from_name(&a).ok_or(OtpInfoError::UnknownAlgorithm(a))?,
            None => Algorithm::Sha1,
        };

        let info = match kind.as_str() {
            "totp" => OtpInfo::totp(
                secret,
                algorithm,
                parse_num(digits, "digits", DEFAULT_DIGITS)?,
                parse_num(period, "period", DEFAULT_PERIOD)?,
            )?,
            "hotp" => {
                let counter = counter.ok_or(OtpInfoError::MissingField("counter"))?;
                let counter = counter
                    .parse::<u64>()
                    .map_err(|_| OtpInfoError::InvalidField("counter"))?;
                OtpInfo::hotp(
                    secret,
                    algorithm,
                    parse_num(digits, "digits", DEFAULT_DIGITS)?,
                    counter,
                )?
            }
            "steam" => OtpInfo::steam(secret)?,
            other => return Err(OtpInfoError::UnknownType(other.to_string())),
        };

        Ok(KeyUri {
            info,
            name,
            issuer: issuer.unwrap_or(label_issuer),
        })
    }

    pub fn to_uri(&self) -> Result<String, OtpInfoError> {
        let mut url = Url::parse(&format!("otpauth://{}/", self.info.type_tag()))
            .map_err(|e| OtpInfoError::Uri(e.to_string()))?;

        if self.issuer.is_empty() {
            url.set_path(&format!("/{}", self.name));
        } else {
            url.set_path(&format!("/{}:{}", self.issuer, self.name));
        }

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("secret", &codec::encode_base32(self.info.secret()));
            if !self.issuer.is_empty() {
                query.append_pair("issuer", &self.issuer);
            }
            if !matches!(self.info, OtpInfo::Steam { .. }) {
                query.append_pair("algorithm", self.info.algorithm().name());
                query.append_pair("digits", &self.info.digits().to_string());
            }
            match &self.info {
                OtpInfo::Totp { period, .. } | OtpInfo::Steam { period, .. } => {
                    query.append_pair("period", &period.to_string());
                }
                OtpInfo::Hotp { counter, .. } => {
                    query.append_pair("counter", &counter.to_string());
                }
            }
        }

        Ok(url.to_string())
    }
}

fn parse_num(value: Option<String>, field: &'static str, default: u32) -> Result<u32, OtpInfoError> {
    match value {
        None => Ok(default),
        Some(v) => v.parse().map_err(|_| OtpInfoError::InvalidField(field)),
    }
}

fn percent_decode(s: &str) -> Result<String, OtpInfoError> {
    percent_decode_str(s)
        .decode_utf8()
        .map(|label| label.into_owned())
        .map_err(|e| OtpInfoError::Uri(format!("label is not utf-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_totp_with_issuer_prefix() {
        let uri = KeyUri::parse(
            "otpauth://totp/ACME%20Co:john@example.com?secret=JBSWY3DPEHPK3PXP&issuer=ACME%20Co&algorithm=SHA256&digits=8&period=60",
        )
        .unwrap();
        assert_eq!(uri.issuer, "ACME Co");
        assert_eq!(uri.name, "john@example.com");
        assert_eq!(uri.info.algorithm(), Algorithm::Sha256);
        assert_eq!(uri.info.digits(), 8);
        assert_eq!(uri.info.period(), Some(60));
        assert_eq!(uri.info.secret(), b"Hello!\xde\xad\xbe\xef");
    }

    #[test]
    fn applies_defaults() {
        let uri = KeyUri::parse("otpauth://totp/alice?secret=JBSWY3DPEHPK3PXP").unwrap();
        assert_eq!(uri.issuer, "");
        assert_eq!(uri.name, "alice");
        assert_eq!(uri.info.algorithm(), Algorithm::Sha1);
        assert_eq!(uri.info.digits(), 6);
        assert_eq!(uri.info.period(), Some(30));
    }

    #[test]
    fn hotp_requires_counter() {
        assert!(matches!(
            KeyUri::parse("otpauth://hotp/alice?secret=JBSWY3DPEHPK3PXP"),
            Err(OtpInfoError::MissingField("counter"))
        ));
        let uri = KeyUri::parse("otpauth://hotp/alice?secret=JBSWY3DPEHPK3PXP&counter=7").unwrap();
        assert_eq!(uri.info.counter(), Some(7));
    }

    #[test]
    fn rejects_bad_input() {
        assert!(matches!(
            KeyUri::parse("https://totp/alice?secret=JBSWY3DPEHPK3PXP"),
            Err(OtpInfoError::Uri(_))
        ));
        assert!(matches!(
            KeyUri::parse("otpauth://motp/alice?secret=JBSWY3DPEHPK3PXP"),
            Err(OtpInfoError::UnknownType(_))
        ));
        assert!(matches!(
            KeyUri::parse("otpauth://totp/alice?secret="),
            Err(OtpInfoError::EmptySecret)
        ));
        assert!(matches!(
            KeyUri::parse("otpauth://totp/alice?secret=JBSWY3DPEHPK3PXP&digits=0"),
            Err(OtpInfoError::InvalidDigits(0))
        ));
        assert!(matches!(
            KeyUri::parse("otpauth://totp/%FF%FEalice?secret=JBSWY3DPEHPK3PXP"),
            Err(OtpInfoError::Uri(_))
        ));
    }

    #[test]
    fn formats_and_reparses() {
        let original = KeyUri {
            info: OtpInfo::hotp(b"Hello!\xde\xad\xbe\xef".to_vec(), Algorithm::Sha512, 7, 42)
                .unwrap(),
            name: "bob smith".to_string(),
            issuer: "Example".to_string(),
        };
        let text = original.to_uri().unwrap();
        assert!(text.starts_with("otpauth://hotp/Example:bob%20smith?"));
        assert!(text.contains("secret=JBSWY3DPEHPK3PXP"));
        assert_eq!(KeyUri::parse(&text).unwrap(), original);
    }
}
