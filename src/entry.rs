use serde_json::{Value, json};
use uuid::Uuid;

use crate::codec;
use crate::error::{EntryResult, FormatError, OtpInfoError};
use crate::otp::OtpInfo;
use crate::otpauth::KeyUri;

/// A single credential as stored in the vault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseEntry {
    uuid: Uuid,
    pub name: String,
    pub issuer: String,
    pub group: Option<String>,
    pub icon: Option<Vec<u8>>,
    pub info: OtpInfo,
}

impl DatabaseEntry {
    pub fn new(info: OtpInfo) -> Self {
        Self::with_uuid(Uuid::new_v4(), info)
    }

    /// Used by importers that already know the account name and issuer.
    pub fn with_name(info: OtpInfo, name: impl Into<String>, issuer: impl Into<String>) -> Self {
        let mut entry = Self::new(info);
        entry.name = name.into();
        entry.issuer = issuer.into();
        entry
    }

    pub fn from_uri(uri: &str) -> Result<Self, OtpInfoError> {
        let KeyUri { info, name, issuer } = KeyUri::parse(uri)?;
        Ok(Self::with_name(info, name, issuer))
    }

    fn with_uuid(uuid: Uuid, info: OtpInfo) -> Self {
        DatabaseEntry {
            uuid,
            name: String::new(),
            issuer: String::new(),
            group: None,
            icon: None,
            info,
        }
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Gives the entry a new identity, e.g. when it collides with an entry of
    /// another vault during a merge.
    pub fn reset_uuid(&mut self) {
        self.uuid = Uuid::new_v4();
    }

    pub fn to_uri(&self) -> Result<String, OtpInfoError> {
        KeyUri {
            info: self.info.clone(),
            name: self.name.clone(),
            issuer: self.issuer.clone(),
        }
        .to_uri()
    }

    pub fn to_json(&self) -> Value {
        json!({
            "type": self.info.type_tag(),
            "uuid": self.uuid.to_string(),
            "name": self.name,
            "issuer": self.issuer,
            "group": self.group,
            "icon": self.icon.as_deref().map(codec::encode),
            "info": self.info.to_json(),
        })
    }

    pub fn from_json(value: &Value) -> EntryResult<Self> {
        let obj = value.as_object().ok_or(FormatError::InvalidField("entry"))?;

        // older exports carry no identity; give them one
        let uuid = match obj.get("uuid") {
            None => Uuid::new_v4(),
            Some(Value::String(s)) => Uuid::parse_str(s).map_err(FormatError::from)?,
            Some(_) => return Err(FormatError::InvalidField("uuid").into()),
        };

        let type_tag = match obj.get("type") {
            None | Some(Value::Null) => return Err(FormatError::MissingField("type").into()),
            Some(Value::String(s)) => s.as_str(),
            Some(_) => return Err(FormatError::InvalidField("type").into()),
        };
        let info = obj.get("info").ok_or(FormatError::MissingField("info"))?;
        let info = OtpInfo::from_json(type_tag, info)?;

        let mut entry = Self::with_uuid(uuid, info);
        entry.name = optional_string(obj.get("name"), "name")?.unwrap_or_default();
        entry.issuer = optional_string(obj.get("issuer"), "issuer")?.unwrap_or_default();
        entry.group = optional_string(obj.get("group"), "group")?;
        entry.icon = match optional_string(obj.get("icon"), "icon")? {
            Some(text) => Some(codec::decode(&text)?),
            None => None,
        };

        Ok(entry)
    }

    pub fn from_json_str(s: &str) -> EntryResult<Self> {
        let value: Value = serde_json::from_str(s).map_err(FormatError::from)?;
        Self::from_json(&value)
    }
}

/// Absent and JSON null both mean "not set".
fn optional_string(value: Option<&Value>, field: &'static str) -> Result<Option<String>, FormatError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(FormatError::InvalidField(field)),
    }
}
