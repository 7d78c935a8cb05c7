use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

static CLIENT_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{10}$").expect("client id pattern"));

/// Field values keyed by `<kind>_<itemId>`.
pub type Fields = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClientId(String);

impl ClientId {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if !CLIENT_ID_RE.is_match(trimmed) {
            return Err(Error::InvalidClientId(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClientId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ClientId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ClientId> for String {
    fn from(id: ClientId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldKind {
    /// Approval verdict for an item.
    Aprobado,
    /// Evidence text (rich markup) for an item.
    Evidencias,
}

impl FieldKind {
    pub const ALL: [FieldKind; 2] = [FieldKind::Aprobado, FieldKind::Evidencias];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aprobado => "aprobado",
            Self::Evidencias => "evidencias",
        }
    }
}

impl FromStr for FieldKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aprobado" => Ok(Self::Aprobado),
            "evidencias" => Ok(Self::Evidencias),
            other => Err(Error::msg(format!(
                "unknown field kind '{other}' (expected aprobado or evidencias)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldKey {
    pub kind: FieldKind,
    pub item_id: u32,
}

impl FieldKey {
    pub fn new(kind: FieldKind, item_id: u32) -> Self {
        Self { kind, item_id }
    }

    pub fn aprobado(item_id: u32) -> Self {
        Self::new(FieldKind::Aprobado, item_id)
    }

    pub fn evidencias(item_id: u32) -> Self {
        Self::new(FieldKind::Evidencias, item_id)
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.kind.as_str(), self.item_id)
    }
}

impl FromStr for FieldKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (kind, id) = s
            .rsplit_once('_')
            .ok_or_else(|| Error::msg(format!("invalid field key '{s}'")))?;
        let kind = kind.parse::<FieldKind>()?;
        let item_id = id
            .parse::<u32>()
            .ok()
            .filter(|id| *id > 0)
            .ok_or_else(|| Error::msg(format!("invalid item id in field key '{s}'")))?;
        Ok(Self { kind, item_id })
    }
}

/// In-memory view of one client's answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientRecord {
    pub client_id: ClientId,
    pub fields: Fields,
    pub revision: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ClientRecord {
    pub fn empty(client_id: ClientId) -> Self {
        Self {
            client_id,
            fields: Fields::new(),
            revision: None,
            updated_at: Utc::now(),
        }
    }
}

/// Document stored at `avances/<clientId>.json` in the remote repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePayload {
    #[serde(rename = "numeroCliente", default)]
    pub client_id: String,
    #[serde(default, deserialize_with = "lenient_fields")]
    pub avances: Fields,
    #[serde(
        rename = "fechaActualizacion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<String>,
}

impl RemotePayload {
    pub fn new(client_id: &ClientId, fields: &Fields) -> Self {
        Self {
            client_id: client_id.to_string(),
            avances: fields.clone(),
            updated_at: Some(iso_timestamp(Utc::now())),
        }
    }
}

// Null entries are dropped and non-string scalars kept as their JSON text.
fn lenient_fields<'de, D>(de: D) -> std::result::Result<Fields, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, serde_json::Value>>::deserialize(de)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .filter_map(|(k, v)| match v {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some((k, s)),
            other => Some((k, other.to_string())),
        })
        .collect())
}

pub fn iso_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}
