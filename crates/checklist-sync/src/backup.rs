//! Downloadable backup files: base64 of `{ numeroCliente, avances }`.

use std::fs;
use std::path::Path;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::kv::atomic_write_text;
use crate::record::{ClientId, Fields};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub client_id: ClientId,
    pub fields: Fields,
}

#[derive(Serialize)]
struct BackupOut<'a> {
    #[serde(rename = "numeroCliente")]
    client_id: &'a str,
    avances: &'a Fields,
}

#[derive(Deserialize)]
struct BackupIn {
    #[serde(rename = "numeroCliente")]
    client_id: Option<String>,
    avances: Option<Fields>,
}

pub fn default_file_name(client_id: &ClientId) -> String {
    format!("avances_{client_id}.txt")
}

pub fn encode(client_id: &ClientId, fields: &Fields) -> Result<String> {
    let json = serde_json::to_string(&BackupOut {
        client_id: client_id.as_str(),
        avances: fields,
    })
    .map_err(|e| Error::msg(format!("failed to encode backup: {e}")))?;
    Ok(STANDARD.encode(json.as_bytes()))
}

pub fn decode(text: &str) -> Result<Backup> {
    let compact = text
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect::<String>();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| Error::Decode(format!("backup is not base64: {e}")))?;
    let raw: BackupIn = serde_json::from_slice(&bytes)
        .map_err(|e| Error::Decode(format!("backup is not valid JSON: {e}")))?;
    let client_id = raw
        .client_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::Decode("backup has no numeroCliente".into()))?;
    let fields = raw
        .avances
        .ok_or_else(|| Error::Decode("backup has no avances".into()))?;
    Ok(Backup {
        client_id: ClientId::parse(&client_id)?,
        fields,
    })
}

pub fn write_file(path: &Path, client_id: &ClientId, fields: &Fields) -> Result<()> {
    atomic_write_text(path, &encode(client_id, fields)?)
}

pub fn read_file(path: &Path) -> Result<Backup> {
    let text = fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read backup {}: {e}", path.display())))?;
    decode(&text)
}
