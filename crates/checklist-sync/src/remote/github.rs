use std::time::Duration;

use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::ACCEPT;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::{Presence, RecordStore, RemoteRecord, decode_content, encode_content};
use crate::config::RemoteConfig;
use crate::credentials::Credentials;
use crate::error::{Error, Result};
use crate::record::{ClientId, Fields, RemotePayload};

const GITHUB_JSON: &str = "application/vnd.github.v3+json";

#[derive(Debug, Deserialize)]
struct ContentsFile {
    #[serde(default)]
    content: Option<String>,
    // "none" when the file is too large to be inlined (1 MB to 100 MB).
    #[serde(default)]
    encoding: Option<String>,
    sha: String,
}

#[derive(Debug, Deserialize)]
struct BlobFile {
    content: String,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Serialize)]
struct PutBody<'a> {
    message: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: PutContent,
}

#[derive(Debug, Deserialize)]
struct PutContent {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: Option<String>,
}

/// Client for the GitHub repository contents API.
pub struct GitHubStore {
    api_base: String,
    records_dir: String,
    credentials: Option<Credentials>,
    client: Client,
}

impl GitHubStore {
    pub fn new(remote: &RemoteConfig, credentials: Option<Credentials>) -> Result<Self> {
        Self::with_timeout(remote, credentials, remote.timeout())
    }

    pub fn with_timeout(
        remote: &RemoteConfig,
        credentials: Option<Credentials>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("checklist-sync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::msg(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_base: remote.api_base.trim_end_matches('/').to_string(),
            records_dir: remote.records_dir.trim_matches('/').to_string(),
            credentials,
            client,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.credentials.is_some()
    }

    fn creds(&self) -> Result<&Credentials> {
        self.credentials.as_ref().ok_or(Error::Unconfigured)
    }

    fn record_url(&self, creds: &Credentials, client_id: &ClientId) -> String {
        format!(
            "{}/repos/{}/{}/contents/{}/{}.json",
            self.api_base, creds.owner, creds.repo, self.records_dir, client_id
        )
    }

    fn blob_url(&self, creds: &Credentials, sha: &str) -> String {
        format!(
            "{}/repos/{}/{}/git/blobs/{}",
            self.api_base, creds.owner, creds.repo, sha
        )
    }

    fn authed(&self, req: RequestBuilder, creds: &Credentials) -> RequestBuilder {
        req.bearer_auth(&creds.token).header(ACCEPT, GITHUB_JSON)
    }

    fn send(req: RequestBuilder) -> Result<Response> {
        req.send().map_err(|e| {
            if e.is_timeout() {
                Error::remote(0, "request timed out")
            } else {
                Error::remote(0, e.to_string())
            }
        })
    }

    /// GET returning a JSON body. 404 maps to `NotFound`, an unexpected body to `Decode`.
    fn get_json<T: DeserializeOwned>(&self, url: String, creds: &Credentials) -> Result<T> {
        let res = Self::send(self.authed(self.client.get(url), creds))?;
        if res.status() == StatusCode::NOT_FOUND {
            return Err(Error::NotFound);
        }
        if !res.status().is_success() {
            let (status, message) = error_message(res);
            return Err(Error::remote(status.as_u16(), message));
        }
        let body = res
            .text()
            .map_err(|e| Error::remote(0, format!("failed to read response body: {e}")))?;
        serde_json::from_str(&body).map_err(|e| Error::Decode(format!("unexpected response: {e}")))
    }

    fn load_blob(&self, creds: &Credentials, sha: &str) -> Result<String> {
        tracing::debug!(sha, "record too large for the contents API, fetching blob");
        let blob: BlobFile = self.get_json(self.blob_url(creds, sha), creds)?;
        match blob.encoding.as_deref() {
            None | Some("base64") => Ok(blob.content),
            Some(other) => Err(Error::Decode(format!("unsupported blob encoding '{other}'"))),
        }
    }
}

fn error_message(res: Response) -> (StatusCode, String) {
    let status = res.status();
    let fallback = status
        .canonical_reason()
        .unwrap_or("unexpected response")
        .to_string();
    let message = res
        .text()
        .ok()
        .and_then(|body| serde_json::from_str::<ApiMessage>(&body).ok())
        .and_then(|m| m.message)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(fallback);
    (status, message)
}

impl RecordStore for GitHubStore {
    fn probe(&self, client_id: &ClientId) -> Presence {
        let Ok(creds) = self.creds() else {
            return Presence::Unknown;
        };
        let url = self.record_url(creds, client_id);
        tracing::debug!(client = %client_id, "probing remote record");
        match Self::send(self.authed(self.client.head(url), creds)) {
            Ok(res) if res.status().is_success() => Presence::Present,
            Ok(res) if res.status() == StatusCode::NOT_FOUND => Presence::Absent,
            Ok(res) => {
                tracing::warn!(client = %client_id, status = %res.status(), "remote probe failed");
                Presence::Unknown
            }
            Err(e) => {
                tracing::warn!(client = %client_id, error = %e, "remote probe failed");
                Presence::Unknown
            }
        }
    }

    fn load(&self, client_id: &ClientId) -> Result<RemoteRecord> {
        let creds = self.creds()?;
        let url = self.record_url(creds, client_id);
        tracing::debug!(client = %client_id, "loading remote record");
        let file: ContentsFile = self.get_json(url, creds)?;
        let content = match file.content {
            Some(c) if !c.trim().is_empty() => c,
            _ if file.encoding.as_deref() == Some("none") => self.load_blob(creds, &file.sha)?,
            _ => return Err(Error::Decode("contents response has no content".into())),
        };
        let payload = decode_content(&content)?;
        Ok(RemoteRecord {
            fields: payload.avances,
            revision: file.sha,
        })
    }

    fn save(&self, client_id: &ClientId, fields: &Fields, revision: Option<&str>) -> Result<String> {
        let creds = self.creds()?;
        let url = self.record_url(creds, client_id);
        let body = PutBody {
            message: format!("Actualizar avances cliente {client_id}"),
            content: encode_content(&RemotePayload::new(client_id, fields))?,
            sha: revision,
        };
        tracing::debug!(client = %client_id, has_revision = revision.is_some(), "saving remote record");
        let res = Self::send(self.authed(self.client.put(url), creds).json(&body))?;
        let status = res.status();
        if status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY {
            let (_, message) = error_message(res);
            return Err(Error::Conflict { message });
        }
        if !status.is_success() {
            let (status, message) = error_message(res);
            return Err(Error::remote(status.as_u16(), message));
        }
        let body = res
            .text()
            .map_err(|e| Error::remote(0, format!("failed to read response body: {e}")))?;
        let parsed: PutResponse = serde_json::from_str(&body)
            .map_err(|e| Error::remote(status.as_u16(), format!("unexpected save response: {e}")))?;
        Ok(parsed.content.sha)
    }

    fn current_revision(&self, client_id: &ClientId) -> Result<Option<String>> {
        let creds = self.creds()?;
        let url = self.record_url(creds, client_id);
        match self.get_json::<ContentsFile>(url, creds) {
            Ok(file) => Ok(Some(file.sha)),
            Err(Error::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn check_connectivity(&self) -> bool {
        let Ok(creds) = self.creds() else {
            return false;
        };
        let url = format!("{}/repos/{}/{}", self.api_base, creds.owner, creds.repo);
        match Self::send(self.authed(self.client.get(url), creds)) {
            Ok(res) => res.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "connectivity check failed");
                false
            }
        }
    }
}
