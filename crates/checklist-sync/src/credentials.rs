use std::fmt;
use std::sync::Arc;

use crate::config::{RemoteConfig, resolve_env_ref};
use crate::kv::KvStore;

pub const TOKEN_KEY: &str = "github_token";
pub const OWNER_KEY: &str = "github_owner";
pub const REPO_KEY: &str = "github_repo";

const TOKEN_PREFIXES: &[&str] = &["ghp_", "github_pat_"];

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub token: String,
    pub owner: String,
    pub repo: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"<redacted>")
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .finish()
    }
}

/// Interactive input used when credentials are missing.
pub trait Prompter {
    /// Returns `None` when the user declines to answer.
    fn ask(&mut self, question: &str) -> Option<String>;
    fn confirm(&mut self, question: &str) -> bool;
}

pub struct CredentialStore {
    kv: Arc<dyn KvStore>,
    default_owner: String,
    default_repo: String,
    token_env: Option<String>,
}

impl CredentialStore {
    pub fn new(kv: Arc<dyn KvStore>, remote: &RemoteConfig) -> Self {
        Self {
            kv,
            default_owner: remote.owner.clone(),
            default_repo: remote.repo.clone(),
            token_env: remote.token_env.clone(),
        }
    }

    fn stored(&self, key: &str) -> Option<String> {
        match self.kv.get(key) {
            Ok(v) => v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty()),
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to read stored setting");
                None
            }
        }
    }

    pub fn get_credentials(&self) -> Option<Credentials> {
        let token = self
            .stored(TOKEN_KEY)
            .or_else(|| resolve_env_ref(self.token_env.as_deref()))?;
        Some(Credentials {
            token,
            owner: self
                .stored(OWNER_KEY)
                .unwrap_or_else(|| self.default_owner.clone()),
            repo: self
                .stored(REPO_KEY)
                .unwrap_or_else(|| self.default_repo.clone()),
        })
    }

    /// Asks for a token and persists it. `None` means the user chose local-only mode.
    pub fn prompt_and_store(&self, prompter: &mut dyn Prompter) -> Option<Credentials> {
        let token = prompter
            .ask("GitHub personal access token (leave empty to work locally): ")?
            .trim()
            .to_string();
        if token.is_empty() {
            return None;
        }
        if !TOKEN_PREFIXES.iter().any(|p| token.starts_with(p))
            && !prompter.confirm("The token does not look like a GitHub token. Continue?")
        {
            return None;
        }

        let owner = self
            .stored(OWNER_KEY)
            .unwrap_or_else(|| self.default_owner.clone());
        let repo = self
            .stored(REPO_KEY)
            .unwrap_or_else(|| self.default_repo.clone());
        for (key, value) in [(OWNER_KEY, &owner), (TOKEN_KEY, &token), (REPO_KEY, &repo)] {
            if let Err(e) = self.kv.set(key, value) {
                tracing::warn!(key, error = %e, "failed to persist setting");
            }
        }
        tracing::info!(owner = %owner, repo = %repo, "stored remote credentials");
        Some(Credentials { token, owner, repo })
    }

    /// Prompts only when nothing is stored yet.
    pub fn configure(&self, prompter: &mut dyn Prompter) -> Option<Credentials> {
        self.get_credentials()
            .or_else(|| self.prompt_and_store(prompter))
    }

    pub fn set_target(&self, owner: &str, repo: &str) {
        for (key, value) in [(OWNER_KEY, owner), (REPO_KEY, repo)] {
            if let Err(e) = self.kv.set(key, value.trim()) {
                tracing::warn!(key, error = %e, "failed to persist setting");
            }
        }
    }
}
