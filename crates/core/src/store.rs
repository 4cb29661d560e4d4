//! Persistence handoff.
//!
//! A finished session is written out exactly once, in the background, and
//! never blocks the session from moving on. Two backends exist: the remote
//! session API the web client talks to, and a directory of JSON files for
//! offline use.

use crate::config::{SessionConfiguration, SessionMode};
use crate::ledger::ConversationTurn;
use crate::problem::ProblemStatement;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Number of sessions the history view lists by default.
pub const DEFAULT_HISTORY_LIMIT: usize = 5;

/// Everything a completed session produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default = "default_mode")]
    pub mode: SessionMode,
    #[serde(flatten)]
    pub configuration: SessionConfiguration,
    pub problem: ProblemStatement,
    #[serde(rename = "aiSolution", default)]
    pub submitted_code: String,
    #[serde(
        rename = "aiExplanation",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub explanation: Option<String>,
    #[serde(default)]
    pub conversation: Vec<ConversationTurn>,
    #[serde(default)]
    pub feedback: String,
}

fn default_mode() -> SessionMode {
    SessionMode::Interview
}

/// A record as read back from a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(rename = "createdAt", default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub record: SessionRecord,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Session store rejected the save: {0}")]
    Rejected(String),
    #[error("Session store answered {status}: {body}")]
    Status { status: u16, body: String },
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persists a record and returns the id the store assigned to it.
    async fn save(&self, record: &SessionRecord) -> Result<String>;

    /// Most recent sessions first.
    async fn recent(&self, limit: usize) -> Result<Vec<StoredSession>>;

    async fn get(&self, id: &str) -> Result<Option<StoredSession>>;
}

/// Fire-and-forget save. Failures are logged and otherwise ignored; callers
/// may await the handle to flush before exiting.
pub fn persist_in_background(
    store: Arc<dyn SessionStore>,
    record: SessionRecord,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        match store.save(&record).await {
            Ok(id) => tracing::info!("Session saved as {}", id),
            Err(e) => tracing::warn!("Failed to save session: {:#}", e),
        }
    })
}

// --- Remote session API ---

#[derive(Debug, Deserialize)]
struct SaveResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    session: Option<SavedRef>,
}

#[derive(Debug, Deserialize)]
struct SavedRef {
    #[serde(rename = "_id", alias = "id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    sessions: Vec<StoredSession>,
}

/// Client for the session endpoints of the web backend.
pub struct HttpSessionStore {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpSessionStore {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request
                .header(reqwest::header::COOKIE, format!("token={token}"))
                .bearer_auth(token),
            None => request,
        }
    }

    async fn list(&self) -> Result<Vec<StoredSession>> {
        let resp = self
            .authorized(self.client.get(format!("{}/api/session/list", self.base_url)))
            .send()
            .await
            .context("Failed to reach the session store")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        let list = resp
            .json::<ListResponse>()
            .await
            .context("Failed to decode session list")?;
        Ok(list.sessions)
    }
}

#[async_trait]
impl SessionStore for HttpSessionStore {
    async fn save(&self, record: &SessionRecord) -> Result<String> {
        let resp = self
            .authorized(self.client.post(format!("{}/api/session/save", self.base_url)))
            .json(record)
            .send()
            .await
            .context("Failed to reach the session store")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        let saved = resp
            .json::<SaveResponse>()
            .await
            .context("Failed to decode save response")?;
        match saved.session {
            Some(session) if saved.success => Ok(session.id),
            _ => Err(StoreError::Rejected(
                saved.message.unwrap_or_else(|| "no session returned".into()),
            )
            .into()),
        }
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredSession>> {
        let mut sessions = self.list().await?;
        sessions.truncate(limit);
        Ok(sessions)
    }

    // The backend has no single-session endpoint; the detail view looks the
    // id up in the list.
    async fn get(&self, id: &str) -> Result<Option<StoredSession>> {
        Ok(self.list().await?.into_iter().find(|s| s.id == id))
    }
}

// --- Local JSON files ---

/// Stores each session as `<uuid>.json` in a directory.
pub struct JsonDirSessionStore {
    dir: PathBuf,
}

impl JsonDirSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    async fn read(&self, path: &std::path::Path) -> Result<StoredSession> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("Invalid session file {}", path.display()))
    }
}

#[async_trait]
impl SessionStore for JsonDirSessionStore {
    async fn save(&self, record: &SessionRecord) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create {}", self.dir.display()))?;
        let stored = StoredSession {
            id: Uuid::new_v4().to_string(),
            created_at: Some(Utc::now()),
            record: record.clone(),
        };
        let path = self.dir.join(format!("{}.json", stored.id));
        let json = serde_json::to_vec_pretty(&stored)?;
        tokio::fs::write(&path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(stored.id)
    }

    async fn recent(&self, limit: usize) -> Result<Vec<StoredSession>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to list {}", self.dir.display()));
            }
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match self.read(&path).await {
                Ok(session) => sessions.push(session),
                Err(e) => tracing::warn!("Skipping session file: {:#}", e),
            }
        }
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    async fn get(&self, id: &str) -> Result<Option<StoredSession>> {
        // Only ids this store could have issued map to a file name.
        let Ok(uuid) = Uuid::parse_str(id) else {
            return Ok(None);
        };
        let path = self.dir.join(format!("{uuid}.json"));
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(None);
        }
        self.read(&path).await.map(Some)
    }
}
