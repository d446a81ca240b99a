//! The on-disk state file.
//!
//! A single JSON document holds the session credential, the notification
//! channel settings and the order ledger. The document carries a
//! `config_version` tag; a file written by an incompatible build is rejected
//! with [`StoreError::Version`] rather than migrated.

use std::collections::BTreeMap;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use taskwatch_core::{AccountCredentials, OrderLedger, OrderSummary, descending_keys};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::StoreError;

/// Schema version written by this build.
pub const CONFIG_VERSION: u32 = 3;

const DEFAULT_TITLE: &str = "New work orders posted";

/// Push relay settings. Written at setup, never changed while polling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyChannel {
    pub token: String,
    /// Group code; empty sends to the token owner only.
    pub topic: String,
    pub title: String,
}

impl NotifyChannel {
    pub fn new(token: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            topic: topic.into(),
            title: DEFAULT_TITLE.to_string(),
        }
    }
}

/// In-memory form of `config.json`.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistedState {
    pub ledger: OrderLedger,
    /// Long-lived session credential. Rotated on every token refresh.
    pub refresh_token: String,
    pub account: Option<AccountCredentials>,
    pub channel: NotifyChannel,
}

impl PersistedState {
    /// Fresh state for a newly set up installation.
    pub fn new(refresh_token: String, account: Option<AccountCredentials>, channel: NotifyChannel) -> Self {
        Self {
            ledger: OrderLedger::default(),
            refresh_token,
            account,
            channel,
        }
    }
}

// ── Wire format ──

#[derive(Serialize, Deserialize)]
struct ConfigFile {
    config_version: u32,
    latest_id: u64,
    refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    pushplus_token: String,
    #[serde(default)]
    pushplus_topic: String,
    #[serde(default = "default_title")]
    pushplus_title: String,
    #[serde(default, with = "descending_keys")]
    tasks_record: BTreeMap<u64, OrderSummary>,
}

fn default_title() -> String {
    DEFAULT_TITLE.to_string()
}

impl From<&PersistedState> for ConfigFile {
    fn from(state: &PersistedState) -> Self {
        let (username, password) = match &state.account {
            Some(a) => (Some(a.username.clone()), Some(a.password.clone())),
            None => (None, None),
        };
        Self {
            config_version: CONFIG_VERSION,
            latest_id: state.ledger.highest_id_seen,
            refresh_token: state.refresh_token.clone(),
            username,
            password,
            pushplus_token: state.channel.token.clone(),
            pushplus_topic: state.channel.topic.clone(),
            pushplus_title: state.channel.title.clone(),
            tasks_record: state.ledger.orders.clone(),
        }
    }
}

impl From<ConfigFile> for PersistedState {
    fn from(file: ConfigFile) -> Self {
        let account = match (file.username, file.password) {
            (Some(username), Some(password)) => Some(AccountCredentials { username, password }),
            _ => None,
        };
        Self {
            ledger: OrderLedger {
                highest_id_seen: file.latest_id,
                orders: file.tasks_record,
            },
            refresh_token: file.refresh_token,
            account,
            channel: NotifyChannel {
                token: file.pushplus_token,
                topic: file.pushplus_topic,
                title: file.pushplus_title,
            },
        }
    }
}

// ── Store ──

/// Owner of the state file.
///
/// `save` takes `&mut self` so a store can never be written from two places
/// at once.
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Read and validate the state file.
    ///
    /// The version tag is checked before the rest of the document is decoded,
    /// so an old layout reports [`StoreError::Version`] instead of a parse error.
    pub fn load(&self) -> Result<PersistedState, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(StoreError::Missing(self.path.clone()));
            }
            Err(e) => return Err(e.into()),
        };

        let raw: serde_json::Value = serde_json::from_str(&text)?;
        let found = raw.get("config_version").and_then(serde_json::Value::as_u64);
        if found != Some(u64::from(CONFIG_VERSION)) {
            return Err(StoreError::Version {
                path: self.path.clone(),
                found,
                expected: CONFIG_VERSION,
            });
        }

        let file: ConfigFile = serde_json::from_value(raw)?;
        let state = PersistedState::from(file);
        debug!(
            path = %self.path.display(),
            latest_id = state.ledger.highest_id_seen,
            orders = state.ledger.orders.len(),
            "loaded state"
        );
        Ok(state)
    }

    /// Write the whole document to a temp file beside the target, then rename
    /// it over the target. Readers see either the old or the new file.
    pub fn save(&mut self, state: &PersistedState) -> Result<(), StoreError> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        ConfigFile::from(state).serialize(&mut ser)?;
        buf.push(b'\n');

        // NamedTempFile is created owner-only (0600), which the secrets need.
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&buf)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;

        info!(
            path = %self.path.display(),
            latest_id = state.ledger.highest_id_seen,
            orders = state.ledger.orders.len(),
            "saved state"
        );
        Ok(())
    }
}
