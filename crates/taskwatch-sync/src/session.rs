//! Session tokens for the listing API.
//!
//! The API hands out a long-lived refresh token at login. Each refresh
//! exchange returns a short-lived access token and, on servers that rotate,
//! a replacement refresh token. The replacement must reach disk before the
//! process exits, so [`Session`] remembers that a rotation happened until the
//! caller collects it with [`Session::take_rotated`].

use std::fmt;

use serde::Deserialize;
use taskwatch_core::AccountCredentials;
use tracing::{debug, info, warn};

use crate::SyncError;
use crate::http::read_json;

/// Token endpoints answer bad credentials with any of these.
const TOKEN_REJECT_STATUSES: &[u16] = &[400, 401, 403];

/// Short-lived bearer token. Never persisted.
pub struct AccessToken(String);

impl AccessToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessToken(len={})", self.0.len())
    }
}

/// Credentials held for one authenticated session.
pub struct Session {
    refresh_token: String,
    account: Option<AccountCredentials>,
    rotated: bool,
}

impl Session {
    pub fn new(refresh_token: String, account: Option<AccountCredentials>) -> Self {
        Self {
            refresh_token,
            account,
            rotated: false,
        }
    }

    pub fn refresh_token(&self) -> &str {
        &self.refresh_token
    }

    /// The new refresh token, once, if it changed since the last call.
    pub fn take_rotated(&mut self) -> Option<String> {
        std::mem::take(&mut self.rotated).then(|| self.refresh_token.clone())
    }

    fn replace_refresh(&mut self, token: String) {
        if token != self.refresh_token {
            self.refresh_token = token;
            self.rotated = true;
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("refresh_token", &format_args!("len={}", self.refresh_token.len()))
            .field("account", &self.account)
            .field("rotated", &self.rotated)
            .finish()
    }
}

#[derive(Deserialize)]
struct LoginResponse {
    refresh: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access: String,
    #[serde(default)]
    refresh: Option<String>,
}

/// Talks to the `/user/token` endpoints.
pub struct SessionManager {
    client: reqwest::Client,
    base_url: String,
}

impl SessionManager {
    /// `base_url` is the API root, e.g. `https://api.suanleme.cn/api/v1`.
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Exchange an account login for a fresh refresh token.
    pub async fn login(&self, account: &AccountCredentials) -> Result<String, SyncError> {
        let url = format!("{}/user/token", self.base_url);
        debug!(url = %url, username = %account.username, "logging in");
        let resp = self
            .client
            .post(&url)
            .form(&[
                ("username", account.username.as_str()),
                ("password", account.password.as_str()),
            ])
            .send()
            .await?;
        let body: LoginResponse = read_json(resp, TOKEN_REJECT_STATUSES).await?;
        info!(username = %account.username, "logged in");
        Ok(body.refresh)
    }

    /// Start a session from scratch when an account login is held.
    ///
    /// Without one, the persisted refresh token is all there is and is kept
    /// as-is; it gets validated by the first [`obtain_access`](Self::obtain_access).
    pub async fn authenticate(&self, session: &mut Session) -> Result<(), SyncError> {
        let Some(account) = session.account.clone() else {
            debug!("no account login held, continuing with stored refresh token");
            return Ok(());
        };
        let refresh = self.login(&account).await?;
        session.replace_refresh(refresh);
        Ok(())
    }

    /// Exchange the session's refresh token for a new access token.
    ///
    /// A rejected refresh token is retried once through a full login if the
    /// session holds an account; otherwise the rejection is returned.
    pub async fn obtain_access(&self, session: &mut Session) -> Result<AccessToken, SyncError> {
        match self.exchange(session).await {
            Err(e) if e.is_authentication() && session.account.is_some() => {
                warn!(error = %e, "refresh token rejected, logging in again");
                self.authenticate(session).await?;
                self.exchange(session).await
            }
            other => other,
        }
    }

    async fn exchange(&self, session: &mut Session) -> Result<AccessToken, SyncError> {
        let url = format!("{}/user/token/refresh", self.base_url);
        let resp = self
            .client
            .post(&url)
            .form(&[("refresh", session.refresh_token.as_str())])
            .send()
            .await?;
        let body: RefreshResponse = read_json(resp, TOKEN_REJECT_STATUSES).await?;
        if let Some(refresh) = body.refresh {
            session.replace_refresh(refresh);
        }
        debug!(rotated = session.rotated, "refreshed access token");
        Ok(AccessToken(body.access))
    }
}
