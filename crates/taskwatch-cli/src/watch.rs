//! Poll loop: fetch → diff → persist → notify → sleep, forever.
//!
//! The loop moves between two phases. `Authenticating` starts a session
//! from scratch; `Polling` runs one cycle per interval. Network failures
//! send the loop back to `Authenticating` after a fixed backoff, a rejected
//! credential or an unwritable state file stops it, and anything else
//! aborts only the current cycle.

use std::time::Duration;

use taskwatch_core::DiffResult;
use taskwatch_store::{PersistedState, StateStore, StoreError};
use taskwatch_sync::{ApiClient, Relay, RelayMessage, Session, SessionManager, SyncError, build_client};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::display::render_message;

/// Where the watcher talks to.
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub api_base: String,
    pub relay_url: String,
    pub request_timeout: Duration,
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("failed to save state: {0}")]
    Store(#[from] StoreError),
}

impl CycleError {
    pub fn backoff(&self) -> Option<Duration> {
        match self {
            CycleError::Sync(e) => e.backoff(),
            CycleError::Store(_) => None,
        }
    }

    /// Errors that end the process rather than the cycle.
    pub fn is_fatal(&self) -> bool {
        match self {
            CycleError::Sync(e) => e.is_authentication(),
            CycleError::Store(_) => true,
        }
    }
}

/// What one polling cycle observed.
#[derive(Debug)]
pub enum CycleOutcome {
    /// The listing was empty.
    Empty,
    Unchanged { latest_id: u64 },
    Changed(DiffResult),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Authenticating,
    Polling,
}

/// Everything one watcher process needs, passed around explicitly.
pub struct Watcher {
    state: PersistedState,
    store: StateStore,
    sessions: SessionManager,
    session: Session,
    api: ApiClient,
    relay: Relay,
    interval: Duration,
}

impl Watcher {
    pub fn new(
        state: PersistedState,
        store: StateStore,
        endpoints: &Endpoints,
        interval: Duration,
    ) -> Result<Self, SyncError> {
        let client = build_client(endpoints.request_timeout)?;
        let session = Session::new(state.refresh_token.clone(), state.account.clone());
        Ok(Self {
            sessions: SessionManager::new(client.clone(), &endpoints.api_base),
            api: ApiClient::new(client.clone(), &endpoints.api_base),
            relay: Relay::new(client, &endpoints.relay_url),
            state,
            store,
            session,
            interval,
        })
    }

    pub fn state(&self) -> &PersistedState {
        &self.state
    }

    /// Run until `shutdown` turns true (or its sender goes away).
    ///
    /// Shutdown is observed while sleeping and between committing a cycle
    /// and notifying about it; requests in flight are left to finish.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), CycleError> {
        let mut phase = Phase::Authenticating;
        loop {
            let result = match phase {
                Phase::Authenticating => self.authenticate().await.map(|()| None),
                Phase::Polling => self.poll_once().await.map(Some),
            };

            let pause = match result {
                Ok(None) => {
                    info!("session ready, polling every {}s", self.interval.as_secs());
                    phase = Phase::Polling;
                    continue;
                }
                Ok(Some(outcome)) => {
                    if *shutdown.borrow() {
                        info!("shutdown requested");
                        return Ok(());
                    }
                    if let CycleOutcome::Changed(diff) = &outcome {
                        self.notify(diff).await;
                    }
                    self.interval
                }
                Err(e) => match e.backoff() {
                    Some(backoff) => {
                        warn!(error = %e, backoff_secs = backoff.as_secs(), "network failure, will log in again");
                        phase = Phase::Authenticating;
                        backoff
                    }
                    None if e.is_fatal() => {
                        error!(error = %e, "stopping");
                        return Err(e);
                    }
                    None => {
                        error!(error = %e, "cycle aborted");
                        self.interval
                    }
                },
            };

            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                _ = shutdown.wait_for(|&stop| stop) => {
                    info!("shutdown requested");
                    return Ok(());
                }
            }
        }
    }

    /// One full cycle including the notification, without sleeping.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        let outcome = self.poll_once().await?;
        if let CycleOutcome::Changed(diff) = &outcome {
            self.notify(diff).await;
        }
        Ok(outcome)
    }

    async fn authenticate(&mut self) -> Result<(), CycleError> {
        self.sessions.authenticate(&mut self.session).await?;
        if self.collect_rotation() {
            self.store.save(&self.state)?;
        }
        Ok(())
    }

    /// Fetch, diff and commit. Nothing is written unless the ledger changed
    /// or the refresh token rotated.
    async fn poll_once(&mut self) -> Result<CycleOutcome, CycleError> {
        let fetched = self
            .api
            .fetch_all_orders(&self.sessions, &mut self.session)
            .await;
        // A rotated refresh token replaces the old one server-side, so it is
        // saved even when the listing itself failed.
        let rotated = self.collect_rotation();
        let fetched = match fetched {
            Ok(orders) => orders,
            Err(e) => {
                if rotated {
                    self.store.save(&self.state)?;
                }
                return Err(e.into());
            }
        };

        let Some(diff) = self.state.ledger.absorb(&fetched) else {
            if rotated {
                self.store.save(&self.state)?;
            }
            info!("no orders listed");
            return Ok(CycleOutcome::Empty);
        };

        if rotated || !diff.is_empty() {
            self.store.save(&self.state)?;
        }
        if diff.is_empty() {
            info!(latest_id = diff.max_id, "no changes");
            return Ok(CycleOutcome::Unchanged {
                latest_id: diff.max_id,
            });
        }
        info!(
            latest_id = diff.max_id,
            new = diff.new_orders.len(),
            updated = diff.updated_orders.len(),
            "orders changed"
        );
        Ok(CycleOutcome::Changed(diff))
    }

    /// Delivery failures are logged and dropped; the state is already saved.
    async fn notify(&self, diff: &DiffResult) {
        let content = render_message(diff);
        let channel = &self.state.channel;
        let message = RelayMessage::html(&channel.token, &channel.title, &channel.topic, &content);
        if let Err(e) = self.relay.send(&message).await {
            warn!(error = %e, "notification not delivered");
        }
    }

    fn collect_rotation(&mut self) -> bool {
        match self.session.take_rotated() {
            Some(token) => {
                self.state.refresh_token = token;
                true
            }
            None => false,
        }
    }
}
