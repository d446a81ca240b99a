//! Network layer: session token exchange, order listing, and push relay delivery.

use std::time::Duration;

mod error;
pub use error::{CONNECT_BACKOFF, STREAM_BACKOFF, SyncError};

mod http;
pub use http::ApiClient;

mod relay;
pub use relay::{Relay, RelayMessage};

mod session;
pub use session::{AccessToken, Session, SessionManager};

/// Build the shared HTTP client. Every request is bounded by `timeout`.
pub fn build_client(timeout: Duration) -> Result<reqwest::Client, SyncError> {
    let client = reqwest::Client::builder()
        .user_agent(concat!("taskwatch/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()?;
    Ok(client)
}
