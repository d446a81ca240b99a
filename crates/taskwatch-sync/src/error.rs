use std::time::Duration;

use thiserror::Error;

/// Wait before re-authenticating after a failed connection or timeout.
pub const CONNECT_BACKOFF: Duration = Duration::from_secs(30);
/// Wait before re-authenticating after the server dropped a response midway.
pub const STREAM_BACKOFF: Duration = Duration::from_secs(3);

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("connection failed: {0}")]
    Connect(#[source] reqwest::Error),
    #[error("request timed out: {0}")]
    Timeout(#[source] reqwest::Error),
    #[error("connection closed mid-response: {0}")]
    StreamInterrupted(#[source] reqwest::Error),
    #[error("credentials rejected ({status}): {body}")]
    Authentication { status: u16, body: String },
    #[error("server returned {status}: {body}")]
    Server { status: u16, body: String },
    #[error("unexpected response body: {0}")]
    Protocol(#[from] serde_json::Error),
    #[error("notification not delivered: {0}")]
    Delivery(String),
    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SyncError::Timeout(e)
        } else if e.is_connect() || e.is_request() {
            SyncError::Connect(e)
        } else if e.is_body() || e.is_decode() {
            SyncError::StreamInterrupted(e)
        } else {
            SyncError::Http(e)
        }
    }
}

impl SyncError {
    /// Fixed backoff for transient network failures; `None` for everything else.
    pub fn backoff(&self) -> Option<Duration> {
        match self {
            SyncError::Connect(_) | SyncError::Timeout(_) => Some(CONNECT_BACKOFF),
            SyncError::StreamInterrupted(_) => Some(STREAM_BACKOFF),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.backoff().is_some()
    }

    /// A rejected credential does not heal on retry.
    pub fn is_authentication(&self) -> bool {
        matches!(self, SyncError::Authentication { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_failures_back_off() {
        let auth = SyncError::Authentication {
            status: 401,
            body: "token_not_valid".into(),
        };
        assert_eq!(auth.backoff(), None);
        assert!(auth.is_authentication());

        let server = SyncError::Server {
            status: 502,
            body: String::new(),
        };
        assert!(!server.is_transient());
        assert!(!server.is_authentication());

        let protocol = SyncError::from(serde_json::from_str::<u8>("x").unwrap_err());
        assert!(matches!(protocol, SyncError::Protocol(_)));
        assert!(!protocol.is_transient());
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        // Bind then drop a listener to get a port with nothing behind it.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = reqwest::get(format!("http://127.0.0.1:{port}/"))
            .await
            .unwrap_err();
        let err = SyncError::from(err);
        assert!(matches!(err, SyncError::Connect(_)), "got {err:?}");
        assert_eq!(err.backoff(), Some(CONNECT_BACKOFF));
    }
}
