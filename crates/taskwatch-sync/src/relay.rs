//! Push relay client (pushplus-style form API).

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::SyncError;

/// Form fields posted to the relay. `template` is always `html`.
#[derive(Debug, Serialize)]
pub struct RelayMessage<'a> {
    pub token: &'a str,
    pub title: &'a str,
    pub topic: &'a str,
    pub content: &'a str,
    template: &'static str,
}

impl<'a> RelayMessage<'a> {
    pub fn html(token: &'a str, title: &'a str, topic: &'a str, content: &'a str) -> Self {
        Self {
            token,
            title,
            topic,
            content,
            template: "html",
        }
    }
}

/// The relay answers 200 even for refused messages; the verdict is in `code`.
#[derive(Deserialize)]
struct RelayReply {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
}

pub struct Relay {
    client: reqwest::Client,
    url: String,
}

impl Relay {
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
        }
    }

    /// Post one message. Any refusal comes back as [`SyncError::Delivery`].
    pub async fn send(&self, message: &RelayMessage<'_>) -> Result<(), SyncError> {
        let resp = self.client.post(&self.url).form(message).send().await?;
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(SyncError::Delivery(format!("relay returned {status}: {body}")));
        }
        // Relays that do not answer in JSON are taken at their status code.
        if let Ok(reply) = serde_json::from_str::<RelayReply>(&body)
            && reply.code != 200
        {
            return Err(SyncError::Delivery(format!(
                "relay code {}: {}",
                reply.code,
                reply.msg.unwrap_or_default()
            )));
        }
        info!(bytes = message.content.len(), "notification sent");
        Ok(())
    }
}
