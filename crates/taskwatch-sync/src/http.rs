//! HTTP client for the task listing endpoint.

use chrono::{DateTime, FixedOffset};
use reqwest::Response;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use taskwatch_core::OrderSummary;
use tracing::{debug, info};

use crate::SyncError;
use crate::session::{Session, SessionManager};

/// Statuses on the listing endpoint that mean the bearer token was refused.
const LISTING_REJECT_STATUSES: &[u16] = &[401, 403];

/// Check the status, read the whole body, then decode it.
///
/// Reading and decoding are separate steps so that a connection dropped
/// halfway through the body surfaces as [`SyncError::StreamInterrupted`]
/// while a complete but malformed body is a [`SyncError::Protocol`].
pub(crate) async fn read_json<T: DeserializeOwned>(
    resp: Response,
    reject_statuses: &[u16],
) -> Result<T, SyncError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        if reject_statuses.contains(&status.as_u16()) {
            return Err(SyncError::Authentication {
                status: status.as_u16(),
                body,
            });
        }
        return Err(SyncError::Server {
            status: status.as_u16(),
            body,
        });
    }
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// One page of the listing. Only `results` is used.
#[derive(Deserialize)]
struct TaskPage {
    results: Vec<RemoteTask>,
}

/// A remote order record, cut down to the fields change detection needs.
///
/// The listing also carries status, hardware requirements, member and
/// affinity lists; serde skips them.
#[derive(Deserialize)]
struct RemoteTask {
    id: u64,
    name: String,
    #[serde(default)]
    desc: Option<String>,
    peer_income: f64,
    points: u64,
    created_time: DateTime<FixedOffset>,
}

impl From<RemoteTask> for OrderSummary {
    fn from(task: RemoteTask) -> Self {
        OrderSummary {
            id: task.id,
            name: task.name,
            detail: task.desc.unwrap_or_default(),
            created_at: task.created_time,
            unit_income: task.peer_income,
            points: task.points,
        }
    }
}

/// Snapshot fetcher for the task listing API.
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// `base_url` is the API root, e.g. `https://api.suanleme.cn/api/v1`
    /// (a trailing slash is ignored).
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Fetch every currently listed order.
    ///
    /// Obtains a fresh access token from `sessions` first; a single page
    /// with `data_type=all` covers open, running and recent orders.
    pub async fn fetch_all_orders(
        &self,
        sessions: &SessionManager,
        session: &mut Session,
    ) -> Result<Vec<OrderSummary>, SyncError> {
        let access = sessions.obtain_access(session).await?;
        let url = format!("{}/tasks/", self.base_url);

        debug!(url = %url, "fetching orders");
        let resp = self
            .client
            .get(&url)
            .query(&[("page", "1"), ("data_type", "all")])
            .bearer_auth(access.as_str())
            .send()
            .await?;
        let page: TaskPage = read_json(resp, LISTING_REJECT_STATUSES).await?;

        let orders: Vec<OrderSummary> = page.results.into_iter().map(OrderSummary::from).collect();
        info!(count = orders.len(), "fetched orders");
        Ok(orders)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TASK_107: &str = r#"{
        "id": 107,
        "author": 23,
        "status": "Running",
        "finished_points": 28,
        "running_points": 2,
        "name": "cytx",
        "desc": "cytx render",
        "peer_income": 1,
        "expect_time": "1",
        "type": "Deployment",
        "points": 30,
        "cpu_required": 0,
        "memory_required": 0,
        "disk_required": 0,
        "time_required": "00:00:00",
        "created_time": "2024-01-10T11:19:36.165607+08:00",
        "modify_time": "2024-01-19T17:48:05.918623+08:00",
        "finished_time": "2024-01-18T07:31:00+08:00",
        "runtime": 4,
        "package": "eca6bf8b-d71d-4143-b259-f7ca9294d9ff",
        "joined_user": [1, 22, 36],
        "affinity": [1, 2],
        "aversion": []
    }"#;

    async fn mount_refresh(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/api/v1/user/token/refresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access": "access-1",
                "refresh": "refresh-2"
            })))
            .mount(server)
            .await;
    }

    fn clients(server: &MockServer) -> (ApiClient, SessionManager) {
        let base = format!("{}/api/v1", server.uri());
        let client = reqwest::Client::new();
        (
            ApiClient::new(client.clone(), &base),
            SessionManager::new(client, &base),
        )
    }

    #[test]
    fn remote_task_projects_summary_fields() {
        let task: RemoteTask = serde_json::from_str(TASK_107).unwrap();
        let order = OrderSummary::from(task);
        assert_eq!(order.id, 107);
        assert_eq!(order.name, "cytx");
        assert_eq!(order.detail, "cytx render");
        assert_eq!(order.unit_income, 1.0);
        assert_eq!(order.points, 30);
        assert_eq!(order.created_at.offset().local_minus_utc(), 8 * 3600);
    }

    #[test]
    fn null_desc_becomes_empty_detail() {
        let json = TASK_107.replace(r#""cytx render""#, "null");
        let task: RemoteTask = serde_json::from_str(&json).unwrap();
        assert_eq!(OrderSummary::from(task).detail, "");
    }

    #[tokio::test]
    async fn fetch_all_orders_uses_fresh_bearer() {
        let server = MockServer::start().await;
        mount_refresh(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/"))
            .and(query_param("page", "1"))
            .and(query_param("data_type", "all"))
            .and(header("authorization", "Bearer access-1"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(format!(r#"{{"count": 1, "results": [{TASK_107}]}}"#)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (api, sessions) = clients(&server);
        let mut session = Session::new("refresh-1".into(), None);
        let orders = api.fetch_all_orders(&sessions, &mut session).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, 107);
        assert_eq!(session.take_rotated().as_deref(), Some("refresh-2"));
    }

    #[tokio::test]
    async fn empty_listing_is_ok() {
        let server = MockServer::start().await;
        mount_refresh(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "results": [] })),
            )
            .mount(&server)
            .await;

        let (api, sessions) = clients(&server);
        let mut session = Session::new("refresh-1".into(), None);
        let orders = api.fetch_all_orders(&sessions, &mut session).await.unwrap();
        assert!(orders.is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_protocol_error() {
        let server = MockServer::start().await;
        mount_refresh(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"detail": "oops"}"#))
            .mount(&server)
            .await;

        let (api, sessions) = clients(&server);
        let mut session = Session::new("refresh-1".into(), None);
        let err = api
            .fetch_all_orders(&sessions, &mut session)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Protocol(_)), "got {err:?}");
        assert!(!err.is_transient());
    }

    /// Serve one request with a header promising more body than is sent,
    /// then hang up.
    fn truncating_server() -> String {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    return;
                }
                head.extend_from_slice(&buf[..n]);
            }
            stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\n\
                      Content-Type: application/json\r\n\
                      Content-Length: 500\r\n\r\n\
                      {\"results\": [",
                )
                .unwrap();
        });
        format!("http://{addr}/api/v1/tasks/")
    }

    #[tokio::test]
    async fn truncated_body_is_stream_interrupted() {
        let url = truncating_server();
        let resp = reqwest::get(&url).await.unwrap();
        let err = read_json::<serde_json::Value>(resp, LISTING_REJECT_STATUSES)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::StreamInterrupted(_)), "got {err:?}");
        assert_eq!(err.backoff(), Some(crate::STREAM_BACKOFF));
    }

    #[tokio::test]
    async fn refused_bearer_is_authentication_error() {
        let server = MockServer::start().await;
        mount_refresh(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let (api, sessions) = clients(&server);
        let mut session = Session::new("refresh-1".into(), None);
        let err = api
            .fetch_all_orders(&sessions, &mut session)
            .await
            .unwrap_err();
        assert!(err.is_authentication());
    }

    #[tokio::test]
    async fn server_error_is_not_transient() {
        let server = MockServer::start().await;
        mount_refresh(&server).await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let (api, sessions) = clients(&server);
        let mut session = Session::new("refresh-1".into(), None);
        let err = api
            .fetch_all_orders(&sessions, &mut session)
            .await
            .unwrap_err();
        match err {
            SyncError::Server { status, body } => {
                assert_eq!(status, 502);
                assert_eq!(body, "bad gateway");
            }
            other => panic!("expected server error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refresh_rejection_skips_listing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/user/token/refresh"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v1/tasks/"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (api, sessions) = clients(&server);
        let mut session = Session::new("refresh-1".into(), None);
        let err = api
            .fetch_all_orders(&sessions, &mut session)
            .await
            .unwrap_err();
        assert!(err.is_authentication());
    }
}
