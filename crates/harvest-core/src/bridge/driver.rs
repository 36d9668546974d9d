//! HTTP client for the browser automation bridge.
//!
//! The bridge owns the browser. This side asks it to open tabs, submit
//! prompts, reload and reset, and listens to its `/events` SSE stream, where
//! every network response observed in any tab is reported as one JSON
//! object `{"url", "content_type", "body", "session"}`, where `session` is
//! the handle of the tab that observed it.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use harvest_types::config::BridgeConfig;
use harvest_types::{
    CredentialFlow, Credentials, EventStream, HarvestError, InteractiveDriver, NetworkEvent,
    SessionLauncher,
};

use super::sse::{SseDecoder, SseEvent};

/// Extra time granted to an HTTP call over the action timeout it carries.
const REQUEST_SLACK: Duration = Duration::from_secs(5);

/// Pause before reconnecting a dropped event stream.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

// -- Bridge API request/response types --

#[derive(Debug, Deserialize)]
struct LaunchResponse {
    session: String,
}

#[derive(Debug, Serialize)]
struct OpenRequest<'a> {
    url: &'a str,
    timeout_ms: u64,
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    text: &'a str,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    location: String,
}

#[derive(Debug, Serialize)]
struct TimeoutRequest {
    timeout_ms: u64,
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    identity: &'a str,
    secret: &'a str,
}

/// Empty acknowledgement; any JSON (or no body) is accepted.
#[derive(Debug, Default, Deserialize)]
struct Ack {}

/// One observation as reported on `/events`. The body may arrive as a
/// string or as already-structured JSON.
#[derive(Debug, Deserialize)]
struct BridgeEvent {
    url: String,
    #[serde(default)]
    content_type: String,
    #[serde(default)]
    body: serde_json::Value,
    #[serde(default)]
    session: Option<String>,
}

impl From<BridgeEvent> for NetworkEvent {
    fn from(event: BridgeEvent) -> Self {
        let body = match event.body {
            serde_json::Value::String(s) => s,
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        let observed = NetworkEvent::new(event.url, event.content_type, body);
        match event.session {
            Some(handle) => observed.in_view(handle),
            None => observed,
        }
    }
}

// ============================================================
// BridgeClient
// ============================================================

/// Thin JSON-over-HTTP client shared by the launcher and every driver.
#[derive(Debug, Clone)]
pub struct BridgeClient {
    client: Client,
    base_url: String,
}

impl BridgeClient {
    pub fn new(config: &BridgeConfig) -> Result<Self, HarvestError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(|e| HarvestError::Bridge(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// POST a JSON body and decode the JSON reply.
    async fn post<B, R>(&self, path: &str, body: &B, timeout: Duration) -> Result<R, HarvestError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned + Default,
    {
        let response = self
            .client
            .post(self.url(path))
            .json(body)
            .timeout(timeout + REQUEST_SLACK)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    HarvestError::Timeout(format!("bridge call {path} timed out: {e}"))
                } else {
                    HarvestError::Bridge(format!("bridge request {path} failed: {e}"))
                }
            })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| {
            HarvestError::Bridge(format!("failed to read bridge reply for {path} (HTTP {status}): {e}"))
        })?;
        if !status.is_success() {
            return Err(HarvestError::Driver(format!(
                "bridge rejected {path} (HTTP {status}): {text}"
            )));
        }
        if text.trim().is_empty() {
            return Ok(R::default());
        }
        serde_json::from_str(&text).map_err(|e| {
            HarvestError::Bridge(format!("failed to parse bridge reply for {path}: {e}"))
        })
    }

    /// Read `/events` until the bridge closes it, publishing every event.
    ///
    /// Returns how many events were published.
    pub async fn read_event_stream(&self, stream: &EventStream) -> Result<usize, HarvestError> {
        let mut response = self
            .client
            .get(self.url("/events"))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(|e| HarvestError::Bridge(format!("event stream connect failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Bridge(format!(
                "event stream rejected (HTTP {status})"
            )));
        }

        let mut decoder = SseDecoder::new();
        let mut published = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| HarvestError::Bridge(format!("event stream read failed: {e}")))?
        {
            for event in decoder.push(&chunk) {
                published += publish_sse_event(stream, event);
            }
        }
        if let Some(event) = decoder.finish() {
            published += publish_sse_event(stream, event);
        }

        Ok(published)
    }
}

/// Decode one SSE event and publish it. Returns 1 if published.
fn publish_sse_event(stream: &EventStream, event: SseEvent) -> usize {
    if !event.is_message() || event.data.is_empty() {
        return 0;
    }
    match serde_json::from_str::<BridgeEvent>(&event.data) {
        Ok(observed) => {
            stream.publish(observed.into());
            1
        }
        Err(e) => {
            warn!(data = %event.data, error = %e, "failed to parse bridge event, skipping");
            0
        }
    }
}

// ============================================================
// BridgeLauncher
// ============================================================

/// Launches bridge-backed sessions and pumps the bridge's event stream.
///
/// The pump runs as a background task for the launcher's lifetime and
/// reconnects when the bridge drops the stream.
pub struct BridgeLauncher {
    client: BridgeClient,
    events: EventStream,
    pump: JoinHandle<()>,
}

impl BridgeLauncher {
    /// Connect to the bridge described by `config` and start the event pump.
    ///
    /// Must be called within a tokio runtime.
    pub fn connect(config: &BridgeConfig) -> Result<Self, HarvestError> {
        let client = BridgeClient::new(config)?;
        let events = EventStream::new(config.event_buffer);

        let pump = {
            let client = client.clone();
            let events = events.clone();
            tokio::spawn(async move {
                loop {
                    match client.read_event_stream(&events).await {
                        Ok(count) => debug!(count, "bridge event stream ended, reconnecting"),
                        Err(e) => warn!(error = %e, "bridge event stream failed, reconnecting"),
                    }
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            })
        };

        info!(base_url = %client.base_url, "connected to automation bridge");
        Ok(Self {
            client,
            events,
            pump,
        })
    }
}

impl Drop for BridgeLauncher {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[async_trait]
impl SessionLauncher for BridgeLauncher {
    fn events(&self) -> EventStream {
        self.events.clone()
    }

    async fn launch(&self, worker_id: usize) -> Result<Box<dyn InteractiveDriver>, HarvestError> {
        let launched: LaunchResponse = self
            .client
            .post::<_, Option<LaunchResponse>>(
                "/sessions",
                &serde_json::json!({ "worker": worker_id }),
                REQUEST_SLACK,
            )
            .await?
            .ok_or_else(|| HarvestError::Bridge("bridge launch returned no session".to_string()))?;
        debug!(worker = worker_id, handle = %launched.session, "launched bridge session");

        Ok(Box::new(BridgeDriver {
            client: self.client.clone(),
            handle: launched.session,
        }))
    }
}

#[async_trait]
impl CredentialFlow for BridgeLauncher {
    async fn login(&self, credentials: &Credentials) -> Result<(), HarvestError> {
        let request = LoginRequest {
            identity: &credentials.identity,
            secret: &credentials.secret,
        };
        self.client
            .post::<_, Ack>("/login", &request, REQUEST_SLACK)
            .await
            .map_err(|e| HarvestError::Credential(format!("login failed: {e}")))?;
        Ok(())
    }
}

// ============================================================
// BridgeDriver
// ============================================================

/// One bridge tab, owned by one worker.
pub struct BridgeDriver {
    client: BridgeClient,
    handle: String,
}

impl BridgeDriver {
    fn path(&self, action: &str) -> String {
        format!("/sessions/{}/{action}", self.handle)
    }
}

fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

#[async_trait]
impl InteractiveDriver for BridgeDriver {
    fn view(&self) -> Option<&str> {
        Some(&self.handle)
    }

    async fn open(&mut self, target: &str, timeout: Duration) -> Result<(), HarvestError> {
        let request = OpenRequest {
            url: target,
            timeout_ms: millis(timeout),
        };
        self.client
            .post::<_, Ack>(&self.path("open"), &request, timeout)
            .await?;
        Ok(())
    }

    async fn submit(&mut self, text: &str, timeout: Duration) -> Result<String, HarvestError> {
        let request = SubmitRequest {
            text,
            timeout_ms: millis(timeout),
        };
        let reply: Option<SubmitResponse> = self
            .client
            .post(&self.path("submit"), &request, timeout)
            .await?;
        reply
            .map(|r| r.location)
            .ok_or_else(|| HarvestError::Driver("bridge submit returned no location".to_string()))
    }

    async fn reload(&mut self, timeout: Duration) -> Result<(), HarvestError> {
        let request = TimeoutRequest {
            timeout_ms: millis(timeout),
        };
        self.client
            .post::<_, Ack>(&self.path("reload"), &request, timeout)
            .await?;
        Ok(())
    }

    async fn reset(&mut self, timeout: Duration) -> Result<(), HarvestError> {
        let request = TimeoutRequest {
            timeout_ms: millis(timeout),
        };
        self.client
            .post::<_, Ack>(&self.path("reset"), &request, timeout)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(base_url: String) -> BridgeConfig {
        BridgeConfig {
            base_url,
            ..Default::default()
        }
    }

    fn driver(server: &MockServer) -> BridgeDriver {
        BridgeDriver {
            client: BridgeClient::new(&config(server.uri())).unwrap(),
            handle: "tab-1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_launch_returns_driver_for_handle() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "session": "tab-7"
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/sessions/tab-7/reload"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let launcher = BridgeLauncher::connect(&config(server.uri())).unwrap();
        let mut driver = launcher.launch(0).await.unwrap();
        driver.reload(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn test_submit_returns_location() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/tab-1/submit"))
            .and(body_json(serde_json::json!({"text": "hello", "timeout_ms": 15000})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "location": "https://chatgpt.com/c/6650f1a2-9c1e"
            })))
            .mount(&server)
            .await;

        let location = driver(&server)
            .submit("hello", Duration::from_secs(15))
            .await
            .unwrap();
        assert_eq!(location, "https://chatgpt.com/c/6650f1a2-9c1e");
    }

    #[tokio::test]
    async fn test_submit_without_location_is_driver_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/tab-1/submit"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let err = driver(&server)
            .submit("hello", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Driver(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_server_error_maps_to_driver_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sessions/tab-1/reset"))
            .respond_with(ResponseTemplate::new(500).set_body_string("selector not found"))
            .mount(&server)
            .await;

        let err = driver(&server)
            .reset(Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            HarvestError::Driver(msg) => {
                assert!(msg.contains("500"), "unexpected message: {msg}");
                assert!(msg.contains("selector not found"), "unexpected message: {msg}");
            }
            other => panic!("Expected Driver error, got: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_truncated_success_body_is_bridge_error() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 4096];
            let _ = socket.read(&mut request).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: 64\r\n\r\n{\"loc")
                .await
                .unwrap();
            socket.shutdown().await.unwrap();
        });

        let mut driver = BridgeDriver {
            client: BridgeClient::new(&config(format!("http://{addr}"))).unwrap(),
            handle: "tab-1".to_string(),
        };
        let err = driver
            .submit("hello", Duration::from_secs(1))
            .await
            .unwrap_err();
        match err {
            HarvestError::Bridge(msg) => assert!(msg.contains("failed to read"), "unexpected message: {msg}"),
            other => panic!("Expected Bridge error, got: {other:?}"),
        }
    }

    #[test]
    fn test_driver_reports_its_handle_as_view() {
        let driver = BridgeDriver {
            client: BridgeClient::new(&BridgeConfig::default()).unwrap(),
            handle: "tab-9".to_string(),
        };
        assert_eq!(driver.view(), Some("tab-9"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_bridge_error() {
        let mut driver = BridgeDriver {
            client: BridgeClient::new(&config("http://127.0.0.1:1".to_string())).unwrap(),
            handle: "tab-1".to_string(),
        };
        let err = driver
            .open("https://chatgpt.com/", Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Bridge(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_login_posts_credentials() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .and(body_json(serde_json::json!({
                "identity": "user@example.com",
                "secret": "pw"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let launcher = BridgeLauncher::connect(&config(server.uri())).unwrap();
        launcher
            .login(&Credentials::new("user@example.com", "pw"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_login_rejection_is_credential_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/login"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad password"))
            .mount(&server)
            .await;

        let launcher = BridgeLauncher::connect(&config(server.uri())).unwrap();
        let err = launcher
            .login(&Credentials::new("user@example.com", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, HarvestError::Credential(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_event_stream_publishes_observations() {
        let server = MockServer::start().await;
        let body = concat!(
            ": hello\n\n",
            "data: {\"url\":\"https://chatgpt.com/backend-api/conversation/ab\",\"session\":\"tab-3\",",
            "\"content_type\":\"application/json\",\"body\":\"{\\\"queries\\\":[\\\"q\\\"]}\"}\n\n",
            "data: not json\n\n",
            "data: {\"url\":\"https://chatgpt.com/x\",\"content_type\":\"application/json\",",
            "\"body\":{\"queries\":[\"structured\"]}}\n\n",
        );
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(body),
            )
            .mount(&server)
            .await;

        let client = BridgeClient::new(&config(server.uri())).unwrap();
        let stream = EventStream::new(16);
        let mut rx = stream.subscribe();

        let published = client.read_event_stream(&stream).await.unwrap();
        assert_eq!(published, 2);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.url, "https://chatgpt.com/backend-api/conversation/ab");
        assert_eq!(first.body, r#"{"queries":["q"]}"#);
        assert!(first.observed_in("tab-3"));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.parse_body().unwrap()["queries"][0], "structured");
        assert_eq!(second.view, None);
    }
}
