/// HTTP client for the local messaging bridge.
///
/// The bridge owns the actual messaging protocol and the credential store;
/// this side only drives it:
///
/// ```text
///   POST   /session/connect      { client_name, credentials_dir }
///   GET    /session              { state, reason_code?, pairing_code? }   (polled)
///   POST   /messages             JSON (text / image / remote document)
///                                multipart meta + file [+ thumbnail] (local document)
///   PUT    /messages/{id}        { to, text }
///   DELETE /messages/{id}?to=…
/// ```
use crate::channel::{ChannelError, Session};
use async_trait::async_trait;
use reelcast_proto::config::ChannelConfig;
use reelcast_proto::protocol::{DisconnectReason, DocumentSource, MessageHandle, Payload, SessionEvent};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Consecutive failed status polls before the bridge is considered gone.
const MAX_POLL_FAILURES: u32 = 3;

#[derive(Debug, Serialize)]
struct ConnectRequest<'a> {
    client_name: &'a str,
    credentials_dir: &'a Path,
}

#[derive(Debug, Clone, Deserialize)]
struct SessionStatus {
    state: String,
    #[serde(default)]
    reason_code: Option<u16>,
    #[serde(default)]
    pairing_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    id: String,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum OutgoingMessage<'a> {
    Text {
        to: &'a str,
        text: &'a str,
    },
    Image {
        to: &'a str,
        url: &'a str,
        caption: &'a str,
    },
    Document {
        to: &'a str,
        #[serde(skip_serializing_if = "Option::is_none")]
        document_url: Option<&'a str>,
        file_name: &'a str,
        mime_type: &'a str,
        caption: &'a str,
    },
}

#[derive(Debug, Serialize)]
struct EditRequest<'a> {
    to: &'a str,
    text: &'a str,
}

pub struct BridgeSession {
    client: reqwest::Client,
    base_url: String,
    client_name: String,
    credentials_dir: PathBuf,
    poll_interval: Duration,
    request_timeout: Duration,
    upload_timeout: Option<Duration>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeSession {
    pub fn new(cfg: &ChannelConfig, credentials_dir: PathBuf) -> Result<Self, ChannelError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: cfg.bridge_url.trim_end_matches('/').to_string(),
            client_name: cfg.client_name.clone(),
            credentials_dir,
            poll_interval: Duration::from_millis(cfg.poll_interval_ms.max(10)),
            request_timeout: cfg.request_timeout(),
            upload_timeout: cfg.upload_timeout(),
            poller: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn message_url(&self, handle: &MessageHandle) -> String {
        self.url(&format!("/messages/{}", urlencoding::encode(&handle.0)))
    }

    async fn post_json(&self, body: &OutgoingMessage<'_>) -> Result<reqwest::Response, ChannelError> {
        Ok(self
            .client
            .post(self.url("/messages"))
            .timeout(self.request_timeout)
            .json(body)
            .send()
            .await?)
    }

    async fn send_document_file(
        &self,
        meta: &OutgoingMessage<'_>,
        path: &Path,
        file_name: &str,
        mime_type: &str,
        thumbnail: Option<&[u8]>,
    ) -> Result<reqwest::Response, ChannelError> {
        let file = tokio::fs::File::open(path).await?;
        let len = file.metadata().await?.len();
        let meta_json = serde_json::to_string(meta).map_err(std::io::Error::other)?;

        let mut form = reqwest::multipart::Form::new()
            .part(
                "meta",
                reqwest::multipart::Part::text(meta_json).mime_str("application/json")?,
            )
            .part(
                "file",
                reqwest::multipart::Part::stream_with_length(reqwest::Body::from(file), len)
                    .file_name(file_name.to_string())
                    .mime_str(mime_type)?,
            );
        if let Some(thumb) = thumbnail {
            form = form.part(
                "thumbnail",
                reqwest::multipart::Part::bytes(thumb.to_vec())
                    .file_name("thumbnail.jpg")
                    .mime_str("image/jpeg")?,
            );
        }

        let mut request = self.client.post(self.url("/messages")).multipart(form);
        if let Some(timeout) = self.upload_timeout {
            request = request.timeout(timeout);
        }
        Ok(request.send().await?)
    }
}

/// Turn a non-2xx bridge response into `ChannelError::Bridge`.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, ChannelError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ChannelError::Bridge {
        status: status.as_u16(),
        body,
    })
}

#[async_trait]
impl Session for BridgeSession {
    async fn connect(&self) -> Result<mpsc::Receiver<SessionEvent>, ChannelError> {
        if let Some(old) = self.poller.lock().await.take() {
            old.abort();
        }

        let request = ConnectRequest {
            client_name: &self.client_name,
            credentials_dir: &self.credentials_dir,
        };
        let response = self
            .client
            .post(self.url("/session/connect"))
            .timeout(self.request_timeout)
            .json(&request)
            .send()
            .await?;
        check(response).await?;

        let (event_tx, event_rx) = mpsc::channel(16);
        let handle = tokio::spawn(poll_task(
            self.client.clone(),
            self.url("/session"),
            self.poll_interval,
            self.request_timeout,
            event_tx,
        ));
        *self.poller.lock().await = Some(handle);
        Ok(event_rx)
    }

    async fn send(&self, to: &str, payload: &Payload) -> Result<MessageHandle, ChannelError> {
        let response = match payload {
            Payload::Text(text) => {
                let body = OutgoingMessage::Text { to, text };
                self.post_json(&body).await?
            }
            Payload::Image { url, caption } => {
                let body = OutgoingMessage::Image { to, url, caption };
                self.post_json(&body).await?
            }
            Payload::Document {
                source: DocumentSource::Url(url),
                file_name,
                mime_type,
                caption,
                ..
            } => {
                let body = OutgoingMessage::Document {
                    to,
                    document_url: Some(url.as_str()),
                    file_name,
                    mime_type,
                    caption,
                };
                self.post_json(&body).await?
            }
            Payload::Document {
                source: DocumentSource::Path(path),
                file_name,
                mime_type,
                caption,
                thumbnail,
            } => {
                let meta = OutgoingMessage::Document {
                    to,
                    document_url: None,
                    file_name,
                    mime_type,
                    caption,
                };
                self.send_document_file(&meta, path, file_name, mime_type, thumbnail.as_deref())
                    .await?
            }
        };

        let sent: SentMessage = check(response).await?.json().await?;
        Ok(MessageHandle(sent.id))
    }

    async fn edit(&self, to: &str, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        let response = self
            .client
            .put(self.message_url(handle))
            .timeout(self.request_timeout)
            .json(&EditRequest { to, text })
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn delete(&self, to: &str, handle: &MessageHandle) -> Result<(), ChannelError> {
        let response = self
            .client
            .delete(self.message_url(handle))
            .timeout(self.request_timeout)
            .query(&[("to", to)])
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }
}

/// Poll the bridge status and translate transitions into session events.
/// Ends after emitting `Closed` or when the receiver is dropped.
async fn poll_task(
    client: reqwest::Client,
    status_url: String,
    interval: Duration,
    timeout: Duration,
    event_tx: mpsc::Sender<SessionEvent>,
) {
    let mut is_open = false;
    let mut last_pairing: Option<String> = None;
    let mut failures = 0u32;

    loop {
        let status = match fetch_status(&client, &status_url, timeout).await {
            Ok(s) => {
                failures = 0;
                s
            }
            Err(e) => {
                failures += 1;
                debug!("bridge: status poll failed ({}/{}): {}", failures, MAX_POLL_FAILURES, e);
                if failures >= MAX_POLL_FAILURES {
                    warn!("bridge: unreachable, reporting session closed");
                    let _ = event_tx
                        .send(SessionEvent::Closed(DisconnectReason::Unavailable))
                        .await;
                    return;
                }
                tokio::time::sleep(interval).await;
                continue;
            }
        };

        if let Some(code) = status.pairing_code.filter(|c| !c.is_empty()) {
            if last_pairing.as_deref() != Some(code.as_str()) {
                last_pairing = Some(code.clone());
                if event_tx.send(SessionEvent::Pairing(code)).await.is_err() {
                    return;
                }
            }
        }

        match status.state.as_str() {
            "open" if !is_open => {
                is_open = true;
                if event_tx.send(SessionEvent::Open).await.is_err() {
                    return;
                }
            }
            "close" | "closed" => {
                let reason = DisconnectReason::from_code(status.reason_code.unwrap_or(428));
                let _ = event_tx.send(SessionEvent::Closed(reason)).await;
                return;
            }
            _ => {}
        }

        tokio::time::sleep(interval).await;
    }
}

async fn fetch_status(
    client: &reqwest::Client,
    url: &str,
    timeout: Duration,
) -> Result<SessionStatus, ChannelError> {
    let response = client.get(url).timeout(timeout).send().await?;
    Ok(check(response).await?.json().await?)
}
