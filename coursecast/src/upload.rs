#![doc = "Telegram Bot API transport: implements the core `Transport` contract over HTTP."]
//
//! # Bot API client
//!
//! [`BotApiClient`] sends units with `sendDocument` / `sendVideo` as streamed
//! multipart bodies, text with `sendMessage`, and manages the chat with
//! `pinChatMessage`, `exportChatInviteLink` and `setChatDescription`.
//!
//! The base URL is configurable so a self-hosted Bot API server (which lifts
//! the upload limit to 2 GB) can be used instead of `api.telegram.org`.
//!
//! ## Error mapping
//! - HTTP 429 or a `retry_after` parameter: [`TransportError::RateLimited`]
//! - HTTP 5xx, connection failures and timeouts: [`TransportError::Transient`]
//! - any other rejection: [`TransportError::Fatal`]
//!
//! ## Destination resolution
//! [`resolve_destination`] walks an ordered list of candidate chat ids and keeps
//! the first one the bot can actually see, caching it in the progress ledger.

use anyhow::Result;
use async_trait::async_trait;
use coursecast_core::contract::{
    Destination, MediaKind, SentMessage, Transport, TransportError, UnitMessage, UploadPayload,
};
use coursecast_core::ledger::ProgressLedger;
use futures::Stream;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};

const UPLOAD_CHUNK: usize = 256 * 1024;
/// Used when the server says 429 without telling how long to wait.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct MessageResult {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct ChatResult {
    id: i64,
    title: Option<String>,
    username: Option<String>,
}

/// Maps a failed Bot API call to the transport error taxonomy.
pub fn classify(status: StatusCode, retry_after: Option<u64>, description: &str) -> TransportError {
    if let Some(secs) = retry_after {
        return TransportError::RateLimited(Duration::from_secs(secs));
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return TransportError::RateLimited(DEFAULT_RETRY_AFTER);
    }
    if status.is_server_error() {
        return TransportError::Transient(format!("{status}: {description}"));
    }
    TransportError::Fatal(format!("{status}: {description}"))
}

fn classify_reqwest(e: reqwest::Error) -> TransportError {
    if e.is_builder() {
        TransportError::Fatal(e.to_string())
    } else {
        TransportError::Transient(e.to_string())
    }
}

/// Reads `reader` in fixed-size chunks so the file is never held in memory.
fn body_stream(
    reader: Box<dyn AsyncRead + Send + Sync + Unpin>,
) -> impl Stream<Item = io::Result<Vec<u8>>> + Send + Sync + 'static {
    futures::stream::unfold(Some(reader), |state| async move {
        let mut reader = state?;
        let mut buf = vec![0u8; UPLOAD_CHUNK];
        match reader.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(buf), Some(reader)))
            }
            Err(e) => Some((Err(e), None)),
        }
    })
}

pub struct BotApiClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl BotApiClient {
    pub fn new(api_base_url: &str, token: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        tracing::info!(api_base_url, "Initialized Bot API client");
        Ok(Self {
            http,
            base_url: api_base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }

    async fn decode<T: DeserializeOwned>(method: &str, resp: reqwest::Response) -> Result<T, TransportError> {
        let status = resp.status();
        let body: ApiResponse<T> = match resp.json().await {
            Ok(body) => body,
            Err(e) if status.is_success() => return Err(classify_reqwest(e)),
            Err(_) => return Err(classify(status, None, "unreadable error response")),
        };
        match body {
            ApiResponse {
                ok: true,
                result: Some(result),
                ..
            } => Ok(result),
            ApiResponse {
                description,
                parameters,
                ..
            } => {
                let description = description.unwrap_or_else(|| "no description".to_string());
                let err = classify(status, parameters.and_then(|p| p.retry_after), &description);
                tracing::debug!(method, error = %err, "Bot API call failed");
                Err(err)
            }
        }
    }

    async fn call_json<T: DeserializeOwned>(
        &self,
        method: &str,
        payload: serde_json::Value,
    ) -> Result<T, TransportError> {
        let resp = self
            .http
            .post(self.method_url(method))
            .json(&payload)
            .send()
            .await
            .map_err(classify_reqwest)?;
        Self::decode(method, resp).await
    }

    /// Looks a chat up; fails if the bot cannot see it.
    pub async fn get_chat(&self, chat_id: &str) -> Result<Destination, TransportError> {
        let chat: ChatResult = self.call_json("getChat", json!({ "chat_id": chat_id })).await?;
        let dest = Destination::new(chat.id.to_string());
        Ok(match chat.title.or(chat.username) {
            Some(title) => dest.with_title(title),
            None => dest,
        })
    }

    async fn thumbnail_part(path: &std::path::Path) -> Option<Part> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Some(Part::bytes(bytes).file_name("thumb.jpg")),
            Err(e) => {
                tracing::warn!(thumbnail = %path.display(), error = %e, "Thumbnail unreadable, sending without");
                None
            }
        }
    }
}

#[async_trait]
impl Transport for BotApiClient {
    async fn send_unit(&self, message: UnitMessage) -> Result<SentMessage, TransportError> {
        let UnitMessage {
            destination,
            caption,
            kind,
            payload,
        } = message;
        let UploadPayload { file_name, size, body } = payload;

        let file = Part::stream_with_length(Body::wrap_stream(body_stream(body)), size).file_name(file_name.clone());
        let mut form = Form::new()
            .text("chat_id", destination.id().to_string())
            .text("caption", caption)
            .text("parse_mode", "HTML");

        let method = match &kind {
            MediaKind::Document => {
                form = form.part("document", file);
                "sendDocument"
            }
            MediaKind::Video(meta) => {
                form = form.part("video", file).text("supports_streaming", "true");
                if meta.width > 0 && meta.height > 0 {
                    form = form
                        .text("width", meta.width.to_string())
                        .text("height", meta.height.to_string());
                }
                if meta.duration_secs > 0 {
                    form = form.text("duration", meta.duration_secs.to_string());
                }
                if let Some(thumb) = &meta.thumbnail {
                    if let Some(part) = Self::thumbnail_part(thumb).await {
                        form = form.part("thumb_file", part).text("thumbnail", "attach://thumb_file");
                    }
                }
                "sendVideo"
            }
        };

        tracing::info!(method, file = %file_name, bytes = size, "Uploading unit");
        let resp = self
            .http
            .post(self.method_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(classify_reqwest)?;
        let sent: MessageResult = Self::decode(method, resp).await?;
        Ok(SentMessage {
            message_id: sent.message_id,
        })
    }

    async fn send_text(&self, destination: &Destination, html: &str) -> Result<SentMessage, TransportError> {
        let sent: MessageResult = self
            .call_json(
                "sendMessage",
                json!({
                    "chat_id": destination.id(),
                    "text": html,
                    "parse_mode": "HTML",
                    "disable_web_page_preview": true,
                }),
            )
            .await?;
        Ok(SentMessage {
            message_id: sent.message_id,
        })
    }

    async fn pin_message(&self, destination: &Destination, message_id: i64) -> Result<(), TransportError> {
        let _: bool = self
            .call_json(
                "pinChatMessage",
                json!({
                    "chat_id": destination.id(),
                    "message_id": message_id,
                    "disable_notification": true,
                }),
            )
            .await?;
        Ok(())
    }

    async fn export_invite_link(&self, destination: &Destination) -> Result<String, TransportError> {
        self.call_json("exportChatInviteLink", json!({ "chat_id": destination.id() }))
            .await
    }

    async fn set_description(&self, destination: &Destination, text: &str) -> Result<(), TransportError> {
        let result: Result<bool, TransportError> = self
            .call_json(
                "setChatDescription",
                json!({ "chat_id": destination.id(), "description": text }),
            )
            .await;
        match result {
            Ok(_) => Ok(()),
            // Re-running a finished course sets the same text again.
            Err(TransportError::Fatal(reason)) if reason.contains("not modified") => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// Something that can confirm a chat id is usable.
#[async_trait]
pub trait ChatLookup: Send + Sync {
    async fn lookup_chat(&self, chat_id: &str) -> Result<Destination, TransportError>;
}

#[async_trait]
impl ChatLookup for BotApiClient {
    async fn lookup_chat(&self, chat_id: &str) -> Result<Destination, TransportError> {
        self.get_chat(chat_id).await
    }
}

/// Tries the configured chat id, then the id cached in the ledger.
/// The first one that resolves is cached for the next run.
pub async fn resolve_destination(
    lookup: &dyn ChatLookup,
    ledger: &ProgressLedger,
    configured: Option<&str>,
) -> Result<Destination> {
    let mut candidates: Vec<(&str, String)> = Vec::new();
    if let Some(id) = configured {
        candidates.push(("configured", id.to_string()));
    }
    if let Some(id) = ledger.target_chat() {
        if !candidates.iter().any(|(_, c)| *c == id) {
            candidates.push(("cached", id));
        }
    }

    for (origin, id) in candidates {
        match lookup.lookup_chat(&id).await {
            Ok(dest) => {
                tracing::info!(origin, chat_id = %dest.id(), title = ?dest.title(), "Destination resolved");
                ledger.set_target_chat(dest.id())?;
                return Ok(dest);
            }
            Err(e) => tracing::warn!(origin, chat_id = %id, error = %e, "Destination candidate unusable"),
        }
    }
    anyhow::bail!("No usable destination chat: set TARGET_CHAT_ID or pass --chat-id with a chat the bot is an admin of")
}
