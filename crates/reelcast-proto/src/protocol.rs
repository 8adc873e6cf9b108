use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::ledger;

// ── catalog feed ──────────────────────────────────────────────────────────────

/// Top-level body of `list_movies.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedResponse {
    pub status: String,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub data: Option<FeedData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedData {
    #[serde(default)]
    pub movie_count: u64,
    #[serde(default)]
    pub movies: Option<Vec<FeedMovie>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedMovie {
    pub title: String,
    #[serde(default)]
    pub year: u32,
    #[serde(default)]
    pub rating: f32,
    #[serde(default)]
    pub runtime: u32,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub large_cover_image: Option<String>,
    #[serde(default)]
    pub medium_cover_image: Option<String>,
    #[serde(default)]
    pub torrents: Vec<FeedTorrent>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedTorrent {
    pub hash: String,
    #[serde(default)]
    pub quality: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
}

impl FeedResponse {
    /// Unwrap the candidate list, treating a non-"ok" status as an error.
    pub fn into_items(self) -> anyhow::Result<Vec<ItemDescriptor>> {
        if self.status != "ok" {
            anyhow::bail!(
                "feed returned status {:?}: {}",
                self.status,
                self.status_message.unwrap_or_default()
            );
        }
        let Some(data) = self.data else {
            return Ok(Vec::new());
        };
        if data.movie_count == 0 {
            return Ok(Vec::new());
        }
        Ok(data
            .movies
            .unwrap_or_default()
            .into_iter()
            .map(ItemDescriptor::from)
            .collect())
    }
}

// ── item descriptor ───────────────────────────────────────────────────────────

/// One discoverable film, immutable once scanned.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemDescriptor {
    pub title: String,
    pub year: u32,
    pub rating: f32,
    pub genres: Vec<String>,
    /// Minutes. `None` when the feed reports 0.
    pub runtime: Option<u32>,
    pub poster_url: Option<String>,
    pub options: Vec<TransferOption>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOption {
    pub hash: String,
    pub quality: String,
    pub kind: Option<String>,
    pub size: Option<String>,
}

impl From<FeedMovie> for ItemDescriptor {
    fn from(m: FeedMovie) -> Self {
        Self {
            title: m.title,
            year: m.year,
            rating: m.rating,
            genres: m.genres,
            runtime: (m.runtime > 0).then_some(m.runtime),
            poster_url: m
                .large_cover_image
                .filter(|u| !u.is_empty())
                .or(m.medium_cover_image.filter(|u| !u.is_empty())),
            options: m
                .torrents
                .into_iter()
                .map(|t| TransferOption {
                    hash: t.hash,
                    quality: t.quality,
                    kind: t.kind,
                    size: t.size,
                })
                .collect(),
        }
    }
}

impl ItemDescriptor {
    /// Ledger key derived from the title.
    pub fn identifier(&self) -> String {
        ledger::identifier_for(&self.title)
    }

    /// Pick the transfer option whose quality ranks earliest in `preferred`,
    /// falling back to the first listed option.
    pub fn preferred_option(&self, preferred: &[String]) -> Option<&TransferOption> {
        preferred
            .iter()
            .find_map(|q| {
                self.options
                    .iter()
                    .find(|o| o.quality.eq_ignore_ascii_case(q))
            })
            .or_else(|| self.options.first())
    }
}

/// Build the magnet locator handed to the transfer tool.
///
/// `magnet:?xt=urn:btih:<hash>&dn=<escaped title>&tr=<tracker>...`
pub fn magnet_uri(hash: &str, title: &str, trackers: &[String]) -> String {
    let mut uri = format!(
        "magnet:?xt=urn:btih:{}&dn={}",
        hash,
        urlencoding::encode(title)
    );
    for tr in trackers {
        uri.push_str("&tr=");
        uri.push_str(tr);
    }
    uri
}

// ── delivery channel ──────────────────────────────────────────────────────────

/// Opaque id of a message already posted to the destination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageHandle(pub String);

impl fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DocumentSource {
    Path(PathBuf),
    Url(String),
}

/// Content of one outgoing message.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Text(String),
    Image {
        url: String,
        caption: String,
    },
    Document {
        source: DocumentSource,
        file_name: String,
        mime_type: String,
        caption: String,
        /// JPEG bytes shown as a preview next to the document.
        thumbnail: Option<Vec<u8>>,
    },
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Text(_) => "text",
            Payload::Image { .. } => "image",
            Payload::Document { .. } => "document",
        }
    }
}

/// Why the underlying session closed. Codes follow the messaging library's
/// disconnect status codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    LoggedOut,
    TimedOut,
    MultideviceMismatch,
    ConnectionClosed,
    ConnectionReplaced,
    BadSession,
    Unavailable,
    RestartRequired,
    Other(u16),
}

impl DisconnectReason {
    pub fn from_code(code: u16) -> Self {
        match code {
            401 => Self::LoggedOut,
            408 => Self::TimedOut,
            411 => Self::MultideviceMismatch,
            428 => Self::ConnectionClosed,
            440 => Self::ConnectionReplaced,
            500 => Self::BadSession,
            503 => Self::Unavailable,
            515 => Self::RestartRequired,
            other => Self::Other(other),
        }
    }

    /// Only an explicit logout revokes the credentials; everything else is
    /// worth a reconnect.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::LoggedOut)
    }
}

/// Lifecycle notifications from the session collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Open,
    Closed(DisconnectReason),
    /// Pairing payload (QR contents) to show to the operator.
    Pairing(String),
}

/// Connection state of the delivery channel.
///
/// Transitions:
///   Disconnected -> Connecting -> Open -> Disconnected -> Connecting ...
///   Open -> Closing -> Disconnected (shutdown)
///   any -> Terminated (logged out, final)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Disconnected,
    Connecting,
    Open,
    Closing,
    Terminated,
}
