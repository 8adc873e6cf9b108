//! In-memory collaborators for channel and controller tests.

use crate::channel::{ChannelError, Session};
use crate::scanner::Catalog;
use crate::subtitles::SubtitleProvider;
use crate::transfer::{Acquisition, ProgressObserver, StagedPayload, Transfer, TransferRequest};
use async_trait::async_trait;
use reelcast_proto::protocol::{ItemDescriptor, MessageHandle, Payload, SessionEvent};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

/// One call observed by [`RecordingSession`].
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Send {
        to: String,
        handle: MessageHandle,
        payload: Payload,
        /// Text body or caption, whichever the payload carries.
        text: String,
    },
    Edit {
        handle: MessageHandle,
        text: String,
    },
    Delete {
        handle: MessageHandle,
    },
}

fn payload_text(payload: &Payload) -> String {
    match payload {
        Payload::Text(text) => text.clone(),
        Payload::Image { caption, .. } | Payload::Document { caption, .. } => caption.clone(),
    }
}

#[derive(Default)]
struct Recording {
    ops: Vec<Op>,
    next_id: u64,
    failing_edits: u32,
    fail_documents: bool,
    send_calls: u64,
    failing_send: Option<u64>,
    links: Vec<mpsc::Sender<SessionEvent>>,
}

/// Session that opens immediately and records every operation.
#[derive(Default)]
pub struct RecordingSession {
    inner: Mutex<Recording>,
}

impl RecordingSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<Op> {
        self.inner.lock().unwrap().ops.clone()
    }

    /// Make the next `n` edits fail with a transient bridge error.
    pub fn fail_next_edits(&self, n: u32) {
        self.inner.lock().unwrap().failing_edits = n;
    }

    /// Make every document send fail.
    pub fn fail_documents(&self) {
        self.inner.lock().unwrap().fail_documents = true;
    }

    /// Make the `n`-th send call (1-based) fail.
    pub fn fail_send_call(&self, n: u64) {
        self.inner.lock().unwrap().failing_send = Some(n);
    }

    /// Texts of the successful edits applied to `handle`, in order.
    pub fn edits_for(&self, handle: &MessageHandle) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Edit { handle: h, text } if &h == handle => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn sends(&self) -> Vec<(MessageHandle, Payload)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Send { handle, payload, .. } => Some((handle, payload)),
                _ => None,
            })
            .collect()
    }

    pub fn deletes(&self) -> Vec<MessageHandle> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Delete { handle } => Some(handle),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Session for RecordingSession {
    async fn connect(&self) -> Result<mpsc::Receiver<SessionEvent>, ChannelError> {
        let (tx, rx) = mpsc::channel(4);
        let _ = tx.try_send(SessionEvent::Open);
        self.inner.lock().unwrap().links.push(tx);
        Ok(rx)
    }

    async fn send(&self, to: &str, payload: &Payload) -> Result<MessageHandle, ChannelError> {
        let mut inner = self.inner.lock().unwrap();
        inner.send_calls += 1;
        if inner.failing_send == Some(inner.send_calls) {
            return Err(ChannelError::Bridge {
                status: 503,
                body: "send rejected".to_string(),
            });
        }
        if inner.fail_documents && matches!(payload, Payload::Document { .. }) {
            return Err(ChannelError::Bridge {
                status: 500,
                body: "upload rejected".to_string(),
            });
        }
        inner.next_id += 1;
        let handle = MessageHandle(format!("m{}", inner.next_id));
        inner.ops.push(Op::Send {
            to: to.to_string(),
            handle: handle.clone(),
            payload: payload.clone(),
            text: payload_text(payload),
        });
        Ok(handle)
    }

    async fn edit(&self, _to: &str, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.failing_edits > 0 {
            inner.failing_edits -= 1;
            return Err(ChannelError::Bridge {
                status: 503,
                body: "flaky".to_string(),
            });
        }
        inner.ops.push(Op::Edit {
            handle: handle.clone(),
            text: text.to_string(),
        });
        Ok(())
    }

    async fn delete(&self, _to: &str, handle: &MessageHandle) -> Result<(), ChannelError> {
        self.inner.lock().unwrap().ops.push(Op::Delete {
            handle: handle.clone(),
        });
        Ok(())
    }
}

/// Session that replays one scripted event list per `connect` call.
pub struct ScriptedSession {
    scripts: Mutex<VecDeque<Vec<SessionEvent>>>,
    fail_first: bool,
    connects: AtomicUsize,
    links: Mutex<Vec<mpsc::Sender<SessionEvent>>>,
}

impl ScriptedSession {
    pub fn new(scripts: Vec<Vec<SessionEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            fail_first: false,
            connects: AtomicUsize::new(0),
            links: Mutex::new(Vec::new()),
        }
    }

    /// Like `new`, but the first `connect` call errors.
    pub fn failing_first(scripts: Vec<Vec<SessionEvent>>) -> Self {
        Self {
            fail_first: true,
            ..Self::new(scripts)
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Session for ScriptedSession {
    async fn connect(&self) -> Result<mpsc::Receiver<SessionEvent>, ChannelError> {
        let n = self.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_first && n == 0 {
            return Err(ChannelError::Bridge {
                status: 502,
                body: "bridge starting".to_string(),
            });
        }
        let events = self.scripts.lock().unwrap().pop_front().unwrap_or_default();
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            let _ = tx.try_send(event);
        }
        // Scripts without a Closed event stay connected
        self.links.lock().unwrap().push(tx);
        Ok(rx)
    }

    async fn send(&self, _to: &str, _payload: &Payload) -> Result<MessageHandle, ChannelError> {
        Ok(MessageHandle("scripted".to_string()))
    }

    async fn edit(&self, _to: &str, _handle: &MessageHandle, _text: &str) -> Result<(), ChannelError> {
        Ok(())
    }

    async fn delete(&self, _to: &str, _handle: &MessageHandle) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// Catalog answering from a queue of scripted results, then a fixed list.
pub struct FakeCatalog {
    queued: Mutex<VecDeque<anyhow::Result<Vec<ItemDescriptor>>>>,
    fallback: Vec<ItemDescriptor>,
    scanned: Arc<Mutex<Vec<String>>>,
}

impl FakeCatalog {
    pub fn new(items: Vec<ItemDescriptor>) -> Self {
        Self {
            queued: Mutex::new(VecDeque::new()),
            fallback: items,
            scanned: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a one-off result returned before the fallback list.
    pub fn then(self, result: anyhow::Result<Vec<ItemDescriptor>>) -> Self {
        self.queued.lock().unwrap().push_back(result);
        self
    }

    /// Categories requested so far, shared so tests can keep it after boxing.
    pub fn scanned(&self) -> Arc<Mutex<Vec<String>>> {
        self.scanned.clone()
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn scan(&self, category: &str) -> anyhow::Result<Vec<ItemDescriptor>> {
        self.scanned.lock().unwrap().push(category.to_string());
        match self.queued.lock().unwrap().pop_front() {
            Some(result) => result,
            None => Ok(self.fallback.clone()),
        }
    }

    async fn fetch_poster(&self, _url: &str) -> anyhow::Result<Vec<u8>> {
        Ok(vec![0xFF, 0xD8, 0xFF])
    }
}

/// Shared view of what a [`FakeTransfer`] did.
#[derive(Clone, Default)]
pub struct TransferProbe {
    pub requests: Arc<Mutex<Vec<TransferRequest>>>,
    pub in_flight: Arc<AtomicUsize>,
    pub max_in_flight: Arc<AtomicUsize>,
}

/// Transfer that emits scripted progress and stages a dummy file on success.
pub struct FakeTransfer {
    outcomes: VecDeque<bool>,
    progress: Vec<f32>,
    burst: bool,
    staging: TempDir,
    probe: TransferProbe,
}

impl FakeTransfer {
    /// Every acquisition succeeds unless scripted otherwise.
    pub fn new() -> Self {
        Self {
            outcomes: VecDeque::new(),
            progress: Vec::new(),
            burst: false,
            staging: TempDir::new().unwrap(),
            probe: TransferProbe::default(),
        }
    }

    pub fn with_outcomes(mut self, outcomes: Vec<bool>) -> Self {
        self.outcomes = outcomes.into();
        self
    }

    pub fn with_progress(mut self, progress: Vec<f32>) -> Self {
        self.progress = progress;
        self
    }

    /// Emit all progress at once without yielding to the relay.
    pub fn in_one_burst(mut self) -> Self {
        self.burst = true;
        self
    }

    pub fn probe(&self) -> TransferProbe {
        self.probe.clone()
    }
}

#[async_trait]
impl Transfer for FakeTransfer {
    async fn acquire(
        &mut self,
        request: &TransferRequest,
        observer: Box<dyn ProgressObserver>,
    ) -> Acquisition {
        let now = self.probe.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.probe.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.probe.requests.lock().unwrap().push(request.clone());

        for percent in &self.progress {
            let _ = observer.on_progress(*percent);
            if !self.burst {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        }
        drop(observer);

        let success = self.outcomes.pop_front().unwrap_or(true);
        let result = if success {
            let path = self.staging.path().join(format!("{}.mp4", request.identifier));
            std::fs::write(&path, b"movie").unwrap();
            Acquisition::delivered(vec![StagedPayload::new(path)])
        } else {
            Acquisition::failed()
        };

        self.probe.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Subtitle provider with a fixed answer.
pub struct FakeSubtitles(pub Option<String>);

#[async_trait]
impl SubtitleProvider for FakeSubtitles {
    async fn find(&self, _title: &str) -> anyhow::Result<Option<String>> {
        Ok(self.0.clone())
    }
}
