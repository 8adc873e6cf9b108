/// Delivery channel: one messaging session, one destination.
///
/// ```text
///   DeliveryChannel::open()
///         │
///         └── supervisor task
///               ├── Session::connect() → event stream
///               │      ├── Open        → LinkState::Open
///               │      ├── Pairing     → logged for the operator
///               │      └── Closed(r)   → Disconnected, backoff, reconnect
///               └── Closed(LoggedOut)  → LinkState::Terminated, task exits
/// ```
///
/// The controller only talks to `send` / `edit` / `delete` / `wait_open` and
/// never sees the session itself.
use async_trait::async_trait;
use rand::Rng;
use reelcast_proto::config::ChannelConfig;
use reelcast_proto::protocol::{DisconnectReason, LinkState, MessageHandle, Payload, SessionEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("session logged out; channel terminated")]
    Terminated,
    #[error("channel is not open ({0:?})")]
    NotOpen(LinkState),
    #[error("bridge request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("bridge returned {status}: {body}")]
    Bridge { status: u16, body: String },
    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
}

/// The messaging session collaborator. Everything protocol-level (handshake,
/// encryption, credential storage) lives behind this.
#[async_trait]
pub trait Session: Send + Sync {
    /// Start (or restart) a session. Lifecycle events arrive on the returned
    /// receiver; a `Closed` event ends that connection.
    async fn connect(&self) -> Result<mpsc::Receiver<SessionEvent>, ChannelError>;
    async fn send(&self, to: &str, payload: &Payload) -> Result<MessageHandle, ChannelError>;
    async fn edit(&self, to: &str, handle: &MessageHandle, text: &str) -> Result<(), ChannelError>;
    async fn delete(&self, to: &str, handle: &MessageHandle) -> Result<(), ChannelError>;
}

/// Exponential reconnect backoff with jitter.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub min: Duration,
    pub max: Duration,
}

impl ReconnectPolicy {
    pub fn from_config(cfg: &ChannelConfig) -> Self {
        Self {
            min: Duration::from_millis(cfg.reconnect_min_ms),
            max: Duration::from_millis(cfg.reconnect_max_ms.max(cfg.reconnect_min_ms)),
        }
    }

    /// Delay before reconnect attempt `attempt` (0-based): min * 2^attempt,
    /// capped at max, plus up to 25% jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let base = self
            .min
            .saturating_mul(1u32 << attempt.min(16))
            .min(self.max);
        let jitter_ms = (base.as_millis() as u64) / 4;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

pub struct DeliveryChannel {
    session: Arc<dyn Session>,
    destination: String,
    policy: ReconnectPolicy,
    final_retries: u32,
    state_tx: Arc<watch::Sender<LinkState>>,
    state_rx: watch::Receiver<LinkState>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl DeliveryChannel {
    pub fn new(session: Arc<dyn Session>, cfg: &ChannelConfig) -> Self {
        let (state_tx, state_rx) = watch::channel(LinkState::Disconnected);
        Self {
            session,
            destination: cfg.destination.clone(),
            policy: ReconnectPolicy::from_config(cfg),
            final_retries: cfg.final_retries,
            state_tx: Arc::new(state_tx),
            state_rx,
            supervisor: Mutex::new(None),
        }
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }

    pub fn state(&self) -> LinkState {
        *self.state_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<LinkState> {
        self.state_rx.clone()
    }

    /// Start the connection supervisor. Calling again while it runs is a no-op.
    pub async fn open(&self) {
        let mut guard = self.supervisor.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        *guard = Some(tokio::spawn(supervise(
            self.session.clone(),
            self.state_tx.clone(),
            self.policy.clone(),
        )));
    }

    /// Stop reconnecting and mark the link down.
    pub async fn close(&self) {
        self.state_tx.send_replace(LinkState::Closing);
        if let Some(handle) = self.supervisor.lock().await.take() {
            handle.abort();
        }
        self.state_tx.send_replace(LinkState::Disconnected);
        info!("channel: closed");
    }

    /// Suspend until the link is open. Fails once the session is terminated.
    pub async fn wait_open(&self) -> Result<(), ChannelError> {
        let mut rx = self.state_rx.clone();
        loop {
            let state = *rx.borrow_and_update();
            match state {
                LinkState::Open => return Ok(()),
                LinkState::Terminated => return Err(ChannelError::Terminated),
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Err(ChannelError::Terminated);
            }
        }
    }

    fn ensure_open(&self) -> Result<(), ChannelError> {
        match self.state() {
            LinkState::Open => Ok(()),
            LinkState::Terminated => Err(ChannelError::Terminated),
            other => Err(ChannelError::NotOpen(other)),
        }
    }

    pub async fn send(&self, payload: &Payload) -> Result<MessageHandle, ChannelError> {
        self.ensure_open()?;
        let handle = self.session.send(&self.destination, payload).await?;
        debug!("channel: sent {} message {}", payload.kind(), handle);
        Ok(handle)
    }

    pub async fn edit(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        self.ensure_open()?;
        self.session.edit(&self.destination, handle, text).await
    }

    pub async fn delete(&self, handle: &MessageHandle) -> Result<(), ChannelError> {
        self.ensure_open()?;
        self.session.delete(&self.destination, handle).await
    }

    /// Edit for a final outcome: transient failures are retried with backoff,
    /// the last error is returned to the caller.
    pub async fn edit_final(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        let mut attempt = 0;
        loop {
            match self.edit(handle, text).await {
                Ok(()) => return Ok(()),
                Err(ChannelError::Terminated) => return Err(ChannelError::Terminated),
                Err(e) if attempt < self.final_retries => {
                    let delay = self.policy.delay(attempt);
                    warn!("channel: final edit failed ({}), retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

async fn supervise(
    session: Arc<dyn Session>,
    state: Arc<watch::Sender<LinkState>>,
    policy: ReconnectPolicy,
) {
    let mut attempt = 0u32;
    loop {
        state.send_replace(LinkState::Connecting);
        info!("channel: connecting (attempt {})", attempt + 1);

        let reason = match session.connect().await {
            Ok(mut events) => {
                let mut reason = DisconnectReason::ConnectionClosed;
                while let Some(event) = events.recv().await {
                    match event {
                        SessionEvent::Open => {
                            attempt = 0;
                            state.send_replace(LinkState::Open);
                            info!("channel: session open");
                        }
                        SessionEvent::Pairing(code) => {
                            warn!("channel: pairing required, link this device with code: {}", code);
                        }
                        SessionEvent::Closed(r) => {
                            reason = r;
                            break;
                        }
                    }
                }
                reason
            }
            Err(e) => {
                warn!("channel: connect failed: {}", e);
                DisconnectReason::Unavailable
            }
        };

        if reason.is_permanent() {
            error!("channel: session logged out, not reconnecting");
            state.send_replace(LinkState::Terminated);
            return;
        }

        state.send_replace(LinkState::Disconnected);
        let delay = policy.delay(attempt);
        attempt = attempt.saturating_add(1);
        warn!("channel: session closed ({:?}), reconnecting in {:?}", reason, delay);
        tokio::time::sleep(delay).await;
    }
}
