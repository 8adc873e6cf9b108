//! Pipeline controller.
//!
//! One pass scans the current category, handles at most one new item
//! (announce, acquire with live progress, deliver, finalize, record) and
//! advances the category cursor. `run` repeats passes while the delivery
//! channel is usable and returns only once the session is terminated.

use crate::channel::{ChannelError, DeliveryChannel};
use crate::scanner::Catalog;
use crate::subtitles::SubtitleProvider;
use crate::transfer::{ProgressObserver, StagedPayload, Transfer, TransferRequest};
use reelcast_proto::config::{Config, RecordPolicy};
use reelcast_proto::ledger::Ledger;
use reelcast_proto::messages;
use reelcast_proto::protocol::{
    magnet_uri, DocumentSource, ItemDescriptor, MessageHandle, Payload, TransferOption,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Progress values buffered between the transfer and the status edits.
const PROGRESS_BACKLOG: usize = 64;

/// Round-robin position over the configured categories.
#[derive(Debug, Clone)]
pub struct CategoryCursor {
    categories: Vec<String>,
    index: usize,
}

impl CategoryCursor {
    pub fn new(categories: Vec<String>) -> anyhow::Result<Self> {
        Self::starting_at(categories, 0)
    }

    pub fn starting_at(categories: Vec<String>, index: usize) -> anyhow::Result<Self> {
        if categories.is_empty() {
            anyhow::bail!("category list is empty");
        }
        let index = index % categories.len();
        Ok(Self { categories, index })
    }

    pub fn current(&self) -> &str {
        &self.categories[self.index]
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.categories.len();
    }
}

/// Timing and presentation knobs, lifted out of [`Config`].
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub cycle_pace: Duration,
    pub error_backoff: Duration,
    pub success_cooldown: Duration,
    pub failure_cooldown: Duration,
    pub record_policy: RecordPolicy,
    pub signature: Option<String>,
    pub preferred_qualities: Vec<String>,
    pub trackers: Vec<String>,
}

impl PipelineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            cycle_pace: cfg.pipeline.cycle_pace(),
            error_backoff: cfg.pipeline.error_backoff(),
            success_cooldown: cfg.pipeline.success_cooldown(),
            failure_cooldown: cfg.pipeline.failure_cooldown(),
            record_policy: cfg.pipeline.record_policy,
            signature: cfg.pipeline.signature.clone(),
            preferred_qualities: cfg.catalog.preferred_qualities.clone(),
            trackers: cfg.transfer.trackers.clone(),
        }
    }
}

/// What a single pass did. Item outcomes carry the ledger identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    ScanFailed,
    NothingNew,
    Delivered(String),
    Failed(String),
    /// The channel refused the announce or status message; nothing was
    /// acquired.
    ChannelUnavailable,
}

/// Forwards transfer progress to the relay future without blocking the
/// transfer's output reader.
struct StatusRelay {
    tx: mpsc::Sender<f32>,
}

impl ProgressObserver for StatusRelay {
    fn on_progress(&self, percent: f32) -> anyhow::Result<()> {
        self.tx
            .try_send(percent)
            .map_err(|e| anyhow::anyhow!("progress relay: {}", e))
    }
}

/// Apply progress values as status edits, in arrival order. Ends when the
/// observer is dropped.
async fn relay_progress(
    channel: &DeliveryChannel,
    status: &MessageHandle,
    title: &str,
    mut rx: mpsc::Receiver<f32>,
) {
    let mut last: Option<String> = None;
    while let Some(percent) = rx.recv().await {
        let text = messages::progress(title, percent);
        if last.as_deref() == Some(text.as_str()) {
            continue;
        }
        if let Err(e) = channel.edit(status, &text).await {
            debug!("channel: progress edit dropped: {}", e);
        }
        last = Some(text);
    }
}

fn refused(err: ChannelError, what: &str) -> Result<PassOutcome, ChannelError> {
    match err {
        ChannelError::Terminated => Err(err),
        other => {
            warn!("channel: {} send failed: {}", what, other);
            Ok(PassOutcome::ChannelUnavailable)
        }
    }
}

pub struct Controller {
    channel: Arc<DeliveryChannel>,
    catalog: Box<dyn Catalog>,
    transfer: Box<dyn Transfer>,
    subtitles: Option<Box<dyn SubtitleProvider>>,
    ledger: Ledger,
    cursor: CategoryCursor,
    settings: PipelineSettings,
}

impl Controller {
    pub fn new(
        channel: Arc<DeliveryChannel>,
        catalog: Box<dyn Catalog>,
        transfer: Box<dyn Transfer>,
        subtitles: Option<Box<dyn SubtitleProvider>>,
        ledger: Ledger,
        cursor: CategoryCursor,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            channel,
            catalog,
            transfer,
            subtitles,
            ledger,
            cursor,
            settings,
        }
    }

    pub fn cursor(&self) -> &CategoryCursor {
        &self.cursor
    }

    /// Loop until the session is terminated.
    pub async fn run(&mut self) -> Result<(), ChannelError> {
        info!(
            "pipeline: starting at category {} ({})",
            self.cursor.current(),
            self.cursor.index()
        );
        loop {
            self.channel.wait_open().await?;
            let outcome = self.run_pass().await?;
            let pause = self.pause_after(&outcome);
            if !pause.is_zero() {
                info!("pipeline: {:?}, pausing {:?}", outcome, pause);
                tokio::time::sleep(pause).await;
            }
            tokio::time::sleep(self.settings.cycle_pace).await;
        }
    }

    /// Extra sleep owed after `outcome`, on top of the cycle pace.
    pub fn pause_after(&self, outcome: &PassOutcome) -> Duration {
        match outcome {
            PassOutcome::ScanFailed => self.settings.error_backoff,
            PassOutcome::Delivered(_) => self.settings.success_cooldown,
            PassOutcome::Failed(_) => self.settings.failure_cooldown,
            PassOutcome::NothingNew | PassOutcome::ChannelUnavailable => Duration::ZERO,
        }
    }

    /// Scan the current category, handle at most one new item, advance the
    /// cursor. Only a terminated session is an error.
    pub async fn run_pass(&mut self) -> Result<PassOutcome, ChannelError> {
        let category = self.cursor.current().to_string();
        let outcome = match self.catalog.scan(&category).await {
            Ok(items) => self.handle_first_new(items).await?,
            Err(e) => {
                warn!("feed: scan of {} failed: {:#}", category, e);
                PassOutcome::ScanFailed
            }
        };
        self.cursor.advance();
        Ok(outcome)
    }

    async fn handle_first_new(
        &mut self,
        items: Vec<ItemDescriptor>,
    ) -> Result<PassOutcome, ChannelError> {
        for item in &items {
            let identifier = item.identifier();
            if identifier.is_empty() {
                warn!("pipeline: skipping {:?}: title yields no identifier", item.title);
                continue;
            }
            if self.ledger.has_record(&identifier) {
                continue;
            }
            let Some(option) = item
                .preferred_option(&self.settings.preferred_qualities)
                .cloned()
            else {
                warn!("pipeline: skipping {}: no transfer options", item.title);
                continue;
            };
            return self.handle_item(item, &identifier, &option).await;
        }
        debug!("pipeline: nothing new");
        Ok(PassOutcome::NothingNew)
    }

    async fn handle_item(
        &mut self,
        item: &ItemDescriptor,
        identifier: &str,
        option: &TransferOption,
    ) -> Result<PassOutcome, ChannelError> {
        info!("pipeline: handling {} ({})", item.title, option.quality);

        let caption = messages::announce_caption(item, self.settings.signature.as_deref());
        let announce_payload = match &item.poster_url {
            Some(url) => Payload::Image {
                url: url.clone(),
                caption,
            },
            None => Payload::Text(caption),
        };
        let announce = match self.channel.send(&announce_payload).await {
            Ok(handle) => handle,
            Err(e) => return refused(e, "announce"),
        };
        let status = match self
            .channel
            .send(&Payload::Text(messages::status_placeholder()))
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                if !matches!(e, ChannelError::Terminated) {
                    let text = messages::failed(&item.title);
                    if let Err(edit_err) = self.channel.edit_final(&announce, &text).await {
                        warn!("channel: final edit for {} failed: {}", item.title, edit_err);
                    }
                }
                return refused(e, "status");
            }
        };

        let request = TransferRequest {
            label: item.title.clone(),
            identifier: identifier.to_string(),
            locator: magnet_uri(&option.hash, &item.title, &self.settings.trackers),
        };
        let (tx, rx) = mpsc::channel(PROGRESS_BACKLOG);
        let channel = self.channel.as_ref();
        let transfer = &mut self.transfer;
        let (acquisition, ()) = tokio::join!(
            transfer.acquire(&request, Box::new(StatusRelay { tx })),
            relay_progress(channel, &status, &item.title, rx),
        );

        let delivered = match acquisition.files.first() {
            Some(staged) if acquisition.success => self.deliver_file(item, option, staged).await,
            _ => false,
        };
        // Removes the staged payload
        drop(acquisition);

        let final_text = if delivered {
            messages::completed(&item.title)
        } else {
            messages::failed(&item.title)
        };
        if let Err(e) = self.channel.edit_final(&announce, &final_text).await {
            warn!("channel: final edit for {} failed: {}", item.title, e);
        }
        if delivered {
            self.send_subtitles(&item.title).await;
        }
        if let Err(e) = self.channel.delete(&status).await {
            warn!("channel: status delete for {} failed: {}", item.title, e);
        }

        if self.settings.record_policy.should_record(delivered) {
            if let Err(e) = self.ledger.record(identifier) {
                warn!("ledger: failed to record {}: {:#}", identifier, e);
            }
        }

        if delivered {
            info!("pipeline: delivered {}", item.title);
            Ok(PassOutcome::Delivered(identifier.to_string()))
        } else {
            warn!("pipeline: {} failed, will retry on a later pass", item.title);
            Ok(PassOutcome::Failed(identifier.to_string()))
        }
    }

    /// Upload the staged file. The poster doubles as thumbnail when it loads.
    async fn deliver_file(
        &self,
        item: &ItemDescriptor,
        option: &TransferOption,
        staged: &StagedPayload,
    ) -> bool {
        let thumbnail = match &item.poster_url {
            Some(url) => match self.catalog.fetch_poster(url).await {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    debug!("feed: no thumbnail for {}: {:#}", item.title, e);
                    None
                }
            },
            None => None,
        };
        let payload = Payload::Document {
            source: DocumentSource::Path(staged.path().to_path_buf()),
            file_name: format!("{}.{}", item.title, staged.extension()),
            mime_type: staged.mime_type().to_string(),
            caption: messages::document_caption(item, &messages::file_details(item, option)),
            thumbnail,
        };
        match self.channel.send(&payload).await {
            Ok(_) => true,
            Err(e) => {
                warn!("channel: upload of {} failed: {}", item.title, e);
                false
            }
        }
    }

    async fn send_subtitles(&self, title: &str) {
        let Some(provider) = &self.subtitles else {
            return;
        };
        let url = match provider.find(title).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                debug!("subtitles: none found for {}", title);
                return;
            }
            Err(e) => {
                debug!("subtitles: lookup for {} failed: {:#}", title, e);
                return;
            }
        };
        let payload = Payload::Document {
            source: DocumentSource::Url(url),
            file_name: format!("[SUB]_{}.zip", title),
            mime_type: "application/zip".to_string(),
            caption: messages::subtitle_caption(title),
            thumbnail: None,
        };
        if let Err(e) = self.channel.send(&payload).await {
            debug!("subtitles: send for {} failed: {}", title, e);
        }
    }
}
