//! aria2c wrapper: one peer-to-peer acquisition at a time.
//!
//! Every call gets an empty scratch directory, relays `(NN%)` progress tokens
//! from aria2c's stdout to a [`ProgressObserver`], and on exit moves the first
//! playable file out to the staging directory. The scratch directory is wiped
//! on every return path by [`ScratchGuard`].

use async_trait::async_trait;
use regex::Regex;
use reelcast_proto::config::{PathsConfig, TransferConfig};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// What to fetch and how to label it.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    /// Human label for logs (the title).
    pub label: String,
    /// Ledger identifier, reused as the staged file stem.
    pub identifier: String,
    /// Magnet locator passed to aria2c.
    pub locator: String,
}

/// Receives percentages parsed from the transfer tool's output.
///
/// Errors are logged by the supervisor and never abort the transfer.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, percent: f32) -> anyhow::Result<()>;
}

/// A payload moved out of the scratch dir. The file is removed on drop, so
/// keep this alive until delivery finishes.
#[derive(Debug)]
pub struct StagedPayload {
    path: PathBuf,
}

impl StagedPayload {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lowercased extension, e.g. `"mkv"`.
    pub fn extension(&self) -> String {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase()
    }

    pub fn mime_type(&self) -> &'static str {
        match self.extension().as_str() {
            "mkv" => "video/x-matroska",
            "avi" => "video/x-msvideo",
            "webm" => "video/webm",
            _ => "video/mp4",
        }
    }
}

impl Drop for StagedPayload {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("transfer: failed to remove staged {}: {}", self.path.display(), e);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct Acquisition {
    pub success: bool,
    pub files: Vec<StagedPayload>,
}

impl Acquisition {
    pub fn failed() -> Self {
        Self::default()
    }

    pub fn delivered(files: Vec<StagedPayload>) -> Self {
        Self {
            success: !files.is_empty(),
            files,
        }
    }
}

#[async_trait]
pub trait Transfer: Send {
    /// Run one acquisition to completion. `&mut self` keeps a supervisor from
    /// being re-entered on its scratch directory.
    async fn acquire(
        &mut self,
        request: &TransferRequest,
        observer: Box<dyn ProgressObserver>,
    ) -> Acquisition;
}

fn progress_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\(\s*(\d+(?:\.\d+)?)\s*%\s*\)").expect("valid progress regex"))
}

/// Extract the first `(NN%)` / `(NN.N%)` percentage from a line of aria2c
/// output, e.g. `[#2089b0 400MiB/1.2GiB(33%) CN:12 DL:4.1MiB ETA:3m]` -> 33.
/// Values above 100 are ignored.
pub fn parse_progress(line: &str) -> Option<f32> {
    let caps = progress_regex().captures(line)?;
    let value: f32 = caps.get(1)?.as_str().parse().ok()?;
    (0.0..=100.0).contains(&value).then_some(value)
}

/// Removes everything inside the scratch directory when dropped.
struct ScratchGuard {
    dir: PathBuf,
}

impl ScratchGuard {
    /// Wipe leftovers from a previous run and make sure the directory exists.
    fn prepare(dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        wipe_dir(dir);
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        wipe_dir(&self.dir);
        debug!("transfer: scratch {} wiped", self.dir.display());
    }
}

fn wipe_dir(dir: &Path) {
    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("transfer: cannot read {}: {}", dir.display(), e);
            }
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        if let Err(e) = result {
            warn!("transfer: failed to remove {}: {}", path.display(), e);
        }
    }
}

/// Depth-first, name-sorted walk collecting files with a wanted extension.
pub fn find_media_files(dir: &Path, extensions: &[String]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    collect_media(dir, extensions, &mut found);
    found
}

fn collect_media(dir: &Path, extensions: &[String], found: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    let mut paths: Vec<PathBuf> = entries.flatten().map(|e| e.path()).collect();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            collect_media(&path, extensions, found);
        } else if path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
        {
            found.push(path);
        }
    }
}

/// Move `src` into `staging_dir` as `<stem>.<ext>`; falls back to copy when
/// the two directories sit on different filesystems.
async fn stage(src: &Path, staging_dir: &Path, stem: &str) -> std::io::Result<StagedPayload> {
    tokio::fs::create_dir_all(staging_dir).await?;
    let ext = src
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin")
        .to_ascii_lowercase();
    let stem = if stem.is_empty() { "payload" } else { stem };
    let dest = staging_dir.join(format!("{}.{}", stem, ext));

    if tokio::fs::rename(src, &dest).await.is_err() {
        tokio::fs::copy(src, &dest).await?;
        let _ = tokio::fs::remove_file(src).await;
    }
    Ok(StagedPayload::new(dest))
}

/// Supervises aria2c processes.
pub struct TransferSupervisor {
    binary: Option<PathBuf>,
    scratch_dir: PathBuf,
    staging_dir: PathBuf,
    summary_interval_secs: u64,
    media_extensions: Vec<String>,
}

impl TransferSupervisor {
    pub fn new(cfg: &TransferConfig, paths: &PathsConfig) -> Self {
        let binary = cfg
            .aria2c_path
            .clone()
            .or_else(reelcast_proto::platform::find_aria2c_binary);
        match &binary {
            Some(p) => info!("transfer: using aria2c at {}", p.display()),
            None => warn!("transfer: aria2c not found; every acquisition will fail"),
        }
        Self {
            binary,
            scratch_dir: paths.scratch_dir.clone(),
            staging_dir: paths.staging_dir.clone(),
            summary_interval_secs: cfg.summary_interval_secs,
            media_extensions: cfg.media_extensions.clone(),
        }
    }

    pub fn scratch_dir(&self) -> &Path {
        &self.scratch_dir
    }

    async fn run(
        &self,
        binary: &Path,
        request: &TransferRequest,
        observer: &dyn ProgressObserver,
    ) -> anyhow::Result<()> {
        let mut child = Command::new(binary)
            .arg(format!("--dir={}", self.scratch_dir.display()))
            .arg("--seed-time=0")
            .arg(format!("--summary-interval={}", self.summary_interval_secs))
            .arg(&request.locator)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow::anyhow!("Failed to spawn aria2c: {}", e))?;

        if let Some(stderr) = child.stderr.take() {
            let mut lines = BufReader::new(stderr).lines();
            tokio::spawn(async move {
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!("aria2c stderr: {}", line);
                }
            });
        }

        if let Some(stdout) = child.stdout.take() {
            let mut reader = BufReader::new(stdout);
            let mut buf = Vec::new();
            loop {
                buf.clear();
                match reader.read_until(b'\n', &mut buf).await {
                    Ok(0) => break,
                    Ok(_) => {
                        let text = String::from_utf8_lossy(&buf);
                        // Summary readouts can be redrawn with carriage returns
                        for segment in text.split('\r') {
                            let Some(percent) = parse_progress(segment) else {
                                continue;
                            };
                            if let Err(e) = observer.on_progress(percent) {
                                debug!("transfer: progress observer failed: {}", e);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("aria2c: stdout read error: {}", e);
                        break;
                    }
                }
            }
        }

        let status = child.wait().await?;
        // Exit status is informational: a playable file on disk decides success
        if status.success() {
            debug!("aria2c: exited cleanly");
        } else {
            warn!("aria2c: exited with status {:?}", status.code());
        }
        Ok(())
    }
}

#[async_trait]
impl Transfer for TransferSupervisor {
    async fn acquire(
        &mut self,
        request: &TransferRequest,
        observer: Box<dyn ProgressObserver>,
    ) -> Acquisition {
        let _scratch = match ScratchGuard::prepare(&self.scratch_dir) {
            Ok(g) => g,
            Err(e) => {
                warn!(
                    "transfer: cannot prepare scratch {}: {}",
                    self.scratch_dir.display(),
                    e
                );
                return Acquisition::failed();
            }
        };

        let Some(binary) = self.binary.clone() else {
            warn!("transfer: no aria2c binary, skipping {}", request.label);
            return Acquisition::failed();
        };

        info!("transfer: starting {}", request.label);
        if let Err(e) = self.run(&binary, request, observer.as_ref()).await {
            warn!("transfer: {}: {}", request.label, e);
            return Acquisition::failed();
        }

        let found = find_media_files(&self.scratch_dir, &self.media_extensions);
        let Some(first) = found.first() else {
            warn!("transfer: no playable file produced for {}", request.label);
            return Acquisition::failed();
        };
        if found.len() > 1 {
            debug!(
                "transfer: {} candidate files, taking {}",
                found.len(),
                first.display()
            );
        }

        match stage(first, &self.staging_dir, &request.identifier).await {
            Ok(staged) => {
                info!("transfer: {} ready at {}", request.label, staged.path().display());
                Acquisition::delivered(vec![staged])
            }
            Err(e) => {
                warn!("transfer: failed to stage {}: {}", first.display(), e);
                Acquisition::failed()
            }
        }
    }
}
