//! Persistent record of delivered titles.
//!
//! One marker file per identifier under the ledger directory. Only existence
//! matters; the body holds the delivery time for humans poking at the folder.

use anyhow::Context;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Strip every character outside `[A-Za-z0-9]`: `"Nova (2024)"` -> `"Nova2024"`.
pub fn identifier_for(title: &str) -> String {
    title.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

pub struct Ledger {
    dir: PathBuf,
}

impl Ledger {
    pub fn open(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create ledger dir {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn marker_path(&self, identifier: &str) -> PathBuf {
        self.dir.join(format!("{}.txt", identifier))
    }

    pub fn has_record(&self, identifier: &str) -> bool {
        self.marker_path(identifier).exists()
    }

    /// Write the marker for `identifier`. Recording twice is a no-op.
    pub fn record(&self, identifier: &str) -> anyhow::Result<()> {
        let path = self.marker_path(identifier);
        let mut file = match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                debug!("ledger: {} already recorded", identifier);
                return Ok(());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to create marker {}", path.display()))
            }
        };
        writeln!(file, "{}", chrono::Local::now().to_rfc3339())
            .with_context(|| format!("Failed to write marker {}", path.display()))?;
        debug!("ledger: recorded {}", identifier);
        Ok(())
    }
}
