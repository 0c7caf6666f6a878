use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;

/// On-disk layout of an angler store root. Campaigns, per-recipient results,
/// and the pending mail queue each live in their own directory of YAML
/// sidecars; logs are JSON lines.
#[derive(Debug, Clone)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn campaigns(&self) -> PathBuf {
        self.root.join("campaigns")
    }

    pub fn campaign_file(&self, id: u64) -> PathBuf {
        self.campaigns().join(format!("{id}.yml"))
    }

    pub fn queue(&self) -> PathBuf {
        self.root.join("queue")
    }

    pub fn queue_file(&self, rid: &str) -> PathBuf {
        self.queue().join(format!("{rid}.yml"))
    }

    pub fn results(&self) -> PathBuf {
        self.root.join("results")
    }

    pub fn result_file(&self, rid: &str) -> PathBuf {
        self.results().join(format!("{rid}.yml"))
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("angler.log")
    }

    pub fn ensure(&self) -> Result<()> {
        fs::create_dir_all(&self.root)?;
        for leaf in ["campaigns", "queue", "results", "logs"] {
            fs::create_dir_all(self.root.join(leaf))?;
        }
        Ok(())
    }
}
