//! The per-run temporary directory.
//!
//! It holds the cloned mock configuration and doubles as the loopback
//! repository root. It is removed on every exit path (including unwinding)
//! unless the user asked to keep it.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

pub const TMPDIR_PREFIX: &str = "px-mock-";

pub struct TempSession {
    dir: Option<TempDir>,
    path: PathBuf,
    keep: bool,
}

impl TempSession {
    /// Create a fresh directory under `parent`, or the system temp dir.
    pub fn create(parent: Option<&Path>, keep: bool) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(TMPDIR_PREFIX);
        let dir = match parent {
            Some(parent) => builder.tempdir_in(parent).with_context(|| {
                format!("creating temporary directory in '{}'", parent.display())
            })?,
            None => builder.tempdir().context("creating temporary directory")?,
        };
        let path = dir.path().to_path_buf();
        tracing::debug!("Working directory {}", path.display());

        Ok(Self {
            dir: Some(dir),
            path,
            keep,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory, or retain it when keeping was requested.
    ///
    /// Returns the retained path.
    pub fn finish(mut self) -> Result<Option<PathBuf>> {
        let Some(dir) = self.dir.take() else {
            return Ok(None);
        };
        if self.keep {
            return Ok(Some(retain(dir)));
        }
        dir.close()
            .with_context(|| format!("removing temporary directory '{}'", self.path.display()))?;
        Ok(None)
    }
}

impl Drop for TempSession {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if self.keep {
                retain(dir);
            }
        }
    }
}

fn retain(dir: TempDir) -> PathBuf {
    let path = dir.keep();
    tracing::info!("Working directory retained at {}", path.display());
    path
}
