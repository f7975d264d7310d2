//! Private, mutation-safe copies of the mock configuration.
//!
//! mock decides whether its cached chroot is still valid by comparing config
//! file modification times, so every file written here carries the
//! timestamps of the file it was derived from.
//!
//! - [`clone`] - recursive copy of the config directory into the session
//! - [`loopback`] - injection of the session's local package repository

pub mod clone;
pub mod loopback;

pub use clone::clone_config_dir;
pub use loopback::{insert_loopback_repo, Injection};

use anyhow::{Context, Result};
use std::fs::{self, File, FileTimes};
use std::path::Path;

/// Copy permission bits and access/modification times from `src` to `dst`.
pub(crate) fn copy_stat(src: &Path, dst: &Path) -> Result<()> {
    let meta = fs::metadata(src).with_context(|| format!("reading metadata '{}'", src.display()))?;

    let times = FileTimes::new()
        .set_accessed(meta.accessed().context("reading access time")?)
        .set_modified(meta.modified().context("reading modification time")?);
    File::open(dst)
        .and_then(|file| file.set_times(times))
        .with_context(|| format!("setting timestamps on '{}'", dst.display()))?;

    fs::set_permissions(dst, meta.permissions())
        .with_context(|| format!("setting permissions on '{}'", dst.display()))?;
    Ok(())
}
