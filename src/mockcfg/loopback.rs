//! Loopback Repo Injector.
//!
//! Adds a yum repository backed by the session directory to a mock config,
//! so packages built earlier are visible to dependency resolution.

use anyhow::{Context, Result};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::Path;

use super::copy_stat;

/// Line marker opening the package manager configuration block.
pub const SENTINEL: &[u8] = b"config_opts['yum.conf']";

/// Whether a repository stanza made it into the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Injection {
    Inserted,
    /// The config never opens a yum.conf block; it was copied verbatim.
    SentinelMissing,
}

/// The repository stanza, with a section name unique to `id`.
pub fn loopback_stanza(id: u32, repo_path: &Path) -> String {
    format!(
        "[mock-loopback-{id}]\n\
         name=Mock output\n\
         baseurl = file://{}\n\
         gpgcheck=0\n\
         priority=1\n\
         enabled=1\n\
         metadata_expire=0\n\
         \n",
        repo_path.display()
    )
}

/// Write `config_out` as a copy of `config_in` with a loopback repository
/// pointing at `repo_path`, named after the current process id.
///
/// The output gets the input's timestamps so the mock chroot is not rebuilt.
pub fn insert_loopback_repo(
    config_in: &Path,
    config_out: &Path,
    repo_path: &Path,
) -> Result<Injection> {
    insert_loopback_repo_with_id(config_in, config_out, repo_path, std::process::id())
}

pub fn insert_loopback_repo_with_id(
    config_in: &Path,
    config_out: &Path,
    repo_path: &Path,
    id: u32,
) -> Result<Injection> {
    let input = fs::read(config_in)
        .with_context(|| format!("reading mock config '{}'", config_in.display()))?;
    let stanza = loopback_stanza(id, repo_path);

    let file = fs::File::create(config_out)
        .with_context(|| format!("creating mock config '{}'", config_out.display()))?;
    let mut out = BufWriter::new(file);
    let mut injection = Injection::SentinelMissing;

    for line in input.split_inclusive(|b| *b == b'\n') {
        out.write_all(line)?;
        if contains(line, SENTINEL) {
            out.write_all(stanza.as_bytes())?;
            injection = Injection::Inserted;
        }
    }
    out.flush()
        .with_context(|| format!("writing mock config '{}'", config_out.display()))?;
    drop(out);

    copy_stat(config_in, config_out)?;

    match injection {
        Injection::Inserted => tracing::debug!(
            "Added loopback repository {} to {}",
            repo_path.display(),
            config_out.display()
        ),
        Injection::SentinelMissing => tracing::warn!(
            "No yum.conf block in {}; loopback repository not added",
            config_in.display()
        ),
    }

    Ok(injection)
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|window| window == needle)
}
