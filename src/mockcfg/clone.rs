//! Config Cloner: copy the mock config directory into the session.

use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::copy_stat;

/// Subdirectory of the session holding the cloned configuration.
pub const CLONE_DIRNAME: &str = "mock";

/// Copy `configdir` to `<tmpdir>/mock`, keeping timestamps and permissions.
///
/// Symlinks are followed, so the clone only contains regular files and
/// directories: rewriting a cloned file can never reach through a link back
/// into the system configuration.
///
/// Returns the path of the clone.
pub fn clone_config_dir(configdir: &Path, tmpdir: &Path) -> Result<PathBuf> {
    if !configdir.is_dir() {
        bail!("mock config directory not found: {}", configdir.display());
    }

    let clonedir = tmpdir.join(CLONE_DIRNAME);
    if clonedir.symlink_metadata().is_ok() {
        bail!("clone destination already exists: {}", clonedir.display());
    }

    copy_tree(configdir, &clonedir).with_context(|| {
        format!(
            "cloning mock config '{}' to '{}'",
            configdir.display(),
            clonedir.display()
        )
    })?;
    tracing::debug!("Cloned {} to {}", configdir.display(), clonedir.display());

    Ok(clonedir)
}

fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let mut dirs = Vec::new();

    for entry in WalkDir::new(src).follow_links(true) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .context("walked outside the source tree")?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir(&target)
                .with_context(|| format!("creating directory '{}'", target.display()))?;
            dirs.push((entry.path().to_path_buf(), target));
        } else {
            fs::copy(entry.path(), &target).with_context(|| {
                format!(
                    "copying '{}' to '{}'",
                    entry.path().display(),
                    target.display()
                )
            })?;
            copy_stat(entry.path(), &target)?;
        }
    }

    // Children first, so populating a directory does not bump its mtime afterwards.
    for (src_dir, dst_dir) in dirs.iter().rev() {
        copy_stat(src_dir, dst_dir)?;
    }

    Ok(())
}
