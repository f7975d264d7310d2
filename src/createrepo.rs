//! Repo Metadata Generator.
//!
//! Wraps `createrepo` so the loopback repository has usable repodata.

use anyhow::{Context, Result};
use std::path::Path;

use crate::process::{Invocation, Runner};
use crate::settings::Settings;

/// Command line producing `<metadata_dir>/repodata` for the RPMs in `pkg_dir`.
///
/// The base URL points at `pkg_dir` itself so package locations resolve
/// even though the metadata lives elsewhere.
pub fn createrepo_invocation(
    settings: &Settings,
    pkg_dir: &Path,
    metadata_dir: &Path,
    quiet: bool,
) -> Invocation {
    let mut invocation = Invocation::new(&settings.createrepo_bin)
        .arg(format!("--baseurl=file://{}", pkg_dir.display()))
        .arg(format!("--outputdir={}", metadata_dir.display()))
        .arg(pkg_dir);
    if quiet {
        invocation = invocation.arg("--quiet");
    }
    invocation
}

/// Run `createrepo`; a non-zero exit propagates as a `CommandFailed` error.
pub fn createrepo(
    runner: &dyn Runner,
    settings: &Settings,
    pkg_dir: &Path,
    metadata_dir: &Path,
    quiet: bool,
) -> Result<()> {
    runner
        .run(&createrepo_invocation(settings, pkg_dir, metadata_dir, quiet))
        .with_context(|| format!("generating repository metadata for '{}'", pkg_dir.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::{RecordingRunner, Reply};
    use crate::process::CommandFailed;

    #[test]
    fn test_createrepo_arguments() {
        let runner = RecordingRunner::new();
        createrepo(
            &runner,
            &Settings::default(),
            Path::new("/home/build/RPMS"),
            Path::new("/tmp/px-mock-1"),
            true,
        )
        .unwrap();

        assert_eq!(
            runner.argvs(),
            vec![vec![
                "createrepo",
                "--baseurl=file:///home/build/RPMS",
                "--outputdir=/tmp/px-mock-1",
                "/home/build/RPMS",
                "--quiet",
            ]]
        );
    }

    #[test]
    fn test_createrepo_not_quiet() {
        let inv = createrepo_invocation(
            &Settings::default(),
            Path::new("/r"),
            Path::new("/m"),
            false,
        );
        assert!(!inv.argv_lossy().contains(&"--quiet".to_string()));
    }

    #[test]
    fn test_createrepo_failure_keeps_exit_code() {
        let runner = RecordingRunner::scripted(|_| Reply::Fail(2));
        let err = createrepo(
            &runner,
            &Settings::default(),
            Path::new("/r"),
            Path::new("/m"),
            false,
        )
        .unwrap_err();

        assert_eq!(err.downcast_ref::<CommandFailed>().unwrap().code, 2);
    }
}
