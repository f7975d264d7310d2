//! Entry-point orchestration: one run of `planex-build-mock`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::coverity::{self, AnalysisReport};
use crate::createrepo::createrepo;
use crate::mock;
use crate::mockcfg::{clone_config_dir, insert_loopback_repo};
use crate::process::Runner;
use crate::request::{BuildRequest, Operation};
use crate::session::TempSession;
use crate::settings::Settings;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completed {
    Initialized,
    Rebuilt,
    Analyzed(AnalysisReport),
    /// The analysis arguments were unusable; nothing was built.
    AnalysisSkipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub completed: Completed,
    /// Set when `--keeptmp` retained the working directory.
    pub retained_tmpdir: Option<PathBuf>,
}

/// Execute `request`. The temporary directory is gone (or retained, when
/// asked for) by the time this returns, whatever the outcome.
pub fn run(request: &BuildRequest, settings: &Settings, runner: &dyn Runner) -> Result<RunReport> {
    let session = TempSession::create(settings.tmp_root.as_deref(), request.keep_tmp)?;
    let result = execute(request, settings, runner, session.path());
    let finished = session.finish();

    let completed = result?;
    Ok(RunReport {
        completed,
        retained_tmpdir: finished?,
    })
}

fn execute(
    request: &BuildRequest,
    settings: &Settings,
    runner: &dyn Runner,
    tmpdir: &Path,
) -> Result<Completed> {
    let config = clone_config_dir(&request.configdir, tmpdir)?;

    match &request.operation {
        Operation::Init => {
            mock::init(runner, settings, request, &config)?;
            Ok(Completed::Initialized)
        }
        Operation::Rebuild { srpms } => {
            prepare_loopback(request, settings, runner, &config, tmpdir)?;
            mock::rebuild(runner, settings, request, &config, srpms)?;
            Ok(Completed::Rebuilt)
        }
        Operation::Analyze { srpm, target } => {
            prepare_loopback(request, settings, runner, &config, tmpdir)?;
            let report = coverity::analyze(runner, settings, request, &config, srpm, target)?;
            tracing::info!("Committed Coverity results to stream '{}'", report.stream);
            Ok(Completed::Analyzed(report))
        }
        Operation::SkipAnalysis { reason } => {
            prepare_loopback(request, settings, runner, &config, tmpdir)?;
            tracing::error!("Error: {reason}!");
            Ok(Completed::AnalysisSkipped)
        }
    }
}

/// Point the cloned config at the session directory and index the local RPMs into it.
fn prepare_loopback(
    request: &BuildRequest,
    settings: &Settings,
    runner: &dyn Runner,
    config: &Path,
    tmpdir: &Path,
) -> Result<()> {
    let cfg_name = format!("{}.cfg", request.root);
    let config_in = request.configdir.join(&cfg_name);
    let config_out = config.join(&cfg_name);
    insert_loopback_repo(&config_in, &config_out, tmpdir)
        .with_context(|| format!("adding loopback repository to '{}'", config_out.display()))?;

    createrepo(runner, settings, &request.package_dir, tmpdir, request.quiet)
}
