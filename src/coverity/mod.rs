//! Analysis Session Controller.
//!
//! Runs a Coverity analysis of one source RPM inside the mock chroot and
//! commits the defects to a Coverity Connect server.
//!
//! Coverity terminology:
//!
//! - **Snapshot**: one build of a package at a given source revision, with
//!   the defects found in it.
//! - **Stream**: a sequence of snapshots submitted over time; the unit of
//!   storage on the server.
//! - **Project**: an aggregate view over one or more streams; the unit the
//!   web interface manages defects by. Here every stream has its own project
//!   of the same name.
//!
//! The session is a strict state machine:
//!
//! ```text
//! Uninitialized -> ChrootReady -> ToolsInstalled -> DepsInstalled
//!   -> SourceStaged -> Configured -> ProjectProvisioned -> StreamProvisioned
//!   -> StreamLinked -> Built -> ModelPrepared -> Analyzed -> Committed
//! ```
//!
//! Each step is one or more blocking mock calls. Any failure aborts the
//! session; the project/stream/link steps query before they create, so
//! re-running a whole session from scratch is safe.

pub mod provision;
pub mod tools;

pub use provision::{ensure_exists, Provisioned};
pub use tools::{stream_name, CovTools};

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};

use crate::mock::{Chroot, MockCommand};
use crate::process::Runner;
use crate::request::{BuildRequest, CoverityTarget};
use crate::settings::Settings;
use provision::first_line_is;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisState {
    Uninitialized,
    ChrootReady,
    ToolsInstalled,
    DepsInstalled,
    SourceStaged,
    Configured,
    ProjectProvisioned,
    StreamProvisioned,
    StreamLinked,
    Built,
    ModelPrepared,
    Analyzed,
    Committed,
}

/// What a completed session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisReport {
    pub stream: String,
    pub project: Provisioned,
    pub stream_provisioned: Provisioned,
    pub link: Provisioned,
    pub model_rpm_installed: bool,
    pub nodefs_installed: bool,
    /// Compiled model the analysis ran with, if a model source was found.
    pub model: Option<PathBuf>,
}

/// Analyse `srpm` in the request's chroot and commit the results.
pub fn analyze(
    runner: &dyn Runner,
    settings: &Settings,
    request: &BuildRequest,
    configdir: &Path,
    srpm: &Path,
    target: &CoverityTarget,
) -> Result<AnalysisReport> {
    let chroot = Chroot::new(runner, MockCommand::for_request(settings, request, configdir));
    let stream = stream_name(srpm)?;
    let tools = CovTools::new(settings.coverity.clone(), target.clone(), stream);

    tracing::info!(
        "Starting Coverity analysis of {} for {}@{}",
        srpm.display(),
        target.user,
        target.host
    );
    AnalysisSession::new(chroot, tools, srpm).run()
}

pub struct AnalysisSession<'a> {
    chroot: Chroot<'a>,
    tools: CovTools,
    srpm: PathBuf,
    state: AnalysisState,
    staged_srpm: Option<PathBuf>,
    project: Option<Provisioned>,
    stream: Option<Provisioned>,
    link: Option<Provisioned>,
    model_rpm_installed: bool,
    nodefs_installed: bool,
    model: Option<PathBuf>,
}

impl<'a> AnalysisSession<'a> {
    pub fn new(chroot: Chroot<'a>, tools: CovTools, srpm: &Path) -> Self {
        Self {
            chroot,
            tools,
            srpm: srpm.to_path_buf(),
            state: AnalysisState::Uninitialized,
            staged_srpm: None,
            project: None,
            stream: None,
            link: None,
            model_rpm_installed: false,
            nodefs_installed: false,
            model: None,
        }
    }

    pub fn state(&self) -> AnalysisState {
        self.state
    }

    /// Drive every step in order.
    pub fn run(mut self) -> Result<AnalysisReport> {
        self.init_chroot()?;
        self.install_tools()?;
        self.install_deps()?;
        self.stage_source()?;
        self.configure()?;
        self.provision_project()?;
        self.provision_stream()?;
        self.link_stream()?;
        self.build()?;
        self.prepare_model()?;
        self.analyze()?;
        self.commit()?;
        self.into_report()
    }

    fn expect(&self, state: AnalysisState) -> Result<()> {
        if self.state != state {
            bail!(
                "analysis step out of order: session is {:?}, step needs {:?}",
                self.state,
                state
            );
        }
        Ok(())
    }

    fn reach(&mut self, state: AnalysisState) {
        tracing::debug!("Analysis session {:?} -> {:?}", self.state, state);
        self.state = state;
    }

    pub fn init_chroot(&mut self) -> Result<()> {
        self.expect(AnalysisState::Uninitialized)?;
        self.chroot.init().context("initialising the analysis chroot")?;
        self.reach(AnalysisState::ChrootReady);
        Ok(())
    }

    pub fn install_tools(&mut self) -> Result<()> {
        self.expect(AnalysisState::ChrootReady)?;
        let settings = self.tools.settings();
        self.chroot.install(&settings.analysis_package)?;
        self.chroot.install(&settings.runtime_package)?;
        self.reach(AnalysisState::ToolsInstalled);
        Ok(())
    }

    pub fn install_deps(&mut self) -> Result<()> {
        self.expect(AnalysisState::ToolsInstalled)?;
        self.chroot.installdeps(&self.srpm)?;
        self.reach(AnalysisState::DepsInstalled);
        Ok(())
    }

    /// Copy the source RPM into the chroot for the manual rpmbuild.
    pub fn stage_source(&mut self) -> Result<()> {
        self.expect(AnalysisState::DepsInstalled)?;
        let stage_dir = self.tools.settings().stage_dir.clone();
        self.chroot.copyin(&self.srpm, &stage_dir)?;
        let file_name = self
            .srpm
            .file_name()
            .with_context(|| format!("source RPM has no file name: {}", self.srpm.display()))?;
        self.staged_srpm = Some(stage_dir.join(file_name));
        self.reach(AnalysisState::SourceStaged);
        Ok(())
    }

    pub fn configure(&mut self) -> Result<()> {
        self.expect(AnalysisState::SourceStaged)?;
        for line in [
            self.tools.configure_gcc(),
            self.tools.configure_python(),
            self.tools.configure_template(),
        ] {
            self.chroot.shell(&line).context("configuring Coverity compilers")?;
        }
        self.reach(AnalysisState::Configured);
        Ok(())
    }

    pub fn provision_project(&mut self) -> Result<()> {
        self.expect(AnalysisState::Configured)?;
        let (chroot, tools) = (&self.chroot, &self.tools);
        let outcome = ensure_exists(
            &format!("Coverity project '{}'", tools.project()),
            || Ok(first_line_is(&chroot.shell_output(&tools.project_query())?, tools.project())),
            || chroot.shell(&tools.project_create()),
        )?;
        self.project = Some(outcome);
        self.reach(AnalysisState::ProjectProvisioned);
        Ok(())
    }

    pub fn provision_stream(&mut self) -> Result<()> {
        self.expect(AnalysisState::ProjectProvisioned)?;
        let (chroot, tools) = (&self.chroot, &self.tools);
        let outcome = ensure_exists(
            &format!("Coverity stream '{}'", tools.stream()),
            || Ok(first_line_is(&chroot.shell_output(&tools.stream_query())?, tools.stream())),
            || chroot.shell(&tools.stream_create()),
        )?;
        self.stream = Some(outcome);
        self.reach(AnalysisState::StreamProvisioned);
        Ok(())
    }

    pub fn link_stream(&mut self) -> Result<()> {
        self.expect(AnalysisState::StreamProvisioned)?;
        let (chroot, tools) = (&self.chroot, &self.tools);
        let outcome = ensure_exists(
            &format!(
                "link of stream '{}' to project '{}'",
                tools.stream(),
                tools.project()
            ),
            || Ok(first_line_is(&chroot.shell_output(&tools.link_query())?, tools.project())),
            || chroot.shell(&tools.link_create()),
        )?;
        self.link = Some(outcome);
        self.reach(AnalysisState::StreamLinked);
        Ok(())
    }

    /// Rebuild the package with its compiler calls captured by `cov-build`.
    pub fn build(&mut self) -> Result<()> {
        self.expect(AnalysisState::StreamLinked)?;
        let staged = self
            .staged_srpm
            .as_deref()
            .context("source RPM was never staged")?;
        self.chroot
            .shell(&self.tools.rpmbuild(staged)?)
            .context("capturing the package build")?;
        self.reach(AnalysisState::Built);
        Ok(())
    }

    /// Install a model RPM from the build output and compile the user model.
    ///
    /// Missing model files degrade the analysis; they are not an error.
    pub fn prepare_model(&mut self) -> Result<()> {
        self.expect(AnalysisState::Built)?;
        let settings = self.tools.settings().clone();

        if self.chroot.path_exists(&settings.model_rpm_glob())? {
            self.chroot.shell(&self.tools.install_model_rpm())?;
            self.model_rpm_installed = true;
        }

        let nodefs = settings.nodefs_source();
        if self.chroot.path_exists(&nodefs.display().to_string())? {
            self.chroot.shell(&self.tools.copy_nodefs())?;
            self.nodefs_installed = true;
        } else {
            tracing::warn!("Couldn't find the user's nodef file at: {}", nodefs.display());
        }

        let model_source = settings.model_source();
        if self.chroot.path_exists(&model_source.display().to_string())? {
            self.chroot
                .shell(&self.tools.make_library())
                .context("compiling the Coverity model")?;
            self.model = Some(settings.compiled_model(self.tools.stream()));
        } else {
            tracing::warn!(
                "Couldn't find the user's model file at: {}",
                model_source.display()
            );
        }

        self.reach(AnalysisState::ModelPrepared);
        Ok(())
    }

    pub fn analyze(&mut self) -> Result<()> {
        self.expect(AnalysisState::ModelPrepared)?;
        self.chroot
            .shell(&self.tools.analyze(self.model.as_deref()))
            .context("running cov-analyze")?;
        self.reach(AnalysisState::Analyzed);
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        self.expect(AnalysisState::Analyzed)?;
        self.chroot
            .shell(&self.tools.commit())
            .with_context(|| format!("committing defects to stream '{}'", self.tools.stream()))?;
        self.reach(AnalysisState::Committed);
        Ok(())
    }

    fn into_report(self) -> Result<AnalysisReport> {
        self.expect(AnalysisState::Committed)?;
        Ok(AnalysisReport {
            stream: self.tools.stream().to_string(),
            project: self.project.context("project was never provisioned")?,
            stream_provisioned: self.stream.context("stream was never provisioned")?,
            link: self.link.context("stream was never linked")?,
            model_rpm_installed: self.model_rpm_installed,
            nodefs_installed: self.nodefs_installed,
            model: self.model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::{RecordingRunner, Reply};
    use crate::process::{CommandFailed, Invocation};
    use crate::request::Operation;

    const STREAM: &str = "xen-4.6.0-1";

    fn request() -> BuildRequest {
        BuildRequest {
            configdir: PathBuf::from("/etc/mock"),
            root: "default".to_string(),
            resultdir: None,
            defines: Vec::new(),
            quiet: false,
            keep_tmp: false,
            package_dir: PathBuf::from("/src/RPMS"),
            operation: Operation::Init,
        }
    }

    fn target() -> CoverityTarget {
        CoverityTarget::parse("bob@cov.example.com", Some("hunter2")).unwrap()
    }

    fn shell_words(inv: &Invocation) -> Option<Vec<String>> {
        let argv = inv.argv_lossy();
        let pos = argv.iter().position(|a| a == "--shell")?;
        shlex::split(&argv[pos + 1])
    }

    fn has(words: &[String], needles: &[&str]) -> bool {
        needles.iter().all(|n| words.iter().any(|w| w == n))
    }

    /// Project and link exist, stream does not; only model.c is present.
    fn server_script(inv: &Invocation) -> Reply {
        let Some(words) = shell_words(inv) else {
            return Reply::Success;
        };
        if has(&words, &["--mode", "projects", "--show"]) {
            Reply::Output(format!("{STREAM}\n"))
        } else if has(&words, &["--mode", "streams", "--show", "stream"]) {
            Reply::Output(String::new())
        } else if has(&words, &["primary-project"]) {
            Reply::Output(format!("{STREAM}\n"))
        } else if words[0] == "ls" {
            if words[1].ends_with("model.c") {
                Reply::Success
            } else {
                Reply::Fail(2)
            }
        } else {
            Reply::Success
        }
    }

    fn run_session(runner: &RecordingRunner) -> Result<AnalysisReport> {
        analyze(
            runner,
            &Settings::default(),
            &request(),
            Path::new("/tmp/px-mock-x/mock"),
            Path::new("/home/me/SRPMS/xen-4.6.0-1.src.rpm"),
            &target(),
        )
    }

    #[test]
    fn test_full_session_order() {
        let runner = RecordingRunner::scripted(server_script);
        let report = run_session(&runner).unwrap();

        assert_eq!(
            report,
            AnalysisReport {
                stream: STREAM.to_string(),
                project: Provisioned::AlreadyPresent,
                stream_provisioned: Provisioned::Created,
                link: Provisioned::AlreadyPresent,
                model_rpm_installed: false,
                nodefs_installed: false,
                model: Some(PathBuf::from("/tmp/coverity/xen-4.6.0-1-model.xmldb")),
            }
        );

        let calls = runner.calls();
        let host_ops: Vec<String> = calls
            .iter()
            .take(5)
            .map(|c| c.argv_lossy()[5..].join(" "))
            .collect();
        assert_eq!(
            host_ops,
            vec![
                "--init",
                "--install cov-analysis-linux64",
                "--install java-1.8.0-openjdk",
                "--installdeps /home/me/SRPMS/xen-4.6.0-1.src.rpm",
                "--copyin /home/me/SRPMS/xen-4.6.0-1.src.rpm /tmp",
            ]
        );

        let programs: Vec<String> = calls[5..]
            .iter()
            .map(|c| {
                let words = shell_words(c).unwrap();
                let program = words[0].rsplit('/').next().unwrap().to_string();
                match program.as_str() {
                    "cov-manage-im" => {
                        let mode = words.iter().position(|w| w == "--mode").unwrap();
                        format!("{program} {}", words[mode + 2])
                    }
                    _ => program,
                }
            })
            .collect();
        assert_eq!(
            programs,
            vec![
                "cov-configure",
                "cov-configure",
                "cov-configure",
                "cov-manage-im --show",
                "cov-manage-im --show",
                "cov-manage-im --add",
                "cov-manage-im --show",
                "rpmbuild",
                "ls",
                "ls",
                "ls",
                "cov-make-library",
                "cov-analyze",
                "cov-commit-defects",
            ]
        );

        let analyze_words = shell_words(&calls[calls.len() - 2]).unwrap();
        assert!(has(&analyze_words, &["--user-model-file"]));
        let rpmbuild_words = shell_words(&calls[12]).unwrap();
        assert_eq!(rpmbuild_words.last().unwrap(), "/tmp/xen-4.6.0-1.src.rpm");
    }

    #[test]
    fn test_session_uses_cloned_config_without_unique_token() {
        let runner = RecordingRunner::scripted(server_script);
        run_session(&runner).unwrap();

        for call in runner.calls() {
            let argv = call.argv_lossy();
            assert_eq!(&argv[1..5], ["--configdir", "/tmp/px-mock-x/mock", "--root", "default"]);
            assert!(!argv.contains(&"--uniqueext".to_string()));
        }
    }

    #[test]
    fn test_rerun_against_provisioned_server_creates_nothing() {
        let runner = RecordingRunner::scripted(|inv| {
            let Some(words) = shell_words(inv) else {
                return Reply::Success;
            };
            if has(&words, &["--show"]) {
                Reply::Output(format!("{STREAM}\n"))
            } else if words[0] == "ls" {
                Reply::Fail(2)
            } else {
                Reply::Success
            }
        });
        let report = run_session(&runner).unwrap();

        assert_eq!(report.project, Provisioned::AlreadyPresent);
        assert_eq!(report.stream_provisioned, Provisioned::AlreadyPresent);
        assert_eq!(report.link, Provisioned::AlreadyPresent);
        assert_eq!(report.model, None);

        let creates = runner
            .calls()
            .iter()
            .filter_map(shell_words)
            .filter(|w| has(w, &["--add"]) || has(w, &["--update"]))
            .count();
        assert_eq!(creates, 0);
        let last_analyze = runner
            .calls()
            .iter()
            .filter_map(shell_words)
            .find(|w| w[0].ends_with("cov-analyze"))
            .unwrap();
        assert!(!has(&last_analyze, &["--user-model-file"]));
    }

    #[test]
    fn test_model_rpm_and_nodefs_installed_when_present() {
        let runner = RecordingRunner::new();
        let report = run_session(&runner).unwrap();

        assert!(report.model_rpm_installed);
        assert!(report.nodefs_installed);
        let words: Vec<Vec<String>> = runner.calls().iter().filter_map(shell_words).collect();
        assert!(words.iter().any(|w| w[0] == "rpm" && w[1] == "-i"));
        assert!(words
            .iter()
            .any(|w| w[0] == "cp" && w[2] == "/tmp/coverity/config/user_nodefs.h"));
    }

    #[test]
    fn test_failed_build_aborts_before_commit() {
        let runner = RecordingRunner::scripted(|inv| match shell_words(inv) {
            Some(words) if words[0] == "rpmbuild" => Reply::Fail(1),
            _ => Reply::Success,
        });
        let err = run_session(&runner).unwrap_err();

        assert_eq!(err.downcast_ref::<CommandFailed>().unwrap().code, 1);
        let committed = runner
            .calls()
            .iter()
            .filter_map(shell_words)
            .any(|w| w[0].ends_with("cov-commit-defects"));
        assert!(!committed);
    }

    #[test]
    fn test_steps_out_of_order_are_rejected() {
        let runner = RecordingRunner::new();
        let chroot = Chroot::new(&runner, MockCommand::new("mock"));
        let tools = CovTools::new(Default::default(), target(), STREAM.to_string());
        let mut session = AnalysisSession::new(chroot, tools, Path::new("x.src.rpm"));

        assert!(session.build().is_err());
        assert_eq!(session.state(), AnalysisState::Uninitialized);
        assert!(runner.calls().is_empty());

        session.init_chroot().unwrap();
        assert_eq!(session.state(), AnalysisState::ChrootReady);
        assert!(session.init_chroot().is_err());
    }
}
