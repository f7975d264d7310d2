//! Chroot Build Driver.
//!
//! [`MockCommand`] assembles mock command lines; [`init`] and [`rebuild`]
//! drive the normal build path with a fresh `--uniqueext` token per call, and
//! [`Chroot`] exposes the primitives the analysis session runs inside one
//! shared chroot.

use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::process::{CommandFailed, Invocation, Runner, ShellLine};
use crate::request::BuildRequest;
use crate::settings::Settings;

/// Builder for mock invocations.
#[derive(Debug, Clone, Default)]
pub struct MockCommand {
    bin: PathBuf,
    unique_ext: Option<String>,
    configdir: Option<PathBuf>,
    quiet: bool,
    root: Option<String>,
    resultdir: Option<PathBuf>,
    defines: Vec<String>,
}

impl MockCommand {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            ..Default::default()
        }
    }

    /// Base command for a build request, using the cloned config directory.
    pub fn for_request(settings: &Settings, request: &BuildRequest, configdir: &Path) -> Self {
        let mut cmd = Self::new(&settings.mock_bin)
            .configdir(configdir)
            .root(&request.root);
        if request.quiet {
            cmd = cmd.quiet();
        }
        cmd
    }

    pub fn unique_ext(mut self, token: impl Into<String>) -> Self {
        self.unique_ext = Some(token.into());
        self
    }

    pub fn configdir(mut self, dir: &Path) -> Self {
        self.configdir = Some(dir.to_path_buf());
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    pub fn root(mut self, root: &str) -> Self {
        self.root = Some(root.to_string());
        self
    }

    pub fn resultdir(mut self, dir: Option<&Path>) -> Self {
        self.resultdir = dir.map(Path::to_path_buf);
        self
    }

    pub fn defines<I, S>(mut self, defines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.defines.extend(defines.into_iter().map(Into::into));
        self
    }

    fn base(&self) -> Invocation {
        let mut inv = Invocation::new(&self.bin);
        if let Some(token) = &self.unique_ext {
            inv = inv.arg("--uniqueext").arg(token);
        }
        if let Some(dir) = &self.configdir {
            inv = inv.arg("--configdir").arg(dir);
        }
        if self.quiet {
            inv = inv.arg("--quiet");
        }
        if let Some(root) = &self.root {
            inv = inv.arg("--root").arg(root);
        }
        if let Some(dir) = &self.resultdir {
            inv = inv.arg("--resultdir").arg(dir);
        }
        for define in &self.defines {
            inv = inv.arg("--define").arg(define);
        }
        inv
    }

    pub fn init(&self) -> Invocation {
        self.base().arg("--init")
    }

    pub fn rebuild(&self, srpms: &[PathBuf]) -> Invocation {
        self.base().arg("--rebuild").args(srpms)
    }

    pub fn install(&self, package: &str) -> Invocation {
        self.base().arg("--install").arg(package)
    }

    pub fn installdeps(&self, srpm: &Path) -> Invocation {
        self.base().arg("--installdeps").arg(srpm)
    }

    pub fn copyin(&self, src: &Path, dst: &Path) -> Invocation {
        self.base().arg("--copyin").arg(src).arg(dst)
    }

    pub fn shell(&self, line: &ShellLine) -> Result<Invocation> {
        Ok(self
            .base()
            .arg("--shell")
            .arg_with_display(OsString::from(line.render()?), line.render_redacted()?))
    }
}

/// A fresh token so concurrent runs never share a chroot or its lock.
pub fn unique_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn build_command(settings: &Settings, request: &BuildRequest, configdir: &Path) -> MockCommand {
    MockCommand::for_request(settings, request, configdir)
        .unique_ext(unique_token())
        .resultdir(request.resultdir.as_deref())
        .defines(request.defines.iter().cloned())
}

/// `mock --init` with the request's options.
pub fn init(
    runner: &dyn Runner,
    settings: &Settings,
    request: &BuildRequest,
    configdir: &Path,
) -> Result<()> {
    let invocation = build_command(settings, request, configdir).init();
    runner
        .run(&invocation)
        .with_context(|| format!("initialising mock chroot '{}'", request.root))
}

/// `mock --rebuild` of every source RPM in a single invocation.
pub fn rebuild(
    runner: &dyn Runner,
    settings: &Settings,
    request: &BuildRequest,
    configdir: &Path,
    srpms: &[PathBuf],
) -> Result<()> {
    let invocation = build_command(settings, request, configdir).rebuild(srpms);
    runner
        .run(&invocation)
        .with_context(|| format!("rebuilding {} source RPM(s) in '{}'", srpms.len(), request.root))
}

/// One chroot addressed by several consecutive mock calls.
pub struct Chroot<'a> {
    runner: &'a dyn Runner,
    command: MockCommand,
}

impl<'a> Chroot<'a> {
    pub fn new(runner: &'a dyn Runner, command: MockCommand) -> Self {
        Self { runner, command }
    }

    pub fn init(&self) -> Result<()> {
        self.runner.run(&self.command.init())
    }

    pub fn install(&self, package: &str) -> Result<()> {
        self.runner
            .run(&self.command.install(package))
            .with_context(|| format!("installing '{package}' into the chroot"))
    }

    pub fn installdeps(&self, srpm: &Path) -> Result<()> {
        self.runner
            .run(&self.command.installdeps(srpm))
            .with_context(|| format!("installing build dependencies of '{}'", srpm.display()))
    }

    pub fn copyin(&self, src: &Path, dst: &Path) -> Result<()> {
        self.runner
            .run(&self.command.copyin(src, dst))
            .with_context(|| format!("copying '{}' into the chroot", src.display()))
    }

    /// Run `line` in the chroot shell; a non-zero exit aborts.
    pub fn shell(&self, line: &ShellLine) -> Result<()> {
        self.runner.run(&self.command.shell(line)?)
    }

    /// Captured stdout of `line`, or an empty string if it exits non-zero.
    pub fn shell_output(&self, line: &ShellLine) -> Result<String> {
        match self.runner.output(&self.command.shell(line)?) {
            Ok(out) => Ok(out),
            Err(err) if err.downcast_ref::<CommandFailed>().is_some() => {
                tracing::debug!("Query failed, treating as empty: {err}");
                Ok(String::new())
            }
            Err(err) => Err(err),
        }
    }

    /// Whether `path` (a glob is allowed) matches anything inside the chroot.
    pub fn path_exists(&self, pattern: &str) -> Result<bool> {
        let line = ShellLine::new("ls").glob(pattern);
        self.runner.succeeds(&self.command.shell(&line)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::{RecordingRunner, Reply};
    use crate::request::Operation;

    fn request() -> BuildRequest {
        BuildRequest {
            configdir: PathBuf::from("/etc/mock"),
            root: "epel-7-x86_64".to_string(),
            resultdir: Some(PathBuf::from("/out")),
            defines: vec!["dist .el7".to_string(), "with_xen 1".to_string()],
            quiet: true,
            keep_tmp: false,
            package_dir: PathBuf::from("/src/RPMS"),
            operation: Operation::Init,
        }
    }

    #[test]
    fn test_rebuild_single_invocation_with_all_srpms() {
        let runner = RecordingRunner::new();
        let srpms = vec![PathBuf::from("a.src.rpm"), PathBuf::from("b.src.rpm")];

        rebuild(
            &runner,
            &Settings::default(),
            &request(),
            Path::new("/tmp/px/mock"),
            &srpms,
        )
        .unwrap();

        let argvs = runner.argvs();
        assert_eq!(argvs.len(), 1);
        let argv = &argvs[0];
        assert_eq!(argv[0], "mock");
        assert_eq!(argv[1], "--uniqueext");
        assert_eq!(argv[2].len(), 32);
        assert!(argv[2].chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(
            &argv[3..],
            [
                "--configdir",
                "/tmp/px/mock",
                "--quiet",
                "--root",
                "epel-7-x86_64",
                "--resultdir",
                "/out",
                "--define",
                "dist .el7",
                "--define",
                "with_xen 1",
                "--rebuild",
                "a.src.rpm",
                "b.src.rpm",
            ]
        );
    }

    #[test]
    fn test_init_gets_fresh_token_each_time() {
        let runner = RecordingRunner::new();
        let settings = Settings::default();
        init(&runner, &settings, &request(), Path::new("/c")).unwrap();
        init(&runner, &settings, &request(), Path::new("/c")).unwrap();

        let argvs = runner.argvs();
        assert_eq!(argvs[0].last().unwrap(), "--init");
        assert_ne!(argvs[0][2], argvs[1][2]);
    }

    #[test]
    fn test_optional_flags_omitted() {
        let inv = MockCommand::new("mock").root("default").init();
        assert_eq!(inv.argv_lossy(), vec!["mock", "--root", "default", "--init"]);
    }

    #[test]
    fn test_rebuild_failure_propagates_code() {
        let runner = RecordingRunner::scripted(|_| Reply::Fail(30));
        let err = rebuild(
            &runner,
            &Settings::default(),
            &request(),
            Path::new("/c"),
            &[PathBuf::from("a.src.rpm")],
        )
        .unwrap_err();
        assert_eq!(err.downcast_ref::<CommandFailed>().unwrap().code, 30);
    }

    #[test]
    fn test_shell_output_swallows_tool_failure() {
        let runner = RecordingRunner::scripted(|_| Reply::Fail(1));
        let chroot = Chroot::new(&runner, MockCommand::new("mock"));
        let out = chroot.shell_output(&ShellLine::new("false")).unwrap();
        assert_eq!(out, "");
    }

    #[test]
    fn test_path_exists_uses_ls_glob() {
        let runner = RecordingRunner::scripted(|inv| {
            if inv.argv_lossy().last().unwrap().contains("model.c") {
                Reply::Success
            } else {
                Reply::Fail(2)
            }
        });
        let chroot = Chroot::new(&runner, MockCommand::new("mock"));

        assert!(chroot.path_exists("/coverity/model.c").unwrap());
        assert!(!chroot.path_exists("/coverity/nodefs.h").unwrap());
        assert_eq!(
            runner.argvs()[0],
            vec!["mock", "--shell", "ls /coverity/model.c"]
        );
    }
}
