//! Command lines for the Coverity tools inside the chroot.

use anyhow::{Context, Result};
use std::path::Path;

use crate::process::ShellLine;
use crate::request::CoverityTarget;
use crate::settings::CoveritySettings;

const MODEL_ARGS: &[&str] = &["--security", "--concurrency"];

const ANALYSIS_OPTS: &[&str] = &[
    "--cpp",
    "--aggressiveness-level",
    "high",
    "--all",
    "--rule",
    "--disable-parse-warnings",
    "--enable-fnptr",
];

/// Suffix removed from a source RPM name to get the stream name.
pub const SRPM_SUFFIX: &str = ".src.rpm";

/// Stream (and project) name for a source RPM: its file name without `.src.rpm`.
pub fn stream_name(srpm: &Path) -> Result<String> {
    let file_name = srpm
        .file_name()
        .and_then(|name| name.to_str())
        .with_context(|| format!("source RPM path has no usable file name: {}", srpm.display()))?;
    Ok(file_name
        .strip_suffix(SRPM_SUFFIX)
        .unwrap_or(file_name)
        .to_string())
}

fn path(p: &Path) -> String {
    p.display().to_string()
}

/// Builds every Coverity command of one session.
#[derive(Debug, Clone)]
pub struct CovTools {
    settings: CoveritySettings,
    target: CoverityTarget,
    stream: String,
}

impl CovTools {
    pub fn new(settings: CoveritySettings, target: CoverityTarget, stream: String) -> Self {
        Self {
            settings,
            target,
            stream,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// One project per stream, sharing its name.
    pub fn project(&self) -> &str {
        &self.stream
    }

    pub fn settings(&self) -> &CoveritySettings {
        &self.settings
    }

    fn tool(&self, name: &str) -> ShellLine {
        ShellLine::new(path(&self.settings.tool(name)))
    }

    fn config(&self) -> String {
        path(&self.settings.config_file())
    }

    fn output_dir(&self) -> String {
        path(&self.settings.output_dir)
    }

    fn connection(&self, line: ShellLine) -> ShellLine {
        line.arg("--host")
            .arg(&self.target.host)
            .arg("--user")
            .arg(&self.target.user)
            .arg("--password")
            .secret(&self.target.password)
    }

    fn configure(&self) -> ShellLine {
        self.tool("cov-configure").arg("--config").arg(self.config())
    }

    pub fn configure_gcc(&self) -> ShellLine {
        self.configure().arg("--gcc")
    }

    pub fn configure_python(&self) -> ShellLine {
        self.configure().arg("--python")
    }

    pub fn configure_template(&self) -> ShellLine {
        self.configure()
            .args(["--comptype", "gcc", "--compiler", "cc", "--template"])
    }

    fn manage_im(&self) -> ShellLine {
        self.connection(self.tool("cov-manage-im").arg("--config").arg(self.config()))
    }

    pub fn project_query(&self) -> ShellLine {
        self.manage_im()
            .args(["--mode", "projects", "--show", "--name"])
            .arg(self.project())
            .args(["--fields", "project", "--nh"])
    }

    pub fn project_create(&self) -> ShellLine {
        self.manage_im()
            .args(["--mode", "projects", "--add", "--set"])
            .arg(format!("name:{}", self.project()))
    }

    pub fn stream_query(&self) -> ShellLine {
        self.manage_im()
            .args(["--mode", "streams", "--show", "--name"])
            .arg(self.stream())
            .args(["--fields", "stream", "--nh"])
    }

    pub fn stream_create(&self) -> ShellLine {
        self.manage_im()
            .args(["--mode", "streams", "--add", "--set"])
            .arg(format!("name:{}", self.stream()))
            .args(["--set", "lang:C/C++"])
    }

    /// The stream's primary project; matches [`CovTools::project`] once linked.
    pub fn link_query(&self) -> ShellLine {
        self.manage_im()
            .args(["--mode", "streams", "--show", "--fields", "primary-project", "--name"])
            .arg(self.stream())
            .arg("--nh")
    }

    pub fn link_create(&self) -> ShellLine {
        self.manage_im()
            .args(["--mode", "projects", "--update", "--name"])
            .arg(self.project())
            .arg("--insert")
            .arg(format!("stream:{}", self.stream()))
    }

    fn cov_build(&self) -> ShellLine {
        self.tool("cov-build")
            .arg("--dir")
            .arg(self.output_dir())
            .args(["--fs-capture-search", "."])
            .arg("--config")
            .arg(self.config())
    }

    /// rpmbuild of the staged source RPM with every compiler call wrapped by
    /// `cov-build` through the `cov_wrap` macro.
    pub fn rpmbuild(&self, staged_srpm: &Path) -> Result<ShellLine> {
        Ok(ShellLine::new("rpmbuild")
            .arg("--define")
            .arg(format!("cov_wrap {}", self.cov_build().render()?))
            .arg("--rebuild")
            .arg(path(staged_srpm)))
    }

    pub fn install_model_rpm(&self) -> ShellLine {
        ShellLine::new("rpm")
            .arg("-i")
            .glob(self.settings.model_rpm_glob())
    }

    pub fn copy_nodefs(&self) -> ShellLine {
        ShellLine::new("cp")
            .arg(path(&self.settings.nodefs_source()))
            .arg(path(&self.settings.nodefs_target()))
    }

    pub fn make_library(&self) -> ShellLine {
        self.tool("cov-make-library")
            .arg("--config")
            .arg(self.config())
            .args(MODEL_ARGS.iter().copied())
            .arg("-of")
            .arg(path(&self.settings.compiled_model(&self.stream)))
            .arg(path(&self.settings.model_source()))
    }

    pub fn analyze(&self, model: Option<&Path>) -> ShellLine {
        let mut line = self
            .tool("cov-analyze")
            .arg("--dir")
            .arg(self.output_dir())
            .arg("--config")
            .arg(self.config())
            .args(["-j", "auto", "--strip-path"])
            .arg(self.settings.strip_path())
            .args(ANALYSIS_OPTS.iter().copied());
        if let Some(model) = model {
            line = line.arg("--user-model-file").arg(path(model));
        }
        line
    }

    pub fn commit(&self) -> ShellLine {
        self.connection(self.tool("cov-commit-defects"))
            .arg("--dir")
            .arg(self.output_dir())
            .arg("--config")
            .arg(self.config())
            .arg("--stream")
            .arg(self.stream())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn tools() -> CovTools {
        let target = CoverityTarget::parse("bob@cov.example.com", Some("s3cret pass")).unwrap();
        CovTools::new(CoveritySettings::default(), target, "xen-4.6.0-1".to_string())
    }

    fn words(line: &ShellLine) -> Vec<String> {
        shlex::split(&line.render().unwrap()).unwrap()
    }

    #[test]
    fn test_stream_name_strips_suffix() {
        assert_eq!(
            stream_name(Path::new("/build/SRPMS/xen-4.6.0-1.src.rpm")).unwrap(),
            "xen-4.6.0-1"
        );
        assert_eq!(stream_name(Path::new("odd-name.rpm")).unwrap(), "odd-name.rpm");
        assert!(stream_name(Path::new("/")).is_err());
    }

    #[test]
    fn test_project_query_words() {
        assert_eq!(
            words(&tools().project_query()),
            vec![
                "/opt/cov-analysis-linux64/bin/cov-manage-im",
                "--config",
                "/tmp/coverity/config/config.xml",
                "--host",
                "cov.example.com",
                "--user",
                "bob",
                "--password",
                "s3cret pass",
                "--mode",
                "projects",
                "--show",
                "--name",
                "xen-4.6.0-1",
                "--fields",
                "project",
                "--nh",
            ]
        );
    }

    #[test]
    fn test_commit_redacts_password() {
        let commit = tools().commit();
        assert!(!commit.render_redacted().unwrap().contains("s3cret"));
        let words = words(&commit);
        assert!(words.ends_with(&["--stream".to_string(), "xen-4.6.0-1".to_string()]));
        assert!(words.contains(&"s3cret pass".to_string()));
    }

    #[test]
    fn test_rpmbuild_wraps_cov_build_in_one_macro() {
        let line = tools()
            .rpmbuild(&PathBuf::from("/tmp/xen-4.6.0-1.src.rpm"))
            .unwrap();
        let words = words(&line);

        assert_eq!(words.len(), 5);
        assert_eq!(words[0], "rpmbuild");
        assert_eq!(words[1], "--define");
        assert!(words[2]
            .starts_with("cov_wrap /opt/cov-analysis-linux64/bin/cov-build --dir /tmp/coverity"));
        assert_eq!(&words[3..], ["--rebuild", "/tmp/xen-4.6.0-1.src.rpm"]);
    }

    #[test]
    fn test_analyze_with_and_without_model() {
        let tools = tools();
        let plain = words(&tools.analyze(None));
        assert!(!plain.contains(&"--user-model-file".to_string()));
        assert!(plain.contains(&"/builddir/build/BUILD/".to_string()));

        let model = tools.settings().compiled_model(tools.stream());
        let with_model = words(&tools.analyze(Some(&model)));
        assert_eq!(
            &with_model[with_model.len() - 2..],
            ["--user-model-file", "/tmp/coverity/xen-4.6.0-1-model.xmldb"]
        );
    }

    #[test]
    fn test_stream_create_sets_language() {
        let words = words(&tools().stream_create());
        assert!(words.ends_with(&[
            "name:xen-4.6.0-1".to_string(),
            "--set".to_string(),
            "lang:C/C++".to_string()
        ]));
    }
}
