//! Tool locations and fixed chroot paths.
//!
//! Everything that used to be a hard-coded path lives in [`Settings`], so a
//! site can point at a different mock binary or Coverity install, and tests
//! can redirect the temporary directory.
//!
//! Resolution order:
//! 1. `--settings FILE` on the command line
//! 2. `PLANEX_MOCK_SETTINGS` env var (path to a TOML file)
//! 3. `<config dir>/planex/mock.toml` if it exists (e.g. `~/.config/planex/mock.toml`)
//! 4. Built-in defaults

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

pub const SETTINGS_ENV: &str = "PLANEX_MOCK_SETTINGS";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// The chroot build tool.
    pub mock_bin: PathBuf,
    /// The repository metadata generator.
    pub createrepo_bin: PathBuf,
    /// Parent of the per-run temporary directory. System temp dir when unset.
    pub tmp_root: Option<PathBuf>,
    pub coverity: CoveritySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mock_bin: PathBuf::from("mock"),
            createrepo_bin: PathBuf::from("createrepo"),
            tmp_root: None,
            coverity: CoveritySettings::default(),
        }
    }
}

/// Paths inside the chroot used by the analysis session.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoveritySettings {
    /// Directory holding the `cov-*` binaries.
    pub bin_dir: PathBuf,
    /// Intermediate directory for captured builds and the generated config.
    pub output_dir: PathBuf,
    /// Where a user-supplied `model.c` and `nodefs.h` are looked up.
    pub user_dir: PathBuf,
    /// `%{_topdir}` of rpmbuild inside the chroot.
    pub rpmbuild_topdir: PathBuf,
    /// Directory the source RPM is copied into.
    pub stage_dir: PathBuf,
    pub analysis_package: String,
    /// Runtime the analysis package needs but does not declare.
    pub runtime_package: String,
}

impl Default for CoveritySettings {
    fn default() -> Self {
        Self {
            bin_dir: PathBuf::from("/opt/cov-analysis-linux64/bin"),
            output_dir: PathBuf::from("/tmp/coverity"),
            user_dir: PathBuf::from("/coverity"),
            rpmbuild_topdir: PathBuf::from("/builddir/build"),
            stage_dir: PathBuf::from("/tmp"),
            analysis_package: "cov-analysis-linux64".to_string(),
            runtime_package: "java-1.8.0-openjdk".to_string(),
        }
    }
}

impl CoveritySettings {
    pub fn tool(&self, name: &str) -> PathBuf {
        self.bin_dir.join(name)
    }

    pub fn config_file(&self) -> PathBuf {
        self.output_dir.join("config/config.xml")
    }

    /// Nodefs location referenced by the default compiler templates.
    pub fn nodefs_target(&self) -> PathBuf {
        self.output_dir.join("config/user_nodefs.h")
    }

    pub fn nodefs_source(&self) -> PathBuf {
        self.user_dir.join("nodefs.h")
    }

    pub fn model_source(&self) -> PathBuf {
        self.user_dir.join("model.c")
    }

    pub fn compiled_model(&self, stream: &str) -> PathBuf {
        self.output_dir.join(format!("{stream}-model.xmldb"))
    }

    /// Prefix stripped from source paths in analysis results.
    pub fn strip_path(&self) -> String {
        format!("{}/", self.rpmbuild_topdir.join("BUILD").display())
    }

    /// Pattern matching an RPM that ships model files, in the build output.
    pub fn model_rpm_glob(&self) -> String {
        self.rpmbuild_topdir
            .join("RPMS/*coverity*.rpm")
            .display()
            .to_string()
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading settings '{}'", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("parsing settings '{}'", path.display()))
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load settings following the resolution order in the module docs.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(path) = env::var(SETTINGS_ENV) {
            return Self::load(Path::new(&path))
                .with_context(|| format!("{SETTINGS_ENV} points to unusable settings"));
        }

        if let Some(path) = default_settings_path() {
            if path.is_file() {
                tracing::debug!("Loading settings from {}", path.display());
                return Self::load(&path);
            }
        }

        Ok(Self::default())
    }
}

fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("planex").join("mock.toml"))
}
