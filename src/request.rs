//! The parsed build request.

use anyhow::{bail, Result};
use std::path::PathBuf;

/// Everything one run was asked to do. Built once from the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRequest {
    /// Directory holding the mock configuration files.
    pub configdir: PathBuf,
    /// Name of the mock config (`<configdir>/<root>.cfg`).
    pub root: String,
    pub resultdir: Option<PathBuf>,
    /// `'MACRO EXPR'` strings, passed to mock verbatim.
    pub defines: Vec<String>,
    pub quiet: bool,
    pub keep_tmp: bool,
    /// Host directory of previously built RPMs exposed through the loopback repo.
    pub package_dir: PathBuf,
    pub operation: Operation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Initialise the chroot and build nothing.
    Init,
    Rebuild { srpms: Vec<PathBuf> },
    /// Coverity analysis of a single source RPM.
    Analyze { srpm: PathBuf, target: CoverityTarget },
    /// Analysis was requested with unusable arguments; nothing is built.
    SkipAnalysis { reason: AnalysisArgsError },
}

impl Operation {
    /// Decide the operation from the raw command-line values.
    ///
    /// `--init` takes precedence over `--rebuild`. When `--coverity` is given
    /// only the first source RPM is analysed.
    pub fn resolve(
        init: bool,
        srpms: Vec<PathBuf>,
        coverity: Option<&str>,
        cov_passwd: Option<&str>,
    ) -> Result<Self> {
        if init {
            return Ok(Self::Init);
        }

        let Some(first) = srpms.first().cloned() else {
            bail!("nothing to do: pass --init or --rebuild SRPM...");
        };

        match coverity {
            None => Ok(Self::Rebuild { srpms }),
            Some(account) => match CoverityTarget::parse(account, cov_passwd) {
                Ok(target) => Ok(Self::Analyze {
                    srpm: first,
                    target,
                }),
                Err(reason) => Ok(Self::SkipAnalysis { reason }),
            },
        }
    }
}

/// Why the analysis arguments were rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalysisArgsError {
    #[error("--coverity format must be user@server, got '{0}'")]
    MalformedTarget(String),
    #[error("--cov_passwd must be specified for Coverity analysis")]
    MissingPassword,
}

/// Coverity server account used for project management and commits.
#[derive(Clone, PartialEq, Eq)]
pub struct CoverityTarget {
    pub user: String,
    pub host: String,
    pub password: String,
}

impl std::fmt::Debug for CoverityTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverityTarget")
            .field("user", &self.user)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

impl CoverityTarget {
    /// Parse `user@server`. Exactly one `@` is required; the password must
    /// be present too.
    pub fn parse(account: &str, password: Option<&str>) -> Result<Self, AnalysisArgsError> {
        let mut parts = account.split('@');
        let (Some(user), Some(host), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(AnalysisArgsError::MalformedTarget(account.to_string()));
        };
        let password = password.ok_or(AnalysisArgsError::MissingPassword)?;

        Ok(Self {
            user: user.to_string(),
            host: host.to_string(),
            password: password.to_string(),
        })
    }
}
