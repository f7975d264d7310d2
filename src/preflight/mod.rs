//! Preflight checks for build requests.
//!
//! Verifies that the host tools a request will invoke are installed before
//! any temporary state is created. A missing `createrepo` would otherwise
//! only surface after the config tree had been cloned.
//!
//! # Example
//!
//! ```rust
//! use planex_mock::preflight::{check_required_tools, command_exists};
//!
//! if !command_exists("mock") {
//!     println!("mock not installed");
//! }
//!
//! let tools = &[("mock", "mock"), ("createrepo", "createrepo_c")];
//! if let Err(e) = check_required_tools(tools) {
//!     eprintln!("{}", e);
//! }
//! ```

use anyhow::{bail, Result};
use std::ffi::OsStr;

use crate::request::Operation;
use crate::settings::Settings;

/// Check if a command exists on the host system.
///
/// Bare names are looked up in `PATH`; paths must point at an executable.
pub fn command_exists(cmd: impl AsRef<OsStr>) -> bool {
    which::which(cmd).is_ok()
}

/// Check that specific tools are available.
///
/// Each tuple is (command, package that provides it). On failure the error
/// lists every missing tool, not only the first.
pub fn check_required_tools<S: AsRef<OsStr>>(tools: &[(S, &str)]) -> Result<()> {
    let missing: Vec<String> = tools
        .iter()
        .filter(|(tool, _)| !command_exists(tool))
        .map(|(tool, package)| {
            format!("  {} (install: {})", tool.as_ref().to_string_lossy(), package)
        })
        .collect();

    if !missing.is_empty() {
        bail!("Missing required host tools:\n{}", missing.join("\n"));
    }

    Ok(())
}

/// The host tools `operation` will invoke, as configured in `settings`.
///
/// `--init` never touches the loopback repository, so it needs no createrepo.
pub fn required_tools<'a>(
    settings: &'a Settings,
    operation: &Operation,
) -> Vec<(&'a OsStr, &'static str)> {
    let mut tools = vec![(settings.mock_bin.as_os_str(), "mock")];
    if !matches!(operation, Operation::Init) {
        tools.push((settings.createrepo_bin.as_os_str(), "createrepo_c"));
    }
    tools
}

/// Check every tool [`required_tools`] lists.
pub fn check_host_tools(settings: &Settings, operation: &Operation) -> Result<()> {
    check_required_tools(&required_tools(settings, operation))
}
