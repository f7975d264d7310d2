//! Build source RPMs in a mock chroot that can see locally built RPMs.
//!
//! `planex-build-mock` wraps the `mock` chroot build tool. Each run:
//!
//! - **Clones the mock config** into a private temporary directory, keeping
//!   file timestamps so mock's chroot cache stays valid
//! - **Injects a loopback repository** into the cloned config, pointing the
//!   chroot's package manager at packages produced earlier in the same build
//! - **Indexes those packages** with createrepo
//! - **Runs mock** to initialise the chroot or rebuild source RPMs, or drives
//!   a Coverity static-analysis session inside the chroot
//!
//! # Architecture
//!
//! ```text
//! planex-build-mock (bin)
//!     │
//!     ├── settings ── tool paths and chroot locations (TOML)
//!     ├── request ─── BuildRequest / Operation from the command line
//!     ├── preflight ─ host tools present?
//!     │
//!     └── run ─────── one TempSession per invocation
//!           │
//!           ├── mockcfg::clone     config tree copy
//!           ├── mockcfg::loopback  `[mock-loopback-<pid>]` repo stanza
//!           ├── createrepo         repo metadata into the session dir
//!           ├── mock               init / rebuild
//!           └── coverity           analysis session state machine
//!                 │
//!                 └── mock::Chroot  --install / --copyin / --shell
//!
//! process ── Invocation, ShellLine, Runner (HostRunner spawns)
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use planex_mock::process::HostRunner;
//! use planex_mock::request::{BuildRequest, Operation};
//! use planex_mock::settings::Settings;
//!
//! let request = BuildRequest {
//!     configdir: "/etc/mock".into(),
//!     root: "default".to_string(),
//!     resultdir: None,
//!     defines: Vec::new(),
//!     quiet: false,
//!     keep_tmp: false,
//!     package_dir: "RPMS".into(),
//!     operation: Operation::Rebuild { srpms: vec!["xen-4.6.0-1.src.rpm".into()] },
//! };
//! planex_mock::run(&request, &Settings::default(), &HostRunner)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod coverity;
pub mod createrepo;
pub mod mock;
pub mod mockcfg;
pub mod preflight;
pub mod process;
pub mod request;
pub mod run;
pub mod session;
pub mod settings;

pub use process::{CommandFailed, HostRunner, Interrupted, Invocation, Runner, ShellLine};
pub use request::{BuildRequest, CoverityTarget, Operation};
pub use run::{run, Completed, RunReport};
pub use settings::Settings;
