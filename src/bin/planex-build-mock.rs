use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use planex_mock::preflight::check_host_tools;
use planex_mock::process::{
    install_interrupt_handler, CommandFailed, HostRunner, Interrupted, INTERRUPTED_EXIT_CODE,
};
use planex_mock::request::{BuildRequest, Operation};
use planex_mock::run::{run, Completed};
use planex_mock::settings::Settings;
use tracing_subscriber::EnvFilter;

/// Build source RPMs in a mock chroot that can see the locally built RPMs.
#[derive(Parser, Debug)]
#[command(name = "planex-build-mock")]
#[command(version, about, long_about = None)]
#[command(group(ArgGroup::new("action").required(true).multiple(true).args(["init", "srpms"])))]
struct Cli {
    /// Only log warnings and errors
    #[arg(long, visible_alias = "warn")]
    quiet: bool,

    /// Enable debug logging
    #[arg(short, long, visible_alias = "debug")]
    verbose: bool,

    /// Change where the config files are found
    #[arg(long, value_name = "CONFIGDIR", default_value = "/etc/mock")]
    configdir: PathBuf,

    /// Name of the mock config to use (<CONFIGDIR>/<CONFIG>.cfg)
    #[arg(short, long, value_name = "CONFIG", default_value = "default")]
    root: String,

    /// Path for resulting files to be put
    #[arg(long, value_name = "RESULTDIR")]
    resultdir: Option<PathBuf>,

    /// Keep temporary files
    #[arg(long)]
    keeptmp: bool,

    /// --define='MACRO EXPR' define MACRO with value EXPR for the build
    #[arg(short = 'D', long = "define", value_name = "'MACRO EXPR'")]
    defines: Vec<String>,

    /// Initialize the chroot, do not build anything
    #[arg(long)]
    init: bool,

    /// Rebuild the specified SRPM(s)
    #[arg(long = "rebuild", value_name = "SRPM", num_args = 1..)]
    srpms: Vec<PathBuf>,

    /// Do Coverity analysis instead of building RPMs. Commit defects to
    /// the given server
    #[arg(long, value_name = "user@server")]
    coverity: Option<String>,

    /// Password for Coverity server
    #[arg(long = "cov_passwd", value_name = "PASSWORD")]
    cov_passwd: Option<String>,

    /// Settings file (TOML) with tool locations
    #[arg(long, value_name = "FILE")]
    settings: Option<PathBuf>,
}

impl Cli {
    fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }

    fn into_request(self) -> Result<BuildRequest> {
        let operation = Operation::resolve(
            self.init,
            self.srpms,
            self.coverity.as_deref(),
            self.cov_passwd.as_deref(),
        )?;
        let package_dir = std::env::current_dir()
            .context("determining the current directory")?
            .join("RPMS");

        Ok(BuildRequest {
            configdir: self.configdir,
            root: self.root,
            resultdir: self.resultdir,
            defines: self.defines,
            quiet: self.quiet,
            keep_tmp: self.keeptmp,
            package_dir,
            operation,
        })
    }
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level());

    match try_main(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if err.downcast_ref::<Interrupted>().is_some() {
                return ExitCode::from(INTERRUPTED_EXIT_CODE);
            }
            // A failing tool already reported its own error; exit with its status.
            if let Some(failed) = err.downcast_ref::<CommandFailed>() {
                tracing::error!("{err:#}");
                return ExitCode::from(u8::try_from(failed.code).unwrap_or(1));
            }
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn try_main(cli: Cli) -> Result<()> {
    install_interrupt_handler()?;
    let settings = Settings::resolve(cli.settings.as_deref())?;
    let request = cli.into_request()?;
    check_host_tools(&settings, &request.operation)?;

    let report = run(&request, &settings, &HostRunner)?;
    if report.completed == Completed::Initialized {
        tracing::info!("Chroot '{}' initialised", request.root);
    }
    Ok(())
}
