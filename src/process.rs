//! External process plumbing.
//!
//! Every tool this crate drives (mock, createrepo, the Coverity binaries
//! inside the chroot) is described as a structured [`Invocation`] and handed
//! to a [`Runner`]. The host runner spawns it; tests substitute a recorder.
//!
//! Commands that must run through a shell inside the chroot are built as a
//! [`ShellLine`], whose words are quoted individually when rendered, so that
//! stream names and credentials never get reinterpreted by the shell.

use anyhow::{Context, Result};
use std::borrow::Cow;
use std::ffi::{OsStr, OsString};
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};

const REDACTED: &str = "********";

const SIGINT: i32 = 2;

/// Exit status of a process that stopped because of Ctrl-C.
pub const INTERRUPTED_EXIT_CODE: u8 = 130;

static INTERRUPT_REQUESTED: AtomicBool = AtomicBool::new(false);

/// The user interrupted the run while an external tool was executing.
///
/// Propagates like any other error so the temporary directory is cleaned up
/// on the way out.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("interrupted while running '{program}'")]
pub struct Interrupted {
    pub program: String,
}

/// Catch SIGINT instead of dying from it.
///
/// The foreground child receives the same signal from the terminal; once it
/// exits, [`HostRunner`] reports [`Interrupted`] and no further tool is started.
pub fn install_interrupt_handler() -> Result<()> {
    ctrlc::set_handler(|| INTERRUPT_REQUESTED.store(true, Ordering::SeqCst))
        .context("setting up signal handler")
}

fn interrupt_requested() -> bool {
    INTERRUPT_REQUESTED.load(Ordering::SeqCst)
}

/// Whether a child that ended with `status` was cut short by an interrupt.
fn is_interrupted(status: ExitStatus, requested: bool) -> bool {
    requested || status.signal() == Some(SIGINT)
}

/// An external tool exited unsuccessfully.
///
/// Carried inside [`anyhow::Error`] so the binary can recover the tool's
/// exit code and exit with it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("command '{program}' failed with exit code {code}")]
pub struct CommandFailed {
    pub program: String,
    pub code: i32,
}

impl CommandFailed {
    fn from_status(program: &OsStr, status: ExitStatus) -> Self {
        // Shell convention for children killed by a signal.
        let code = status
            .code()
            .or_else(|| status.signal().map(|sig| 128 + sig))
            .unwrap_or(1);
        Self {
            program: program.to_string_lossy().into_owned(),
            code,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Arg {
    value: OsString,
    display: Option<String>,
}

/// A program plus its argument vector, never passed through a host shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    program: OsString,
    args: Vec<Arg>,
}

impl Invocation {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(Arg {
            value: arg.as_ref().to_os_string(),
            display: None,
        });
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Append an argument that is shown as `display` in logs.
    pub fn arg_with_display(mut self, arg: impl AsRef<OsStr>, display: impl Into<String>) -> Self {
        self.args.push(Arg {
            value: arg.as_ref().to_os_string(),
            display: Some(display.into()),
        });
        self
    }

    pub fn program(&self) -> &OsStr {
        &self.program
    }

    /// The real argument values, in order.
    pub fn arg_values(&self) -> impl Iterator<Item = &OsStr> {
        self.args.iter().map(|arg| arg.value.as_os_str())
    }

    /// Program and arguments as lossy strings, mostly for assertions.
    pub fn argv_lossy(&self) -> Vec<String> {
        std::iter::once(self.program.as_os_str())
            .chain(self.arg_values())
            .map(|part| part.to_string_lossy().into_owned())
            .collect()
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.arg_values());
        cmd
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let program = self.program.to_string_lossy();
        write!(f, "{}", quote_for_log(&program))?;
        for arg in &self.args {
            match &arg.display {
                Some(display) => write!(f, " {}", quote_for_log(display))?,
                None => write!(f, " {}", quote_for_log(&arg.value.to_string_lossy()))?,
            }
        }
        Ok(())
    }
}

fn quote_for_log(word: &str) -> Cow<'_, str> {
    shlex::try_quote(word).unwrap_or(Cow::Borrowed(word))
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Word {
    Literal(String),
    Secret(String),
    Glob(String),
}

/// A command line destined for a shell (e.g. `mock --shell`).
///
/// Literal and secret words are quoted when rendered. Glob words keep their
/// `*` and `?` live and have every other unsafe character escaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellLine {
    words: Vec<Word>,
}

impl ShellLine {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            words: vec![Word::Literal(program.into())],
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.words.push(Word::Literal(arg.into()));
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.words.extend(args.into_iter().map(|a| Word::Literal(a.into())));
        self
    }

    /// An argument that is masked in [`ShellLine::render_redacted`].
    pub fn secret(mut self, arg: impl Into<String>) -> Self {
        self.words.push(Word::Secret(arg.into()));
        self
    }

    /// A filename pattern left for the shell to expand.
    pub fn glob(mut self, pattern: impl Into<String>) -> Self {
        self.words.push(Word::Glob(pattern.into()));
        self
    }

    /// The line with each word quoted for a POSIX shell.
    pub fn render(&self) -> Result<String> {
        self.render_with(false)
    }

    /// Same as [`ShellLine::render`] with secrets masked, for logging.
    pub fn render_redacted(&self) -> Result<String> {
        self.render_with(true)
    }

    fn render_with(&self, redact: bool) -> Result<String> {
        let mut rendered = Vec::with_capacity(self.words.len());
        for word in &self.words {
            let part = match word {
                Word::Literal(text) => quote_word(text)?,
                Word::Secret(_) if redact => REDACTED.to_string(),
                Word::Secret(text) => quote_word(text)?,
                Word::Glob(pattern) => escape_glob(pattern)?,
            };
            rendered.push(part);
        }
        Ok(rendered.join(" "))
    }
}

fn quote_word(word: &str) -> Result<String> {
    shlex::try_quote(word)
        .map(Cow::into_owned)
        .with_context(|| format!("cannot quote shell word {word:?}"))
}

fn escape_glob(pattern: &str) -> Result<String> {
    // A backslash before a newline is a line continuation, not an escape.
    if pattern.chars().any(char::is_control) {
        anyhow::bail!("cannot use shell pattern with control characters {pattern:?}");
    }
    let mut escaped = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if c.is_ascii_alphanumeric() || matches!(c, '*' | '?' | '/' | '.' | '_' | '-' | '+') {
            escaped.push(c);
        } else {
            escaped.push('\\');
            escaped.push(c);
        }
    }
    Ok(escaped)
}

/// Executes [`Invocation`]s. All methods block until the child exits.
pub trait Runner {
    /// Run to completion. A non-zero exit is a [`CommandFailed`] error.
    fn run(&self, invocation: &Invocation) -> Result<()>;

    /// Run to completion and report whether the child exited with 0.
    fn succeeds(&self, invocation: &Invocation) -> Result<bool>;

    /// Run capturing stdout. A non-zero exit is a [`CommandFailed`] error.
    fn output(&self, invocation: &Invocation) -> Result<String>;
}

/// Spawns invocations on the host, inheriting stdio except for captured output.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostRunner;

impl HostRunner {
    fn status(invocation: &Invocation) -> Result<ExitStatus> {
        Self::refuse_after_interrupt(invocation)?;
        tracing::info!("Invoking {invocation}");
        let status = invocation
            .to_command()
            .status()
            .with_context(|| {
                format!(
                    "failed to execute {}",
                    invocation.program().to_string_lossy()
                )
            })?;
        Self::check_interrupt(invocation, status)?;
        Ok(status)
    }

    fn refuse_after_interrupt(invocation: &Invocation) -> Result<()> {
        if interrupt_requested() {
            return Err(interrupted(invocation).into());
        }
        Ok(())
    }

    fn check_interrupt(invocation: &Invocation, status: ExitStatus) -> Result<()> {
        if is_interrupted(status, interrupt_requested()) {
            tracing::warn!("Interrupted");
            return Err(interrupted(invocation).into());
        }
        Ok(())
    }
}

fn interrupted(invocation: &Invocation) -> Interrupted {
    Interrupted {
        program: invocation.program().to_string_lossy().into_owned(),
    }
}

impl Runner for HostRunner {
    fn run(&self, invocation: &Invocation) -> Result<()> {
        let status = Self::status(invocation)?;
        if status.success() {
            return Ok(());
        }
        Err(CommandFailed::from_status(invocation.program(), status).into())
    }

    fn succeeds(&self, invocation: &Invocation) -> Result<bool> {
        Ok(Self::status(invocation)?.success())
    }

    fn output(&self, invocation: &Invocation) -> Result<String> {
        Self::refuse_after_interrupt(invocation)?;
        tracing::debug!("Capturing output of {invocation}");
        let output = invocation
            .to_command()
            .stderr(Stdio::inherit())
            .output()
            .with_context(|| {
                format!(
                    "failed to execute {}",
                    invocation.program().to_string_lossy()
                )
            })?;
        Self::check_interrupt(invocation, output.status)?;
        if !output.status.success() {
            return Err(CommandFailed::from_status(invocation.program(), output.status).into());
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
