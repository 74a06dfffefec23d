//! External command execution with bounded retries
//!
//! Every device tool (`adb`, `emulator`, `xcrun simctl`) goes through a
//! [`CommandRunner`]. The production [`ProcessRunner`] spawns one process per
//! attempt; tests swap in a scripted runner.

use std::fmt;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Notify};

use pilot_core::prelude::*;

// ─────────────────────────────────────────────────────────────────
// Command description
// ─────────────────────────────────────────────────────────────────

/// A program plus its argument vector
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Program file name without directories, used in `ToolNotFound`
    pub fn tool_name(&self) -> &str {
        std::path::Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program)
    }
}

/// Quote a word for display when it would otherwise be ambiguous
fn quote_word(word: &str) -> String {
    let needs_quotes = word.is_empty()
        || word
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '\'' || c == '\\');
    if !needs_quotes {
        return word.to_string();
    }
    let escaped = word.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

impl fmt::Display for CommandSpec {
    /// Shell-like rendering used in logs and failure messages
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.program)?;
        for arg in &self.args {
            write!(f, " {}", quote_word(arg))?;
        }
        Ok(())
    }
}

/// How loudly each attempt is traced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    Low,
    #[default]
    Normal,
    High,
}

/// Per-call execution options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOptions {
    /// Total attempts; values below 1 are clamped to 1
    pub retries: u32,
    /// Delay between attempts
    pub interval: Duration,
    pub verbosity: Verbosity,
    /// Text written to the child's stdin
    pub input: Option<String>,
}

impl Default for ExecOptions {
    fn default() -> Self {
        Self {
            retries: 1,
            interval: Duration::ZERO,
            verbosity: Verbosity::Normal,
            input: None,
        }
    }
}

impl ExecOptions {
    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_verbosity(mut self, verbosity: Verbosity) -> Self {
        self.verbosity = verbosity;
        self
    }

    pub fn with_input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    /// Attempts actually made, never zero
    pub fn attempts(&self) -> u32 {
        self.retries.max(1)
    }
}

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Attempt counts for the command families that are known to flake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub install: u32,
    pub api_level: u32,
    pub shell: u32,
    pub default: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            install: 5,
            api_level: 5,
            shell: 1,
            default: 1,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Runner seam
// ─────────────────────────────────────────────────────────────────

/// Executes external commands
#[trait_variant::make(CommandRunner: Send)]
pub trait LocalCommandRunner {
    /// Run to completion, retrying failed attempts per `options`
    async fn execute(&self, spec: &CommandSpec, options: &ExecOptions) -> Result<CommandOutput>;

    /// Start a long-lived process without waiting for it
    fn spawn(&self, spec: &CommandSpec) -> Result<BackgroundProcess>;

    /// Start a long-lived process with stdout redirected into `path`
    fn spawn_to_file(&self, spec: &CommandSpec, path: &std::path::Path)
        -> Result<BackgroundProcess>;

    /// Start a process that keeps running after this one exits
    fn spawn_detached(&self, spec: &CommandSpec) -> Result<()>;
}

/// Production runner backed by `tokio::process`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    async fn attempt(spec: &CommandSpec, input: Option<&str>) -> Result<std::process::Output> {
        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| spawn_error(spec, e))?;

        if let (Some(text), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(text.as_bytes()).await?;
            stdin.shutdown().await?;
        }

        Ok(child.wait_with_output().await?)
    }
}

fn spawn_error(spec: &CommandSpec, e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::ToolNotFound {
            tool: spec.tool_name().to_string(),
        }
    } else {
        Error::CommandSpawn {
            command: spec.to_string(),
            reason: e.to_string(),
        }
    }
}

fn trace_attempt(verbosity: Verbosity, spec: &CommandSpec, attempt: u32, total: u32) {
    match verbosity {
        Verbosity::Low => trace!("exec [{attempt}/{total}]: {spec}"),
        Verbosity::Normal => debug!("exec [{attempt}/{total}]: {spec}"),
        Verbosity::High => info!("exec [{attempt}/{total}]: {spec}"),
    }
}

impl CommandRunner for ProcessRunner {
    async fn execute(&self, spec: &CommandSpec, options: &ExecOptions) -> Result<CommandOutput> {
        let total = options.attempts();
        let mut last_failure: Option<(Option<i32>, String)> = None;

        for attempt in 1..=total {
            trace_attempt(options.verbosity, spec, attempt, total);

            match Self::attempt(spec, options.input.as_deref()).await {
                Ok(output) if output.status.success() => {
                    let result = CommandOutput {
                        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    };
                    trace!("stdout of {spec}: {}", result.stdout.trim_end());
                    return Ok(result);
                }
                Ok(output) => {
                    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
                    debug!(
                        "{spec} exited with {:?} on attempt {attempt}: {}",
                        output.status.code(),
                        stderr.trim()
                    );
                    last_failure = Some((output.status.code(), stderr));
                }
                Err(e @ Error::ToolNotFound { .. }) => return Err(e),
                Err(e) => {
                    debug!("{spec} failed to run on attempt {attempt}: {e}");
                    last_failure = Some((None, e.to_string()));
                }
            }

            if attempt < total && !options.interval.is_zero() {
                tokio::time::sleep(options.interval).await;
            }
        }

        let (exit_code, stderr) = last_failure.unwrap_or_default();
        Err(Error::CommandFailed {
            command: spec.to_string(),
            exit_code,
            stderr,
            attempts: total,
        })
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<BackgroundProcess> {
        info!("spawning: {spec}");
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(spec, e))?;
        Ok(BackgroundProcess::from_child(spec, child))
    }

    fn spawn_to_file(
        &self,
        spec: &CommandSpec,
        path: &std::path::Path,
    ) -> Result<BackgroundProcess> {
        info!("spawning: {spec} > {}", path.display());
        let file = std::fs::File::create(path)?;
        let child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(file))
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| spawn_error(spec, e))?;
        Ok(BackgroundProcess::from_child(spec, child))
    }

    fn spawn_detached(&self, spec: &CommandSpec) -> Result<()> {
        info!("spawning detached: {spec}");
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| spawn_error(spec, e))?;

        // Reap the child without tying its lifetime to ours
        tokio::spawn(async move {
            let _ = child.wait().await;
        });
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// Background processes
// ─────────────────────────────────────────────────────────────────

/// Handle to a long-lived child process.
///
/// The `Child` is owned by a wait task; the handle keeps a kill channel, an
/// exited flag for synchronous checks and a [`Notify`] for async waiting.
/// Dropping the handle kills the process.
pub struct BackgroundProcess {
    command: String,
    pid: Option<u32>,
    kill_tx: Option<oneshot::Sender<()>>,
    /// Whether a wait task owns a real child
    tracked: bool,
    exited: Arc<AtomicBool>,
    exit_notify: Arc<Notify>,
}

impl fmt::Debug for BackgroundProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackgroundProcess")
            .field("command", &self.command)
            .field("pid", &self.pid)
            .field("exited", &self.has_exited())
            .finish()
    }
}

impl BackgroundProcess {
    fn from_child(spec: &CommandSpec, child: Child) -> Self {
        let pid = child.id();
        let exited = Arc::new(AtomicBool::new(false));
        let exit_notify = Arc::new(Notify::new());
        let (kill_tx, kill_rx) = oneshot::channel();

        tokio::spawn(Self::wait_for_exit(
            spec.to_string(),
            child,
            kill_rx,
            Arc::clone(&exited),
            Arc::clone(&exit_notify),
        ));

        Self {
            command: spec.to_string(),
            pid,
            kill_tx: Some(kill_tx),
            tracked: true,
            exited,
            exit_notify,
        }
    }

    /// A handle with no process behind it; reports running until killed
    pub fn detached(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            pid: None,
            kill_tx: None,
            tracked: false,
            exited: Arc::new(AtomicBool::new(false)),
            exit_notify: Arc::new(Notify::new()),
        }
    }

    async fn wait_for_exit(
        command: String,
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        exited: Arc<AtomicBool>,
        exit_notify: Arc<Notify>,
    ) {
        tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => debug!("{command} exited with {status:?}"),
                    Err(e) => error!("Error waiting for {command}: {e}"),
                }
            }
            _ = kill_rx => {
                debug!("killing {command}");
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill {command}: {e}");
                }
            }
        }

        exited.store(true, Ordering::Release);
        exit_notify.notify_waiters();
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    /// Request termination; never suspends
    pub fn kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        } else if !self.tracked {
            self.exited.store(true, Ordering::Release);
        }
    }

    /// Kill and wait until the wait task has reaped the process
    pub async fn stop(&mut self, grace: Duration) {
        let exit_notify = Arc::clone(&self.exit_notify);
        let notified = exit_notify.notified();
        if self.has_exited() {
            return;
        }
        self.kill();
        if self.has_exited() {
            return;
        }
        if tokio::time::timeout(grace, notified).await.is_err() {
            warn!("{} did not exit within {:?}", self.command, grace);
        }
    }
}

impl Drop for BackgroundProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            debug!("BackgroundProcess dropped while running: {}", self.command);
            self.kill();
        }
    }
}
