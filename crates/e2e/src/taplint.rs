//! STILTS taplint runner and summary checks
//!
//! taplint asks for credentials on its terminal, so the process is driven
//! like an interactive session: wait for `Username:`, answer, wait for
//! `Password:`, answer, then collect everything it prints until it exits.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use rspval_common::TaplintLimits;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::error::{E2eError, E2eResult};

/// Ceiling for a whole taplint session, in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 150_000;

/// How a taplint session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LintOutcome {
    /// The process exited after answering both prompts
    Completed { exit_status: i32 },
    /// The session exceeded its ceiling
    Timeout,
    /// The process closed its output before a prompt appeared
    UnexpectedEof { exit_status: i32 },
    /// The process could not be started or talked to
    Failed(String),
}

impl LintOutcome {
    /// Exit status of the process, `-1` when none is available
    pub fn exit_status(&self) -> i32 {
        match self {
            LintOutcome::Completed { exit_status } | LintOutcome::UnexpectedEof { exit_status } => {
                *exit_status
            }
            LintOutcome::Timeout | LintOutcome::Failed(_) => -1,
        }
    }
}

impl fmt::Display for LintOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LintOutcome::Completed { exit_status } => write!(f, "exited with status {}", exit_status),
            LintOutcome::Timeout => f.write_str("timed out"),
            LintOutcome::UnexpectedEof { exit_status } => {
                write!(f, "ended unexpectedly with status {}", exit_status)
            }
            LintOutcome::Failed(reason) => write!(f, "failed: {}", reason),
        }
    }
}

/// Text captured from a taplint session together with how it ended
#[derive(Debug, Clone)]
pub struct TaplintRun {
    pub output: String,
    pub outcome: LintOutcome,
}

/// Error and warning totals from the taplint summary line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LintSummary {
    pub errors: u32,
    pub warnings: u32,
}

enum SessionError {
    Eof,
    Io(std::io::Error),
}

impl From<std::io::Error> for SessionError {
    fn from(e: std::io::Error) -> Self {
        SessionError::Io(e)
    }
}

/// Accumulates raw process output and waits for prompts in it.
///
/// Output is kept as bytes and decoded once at the end, so a character
/// split across two reads survives intact.
struct Transcript {
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    buffer: Vec<u8>,
}

impl Transcript {
    fn new(rx: mpsc::UnboundedReceiver<Vec<u8>>) -> Self {
        Self { rx, buffer: Vec::new() }
    }

    async fn expect(&mut self, prompt: &str) -> Result<(), SessionError> {
        let prompt = prompt.as_bytes();
        loop {
            if let Some(idx) = self.buffer.windows(prompt.len()).position(|w| w == prompt) {
                self.buffer.drain(..idx + prompt.len());
                return Ok(());
            }
            match self.rx.recv().await {
                Some(chunk) => self.buffer.extend_from_slice(&chunk),
                None => return Err(SessionError::Eof),
            }
        }
    }

    async fn read_to_end(&mut self) -> String {
        while let Some(chunk) = self.rx.recv().await {
            self.buffer.extend_from_slice(&chunk);
        }
        String::from_utf8_lossy(&std::mem::take(&mut self.buffer)).into_owned()
    }

    fn pending(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}

fn forward<R>(mut source: R, tx: mpsc::UnboundedSender<Vec<u8>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match source.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

async fn answer(stdin: &mut ChildStdin, value: &str) -> std::io::Result<()> {
    stdin.write_all(value.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

/// Runs `java -jar <stilts.jar> taplint tapurl=<url>`
#[derive(Debug, Clone)]
pub struct TaplintService {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl TaplintService {
    pub fn new(jar_path: &Path) -> Self {
        Self {
            program: PathBuf::from("java"),
            args: vec![
                "-jar".to_string(),
                jar_path.to_string_lossy().into_owned(),
                "taplint".to_string(),
            ],
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    /// Use another program in place of `java -jar <jar> taplint`. The
    /// `tapurl=` argument is still appended.
    pub fn with_command(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Lint `tap_url`, answering the credential prompts.
    ///
    /// Never fails: every way the session can end is reported through
    /// [`TaplintRun::outcome`], with a short description as output for the
    /// non-completed cases.
    pub async fn run(&self, tap_url: &str, username: &str, password: &str) -> TaplintRun {
        info!("Running taplint against {}", tap_url);

        let mut child = match Command::new(&self.program)
            .args(&self.args)
            .arg(format!("tapurl={}", tap_url))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                error!("An error occurred: {}", e);
                return TaplintRun {
                    output: format!("Error: {}", e),
                    outcome: LintOutcome::Failed(e.to_string()),
                };
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward(stdout, tx.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward(stderr, tx);
        }
        let mut transcript = Transcript::new(rx);

        let session = tokio::time::timeout(
            self.timeout,
            Self::session(&mut child, &mut transcript, username, password),
        )
        .await;

        match session {
            Ok(Ok(run)) => run,
            Ok(Err(SessionError::Eof)) => {
                error!("EOF encountered. Last output: {}", transcript.pending());
                let exit_status = match child.wait().await {
                    Ok(status) => status.code().unwrap_or(-1),
                    Err(_) => -1,
                };
                TaplintRun {
                    output: "Process ended unexpectedly".to_string(),
                    outcome: LintOutcome::UnexpectedEof { exit_status },
                }
            }
            Ok(Err(SessionError::Io(e))) => {
                error!("An error occurred: {}", e);
                TaplintRun {
                    output: format!("Error: {}", e),
                    outcome: LintOutcome::Failed(e.to_string()),
                }
            }
            Err(_) => {
                error!("Timeout occurred. Last output: {}", transcript.pending());
                if let Err(e) = child.kill().await {
                    debug!("Failed to kill taplint: {}", e);
                }
                TaplintRun {
                    output: format!("Timeout occurred after {} seconds", self.timeout.as_secs()),
                    outcome: LintOutcome::Timeout,
                }
            }
        }
    }

    async fn session(
        child: &mut Child,
        transcript: &mut Transcript,
        username: &str,
        password: &str,
    ) -> Result<TaplintRun, SessionError> {
        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "taplint stdin is not piped"))?;

        transcript.expect("Username:").await?;
        answer(&mut stdin, username).await?;

        transcript.expect("Password:").await?;
        answer(&mut stdin, password).await?;
        drop(stdin);

        let output = transcript.read_to_end().await;
        let status = child.wait().await?;

        Ok(TaplintRun {
            output,
            outcome: LintOutcome::Completed {
                exit_status: status.code().unwrap_or(-1),
            },
        })
    }
}

static ERRORS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Errors:\s+(\d+)").expect("valid regex"));
static WARNINGS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"Warnings:\s+(\d+)").expect("valid regex"));

fn capture_count(re: &Regex, line: &str) -> u32 {
    re.captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Extract the totals from taplint output.
///
/// Lines are searched from the end; the first one starting with `Totals:`
/// is used, so the last summary in the text wins. A count missing from that
/// line reads as zero. Returns `None` when there is no summary line.
pub fn parse_summary(output: &str) -> Option<LintSummary> {
    output
        .lines()
        .rev()
        .find(|line| line.starts_with("Totals:"))
        .map(|line| LintSummary {
            errors: capture_count(&ERRORS_RE, line),
            warnings: capture_count(&WARNINGS_RE, line),
        })
}

/// Compares taplint totals against the limits of one application
pub struct TaplintValidationService {
    limits: TaplintLimits,
}

impl TaplintValidationService {
    pub fn new(limits: TaplintLimits) -> Self {
        Self { limits }
    }

    /// Check that the process completed with status 0
    pub fn validate_run(&self, run: &TaplintRun) -> E2eResult<()> {
        match run.outcome {
            LintOutcome::Completed { exit_status: 0 } => Ok(()),
            LintOutcome::Completed { exit_status } => Err(E2eError::AssertionFailed(format!(
                "STILTS TAPLINT failed with exit status {}",
                exit_status
            ))),
            ref other => Err(E2eError::Lint(other.clone())),
        }
    }

    pub fn validate_summary(&self, output: &str) -> E2eResult<LintSummary> {
        let summary = parse_summary(output)
            .ok_or_else(|| E2eError::AssertionFailed("Failed to parse TAPLINT summary".to_string()))?;

        if summary.errors > self.limits.errors {
            return Err(E2eError::AssertionFailed(format!(
                "TAPLINT reported {} errors, which exceeds the limit of {}",
                summary.errors, self.limits.errors
            )));
        }

        if summary.warnings > self.limits.warnings {
            return Err(E2eError::AssertionFailed(format!(
                "TAPLINT reported {} warnings, which exceeds the limit of {}",
                summary.warnings, self.limits.warnings
            )));
        }

        info!("Full output:");
        info!("{}", output);
        Ok(summary)
    }

    /// Check the run and then its summary
    pub fn validate(&self, run: &TaplintRun) -> E2eResult<LintSummary> {
        self.validate_run(run)?;
        self.validate_summary(&run.output)
    }
}
