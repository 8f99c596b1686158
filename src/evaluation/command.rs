//! Subprocess-isolated oracle with hard cancellation.
//!
//! Each evaluation spawns the configured program, writes the design mapping
//! as a JSON object to its standard input and reads one [`OracleReport`]
//! from the last non-empty line of its standard output. The child runs on a
//! private current-thread Tokio runtime so the budget can be enforced with
//! `tokio::time::timeout`; an expired child is killed and reaped before the
//! call returns.

use crate::core::DesignMapping;
use crate::ops::{Oracle, OracleError, OracleReport, OracleResult};
use std::ffi::OsString;
use std::io;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, warn};

/// Runs an external program per evaluation.
///
/// ```no_run
/// use designswarm::evaluation::CommandOracle;
///
/// let oracle = CommandOracle::new("python3")?
///     .arg("evaluate_building.py")
///     .arg("--no-save");
/// # Ok::<(), designswarm::ops::OracleError>(())
/// ```
pub struct CommandOracle {
    program: OsString,
    args: Vec<OsString>,
    runtime: Runtime,
    child: Option<Child>,
}

impl CommandOracle {
    /// Creates an oracle that runs `program` with no arguments.
    ///
    /// # Errors
    /// Returns [`OracleError::Io`] when the Tokio runtime cannot be built.
    pub fn new(program: impl Into<OsString>) -> OracleResult<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        Ok(Self {
            program: program.into(),
            args: Vec::new(),
            runtime,
            child: None,
        })
    }

    /// Appends one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl Oracle for CommandOracle {
    fn evaluate_design(
        &mut self,
        design: &DesignMapping,
        budget: Duration,
    ) -> OracleResult<OracleReport> {
        let payload = serde_json::to_vec(design)?;
        let mut command = self.command();
        let output = self
            .runtime
            .block_on(run_child(&mut self.child, &mut command, payload, budget))?;
        if !output.status.success() {
            return Err(OracleError::Process {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            });
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| OracleError::Protocol("oracle produced no output".to_owned()))?;
        Ok(serde_json::from_str(line)?)
    }

    fn release(&mut self) {
        if let Some(mut child) = self.child.take() {
            if let Err(err) = self.runtime.block_on(child.kill()) {
                debug!(error = %err, "oracle process already gone");
            }
        }
    }

    fn preemptible(&self) -> bool {
        true
    }
}

struct ChildOutput {
    status: ExitStatus,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

async fn run_child(
    slot: &mut Option<Child>,
    command: &mut Command,
    payload: Vec<u8>,
    budget: Duration,
) -> OracleResult<ChildOutput> {
    let child = slot.insert(command.spawn()?);
    let (Some(mut stdin), Some(mut stdout), Some(mut stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        return Err(OracleError::Protocol(
            "oracle process pipes unavailable".to_owned(),
        ));
    };

    let exchange = async {
        let feed = async move {
            match stdin.write_all(&payload).await {
                Err(err) if err.kind() != io::ErrorKind::BrokenPipe => Err(err),
                _ => Ok(()),
            }
        };
        let mut out = Vec::new();
        let mut err = Vec::new();
        tokio::try_join!(feed, stdout.read_to_end(&mut out), stderr.read_to_end(&mut err))?;
        let status = child.wait().await?;
        Ok::<_, io::Error>(ChildOutput {
            status,
            stdout: out,
            stderr: err,
        })
    };

    match tokio::time::timeout(budget, exchange).await {
        Ok(Ok(output)) => {
            *slot = None;
            Ok(output)
        }
        Ok(Err(err)) => Err(err.into()),
        Err(_) => {
            match child.kill().await {
                Ok(()) => *slot = None,
                Err(err) => warn!(error = %err, "failed to kill timed-out oracle process"),
            }
            Err(OracleError::Timeout(budget))
        }
    }
}
