//! Child process handle: streaming output, wait and termination

use std::fmt;
use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::RunnerError;
use crate::state::lock;

/// Default time between SIGTERM and SIGKILL
pub const DEFAULT_TERMINATION_GRACE: Duration = Duration::from_secs(5);

const ESCALATION_POLL: Duration = Duration::from_millis(50);

/// What the output observer wants done after seeing a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineAction {
    Continue,
    Terminate,
}

/// Called on the reader threads for every output line
pub type LineObserver = Arc<dyn Fn(&str) -> LineAction + Send + Sync>;

/// Why a process was terminated by us
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    /// Batch cancellation
    Cancelled,
    /// Per-job timeout
    TimedOut { seconds: u64 },
    /// Fatal marker seen in the output
    Fatal,
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationCause::Cancelled => f.write_str("cancelled"),
            TerminationCause::TimedOut { seconds } => write!(f, "timed out after {}s", seconds),
            TerminationCause::Fatal => f.write_str("fatal error"),
        }
    }
}

/// Result of waiting on a process
#[derive(Debug, Clone, Default)]
pub struct ExitOutcome {
    /// Exit code when the process exited normally
    pub exit_code: Option<i32>,
    /// Terminating signal name (e.g. `SIGTERM`)
    pub signal: Option<String>,
    /// All stdout and stderr lines, in arrival order
    pub output: Vec<String>,
    /// Set when we asked the process to stop
    pub termination: Option<TerminationCause>,
}

impl ExitOutcome {
    /// Exited on its own with status 0
    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && self.termination.is_none()
    }
}

/// State shared with reader and escalation threads
#[derive(Debug)]
struct Shared {
    pid: u32,
    running: AtomicBool,
    cause: Mutex<Option<TerminationCause>>,
    grace: Duration,
}

impl Shared {
    /// First cause wins. Returns true if this call initiated termination.
    fn terminate(self: &Arc<Self>, cause: TerminationCause) -> bool {
        {
            let mut slot = lock(&self.cause);
            if slot.is_some() {
                return false;
            }
            *slot = Some(cause);
        }
        if !self.running.load(Ordering::SeqCst) {
            return true;
        }

        tracing::info!(pid = self.pid, %cause, "terminating engine process");
        platform::terminate(self.pid);

        let shared = Arc::clone(self);
        thread::spawn(move || {
            let deadline = Instant::now() + shared.grace;
            while Instant::now() < deadline {
                if !shared.running.load(Ordering::SeqCst) {
                    return;
                }
                thread::sleep(ESCALATION_POLL);
            }
            if shared.running.load(Ordering::SeqCst) {
                tracing::warn!(pid = shared.pid, "engine ignored termination, killing");
                platform::kill(shared.pid);
            }
        });
        true
    }
}

/// Handle to a running engine process.
pub struct ProcessHandle {
    shared: Arc<Shared>,
    child: Mutex<Option<Child>>,
    readers: Mutex<Vec<JoinHandle<()>>>,
    output: Arc<Mutex<Vec<String>>>,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.shared.pid)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Spawn `command` with piped output, feeding every line to `observer`.
pub fn spawn(
    mut command: Command,
    observer: LineObserver,
    grace: Duration,
) -> Result<ProcessHandle, RunnerError> {
    platform::prepare(&mut command);
    let program = std::path::PathBuf::from(command.get_program());
    let mut child = command
        .spawn()
        .map_err(|source| RunnerError::SpawnFailed { program, source })?;

    let shared = Arc::new(Shared {
        pid: child.id(),
        running: AtomicBool::new(true),
        cause: Mutex::new(None),
        grace,
    });
    let output = Arc::new(Mutex::new(Vec::new()));

    let mut readers = Vec::with_capacity(2);
    if let Some(stdout) = child.stdout.take() {
        readers.push(spawn_reader(
            stdout,
            Arc::clone(&shared),
            Arc::clone(&output),
            Arc::clone(&observer),
        ));
    }
    if let Some(stderr) = child.stderr.take() {
        readers.push(spawn_reader(
            stderr,
            Arc::clone(&shared),
            Arc::clone(&output),
            observer,
        ));
    }

    Ok(ProcessHandle {
        shared,
        child: Mutex::new(Some(child)),
        readers: Mutex::new(readers),
        output,
    })
}

fn spawn_reader<R: Read + Send + 'static>(
    stream: R,
    shared: Arc<Shared>,
    output: Arc<Mutex<Vec<String>>>,
    observer: LineObserver,
) -> JoinHandle<()> {
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf)
                        .trim_end_matches(['\r', '\n'])
                        .to_string();
                    if observer(&line) == LineAction::Terminate {
                        shared.terminate(TerminationCause::Fatal);
                    }
                    lock(&output).push(line);
                }
            }
        }
    })
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.shared.pid
    }

    /// True until the process has been reaped by [`ProcessHandle::wait`]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Cause recorded by the first successful `terminate` call
    pub fn termination_cause(&self) -> Option<TerminationCause> {
        *lock(&self.shared.cause)
    }

    /// Best-effort termination of the process tree.
    ///
    /// Sends SIGTERM to the process group, then SIGKILL after the grace
    /// period. Only the first call has an effect.
    pub fn terminate(&self, cause: TerminationCause) -> bool {
        self.shared.terminate(cause)
    }

    /// Block until the process exits and its output is drained.
    pub fn wait(&self) -> Result<ExitOutcome, RunnerError> {
        let mut child = lock(&self.child)
            .take()
            .ok_or(RunnerError::AlreadyWaited {
                pid: self.shared.pid,
            })?;
        let status = child.wait();
        self.shared.running.store(false, Ordering::SeqCst);
        let status = status?;

        let readers = std::mem::take(&mut *lock(&self.readers));
        for reader in readers {
            let _ = reader.join();
        }

        let output = std::mem::take(&mut *lock(&self.output));
        Ok(ExitOutcome {
            exit_code: status.code(),
            signal: platform::signal_name(&status),
            output,
            termination: self.termination_cause(),
        })
    }
}

#[cfg(unix)]
mod platform {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    use std::os::unix::process::{CommandExt, ExitStatusExt};
    use std::process::{Command, ExitStatus};

    /// Put the engine in its own process group so the whole tree can be
    /// signalled.
    pub fn prepare(command: &mut Command) {
        command.process_group(0);
    }

    pub fn terminate(pid: u32) {
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM);
    }

    pub fn kill(pid: u32) {
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }

    pub fn signal_name(status: &ExitStatus) -> Option<String> {
        status.signal().map(|sig| {
            Signal::try_from(sig)
                .map(|s| s.as_str().to_string())
                .unwrap_or_else(|_| format!("SIG{}", sig))
        })
    }
}

#[cfg(not(unix))]
mod platform {
    use std::process::{Command, ExitStatus, Stdio};

    pub fn prepare(_command: &mut Command) {}

    fn taskkill(pid: u32) {
        let _ = Command::new("taskkill")
            .args(["/T", "/F", "/PID", &pid.to_string()])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
    }

    pub fn terminate(pid: u32) {
        taskkill(pid);
    }

    pub fn kill(pid: u32) {
        taskkill(pid);
    }

    pub fn signal_name(_status: &ExitStatus) -> Option<String> {
        None
    }
}
