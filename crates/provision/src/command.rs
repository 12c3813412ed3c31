//! Subprocess invocation for step commands and idempotency checks
//!
//! Every command runs through the platform shell with an explicit working
//! directory and environment overlay. Output lines are forwarded to a sink
//! as they arrive; the child is killed when it exceeds its time bound.

use crate::context::OutputStream;
use crate::error::StepError;
use crate::step::{IdempotencyCheck, Step, expand};
use std::collections::BTreeMap;
use std::io::{BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

/// How often the child is polled while no output arrives
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long to keep reading after exit; background daemons may hold the pipes open
const DRAIN_GRACE: Duration = Duration::from_millis(500);

/// Captured output kept per step (the tail is kept)
pub const MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

/// Commands whose process group can be signalled on abort
const MAX_TRACKED_GROUPS: usize = 64;

/// Process groups of running commands; 0 marks a free slot
static RUNNING_GROUPS: [AtomicI32; MAX_TRACKED_GROUPS] =
    [const { AtomicI32::new(0) }; MAX_TRACKED_GROUPS];

/// A fully resolved command invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    /// Shell script passed to `sh -c` / `cmd /C`
    pub script: String,
    /// Working directory; inherited when `None`
    pub workdir: Option<PathBuf>,
    /// Environment overlay on top of the engine's environment
    pub env: BTreeMap<String, String>,
    /// Time bound
    pub timeout: Duration,
}

impl Invocation {
    /// Resolve a script in the context of a step: catalog env, then step env, then workdir
    pub fn for_step(
        step: &Step,
        catalog_env: &BTreeMap<String, String>,
        script: &str,
        timeout: Duration,
    ) -> Self {
        let mut env = catalog_env.clone();
        env.extend(step.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        env.insert("RIGUP_STEP_ID".to_string(), step.id.clone());

        Self {
            script: script.to_string(),
            workdir: step.resolved_workdir(),
            env,
            timeout,
        }
    }
}

/// Run an invocation, streaming each output line to `sink`.
///
/// Returns `Ok(())` on exit status 0.
pub fn run(
    invocation: &Invocation,
    sink: &mut dyn FnMut(OutputStream, &str),
) -> Result<(), StepError> {
    let mut child = spawn(invocation).map_err(|e| StepError::Spawn {
        message: e.to_string(),
    })?;
    let _group = GroupSlot::claim(&child);

    let (tx, rx) = mpsc::channel();
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, OutputStream::Stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, OutputStream::Stderr, tx.clone());
    }
    drop(tx);

    let deadline = Instant::now() + invocation.timeout;
    let mut exit: Option<ExitStatus> = None;
    let mut drain_until: Option<Instant> = None;
    let mut drained = false;

    let status = loop {
        if !drained {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok((stream, line)) => sink(stream, &line),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => drained = true,
            }
        } else if exit.is_none() {
            thread::sleep(POLL_INTERVAL);
        }

        if exit.is_none() {
            match child.try_wait() {
                Ok(Some(status)) => {
                    exit = Some(status);
                    drain_until = Some(Instant::now() + DRAIN_GRACE);
                }
                Ok(None) if Instant::now() >= deadline => {
                    log::warn!(
                        "Command exceeded {}s, killing: {}",
                        invocation.timeout.as_secs(),
                        invocation.script
                    );
                    kill(&mut child);
                    return Err(StepError::Timeout {
                        limit_secs: invocation.timeout.as_secs(),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    kill(&mut child);
                    return Err(StepError::Spawn {
                        message: format!("failed to wait for command: {e}"),
                    });
                }
            }
        }

        if let Some(status) = exit
            && (drained || drain_until.is_some_and(|t| Instant::now() >= t))
        {
            break status;
        }
    };

    if status.success() {
        Ok(())
    } else {
        Err(StepError::Execution {
            code: status.code(),
        })
    }
}

/// Registration of a running command's process group, released on drop
struct GroupSlot(Option<usize>);

impl GroupSlot {
    fn claim(child: &Child) -> Self {
        let Ok(pgid) = i32::try_from(child.id()) else {
            return Self(None);
        };
        for (i, slot) in RUNNING_GROUPS.iter().enumerate() {
            if slot
                .compare_exchange(0, pgid, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Self(Some(i));
            }
        }
        log::debug!("Not tracking process group {pgid}: all slots in use");
        Self(None)
    }
}

impl Drop for GroupSlot {
    fn drop(&mut self) {
        if let Some(i) = self.0 {
            RUNNING_GROUPS[i].store(0, Ordering::SeqCst);
        }
    }
}

/// Send `signal` to the process group of every command still running.
///
/// Only reads atomics and calls kill(2), so a signal handler may call it.
#[cfg(unix)]
pub fn signal_running(signal: libc::c_int) {
    for slot in &RUNNING_GROUPS {
        let pgid = slot.load(Ordering::SeqCst);
        if pgid > 0 {
            signal_group(pgid, signal);
        }
    }
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn signal_group(pgid: i32, signal: libc::c_int) {
    // SAFETY: kill(2) is async-signal-safe; a negative pid targets the group we created
    unsafe {
        libc::kill(-pgid, signal);
    }
}

/// Outcome of evaluating an idempotency check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Effect already present; skip the command
    Satisfied,
    /// Effect absent; run the command
    NotSatisfied,
}

/// Evaluate a step's idempotency check.
///
/// A check that cannot run (spawn failure, timeout) counts as not satisfied.
pub fn probe(
    check: &IdempotencyCheck,
    step: &Step,
    catalog_env: &BTreeMap<String, String>,
    timeout: Duration,
) -> CheckOutcome {
    match check {
        IdempotencyCheck::Path { path } => {
            let mut resolved = expand(path);
            if resolved.is_relative()
                && let Some(dir) = step.resolved_workdir()
            {
                resolved = dir.join(resolved);
            }
            if resolved.exists() {
                CheckOutcome::Satisfied
            } else {
                CheckOutcome::NotSatisfied
            }
        }
        IdempotencyCheck::Command(script) => {
            let invocation = Invocation::for_step(step, catalog_env, script, timeout);
            let mut sink = |_: OutputStream, line: &str| log::trace!("[{} check] {}", step.id, line);
            match run(&invocation, &mut sink) {
                Ok(()) => CheckOutcome::Satisfied,
                Err(StepError::Execution { .. }) => CheckOutcome::NotSatisfied,
                Err(e) => {
                    log::warn!("Idempotency check for '{}' could not run: {}", step.id, e);
                    CheckOutcome::NotSatisfied
                }
            }
        }
    }
}

/// Tail-keeping buffer for captured step output
#[derive(Debug, Default)]
pub struct OutputBuffer {
    text: String,
    limit: usize,
    truncated: bool,
}

impl OutputBuffer {
    pub fn new(limit: usize) -> Self {
        Self {
            text: String::new(),
            limit,
            truncated: false,
        }
    }

    /// Append one line, dropping the oldest text past the limit
    pub fn push_line(&mut self, line: &str) {
        self.text.push_str(line);
        self.text.push('\n');

        if self.text.len() > self.limit {
            let mut cut = self.text.len() - self.limit;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
            self.truncated = true;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_string(self) -> String {
        if self.truncated {
            format!("[... earlier output truncated ...]\n{}", self.text)
        } else {
            self.text
        }
    }
}

fn spawn(invocation: &Invocation) -> std::io::Result<Child> {
    let mut cmd = shell(&invocation.script);
    if let Some(dir) = &invocation.workdir {
        cmd.current_dir(dir);
    }
    cmd.envs(&invocation.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group: the terminal's Ctrl-C reaches only the engine, which
    // lets the in-flight command finish, and a timeout can kill the whole tree
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    log::debug!("Spawning: {}", invocation.script);
    cmd.spawn()
}

#[cfg(unix)]
fn shell(script: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(script);
    cmd
}

#[cfg(windows)]
fn shell(script: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(script);
    cmd
}

fn spawn_reader<R>(pipe: R, stream: OutputStream, tx: Sender<(OutputStream, String)>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']).to_string();
                    if tx.send((stream, line)).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

fn kill(child: &mut Child) {
    #[cfg(unix)]
    if let Ok(pid) = i32::try_from(child.id()) {
        signal_group(pid, libc::SIGKILL);
    }
    let _ = child.kill();
    let _ = child.wait();
}
