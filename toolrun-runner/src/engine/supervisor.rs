//! Process launch and supervision
//!
//! Spawns the interpreter in its own process group with kernel limits, then
//! polls it at a fixed interval: reaping, sampling memory, emitting progress
//! and enforcing the wall-clock timeout. stdout and stderr are drained by
//! separate tasks for the whole lifetime of the child.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use toolrun_core::domain::execution::ResourceUsage;
use tracing::{debug, warn};

use crate::engine::classify::LaunchError;
use crate::sandbox::ProcessLimits;

/// Receives `(percentage, message)` while a script runs
pub type ProgressSink = Arc<dyn Fn(u8, String) + Send + Sync>;

/// Upper bound for percentages reported while the script is still running
const RUNNING_PROGRESS_CAP: u8 = 90;

/// How long to wait for the output readers once the process is gone
const READER_GRACE: Duration = Duration::from_secs(2);

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Everything needed to start one script process
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    pub interpreter: String,
    pub script_path: PathBuf,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub working_dir: PathBuf,
    pub limits: ProcessLimits,
    pub timeout: Duration,
    /// Name used in progress messages
    pub display_name: String,
}

/// How a supervised process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    TimedOut,
}

/// Outcome of a supervised run
#[derive(Debug)]
pub struct SupervisedRun {
    pub outcome: Result<Termination, LaunchError>,
    pub stdout: String,
    pub stderr: String,
    pub usage: ResourceUsage,
}

/// Polls a running script until it exits or times out
#[derive(Debug, Clone)]
pub struct Supervisor {
    poll_interval: Duration,
    progress_interval: Duration,
}

impl Supervisor {
    pub fn new(poll_interval: Duration, progress_interval: Duration) -> Self {
        Self {
            poll_interval,
            progress_interval,
        }
    }

    pub async fn run(&self, spec: &LaunchSpec, progress: Option<&ProgressSink>) -> SupervisedRun {
        let started = Instant::now();
        let cpu_before = children_cpu_seconds();

        let mut child = match build_command(spec).spawn() {
            Ok(child) => child,
            Err(source) => {
                return SupervisedRun {
                    outcome: Err(LaunchError::Spawn {
                        program: spec.interpreter.clone(),
                        source,
                    }),
                    stdout: String::new(),
                    stderr: String::new(),
                    usage: ResourceUsage {
                        wall_time_seconds: started.elapsed().as_secs_f64(),
                        ..ResourceUsage::default()
                    },
                };
            }
        };

        let pid = child.id();
        let mut group = ProcessGroupGuard::new(pid);
        debug!(
            "Spawned {} {} (pid {:?})",
            spec.interpreter,
            spec.script_path.display(),
            pid
        );

        let stdout_reader = spawn_reader(child.stdout.take());
        let stderr_reader = spawn_reader(child.stderr.take());

        let mut sampler = MemorySampler::new(pid);
        let mut last_progress: Option<Instant> = None;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let outcome = loop {
            ticker.tick().await;

            match child.try_wait() {
                Ok(Some(status)) => break Ok(termination_of(status)),
                Ok(None) => {}
                Err(e) => {
                    group.kill();
                    let _ = child.wait().await;
                    break Err(LaunchError::Wait(e));
                }
            }

            let elapsed = started.elapsed();
            if elapsed >= spec.timeout {
                debug!(
                    "Script {} exceeded timeout of {:?}, killing process group",
                    spec.display_name, spec.timeout
                );
                group.kill();
                if let Err(e) = child.wait().await {
                    warn!("Failed to reap timed out script {}: {}", spec.display_name, e);
                }
                break Ok(Termination::TimedOut);
            }

            sampler.sample();

            if let Some(sink) = progress {
                let due = last_progress
                    .map(|at| at.elapsed() >= self.progress_interval)
                    .unwrap_or(true);
                if due {
                    sink(
                        running_percentage(elapsed, spec.timeout),
                        format!("Executing {}...", spec.display_name),
                    );
                    last_progress = Some(Instant::now());
                }
            }
        };

        // Stragglers left in the group would keep the pipes open
        group.kill();

        let (stdout, stdout_err) = collect_reader(stdout_reader).await;
        let (stderr, stderr_err) = collect_reader(stderr_reader).await;
        let outcome = match (outcome, stdout_err.or(stderr_err)) {
            (Ok(Termination::Exited(_)), Some(e)) => Err(LaunchError::Output(e)),
            (outcome, _) => outcome,
        };

        SupervisedRun {
            outcome,
            stdout,
            stderr,
            usage: ResourceUsage {
                start_memory_mb: sampler.first_mb(),
                end_memory_mb: sampler.last_mb(),
                peak_memory_mb: sampler.peak_mb(),
                cpu_time_seconds: (children_cpu_seconds() - cpu_before).max(0.0),
                wall_time_seconds: started.elapsed().as_secs_f64(),
            },
        }
    }
}

/// `min(90, elapsed / timeout * 100)`
pub fn running_percentage(elapsed: Duration, timeout: Duration) -> u8 {
    if timeout.is_zero() {
        return RUNNING_PROGRESS_CAP;
    }
    let percent = elapsed.as_secs_f64() / timeout.as_secs_f64() * 100.0;
    percent.min(RUNNING_PROGRESS_CAP as f64) as u8
}

fn build_command(spec: &LaunchSpec) -> Command {
    let mut command = Command::new(&spec.interpreter);
    command
        .arg(&spec.script_path)
        .args(&spec.args)
        .env_clear()
        .envs(&spec.env)
        .current_dir(&spec.working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let limits = spec.limits;
    // SAFETY: runs in the forked child before exec and only calls setrlimit
    unsafe {
        command.pre_exec(move || limits.apply());
    }
    command
}

fn termination_of(status: ExitStatus) -> Termination {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => Termination::Exited(code),
        (None, Some(signal)) => Termination::Signaled(signal),
        (None, None) => Termination::Exited(-1),
    }
}

fn spawn_reader<R>(pipe: Option<R>) -> Option<JoinHandle<std::io::Result<Vec<u8>>>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    pipe.map(|mut pipe| {
        tokio::spawn(async move {
            let mut buf = Vec::new();
            pipe.read_to_end(&mut buf).await?;
            Ok::<_, std::io::Error>(buf)
        })
    })
}

async fn collect_reader(
    reader: Option<JoinHandle<std::io::Result<Vec<u8>>>>,
) -> (String, Option<std::io::Error>) {
    let Some(mut handle) = reader else {
        return (String::new(), None);
    };
    match tokio::time::timeout(READER_GRACE, &mut handle).await {
        Ok(Ok(Ok(bytes))) => (String::from_utf8_lossy(&bytes).into_owned(), None),
        Ok(Ok(Err(e))) => (String::new(), Some(e)),
        Ok(Err(join_error)) => (String::new(), Some(std::io::Error::other(join_error))),
        Err(_) => {
            warn!("Output pipe still open {:?} after the script ended", READER_GRACE);
            handle.abort();
            (String::new(), None)
        }
    }
}

/// Kills the child's whole process group unless disarmed
///
/// Dropping a supervision future (forced worker shutdown) runs the drop and
/// takes every descendant down with the script.
struct ProcessGroupGuard {
    pgid: Option<libc::pid_t>,
}

impl ProcessGroupGuard {
    fn new(pid: Option<u32>) -> Self {
        Self {
            pgid: pid.map(|pid| pid as libc::pid_t),
        }
    }

    fn kill(&mut self) {
        if let Some(pgid) = self.pgid.take() {
            // ESRCH just means the group is already gone
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }
}

impl Drop for ProcessGroupGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

/// Resident memory samples of one process
struct MemorySampler {
    system: System,
    pid: Option<Pid>,
    first: Option<u64>,
    last: u64,
    peak: u64,
}

impl MemorySampler {
    fn new(pid: Option<u32>) -> Self {
        Self {
            system: System::new(),
            pid: pid.map(Pid::from_u32),
            first: None,
            last: 0,
            peak: 0,
        }
    }

    fn sample(&mut self) {
        let Some(pid) = self.pid else {
            return;
        };
        self.system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        if let Some(bytes) = self.system.process(pid).map(|p| p.memory()) {
            self.first.get_or_insert(bytes);
            self.last = bytes;
            self.peak = self.peak.max(bytes);
        }
    }

    fn first_mb(&self) -> f64 {
        self.first.unwrap_or(0) as f64 / BYTES_PER_MB
    }

    fn last_mb(&self) -> f64 {
        self.last as f64 / BYTES_PER_MB
    }

    fn peak_mb(&self) -> f64 {
        self.peak as f64 / BYTES_PER_MB
    }
}

/// User + system CPU seconds of all reaped children of this process
///
/// Concurrent workers share the counter, so a delta is attributed to
/// whichever run reads it.
fn children_cpu_seconds() -> f64 {
    let mut usage = std::mem::MaybeUninit::<libc::rusage>::uninit();
    if unsafe { libc::getrusage(libc::RUSAGE_CHILDREN, usage.as_mut_ptr()) } != 0 {
        return 0.0;
    }
    let usage = unsafe { usage.assume_init() };
    let seconds = |tv: libc::timeval| tv.tv_sec as f64 + tv.tv_usec as f64 / 1_000_000.0;
    seconds(usage.ru_utime) + seconds(usage.ru_stime)
}

/// Resolves the script location and checks it can be launched
pub fn preflight(script_path: &Path) -> Result<(), PreflightError> {
    use std::os::unix::fs::PermissionsExt;

    let metadata = match std::fs::metadata(script_path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PreflightError::NotFound);
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(PreflightError::NotExecutable);
        }
        Err(_) => return Err(PreflightError::NotFound),
    };
    if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
        return Err(PreflightError::NotExecutable);
    }
    Ok(())
}

/// Script file problems detected before spawning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreflightError {
    NotFound,
    NotExecutable,
}
