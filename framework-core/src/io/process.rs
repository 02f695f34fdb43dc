//! Bounded child processes: every run has a deadline and a cap on how much
//! output is kept.
//!
//! A run is over when the child has exited and both output pipes are closed.
//! Background processes the child leaves behind keep the pipes open, so the
//! deadline covers them too: on unix the child leads its own process group and
//! the whole group is killed once time runs out.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, instrument, warn};
use wait_timeout::ChildExt;

/// How long readers get to finish after the process group was killed.
const READER_GRACE: Duration = Duration::from_millis(500);

/// Deadline and output cap for one child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub timeout: Duration,
    /// Bytes kept per stream; the rest is read and dropped so the child never blocks.
    pub output_bytes: usize,
}

/// One captured stream.
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// Bytes read past the cap.
    pub dropped: usize,
}

impl Captured {
    pub fn lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Last `max_chars` characters, trimmed.
    pub fn tail(&self, max_chars: usize) -> String {
        let text = self.lossy();
        let text = text.trim();
        let skip = text.chars().count().saturating_sub(max_chars);
        text.chars().skip(skip).collect()
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    /// The deadline passed before the child exited and its output closed.
    pub timed_out: bool,
}

impl CommandOutput {
    /// Exit code as text, or `signal` when the child was terminated by one.
    pub fn exit_label(&self) -> String {
        self.status
            .code()
            .map_or_else(|| "signal".to_string(), |code| code.to_string())
    }
}

#[derive(Debug, Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

type Chunk = (Stream, Result<Captured>);

/// Run `cmd` with stdin closed, killing its process group once `limits.timeout` passes.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.as_secs_f64()))]
pub fn run_bounded(mut cmd: Command, limits: Limits) -> Result<CommandOutput> {
    let deadline = Instant::now() + limits.timeout;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    let mut child = cmd.spawn().context("spawn command")?;

    let (tx, rx) = mpsc::channel();
    drain(Stream::Stdout, child.stdout.take(), limits.output_bytes, tx.clone())?;
    drain(Stream::Stderr, child.stderr.take(), limits.output_bytes, tx)?;

    let (status, exited_late) = match child.wait_timeout(limits.timeout).context("wait for command")? {
        Some(status) => (status, false),
        None => {
            warn!(
                timeout_secs = limits.timeout.as_secs_f64(),
                "command exceeded its deadline, killing"
            );
            kill_tree(&mut child);
            (child.wait().context("reap killed command")?, true)
        }
    };

    let pid = child.id();
    let (stdout, stderr, output_late) = collect(&rx, deadline, || kill_group(pid))?;
    if output_late && !exited_late {
        warn!(pid, "command left processes holding its output past the deadline");
    }
    let output = CommandOutput {
        status,
        stdout,
        stderr,
        timed_out: exited_late || output_late,
    };
    if output.stdout.dropped > 0 || output.stderr.dropped > 0 {
        debug!(
            stdout_dropped = output.stdout.dropped,
            stderr_dropped = output.stderr.dropped,
            "command output capped"
        );
    }
    Ok(output)
}

fn drain<R: Read + Send + 'static>(
    which: Stream,
    stream: Option<R>,
    cap: usize,
    tx: Sender<Chunk>,
) -> Result<()> {
    let mut stream = stream.ok_or_else(|| anyhow!("child stream was not piped"))?;
    thread::spawn(move || {
        let read = read_capped(&mut stream, cap);
        // The receiver is gone once the run gave up on this stream.
        tx.send((which, read)).ok();
    });
    Ok(())
}

fn read_capped(stream: &mut impl Read, cap: usize) -> Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = stream.read(&mut chunk).context("read child output")?;
        if n == 0 {
            return Ok(captured);
        }
        let keep = n.min(cap.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }
}

/// Wait for both streams until `deadline`. If they are still open then, call
/// `kill` and allow [`READER_GRACE`] more before abandoning the readers.
///
/// Returns the streams and whether the deadline was hit.
fn collect(
    rx: &Receiver<Chunk>,
    deadline: Instant,
    kill: impl Fn(),
) -> Result<(Captured, Captured, bool)> {
    let mut stdout = None;
    let mut stderr = None;
    let mut late = false;
    let mut wait_until = deadline;
    while stdout.is_none() || stderr.is_none() {
        let remaining = wait_until.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok((Stream::Stdout, read)) => stdout = Some(read.context("collect stdout")?),
            Ok((Stream::Stderr, read)) => stderr = Some(read.context("collect stderr")?),
            Err(RecvTimeoutError::Timeout) if !late => {
                late = true;
                kill();
                wait_until = Instant::now() + READER_GRACE;
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!("command output still open after kill, abandoning readers");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => bail!("output reader thread panicked"),
        }
    }
    Ok((stdout.unwrap_or_default(), stderr.unwrap_or_default(), late))
}

fn kill_tree(child: &mut Child) {
    kill_group(child.id());
    if let Err(err) = child.kill() {
        debug!(err = %err, "kill command");
    }
}

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::errno::Errno;
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(err) = killpg(Pid::from_raw(raw), Signal::SIGKILL)
        && err != Errno::ESRCH
    {
        debug!(pid, err = %err, "kill process group");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn limits(timeout_ms: u64, output_bytes: usize) -> Limits {
        Limits {
            timeout: Duration::from_millis(timeout_ms),
            output_bytes,
        }
    }

    #[test]
    fn captures_both_streams_and_exit_code() {
        let out = run_bounded(sh("echo hello; echo oops >&2; exit 3"), limits(10_000, 1000))
            .expect("run");
        assert_eq!(out.exit_label(), "3");
        assert_eq!(out.stdout.lossy(), "hello\n");
        assert_eq!(out.stderr.tail(100), "oops");
        assert!(!out.timed_out);
    }

    #[test]
    fn output_beyond_cap_is_dropped() {
        let out = run_bounded(sh("printf 0123456789"), limits(10_000, 4)).expect("run");
        assert_eq!(out.stdout.bytes, b"0123");
        assert_eq!(out.stdout.dropped, 6);
    }

    #[test]
    fn tail_keeps_last_characters() {
        let captured = Captured {
            bytes: b"  first line\nlast line\n".to_vec(),
            dropped: 0,
        };
        assert_eq!(captured.tail(9), "last line");
    }

    #[test]
    fn background_process_holding_output_is_bounded_by_deadline() {
        let started = Instant::now();
        let out = run_bounded(sh("sleep 5 & exit 0"), limits(1000, 1000)).expect("run");
        assert!(out.timed_out);
        assert_eq!(out.exit_label(), "0");
        assert!(
            started.elapsed() < Duration::from_secs(4),
            "took {:?}",
            started.elapsed()
        );
    }

    #[test]
    fn background_process_is_killed_with_timed_out_child() {
        let started = Instant::now();
        let out = run_bounded(sh("sleep 5 & sleep 5"), limits(500, 1000)).expect("run");
        assert!(out.timed_out);
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn deadline_kills_child() {
        let out = run_bounded(sh("exec sleep 5"), limits(100, 1000)).expect("run");
        assert!(out.timed_out);
        assert_eq!(out.exit_label(), "signal");
    }
}
