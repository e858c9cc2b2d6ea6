//! Helpers for running child processes with live, teed output.

use std::io::{Read, Write};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use tracing::{debug, error, instrument, trace, warn};
use wait_timeout::ChildExt;

/// Status code recorded when a run is killed for exceeding its timeout.
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Status code recorded when no real exit code can be obtained.
pub const UNKNOWN_EXIT_CODE: i32 = -1;

/// How long readers get to hit EOF once the process group has been killed.
const KILLED_OUTPUT_GRACE: Duration = Duration::from_secs(1);

/// Destination for one output stream.
pub type Sink = Box<dyn Write + Send>;

/// Every sink receives every chunk of the matching stream, flushed as it arrives.
#[derive(Default)]
pub struct OutputSinks {
    pub stdout: Vec<Sink>,
    pub stderr: Vec<Sink>,
}

/// Bounds on how long [`run_teed`] waits for a child and its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitLimits {
    /// Tick between exit checks.
    pub poll_interval: Duration,
    /// Limit on the whole run, draining its output included.
    pub timeout: Option<Duration>,
    /// How long the pipes may stay open after the child exits, e.g. held by
    /// a backgrounded grandchild, before its process group is killed.
    pub output_grace: Duration,
}

/// How a teed child process ended.
#[derive(Debug)]
pub struct TeedExit {
    pub status: ExitStatus,
    pub timed_out: bool,
    pub stdout_bytes: u64,
    pub stderr_bytes: u64,
    /// First failure writing to a sink. The pipes were still drained to the end.
    pub sink_error: Option<anyhow::Error>,
    /// A reader was abandoned because something outside the process group
    /// kept its pipe open. Byte counts only cover what was read until then.
    pub output_detached: bool,
}

impl TeedExit {
    /// Exit code to record for this process.
    pub fn code(&self) -> i32 {
        if self.timed_out {
            return TIMEOUT_EXIT_CODE;
        }
        self.status.code().unwrap_or(UNKNOWN_EXIT_CODE)
    }
}

/// Run a command, teeing stdout/stderr into `sinks` until it exits.
///
/// Output is drained on reader threads while the child runs, so neither pipe can
/// fill up. The child is checked every `poll_interval`; with a `timeout` its
/// process group is killed once the limit passes. After the child exits its
/// output gets `output_grace` (capped by the timeout) to reach EOF; past that
/// the process group is killed and readers that still hang are detached.
#[instrument(skip_all, fields(timeout_secs = limits.timeout.map(|t| t.as_secs())))]
pub fn run_teed(mut cmd: Command, sinks: OutputSinks, limits: WaitLimits) -> Result<TeedExit> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let started = Instant::now();
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let OutputSinks {
        stdout: stdout_sinks,
        stderr: stderr_sinks,
    } = sinks;
    let (done_tx, done_rx) = mpsc::channel();
    spawn_tee(Stream::Stdout, stdout, stdout_sinks, done_tx.clone());
    spawn_tee(Stream::Stderr, stderr, stderr_sinks, done_tx);

    let (status, mut timed_out) = wait_polling(&mut child, started, limits)?;

    let mut drained = Drained::default();
    let deadline = if timed_out {
        Instant::now() + KILLED_OUTPUT_GRACE
    } else {
        let grace = Instant::now() + limits.output_grace;
        limits
            .timeout
            .map_or(grace, |limit| grace.min(started + limit))
    };
    let mut complete = drained.collect(&done_rx, deadline)?;
    if !complete && !timed_out {
        timed_out = limits.timeout.is_some_and(|limit| started.elapsed() >= limit);
        warn!(timed_out, "output still open after command exited, killing process group");
        kill_group(child.id());
        complete = drained.collect(&done_rx, Instant::now() + KILLED_OUTPUT_GRACE)?;
    }
    if !complete {
        warn!("output pipes held outside the process group, detaching readers");
    }

    let (stdout_bytes, stdout_err) = drained.stdout.unwrap_or_default();
    let (stderr_bytes, stderr_err) = drained.stderr.unwrap_or_default();
    let sink_error = stdout_err.or(stderr_err);
    if let Some(err) = &sink_error {
        warn!(err = %err, "output sink failed");
    }

    debug!(exit_code = ?status.code(), timed_out, stdout_bytes, stderr_bytes, "command finished");
    Ok(TeedExit {
        status,
        timed_out,
        stdout_bytes,
        stderr_bytes,
        sink_error,
        output_detached: !complete,
    })
}

fn wait_polling(
    child: &mut Child,
    started: Instant,
    limits: WaitLimits,
) -> Result<(ExitStatus, bool)> {
    let WaitLimits {
        poll_interval,
        timeout,
        ..
    } = limits;
    loop {
        let tick = match timeout {
            Some(limit) => poll_interval.min(limit.saturating_sub(started.elapsed())),
            None => poll_interval,
        };
        if let Some(status) = child.wait_timeout(tick).context("wait for command")? {
            return Ok((status, false));
        }
        if let Some(limit) = timeout
            && started.elapsed() >= limit
        {
            warn!(timeout_secs = limit.as_secs(), "command timed out, killing");
            kill_group(child.id());
            child.kill().or_else(|err| {
                // Already exited between the last poll and the kill.
                if err.kind() == std::io::ErrorKind::InvalidInput {
                    Ok(())
                } else {
                    Err(err)
                }
            })
            .context("kill command")?;
            let status = child.wait().context("wait command after kill")?;
            return Ok((status, true));
        }
        trace!(elapsed_secs = started.elapsed().as_secs(), "command still running");
    }
}

/// Kill the child's process group so grandchildren release the output pipes.
#[cfg(unix)]
fn kill_group(pgid: u32) {
    let group = format!("-{pgid}");
    let result = Command::new("kill")
        .args(["-KILL", "--", &group])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    if let Err(err) = result {
        warn!(err = %err, "failed to kill process group");
    }
}

#[cfg(not(unix))]
fn kill_group(_pgid: u32) {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Stdout,
    Stderr,
}

/// Bytes read from one stream and the first failure while teeing it.
type TeeResult = (u64, Option<anyhow::Error>);

/// Tee `reader` on its own thread and report the result on `done`.
///
/// The thread is never joined, so a reader stuck on a pipe held by some
/// unrelated process cannot block the run.
fn spawn_tee<R>(stream: Stream, reader: R, sinks: Vec<Sink>, done: Sender<(Stream, TeeResult)>)
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        let result = tee_stream(reader, sinks);
        // Nobody listens any more once the run detached this reader.
        let _ = done.send((stream, result));
    });
}

#[derive(Default)]
struct Drained {
    stdout: Option<TeeResult>,
    stderr: Option<TeeResult>,
}

impl Drained {
    /// Receive reader results until both streams hit EOF or `deadline` passes.
    /// Returns whether both streams are done.
    fn collect(&mut self, done: &Receiver<(Stream, TeeResult)>, deadline: Instant) -> Result<bool> {
        while self.stdout.is_none() || self.stderr.is_none() {
            match done.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
                Ok((Stream::Stdout, result)) => self.stdout = Some(result),
                Ok((Stream::Stderr, result)) => self.stderr = Some(result),
                Err(RecvTimeoutError::Timeout) => return Ok(false),
                Err(RecvTimeoutError::Disconnected) => bail!("output reader thread panicked"),
            }
        }
        Ok(true)
    }
}

/// Copy `reader` into every sink chunk by chunk, flushing after each chunk.
///
/// A failing sink is dropped and the first failure is returned alongside the
/// byte count; the stream is always drained to EOF.
fn tee_stream<R: Read>(mut reader: R, mut sinks: Vec<Sink>) -> (u64, Option<anyhow::Error>) {
    let mut total = 0u64;
    let mut first_error = None;
    let mut chunk = [0u8; 8192];

    loop {
        let n = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                if first_error.is_none() {
                    first_error = Some(anyhow::Error::new(e).context("read output"));
                }
                break;
            }
        };
        total += n as u64;
        sinks.retain_mut(|sink| {
            match sink.write_all(&chunk[..n]).and_then(|()| sink.flush()) {
                Ok(()) => true,
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(anyhow::Error::new(e).context("write output"));
                    }
                    false
                }
            }
        });
    }

    (total, first_error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().expect("lock")).into_owned()
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    struct BrokenSink;

    impl Write for BrokenSink {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("remote gone"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn sh(script: &str) -> Command {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(script);
        cmd
    }

    fn limits(timeout: Option<Duration>) -> WaitLimits {
        WaitLimits {
            poll_interval: Duration::from_millis(20),
            timeout,
            output_grace: Duration::from_secs(2),
        }
    }

    #[test]
    fn tees_both_streams_to_every_sink() {
        let (out_a, out_b, err_a) = (SharedBuf::default(), SharedBuf::default(), SharedBuf::default());
        let sinks = OutputSinks {
            stdout: vec![Box::new(out_a.clone()), Box::new(out_b.clone())],
            stderr: vec![Box::new(err_a.clone())],
        };

        let exit = run_teed(
            sh("echo out; echo err >&2; exit 3"),
            sinks,
            limits(None),
        )
        .expect("run");

        assert_eq!(exit.code(), 3);
        assert!(!exit.timed_out);
        assert!(exit.sink_error.is_none());
        assert_eq!(out_a.contents(), "out\n");
        assert_eq!(out_b.contents(), "out\n");
        assert_eq!(err_a.contents(), "err\n");
        assert_eq!(exit.stdout_bytes, 4);
    }

    #[test]
    fn broken_sink_is_reported_and_others_still_fed() {
        let good = SharedBuf::default();
        let sinks = OutputSinks {
            stdout: vec![Box::new(BrokenSink), Box::new(good.clone())],
            stderr: Vec::new(),
        };

        let exit = run_teed(sh("echo hello"), sinks, limits(None)).expect("run");

        assert_eq!(exit.code(), 0);
        assert_eq!(good.contents(), "hello\n");
        let err = exit.sink_error.expect("sink error");
        assert!(format!("{err:#}").contains("remote gone"));
    }

    #[test]
    fn timeout_kills_and_reports_timeout_code() {
        let started = Instant::now();
        let exit = run_teed(
            sh("sleep 30; echo never"),
            OutputSinks::default(),
            limits(Some(Duration::from_millis(200))),
        )
        .expect("run");

        assert!(exit.timed_out);
        assert_eq!(exit.code(), TIMEOUT_EXIT_CODE);
        assert!(started.elapsed() < Duration::from_secs(20));
    }

    #[test]
    fn spawn_failure_is_error() {
        let err = run_teed(
            Command::new("/nonexistent/definitely-not-here"),
            OutputSinks::default(),
            limits(None),
        )
        .unwrap_err();
        assert!(err.to_string().contains("spawn command"));
    }

    #[test]
    fn backgrounded_grandchild_does_not_hold_the_run_open() {
        let out = SharedBuf::default();
        let sinks = OutputSinks {
            stdout: vec![Box::new(out.clone())],
            stderr: Vec::new(),
        };
        let started = Instant::now();

        let exit = run_teed(
            sh("sleep 30 & echo started"),
            sinks,
            WaitLimits {
                output_grace: Duration::from_millis(200),
                ..limits(None)
            },
        )
        .expect("run");

        assert!(started.elapsed() < Duration::from_secs(10));
        assert_eq!(exit.code(), 0);
        assert!(!exit.timed_out);
        assert!(!exit.output_detached);
        assert_eq!(out.contents(), "started\n");
    }

    #[test]
    fn timeout_bounds_output_drain_after_exit() {
        let started = Instant::now();

        let exit = run_teed(
            sh("sleep 30 & echo started"),
            OutputSinks::default(),
            WaitLimits {
                output_grace: Duration::from_secs(60),
                ..limits(Some(Duration::from_millis(300)))
            },
        )
        .expect("run");

        assert!(started.elapsed() < Duration::from_secs(10));
        assert!(exit.timed_out);
        assert_eq!(exit.code(), TIMEOUT_EXIT_CODE);
    }
}
