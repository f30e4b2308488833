//! Child process invocation with a deadline and bounded capture.

use std::io::{ErrorKind, Read, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// Bytes captured from one pipe, plus how many were discarded.
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    pub dropped: usize,
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

impl CommandOutput {
    /// Human-readable transcript, capped at `limit` bytes.
    pub fn transcript(&self, label: &str, limit: usize) -> String {
        let mut buf = String::new();
        for (stream, captured) in [("stdout", &self.stdout), ("stderr", &self.stderr)] {
            buf.push_str(&format!("=== {stream} ===\n"));
            buf.push_str(&captured.text());
            if captured.dropped > 0 {
                buf.push_str(&format!(
                    "\n[{label} {stream} truncated {} bytes]\n",
                    captured.dropped
                ));
            }
            buf.push('\n');
        }
        if self.timed_out {
            buf.push_str(&format!("[{label} timed out]\n"));
        }
        truncate_to(buf, limit)
    }
}

/// Run `cmd`, feeding `stdin`, killing it once `timeout` elapses.
///
/// Stdin is fed and both output pipes are drained on their own threads, so
/// neither a chatty child nor one that never reads can block past the
/// deadline. Bytes past `output_limit_bytes` are read and dropped.
#[instrument(skip_all, fields(timeout_secs = timeout.as_secs(), output_limit_bytes))]
pub fn run_command(
    mut cmd: Command,
    stdin: Option<&[u8]>,
    timeout: Duration,
    output_limit_bytes: usize,
) -> Result<CommandOutput> {
    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    });
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    debug!("spawning child process");
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(err) => {
            error!(err = %err, "failed to spawn command");
            return Err(err).context("spawn command");
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
    let stdout_handle = thread::spawn(move || capture(stdout, output_limit_bytes));
    let stderr_handle = thread::spawn(move || capture(stderr, output_limit_bytes));

    let stdin_handle = match stdin {
        Some(input) => {
            let Some(pipe) = child.stdin.take() else {
                kill_and_reap(&mut child);
                return Err(anyhow!("stdin was not piped"));
            };
            let input = input.to_vec();
            Some(thread::spawn(move || feed(pipe, &input)))
        }
        None => None,
    };

    let waited = match child.wait_timeout(timeout) {
        Ok(waited) => waited,
        Err(err) => {
            kill_and_reap(&mut child);
            return Err(err).context("wait for command");
        }
    };
    let mut timed_out = false;
    let status = match waited {
        Some(status) => status,
        None => {
            warn!(timeout_secs = timeout.as_secs(), "command timed out, killing");
            timed_out = true;
            child.kill().context("kill command")?;
            child.wait().context("wait command after kill")?
        }
    };

    if let Some(handle) = stdin_handle {
        join(handle).context("join stdin")?;
    }
    let stdout = join(stdout_handle).context("join stdout")?;
    let stderr = join(stderr_handle).context("join stderr")?;
    if stdout.dropped > 0 || stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "output truncated"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn join<T>(handle: thread::JoinHandle<Result<T>>) -> Result<T> {
    handle.join().map_err(|_| anyhow!("pipe thread panicked"))?
}

/// Write all of `input`, then close the pipe. A child that exits without
/// reading is not an error.
fn feed(mut pipe: ChildStdin, input: &[u8]) -> Result<()> {
    match pipe.write_all(input) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::BrokenPipe => {
            debug!(bytes = input.len(), "child closed stdin early");
            Ok(())
        }
        Err(err) => Err(err).context("write stdin"),
    }
}

fn kill_and_reap(child: &mut Child) {
    if let Err(err) = child.kill() {
        warn!(err = %err, "failed to kill command");
    }
    if let Err(err) = child.wait() {
        warn!(err = %err, "failed to reap command");
    }
}

fn capture<R: Read>(mut reader: R, limit: usize) -> Result<Captured> {
    let mut captured = Captured::default();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(captured.bytes.len()));
        captured.bytes.extend_from_slice(&chunk[..keep]);
        captured.dropped += n - keep;
    }
    Ok(captured)
}

/// Cut `text` to at most `limit` bytes on a char boundary, noting the cut.
pub fn truncate_to(text: String, limit: usize) -> String {
    if text.len() <= limit {
        return text;
    }
    let mut cut = limit;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n[truncated {} bytes]\n", &text[..cut], text.len() - cut)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_stdin_round_trip_through_cat() {
        let output = run_command(
            Command::new("cat"),
            Some(b"hello"),
            Duration::from_secs(10),
            1024,
        )
        .expect("run cat");
        assert!(output.status.success());
        assert_eq!(output.stdout.text(), "hello");
        assert!(!output.timed_out);
    }

    #[test]
    fn output_beyond_limit_is_counted_not_kept() {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg("printf 0123456789");
        let output = run_command(cmd, None, Duration::from_secs(10), 4).expect("run sh");
        assert_eq!(output.stdout.text(), "0123");
        assert_eq!(output.stdout.dropped, 6);
        assert!(output.transcript("llm", 10_000).contains("[llm stdout truncated 6 bytes]"));
    }

    #[test]
    fn slow_command_is_killed() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let output = run_command(cmd, None, Duration::from_millis(100), 1024).expect("run sleep");
        assert!(output.timed_out);
    }

    /// Verifies a large prompt to a child that never reads stdin still
    /// honors the deadline.
    #[test]
    fn unread_stdin_does_not_block_the_deadline() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let prompt = vec![b'x'; 4 << 20];
        let output = run_command(cmd, Some(&prompt), Duration::from_millis(200), 1024)
            .expect("run sleep");
        assert!(output.timed_out);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let text = "é".repeat(4);
        let cut = truncate_to(text, 3);
        assert!(cut.starts_with('é'));
        assert!(cut.contains("[truncated 6 bytes]"));
    }
}
