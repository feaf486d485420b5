//! Subprocess execution with a deadline
//!
//! Headless office converters are known to hang on malformed input or a
//! locked profile, so every run is polled against a timeout and killed once
//! it elapses. `libreoffice` is a launcher: the process doing the work is a
//! grandchild, so the converter runs in its own process group and the whole
//! group is killed.

use crate::error::{ConvertError, Result};
use std::io::{ErrorKind, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Diagnostic output kept on failure, in characters
pub const MAX_DIAGNOSTIC_CHARS: usize = 1000;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Extra time granted for draining pipes when the converter exits right at
/// the deadline
const PIPE_GRACE: Duration = Duration::from_millis(200);

type SharedBuf = Arc<Mutex<Vec<u8>>>;

/// Captured result of one converter run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterOutput {
    /// `None` when the process was terminated by a signal
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ConverterOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// stdout followed by stderr, skipping empty streams
    pub fn combined(&self) -> String {
        let parts: Vec<&str> = [self.stdout.trim(), self.stderr.trim()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect();
        parts.join("\n")
    }
}

/// Run `command` to completion, killing its process group if it outlives
/// `timeout`.
///
/// stdin is closed; stdout and stderr are drained on helper threads so a
/// child that fills a pipe buffer cannot stall. Descendants that keep the
/// pipes open after the converter exits are killed once the deadline passes,
/// and whatever output was read by then is returned.
pub fn run_with_timeout(command: &mut Command, timeout: Duration) -> Result<ConverterOutput> {
    let binary = command.get_program().to_string_lossy().into_owned();

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }

    let start = Instant::now();
    let deadline = start + timeout;
    let mut child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| ConvertError::Spawn {
            binary: binary.clone(),
            source,
        })?;

    let (done_tx, done_rx) = mpsc::channel();
    let stdout = drain(child.stdout.take(), done_tx.clone());
    let stderr = drain(child.stderr.take(), done_tx);

    let status = match wait_until(&mut child, deadline) {
        Ok(Some(status)) => status,
        Ok(None) => {
            warn!("{binary} still running after {timeout:?} - killing process group");
            kill_tree(&mut child);
            let _ = child.wait(); // Reap zombie
            return Err(ConvertError::Timeout(timeout));
        }
        Err(e) => {
            kill_tree(&mut child);
            let _ = child.wait();
            return Err(e.into());
        }
    };

    let mut open_pipes = 2;
    while open_pipes > 0 {
        let remaining = deadline.saturating_duration_since(Instant::now()).max(PIPE_GRACE);
        match done_rx.recv_timeout(remaining) {
            Ok(()) => open_pipes -= 1,
            Err(RecvTimeoutError::Timeout) => {
                warn!("{binary} exited but descendants still hold its output - killing process group");
                kill_group(child.id());
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let output = ConverterOutput {
        exit_code: status.code(),
        stdout: snapshot(&stdout),
        stderr: snapshot(&stderr),
    };
    debug!(
        "{binary} exited with {:?} after {:?}",
        output.exit_code,
        start.elapsed()
    );
    Ok(output)
}

/// Poll until the child exits (`Some`) or the deadline passes (`None`)
fn wait_until(child: &mut Child, deadline: Instant) -> std::io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn kill_tree(child: &mut Child) {
    kill_group(child.id());
    let _ = child.kill();
}

/// SIGKILL every process in the group led by `pid`
#[cfg(unix)]
fn kill_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg only sends a signal; the group was created by
    // process_group(0) at spawn, so its id is the child's pid.
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

/// Read `pipe` to EOF into a shared buffer, signalling `done` at the end.
/// The buffer stays readable while the thread is still running.
fn drain<R: Read + Send + 'static>(pipe: Option<R>, done: Sender<()>) -> SharedBuf {
    let buf = SharedBuf::default();
    let Some(mut pipe) = pipe else {
        let _ = done.send(());
        return buf;
    };
    let sink = Arc::clone(&buf);
    thread::spawn(move || {
        let mut chunk = [0u8; 8192];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if let Ok(mut buf) = sink.lock() {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(_) => break,
            }
        }
        let _ = done.send(());
    });
    buf
}

fn snapshot(buf: &SharedBuf) -> String {
    buf.lock()
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default()
}

/// Cut `text` to at most `max_chars` characters, marking the cut with `...`
pub fn truncate_output(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}...", &text[..byte_idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short_text_unchanged() {
        assert_eq!(truncate_output("conversion ok", 1000), "conversion ok");
        assert_eq!(truncate_output("", 10), "");
    }

    #[test]
    fn test_truncate_long_text() {
        let text = "x".repeat(1500);
        let truncated = truncate_output(&text, MAX_DIAGNOSTIC_CHARS);
        assert_eq!(truncated.len(), 1003);
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        let text = "文档转换失败".repeat(10);
        let truncated = truncate_output(&text, 5);
        assert_eq!(truncated, "文档转换失...");
    }

    #[test]
    fn test_truncate_exact_length() {
        let text = "abcde";
        assert_eq!(truncate_output(text, 5), "abcde");
    }

    #[test]
    fn test_combined_output() {
        let output = ConverterOutput {
            exit_code: Some(1),
            stdout: "convert /in/a.docx -> /out/a.pdf\n".to_string(),
            stderr: "Error: source file could not be loaded\n".to_string(),
        };
        assert_eq!(
            output.combined(),
            "convert /in/a.docx -> /out/a.pdf\nError: source file could not be loaded"
        );
        assert!(!output.success());
    }

    #[test]
    fn test_combined_output_skips_empty_streams() {
        let output = ConverterOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: "warn: font substituted".to_string(),
        };
        assert_eq!(output.combined(), "warn: font substituted");
        assert!(output.success());
    }

    #[test]
    fn test_spawn_missing_binary() {
        let mut cmd = Command::new("office-convert-definitely-missing-binary");
        let err = run_with_timeout(&mut cmd, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, ConvertError::Spawn { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn test_run_captures_output_and_exit_code() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo converted; echo warning >&2; exit 3"]);
        let output = run_with_timeout(&mut cmd, Duration::from_secs(10)).unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "converted");
        assert_eq!(output.stderr.trim(), "warning");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_kills_on_timeout() {
        let mut cmd = Command::new("sleep");
        cmd.arg("30");
        let start = Instant::now();
        let err = run_with_timeout(&mut cmd, Duration::from_millis(200)).unwrap_err();
        assert!(matches!(err, ConvertError::Timeout(_)));
        assert!(start.elapsed() < Duration::from_secs(10));
    }

    /// Whether `pid` is alive and not a zombie
    #[cfg(target_os = "linux")]
    fn is_running(pid: u32) -> bool {
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit(')')
                .next()
                .and_then(|rest| rest.trim_start().chars().next())
                .is_some_and(|state| state != 'Z' && state != 'X'),
            Err(_) => false,
        }
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_timeout_kills_forked_worker() {
        let dir = tempfile::tempdir().unwrap();
        let pidfile = dir.path().join("worker.pid");
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "sleep 30 & echo $! > \"$1\"; wait", "sh"])
            .arg(&pidfile);

        let err = run_with_timeout(&mut cmd, Duration::from_millis(500)).unwrap_err();
        assert!(matches!(err, ConvertError::Timeout(_)));

        let pid: u32 = std::fs::read_to_string(&pidfile)
            .unwrap()
            .trim()
            .parse()
            .unwrap();
        let start = Instant::now();
        while is_running(pid) && start.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(50));
        }
        assert!(!is_running(pid), "worker {pid} survived the timeout");
    }

    #[cfg(unix)]
    #[test]
    fn test_lingering_descendant_does_not_outlast_deadline() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo converted; sleep 30 & exit 0"]);

        let start = Instant::now();
        let output = run_with_timeout(&mut cmd, Duration::from_secs(1)).unwrap();
        assert!(start.elapsed() < Duration::from_secs(10));
        assert!(output.success());
        assert_eq!(output.stdout.trim(), "converted");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_large_output_does_not_block() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "i=0; while [ $i -lt 20000 ]; do echo line-$i; i=$((i+1)); done"]);
        let output = run_with_timeout(&mut cmd, Duration::from_secs(30)).unwrap();
        assert!(output.success());
        assert!(output.stdout.lines().count() >= 20000);
    }
}
