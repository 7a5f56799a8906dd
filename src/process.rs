//! Child process execution for the bridge's `processExec`.
//!
//! Programs are started directly with a literal argument list; nothing goes
//! through a shell.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::options::{ExecOptions, ExecResult};

/// Exit code reported when the child never started or was killed.
pub const FAILED_EXIT_CODE: i32 = -1;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Run a process to completion and capture its output.
///
/// Never fails: a spawn error becomes a result with exit code -1 and the
/// reason in `stderr`. When `timeout_ms` elapses the child is killed and
/// whatever it printed so far is returned with `timed_out` set.
pub fn exec(options: &ExecOptions) -> ExecResult {
    if options.command.trim().is_empty() {
        return start_failure("command is empty");
    }

    let mut command = Command::new(&options.command);
    command
        .args(&options.args)
        .envs(&options.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(cwd) = options.cwd.as_deref().filter(|c| !c.trim().is_empty()) {
        command.current_dir(cwd);
    }

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::debug!(command = %options.command, error = %e, "spawn failed");
            return start_failure(&e.to_string());
        }
    };

    let stdout = capture(child.stdout.take());
    let stderr = capture(child.stderr.take());
    let timeout = options.timeout_ms.map(Duration::from_millis);

    let (exit_code, timed_out) = match wait(&mut child, timeout) {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(command = %options.command, error = %e, "waiting on child failed");
            let _ = child.kill();
            let _ = child.wait();
            (FAILED_EXIT_CODE, false)
        }
    };

    let stdout = collect(stdout);
    let mut stderr = collect(stderr);
    if timed_out {
        tracing::info!(command = %options.command, ?timeout, "process timed out and was killed");
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!(
            "Process timed out after {} ms",
            options.timeout_ms.unwrap_or_default()
        ));
    }

    ExecResult {
        exit_code,
        stdout,
        stderr,
        timed_out,
    }
}

fn start_failure(reason: &str) -> ExecResult {
    ExecResult {
        exit_code: FAILED_EXIT_CODE,
        stdout: String::new(),
        stderr: format!("Failed to start process: {reason}"),
        timed_out: false,
    }
}

/// Block until the child exits or the deadline passes. Returns the exit
/// code and whether the child had to be killed.
fn wait(child: &mut Child, timeout: Option<Duration>) -> std::io::Result<(i32, bool)> {
    let Some(timeout) = timeout else {
        let status = child.wait()?;
        return Ok((status.code().unwrap_or(FAILED_EXIT_CODE), false));
    };

    let deadline = Instant::now() + timeout;
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok((status.code().unwrap_or(FAILED_EXIT_CODE), false));
        }
        if Instant::now() >= deadline {
            child.kill()?;
            child.wait()?;
            return Ok((FAILED_EXIT_CODE, true));
        }
        thread::sleep(POLL_INTERVAL);
    }
}

fn capture<R: Read + Send + 'static>(stream: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    stream.map(|mut stream| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = stream.read_to_end(&mut buffer);
            buffer
        })
    })
}

fn collect(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(command: &str, args: &[&str]) -> ExecOptions {
        ExecOptions {
            command: command.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn missing_program_reports_start_failure() {
        let result = exec(&options("definitely-not-a-real-program-4711", &[]));
        assert_eq!(result.exit_code, -1);
        assert!(result.stdout.is_empty());
        assert!(result.stderr.starts_with("Failed to start process:"));
        assert!(!result.timed_out);
    }

    #[test]
    fn empty_command_is_rejected_without_spawning() {
        let result = exec(&options("  ", &[]));
        assert_eq!(result.exit_code, -1);
        assert!(!result.stderr.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn arguments_are_passed_literally() {
        let result = exec(&options("echo", &["$HOME", "a b"]));
        assert_eq!(result.exit_code, 0);
        assert_eq!(result.stdout, "$HOME a b\n");
    }

    #[cfg(unix)]
    #[test]
    fn exit_code_stderr_and_env_are_captured() {
        let mut opts = options("sh", &["-c", "printf \"$GREETING\" >&2; exit 3"]);
        opts.env.insert("GREETING".into(), "hi".into());
        let result = exec(&opts);
        assert_eq!(result.exit_code, 3);
        assert_eq!(result.stderr, "hi");
    }

    #[cfg(unix)]
    #[test]
    fn working_directory_is_honored() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut opts = options("pwd", &[]);
        opts.cwd = Some(dir.path().to_string_lossy().into_owned());
        let result = exec(&opts);
        let printed = std::path::PathBuf::from(result.stdout.trim());
        assert_eq!(
            printed.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_the_child() {
        let mut opts = options("sleep", &["5"]);
        opts.timeout_ms = Some(100);
        let started = Instant::now();
        let result = exec(&opts);
        assert!(started.elapsed() < Duration::from_secs(4));
        assert!(result.timed_out);
        assert_eq!(result.exit_code, -1);
        assert!(result.stderr.contains("timed out"));
    }
}
