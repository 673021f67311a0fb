use crate::ExtractError;
use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs `program args...` and returns its stdout.
///
/// The child is killed once `timeout` elapses. Stdout and stderr are drained
/// on their own threads so a chatty tool cannot fill a pipe and stall.
pub fn run_tool(program: &Path, args: &[String], timeout: Duration) -> Result<String, ExtractError> {
    let label = program.display().to_string();
    log::debug!("running {} {}", label, args.join(" "));

    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| ExtractError::Spawn {
            program: label.clone(),
            message: err.to_string(),
        })?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = thread::spawn(move || drain(stdout));
    let stderr_reader = thread::spawn(move || drain(stderr));

    let deadline = Instant::now() + timeout;
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) => {
                if Instant::now() >= deadline {
                    let _ = child.kill();
                    let _ = child.wait();
                    log::warn!("{} killed after {}s", label, timeout.as_secs());
                    return Err(ExtractError::Timeout {
                        program: label,
                        timeout_secs: timeout.as_secs(),
                    });
                }
                thread::sleep(POLL_INTERVAL);
            }
            Err(err) => {
                let _ = child.kill();
                return Err(ExtractError::io(None, err));
            }
        }
    };

    let stdout = stdout_reader.join().unwrap_or_default();
    let stderr = stderr_reader.join().unwrap_or_default();

    if !status.success() {
        return Err(ExtractError::ToolFailed {
            program: label,
            status: status.code(),
            stderr,
        });
    }
    Ok(stdout)
}

fn drain<R: Read>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buf);
    }
    String::from_utf8_lossy(&buf).into_owned()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[test]
    fn captures_stdout() {
        let out = run_tool(Path::new("/bin/sh"), &sh("echo hello"), Duration::from_secs(10))
            .expect("runs");
        assert_eq!(out.trim(), "hello");
    }

    #[test]
    fn nonzero_exit_carries_stderr() {
        let err = run_tool(
            Path::new("/bin/sh"),
            &sh("echo broken >&2; exit 3"),
            Duration::from_secs(10),
        )
        .expect_err("must fail");
        match err {
            ExtractError::ToolFailed { status, stderr, .. } => {
                assert_eq!(status, Some(3));
                assert!(stderr.contains("broken"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn slow_tool_times_out() {
        let started = Instant::now();
        let err = run_tool(Path::new("/bin/sh"), &sh("exec sleep 5"), Duration::from_millis(200))
            .expect_err("must time out");
        assert_eq!(err.code(), "TOOL_TIMEOUT");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[test]
    fn missing_program_is_spawn_error() {
        let err = run_tool(
            Path::new("/nonexistent/torsion-a-tool"),
            &[],
            Duration::from_secs(1),
        )
        .expect_err("must fail");
        assert_eq!(err.code(), "TOOL_SPAWN");
    }
}
