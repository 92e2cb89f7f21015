//! Pseudo-terminal wrapper (§4.5) for agent invocation.
//!
//! Most agent CLIs buffer line-by-line only when attached to a TTY; running
//! them under a PTY gives real-time log tailing instead of block-buffered
//! output that only appears at exit.

use std::io::{Read, Write};
use std::path::Path;

use portable_pty::{native_pty_system, CommandBuilder, PtySize};

use crate::error::LineError;

/// Spawn `command` with `args` inside a PTY, writing `stdin_text` to the
/// child's stdin, copying the PTY master's output to `on_output` as it
/// arrives, and returning the exit code once the child finishes.
///
/// `on_output` is called once per successful read with the raw bytes
/// decoded lossily; callers append this straight to the station log.
pub fn run_in_pty<F>(
    command: &str,
    args: &[String],
    cwd: &Path,
    env: &[(String, String)],
    stdin_text: &str,
    mut on_output: F,
) -> Result<Option<i32>, LineError>
where
    F: FnMut(&str),
{
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: 48,
            cols: 200,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| LineError::PtySetupFailed {
            detail: e.to_string(),
        })?;

    let mut cmd = CommandBuilder::new(command);
    for arg in args {
        cmd.arg(arg);
    }
    cmd.cwd(cwd);
    for (key, value) in env {
        cmd.env(key, value);
    }

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| LineError::AgentSpawnFailed {
            command: command.to_string(),
            detail: e.to_string(),
        })?;
    // The slave side belongs to the child now; drop the parent's copy so
    // the master sees EOF once the child exits.
    drop(pair.slave);

    let mut reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| LineError::PtySetupFailed {
            detail: e.to_string(),
        })?;
    let mut writer = pair.master.take_writer().map_err(|e| LineError::PtySetupFailed {
        detail: e.to_string(),
    })?;

    if !stdin_text.is_empty() {
        let _ = writer.write_all(stdin_text.as_bytes());
        let _ = writer.flush();
    }
    drop(writer);

    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => on_output(&String::from_utf8_lossy(&buf[..n])),
            // EIO at EOF is the expected way a PTY master reports the
            // slave side closing; anything else propagates.
            Err(e) if e.raw_os_error() == Some(libc_eio()) => break,
            Err(e) => {
                return Err(LineError::PtySetupFailed {
                    detail: e.to_string(),
                });
            }
        }
    }

    let status = child.wait().map_err(|e| LineError::AgentSpawnFailed {
        command: command.to_string(),
        detail: e.to_string(),
    })?;
    Ok(status.exit_code().try_into().ok())
}

#[cfg(unix)]
fn libc_eio() -> i32 {
    5
}

#[cfg(not(unix))]
fn libc_eio() -> i32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = String::new();
        let code = run_in_pty(
            "sh",
            &["-c".to_string(), "echo hello-from-pty".to_string()],
            dir.path(),
            &[],
            "",
            |chunk| output.push_str(chunk),
        )
        .unwrap();
        assert_eq!(code, Some(0));
        assert!(output.contains("hello-from-pty"));
    }

    #[test]
    fn non_zero_exit_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let code = run_in_pty(
            "sh",
            &["-c".to_string(), "exit 3".to_string()],
            dir.path(),
            &[],
            "",
            |_| {},
        )
        .unwrap();
        assert_eq!(code, Some(3));
    }

    #[test]
    fn stdin_is_delivered_to_child() {
        let dir = tempfile::tempdir().unwrap();
        let mut output = String::new();
        run_in_pty(
            "cat",
            &[],
            dir.path(),
            &[],
            "piped input\n",
            |chunk| output.push_str(chunk),
        )
        .unwrap();
        assert!(output.contains("piped input"));
    }
}
